// src/monitoring/key_health.rs

use crate::config::{AppConfig, HealthMode};
use crate::dispatcher::FallbackDispatcher;
use crate::error::Result;
use crate::key_manager::KeyRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Liveness check of a single provider.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn requires_key(&self, provider: &str) -> bool;

    async fn probe(&self, provider: &str, api_key: Option<&str>) -> bool;
}

#[async_trait]
impl HealthProbe for FallbackDispatcher {
    fn requires_key(&self, provider: &str) -> bool {
        FallbackDispatcher::requires_key(self, provider)
    }

    async fn probe(&self, provider: &str, api_key: Option<&str>) -> bool {
        FallbackDispatcher::probe(self, provider, api_key).await
    }
}

/// What one reclamation cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub skipped: bool,
    pub daily_reset: bool,
    pub reactivated: usize,
    pub promoted: Option<String>,
}

/// Background loop returning cooled-down keys to service and, in
/// [`HealthMode::ProbeAndPromote`], restoring a recovered provider that
/// ranks higher in the configured order than the current leader.
pub struct HealthMonitor {
    config: Arc<AppConfig>,
    registry: Arc<KeyRegistry>,
    probe: Arc<dyn HealthProbe>,
}

impl HealthMonitor {
    pub fn new(config: Arc<AppConfig>, registry: Arc<KeyRegistry>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            config,
            registry,
            probe,
        }
    }

    /// Run cycles on the configured interval until `shutdown` is cancelled.
    /// The first cycle runs one interval after the call.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.config.health.interval();
        let mode = self.config.health.mode;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(?mode, interval = ?period, "Health reclamation loop started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                }
            }
            info!("Health reclamation loop stopped");
        })
    }

    /// One cycle. Does nothing until the registry is initialized.
    pub async fn run_cycle(&self) -> CycleReport {
        if !self.registry.is_initialized().await {
            debug!("Key registry not initialized, skipping health cycle");
            return CycleReport {
                skipped: true,
                ..CycleReport::default()
            };
        }

        let mut report = CycleReport::default();

        match self.registry.check_daily_reset().await {
            Ok(ran) => report.daily_reset = ran,
            Err(e) => error!(error = %e, "Daily reset check failed"),
        }

        match self.registry.reactivate_expired().await {
            Ok(count) => report.reactivated = count,
            Err(e) => error!(error = %e, "Key reactivation failed"),
        }

        if self.config.health.mode == HealthMode::ProbeAndPromote {
            match self.probe_and_promote().await {
                Ok(promoted) => report.promoted = promoted,
                Err(e) => error!(error = %e, "Provider probe failed"),
            }
        }

        if report.reactivated > 0 || report.promoted.is_some() {
            info!(
                reactivated = report.reactivated,
                promoted = ?report.promoted,
                "Health cycle completed"
            );
        }
        report
    }

    /// Walk the configured order down to the current leader and promote the
    /// first degraded provider that answers a probe. At most one per cycle.
    async fn probe_and_promote(&self) -> Result<Option<String>> {
        let priority = self.registry.provider_priority().await?;
        let Some(leader) = priority.first() else {
            return Ok(None);
        };

        for provider in &self.config.provider_priority {
            if provider == leader {
                break;
            }
            if self.registry.all_keys_active(provider).await? {
                continue;
            }

            let key = if self.probe.requires_key(provider) {
                match self.registry.any_key(provider).await? {
                    Some(key) => Some(key),
                    None => continue,
                }
            } else {
                None
            };

            debug!(provider = %provider, "Probing degraded provider");
            if self.probe.probe(provider, key.as_deref()).await {
                self.registry.reactivate_provider(provider).await?;
                self.registry.set_highest_priority(provider).await?;
                info!(provider = %provider, "Recovered provider promoted");
                return Ok(Some(provider.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ApiState, InMemoryKeyStateStore, KeyStatus};
    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeProbe {
        healthy: HashSet<&'static str>,
        probed: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        fn healthy(providers: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                healthy: providers.iter().copied().collect(),
                probed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HealthProbe for FakeProbe {
        fn requires_key(&self, _provider: &str) -> bool {
            true
        }

        async fn probe(&self, provider: &str, _api_key: Option<&str>) -> bool {
            self.probed.lock().unwrap().push(provider.to_string());
            self.healthy.contains(provider)
        }
    }

    fn config(mode: HealthMode) -> Arc<AppConfig> {
        let mut config = AppConfig {
            provider_priority: vec!["gemini".into(), "groq".into(), "openai".into()],
            ..AppConfig::default()
        };
        config.health.mode = mode;
        for (provider, key) in [("gemini", "AIza-1"), ("groq", "gsk-1"), ("openai", "sk-1")] {
            config
                .api_keys
                .insert(provider.into(), vec![SecretString::new(key.into())]);
        }
        Arc::new(config)
    }

    async fn degraded_registry(config: &Arc<AppConfig>) -> Arc<KeyRegistry> {
        let mut state = ApiState::fresh(config, Utc::now());
        let past = Utc::now() - Duration::minutes(10);
        state.find_key_mut("AIza-1").unwrap().1.transition(KeyStatus::QuotaExhausted, past);
        state.find_key_mut("gsk-1").unwrap().1.transition(KeyStatus::RateLimited, Utc::now());
        state.move_to_back("gemini");
        state.move_to_back("groq");

        let registry = Arc::new(KeyRegistry::new(
            Arc::clone(config),
            Arc::new(InMemoryKeyStateStore::with_state(state)),
        ));
        registry.initialize().await.unwrap();
        registry
    }

    #[tokio::test]
    async fn uninitialized_registry_is_skipped() {
        let config = config(HealthMode::ProbeAndPromote);
        let registry = Arc::new(KeyRegistry::new(
            Arc::clone(&config),
            Arc::new(InMemoryKeyStateStore::new()),
        ));
        let monitor = HealthMonitor::new(config, registry, FakeProbe::healthy(&[]));
        assert!(monitor.run_cycle().await.skipped);
    }

    #[tokio::test]
    async fn reactivate_only_never_probes() {
        let config = config(HealthMode::ReactivateOnly);
        let registry = degraded_registry(&config).await;
        let probe = FakeProbe::healthy(&["gemini"]);
        let monitor = HealthMonitor::new(config, Arc::clone(&registry), probe.clone());

        let report = monitor.run_cycle().await;
        assert_eq!(report.reactivated, 0);
        assert_eq!(report.promoted, None);
        assert!(probe.probed.lock().unwrap().is_empty());
        assert_eq!(registry.provider_priority().await.unwrap(), vec!["openai", "gemini", "groq"]);
    }

    #[tokio::test]
    async fn promotes_first_recovered_provider_in_configured_order() {
        let config = config(HealthMode::ProbeAndPromote);
        let registry = degraded_registry(&config).await;
        let probe = FakeProbe::healthy(&["groq"]);
        let monitor = HealthMonitor::new(config, Arc::clone(&registry), probe.clone());

        let report = monitor.run_cycle().await;
        assert_eq!(report.promoted.as_deref(), Some("groq"));
        assert_eq!(*probe.probed.lock().unwrap(), vec!["gemini", "groq"]);

        let state = registry.snapshot().await.unwrap();
        assert_eq!(state.provider_priority, vec!["groq", "openai", "gemini"]);
        assert_eq!(state.keys("groq")[0].status, KeyStatus::Active);
        assert_eq!(state.keys("gemini")[0].status, KeyStatus::QuotaExhausted);
    }

    #[tokio::test]
    async fn stops_at_current_leader() {
        let config = config(HealthMode::ProbeAndPromote);
        let registry = degraded_registry(&config).await;
        registry.set_highest_priority("gemini").await.unwrap();
        let probe = FakeProbe::healthy(&["gemini", "groq"]);
        let monitor = HealthMonitor::new(config, registry, probe.clone());

        assert_eq!(monitor.run_cycle().await.promoted, None);
        assert!(probe.probed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_cancel() {
        let config = config(HealthMode::ReactivateOnly);
        let registry = degraded_registry(&config).await;
        let monitor = Arc::new(HealthMonitor::new(config, registry, FakeProbe::healthy(&[])));
        let shutdown = CancellationToken::new();
        let handle = monitor.spawn(shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
