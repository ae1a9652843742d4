// src/key_manager.rs

use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::storage::{ApiState, KeyStateStore, KeyStatus};
use crate::utils::preview_key;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Shared registry of API key health and the live provider ranking.
///
/// Every mutation runs as one read-modify-write-persist sequence under a
/// single mutex, so concurrent dispatches and the health loop never lose or
/// interleave updates. All operations fail with
/// [`EngineError::NotInitialized`] until [`KeyRegistry::initialize`] ran.
pub struct KeyRegistry {
    config: Arc<AppConfig>,
    store: Arc<dyn KeyStateStore>,
    state: Mutex<Option<ApiState>>,
}

impl KeyRegistry {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn KeyStateStore>) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(None),
        }
    }

    /// Load or synthesize the snapshot, reconcile it with the configuration
    /// and apply the daily reset when due. Calling it again only re-runs the
    /// daily reset check.
    #[instrument(skip(self), name = "key_registry_init", level = "debug")]
    pub async fn initialize(&self) -> Result<()> {
        let mut guard = self.state.lock().await;

        let (mut state, mut dirty) = match guard.take() {
            Some(state) => (state, false),
            None => {
                let mut state = self.store.read(&self.config).await?;
                let reconciled = state.reconcile(&self.config);
                if reconciled {
                    info!("Key state reconciled with configuration");
                }
                (state, reconciled)
            }
        };

        let now = Utc::now();
        if state.daily_reset_due(now) {
            info!(
                last_reset = %state.last_daily_reset,
                "Daily reset due, regenerating key state from configuration"
            );
            state.reset_daily(&self.config, now);
            dirty = true;
        }

        let persisted = if dirty {
            self.store.write(&state).await
        } else {
            Ok(())
        };

        let total_keys: usize = state.providers.values().map(Vec::len).sum();
        info!(
            providers = ?state.provider_priority,
            total_keys,
            "Key registry initialized"
        );
        *guard = Some(state);
        persisted
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Persist the final snapshot and return the registry to its
    /// uninitialized state.
    pub async fn shutdown(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.take() {
            self.store.write(&state).await?;
            info!("Key registry shut down");
        }
        Ok(())
    }

    /// First active key of `provider` that is not in `excluded`.
    #[instrument(skip(self, excluded), level = "debug")]
    pub async fn next_available_key(
        &self,
        provider: &str,
        excluded: &HashSet<String>,
    ) -> Result<Option<String>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        let key = state
            .keys(provider)
            .iter()
            .find(|r| r.is_available() && !excluded.contains(&r.key))
            .map(|r| r.key.clone());
        if key.is_none() {
            debug!(provider, excluded = excluded.len(), "No available key");
        }
        Ok(key)
    }

    /// Move the record owning `key` to `status`; see
    /// [`ApiKeyRecord::transition`](crate::storage::ApiKeyRecord::transition).
    #[instrument(skip(self, key), fields(api_key.preview = %preview_key(key)), level = "debug")]
    pub async fn update_key_status(&self, key: &str, status: KeyStatus) -> Result<()> {
        self.mutate(|state| match state.find_key_mut(key) {
            Some((provider, record)) => {
                record.transition(status, Utc::now());
                warn!(
                    provider,
                    api_key.preview = %preview_key(key),
                    status = %status,
                    failure_count = record.failure_count,
                    cooldown_until = ?record.cooldown_until,
                    "Key status updated"
                );
                metrics::record_key_transition(provider, status);
                true
            }
            None => {
                warn!(api_key.preview = %preview_key(key), "Status update for unknown key ignored");
                false
            }
        })
        .await
    }

    /// Move `provider` to the back of the ranking.
    #[instrument(skip(self), level = "debug")]
    pub async fn demote_provider(&self, provider: &str) -> Result<()> {
        self.mutate(|state| {
            let moved = state.move_to_back(provider);
            if moved {
                info!(provider, priority = ?state.provider_priority, "Provider demoted");
                metrics::record_priority_change(provider, false);
            }
            moved
        })
        .await
    }

    /// Move `provider` to the front of the ranking.
    #[instrument(skip(self), level = "debug")]
    pub async fn set_highest_priority(&self, provider: &str) -> Result<()> {
        self.mutate(|state| {
            let moved = state.move_to_front(provider);
            if moved {
                info!(provider, priority = ?state.provider_priority, "Provider promoted");
                metrics::record_priority_change(provider, true);
            }
            moved
        })
        .await
    }

    /// Reactivate every rate-limited key whose cooldown has elapsed. Returns
    /// the number of keys reactivated.
    pub async fn reactivate_expired(&self) -> Result<usize> {
        self.mutate_with(|state| {
            let now = Utc::now();
            let mut revived = 0;
            for (provider, records) in state.providers.iter_mut() {
                for record in records.iter_mut().filter(|r| r.cooldown_elapsed(now)) {
                    record.status = KeyStatus::Active;
                    record.cooldown_until = None;
                    revived += 1;
                    info!(
                        provider = %provider,
                        api_key.preview = %preview_key(&record.key),
                        "Cooldown elapsed, key reactivated"
                    );
                }
            }
            (revived, revived > 0)
        })
        .await
    }

    /// Mark every key of `provider` active again. Returns the number of keys
    /// whose status changed.
    pub async fn reactivate_provider(&self, provider: &str) -> Result<usize> {
        self.mutate_with(|state| {
            let mut revived = 0;
            if let Some(records) = state.providers.get_mut(provider) {
                for record in records.iter_mut().filter(|r| r.status != KeyStatus::Active) {
                    record.status = KeyStatus::Active;
                    record.cooldown_until = None;
                    revived += 1;
                }
            }
            if revived > 0 {
                info!(provider, revived, "Provider keys reactivated");
            }
            (revived, revived > 0)
        })
        .await
    }

    /// Apply the daily reset if it is due. Returns whether it ran.
    pub async fn check_daily_reset(&self) -> Result<bool> {
        let config = Arc::clone(&self.config);
        self.mutate_with(move |state| {
            let now = Utc::now();
            if !state.daily_reset_due(now) {
                return (false, false);
            }
            info!("Daily reset due, regenerating key state from configuration");
            state.reset_daily(&config, now);
            (true, true)
        })
        .await
    }

    /// Current provider ranking.
    pub async fn provider_priority(&self) -> Result<Vec<String>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(state.provider_priority.clone())
    }

    /// Copy of the whole registry state, for status reporting.
    pub async fn snapshot(&self) -> Result<ApiState> {
        let guard = self.state.lock().await;
        guard.clone().ok_or(EngineError::NotInitialized)
    }

    /// Whether every key configured for `provider` is active.
    pub async fn all_keys_active(&self, provider: &str) -> Result<bool> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(state.keys(provider).iter().all(|r| r.is_available()))
    }

    /// Any configured key of `provider`, regardless of status.
    pub async fn any_key(&self, provider: &str) -> Result<Option<String>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(state.keys(provider).first().map(|r| r.key.clone()))
    }

    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ApiState) -> bool,
    {
        self.mutate_with(|state| ((), apply(state))).await
    }

    // The lock is held across the write so persisted snapshots are ordered.
    async fn mutate_with<F, R>(&self, apply: F) -> Result<R>
    where
        F: FnOnce(&mut ApiState) -> (R, bool),
    {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(EngineError::NotInitialized)?;
        let (result, changed) = apply(state);
        if changed {
            self.store.write(state).await?;
        }
        Ok(result)
    }
}
