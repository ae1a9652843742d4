// src/storage/key_state.rs

use crate::config::AppConfig;
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How long a rate-limited key sits out before the health loop may revive it.
pub const RATE_LIMIT_COOLDOWN_SECS: i64 = 5 * 60;

/// State snapshots older than this are regenerated from configuration.
pub const DAILY_RESET_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    RateLimited,
    QuotaExhausted,
    Invalid,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Health record of a single API key.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub key: String,
    pub status: KeyStatus,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,
}

impl ApiKeyRecord {
    pub fn new(key: String) -> Self {
        Self {
            key,
            status: KeyStatus::Active,
            cooldown_until: None,
            last_used: None,
            failure_count: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == KeyStatus::Active
    }

    /// Applies a status transition. Every transition counts as a failure
    /// observation; only `RateLimited` carries a cooldown.
    pub fn transition(&mut self, status: KeyStatus, now: DateTime<Utc>) {
        self.status = status;
        self.last_used = Some(now);
        self.failure_count = self.failure_count.saturating_add(1);
        self.cooldown_until = match status {
            KeyStatus::RateLimited => Some(now + Duration::seconds(RATE_LIMIT_COOLDOWN_SECS)),
            _ => None,
        };
    }

    /// True for a rate-limited key whose cooldown has passed.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == KeyStatus::RateLimited && self.cooldown_until.is_some_and(|until| now > until)
    }
}

/// Persisted key health and the live provider ranking.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiState {
    pub providers: BTreeMap<String, Vec<ApiKeyRecord>>,
    pub provider_priority: Vec<String>,
    pub last_daily_reset: DateTime<Utc>,
}

impl ApiState {
    /// One active record per configured key, ranking as configured.
    pub fn fresh(config: &AppConfig, now: DateTime<Utc>) -> Self {
        let providers = config
            .provider_priority
            .iter()
            .map(|provider| {
                let records = config
                    .keys_for(provider)
                    .iter()
                    .map(|k| ApiKeyRecord::new(k.expose_secret().clone()))
                    .collect();
                (provider.clone(), records)
            })
            .collect();

        Self {
            providers,
            provider_priority: config.provider_priority.clone(),
            last_daily_reset: now,
        }
    }

    /// Aligns a loaded snapshot with the current configuration: providers and
    /// keys that are no longer configured are dropped, new ones are added as
    /// active. Returns whether anything changed.
    pub fn reconcile(&mut self, config: &AppConfig) -> bool {
        let mut changed = false;

        let before = self.provider_priority.len();
        self.provider_priority
            .retain(|p| config.provider_priority.contains(p));
        changed |= before != self.provider_priority.len();

        for provider in &config.provider_priority {
            if !self.provider_priority.contains(provider) {
                self.provider_priority.push(provider.clone());
                changed = true;
            }
        }

        let before = self.providers.len();
        self.providers
            .retain(|p, _| config.provider_priority.contains(p));
        changed |= before != self.providers.len();

        for provider in &config.provider_priority {
            let configured: Vec<&String> = config
                .keys_for(provider)
                .iter()
                .map(|k| k.expose_secret())
                .collect();
            let records = self.providers.entry(provider.clone()).or_default();

            let before = records.len();
            records.retain(|r| configured.contains(&&r.key));
            changed |= before != records.len();

            for key in configured {
                if !records.iter().any(|r| &r.key == key) {
                    records.push(ApiKeyRecord::new(key.clone()));
                    changed = true;
                }
            }
        }

        changed
    }

    pub fn daily_reset_due(&self, now: DateTime<Utc>) -> bool {
        now - self.last_daily_reset > Duration::hours(DAILY_RESET_HOURS)
    }

    /// Regenerates the snapshot from configuration. Keys already known to be
    /// invalid stay invalid; every other status, cooldown and failure count is
    /// discarded and the ranking returns to the configured order.
    pub fn reset_daily(&mut self, config: &AppConfig, now: DateTime<Utc>) {
        let mut next = Self::fresh(config, now);
        for (provider, records) in next.providers.iter_mut() {
            let Some(previous) = self.providers.get(provider) else {
                continue;
            };
            for record in records.iter_mut() {
                if let Some(old) = previous.iter().find(|r| r.key == record.key) {
                    if old.status == KeyStatus::Invalid {
                        record.status = KeyStatus::Invalid;
                        record.last_used = old.last_used;
                        record.failure_count = old.failure_count;
                    }
                }
            }
        }
        *self = next;
    }

    pub fn keys(&self, provider: &str) -> &[ApiKeyRecord] {
        self.providers.get(provider).map(Vec::as_slice).unwrap_or_default()
    }

    /// Locates the record owning `key` across all providers.
    pub fn find_key_mut(&mut self, key: &str) -> Option<(&str, &mut ApiKeyRecord)> {
        self.providers.iter_mut().find_map(|(provider, records)| {
            records
                .iter_mut()
                .find(|r| r.key == key)
                .map(|r| (provider.as_str(), r))
        })
    }

    /// Moves `provider` to the end of the ranking. Returns whether it moved.
    pub fn move_to_back(&mut self, provider: &str) -> bool {
        match self.provider_priority.iter().position(|p| p == provider) {
            Some(index) if index + 1 < self.provider_priority.len() => {
                let demoted = self.provider_priority.remove(index);
                self.provider_priority.push(demoted);
                true
            }
            _ => false,
        }
    }

    /// Moves `provider` to the front of the ranking. Returns whether it moved.
    pub fn move_to_front(&mut self, provider: &str) -> bool {
        match self.provider_priority.iter().position(|p| p == provider) {
            Some(index) if index > 0 => {
                let promoted = self.provider_priority.remove(index);
                self.provider_priority.insert(0, promoted);
                true
            }
            _ => false,
        }
    }
}
