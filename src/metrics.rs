// src/metrics.rs

//! Engine counters recorded through the `metrics` facade.
//!
//! Without the `metrics` feature every recorder compiles to a no-op, so call
//! sites never need their own `cfg`. Installing an exporter is left to the
//! embedding application.

use crate::storage::KeyStatus;
use std::time::Duration;

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

pub fn record_dispatch(provider: &str, success: bool) {
    #[cfg(feature = "metrics")]
    counter!(
        "chat_relay_dispatch_total",
        "provider" => provider.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (provider, success);
}

pub fn record_key_transition(provider: &str, status: KeyStatus) {
    #[cfg(feature = "metrics")]
    counter!(
        "chat_relay_key_transitions_total",
        "provider" => provider.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (provider, status);
}

pub fn record_priority_change(provider: &str, promoted: bool) {
    #[cfg(feature = "metrics")]
    counter!(
        "chat_relay_priority_changes_total",
        "provider" => provider.to_string(),
        "direction" => if promoted { "promote" } else { "demote" }
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (provider, promoted);
}

pub fn record_cache_lookup(hit: bool) {
    #[cfg(feature = "metrics")]
    counter!(
        "chat_relay_cache_lookups_total",
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = hit;
}

pub fn record_chat_duration(duration: Duration, success: bool) {
    #[cfg(feature = "metrics")]
    histogram!(
        "chat_relay_chat_duration_seconds",
        "outcome" => if success { "success" } else { "failure" }
    )
    .record(duration.as_secs_f64());
    #[cfg(not(feature = "metrics"))]
    let _ = (duration, success);
}
