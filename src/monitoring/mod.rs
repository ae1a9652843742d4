// src/monitoring/mod.rs

pub mod key_health;

pub use key_health::{CycleReport, HealthMonitor, HealthProbe};
