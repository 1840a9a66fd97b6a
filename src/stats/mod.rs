//! Statistics and metrics

pub mod metrics;

pub use metrics::{ListenerStats, ListenerStatsSnapshot, RegistryStats};
