//! Registry configuration

use crate::server::config::ListenerConfig;

use super::key::DEFAULT_CONTROL_KEY;

/// Default number of updates between progress log lines
pub const DEFAULT_PROGRESS_LOG_INTERVAL: u64 = 1000;

/// Configuration for the update registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Listener started by the control key
    pub listener: ListenerConfig,

    /// Key whose first lookup starts the listener
    pub control_key: String,

    /// Log a progress line every this many updates (0 disables)
    pub progress_log_interval: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            control_key: DEFAULT_CONTROL_KEY.to_string(),
            progress_log_interval: DEFAULT_PROGRESS_LOG_INTERVAL,
        }
    }
}

impl RegistryConfig {
    /// Set the listener configuration
    pub fn listener(mut self, listener: ListenerConfig) -> Self {
        self.listener = listener;
        self
    }

    /// Set the control key
    pub fn control_key(mut self, key: impl Into<String>) -> Self {
        self.control_key = key.into();
        self
    }

    /// Set the progress log interval
    pub fn progress_log_interval(mut self, interval: u64) -> Self {
        self.progress_log_interval = interval;
        self
    }
}
