//! Registry error types
//!
//! Error types for registry and subscription operations.

use super::key::Key;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Unsubscribe called with a listener that is not subscribed to the key
    NotRegistered(Key),
    /// Key input was empty, blank or not a scalar
    InvalidKey(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::NotRegistered(key) => {
                write!(f, "Listener not registered for key: {}", key)
            }
            RegistryError::InvalidKey(reason) => write!(f, "Invalid key: {}", reason),
        }
    }
}

impl std::error::Error for RegistryError {}
