//! Key type for cells in the registry

use std::borrow::Borrow;

use super::error::RegistryError;

/// Statistics key publishing the number of distinct keys seen
pub const COUNT_KEYS: &str = "__count.keys";

/// Statistics key publishing the number of updates processed
pub const COUNT_UPDATES: &str = "__count.updates";

/// Control key whose first lookup starts the stream listener
pub const DEFAULT_CONTROL_KEY: &str = "__start";

/// Identifier of a live value cell
///
/// Always non-empty and free of surrounding whitespace, so two inputs that
/// trim to the same text are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Parse a key from raw text, trimming surrounding whitespace
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::InvalidKey("empty key".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Build one of the built-in keys, which are known to be valid
    pub(super) fn reserved(name: &'static str) -> Self {
        Self(name.to_string())
    }

    /// Get the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is one of the statistics keys
    pub fn is_stats_key(&self) -> bool {
        self.0 == COUNT_KEYS || self.0 == COUNT_UPDATES
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Key {
    type Error = RegistryError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Key::parse(raw)
    }
}

impl TryFrom<String> for Key {
    type Error = RegistryError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Key::parse(&raw)
    }
}
