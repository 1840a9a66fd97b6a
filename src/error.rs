//! Error types
//!
//! Crate-wide error type and result alias.

use crate::registry::RegistryError;

/// Error type for feed operations
#[derive(Debug)]
pub enum Error {
    /// Socket bind, accept or read failure
    Io(std::io::Error),
    /// Registry operation failed
    Registry(RegistryError),
}

/// Result alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Registry(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Key;

    #[test]
    fn test_display_io() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken").into();
        assert_eq!(err.to_string(), "I/O error: port taken");
    }

    #[test]
    fn test_display_registry() {
        let key = Key::parse("price").unwrap();
        let err: Error = RegistryError::NotRegistered(key).into();
        assert_eq!(
            err.to_string(),
            "Registry error: Listener not registered for key: price"
        );
    }

    #[test]
    fn test_source() {
        use std::error::Error as _;

        let err: Error = RegistryError::InvalidKey("empty key".into()).into();
        assert!(err.source().is_some());
    }
}
