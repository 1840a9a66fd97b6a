//! Host-facing entry point
//!
//! A spreadsheet host calls a single function with whatever cell argument
//! the user typed. [`HostValue`] models those arguments and [`RtdFunction`]
//! turns them into registry lookups.

use std::sync::Arc;

use crate::registry::{Key, RegistryError, Subscribable, UpdateListener, UpdateRegistry};

/// Argument value passed by the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// Empty cell
    Empty,
    /// Text
    Text(String),
    /// Number
    Number(f64),
    /// Range or array of values
    Array(Vec<HostValue>),
}

impl TryFrom<&HostValue> for Key {
    type Error = RegistryError;

    /// Only scalar, non-blank arguments name a key
    fn try_from(value: &HostValue) -> Result<Self, Self::Error> {
        match value {
            HostValue::Text(text) => Key::parse(text),
            HostValue::Number(n) if n.is_finite() => Key::parse(&format_number(*n)),
            HostValue::Number(_) => Err(RegistryError::InvalidKey("non-finite number".into())),
            HostValue::Empty => Err(RegistryError::InvalidKey("empty argument".into())),
            HostValue::Array(_) => Err(RegistryError::InvalidKey("array argument".into())),
        }
    }
}

/// Render integral numbers without a fractional part
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// The real-time data function exposed to the host
#[derive(Clone)]
pub struct RtdFunction {
    registry: Arc<UpdateRegistry>,
}

impl RtdFunction {
    /// Create a function bound to a registry
    pub fn new(registry: Arc<UpdateRegistry>) -> Self {
        Self { registry }
    }

    /// The backing registry
    pub fn registry(&self) -> &Arc<UpdateRegistry> {
        &self.registry
    }

    /// Resolve an argument to its live cell, creating it on first use
    pub fn call(&self, arg: &HostValue) -> Result<Arc<Subscribable>, RegistryError> {
        let key = Key::try_from(arg).map_err(|e| {
            tracing::debug!(arg = ?arg, error = %e, "Rejected host argument");
            e
        })?;
        Ok(self.registry.get_or_create_key(key))
    }

    /// Resolve an argument and subscribe a listener to it
    ///
    /// Returns the current value, which the listener has also received.
    pub fn subscribe(
        &self,
        arg: &HostValue,
        listener: &Arc<dyn UpdateListener>,
    ) -> Result<Option<String>, RegistryError> {
        let cell = self.call(arg)?;
        cell.subscribe(listener);
        Ok(cell.current_value())
    }
}
