//! Live key/value feed over TCP
//!
//! A peer streams `<key|value>` records over a plain TCP connection. Each
//! record updates the live cell for its key, and every listener subscribed to
//! that cell is notified synchronously with the new value.
//!
//! ```text
//! TCP bytes ─► StreamListener ─► UpdateRegistry::dispatch ─► Subscribable ─► UpdateListener
//!              (RecordScanner)        (by key)               (set_value)      (on_update)
//! ```
//!
//! Cells are created by consumers, not by the feed: an update for a key that
//! nobody has looked up is dropped. Looking up the control key (`__start`)
//! starts the listener and publishes its port.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use tcp_rtd::registry::{Key, UpdateListener, UpdateRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = UpdateRegistry::new(tokio::runtime::Handle::current());
//!
//! let listener: Arc<dyn UpdateListener> = Arc::new(|key: &Key, value: Option<&str>| {
//!     println!("{} = {:?}", key, value);
//! });
//!
//! registry.lookup_or_subscribe("price", &listener)?;
//! let port = registry.lookup_or_subscribe("__start", &listener)?;
//! println!("Feed listening on port {:?}", port);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, Result};
pub use host::{HostValue, RtdFunction};
pub use protocol::{Record, RecordScanner};
pub use registry::{Key, RegistryConfig, RegistryError, Subscribable, UpdateListener, UpdateRegistry};
pub use server::{ListenerConfig, RecordSink, StreamListener};
