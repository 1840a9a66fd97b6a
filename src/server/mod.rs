//! Feed server
//!
//! Accepts feed connections and turns their bytes into records.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::ListenerConfig;
pub use connection::{Connection, RecordSink};
pub use listener::StreamListener;
