//! Update registry for pub/sub routing
//!
//! The registry maps keys to live cells and routes updates from the feed to
//! the listeners subscribed on each cell.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<UpdateRegistry>
//!                     ┌──────────────────────────┐
//!                     │ cells: HashMap<Key,      │
//!                     │   Subscribable {         │
//!                     │     value,               │
//!                     │     listeners: [Weak],   │
//!                     │   }                      │
//!                     │ >                        │
//!                     └────────────┬─────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!  [StreamListener]           [Consumer]               [Consumer]
//!  dispatch(key, value)   lookup_or_subscribe()   lookup_or_subscribe()
//!         │                        ▲                        ▲
//!         └──► set_value() ──► on_update() ────────────────┘
//! ```
//!
//! Notification is synchronous on the thread that changed the value. Cells
//! keep only weak references to listeners; consumers own them.
//!
//! Two statistics keys, [`COUNT_KEYS`] and [`COUNT_UPDATES`], are ordinary
//! cells and can be subscribed like any other. The control key (by default
//! [`DEFAULT_CONTROL_KEY`]) starts the stream listener on first lookup.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{CellState, Subscribable, UpdateListener};
pub use error::RegistryError;
pub use key::{Key, COUNT_KEYS, COUNT_UPDATES, DEFAULT_CONTROL_KEY};
pub use store::UpdateRegistry;
