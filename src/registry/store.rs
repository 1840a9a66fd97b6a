//! Update registry implementation
//!
//! The central directory of live cells. Consumers look up (and lazily create)
//! cells; the stream listener dispatches records into them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::protocol::Record;
use crate::server::{RecordSink, StreamListener};
use crate::stats::{ListenerStats, RegistryStats};

use super::config::RegistryConfig;
use super::entry::{Subscribable, UpdateListener};
use super::error::RegistryError;
use super::key::{Key, COUNT_KEYS, COUNT_UPDATES};

/// Number of statistics cells present from construction
const STATS_KEY_COUNT: usize = 2;

/// Running stream listener owned by the registry
struct ListenerHandle {
    local_addr: SocketAddr,
    stats: Arc<ListenerStats>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Routes records from the listener task into the registry
struct RegistrySink {
    registry: Weak<UpdateRegistry>,
}

impl RecordSink for RegistrySink {
    fn on_record(&self, record: Record) {
        if let Some(registry) = self.registry.upgrade() {
            registry.dispatch(&record.key, record.value);
        }
    }
}

/// Central registry of live value cells
///
/// Thread-safe: the key map sits behind an `RwLock` so lookups from consumer
/// threads and dispatch from the listener task run concurrently, while
/// creation of a missing cell happens at most once under the write lock.
pub struct UpdateRegistry {
    /// Map of key to cell, statistics cells included
    cells: RwLock<HashMap<Key, Arc<Subscribable>>>,

    count_keys: Arc<Subscribable>,
    count_updates: Arc<Subscribable>,

    updates: AtomicU64,
    dropped_updates: AtomicU64,

    listener: Mutex<Option<ListenerHandle>>,
    runtime: Handle,
    me: Weak<UpdateRegistry>,

    /// Configuration
    config: RegistryConfig,
}

impl UpdateRegistry {
    /// Create a registry with default configuration
    ///
    /// The listener, once started, is spawned on `runtime`.
    pub fn new(runtime: Handle) -> Arc<Self> {
        Self::with_config(RegistryConfig::default(), runtime)
    }

    /// Create a registry with custom configuration
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn with_config(mut config: RegistryConfig, runtime: Handle) -> Arc<Self> {
        config.control_key = config.control_key.trim().to_string();

        let count_keys = Arc::new(Subscribable::with_value(Key::reserved(COUNT_KEYS), "0"));
        let count_updates = Arc::new(Subscribable::with_value(Key::reserved(COUNT_UPDATES), "0"));

        let mut cells = HashMap::new();
        cells.insert(count_keys.key().clone(), Arc::clone(&count_keys));
        cells.insert(count_updates.key().clone(), Arc::clone(&count_updates));

        Arc::new_cyclic(|me| Self {
            cells: RwLock::new(cells),
            count_keys,
            count_updates,
            updates: AtomicU64::new(0),
            dropped_updates: AtomicU64::new(0),
            listener: Mutex::new(None),
            runtime,
            me: me.clone(),
            config,
        })
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get the cell for a key, creating it if needed
    ///
    /// Fails only if the key is blank.
    pub fn get_or_create(&self, key: &str) -> std::result::Result<Arc<Subscribable>, RegistryError> {
        let key = Key::parse(key)?;
        Ok(self.get_or_create_key(key))
    }

    /// Get the cell for an already parsed key, creating it if needed
    ///
    /// Looking up the control key starts the stream listener if it is not
    /// running; the listener publishes its port as the key's value.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn get_or_create_key(&self, key: Key) -> Arc<Subscribable> {
        let cell = self.lookup_or_insert(&key);

        if key.as_str() == self.config.control_key && !self.is_listening() {
            if let Err(e) = self.start_listener() {
                tracing::error!(
                    key = %key,
                    addr = %self.config.listener.bind_addr,
                    error = %e,
                    "Failed to start stream listener"
                );
            }
        }

        cell
    }

    fn lookup_or_insert(&self, key: &Key) -> Arc<Subscribable> {
        if let Some(cell) = self.read_cells().get(key) {
            return Arc::clone(cell);
        }

        let (cell, keys, count_delivery) = {
            let mut cells = self.write_cells();
            if let Some(cell) = cells.get(key) {
                return Arc::clone(cell);
            }

            let cell = Arc::new(Subscribable::new(key.clone()));
            cells.insert(key.clone(), Arc::clone(&cell));

            // Stored under the map lock so concurrent creations publish counts in order
            let keys = cells.len().saturating_sub(STATS_KEY_COUNT);
            let delivery = self.count_keys.store(keys.to_string());
            (cell, keys, delivery)
        };
        count_delivery.deliver();

        tracing::debug!(key = %key, keys = keys, "Cell created");
        cell
    }

    /// Get the cell for a key without creating it
    pub fn get(&self, key: &str) -> Option<Arc<Subscribable>> {
        self.read_cells().get(key.trim()).cloned()
    }

    /// Look up (creating if needed) and subscribe in one step
    ///
    /// The listener receives the current value immediately; the same value is
    /// returned to the caller.
    pub fn lookup_or_subscribe(
        &self,
        key: &str,
        listener: &Arc<dyn UpdateListener>,
    ) -> std::result::Result<Option<String>, RegistryError> {
        let cell = self.get_or_create(key)?;
        cell.subscribe(listener);
        Ok(cell.current_value())
    }

    /// Remove a listener from a key
    pub fn unsubscribe(
        &self,
        key: &str,
        listener: &Arc<dyn UpdateListener>,
    ) -> std::result::Result<(), RegistryError> {
        let key = Key::parse(key)?;
        match self.get(key.as_str()) {
            Some(cell) => cell.unsubscribe(listener),
            None => Err(RegistryError::NotRegistered(key)),
        }
    }

    /// Route an update to its cell
    ///
    /// Updates for keys nobody has looked up, or for reserved keys, are
    /// dropped and not counted. Returns true if the update was applied.
    pub fn dispatch(&self, key: &str, value: impl Into<String>) -> bool {
        let Some(cell) = self.get(key) else {
            self.dropped_updates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key.trim(), "Update for unknown key dropped");
            return false;
        };

        if self.is_reserved(cell.key()) {
            self.dropped_updates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %cell.key(), "Update for reserved key dropped");
            return false;
        }

        cell.set_value(value);

        let updates = self.updates.fetch_add(1, Ordering::Relaxed) + 1;
        self.count_updates.set_value(updates.to_string());

        let interval = self.config.progress_log_interval;
        if interval > 0 && updates % interval == 0 {
            tracing::info!(updates = updates, "Handled updates");
        }

        true
    }

    /// Start the stream listener if it is not running
    ///
    /// Binds synchronously so the returned address (and any bind error) is
    /// known immediately; the accept loop then runs on the registry's runtime.
    /// A newly bound port is published to the control key if it exists.
    #[tracing::instrument(level = "debug", skip(self), fields(addr = %self.config.listener.bind_addr))]
    pub fn start_listener(&self) -> Result<SocketAddr> {
        let local_addr = self.spawn_listener()?;

        if let Some(control) = self.get(&self.config.control_key) {
            if control.current_value() != Some(local_addr.port().to_string()) {
                control.set_value(local_addr.port().to_string());
            }
        }

        Ok(local_addr)
    }

    fn spawn_listener(&self) -> Result<SocketAddr> {
        let mut slot = self.listener_slot();
        if let Some(handle) = slot.as_ref() {
            if handle.is_running() {
                return Ok(handle.local_addr);
            }
        }

        let std_listener = std::net::TcpListener::bind(self.config.listener.bind_addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let stats = Arc::new(ListenerStats::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let sink = RegistrySink {
            registry: self.me.clone(),
        };
        let config = self.config.listener.clone();
        let task_stats = Arc::clone(&stats);

        let task = self.runtime.spawn(async move {
            let listener = match TcpListener::from_std(std_listener) {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to register stream listener");
                    return;
                }
            };

            let server = StreamListener::from_listener(listener, config, sink).with_stats(task_stats);
            // A dropped sender also ends the loop
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = server.run_until(shutdown).await {
                tracing::error!(error = %e, "Stream listener failed");
            }
        });

        tracing::info!(addr = %local_addr, "Stream listener started");

        *slot = Some(ListenerHandle {
            local_addr,
            stats,
            shutdown: Some(shutdown_tx),
            task,
        });

        Ok(local_addr)
    }

    /// Check if the stream listener is running
    pub fn is_listening(&self) -> bool {
        self.listener_slot()
            .as_ref()
            .is_some_and(ListenerHandle::is_running)
    }

    /// Address of the running stream listener
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener_slot()
            .as_ref()
            .filter(|h| h.is_running())
            .map(|h| h.local_addr)
    }

    /// Stop the stream listener, releasing its socket
    ///
    /// Returns true if a listener was running. Cells and their values are
    /// kept; the listener can be started again.
    pub fn shutdown(&self) -> bool {
        let Some(mut handle) = self.listener_slot().take() else {
            return false;
        };
        let was_running = handle.is_running();
        handle.stop();
        tracing::info!(addr = %handle.local_addr, "Stream listener stopped");
        was_running
    }

    /// Stop the stream listener and wait for its task to finish
    pub async fn shutdown_and_wait(&self) {
        let handle = self.listener_slot().take();
        if let Some(mut handle) = handle {
            handle.stop();
            let _ = handle.task.await;
            tracing::info!(addr = %handle.local_addr, "Stream listener stopped");
        }
    }

    /// Number of cells, statistics cells included
    pub fn len(&self) -> usize {
        self.read_cells().len()
    }

    /// Check if no consumer key has been created yet
    pub fn is_empty(&self) -> bool {
        self.len() <= STATS_KEY_COUNT
    }

    /// All known keys, unordered
    pub fn keys(&self) -> Vec<Key> {
        self.read_cells().keys().cloned().collect()
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        let keys = self.len().saturating_sub(STATS_KEY_COUNT) as u64;
        let slot = self.listener_slot();

        RegistryStats {
            keys,
            updates: self.updates.load(Ordering::Relaxed),
            dropped_updates: self.dropped_updates.load(Ordering::Relaxed),
            listening: slot.as_ref().is_some_and(ListenerHandle::is_running),
            listener: slot.as_ref().map(|h| h.stats.snapshot()),
        }
    }

    fn is_reserved(&self, key: &Key) -> bool {
        key.is_stats_key() || key.as_str() == self.config.control_key
    }

    fn read_cells(&self) -> RwLockReadGuard<'_, HashMap<Key, Arc<Subscribable>>> {
        self.cells.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cells(&self) -> RwLockWriteGuard<'_, HashMap<Key, Arc<Subscribable>>> {
        self.cells.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<ListenerHandle>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UpdateRegistry {
    fn drop(&mut self) {
        let slot = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.as_mut() {
            handle.stop();
        }
    }
}
