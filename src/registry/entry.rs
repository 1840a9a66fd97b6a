//! Live value cell and listener types
//!
//! A [`Subscribable`] holds the latest value for one key together with the
//! listeners interested in it. Listeners are held weakly: the consumer owns
//! the `Arc`, and a listener that has been dropped is skipped and pruned.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::error::RegistryError;
use super::key::Key;

/// Receiver of value change notifications
///
/// Called synchronously on the thread that changed the value, usually the
/// producer task draining the TCP connection. Handlers should return quickly.
pub trait UpdateListener: Send + Sync {
    /// Called with the key and its new value (`None` while the cell is unset)
    fn on_update(&self, key: &Key, value: Option<&str>);
}

impl<F> UpdateListener for F
where
    F: Fn(&Key, Option<&str>) + Send + Sync,
{
    fn on_update(&self, key: &Key, value: Option<&str>) {
        self(key, value)
    }
}

/// State of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// No value stored yet
    Unset,
    /// Holds a value
    Set,
}

struct CellInner {
    value: Option<String>,
    /// Bumped on every store
    generation: u64,
    /// Generation most recently broadcast to the listeners
    broadcast: u64,
    /// Set while some thread is running deliveries for this cell
    delivering: bool,
    listeners: Vec<Weak<dyn UpdateListener>>,
    /// Listeners still owed their first value
    joining: Vec<Weak<dyn UpdateListener>>,
}

impl CellInner {
    fn contains(&self, listener: &Weak<dyn UpdateListener>) -> bool {
        self.listeners.iter().any(|w| Weak::ptr_eq(w, listener))
    }

    fn prune(&mut self) {
        self.listeners.retain(|w| w.strong_count() > 0);
        self.joining.retain(|w| w.strong_count() > 0);
    }

    /// Claim the delivery loop; false if another caller already runs it
    fn claim(&mut self) -> bool {
        !std::mem::replace(&mut self.delivering, true)
    }
}

/// Next unit of work for the delivery loop
enum Pending {
    Broadcast {
        generation: u64,
        value: Option<String>,
        listeners: Vec<Weak<dyn UpdateListener>>,
    },
    Join(Weak<dyn UpdateListener>, Option<String>),
}

/// Live value cell for a single key
///
/// Notifications for one cell are serialized: whichever caller finds the
/// cell idle runs the delivery loop, and values stored or listeners added
/// meanwhile (from other threads or from inside a listener) are delivered by
/// that loop before it returns. Each listener therefore sees the cell's
/// values in store order and its last notification carries the latest value.
pub struct Subscribable {
    key: Key,
    inner: Mutex<CellInner>,
}

impl Subscribable {
    /// Create an unset cell
    pub fn new(key: Key) -> Self {
        Self {
            key,
            inner: Mutex::new(CellInner {
                value: None,
                generation: 0,
                broadcast: 0,
                delivering: false,
                listeners: Vec::new(),
                joining: Vec::new(),
            }),
        }
    }

    /// Create a cell holding an initial value
    pub fn with_value(key: Key, value: impl Into<String>) -> Self {
        let cell = Self::new(key);
        cell.lock().value = Some(value.into());
        cell
    }

    /// The key this cell belongs to
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Get the last stored value, or `None` if never set
    pub fn current_value(&self) -> Option<String> {
        self.lock().value.clone()
    }

    /// Get the cell state
    pub fn state(&self) -> CellState {
        if self.lock().value.is_some() {
            CellState::Set
        } else {
            CellState::Unset
        }
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        let mut inner = self.lock();
        inner.prune();
        inner.listeners.len()
    }

    /// Subscribe a listener
    ///
    /// The listener receives the current value, even when unset or when it
    /// was already subscribed. Subscribing twice does not cause duplicate
    /// notifications on later updates. The first value is delivered before
    /// this returns unless a delivery for the cell is already running, in
    /// which case that delivery hands it over.
    pub fn subscribe(&self, listener: &Arc<dyn UpdateListener>) {
        let weak = Arc::downgrade(listener);
        let run = {
            let mut inner = self.lock();
            inner.prune();
            if !inner.contains(&weak) {
                inner.listeners.push(weak.clone());
            }
            inner.joining.push(weak);
            tracing::debug!(
                key = %self.key,
                listeners = inner.listeners.len(),
                "Listener subscribed"
            );
            inner.claim()
        };

        if run {
            self.drain();
        }
    }

    /// Unsubscribe a listener
    ///
    /// Safe to call from inside the listener's own notification.
    pub fn unsubscribe(&self, listener: &Arc<dyn UpdateListener>) -> Result<(), RegistryError> {
        let weak = Arc::downgrade(listener);
        let mut inner = self.lock();

        let pos = inner
            .listeners
            .iter()
            .position(|w| Weak::ptr_eq(w, &weak))
            .ok_or_else(|| RegistryError::NotRegistered(self.key.clone()))?;
        inner.listeners.remove(pos);
        inner.joining.retain(|w| !Weak::ptr_eq(w, &weak));

        tracing::debug!(
            key = %self.key,
            listeners = inner.listeners.len(),
            "Listener unsubscribed"
        );
        Ok(())
    }

    /// Store a new value and notify every subscribed listener
    ///
    /// Called from inside a notification, or while another thread delivers
    /// for this cell, the value is handed to the running delivery and this
    /// returns without waiting for it.
    pub fn set_value(&self, value: impl Into<String>) {
        self.store(value.into()).deliver();
    }

    /// Store a value and return the pending notification
    ///
    /// The returned delivery must be run after any outer lock is released,
    /// since listeners may call back into the registry.
    pub(super) fn store(&self, value: String) -> Delivery<'_> {
        let mut inner = self.lock();
        inner.prune();
        inner.value = Some(value);
        inner.generation += 1;

        Delivery {
            cell: self,
            run: inner.claim(),
        }
    }

    /// Run notifications until no value or new listener is pending
    fn drain(&self) {
        while let Some(pending) = self.next_pending() {
            match pending {
                Pending::Broadcast {
                    generation,
                    value,
                    listeners,
                } => {
                    for weak in &listeners {
                        let Some(listener) = weak.upgrade() else {
                            continue;
                        };
                        {
                            let inner = self.lock();
                            // A newer value restarts the broadcast
                            if inner.generation != generation {
                                break;
                            }
                            if !inner.contains(weak) {
                                continue;
                            }
                        }
                        self.notify(&listener, value.as_deref());
                    }
                }
                Pending::Join(weak, value) => {
                    if let Some(listener) = weak.upgrade() {
                        self.notify(&listener, value.as_deref());
                    }
                }
            }
        }
    }

    /// Take the next unit of work, releasing the loop when there is none
    fn next_pending(&self) -> Option<Pending> {
        let mut inner = self.lock();

        if inner.generation != inner.broadcast {
            let generation = inner.generation;
            inner.broadcast = generation;
            // The broadcast covers listeners still waiting to join
            inner.joining.clear();
            return Some(Pending::Broadcast {
                generation,
                value: inner.value.clone(),
                listeners: inner.listeners.clone(),
            });
        }

        if !inner.joining.is_empty() {
            let weak = inner.joining.remove(0);
            return Some(Pending::Join(weak, inner.value.clone()));
        }

        inner.delivering = false;
        None
    }

    fn notify(&self, listener: &Arc<dyn UpdateListener>, value: Option<&str>) {
        let notified = panic::catch_unwind(AssertUnwindSafe(|| {
            listener.on_update(&self.key, value);
        }));
        if notified.is_err() {
            tracing::error!(key = %self.key, "Listener panicked during notification");
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Subscribable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Subscribable")
            .field("key", &self.key)
            .field("value", &inner.value)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

/// Notification owed after a store
pub(super) struct Delivery<'a> {
    cell: &'a Subscribable,
    /// False when a running delivery loop will pick the value up
    run: bool,
}

impl Delivery<'_> {
    /// Notify the listeners unless another caller is already doing so
    pub(super) fn deliver(self) {
        if self.run {
            self.cell.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, OnceLock};
    use std::thread;

    use super::*;

    /// Listener that records every notification
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, Option<String>)>>,
    }

    impl Recorder {
        fn values(&self) -> Vec<Option<String>> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(_, v)| v.clone())
                .collect()
        }
    }

    impl UpdateListener for Recorder {
        fn on_update(&self, key: &Key, value: Option<&str>) {
            self.events
                .lock()
                .unwrap()
                .push((key.to_string(), value.map(str::to_string)));
        }
    }

    fn cell(key: &str) -> Subscribable {
        Subscribable::new(Key::parse(key).unwrap())
    }

    fn recorder() -> (Arc<Recorder>, Arc<dyn UpdateListener>) {
        let rec = Arc::new(Recorder::default());
        let handle: Arc<dyn UpdateListener> = rec.clone();
        (rec, handle)
    }

    #[test]
    fn test_state_transitions() {
        let cell = cell("price");
        assert_eq!(cell.state(), CellState::Unset);
        assert_eq!(cell.current_value(), None);

        cell.set_value("10");
        assert_eq!(cell.state(), CellState::Set);
        assert_eq!(cell.current_value().as_deref(), Some("10"));

        cell.set_value("11");
        assert_eq!(cell.current_value().as_deref(), Some("11"));
    }

    #[test]
    fn test_subscribe_delivers_current_value() {
        let cell = cell("price");
        let (rec, handle) = recorder();

        cell.subscribe(&handle);
        assert_eq!(rec.values(), vec![None]);

        cell.set_value("10");
        assert_eq!(rec.values(), vec![None, Some("10".into())]);
    }

    #[test]
    fn test_subscribe_to_set_cell_notifies_once() {
        let cell = cell("price");
        cell.set_value("10");

        let (rec, handle) = recorder();
        cell.subscribe(&handle);
        assert_eq!(rec.values(), vec![Some("10".into())]);
        assert_eq!(rec.events.lock().unwrap()[0].0, "price");
    }

    #[test]
    fn test_double_subscribe_is_idempotent() {
        let cell = cell("price");
        let (rec, handle) = recorder();

        cell.subscribe(&handle);
        cell.subscribe(&handle);
        assert_eq!(cell.listener_count(), 1);

        cell.set_value("1");
        // Two initial deliveries, one update
        assert_eq!(rec.values(), vec![None, None, Some("1".into())]);
    }

    #[test]
    fn test_unsubscribe() {
        let cell = cell("price");
        let (rec_a, a) = recorder();
        let (rec_b, b) = recorder();

        cell.subscribe(&a);
        cell.subscribe(&b);
        cell.unsubscribe(&a).unwrap();

        cell.set_value("5");
        assert_eq!(rec_a.values(), vec![None]);
        assert_eq!(rec_b.values(), vec![None, Some("5".into())]);
    }

    #[test]
    fn test_unsubscribe_not_registered() {
        let cell = cell("price");
        let (_rec, handle) = recorder();

        let result = cell.unsubscribe(&handle);
        assert_eq!(
            result,
            Err(RegistryError::NotRegistered(Key::parse("price").unwrap()))
        );

        cell.subscribe(&handle);
        cell.unsubscribe(&handle).unwrap();
        assert!(cell.unsubscribe(&handle).is_err());
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let cell = cell("price");
        let (rec, handle) = recorder();
        cell.subscribe(&handle);
        drop(handle);
        drop(rec);

        assert_eq!(cell.listener_count(), 0);
        cell.set_value("1");
    }

    #[test]
    fn test_closure_listener() {
        let cell = cell("price");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle: Arc<dyn UpdateListener> =
            Arc::new(move |_key: &Key, value: Option<&str>| {
                sink.lock().unwrap().push(value.map(str::to_string));
            });

        cell.subscribe(&handle);
        cell.set_value("7");
        assert_eq!(*seen.lock().unwrap(), vec![None, Some("7".to_string())]);
    }

    /// Listener that unsubscribes itself on its first real value
    struct OneShot {
        cell: Arc<Subscribable>,
        me: OnceLock<Weak<dyn UpdateListener>>,
        hits: Mutex<Vec<String>>,
    }

    impl UpdateListener for OneShot {
        fn on_update(&self, _key: &Key, value: Option<&str>) {
            let Some(value) = value else { return };
            self.hits.lock().unwrap().push(value.to_string());
            if let Some(me) = self.me.get().and_then(Weak::upgrade) {
                self.cell.unsubscribe(&me).unwrap();
            }
        }
    }

    #[test]
    fn test_listener_unsubscribes_itself_during_notification() {
        let cell = Arc::new(cell("price"));
        let one_shot = Arc::new(OneShot {
            cell: Arc::clone(&cell),
            me: OnceLock::new(),
            hits: Mutex::new(Vec::new()),
        });
        let handle: Arc<dyn UpdateListener> = one_shot.clone();
        let _ = one_shot.me.set(Arc::downgrade(&handle));

        let (rec, other) = recorder();
        cell.subscribe(&handle);
        cell.subscribe(&other);

        cell.set_value("1");
        cell.set_value("2");

        assert_eq!(*one_shot.hits.lock().unwrap(), vec!["1".to_string()]);
        assert_eq!(
            rec.values(),
            vec![None, Some("1".into()), Some("2".into())]
        );
        assert_eq!(cell.listener_count(), 1);
    }

    /// Listener that removes a different listener when notified
    struct Remover {
        cell: Arc<Subscribable>,
        victim: Arc<dyn UpdateListener>,
    }

    impl UpdateListener for Remover {
        fn on_update(&self, _key: &Key, value: Option<&str>) {
            if value.is_some() {
                let _ = self.cell.unsubscribe(&self.victim);
            }
        }
    }

    #[test]
    fn test_removal_during_notification_skips_removed_listener() {
        let cell = Arc::new(cell("price"));
        let (rec_victim, victim) = recorder();
        let (rec_other, other) = recorder();
        let remover: Arc<dyn UpdateListener> = Arc::new(Remover {
            cell: Arc::clone(&cell),
            victim: Arc::clone(&victim),
        });

        cell.subscribe(&remover);
        cell.subscribe(&victim);
        cell.subscribe(&other);

        cell.set_value("1");

        assert_eq!(rec_victim.values(), vec![None]);
        assert_eq!(rec_other.values(), vec![None, Some("1".into())]);
    }

    /// Listener that writes a newer value into the cell it observes
    struct Bumper {
        cell: Arc<Subscribable>,
    }

    impl UpdateListener for Bumper {
        fn on_update(&self, _key: &Key, value: Option<&str>) {
            if value == Some("1") {
                self.cell.set_value("2");
            }
        }
    }

    #[test]
    fn test_nested_set_value_never_goes_backwards() {
        let cell = Arc::new(cell("price"));
        let bumper: Arc<dyn UpdateListener> = Arc::new(Bumper {
            cell: Arc::clone(&cell),
        });
        let (rec, other) = recorder();

        cell.subscribe(&bumper);
        cell.subscribe(&other);
        cell.set_value("1");

        assert_eq!(rec.values(), vec![None, Some("2".into())]);
        assert_eq!(cell.current_value().as_deref(), Some("2"));
    }

    struct Panicker;

    impl UpdateListener for Panicker {
        fn on_update(&self, _key: &Key, value: Option<&str>) {
            if value.is_some() {
                panic!("listener failure");
            }
        }
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let cell = cell("price");
        let panicker: Arc<dyn UpdateListener> = Arc::new(Panicker);
        let (rec, other) = recorder();

        cell.subscribe(&panicker);
        cell.subscribe(&other);
        cell.set_value("1");

        assert_eq!(rec.values(), vec![None, Some("1".into())]);
    }

    /// Listener that, on its first call, lets a writer run before recording
    struct Slow {
        handoff: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl UpdateListener for Slow {
        fn on_update(&self, _key: &Key, value: Option<&str>) {
            let handoff = self.handoff.lock().unwrap().take();
            if let Some((entered, done)) = handoff {
                entered.send(()).unwrap();
                done.recv().unwrap();
            }
            self.seen.lock().unwrap().push(value.map(str::to_string));
        }
    }

    #[test]
    fn test_set_value_during_subscribe_ends_on_latest() {
        let cell = Arc::new(cell("price"));
        cell.set_value("1");

        let (entered_tx, entered_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let slow = Arc::new(Slow {
            handoff: Mutex::new(Some((entered_tx, done_rx))),
            seen: Mutex::new(Vec::new()),
        });
        let handle: Arc<dyn UpdateListener> = slow.clone();

        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                entered_rx.recv().unwrap();
                cell.set_value("2");
                done_tx.send(()).unwrap();
            })
        };

        cell.subscribe(&handle);
        writer.join().unwrap();

        assert_eq!(
            *slow.seen.lock().unwrap(),
            vec![Some("1".to_string()), Some("2".to_string())]
        );
        assert_eq!(cell.current_value().as_deref(), Some("2"));
    }

    #[test]
    fn test_concurrent_writers_last_notification_is_current() {
        let cell = Arc::new(cell("price"));
        let (rec, handle) = recorder();
        cell.subscribe(&handle);

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for i in 0..200 {
                        cell.set_value(format!("{}-{}", w, i));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let values = rec.values();
        assert_eq!(values.last().cloned().flatten(), cell.current_value());
    }

    /// Listener that subscribes a second listener from inside its callback
    struct Inviter {
        cell: Arc<Subscribable>,
        guest: Arc<dyn UpdateListener>,
    }

    impl UpdateListener for Inviter {
        fn on_update(&self, _key: &Key, value: Option<&str>) {
            if value.is_some() {
                self.cell.subscribe(&self.guest);
            }
        }
    }

    #[test]
    fn test_subscribe_during_notification() {
        let cell = Arc::new(cell("price"));
        let (rec, guest) = recorder();
        let inviter: Arc<dyn UpdateListener> = Arc::new(Inviter {
            cell: Arc::clone(&cell),
            guest: Arc::clone(&guest),
        });

        cell.subscribe(&inviter);
        cell.set_value("1");
        assert_eq!(rec.values(), vec![Some("1".into())]);

        cell.set_value("2");
        assert_eq!(
            rec.values(),
            vec![Some("1".into()), Some("2".into()), Some("2".into())]
        );
    }
}
