//! Bidirectional reference-counted channels
//!
//! A channel is a pair of event buses shared by two sides:
//!
//! ```text
//!   Channel (source)                     ChannelEnd (consumer, refcounted)
//!   ───────────────                      ─────────────────────────────────
//!   emit(event, data)  ──to_consumer──►  on(event) / on_any()
//!   on(event)          ◄──to_source────  emit(event, data), "close"
//! ```
//!
//! The source side belongs to whoever produces events (usually a method body).
//! The consumer side is what crosses component boundaries; several logical
//! subscribers may share it through `increment`/`decrement`. When the count reaches
//! zero a single `close` event is delivered to the source side, which is how a
//! producer learns to stop.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

/// Channel identifier (caller-chosen or a generated UUID)
pub type ChannelId = String;

/// Name of the event delivered to the source side when the last consumer leaves
pub const CLOSE_EVENT: &str = "close";

/// Listener for one named event
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Catch-all listener, observes the raw `(event, data)` pair
pub type AnyListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handle returned when registering a listener, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One direction of a channel.
#[derive(Default)]
struct EventBus {
    next_id: u64,
    named: Vec<(ListenerId, String, Listener)>,
    any: Vec<(ListenerId, AnyListener)>,
}

impl EventBus {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    fn on(&mut self, event: &str, listener: Listener) -> ListenerId {
        let id = self.next_id();
        self.named.push((id, event.to_string(), listener));
        id
    }

    fn on_any(&mut self, listener: AnyListener) -> ListenerId {
        let id = self.next_id();
        self.any.push((id, listener));
        id
    }

    fn off(&mut self, id: ListenerId) -> bool {
        let before = self.named.len() + self.any.len();
        self.named.retain(|(lid, _, _)| *lid != id);
        self.any.retain(|(lid, _)| *lid != id);
        before != self.named.len() + self.any.len()
    }

    fn listener_count(&self) -> usize {
        self.named.len() + self.any.len()
    }
}

/// Deliver `event` on `bus`: catch-all listeners first, then listeners for that name.
///
/// Listeners are snapshotted and invoked outside the lock so they may register,
/// remove, or emit without deadlocking.
fn dispatch(bus: &Mutex<EventBus>, event: &str, data: &Value) {
    let (any, named): (Vec<AnyListener>, Vec<Listener>) = {
        let bus = bus.lock();
        (
            bus.any.iter().map(|(_, l)| Arc::clone(l)).collect(),
            bus.named
                .iter()
                .filter(|(_, name, _)| name == event)
                .map(|(_, _, l)| Arc::clone(l))
                .collect(),
        )
    };

    for listener in any {
        listener(event, data);
    }
    for listener in named {
        listener(data);
    }
}

struct RefState {
    references: usize,
    closed: bool,
}

struct Shared {
    id: ChannelId,
    to_consumer: Mutex<EventBus>,
    to_source: Mutex<EventBus>,
    refs: Mutex<RefState>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Transition to closed. Returns false if the channel was already closed.
    fn fire_close(&self) -> bool {
        {
            let mut refs = self.refs.lock();
            if refs.closed {
                return false;
            }
            refs.closed = true;
            refs.references = 0;
        }
        tracing::debug!("Channel {} closed", self.id);
        dispatch(&self.to_source, CLOSE_EVENT, &Value::Null);
        self.closed_tx.send_replace(true);
        true
    }
}

/// Source side of a channel, owned by the producer
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Create a channel with a fresh random identifier
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create a channel with a caller-chosen identifier
    pub fn with_id(id: impl Into<ChannelId>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                to_consumer: Mutex::new(EventBus::default()),
                to_source: Mutex::new(EventBus::default()),
                refs: Mutex::new(RefState {
                    references: 1,
                    closed: false,
                }),
                closed_tx,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The consumer side of this channel
    pub fn end(&self) -> ChannelEnd {
        ChannelEnd {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Send an event to every consumer-side listener for `event` and every catch-all listener
    pub fn emit(&self, event: &str, data: Value) {
        dispatch(&self.shared.to_consumer, event, &data);
    }

    /// Listen for events sent by the consumer side, including `close`
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.to_source.lock().on(event, Arc::new(listener))
    }

    /// Listen for every event sent by the consumer side
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.shared.to_source.lock().on_any(Arc::new(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.to_source.lock().off(id)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.refs.lock().closed
    }

    /// Resolves once the last consumer has gone away
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer side of a channel.
///
/// Cloning the handle does not touch the reference count; subscribers attach and
/// detach explicitly with [`increment`](Self::increment) and
/// [`decrement`](Self::decrement).
#[derive(Clone)]
pub struct ChannelEnd {
    shared: Arc<Shared>,
}

impl ChannelEnd {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Listen for one named event from the source side
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.to_consumer.lock().on(event, Arc::new(listener))
    }

    /// Listen for every event from the source side
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.shared.to_consumer.lock().on_any(Arc::new(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.to_consumer.lock().off(id)
    }

    /// Number of consumer-side listeners currently registered
    pub fn listener_count(&self) -> usize {
        self.shared.to_consumer.lock().listener_count()
    }

    /// Send an event to the source side
    pub fn emit(&self, event: &str, data: Value) {
        dispatch(&self.shared.to_source, event, &data);
    }

    /// Attach another subscriber. Returns false if the channel already closed.
    pub fn increment(&self) -> bool {
        let mut refs = self.shared.refs.lock();
        if refs.closed {
            return false;
        }
        refs.references += 1;
        true
    }

    /// Detach one subscriber.
    ///
    /// Returns true if this call brought the count to zero and fired `close`.
    /// Saturates at zero: once closed, further calls do nothing.
    pub fn decrement(&self) -> bool {
        {
            let mut refs = self.shared.refs.lock();
            if refs.closed || refs.references == 0 {
                return false;
            }
            refs.references -= 1;
            if refs.references > 0 {
                return false;
            }
        }
        self.shared.fire_close()
    }

    /// Alias for [`decrement`](Self::decrement)
    pub fn close(&self) -> bool {
        self.decrement()
    }

    /// Close immediately regardless of outstanding references.
    ///
    /// Used when the owner of every reference (a connection) disappears.
    pub fn force_close(&self) -> bool {
        self.shared.fire_close()
    }

    pub fn references(&self) -> usize {
        self.shared.refs.lock().references
    }

    /// True if both handles belong to the same channel, not merely the same id
    pub fn same_channel(&self, other: &ChannelEnd) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.refs.lock().closed
    }
}

impl fmt::Debug for ChannelEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEnd")
            .field("id", &self.shared.id)
            .field("references", &self.references())
            .finish()
    }
}
