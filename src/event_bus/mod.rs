//! Typed publish/subscribe event bus with stateful emitters (§4.5).
//!
//! Each subscription owns an unbounded mailbox (mirroring the per-subscriber
//! mailbox model from §5); a "stateful" emitter additionally remembers its
//! last event so a subscriber created after the fact still observes it before
//! any later event, per Testable Property 12.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

const LOG_TARGET: &str = "junction::event_bus";

/// Marker trait for bus events; any `'static + Send + Sync + Clone` type qualifies.
pub trait Event: Any + Send + Sync + Clone + 'static {}
impl<T: Any + Send + Sync + Clone + 'static> Event for T {}

type AnyBox = Arc<dyn Any + Send + Sync>;

struct TypeSlot {
    subscribers: Vec<mpsc::UnboundedSender<AnyBox>>,
    last: Option<AnyBox>,
}

impl TypeSlot {
    fn new() -> Self {
        TypeSlot { subscribers: Vec::new(), last: None }
    }
}

/// The bus itself. Cheap to clone (internally `Arc`'d).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<HashMap<TypeId, TypeSlot>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Create an emitter for `T`. If `stateful`, the bus remembers the last
    /// emitted value and replays it to new subscribers immediately.
    pub fn emitter<T: Event>(&self, stateful: bool) -> Emitter<T> {
        {
            let mut map = self.inner.lock();
            map.entry(TypeId::of::<T>()).or_insert_with(TypeSlot::new);
        }
        Emitter { bus: self.clone(), stateful, _marker: std::marker::PhantomData }
    }

    /// Subscribe to events of type `T`. If a stateful emitter for `T` already
    /// has a remembered value, it is delivered first.
    pub fn subscribe<T: Event>(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut map = self.inner.lock();
        let slot = map.entry(TypeId::of::<T>()).or_insert_with(TypeSlot::new);
        if let Some(last) = slot.last.clone() {
            let _ = tx.send(last);
        }
        slot.subscribers.push(tx);
        Subscription { rx, _marker: std::marker::PhantomData }
    }

    fn publish<T: Event>(&self, value: T, stateful: bool) {
        let boxed: AnyBox = Arc::new(value);
        let mut map = self.inner.lock();
        let slot = map.entry(TypeId::of::<T>()).or_insert_with(TypeSlot::new);
        if stateful {
            slot.last = Some(boxed.clone());
        }
        slot.subscribers.retain(|tx| tx.send(boxed.clone()).is_ok());
    }
}

/// A typed handle used to emit events of type `T` onto the bus.
pub struct Emitter<T: Event> {
    bus: EventBus,
    stateful: bool,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Event> Emitter<T> {
    pub fn emit(&self, value: T) {
        self.bus.publish(value, self.stateful);
    }
}

/// A lazy sequence of events of type `T`. Closing is idempotent: dropping it
/// (or the underlying receiver being closed) simply stops further delivery.
pub struct Subscription<T: Event> {
    rx: mpsc::UnboundedReceiver<AnyBox>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Event> Subscription<T> {
    pub async fn next(&mut self) -> Option<T> {
        let boxed = self.rx.recv().await?;
        boxed.downcast_ref::<T>().cloned()
    }

    /// Idempotent close: simply stop polling. Subsequent calls to `next` will
    /// return `None` once the bus's sender side notices the channel is shut,
    /// which happens automatically on drop; an explicit method is provided
    /// for symmetry with the spec's "close is idempotent" language.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u32);

    #[tokio::test]
    async fn basic_pub_sub() {
        let bus = EventBus::new();
        let emitter = bus.emitter::<Ping>(false);
        let mut sub = bus.subscribe::<Ping>();
        emitter.emit(Ping(1));
        assert_eq!(sub.next().await, Some(Ping(1)));
    }

    #[tokio::test]
    async fn stateful_emitter_replays_last_to_new_subscriber() {
        let bus = EventBus::new();
        let emitter = bus.emitter::<Ping>(true);
        emitter.emit(Ping(7));
        let mut sub = bus.subscribe::<Ping>();
        // The new subscriber sees the replayed value before anything new.
        assert_eq!(sub.next().await, Some(Ping(7)));
        emitter.emit(Ping(8));
        assert_eq!(sub.next().await, Some(Ping(8)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe::<Ping>();
        sub.close();
        sub.close();
        assert_eq!(sub.next().await, None);
    }
}
