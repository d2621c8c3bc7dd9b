//! Fan-out event dispatcher with per-subscriber queues (spec §4.6).
//!
//! `emit()` runs on the state cache's polling thread; `subscribe()` runs on
//! whatever thread owns a consumer (an SSE handler, a telemetry flush loop);
//! `pop()` runs on the consumer thread. Overflow drops the oldest event in
//! the affected subscriber's queue rather than blocking the emitter, so one
//! slow consumer never stalls the poll loop or any other subscriber —
//! the same isolation `plus::block_queue::BlockQueue` gives a single
//! consumer, generalized here to many independent ones.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use super::types::{Event, EventFilter};

pub type SubscriptionId = u64;

struct QueueInner {
    events: VecDeque<Event>,
    dropped_count: u64,
    closed: bool,
}

/// A bounded, drop-oldest queue belonging to one subscriber.
pub struct SubscriberQueue {
    name: String,
    max_size: usize,
    inner: Mutex<QueueInner>,
    condvar: Condvar,
}

impl SubscriberQueue {
    fn new(max_size: usize, name: String) -> Self {
        SubscriberQueue {
            name,
            max_size,
            inner: Mutex::new(QueueInner {
                events: VecDeque::new(),
                dropped_count: 0,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Never blocks. Drops the oldest queued event when at capacity.
    fn push(&self, event: Event) {
        let mut inner = self.inner.lock().expect("subscriber queue poisoned");
        if inner.events.len() >= self.max_size {
            inner.events.pop_front();
            inner.dropped_count += 1;
            if inner.dropped_count % 100 == 1 {
                warn!(
                    "subscriber queue '{}' overflow, dropped {} events total",
                    self.name, inner.dropped_count
                );
            }
        }
        inner.events.push_back(event);
        self.condvar.notify_one();
    }

    /// Blocks up to `timeout` for an event, or returns immediately with
    /// `timeout == Duration::ZERO`.
    pub fn pop(&self, timeout: Duration) -> Option<Event> {
        let mut inner = self.inner.lock().expect("subscriber queue poisoned");
        if inner.events.is_empty() && !inner.closed && timeout > Duration::ZERO {
            let deadline = Instant::now() + timeout;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, result) = self
                    .condvar
                    .wait_timeout(inner, deadline - now)
                    .expect("subscriber queue poisoned");
                inner = guard;
                if !inner.events.is_empty() || inner.closed || result.timed_out() {
                    break;
                }
            }
        }
        inner.events.pop_front()
    }

    pub fn try_pop(&self) -> Option<Event> {
        self.pop(Duration::ZERO)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("subscriber queue poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().expect("subscriber queue poisoned").dropped_count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("subscriber queue poisoned").closed
    }

    fn close(&self) {
        let mut inner = self.inner.lock().expect("subscriber queue poisoned");
        inner.closed = true;
        self.condvar.notify_all();
    }
}

/// RAII subscription handle. Dropping it unsubscribes and closes the
/// underlying queue, unblocking any thread waiting in `pop`.
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<SubscriberQueue>,
    bus: Arc<EventEmitterInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn pop(&self, timeout: Duration) -> Option<Event> {
        self.queue.pop(timeout)
    }

    pub fn try_pop(&self) -> Option<Event> {
        self.queue.try_pop()
    }

    pub fn is_active(&self) -> bool {
        !self.queue.is_closed()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
        self.queue.close();
    }
}

struct SubscriberInfo {
    queue: Arc<SubscriberQueue>,
    filter: EventFilter,
}

struct EventEmitterInner {
    default_queue_size: usize,
    max_subscribers: usize,
    subscribers: Mutex<HashMap<SubscriptionId, SubscriberInfo>>,
    next_subscription_id: AtomicU64,
    next_event_id: AtomicU64,
}

impl EventEmitterInner {
    fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.lock().expect("event bus poisoned");
        if subscribers.remove(&id).is_some() {
            log::debug!("subscription {id} removed, remaining: {}", subscribers.len());
        }
    }
}

/// Central event hub. One instance per runtime, shared by `Arc` between the
/// state cache (producer) and every subscriber (consumer).
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EventEmitterInner>,
}

impl EventEmitter {
    /// `max_subscribers == 0` means unlimited, matching the original's
    /// `max_subscribers_ > 0` gate.
    pub fn new(default_queue_size: usize, max_subscribers: usize) -> Self {
        EventEmitter {
            inner: Arc::new(EventEmitterInner {
                default_queue_size,
                max_subscribers,
                subscribers: Mutex::new(HashMap::new()),
                next_subscription_id: AtomicU64::new(1),
                next_event_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a new subscription. Returns `None` once `max_subscribers`
    /// concurrent subscriptions are already held (spec §4.6).
    pub fn subscribe(&self, filter: EventFilter, queue_size: usize, name: impl Into<String>) -> Option<Subscription> {
        let mut subscribers = self.inner.subscribers.lock().expect("event bus poisoned");
        if self.inner.max_subscribers > 0 && subscribers.len() >= self.inner.max_subscribers {
            warn!(
                "max subscribers ({}) reached, rejecting subscription",
                self.inner.max_subscribers
            );
            return None;
        }
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let size = if queue_size > 0 { queue_size } else { self.inner.default_queue_size };
        let queue = Arc::new(SubscriberQueue::new(size, name.into()));
        subscribers.insert(
            id,
            SubscriberInfo {
                queue: queue.clone(),
                filter,
            },
        );
        log::debug!("subscription {id} created, total subscribers: {}", subscribers.len());
        Some(Subscription {
            id,
            queue,
            bus: self.inner.clone(),
        })
    }

    /// Assigns a monotonic event id and fans the event out to every
    /// subscriber whose filter matches. Non-blocking: each subscriber's own
    /// queue absorbs its own overflow.
    pub fn emit(&self, mut event: Event) {
        let id = self.inner.next_event_id.fetch_add(1, Ordering::SeqCst);
        event.assign_event_id(id);

        let targets: Vec<Arc<SubscriberQueue>> = {
            let subscribers = self.inner.subscribers.lock().expect("event bus poisoned");
            subscribers
                .values()
                .filter(|info| info.filter.matches(&event))
                .map(|info| info.queue.clone())
                .collect()
        };
        for queue in targets {
            queue.push(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("event bus poisoned").len()
    }

    pub fn max_subscribers(&self) -> usize {
        self.inner.max_subscribers
    }

    pub fn at_capacity(&self) -> bool {
        let subscribers = self.inner.subscribers.lock().expect("event bus poisoned");
        self.inner.max_subscribers > 0 && subscribers.len() >= self.inner.max_subscribers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{DeviceAvailabilityEvent, StateUpdateEvent};
    use crate::model::{Quality, Value};

    fn state_update(signal_id: &str) -> Event {
        Event::StateUpdate(StateUpdateEvent {
            event_id: 0,
            provider_id: "sim0".into(),
            device_id: "tempctl-0".into(),
            signal_id: signal_id.into(),
            value: Value::Double(1.0),
            quality: Quality::Ok,
            timestamp_ms: 0,
        })
    }

    #[test]
    fn emit_assigns_monotonic_ids() {
        let bus = EventEmitter::new(10, 0);
        let sub = bus.subscribe(EventFilter::all(), 0, "test").unwrap();
        bus.emit(state_update("a"));
        bus.emit(state_update("b"));
        let first = sub.pop(Duration::ZERO).unwrap();
        let second = sub.pop(Duration::ZERO).unwrap();
        assert_eq!(first.event_id(), 1);
        assert_eq!(second.event_id(), 2);
    }

    #[test]
    fn overflow_drops_oldest() {
        let bus = EventEmitter::new(2, 0);
        let sub = bus.subscribe(EventFilter::all(), 0, "test").unwrap();
        bus.emit(state_update("a"));
        bus.emit(state_update("b"));
        bus.emit(state_update("c"));
        let first = sub.pop(Duration::ZERO).unwrap();
        assert_eq!(first.event_id(), 2);
        assert_eq!(sub.dropped_count(), 1);
    }

    #[test]
    fn filter_excludes_non_matching_subscriber() {
        let bus = EventEmitter::new(10, 0);
        let filter = EventFilter {
            signal_id: "temperature".into(),
            ..EventFilter::all()
        };
        let sub = bus.subscribe(filter, 0, "filtered").unwrap();
        bus.emit(state_update("humidity"));
        assert!(sub.try_pop().is_none());
    }

    #[test]
    fn max_subscribers_enforced() {
        let bus = EventEmitter::new(10, 1);
        let _a = bus.subscribe(EventFilter::all(), 0, "a").unwrap();
        assert!(bus.subscribe(EventFilter::all(), 0, "b").is_none());
    }

    #[test]
    fn drop_closes_queue_and_removes_subscriber() {
        let bus = EventEmitter::new(10, 0);
        let sub = bus.subscribe(EventFilter::all(), 0, "test").unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn availability_event_round_trips() {
        let bus = EventEmitter::new(10, 0);
        let sub = bus.subscribe(EventFilter::all(), 0, "test").unwrap();
        bus.emit(Event::DeviceAvailability(DeviceAvailabilityEvent {
            event_id: 0,
            provider_id: "sim0".into(),
            device_id: "tempctl-0".into(),
            available: false,
            timestamp_ms: 42,
        }));
        let got = sub.pop(Duration::ZERO).unwrap();
        assert_eq!(got.timestamp_ms(), 42);
    }
}
