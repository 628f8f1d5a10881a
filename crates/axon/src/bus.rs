//! Typed pub/sub with direct and queued delivery.
//!
//! Subscriber lifetime is automatic: the bus holds weak references only, so
//! a dropped subscriber is never invoked. Expired entries are evicted from
//! the forward lists opportunistically at publish time and from the reverse
//! lookups by the worker thread, which wakes on a bounded timeout so the gc
//! queue drains even when nothing is being published.
//!
//! Locking: the subscription tables sit behind a re-entrant lock because a
//! direct callback may itself publish or subscribe. Callbacks never run
//! under the lock — publication partitions the list into snapshots first,
//! then invokes.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, ReentrantMutex};

use crate::component::Component;
use crate::events::{AsyncPanic, EventType};
use crate::id::EventId;
use crate::plugin::panic_message;

/// How long the worker sleeps between wakes when the queue is idle. Each
/// wake also advances garbage collection by one entry.
const WORKER_TICK: Duration = Duration::from_millis(50);

/// How a subscription's callback is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// On the publisher's thread, before `fire` returns.
    Direct,
    /// On the worker thread, at some later point, in enqueue order.
    Queued,
}

/// Type-erased event payload, shared between the publisher and the worker.
pub type EventPayload = Arc<dyn Any + Send + Sync>;

/// Type-erased callback; the typed layer downcasts before invoking.
pub type EventCallback = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

type AnyWeak = Weak<dyn Any + Send + Sync>;

/// Pointer-derived identity of a subscriber.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriberKey(usize);

/// Pointer-derived identity of a sender.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SenderKey(usize);

impl SenderKey {
    pub fn of<S: Any + Send + Sync>(sender: &Arc<S>) -> Self {
        Self(Arc::as_ptr(sender) as *const () as usize)
    }
}

/// Identity plus liveness of a subscriber.
#[derive(Clone)]
pub struct SubscriberRef {
    key: SubscriberKey,
    alive: AnyWeak,
}

impl SubscriberRef {
    pub fn of<S: Any + Send + Sync>(subscriber: &Arc<S>) -> Self {
        let any: Arc<dyn Any + Send + Sync> = subscriber.clone();
        Self {
            key: SubscriberKey(Arc::as_ptr(subscriber) as *const () as usize),
            alive: Arc::downgrade(&any),
        }
    }

    pub fn key(&self) -> SubscriberKey {
        self.key
    }

    fn expired(&self) -> bool {
        self.alive.strong_count() == 0
    }
}

/// Identity plus liveness of a sender, for sender-scoped subscriptions.
#[derive(Clone)]
pub struct SenderRef {
    key: SenderKey,
    alive: AnyWeak,
}

impl SenderRef {
    pub fn of<S: Any + Send + Sync>(sender: &Arc<S>) -> Self {
        let any: Arc<dyn Any + Send + Sync> = sender.clone();
        Self {
            key: SenderKey::of(sender),
            alive: Arc::downgrade(&any),
        }
    }

    pub fn key(&self) -> SenderKey {
        self.key
    }
}

struct Subscription {
    subscriber: SubscriberRef,
    /// Present for sender-scoped subscriptions; its expiry also retires the
    /// subscription.
    sender: Option<AnyWeak>,
    callback: EventCallback,
    mode: Delivery,
}

impl Subscription {
    fn expired(&self) -> bool {
        self.subscriber.expired()
            || self
                .sender
                .as_ref()
                .map_or(false, |sender| sender.strong_count() == 0)
    }
}

#[derive(Default)]
struct Tables {
    global: HashMap<EventId, Vec<Subscription>>,
    sender: HashMap<SenderKey, HashMap<EventId, Vec<Subscription>>>,
    global_rev: HashMap<SubscriberKey, HashSet<EventId>>,
    sender_rev: HashMap<SubscriberKey, HashSet<(SenderKey, EventId)>>,
    /// Subscribers found expired at publish time, awaiting reverse-lookup
    /// cleanup on the worker.
    gc: VecDeque<SubscriberKey>,
}

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TaskQueue {
    tasks: VecDeque<Task>,
    running: bool,
}

/// Queued callbacks of one publication, bundled into a single task.
struct QueuedBatch {
    subscribers: Vec<(AnyWeak, EventCallback)>,
    payload: EventPayload,
}

impl QueuedBatch {
    fn run(self) {
        for (alive, callback) in self.subscribers {
            // The subscriber may have expired between enqueue and dequeue;
            // holding the upgrade keeps it alive across the call.
            if let Some(_subscriber) = alive.upgrade() {
                callback(&*self.payload);
            }
        }
    }
}

pub(crate) struct BusCore {
    tables: ReentrantMutex<RefCell<Tables>>,
    queue: Mutex<TaskQueue>,
    queue_cv: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BusCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: ReentrantMutex::new(RefCell::new(Tables::default())),
            // Accepting tasks from the start: anything fired before the
            // worker thread is up is delivered once it runs.
            queue: Mutex::new(TaskQueue {
                tasks: VecDeque::new(),
                running: true,
            }),
            queue_cv: Condvar::new(),
            worker: Mutex::new(None),
        })
    }

    // ── lifecycle ──

    pub fn start(self: &Arc<Self>) {
        {
            let mut queue = self.queue.lock();
            queue.running = true;
        }
        let core = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("axon-events".to_string())
            .spawn(move || core.worker_loop())
            .expect("failed to spawn event worker thread");
        *self.worker.lock() = Some(handle);
    }

    /// Signal the worker to stop and join it. The worker finishes whatever
    /// is still queued before exiting.
    pub fn stop(&self) {
        {
            let mut queue = self.queue.lock();
            queue.running = false;
        }
        self.queue_cv.notify_one();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Wipe subscriptions, reverse lookups, the gc queue, and pending
    /// tasks. Both bus locks are held together; the caller holds the
    /// registry lock around this for the composite teardown.
    pub fn clear_all(&self) {
        let tables = self.tables.lock();
        let mut queue = self.queue.lock();
        *tables.borrow_mut() = Tables::default();
        queue.tasks.clear();
    }

    // ── subscription ──

    /// Queued subscriptions to [`AsyncPanic`] would recurse if their
    /// callback panicked in turn; they are forced to direct delivery.
    fn effective_mode(&self, event: EventId, mode: Delivery) -> Delivery {
        if event == AsyncPanic::EVENT_ID && mode == Delivery::Queued {
            tracing::warn!("queued subscription to the async-panic event coerced to direct");
            return Delivery::Direct;
        }
        mode
    }

    pub fn subscribe_global(
        &self,
        event: EventId,
        subscriber: SubscriberRef,
        callback: EventCallback,
        mode: Delivery,
    ) {
        let mode = self.effective_mode(event, mode);
        let tables = self.tables.lock();
        let mut tables = tables.borrow_mut();
        tables
            .global_rev
            .entry(subscriber.key())
            .or_default()
            .insert(event);
        tables.global.entry(event).or_default().push(Subscription {
            subscriber,
            sender: None,
            callback,
            mode,
        });
    }

    pub fn subscribe_to_sender(
        &self,
        sender: SenderRef,
        event: EventId,
        subscriber: SubscriberRef,
        callback: EventCallback,
        mode: Delivery,
    ) {
        let mode = self.effective_mode(event, mode);
        let tables = self.tables.lock();
        let mut tables = tables.borrow_mut();
        tables
            .sender_rev
            .entry(subscriber.key())
            .or_default()
            .insert((sender.key(), event));
        tables
            .sender
            .entry(sender.key())
            .or_default()
            .entry(event)
            .or_default()
            .push(Subscription {
                subscriber,
                sender: Some(sender.alive),
                callback,
                mode,
            });
    }

    pub fn has_global(&self, event: EventId) -> bool {
        let tables = self.tables.lock();
        let tables = tables.borrow();
        tables.global.get(&event).map_or(false, |subs| !subs.is_empty())
    }

    pub fn has_sender(&self, sender: SenderKey, event: EventId) -> bool {
        let tables = self.tables.lock();
        let tables = tables.borrow();
        tables
            .sender
            .get(&sender)
            .and_then(|by_event| by_event.get(&event))
            .map_or(false, |subs| !subs.is_empty())
    }

    // ── publication ──

    /// Split a subscription list into delivery snapshots, evicting expired
    /// entries into the gc queue as it goes.
    fn partition(
        subscriptions: &mut Vec<Subscription>,
        gc: &mut VecDeque<SubscriberKey>,
    ) -> (Vec<EventCallback>, Vec<(AnyWeak, EventCallback)>) {
        subscriptions.retain(|sub| {
            if sub.expired() {
                gc.push_back(sub.subscriber.key());
                false
            } else {
                true
            }
        });

        let mut direct = Vec::new();
        let mut queued = Vec::new();
        for sub in subscriptions.iter() {
            match sub.mode {
                Delivery::Direct => direct.push(sub.callback.clone()),
                Delivery::Queued => {
                    queued.push((sub.subscriber.alive.clone(), sub.callback.clone()))
                }
            }
        }
        (direct, queued)
    }

    fn dispatch(
        &self,
        direct: Vec<EventCallback>,
        queued: Vec<(AnyWeak, EventCallback)>,
        payload: EventPayload,
    ) {
        // Direct callbacks run on the publishing thread, in subscription
        // order, with no bus lock held.
        for callback in &direct {
            callback(&*payload);
        }

        if !queued.is_empty() {
            let batch = QueuedBatch {
                subscribers: queued,
                payload,
            };
            self.push_task(Box::new(move || batch.run()));
        }
    }

    pub fn fire_global(&self, event: EventId, payload: EventPayload) {
        let (direct, queued) = {
            let tables = self.tables.lock();
            let mut tables = tables.borrow_mut();
            let Tables { global, gc, .. } = &mut *tables;
            match global.get_mut(&event) {
                Some(subscriptions) => Self::partition(subscriptions, gc),
                None => return,
            }
        };
        self.dispatch(direct, queued, payload);
    }

    pub fn fire_to_sender(&self, sender: SenderKey, event: EventId, payload: EventPayload) {
        let (direct, queued) = {
            let tables = self.tables.lock();
            let mut tables = tables.borrow_mut();
            let Tables {
                sender: sender_map,
                gc,
                ..
            } = &mut *tables;
            match sender_map
                .get_mut(&sender)
                .and_then(|by_event| by_event.get_mut(&event))
            {
                Some(subscriptions) => Self::partition(subscriptions, gc),
                None => return,
            }
        };
        self.dispatch(direct, queued, payload);
    }

    // ── unsubscription ──

    /// Remove every subscription of one subscriber in O(k) via the reverse
    /// lookups, then drop its reverse rows.
    pub fn unsubscribe(&self, key: SubscriberKey) {
        let tables = self.tables.lock();
        let mut tables = tables.borrow_mut();
        let Tables {
            global,
            sender,
            global_rev,
            sender_rev,
            ..
        } = &mut *tables;

        if let Some(events) = global_rev.remove(&key) {
            for event in events {
                if let Some(subscriptions) = global.get_mut(&event) {
                    subscriptions.retain(|sub| sub.subscriber.key() != key);
                }
            }
        }
        if let Some(pairs) = sender_rev.remove(&key) {
            for (sender_key, event) in pairs {
                if let Some(subscriptions) = sender
                    .get_mut(&sender_key)
                    .and_then(|by_event| by_event.get_mut(&event))
                {
                    subscriptions.retain(|sub| sub.subscriber.key() != key);
                }
            }
        }
    }

    // ── worker ──

    fn push_task(&self, task: Task) {
        {
            let mut queue = self.queue.lock();
            if !queue.running {
                // Teardown has begun; queued deliveries are dropped.
                tracing::debug!("queued event delivery dropped: worker stopped");
                return;
            }
            queue.tasks.push_back(task);
        }
        self.queue_cv.notify_one();
    }

    fn worker_loop(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                if queue.tasks.is_empty() && queue.running {
                    self.queue_cv.wait_for(&mut queue, WORKER_TICK);
                }
                if !queue.running && queue.tasks.is_empty() {
                    return;
                }
                queue.tasks.pop_front()
            };

            if let Some(task) = task {
                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
                    let message = panic_message(panic);
                    tracing::error!(%message, "queued event callback panicked");
                    if self.has_global(AsyncPanic::EVENT_ID) {
                        self.fire_global(AsyncPanic::EVENT_ID, Arc::new(AsyncPanic { message }));
                    }
                }
            }

            // One gc entry per wake keeps reverse lookups bounded without
            // stalling task delivery.
            let tables = self.tables.lock();
            let mut tables = tables.borrow_mut();
            if let Some(key) = tables.gc.pop_front() {
                tables.global_rev.remove(&key);
                tables.sender_rev.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn reverse_rows(&self, key: SubscriberKey) -> (bool, bool) {
        let tables = self.tables.lock();
        let tables = tables.borrow();
        (
            tables.global_rev.contains_key(&key),
            tables.sender_rev.contains_key(&key),
        )
    }
}

// =============================================================================
// Interface layer
// =============================================================================

/// The event-bus interface, resolvable as a component.
///
/// These are the type-erased core operations; the typed shell lives in
/// [`EventBusExt`].
pub trait EventBus: Component {
    fn subscribe_global_dyn(
        &self,
        event: EventId,
        subscriber: SubscriberRef,
        callback: EventCallback,
        mode: Delivery,
    );

    fn subscribe_to_sender_dyn(
        &self,
        sender: SenderRef,
        event: EventId,
        subscriber: SubscriberRef,
        callback: EventCallback,
        mode: Delivery,
    );

    fn fire_global_dyn(&self, event: EventId, payload: EventPayload);

    fn fire_to_sender_dyn(&self, sender: SenderKey, event: EventId, payload: EventPayload);

    fn has_global_subscribers(&self, event: EventId) -> bool;

    fn has_sender_subscribers(&self, sender: SenderKey, event: EventId) -> bool;

    /// Immediately drop every subscription of the given subscriber.
    fn unsubscribe_key(&self, subscriber: SubscriberKey);
}

crate::declare_interface!(EventBus, "axon-core-event-bus-iid-d54e82f1", 1, 0);

/// Typed convenience shell over [`EventBus`].
pub trait EventBusExt: EventBus {
    /// Subscribe to every publication of `E`.
    ///
    /// The subscription lives at most as long as `subscriber`; no explicit
    /// unsubscribe is required.
    fn subscribe_global<E, S, F>(&self, subscriber: &Arc<S>, mode: Delivery, callback: F)
    where
        E: EventType,
        S: Any + Send + Sync,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |payload: &(dyn Any + Send + Sync)| {
            if let Some(event) = payload.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribe_global_dyn(E::EVENT_ID, SubscriberRef::of(subscriber), callback, mode);
    }

    /// Subscribe to publications of `E` from one specific sender.
    fn subscribe_to_sender<E, X, S, F>(
        &self,
        sender: &Arc<X>,
        subscriber: &Arc<S>,
        mode: Delivery,
        callback: F,
    ) where
        E: EventType,
        X: Any + Send + Sync,
        S: Any + Send + Sync,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |payload: &(dyn Any + Send + Sync)| {
            if let Some(event) = payload.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribe_to_sender_dyn(
            SenderRef::of(sender),
            E::EVENT_ID,
            SubscriberRef::of(subscriber),
            callback,
            mode,
        );
    }

    fn fire_global<E: EventType>(&self, event: E) {
        if !self.has_global_subscribers(E::EVENT_ID) {
            return;
        }
        self.fire_global_dyn(E::EVENT_ID, Arc::new(event));
    }

    /// Like [`fire_global`](Self::fire_global), but the payload is not even
    /// constructed when nobody is listening.
    fn fire_global_with<E: EventType>(&self, make: impl FnOnce() -> E) {
        if !self.has_global_subscribers(E::EVENT_ID) {
            return;
        }
        self.fire_global_dyn(E::EVENT_ID, Arc::new(make()));
    }

    fn fire_to_sender<E, X>(&self, sender: &Arc<X>, event: E)
    where
        E: EventType,
        X: Any + Send + Sync,
    {
        let key = SenderKey::of(sender);
        if !self.has_sender_subscribers(key, E::EVENT_ID) {
            return;
        }
        self.fire_to_sender_dyn(key, E::EVENT_ID, Arc::new(event));
    }

    fn fire_to_sender_with<E, X>(&self, sender: &Arc<X>, make: impl FnOnce() -> E)
    where
        E: EventType,
        X: Any + Send + Sync,
    {
        let key = SenderKey::of(sender);
        if !self.has_sender_subscribers(key, E::EVENT_ID) {
            return;
        }
        self.fire_to_sender_dyn(key, E::EVENT_ID, Arc::new(make()));
    }

    /// Immediately drop every subscription of `subscriber`.
    fn unsubscribe<S: Any + Send + Sync>(&self, subscriber: &Arc<S>) {
        self.unsubscribe_key(SubscriberRef::of(subscriber).key());
    }
}

impl<B: EventBus + ?Sized> EventBusExt for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct TestEvent {
        value: u32,
    }
    crate::declare_event!(TestEvent, "axon-test-bus-event");

    struct OtherEvent;
    crate::declare_event!(OtherEvent, "axon-test-bus-other-event");

    struct Subscriber;

    fn payload(value: u32) -> EventPayload {
        Arc::new(TestEvent { value })
    }

    fn typed_callback(log: Arc<PlMutex<Vec<u32>>>) -> EventCallback {
        Arc::new(move |any| {
            if let Some(event) = any.downcast_ref::<TestEvent>() {
                log.lock().push(event.value);
            }
        })
    }

    /// Poll until `predicate` holds or the deadline passes.
    fn wait_until(predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn direct_delivery_runs_in_subscription_order_before_fire_returns() {
        let bus = BusCore::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let subscriber = Arc::new(Subscriber);

        for tag in [1u32, 2, 3] {
            let log = log.clone();
            bus.subscribe_global(
                TestEvent::EVENT_ID,
                SubscriberRef::of(&subscriber),
                Arc::new(move |any| {
                    if let Some(event) = any.downcast_ref::<TestEvent>() {
                        log.lock().push(event.value * 10 + tag);
                    }
                }),
                Delivery::Direct,
            );
        }

        bus.fire_global(TestEvent::EVENT_ID, payload(4));
        assert_eq!(*log.lock(), vec![41, 42, 43]);
    }

    #[test]
    fn queued_delivery_arrives_on_the_worker() {
        let bus = BusCore::new();
        bus.start();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let subscriber = Arc::new(Subscriber);

        bus.subscribe_global(
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            typed_callback(log.clone()),
            Delivery::Queued,
        );

        bus.fire_global(TestEvent::EVENT_ID, payload(7));
        assert!(wait_until(|| log.lock().as_slice() == [7]));
        bus.stop();
    }

    #[test]
    fn stop_drains_outstanding_tasks() {
        let bus = BusCore::new();
        bus.start();
        let counter = Arc::new(AtomicUsize::new(0));
        let subscriber = Arc::new(Subscriber);

        let c = counter.clone();
        bus.subscribe_global(
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            Delivery::Queued,
        );

        for i in 0..16 {
            bus.fire_global(TestEvent::EVENT_ID, payload(i));
        }
        bus.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn expired_subscriber_is_never_invoked_and_gc_clears_reverse_rows() {
        let bus = BusCore::new();
        bus.start();
        let log = Arc::new(PlMutex::new(Vec::new()));

        let subscriber = Arc::new(Subscriber);
        let key = SubscriberRef::of(&subscriber).key();
        bus.subscribe_global(
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            typed_callback(log.clone()),
            Delivery::Direct,
        );
        drop(subscriber);

        bus.fire_global(TestEvent::EVENT_ID, payload(9));
        assert!(log.lock().is_empty());

        // Publish-time eviction queued the key; the worker's next tick
        // erases the reverse rows.
        assert!(wait_until(|| bus.reverse_rows(key) == (false, false)));
        bus.stop();
    }

    #[test]
    fn queued_subscriber_expiring_before_dequeue_is_skipped() {
        let bus = BusCore::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let subscriber = Arc::new(Subscriber);

        bus.subscribe_global(
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            typed_callback(log.clone()),
            Delivery::Queued,
        );

        // Worker not started yet: the task sits in the queue while the
        // subscriber dies.
        bus.fire_global(TestEvent::EVENT_ID, payload(5));
        drop(subscriber);
        bus.start();
        std::thread::sleep(Duration::from_millis(120));
        assert!(log.lock().is_empty());
        bus.stop();
    }

    #[test]
    fn unsubscribe_removes_forward_and_reverse_entries() {
        let bus = BusCore::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let subscriber = Arc::new(Subscriber);
        let sender = Arc::new(Subscriber);
        let key = SubscriberRef::of(&subscriber).key();

        bus.subscribe_global(
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            typed_callback(log.clone()),
            Delivery::Direct,
        );
        bus.subscribe_to_sender(
            SenderRef::of(&sender),
            OtherEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            typed_callback(log.clone()),
            Delivery::Direct,
        );

        bus.unsubscribe(key);
        assert_eq!(bus.reverse_rows(key), (false, false));

        bus.fire_global(TestEvent::EVENT_ID, payload(1));
        bus.fire_to_sender(
            SenderKey::of(&sender),
            OtherEvent::EVENT_ID,
            Arc::new(OtherEvent),
        );
        assert!(log.lock().is_empty());
    }

    #[test]
    fn sender_scoped_delivery_only_matches_that_sender() {
        let bus = BusCore::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let subscriber = Arc::new(Subscriber);
        let sender_a = Arc::new(Subscriber);
        let sender_b = Arc::new(Subscriber);

        bus.subscribe_to_sender(
            SenderRef::of(&sender_a),
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            typed_callback(log.clone()),
            Delivery::Direct,
        );

        bus.fire_to_sender(SenderKey::of(&sender_b), TestEvent::EVENT_ID, payload(1));
        assert!(log.lock().is_empty());
        bus.fire_to_sender(SenderKey::of(&sender_a), TestEvent::EVENT_ID, payload(2));
        assert_eq!(*log.lock(), vec![2]);
    }

    #[test]
    fn sender_expiry_retires_the_subscription() {
        let bus = BusCore::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let subscriber = Arc::new(Subscriber);
        let sender = Arc::new(Subscriber);
        let sender_key = SenderKey::of(&sender);

        bus.subscribe_to_sender(
            SenderRef::of(&sender),
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            typed_callback(log.clone()),
            Delivery::Direct,
        );
        drop(sender);

        bus.fire_to_sender(sender_key, TestEvent::EVENT_ID, payload(3));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn a_direct_callback_may_publish_again() {
        let bus = BusCore::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let subscriber = Arc::new(Subscriber);

        {
            let bus = bus.clone();
            let log = log.clone();
            let inner_subscriber = subscriber.clone();
            bus.clone().subscribe_global(
                TestEvent::EVENT_ID,
                SubscriberRef::of(&subscriber),
                Arc::new(move |any| {
                    if let Some(event) = any.downcast_ref::<TestEvent>() {
                        log.lock().push(event.value);
                        if event.value == 1 {
                            // Re-entrant publish from inside delivery.
                            let _ = &inner_subscriber;
                            bus.fire_global(TestEvent::EVENT_ID, payload(2));
                        }
                    }
                }),
                Delivery::Direct,
            );
        }

        bus.fire_global(TestEvent::EVENT_ID, payload(1));
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn panicking_queued_callback_becomes_an_async_panic_event() {
        let bus = BusCore::new();
        bus.start();
        let subscriber = Arc::new(Subscriber);
        let observed = Arc::new(PlMutex::new(Vec::new()));

        bus.subscribe_global(
            TestEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            Arc::new(|_| panic!("boom in queued callback")),
            Delivery::Queued,
        );
        {
            let observed = observed.clone();
            bus.subscribe_global(
                AsyncPanic::EVENT_ID,
                SubscriberRef::of(&subscriber),
                Arc::new(move |any| {
                    if let Some(event) = any.downcast_ref::<AsyncPanic>() {
                        observed.lock().push(event.message.clone());
                    }
                }),
                Delivery::Direct,
            );
        }

        bus.fire_global(TestEvent::EVENT_ID, payload(1));
        assert!(wait_until(|| observed.lock().len() == 1));
        assert!(observed.lock()[0].contains("boom in queued callback"));

        // The worker survives and keeps delivering.
        let log = Arc::new(PlMutex::new(Vec::new()));
        bus.subscribe_global(
            OtherEvent::EVENT_ID,
            SubscriberRef::of(&subscriber),
            {
                let log = log.clone();
                Arc::new(move |_| log.lock().push(1))
            },
            Delivery::Queued,
        );
        bus.fire_global(OtherEvent::EVENT_ID, Arc::new(OtherEvent));
        assert!(wait_until(|| log.lock().len() == 1));
        bus.stop();
    }

    #[test]
    fn queued_async_panic_subscriptions_are_coerced_to_direct() {
        let bus = BusCore::new();
        let subscriber = Arc::new(Subscriber);
        let seen = Arc::new(AtomicUsize::new(0));

        {
            let seen = seen.clone();
            bus.subscribe_global(
                AsyncPanic::EVENT_ID,
                SubscriberRef::of(&subscriber),
                Arc::new(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
                Delivery::Queued,
            );
        }

        // Worker never started: direct delivery is the only way this runs.
        bus.fire_global(
            AsyncPanic::EVENT_ID,
            Arc::new(AsyncPanic {
                message: "m".to_string(),
            }),
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
