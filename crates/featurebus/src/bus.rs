// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The message bus: subscription management, dispatch, and recycling.
//!
//! # State Machine
//!
//! ```text
//!            send / subscribe / unsubscribe
//!   Idle ---------------------------------------> Batch Active
//!    ^                                                 |
//!    |     delivery queue empty AND mutation queue     |
//!    +------------------- empty -----------------------+
//! ```
//!
//! Exactly one caller runs the batch processor: the one whose request
//! finds the bus idle. Every other request made while the batch is active
//! (from a receiver callback, or from another thread) is appended to the
//! delivery or mutation queue and returns immediately.
//!
//! Each pass of the batch processor delivers every queued message (FIFO),
//! then applies every queued mutation as one block, and repeats until both
//! queues are empty. Subscription sets therefore never change while a
//! delivery is iterating them.
//!
//! # Locking
//!
//! A single `parking_lot::Mutex` guards the registry, both queues, the
//! letter table, and the idle/active flag. It is never held while a
//! receiver runs, so receivers can call back into the bus freely.

use crate::config::BusConfig;
use crate::dispatch::{Delivery, LetterTable, Release};
use crate::error::{Error, Result};
use crate::message::{Envelope, Letter, Message, MessageType};
use crate::metrics::{BusMetrics, MetricsSnapshot};
use crate::mutation::{Mutation, MutationQueue};
use crate::pool::MessagePool;
use crate::receiver::{ReceiverId, ReceiverRef};
use crate::registry::SubscriptionRegistry;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Everything the batch processor serialises.
struct BusState {
    registry: SubscriptionRegistry,
    deliveries: VecDeque<Delivery>,
    mutations: MutationQueue,
    letters: LetterTable,
    active: bool,
}

impl BusState {
    fn new() -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            deliveries: VecDeque::new(),
            mutations: MutationQueue::new(),
            letters: LetterTable::new(),
            active: false,
        }
    }

    /// Idle -> active transition; `true` if the caller must run the batch.
    #[inline]
    fn activate(&mut self) -> bool {
        if self.active {
            false
        } else {
            self.active = true;
            true
        }
    }
}

/// Step taken by one iteration of the batch processor.
enum Step {
    Deliver(Delivery),
    Applied(usize),
    Idle,
}

/// In-process publish/subscribe bus with pooled, reference-counted messages.
///
/// Construct one per application (or per test) and share it by reference
/// or `Arc`; there is no global instance.
///
/// # Examples
///
/// ```
/// use featurebus::{Bus, CallbackReceiver, Message, ReceiverRef};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct LevelLoaded {
///     level: u32,
/// }
/// impl Message for LevelLoaded {}
///
/// let bus = Bus::new();
/// let hud: ReceiverRef = Arc::new(CallbackReceiver::new("hud", |bus, envelope| {
///     if let Some(msg) = envelope.downcast_ref::<LevelLoaded>() {
///         println!("level {} ready", msg.level);
///     }
///     let _ = bus.receiver_done(envelope.letter());
/// }));
/// bus.subscribe::<LevelLoaded>(&hud);
///
/// let mut msg = bus.acquire::<LevelLoaded>();
/// msg.level = 3;
/// bus.send(msg);
///
/// // Recycled once the only receiver finished.
/// assert_eq!(bus.idle_count::<LevelLoaded>(), 1);
/// ```
pub struct Bus {
    state: Mutex<BusState>,
    pool: MessagePool,
    config: ArcSwap<BusConfig>,
    metrics: BusMetrics,
}

impl Bus {
    /// Bus with [`BusConfig::default`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::new()),
            pool: MessagePool::new(),
            config: ArcSwap::from_pointee(BusConfig::default()),
            metrics: BusMetrics::new(),
        }
    }

    /// Bus with `config`, rejected when it fails [`BusConfig::validate`].
    pub fn with_config(config: BusConfig) -> Result<Self> {
        config.validate()?;
        let bus = Self::new();
        bus.config.store(Arc::new(config));
        Ok(bus)
    }

    /// Start a [`BusBuilder`] from the default config.
    pub fn builder() -> BusBuilder {
        BusBuilder::default()
    }

    // ===================================================================
    // Pool
    // ===================================================================

    /// Pooled instance of `T` if one is idle, otherwise a new one.
    #[inline]
    pub fn acquire<T: Message + Default>(&self) -> Box<T> {
        self.pool.acquire::<T>()
    }

    /// Return an unsent (or privately owned) instance to the pool.
    pub fn release<T: Message>(&self, message: Box<T>) {
        let max_idle = self.config.load().max_idle_per_type;
        self.pool.release_boxed(message, max_idle);
    }

    /// Discard idle instances of `T`; returns how many were dropped.
    pub fn clear_pool<T: Message>(&self) -> usize {
        self.pool.clear::<T>()
    }

    #[must_use]
    pub fn idle_count<T: Message>(&self) -> usize {
        self.pool.idle_count::<T>()
    }

    #[must_use]
    pub fn pool(&self) -> &MessagePool {
        &self.pool
    }

    // ===================================================================
    // Subscriptions (always deferred through the mutation queue)
    // ===================================================================

    /// Subscribe `receiver` to `T`. Idempotent.
    ///
    /// Applied immediately when the bus is idle; otherwise after the
    /// current delivery phase.
    pub fn subscribe<T: Message>(&self, receiver: &ReceiverRef) {
        self.subscribe_to(MessageType::of::<T>(), receiver);
    }

    /// Runtime-keyed form of [`Bus::subscribe`].
    pub fn subscribe_to(&self, message_type: MessageType, receiver: &ReceiverRef) {
        self.enqueue_mutation(Mutation::Subscribe {
            message_type,
            receiver: Arc::clone(receiver),
        });
    }

    /// Unsubscribe `receiver` from `T`. No-op when not subscribed.
    pub fn unsubscribe<T: Message>(&self, receiver: &ReceiverRef) {
        self.unsubscribe_from(MessageType::of::<T>(), receiver);
    }

    /// Runtime-keyed form of [`Bus::unsubscribe`].
    pub fn unsubscribe_from(&self, message_type: MessageType, receiver: &ReceiverRef) {
        self.enqueue_mutation(Mutation::Unsubscribe {
            message_type,
            receiver: ReceiverId::of(receiver),
        });
    }

    /// Unsubscribe `receiver` from every message type.
    pub fn unsubscribe_all(&self, receiver: &ReceiverRef) {
        self.enqueue_mutation(Mutation::UnsubscribeAll {
            receiver: ReceiverId::of(receiver),
        });
    }

    /// Receivers currently subscribed to `T`.
    ///
    /// `None` means `T` was never subscribed; `Some(0)` means it was, but
    /// every receiver has since left.
    #[must_use]
    pub fn receiver_count<T: Message>(&self) -> Option<usize> {
        self.receiver_count_of(MessageType::of::<T>())
    }

    #[must_use]
    pub fn receiver_count_of(&self, message_type: MessageType) -> Option<usize> {
        self.state.lock().registry.receiver_count(message_type)
    }

    #[must_use]
    pub fn is_subscribed<T: Message>(&self, receiver: &ReceiverRef) -> bool {
        self.state
            .lock()
            .registry
            .is_subscribed(MessageType::of::<T>(), ReceiverId::of(receiver))
    }

    fn enqueue_mutation(&self, mutation: Mutation) {
        let start = {
            let mut state = self.state.lock();
            log::debug!("[BUS] queue mutation {:?}", mutation);
            state.mutations.push(mutation);
            state.activate()
        };
        if start {
            self.run_batch();
        }
    }

    // ===================================================================
    // Dispatch
    // ===================================================================

    /// Broadcast a message to every receiver currently subscribed to its type.
    ///
    /// The reference count starts at the number of receivers. With no
    /// receivers the message goes straight back to the pool. When called
    /// from inside a receiver, the message is queued behind the one being
    /// delivered.
    pub fn send<T: Message>(&self, message: Box<T>) -> Letter {
        self.send_boxed(message)
    }

    /// Acquire, fill, and send in one call.
    pub fn send_new<T, F>(&self, fill: F) -> Letter
    where
        T: Message + Default,
        F: FnOnce(&mut T),
    {
        let mut message = self.acquire::<T>();
        fill(&mut message);
        self.send(message)
    }

    /// Type-erased [`send`](Self::send).
    pub fn send_boxed(&self, message: Box<dyn Message>) -> Letter {
        let message_type = MessageType::of_val(message.as_ref());
        BusMetrics::bump(&self.metrics.messages_sent, 1);

        let mut state = self.state.lock();
        let receivers = state.registry.snapshot(message_type);

        if receivers.is_empty() {
            let letter = state.letters.unrouted(message_type);
            drop(state);
            log::debug!("[BUS] send {} -> no receivers, recycled", message_type);
            BusMetrics::bump(&self.metrics.messages_unrouted, 1);
            self.recycle(message);
            return letter;
        }

        let letter = state.letters.open(message_type, receivers.len());
        let in_flight = state.letters.len();
        log::debug!(
            "[BUS] send {} letter={} receivers={} queued={}",
            message_type,
            letter.id(),
            receivers.len(),
            state.deliveries.len()
        );
        state.deliveries.push_back(Delivery {
            letter,
            message,
            receivers,
        });
        let start = state.activate();
        drop(state);

        self.check_in_flight(in_flight);
        if start {
            self.run_batch();
        }
        letter
    }

    /// Give back one reference to a delivered message.
    ///
    /// Returns `Ok(true)` when this was the last reference (the message is
    /// recycled as soon as its delivery finishes), `Ok(false)` while other
    /// receivers still hold it.
    ///
    /// # Errors
    /// [`Error::UnknownLetter`] when the letter has no outstanding
    /// references, i.e. `receiver_done` was called more often than the
    /// message was delivered.
    pub fn receiver_done(&self, letter: Letter) -> Result<bool> {
        let outcome = self.state.lock().letters.release(letter);
        match outcome {
            Ok(Release::Pending { remaining }) => {
                log::debug!(
                    "[BUS] receiver_done letter={} remaining={}",
                    letter.id(),
                    remaining
                );
                Ok(false)
            }
            Ok(Release::Recycle(message)) => {
                log::debug!("[BUS] receiver_done letter={} -> recycled", letter.id());
                self.recycle(message);
                Ok(true)
            }
            Ok(Release::Drained) => Ok(true),
            Err(e) => {
                log::warn!(
                    "[BUS] receiver_done for {} letter={} rejected: {}",
                    letter.message_type(),
                    letter.id(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Drain the delivery queue, then the mutation queue, until both are empty.
    fn run_batch(&self) {
        BusMetrics::bump(&self.metrics.batches, 1);
        loop {
            let step = {
                let mut state = self.state.lock();
                if let Some(delivery) = state.deliveries.pop_front() {
                    Step::Deliver(delivery)
                } else if !state.mutations.is_empty() {
                    let BusState {
                        registry,
                        mutations,
                        ..
                    } = &mut *state;
                    Step::Applied(mutations.drain_into(registry))
                } else {
                    state.active = false;
                    Step::Idle
                }
            };

            match step {
                Step::Deliver(delivery) => self.deliver(delivery),
                Step::Applied(count) => {
                    log::debug!("[BUS] applied {} subscription changes", count);
                    BusMetrics::bump(&self.metrics.mutations_applied, count as u64);
                }
                Step::Idle => break,
            }
        }
    }

    /// Invoke every receiver of one delivery with panic isolation.
    fn deliver(&self, delivery: Delivery) {
        let Delivery {
            letter,
            message,
            receivers,
        } = delivery;

        {
            let envelope = Envelope::new(letter, message.as_ref());
            for receiver in &receivers {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    receiver.on_message(self, &envelope);
                }));
                BusMetrics::bump(&self.metrics.deliveries, 1);

                if result.is_err() {
                    BusMetrics::bump(&self.metrics.receiver_panics, 1);
                    log::warn!(
                        "[BUS] receiver '{}' panicked handling {} letter={}",
                        receiver.name(),
                        letter.message_type(),
                        letter.id()
                    );
                }
            }
        }

        let recycle = self.state.lock().letters.settle(letter, message);
        if let Some(message) = recycle {
            self.recycle(message);
        }
    }

    fn recycle(&self, message: Box<dyn Message>) {
        let max_idle = self.config.load().max_idle_per_type;
        if self.pool.release_boxed(message, max_idle) {
            BusMetrics::bump(&self.metrics.messages_recycled, 1);
        }
    }

    fn check_in_flight(&self, in_flight: usize) {
        let threshold = self.config.load().in_flight_warn_threshold;
        if in_flight == threshold {
            BusMetrics::bump(&self.metrics.in_flight_warnings, 1);
            log::warn!(
                "[BUS] {} letters awaiting receiver_done; a receiver may be skipping it",
                in_flight
            );
        }
    }

    // ===================================================================
    // Introspection / Lifecycle
    // ===================================================================

    /// `true` while a batch is being processed.
    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.state.lock().active
    }

    /// Letters with outstanding references (queued or delivered).
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().letters.len()
    }

    /// Outstanding references for one letter, `None` once it was recycled.
    #[must_use]
    pub fn remaining_refs(&self, letter: Letter) -> Option<usize> {
        self.state.lock().letters.remaining(letter)
    }

    #[must_use]
    pub fn queued_deliveries(&self) -> usize {
        self.state.lock().deliveries.len()
    }

    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.state.lock().mutations.len()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let (pool_hits, pool_misses) = self.pool.stats();
        MetricsSnapshot {
            pool_hits,
            pool_misses,
            ..self.metrics.snapshot()
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<BusConfig> {
        self.config.load_full()
    }

    /// Replace the runtime config; takes effect for subsequent operations.
    pub fn set_config(&self, config: BusConfig) -> Result<()> {
        config.validate()?;
        log::debug!("[BUS] config updated: {:?}", config);
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Forget every subscription, queued request, in-flight letter, and
    /// pooled instance.
    ///
    /// # Errors
    /// [`Error::DispatchActive`] when called while a batch is running.
    pub fn reset(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.active {
                return Err(Error::DispatchActive);
            }
            state.registry.clear();
            state.deliveries.clear();
            state.mutations.clear();
            state.letters.clear();
        }
        self.pool.clear_all();
        log::debug!("[BUS] reset");
        Ok(())
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Bus`].
///
/// ```
/// use featurebus::Bus;
///
/// let bus = Bus::builder()
///     .max_idle_per_type(32)
///     .in_flight_warn_threshold(256)
///     .build()
///     .expect("valid config");
/// assert_eq!(bus.config().max_idle_per_type, Some(32));
/// ```
#[derive(Debug, Default)]
pub struct BusBuilder {
    config: BusConfig,
}

impl BusBuilder {
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn max_idle_per_type(mut self, max: usize) -> Self {
        self.config.max_idle_per_type = Some(max);
        self
    }

    #[must_use]
    pub fn in_flight_warn_threshold(mut self, threshold: usize) -> Self {
        self.config.in_flight_warn_threshold = threshold;
        self
    }

    pub fn build(self) -> Result<Bus> {
        Bus::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::CallbackReceiver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Alarm(u32);
    impl Message for Alarm {}

    fn done_receiver(name: &str, hits: Arc<AtomicUsize>) -> ReceiverRef {
        Arc::new(CallbackReceiver::new(name, move |bus, envelope| {
            hits.fetch_add(1, Ordering::SeqCst);
            bus.receiver_done(envelope.letter()).expect("first release");
        }))
    }

    #[test]
    fn test_bus_is_idle_after_send() {
        let bus = Bus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let r = done_receiver("r", Arc::clone(&hits));
        bus.subscribe::<Alarm>(&r);

        bus.send(Box::new(Alarm(1)));

        assert!(!bus.is_dispatching());
        assert_eq!(bus.queued_deliveries(), 0);
        assert_eq!(bus.pending_mutations(), 0);
        assert_eq!(bus.in_flight_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_while_idle_applies_immediately() {
        let bus = Bus::new();
        let r = done_receiver("r", Arc::new(AtomicUsize::new(0)));
        assert_eq!(bus.receiver_count::<Alarm>(), None);

        bus.subscribe::<Alarm>(&r);
        assert_eq!(bus.receiver_count::<Alarm>(), Some(1));
        assert!(bus.is_subscribed::<Alarm>(&r));

        bus.unsubscribe::<Alarm>(&r);
        assert_eq!(bus.receiver_count::<Alarm>(), Some(0));
        assert_eq!(bus.metrics().mutations_applied, 2);
    }

    #[test]
    fn test_send_new_fills_payload() {
        let bus = Bus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let r: ReceiverRef = Arc::new(CallbackReceiver::new("r", move |bus, envelope| {
            if let Some(alarm) = envelope.downcast_ref::<Alarm>() {
                seen_clone.store(alarm.0 as usize, Ordering::SeqCst);
            }
            let _ = bus.receiver_done(envelope.letter());
        }));
        bus.subscribe::<Alarm>(&r);

        bus.send_new::<Alarm, _>(|alarm| alarm.0 = 99);
        assert_eq!(seen.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn test_extra_receiver_done_is_reported() {
        let bus = Bus::new();
        let r = done_receiver("r", Arc::new(AtomicUsize::new(0)));
        bus.subscribe::<Alarm>(&r);

        let letter = bus.send(Box::new(Alarm(0)));
        assert!(matches!(
            bus.receiver_done(letter),
            Err(Error::UnknownLetter { .. })
        ));
        // Pool state is unaffected by the bogus release.
        assert_eq!(bus.idle_count::<Alarm>(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let bus = Bus::new();
        let r = done_receiver("r", Arc::new(AtomicUsize::new(0)));
        bus.subscribe::<Alarm>(&r);
        bus.send(Box::new(Alarm(0)));
        assert_eq!(bus.idle_count::<Alarm>(), 1);

        bus.reset().expect("idle bus resets");
        assert_eq!(bus.receiver_count::<Alarm>(), None);
        assert_eq!(bus.idle_count::<Alarm>(), 0);
    }

    #[test]
    fn test_reset_inside_batch_is_rejected() {
        let bus = Bus::new();
        let outcome = Arc::new(Mutex::new(None));
        let outcome_clone = Arc::clone(&outcome);
        let r: ReceiverRef = Arc::new(CallbackReceiver::new("r", move |bus, envelope| {
            *outcome_clone.lock() = Some(matches!(bus.reset(), Err(Error::DispatchActive)));
            let _ = bus.receiver_done(envelope.letter());
        }));
        bus.subscribe::<Alarm>(&r);
        bus.send(Box::new(Alarm(0)));

        assert_eq!(*outcome.lock(), Some(true));
        assert_eq!(bus.receiver_count::<Alarm>(), Some(1));
    }

    #[test]
    fn test_pool_cap_applies_to_recycling() {
        let bus = Bus::builder().max_idle_per_type(1).build().expect("config");
        bus.send(Box::new(Alarm(1)));
        bus.send(Box::new(Alarm(2)));

        assert_eq!(bus.idle_count::<Alarm>(), 1);
        let snap = bus.metrics();
        assert_eq!(snap.messages_unrouted, 2);
        assert_eq!(snap.messages_recycled, 1);
    }

    #[test]
    fn test_release_respects_pool_cap() {
        let bus = Bus::builder().max_idle_per_type(2).build().expect("config");
        for n in 0..3 {
            bus.release(Box::new(Alarm(n)));
        }
        assert_eq!(bus.idle_count::<Alarm>(), 2);
    }

    #[test]
    fn test_set_config_changes_pool_cap_at_runtime() {
        let bus = Bus::new();
        for n in 0..3 {
            bus.release(Box::new(Alarm(n)));
        }
        assert_eq!(bus.idle_count::<Alarm>(), 3);

        bus.set_config(BusConfig::default().with_max_idle_per_type(Some(1)))
            .expect("valid");
        // Existing idle instances stay; new ones are dropped past the cap.
        bus.release(Box::new(Alarm(3)));
        assert_eq!(bus.idle_count::<Alarm>(), 3);

        bus.clear_pool::<Alarm>();
        bus.release(Box::new(Alarm(4)));
        bus.release(Box::new(Alarm(5)));
        assert_eq!(bus.idle_count::<Alarm>(), 1);
    }

    #[test]
    fn test_in_flight_threshold_warns_once_per_crossing() {
        let bus = Bus::builder()
            .in_flight_warn_threshold(2)
            .build()
            .expect("config");
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_clone = Arc::clone(&held);
        let r: ReceiverRef = Arc::new(CallbackReceiver::new("hoarder", move |_, envelope| {
            held_clone.lock().push(envelope.letter());
        }));
        bus.subscribe::<Alarm>(&r);

        for n in 0..3 {
            bus.send(Box::new(Alarm(n)));
        }
        assert_eq!(bus.in_flight_count(), 3);
        assert_eq!(bus.metrics().in_flight_warnings, 1);

        for letter in held.lock().drain(..) {
            bus.receiver_done(letter).expect("held letter");
        }
        assert_eq!(bus.in_flight_count(), 0);

        bus.send(Box::new(Alarm(3)));
        bus.send(Box::new(Alarm(4)));
        assert_eq!(bus.metrics().in_flight_warnings, 2);
    }

    #[derive(Default)]
    struct Volatile;
    impl Message for Volatile {
        fn on_recycle(&mut self) {
            panic!("recycle hook failure");
        }
    }

    #[test]
    fn test_panicking_recycle_hook_leaves_bus_usable() {
        let bus = Bus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let r = done_receiver("r", Arc::clone(&hits));
        bus.subscribe::<Volatile>(&r);
        bus.subscribe::<Alarm>(&r);

        bus.send(Box::new(Volatile));
        assert!(!bus.is_dispatching());
        assert_eq!(bus.idle_count::<Volatile>(), 0);

        bus.send(Box::new(Alarm(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.queued_deliveries(), 0);
        assert!(!bus.is_dispatching());
    }

    #[test]
    fn test_set_config_validates() {
        let bus = Bus::new();
        let bad = BusConfig::default().with_in_flight_warn_threshold(0);
        assert!(bus.set_config(bad).is_err());
        assert!(Bus::with_config(BusConfig::default().with_max_idle_per_type(Some(0))).is_err());

        bus.set_config(BusConfig::default().with_max_idle_per_type(Some(4)))
            .expect("valid");
        assert_eq!(bus.config().max_idle_per_type, Some(4));
    }
}
