// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver trait and implementations for consuming bus messages

use crate::bus::Bus;
use crate::message::Envelope;
use std::sync::Arc;

/// Receiver trait for consuming messages of subscribed types.
///
/// # Completion Contract
///
/// Every `on_message` call hands the receiver one reference to the message.
/// The receiver MUST give it back with
/// [`Bus::receiver_done`](crate::Bus::receiver_done) exactly once, either
/// inside `on_message` or later by keeping the [`Letter`](crate::Letter).
/// A reference that is never returned keeps the message out of the pool
/// for the life of the bus; the bus does not detect this beyond
/// [`Bus::in_flight_count`](crate::Bus::in_flight_count) and a warning log.
///
/// # Reentrancy
/// `on_message` may call back into the bus (`send`, `subscribe`,
/// `unsubscribe_all`, ...). Sends are queued behind the current message and
/// subscription changes are applied once the delivery queue drains.
///
/// # Thread Safety
/// Implementations must be Send + Sync so a `Bus` can be shared between
/// producer threads; callbacks run on whichever thread activated the batch.
///
/// # Examples
/// ```
/// use featurebus::{Bus, Envelope, Message, Receiver};
///
/// #[derive(Default)]
/// struct Score(u32);
/// impl Message for Score {}
///
/// struct Scoreboard;
///
/// impl Receiver for Scoreboard {
///     fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
///         if let Some(score) = envelope.downcast_ref::<Score>() {
///             println!("score: {}", score.0);
///         }
///         let _ = bus.receiver_done(envelope.letter());
///     }
/// }
/// ```
pub trait Receiver: Send + Sync {
    /// Called once per delivered message.
    ///
    /// # Panics
    /// If this method panics, the bus catches it and continues delivery to
    /// the remaining receivers (counted as `receiver_panics`).
    fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>);

    /// Name used in log lines.
    fn name(&self) -> &str {
        "receiver"
    }
}

/// Shared handle to a receiver, as stored by the subscription registry.
pub type ReceiverRef = Arc<dyn Receiver>;

/// Identity of a receiver: the address of its shared allocation.
///
/// Two clones of the same [`ReceiverRef`] have the same id; two separately
/// allocated receivers never do while both are alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(usize);

impl ReceiverId {
    #[must_use]
    #[inline]
    pub fn of(receiver: &ReceiverRef) -> Self {
        Self(Arc::as_ptr(receiver) as *const () as usize)
    }
}

/// Callback-based receiver wrapper
///
/// Wraps a closure as a [`Receiver`]. The closure is responsible for
/// calling `receiver_done`, exactly like a hand-written receiver.
///
/// # Examples
/// ```
/// use featurebus::{CallbackReceiver, ReceiverRef};
/// use std::sync::Arc;
///
/// let receiver: ReceiverRef = Arc::new(CallbackReceiver::new("logger", |bus, envelope| {
///     println!("got {}", envelope.message_type());
///     let _ = bus.receiver_done(envelope.letter());
/// }));
/// ```
pub struct CallbackReceiver<F>
where
    F: Fn(&Bus, &Envelope<'_>) + Send + Sync,
{
    name: String,
    callback: F,
}

impl<F> CallbackReceiver<F>
where
    F: Fn(&Bus, &Envelope<'_>) + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F> Receiver for CallbackReceiver<F>
where
    F: Fn(&Bus, &Envelope<'_>) + Send + Sync,
{
    fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
        (self.callback)(bus, envelope);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Letter, Message, MessageType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tick;
    impl Message for Tick {}

    #[test]
    fn test_receiver_id_follows_allocation() {
        let a: ReceiverRef = Arc::new(CallbackReceiver::new("a", |_bus, _env| {}));
        let b: ReceiverRef = Arc::new(CallbackReceiver::new("b", |_bus, _env| {}));
        let a_clone = Arc::clone(&a);

        assert_eq!(ReceiverId::of(&a), ReceiverId::of(&a_clone));
        assert_ne!(ReceiverId::of(&a), ReceiverId::of(&b));
    }

    #[test]
    fn test_callback_receiver_invoked() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let receiver = CallbackReceiver::new("counter", move |_bus, envelope| {
            assert!(envelope.is::<Tick>());
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        let bus = Bus::new();
        let tick = Tick;
        let envelope = Envelope::new(Letter::new(9, MessageType::of::<Tick>()), &tick);
        receiver.on_message(&bus, &envelope);
        receiver.on_message(&bus, &envelope);

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(receiver.name(), "counter");
    }
}
