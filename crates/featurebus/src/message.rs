// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message trait, routing keys, and the per-send letter/envelope types.
//!
//! A message is any `'static` payload type implementing [`Message`]. The bus
//! routes on the concrete [`TypeId`]; payload fields are never inspected by
//! the core.
//!
//! ```text
//! Bus::acquire::<T>() -> Box<T>      (pooled or fresh)
//!       v  producer fills fields
//! Bus::send(Box<T>) -> Letter        (refcount = receiver count)
//!       v
//! Receiver::on_message(&Envelope)    (borrowed view + Letter)
//!       v
//! Bus::receiver_done(Letter)         (refcount 0 -> pool)
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Dynamic-typing helpers every message gets for free.
///
/// Blanket-implemented for all sized `'static` types, so message authors
/// never implement it by hand.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    #[inline]
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A typed unit of information broadcast through the bus.
///
/// # Examples
/// ```
/// use featurebus::Message;
///
/// #[derive(Default)]
/// struct PlayerJoined {
///     name: String,
///     slot: u8,
/// }
///
/// impl Message for PlayerJoined {
///     fn on_recycle(&mut self) {
///         self.name.clear();
///     }
/// }
/// ```
pub trait Message: AsAny + Send + Sync {
    /// Called when the instance enters the pool.
    ///
    /// Producers still overwrite every field before reuse; this hook is for
    /// dropping captured resources (closures, large buffers) early.
    fn on_recycle(&mut self) {}
}

impl fmt::Debug for dyn Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name())
            .finish()
    }
}

/// Routing key for a message type.
///
/// Equality and hashing use the [`TypeId`] only; the name is kept for logs.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    #[must_use]
    #[inline]
    pub fn of<T: Message>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Routing key of the runtime type behind a trait object.
    #[must_use]
    #[inline]
    pub fn of_val(message: &dyn Message) -> Self {
        Self {
            id: Any::type_id(message.as_any()),
            name: message.type_name(),
        }
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Token for one in-flight send.
///
/// Every receiver that gets the message must hand its letter back through
/// [`Bus::receiver_done`](crate::Bus::receiver_done) exactly once. Letters
/// are cheap to copy and may be kept past `on_message` to complete later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Letter {
    id: u64,
    message_type: MessageType,
}

impl Letter {
    pub(crate) fn new(id: u64, message_type: MessageType) -> Self {
        Self { id, message_type }
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }
}

/// Borrowed view of a message handed to a receiver.
pub struct Envelope<'a> {
    letter: Letter,
    message: &'a dyn Message,
}

impl<'a> Envelope<'a> {
    pub(crate) fn new(letter: Letter, message: &'a dyn Message) -> Self {
        Self { letter, message }
    }

    #[must_use]
    #[inline]
    pub fn letter(&self) -> Letter {
        self.letter
    }

    #[must_use]
    #[inline]
    pub fn message(&self) -> &'a dyn Message {
        self.message
    }

    #[must_use]
    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.letter.message_type
    }

    #[must_use]
    #[inline]
    pub fn is<T: Message>(&self) -> bool {
        self.message.as_any().is::<T>()
    }

    /// Typed access to the payload, `None` when the message is another type.
    #[must_use]
    #[inline]
    pub fn downcast_ref<T: Message>(&self) -> Option<&'a T> {
        self.message.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for Envelope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("letter", &self.letter)
            .finish()
    }
}
