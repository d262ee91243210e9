// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deferred subscription changes.
//!
//! Subscribe/unsubscribe requests are never applied straight to the
//! registry. They are queued here and drained as one block by the batch
//! processor after the delivery queue is empty, in arrival order.

use crate::message::MessageType;
use crate::receiver::{ReceiverId, ReceiverRef};
use crate::registry::SubscriptionRegistry;
use std::collections::VecDeque;
use std::fmt;

/// One pending change to the subscription registry.
pub enum Mutation {
    Subscribe {
        message_type: MessageType,
        receiver: ReceiverRef,
    },
    Unsubscribe {
        message_type: MessageType,
        receiver: ReceiverId,
    },
    UnsubscribeAll {
        receiver: ReceiverId,
    },
}

impl Mutation {
    /// Apply against the registry; returns whether anything changed.
    pub fn apply(self, registry: &mut SubscriptionRegistry) -> bool {
        match self {
            Mutation::Subscribe {
                message_type,
                receiver,
            } => registry.subscribe(message_type, receiver),
            Mutation::Unsubscribe {
                message_type,
                receiver,
            } => registry.unsubscribe(message_type, receiver),
            Mutation::UnsubscribeAll { receiver } => registry.unsubscribe_all(receiver) > 0,
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Subscribe {
                message_type,
                receiver,
            } => f
                .debug_struct("Subscribe")
                .field("message_type", message_type)
                .field("receiver", &ReceiverId::of(receiver))
                .finish(),
            Mutation::Unsubscribe {
                message_type,
                receiver,
            } => f
                .debug_struct("Unsubscribe")
                .field("message_type", message_type)
                .field("receiver", receiver)
                .finish(),
            Mutation::UnsubscribeAll { receiver } => f
                .debug_struct("UnsubscribeAll")
                .field("receiver", receiver)
                .finish(),
        }
    }
}

/// FIFO of pending mutations.
#[derive(Debug, Default)]
pub struct MutationQueue {
    pending: VecDeque<Mutation>,
}

impl MutationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.pending.push_back(mutation);
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Apply every pending mutation in arrival order and empty the queue.
    ///
    /// Returns the number of mutations applied (including no-ops).
    pub fn drain_into(&mut self, registry: &mut SubscriptionRegistry) -> usize {
        let count = self.pending.len();
        for mutation in self.pending.drain(..) {
            mutation.apply(registry);
        }
        count
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::receiver::CallbackReceiver;
    use std::sync::Arc;

    #[derive(Default)]
    struct Door;
    impl Message for Door {}

    #[test]
    fn test_drain_applies_in_arrival_order() {
        let mut registry = SubscriptionRegistry::new();
        let mut queue = MutationQueue::new();
        let r: ReceiverRef = Arc::new(CallbackReceiver::new("r", |_bus, _envelope| {}));
        let door = MessageType::of::<Door>();

        // subscribe, unsubscribe, subscribe -> subscribed
        queue.push(Mutation::Subscribe {
            message_type: door,
            receiver: Arc::clone(&r),
        });
        queue.push(Mutation::Unsubscribe {
            message_type: door,
            receiver: ReceiverId::of(&r),
        });
        queue.push(Mutation::Subscribe {
            message_type: door,
            receiver: Arc::clone(&r),
        });
        assert_eq!(registry.receiver_count(door), None);

        assert_eq!(queue.drain_into(&mut registry), 3);
        assert!(queue.is_empty());
        assert_eq!(registry.receiver_count(door), Some(1));

        queue.push(Mutation::UnsubscribeAll {
            receiver: ReceiverId::of(&r),
        });
        assert_eq!(queue.len(), 1);
        queue.drain_into(&mut registry);
        assert_eq!(registry.receiver_count(door), Some(0));
    }
}
