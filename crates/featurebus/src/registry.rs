// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription registry: message type -> receiver set.
//!
//! The registry itself is not synchronised. [`Bus`](crate::Bus) owns one
//! behind its dispatch lock and only mutates it between delivery phases, so
//! the sets are never changed while a delivery is iterating them.

use crate::message::MessageType;
use crate::receiver::{ReceiverId, ReceiverRef};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Receiver Set
// ============================================================================

/// Receivers subscribed to one message type, in subscription order.
#[derive(Clone)]
pub struct ReceiverSet {
    message_type: MessageType,
    receivers: Vec<ReceiverRef>,
}

impl ReceiverSet {
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            receivers: Vec::new(),
        }
    }

    #[must_use]
    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Add a receiver; `false` if it was already present.
    pub fn insert(&mut self, receiver: ReceiverRef) -> bool {
        if self.contains(ReceiverId::of(&receiver)) {
            return false;
        }
        self.receivers.push(receiver);
        true
    }

    /// Remove a receiver; `false` if it was absent.
    pub fn remove(&mut self, id: ReceiverId) -> bool {
        if let Some(index) = self
            .receivers
            .iter()
            .position(|existing| ReceiverId::of(existing) == id)
        {
            self.receivers.remove(index);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, id: ReceiverId) -> bool {
        self.receivers
            .iter()
            .any(|existing| ReceiverId::of(existing) == id)
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceiverRef> {
        self.receivers.iter()
    }

    /// Cloned handles in delivery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ReceiverRef> {
        self.receivers.iter().map(Arc::clone).collect()
    }
}

// ============================================================================
// Subscription Registry
// ============================================================================

/// Per-type receiver sets, created lazily on first subscription.
///
/// Empty sets are kept so that [`receiver_count`](Self::receiver_count) can
/// tell "registered but empty" (`Some(0)`) from "never subscribed" (`None`).
#[derive(Default)]
pub struct SubscriptionRegistry {
    sets: HashMap<TypeId, ReceiverSet>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: returns `false` when the receiver was already subscribed.
    pub fn subscribe(&mut self, message_type: MessageType, receiver: ReceiverRef) -> bool {
        let set = self
            .sets
            .entry(message_type.id())
            .or_insert_with(|| ReceiverSet::new(message_type));

        let added = set.insert(receiver);
        if added {
            log::debug!(
                "[REGISTRY] subscribe type={} receiver_count={}",
                message_type,
                set.len()
            );
        } else {
            log::debug!(
                "[REGISTRY] subscribe skip (duplicate receiver) type={}",
                message_type
            );
        }
        added
    }

    /// No-op (returns `false`) when the type is unknown or the receiver absent.
    pub fn unsubscribe(&mut self, message_type: MessageType, id: ReceiverId) -> bool {
        let removed = self
            .sets
            .get_mut(&message_type.id())
            .is_some_and(|set| set.remove(id));
        if removed {
            log::debug!("[REGISTRY] unsubscribe type={}", message_type);
        }
        removed
    }

    /// Remove the receiver from every set. Returns how many sets it left.
    pub fn unsubscribe_all(&mut self, id: ReceiverId) -> usize {
        let removed = self
            .sets
            .values_mut()
            .map(|set| set.remove(id))
            .filter(|removed| *removed)
            .count();
        log::debug!("[REGISTRY] unsubscribe_all removed from {} types", removed);
        removed
    }

    /// Current set size, or `None` if the type was never subscribed.
    #[must_use]
    pub fn receiver_count(&self, message_type: MessageType) -> Option<usize> {
        self.sets.get(&message_type.id()).map(ReceiverSet::len)
    }

    #[must_use]
    pub fn get(&self, message_type: MessageType) -> Option<&ReceiverSet> {
        self.sets.get(&message_type.id())
    }

    /// Receivers for a type in delivery order (empty for unknown types).
    #[must_use]
    pub fn snapshot(&self, message_type: MessageType) -> Vec<ReceiverRef> {
        self.sets
            .get(&message_type.id())
            .map(ReceiverSet::snapshot)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_subscribed(&self, message_type: MessageType, id: ReceiverId) -> bool {
        self.sets
            .get(&message_type.id())
            .is_some_and(|set| set.contains(id))
    }

    /// Number of registered types, empty sets included.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.sets.len()
    }

    /// Drop sets with no receivers; afterwards their types report `None` again.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.sets.len();
        self.sets.retain(|_, set| !set.is_empty());
        before - self.sets.len()
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::receiver::CallbackReceiver;

    #[derive(Default)]
    struct Jump;
    impl Message for Jump {}

    #[derive(Default)]
    struct Land;
    impl Message for Land {}

    fn receiver(name: &str) -> ReceiverRef {
        Arc::new(CallbackReceiver::new(name, |_bus, _envelope| {}))
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let r = receiver("r");

        assert!(registry.subscribe(MessageType::of::<Jump>(), Arc::clone(&r)));
        assert!(!registry.subscribe(MessageType::of::<Jump>(), Arc::clone(&r)));
        assert_eq!(registry.receiver_count(MessageType::of::<Jump>()), Some(1));
    }

    #[test]
    fn test_unknown_type_is_distinct_from_empty() {
        let mut registry = SubscriptionRegistry::new();
        let r = receiver("r");
        assert_eq!(registry.receiver_count(MessageType::of::<Jump>()), None);

        registry.subscribe(MessageType::of::<Jump>(), Arc::clone(&r));
        registry.unsubscribe(MessageType::of::<Jump>(), ReceiverId::of(&r));
        assert_eq!(registry.receiver_count(MessageType::of::<Jump>()), Some(0));

        assert_eq!(registry.prune_empty(), 1);
        assert_eq!(registry.receiver_count(MessageType::of::<Jump>()), None);
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        let r = receiver("r");
        let other = receiver("other");

        assert!(!registry.unsubscribe(MessageType::of::<Land>(), ReceiverId::of(&r)));
        registry.subscribe(MessageType::of::<Land>(), Arc::clone(&r));
        assert!(!registry.unsubscribe(MessageType::of::<Land>(), ReceiverId::of(&other)));
        assert_eq!(registry.receiver_count(MessageType::of::<Land>()), Some(1));
    }

    #[test]
    fn test_unsubscribe_all_leaves_other_receivers() {
        let mut registry = SubscriptionRegistry::new();
        let a = receiver("a");
        let b = receiver("b");
        registry.subscribe(MessageType::of::<Jump>(), Arc::clone(&a));
        registry.subscribe(MessageType::of::<Land>(), Arc::clone(&a));
        registry.subscribe(MessageType::of::<Land>(), Arc::clone(&b));

        assert_eq!(registry.unsubscribe_all(ReceiverId::of(&a)), 2);
        assert_eq!(registry.receiver_count(MessageType::of::<Jump>()), Some(0));
        assert_eq!(registry.receiver_count(MessageType::of::<Land>()), Some(1));
        assert!(registry.is_subscribed(MessageType::of::<Land>(), ReceiverId::of(&b)));
        assert_eq!(registry.type_count(), 2);
    }

    #[test]
    fn test_snapshot_keeps_subscription_order() {
        let mut registry = SubscriptionRegistry::new();
        let receivers: Vec<ReceiverRef> = (0..4).map(|i| receiver(&format!("r{}", i))).collect();
        for r in &receivers {
            registry.subscribe(MessageType::of::<Jump>(), Arc::clone(r));
        }

        let snapshot = registry.snapshot(MessageType::of::<Jump>());
        let names: Vec<&str> = snapshot.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["r0", "r1", "r2", "r3"]);
        assert!(registry.snapshot(MessageType::of::<Land>()).is_empty());
    }
}
