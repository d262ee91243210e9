// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type-keyed recycling pool for message instances.
//!
//! Each concrete message type owns a FIFO bucket of idle instances. Buckets
//! are created lazily on first release and live until cleared.
//!
//! # Invariants
//!
//! - Every pooled instance is unreachable from any receiver (the bus only
//!   releases a message once its reference count reaches zero).
//! - `acquire` never fails: an empty or missing bucket means a fresh
//!   `T::default()` allocation.
//! - Boxes keep their heap address through the pool, so a released
//!   instance comes back as the same object.

use crate::message::{Message, MessageType};
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

/// Type-keyed message pool.
///
/// Backed by a `DashMap` so producers on different threads can acquire and
/// release without going through the bus's dispatch lock.
pub struct MessagePool {
    buckets: DashMap<TypeId, VecDeque<Box<dyn Message>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MessagePool {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Take the oldest idle instance of `T`, or allocate a new one.
    pub fn acquire<T: Message + Default>(&self) -> Box<T> {
        let reused = self
            .buckets
            .get_mut(&TypeId::of::<T>())
            .and_then(|mut bucket| bucket.pop_front());

        if let Some(boxed) = reused {
            match boxed.into_any().downcast::<T>() {
                Ok(message) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return message;
                }
                Err(_) => {
                    // Buckets are keyed by the runtime type on release.
                    log::warn!(
                        "[POOL] bucket for {} held a foreign instance, discarding",
                        std::any::type_name::<T>()
                    );
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Box::<T>::default()
    }

    /// Return an instance to the bucket of its runtime type.
    pub fn release<T: Message>(&self, message: Box<T>) {
        self.release_boxed(message, None);
    }

    /// Return a type-erased instance, dropping it instead when the bucket
    /// already holds `max_idle` instances.
    ///
    /// Returns `true` when the instance was pooled. An instance whose
    /// `on_recycle` panics is dropped.
    pub fn release_boxed(&self, mut message: Box<dyn Message>, max_idle: Option<usize>) -> bool {
        let message_type = MessageType::of_val(message.as_ref());
        if catch_unwind(AssertUnwindSafe(|| message.on_recycle())).is_err() {
            log::warn!(
                "[POOL] on_recycle panicked for {}, dropping instance",
                message_type
            );
            return false;
        }

        let mut bucket = self.buckets.entry(message_type.id()).or_default();
        if let Some(limit) = max_idle {
            if bucket.len() >= limit {
                log::debug!(
                    "[POOL] bucket {} full ({} idle), dropping instance",
                    message_type,
                    bucket.len()
                );
                return false;
            }
        }

        bucket.push_back(message);
        true
    }

    /// Discard every idle instance of `T`. Returns how many were dropped.
    pub fn clear<T: Message>(&self) -> usize {
        self.clear_type(MessageType::of::<T>())
    }

    pub fn clear_type(&self, message_type: MessageType) -> usize {
        let dropped = match self.buckets.get_mut(&message_type.id()) {
            Some(mut bucket) => {
                let count = bucket.len();
                bucket.clear();
                count
            }
            None => 0,
        };
        log::debug!("[POOL] cleared {} idle {}", dropped, message_type);
        dropped
    }

    /// Drop every bucket.
    pub fn clear_all(&self) {
        self.buckets.clear();
    }

    #[must_use]
    pub fn idle_count<T: Message>(&self) -> usize {
        self.buckets
            .get(&TypeId::of::<T>())
            .map_or(0, |bucket| bucket.len())
    }

    #[must_use]
    pub fn total_idle(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    /// `(hits, misses)` of `acquire` since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Chat {
        text: String,
    }
    impl Message for Chat {
        fn on_recycle(&mut self) {
            self.text.clear();
        }
    }

    #[derive(Default)]
    struct Spawn(u32);
    impl Message for Spawn {}

    #[test]
    fn test_acquire_from_empty_pool_allocates() {
        let pool = MessagePool::new();
        let chat = pool.acquire::<Chat>();
        assert!(chat.text.is_empty());
        assert_eq!(pool.stats(), (0, 1));
    }

    #[test]
    fn test_release_then_acquire_returns_same_instance() {
        let pool = MessagePool::new();
        let mut chat = pool.acquire::<Chat>();
        chat.text.push_str("hello");
        let addr = &*chat as *const Chat as usize;

        pool.release(chat);
        assert_eq!(pool.idle_count::<Chat>(), 1);

        let again = pool.acquire::<Chat>();
        assert_eq!(&*again as *const Chat as usize, addr);
        assert!(again.text.is_empty(), "on_recycle should have run");
        assert_eq!(pool.idle_count::<Chat>(), 0);
        assert_eq!(pool.stats(), (1, 1));
    }

    #[test]
    fn test_buckets_are_fifo() {
        let pool = MessagePool::new();
        pool.release(Box::new(Spawn(1)));
        pool.release(Box::new(Spawn(2)));
        pool.release(Box::new(Spawn(3)));

        assert_eq!(pool.acquire::<Spawn>().0, 1);
        assert_eq!(pool.acquire::<Spawn>().0, 2);
        assert_eq!(pool.acquire::<Spawn>().0, 3);
        assert_eq!(pool.acquire::<Spawn>().0, 0);
    }

    #[test]
    fn test_buckets_are_per_type() {
        let pool = MessagePool::new();
        pool.release(Box::new(Spawn(5)));

        assert_eq!(pool.idle_count::<Chat>(), 0);
        let _chat = pool.acquire::<Chat>();
        assert_eq!(pool.idle_count::<Spawn>(), 1);
    }

    #[test]
    fn test_release_boxed_respects_limit() {
        let pool = MessagePool::new();
        assert!(pool.release_boxed(Box::new(Spawn(1)), Some(1)));
        assert!(!pool.release_boxed(Box::new(Spawn(2)), Some(1)));
        assert_eq!(pool.idle_count::<Spawn>(), 1);
        assert_eq!(pool.acquire::<Spawn>().0, 1);
    }

    #[derive(Default)]
    struct Brittle;
    impl Message for Brittle {
        fn on_recycle(&mut self) {
            panic!("recycle hook failure");
        }
    }

    #[test]
    fn test_panicking_recycle_hook_drops_instance() {
        let pool = MessagePool::new();
        assert!(!pool.release_boxed(Box::new(Brittle), None));
        assert_eq!(pool.idle_count::<Brittle>(), 0);

        // The bucket still works for well-behaved types.
        assert!(pool.release_boxed(Box::new(Spawn(4)), None));
        assert_eq!(pool.idle_count::<Spawn>(), 1);
    }

    #[test]
    fn test_clear_only_touches_one_type() {
        let pool = MessagePool::new();
        pool.release(Box::new(Spawn(1)));
        pool.release(Box::new(Spawn(2)));
        pool.release(Box::<Chat>::default());

        assert_eq!(pool.clear::<Spawn>(), 2);
        assert_eq!(pool.clear::<Spawn>(), 0);
        assert_eq!(pool.idle_count::<Chat>(), 1);
        assert_eq!(pool.total_idle(), 1);

        pool.clear_all();
        assert_eq!(pool.total_idle(), 0);
    }
}
