// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # featurebus - in-process publish/subscribe with pooled messages
//!
//! Decoupled components ("features") exchange typed messages without
//! knowing about each other. Message instances are recycled through a
//! type-keyed pool, and a reference count per send tells the bus when every
//! receiver is done with an instance.
//!
//! ## Quick Start
//!
//! ```rust
//! use featurebus::{Bus, CallbackReceiver, Message, ReceiverRef};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Damage {
//!     amount: u32,
//! }
//!
//! impl Message for Damage {
//!     fn on_recycle(&mut self) {
//!         self.amount = 0;
//!     }
//! }
//!
//! let bus = Bus::new();
//! let health: ReceiverRef = Arc::new(CallbackReceiver::new("health", |bus, envelope| {
//!     if let Some(hit) = envelope.downcast_ref::<Damage>() {
//!         assert_eq!(hit.amount, 7);
//!     }
//!     bus.receiver_done(envelope.letter()).expect("one release per delivery");
//! }));
//! bus.subscribe::<Damage>(&health);
//!
//! bus.send_new::<Damage, _>(|msg| msg.amount = 7);
//! assert_eq!(bus.idle_count::<Damage>(), 1);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |  FeatureHost / FeatureRegistry   (init -> ready -> StartGame) |
//! +---------------------------------------------------------------+
//! |  Bus        send | receiver_done | subscribe | unsubscribe    |
//! |    batch processor: deliveries (FIFO) then mutations (block)  |
//! +------------------+--------------------+-----------------------+
//! |  SubscriptionRegistry | MutationQueue | LetterTable (refs)    |
//! +------------------+--------------------+-----------------------+
//! |  MessagePool (per-type FIFO of idle instances)                |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bus`] | Subscriptions, dispatch, and recycling |
//! | [`Message`] | Trait every payload type implements |
//! | [`Receiver`] | Trait for anything that consumes messages |
//! | [`Letter`] | Token for one send, handed back via `receiver_done` |
//! | [`FeatureHost`] | Starts features and sends [`StartGame`] once all are ready |

/// Bus: dispatch, batching, and lifecycle.
pub mod bus;
/// Runtime configuration (defaults, env vars, optional YAML).
pub mod config;
mod dispatch;
/// Crate error type.
pub mod error;
/// Features, the feature registry, and the feature host.
pub mod feature;
/// Message trait, routing keys, letters, and envelopes.
pub mod message;
/// Bus counters.
pub mod metrics;
/// Deferred subscription changes.
pub mod mutation;
/// Type-keyed message pool.
pub mod pool;
/// Receiver trait and closure adapter.
pub mod receiver;
/// Subscription registry.
pub mod registry;

pub use bus::{Bus, BusBuilder};
pub use config::BusConfig;
pub use error::{Error, Result};
pub use feature::{
    Feature, FeatureContext, FeatureHost, FeatureInitialised, FeatureRegistry, Readiness,
    ReadySignal, StartGame,
};
pub use message::{AsAny, Envelope, Letter, Message, MessageType};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use mutation::{Mutation, MutationQueue};
pub use pool::MessagePool;
pub use receiver::{CallbackReceiver, Receiver, ReceiverId, ReceiverRef};
pub use registry::{ReceiverSet, SubscriptionRegistry};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
