// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Feature lifecycle on top of the bus.
//!
//! A feature is a [`Receiver`] with an `init`/`cleanup` lifecycle. Features
//! are listed explicitly in a [`FeatureRegistry`] and brought up by
//! [`FeatureHost::start`]:
//!
//! ```text
//! start()
//!   |-- host subscribes to FeatureInitialised
//!   |-- init() each feature (registration order)
//!   |     Ready    -> host sends FeatureInitialised for it
//!   |     Deferred -> feature fires its ReadySignal later
//!   `-- last FeatureInitialised received
//!         -> host unsubscribes, clears that pool, sends StartGame
//! ```

mod host;
mod messages;

pub use host::FeatureHost;
pub use messages::{FeatureInitialised, StartGame};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::receiver::{Receiver, ReceiverRef};
use std::fmt;
use std::sync::Arc;

/// Result of [`Feature::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Initialised synchronously; the host reports it ready.
    Ready,
    /// Still working; the feature fires [`FeatureContext::ready_signal`]
    /// when done.
    Deferred,
}

/// One unit of application functionality.
///
/// `Receiver::name` is used in log lines; the registered name identifies
/// the feature to the host.
pub trait Feature: Receiver {
    /// Subscribe to what the feature needs and report readiness.
    fn init(&self, ctx: &FeatureContext<'_>) -> Readiness;

    /// Called once when the feature is removed or the host shuts down.
    fn cleanup(&self, ctx: &FeatureContext<'_>) {
        ctx.unsubscribe_all();
    }
}

/// What a feature sees during `init` and `cleanup`.
pub struct FeatureContext<'a> {
    bus: &'a Bus,
    name: &'a str,
    receiver: &'a ReceiverRef,
}

impl<'a> FeatureContext<'a> {
    pub(crate) fn new(bus: &'a Bus, name: &'a str, receiver: &'a ReceiverRef) -> Self {
        Self {
            bus,
            name,
            receiver,
        }
    }

    #[must_use]
    pub fn bus(&self) -> &'a Bus {
        self.bus
    }

    /// Registered name of this feature.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Handle under which this feature is subscribed.
    #[must_use]
    pub fn receiver(&self) -> &'a ReceiverRef {
        self.receiver
    }

    pub fn subscribe<T: Message>(&self) {
        self.bus.subscribe::<T>(self.receiver);
    }

    pub fn unsubscribe<T: Message>(&self) {
        self.bus.unsubscribe::<T>(self.receiver);
    }

    pub fn unsubscribe_all(&self) {
        self.bus.unsubscribe_all(self.receiver);
    }

    /// Signal to fire once a [`Readiness::Deferred`] init completes.
    #[must_use]
    pub fn ready_signal(&self) -> ReadySignal {
        ReadySignal {
            feature: self.name.to_string(),
        }
    }
}

/// Reports one feature as ready by sending [`FeatureInitialised`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySignal {
    feature: String,
}

impl ReadySignal {
    #[must_use]
    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn fire(self, bus: &Bus) {
        log::debug!("[FEATURE] '{}' signalled ready", self.feature);
        let feature = self.feature;
        bus.send_new::<FeatureInitialised, _>(move |msg| msg.feature = feature);
    }
}

type Factory = Box<dyn Fn() -> (Arc<dyn Feature>, ReceiverRef) + Send + Sync>;

pub(crate) struct FeatureEntry {
    pub(crate) name: String,
    factory: Factory,
}

impl FeatureEntry {
    pub(crate) fn instantiate(&self) -> (Arc<dyn Feature>, ReceiverRef) {
        (self.factory)()
    }
}

/// Ordered list of feature factories.
///
/// ```
/// use featurebus::{Bus, Envelope, Feature, FeatureContext, FeatureRegistry, Readiness, Receiver};
///
/// struct Audio;
///
/// impl Receiver for Audio {
///     fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
///         let _ = bus.receiver_done(envelope.letter());
///     }
/// }
///
/// impl Feature for Audio {
///     fn init(&self, _ctx: &FeatureContext<'_>) -> Readiness {
///         Readiness::Ready
///     }
/// }
///
/// let mut registry = FeatureRegistry::new();
/// registry.register("audio", || Audio).expect("first registration");
/// assert!(registry.register("audio", || Audio).is_err());
/// ```
#[derive(Default)]
pub struct FeatureRegistry {
    entries: Vec<FeatureEntry>,
}

impl FeatureRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feature factory, run once by [`FeatureHost::start`].
    ///
    /// # Errors
    /// [`Error::FeatureAlreadyRegistered`] if `name` is taken.
    pub fn register<F, M>(&mut self, name: impl Into<String>, make: M) -> Result<()>
    where
        F: Feature + 'static,
        M: Fn() -> F + Send + Sync + 'static,
    {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::FeatureAlreadyRegistered(name));
        }
        let factory: Factory = Box::new(move || {
            let feature = Arc::new(make());
            let receiver: ReceiverRef = feature.clone();
            (feature as Arc<dyn Feature>, receiver)
        });
        self.entries.push(FeatureEntry { name, factory });
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub(crate) fn into_entries(self) -> Vec<FeatureEntry> {
        self.entries
    }
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
