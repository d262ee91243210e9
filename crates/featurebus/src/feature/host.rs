// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Feature host: owns the features and gates `StartGame` on their readiness.

use super::{Feature, FeatureContext, FeatureInitialised, FeatureRegistry, Readiness, StartGame};
use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::message::Envelope;
use crate::receiver::{Receiver, ReceiverRef};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

struct Slot {
    name: String,
    feature: Arc<dyn Feature>,
    receiver: ReceiverRef,
}

#[derive(Default)]
struct HostState {
    slots: Vec<Slot>,
    /// Features that have not reported ready yet.
    pending: HashSet<String>,
    started: bool,
}

impl HostState {
    /// Marks the host started when nothing is pending; `true` exactly once.
    fn take_start(&mut self) -> bool {
        if self.started || !self.pending.is_empty() {
            return false;
        }
        self.started = true;
        true
    }
}

struct HostInner {
    state: Mutex<HostState>,
    me: Weak<HostInner>,
}

impl HostInner {
    fn as_receiver(&self) -> Option<ReceiverRef> {
        self.me.upgrade().map(|inner| inner as ReceiverRef)
    }

    fn launch(&self, bus: &Bus) {
        if let Some(me) = self.as_receiver() {
            bus.unsubscribe::<FeatureInitialised>(&me);
        }
        let cleared = bus.clear_pool::<FeatureInitialised>();
        log::debug!(
            "[FEATURE] all features ready, sending StartGame (cleared {} pooled)",
            cleared
        );
        bus.send(bus.acquire::<StartGame>());
    }

    fn mark_ready(&self, bus: &Bus, name: &str) {
        let launch = {
            let mut state = self.state.lock();
            if !state.pending.remove(name) {
                log::debug!("[FEATURE] ignoring ready from '{}' (unknown or repeated)", name);
                return;
            }
            log::debug!(
                "[FEATURE] '{}' ready, {} still pending",
                name,
                state.pending.len()
            );
            state.take_start()
        };
        if launch {
            self.launch(bus);
        }
    }
}

impl Receiver for HostInner {
    fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
        if let Some(msg) = envelope.downcast_ref::<FeatureInitialised>() {
            self.mark_ready(bus, &msg.feature);
        }
        if let Err(e) = bus.receiver_done(envelope.letter()) {
            log::warn!("[FEATURE] host receiver_done failed: {}", e);
        }
    }

    fn name(&self) -> &str {
        "feature-host"
    }
}

/// Owns a set of running features.
///
/// # Examples
///
/// ```
/// use featurebus::{
///     Bus, CallbackReceiver, Envelope, Feature, FeatureContext, FeatureHost, FeatureRegistry,
///     Readiness, Receiver, ReceiverRef, StartGame,
/// };
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// struct Physics;
///
/// impl Receiver for Physics {
///     fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
///         let _ = bus.receiver_done(envelope.letter());
///     }
/// }
///
/// impl Feature for Physics {
///     fn init(&self, _ctx: &FeatureContext<'_>) -> Readiness {
///         Readiness::Ready
///     }
/// }
///
/// let bus = Bus::new();
/// let started = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&started);
/// let watcher: ReceiverRef = Arc::new(CallbackReceiver::new("watcher", move |bus, envelope| {
///     flag.store(true, Ordering::SeqCst);
///     let _ = bus.receiver_done(envelope.letter());
/// }));
/// bus.subscribe::<StartGame>(&watcher);
///
/// let mut registry = FeatureRegistry::new();
/// registry.register("physics", || Physics).unwrap();
/// let host = FeatureHost::start(&bus, registry).unwrap();
///
/// assert!(host.is_started());
/// assert!(started.load(Ordering::SeqCst));
/// host.shutdown(&bus);
/// ```
pub struct FeatureHost {
    inner: Arc<HostInner>,
}

impl FeatureHost {
    /// Instantiate and initialise every registered feature.
    ///
    /// `StartGame` is sent once every feature reported ready, immediately
    /// when the registry is empty.
    ///
    /// # Errors
    /// [`Error::DispatchActive`] when called from inside a receiver. Readiness
    /// messages would stay queued behind the current delivery, so the host
    /// must be started while the bus is idle.
    pub fn start(bus: &Bus, registry: FeatureRegistry) -> Result<Self> {
        if bus.is_dispatching() {
            log::warn!("[FEATURE] start rejected: bus is dispatching");
            return Err(Error::DispatchActive);
        }

        let inner = Arc::new_cyclic(|me| HostInner {
            state: Mutex::new(HostState::default()),
            me: me.clone(),
        });
        let host_ref: ReceiverRef = inner.clone();
        bus.subscribe::<FeatureInitialised>(&host_ref);

        let mut instances = Vec::new();
        {
            let mut state = inner.state.lock();
            for entry in registry.into_entries() {
                let (feature, receiver) = entry.instantiate();
                state.pending.insert(entry.name.clone());
                state.slots.push(Slot {
                    name: entry.name.clone(),
                    feature: Arc::clone(&feature),
                    receiver: Arc::clone(&receiver),
                });
                instances.push((entry.name, feature, receiver));
            }
        }
        log::debug!("[FEATURE] starting {} features", instances.len());

        for (name, feature, receiver) in &instances {
            let ctx = FeatureContext::new(bus, name, receiver);
            match feature.init(&ctx) {
                Readiness::Ready => ctx.ready_signal().fire(bus),
                Readiness::Deferred => {
                    log::debug!("[FEATURE] '{}' deferred readiness", name);
                }
            }
        }

        let launch = inner.state.lock().take_start();
        if launch {
            inner.launch(bus);
        }

        Ok(Self { inner })
    }

    /// Run `cleanup` for one feature and drop it.
    ///
    /// A feature removed before reporting ready no longer holds back
    /// `StartGame`.
    ///
    /// # Errors
    /// [`Error::FeatureNotFound`] if no running feature has that name.
    pub fn remove_feature(&self, bus: &Bus, name: &str) -> Result<()> {
        let (slot, launch) = {
            let mut state = self.inner.state.lock();
            let index = state
                .slots
                .iter()
                .position(|slot| slot.name == name)
                .ok_or_else(|| Error::FeatureNotFound(name.to_string()))?;
            let slot = state.slots.remove(index);
            state.pending.remove(name);
            (slot, state.take_start())
        };

        log::debug!("[FEATURE] removing '{}'", slot.name);
        slot.feature
            .cleanup(&FeatureContext::new(bus, &slot.name, &slot.receiver));

        if launch {
            self.inner.launch(bus);
        }
        Ok(())
    }

    /// Clean up every remaining feature in registration order.
    pub fn shutdown(self, bus: &Bus) {
        let slots = {
            let mut state = self.inner.state.lock();
            state.pending.clear();
            std::mem::take(&mut state.slots)
        };
        let host_ref: ReceiverRef = self.inner.clone();
        bus.unsubscribe_all(&host_ref);

        log::debug!("[FEATURE] shutting down {} features", slots.len());
        for slot in &slots {
            slot.feature
                .cleanup(&FeatureContext::new(bus, &slot.name, &slot.receiver));
        }
    }

    /// `true` once `StartGame` was sent.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    /// Names of running features, in registration order.
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// Features that have not reported ready yet.
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut names: Vec<String> = state.pending.iter().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.inner.state.lock().slots.len()
    }
}
