// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Example code readability over pedantic

//! Feature Host Example
//!
//! Demonstrates:
//! - Declaring message types and features
//! - Registering features explicitly and starting them
//! - One feature deferring readiness until a background thread finishes loading
//! - Sending a payload with a callback once `StartGame` arrives
//!
//! Run with `RUST_LOG=debug cargo run --example feature_demo` to see the
//! bus lifecycle logs.

use featurebus::{
    Bus, BusConfig, Envelope, Feature, FeatureContext, FeatureHost, FeatureRegistry, Message,
    Readiness, ReadySignal, Receiver, StartGame,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct TestMessage {
    text: String,
    number: i32,
    callback: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Message for TestMessage {
    fn on_recycle(&mut self) {
        self.text.clear();
        self.number = 0;
        self.callback = None;
    }
}

struct Greeter;

impl Receiver for Greeter {
    fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
        if envelope.is::<StartGame>() {
            println!("[greeter] start game");
            bus.send_new::<TestMessage, _>(|msg| {
                msg.text = "This is test message".to_string();
                msg.number = 12;
                msg.callback = Some(Box::new(|| println!("[greeter] called from callback")));
            });
        }
        let _ = bus.receiver_done(envelope.letter());
    }

    fn name(&self) -> &str {
        "greeter"
    }
}

impl Feature for Greeter {
    fn init(&self, ctx: &FeatureContext<'_>) -> Readiness {
        println!("[greeter] init");
        ctx.subscribe::<StartGame>();
        Readiness::Ready
    }

    fn cleanup(&self, ctx: &FeatureContext<'_>) {
        ctx.unsubscribe_all();
        println!("[greeter] cleanup");
    }
}

struct Printer;

impl Receiver for Printer {
    fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
        if let Some(msg) = envelope.downcast_ref::<TestMessage>() {
            println!("[printer] received '{}' number {}", msg.text, msg.number);
            if let Some(callback) = &msg.callback {
                callback();
            }
        }
        let _ = bus.receiver_done(envelope.letter());
    }

    fn name(&self) -> &str {
        "printer"
    }
}

impl Feature for Printer {
    fn init(&self, ctx: &FeatureContext<'_>) -> Readiness {
        println!("[printer] init");
        ctx.subscribe::<TestMessage>();
        Readiness::Ready
    }
}

/// Reports ready once `main` finishes "loading" assets.
struct Assets {
    pending: Arc<Mutex<Option<ReadySignal>>>,
}

impl Receiver for Assets {
    fn on_message(&self, bus: &Bus, envelope: &Envelope<'_>) {
        let _ = bus.receiver_done(envelope.letter());
    }

    fn name(&self) -> &str {
        "assets"
    }
}

impl Feature for Assets {
    fn init(&self, ctx: &FeatureContext<'_>) -> Readiness {
        println!("[assets] loading...");
        *self.pending.lock() = Some(ctx.ready_signal());
        Readiness::Deferred
    }
}

fn main() -> featurebus::Result<()> {
    env_logger::init();

    let config = BusConfig::from_env()?;
    let bus = Bus::with_config(config)?;
    let assets_ready = Arc::new(Mutex::new(None));

    let mut registry = FeatureRegistry::new();
    registry.register("greeter", || Greeter)?;
    registry.register("printer", || Printer)?;
    let slot = Arc::clone(&assets_ready);
    registry.register("assets", move || Assets {
        pending: Arc::clone(&slot),
    })?;

    let host = FeatureHost::start(&bus, registry)?;
    println!("started: {} pending: {:?}", host.is_started(), host.pending());

    std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(50));
            println!("[assets] loaded");
            if let Some(signal) = assets_ready.lock().take() {
                signal.fire(&bus);
            }
        });
    });
    println!("started: {}", host.is_started());

    let snap = bus.metrics();
    println!(
        "sent={} delivered={} recycled={} in_flight={}",
        snap.messages_sent,
        snap.deliveries,
        snap.messages_recycled,
        bus.in_flight_count()
    );

    host.remove_feature(&bus, "assets")?;
    host.shutdown(&bus);
    Ok(())
}
