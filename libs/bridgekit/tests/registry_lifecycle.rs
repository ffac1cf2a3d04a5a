#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end tests for a full bridging session: registry construction,
//! schema export, the lifecycle bracket, call dispatch, batch fan-out, and
//! teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use bridgekit::{
    BatchListener, BridgeModule, MethodDef, MethodKind, ModuleRegistry, OwnerToken,
    RegistryBuilder, RegistryError,
};

type EventLog = Arc<Mutex<Vec<String>>>;

fn record(events: &EventLog, entry: impl Into<String>) {
    events.lock().unwrap().push(entry.into());
}

struct TimingModule {
    events: EventLog,
    timers_created: Arc<AtomicUsize>,
}

impl TimingModule {
    fn new(events: &EventLog) -> Self {
        Self {
            events: events.clone(),
            timers_created: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BridgeModule for TimingModule {
    fn name(&self) -> &'static str {
        "Timing"
    }

    fn methods(&self) -> Vec<MethodDef> {
        let created = self.timers_created.clone();
        let create_log = self.events.clone();
        let delete_log = self.events.clone();
        vec![
            MethodDef::from_fn("createTimer", MethodKind::Async, move |args| {
                created.fetch_add(1, Ordering::SeqCst);
                create_log
                    .lock()
                    .unwrap()
                    .push(format!("Timing.createTimer:{}", args[0]));
                Ok(())
            }),
            MethodDef::from_fn("deleteTimer", MethodKind::Async, move |args| {
                delete_log
                    .lock()
                    .unwrap()
                    .push(format!("Timing.deleteTimer:{}", args[0]));
                Ok(())
            }),
        ]
    }

    fn initialize(&self) -> anyhow::Result<()> {
        record(&self.events, "init:Timing");
        Ok(())
    }

    fn destroy(&self) -> anyhow::Result<()> {
        record(&self.events, "destroy:Timing");
        Ok(())
    }

    fn as_batch_listener(&self) -> Option<&dyn BatchListener> {
        Some(self)
    }
}

impl BatchListener for TimingModule {
    fn on_batch_complete(&self) {
        record(&self.events, "batch:Timing");
    }
}

struct NetworkModule {
    events: EventLog,
}

impl BridgeModule for NetworkModule {
    fn name(&self) -> &'static str {
        "Network"
    }

    fn methods(&self) -> Vec<MethodDef> {
        let send_log = self.events.clone();
        let abort_log = self.events.clone();
        vec![
            MethodDef::from_fn("sendRequest", MethodKind::Promise, move |args| {
                send_log
                    .lock()
                    .unwrap()
                    .push(format!("Network.sendRequest:{}", args[0]));
                Ok(())
            }),
            MethodDef::from_fn("abortRequest", MethodKind::Async, move |args| {
                abort_log
                    .lock()
                    .unwrap()
                    .push(format!("Network.abortRequest:{}", args[0]));
                Ok(())
            }),
        ]
    }

    fn initialize(&self) -> anyhow::Result<()> {
        record(&self.events, "init:Network");
        Ok(())
    }

    fn destroy(&self) -> anyhow::Result<()> {
        record(&self.events, "destroy:Network");
        Ok(())
    }
}

struct DeviceInfoModule;

impl BridgeModule for DeviceInfoModule {
    fn name(&self) -> &'static str {
        "DeviceInfo"
    }

    fn methods(&self) -> Vec<MethodDef> {
        Vec::new()
    }

    fn constants(&self) -> serde_json::Map<String, Value> {
        let mut constants = serde_json::Map::new();
        constants.insert("os".into(), json!("host"));
        constants.insert("apiLevel".into(), json!(42));
        constants
    }
}

fn build_session(events: &EventLog) -> (ModuleRegistry, OwnerToken) {
    let owner = OwnerToken::new();
    let mut builder = RegistryBuilder::new();
    builder.add(Arc::new(TimingModule::new(events))).unwrap();
    builder
        .add(Arc::new(NetworkModule {
            events: events.clone(),
        }))
        .unwrap();
    builder.add(Arc::new(DeviceInfoModule)).unwrap();
    (builder.build(&owner), owner)
}

#[test]
fn full_session_runs_phases_in_order() {
    let events = EventLog::default();
    let (registry, owner) = build_session(&events);

    registry.notify_initialized(&owner).unwrap();
    registry.call(0, 0, &[json!(17), json!(250)]).unwrap();
    registry.call(1, 0, &[json!("https://host/ping")]).unwrap();
    registry.on_batch_complete();
    registry.notify_destroyed(&owner).unwrap();

    assert_eq!(
        events.lock().unwrap().as_slice(),
        [
            "init:Timing",
            "init:Network",
            "Timing.createTimer:17",
            "Network.sendRequest:\"https://host/ping\"",
            "batch:Timing",
            "destroy:Timing",
            "destroy:Network",
        ]
    );
}

#[test]
fn exported_schema_drives_dispatch() {
    // The remote side only ever sees the exported document; every id in it
    // must route back to the right handler.
    let events = EventLog::default();
    let (registry, _owner) = build_session(&events);

    let mut raw = Vec::new();
    registry.write_module_descriptions(&mut raw).unwrap();
    let doc: Value = serde_json::from_slice(&raw).unwrap();

    let module_id = usize::try_from(doc["Network"]["moduleID"].as_u64().unwrap()).unwrap();
    let method_id = usize::try_from(
        doc["Network"]["methods"]["abortRequest"]["methodID"]
            .as_u64()
            .unwrap(),
    )
    .unwrap();
    registry.call(module_id, method_id, &[json!(4)]).unwrap();

    assert_eq!(events.lock().unwrap().as_slice(), ["Network.abortRequest:4"]);
    assert_eq!(doc["DeviceInfo"]["constants"]["apiLevel"], json!(42));
}

#[test]
fn override_keeps_id_and_swaps_implementation() {
    struct StubNetwork {
        events: EventLog,
    }
    impl BridgeModule for StubNetwork {
        fn name(&self) -> &'static str {
            "Network"
        }
        fn methods(&self) -> Vec<MethodDef> {
            let events = self.events.clone();
            vec![MethodDef::from_fn("sendRequest", MethodKind::Promise, move |_| {
                events.lock().unwrap().push("stub.sendRequest".into());
                Ok(())
            })]
        }
        fn can_override(&self) -> bool {
            true
        }
    }

    let events = EventLog::default();
    let owner = OwnerToken::new();
    let mut builder = RegistryBuilder::new();
    builder.add(Arc::new(TimingModule::new(&events))).unwrap();
    builder
        .add(Arc::new(NetworkModule {
            events: events.clone(),
        }))
        .unwrap();
    builder
        .add(Arc::new(StubNetwork {
            events: events.clone(),
        }))
        .unwrap();
    let registry = builder.build(&owner);

    // Same table shape as before the override.
    assert_eq!(registry.len(), 2);
    let mut raw = Vec::new();
    registry.write_module_descriptions(&mut raw).unwrap();
    let doc: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(doc["Network"]["moduleID"], json!(1));

    registry.call(1, 0, &[]).unwrap();
    assert_eq!(events.lock().unwrap().as_slice(), ["stub.sendRequest"]);

    // The stub won the type index for its own type; the replaced instance is gone.
    assert!(registry.try_get::<StubNetwork>().is_ok());
    assert!(matches!(
        registry.try_get::<NetworkModule>(),
        Err(RegistryError::AbsentModule { .. })
    ));
}

#[test]
fn lifecycle_requires_the_build_token() {
    let events = EventLog::default();
    let (registry, owner) = build_session(&events);
    let other = OwnerToken::new();

    assert!(matches!(
        registry.notify_initialized(&other),
        Err(RegistryError::NotOwnerContext { .. })
    ));
    assert!(events.lock().unwrap().is_empty());

    // The genuine token still works afterwards.
    registry.notify_initialized(&owner).unwrap();
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["init:Timing", "init:Network"]
    );
}

#[test]
fn failed_call_leaves_the_registry_usable() {
    struct Flaky {
        attempts: Arc<AtomicUsize>,
    }
    impl BridgeModule for Flaky {
        fn name(&self) -> &'static str {
            "Flaky"
        }
        fn methods(&self) -> Vec<MethodDef> {
            let attempts = self.attempts.clone();
            vec![MethodDef::from_fn("poke", MethodKind::Async, move |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    anyhow::bail!("transient");
                }
                Ok(())
            })]
        }
    }

    let owner = OwnerToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut builder = RegistryBuilder::new();
    builder
        .add(Arc::new(Flaky {
            attempts: attempts.clone(),
        }))
        .unwrap();
    let registry = builder.build(&owner);

    let err = registry.call(0, 0, &[]).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::MethodCall {
            module: "Flaky",
            method: "poke",
            ..
        }
    ));
    registry.call(0, 0, &[]).unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn dispatch_is_safe_from_many_threads() {
    struct Counter {
        hits: Arc<AtomicUsize>,
    }
    impl BridgeModule for Counter {
        fn name(&self) -> &'static str {
            "Counter"
        }
        fn methods(&self) -> Vec<MethodDef> {
            let hits = self.hits.clone();
            vec![MethodDef::from_fn("bump", MethodKind::Async, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })]
        }
    }

    let owner = OwnerToken::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut builder = RegistryBuilder::new();
    builder.add(Arc::new(Counter { hits: hits.clone() })).unwrap();
    let registry = Arc::new(builder.build(&owner));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    registry.call(0, 0, &[]).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    assert_eq!(hits.load(Ordering::SeqCst), 400);
}
