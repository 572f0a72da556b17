//! End-to-end runs of small models under the driver.

use std::sync::Arc;
use std::thread;
use turnstile_core::{
    ActionError, CoreError, Event, FailureKind, MachineId, MachineStatus, MachineType, Monitor,
    MonitorType,
};
use turnstile_runtime::{Config, Driver, Runtime, StopReason};

fn config(liveness_threshold: u64, max_steps: u64) -> Config {
    let mut config = Config::default();
    config.testing.liveness_threshold = liveness_threshold;
    config.testing.max_steps = max_steps;
    config
}

fn sender_of(event: Option<&Event>) -> Result<MachineId, ActionError> {
    let payload = event
        .and_then(Event::payload)
        .cloned()
        .unwrap_or_default();
    serde_json::from_value(payload).map_err(ActionError::failed)
}

/// Replies to every request, then halts when told to.
fn responder_type() -> Result<MachineType<u32>, CoreError> {
    MachineType::<u32>::builder("Responder")
        .state("Serving", |s| {
            s.start().on_event_do("Request", |ctx| {
                *ctx.data_mut() += 1;
                let client = sender_of(ctx.event())?;
                ctx.send(&client, Event::new("Response"))
            })
        })
        .build()
}

/// Issues `rounds` requests, one at a time, and reports them to the
/// `Pending` monitor.
fn requester_type(rounds: u32) -> Result<MachineType<u32>, CoreError> {
    MachineType::<u32>::builder("Requester")
        .state("Init", |s| s.start().on_event_goto("Start", "Asking"))
        .state("Asking", |s| {
            s.on_entry(|ctx| {
                let me = serde_json::to_value(ctx.id()).map_err(ActionError::failed)?;
                let server = sender_of(ctx.event())?;
                ctx.monitor("Pending", Event::new("Request"))?;
                ctx.send(&server, Event::with_payload("Request", me))
            })
            .on_event_do("Response", move |ctx| {
                *ctx.data_mut() += 1;
                ctx.monitor("Pending", Event::new("Response"))?;
                if *ctx.data() >= rounds {
                    ctx.raise(Event::halt())
                } else {
                    Ok(())
                }
            })
        })
        .build()
}

fn pending_type() -> Result<MonitorType<()>, CoreError> {
    MonitorType::<()>::builder("Pending")
        .state("Quiet", |s| s.start().cold().on_event_goto("Request", "Outstanding"))
        .state("Outstanding", |s| s.hot().on_event_goto("Response", "Quiet"))
        .build()
}

#[test]
fn test_request_response_run_completes() {
    let runtime = Runtime::new(config(10, 1_000));
    runtime
        .register_machine_type("Responder", responder_type, || 0u32)
        .unwrap();
    runtime
        .register_machine_type("Requester", || requester_type(1), || 0u32)
        .unwrap();
    runtime.register_monitor("Pending", pending_type, ()).unwrap();

    let server = runtime.create_machine("Responder", None, None).unwrap();
    let client = runtime.create_machine("Requester", None, None).unwrap();
    let serve = serde_json::to_value(&server).unwrap();
    runtime
        .send(&client, Event::with_payload("Start", serve))
        .unwrap();

    let summary = Driver::new(&runtime).run();
    assert_eq!(summary.stop_reason, StopReason::Quiescent);
    assert!(!summary.found_bug());
    assert_eq!(summary.halted, vec![client.to_string()]);

    assert_eq!(
        runtime.with_machine_data(&server, |n: &u32| *n).unwrap(),
        Some(1)
    );
    let coverage = runtime.coverage();
    assert_eq!(coverage.get("Pending").unwrap().state_ratio(), 1.0);
    assert_eq!(coverage.get("Requester").unwrap().state_ratio(), 1.0);
}

#[test]
fn test_unanswered_request_is_a_liveness_bug() {
    let runtime = Runtime::new(config(3, 1_000));
    // A sink that never answers.
    runtime
        .register_machine_type(
            "Responder",
            || {
                MachineType::<u32>::builder("Responder")
                    .state("Deaf", |s| s.start().ignore(["Request"]))
                    .build()
            },
            || 0u32,
        )
        .unwrap();
    runtime
        .register_machine_type("Requester", || requester_type(1), || 0u32)
        .unwrap();
    // Keeps the driver busy so liveness is checked every step.
    runtime
        .register_machine_type(
            "Spinner",
            || {
                MachineType::<()>::builder("Spinner")
                    .state("Spin", |s| {
                        s.start().on_event_do("Spin", |ctx| {
                            let peer = sender_of(ctx.event())?;
                            let me = serde_json::to_value(ctx.id()).map_err(ActionError::failed)?;
                            ctx.send(&peer, Event::with_payload("Spin", me))
                        })
                    })
                    .build()
            },
            || (),
        )
        .unwrap();
    runtime.register_monitor("Pending", pending_type, ()).unwrap();

    let server = runtime.create_machine("Responder", None, None).unwrap();
    let client = runtime.create_machine("Requester", None, None).unwrap();
    let left = runtime.create_machine("Spinner", None, None).unwrap();
    let right = runtime.create_machine("Spinner", None, None).unwrap();
    runtime
        .send(
            &client,
            Event::with_payload("Start", serde_json::to_value(&server).unwrap()),
        )
        .unwrap();
    runtime
        .send(
            &left,
            Event::with_payload("Spin", serde_json::to_value(&right).unwrap()),
        )
        .unwrap();

    let summary = Driver::new(&runtime).run();
    assert_eq!(summary.stop_reason, StopReason::Bug);
    let bug = summary.bug.unwrap();
    assert_eq!(bug.kind, FailureKind::LivenessViolation);
    assert_eq!(bug.code, "LIVENESS_VIOLATION");

    let temperature = runtime
        .with_monitor("Pending", |m: &Monitor<()>| m.temperature())
        .unwrap();
    assert_eq!(temperature, 3);
}

#[test]
fn test_sends_to_halted_machine_are_dropped() {
    let runtime = Runtime::new(Config::default());
    runtime
        .register_machine_type("Responder", responder_type, || 0u32)
        .unwrap();
    let server = runtime.create_machine("Responder", None, None).unwrap();
    runtime.send(&server, Event::halt()).unwrap();
    Driver::new(&runtime).run();

    let actor = runtime.machine(&server).unwrap();
    assert_eq!(actor.status(), MachineStatus::Halted);

    runtime.send(&server, Event::new("Request")).unwrap();
    assert_eq!(actor.mailbox_len(), 0);
    let summary = Driver::new(&runtime).run();
    assert_eq!(summary.steps, 0);
    assert!(!summary.found_bug());
    assert_eq!(
        runtime.with_machine_data(&server, |n: &u32| *n).unwrap(),
        Some(0)
    );
}

#[test]
fn test_concurrent_senders_through_runtime() {
    let runtime = Arc::new(Runtime::new(Config::default()));
    runtime
        .register_machine_type(
            "Collector",
            || {
                MachineType::<Vec<u64>>::builder("Collector")
                    .state("Open", |s| {
                        s.start().on_event_do("Item", |ctx| {
                            let n = ctx.payload().and_then(|p| p.as_u64()).unwrap_or(0);
                            ctx.data_mut().push(n);
                            Ok(())
                        })
                    })
                    .build()
            },
            Vec::new,
        )
        .unwrap();
    let collector = runtime.create_machine("Collector", None, None).unwrap();

    let senders: Vec<_> = (0..4u64)
        .map(|t| {
            let runtime = Arc::clone(&runtime);
            let collector = collector.clone();
            thread::spawn(move || {
                for i in 0..25u64 {
                    runtime
                        .send(&collector, Event::with_payload("Item", (t * 100 + i).into()))
                        .unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    Driver::new(&runtime).run();
    let items = runtime
        .with_machine_data(&collector, |items: &Vec<u64>| items.clone())
        .unwrap()
        .unwrap();
    assert_eq!(items.len(), 100);

    // Per-sender FIFO holds; nothing is lost or duplicated.
    for t in 0..4u64 {
        let from_sender: Vec<u64> = items.iter().copied().filter(|n| n / 100 == t).collect();
        let expected: Vec<u64> = (0..25).map(|i| t * 100 + i).collect();
        assert_eq!(from_sender, expected);
    }
}

#[test]
fn test_initial_event_and_groups() {
    let runtime = Runtime::new(Config::default());
    runtime
        .register_machine_type(
            "Door",
            || {
                MachineType::<String>::builder("Door")
                    .state("Init", |s| {
                        s.start().on_entry(|ctx| {
                            let target = ctx
                                .payload()
                                .and_then(|p| p.as_str())
                                .unwrap_or("Closed.Locked")
                                .to_string();
                            ctx.goto(target)
                        })
                    })
                    .group("Closed", |g| {
                        g.state("Locked", |s| s.on_event_goto("Unlock", "Closed.Unlocked"))
                            .state("Unlocked", |s| {
                                s.on_entry(|ctx| {
                                    let state = ctx.state().to_string();
                                    *ctx.data_mut() = state;
                                    Ok(())
                                })
                            })
                    })
                    .build()
            },
            String::new,
        )
        .unwrap();

    let door = runtime
        .create_machine(
            "Door",
            Some("front"),
            Some(Event::with_payload("Open", "Closed.Locked".into())),
        )
        .unwrap();
    runtime.send(&door, Event::new("Unlock")).unwrap();
    Driver::new(&runtime).run();

    let actor = runtime.machine(&door).unwrap();
    assert_eq!(actor.active_state().as_deref(), Some("Closed.Unlocked"));
    assert_eq!(
        runtime.with_machine_data(&door, |s: &String| s.clone()).unwrap(),
        Some("Closed.Unlocked".to_string())
    );
}

#[test]
fn test_wrong_data_type_is_rejected() {
    let runtime = Runtime::new(Config::default());
    runtime
        .register_machine_type("Responder", responder_type, || 0u32)
        .unwrap();
    let server = runtime.create_machine("Responder", None, None).unwrap();

    let err = runtime
        .with_machine_data(&server, |s: &String| s.len())
        .unwrap_err();
    assert_eq!(err.error_code(), "DATA_TYPE_MISMATCH");
}
