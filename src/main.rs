//! turnstile - turn-based actor state-machine runtime
//!
//! Runs a built-in ping-pong model under the round-robin driver, with a
//! liveness monitor watching for unanswered pings, and prints the run
//! summary and coverage as JSON.

use serde_json::json;
use tracing_subscriber::EnvFilter;
use turnstile_core::{
    ActionError, ActionResult, CoreError, Event, MachineContext, MachineId, MachineType,
    MonitorType,
};
use turnstile_runtime::{Config, Driver, Runtime};

const ROUNDS: u32 = 5;

#[derive(Debug, Default)]
struct Client {
    server: Option<MachineId>,
    rounds: u32,
}

fn client_type() -> Result<MachineType<Client>, CoreError> {
    MachineType::<Client>::builder("Client")
        .state("Init", |s| {
            s.start().on_entry(|ctx| {
                let hello = Event::with_payload("Hello", id_payload(ctx.id())?);
                let server = ctx.create_machine("Server", Some("server"), Some(hello))?;
                ctx.data_mut().server = Some(server);
                ctx.goto("Playing")
            })
        })
        .state("Playing", |s| {
            s.on_entry(ping).on_event_do("Pong", |ctx| {
                ctx.data_mut().rounds += 1;
                ctx.monitor("Progress", Event::new("Pong"))?;
                if ctx.data().rounds >= ROUNDS {
                    ctx.goto("Done")
                } else {
                    ping(ctx)
                }
            })
        })
        .state("Done", |s| {
            s.on_entry(|ctx| {
                if let Some(server) = ctx.data().server.clone() {
                    ctx.send(&server, Event::halt())?;
                }
                ctx.raise(Event::halt())
            })
        })
        .build()
}

fn ping(ctx: &mut MachineContext<'_, Client>) -> ActionResult {
    let server = ctx
        .data()
        .server
        .clone()
        .ok_or_else(|| ActionError::failed("no server"))?;
    ctx.monitor("Progress", Event::new("Ping"))?;
    ctx.send(&server, Event::with_payload("Ping", id_payload(ctx.id())?))
}

fn server_type() -> Result<MachineType<Option<MachineId>>, CoreError> {
    MachineType::<Option<MachineId>>::builder("Server")
        .state("Serving", |s| {
            s.start()
                .on_entry(|ctx| {
                    let client = sender_of(ctx.event())?;
                    *ctx.data_mut() = Some(client);
                    Ok(())
                })
                .on_event_do("Ping", |ctx| {
                    let client = sender_of(ctx.event())?;
                    ctx.assert(
                        ctx.data().as_ref() == Some(&client),
                        format!("ping from unexpected {}", client),
                    )?;
                    ctx.send(&client, Event::new("Pong"))
                })
        })
        .build()
}

fn progress_type() -> Result<MonitorType<()>, CoreError> {
    MonitorType::<()>::builder("Progress")
        .state("Idle", |s| s.start().cold().on_event_goto("Ping", "Waiting"))
        .state("Waiting", |s| s.hot().on_event_goto("Pong", "Idle"))
        .build()
}

fn id_payload(id: &MachineId) -> Result<serde_json::Value, ActionError> {
    serde_json::to_value(id).map_err(ActionError::failed)
}

fn sender_of(event: Option<&Event>) -> Result<MachineId, ActionError> {
    let payload = event
        .and_then(Event::payload)
        .cloned()
        .ok_or_else(|| ActionError::failed("event carries no sender"))?;
    serde_json::from_value(payload).map_err(ActionError::failed)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (from file if TURNSTILE_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("TURNSTILE_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("TURNSTILE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting ping-pong run");
    tracing::info!("  Liveness threshold: {}", config.testing.liveness_threshold);
    tracing::info!("  Max steps: {}", config.testing.max_steps);

    let runtime = Runtime::new(config);
    runtime.register_machine_type("Client", client_type, Client::default)?;
    runtime.register_machine_type("Server", server_type, || None)?;
    runtime.register_monitor("Progress", progress_type, ())?;
    runtime.create_machine("Client", Some("client"), None)?;

    let summary = Driver::new(&runtime).run();
    let output = json!({
        "summary": summary,
        "coverage": runtime.coverage(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(bug) = &summary.bug {
        tracing::error!("{}: {}", bug.code, bug.message);
        std::process::exit(1);
    }
    Ok(())
}
