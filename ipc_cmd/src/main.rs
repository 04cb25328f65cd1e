//! # ipc_cmd
//!
//! Demonstration of a full action round trip over shared memory: a server
//! endpoint handling a `set_zoom` action and a client endpoint submitting
//! it twice, once answered with a response and once with an error.
//!
//! Run with `RUST_LOG=info` to watch the exchange.

use actions::{
    register_contract, ActionClient, ActionContract, ActionError, ActionResult, ActionServer,
};
use ipc::TypeRegistry;
use serde::{Deserialize, Serialize};
use shm_transport::{Endpoint, Role};
use std::env;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZoomParams {
    foo: i32,
    bar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZoomResponse {
    baz: bool,
    bat: f64,
}

struct SetZoom;

impl ActionContract for SetZoom {
    const NAME: &'static str = "camera::set_zoom";
    type Params = ZoomParams;
    type Response = ZoomResponse;
}

fn main() {
    env_logger::init();

    let name = parse_args(&env::args().collect::<Vec<_>>()).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("Usage: ipc_cmd [--name <channel-name>]");
        process::exit(1);
    });

    if let Err(e) = run(&name) {
        eprintln!("ipc_cmd failed: {}", e);
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<String, String> {
    let mut name = format!("ipc-cmd-{}", process::id());
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--name" | "-n" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --name".to_string());
                }
                name = args[i].clone();
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 1;
    }
    Ok(name)
}

fn run(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let registry = TypeRegistry::new();
    register_contract::<SetZoom>(&registry)?;
    let registry = Arc::new(registry);

    let server = Endpoint::new(Role::Server, name, registry.clone())?;
    let action_server = ActionServer::new(&server, 2)?;

    // Alternate between a successful zoom and a rejected one.
    let calls = AtomicUsize::new(0);
    action_server.register_action::<SetZoom, _>(move |params, id| {
        log::info!("handling set_zoom foo={} bar={} (id {})", params.foo, params.bar, id);
        if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            Ok(ZoomResponse {
                baz: true,
                bat: 453.12,
            })
        } else {
            Err(ActionError::new("YOLO", 0))
        }
    })?;

    let client = Endpoint::new(Role::Client, name, registry)?;
    let action_client = ActionClient::<SetZoom>::new(&client)?;

    let (tx, rx) = mpsc::channel();

    for (foo, bar) in [(123, "banana"), (666, "pineapple")] {
        let tx = tx.clone();
        let id = action_client.submit(
            ZoomParams {
                foo,
                bar: bar.into(),
            },
            move |outcome: ActionResult<SetZoom>, id: &str| {
                match &outcome {
                    Ok(response) => {
                        log::info!("set_zoom {} succeeded: baz={} bat={}", id, response.baz, response.bat)
                    }
                    Err(error) => {
                        log::info!("set_zoom {} failed: {} (code {})", id, error.message, error.code)
                    }
                }
                let _ = tx.send(());
            },
        )?;
        log::info!("submitted set_zoom foo={} as {}", foo, id);
    }

    for _ in 0..2 {
        rx.recv_timeout(Duration::from_secs(5))?;
    }

    // Nothing should be left waiting.
    assert_eq!(action_client.pending_count(), 0);
    log::info!("all replies received, shutting down");

    drop(action_client);
    drop(client);
    drop(server);
    Ok(())
}
