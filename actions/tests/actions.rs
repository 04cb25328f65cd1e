//! End-to-end action round trips over a real shared-memory channel.
//!
//! Every test uses a unique resource name so the suite can run in parallel.

use actions::{
    register_contract, ActionClient, ActionContract, ActionError, ActionResult, ActionServer,
    ResponseData,
};
use ipc::{IpcError, TypeRegistry};
use serde::{Deserialize, Serialize};
use shm_transport::{Endpoint, Role};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ZoomParams {
    foo: i32,
    bar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SeqParams {
    seq: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SeqResponse {
    seq: u32,
}

struct EchoSeq;

impl ActionContract for EchoSeq {
    const NAME: &'static str = "test::echo_seq";
    type Params = SeqParams;
    type Response = SeqResponse;
}

fn unique_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "act-{tag}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn test_registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::new();
    register_contract::<SetZoom>(&registry).unwrap();
    register_contract::<EchoSeq>(&registry).unwrap();
    Arc::new(registry)
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_alternating_success_and_error_replies() {
    let name = unique_name("alt");
    let registry = test_registry();
    let server = Endpoint::new(Role::Server, &name, registry.clone()).unwrap();
    let client = Endpoint::new(Role::Client, &name, registry).unwrap();

    let action_server = ActionServer::new(&server, 2).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_handler = calls.clone();
    action_server
        .register_action::<SetZoom, _>(move |params, _id| {
            if calls_in_handler.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                assert_eq!(params.foo, 123);
                assert_eq!(params.bar, "banana");
                Ok(ZoomResponse {
                    baz: true,
                    bat: 453.12,
                })
            } else {
                assert_eq!(params.foo, 666);
                assert_eq!(params.bar, "pineapple");
                Err(ActionError::new("YOLO", 0))
            }
        })
        .unwrap();

    let action_client = ActionClient::<SetZoom>::new(&client).unwrap();

    let (first_tx, first_rx) = mpsc::channel();
    let first_id = action_client
        .submit(
            ZoomParams {
                foo: 123,
                bar: "banana".into(),
            },
            move |outcome: ActionResult<SetZoom>, id: &str| {
                first_tx.send((outcome, id.to_string())).unwrap();
            },
        )
        .unwrap();

    let (first_outcome, first_reply_id) = first_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(first_reply_id, first_id);
    let response = first_outcome.expect("first call succeeds");
    assert!(response.baz);
    assert_eq!(response.bat, 453.12);

    let (second_tx, second_rx) = mpsc::channel();
    let second_id = action_client
        .submit(
            ZoomParams {
                foo: 666,
                bar: "pineapple".into(),
            },
            move |outcome: ActionResult<SetZoom>, id: &str| {
                second_tx.send((outcome, id.to_string())).unwrap();
            },
        )
        .unwrap();
    assert_ne!(second_id, first_id);

    let (second_outcome, second_reply_id) = second_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(second_reply_id, second_id);
    let error = second_outcome.expect_err("second call fails");
    assert_eq!(error.message, "YOLO");
    assert_eq!(error.code, 0);

    assert_eq!(action_client.pending_count(), 0);
}

#[test]
fn test_replies_correlate_to_their_requests() {
    let name = unique_name("corr");
    let registry = test_registry();
    let server = Endpoint::new(Role::Server, &name, registry.clone()).unwrap();
    let client = Endpoint::new(Role::Client, &name, registry).unwrap();

    let action_server = ActionServer::new(&server, 4).unwrap();
    action_server
        .register_action::<EchoSeq, _>(|params, _id| Ok(SeqResponse { seq: params.seq }))
        .unwrap();

    let action_client = ActionClient::<EchoSeq>::new(&client).unwrap();

    let (tx, rx) = mpsc::channel();
    let mut ids = std::collections::HashSet::new();
    for seq in 0..16u32 {
        let tx = tx.clone();
        let id = action_client
            .submit(SeqParams { seq }, move |outcome: ActionResult<EchoSeq>, _| {
                tx.send((seq, outcome)).unwrap();
            })
            .unwrap();
        assert!(ids.insert(id), "correlation id reused");
    }
    drop(tx);

    // Replies may arrive in any order; each must carry its own seq back.
    for _ in 0..16 {
        let (seq, outcome) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(outcome.unwrap().seq, seq);
    }
    assert_eq!(action_client.pending_count(), 0);
}

#[test]
fn test_unmatched_reply_reaches_exception_handler() {
    let name = unique_name("orphan");
    let registry = test_registry();
    let server = Endpoint::new(Role::Server, &name, registry.clone()).unwrap();
    let client = Endpoint::new(Role::Client, &name, registry).unwrap();

    let (tx, rx) = mpsc::channel();
    client.register_exception_handler(move |err: &IpcError| {
        if let IpcError::BadActionId(id) = err {
            tx.send(id.clone()).unwrap();
        }
    });

    let _action_client = ActionClient::<SetZoom>::new(&client).unwrap();

    let reply = ResponseData::<SetZoom>::success(
        "feedfacefeedfacefeedfacefeedface".into(),
        &ZoomResponse {
            baz: false,
            bat: 0.0,
        },
    )
    .unwrap();
    server.send(&reply).unwrap();

    let orphan_id = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(orphan_id, "feedfacefeedfacefeedfacefeedface");
}

#[test]
fn test_server_drop_removes_resource_while_action_server_alive() {
    let name = unique_name("teardown");
    let registry = test_registry();
    let server = Endpoint::new(Role::Server, &name, registry).unwrap();

    // The action server keeps an endpoint handle past the endpoint's death.
    let action_server = ActionServer::new(&server, 1).unwrap();
    action_server
        .register_action::<EchoSeq, _>(|params, _id| Ok(SeqResponse { seq: params.seq }))
        .unwrap();

    let shm_path = format!("/dev/shm/{name}");
    assert!(std::path::Path::new(&shm_path).exists());

    drop(server);
    assert!(
        !std::path::Path::new(&shm_path).exists(),
        "server drop must remove the OS resource even while an ActionServer handle is alive"
    );
    drop(action_server);
}

#[test]
fn test_expire_stale_completes_with_timeout_error() {
    let name = unique_name("stale");
    let registry = test_registry();
    let server = Endpoint::new(Role::Server, &name, registry.clone()).unwrap();
    let client = Endpoint::new(Role::Client, &name, registry).unwrap();

    // No action handler is registered, so the request is never answered;
    // swallow the unrouted-message report on the server side.
    server.register_exception_handler(|_err: &IpcError| {});

    let action_client = ActionClient::<SetZoom>::new(&client).unwrap();

    let (tx, rx) = mpsc::channel();
    action_client
        .submit(
            ZoomParams {
                foo: 1,
                bar: "tele".into(),
            },
            move |outcome: ActionResult<SetZoom>, id: &str| {
                tx.send((outcome, id.to_string())).unwrap();
            },
        )
        .unwrap();
    assert_eq!(action_client.pending_count(), 1);

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(action_client.expire_stale(Duration::from_millis(10)), 1);
    assert_eq!(action_client.pending_count(), 0);

    let (outcome, _id) = rx.recv_timeout(WAIT).unwrap();
    let error = outcome.expect_err("expired request reports an error");
    assert_eq!(error.code, ActionError::TIMEOUT_CODE);

    // A fresh sweep finds nothing.
    assert_eq!(action_client.expire_stale(Duration::from_millis(10)), 0);
}
