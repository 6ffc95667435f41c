//! Integration test: boots the controller's node listener on an ephemeral
//! port and connects real [`NodeClient`]s.
//!
//! Covered:
//! - registration makes node commands routable and the server GREEN
//! - alias fan-out across two nodes aggregates to 2/2
//! - a node event runs its action on another node
//! - a disconnected node is neutral inside an alias and unknown when strict
//! - a slow node times out while the next queued command still completes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lu_controller::nodes::session;
use lu_controller::responder::Responder;
use lu_controller::server::Server;
use lu_domain::config::{ActionSpec, Config, ReconnectConfig};
use lu_node_sdk::{CommandError, CommandRegistry, Message, NodeClientBuilder, State};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Harness ─────────────────────────────────────────────────────────────

struct Controller {
    server: Arc<Server>,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

async fn start_controller(config: Config) -> Controller {
    let config = Arc::new(config);
    let responder = Arc::new(Responder::new(&config.responder));
    let server = Arc::new(Server::with_token(config, responder, None).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    server.spawn_status_watcher(shutdown.child_token());
    tokio::spawn(session::serve(server.clone(), listener, shutdown.clone()));
    Controller {
        server,
        addr,
        shutdown,
    }
}

fn rules() -> Config {
    let mut config = Config::default();
    config.server.nodes = vec!["lamp".into(), "tv".into()];
    config
        .responder
        .groups
        .insert("all_on".into(), vec!["lamp/on".into(), "tv/on".into()]);
    config
        .responder
        .actions
        .insert("lamp/pressed".into(), ActionSpec::Single("tv/on{$1}".into()));
    config
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay_ms: 10,
        max_delay_secs: 1,
        factor: 1.5,
        jitter: 0.0,
        max_retries: None,
    }
}

/// Start a node whose `on` command reports its args on the returned channel.
fn start_node(
    addr: SocketAddr,
    name: &str,
    shutdown: CancellationToken,
) -> (lu_node_sdk::NodeHandle, mpsc::UnboundedReceiver<Vec<Value>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut reg = CommandRegistry::new();
    reg.register_fn("on", move |_ctx, args| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(args);
            Ok(json!("on"))
        }
    });
    reg.register_fn("slow", |_ctx, _args| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(json!("late"))
    });
    reg.declare_event("pressed");

    let client = NodeClientBuilder::new()
        .server(addr.to_string())
        .name(name)
        .module("controller-loop-test")
        .reconnect(fast_reconnect())
        .build()
        .unwrap();
    let handle = client.handle();
    client.spawn(reg, shutdown);
    (handle, rx)
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn run(server: &Server, text: &str, strict: bool) -> Result<Value, CommandError> {
    let command = Message::parse(lu_protocol::MessageKind::Command, text).unwrap();
    server.run_command(&command, strict).await
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn alias_fans_out_to_two_nodes() {
    let controller = start_controller(rules()).await;
    let server = controller.server.clone();
    let nodes = CancellationToken::new();
    let (lamp, mut lamp_rx) = start_node(controller.addr, "lamp", nodes.child_token());
    let (_tv, mut tv_rx) = start_node(controller.addr, "tv", nodes.child_token());
    lamp.set_status(State::Green, Some("Ready"));

    wait_until("both nodes", || server.nodes().connected() == 2).await;
    assert_eq!(server.status().0, State::Green);

    let outcome = run(&server, "all_on", true).await.unwrap();
    assert_eq!(outcome["succeeded"], json!(2));
    assert_eq!(outcome["total"], json!(2));
    assert_eq!(outcome["results"], json!(["on", "on"]));
    assert_eq!(lamp_rx.recv().await, Some(vec![]));
    assert_eq!(tv_rx.recv().await, Some(vec![]));

    nodes.cancel();
    controller.shutdown.cancel();
}

#[tokio::test]
async fn node_event_drives_a_command_on_another_node() {
    let controller = start_controller(rules()).await;
    let server = controller.server.clone();
    let nodes = CancellationToken::new();
    let (lamp, _lamp_rx) = start_node(controller.addr, "lamp", nodes.child_token());
    let (_tv, mut tv_rx) = start_node(controller.addr, "tv", nodes.child_token());
    wait_until("both nodes", || server.nodes().connected() == 2).await;

    lamp.send_event("pressed", vec![json!("hdmi2")]);
    let args = tokio::time::timeout(Duration::from_secs(5), tv_rx.recv())
        .await
        .unwrap();
    assert_eq!(args, Some(vec![json!("hdmi2")]));

    nodes.cancel();
    controller.shutdown.cancel();
}

#[tokio::test]
async fn disconnected_node_is_neutral_in_aliases() {
    let controller = start_controller(rules()).await;
    let server = controller.server.clone();
    let lamp_shutdown = CancellationToken::new();
    let tv_shutdown = CancellationToken::new();
    let (_lamp, _lamp_rx) = start_node(controller.addr, "lamp", lamp_shutdown.clone());
    let (_tv, _tv_rx) = start_node(controller.addr, "tv", tv_shutdown.clone());
    wait_until("both nodes", || server.nodes().connected() == 2).await;

    tv_shutdown.cancel();
    wait_until("tv gone", || server.nodes().connected() == 1).await;
    wait_until("tv commands removed", || server.command_target("tv/on").is_none()).await;

    let outcome = run(&server, "all_on", true).await.unwrap();
    assert_eq!(outcome["succeeded"], json!(2));
    assert_eq!(outcome["results"], json!(["on", null]));
    assert_eq!(
        run(&server, "tv/on", true).await,
        Err(CommandError::UnknownCommand("tv/on".into()))
    );

    // still listed, now OFF
    let tv = server
        .nodes()
        .list()
        .into_iter()
        .find(|n| n.name == "tv")
        .unwrap();
    assert!(!tv.connected);
    assert_eq!(tv.status, State::Off);

    lamp_shutdown.cancel();
    controller.shutdown.cancel();
}

#[tokio::test]
async fn timeout_frees_the_slot_for_the_next_command() {
    let mut config = rules();
    config.session.command_timeout_secs = 1;
    let controller = start_controller(config).await;
    let server = controller.server.clone();
    let nodes = CancellationToken::new();
    let (_lamp, mut lamp_rx) = start_node(controller.addr, "lamp", nodes.child_token());
    wait_until("lamp", || server.nodes().connected() == 1).await;

    let (slow, fast) = tokio::join!(
        run(&server, "lamp/slow", true),
        run(&server, "lamp/on{1}", true)
    );
    assert_eq!(slow, Err(CommandError::Timeout));
    assert_eq!(fast, Ok(json!("on")));
    assert_eq!(lamp_rx.recv().await, Some(vec![json!("1")]));

    nodes.cancel();
    controller.shutdown.cancel();
}
