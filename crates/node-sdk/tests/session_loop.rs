//! Integration test: boots an in-process TCP server that plays the
//! controller side of the session protocol, connects a real [`NodeClient`],
//! and walks the registration + command/event cycle.
//!
//! Covered:
//! - `register` is the first command and carries qualified names
//! - status report and queued events follow a successful registration
//! - controller commands dispatch to handlers and always get a reply
//! - unknown commands, `_info` and panicking handlers
//! - node-to-controller commands complete with the controller's reply
//! - a rejected registration closes the connection and is retried
//! - garbage from the controller is skipped, not fatal

use std::net::SocketAddr;
use std::time::Duration;

use lu_domain::config::ReconnectConfig;
use lu_node_sdk::{
    CommandContext, CommandError, CommandRegistry, CommandResult, Message, NodeClientBuilder,
    NodeCommand, State,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ── Test commands ───────────────────────────────────────────────────────

struct Echo;

#[async_trait::async_trait]
impl NodeCommand for Echo {
    async fn call(&self, _ctx: CommandContext, args: Vec<Value>) -> CommandResult {
        Ok(Value::Array(args))
    }
}

struct Panics;

#[async_trait::async_trait]
impl NodeCommand for Panics {
    async fn call(&self, _ctx: CommandContext, _args: Vec<Value>) -> CommandResult {
        panic!("intentional panic for testing catch_unwind");
    }
}

// ── Mini controller ─────────────────────────────────────────────────────

struct ControllerConn {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    next_id: u64,
}

impl ControllerConn {
    /// Next non-keepalive message from the node.
    async fn recv(&mut self) -> Message {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let line = tokio::time::timeout_at(deadline, self.lines.next_line())
                .await
                .expect("timeout waiting for node")
                .expect("read error")
                .expect("node closed the connection");
            if line.is_empty() {
                continue;
            }
            return Message::from_wire(&line).expect("node sent malformed line");
        }
    }

    /// `true` once the node closes its side.
    async fn closed(&mut self) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, self.lines.next_line()).await {
                Ok(Ok(None)) | Ok(Err(_)) => return true,
                Ok(Ok(Some(_))) => continue,
                Err(_) => return false,
            }
        }
    }

    async fn send(&mut self, msg: &Message) {
        let mut line = msg.to_wire();
        line.push('\n');
        self.write.write_all(line.as_bytes()).await.unwrap();
    }

    async fn reply(&mut self, request: &Message, outcome: CommandResult) {
        let reply = request.reply(&outcome).unwrap();
        self.send(&reply).await;
    }

    /// Send a command and wait for its reply, answering nothing else.
    async fn call(&mut self, name: &str, args: Vec<Value>) -> Message {
        self.next_id += 1;
        let mut cmd = Message::command(name, args);
        cmd.request_id = Some(self.next_id);
        self.send(&cmd).await;
        loop {
            let msg = self.recv().await;
            if msg.response.is_some() && msg.request_id == cmd.request_id {
                return msg;
            }
        }
    }
}

async fn start_mini_controller() -> (SocketAddr, tokio::sync::mpsc::Receiver<ControllerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let (read, write) = stream.into_split();
            let conn = ControllerConn {
                lines: BufReader::new(read).lines(),
                write,
                next_id: 100,
            };
            if tx.send(conn).await.is_err() {
                break;
            }
        }
    });
    (addr, rx)
}

fn fast_reconnect(max_retries: Option<u32>) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay_ms: 10,
        max_delay_secs: 1,
        factor: 1.5,
        jitter: 0.0,
        max_retries,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn registration_and_command_roundtrip() {
    let (addr, mut accepted) = start_mini_controller().await;

    let mut reg = CommandRegistry::new();
    reg.register("echo", Echo);
    reg.register("boom", Panics);
    reg.declare_event("started");

    let client = NodeClientBuilder::new()
        .server(addr.to_string())
        .name("demo")
        .module("session-loop-test")
        .token("s3cret")
        .reconnect(fast_reconnect(None))
        .build()
        .unwrap();
    let node = client.handle();

    // emitted before connecting; must be delivered after registration
    node.send_event("started", vec![json!(1)]);
    node.set_status(State::Green, Some("Ready"));

    let shutdown = CancellationToken::new();
    let task = client.spawn(reg, shutdown.clone());

    let mut conn = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .unwrap()
        .unwrap();

    // ── register ─────────────────────────────────────────────────────
    let register = conn.recv().await;
    assert_eq!(register.name, "register");
    assert!(register.is_command());
    let payload = &register.args[0];
    assert_eq!(payload["node"], json!("demo"));
    assert_eq!(payload["module"], json!("session-loop-test"));
    assert_eq!(payload["token"], json!("s3cret"));
    assert_eq!(payload["events"], json!(["demo/started"]));
    assert_eq!(
        payload["commands"],
        json!(["demo/boom", "demo/echo", "demo/_info"])
    );
    conn.reply(&register, Ok(Value::Null)).await;

    // ── status, then the queued event ────────────────────────────────
    let status = conn.recv().await;
    assert_eq!(status.name, "status");
    assert_eq!(status.args[0], json!("GREEN"));
    conn.reply(&status, Ok(Value::Null)).await;

    let event = conn.recv().await;
    assert!(event.is_event());
    assert_eq!(event.name, "demo/started");
    assert_eq!(event.args, vec![json!(1)]);

    // ── commands from the controller ─────────────────────────────────
    let reply = conn.call("echo", vec![json!(1), json!("a")]).await;
    assert_eq!(reply.outcome(), Some(Ok(json!([1, "a"]))));

    let reply = conn.call("nope", vec![]).await;
    assert_eq!(
        reply.outcome(),
        Some(Err(CommandError::UnknownCommand("nope".into())))
    );

    let reply = conn.call("_info", vec![]).await;
    let info = reply.outcome().unwrap().unwrap();
    assert_eq!(info["node"], json!("demo"));
    assert_eq!(info["status"], json!("GREEN"));

    let reply = conn.call("boom", vec![]).await;
    match reply.outcome() {
        Some(Err(CommandError::CommandRun(m))) => assert!(m.contains("panic")),
        other => panic!("expected CommandRun failure, got {other:?}"),
    }

    // ── events and commands from the node ────────────────────────────
    assert!(node.is_connected());
    node.send_event("started", vec![json!(2)]);
    let event = conn.recv().await;
    assert_eq!(event.name, "demo/started");

    let pending = node.run_command("other/play", vec![json!("disc")]);
    let request = conn.recv().await;
    assert_eq!(request.name, "other/play");
    conn.reply(&request, Ok(json!("playing"))).await;
    assert_eq!(pending.await, Ok(json!("playing")));

    // ── exit closes, node reconnects ─────────────────────────────────
    conn.send(&Message::event("exit", vec![])).await;
    assert!(conn.closed().await);
    let mut again = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.recv().await.name, "register");

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}

#[tokio::test]
async fn rejected_registration_closes_and_retries() {
    let (addr, mut accepted) = start_mini_controller().await;

    let client = NodeClientBuilder::new()
        .server(addr.to_string())
        .name("dup")
        .reconnect(fast_reconnect(Some(1)))
        .build()
        .unwrap();
    let node = client.handle();
    let shutdown = CancellationToken::new();
    let task = client.spawn(CommandRegistry::new(), shutdown.clone());

    for _ in 0..2 {
        let mut conn = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
            .await
            .unwrap()
            .unwrap();
        let register = conn.recv().await;
        conn.reply(
            &register,
            Err(CommandError::Registration("node 'dup' already connected".into())),
        )
        .await;
        assert!(conn.closed().await);
        assert!(!node.is_connected());
    }

    // max_retries = 1: the client gives up after the second rejection
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(lu_node_sdk::NodeSdkError::ReconnectExhausted(1))
    ));
}

#[tokio::test]
async fn keepalive_lines_are_sent() {
    let (addr, mut accepted) = start_mini_controller().await;
    let client = NodeClientBuilder::new()
        .server(addr.to_string())
        .name("ka")
        .keepalive_interval(Duration::from_millis(20))
        .build()
        .unwrap();
    let shutdown = CancellationToken::new();
    let task = client.spawn(CommandRegistry::new(), shutdown.clone());

    let mut conn = accepted.recv().await.unwrap();
    let first = conn.lines.next_line().await.unwrap().unwrap();
    assert!(first.contains("register"));
    let next = tokio::time::timeout(Duration::from_secs(2), conn.lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(next, "");

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}

#[tokio::test]
async fn controller_command_timeout_fails_node_call() {
    let (addr, mut accepted) = start_mini_controller().await;
    let client = NodeClientBuilder::new()
        .server(addr.to_string())
        .name("slowctl")
        .command_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let node = client.handle();
    let shutdown = CancellationToken::new();
    let task = client.spawn(CommandRegistry::new(), shutdown.clone());

    let mut conn = accepted.recv().await.unwrap();
    let register = conn.recv().await;
    conn.reply(&register, Ok(Value::Null)).await;
    let status = conn.recv().await;
    conn.reply(&status, Ok(Value::Null)).await;

    // wait until the node has attached its link
    for _ in 0..100 {
        if node.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // never answered
    let outcome = node.run_command("x/y", vec![]).await;
    assert_eq!(outcome, Err(CommandError::Timeout));

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}

#[tokio::test]
async fn garbage_from_controller_is_skipped() {
    let (addr, mut accepted) = start_mini_controller().await;
    let mut reg = CommandRegistry::new();
    reg.register("echo", Echo);
    let client = NodeClientBuilder::new()
        .server(addr.to_string())
        .name("tolerant")
        .reconnect(fast_reconnect(None))
        .build()
        .unwrap();
    let node = client.handle();
    let shutdown = CancellationToken::new();
    let task = client.spawn(reg, shutdown.clone());

    let mut conn = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .unwrap()
        .unwrap();
    let register = conn.recv().await;
    conn.reply(&register, Ok(Value::Null)).await;

    conn.write.write_all(b"\xc3\x28 not utf-8\n").await.unwrap();
    conn.write.write_all(b"{\"name\": 12}\n").await.unwrap();
    let reply = conn.call("echo", vec![json!("still here")]).await;
    assert_eq!(reply.outcome(), Some(Ok(json!(["still here"]))));
    assert!(node.is_connected());

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}
