//! TCP listener for node connections and the controller side of a session.
//!
//! Protocol flow:
//! 1. Node connects and sends `register` within 10 seconds
//! 2. Controller claims the node name and adds its commands and events
//! 3. Lines are then dispatched by kind:
//!    - requests run through [`Server::run_command`] and are always answered
//!    - events are checked against the node's declarations and handed to the
//!      event handler
//!    - replies complete commands the controller sent to the node
//! 4. A node silent for longer than `node_timeout` is dropped
//!
//! A peer whose first line starts with `***` is an operator, not a node: the
//! connection becomes an [admin shell](crate::admin) and is exempt from
//! registration and idle timeouts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lu_domain::config::MalformedPolicy;
use lu_domain::{CommandError, CommandResult, State};
use lu_node_sdk::{respond, Connection, Frame, Inbound, Link};
use lu_protocol::{Message, Registration, StatusReport, REGISTER, STATUS};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::admin::{self, SHELL_PREFIX};
use crate::server::Server;

/// Time a fresh connection has to register.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Period of the registration and idle checks.
const WATCHDOG_TICK: Duration = Duration::from_millis(500);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accept node connections until `shutdown` fires.
pub async fn serve(server: Arc<Server>, listener: TcpListener, shutdown: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(addr = %addr, "node listener started"),
        Err(e) => tracing::warn!(error = %e, "node listener address unknown"),
    }
    server.listening();

    loop {
        let accepted = tokio::select! {
            a = listener.accept() => a,
            _ = shutdown.cancelled() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                let server = server.clone();
                let cancel = shutdown.child_token();
                tokio::spawn(async move {
                    handle_connection(server, stream, peer, cancel).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    server.stopped();
    tracing::info!("node listener stopped");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the peer on a connection turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Peer {
    Unregistered,
    Node(String),
    Shell,
}

struct Session {
    server: Arc<Server>,
    link: Link,
    peer: Peer,
    sequence: u64,
    opened: Instant,
    command_timeout: Duration,
    node_timeout: Duration,
    malformed: MalformedPolicy,
}

/// Why the session loop ended, for the disconnect log line.
enum Close {
    Peer,
    Exit,
    Expired(&'static str),
    Error(String),
    Shutdown,
}

async fn handle_connection(
    server: Arc<Server>,
    stream: TcpStream,
    addr: SocketAddr,
    cancel: CancellationToken,
) {
    let config = server.config().session.clone();
    let mut conn = Connection::new(
        stream,
        addr.to_string(),
        config.command_timeout(),
        config.max_line_bytes,
    );
    let link = conn.link.clone();
    let notify = server.status_notifier();
    link.subscribe_status(move |_| notify.notify_one());

    server.connection_made();
    let mut session = Session {
        sequence: server.next_sequence(),
        server,
        link,
        peer: Peer::Unregistered,
        opened: Instant::now(),
        command_timeout: config.command_timeout(),
        node_timeout: config.node_timeout(),
        malformed: config.malformed,
    };
    tracing::info!(peer = %addr, sequence = session.sequence, "connection opened");

    let mut watchdog = tokio::time::interval(WATCHDOG_TICK);
    let reason = loop {
        let frame = tokio::select! {
            f = conn.next_frame() => f,
            _ = watchdog.tick() => {
                if let Some(why) = session.expired() {
                    break Close::Expired(why);
                }
                continue;
            }
            _ = cancel.cancelled() => break Close::Shutdown,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Close::Error(e.to_string()),
            None => break Close::Peer,
        };
        if let Some(close) = session.on_frame(&frame).await {
            break close;
        }
    };

    match &reason {
        Close::Peer => tracing::info!(peer = %addr, "peer closed connection"),
        Close::Exit => tracing::info!(peer = %addr, "peer requested exit"),
        Close::Expired(why) => tracing::warn!(peer = %addr, reason = %why, "dropping connection"),
        Close::Error(e) => tracing::warn!(peer = %addr, error = %e, "read error"),
        Close::Shutdown => tracing::debug!(peer = %addr, "closing for shutdown"),
    }

    // Cleanup: release the node, fail in-flight commands, flush.
    if let Peer::Node(node) = &session.peer {
        session.server.unregister_node(node, &session.link);
        tracing::info!(node = %node, peer = %addr, "node disconnected");
    }
    conn.finish().await;
    session.server.connection_lost();
}

impl Session {
    /// Deadline checks run by the watchdog.
    fn expired(&self) -> Option<&'static str> {
        match self.peer {
            Peer::Shell => None,
            Peer::Unregistered if self.opened.elapsed() > REGISTER_TIMEOUT => {
                Some("no registration")
            }
            Peer::Node(_) if self.link.idle_for() > self.node_timeout => Some("node timeout"),
            _ => None,
        }
    }

    /// Handle one line.  Returns `Some` when the connection must close.
    async fn on_frame(&mut self, frame: &Frame) -> Option<Close> {
        if self.peer == Peer::Shell {
            return self.on_shell_line(&frame.to_string()).await;
        }
        if let Frame::Line(line) = frame {
            if self.peer == Peer::Unregistered && line.starts_with(SHELL_PREFIX) {
                tracing::info!(peer = %self.link.peer(), "admin shell opened");
                self.peer = Peer::Shell;
                self.link.touch();
                return self.send_shell(admin::banner(&self.server));
            }
        }

        let inbound = self.link.classify_frame(frame);
        if let Peer::Node(node) = &self.peer {
            self.server.nodes().touch(node);
        }
        match inbound {
            Inbound::Keepalive => {}
            Inbound::Malformed(e) => {
                tracing::warn!(peer = %self.link.peer(), error = %e, line = %frame, "malformed line");
                if self.malformed == MalformedPolicy::Close {
                    return Some(Close::Error(e.to_string()));
                }
            }
            Inbound::Exit => return Some(Close::Exit),
            Inbound::Response(reply) => {
                self.link.handle_response(reply);
            }
            Inbound::Request(request) => self.on_request(request).await,
            Inbound::Event(event) => self.on_event(event),
        }
        None
    }

    async fn on_shell_line(&mut self, line: &str) -> Option<Close> {
        self.link.touch();
        let reply = admin::execute(&self.server, line).await;
        self.send_shell(reply)
    }

    fn send_shell(&self, reply: admin::ShellReply) -> Option<Close> {
        for line in reply.lines {
            if self.link.send_line(line).is_err() {
                return Some(Close::Peer);
            }
        }
        reply.close.then_some(Close::Exit)
    }

    async fn on_request(&mut self, request: Message) {
        tracing::debug!(peer = %self.link.peer(), command = %request, "received command");
        if request.name == REGISTER {
            let outcome = self.register(&request);
            respond(&self.link, request, self.command_timeout, async { outcome }).await;
            return;
        }
        let Peer::Node(node) = &self.peer else {
            let outcome = Err(CommandError::Registration("not registered".into()));
            respond(&self.link, request, self.command_timeout, async { outcome }).await;
            return;
        };
        if request.name == STATUS {
            let outcome = self.report_status(node, &request);
            respond(&self.link, request, self.command_timeout, async { outcome }).await;
            return;
        }

        let server = self.server.clone();
        let link = self.link.clone();
        let timeout = self.command_timeout;
        tokio::spawn(async move {
            let command = request.clone();
            respond(&link, request, timeout, async move {
                server.run_command(&command, true).await
            })
            .await;
        });
    }

    fn register(&mut self, request: &Message) -> CommandResult {
        if let Peer::Node(node) = &self.peer {
            return Err(CommandError::Registration(format!(
                "connection already registered as '{node}'"
            )));
        }
        let registration = Registration::from_message(request)
            .map_err(|e| CommandError::Registration(e.to_string()))?;
        if let Err(e) = self
            .server
            .register_node(&registration, &self.link, self.sequence)
        {
            tracing::warn!(
                node = %registration.node,
                hostname = %registration.hostname,
                peer = %self.link.peer(),
                error = %e,
                "registration rejected"
            );
            return Err(e);
        }
        tracing::info!(
            node = %registration.node,
            hostname = %registration.hostname,
            module = %registration.module,
            commands = registration.commands.len(),
            events = registration.events.len(),
            sequence = self.sequence,
            "node registered"
        );
        self.peer = Peer::Node(registration.node);
        Ok(json!({
            "server": self.server.hostname(),
            "sequence": self.sequence,
        }))
    }

    fn report_status(&self, node: &str, request: &Message) -> CommandResult {
        let report = StatusReport::from_message(request)
            .map_err(|e| CommandError::CommandParse(e.to_string()))?;
        let state: State = report.state.parse().map_err(CommandError::CommandParse)?;
        tracing::info!(
            node = %node,
            state = %state,
            reason = report.reason.as_deref().unwrap_or(""),
            "node status"
        );
        self.server
            .set_node_status(node, state, report.reason.as_deref());
        Ok(Value::Null)
    }

    fn on_event(&self, event: Message) {
        let Peer::Node(node) = &self.peer else {
            tracing::warn!(peer = %self.link.peer(), event = %event, "event before registration");
            return;
        };
        let own = event
            .name
            .strip_prefix(node.as_str())
            .is_some_and(|rest| rest.starts_with('/'));
        if !own || !self.server.has_event(&event.name) {
            tracing::warn!(node = %node, event = %event, "dropping undeclared event");
            return;
        }

        tracing::info!(node = %node, event = %event, "event");
        let server = self.server.clone();
        tokio::spawn(async move {
            let name = event.name.clone();
            match server.handle_event(event).await {
                Ok(_) => {}
                Err(e) if e.is_expected() => {
                    tracing::info!(event = %name, error = %e, "event action failed")
                }
                Err(e) => tracing::error!(event = %name, error = ?e, "event action failed"),
            }
        });
    }
}
