//! Core node client: manages the TCP session lifecycle, registration,
//! keepalive and command dispatch via [`CommandRegistry`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use lu_domain::config::{MalformedPolicy, ReconnectConfig};
use lu_domain::{CommandError, State, Status};
use lu_protocol::{Message, Registration, StatusReport, INFO};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::link::{respond, Inbound, Link};
use crate::reconnect::Reconnector;
use crate::registry::CommandRegistry;
use crate::tracker::Completion;
use crate::types::{CommandContext, NodeSdkError};

/// A fully-configured node client ready to connect to the controller.
///
/// Create via [`NodeClientBuilder`](crate::builder::NodeClientBuilder).
pub struct NodeClient {
    pub(crate) addr: String,
    pub(crate) identity: Identity,
    pub(crate) token: Option<String>,
    pub(crate) keepalive_interval: Duration,
    pub(crate) command_timeout: Duration,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) max_line_bytes: usize,
    pub(crate) malformed: MalformedPolicy,
    pub(crate) max_concurrent_commands: usize,
    pub(crate) handle: NodeHandle,
}

/// Who this node is, as reported at registration and by `_info`.
#[derive(Debug, Clone)]
pub(crate) struct Identity {
    pub name: String,
    pub nodeid: String,
    pub hostname: String,
    pub hostid: String,
    pub module: String,
}

impl NodeClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::NodeClientBuilder {
        crate::builder::NodeClientBuilder::new()
    }

    /// Handle for emitting events and reporting status from device code.
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Run the node.  Connects to the controller, registers, and serves
    /// commands.  On disconnection, reconnects according to the
    /// [`Reconnector`] policy.
    ///
    /// Returns when `shutdown` is cancelled or reconnection is abandoned.
    pub async fn run(
        self,
        registry: CommandRegistry,
        shutdown: CancellationToken,
    ) -> Result<(), NodeSdkError> {
        let registry = Arc::new(registry);
        let mut reconnector = Reconnector::new(self.reconnect.clone());

        loop {
            match self.connect_and_run(&registry, &shutdown).await {
                Ok(true) => {
                    tracing::info!(node = %self.identity.name, "session ended");
                    reconnector.reset_delay();
                }
                Ok(false) => {
                    tracing::warn!(node = %self.identity.name, "session ended before registration");
                }
                Err(e) => {
                    tracing::warn!(
                        node = %self.identity.name,
                        attempt = reconnector.retries(),
                        error = %e,
                        "connection failed"
                    );
                }
            }

            if shutdown.is_cancelled() {
                tracing::info!(node = %self.identity.name, "shutdown requested");
                return Err(NodeSdkError::Shutdown);
            }

            let waited = tokio::select! {
                w = reconnector.wait() => w,
                _ = shutdown.cancelled() => return Err(NodeSdkError::Shutdown),
            };
            if !waited {
                let attempts = reconnector.retries().saturating_sub(1);
                tracing::error!(node = %self.identity.name, attempts, "reconnect abandoned");
                return Err(NodeSdkError::ReconnectExhausted(attempts));
            }
        }
    }

    /// Same as [`run`](Self::run), spawned on the runtime.
    pub fn spawn(
        self,
        registry: CommandRegistry,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), NodeSdkError>> {
        tokio::spawn(async move { self.run(registry, shutdown).await })
    }

    /// Single connection lifecycle: connect -> register -> message loop.
    ///
    /// Returns `Ok(true)` if registration succeeded before the connection
    /// closed.
    async fn connect_and_run(
        &self,
        registry: &Arc<CommandRegistry>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<bool> {
        tracing::info!(addr = %self.addr, node = %self.identity.name, "connecting to controller");
        let stream = tokio::select! {
            s = TcpStream::connect(&self.addr) => s.with_context(|| format!("connect {}", self.addr))?,
            _ = shutdown.cancelled() => return Ok(false),
        };
        let mut conn = Connection::new(
            stream,
            self.addr.clone(),
            self.command_timeout,
            self.max_line_bytes,
        );
        let link = conn.link.clone();
        link.set_status_name(format!("{}:link", self.identity.name));

        // Everything spawned for this connection stops with it.
        let session = shutdown.child_token();

        // ── Keepalive ────────────────────────────────────────────────
        let keepalive = {
            let link = link.clone();
            let every = self.keepalive_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                loop {
                    interval.tick().await;
                    if !link.send_keepalive() {
                        break;
                    }
                }
            })
        };

        // ── Registration ─────────────────────────────────────────────
        let registered = Arc::new(AtomicBool::new(false));
        let registration = link.send_command(self.registration(registry).to_message());
        let register_task = {
            let handle = self.handle.clone();
            let link = link.clone();
            let registered = registered.clone();
            let session = session.clone();
            tokio::spawn(async move {
                match registration.await {
                    Ok(_) => {
                        registered.store(true, Ordering::Release);
                        tracing::info!(node = %handle.name(), "registered with controller");
                        handle.attach(link);
                    }
                    Err(e) => {
                        tracing::error!(node = %handle.name(), error = %e, "registration rejected");
                        session.cancel();
                    }
                }
            })
        };

        // ── Message loop ─────────────────────────────────────────────
        let permits = Arc::new(Semaphore::new(self.max_concurrent_commands));
        loop {
            let frame = tokio::select! {
                f = conn.next_frame() => f,
                _ = session.cancelled() => break,
            };
            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "read error from controller");
                    break;
                }
                None => {
                    tracing::info!("controller closed connection");
                    break;
                }
            };

            match link.classify_frame(&frame) {
                Inbound::Keepalive => {}
                Inbound::Malformed(e) => {
                    tracing::warn!(error = %e, line = %frame, "malformed line from controller");
                    if self.malformed == MalformedPolicy::Close {
                        break;
                    }
                }
                Inbound::Exit => {
                    tracing::info!("controller requested exit");
                    break;
                }
                Inbound::Response(reply) => {
                    link.handle_response(reply);
                }
                Inbound::Request(request) => {
                    self.dispatch(registry, &link, request, session.child_token(), &permits);
                }
                Inbound::Event(event) => {
                    tracing::debug!(event = %event, "ignoring event from controller");
                }
            }
        }

        // Cleanup: stop in-flight commands and the keepalive.
        session.cancel();
        register_task.abort();
        keepalive.abort();
        self.handle.detach(&link);
        conn.finish().await;

        Ok(registered.load(Ordering::Acquire))
    }

    fn dispatch(
        &self,
        registry: &Arc<CommandRegistry>,
        link: &Link,
        request: Message,
        cancel: CancellationToken,
        permits: &Arc<Semaphore>,
    ) {
        tracing::debug!(command = %request, "received command");
        let registry = registry.clone();
        let link = link.clone();
        let permits = permits.clone();
        let timeout = self.command_timeout;
        let info = self.info(&registry);
        let handle = self.handle.clone();
        let node = self.identity.name.clone();

        tokio::spawn(async move {
            let _permit = permits.acquire().await;
            let ctx = CommandContext {
                node,
                command: request.name.clone(),
                request_id: request.request_id,
                cancel,
            };
            let handler = registry.get(&request.name);
            let args = request.args.clone();
            let name = request.name.clone();
            let work = async move {
                match handler {
                    Some(handler) => handler.call(ctx, args).await,
                    None if name == INFO => {
                        let (state, reason) = handle.status();
                        let mut info = info;
                        info["status"] = json!(state);
                        info["reason"] = json!(reason);
                        Ok(info)
                    }
                    None => Err(CommandError::UnknownCommand(name)),
                }
            };
            respond(&link, request, timeout, work).await;
        });
    }

    fn registration(&self, registry: &CommandRegistry) -> Registration {
        let qualify = |local: &String| format!("{}/{}", self.identity.name, local);
        let mut commands: Vec<String> = registry.command_names().iter().map(qualify).collect();
        let info = format!("{}/{}", self.identity.name, INFO);
        if !commands.contains(&info) {
            commands.push(info);
        }
        Registration {
            node: self.identity.name.clone(),
            nodeid: self.identity.nodeid.clone(),
            hostname: self.identity.hostname.clone(),
            hostid: self.identity.hostid.clone(),
            module: self.identity.module.clone(),
            events: registry.event_names().iter().map(qualify).collect(),
            commands,
            token: self.token.clone(),
        }
    }

    fn info(&self, registry: &CommandRegistry) -> Value {
        json!({
            "node": self.identity.name,
            "nodeid": self.identity.nodeid,
            "hostname": self.identity.hostname,
            "hostid": self.identity.hostid,
            "module": self.identity.module,
            "commands": registry.command_names(),
            "events": registry.event_names(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NodeHandle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cloneable handle used by device code to talk to the controller.
///
/// Events emitted while disconnected are queued and flushed after the next
/// successful registration.
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<HandleShared>,
}

struct HandleShared {
    name: String,
    link: Mutex<Option<Link>>,
    queued: Mutex<VecDeque<Message>>,
    max_queued: usize,
    status: Mutex<Status>,
}

impl NodeHandle {
    pub(crate) fn new(name: impl Into<String>, max_queued: usize) -> Self {
        let name = name.into();
        Self {
            shared: Arc::new(HandleShared {
                status: Mutex::new(Status::with_state(
                    name.clone(),
                    State::Off,
                    Some("Starting"),
                )),
                name,
                link: Mutex::new(None),
                queued: Mutex::new(VecDeque::new()),
                max_queued,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// `true` while registered with the controller.
    pub fn is_connected(&self) -> bool {
        self.shared.link.lock().is_some()
    }

    /// Emit an event.  `name` is local (`started`) or already qualified
    /// (`oppo/started`).
    pub fn send_event(&self, name: &str, args: Vec<Value>) {
        let event = Message::event(self.qualify(name), args);
        let link = self.shared.link.lock().clone();
        if let Some(link) = link {
            if link.send_event(&event).is_ok() {
                tracing::debug!(event = %event, "event sent");
                return;
            }
        }
        let mut queue = self.shared.queued.lock();
        if queue.len() >= self.shared.max_queued {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!(event = %dropped, "event queue full, dropping oldest");
            }
        }
        tracing::debug!(event = %event, "queued event while disconnected");
        queue.push_back(event);
    }

    /// Run a command on the controller (e.g. another node's command or an
    /// alias).
    pub fn run_command(&self, name: &str, args: Vec<Value>) -> Completion {
        let link = self.shared.link.lock().clone();
        match link {
            Some(link) => link.send_command(Message::command(name, args)),
            None => Completion::ready(Err(CommandError::NoConnection)),
        }
    }

    /// Update this node's health.  A change is reported to the controller
    /// when connected.  Must be called from within the Tokio runtime.
    pub fn set_status(&self, state: State, reason: Option<&str>) {
        let report = {
            let mut status = self.shared.status.lock();
            let old = status.state();
            if !status.set(state, reason) {
                return;
            }
            StatusReport {
                state: state.to_string(),
                old_state: old.to_string(),
                reason: reason.map(str::to_string),
            }
        };
        let link = self.shared.link.lock().clone();
        if let Some(link) = link {
            Self::push_status(&link, report);
        }
    }

    pub fn status(&self) -> (State, Option<String>) {
        let status = self.shared.status.lock();
        (status.state(), status.reason().map(str::to_string))
    }

    fn qualify(&self, name: &str) -> String {
        let prefix = format!("{}/", self.shared.name);
        if name.starts_with(&prefix) {
            name.to_string()
        } else {
            format!("{prefix}{name}")
        }
    }

    fn push_status(link: &Link, report: StatusReport) {
        let completion = link.send_command(report.to_message());
        tokio::spawn(async move {
            if let Err(e) = completion.await {
                tracing::debug!(error = %e, "status report not delivered");
            }
        });
    }

    /// Registered on `link`: report status and flush queued events.
    pub(crate) fn attach(&self, link: Link) {
        *self.shared.link.lock() = Some(link.clone());

        let report = {
            let status = self.shared.status.lock();
            StatusReport {
                state: status.state().to_string(),
                old_state: status.state().to_string(),
                reason: status.reason().map(str::to_string),
            }
        };
        Self::push_status(&link, report);

        let queued: Vec<Message> = self.shared.queued.lock().drain(..).collect();
        if !queued.is_empty() {
            tracing::info!(count = queued.len(), "flushing queued events");
        }
        for event in queued {
            if link.send_event(&event).is_err() {
                self.shared.queued.lock().push_back(event);
            }
        }
    }

    pub(crate) fn detach(&self, link: &Link) {
        let mut current = self.shared.link.lock();
        if current.as_ref().is_some_and(|l| l.same(link)) {
            *current = None;
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.shared.queued.lock().len()
    }
}

/// The OS host name, or `localhost` when it cannot be read.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".into())
}
