//! One live session endpoint: correlates outgoing commands with replies,
//! enforces the per-command timeout and tracks link health.
//!
//! Both ends of a session use [`Link`]: the node client for its connection
//! to the controller, the controller for each node connection.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use lu_domain::{CommandError, CommandResult, State, Status, StatusChange};
use lu_protocol::{Message, MessageKind, ProtocolError, RequestIds, EXIT};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::Frame;
use crate::tracker::{Completion, RequestTracker};

/// Frame handed to the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One line, written with a trailing `\n`.
    Line(String),
    /// Flush and shut the write half down.
    Close,
}

/// Classification of one received line.
#[derive(Debug)]
pub enum Inbound {
    /// Empty line.
    Keepalive,
    Malformed(ProtocolError),
    /// The peer asked to end the session.
    Exit,
    /// Reply to one of our commands.
    Response(Message),
    /// Command from the peer expecting a reply.
    Request(Message),
    Event(Message),
}

#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    peer: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    tracker: Mutex<RequestTracker<Message>>,
    ids: RequestIds,
    timeout: Duration,
    status: Mutex<Status>,
    closed: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Link {
    /// Create a link writing to `outbound`.  Commands not answered within
    /// `timeout` fail with [`CommandError::Timeout`].
    pub fn new(
        peer: impl Into<String>,
        outbound: mpsc::UnboundedSender<Outbound>,
        timeout: Duration,
    ) -> Self {
        let peer = peer.into();
        let status = Status::with_state(peer.clone(), State::Yellow, Some("Connecting"));
        Self {
            inner: Arc::new(LinkInner {
                peer,
                outbound,
                tracker: Mutex::new(RequestTracker::new()),
                ids: RequestIds::new(),
                timeout,
                status: Mutex::new(status),
                closed: AtomicBool::new(false),
                last_activity: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Same underlying connection.
    pub fn same(&self, other: &Link) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Queue a command for the peer.  At most one command is in flight; the
    /// returned [`Completion`] resolves with the peer's reply, a timeout, or
    /// [`CommandError::NoConnection`] if the link closes first.
    pub fn send_command(&self, message: Message) -> Completion {
        if self.is_closed() {
            return Completion::ready(Err(CommandError::NoConnection));
        }
        let mut command = message.fresh_copy();
        command.kind = MessageKind::Command;
        command.request_id = Some(self.inner.ids.next_id());

        let mut tracker = self.inner.tracker.lock();
        let (completion, transmit) = tracker.enqueue(command);
        if let Some(active) = transmit {
            self.inner.transmit(&mut tracker, active);
        }
        completion
    }

    /// Send a fire-and-forget event.
    pub fn send_event(&self, message: &Message) -> Result<(), CommandError> {
        let mut event = message.fresh_copy();
        event.kind = MessageKind::Event;
        self.send_line(event.to_wire())
    }

    /// Send the reply to a command received from the peer.
    pub fn send_reply(&self, reply: &Message) -> Result<(), CommandError> {
        self.send_line(reply.to_wire())
    }

    /// Send the keepalive empty line.  Returns `false` once the link is gone.
    pub fn send_keepalive(&self) -> bool {
        self.send_line(String::new()).is_ok()
    }

    /// Send a raw text line (admin shell output).
    pub fn send_line(&self, line: impl Into<String>) -> Result<(), CommandError> {
        let line = line.into();
        if self.is_closed() {
            return Err(CommandError::NoConnection);
        }
        self.inner
            .outbound
            .send(Outbound::Line(line))
            .map_err(|_| CommandError::NoConnection)
    }

    // ── Receiving ────────────────────────────────────────────────────

    /// Parse one received line and update activity and link status.
    /// Like [`classify`](Self::classify) for a raw frame; a line that is not
    /// UTF-8 still counts as activity but is malformed.
    pub fn classify_frame(&self, frame: &Frame) -> Inbound {
        match frame {
            Frame::Line(line) => self.classify(line),
            Frame::Garbled(lossy) => {
                self.touch();
                Inbound::Malformed(ProtocolError::Encoding(lossy.clone()))
            }
        }
    }

    pub fn classify(&self, line: &str) -> Inbound {
        *self.inner.last_activity.lock() = Instant::now();
        if line.trim().is_empty() {
            return Inbound::Keepalive;
        }
        let message = match Message::from_wire(line) {
            Ok(m) => m,
            Err(e) => return Inbound::Malformed(e),
        };
        self.inner.status.lock().set_green(Some("Up"));

        if message.name == EXIT {
            Inbound::Exit
        } else if message.response.is_some() {
            Inbound::Response(message)
        } else if message.is_command() {
            Inbound::Request(message)
        } else {
            Inbound::Event(message)
        }
    }

    /// Complete the active command with `reply`.  A reply that does not
    /// match the active request (late answer to a timed-out command) is
    /// logged and dropped; returns `false` in that case.
    pub fn handle_response(&self, reply: Message) -> bool {
        let mut tracker = self.inner.tracker.lock();
        let active_id = tracker.active().and_then(|m| m.request_id);
        if active_id.is_none() || active_id != reply.request_id {
            tracing::warn!(
                peer = %self.inner.peer,
                request_id = ?reply.request_id,
                name = %reply.name,
                "dropping unexpected response; late reply to a timed-out request?"
            );
            return false;
        }
        let outcome = reply.outcome().unwrap_or(Ok(Value::Null));
        match outcome {
            Ok(value) => {
                tracing::debug!(peer = %self.inner.peer, reply = %reply, "command succeeded");
                tracker.complete(value);
            }
            Err(e) => {
                tracing::debug!(peer = %self.inner.peer, reply = %reply, error = %e, "command failed");
                tracker.fail(e);
            }
        }
        if let Some(next) = tracker.activate_next() {
            self.inner.transmit(&mut tracker, next);
        }
        true
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Close the link: fail every pending command with `NoConnection` and
    /// ask the writer to flush and stop.  Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let failed = self.inner.tracker.lock().drain(CommandError::NoConnection);
        if failed > 0 {
            tracing::debug!(peer = %self.inner.peer, failed, "failed pending commands on close");
        }
        let _ = self.inner.outbound.send(Outbound::Close);
        self.inner.status.lock().set_red(Some("Connection lost"));
    }

    /// Record activity for lines handled outside [`classify`](Self::classify).
    pub fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    /// Time since the last received line (keepalives included).
    pub fn idle_for(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// Commands in flight or queued.
    pub fn pending(&self) -> usize {
        self.inner.tracker.lock().len()
    }

    pub fn status(&self) -> (State, Option<String>) {
        let status = self.inner.status.lock();
        (status.state(), status.reason().map(str::to_string))
    }

    /// Subscribe to link status changes.  The callback runs while the
    /// status is locked and must not call back into this link.
    pub fn subscribe_status(&self, callback: impl Fn(&StatusChange) + Send + Sync + 'static) {
        self.inner.status.lock().subscribe(callback);
    }

    pub fn set_status_name(&self, name: impl Into<String>) {
        self.inner.status.lock().set_name(name);
    }
}

impl LinkInner {
    /// Write the newly active command and arm its timeout.
    fn transmit(self: &Arc<Self>, tracker: &mut RequestTracker<Message>, command: Message) {
        let Some(request_id) = command.request_id else {
            return;
        };
        tracing::debug!(peer = %self.peer, command = %command, "sending command");
        if self.outbound.send(Outbound::Line(command.to_wire())).is_err() {
            tracker.drain(CommandError::NoConnection);
            return;
        }
        let link: Weak<LinkInner> = Arc::downgrade(self);
        tracker.arm_timeout(self.timeout, move || {
            if let Some(link) = link.upgrade() {
                link.expire(request_id);
            }
        });
    }

    fn expire(self: &Arc<Self>, request_id: u64) {
        {
            let mut tracker = self.tracker.lock();
            if tracker.active().and_then(|m| m.request_id) != Some(request_id) {
                return;
            }
            let expired = tracker.fail(CommandError::Timeout);
            tracing::warn!(
                peer = %self.peer,
                request_id,
                command = expired.as_ref().map(|m| m.name.as_str()).unwrap_or(""),
                "command timed out"
            );
            if let Some(next) = tracker.activate_next() {
                self.transmit(&mut tracker, next);
            }
        }
        self.status.lock().set_red(Some("Timeout"));
    }
}

/// Run `handler` for a command received on `link` and send the reply.
///
/// The handler is bounded by `timeout` and shielded from panics, so a reply
/// is always sent when the request carries a `requestid`.  Expected failures
/// are logged quietly; anything else is logged with full context.
pub async fn respond<F>(link: &Link, request: Message, timeout: Duration, handler: F)
where
    F: Future<Output = CommandResult> + Send,
{
    let outcome = match tokio::time::timeout(timeout, AssertUnwindSafe(handler).catch_unwind()).await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_panic)) => {
            tracing::error!(command = %request.name, "command handler panicked");
            Err(CommandError::CommandRun("command handler panicked".into()))
        }
        Err(_) => Err(CommandError::Timeout),
    };

    match &outcome {
        Ok(_) => tracing::debug!(peer = %link.peer(), command = %request.name, "command ok"),
        Err(e) if e.is_expected() => tracing::info!(
            peer = %link.peer(),
            command = %request.name,
            error = %e,
            "command failed"
        ),
        Err(e) => tracing::error!(
            peer = %link.peer(),
            command = %request,
            args = ?request.args,
            error = ?e,
            "request failed"
        ),
    }

    if request.request_id.is_none() {
        return;
    }
    match request.reply(&outcome) {
        Ok(reply) => {
            if link.send_reply(&reply).is_err() {
                tracing::debug!(command = %request.name, "link closed before reply");
            }
        }
        Err(e) => tracing::warn!(command = %request.name, error = %e, "cannot build reply"),
    }
}
