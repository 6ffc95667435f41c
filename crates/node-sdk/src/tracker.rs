//! One-in-flight request queue with timeout-bounded completion.
//!
//! A [`RequestTracker`] serializes commands over a single connection: at most
//! one request is *active* (transmitted, awaiting its reply) while later ones
//! wait in a FIFO backlog.  Each request owns a single-use completion sink;
//! the caller awaits the matching [`Completion`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use lu_domain::{CommandError, CommandResult};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Future resolved with the outcome of one request.
///
/// Resolves to [`CommandError::NoConnection`] if the tracker is dropped
/// without completing the request.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<CommandResult>,
}

impl Completion {
    /// A completion that is already resolved.
    pub fn ready(outcome: CommandResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }
}

impl Future for Completion {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(CommandError::NoConnection)))
    }
}

/// Timer armed for the active request.
///
/// `armed` is claimed exactly once: either by the timer task when it fires
/// or by [`TimerGuard::cancel`].
struct TimerGuard {
    armed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TimerGuard {
    fn cancel(self) {
        if self
            .armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.handle.abort();
        }
    }
}

struct Entry<P> {
    payload: P,
    sink: oneshot::Sender<CommandResult>,
}

struct Active<P> {
    entry: Entry<P>,
    timer: Option<TimerGuard>,
}

pub struct RequestTracker<P> {
    active: Option<Active<P>>,
    backlog: VecDeque<Entry<P>>,
}

impl<P> Default for RequestTracker<P> {
    fn default() -> Self {
        Self {
            active: None,
            backlog: VecDeque::new(),
        }
    }
}

impl<P: Clone> RequestTracker<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request.  If nothing is active the request is promoted at
    /// once and its payload returned for transmission.
    pub fn enqueue(&mut self, payload: P) -> (Completion, Option<P>) {
        let (sink, rx) = oneshot::channel();
        self.backlog.push_back(Entry { payload, sink });
        (Completion { rx }, self.activate_next())
    }

    /// Promote the backlog head into the empty active slot.  Returns the
    /// payload to transmit; `None` while a request is active or the backlog
    /// is empty.
    pub fn activate_next(&mut self) -> Option<P> {
        if self.active.is_some() {
            return None;
        }
        while let Some(entry) = self.backlog.pop_front() {
            // caller gave up on this one; don't transmit it
            if entry.sink.is_closed() {
                continue;
            }
            let payload = entry.payload.clone();
            self.active = Some(Active { entry, timer: None });
            return Some(payload);
        }
        None
    }

    /// Resolve the active request with a success.
    pub fn complete(&mut self, value: Value) -> Option<P> {
        self.resolve(Ok(value))
    }

    /// Resolve the active request with a failure.
    pub fn fail(&mut self, error: CommandError) -> Option<P> {
        self.resolve(Err(error))
    }

    fn resolve(&mut self, outcome: CommandResult) -> Option<P> {
        debug_assert!(self.active.is_some(), "completion with no active request");
        let Active { entry, timer } = self.active.take()?;
        if let Some(timer) = timer {
            timer.cancel();
        }
        let _ = entry.sink.send(outcome);
        Some(entry.payload)
    }

    /// Arm a timer that calls `on_timeout` once after `duration` unless the
    /// active request completes first.  Re-arming cancels the previous timer.
    /// No-op when nothing is active.
    pub fn arm_timeout<F>(&mut self, duration: Duration, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Some(previous) = active.timer.take() {
            previous.cancel();
        }
        let armed = Arc::new(AtomicBool::new(true));
        let claim = armed.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if claim
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                on_timeout();
            }
        });
        active.timer = Some(TimerGuard { armed, handle });
    }

    /// Payload of the active request.
    pub fn active(&self) -> Option<&P> {
        self.active.as_ref().map(|a| &a.entry.payload)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Active plus queued requests.
    pub fn len(&self) -> usize {
        self.backlog.len() + usize::from(self.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail the active request and every queued one with `error`.
    /// Returns the number of requests failed.
    pub fn drain(&mut self, error: CommandError) -> usize {
        let mut failed = 0;
        if self.active.is_some() {
            self.resolve(Err(error.clone()));
            failed += 1;
        }
        for entry in self.backlog.drain(..) {
            let _ = entry.sink.send(Err(error.clone()));
            failed += 1;
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn first_request_is_promoted_at_once() {
        let mut t = RequestTracker::new();
        let (_c1, send1) = t.enqueue("a");
        let (_c2, send2) = t.enqueue("b");
        assert_eq!(send1, Some("a"));
        assert_eq!(send2, None);
        assert_eq!(t.active(), Some(&"a"));
        assert_eq!(t.backlog_len(), 1);
        assert_eq!(t.activate_next(), None);
    }

    #[tokio::test]
    async fn completions_are_fifo() {
        let mut t = RequestTracker::new();
        let (c1, _) = t.enqueue(1);
        let (c2, _) = t.enqueue(2);
        let (c3, _) = t.enqueue(3);

        let mut transmitted = vec![*t.active().unwrap()];
        for v in ["one", "two", "three"] {
            t.complete(json!(v));
            if let Some(next) = t.activate_next() {
                transmitted.push(next);
            }
        }

        assert_eq!(transmitted, vec![1, 2, 3]);
        assert_eq!(c1.await, Ok(json!("one")));
        assert_eq!(c2.await, Ok(json!("two")));
        assert_eq!(c3.await, Ok(json!("three")));
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn timeout_fires_once_and_frees_the_slot() {
        let tracker = Arc::new(parking_lot::Mutex::new(RequestTracker::new()));
        let fired = Arc::new(AtomicUsize::new(0));

        let (c1, _) = tracker.lock().enqueue("slow");
        let (c2, _) = tracker.lock().enqueue("next");

        let t = tracker.clone();
        let count = fired.clone();
        tracker
            .lock()
            .arm_timeout(Duration::from_millis(20), move || {
                count.fetch_add(1, Ordering::SeqCst);
                let mut t = t.lock();
                t.fail(CommandError::Timeout);
                t.activate_next();
            });

        assert_eq!(c1.await, Err(CommandError::Timeout));
        assert_eq!(tracker.lock().active(), Some(&"next"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tracker.lock().complete(json!(true));
        assert_eq!(c2.await, Ok(json!(true)));
    }

    #[tokio::test]
    async fn completion_cancels_the_timer() {
        let mut t = RequestTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let (c, _) = t.enqueue(());
        let count = fired.clone();
        t.arm_timeout(Duration::from_millis(10), move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        t.complete(Value::Null);
        assert_eq!(c.await, Ok(Value::Null));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_timer() {
        let mut t = RequestTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let (_c, _) = t.enqueue(());
        for _ in 0..3 {
            let count = fired.clone();
            t.arm_timeout(Duration::from_millis(10), move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drain_fails_everything() {
        let mut t = RequestTracker::new();
        let (c1, _) = t.enqueue("a");
        let (c2, _) = t.enqueue("b");
        assert_eq!(t.drain(CommandError::NoConnection), 2);
        assert_eq!(c1.await, Err(CommandError::NoConnection));
        assert_eq!(c2.await, Err(CommandError::NoConnection));
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn abandoned_requests_are_skipped() {
        let mut t = RequestTracker::new();
        let (_c1, _) = t.enqueue("a");
        let (c2, _) = t.enqueue("b");
        let (_c3, _) = t.enqueue("c");
        drop(c2);
        t.complete(Value::Null);
        assert_eq!(t.activate_next(), Some("c"));
    }

    #[test]
    #[should_panic(expected = "no active request")]
    fn completing_nothing_panics_in_debug() {
        let mut t: RequestTracker<()> = RequestTracker::new();
        t.complete(Value::Null);
    }

    #[tokio::test]
    async fn dropped_tracker_resolves_no_connection() {
        let mut t = RequestTracker::new();
        let (c, _) = t.enqueue(());
        drop(t);
        assert_eq!(c.await, Err(CommandError::NoConnection));
    }
}
