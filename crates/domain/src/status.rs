//! Four-level health status with change notification.
//!
//! Every link, node and service owns a [`Status`].  Owners combine the
//! statuses of their children with [`Status::combine`] to derive their own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Health level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Off,
    Yellow,
    Red,
    Green,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Off => "OFF",
            State::Yellow => "YELLOW",
            State::Red => "RED",
            State::Green => "GREEN",
        }
    }

    /// Combine child states: any RED wins, then all-GREEN, then all-OFF,
    /// anything mixed is YELLOW.  No children is OFF.
    pub fn combine(states: impl IntoIterator<Item = State>) -> State {
        let mut any = false;
        let mut all_green = true;
        let mut all_off = true;
        for state in states {
            any = true;
            match state {
                State::Red => return State::Red,
                State::Green => all_off = false,
                State::Off => all_green = false,
                State::Yellow => {
                    all_green = false;
                    all_off = false;
                }
            }
        }
        if !any || all_off {
            State::Off
        } else if all_green {
            State::Green
        } else {
            State::Yellow
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Ok(State::Off),
            "YELLOW" => Ok(State::Yellow),
            "RED" => Ok(State::Red),
            "GREEN" => Ok(State::Green),
            other => Err(format!("unknown status state '{other}'")),
        }
    }
}

/// Emitted to subscribers when `(state, reason)` changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub name: String,
    pub state: State,
    pub old: State,
    pub reason: Option<String>,
}

type Callback = Box<dyn Fn(&StatusChange) + Send + Sync>;

/// A named status value with change-driven callbacks.
pub struct Status {
    name: String,
    state: State,
    reason: Option<String>,
    callbacks: Vec<Callback>,
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("reason", &self.reason)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Status {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_state(name, State::Off, None::<String>)
    }

    pub fn with_state(
        name: impl Into<String>,
        state: State,
        reason: Option<impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            state,
            reason: reason.map(Into::into),
            callbacks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Register a change callback.  Callbacks run synchronously inside
    /// [`set`](Self::set); they must not touch this status.
    pub fn subscribe(&mut self, callback: impl Fn(&StatusChange) + Send + Sync + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Set a new state.  Returns `true` (and notifies subscribers) only when
    /// the state or the reason actually changed.
    pub fn set(&mut self, state: State, reason: Option<&str>) -> bool {
        if self.state == state && self.reason.as_deref() == reason {
            return false;
        }
        let old = self.state;
        self.state = state;
        self.reason = reason.map(str::to_string);

        tracing::info!(
            status = %self.name,
            from = %old,
            to = %state,
            reason = reason.unwrap_or(""),
            "status changed"
        );

        let change = StatusChange {
            name: self.name.clone(),
            state,
            old,
            reason: self.reason.clone(),
        };
        for cb in &self.callbacks {
            cb(&change);
        }
        true
    }

    pub fn set_off(&mut self, reason: Option<&str>) -> bool {
        self.set(State::Off, reason)
    }

    pub fn set_yellow(&mut self, reason: Option<&str>) -> bool {
        self.set(State::Yellow, reason)
    }

    pub fn set_red(&mut self, reason: Option<&str>) -> bool {
        self.set(State::Red, reason)
    }

    pub fn set_green(&mut self, reason: Option<&str>) -> bool {
        self.set(State::Green, reason)
    }

    /// Combine a set of child statuses into `(state, reason)`.
    ///
    /// The reason lists every child that is not GREEN as `name: reason`.
    pub fn combine<'a>(children: impl IntoIterator<Item = &'a Status>) -> (State, Option<String>) {
        let children: Vec<&Status> = children.into_iter().collect();
        let state = State::combine(children.iter().map(|s| s.state));
        if state == State::Green {
            return (state, None);
        }
        let reasons: Vec<String> = children
            .iter()
            .filter(|s| s.state != State::Green)
            .map(|s| match &s.reason {
                Some(r) => format!("{} {}: {}", s.name, s.state, r),
                None => format!("{} {}", s.name, s.state),
            })
            .collect();
        let reason = if reasons.is_empty() {
            None
        } else {
            Some(reasons.join(", "))
        };
        (state, reason)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(r) => write!(f, "{} ({})", self.state, r),
            None => write!(f, "{}", self.state),
        }
    }
}
