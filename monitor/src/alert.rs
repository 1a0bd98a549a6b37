//! Alert severity, latch state and notification payloads
//!
//! An [`AlertState`] is a set of sticky flags keyed by alert name. A flag is
//! armed when its condition produced a notification and stays armed until the
//! condition is observed to recover, so a condition that persists across
//! cycles is only reported once.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Alert level, ordered so that `Critical` dominates `Warning`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "Warning",
            Severity::Critical => "Critical",
        }
    }

    /// Reduce two optional severities, keeping the higher one
    pub fn max_of(a: Option<Severity>, b: Option<Severity>) -> Option<Severity> {
        a.max(b)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latch transition produced by [`AlertState::trip`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The latch was unarmed and is now armed; notify
    Armed,
    /// The latch was already armed; stay quiet
    AlreadyArmed,
}

/// Per-key latch map
///
/// Keys that were never tripped read as unarmed. State is held in memory
/// only; a fresh monitor starts with every latch unarmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertState {
    latches: BTreeMap<String, bool>,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state with the given keys registered as unarmed
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            latches: keys.into_iter().map(|k| (k.into(), false)).collect(),
        }
    }

    pub fn is_armed(&self, key: &str) -> bool {
        self.latches.get(key).copied().unwrap_or(false)
    }

    /// Record that the condition for `key` is currently out of bounds
    pub fn trip(&mut self, key: &str) -> Transition {
        let armed = self.latches.entry(key.to_string()).or_insert(false);
        if *armed {
            Transition::AlreadyArmed
        } else {
            *armed = true;
            Transition::Armed
        }
    }

    /// Record that the condition for `key` is back in bounds. Returns whether
    /// the latch was armed before.
    pub fn clear(&mut self, key: &str) -> bool {
        match self.latches.get_mut(key) {
            Some(armed) => std::mem::replace(armed, false),
            None => {
                self.latches.insert(key.to_string(), false);
                false
            }
        }
    }

    /// Keys currently armed, in key order
    pub fn armed_keys(&self) -> Vec<&str> {
        self.latches
            .iter()
            .filter(|(_, armed)| **armed)
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn reset(&mut self) {
        for armed in self.latches.values_mut() {
            *armed = false;
        }
    }
}

/// A message handed to a notification transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// `None` for informational messages such as an all-clear digest
    pub severity: Option<Severity>,
    pub subject: String,
    pub lines: Vec<String>,
}

impl Notification {
    pub fn new(severity: Option<Severity>, subject: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            severity,
            subject: subject.into(),
            lines,
        }
    }

    /// Notification for newly out-of-bounds host metrics
    pub fn resources(server: &str, severity: Severity, lines: Vec<String>) -> Self {
        Self::new(Some(severity), format!("{}: {} computer resources", server, severity), lines)
    }

    /// Notification for newly broken or ambiguous processes
    pub fn broken_processes(server: &str, lines: Vec<String>) -> Self {
        let mut body = vec!["PROCESSES NOT RUNNING".to_string(), String::new()];
        body.extend(lines);
        Self::new(
            Some(Severity::Critical),
            format!("{}: Critical - broken process(es)", server),
            body,
        )
    }

    /// Notification for a fault that escaped a polling cycle
    pub fn monitor_error(server: &str, error: &str) -> Self {
        Self::new(
            Some(Severity::Critical),
            format!("{}: Critical - server watch error", server),
            vec!["Server watch script error:".to_string(), String::new(), error.to_string()],
        )
    }

    /// Daily digest; `status` of `None` reads as OK
    pub fn daily_status(server: &str, status: Option<Severity>, lines: Vec<String>) -> Self {
        let label = status.map_or("OK", |s| s.as_str());
        Self::new(status, format!("{}: Status {}", server, label), lines)
    }

    pub fn body(&self) -> String {
        self.lines.join("\n")
    }
}
