//! Liveness tracking for watched processes
//!
//! Every configured process name owns one latch in the tracker's
//! [`AlertState`], independent of the metric latches. A process that is not
//! running is counted as broken on every cycle but only reported on the
//! cycle its latch arms. A name that matches several OS processes is treated
//! as broken (never as running) and reported with a distinct message so a
//! configuration mistake can be told apart from an outage.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::alert::{AlertState, Transition};
use crate::error::CollectionError;

/// Details of the single OS process matching a watched name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub create_time: DateTime<Local>,
    pub rss_gb: f64,
    pub mem_pct: f64,
    pub cpu_pct: f64,
    pub user: String,
}

/// What the collector saw for one watched name this cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessObservation {
    Running(ProcessInfo),
    NotRunning,
    Ambiguous { matches: usize },
}

impl ProcessObservation {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessObservation::Running(_))
    }

    /// Status column written to the process log
    pub fn status_label(&self) -> &'static str {
        match self {
            ProcessObservation::Running(_) => "OK",
            ProcessObservation::NotRunning => "Process not running",
            ProcessObservation::Ambiguous { .. } => "Ambiguous process name",
        }
    }
}

/// Broken processes found in one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Every name that is not running or is ambiguous, in name order
    pub broken: Vec<String>,

    /// Names whose latch armed this cycle
    pub new_broken: Vec<String>,

    /// Names that matched more than one OS process
    pub ambiguous: Vec<String>,

    /// Configured names the collector reported nothing for
    pub unobserved: Vec<String>,
}

impl ProcessReport {
    pub fn should_notify(&self) -> bool {
        !self.new_broken.is_empty()
    }

    /// Notification lines for the newly broken names
    pub fn notify_lines(&self) -> Vec<String> {
        self.new_broken
            .iter()
            .map(|name| {
                if self.ambiguous.contains(name) {
                    format!("Ambiguous process name: {}", name)
                } else {
                    name.clone()
                }
            })
            .collect()
    }
}

/// Latch-backed tracker for the configured process names
#[derive(Debug, Clone)]
pub struct ProcessStatusTracker {
    names: Vec<String>,
}

impl ProcessStatusTracker {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Apply this cycle's observations to `latches`
    pub fn update(
        &self,
        observations: &BTreeMap<String, ProcessObservation>,
        latches: &mut AlertState,
    ) -> ProcessReport {
        let mut report = ProcessReport::default();

        for name in &self.names {
            match observations.get(name) {
                Some(ProcessObservation::Running(_)) => {
                    latches.clear(name);
                }
                Some(ProcessObservation::NotRunning) => {
                    report.broken.push(name.clone());
                    if latches.trip(name) == Transition::Armed {
                        report.new_broken.push(name.clone());
                    }
                }
                Some(ProcessObservation::Ambiguous { matches }) => {
                    let problem = CollectionError::AmbiguousProcess {
                        name: name.clone(),
                        matches: *matches,
                    };
                    error!(process = %name, "{}", problem);
                    report.broken.push(name.clone());
                    report.ambiguous.push(name.clone());
                    if latches.trip(name) == Transition::Armed {
                        report.new_broken.push(name.clone());
                    }
                }
                None => {
                    warn!(process = %name, "No status collected; latch left unchanged");
                    report.unobserved.push(name.clone());
                }
            }
        }

        if !report.broken.is_empty() {
            error!(processes = ?report.broken, "BROKEN PROCESS(ES)");
        }

        report
    }
}
