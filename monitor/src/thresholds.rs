//! Threshold evaluation for host metrics
//!
//! [`ThresholdEvaluator::evaluate`] turns a [`MetricSample`] into an overall
//! severity plus the lines that need to be sent, using an [`AlertState`] so
//! that a metric that stays out of bounds is reported only on the cycle it
//! first crossed its warning bound. Recovery disarms the latch silently.
//!
//! Bounds are whole numbers and readings are compared by their floor, so a
//! reading of `79.99` does not reach a bound of `80`.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::alert::{AlertState, Severity, Transition};
use crate::error::CollectionError;
use crate::sample::{MetricKind, MetricSample};

/// Latch key for the database liveness check
pub const DATABASE_KEY: &str = "Mongo";

/// Which side of a bound is out of bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Alert when the reading is at or above the bound (usage percentages)
    AtLeast,
    /// Alert when the reading is at or below the bound (free space)
    AtMost,
}

impl Direction {
    pub fn for_metric(kind: MetricKind) -> Self {
        match kind {
            MetricKind::DiskFree => Direction::AtMost,
            MetricKind::Cpu | MetricKind::Ram | MetricKind::BootUsage => Direction::AtLeast,
        }
    }

    /// Inclusive comparison of the floored reading against `bound`
    pub fn crosses(&self, value: f64, bound: i64) -> bool {
        let whole = value.floor();
        let bound = bound as f64;
        match self {
            Direction::AtLeast => whole >= bound,
            Direction::AtMost => whole <= bound,
        }
    }
}

/// Warning and critical bound for one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub warning: i64,
    pub critical: i64,
}

impl Bound {
    pub fn new(warning: i64, critical: i64) -> Self {
        Self { warning, critical }
    }

    /// Severity of `value`, or `None` when it is within bounds
    pub fn severity(&self, value: f64, direction: Direction) -> Option<Severity> {
        if !direction.crosses(value, self.warning) {
            None
        } else if direction.crosses(value, self.critical) {
            Some(Severity::Critical)
        } else {
            Some(Severity::Warning)
        }
    }

    /// Whether the critical bound sits past the warning bound
    pub fn is_ordered(&self, direction: Direction) -> bool {
        match direction {
            Direction::AtLeast => self.critical >= self.warning,
            Direction::AtMost => self.critical <= self.warning,
        }
    }
}

/// Per-metric bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// CPU usage percentage
    pub cpu: Bound,

    /// RAM usage percentage
    pub ram: Bound,

    /// Free space on the root partition, in whole GB
    pub disk_free_gb: Bound,

    /// Boot partition usage percentage
    pub boot_pct: Bound,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu: Bound::new(80, 90),
            ram: Bound::new(70, 80),
            disk_free_gb: Bound::new(180, 100),
            boot_pct: Bound::new(85, 90),
        }
    }
}

impl ThresholdConfig {
    pub fn bound(&self, kind: MetricKind) -> Bound {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Ram => self.ram,
            MetricKind::DiskFree => self.disk_free_gb,
            MetricKind::BootUsage => self.boot_pct,
        }
    }
}

/// Outcome of evaluating one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Highest severity among out-of-bounds conditions, latched or not
    pub severity: Option<Severity>,

    /// Lines for conditions that crossed this cycle and need a notification
    pub notify_lines: Vec<String>,

    /// Lines for every out-of-bounds condition this cycle
    pub active_lines: Vec<String>,

    /// Metrics with no reading this cycle; their latches were left alone
    pub skipped: Vec<MetricKind>,
}

impl Evaluation {
    pub fn should_notify(&self) -> bool {
        !self.notify_lines.is_empty()
    }
}

/// Applies [`ThresholdConfig`] to samples
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    thresholds: ThresholdConfig,
    database_label: String,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: ThresholdConfig, database_label: impl Into<String>) -> Self {
        Self {
            thresholds,
            database_label: database_label.into(),
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// The latch keys this evaluator reads and writes
    pub fn latch_keys() -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = MetricKind::ALL.iter().map(|k| k.key()).collect();
        keys.push(DATABASE_KEY);
        keys
    }

    fn database_line(&self) -> String {
        format!("{} not running!", self.database_label)
    }

    /// Evaluate `sample`, arming and disarming `latches` as conditions
    /// cross and recover
    pub fn evaluate(&self, sample: &MetricSample, latches: &mut AlertState) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for kind in MetricKind::ALL {
            let Some(value) = sample.value(kind) else {
                let error = CollectionError::MetricUnavailable {
                    metric: kind.key().to_string(),
                    reason: "no reading this cycle".to_string(),
                };
                warn!(metric = %kind, "{}; latch left unchanged", error);
                evaluation.skipped.push(kind);
                continue;
            };

            let direction = Direction::for_metric(kind);
            match self.thresholds.bound(kind).severity(value, direction) {
                Some(severity) => {
                    let line = kind.describe(value);
                    evaluation.severity = Severity::max_of(evaluation.severity, Some(severity));
                    if latches.trip(kind.key()) == Transition::Armed {
                        evaluation.notify_lines.push(line.clone());
                    }
                    evaluation.active_lines.push(line);
                }
                None => {
                    latches.clear(kind.key());
                }
            }
        }

        match sample.db_reachable {
            Some(false) => {
                let line = self.database_line();
                evaluation.severity = Some(Severity::Critical);
                if latches.trip(DATABASE_KEY) == Transition::Armed {
                    evaluation.notify_lines.push(line.clone());
                }
                evaluation.active_lines.push(line);
            }
            Some(true) => {
                latches.clear(DATABASE_KEY);
            }
            None => {}
        }

        log_evaluation(&evaluation);
        evaluation
    }

    /// Severity of `sample` without touching any latch
    pub fn classify(&self, sample: &MetricSample) -> Option<Severity> {
        let metric_severity = MetricKind::ALL
            .iter()
            .filter_map(|&kind| {
                let value = sample.value(kind)?;
                self.thresholds.bound(kind).severity(value, Direction::for_metric(kind))
            })
            .max();

        if sample.db_reachable == Some(false) {
            Some(Severity::Critical)
        } else {
            metric_severity
        }
    }
}

fn log_evaluation(evaluation: &Evaluation) {
    match evaluation.severity {
        Some(Severity::Critical) => {
            error!(conditions = ?evaluation.active_lines, "Critical host conditions");
        }
        Some(Severity::Warning) => {
            warn!(conditions = ?evaluation.active_lines, "Warning host conditions");
        }
        None => info!("No warning"),
    }
}
