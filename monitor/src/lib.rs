//! Hostwatch host-health monitor library
//!
//! Samples CPU, memory and disk utilization on a fixed interval, checks that
//! a set of named processes and a database are alive, logs every reading to
//! CSV, and raises latched threshold notifications so a condition that
//! persists is reported once rather than on every cycle. A daily digest
//! summarizes the previous day.

pub mod alert;
pub mod collector;
pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod notify;
pub mod process_tracker;
pub mod sample;
pub mod scheduler;
pub mod storage;
pub mod thresholds;

// Re-export commonly used types
pub use alert::{AlertState, Notification, Severity, Transition};
pub use collector::{Collector, DatabaseProbe, SystemCollector};
pub use config::MonitorConfig;
pub use digest::{DailyDigest, DigestBuilder};
pub use error::{MonitorError, Result};
pub use notify::{LogNotifier, Notifier, SmtpNotifier};
pub use process_tracker::{ProcessInfo, ProcessObservation, ProcessReport, ProcessStatusTracker};
pub use sample::{MetricKind, MetricSample};
pub use scheduler::{CycleOutcome, CycleState, Monitor};
pub use storage::{CsvStore, Store};
pub use thresholds::{Bound, Direction, Evaluation, ThresholdConfig, ThresholdEvaluator};
