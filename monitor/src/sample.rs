//! Point-in-time host readings

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// The scalar host metrics that carry thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Cpu,
    Ram,
    DiskFree,
    BootUsage,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Cpu,
        MetricKind::Ram,
        MetricKind::DiskFree,
        MetricKind::BootUsage,
    ];

    /// Latch key for this metric
    pub fn key(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Ram => "RAM",
            MetricKind::DiskFree => "Hard drive space",
            MetricKind::BootUsage => "Boot drive space",
        }
    }

    /// Human-readable line for an out-of-bounds reading
    pub fn describe(&self, value: f64) -> String {
        match self {
            MetricKind::Cpu => format!("CPU usage is at {}%", value),
            MetricKind::Ram => format!("RAM usage is at {}%", value),
            MetricKind::DiskFree => format!("Hard drive free space is down to {}G", value),
            MetricKind::BootUsage => format!("Boot drive usage is at {}%", value),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One snapshot of host utilization
///
/// A `None` reading means the collector could not obtain that metric this
/// cycle. `db_reachable` is `None` when the database check is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Local>,
    pub cpu_pct: Option<f64>,
    pub ram_pct: Option<f64>,
    pub disk_free_gb: Option<f64>,
    pub disk_pct_used: Option<f64>,
    pub boot_pct_used: Option<f64>,
    pub db_reachable: Option<bool>,
}

impl MetricSample {
    /// A sample with no readings, to be filled in by a collector
    pub fn empty(timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            cpu_pct: None,
            ram_pct: None,
            disk_free_gb: None,
            disk_pct_used: None,
            boot_pct_used: None,
            db_reachable: None,
        }
    }

    /// The reading that carries the threshold for `kind`
    pub fn value(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Cpu => self.cpu_pct,
            MetricKind::Ram => self.ram_pct,
            MetricKind::DiskFree => self.disk_free_gb,
            MetricKind::BootUsage => self.boot_pct_used,
        }
    }
}

/// Round to two decimal places, the precision readings are stored at
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
