//! Daily digest of the previous day's readings
//!
//! Host metrics are condensed to one figure each: CPU and RAM are averaged
//! over the day, the disk figures are the last reading. Each watched process
//! gets one summary row, which is also appended to its `summary.csv`. The
//! digest status is the threshold classification of the day's figures; a
//! day with no history at all is reported as a warning.

use chrono::{Local, NaiveDate, TimeZone};
use tracing::{info, warn};

use crate::alert::{Notification, Severity};
use crate::error::StorageResult;
use crate::sample::{round2, MetricSample};
use crate::storage::{MetricRow, ProcessRow, ProcessSummaryRow, Store};
use crate::thresholds::ThresholdEvaluator;

/// One figure per host metric for a whole day
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDaySummary {
    pub rows: usize,
    pub cpu_pct: Option<f64>,
    pub ram_pct: Option<f64>,
    pub disk_pct_used: Option<f64>,
    pub disk_free_gb: Option<f64>,
    pub boot_pct_used: Option<f64>,
}

impl MetricDaySummary {
    /// `None` when there are no rows
    pub fn from_rows(rows: &[MetricRow]) -> Option<Self> {
        let last = rows.last()?;
        Some(Self {
            rows: rows.len(),
            cpu_pct: mean(rows.iter().filter_map(|r| r.cpu_pct)),
            ram_pct: mean(rows.iter().filter_map(|r| r.ram_pct)),
            disk_pct_used: last.disk_pct_used,
            disk_free_gb: last.disk_free_gb,
            boot_pct_used: last.boot_pct_used,
        })
    }

    /// The summary as a sample, for threshold classification
    pub fn as_sample(&self, date: NaiveDate) -> MetricSample {
        let timestamp = date
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            .unwrap_or_else(Local::now);

        MetricSample {
            timestamp,
            cpu_pct: self.cpu_pct,
            ram_pct: self.ram_pct,
            disk_free_gb: self.disk_free_gb,
            disk_pct_used: self.disk_pct_used,
            boot_pct_used: self.boot_pct_used,
            db_reachable: None,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("% CPU use: {}", percent(self.cpu_pct)),
            format!("% RAM used: {}", percent(self.ram_pct)),
            format!("% hard drive used: {}", percent(self.disk_pct_used)),
            format!("free hard drive space (GB): {}", plain(self.disk_free_gb)),
            format!("% boot drive used: {}", percent(self.boot_pct_used)),
        ]
    }
}

/// Host metric section of the digest
#[derive(Debug, Clone, PartialEq)]
pub enum MetricDigest {
    NoLogFile,
    NoData { date: NaiveDate },
    Summary(MetricDaySummary),
}

impl MetricDigest {
    pub fn lines(&self) -> Vec<String> {
        match self {
            MetricDigest::NoLogFile => vec!["**No stats log file!**".to_string()],
            MetricDigest::NoData { date } => vec![format!("**No stats information for {}**", date)],
            MetricDigest::Summary(summary) => summary.lines(),
        }
    }
}

/// One watched process's section of the digest
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessDigest {
    NoLogFile { date: NaiveDate },
    Summary(ProcessSummaryRow),
}

impl ProcessDigest {
    pub fn line(&self, name: &str) -> String {
        match self {
            ProcessDigest::NoLogFile { date } => format!("{}: **No log file for {}**", name, date),
            ProcessDigest::Summary(row) => format!(
                "{}: status {}, started {}, memory {}G ({}), cpu {}",
                name,
                row.status,
                row.create_time
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "None found".to_string()),
                plain(row.memory_info),
                percent(row.memory_percent),
                percent(row.cpu_percent),
            ),
        }
    }
}

/// Everything that goes into one daily digest
#[derive(Debug, Clone, PartialEq)]
pub struct DailyDigest {
    pub date: NaiveDate,
    /// `None` reads as OK
    pub status: Option<Severity>,
    pub metrics: MetricDigest,
    pub processes: Vec<(String, ProcessDigest)>,
}

impl DailyDigest {
    pub fn status_label(&self) -> &'static str {
        self.status.map_or("OK", |s| s.as_str())
    }

    pub fn lines(&self, server: &str) -> Vec<String> {
        let mut lines = vec![format!("{} status report for {}", server, self.date), String::new()];
        lines.extend(self.metrics.lines());

        if !self.processes.is_empty() {
            lines.push(String::new());
            lines.extend(self.processes.iter().map(|(name, digest)| digest.line(name)));
        }
        lines
    }

    pub fn notification(&self, server: &str) -> Notification {
        Notification::daily_status(server, self.status, self.lines(server))
    }
}

/// Assembles [`DailyDigest`]s from the stored logs
pub struct DigestBuilder<'a> {
    evaluator: &'a ThresholdEvaluator,
    delete_process_logs: bool,
}

impl<'a> DigestBuilder<'a> {
    pub fn new(evaluator: &'a ThresholdEvaluator, delete_process_logs: bool) -> Self {
        Self {
            evaluator,
            delete_process_logs,
        }
    }

    /// Build the digest for `date`, writing process summaries as a side effect
    pub fn build(
        &self,
        store: &mut dyn Store,
        processes: &[String],
        date: NaiveDate,
    ) -> StorageResult<DailyDigest> {
        let metrics = match store.read_metric_rows(date) {
            Ok(rows) => match MetricDaySummary::from_rows(&rows) {
                Some(summary) => MetricDigest::Summary(summary),
                None => MetricDigest::NoData { date },
            },
            Err(e) if e.is_missing_data() => MetricDigest::NoLogFile,
            Err(e) => return Err(e),
        };

        let status = match &metrics {
            MetricDigest::Summary(summary) => self.evaluator.classify(&summary.as_sample(date)),
            MetricDigest::NoLogFile | MetricDigest::NoData { .. } => {
                warn!(%date, "{}", metrics.lines().join(" "));
                Some(Severity::Warning)
            }
        };

        let mut process_digests = Vec::with_capacity(processes.len());
        for name in processes {
            let digest = self.summarize_process(store, name, date)?;
            process_digests.push((name.clone(), digest));
        }

        let digest = DailyDigest {
            date,
            status,
            metrics,
            processes: process_digests,
        };
        info!(%date, status = digest.status_label(), "Daily digest assembled");
        Ok(digest)
    }

    fn summarize_process(
        &self,
        store: &mut dyn Store,
        name: &str,
        date: NaiveDate,
    ) -> StorageResult<ProcessDigest> {
        let rows = match store.read_process_rows(name, date) {
            Ok(rows) => rows,
            Err(e) if e.is_missing_data() => {
                warn!(process = %name, %date, "No process log for the day");
                return Ok(ProcessDigest::NoLogFile { date });
            }
            Err(e) => return Err(e),
        };

        let Some(row) = summarize_rows(&rows, date) else {
            warn!(process = %name, %date, "Process log has no rows");
            return Ok(ProcessDigest::NoLogFile { date });
        };

        store.append_process_summary(name, &row)?;

        if self.delete_process_logs {
            if let Err(e) = store.remove_process_log(name, date) {
                warn!(process = %name, %date, "Failed to remove daily process log: {}", e);
            }
        }

        Ok(ProcessDigest::Summary(row))
    }
}

/// Collapse one day of process rows; `None` when there are no rows
pub fn summarize_rows(rows: &[ProcessRow], date: NaiveDate) -> Option<ProcessSummaryRow> {
    let last = rows.last()?;
    Some(ProcessSummaryRow {
        report_date: date,
        status: last.status.clone(),
        create_time: rows.iter().rev().find_map(|r| r.create_time),
        memory_info: mean(rows.iter().filter_map(|r| r.memory_info)),
        memory_percent: mean(rows.iter().filter_map(|r| r.memory_percent)),
        cpu_percent: mean(rows.iter().filter_map(|r| r.cpu_percent)),
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| round2(sum / count as f64))
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{}%", v))
}

fn plain(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}
