//! Append-only CSV logs for host readings and process status
//!
//! Layout under the archive directory:
//!
//! ```text
//! stats_log.csv                    one row per cycle
//! processes/<name>/<YYYY-MM-DD>.csv one row per cycle per watched process
//! processes/<name>/summary.csv     one row per summarized day
//! ```
//!
//! Each file gets its header row when it is created.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::process_tracker::ProcessObservation;
use crate::sample::MetricSample;

const STATS_LOG: &str = "stats_log.csv";
const PROCESS_DIR: &str = "processes";
const SUMMARY_LOG: &str = "summary.csv";

const METRIC_HEADER: [&str; 6] = [
    "time",
    "% CPU use",
    "% RAM used",
    "% hard drive used",
    "free hard drive space (GB)",
    "% boot drive used",
];

const PROCESS_HEADER: [&str; 7] = [
    "report_time",
    "status",
    "create_time",
    "memory_info",
    "memory_percent",
    "username",
    "cpu_percent",
];

const SUMMARY_HEADER: [&str; 6] = [
    "report_date",
    "status",
    "create_time",
    "memory_info",
    "memory_percent",
    "cpu_percent",
];

/// One row of `stats_log.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    #[serde(rename = "time")]
    pub time: NaiveDateTime,
    #[serde(rename = "% CPU use")]
    pub cpu_pct: Option<f64>,
    #[serde(rename = "% RAM used")]
    pub ram_pct: Option<f64>,
    #[serde(rename = "% hard drive used")]
    pub disk_pct_used: Option<f64>,
    #[serde(rename = "free hard drive space (GB)")]
    pub disk_free_gb: Option<f64>,
    #[serde(rename = "% boot drive used")]
    pub boot_pct_used: Option<f64>,
}

impl From<&MetricSample> for MetricRow {
    fn from(sample: &MetricSample) -> Self {
        Self {
            time: sample.timestamp.naive_local().trunc_subsecs(0),
            cpu_pct: sample.cpu_pct,
            ram_pct: sample.ram_pct,
            disk_pct_used: sample.disk_pct_used,
            disk_free_gb: sample.disk_free_gb,
            boot_pct_used: sample.boot_pct_used,
        }
    }
}

/// One row of a daily process log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRow {
    pub report_time: NaiveTime,
    pub status: String,
    pub create_time: Option<NaiveDateTime>,
    /// Resident set size in GB
    pub memory_info: Option<f64>,
    pub memory_percent: Option<f64>,
    pub username: String,
    pub cpu_percent: Option<f64>,
}

impl ProcessRow {
    pub fn new(report_time: DateTime<Local>, observation: &ProcessObservation) -> Self {
        let report_time = report_time.time().trunc_subsecs(0);
        let status = observation.status_label().to_string();
        match observation {
            ProcessObservation::Running(info) => Self {
                report_time,
                status,
                create_time: Some(info.create_time.naive_local().trunc_subsecs(0)),
                memory_info: Some(info.rss_gb),
                memory_percent: Some(info.mem_pct),
                username: info.user.clone(),
                cpu_percent: Some(info.cpu_pct),
            },
            ProcessObservation::NotRunning | ProcessObservation::Ambiguous { .. } => Self {
                report_time,
                status,
                create_time: None,
                memory_info: None,
                memory_percent: None,
                username: String::new(),
                cpu_percent: None,
            },
        }
    }
}

/// One row of a process `summary.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummaryRow {
    pub report_date: NaiveDate,
    pub status: String,
    pub create_time: Option<NaiveDateTime>,
    pub memory_info: Option<f64>,
    pub memory_percent: Option<f64>,
    pub cpu_percent: Option<f64>,
}

/// Persistence for readings and daily rollups
pub trait Store: Send {
    fn append_metric_record(&mut self, sample: &MetricSample) -> StorageResult<()>;

    fn append_process_record(
        &mut self,
        name: &str,
        report_time: DateTime<Local>,
        observation: &ProcessObservation,
    ) -> StorageResult<()>;

    /// Metric rows recorded on `date`; `MissingData` when no log exists
    fn read_metric_rows(&self, date: NaiveDate) -> StorageResult<Vec<MetricRow>>;

    /// Rows of the daily log for `name` on `date`; `MissingData` when absent
    fn read_process_rows(&self, name: &str, date: NaiveDate) -> StorageResult<Vec<ProcessRow>>;

    fn append_process_summary(&mut self, name: &str, row: &ProcessSummaryRow) -> StorageResult<()>;

    fn remove_process_log(&mut self, name: &str, date: NaiveDate) -> StorageResult<()>;
}

/// CSV files under an archive directory
#[derive(Debug, Clone)]
pub struct CsvStore {
    archive_dir: PathBuf,
}

impl CsvStore {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn stats_log_path(&self) -> PathBuf {
        self.archive_dir.join(STATS_LOG)
    }

    /// Directory for one process; path separators in the name are replaced
    pub fn process_dir(&self, name: &str) -> PathBuf {
        let safe_name = name.replace(['/', '\\'], "_");
        self.archive_dir.join(PROCESS_DIR).join(safe_name)
    }

    pub fn process_log_path(&self, name: &str, date: NaiveDate) -> PathBuf {
        self.process_dir(name).join(format!("{}.csv", date.format("%Y-%m-%d")))
    }

    pub fn summary_path(&self, name: &str) -> PathBuf {
        self.process_dir(name).join(SUMMARY_LOG)
    }

    fn csv_error(path: &Path, error: csv::Error) -> StorageError {
        StorageError::Csv {
            path: path.display().to_string(),
            reason: error.to_string(),
        }
    }

    /// Append `row` to `path`, writing `header` first if the file is new
    fn append_row<T: Serialize>(path: &Path, header: &[&str], row: &T) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| StorageError::DirectoryCreationFailed {
                path: parent.display().to_string(),
            })?;
        }

        let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if is_new {
            writer.write_record(header).map_err(|e| Self::csv_error(path, e))?;
        }
        writer.serialize(row).map_err(|e| Self::csv_error(path, e))?;
        writer.flush()?;
        Ok(())
    }

    /// Read every parseable row of `path`; malformed rows are logged and skipped
    fn read_rows<T: DeserializeOwned>(path: &Path, what: &str) -> StorageResult<Vec<T>> {
        if !path.is_file() {
            return Err(StorageError::MissingData {
                what: what.to_string(),
                path: path.display().to_string(),
            });
        }

        let file = File::open(path)?;
        let mut reader = csv::Reader::from_reader(file);
        let mut rows = Vec::new();
        for (index, result) in reader.deserialize::<T>().enumerate() {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => warn!(path = %path.display(), row = index + 1, "Skipping malformed row: {}", e),
            }
        }
        Ok(rows)
    }
}

impl Store for CsvStore {
    fn append_metric_record(&mut self, sample: &MetricSample) -> StorageResult<()> {
        let path = self.stats_log_path();
        Self::append_row(&path, &METRIC_HEADER, &MetricRow::from(sample))?;
        debug!(path = %path.display(), "Metric record appended");
        Ok(())
    }

    fn append_process_record(
        &mut self,
        name: &str,
        report_time: DateTime<Local>,
        observation: &ProcessObservation,
    ) -> StorageResult<()> {
        let path = self.process_log_path(name, report_time.date_naive());
        Self::append_row(&path, &PROCESS_HEADER, &ProcessRow::new(report_time, observation))
    }

    fn read_metric_rows(&self, date: NaiveDate) -> StorageResult<Vec<MetricRow>> {
        let rows: Vec<MetricRow> = Self::read_rows(&self.stats_log_path(), "stats log")?;
        Ok(rows.into_iter().filter(|row| row.time.date() == date).collect())
    }

    fn read_process_rows(&self, name: &str, date: NaiveDate) -> StorageResult<Vec<ProcessRow>> {
        Self::read_rows(&self.process_log_path(name, date), "process log")
    }

    fn append_process_summary(&mut self, name: &str, row: &ProcessSummaryRow) -> StorageResult<()> {
        Self::append_row(&self.summary_path(name), &SUMMARY_HEADER, row)
    }

    fn remove_process_log(&mut self, name: &str, date: NaiveDate) -> StorageResult<()> {
        let path = self.process_log_path(name, date);
        fs::remove_file(&path)?;
        debug!(path = %path.display(), "Daily process log removed");
        Ok(())
    }
}
