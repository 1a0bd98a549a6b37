use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveDate};
use hostwatch::error::{StorageError, StorageResult};
use hostwatch::storage::{MetricRow, ProcessRow, ProcessSummaryRow};
use hostwatch::{MetricSample, ProcessObservation, Store};

#[derive(Default)]
struct Inner {
    metrics: Vec<MetricRow>,
    processes: BTreeMap<(String, NaiveDate), Vec<ProcessRow>>,
    summaries: BTreeMap<String, Vec<ProcessSummaryRow>>,
}

/// In-memory store; clones share the same data
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with an I/O error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn metric_rows(&self) -> Vec<MetricRow> {
        self.inner.lock().unwrap().metrics.clone()
    }

    pub fn process_rows(&self, name: &str, date: NaiveDate) -> Vec<ProcessRow> {
        self.inner
            .lock()
            .unwrap()
            .processes
            .get(&(name.to_string(), date))
            .cloned()
            .unwrap_or_default()
    }

    pub fn summaries(&self, name: &str) -> Vec<ProcessSummaryRow> {
        self.inner
            .lock()
            .unwrap()
            .summaries
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a metric row directly
    pub fn insert_metric_row(&self, row: MetricRow) {
        self.inner.lock().unwrap().metrics.push(row);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "archive is read-only",
            )));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn append_metric_record(&mut self, sample: &MetricSample) -> StorageResult<()> {
        self.check_writable()?;
        self.inner.lock().unwrap().metrics.push(MetricRow::from(sample));
        Ok(())
    }

    fn append_process_record(
        &mut self,
        name: &str,
        report_time: DateTime<Local>,
        observation: &ProcessObservation,
    ) -> StorageResult<()> {
        self.check_writable()?;
        self.inner
            .lock()
            .unwrap()
            .processes
            .entry((name.to_string(), report_time.date_naive()))
            .or_default()
            .push(ProcessRow::new(report_time, observation));
        Ok(())
    }

    fn read_metric_rows(&self, date: NaiveDate) -> StorageResult<Vec<MetricRow>> {
        let inner = self.inner.lock().unwrap();
        if inner.metrics.is_empty() {
            return Err(StorageError::MissingData {
                what: "stats log".to_string(),
                path: "memory".to_string(),
            });
        }
        Ok(inner
            .metrics
            .iter()
            .filter(|row| row.time.date() == date)
            .cloned()
            .collect())
    }

    fn read_process_rows(&self, name: &str, date: NaiveDate) -> StorageResult<Vec<ProcessRow>> {
        self.inner
            .lock()
            .unwrap()
            .processes
            .get(&(name.to_string(), date))
            .cloned()
            .ok_or_else(|| StorageError::MissingData {
                what: "process log".to_string(),
                path: format!("memory/{}/{}", name, date),
            })
    }

    fn append_process_summary(&mut self, name: &str, row: &ProcessSummaryRow) -> StorageResult<()> {
        self.check_writable()?;
        self.inner
            .lock()
            .unwrap()
            .summaries
            .entry(name.to_string())
            .or_default()
            .push(row.clone());
        Ok(())
    }

    fn remove_process_log(&mut self, name: &str, date: NaiveDate) -> StorageResult<()> {
        self.check_writable()?;
        self.inner
            .lock()
            .unwrap()
            .processes
            .remove(&(name.to_string(), date));
        Ok(())
    }
}
