//! Polling loop and cycle orchestration
//!
//! A cycle collects one sample, evaluates it against the thresholds, checks
//! the watched processes, persists both, and sends at most one resource
//! notification and at most one process notification. If the cycle falls in
//! the daily report window the digest for the previous day goes out too.
//!
//! Anything that escapes a cycle is caught by [`Monitor::run_once_guarded`],
//! reported once through its own latch, and the loop carries on.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveDate, Timelike};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertState, Notification, Severity, Transition};
use crate::collector::{Collector, SystemCollector};
use crate::config::MonitorConfig;
use crate::digest::{DailyDigest, DigestBuilder};
use crate::error::{MonitorError, Result, StorageError};
use crate::notify::{LogNotifier, Notifier, SmtpNotifier};
use crate::process_tracker::{ProcessReport, ProcessStatusTracker};
use crate::sample::MetricSample;
use crate::storage::{CsvStore, Store};
use crate::thresholds::{Evaluation, ThresholdEvaluator};

/// Latch key for faults that escape a cycle
pub const ERROR_KEY: &str = "server watch error";

/// Where a cycle falls relative to the daily report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Polling,
    DailyReportWindow,
}

/// What one cycle did
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub state: CycleState,
    pub evaluation: Evaluation,
    pub processes: ProcessReport,
    pub notifications_sent: usize,
    pub delivery_failures: usize,
    pub digest: Option<DailyDigest>,
}

/// The monitor: collaborators plus the latch maps that persist across cycles
pub struct Monitor {
    config: MonitorConfig,
    collector: Box<dyn Collector>,
    store: Box<dyn Store>,
    notifier: Box<dyn Notifier>,
    evaluator: ThresholdEvaluator,
    tracker: ProcessStatusTracker,
    metric_latches: AlertState,
    process_latches: AlertState,
    error_latches: AlertState,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        collector: Box<dyn Collector>,
        store: Box<dyn Store>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let evaluator = ThresholdEvaluator::new(config.thresholds.clone(), config.database.label.clone());
        let tracker = ProcessStatusTracker::new(config.processes.watch.clone());

        Self {
            metric_latches: AlertState::with_keys(ThresholdEvaluator::latch_keys()),
            process_latches: AlertState::with_keys(tracker.names().iter().cloned()),
            error_latches: AlertState::with_keys([ERROR_KEY]),
            config,
            collector,
            store,
            notifier,
            evaluator,
            tracker,
        }
    }

    /// Wire up the system collector, CSV store and a notifier
    ///
    /// With `dry_run`, or when SMTP is disabled, notifications are logged
    /// instead of sent.
    pub fn from_config(config: MonitorConfig, dry_run: bool) -> Result<Self> {
        let collector = Box::new(SystemCollector::new(&config));
        let store = Box::new(CsvStore::new(config.storage.archive_dir.clone()));
        let notifier: Box<dyn Notifier> = if config.notifications.smtp.enabled && !dry_run {
            Box::new(SmtpNotifier::new(&config.notifications.smtp)?)
        } else {
            info!("Notifications will be logged, not sent");
            Box::new(LogNotifier::new())
        };

        Ok(Self::new(config, collector, store, notifier))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn metric_latches(&self) -> &AlertState {
        &self.metric_latches
    }

    pub fn process_latches(&self) -> &AlertState {
        &self.process_latches
    }

    pub fn error_latches(&self) -> &AlertState {
        &self.error_latches
    }

    /// Minutes past the report hour, inside `(0, poll_interval]`
    pub fn in_report_window(&self, now: DateTime<Local>) -> bool {
        let minutes_of_day = i64::from(now.hour()) * 60 + i64::from(now.minute());
        let gap = minutes_of_day - i64::from(self.config.report.hour) * 60;
        gap > 0 && gap <= self.config.monitor.poll_interval_minutes as i64
    }

    pub fn cycle_state(&self, now: DateTime<Local>) -> CycleState {
        if self.in_report_window(now) {
            CycleState::DailyReportWindow
        } else {
            CycleState::Polling
        }
    }

    /// One sample, evaluate, persist, notify pass
    ///
    /// A failed host sample or a storage failure does not stop the rest of
    /// the cycle; the error is returned once everything else has run.
    pub async fn run_cycle(&mut self, now: DateTime<Local>) -> Result<CycleOutcome> {
        let state = self.cycle_state(now);
        debug!(?state, "Starting cycle");

        let (sample, collection_error) = match self.collector.sample() {
            Ok(sample) => (sample, None),
            Err(e) => {
                warn!("Host sample failed; metric latches left unchanged: {}", e);
                (MetricSample::empty(now), Some(e))
            }
        };
        let evaluation = self.evaluator.evaluate(&sample, &mut self.metric_latches);

        let observations = match self.collector.process_status(self.tracker.names()) {
            Ok(observations) => observations,
            Err(e) => {
                warn!("Process status unavailable; process latches left unchanged: {}", e);
                BTreeMap::new()
            }
        };
        let processes = self.tracker.update(&observations, &mut self.process_latches);

        let mut storage_error: Option<StorageError> = None;
        if collection_error.is_none() {
            if let Err(e) = self.store.append_metric_record(&sample) {
                error!("Failed to record metrics: {}", e);
                storage_error.get_or_insert(e);
            }
        }
        for (name, observation) in &observations {
            if let Err(e) = self.store.append_process_record(name, sample.timestamp, observation) {
                error!(process = %name, "Failed to record process status: {}", e);
                storage_error.get_or_insert(e);
            }
        }

        let mut outcome = CycleOutcome {
            state,
            evaluation,
            processes,
            notifications_sent: 0,
            delivery_failures: 0,
            digest: None,
        };

        let server = self.config.monitor.server_name.clone();
        let mut pending = Vec::new();
        if outcome.evaluation.should_notify() {
            let severity = outcome.evaluation.severity.unwrap_or(Severity::Warning);
            pending.push(Notification::resources(
                &server,
                severity,
                outcome.evaluation.notify_lines.clone(),
            ));
        }
        if outcome.processes.should_notify() {
            pending.push(Notification::broken_processes(&server, outcome.processes.notify_lines()));
        }

        for notification in &pending {
            if self.deliver(DeliveryList::Warning, notification).await {
                outcome.notifications_sent += 1;
            } else {
                outcome.delivery_failures += 1;
            }
        }

        if state == CycleState::DailyReportWindow && self.config.report.enabled {
            let yesterday = now.date_naive() - Days::new(1);
            match self.send_digest(yesterday).await {
                Ok((digest, delivered)) => {
                    if delivered {
                        outcome.notifications_sent += 1;
                    } else {
                        outcome.delivery_failures += 1;
                    }
                    outcome.digest = Some(digest);
                }
                Err(e) => {
                    storage_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = collection_error {
            return Err(MonitorError::Collection(e));
        }
        match storage_error {
            Some(e) => Err(MonitorError::Storage(e)),
            None => Ok(outcome),
        }
    }

    /// Run a cycle, turning any escaped fault into a latched error notification
    pub async fn run_once_guarded(&mut self, now: DateTime<Local>) -> Option<CycleOutcome> {
        match self.run_cycle(now).await {
            Ok(outcome) => {
                if self.error_latches.clear(ERROR_KEY) {
                    info!("Cycle succeeded; error notification re-armed");
                }
                Some(outcome)
            }
            Err(e) => {
                let failure = MonitorError::CycleFailed(e.to_string());
                error!(
                    category = e.category(),
                    recoverable = e.is_recoverable(),
                    "{}: {:?}",
                    failure,
                    e
                );

                if self.error_latches.trip(ERROR_KEY) == Transition::Armed {
                    let notification =
                        Notification::monitor_error(&self.config.monitor.server_name, &e.to_string());
                    self.deliver(DeliveryList::Warning, &notification).await;
                }
                None
            }
        }
    }

    /// Build the digest for `date` and send it to the digest recipients
    ///
    /// Returns the digest and whether it was delivered.
    pub async fn send_digest(&mut self, date: NaiveDate) -> std::result::Result<(DailyDigest, bool), StorageError> {
        let builder = DigestBuilder::new(
            &self.evaluator,
            self.config.report.delete_process_logs_after_summary,
        );
        let digest = builder.build(self.store.as_mut(), self.tracker.names(), date)?;

        let notification = digest.notification(&self.config.monitor.server_name);
        let delivered = self.deliver(DeliveryList::Digest, &notification).await;
        if delivered {
            info!(%date, status = digest.status_label(), "Daily digest sent");
        }
        Ok((digest, delivered))
    }

    async fn deliver(&self, list: DeliveryList, notification: &Notification) -> bool {
        let recipients = match list {
            DeliveryList::Warning => &self.config.notifications.warning_recipients,
            DeliveryList::Digest => &self.config.notifications.digest_recipients,
        };

        match self.notifier.send(recipients, notification).await {
            Ok(()) => true,
            Err(e) => {
                error!(subject = %notification.subject, "Notification not delivered: {}", e);
                false
            }
        }
    }

    /// Poll until SIGINT or SIGTERM
    pub async fn run(&mut self) -> Result<()> {
        let poll = Duration::from_secs(self.config.monitor.poll_interval_minutes.saturating_mul(60));
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        info!(
            server = %self.config.monitor.server_name,
            poll_minutes = self.config.monitor.poll_interval_minutes,
            report_hour = self.config.report.hour,
            processes = self.tracker.names().len(),
            "Monitor started"
        );

        loop {
            self.run_once_guarded(Local::now()).await;

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, stopping monitor");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, stopping monitor");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum DeliveryList {
    Warning,
    Digest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectionError, CollectionResult, DeliveryError, DeliveryResult};
    use crate::process_tracker::ProcessObservation;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct ScriptedCollector {
        samples: VecDeque<CollectionResult<MetricSample>>,
    }

    impl Collector for ScriptedCollector {
        fn sample(&mut self) -> CollectionResult<MetricSample> {
            self.samples.pop_front().unwrap_or_else(|| Ok(MetricSample::empty(Local::now())))
        }

        fn process_status(
            &mut self,
            _names: &[String],
        ) -> CollectionResult<BTreeMap<String, ProcessObservation>> {
            Ok(BTreeMap::new())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(Vec<String>, Notification)>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, recipients: &[String], notification: &Notification) -> DeliveryResult<()> {
            self.sent.lock().unwrap().push((recipients.to_vec(), notification.clone()));
            if self.fail {
                Err(DeliveryError::Transport("relay down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn cpu(value: f64) -> CollectionResult<MetricSample> {
        Ok(MetricSample {
            cpu_pct: Some(value),
            ram_pct: Some(10.0),
            disk_free_gb: Some(500.0),
            disk_pct_used: Some(20.0),
            boot_pct_used: Some(10.0),
            ..MetricSample::empty(Local::now())
        })
    }

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.monitor.server_name = "db01".to_string();
        config.notifications.warning_recipients = vec!["ops@example.com".to_string()];
        config.notifications.digest_recipients = vec!["boss@example.com".to_string()];
        config
    }

    fn monitor(
        dir: &TempDir,
        samples: Vec<CollectionResult<MetricSample>>,
        recorder: &Recorder,
    ) -> Monitor {
        Monitor::new(
            config(),
            Box::new(ScriptedCollector { samples: samples.into() }),
            Box::new(CsvStore::new(dir.path())),
            Box::new(recorder.clone()),
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn test_report_window_bounds() {
        let dir = TempDir::new().unwrap();
        let m = monitor(&dir, vec![], &Recorder::default());

        assert!(!m.in_report_window(at(1, 59)));
        assert!(!m.in_report_window(at(2, 0)));
        assert!(m.in_report_window(at(2, 1)));
        assert!(m.in_report_window(at(2, 15)));
        assert!(!m.in_report_window(at(2, 16)));
        assert_eq!(m.cycle_state(at(2, 10)), CycleState::DailyReportWindow);
        assert_eq!(m.cycle_state(at(14, 10)), CycleState::Polling);
    }

    #[tokio::test]
    async fn test_cpu_sequence_notifies_on_transitions_only() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::default();
        let mut m = monitor(
            &dir,
            vec![cpu(85.0), cpu(85.0), cpu(95.0), cpu(70.0), cpu(92.0)],
            &recorder,
        );

        let mut sent_per_cycle = Vec::new();
        for _ in 0..5 {
            let outcome = m.run_once_guarded(at(10, 0)).await.unwrap();
            sent_per_cycle.push(outcome.notifications_sent);
        }
        assert_eq!(sent_per_cycle, vec![1, 0, 0, 0, 1]);

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0].1.subject, "db01: Warning computer resources");
        assert_eq!(sent[0].0, vec!["ops@example.com".to_string()]);
        assert_eq!(sent[1].1.subject, "db01: Critical computer resources");
    }

    #[tokio::test]
    async fn test_cycle_error_notifies_once_until_success() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::default();
        let failure = || {
            Err(CollectionError::MetricUnavailable {
                metric: "host".to_string(),
                reason: "gone".to_string(),
            })
        };
        let mut m = monitor(&dir, vec![failure(), failure(), cpu(10.0), failure()], &recorder);

        assert!(m.run_once_guarded(at(10, 0)).await.is_none());
        assert!(m.run_once_guarded(at(10, 15)).await.is_none());
        assert!(m.error_latches().is_armed(ERROR_KEY));
        assert!(m.run_once_guarded(at(10, 30)).await.is_some());
        assert!(!m.error_latches().is_armed(ERROR_KEY));
        assert!(m.run_once_guarded(at(10, 45)).await.is_none());

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|(_, n)| n.subject == "db01: Critical - server watch error"));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_latch_and_cycle() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut m = monitor(&dir, vec![cpu(95.0), cpu(95.0)], &recorder);

        let first = m.run_once_guarded(at(10, 0)).await.unwrap();
        assert_eq!(first.delivery_failures, 1);
        assert!(m.metric_latches().is_armed("CPU"));

        let second = m.run_once_guarded(at(10, 15)).await.unwrap();
        assert_eq!(second.delivery_failures, 0);
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_digest_sent_in_window() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::default();
        let mut m = monitor(&dir, vec![cpu(10.0)], &recorder);

        let outcome = m.run_once_guarded(at(2, 10)).await.unwrap();
        assert_eq!(outcome.state, CycleState::DailyReportWindow);
        let digest = outcome.digest.unwrap();
        assert_eq!(digest.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let sent = recorder.sent.lock().unwrap();
        let (recipients, notification) = sent.last().unwrap();
        assert_eq!(recipients, &vec!["boss@example.com".to_string()]);
        assert_eq!(notification.subject, "db01: Status Warning");
        assert!(notification.body().contains("**No stats"));
    }

    #[tokio::test]
    async fn test_digest_disabled() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::default();
        let mut config = config();
        config.report.enabled = false;
        let mut m = Monitor::new(
            config,
            Box::new(ScriptedCollector { samples: vec![cpu(10.0)].into() }),
            Box::new(CsvStore::new(dir.path())),
            Box::new(recorder.clone()),
        );

        let outcome = m.run_once_guarded(at(2, 10)).await.unwrap();
        assert!(outcome.digest.is_none());
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_starts_with_clear_latches() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::default();

        let mut before = monitor(&dir, vec![cpu(95.0)], &recorder);
        before.run_once_guarded(at(10, 0)).await.unwrap();
        drop(before);

        let mut after = monitor(&dir, vec![cpu(95.0)], &recorder);
        assert!(!after.metric_latches().is_armed("CPU"));
        after.run_once_guarded(at(10, 15)).await.unwrap();

        // The condition never recovered, yet it is reported again after the restart
        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }
}
