//! Host metric and process status collection
//!
//! [`Collector`] is the seam between the alerting engine and the operating
//! system. [`SystemCollector`] implements it on top of `sysinfo`; tests use
//! scripted collectors instead.

use std::collections::BTreeMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, TimeZone};
use sysinfo::{
    Disk, Disks, Pid, Process, ProcessRefreshKind, System, UpdateKind, Users, MINIMUM_CPU_UPDATE_INTERVAL,
};
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::{CollectionError, CollectionResult};
use crate::process_tracker::{ProcessInfo, ProcessObservation};
use crate::sample::{round2, MetricSample};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of host readings
pub trait Collector: Send {
    /// Take one snapshot of host utilization
    ///
    /// Individual metrics that cannot be read come back as `None`; an `Err`
    /// means nothing could be sampled at all.
    fn sample(&mut self) -> CollectionResult<MetricSample>;

    /// Look up each watched name in the process table
    fn process_status(
        &mut self,
        names: &[String],
    ) -> CollectionResult<BTreeMap<String, ProcessObservation>>;
}

/// TCP reachability check for the database service
#[derive(Debug, Clone)]
pub struct DatabaseProbe {
    address: String,
    timeout: Duration,
}

impl DatabaseProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Whether any resolved address accepts a connection within the timeout
    pub fn is_reachable(&self) -> bool {
        let addrs = match self.address.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(address = %self.address, "Database address did not resolve: {}", e);
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return true,
                Err(e) => debug!(%addr, "Database connect failed: {}", e),
            }
        }
        false
    }
}

/// `sysinfo`-backed collector
pub struct SystemCollector {
    system: System,
    disks: Disks,
    users: Users,
    root_path: PathBuf,
    boot_path: PathBuf,
    cpu_settle: Duration,
    database: Option<DatabaseProbe>,
    own_pid: Option<Pid>,
}

impl SystemCollector {
    pub fn new(config: &MonitorConfig) -> Self {
        let database = config.database.enabled.then(|| {
            DatabaseProbe::new(
                config.database.address.clone(),
                Duration::from_secs(config.database.timeout_secs),
            )
        });

        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            users: Users::new_with_refreshed_list(),
            root_path: config.storage.root_path.clone(),
            boot_path: config.storage.boot_path.clone(),
            cpu_settle: Duration::from_secs(config.monitor.cpu_settle_secs)
                .max(MINIMUM_CPU_UPDATE_INTERVAL),
            database,
            own_pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Busy percentage across all cores
    ///
    /// The first refresh only establishes a baseline; the counters need to
    /// settle before the second refresh gives a meaningful figure, so this
    /// blocks the cycle for `cpu_settle`.
    fn cpu_pct(&mut self) -> f64 {
        self.system.refresh_cpu();
        std::thread::sleep(self.cpu_settle);
        self.system.refresh_cpu();
        round2(self.system.global_cpu_info().cpu_usage() as f64)
    }

    fn ram_pct(&mut self) -> CollectionResult<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectionError::MetricUnavailable {
                metric: "RAM".to_string(),
                reason: "total memory reported as zero".to_string(),
            });
        }
        Ok(round2(self.system.used_memory() as f64 / total as f64 * 100.0))
    }

    /// The disk holding `path`: the one with the longest mount point prefix
    fn disk_for<'a>(disks: &'a Disks, path: &Path) -> CollectionResult<&'a Disk> {
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| CollectionError::MountNotFound {
                path: path.display().to_string(),
            })
    }

    fn pct_used(disk: &Disk) -> CollectionResult<f64> {
        let total = disk.total_space();
        if total == 0 {
            return Err(CollectionError::MetricUnavailable {
                metric: disk.mount_point().display().to_string(),
                reason: "disk reports zero capacity".to_string(),
            });
        }
        let used = total.saturating_sub(disk.available_space());
        Ok(round2(used as f64 / total as f64 * 100.0))
    }

    /// Processes whose name or command line contains `pattern`
    ///
    /// On Linux each thread is listed as its own entry; only thread group
    /// leaders count.
    fn matching_processes(&self, pattern: &str) -> Vec<&Process> {
        self.system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != self.own_pid)
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| {
                process.name().contains(pattern) || process.cmd().join(" ").contains(pattern)
            })
            .map(|(_, process)| process)
            .collect()
    }

    fn describe_process(&self, process: &Process) -> ProcessInfo {
        let total_memory = self.system.total_memory();
        let mem_pct = if total_memory == 0 {
            0.0
        } else {
            process.memory() as f64 / total_memory as f64 * 100.0
        };
        let create_time = Local
            .timestamp_opt(process.start_time() as i64, 0)
            .single()
            .unwrap_or_else(Local::now);
        let user = process
            .user_id()
            .and_then(|uid| self.users.get_user_by_id(uid))
            .map(|user| user.name().to_string())
            .unwrap_or_default();

        ProcessInfo {
            create_time,
            rss_gb: round2(process.memory() as f64 / BYTES_PER_GB),
            mem_pct: round2(mem_pct),
            cpu_pct: round2(process.cpu_usage() as f64),
            user,
        }
    }
}

impl Collector for SystemCollector {
    fn sample(&mut self) -> CollectionResult<MetricSample> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(CollectionError::MetricUnavailable {
                metric: "host".to_string(),
                reason: "platform not supported by sysinfo".to_string(),
            });
        }

        let mut sample = MetricSample::empty(Local::now());
        sample.cpu_pct = Some(self.cpu_pct());

        sample.ram_pct = match self.ram_pct() {
            Ok(pct) => Some(pct),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

        self.disks.refresh_list();
        match Self::disk_for(&self.disks, &self.root_path) {
            Ok(disk) => {
                sample.disk_free_gb = Some(round2(disk.available_space() as f64 / BYTES_PER_GB));
                sample.disk_pct_used = Self::pct_used(disk)
                    .map_err(|e| warn!("{}", e))
                    .ok();
            }
            Err(e) => warn!("{}", e),
        }

        sample.boot_pct_used = Self::disk_for(&self.disks, &self.boot_path)
            .and_then(Self::pct_used)
            .map_err(|e| warn!("{}", e))
            .ok();

        sample.db_reachable = self.database.as_ref().map(DatabaseProbe::is_reachable);

        debug!(
            cpu = ?sample.cpu_pct,
            ram = ?sample.ram_pct,
            disk_free_gb = ?sample.disk_free_gb,
            boot = ?sample.boot_pct_used,
            db = ?sample.db_reachable,
            "Host sample collected"
        );
        Ok(sample)
    }

    fn process_status(
        &mut self,
        names: &[String],
    ) -> CollectionResult<BTreeMap<String, ProcessObservation>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(CollectionError::ProcessQuery {
                reason: "platform not supported by sysinfo".to_string(),
            });
        }

        self.system.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_memory()
                .with_cpu()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_user(UpdateKind::OnlyIfNotSet),
        );
        self.users.refresh_list();

        let observations = names
            .iter()
            .map(|name| {
                let matches = self.matching_processes(name);
                let observation = match matches.as_slice() {
                    [] => ProcessObservation::NotRunning,
                    [process] => ProcessObservation::Running(self.describe_process(process)),
                    many => ProcessObservation::Ambiguous { matches: many.len() },
                };
                (name.clone(), observation)
            })
            .collect();

        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_probe_reaches_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let probe = DatabaseProbe::new(address, Duration::from_secs(1));
        assert!(probe.is_reachable());
    }

    #[test]
    fn test_probe_unresolvable_address() {
        let probe = DatabaseProbe::new("not a host", Duration::from_millis(100));
        assert!(!probe.is_reachable());
    }

    #[test]
    fn test_settle_never_below_sysinfo_minimum() {
        let mut config = MonitorConfig::default();
        config.monitor.cpu_settle_secs = 0;
        let collector = SystemCollector::new(&config);
        assert!(collector.cpu_settle >= MINIMUM_CPU_UPDATE_INTERVAL);
    }

    fn collector_seeing_self() -> SystemCollector {
        let mut collector = SystemCollector::new(&MonitorConfig::default());
        collector.own_pid = None;
        collector
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_threaded_process_counts_once() {
        use std::sync::mpsc;

        // The executable name is longer than the kernel's 15 byte comm field,
        // so only the command line can match it
        let exe = std::env::current_exe().unwrap();
        let pattern = exe.file_name().unwrap().to_string_lossy().into_owned();

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let stop_rx = std::sync::Arc::new(std::sync::Mutex::new(stop_rx));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let stop_rx = stop_rx.clone();
                std::thread::spawn(move || {
                    let _ = stop_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
                })
            })
            .collect();

        let mut collector = collector_seeing_self();
        let names = vec![pattern.clone()];
        let observations = collector.process_status(&names).unwrap();

        drop(stop_tx);
        for worker in workers {
            worker.join().unwrap();
        }

        match &observations[&pattern] {
            ProcessObservation::Running(info) => assert!(!info.user.is_empty()),
            other => panic!("expected Running, got {:?}", other),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pattern_in_arguments_matches() {
        use std::process::Command;

        let marker = format!("hostwatch-argv-marker-{}", std::process::id());
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30; true", &marker])
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let mut collector = collector_seeing_self();
        let names = vec![marker.clone()];
        let observations = collector.process_status(&names).unwrap();

        let _ = child.kill();
        let _ = child.wait();

        match &observations[&marker] {
            ProcessObservation::Running(info) => assert!(!info.user.is_empty()),
            other => panic!("expected Running, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_process_is_not_running() {
        let config = MonitorConfig::default();
        let mut collector = SystemCollector::new(&config);
        let names = vec!["hostwatch-test-no-such-process-5f1c".to_string()];
        let observations = collector.process_status(&names).unwrap();
        assert_eq!(observations[&names[0]], ProcessObservation::NotRunning);
    }
}
