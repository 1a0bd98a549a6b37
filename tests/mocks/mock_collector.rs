use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Local;
use hostwatch::error::{CollectionError, CollectionResult};
use hostwatch::{Collector, MetricSample, ProcessInfo, ProcessObservation};

/// What the collector reports for one cycle
#[derive(Debug, Clone)]
pub struct Step {
    pub sample: CollectionResult<MetricSample>,
    pub processes: CollectionResult<BTreeMap<String, ProcessObservation>>,
}

impl Step {
    pub fn sample(sample: MetricSample) -> Self {
        Self {
            sample: Ok(sample),
            processes: Ok(BTreeMap::new()),
        }
    }

    /// The whole sample fails
    pub fn failure(reason: &str) -> Self {
        Self {
            sample: Err(CollectionError::MetricUnavailable {
                metric: "host".to_string(),
                reason: reason.to_string(),
            }),
            processes: Ok(BTreeMap::new()),
        }
    }

    pub fn process(mut self, name: &str, observation: ProcessObservation) -> Self {
        if let Ok(processes) = &mut self.processes {
            processes.insert(name.to_string(), observation);
        }
        self
    }

    pub fn process_query_fails(mut self) -> Self {
        self.processes = Err(CollectionError::ProcessQuery {
            reason: "process table unreadable".to_string(),
        });
        self
    }
}

pub fn running() -> ProcessObservation {
    ProcessObservation::Running(ProcessInfo {
        create_time: Local::now(),
        rss_gb: 0.75,
        mem_pct: 2.5,
        cpu_pct: 4.0,
        user: "svc".to_string(),
    })
}

/// Collector that replays queued steps; an empty queue yields a sample with
/// no readings
#[derive(Clone, Default)]
pub struct ScriptedCollector {
    steps: Arc<Mutex<VecDeque<Step>>>,
    current: Arc<Mutex<Option<Step>>>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }
}

impl Collector for ScriptedCollector {
    fn sample(&mut self) -> CollectionResult<MetricSample> {
        let step = self.steps.lock().unwrap().pop_front();
        let sample = match &step {
            Some(step) => step.sample.clone(),
            None => Ok(MetricSample::empty(Local::now())),
        };
        *self.current.lock().unwrap() = step;
        sample
    }

    fn process_status(
        &mut self,
        names: &[String],
    ) -> CollectionResult<BTreeMap<String, ProcessObservation>> {
        let current = self.current.lock().unwrap();
        let processes = match current.as_ref() {
            Some(step) => step.processes.clone()?,
            None => BTreeMap::new(),
        };
        Ok(processes
            .into_iter()
            .filter(|(name, _)| names.contains(name))
            .collect())
    }
}
