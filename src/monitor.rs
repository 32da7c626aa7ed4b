use crate::config::MonitorConfig;
use crate::error::FetchError;
use crate::jenkins_types::{BuildDetail, BuildRef, JobColor, JobSnapshot};
use crate::health::{HealthService, HealthStatus};
use crate::notifier::{remediation_advice, FailureAlert, Notifier};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const FAILURE_REASON: &str = "Build failed";

/// Where the monitor reads job state from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_jobs(&self) -> Result<Vec<JobSnapshot>, FetchError>;
    async fn fetch_build(&self, job_name: &str, build_number: u64) -> Result<BuildDetail, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureTransition {
    pub job_name: String,
    pub build: BuildRef,
}

/// Jobs that moved into FAILURE since `previous`. A job missing from
/// `previous` has no baseline and never counts.
pub fn detect_failures(previous: &HashMap<String, JobSnapshot>, current: &[JobSnapshot]) -> Vec<FailureTransition> {
    current
        .iter()
        .filter_map(|job| {
            let prior = previous.get(&job.name)?;
            if prior.color == JobColor::Failure || job.color != JobColor::Failure {
                return None;
            }
            let build = job.last_failed_build.clone()?;
            Some(FailureTransition { job_name: job.name.clone(), build })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: StdDuration,
    pub error_backoff: StdDuration,
    pub detail_concurrency: usize,
    pub job_filter: Option<Regex>,
    /// Builds running longer than this get duration advice in their alert.
    pub build_time_threshold_secs: Option<u64>,
}

impl MonitorSettings {
    pub fn from_config(cfg: &MonitorConfig, job_filter_regex: Option<&str>) -> Self {
        let job_filter = job_filter_regex.and_then(|re| match Regex::new(re) {
            Ok(r) => Some(r),
            Err(e) => {
                error!("Invalid job filter regex: {}", e);
                None
            }
        });
        Self {
            interval: StdDuration::from_secs(cfg.interval_seconds),
            error_backoff: StdDuration::from_secs(cfg.error_backoff_seconds),
            detail_concurrency: cfg.detail_concurrency.max(1),
            job_filter,
            build_time_threshold_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub skipped: bool,
    pub jobs_seen: usize,
    pub transitions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub monitoring: bool,
    pub jobs_tracked: usize,
    pub last_check: Option<DateTime<Utc>>,
}

/// Signals owned by one run of the loop; a restart gets fresh ones.
struct Worker {
    shutdown: Arc<Notify>,
    refresh: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Polls the job list and alerts on jobs that turn red.
pub struct JobMonitor {
    source: Arc<dyn JobSource>,
    notifier: Arc<Notifier>,
    settings: MonitorSettings,
    health: Option<Arc<HealthService>>,
    states: Mutex<HashMap<String, JobSnapshot>>,
    last_check: Mutex<Option<DateTime<Utc>>>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl JobMonitor {
    pub fn new(source: Arc<dyn JobSource>, notifier: Arc<Notifier>, settings: MonitorSettings) -> Self {
        Self {
            source,
            notifier,
            settings,
            health: None,
            states: Mutex::new(HashMap::new()),
            last_check: Mutex::new(None),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Lets alerts mention when the failing pipeline is already unhealthy.
    pub fn with_health(mut self, health: Arc<HealthService>) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            info!("Job monitoring is already running");
            return;
        }

        info!("Starting job monitoring service");
        let shutdown = Arc::new(Notify::new());
        let refresh = Arc::new(Notify::new());
        let this = Arc::clone(self);
        let (stop, wake) = (shutdown.clone(), refresh.clone());
        let handle = tokio::spawn(async move { this.run_loop(stop, wake).await });
        *worker = Some(Worker { shutdown, refresh, handle });
    }

    /// Stops the loop and waits for it to exit. A pending fetch or wait is
    /// cancelled; a tick that is already dispatching alerts runs to the end.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        worker.shutdown.notify_one();
        if let Err(e) = worker.handle.await {
            error!("Job monitor task ended abnormally: {}", e);
        }
        info!("Job monitoring service stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Cuts the current wait short so the next tick runs now. Returns
    /// `false` and does nothing when the loop is not running.
    pub async fn refresh(&self) -> bool {
        match self.worker.lock().await.as_ref() {
            Some(worker) => {
                worker.refresh.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn clear_state(&self) {
        self.state_map().clear();
        info!("Job monitor state cleared");
    }

    pub async fn status(&self) -> MonitorStatus {
        MonitorStatus {
            monitoring: self.is_running().await,
            jobs_tracked: self.state_map().len(),
            last_check: *self.last_check.lock().unwrap_or_else(|p| p.into_inner()),
        }
    }

    async fn run_loop(self: Arc<Self>, shutdown: Arc<Notify>, refresh: Arc<Notify>) {
        loop {
            // Only the fetch is raced against shutdown. Once jobs are in hand
            // the diff, dispatch and state swap finish together.
            let fetched = tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                r = AssertUnwindSafe(self.source.fetch_jobs()).catch_unwind() => r,
            };
            let outcome = match fetched {
                Ok(result) => AssertUnwindSafe(self.process(result)).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            let delay = match outcome {
                Ok(Ok(report)) => {
                    debug!(?report, "Polling cycle complete");
                    self.settings.interval
                }
                Ok(Err(e)) => {
                    error!("Error in job monitoring loop: {}", e);
                    self.settings.error_backoff
                }
                Err(_) => {
                    error!("Job monitoring tick panicked");
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                _ = refresh.notified() => info!("Received refresh signal"),
                _ = sleep(delay) => {}
            }
        }
    }

    /// One tick: fetch, diff against the previous snapshot, alert, replace.
    /// A failed fetch leaves the previous snapshot in place.
    pub async fn poll_once(&self) -> Result<TickReport, FetchError> {
        let fetched = self.source.fetch_jobs().await;
        self.process(fetched).await
    }

    async fn process(&self, fetched: Result<Vec<JobSnapshot>, FetchError>) -> Result<TickReport, FetchError> {
        let jobs = match fetched {
            Ok(jobs) => jobs,
            Err(e @ FetchError::Decode { .. }) => return Err(e),
            Err(e) => {
                warn!("Skipping job diff this round: {}", e);
                return Ok(TickReport { skipped: true, ..Default::default() });
            }
        };

        let jobs: Vec<JobSnapshot> = match &self.settings.job_filter {
            Some(re) => jobs.into_iter().filter(|j| re.is_match(&j.name)).collect(),
            None => jobs,
        };

        let transitions = detect_failures(&self.state_map(), &jobs);
        let report = TickReport { skipped: false, jobs_seen: jobs.len(), transitions: transitions.len() };

        if !transitions.is_empty() {
            for alert in self.build_alerts(transitions).await {
                info!(job = %alert.job_name, build = alert.build_number, "Job failed, sending notification");
                let outcome = self.notifier.send(&alert).await;
                if outcome.is_success() {
                    info!(job = %alert.job_name, build = alert.build_number, "Failure notification sent");
                } else {
                    error!(job = %alert.job_name, build = alert.build_number, ?outcome, "Failed to send notification");
                }
            }
        }

        *self.state_map() = jobs.into_iter().map(|j| (j.name.clone(), j)).collect();
        *self.last_check.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
        Ok(report)
    }

    /// Fetches build details for every transition, bounded by
    /// `detail_concurrency`, and returns alerts in transition order.
    async fn build_alerts(&self, transitions: Vec<FailureTransition>) -> Vec<FailureAlert> {
        let sem = Arc::new(Semaphore::new(self.settings.detail_concurrency));
        let mut set: JoinSet<(usize, Option<BuildDetail>)> = JoinSet::new();

        for (idx, t) in transitions.iter().enumerate() {
            let source = self.source.clone();
            let sem = sem.clone();
            let job = t.job_name.clone();
            let number = t.build.number;
            set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (idx, None);
                };
                match source.fetch_build(&job, number).await {
                    Ok(detail) => (idx, Some(detail)),
                    Err(e) => {
                        warn!(job = %job, build = number, "Build detail unavailable: {}", e);
                        (idx, None)
                    }
                }
            });
        }

        let mut details: Vec<Option<BuildDetail>> = vec![None; transitions.len()];
        while let Some(res) = set.join_next().await {
            match res {
                Ok((idx, detail)) => details[idx] = detail,
                Err(e) => error!("Task join error: {}", e),
            }
        }

        let mut alerts = Vec::with_capacity(transitions.len());
        for (t, detail) in transitions.into_iter().zip(details) {
            let mut alert = to_alert(t, detail);
            let unhealthy = self.pipeline_unhealthy(&alert.job_name).await;
            alert.advice = remediation_advice(
                alert.status,
                alert.duration_secs,
                self.settings.build_time_threshold_secs,
                unhealthy,
            );
            alerts.push(alert);
        }
        alerts
    }

    async fn pipeline_unhealthy(&self, job_name: &str) -> bool {
        let Some(health) = &self.health else {
            return false;
        };
        match health.pipeline_metrics(job_name).await {
            Ok(m) => m.health_status == HealthStatus::Unhealthy,
            Err(e) => {
                warn!(job = %job_name, "Pipeline health unavailable: {}", e);
                false
            }
        }
    }

    fn state_map(&self) -> MutexGuard<'_, HashMap<String, JobSnapshot>> {
        self.states.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn to_alert(t: FailureTransition, detail: Option<BuildDetail>) -> FailureAlert {
    let mut alert = FailureAlert::new(
        t.job_name,
        t.build.number,
        t.build.url.clone().unwrap_or_default(),
        FAILURE_REASON,
    );
    alert.duration_secs = t.build.duration.filter(|d| *d > 0).map(|d| d / 1000);
    alert.timestamp = t.build.timestamp.and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    if let Some(d) = detail {
        alert.status = d.status();
        alert.duration_secs = d.duration_seconds().or(alert.duration_secs);
        alert.triggered_by = d.triggered_by();
        alert.branch = d.branch();
        if alert.build_url.is_empty() {
            alert.build_url = d.url.unwrap_or_default();
        }
    }
    alert
}
