use crate::error::NotifyError;
use crate::models::BuildStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Everything a channel needs to render one build alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureAlert {
    pub job_name: String,
    pub build_number: u64,
    pub build_url: String,
    pub reason: String,
    pub status: BuildStatus,
    pub duration_secs: Option<u64>,
    pub triggered_by: Option<String>,
    pub branch: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Remediation hints rendered under the alert; may be empty.
    pub advice: Vec<String>,
}

impl FailureAlert {
    pub fn new(job_name: impl Into<String>, build_number: u64, build_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            build_number,
            build_url: build_url.into(),
            reason: reason.into(),
            status: BuildStatus::Failure,
            duration_secs: None,
            triggered_by: None,
            branch: None,
            timestamp: None,
            advice: Vec::new(),
        }
    }

    pub fn dedup_key(&self) -> String {
        format!("{}#{}", self.job_name, self.build_number)
    }
}

const FAILURE_ADVICE: [&str; 3] = [
    "Check the build logs for specific error messages",
    "Verify that all dependencies are available",
    "Review recent code changes that might have caused the failure",
];

const DURATION_ADVICE: [&str; 3] = [
    "Build duration exceeds threshold - consider optimization",
    "Review test execution time and parallelization",
    "Check for unnecessary dependencies or steps",
];

const UNHEALTHY_ADVICE: [&str; 3] = [
    "Pipeline health is poor - review recent failures",
    "Consider implementing additional monitoring",
    "Review pipeline configuration and dependencies",
];

/// Hints for the reader of an alert, from the build outcome, its duration
/// against `threshold_secs`, and the health of the pipeline it belongs to.
pub fn remediation_advice(
    status: BuildStatus,
    duration_secs: Option<u64>,
    threshold_secs: Option<u64>,
    pipeline_unhealthy: bool,
) -> Vec<String> {
    if status == BuildStatus::Success {
        return vec!["Build completed successfully!".to_string()];
    }

    let mut advice = Vec::new();
    if status == BuildStatus::Failure {
        advice.extend(FAILURE_ADVICE);
    }
    if let (Some(d), Some(t)) = (duration_secs, threshold_secs) {
        if d > t {
            advice.extend(DURATION_ADVICE);
        }
    }
    if pipeline_unhealthy {
        advice.extend(UNHEALTHY_ADVICE);
    }
    advice.into_iter().map(str::to_string).collect()
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, alert: &FailureAlert) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Already attempted for this (job, build); nothing was contacted.
    Duplicate,
    /// No channel is configured; the dedup key was left untouched.
    NoChannels,
    Attempted { delivered: usize, failed: usize },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            DispatchOutcome::Duplicate => true,
            DispatchOutcome::NoChannels => false,
            DispatchOutcome::Attempted { delivered, failed } => *delivered > 0 && *failed == 0,
        }
    }
}

/// Fans alerts out to every configured channel, at most once per
/// (job, build number) between calls to `clear_sent_cache`.
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    sent: Mutex<HashSet<String>>,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels, sent: Mutex::new(HashSet::new()) }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub async fn send(&self, alert: &FailureAlert) -> DispatchOutcome {
        let key = alert.dedup_key();

        if self.channels.is_empty() {
            warn!(key = %key, "No notification channel configured");
            return DispatchOutcome::NoChannels;
        }

        // The key is claimed under the lock, so two callers racing on the same
        // build cannot both dispatch. A failed attempt still consumes it.
        if !self.sent_set().insert(key.clone()) {
            info!(key = %key, "Notification already sent");
            return DispatchOutcome::Duplicate;
        }

        let attempts = self.channels.iter().map(|channel| async move {
            (channel.name().to_string(), channel.deliver(alert).await)
        });

        let mut delivered = 0;
        let mut failed = 0;
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    delivered += 1;
                    info!(channel = %name, key = %key, "Notification delivered");
                }
                Err(e) => {
                    failed += 1;
                    error!(channel = %name, key = %key, "Failed to send notification: {}", e);
                }
            }
        }

        DispatchOutcome::Attempted { delivered, failed }
    }

    pub fn clear_sent_cache(&self) {
        self.sent_set().clear();
        info!("Sent notifications cache cleared");
    }

    pub fn sent_count(&self) -> usize {
        self.sent_set().len()
    }

    fn sent_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Channel that remembers what it was asked to deliver.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub delivered: Mutex<Vec<FailureAlert>>,
        attempts: AtomicUsize,
        fail: bool,
    }

    impl RecordingChannel {
        pub fn failing() -> Self {
            Self { fail: true, ..Default::default() }
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn keys(&self) -> Vec<String> {
            self.delivered.lock().unwrap().iter().map(|a| a.dedup_key()).collect()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            if self.fail { "failing" } else { "recording" }
        }

        async fn deliver(&self, alert: &FailureAlert) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::Webhook("connection refused".into()));
            }
            self.delivered.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }
}
