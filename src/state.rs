use crate::config::Config;
use crate::health::HealthService;
use crate::jenkins_client::JenkinsClient;
use crate::monitor::JobMonitor;
use crate::notifier::Notifier;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when Jenkins credentials are not configured.
    pub jenkins: Option<Arc<JenkinsClient>>,
    pub monitor: Option<Arc<JobMonitor>>,
    pub notifier: Arc<Notifier>,
    /// `None` when the build-history database could not be opened.
    pub health: Option<Arc<HealthService>>,
}
