use crate::error::FetchError;
use crate::health::{
    pipeline_advice, BuildTrend, HealthRollup, HealthService, OverallMetrics, PipelineAdvice, PipelineMetrics,
};
use crate::jenkins_client::JenkinsClient;
use crate::jenkins_types::{BuildSummary, JobSummary, NodeInfo};
use crate::models::BuildStatus;
use crate::monitor::{JobMonitor, MonitorStatus};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error: message.into() }))
}

fn fetch_error(e: FetchError) -> (StatusCode, Json<ApiError>) {
    error!("Jenkins request failed: {}", e);
    let status = match e {
        FetchError::AuthChallenge { .. } => StatusCode::FORBIDDEN,
        FetchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string())
}

fn jenkins(state: &AppState) -> Result<&Arc<JenkinsClient>, (StatusCode, Json<ApiError>)> {
    state
        .jenkins
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "Jenkins is not configured"))
}

fn monitor(state: &AppState) -> Result<&Arc<JobMonitor>, (StatusCode, Json<ApiError>)> {
    state
        .monitor
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "Jenkins is not configured"))
}

fn health(state: &AppState) -> Result<&Arc<HealthService>, (StatusCode, Json<ApiError>)> {
    state
        .health
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "Build history is not available"))
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

fn message(text: impl Into<String>) -> Json<Message> {
    Json(Message { message: text.into() })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub monitor: MonitorStatus,
    pub interval_seconds: u64,
    pub notifications_sent: usize,
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PipelineHealthResponse {
    pub metrics: PipelineMetrics,
    pub advice: Vec<PipelineAdvice>,
}

#[derive(Debug, Serialize)]
pub struct BuildView {
    #[serde(flatten)]
    pub build: BuildSummary,
    pub status: BuildStatus,
}

impl From<BuildSummary> for BuildView {
    fn from(build: BuildSummary) -> Self {
        let status = build.status();
        Self { build, status }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeView {
    pub display_name: String,
    pub offline: bool,
    pub executors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_data: Option<serde_json::Value>,
}

impl From<NodeInfo> for NodeView {
    fn from(node: NodeInfo) -> Self {
        Self {
            executors: node.executor_count(),
            display_name: node.display_name,
            offline: node.offline,
            monitor_data: node.monitor_data,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BuildsQuery {
    limit: Option<usize>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/api/monitor/status", get(monitor_status))
        .route("/api/monitor/start", post(start_monitor))
        .route("/api/monitor/stop", post(stop_monitor))
        .route("/api/monitor/refresh", post(refresh_monitor))
        .route("/api/cache/clear", post(clear_cache))
        .route("/api/notifications/clear", post(clear_notifications))
        .route("/api/jobs/summary", get(jobs_summary))
        .route("/api/jobs/:name/builds", get(job_builds))
        .route("/api/jobs/:name/build", post(trigger_build))
        .route("/api/nodes", get(list_nodes))
        .route("/api/health", get(health_rollup))
        .route("/api/health/:pipeline", get(pipeline_health))
        .route("/api/health/:pipeline/trends", get(pipeline_trends))
        .route("/api/metrics/overall", get(overall_metrics))
        .with_state(state)
}

async fn monitor_status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let monitor = monitor(&state)?;
    Ok(Json(StatusResponse {
        monitor: monitor.status().await,
        interval_seconds: state.config.monitor.interval_seconds,
        notifications_sent: state.notifier.sent_count(),
        channels: state.notifier.channel_names(),
    }))
}

async fn start_monitor(State(state): State<AppState>) -> ApiResult<Message> {
    monitor(&state)?.start().await;
    Ok(message("Job monitoring started"))
}

async fn stop_monitor(State(state): State<AppState>) -> ApiResult<Message> {
    monitor(&state)?.stop().await;
    Ok(message("Job monitoring stopped"))
}

async fn refresh_monitor(State(state): State<AppState>) -> ApiResult<Message> {
    let monitor = monitor(&state)?;
    if !monitor.refresh().await {
        return Err(api_error(StatusCode::CONFLICT, "Job monitoring is not running"));
    }
    Ok(message("Refresh requested"))
}

async fn clear_cache(State(state): State<AppState>) -> ApiResult<Message> {
    jenkins(&state)?.clear_cache().await;
    if let Some(m) = &state.monitor {
        m.clear_state();
    }
    info!("Caches cleared via API");
    Ok(message("Cache cleared"))
}

async fn clear_notifications(State(state): State<AppState>) -> Json<Message> {
    state.notifier.clear_sent_cache();
    message("Sent notifications cache cleared")
}

async fn jobs_summary(State(state): State<AppState>) -> ApiResult<JobSummary> {
    let jobs = jenkins(&state)?.list_jobs().await.map_err(fetch_error)?;
    Ok(Json(JobSummary::from_jobs(&jobs)))
}

async fn job_builds(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<BuildsQuery>,
) -> ApiResult<Vec<BuildView>> {
    let limit = q.limit.unwrap_or(10).clamp(1, 100);
    let builds = jenkins(&state)?.list_builds(&name, limit).await.map_err(fetch_error)?;
    Ok(Json(builds.into_iter().map(BuildView::from).collect()))
}

async fn trigger_build(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Message> {
    jenkins(&state)?.trigger_build(&name).await.map_err(fetch_error)?;
    Ok(message(format!("Build triggered for {}", name)))
}

async fn list_nodes(State(state): State<AppState>) -> ApiResult<Vec<NodeView>> {
    let nodes = jenkins(&state)?.get_node_info().await.map_err(fetch_error)?;
    Ok(Json(nodes.into_iter().map(NodeView::from).collect()))
}

async fn health_rollup(State(state): State<AppState>) -> ApiResult<HealthRollup> {
    let rollup = health(&state)?.rollup().await.map_err(|e| {
        error!("Health rollup failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read build history")
    })?;
    Ok(Json(rollup))
}

async fn pipeline_health(State(state): State<AppState>, Path(pipeline): Path<String>) -> ApiResult<PipelineHealthResponse> {
    let metrics = health(&state)?.pipeline_metrics(&pipeline).await.map_err(|e| {
        error!(pipeline = %pipeline, "Pipeline metrics failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read build history")
    })?;
    let advice = pipeline_advice(&metrics);
    Ok(Json(PipelineHealthResponse { metrics, advice }))
}

async fn pipeline_trends(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
    Query(q): Query<BuildsQuery>,
) -> ApiResult<Vec<BuildTrend>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let trends = health(&state)?.build_trends(&pipeline, limit).await.map_err(|e| {
        error!(pipeline = %pipeline, "Build trends failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read build history")
    })?;
    Ok(Json(trends))
}

async fn overall_metrics(State(state): State<AppState>) -> ApiResult<OverallMetrics> {
    let metrics = health(&state)?.overall_metrics().await.map_err(|e| {
        error!("Overall metrics failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read build history")
    })?;
    Ok(Json(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, JenkinsConfig, JenkinsCredentials, MonitorConfig};
    use crate::health::{BuildStore, HealthThresholds};
    use crate::models::BuildRow;
    use crate::monitor::MonitorSettings;
    use crate::notifier::testing::RecordingChannel;
    use crate::notifier::{FailureAlert, Notifier};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bare_state() -> AppState {
        AppState {
            config: Arc::new(Config::default()),
            jenkins: None,
            monitor: None,
            notifier: Arc::new(Notifier::new(vec![Arc::new(RecordingChannel::default())])),
            health: None,
        }
    }

    fn with_jenkins(server: &MockServer) -> AppState {
        let creds = JenkinsCredentials {
            url: server.uri(),
            username: "admin".into(),
            api_token: "token".into(),
        };
        let client = Arc::new(JenkinsClient::new(&creds, &JenkinsConfig::default()));
        let mut state = bare_state();
        let monitor = JobMonitor::new(
            client.clone(),
            state.notifier.clone(),
            MonitorSettings::from_config(&MonitorConfig::default(), None),
        );
        state.jenkins = Some(client);
        state.monitor = Some(Arc::new(monitor));
        state
    }

    async fn call(state: AppState, method: &str, uri: &str) -> (StatusCode, JsonValue) {
        let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let resp = app_router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null))
    }

    #[tokio::test]
    async fn jenkins_routes_need_configuration() {
        for (m, uri) in [
            ("GET", "/api/monitor/status"),
            ("POST", "/api/monitor/start"),
            ("POST", "/api/cache/clear"),
            ("GET", "/api/jobs/summary"),
        ] {
            let (status, body) = call(bare_state(), m, uri).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{} {}", m, uri);
            assert_eq!(body["error"], "Jenkins is not configured");
        }
    }

    #[tokio::test]
    async fn health_routes_need_build_history() {
        let (status, _) = call(bare_state(), "GET", "/api/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn clearing_notifications_resets_dedup() {
        let state = bare_state();
        state.notifier.send(&FailureAlert::new("api", 3, "", "Build failed")).await;
        assert_eq!(state.notifier.sent_count(), 1);

        let (status, body) = call(state.clone(), "POST", "/api/notifications/clear").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Sent notifications cache cleared");
        assert_eq!(state.notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn status_reports_idle_monitor() {
        let server = MockServer::start().await;
        let (status, body) = call(with_jenkins(&server), "GET", "/api/monitor/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monitoring"], false);
        assert_eq!(body["jobs_tracked"], 0);
        assert_eq!(body["interval_seconds"], 30);
        assert_eq!(body["channels"], json!(["recording"]));
    }

    #[tokio::test]
    async fn refresh_requires_running_monitor() {
        let server = MockServer::start().await;
        let (status, _) = call(with_jenkins(&server), "POST", "/api/monitor/refresh").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn jobs_summary_counts_colors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs": [
                    {"name": "api", "color": "blue", "lastBuild": {"number": 1, "duration": 60000}},
                    {"name": "web", "color": "red", "lastBuild": {"number": 2, "duration": 120000}},
                    {"name": "docs", "color": "blue_anime"}
                ]
            })))
            .mount(&server)
            .await;

        let (status, body) = call(with_jenkins(&server), "GET", "/api/jobs/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_jobs"], 3);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["building"], 1);
    }

    #[tokio::test]
    async fn upstream_errors_become_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computer/api/json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (status, body) = call(with_jenkins(&server), "GET", "/api/nodes").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn trigger_build_posts_to_jenkins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/api/build"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let (status, body) = call(with_jenkins(&server), "POST", "/api/jobs/api/build").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Build triggered for api");
    }

    struct OnePipeline;

    #[async_trait]
    impl BuildStore for OnePipeline {
        async fn pipeline_names(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["api".into()])
        }

        async fn builds_for_pipeline(&self, pipeline_name: &str) -> anyhow::Result<Vec<BuildRow>> {
            Ok(vec![BuildRow {
                pipeline_name: pipeline_name.into(),
                build_number: 1,
                status: "FAILURE".into(),
                duration: Some(90),
                timestamp: chrono::Utc::now().timestamp(),
                triggered_by: None,
                branch: None,
                url: None,
            }])
        }
    }

    #[tokio::test]
    async fn pipeline_health_includes_advice() {
        let mut state = bare_state();
        let thresholds = HealthThresholds { failure_rate: 0.2, duration_seconds: 1800.0 };
        state.health = Some(Arc::new(HealthService::new(Arc::new(OnePipeline), thresholds)));

        let (status, body) = call(state.clone(), "GET", "/api/health/api").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metrics"]["health_status"], "UNHEALTHY");
        assert_eq!(body["advice"][0]["category"], "Reliability");

        let (_, rollup) = call(state.clone(), "GET", "/api/health").await;
        assert_eq!(rollup["unhealthy"], 1);
        assert_eq!(rollup["worst"], "UNHEALTHY");

        let (status, trends) = call(state.clone(), "GET", "/api/health/api/trends?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trends[0]["build_number"], 1);
        assert_eq!(trends[0]["duration"], 90);
        assert_eq!(trends[0]["status"], "FAILURE");

        let (status, overall) = call(state, "GET", "/api/metrics/overall").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(overall["total_builds"], 1);
        assert_eq!(overall["failure_count"], 1);
        assert_eq!(overall["unhealthy_pipelines"], 1);
        assert_eq!(overall["builds_last_24h"], 1);
    }

    #[tokio::test]
    async fn metrics_routes_need_build_history() {
        let (status, _) = call(bare_state(), "GET", "/api/metrics/overall").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = call(bare_state(), "GET", "/api/health/api/trends").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn nodes_report_executor_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computer/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "computer": [
                    {"displayName": "built-in", "offline": false, "executors": [{}, {}]},
                    {"displayName": "agent-1", "offline": true, "executors": []}
                ]
            })))
            .mount(&server)
            .await;

        let (status, body) = call(with_jenkins(&server), "GET", "/api/nodes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["display_name"], "built-in");
        assert_eq!(body[0]["executors"], 2);
        assert_eq!(body[1]["offline"], true);
        assert_eq!(body[1]["executors"], 0);
    }

    #[tokio::test]
    async fn builds_carry_their_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/api/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "builds": [
                    {"number": 8, "result": null},
                    {"number": 7, "result": "FAILURE", "duration": 4000},
                    {"number": 6, "result": "SUCCESS"}
                ]
            })))
            .mount(&server)
            .await;

        let (status, body) = call(with_jenkins(&server), "GET", "/api/jobs/api/builds?limit=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["status"], "IN_PROGRESS");
        assert_eq!(body[1]["number"], 7);
        assert_eq!(body[1]["status"], "FAILURE");
        assert_eq!(body[2]["status"], "SUCCESS");
    }
}
