use crate::config::HealthConfig;
use crate::models::{BuildRow, BuildStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ordered by severity: `Healthy < Warning < Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

/// `threshold_fraction` is a fraction (0.2), `failure_rate_percent` a percentage (25.0).
pub fn classify(
    failure_rate_percent: f64,
    avg_duration_seconds: f64,
    threshold_fraction: f64,
    duration_threshold_seconds: f64,
) -> HealthStatus {
    let threshold_percent = threshold_fraction * 100.0;

    if failure_rate_percent > threshold_percent {
        HealthStatus::Unhealthy
    } else if failure_rate_percent > threshold_percent * 0.7 || avg_duration_seconds > duration_threshold_seconds {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub failure_rate: f64,
    pub duration_seconds: f64,
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(cfg: &HealthConfig) -> Self {
        Self {
            failure_rate: cfg.failure_rate_threshold,
            duration_seconds: (cfg.build_time_threshold_minutes * 60) as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub pipeline_name: String,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub average_duration: f64,
    pub total_builds: usize,
    pub builds_last_24h: usize,
    pub builds_last_7d: usize,
    pub health_status: HealthStatus,
    pub last_build: Option<BuildRow>,
}

impl PipelineMetrics {
    pub fn from_builds(name: &str, rows: &[BuildRow], thresholds: HealthThresholds, now: DateTime<Utc>) -> Self {
        if rows.is_empty() {
            return Self {
                pipeline_name: name.to_string(),
                success_rate: 0.0,
                failure_rate: 0.0,
                average_duration: 0.0,
                total_builds: 0,
                builds_last_24h: 0,
                builds_last_7d: 0,
                health_status: HealthStatus::Healthy,
                last_build: None,
            };
        }

        let total = rows.len();
        let statuses: Vec<Option<BuildStatus>> = rows.iter().map(BuildRow::build_status).collect();
        let successes = statuses.iter().filter(|s| **s == Some(BuildStatus::Success)).count();
        let failures = statuses.iter().filter(|s| s.map_or(false, |s| s.is_failure())).count();

        let durations: Vec<i64> = rows.iter().filter_map(|r| r.duration).filter(|d| *d > 0).collect();
        let average_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };

        let day_ago = (now - Duration::days(1)).timestamp();
        let week_ago = (now - Duration::days(7)).timestamp();

        let success_rate = successes as f64 / total as f64 * 100.0;
        let failure_rate = failures as f64 / total as f64 * 100.0;

        Self {
            pipeline_name: name.to_string(),
            success_rate,
            failure_rate,
            average_duration,
            total_builds: total,
            builds_last_24h: rows.iter().filter(|r| r.timestamp >= day_ago).count(),
            builds_last_7d: rows.iter().filter(|r| r.timestamp >= week_ago).count(),
            health_status: classify(failure_rate, average_duration, thresholds.failure_rate, thresholds.duration_seconds),
            last_build: rows.iter().max_by_key(|r| r.timestamp).cloned(),
        }
    }
}

/// Pipeline counts per health status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthRollup {
    pub total_pipelines: usize,
    pub healthy: usize,
    pub warning: usize,
    pub unhealthy: usize,
    pub worst: Option<HealthStatus>,
}

impl HealthRollup {
    pub fn from_statuses<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> Self {
        let mut rollup = HealthRollup::default();
        for s in statuses {
            rollup.total_pipelines += 1;
            match s {
                HealthStatus::Healthy => rollup.healthy += 1,
                HealthStatus::Warning => rollup.warning += 1,
                HealthStatus::Unhealthy => rollup.unhealthy += 1,
            }
            rollup.worst = rollup.worst.max(Some(s));
        }
        rollup
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdvicePriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineAdvice {
    pub category: &'static str,
    pub title: &'static str,
    pub description: String,
    pub priority: AdvicePriority,
    pub action_items: Vec<&'static str>,
}

pub fn pipeline_advice(m: &PipelineMetrics) -> Vec<PipelineAdvice> {
    let mut advice = Vec::new();

    if m.failure_rate > 20.0 {
        advice.push(PipelineAdvice {
            category: "Reliability",
            title: "High Failure Rate Detected",
            description: format!("Pipeline has a {:.1}% failure rate, which is above the recommended threshold.", m.failure_rate),
            priority: AdvicePriority::High,
            action_items: vec![
                "Review recent build failures and identify common patterns",
                "Check for flaky tests",
                "Review dependency management and version conflicts",
            ],
        });
    }

    if m.average_duration > 1800.0 {
        advice.push(PipelineAdvice {
            category: "Performance",
            title: "Long Build Duration",
            description: format!("Average build duration is {:.1} minutes.", m.average_duration / 60.0),
            priority: AdvicePriority::Medium,
            action_items: vec![
                "Analyze build steps and identify bottlenecks",
                "Parallelize independent build steps",
                "Cache dependencies between builds",
            ],
        });
    }

    if m.builds_last_24h == 0 {
        advice.push(PipelineAdvice {
            category: "Activity",
            title: "No Recent Build Activity",
            description: "No builds have been triggered in the last 24 hours.".to_string(),
            priority: AdvicePriority::Low,
            action_items: vec![
                "Verify the pipeline is still needed",
                "Review pipeline triggers",
            ],
        });
    }

    if m.health_status == HealthStatus::Unhealthy {
        advice.push(PipelineAdvice {
            category: "Health",
            title: "Pipeline Health Issues",
            description: "Pipeline is unhealthy due to its failure rate.".to_string(),
            priority: AdvicePriority::High,
            action_items: vec![
                "Review and address the root causes of recent failures",
                "Consider disabling the pipeline if it blocks releases",
            ],
        });
    }

    advice
}

/// Across every pipeline in the build history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallMetrics {
    pub total_pipelines: usize,
    pub healthy_pipelines: usize,
    pub unhealthy_pipelines: usize,
    pub total_builds: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub overall_success_rate: f64,
    pub overall_avg_duration: f64,
    pub builds_last_24h: usize,
    pub builds_last_7d: usize,
}

impl OverallMetrics {
    pub fn from_builds(rows: &[BuildRow], rollup: &HealthRollup, now: DateTime<Utc>) -> Self {
        let statuses: Vec<Option<BuildStatus>> = rows.iter().map(BuildRow::build_status).collect();
        let success_count = statuses.iter().filter(|s| **s == Some(BuildStatus::Success)).count();
        let failure_count = statuses.iter().filter(|s| s.map_or(false, |s| s.is_failure())).count();

        let durations: Vec<i64> = rows.iter().filter_map(|r| r.duration).filter(|d| *d > 0).collect();
        let day_ago = (now - Duration::days(1)).timestamp();
        let week_ago = (now - Duration::days(7)).timestamp();

        Self {
            total_pipelines: rollup.total_pipelines,
            healthy_pipelines: rollup.healthy,
            unhealthy_pipelines: rollup.unhealthy,
            total_builds: rows.len(),
            success_count,
            failure_count,
            overall_success_rate: if rows.is_empty() {
                0.0
            } else {
                success_count as f64 / rows.len() as f64 * 100.0
            },
            overall_avg_duration: if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<i64>() as f64 / durations.len() as f64
            },
            builds_last_24h: rows.iter().filter(|r| r.timestamp >= day_ago).count(),
            builds_last_7d: rows.iter().filter(|r| r.timestamp >= week_ago).count(),
        }
    }
}

/// One point of a pipeline's build chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildTrend {
    pub build_number: i64,
    pub timestamp: i64,
    pub duration: i64,
    pub status: String,
}

impl From<&BuildRow> for BuildTrend {
    fn from(row: &BuildRow) -> Self {
        Self {
            build_number: row.build_number,
            timestamp: row.timestamp,
            duration: row.duration.unwrap_or(0),
            status: row.status.clone(),
        }
    }
}

/// Read-only view of the build history owned by the storage layer.
#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn pipeline_names(&self) -> Result<Vec<String>>;

    /// Newest first.
    async fn builds_for_pipeline(&self, pipeline_name: &str) -> Result<Vec<BuildRow>>;

    /// The `limit` newest builds, newest first.
    async fn recent_builds(&self, pipeline_name: &str, limit: usize) -> Result<Vec<BuildRow>> {
        let mut rows = self.builds_for_pipeline(pipeline_name).await?;
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn all_builds(&self) -> Result<Vec<BuildRow>> {
        let mut rows = Vec::new();
        for name in self.pipeline_names().await? {
            rows.extend(self.builds_for_pipeline(&name).await?);
        }
        Ok(rows)
    }
}

pub struct HealthService {
    store: Arc<dyn BuildStore>,
    thresholds: HealthThresholds,
}

impl HealthService {
    pub fn new(store: Arc<dyn BuildStore>, thresholds: HealthThresholds) -> Self {
        Self { store, thresholds }
    }

    pub async fn pipeline_metrics(&self, pipeline_name: &str) -> Result<PipelineMetrics> {
        let rows = self.store.builds_for_pipeline(pipeline_name).await?;
        Ok(PipelineMetrics::from_builds(pipeline_name, &rows, self.thresholds, Utc::now()))
    }

    pub async fn rollup(&self) -> Result<HealthRollup> {
        let mut statuses = Vec::new();
        for name in self.store.pipeline_names().await? {
            statuses.push(self.pipeline_metrics(&name).await?.health_status);
        }
        Ok(HealthRollup::from_statuses(statuses))
    }

    /// The last `limit` builds of a pipeline, oldest first.
    pub async fn build_trends(&self, pipeline_name: &str, limit: usize) -> Result<Vec<BuildTrend>> {
        let rows = self.store.recent_builds(pipeline_name, limit).await?;
        Ok(rows.iter().rev().map(BuildTrend::from).collect())
    }

    pub async fn overall_metrics(&self) -> Result<OverallMetrics> {
        let rollup = self.rollup().await?;
        let rows = self.store.all_builds().await?;
        Ok(OverallMetrics::from_builds(&rows, &rollup, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const THRESHOLDS: HealthThresholds = HealthThresholds { failure_rate: 0.2, duration_seconds: 1800.0 };

    fn row(status: &str, duration: Option<i64>, age_hours: i64, now: DateTime<Utc>) -> BuildRow {
        BuildRow {
            pipeline_name: "api".into(),
            build_number: 1,
            status: status.into(),
            duration,
            timestamp: (now - Duration::hours(age_hours)).timestamp(),
            triggered_by: None,
            branch: None,
            url: None,
        }
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(25.0, 100.0, 0.2, 1800.0), HealthStatus::Unhealthy);
        assert_eq!(classify(15.0, 100.0, 0.2, 1800.0), HealthStatus::Warning);
        assert_eq!(classify(5.0, 100.0, 0.2, 1800.0), HealthStatus::Healthy);
    }

    #[test]
    fn classify_edges_are_exclusive() {
        // exactly at the threshold is not above it
        assert_eq!(classify(20.0, 100.0, 0.2, 1800.0), HealthStatus::Warning);
        assert_eq!(classify(14.0, 100.0, 0.2, 1800.0), HealthStatus::Healthy);
        assert_eq!(classify(0.0, 1800.0, 0.2, 1800.0), HealthStatus::Healthy);
        assert_eq!(classify(0.0, 1801.0, 0.2, 1800.0), HealthStatus::Warning);
    }

    #[test]
    fn severity_ordering() {
        assert!(HealthStatus::Unhealthy > HealthStatus::Warning);
        assert!(HealthStatus::Warning > HealthStatus::Healthy);
    }

    #[test]
    fn metrics_from_rows() {
        let now = Utc::now();
        let rows = vec![
            row("SUCCESS", Some(100), 1, now),
            row("SUCCESS", Some(300), 30, now),
            row("FAILURE", None, 200, now),
            row("UNSTABLE", Some(200), 2, now),
        ];

        let m = PipelineMetrics::from_builds("api", &rows, THRESHOLDS, now);
        assert_eq!(m.total_builds, 4);
        assert_eq!(m.success_rate, 50.0);
        assert_eq!(m.failure_rate, 50.0);
        assert_eq!(m.average_duration, 200.0);
        assert_eq!(m.builds_last_24h, 2);
        assert_eq!(m.builds_last_7d, 3);
        assert_eq!(m.health_status, HealthStatus::Unhealthy);
        assert_eq!(m.last_build.as_ref().unwrap().duration, Some(100));
    }

    #[test]
    fn empty_history_is_healthy() {
        let m = PipelineMetrics::from_builds("idle", &[], THRESHOLDS, Utc::now());
        assert_eq!(m.health_status, HealthStatus::Healthy);
        assert_eq!(m.total_builds, 0);
        assert!(m.last_build.is_none());
    }

    #[test]
    fn rollup_tracks_worst() {
        let r = HealthRollup::from_statuses([HealthStatus::Healthy, HealthStatus::Warning, HealthStatus::Healthy]);
        assert_eq!((r.total_pipelines, r.healthy, r.warning, r.unhealthy), (3, 2, 1, 0));
        assert_eq!(r.worst, Some(HealthStatus::Warning));
        assert_eq!(HealthRollup::from_statuses([]).worst, None);
    }

    #[test]
    fn advice_covers_each_signal() {
        let now = Utc::now();
        let rows = vec![row("FAILURE", Some(4000), 48, now), row("SUCCESS", Some(4000), 50, now)];
        let m = PipelineMetrics::from_builds("slow", &rows, THRESHOLDS, now);

        let categories: Vec<_> = pipeline_advice(&m).iter().map(|a| a.category).collect();
        assert_eq!(categories, vec!["Reliability", "Performance", "Activity", "Health"]);
    }

    struct MemoryStore(HashMap<String, Vec<BuildRow>>);

    #[async_trait]
    impl BuildStore for MemoryStore {
        async fn pipeline_names(&self) -> Result<Vec<String>> {
            let mut names: Vec<_> = self.0.keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        async fn builds_for_pipeline(&self, pipeline_name: &str) -> Result<Vec<BuildRow>> {
            Ok(self.0.get(pipeline_name).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn service_rolls_up_store_contents() {
        let now = Utc::now();
        let store = MemoryStore(HashMap::from([
            ("good".to_string(), vec![row("SUCCESS", Some(60), 1, now)]),
            ("bad".to_string(), vec![row("FAILURE", Some(60), 1, now)]),
        ]));
        let service = HealthService::new(Arc::new(store), THRESHOLDS);

        let rollup = service.rollup().await.unwrap();
        assert_eq!(rollup.total_pipelines, 2);
        assert_eq!(rollup.unhealthy, 1);
        assert_eq!(rollup.worst, Some(HealthStatus::Unhealthy));

        let unknown = service.pipeline_metrics("missing").await.unwrap();
        assert_eq!(unknown.total_builds, 0);
    }

    #[tokio::test]
    async fn trends_are_oldest_first_and_limited() {
        let now = Utc::now();
        let mut rows: Vec<BuildRow> = (1..=5)
            .map(|n| {
                let mut r = row("SUCCESS", if n == 3 { None } else { Some(n * 10) }, 10 - n, now);
                r.build_number = n;
                r
            })
            .collect();
        rows.reverse();
        let store = MemoryStore(HashMap::from([("api".to_string(), rows)]));
        let service = HealthService::new(Arc::new(store), THRESHOLDS);

        let trends = service.build_trends("api", 3).await.unwrap();
        let numbers: Vec<i64> = trends.iter().map(|t| t.build_number).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
        assert_eq!(trends[0].duration, 0);
        assert_eq!(trends[2].duration, 50);
    }

    #[tokio::test]
    async fn overall_metrics_span_all_pipelines() {
        let now = Utc::now();
        let store = MemoryStore(HashMap::from([
            ("good".to_string(), vec![row("SUCCESS", Some(60), 1, now), row("SUCCESS", Some(120), 100, now)]),
            ("bad".to_string(), vec![row("FAILURE", None, 1, now), row("ABORTED", Some(30), 300, now)]),
        ]));
        let service = HealthService::new(Arc::new(store), THRESHOLDS);

        let m = service.overall_metrics().await.unwrap();
        assert_eq!((m.total_pipelines, m.healthy_pipelines, m.unhealthy_pipelines), (2, 1, 1));
        assert_eq!((m.total_builds, m.success_count, m.failure_count), (4, 2, 2));
        assert_eq!(m.overall_success_rate, 50.0);
        assert_eq!(m.overall_avg_duration, 70.0);
        assert_eq!((m.builds_last_24h, m.builds_last_7d), (2, 3));
    }

    #[test]
    fn overall_metrics_of_empty_history() {
        let m = OverallMetrics::from_builds(&[], &HealthRollup::default(), Utc::now());
        assert_eq!(m, OverallMetrics::default());
    }
}
