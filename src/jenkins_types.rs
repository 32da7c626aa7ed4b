use crate::models::BuildStatus;
use serde::{Deserialize, Deserializer, Serialize};

/// Closed classification of a job's `color` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobColor {
    Success,
    Failure,
    Building,
    Disabled,
    #[default]
    Unknown,
}

impl JobColor {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.ends_with("_anime") {
            return JobColor::Building;
        }
        match raw.as_str() {
            "blue" | "green" => JobColor::Success,
            "red" => JobColor::Failure,
            "disabled" => JobColor::Disabled,
            _ => JobColor::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for JobColor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Deserialize::deserialize(deserializer)?;
        Ok(raw.as_deref().map(JobColor::parse).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BuildRef {
    pub number: u64,
    #[serde(default)]
    pub url: Option<String>,
    /// Milliseconds since epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Milliseconds.
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobSnapshot {
    pub name: String,
    #[serde(default)]
    pub color: JobColor,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "lastBuild", default)]
    pub last_build: Option<BuildRef>,
    #[serde(rename = "lastSuccessfulBuild", default)]
    pub last_successful_build: Option<BuildRef>,
    #[serde(rename = "lastFailedBuild", default)]
    pub last_failed_build: Option<BuildRef>,
}

#[derive(Deserialize)]
pub(crate) struct JobList {
    #[serde(default)]
    pub jobs: Vec<JobSnapshot>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildSummary {
    pub number: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl BuildSummary {
    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_jenkins_result(self.result.as_deref(), self.result.is_none())
    }
}

#[derive(Deserialize)]
pub(crate) struct BuildList {
    #[serde(default)]
    pub builds: Vec<BuildSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildDetail {
    pub number: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    actions: Vec<BuildAction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BuildAction {
    #[serde(default)]
    causes: Option<Vec<BuildCause>>,
    #[serde(default)]
    parameters: Option<Vec<BuildParameter>>,
    #[serde(rename = "lastBuiltRevision", default)]
    last_built_revision: Option<Revision>,
}

#[derive(Debug, Clone, Deserialize)]
struct BuildCause {
    #[serde(rename = "userName", default)]
    user_name: Option<String>,
    #[serde(rename = "shortDescription", default)]
    short_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BuildParameter {
    name: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct Revision {
    #[serde(default)]
    branch: Vec<NamedBranch>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedBranch {
    name: String,
}

const BRANCH_PARAMETERS: [&str; 3] = ["BRANCH", "BRANCH_NAME", "GIT_BRANCH"];

impl BuildDetail {
    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_jenkins_result(self.result.as_deref(), self.building)
    }

    /// Duration in whole seconds, if Jenkins reported a non-zero one.
    pub fn duration_seconds(&self) -> Option<u64> {
        self.duration.filter(|d| *d > 0).map(|d| d / 1000)
    }

    pub fn triggered_by(&self) -> Option<String> {
        let causes = self.actions.iter().filter_map(|a| a.causes.as_ref()).flatten();
        let mut fallback = None;
        for cause in causes {
            if let Some(user) = &cause.user_name {
                return Some(user.clone());
            }
            if fallback.is_none() {
                fallback = cause.short_description.clone();
            }
        }
        fallback
    }

    pub fn branch(&self) -> Option<String> {
        let params = self.actions.iter().filter_map(|a| a.parameters.as_ref()).flatten();
        for p in params {
            if BRANCH_PARAMETERS.contains(&p.name.as_str()) {
                if let Some(serde_json::Value::String(v)) = &p.value {
                    if !v.is_empty() {
                        return Some(v.clone());
                    }
                }
            }
        }

        self.actions
            .iter()
            .filter_map(|a| a.last_built_revision.as_ref())
            .find_map(|r| r.branch.first())
            .map(|b| b.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Crumb {
    pub crumb: String,
    #[serde(rename = "crumbRequestField")]
    pub crumb_request_field: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeInfo {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub executors: Vec<serde_json::Value>,
    #[serde(rename = "monitorData", default)]
    pub monitor_data: Option<serde_json::Value>,
}

impl NodeInfo {
    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }
}

#[derive(Deserialize)]
pub(crate) struct NodeList {
    #[serde(default)]
    pub computer: Vec<NodeInfo>,
}

/// Overall job counts derived from one job listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobSummary {
    pub total_jobs: usize,
    pub jobs_with_builds: usize,
    pub building: usize,
    pub successful: usize,
    pub failed: usize,
    pub avg_build_seconds: f64,
    pub success_rate: f64,
    pub failure_rate: f64,
}

impl JobSummary {
    pub fn from_jobs(jobs: &[JobSnapshot]) -> Self {
        let mut summary = JobSummary { total_jobs: jobs.len(), ..Default::default() };
        let mut build_secs = Vec::new();

        for job in jobs {
            if let Some(last) = &job.last_build {
                summary.jobs_with_builds += 1;
                if let Some(d) = last.duration.filter(|d| *d > 0) {
                    build_secs.push(d as f64 / 1000.0);
                }
            }
            match job.color {
                JobColor::Building => summary.building += 1,
                JobColor::Success => summary.successful += 1,
                JobColor::Failure => summary.failed += 1,
                _ => {}
            }
        }

        if !build_secs.is_empty() {
            summary.avg_build_seconds = build_secs.iter().sum::<f64>() / build_secs.len() as f64;
        }
        if summary.total_jobs > 0 {
            summary.success_rate = summary.successful as f64 / summary.total_jobs as f64 * 100.0;
            summary.failure_rate = summary.failed as f64 / summary.total_jobs as f64 * 100.0;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn colors_decode_into_closed_set() {
        assert_eq!(JobColor::parse("blue"), JobColor::Success);
        assert_eq!(JobColor::parse("red"), JobColor::Failure);
        assert_eq!(JobColor::parse("red_anime"), JobColor::Building);
        assert_eq!(JobColor::parse("blue_anime"), JobColor::Building);
        assert_eq!(JobColor::parse("disabled"), JobColor::Disabled);
        assert_eq!(JobColor::parse("yellow"), JobColor::Unknown);
        assert_eq!(JobColor::parse("notbuilt"), JobColor::Unknown);
    }

    #[test]
    fn job_snapshot_tolerates_missing_and_null_fields() {
        let job: JobSnapshot = serde_json::from_value(json!({
            "name": "api",
            "color": null,
            "lastBuild": {"number": 7, "url": "http://j/job/api/7/"},
            "lastFailedBuild": null
        }))
        .unwrap();

        assert_eq!(job.color, JobColor::Unknown);
        assert_eq!(job.last_build.unwrap().number, 7);
        assert!(job.last_failed_build.is_none());
        assert!(job.last_successful_build.is_none());
    }

    #[test]
    fn build_detail_extracts_actor_and_branch() {
        let detail: BuildDetail = serde_json::from_value(json!({
            "number": 12,
            "result": "FAILURE",
            "building": false,
            "duration": 125000,
            "actions": [
                {},
                {"causes": [{"shortDescription": "Started by timer"}, {"userName": "alice"}]},
                {"parameters": [{"name": "GIT_BRANCH", "value": "origin/main"}]},
                {"lastBuiltRevision": {"branch": [{"name": "refs/heads/dev"}]}}
            ]
        }))
        .unwrap();

        assert_eq!(detail.status(), BuildStatus::Failure);
        assert_eq!(detail.duration_seconds(), Some(125));
        assert_eq!(detail.triggered_by().as_deref(), Some("alice"));
        assert_eq!(detail.branch().as_deref(), Some("origin/main"));
    }

    #[test]
    fn build_detail_falls_back_to_revision_branch() {
        let detail: BuildDetail = serde_json::from_value(json!({
            "number": 3,
            "building": true,
            "actions": [{"lastBuiltRevision": {"branch": [{"name": "refs/heads/dev"}]}}]
        }))
        .unwrap();

        assert_eq!(detail.status(), BuildStatus::InProgress);
        assert_eq!(detail.branch().as_deref(), Some("refs/heads/dev"));
        assert_eq!(detail.triggered_by(), None);
    }

    #[test]
    fn job_summary_counts_colors() {
        let jobs: Vec<JobSnapshot> = serde_json::from_value(json!([
            {"name": "a", "color": "blue", "lastBuild": {"number": 1, "duration": 4000}},
            {"name": "b", "color": "red", "lastBuild": {"number": 2, "duration": 2000}},
            {"name": "c", "color": "blue_anime"},
            {"name": "d", "color": "disabled"}
        ]))
        .unwrap();

        let s = JobSummary::from_jobs(&jobs);
        assert_eq!(s.total_jobs, 4);
        assert_eq!(s.jobs_with_builds, 2);
        assert_eq!((s.successful, s.failed, s.building), (1, 1, 1));
        assert_eq!(s.avg_build_seconds, 3.0);
        assert_eq!(s.success_rate, 25.0);
    }
}
