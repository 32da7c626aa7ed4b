use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Success,
    Failure,
    Aborted,
    Unstable,
    InProgress,
    Queued,
}

impl BuildStatus {
    /// Maps a Jenkins `result` field; a running build has no result yet.
    pub fn from_jenkins_result(result: Option<&str>, building: bool) -> Self {
        if building {
            return BuildStatus::InProgress;
        }
        match result {
            Some(r) => Self::parse(r).unwrap_or(BuildStatus::Queued),
            None => BuildStatus::Queued,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Some(BuildStatus::Success),
            "FAILURE" => Some(BuildStatus::Failure),
            "ABORTED" => Some(BuildStatus::Aborted),
            "UNSTABLE" => Some(BuildStatus::Unstable),
            "IN_PROGRESS" => Some(BuildStatus::InProgress),
            "QUEUED" => Some(BuildStatus::Queued),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::Aborted => "ABORTED",
            BuildStatus::Unstable => "UNSTABLE",
            BuildStatus::InProgress => "IN_PROGRESS",
            BuildStatus::Queued => "QUEUED",
        }
    }

    /// Counted against the failure rate.
    pub fn is_failure(&self) -> bool {
        matches!(self, BuildStatus::Failure | BuildStatus::Aborted | BuildStatus::Unstable)
    }

    /// Attachment color for chat webhooks.
    pub fn webhook_color(&self) -> &'static str {
        match self {
            BuildStatus::Success => "good",
            BuildStatus::Failure => "danger",
            BuildStatus::Aborted | BuildStatus::Unstable => "warning",
            BuildStatus::InProgress => "#439FE0",
            BuildStatus::Queued => "#95A5A6",
        }
    }

    /// Badge color for HTML email.
    pub fn email_color(&self) -> &'static str {
        match self {
            BuildStatus::Success => "#28a745",
            BuildStatus::Failure => "#dc3545",
            BuildStatus::Aborted => "#ffc107",
            BuildStatus::Unstable => "#fd7e14",
            BuildStatus::InProgress => "#17a2b8",
            BuildStatus::Queued => "#6c757d",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the storage collaborator's `builds` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BuildRow {
    pub pipeline_name: String,
    pub build_number: i64,
    pub status: String,
    /// Seconds.
    pub duration: Option<i64>,
    /// Unix seconds.
    pub timestamp: i64,
    pub triggered_by: Option<String>,
    pub branch: Option<String>,
    pub url: Option<String>,
}

impl BuildRow {
    pub fn build_status(&self) -> Option<BuildStatus> {
        BuildStatus::parse(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jenkins_results_map_to_tiers() {
        assert_eq!(BuildStatus::from_jenkins_result(Some("SUCCESS"), false), BuildStatus::Success);
        assert_eq!(BuildStatus::from_jenkins_result(Some("UNSTABLE"), false), BuildStatus::Unstable);
        assert_eq!(BuildStatus::from_jenkins_result(None, true), BuildStatus::InProgress);
        assert_eq!(BuildStatus::from_jenkins_result(None, false), BuildStatus::Queued);
        assert_eq!(BuildStatus::from_jenkins_result(Some("NOT_BUILT"), false), BuildStatus::Queued);
    }

    #[test]
    fn each_tier_has_a_distinct_email_color() {
        let all = [
            BuildStatus::Success,
            BuildStatus::Failure,
            BuildStatus::Aborted,
            BuildStatus::Unstable,
            BuildStatus::InProgress,
            BuildStatus::Queued,
        ];
        let colors: std::collections::HashSet<_> = all.iter().map(|s| s.email_color()).collect();
        assert_eq!(colors.len(), all.len());
        assert_eq!(BuildStatus::Failure.webhook_color(), "danger");
    }
}
