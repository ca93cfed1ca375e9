//! Manifest refresh subsystem: on-disk repository, telemetry-driven
//! enrichment, and the stateful job engine.

pub mod enrich;
pub mod refresher;
pub mod repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::manifest::RefreshProfile, telemetry::TelemetrySnapshot,
    types::service::ServiceName,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    pub name: ServiceName,
    pub file_path: String,
    pub manifest: serde_json::Value,
    pub last_modified: DateTime<Utc>,
    pub source: ManifestSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestSource {
    Filesystem,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionMetadata {
    pub job_id: String,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
    pub confidence: f64,
    pub profile: RefreshProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Generating,
    AwaitingApproval,
    Applied,
    Failed,
}

impl JobStatus {
    /// Terminal jobs never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeImpact {
    Increase,
    Decrease,
    Change,
}

/// One enrichment decision: what moved, from what, to what, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestChange {
    pub path: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub rationale: String,
    pub impact: ChangeImpact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshJob {
    pub id: String,
    pub service: ServiceName,
    pub status: JobStatus,
    pub profile: RefreshProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub diff_summary: Vec<ManifestChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_preview: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshJob {
    #[must_use]
    pub fn new(
        service: ServiceName,
        profile: RefreshProfile,
        notes: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            service,
            status: JobStatus::Generating,
            profile,
            created_at: now,
            updated_at: now,
            notes,
            telemetry: None,
            drift_score: None,
            risk_level: None,
            confidence: None,
            diff_summary: Vec::new(),
            manifest_preview: None,
            manifest_path: None,
            error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }
}

/// Summary row for the manifest listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    pub service: ServiceName,
    pub last_modified: DateTime<Utc>,
    pub source: ManifestSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&JobStatus::AwaitingApproval).unwrap(),
            "\"AWAITING_APPROVAL\""
        );
        assert!(JobStatus::Applied.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Generating.is_terminal());
    }

    #[test]
    fn new_job_timestamps_are_consistent() {
        let job = RefreshJob::new(
            ServiceName::from("search-service"),
            RefreshProfile::Balanced,
            None,
        );
        assert!(job.created_at <= job.updated_at);
        assert_eq!(job.status, JobStatus::Generating);
    }
}
