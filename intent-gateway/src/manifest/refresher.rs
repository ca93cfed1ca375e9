//! The stateful refresh job engine: GENERATING -> AWAITING_APPROVAL ->
//! APPLIED / FAILED, with drift scoring and risk-gated auto-apply.

use std::sync::Arc;

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{
    JobStatus, ManifestSummary, RefreshJob, RevisionMetadata, RiskLevel,
    enrich, repository::ManifestRepository,
};
use crate::{
    config::manifest::{ManifestConfig, RefreshProfile},
    error::api::ApiError,
    telemetry::{TelemetrySnapshot, TelemetrySource},
    types::service::ServiceName,
};

const GENERATED_BY: &str = "manifest-refresher";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshOptions {
    pub profile: Option<RefreshProfile>,
    pub notes: Option<String>,
    pub auto_apply: Option<bool>,
}

pub struct ManifestRefresher {
    repository: Arc<ManifestRepository>,
    telemetry: Arc<dyn TelemetrySource>,
    config: ManifestConfig,
    /// One lock over the job table; transitions per job are therefore
    /// linearizable.
    jobs: RwLock<FxHashMap<String, RefreshJob>>,
}

impl ManifestRefresher {
    #[must_use]
    pub fn new(
        repository: Arc<ManifestRepository>,
        telemetry: Arc<dyn TelemetrySource>,
        config: ManifestConfig,
    ) -> Self {
        Self {
            repository,
            telemetry,
            config,
            jobs: RwLock::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn repository(&self) -> &ManifestRepository {
        &self.repository
    }

    /// Jobs newest first.
    pub async fn list_jobs(&self) -> Vec<RefreshJob> {
        let jobs = self.jobs.read().await;
        let mut listed: Vec<RefreshJob> = jobs.values().cloned().collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        listed
    }

    pub async fn get_job(&self, job_id: &str) -> Option<RefreshJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Manifest listing joined with the most recent job per service.
    pub async fn summaries(
        &self,
    ) -> Result<Vec<ManifestSummary>, ApiError> {
        let records = self
            .repository
            .list_manifests()
            .await
            .map_err(ApiError::internal)?;
        let jobs = self.list_jobs().await;
        Ok(records
            .into_iter()
            .map(|record| {
                let last_job = jobs
                    .iter()
                    .find(|job| job.service == record.name);
                ManifestSummary {
                    service: record.name,
                    last_modified: record.last_modified,
                    source: record.source,
                    drift_score: last_job.and_then(|job| job.drift_score),
                    last_job_status: last_job.map(|job| job.status),
                    last_job_at: last_job.map(|job| job.updated_at),
                }
            })
            .collect())
    }

    pub async fn trigger_refresh(
        &self,
        service: &ServiceName,
        options: RefreshOptions,
    ) -> Result<RefreshJob, ApiError> {
        let record = self
            .repository
            .get_manifest(service)
            .await
            .map_err(ApiError::internal)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("service `{service}` not found"))
            })?;

        let profile = options
            .profile
            .unwrap_or(self.config.default_profile);
        let mut job =
            RefreshJob::new(service.clone(), profile, options.notes.clone());
        self.jobs
            .write()
            .await
            .insert(job.id.clone(), job.clone());

        let snapshot = self.telemetry.snapshot(service).await;
        job.telemetry = Some(snapshot.clone());

        match enrich::enrich(&record.manifest, &snapshot, profile) {
            Ok(outcome) => {
                let drift = drift_score(&snapshot);
                let risk = self.risk_level(drift);
                job.drift_score = Some(drift);
                job.risk_level = Some(risk);
                job.confidence = Some(confidence(&snapshot));
                job.diff_summary = outcome.changes;
                job.manifest_preview = Some(outcome.manifest.clone());

                let auto_apply = options
                    .auto_apply
                    .unwrap_or(self.config.auto_apply_low_risk);
                if auto_apply && risk == RiskLevel::Low {
                    match self
                        .repository
                        .save_revision(
                            service,
                            &outcome.manifest,
                            &metadata_for(&job),
                        )
                        .await
                    {
                        Ok(path) => {
                            job.status = JobStatus::Applied;
                            job.manifest_path =
                                Some(path.display().to_string());
                        }
                        Err(error) => {
                            tracing::error!(
                                service = %service,
                                error = %error,
                                "auto-apply failed to persist revision"
                            );
                            job.status = JobStatus::Failed;
                            job.error = Some(error.to_string());
                        }
                    }
                } else {
                    job.status = JobStatus::AwaitingApproval;
                }
            }
            Err(error) => {
                tracing::error!(
                    service = %service,
                    error = %error,
                    "manifest enrichment failed"
                );
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
            }
        }

        job.touch();
        self.jobs
            .write()
            .await
            .insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Persist the previewed revision. Requires `AWAITING_APPROVAL`; the
    /// table lock is held across the write so no concurrent transition can
    /// interleave.
    pub async fn approve(&self, job_id: &str) -> Result<RefreshJob, ApiError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| {
            ApiError::NotFound(format!("job `{job_id}`"))
        })?;
        if job.status != JobStatus::AwaitingApproval {
            return Err(ApiError::State(format!(
                "job `{job_id}` is {}, not AWAITING_APPROVAL",
                job.status
            )));
        }
        let preview = job.manifest_preview.clone().ok_or_else(|| {
            ApiError::State(format!("job `{job_id}` has no manifest preview"))
        })?;

        let service = job.service.clone();
        let metadata = metadata_for(job);
        let path = self
            .repository
            .save_revision(&service, &preview, &metadata)
            .await
            .map_err(ApiError::internal)?;

        job.status = JobStatus::Applied;
        job.manifest_path = Some(path.display().to_string());
        job.touch();
        Ok(job.clone())
    }

    /// Reject a pending job. Durable rollback of an applied revision is out
    /// of scope; terminal jobs never transition.
    pub async fn rollback(
        &self,
        job_id: &str,
    ) -> Result<RefreshJob, ApiError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| {
            ApiError::NotFound(format!("job `{job_id}`"))
        })?;
        if job.status.is_terminal() {
            return Err(ApiError::State(format!(
                "job `{job_id}` already {}",
                job.status
            )));
        }
        job.status = JobStatus::Failed;
        job.error = Some("rollback requested".to_string());
        job.touch();
        Ok(job.clone())
    }

    fn risk_level(&self, drift: f64) -> RiskLevel {
        if drift >= self.config.drift_critical_threshold {
            RiskLevel::High
        } else if drift >= self.config.drift_warning_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// `0.4 * max(0, cpu - 0.6) + 0.3 * max(0, p95/1000 - 0.5) + 0.3 * 2 * err`,
/// clamped to `[0, 1]` and rounded to 2 decimals.
#[must_use]
pub fn drift_score(telemetry: &TelemetrySnapshot) -> f64 {
    let cpu_term = 0.4 * (telemetry.cpu_utilization - 0.6).max(0.0);
    let latency_term =
        0.3 * (telemetry.p95_latency_millis / 1000.0 - 0.5).max(0.0);
    let error_term = 0.3 * (telemetry.error_rate * 2.0);
    let drift = (cpu_term + latency_term + error_term).clamp(0.0, 1.0);
    (drift * 100.0).round() / 100.0
}

#[must_use]
pub fn confidence(telemetry: &TelemetrySnapshot) -> f64 {
    (1.0 - telemetry.error_rate * 4.0).max(0.5)
}

fn metadata_for(job: &RefreshJob) -> RevisionMetadata {
    RevisionMetadata {
        job_id: job.id.clone(),
        generated_at: Utc::now(),
        generated_by: GENERATED_BY.to_string(),
        confidence: job.confidence.unwrap_or(0.5),
        profile: job.profile,
        notes: job.notes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;

    /// Fixed-figure source so drift is dialed in exactly.
    struct FixedTelemetry(TelemetrySnapshot);

    #[async_trait]
    impl TelemetrySource for FixedTelemetry {
        async fn snapshot(&self, _service: &ServiceName) -> TelemetrySnapshot {
            self.0.clone()
        }
    }

    fn snapshot(cpu: f64, p95: f64, errors: f64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            service: ServiceName::from("user-authentication-service"),
            window_start: Utc::now(),
            window_end: Utc::now(),
            cpu_utilization: cpu,
            memory_utilization: 0.5,
            p95_latency_millis: p95,
            error_rate: errors,
            requests_per_minute: 500.0,
            cost_per_million_requests: 12.0,
        }
    }

    const MANIFEST: &str = r"
apiVersion: serving.knative.dev/v1
kind: Service
metadata:
  name: user-authentication-service
spec:
  template:
    metadata:
      annotations:
        autoscaling.knative.dev/minScale: '1'
        autoscaling.knative.dev/maxScale: '10'
    spec:
      containers:
        - image: gcr.io/demo/auth:latest
          resources:
            limits:
              cpu: '1'
              memory: 512Mi
";

    fn refresher(
        telemetry: TelemetrySnapshot,
        config: ManifestConfig,
    ) -> (tempfile::TempDir, ManifestRefresher) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("manifests");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("user-authentication-service.yml"), MANIFEST)
            .unwrap();
        let repository = Arc::new(ManifestRepository::new(
            dir,
            tmp.path().join("history"),
        ));
        let refresher = ManifestRefresher::new(
            repository,
            Arc::new(FixedTelemetry(telemetry)),
            config,
        );
        (tmp, refresher)
    }

    fn service() -> ServiceName {
        ServiceName::from("user-authentication-service")
    }

    #[test]
    fn drift_formula_matches_the_documented_shape() {
        // 0.4 * 0.2 + 0.3 * 0.3 + 0.3 * 0.04 = 0.182 -> 0.18
        let drift = drift_score(&snapshot(0.8, 800.0, 0.02));
        assert!((drift - 0.18).abs() < 1e-9);
        assert_eq!(drift_score(&snapshot(0.1, 100.0, 0.0)), 0.0);
        // Saturated inputs clamp to 1.
        assert!(drift_score(&snapshot(5.0, 10_000.0, 1.0)) <= 1.0);
    }

    #[test]
    fn confidence_floors_at_a_half() {
        assert!((confidence(&snapshot(0.5, 100.0, 0.01)) - 0.96).abs() < 1e-9);
        assert!((confidence(&snapshot(0.5, 100.0, 0.5)) - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn performance_refresh_awaits_approval_with_a_min_scale_diff() {
        let (_tmp, refresher) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        let job = refresher
            .trigger_refresh(
                &service(),
                RefreshOptions {
                    profile: Some(RefreshProfile::Performance),
                    auto_apply: Some(false),
                    notes: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::AwaitingApproval);
        assert!(job.manifest_preview.is_some());
        assert!(job.diff_summary.iter().any(|change| {
            change.path
                == "spec.template.metadata.annotations.autoscaling.knative.dev/minScale"
        }));
        assert!(job.created_at <= job.updated_at);
    }

    #[tokio::test]
    async fn approve_persists_the_revision_and_terminates_the_job() {
        let (tmp, refresher) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        let job = refresher
            .trigger_refresh(
                &service(),
                RefreshOptions {
                    profile: Some(RefreshProfile::Performance),
                    ..RefreshOptions::default()
                },
            )
            .await
            .unwrap();
        let approved = refresher.approve(&job.id).await.unwrap();
        assert_eq!(approved.status, JobStatus::Applied);
        let path = approved.manifest_path.unwrap();
        assert!(std::path::Path::new(&path).exists());
        assert!(path.contains(&format!(
            "user-authentication-service-{}",
            job.id
        )));
        drop(tmp);
    }

    #[tokio::test]
    async fn approving_twice_is_a_state_error() {
        let (_tmp, refresher) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        let job = refresher
            .trigger_refresh(&service(), RefreshOptions::default())
            .await
            .unwrap();
        refresher.approve(&job.id).await.unwrap();
        let error = refresher.approve(&job.id).await.unwrap_err();
        assert!(matches!(error, ApiError::State(_)));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (_tmp, refresher) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        assert!(matches!(
            refresher.approve("missing").await.unwrap_err(),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            refresher.rollback("missing").await.unwrap_err(),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            refresher
                .trigger_refresh(
                    &ServiceName::from("ghost-service"),
                    RefreshOptions::default()
                )
                .await
                .unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn low_drift_auto_applies_high_drift_waits() {
        // drift = 0.3 * 0.02 = 0.01 -> low risk
        let (_tmp, refresher1) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        let applied = refresher1
            .trigger_refresh(
                &service(),
                RefreshOptions {
                    auto_apply: Some(true),
                    ..RefreshOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(applied.status, JobStatus::Applied);
        assert!(applied.manifest_path.is_some());

        // cpu 0.92, p95 900, err 0.08: drift well past the critical line
        let (_tmp2, refresher2) = refresher(
            snapshot(0.92, 2500.0, 0.08),
            ManifestConfig::default(),
        );
        let waiting = refresher2
            .trigger_refresh(
                &service(),
                RefreshOptions {
                    auto_apply: Some(true),
                    ..RefreshOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(waiting.status, JobStatus::AwaitingApproval);
        assert_eq!(waiting.risk_level, Some(RiskLevel::High));
    }

    #[tokio::test]
    async fn rollback_fails_pending_jobs_and_rejects_terminal_ones() {
        let (_tmp, refresher) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        let job = refresher
            .trigger_refresh(&service(), RefreshOptions::default())
            .await
            .unwrap();
        let rolled = refresher.rollback(&job.id).await.unwrap();
        assert_eq!(rolled.status, JobStatus::Failed);
        assert_eq!(rolled.error.as_deref(), Some("rollback requested"));

        let error = refresher.rollback(&job.id).await.unwrap_err();
        assert!(matches!(error, ApiError::State(_)));
    }

    #[tokio::test]
    async fn jobs_list_newest_first() {
        let (_tmp, refresher) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        let first = refresher
            .trigger_refresh(&service(), RefreshOptions::default())
            .await
            .unwrap();
        let second = refresher
            .trigger_refresh(&service(), RefreshOptions::default())
            .await
            .unwrap();
        let listed = refresher.list_jobs().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn summaries_carry_the_latest_job_state() {
        let (_tmp, refresher) = refresher(
            snapshot(0.5, 100.0, 0.01),
            ManifestConfig::default(),
        );
        let job = refresher
            .trigger_refresh(&service(), RefreshOptions::default())
            .await
            .unwrap();
        let summaries = refresher.summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.service, service());
        assert_eq!(summary.last_job_status, Some(job.status));
        assert_eq!(summary.drift_score, job.drift_score);
    }
}
