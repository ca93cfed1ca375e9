//! Read-through manifest repository: YAML files on disk, memoized records
//! in memory, revisions written atomically with a metadata sidecar.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::{ManifestRecord, ManifestSource, RevisionMetadata};
use crate::types::service::ServiceName;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("manifest serialization: {0}")]
    Serialize(String),
}

pub struct ManifestRepository {
    dir: PathBuf,
    history_dir: PathBuf,
    /// First reader scans the directory and memoizes; one lock guards the
    /// whole table.
    records: RwLock<Option<IndexMap<ServiceName, ManifestRecord>>>,
}

impl ManifestRepository {
    #[must_use]
    pub fn new(dir: PathBuf, history_dir: PathBuf) -> Self {
        Self {
            dir,
            history_dir,
            records: RwLock::new(None),
        }
    }

    pub async fn list_manifests(
        &self,
    ) -> Result<Vec<ManifestRecord>, RepositoryError> {
        self.ensure_loaded().await?;
        let records = self.records.read().await;
        Ok(records
            .as_ref()
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn get_manifest(
        &self,
        service: &ServiceName,
    ) -> Result<Option<ManifestRecord>, RepositoryError> {
        self.ensure_loaded().await?;
        let records = self.records.read().await;
        Ok(records
            .as_ref()
            .and_then(|table| table.get(service).cloned()))
    }

    /// Persist a generated revision as `<service>-<job_id>.yml` plus a
    /// `.meta.json` sidecar, then update the in-memory record. The YAML is
    /// written to a temp name and renamed into place to avoid partial files.
    pub async fn save_revision(
        &self,
        service: &ServiceName,
        manifest: &serde_json::Value,
        metadata: &RevisionMetadata,
    ) -> Result<PathBuf, RepositoryError> {
        tokio::fs::create_dir_all(&self.history_dir)
            .await
            .map_err(|source| RepositoryError::Io {
                path: self.history_dir.clone(),
                source,
            })?;

        let file_name = format!("{service}-{}.yml", metadata.job_id);
        let path = self.history_dir.join(&file_name);
        let yaml = serde_yml::to_string(manifest)
            .map_err(|e| RepositoryError::Serialize(e.to_string()))?;
        write_atomically(&path, yaml.as_bytes()).await?;

        let sidecar = self
            .history_dir
            .join(format!("{service}-{}.meta.json", metadata.job_id));
        let metadata_json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| RepositoryError::Serialize(e.to_string()))?;
        write_atomically(&sidecar, &metadata_json).await?;

        let absolute = path
            .canonicalize()
            .unwrap_or_else(|_| path.clone());

        self.ensure_loaded().await?;
        let mut records = self.records.write().await;
        if let Some(table) = records.as_mut() {
            table.insert(
                service.clone(),
                ManifestRecord {
                    name: service.clone(),
                    file_path: absolute.display().to_string(),
                    manifest: manifest.clone(),
                    last_modified: Utc::now(),
                    source: ManifestSource::Generated,
                },
            );
        }

        Ok(absolute)
    }

    async fn ensure_loaded(&self) -> Result<(), RepositoryError> {
        {
            let records = self.records.read().await;
            if records.is_some() {
                return Ok(());
            }
        }
        let mut records = self.records.write().await;
        if records.is_some() {
            return Ok(());
        }
        *records = Some(self.scan().await?);
        Ok(())
    }

    async fn scan(
        &self,
    ) -> Result<IndexMap<ServiceName, ManifestRecord>, RepositoryError> {
        let mut table = IndexMap::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    "manifest directory missing, starting empty"
                );
                return Ok(table);
            }
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut paths = Vec::new();
        while let Some(entry) =
            dir.next_entry().await.map_err(|source| RepositoryError::Io {
                path: self.dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    ext.eq_ignore_ascii_case("yml")
                        || ext.eq_ignore_ascii_case("yaml")
                });
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let record = load_record(&path).await?;
            table.insert(record.name.clone(), record);
        }
        tracing::debug!(count = table.len(), "manifest repository loaded");
        Ok(table)
    }
}

async fn load_record(path: &Path) -> Result<ManifestRecord, RepositoryError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let manifest: serde_json::Value = serde_yml::from_str(&raw)
        .map_err(|e| RepositoryError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let name = manifest
        .pointer("/metadata/name")
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or("unnamed")
                    .to_string()
            },
            ToString::to_string,
        );
    let last_modified = tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|metadata| metadata.modified().ok())
        .map_or_else(Utc::now, DateTime::<Utc>::from);
    Ok(ManifestRecord {
        name: ServiceName::new(name),
        file_path: path.display().to_string(),
        manifest,
        last_modified,
        source: ManifestSource::Filesystem,
    })
}

async fn write_atomically(
    path: &Path,
    contents: &[u8],
) -> Result<(), RepositoryError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|source| RepositoryError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn workspace() -> (tempfile::TempDir, ManifestRepository) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("manifests");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("user-authentication-service.yml"), MANIFEST)
            .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        let history = tmp.path().join("history");
        let repository = ManifestRepository::new(dir, history);
        (tmp, repository)
    }

    #[tokio::test]
    async fn scans_yaml_files_and_keys_by_metadata_name() {
        let (_tmp, repository) = workspace();
        let manifests = repository.list_manifests().await.unwrap();
        assert_eq!(manifests.len(), 1);
        let record = &manifests[0];
        assert_eq!(
            record.name,
            ServiceName::from("user-authentication-service")
        );
        assert_eq!(record.source, ManifestSource::Filesystem);
        assert_eq!(
            record
                .manifest
                .pointer("/spec/template/metadata/annotations")
                .and_then(|a| a.get("autoscaling.knative.dev/minScale"))
                .and_then(serde_json::Value::as_str),
            Some("1")
        );
    }

    #[tokio::test]
    async fn missing_service_reads_as_none() {
        let (_tmp, repository) = workspace();
        let absent = repository
            .get_manifest(&ServiceName::from("nope"))
            .await
            .unwrap();
        assert!(absent.is_none());
    }

    #[tokio::test]
    async fn save_revision_writes_yaml_and_sidecar_and_updates_the_record() {
        let (_tmp, repository) = workspace();
        let service = ServiceName::from("user-authentication-service");
        let record = repository
            .get_manifest(&service)
            .await
            .unwrap()
            .unwrap();
        let metadata = RevisionMetadata {
            job_id: "job-123".to_string(),
            generated_at: Utc::now(),
            generated_by: "manifest-refresher".to_string(),
            confidence: 0.9,
            profile: crate::config::manifest::RefreshProfile::Balanced,
            notes: None,
        };
        let path = repository
            .save_revision(&service, &record.manifest, &metadata)
            .await
            .unwrap();
        assert!(path.exists());
        assert!(
            path.file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("user-authentication-service-job-123")
        );
        let sidecar = path.with_file_name(
            "user-authentication-service-job-123.meta.json",
        );
        assert!(sidecar.exists());

        let reread: serde_json::Value = serde_yml::from_str(
            &std::fs::read_to_string(&path).unwrap(),
        )
        .unwrap();
        assert_eq!(reread, record.manifest);

        let updated = repository
            .get_manifest(&service)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.source, ManifestSource::Generated);
    }

    #[tokio::test]
    async fn missing_manifest_dir_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let repository = ManifestRepository::new(
            tmp.path().join("absent"),
            tmp.path().join("history"),
        );
        assert!(repository.list_manifests().await.unwrap().is_empty());
    }
}
