//! Atomic replacement of the artifacts in the daemon's configuration directory.
//!
//! Each artifact is written in full to a hidden temporary file in the target
//! directory, flushed to disk, and then renamed over the live file. Nothing is
//! renamed until every temporary file has been written, so a failed publish
//! leaves the previous configuration untouched.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::{Artifact, ArtifactKind, CompiledConfig};
use crate::config::ExportConfig;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("refusing to publish empty {0} artifact")]
    EmptyArtifact(ArtifactKind),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFile {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub records: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub directory: PathBuf,
    pub files: Vec<PublishedFile>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PublishError + '_ {
    move |source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn file_name(export: &ExportConfig, kind: ArtifactKind) -> &str {
    match kind {
        ArtifactKind::Users => &export.users_file,
        ArtifactKind::Hosts => &export.hosts_file,
        ArtifactKind::HostGroups => &export.host_groups_file,
    }
}

async fn write_temp(directory: &Path, name: &str, artifact: &Artifact) -> Result<PathBuf, PublishError> {
    let temp = directory.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));

    let mut file = tokio::fs::File::create(&temp)
        .await
        .map_err(io_error(&temp))?;
    file.write_all(artifact.content.as_bytes())
        .await
        .map_err(io_error(&temp))?;
    file.sync_all().await.map_err(io_error(&temp))?;

    Ok(temp)
}

async fn discard(temps: &[(PathBuf, PathBuf, &Artifact)]) {
    for (temp, _, _) in temps {
        if let Err(e) = tokio::fs::remove_file(temp).await {
            warn!(path = ?temp, error = %e, "Failed to remove temporary artifact");
        }
    }
}

/// Writes all three artifacts into `export.directory`.
///
/// Artifacts with no records are refused unless `allow_empty` is set.
pub async fn publish(
    compiled: &CompiledConfig,
    export: &ExportConfig,
    allow_empty: bool,
) -> Result<PublishReport, PublishError> {
    if !allow_empty {
        if let Some(empty) = compiled.artifacts().iter().find(|a| a.records == 0) {
            return Err(PublishError::EmptyArtifact(empty.kind));
        }
    }

    let directory = PathBuf::from(&export.directory);
    tokio::fs::create_dir_all(&directory)
        .await
        .map_err(io_error(&directory))?;

    let mut staged = Vec::with_capacity(ArtifactKind::ALL.len());
    for artifact in compiled.artifacts() {
        let name = file_name(export, artifact.kind);
        match write_temp(&directory, name, artifact).await {
            Ok(temp) => staged.push((temp, directory.join(name), artifact)),
            Err(e) => {
                discard(&staged).await;
                return Err(e);
            }
        }
    }

    let mut files = Vec::with_capacity(staged.len());
    for (i, (temp, target, artifact)) in staged.iter().enumerate() {
        if let Err(source) = tokio::fs::rename(temp, target).await {
            discard(&staged[i..]).await;
            return Err(PublishError::Io {
                path: target.clone(),
                source,
            });
        }

        info!(
            artifact = %artifact.kind,
            path = ?target,
            records = artifact.records,
            "Published artifact"
        );
        files.push(PublishedFile {
            kind: artifact.kind,
            path: target.clone(),
            records: artifact.records,
            bytes: artifact.content.len(),
        });
    }

    Ok(PublishReport { directory, files })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(kind: ArtifactKind, content: &str, records: usize) -> Artifact {
        Artifact {
            kind,
            content: content.to_string(),
            records,
        }
    }

    fn compiled(records: usize) -> CompiledConfig {
        CompiledConfig {
            users: artifact(ArtifactKind::Users, "user a {\n}\n", records),
            hosts: artifact(ArtifactKind::Hosts, "host b {\n}\n", 1),
            host_groups: artifact(ArtifactKind::HostGroups, "hostgroup c {\n}\n", 1),
        }
    }

    fn export_dir() -> ExportConfig {
        let dir = std::env::temp_dir().join(format!("tacman-publish-{}", uuid::Uuid::new_v4()));
        ExportConfig {
            directory: dir.to_string_lossy().into_owned(),
            ..ExportConfig::default()
        }
    }

    #[tokio::test]
    async fn test_publish_replaces_files() {
        let export = export_dir();
        std::fs::create_dir_all(&export.directory).unwrap();
        let users = Path::new(&export.directory).join("users");
        std::fs::write(&users, "old").unwrap();

        let report = publish(&compiled(1), &export, false).await.unwrap();
        assert_eq!(report.files.len(), 3);
        assert_eq!(std::fs::read_to_string(&users).unwrap(), "user a {\n}\n");
        assert_eq!(
            std::fs::read_to_string(Path::new(&export.directory).join("host_groups")).unwrap(),
            "hostgroup c {\n}\n"
        );

        // No temporary files are left behind.
        let leftovers = std::fs::read_dir(&export.directory)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        std::fs::remove_dir_all(&export.directory).ok();
    }

    #[tokio::test]
    async fn test_empty_artifact_is_refused() {
        let export = export_dir();

        let err = publish(&compiled(0), &export, false).await.unwrap_err();
        assert!(matches!(err, PublishError::EmptyArtifact(ArtifactKind::Users)));
        assert!(!Path::new(&export.directory).exists());

        publish(&compiled(0), &export, true).await.unwrap();
        assert!(Path::new(&export.directory).join("users").exists());

        std::fs::remove_dir_all(&export.directory).ok();
    }
}
