use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::config::DownloadSection;
use crate::exec::{CommandExecutor, SystemCommandExecutor};
use crate::manifest::RewrittenManifest;
use crate::session::SessionCredential;
use crate::workspace::{remove_file_if_exists, remove_tree, MediaKind, TrackPaths};

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("persistent errors while downloading {kind} segments ({attempts} attempts)")]
    PersistentTransferFailure { kind: MediaKind, attempts: u32 },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type AcquireResult<T> = Result<T, AcquireError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireReport {
    pub kind: MediaKind,
    pub attempts: u32,
}

/// Drives the bulk transfer tool over a transfer manifest. Every failed
/// attempt leaves no segment directory or manifest behind.
pub struct SegmentAcquirer {
    program: PathBuf,
    max_attempts: u32,
    max_concurrent_downloads: u32,
    max_connections_per_server: u32,
    executor: Arc<dyn CommandExecutor>,
}

impl SegmentAcquirer {
    pub fn new(section: &DownloadSection) -> Self {
        Self {
            program: PathBuf::from(&section.tool),
            max_attempts: section.max_attempts.max(1),
            max_concurrent_downloads: section.max_concurrent_downloads,
            max_connections_per_server: section.max_connections_per_server,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn transfer_args(
        &self,
        manifest: &Path,
        destination: &Path,
        credential: &SessionCredential,
    ) -> Vec<String> {
        vec![
            "-i".to_string(),
            manifest.to_string_lossy().to_string(),
            "-j".to_string(),
            self.max_concurrent_downloads.to_string(),
            "-x".to_string(),
            self.max_connections_per_server.to_string(),
            "-d".to_string(),
            destination.to_string_lossy().to_string(),
            format!("--header={}", credential.transfer_header()),
        ]
    }

    pub async fn acquire(
        &self,
        paths: &TrackPaths,
        manifests: &RewrittenManifest,
        credential: &SessionCredential,
    ) -> AcquireResult<AcquireReport> {
        let args = self.transfer_args(&paths.transfer_manifest, &paths.segments_dir, credential);
        for attempt in 1..=self.max_attempts {
            write_file(&paths.transfer_manifest, &manifests.transfer).await?;
            write_file(&paths.mux_manifest, &manifests.mux).await?;
            let outcome = self.executor.run(&self.program, &args).await;
            match outcome {
                Ok(status) if status.success() => {
                    info!(kind = %paths.kind, attempt, "segments downloaded");
                    return Ok(AcquireReport {
                        kind: paths.kind,
                        attempts: attempt,
                    });
                }
                Ok(status) => {
                    warn!(kind = %paths.kind, attempt, status = ?status.code(), "lost some segments, trying again");
                }
                Err(err) => {
                    warn!(kind = %paths.kind, attempt, error = %err, "transfer tool could not run");
                }
            }
            self.reset(paths).await?;
        }
        Err(AcquireError::PersistentTransferFailure {
            kind: paths.kind,
            attempts: self.max_attempts,
        })
    }

    async fn reset(&self, paths: &TrackPaths) -> AcquireResult<()> {
        remove_tree(&paths.segments_dir).map_err(|source| AcquireError::Io {
            path: paths.segments_dir.clone(),
            source,
        })?;
        for manifest in [&paths.mux_manifest, &paths.transfer_manifest] {
            remove_file_if_exists(manifest)
                .await
                .map_err(|source| AcquireError::Io {
                    path: manifest.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

async fn write_file(path: &Path, contents: &str) -> AcquireResult<()> {
    fs::write(path, contents)
        .await
        .map_err(|source| AcquireError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;
    use async_trait::async_trait;
    use std::process::ExitStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;
    #[cfg(windows)]
    use std::os::windows::process::ExitStatusExt;

    fn exit_status(code: i32) -> ExitStatus {
        #[cfg(unix)]
        {
            ExitStatus::from_raw(code << 8)
        }
        #[cfg(windows)]
        {
            ExitStatus::from_raw(code as u32)
        }
    }

    /// Fails the first `failures` runs, after partially populating the
    /// destination, then succeeds.
    struct FlakyTransfer {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CommandExecutor for FlakyTransfer {
        async fn run(&self, _program: &Path, args: &[String]) -> std::io::Result<ExitStatus> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let destination = args
                .iter()
                .position(|arg| arg == "-d")
                .map(|index| PathBuf::from(&args[index + 1]))
                .unwrap();
            std::fs::create_dir_all(&destination)?;
            std::fs::write(destination.join(format!("partial-{call}")), b"x")?;
            if call < self.failures {
                Ok(exit_status(1))
            } else {
                Ok(exit_status(0))
            }
        }
    }

    fn section(max_attempts: u32) -> DownloadSection {
        DownloadSection {
            max_attempts,
            ..DownloadSection::default()
        }
    }

    fn manifests() -> RewrittenManifest {
        RewrittenManifest {
            transfer: "#EXTM3U\nhttps://cdn.example.com/Fragments(video=0)\n".to_string(),
            mux: "#EXTM3U\nvideo_segments/Fragments(video=0)\n".to_string(),
        }
    }

    #[test]
    fn transfer_args_carry_concurrency_and_header() {
        let credential = SessionCredential::new("a", "s").unwrap();
        let acquirer = SegmentAcquirer::new(&DownloadSection::default());
        let args = acquirer.transfer_args(
            Path::new("/ws/video_full.m3u8"),
            Path::new("/ws/video_segments"),
            &credential,
        );
        assert_eq!(
            args,
            vec![
                "-i",
                "/ws/video_full.m3u8",
                "-j",
                "16",
                "-x",
                "16",
                "-d",
                "/ws/video_segments",
                "--header=Cookie:Authorization=a; Signature=s",
            ]
        );
    }

    #[tokio::test]
    async fn retry_starts_from_clean_directory() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::create(dir.path(), "vid").await.unwrap();
        let paths = workspace.track(MediaKind::Video);
        let executor = Arc::new(FlakyTransfer {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let acquirer = SegmentAcquirer::new(&section(5)).with_executor(executor.clone());
        let credential = SessionCredential::new("a", "s").unwrap();

        let report = acquirer
            .acquire(&paths, &manifests(), &credential)
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        let entries: Vec<_> = std::fs::read_dir(&paths.segments_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["partial-2".to_string()]);
        assert!(paths.transfer_manifest.exists());
        assert_eq!(
            std::fs::read_to_string(&paths.mux_manifest).unwrap(),
            manifests().mux
        );
    }

    #[tokio::test]
    async fn exhausted_budget_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::create(dir.path(), "vid").await.unwrap();
        let paths = workspace.track(MediaKind::Audio);
        let executor = Arc::new(FlakyTransfer {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let acquirer = SegmentAcquirer::new(&section(5)).with_executor(executor.clone());
        let credential = SessionCredential::new("a", "s").unwrap();

        let err = acquirer
            .acquire(&paths, &manifests(), &credential)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AcquireError::PersistentTransferFailure {
                kind: MediaKind::Audio,
                attempts: 5
            }
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 5);
        assert!(!paths.segments_dir.exists());
        assert!(!paths.transfer_manifest.exists());
        assert!(!paths.mux_manifest.exists());
    }
}
