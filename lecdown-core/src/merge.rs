use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::config::MergeSection;
use crate::exec::{CommandExecutor, SystemCommandExecutor};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{program} exited with status {status:?} while producing {output}")]
    Failed {
        program: PathBuf,
        status: Option<i32>,
        output: PathBuf,
    },
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: PathBuf,
        source: std::io::Error,
    },
}

pub type MergeResult<T> = Result<T, MergeError>;

/// Muxes the downloaded audio and video tracks into one container without
/// re-encoding.
pub struct TrackMerger {
    program: PathBuf,
    protocol_whitelist: String,
    audio_bitstream_filter: String,
    extension: String,
    executor: Arc<dyn CommandExecutor>,
}

impl TrackMerger {
    pub fn new(section: &MergeSection) -> Self {
        Self {
            program: PathBuf::from(&section.tool),
            protocol_whitelist: section.protocol_whitelist.join(","),
            audio_bitstream_filter: section.audio_bitstream_filter.clone(),
            extension: section.container_extension.clone(),
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

    /// `<title>.<ext>` in `output_dir`, or a timestamped sibling when that
    /// name is already taken.
    pub fn output_path(&self, output_dir: &Path, title: &str) -> PathBuf {
        let preferred = output_dir.join(format!("{title}.{}", self.extension));
        if !preferred.exists() {
            return preferred;
        }
        let stamp = Utc::now().timestamp_millis();
        let mut candidate = output_dir.join(format!("{title}-{stamp}.{}", self.extension));
        let mut counter = 1u32;
        while candidate.exists() {
            candidate = output_dir.join(format!("{title}-{stamp}-{counter}.{}", self.extension));
            counter += 1;
        }
        candidate
    }

    pub fn merge_args(&self, audio_manifest: &Path, video_manifest: &Path, output: &Path) -> Vec<String> {
        let mut args = Vec::new();
        for input in [audio_manifest, video_manifest] {
            args.extend([
                "-protocol_whitelist".to_string(),
                self.protocol_whitelist.clone(),
                "-allowed_extensions".to_string(),
                "ALL".to_string(),
                "-i".to_string(),
                input.to_string_lossy().to_string(),
            ]);
        }
        args.extend([
            "-async".to_string(),
            "1".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-bsf:a".to_string(),
            self.audio_bitstream_filter.clone(),
            // never overwrite
            "-n".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    pub async fn merge(
        &self,
        audio_manifest: &Path,
        video_manifest: &Path,
        output_dir: &Path,
        title: &str,
    ) -> MergeResult<PathBuf> {
        let output = self.output_path(output_dir, title);
        let args = self.merge_args(audio_manifest, video_manifest, &output);
        let status = self
            .executor
            .run(&self.program, &args)
            .await
            .map_err(|source| MergeError::Launch {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(MergeError::Failed {
                program: self.program.clone(),
                status: status.code(),
                output,
            });
        }
        info!(output = %output.display(), "tracks merged");
        Ok(output)
    }
}
