use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::fetcher::ManifestFetcher;
use crate::session::SessionCredential;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("protection key {uri} unavailable: {reason}")]
    Unavailable { uri: String, reason: String },
}

pub type KeyResult<T> = Result<T, KeyError>;

/// A protection key persisted inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalKey {
    pub remote_uri: String,
    pub path: PathBuf,
    /// `file:` URL written into mux manifests in place of `remote_uri`.
    pub reference: String,
    pub len: usize,
}

impl LocalKey {
    /// The same local file standing in for another remote URI.
    pub fn for_uri(&self, remote_uri: &str) -> LocalKey {
        LocalKey {
            remote_uri: remote_uri.to_string(),
            ..self.clone()
        }
    }
}

/// Fetches protection keys and stores them under a fixed file name.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    file_name: String,
}

impl KeyResolver {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub async fn resolve(
        &self,
        fetcher: &ManifestFetcher,
        credential: &SessionCredential,
        key_uri: &str,
        directory: &Path,
    ) -> KeyResult<LocalKey> {
        self.resolve_as(fetcher, credential, key_uri, directory, &self.file_name)
            .await
    }

    pub async fn resolve_as(
        &self,
        fetcher: &ManifestFetcher,
        credential: &SessionCredential,
        key_uri: &str,
        directory: &Path,
        file_name: &str,
    ) -> KeyResult<LocalKey> {
        let unavailable = |reason: String| KeyError::Unavailable {
            uri: key_uri.to_string(),
            reason,
        };
        let bytes = fetcher
            .fetch_bytes(key_uri, credential)
            .await
            .map_err(|err| unavailable(err.to_string()))?;
        let path = absolute(&directory.join(file_name)).map_err(|err| unavailable(err.to_string()))?;
        fs::write(&path, &bytes)
            .await
            .map_err(|err| unavailable(format!("writing {}: {err}", path.display())))?;
        info!(path = %path.display(), bytes = bytes.len(), "protection key stored");
        Ok(LocalKey {
            remote_uri: key_uri.to_string(),
            reference: local_reference(&path),
            path,
            len: bytes.len(),
        })
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// `file://` URL for an absolute path, with `/` separators on every host.
pub fn local_reference(path: &Path) -> String {
    let rendered = path.to_string_lossy();
    if cfg!(windows) {
        format!("file:{}", rendered.replace('\\', "/"))
    } else {
        format!("file://{rendered}")
    }
}
