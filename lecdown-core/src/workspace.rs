use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files one track occupies inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPaths {
    pub kind: MediaKind,
    /// Manifest handed to the transfer tool.
    pub transfer_manifest: PathBuf,
    /// Manifest handed to the muxer.
    pub mux_manifest: PathBuf,
    pub segments_dir: PathBuf,
    /// `segments_dir` relative to the workspace root, as written into the
    /// mux manifest.
    pub segments_subdir: String,
}

/// Per-request scratch directory. Everything a request downloads or writes
/// before the final merge lives under `root`.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates `<parent>/<id>`, wiping whatever an earlier run left there.
    pub async fn create(parent: &Path, id: &str) -> io::Result<Self> {
        let root = parent.join(id);
        if fs::symlink_metadata(&root).await.is_ok() {
            remove_tree(&root)?;
        }
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn track(&self, kind: MediaKind) -> TrackPaths {
        let segments_subdir = format!("{kind}_segments");
        TrackPaths {
            kind,
            transfer_manifest: self.root.join(format!("{kind}_full.m3u8")),
            mux_manifest: self.root.join(format!("{kind}_tmp.m3u8")),
            segments_dir: self.root.join(&segments_subdir),
            segments_subdir,
        }
    }

    pub fn cleanup(self) {
        if let Err(err) = remove_tree(&self.root) {
            warn!(path = %self.root.display(), error = %err, "failed to clean workspace directory");
        }
    }
}

/// Removes `path` and everything below it, depth first. Symbolic links are
/// unlinked, never followed, so nothing outside the tree is touched. A missing
/// path is not an error.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
        Ok(meta) if !meta.is_dir() => return std::fs::remove_file(path),
        Ok(_) => {}
    }
    let walker = WalkDir::new(path)
        .follow_links(false)
        .follow_root_links(false)
        .contents_first(true);
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

pub(crate) async fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
