use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Path segment that precedes the video identifier in a request URL.
pub const VIDEO_PATH_MARKER: &str = "/video/";
pub const VIDEO_ID_LEN: usize = 36;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{url} does not contain a {VIDEO_PATH_MARKER} path segment")]
    MissingVideoSegment { url: String },
    #[error("{url} does not carry a {VIDEO_ID_LEN}-character video identifier")]
    InvalidIdentifier { url: String },
    #[error("failed to read url list {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// A single video to download: the URL the user supplied and the identifier
/// the platform API knows it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRequest {
    url: String,
    id: String,
}

impl VideoRequest {
    pub fn parse(url: &str) -> Result<Self, RequestError> {
        let url = url.trim();
        let start = url
            .find(VIDEO_PATH_MARKER)
            .map(|index| index + VIDEO_PATH_MARKER.len())
            .ok_or_else(|| RequestError::MissingVideoSegment {
                url: url.to_string(),
            })?;
        let id: String = url[start..].chars().take(VIDEO_ID_LEN).collect();
        let well_formed = id.len() == VIDEO_ID_LEN
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !well_formed {
            return Err(RequestError::InvalidIdentifier {
                url: url.to_string(),
            });
        }
        Ok(Self {
            url: url.to_string(),
            id,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for VideoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.id)
    }
}

/// Reads a text file holding one URL per line. Blank lines are dropped,
/// duplicates are kept.
pub fn load_request_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>, RequestError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| RequestError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
