use std::path::PathBuf;

use thiserror::Error;

use crate::acquire::AcquireError;
use crate::fetcher::FetchError;
use crate::key::KeyError;
use crate::manifest::ManifestError;
use crate::merge::MergeError;
use crate::request::RequestError;

/// Anything that stops a single request. None of these abort the batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("segment transfer failed: {0}")]
    Acquire(#[from] AcquireError),
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("workspace error at {path}: {source}")]
    Workspace {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
