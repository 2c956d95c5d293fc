pub mod acquire;
pub mod batch;
pub mod config;
pub mod error;
pub mod exec;
pub mod fetcher;
pub mod key;
pub mod manifest;
pub mod merge;
pub mod request;
pub mod session;
pub mod workspace;

pub use batch::{BatchResult, Downloader, PipelineError, PipelineResult, RequestStage};
pub use config::{load_config, KeyPolicy, LecdownConfig};
pub use error::{ConfigError, Result};
pub use manifest::{Catalog, ManifestError, QualityChooser};
pub use request::{load_request_list, VideoRequest};
pub use session::{SessionCredential, SessionError};
