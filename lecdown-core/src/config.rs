use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_MARKER: &str = "Fragments";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LecdownConfig {
    pub api: ApiSection,
    pub paths: PathsSection,
    pub manifest: ManifestSection,
    pub download: DownloadSection,
    pub merge: MergeSection,
    pub quality: QualitySection,
}

impl LecdownConfig {
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.output_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.download.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "download.max_attempts",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.download.max_concurrent_downloads == 0
            || self.download.max_connections_per_server == 0
        {
            return Err(ConfigError::Invalid {
                field: "download.max_concurrent_downloads",
                reason: "concurrency levels must be greater than zero".to_string(),
            });
        }
        if self.manifest.segment_marker.is_empty() {
            return Err(ConfigError::Invalid {
                field: "manifest.segment_marker",
                reason: "marker token cannot be empty".to_string(),
            });
        }
        if self.manifest.key_file_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "manifest.key_file_name",
                reason: "must be a bare file name".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub api_version: String,
    pub user_agent: String,
    pub hls_mime_type: String,
    pub timeout_seconds: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "https://euwe-1.api.microsoftstream.com".to_string(),
            api_version: "1.0-private".to_string(),
            user_agent: "lecdown/0.1".to_string(),
            hls_mime_type: HLS_MIME_TYPE.to_string(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub output_dir: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            output_dir: "videos".to_string(),
        }
    }
}

/// Which tracks get their own protection key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// The key referenced by the video track is fetched once and substituted
    /// into both mux manifests.
    #[default]
    SharedVideoKey,
    /// Each track resolves the key its own manifest references.
    PerTrack,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManifestSection {
    pub segment_marker: String,
    pub key_file_name: String,
    pub audio_key_file_name: String,
    pub key_policy: KeyPolicy,
}

impl Default for ManifestSection {
    fn default() -> Self {
        Self {
            segment_marker: SEGMENT_MARKER.to_string(),
            key_file_name: "my.key".to_string(),
            audio_key_file_name: "audio.key".to_string(),
            key_policy: KeyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub tool: String,
    pub max_attempts: u32,
    pub max_concurrent_downloads: u32,
    pub max_connections_per_server: u32,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            tool: "aria2c".to_string(),
            max_attempts: 5,
            max_concurrent_downloads: 16,
            max_connections_per_server: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeSection {
    pub tool: String,
    pub protocol_whitelist: Vec<String>,
    pub audio_bitstream_filter: String,
    pub container_extension: String,
}

impl Default for MergeSection {
    fn default() -> Self {
        Self {
            tool: "ffmpeg".to_string(),
            protocol_whitelist: ["file", "http", "https", "tcp", "tls", "crypto"]
                .into_iter()
                .map(String::from)
                .collect(),
            audio_bitstream_filter: "aac_adtstoasc".to_string(),
            container_extension: "mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QualitySection {
    pub default_index: Option<i64>,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<LecdownConfig> {
    let config: LecdownConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/lecdown.toml");
        let config = load_config(path).expect("config should parse");
        assert_eq!(config.download.tool, "aria2c");
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.download.max_concurrent_downloads, 16);
        assert_eq!(config.manifest.key_policy, KeyPolicy::SharedVideoKey);
        assert_eq!(config.merge.audio_bitstream_filter, "aac_adtstoasc");
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: LecdownConfig = toml::from_str("[download]\nmax_attempts = 2\n").unwrap();
        assert_eq!(config.download.max_attempts, 2);
        assert_eq!(config.download.max_connections_per_server, 16);
        assert_eq!(config.manifest.segment_marker, SEGMENT_MARKER);
        assert_eq!(config.api.hls_mime_type, HLS_MIME_TYPE);
        assert!(config.quality.default_index.is_none());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = LecdownConfig::default();
        config.download.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "download.max_attempts",
                ..
            }
        ));
    }

    #[test]
    fn per_track_key_policy_parses() {
        let config: LecdownConfig =
            toml::from_str("[manifest]\nkey_policy = \"per_track\"\n").unwrap();
        assert_eq!(config.manifest.key_policy, KeyPolicy::PerTrack);
    }
}
