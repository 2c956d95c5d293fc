use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Local};
use regex::Regex;
use reqwest::header::COOKIE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::config::ApiSection;
use crate::request::VideoRequest;
use crate::session::SessionCredential;

/// Query parameter that carries the real manifest location inside a playback
/// descriptor URL.
const PLAYBACK_URL_PARAM: &str = "playbackurl";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not authorized to access video {id}")]
    NotAuthorized { id: String },
    #[error("video {id} not found")]
    NotFound { id: String },
    #[error("invalid response for {context}: {reason}")]
    InvalidResponse { context: String, reason: String },
    #[error("video {id} has no playback descriptor of type {mime_type}")]
    NoCompatibleFormat { id: String, mime_type: String },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        FetchError::Network(error.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub name: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub playback_urls: Vec<PlaybackDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDescriptor {
    pub mime_type: String,
    pub playback_url: String,
}

impl VideoMetadata {
    pub fn published_at(&self) -> Option<DateTime<Local>> {
        let raw = self.published_date.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|date| date.with_timezone(&Local))
    }

    /// File-system safe title, prefixed with the lesson date when the
    /// platform reports one.
    pub fn display_title(&self) -> String {
        let title = sanitize_title(self.name.trim());
        match self.published_at() {
            Some(date) => format!("Lesson {} - {title}", date.format("%d_%m_%Y")),
            None => title,
        }
    }
}

pub fn sanitize_title(title: &str) -> String {
    static ILLEGAL: OnceLock<Regex> = OnceLock::new();
    let pattern =
        ILLEGAL.get_or_init(|| Regex::new(r#"[/\\?%*:;|"<>]"#).expect("static pattern is valid"));
    pattern.replace_all(title, "-").into_owned()
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

/// Authenticated access to the platform API, manifests and keys. `file://`
/// URLs are read from disk so fixtures can stand in for the platform.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: Client,
    api: ApiSection,
}

impl ManifestFetcher {
    pub fn new(api: ApiSection) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(api.user_agent.clone())
            .timeout(Duration::from_secs(api.timeout_seconds.max(1)))
            .build()?;
        Ok(Self { client, api })
    }

    pub fn metadata_url(&self, id: &str) -> String {
        format!(
            "{}/api/videos/{id}?api-version={}",
            self.api.base_url.trim_end_matches('/'),
            self.api.api_version
        )
    }

    pub async fn fetch_metadata(
        &self,
        request: &VideoRequest,
        credential: &SessionCredential,
    ) -> FetchResult<VideoMetadata> {
        let url = self.metadata_url(request.id());
        debug!(id = request.id(), "fetching video metadata");
        let body = match self.fetch_raw(&url, credential, true).await {
            Err(FetchError::Status { status: 404, .. }) => {
                return Err(FetchError::NotFound {
                    id: request.id().to_string(),
                })
            }
            other => other?,
        };
        parse_metadata(request.id(), &body)
    }

    /// Picks the adaptive-streaming playback descriptor and unwraps the
    /// manifest URL it points at.
    pub fn master_manifest_url(
        &self,
        request: &VideoRequest,
        metadata: &VideoMetadata,
    ) -> FetchResult<String> {
        let descriptor = metadata
            .playback_urls
            .iter()
            .find(|descriptor| descriptor.mime_type == self.api.hls_mime_type)
            .ok_or_else(|| FetchError::NoCompatibleFormat {
                id: request.id().to_string(),
                mime_type: self.api.hls_mime_type.clone(),
            })?;
        let parsed =
            Url::parse(&descriptor.playback_url).map_err(|err| FetchError::InvalidUrl {
                url: descriptor.playback_url.clone(),
                reason: err.to_string(),
            })?;
        let embedded = parsed
            .query_pairs()
            .find(|(key, _)| key.eq_ignore_ascii_case(PLAYBACK_URL_PARAM))
            .map(|(_, value)| value.into_owned());
        Ok(embedded.unwrap_or_else(|| descriptor.playback_url.clone()))
    }

    pub async fn fetch_text(&self, url: &str, credential: &SessionCredential) -> FetchResult<String> {
        let bytes = self.fetch_raw(url, credential, false).await?;
        String::from_utf8(bytes).map_err(|err| FetchError::InvalidResponse {
            context: url.to_string(),
            reason: err.to_string(),
        })
    }

    pub async fn fetch_bytes(
        &self,
        url: &str,
        credential: &SessionCredential,
    ) -> FetchResult<Vec<u8>> {
        self.fetch_raw(url, credential, false).await
    }

    async fn fetch_raw(
        &self,
        url: &str,
        credential: &SessionCredential,
        accept_forbidden: bool,
    ) -> FetchResult<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|err| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        if parsed.scheme() == "file" {
            let path = parsed.to_file_path().map_err(|_| FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local path".to_string(),
            })?;
            return fs::read(&path)
                .await
                .map_err(|source| FetchError::Io { path, source });
        }
        let response = self
            .client
            .get(parsed)
            .header(COOKIE, credential.header_value())
            .send()
            .await?;
        let status = response.status();
        // The metadata API reports access errors as a JSON body on 403.
        let readable = status.is_success() || (accept_forbidden && status == StatusCode::FORBIDDEN);
        if !readable {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn parse_metadata(id: &str, body: &[u8]) -> FetchResult<VideoMetadata> {
    if let Ok(envelope) = serde_json::from_slice::<ApiErrorEnvelope>(body) {
        let ApiErrorBody { code, message } = envelope.error;
        return Err(match code.as_str() {
            "Forbidden" => FetchError::NotAuthorized { id: id.to_string() },
            "NotFound" => FetchError::NotFound { id: id.to_string() },
            _ => FetchError::InvalidResponse {
                context: format!("video {id}"),
                reason: message.unwrap_or(code),
            },
        });
    }
    serde_json::from_slice(body).map_err(|err| FetchError::InvalidResponse {
        context: format!("video {id}"),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ID: &str = "9611baf5-b12e-4782-82fb-b2ef68c05adc";

    fn request() -> VideoRequest {
        VideoRequest::parse(&format!("https://web.microsoftstream.com/video/{ID}")).unwrap()
    }

    fn fetcher() -> ManifestFetcher {
        ManifestFetcher::new(ApiSection::default()).unwrap()
    }

    fn metadata(json: &str) -> VideoMetadata {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn forbidden_payload_maps_to_not_authorized() {
        let err = parse_metadata(ID, br#"{"error":{"code":"Forbidden","message":"nope"}}"#)
            .unwrap_err();
        assert!(matches!(err, FetchError::NotAuthorized { .. }));
    }

    #[test]
    fn other_error_payloads_map_to_not_found_or_invalid() {
        let err = parse_metadata(ID, br#"{"error":{"code":"NotFound"}}"#).unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
        let err = parse_metadata(ID, br#"{"error":{"code":"Throttled","message":"slow down"}}"#)
            .unwrap_err();
        match err {
            FetchError::InvalidResponse { reason, .. } => assert_eq!(reason, "slow down"),
            other => panic!("unexpected error {other:?}"),
        }
        let err = parse_metadata(ID, b"<html>").unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse { .. }));
    }

    #[test]
    fn metadata_url_uses_api_version() {
        assert_eq!(
            fetcher().metadata_url(ID),
            format!("https://euwe-1.api.microsoftstream.com/api/videos/{ID}?api-version=1.0-private")
        );
    }

    #[test]
    fn master_url_unwraps_playback_query_parameter() {
        let meta = metadata(
            r#"{
                "name": "Lecture",
                "playbackUrls": [
                    {"mimeType": "application/dash+xml", "playbackUrl": "https://cdn.example.com/dash"},
                    {"mimeType": "application/vnd.apple.mpegurl",
                     "playbackUrl": "https://player.example.com/play?playbackurl=https%3A%2F%2Fams.example.com%2Fvideo.ism%2Fmanifest(format%3Dm3u8-aapl)&other=1"}
                ]
            }"#,
        );
        let url = fetcher().master_manifest_url(&request(), &meta).unwrap();
        assert_eq!(url, "https://ams.example.com/video.ism/manifest(format=m3u8-aapl)");
    }

    #[test]
    fn master_url_requires_hls_descriptor() {
        let meta = metadata(
            r#"{"name": "Lecture", "playbackUrls": [
                {"mimeType": "video/mp4", "playbackUrl": "https://cdn.example.com/file.mp4"}]}"#,
        );
        let err = fetcher().master_manifest_url(&request(), &meta).unwrap_err();
        assert!(matches!(err, FetchError::NoCompatibleFormat { .. }));
    }

    #[test]
    fn display_title_sanitizes_and_prefixes_date() {
        let meta = metadata(
            r#"{"name": "  Analisi I: limiti / derivate? ", "publishedDate": "2020-03-10T12:00:00Z"}"#,
        );
        let local = Local
            .from_utc_datetime(
                &chrono::NaiveDate::from_ymd_opt(2020, 3, 10)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            )
            .format("%d_%m_%Y")
            .to_string();
        assert_eq!(
            meta.display_title(),
            format!("Lesson {local} - Analisi I- limiti - derivate-")
        );
    }

    #[test]
    fn display_title_without_date() {
        let meta = metadata(r#"{"name": "Seminar", "publishedDate": ""}"#);
        assert_eq!(meta.display_title(), "Seminar");
        let meta = metadata(r#"{"name": "Seminar", "publishedDate": null}"#);
        assert_eq!(meta.display_title(), "Seminar");
    }

    #[tokio::test]
    async fn fetch_text_reads_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.m3u8");
        std::fs::write(&path, "#EXTM3U\n").unwrap();
        let credential = SessionCredential::new("a", "s").unwrap();
        let url = Url::from_file_path(&path).unwrap();
        let text = fetcher().fetch_text(url.as_str(), &credential).await.unwrap();
        assert_eq!(text, "#EXTM3U\n");
    }
}
