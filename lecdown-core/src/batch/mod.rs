mod error;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::acquire::{AcquireReport, SegmentAcquirer};
use crate::config::{KeyPolicy, LecdownConfig, ManifestSection};
use crate::exec::CommandExecutor;
use crate::fetcher::ManifestFetcher;
use crate::key::{KeyResolver, LocalKey};
use crate::manifest::{
    key_uri, parse_catalog, resolve_child_url, select_quality, KeySubstitution, LastRendition,
    QualityChooser, RewrittenManifest,
};
use crate::merge::TrackMerger;
use crate::request::VideoRequest;
use crate::session::SessionCredential;
use crate::workspace::{MediaKind, TrackPaths, Workspace};

pub use error::{PipelineError, PipelineResult};
pub use types::{BatchResult, CompletedRequest, FailedRequest, RequestStage};

/// Sequences every request of a batch through fetch, track selection,
/// acquisition and merge. A failing request is logged, recorded and its
/// workspace removed; the batch always moves on to the next one.
pub struct Downloader {
    fetcher: ManifestFetcher,
    key_resolver: KeyResolver,
    acquirer: SegmentAcquirer,
    merger: TrackMerger,
    chooser: Arc<dyn QualityChooser>,
    manifest: ManifestSection,
    output_dir: PathBuf,
    quality: Option<i64>,
}

impl Downloader {
    pub fn new(config: &LecdownConfig) -> PipelineResult<Self> {
        let fetcher = ManifestFetcher::new(config.api.clone())?;
        Ok(Self {
            fetcher,
            key_resolver: KeyResolver::new(config.manifest.key_file_name.clone()),
            acquirer: SegmentAcquirer::new(&config.download),
            merger: TrackMerger::new(&config.merge),
            chooser: Arc::new(LastRendition),
            manifest: config.manifest.clone(),
            output_dir: config.output_dir(),
            quality: config.quality.default_index,
        })
    }

    /// Routes both the transfer tool and the muxer through `executor`.
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.acquirer = self.acquirer.with_executor(Arc::clone(&executor));
        self.merger = self.merger.with_executor(executor);
        self
    }

    pub fn with_quality_chooser(mut self, chooser: Arc<dyn QualityChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    pub fn with_quality(mut self, quality: Option<i64>) -> Self {
        if quality.is_some() {
            self.quality = quality;
        }
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub async fn run<I, S>(&self, urls: I, credential: &SessionCredential) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut result = BatchResult::default();
        for url in urls {
            let url = url.as_ref().trim();
            if url.is_empty() {
                continue;
            }
            info!(url, "start downloading new video");
            let mut stage = RequestStage::Fetching;
            match self.process(url, credential, &mut stage).await {
                Ok(output) => {
                    advance(&mut stage, RequestStage::Done);
                    result.record_success(url, output);
                }
                Err(err) => {
                    warn!(url, stage = %stage, error = %err, "video not downloaded, going to the next one");
                    result.record_failure(url, &stage, &err);
                    advance(&mut stage, RequestStage::Failed(err.to_string()));
                }
            }
        }
        result.finish();
        result
    }

    async fn process(
        &self,
        url: &str,
        credential: &SessionCredential,
        stage: &mut RequestStage,
    ) -> PipelineResult<PathBuf> {
        let request = VideoRequest::parse(url)?;
        let metadata = self.fetcher.fetch_metadata(&request, credential).await?;
        let title = metadata.display_title();
        info!(id = request.id(), title = %title, "video metadata resolved");
        let master_url = self.fetcher.master_manifest_url(&request, &metadata)?;
        let master = self.fetcher.fetch_text(&master_url, credential).await?;

        let workspace = Workspace::create(&self.output_dir, request.id())
            .await
            .map_err(|source| PipelineError::Workspace {
                path: self.output_dir.join(request.id()),
                source,
            })?;
        let outcome = self
            .acquire_and_merge(&workspace, &master_url, &master, &title, credential, stage)
            .await;
        workspace.cleanup();
        outcome
    }

    async fn acquire_and_merge(
        &self,
        workspace: &Workspace,
        master_url: &str,
        master: &str,
        title: &str,
        credential: &SessionCredential,
        stage: &mut RequestStage,
    ) -> PipelineResult<PathBuf> {
        advance(stage, RequestStage::TrackSelecting);
        let catalog = parse_catalog(master)?;
        let index = select_quality(&catalog, self.quality, self.chooser.as_ref())?;
        let rendition = &catalog.renditions[index];
        info!(resolution = %rendition.label(), index, "quality tier selected");

        advance(stage, RequestStage::Acquiring(MediaKind::Video));
        let video_url = resolve_child_url(master_url, &rendition.uri)?;
        let video_child = self.fetcher.fetch_text(&video_url, credential).await?;
        let video_key = match key_uri(&video_child)? {
            Some(uri) => Some(
                self.key_resolver
                    .resolve(&self.fetcher, credential, &uri, workspace.root())
                    .await?,
            ),
            None => None,
        };
        let video = workspace.track(MediaKind::Video);
        self.acquire_track(&video, &video_child, &video_url, video_key.as_ref(), credential)
            .await?;

        advance(stage, RequestStage::Acquiring(MediaKind::Audio));
        let audio_url = resolve_child_url(master_url, &catalog.audio.uri)?;
        let audio_child = self.fetcher.fetch_text(&audio_url, credential).await?;
        let audio_key = self
            .audio_key(workspace, &audio_child, video_key, credential)
            .await?;
        let audio = workspace.track(MediaKind::Audio);
        self.acquire_track(&audio, &audio_child, &audio_url, audio_key.as_ref(), credential)
            .await?;

        advance(stage, RequestStage::Merging);
        let output = self
            .merger
            .merge(&audio.mux_manifest, &video.mux_manifest, &self.output_dir, title)
            .await?;
        Ok(output)
    }

    async fn audio_key(
        &self,
        workspace: &Workspace,
        audio_child: &str,
        video_key: Option<LocalKey>,
        credential: &SessionCredential,
    ) -> PipelineResult<Option<LocalKey>> {
        let audio_uri = key_uri(audio_child)?;
        match self.manifest.key_policy {
            KeyPolicy::SharedVideoKey => match (audio_uri, video_key) {
                (Some(uri), Some(key)) => {
                    if uri != key.remote_uri {
                        warn!(audio_key = %uri, video_key = %key.remote_uri, "audio track references a different key; reusing the video key");
                    }
                    Ok(Some(key.for_uri(&uri)))
                }
                (Some(uri), None) => Ok(Some(
                    self.key_resolver
                        .resolve(&self.fetcher, credential, &uri, workspace.root())
                        .await?,
                )),
                (None, _) => Ok(None),
            },
            KeyPolicy::PerTrack => match audio_uri {
                Some(uri) => Ok(Some(
                    self.key_resolver
                        .resolve_as(
                            &self.fetcher,
                            credential,
                            &uri,
                            workspace.root(),
                            &self.manifest.audio_key_file_name,
                        )
                        .await?,
                )),
                None => Ok(None),
            },
        }
    }

    async fn acquire_track(
        &self,
        paths: &TrackPaths,
        child: &str,
        child_url: &str,
        key: Option<&LocalKey>,
        credential: &SessionCredential,
    ) -> PipelineResult<AcquireReport> {
        let substitution = key.map(|key| KeySubstitution {
            remote_uri: &key.remote_uri,
            local_reference: &key.reference,
        });
        let manifests = RewrittenManifest::build(
            child,
            child_url,
            &self.manifest.segment_marker,
            substitution,
            &paths.segments_subdir,
        );
        Ok(self.acquirer.acquire(paths, &manifests, credential).await?)
    }
}

fn advance(stage: &mut RequestStage, next: RequestStage) {
    debug!(from = %stage, to = %next, "request stage transition");
    *stage = next;
}
