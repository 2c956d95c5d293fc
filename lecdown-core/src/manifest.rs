//! Master playlist classification and the textual rewrites that turn a track
//! playlist into something the transfer tool and the muxer can consume.

use m3u8_rs::{parse_playlist_res, Playlist};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("invalid playlist: {0}")]
    Parse(String),
    #[error("expected a master playlist with track variants")]
    NotMaster,
    #[error("expected a media playlist with segments")]
    NotMedia,
    #[error("master playlist has no variant with a resolution")]
    NoRenditions,
    #[error("master playlist has no audio track")]
    MissingAudioTrack,
    #[error("master playlist has {count} variants without a resolution; cannot tell which is the audio track")]
    AmbiguousAudioTrack { count: usize },
    #[error("cannot resolve {uri} against {base}: {reason}")]
    Resolve {
        base: String,
        uri: String,
        reason: String,
    },
    #[error("no quality tier selected: {0}")]
    SelectionUnavailable(String),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub width: u64,
    pub height: u64,
    pub uri: String,
}

impl Rendition {
    pub fn label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub uri: String,
}

/// Renditions in document order plus the single audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub renditions: Vec<Rendition>,
    pub audio: AudioTrack,
}

impl Catalog {
    /// One `[i] WxH` line per rendition.
    pub fn menu(&self) -> String {
        self.renditions
            .iter()
            .enumerate()
            .map(|(index, rendition)| format!("[{index}] {}\n", rendition.label()))
            .collect()
    }
}

/// Classifies the variants of a master playlist. Variants carrying a
/// RESOLUTION attribute are renditions; the audio track is the one variant
/// without it. I-frame variants are ignored.
pub fn parse_catalog(text: &str) -> ManifestResult<Catalog> {
    let master = match parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) => master,
        Ok(Playlist::MediaPlaylist(_)) => return Err(ManifestError::NotMaster),
        Err(err) => return Err(ManifestError::Parse(err.to_string())),
    };
    let mut renditions = Vec::new();
    let mut audio_tracks = Vec::new();
    for variant in master.variants.iter().filter(|variant| !variant.is_i_frame) {
        match variant.resolution {
            Some(resolution) => renditions.push(Rendition {
                width: resolution.width,
                height: resolution.height,
                uri: variant.uri.clone(),
            }),
            None => audio_tracks.push(AudioTrack {
                uri: variant.uri.clone(),
            }),
        }
    }
    if renditions.is_empty() {
        return Err(ManifestError::NoRenditions);
    }
    let audio = match audio_tracks.len() {
        0 => return Err(ManifestError::MissingAudioTrack),
        1 => audio_tracks.remove(0),
        count => return Err(ManifestError::AmbiguousAudioTrack { count }),
    };
    Ok(Catalog { renditions, audio })
}

/// Source of a quality index when none was configured.
pub trait QualityChooser: Send + Sync {
    fn choose(&self, catalog: &Catalog) -> ManifestResult<usize>;
}

/// Picks the last rendition in document order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastRendition;

impl QualityChooser for LastRendition {
    fn choose(&self, catalog: &Catalog) -> ManifestResult<usize> {
        let index = catalog
            .renditions
            .len()
            .checked_sub(1)
            .ok_or(ManifestError::NoRenditions)?;
        info!(
            resolution = %catalog.renditions[index].label(),
            index,
            "no quality configured, using the last rendition"
        );
        Ok(index)
    }
}

/// Resolves the rendition index to download. A configured index outside the
/// catalog falls back to the last rendition with a warning.
pub fn select_quality(
    catalog: &Catalog,
    requested: Option<i64>,
    chooser: &dyn QualityChooser,
) -> ManifestResult<usize> {
    let count = catalog.renditions.len();
    if count == 0 {
        return Err(ManifestError::NoRenditions);
    }
    let last = count - 1;
    let index = match requested {
        None => chooser.choose(catalog)?,
        Some(value) => match usize::try_from(value) {
            Ok(index) if index <= last => {
                info!(resolution = %catalog.renditions[index].label(), "selected resolution");
                return Ok(index);
            }
            _ => {
                warn!(
                    requested = value,
                    available = %format!("0-{last}"),
                    fallback = %catalog.renditions[last].label(),
                    "desired quality is not available, using the last rendition"
                );
                return Ok(last);
            }
        },
    };
    if index > last {
        warn!(chosen = index, fallback = last, "chooser returned an index outside the catalog");
        return Ok(last);
    }
    Ok(index)
}

/// The two text variants derived from one track playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenManifest {
    pub transfer: String,
    pub mux: String,
}

/// Local substitute for a remote key URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySubstitution<'a> {
    pub remote_uri: &'a str,
    pub local_reference: &'a str,
}

impl RewrittenManifest {
    pub fn build(
        child: &str,
        child_url: &str,
        marker: &str,
        key: Option<KeySubstitution<'_>>,
        segments_subdir: &str,
    ) -> Self {
        let transfer = rewrite_for_transfer(child, &base_uri(child_url), marker);
        let mux = match key {
            Some(key) => rewrite_for_mux(
                child,
                key.remote_uri,
                key.local_reference,
                segments_subdir,
                marker,
            ),
            None => prefix_marker(child, marker, &format!("{segments_subdir}/")),
        };
        Self { transfer, mux }
    }
}

/// Prefixes every marker occurrence with `base_uri`. Occurrences that already
/// carry the prefix are left alone, so a second pass is a no-op.
pub fn rewrite_for_transfer(child: &str, base_uri: &str, marker: &str) -> String {
    prefix_marker(child, marker, base_uri)
}

/// Points the key at its local copy and every segment at the track's local
/// segment directory.
pub fn rewrite_for_mux(
    child: &str,
    key_uri: &str,
    local_key_ref: &str,
    segments_subdir: &str,
    marker: &str,
) -> String {
    let keyed = if key_uri.is_empty() {
        child.to_string()
    } else {
        child.replace(key_uri, local_key_ref)
    };
    prefix_marker(&keyed, marker, &format!("{segments_subdir}/"))
}

fn prefix_marker(text: &str, marker: &str, prefix: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    let mut output = String::with_capacity(text.len());
    for (index, piece) in text.split(marker).enumerate() {
        if index > 0 {
            if !output.ends_with(prefix) {
                output.push_str(prefix);
            }
            output.push_str(marker);
        }
        output.push_str(piece);
    }
    output
}

/// Everything up to and including the last `/` of the URL path.
pub fn base_uri(url: &str) -> String {
    let path_end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..path_end];
    match path.rfind('/') {
        Some(index) => path[..=index].to_string(),
        None => String::new(),
    }
}

pub fn resolve_child_url(master_url: &str, uri: &str) -> ManifestResult<String> {
    let base = Url::parse(master_url).map_err(|err| ManifestError::Resolve {
        base: master_url.to_string(),
        uri: uri.to_string(),
        reason: err.to_string(),
    })?;
    base.join(uri)
        .map(|url| url.to_string())
        .map_err(|err| ManifestError::Resolve {
            base: master_url.to_string(),
            uri: uri.to_string(),
            reason: err.to_string(),
        })
}

/// URI of the first key declared in a track playlist, if any.
pub fn key_uri(child: &str) -> ManifestResult<Option<String>> {
    let media = match parse_playlist_res(child.as_bytes()) {
        Ok(Playlist::MediaPlaylist(media)) => media,
        Ok(Playlist::MasterPlaylist(_)) => return Err(ManifestError::NotMedia),
        Err(err) => return Err(ManifestError::Parse(err.to_string())),
    };
    Ok(media
        .segments
        .iter()
        .find_map(|segment| segment.key.as_ref().and_then(|key| key.uri.clone())))
}
