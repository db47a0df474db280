//! Loader adapters: one external load primitive per media kind behind a
//! uniform settle contract.
//!
//! `Ok(())` is the resolve path, `Err` the reject path; the scheduler
//! consumes nothing else. Adapters hold no per-call state, so concurrent
//! invocations for different URLs cannot interfere with one another.

use std::sync::Arc;

use thiserror::Error;

use crate::fetch::{ByteFetcher, FetchError};

/// Maximum number of bytes the video adapter pulls when probing container
/// metadata. Enough for the `ftyp` box or EBML header of any real file.
const VIDEO_PROBE_LEN: usize = 64 * 1024;

/// Errors produced by a loader adapter. These never escape the scheduler;
/// they are logged and folded into the task's retry accounting.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("image decode failed for {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },
    #[error("unrecognized video container for {url}")]
    UnknownContainer { url: String },
    #[error("empty payload for {url}")]
    Empty { url: String },
}

/// Uniform contract the scheduler drives.
///
/// Implementations must be callable concurrently from multiple worker
/// threads. No timeout is applied by the scheduler: a hung `load` occupies
/// one admission slot until it settles, never the whole scheduler.
pub trait MediaLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<(), LoadError>;
}

/// Image adapter: fetches the payload and decodes it in full, warming the
/// same decode path the gallery's own rendering takes.
pub struct ImageDecodeLoader {
    fetcher: Arc<dyn ByteFetcher>,
}

impl ImageDecodeLoader {
    pub fn new(fetcher: Arc<dyn ByteFetcher>) -> Self {
        Self { fetcher }
    }
}

impl MediaLoader for ImageDecodeLoader {
    fn load(&self, url: &str) -> Result<(), LoadError> {
        let bytes = self.fetcher.fetch(url)?;
        if bytes.is_empty() {
            return Err(LoadError::Empty { url: url.to_string() });
        }
        image::load_from_memory(&bytes).map_err(|source| LoadError::Decode {
            url: url.to_string(),
            source,
        })?;
        Ok(())
    }
}

/// Video adapter: pulls a bounded prefix and validates the container
/// signature. Metadata only; the full byte range is never requested.
pub struct VideoMetadataLoader {
    fetcher: Arc<dyn ByteFetcher>,
}

impl VideoMetadataLoader {
    pub fn new(fetcher: Arc<dyn ByteFetcher>) -> Self {
        Self { fetcher }
    }
}

impl MediaLoader for VideoMetadataLoader {
    fn load(&self, url: &str) -> Result<(), LoadError> {
        let bytes = self.fetcher.fetch_prefix(url, VIDEO_PROBE_LEN)?;
        if bytes.is_empty() {
            return Err(LoadError::Empty { url: url.to_string() });
        }
        if has_video_signature(&bytes) {
            Ok(())
        } else {
            Err(LoadError::UnknownContainer { url: url.to_string() })
        }
    }
}

/// Check for an ISO-BMFF `ftyp` box (MP4/MOV) or an EBML header (WebM).
fn has_video_signature(bytes: &[u8]) -> bool {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return true;
    }
    bytes.len() >= 4 && bytes[..4] == [0x1A, 0x45, 0xDF, 0xA3]
}
