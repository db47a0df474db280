//! Transport seam between the loader adapters and the embedding runtime.
//!
//! The scheduler never touches the network itself; it only consumes the
//! resolve/reject contract of the loader adapters, which pull bytes through
//! a [`ByteFetcher`] supplied by the application. A filesystem-backed
//! fetcher is provided for local galleries and tests.

use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use thiserror::Error;

/// Errors surfaced by a transport implementation.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("i/o error fetching {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}

/// Byte transport for media payloads.
///
/// Implementations must be safe to call concurrently from multiple worker
/// threads; each call is independent and retains nothing afterwards.
pub trait ByteFetcher: Send + Sync {
    /// Fetch the full payload at `url`.
    fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;

    /// Fetch at most `max_len` bytes from the start of the resource.
    ///
    /// The default implementation truncates a full fetch; transports with
    /// ranged reads should override it so metadata probes stay cheap.
    fn fetch_prefix(&self, url: &str, max_len: usize) -> Result<Bytes, FetchError> {
        let bytes = self.fetch(url)?;
        if bytes.len() > max_len {
            Ok(bytes.slice(..max_len))
        } else {
            Ok(bytes)
        }
    }
}

/// Fetcher backed by the local filesystem.
///
/// Accepts plain paths and `file://` URLs. Any other scheme is rejected so
/// misconfiguration shows up as a loader failure instead of a silent miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFetcher;

impl FsFetcher {
    fn resolve(url: &str) -> Result<&Path, FetchError> {
        if let Some(rest) = url.strip_prefix("file://") {
            Ok(Path::new(rest))
        } else if url.contains("://") {
            Err(FetchError::UnsupportedScheme(url.to_string()))
        } else {
            Ok(Path::new(url))
        }
    }
}

impl ByteFetcher for FsFetcher {
    fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let path = Self::resolve(url)?;
        let data = std::fs::read(path).map_err(|source| FetchError::Io {
            url: url.to_string(),
            source,
        })?;
        Ok(Bytes::from(data))
    }

    fn fetch_prefix(&self, url: &str, max_len: usize) -> Result<Bytes, FetchError> {
        let path = Self::resolve(url)?;
        let file = std::fs::File::open(path).map_err(|source| FetchError::Io {
            url: url.to_string(),
            source,
        })?;
        let mut buf = Vec::with_capacity(max_len.min(64 * 1024));
        file.take(max_len as u64)
            .read_to_end(&mut buf)
            .map_err(|source| FetchError::Io {
                url: url.to_string(),
                source,
            })?;
        Ok(Bytes::from(buf))
    }
}
