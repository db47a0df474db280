//! Bounded-concurrency media prefetcher for gallery UIs.
//!
//! Given an ordered list of image and video URLs, the prefetcher warms the
//! client-side cache by driving a capped number of concurrent load
//! operations, tracking per-resource lifecycle and exposing aggregate
//! progress to the UI layer.
//!
//! Prefetching is strictly best-effort: loader failures are logged,
//! retried up to a bounded attempt budget, and never surface through the
//! public query API. The gallery's own direct loading path is independent
//! of this subsystem, so the worst case of a failure is a visible load
//! delay, never a broken UI.
//!
//! ```
//! use std::sync::Arc;
//! use media_prefetch::{FsFetcher, PrefetchOptions, Prefetcher};
//!
//! let urls: Vec<String> = ["a.jpg", "b.jpg", "c.mp4"]
//!     .iter()
//!     .map(|s| s.to_string())
//!     .collect();
//! let mut prefetcher =
//!     Prefetcher::new(&urls, PrefetchOptions::default(), Arc::new(FsFetcher)).unwrap();
//!
//! let snapshot = prefetcher.status();
//! assert_eq!(snapshot.total, 3);
//! assert_eq!(snapshot.pending, 3);
//!
//! // Nothing loads until the scheduler is started.
//! prefetcher.start();
//! ```

mod fetch;
mod loader;
mod media;
mod registry;
mod scheduler;

pub use fetch::{ByteFetcher, FetchError, FsFetcher};
pub use loader::{ImageDecodeLoader, LoadError, MediaLoader, VideoMetadataLoader};
pub use media::{is_video_url, media_kind, MediaKind, VIDEO_EXTENSIONS};
pub use registry::{PrefetchTask, Priority, StatusSnapshot, TaskStatus};
pub use scheduler::{ConfigError, PrefetchOptions, Prefetcher};
