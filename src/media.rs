//! Media kind inference for prefetch URLs.
//! Video containers are routed to the metadata loader; everything else is
//! treated as an image and handed to the decode loader.

/// Extensions routed to the video-metadata adapter.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov"];

/// Media kind enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Extract the lowercase extension from a URL, ignoring any query string
/// or fragment. CDN URLs routinely carry signing parameters after `?`.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Check if a URL points at a supported video container.
pub fn is_video_url(url: &str) -> bool {
    url_extension(url)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Get the media kind for a URL. Anything that is not a recognized video
/// container is loaded as an image.
pub fn media_kind(url: &str) -> MediaKind {
    if is_video_url(url) {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}
