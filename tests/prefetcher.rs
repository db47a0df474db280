//! End-to-end scheduler tests driven through injected loader adapters.
//!
//! The loaders here are deterministic stand-ins for the real fetch+decode
//! path: a counting loader for concurrency observation, a gated loader
//! that blocks until the test releases it, and a flaky loader for the
//! failure-handling properties.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use media_prefetch::{LoadError, MediaLoader, PrefetchOptions, Prefetcher, Priority};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Poll `cond` until it holds or the deadline passes.
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Records the number of concurrently executing load calls and the
/// high-water mark across the whole run.
struct CountingLoader {
    current: AtomicUsize,
    max_seen: AtomicUsize,
    hold: Duration,
}

impl CountingLoader {
    fn new(hold: Duration) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            hold,
        }
    }
}

impl MediaLoader for CountingLoader {
    fn load(&self, _url: &str) -> Result<(), LoadError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.hold);
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks every load until the test hands it a permit (or drops the
/// sender, which releases everything).
struct GatedLoader {
    permits: Receiver<()>,
}

impl GatedLoader {
    fn pair() -> (Sender<()>, Arc<Self>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Arc::new(Self { permits: rx }))
    }
}

impl MediaLoader for GatedLoader {
    fn load(&self, _url: &str) -> Result<(), LoadError> {
        let _ = self.permits.recv();
        Ok(())
    }
}

/// Fails deterministically for a fixed URL set, succeeds otherwise.
struct FlakyLoader {
    failing: HashSet<String>,
}

impl MediaLoader for FlakyLoader {
    fn load(&self, url: &str) -> Result<(), LoadError> {
        if self.failing.contains(url) {
            Err(LoadError::Empty {
                url: url.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Records which URLs it was asked to load.
struct RecordingLoader {
    seen: Mutex<Vec<String>>,
}

impl RecordingLoader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl MediaLoader for RecordingLoader {
    fn load(&self, url: &str) -> Result<(), LoadError> {
        self.seen.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

#[test]
fn concurrency_cap_is_never_exceeded() {
    init_tracing();
    let loader = Arc::new(CountingLoader::new(Duration::from_millis(10)));
    let list: Vec<String> = (0..12)
        .map(|i| {
            if i % 3 == 0 {
                format!("clip-{i}.mp4")
            } else {
                format!("photo-{i}.jpg")
            }
        })
        .collect();

    let options = PrefetchOptions {
        max_concurrent: 3,
        ..PrefetchOptions::default()
    };
    let mut p =
        Prefetcher::with_loaders(&list, options, (Arc::clone(&loader) as Arc<dyn MediaLoader>), (Arc::clone(&loader) as Arc<dyn MediaLoader>))
            .unwrap();
    p.start();

    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 12));
    assert!(loader.max_seen.load(Ordering::SeqCst) <= 3);

    let snapshot = p.status();
    assert_eq!(snapshot.loading, 0);
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.failed, 0);
}

#[test]
fn every_resolving_task_eventually_loads() {
    init_tracing();
    let loader = Arc::new(CountingLoader::new(Duration::ZERO));
    let list = urls(&["a.jpg", "b.png", "c.mp4", "d.webp"]);
    let mut p = Prefetcher::with_loaders(
        &list,
        PrefetchOptions::default(),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
    )
    .unwrap();
    p.start();

    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 4));
    for url in &list {
        assert!(p.is_loaded(url), "{url} should be loaded");
        assert!(!p.is_loading(url));
    }
}

#[test]
fn duplicate_urls_count_once() {
    init_tracing();
    let loader = Arc::new(CountingLoader::new(Duration::ZERO));
    let mut p = Prefetcher::with_loaders(
        &urls(&["x.jpg", "x.jpg"]),
        PrefetchOptions::default(),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
    )
    .unwrap();
    assert_eq!(p.status().total, 1);

    p.start();
    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 1));
    assert_eq!(p.status().total, 1);
}

#[test]
fn four_urls_cap_two_reports_the_expected_snapshot() {
    init_tracing();
    let (permits, loader) = GatedLoader::pair();
    let list = urls(&["a.jpg", "b.jpg", "c.mp4", "d.png"]);
    let options = PrefetchOptions {
        max_concurrent: 2,
        ..PrefetchOptions::default()
    };
    let mut p = Prefetcher::with_loaders(&list, options, (Arc::clone(&loader) as Arc<dyn MediaLoader>), loader)
        .unwrap();
    p.start();

    assert!(wait_until(Duration::from_secs(5), || p.status().loading == 2));
    let snapshot = p.status();
    assert_eq!(snapshot.loading, 2);
    assert_eq!(snapshot.pending, 2);
    assert_eq!(snapshot.loaded, 0);

    // Admission is FIFO, so the first two URLs hold the slots.
    assert!(p.is_loading("a.jpg"));
    assert!(p.is_loading("b.jpg"));
    assert!(!p.is_loading("c.mp4"));

    for _ in 0..4 {
        permits.send(()).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 4));
    let snapshot = p.status();
    assert_eq!(snapshot.loading, 0);
    assert_eq!(snapshot.pending, 0);
}

#[test]
fn rebuild_discards_old_state_and_ignores_dangling_settles() {
    init_tracing();
    let (permits, loader) = GatedLoader::pair();
    let options = PrefetchOptions {
        max_concurrent: 1,
        ..PrefetchOptions::default()
    };
    let mut p = Prefetcher::with_loaders(
        &urls(&["a.jpg", "b.jpg", "c.jpg"]),
        options,
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
        loader,
    )
    .unwrap();
    p.start();

    // One load in flight, the rest pending.
    assert!(wait_until(Duration::from_secs(5), || p.is_loading("a.jpg")));

    // Swap the list while a.jpg is still blocked inside its loader.
    p.rebuild(&urls(&["x.jpg", "y.jpg"]));
    assert!(wait_until(Duration::from_secs(5), || p.status().total == 2));

    // Release everything: the a.jpg settle is stale and must be dropped
    // without resurrecting the removed task.
    for _ in 0..3 {
        permits.send(()).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 2));

    let snapshot = p.status();
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.loaded, 2);
    assert!(p.is_loaded("x.jpg"));
    assert!(p.is_loaded("y.jpg"));
    assert!(!p.is_loaded("a.jpg"));
    assert!(!p.is_loading("a.jpg"));
}

#[test]
fn rebuild_with_identical_list_is_a_noop() {
    init_tracing();
    let loader = Arc::new(CountingLoader::new(Duration::ZERO));
    let list = urls(&["a.jpg", "b.jpg"]);
    let mut p = Prefetcher::with_loaders(
        &list,
        PrefetchOptions::default(),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
    )
    .unwrap();
    p.start();
    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 2));

    p.rebuild(&list);
    // State survives: no reset back to pending.
    assert_eq!(p.status().loaded, 2);
    assert!(p.is_loaded("a.jpg"));
}

#[test]
fn failing_url_is_bounded_and_does_not_block_others() {
    init_tracing();
    let loader = Arc::new(FlakyLoader {
        failing: ["bad.jpg".to_string()].into_iter().collect(),
    });
    let options = PrefetchOptions {
        max_concurrent: 2,
        max_attempts: 2,
        ..PrefetchOptions::default()
    };
    let mut p = Prefetcher::with_loaders(
        &urls(&["bad.jpg", "a.jpg", "b.jpg", "c.mp4"]),
        options,
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
        loader,
    )
    .unwrap();
    p.start();

    assert!(wait_until(Duration::from_secs(5), || {
        let s = p.status();
        s.loaded == 3 && s.failed == 1
    }));

    let snapshot = p.status();
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.loading, 0);
    assert!(!p.is_loaded("bad.jpg"));
    assert!(p.is_loaded("a.jpg"));
    assert!(p.is_loaded("c.mp4"));
}

#[test]
fn admission_waits_for_the_configured_delay() {
    init_tracing();
    let loader = Arc::new(CountingLoader::new(Duration::ZERO));
    let options = PrefetchOptions {
        delay: Duration::from_millis(200),
        ..PrefetchOptions::default()
    };
    let mut p = Prefetcher::with_loaders(
        &urls(&["a.jpg", "b.jpg"]),
        options,
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
    )
    .unwrap();
    p.start();

    std::thread::sleep(Duration::from_millis(50));
    let snapshot = p.status();
    assert_eq!(snapshot.loaded, 0);
    assert_eq!(snapshot.loading, 0);

    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 2));
}

#[test]
fn urls_are_routed_to_the_adapter_for_their_kind() {
    init_tracing();
    let image = RecordingLoader::new();
    let video = RecordingLoader::new();
    let list = urls(&[
        "a.jpg",
        "b.mp4",
        "c.webm",
        "d.mov",
        "e.png?sig=abc",
        "f.MP4",
    ]);
    let mut p = Prefetcher::with_loaders(
        &list,
        PrefetchOptions::default(),
        (Arc::clone(&image) as Arc<dyn MediaLoader>),
        (Arc::clone(&video) as Arc<dyn MediaLoader>),
    )
    .unwrap();
    p.start();
    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 6));

    let mut image_seen = image.seen();
    image_seen.sort();
    assert_eq!(image_seen, vec!["a.jpg", "e.png?sig=abc"]);

    let mut video_seen = video.seen();
    video_seen.sort();
    assert_eq!(video_seen, vec!["b.mp4", "c.webm", "d.mov", "f.MP4"]);
}

#[test]
fn priority_is_recorded_but_admission_stays_fifo() {
    init_tracing();
    let order = RecordingLoader::new();
    let options = PrefetchOptions {
        priority: Priority::High,
        max_concurrent: 1,
        ..PrefetchOptions::default()
    };
    let list = urls(&["first.jpg", "second.jpg", "third.jpg"]);
    let mut p =
        Prefetcher::with_loaders(&list, options, (Arc::clone(&order) as Arc<dyn MediaLoader>), (Arc::clone(&order) as Arc<dyn MediaLoader>))
            .unwrap();
    p.start();
    assert!(wait_until(Duration::from_secs(5), || p.status().loaded == 3));

    // With a single slot the dispatch order is exactly insertion order.
    assert_eq!(order.seen(), vec!["first.jpg", "second.jpg", "third.jpg"]);
}

#[test]
fn queries_never_panic_for_unknown_urls() {
    init_tracing();
    let loader = Arc::new(CountingLoader::new(Duration::ZERO));
    let p = Prefetcher::with_loaders(
        &urls(&["a.jpg"]),
        PrefetchOptions::default(),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
        (Arc::clone(&loader) as Arc<dyn MediaLoader>),
    )
    .unwrap();
    assert!(!p.is_loaded("never-enqueued.jpg"));
    assert!(!p.is_loading("never-enqueued.jpg"));
}
