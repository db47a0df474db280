//! Scheduler: admits prefetch tasks without exceeding the concurrency
//! budget and drives the loader adapters until the registry is exhausted.
//!
//! One scheduler thread owns every registry mutation; a small worker pool
//! runs the blocking loader calls. Crossbeam channels carry jobs one way
//! and settles the other, and each job is stamped with the registry
//! generation so settles that outlive a rebuild are detected and dropped.
//! The public handle only ever takes read locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::fetch::ByteFetcher;
use crate::loader::{ImageDecodeLoader, LoadError, MediaLoader, VideoMetadataLoader};
use crate::media::MediaKind;
use crate::registry::{Priority, Registry, StatusSnapshot, TaskStatus};

/// Capacity of the job and settle channels. Bounded so a stalled consumer
/// cannot grow memory without limit.
const CHANNEL_CAPACITY: usize = 256;

/// How long blocked receives wait before re-checking the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Construction-time misconfiguration, rejected eagerly instead of being
/// silently clamped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Options supplied alongside the URL list.
#[derive(Debug, Clone)]
pub struct PrefetchOptions {
    /// Advisory priority recorded on every task.
    pub priority: Priority,
    /// Debounce before admission begins, so initial paint wins the race
    /// for bandwidth and decode time.
    pub delay: Duration,
    /// Concurrency cap: maximum tasks in flight at once.
    pub max_concurrent: usize,
    /// Admissions a task gets before it is parked as `Failed`.
    pub max_attempts: u32,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            delay: Duration::ZERO,
            max_concurrent: 3,
            max_attempts: 3,
        }
    }
}

impl PrefetchOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

enum Command {
    Rebuild(Vec<String>),
}

struct LoadJob {
    generation: u64,
    url: String,
    kind: MediaKind,
}

struct Settle {
    generation: u64,
    url: String,
    result: Result<(), LoadError>,
}

/// Bounded-concurrency media prefetcher.
///
/// Construction builds the task registry but starts nothing; [`start`]
/// spawns the scheduler and worker threads. All queries are failure-free:
/// loader errors are logged and absorbed into per-task retry accounting,
/// never surfaced to the caller.
///
/// [`start`]: Prefetcher::start
pub struct Prefetcher {
    registry: Arc<RwLock<Registry>>,
    options: PrefetchOptions,
    image_loader: Arc<dyn MediaLoader>,
    video_loader: Arc<dyn MediaLoader>,
    cmd_tx: Option<Sender<Command>>,
    shutdown: Arc<AtomicBool>,
}

impl Prefetcher {
    /// Create a prefetcher wired to the stock adapters: full image decode
    /// and bounded video-metadata probe, both over `fetcher`.
    pub fn new(
        urls: &[String],
        options: PrefetchOptions,
        fetcher: Arc<dyn ByteFetcher>,
    ) -> Result<Self, ConfigError> {
        let image = Arc::new(ImageDecodeLoader::new(Arc::clone(&fetcher)));
        let video = Arc::new(VideoMetadataLoader::new(fetcher));
        Self::with_loaders(urls, options, image, video)
    }

    /// Create a prefetcher with caller-supplied loader adapters.
    pub fn with_loaders(
        urls: &[String],
        options: PrefetchOptions,
        image_loader: Arc<dyn MediaLoader>,
        video_loader: Arc<dyn MediaLoader>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let registry = Registry::build(urls, options.priority);
        Ok(Self {
            registry: Arc::new(RwLock::new(registry)),
            options,
            image_loader,
            video_loader,
            cmd_tx: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawn the scheduler thread and worker pool. Admission begins after
    /// `options.delay` has elapsed. Calling this twice is a no-op.
    pub fn start(&mut self) {
        if self.cmd_tx.is_some() {
            return;
        }

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<Command>();
        let (job_tx, job_rx) = crossbeam_channel::bounded::<LoadJob>(CHANNEL_CAPACITY);
        let (settle_tx, settle_rx) = crossbeam_channel::bounded::<Settle>(CHANNEL_CAPACITY);
        self.cmd_tx = Some(cmd_tx);

        for worker_id in 0..self.options.max_concurrent {
            let job_rx = job_rx.clone();
            let settle_tx = settle_tx.clone();
            let image = Arc::clone(&self.image_loader);
            let video = Arc::clone(&self.video_loader);
            let shutdown = Arc::clone(&self.shutdown);
            std::thread::Builder::new()
                .name(format!("prefetch-worker-{worker_id}"))
                .spawn(move || worker_loop(job_rx, settle_tx, image, video, shutdown))
                .expect("Failed to spawn prefetch worker thread");
        }
        // The scheduler only holds the receiving end; dropping our settle
        // sender lets disconnect detection work once the workers exit.
        drop(settle_tx);
        drop(job_rx);

        let registry = Arc::clone(&self.registry);
        let options = self.options.clone();
        let shutdown = Arc::clone(&self.shutdown);
        std::thread::Builder::new()
            .name("prefetch-scheduler".into())
            .spawn(move || scheduler_loop(registry, options, cmd_rx, job_tx, settle_rx, shutdown))
            .expect("Failed to spawn prefetch scheduler thread");
    }

    /// Replace the URL list.
    ///
    /// A list identical (as an ordered distinct set) to the current one is
    /// a no-op. A changed list discards all prior task state and builds
    /// fresh pending tasks; loads already in flight for dropped URLs are
    /// abandoned, and their late settles are ignored.
    pub fn rebuild(&mut self, urls: &[String]) {
        if self.registry.read().matches(urls) {
            return;
        }
        match &self.cmd_tx {
            Some(tx) => {
                let _ = tx.send(Command::Rebuild(urls.to_vec()));
            }
            None => {
                // Not started yet: nothing is in flight, swap in place.
                *self.registry.write() = Registry::build(urls, self.options.priority);
            }
        }
    }

    /// Aggregate progress counts.
    pub fn status(&self) -> StatusSnapshot {
        self.registry.read().status()
    }

    /// Whether `url` has finished loading.
    pub fn is_loaded(&self, url: &str) -> bool {
        self.registry.read().is_loaded(url)
    }

    /// Whether a loader call for `url` is currently outstanding.
    pub fn is_loading(&self, url: &str) -> bool {
        self.registry.read().is_loading(url)
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Dropping the command sender unblocks the scheduler if it is
        // waiting during the start delay.
        self.cmd_tx = None;
    }
}

fn scheduler_loop(
    registry: Arc<RwLock<Registry>>,
    options: PrefetchOptions,
    cmd_rx: Receiver<Command>,
    job_tx: Sender<LoadJob>,
    settle_rx: Receiver<Settle>,
    shutdown: Arc<AtomicBool>,
) {
    let mut generation: u64 = 0;
    let mut in_flight: usize = 0;

    // Paint-first debounce: wait out the configured delay while still
    // honoring rebuilds and shutdown that arrive during it.
    let deadline = Instant::now() + options.delay;
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match cmd_rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
            Ok(Command::Rebuild(urls)) => {
                generation += 1;
                in_flight = 0;
                *registry.write() = Registry::build(&urls, options.priority);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }

    debug!(total = registry.read().len(), "prefetch admission starting");

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        while let Ok(Command::Rebuild(urls)) = cmd_rx.try_recv() {
            generation += 1;
            in_flight = 0;
            *registry.write() = Registry::build(&urls, options.priority);
            debug!(generation, total = registry.read().len(), "registry rebuilt");
        }

        in_flight = admit_pending(&registry, &job_tx, generation, in_flight, options.max_concurrent);

        match settle_rx.recv_timeout(POLL_INTERVAL) {
            Ok(settle) => {
                in_flight = handle_settle(&registry, settle, generation, in_flight, options.max_attempts);
                // Drain whatever else has already settled before the next
                // admission pass.
                while let Ok(settle) = settle_rx.try_recv() {
                    in_flight =
                        handle_settle(&registry, settle, generation, in_flight, options.max_attempts);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Admit pending tasks in insertion order until the cap is reached.
/// Returns the updated in-flight count.
///
/// IMPORTANT: a task is marked `InFlight` only after its job is accepted
/// by the channel. Settles are processed on this same thread, so the
/// worker cannot observe the task between send and mark.
fn admit_pending(
    registry: &RwLock<Registry>,
    job_tx: &Sender<LoadJob>,
    generation: u64,
    mut in_flight: usize,
    max_concurrent: usize,
) -> usize {
    while in_flight < max_concurrent {
        let next = registry
            .read()
            .next_pending()
            .map(|task| (task.url.clone(), task.kind));
        let Some((url, kind)) = next else {
            break;
        };

        match job_tx.try_send(LoadJob {
            generation,
            url: url.clone(),
            kind,
        }) {
            Ok(()) => {
                let mut reg = registry.write();
                if let Some(task) = reg.get_mut(&url) {
                    task.status = TaskStatus::InFlight;
                    task.attempts += 1;
                    trace!(url = %url, attempt = task.attempts, "task admitted");
                }
                in_flight += 1;
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                // Leave the task pending; it will be retried on the next
                // scheduling pass.
                break;
            }
        }
    }
    in_flight
}

/// Apply one settle to the registry. Returns the updated in-flight count.
fn handle_settle(
    registry: &RwLock<Registry>,
    settle: Settle,
    generation: u64,
    in_flight: usize,
    max_attempts: u32,
) -> usize {
    // Dangling-settle guard: a rebuild may have replaced the registry
    // while this load was in flight.
    if settle.generation != generation {
        trace!(url = %settle.url, "ignoring settle from a stale generation");
        return in_flight;
    }

    let mut reg = registry.write();
    let Some(task) = reg.get_mut(&settle.url) else {
        trace!(url = %settle.url, "ignoring settle for a removed task");
        return in_flight;
    };
    if task.status != TaskStatus::InFlight {
        trace!(url = %settle.url, "ignoring settle for a task no longer in flight");
        return in_flight;
    }

    match settle.result {
        Ok(()) => {
            task.status = TaskStatus::Loaded;
            debug!(url = %settle.url, "prefetch complete");
        }
        Err(err) => {
            if task.attempts >= max_attempts {
                task.status = TaskStatus::Failed;
                warn!(url = %settle.url, attempts = task.attempts, error = %err, "prefetch failed, giving up");
            } else {
                task.status = TaskStatus::Pending;
                warn!(url = %settle.url, attempt = task.attempts, error = %err, "prefetch failed, will retry");
            }
        }
    }
    in_flight.saturating_sub(1)
}

fn worker_loop(
    job_rx: Receiver<LoadJob>,
    settle_tx: Sender<Settle>,
    image_loader: Arc<dyn MediaLoader>,
    video_loader: Arc<dyn MediaLoader>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        let job = match job_rx.recv_timeout(POLL_INTERVAL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let loader: &dyn MediaLoader = match job.kind {
            MediaKind::Image => image_loader.as_ref(),
            MediaKind::Video => video_loader.as_ref(),
        };
        let result = loader.load(&job.url);

        let settle = Settle {
            generation: job.generation,
            url: job.url,
            result,
        };
        if settle_tx.send(settle).is_err() {
            break; // Scheduler gone, exit.
        }
    }
}
