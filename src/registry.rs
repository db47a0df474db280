//! Task registry: insertion-ordered prefetch tasks unique by URL, with a
//! URL index for point queries and a pure status projection for the UI.

use std::collections::{HashMap, HashSet};

use crate::media::{media_kind, MediaKind};

/// Advisory priority hint attached at enqueue time.
///
/// Stored on every task but never consulted during admission; the scan is
/// FIFO over insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Per-task lifecycle. `Loaded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Eligible for admission.
    Pending,
    /// A loader call is outstanding; counted against the concurrency cap.
    InFlight,
    /// Loader resolved; never re-admitted.
    Loaded,
    /// Loader rejected on every allowed attempt; never re-admitted.
    Failed,
}

/// One unit of work: ensure this URL's media is warm in the cache.
#[derive(Debug, Clone)]
pub struct PrefetchTask {
    pub url: String,
    pub kind: MediaKind,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Number of times this task has been admitted.
    pub attempts: u32,
}

/// Aggregate progress counts derived from the registry.
///
/// `pending` is derived, not stored: `total - loaded - loading - failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub total: usize,
    pub loaded: usize,
    pub loading: usize,
    pub pending: usize,
    pub failed: usize,
}

/// Insertion-ordered task collection, unique by URL.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: Vec<PrefetchTask>,
    /// URL -> position in `tasks`, for O(1) point queries.
    index: HashMap<String, usize>,
}

impl Registry {
    /// Build a registry from an ordered URL list. Duplicate URLs collapse
    /// onto their first occurrence.
    pub fn build(urls: &[String], priority: Priority) -> Self {
        let mut tasks = Vec::with_capacity(urls.len());
        let mut index = HashMap::with_capacity(urls.len());
        for url in urls {
            if index.contains_key(url.as_str()) {
                continue;
            }
            index.insert(url.clone(), tasks.len());
            tasks.push(PrefetchTask {
                url: url.clone(),
                kind: media_kind(url),
                priority,
                status: TaskStatus::Pending,
                attempts: 0,
            });
        }
        Self { tasks, index }
    }

    /// Whether `urls` denotes the same ordered distinct set this registry
    /// was built from. Used to decide if a caller-supplied list is a
    /// change (rebuild) or a repeat (no-op).
    pub fn matches(&self, urls: &[String]) -> bool {
        let mut seen = HashSet::with_capacity(urls.len());
        let mut distinct = Vec::with_capacity(urls.len());
        for url in urls {
            if seen.insert(url.as_str()) {
                distinct.push(url.as_str());
            }
        }
        distinct.len() == self.tasks.len()
            && distinct.iter().zip(&self.tasks).all(|(url, task)| *url == task.url)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn get(&self, url: &str) -> Option<&PrefetchTask> {
        self.index.get(url).map(|&i| &self.tasks[i])
    }

    pub fn get_mut(&mut self, url: &str) -> Option<&mut PrefetchTask> {
        let i = *self.index.get(url)?;
        Some(&mut self.tasks[i])
    }

    /// First pending task in insertion order, if any. Priority is advisory
    /// and does not influence the scan.
    pub fn next_pending(&self) -> Option<&PrefetchTask> {
        self.iter().find(|t| t.status == TaskStatus::Pending)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrefetchTask> {
        self.tasks.iter()
    }

    /// Derive the aggregate progress counts in one pass.
    pub fn status(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot {
            total: self.tasks.len(),
            ..StatusSnapshot::default()
        };
        for task in self.iter() {
            match task.status {
                TaskStatus::Loaded => snapshot.loaded += 1,
                TaskStatus::InFlight => snapshot.loading += 1,
                TaskStatus::Failed => snapshot.failed += 1,
                TaskStatus::Pending => {}
            }
        }
        snapshot.pending = snapshot.total - snapshot.loaded - snapshot.loading - snapshot.failed;
        snapshot
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        matches!(self.get(url), Some(t) if t.status == TaskStatus::Loaded)
    }

    pub fn is_loading(&self, url: &str) -> bool {
        matches!(self.get(url), Some(t) if t.status == TaskStatus::InFlight)
    }
}
