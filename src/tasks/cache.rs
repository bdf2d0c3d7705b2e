//! Shared cache of observed tasks.
//!
//! [`TaskCache`] keeps one entry per task ID in a `DashMap`, each behind its
//! own `parking_lot::Mutex`, so that a poll and a callback for the same task
//! serialize while unrelated tasks proceed in parallel. Guards are never held
//! across an `.await`.
//!
//! Each entry also remembers the last status handed to a callback handler.
//! Polls and listings advance the task view only; callback delivery is
//! decided against that separate marker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::task::{Task, TaskStatus};

/// Default [`TaskCache`] capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// How an observation changed the cached view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First time the task was seen.
    Inserted,
    /// Status moved forward from `from`.
    Advanced {
        /// Status before the observation.
        from: TaskStatus,
    },
    /// Same status as cached.
    Unchanged,
    /// Older than the cached status; ignored.
    Stale,
}

impl Observation {
    /// Returns `true` if the observation was a status transition (or the
    /// first sighting).
    pub fn is_transition(self) -> bool {
        matches!(self, Self::Inserted | Self::Advanced { .. })
    }
}

#[derive(Debug)]
struct Slot {
    task: Task,
    delivered: Option<TaskStatus>,
    touched: u64,
}

/// Concurrent task cache enforcing forward-only status.
///
/// Holds at most `capacity` tasks. When an insert goes past it, the cache
/// shrinks to 90% of capacity, evicting terminal tasks before in-flight
/// ones and the least recently observed first.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use kling::tasks::{Observation, TaskCache};
/// use kling::{Task, TaskStatus};
///
/// let cache = TaskCache::new();
/// let mut task = Task {
///     id: "t-1".to_string(),
///     kind: None,
///     status: TaskStatus::Processing,
///     status_message: None,
///     created_at: Utc::now(),
///     updated_at: None,
///     external_task_id: None,
///     output: None,
/// };
/// assert_eq!(cache.observe(task.clone()).0, Observation::Inserted);
///
/// task.status = TaskStatus::Submitted;
/// let (observation, merged) = cache.observe(task);
/// assert_eq!(observation, Observation::Stale);
/// assert_eq!(merged.status, TaskStatus::Processing);
/// ```
#[derive(Debug)]
pub struct TaskCache {
    tasks: DashMap<String, Arc<Mutex<Slot>>>,
    external_ids: DashMap<String, String>,
    capacity: usize,
    clock: AtomicU64,
}

impl Default for TaskCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl TaskCache {
    /// Creates an empty cache with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache holding at most `capacity` tasks (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            external_ids: DashMap::new(),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    /// Maximum number of cached tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records an observation and returns it with the merged view.
    pub fn observe(&self, observed: Task) -> (Observation, Task) {
        let (observation, task, _) = self.record(observed, false);
        (observation, task)
    }

    /// Records a callback observation.
    ///
    /// The returned flag is `true` when the merged status has not been handed
    /// to a handler yet and the observation is not stale. The status is then
    /// marked as delivered under the same guard, so concurrent redeliveries
    /// see it as a duplicate.
    pub(crate) fn observe_for_delivery(&self, observed: Task) -> (Observation, Task, bool) {
        self.record(observed, true)
    }

    fn record(&self, observed: Task, deliver: bool) -> (Observation, Task, bool) {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let (slot, inserted) = match self.tasks.entry(observed.id.clone()) {
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Mutex::new(Slot {
                    task: observed.clone(),
                    delivered: None,
                    touched: tick,
                }));
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            },
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
        };

        let mut guard = slot.lock();
        let observation = if inserted {
            Observation::Inserted
        } else {
            merge(&mut guard.task, observed)
        };
        guard.touched = tick;
        let deliver = deliver
            && observation != Observation::Stale
            && guard.delivered != Some(guard.task.status);
        if deliver {
            guard.delivered = Some(guard.task.status);
        }
        let task = guard.task.clone();
        drop(guard);

        if let Some(external_task_id) = &task.external_task_id {
            self.external_ids
                .entry(external_task_id.clone())
                .or_insert_with(|| task.id.clone());
        }
        if inserted {
            self.evict_over_capacity();
        }
        (observation, task, deliver)
    }

    fn evict_over_capacity(&self) {
        if self.tasks.len() <= self.capacity {
            return;
        }
        let target = self.capacity - self.capacity / 10;
        let excess = self.tasks.len().saturating_sub(target);

        let mut candidates: Vec<(bool, u64, String)> = self
            .tasks
            .iter()
            .map(|entry| {
                let slot = entry.value().lock();
                (!slot.task.is_terminal(), slot.touched, entry.key().clone())
            })
            .collect();
        candidates.sort_unstable();

        for (_, _, task_id) in candidates.into_iter().take(excess) {
            self.remove(&task_id);
        }
        debug!(evicted = excess, capacity = self.capacity, "task cache trimmed");
    }

    /// Cached view of `task_id`.
    pub fn get(&self, task_id: &str) -> Option<Task> {
        let slot = self.tasks.get(task_id).map(|entry| Arc::clone(entry.value()))?;
        let task = slot.lock().task.clone();
        Some(task)
    }

    /// Cached task with the given external ID.
    pub fn find_by_external_id(&self, external_task_id: &str) -> Option<Task> {
        let task_id = self
            .external_ids
            .get(external_task_id)
            .map(|entry| entry.value().clone())?;
        self.get(&task_id)
            .filter(|task| task.external_task_id.as_deref() == Some(external_task_id))
    }

    /// Drops `task_id` from the cache.
    pub fn remove(&self, task_id: &str) -> Option<Task> {
        let (_, slot) = self.tasks.remove(task_id)?;
        let task = slot.lock().task.clone();
        if let Some(external_task_id) = &task.external_task_id {
            self.external_ids
                .remove_if(external_task_id, |_, id| id == task_id);
        }
        Some(task)
    }

    /// Number of cached tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn merge(current: &mut Task, observed: Task) -> Observation {
    let observation = if current.status.can_advance_to(observed.status) {
        let from = current.status;
        current.status = observed.status;
        current.status_message = observed.status_message;
        if observed.updated_at.is_some() {
            current.updated_at = observed.updated_at;
        }
        if observed.output.is_some() {
            current.output = observed.output;
        }
        Observation::Advanced { from }
    } else if current.status == observed.status {
        if !current.is_terminal() {
            if observed.status_message.is_some() {
                current.status_message = observed.status_message;
            }
            if observed.updated_at > current.updated_at {
                current.updated_at = observed.updated_at;
            }
        }
        Observation::Unchanged
    } else {
        Observation::Stale
    };

    if current.kind.is_none() {
        current.kind = observed.kind;
    }
    if current.external_task_id.is_none() {
        current.external_task_id = observed.external_task_id;
    }
    observation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{GeneratedVideo, TaskKind, TaskOutput};
    use chrono::Utc;
    use proptest::prelude::*;

    fn task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            kind: None,
            status,
            status_message: None,
            created_at: Utc::now(),
            updated_at: None,
            external_task_id: None,
            output: None,
        }
    }

    #[test]
    fn advance_merges_output() {
        let cache = TaskCache::new();
        cache.observe(task("t", TaskStatus::Submitted));

        let mut done = task("t", TaskStatus::Succeeded);
        done.output = Some(TaskOutput {
            videos: vec![GeneratedVideo {
                id: "v".to_string(),
                url: "https://cdn.example.com/v.mp4".to_string(),
                duration_secs: Some(5.0),
            }],
            images: Vec::new(),
        });
        let (observation, merged) = cache.observe(done);
        assert_eq!(
            observation,
            Observation::Advanced {
                from: TaskStatus::Submitted
            }
        );
        assert!(merged.output.is_some());

        let (observation, merged) = cache.observe(task("t", TaskStatus::Succeeded));
        assert_eq!(observation, Observation::Unchanged);
        assert!(merged.output.is_some(), "terminal view must not be overwritten");
    }

    #[test]
    fn terminal_status_never_reverts() {
        let cache = TaskCache::new();
        cache.observe(task("t", TaskStatus::Failed));
        for status in [TaskStatus::Submitted, TaskStatus::Processing, TaskStatus::Succeeded] {
            let (observation, merged) = cache.observe(task("t", status));
            assert_eq!(observation, Observation::Stale);
            assert_eq!(merged.status, TaskStatus::Failed);
        }
    }

    #[test]
    fn metadata_is_filled_in_once() {
        let cache = TaskCache::new();
        cache.observe(task("t", TaskStatus::Processing));

        let mut seen = task("t", TaskStatus::Processing);
        seen.kind = Some(TaskKind::LipSync);
        seen.external_task_id = Some("ext".to_string());
        cache.observe(seen);

        assert_eq!(cache.get("t").unwrap().kind, Some(TaskKind::LipSync));
        assert_eq!(cache.find_by_external_id("ext").unwrap().id, "t");
        assert!(cache.find_by_external_id("other").is_none());
        assert_eq!(cache.remove("t").unwrap().id, "t");
        assert!(cache.is_empty());
    }

    #[test]
    fn delivery_is_tracked_apart_from_the_view() {
        let cache = TaskCache::new();
        cache.observe(task("t", TaskStatus::Succeeded));

        let (observation, merged, deliver) =
            cache.observe_for_delivery(task("t", TaskStatus::Succeeded));
        assert_eq!(observation, Observation::Unchanged);
        assert_eq!(merged.status, TaskStatus::Succeeded);
        assert!(deliver, "a poll must not count as a delivery");

        let (_, _, again) = cache.observe_for_delivery(task("t", TaskStatus::Succeeded));
        assert!(!again);
        let (_, _, late) = cache.observe_for_delivery(task("t", TaskStatus::Processing));
        assert!(!late);
    }

    #[test]
    fn stale_callbacks_are_not_delivered() {
        let cache = TaskCache::new();
        cache.observe(task("t", TaskStatus::Succeeded));

        let (observation, _, deliver) = cache.observe_for_delivery(task("t", TaskStatus::Processing));
        assert_eq!(observation, Observation::Stale);
        assert!(!deliver);

        let (_, _, deliver) = cache.observe_for_delivery(task("t", TaskStatus::Succeeded));
        assert!(deliver, "a stale callback must not consume the delivery");
    }

    #[test]
    fn eviction_prefers_old_terminal_tasks() {
        let cache = TaskCache::with_capacity(3);
        cache.observe(task("a", TaskStatus::Succeeded));
        cache.observe(task("b", TaskStatus::Processing));
        cache.observe(task("c", TaskStatus::Failed));
        cache.observe(task("d", TaskStatus::Processing));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());

        cache.observe(task("e", TaskStatus::Processing));
        assert!(cache.get("c").is_none());

        cache.observe(task("f", TaskStatus::Submitted));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_none(), "oldest in-flight task goes once no terminal ones remain");
        for id in ["d", "e", "f"] {
            assert!(cache.get(id).is_some(), "{id} should be cached");
        }
    }

    #[test]
    fn evicted_tasks_leave_the_external_index() {
        let cache = TaskCache::with_capacity(1);
        let mut first = task("a", TaskStatus::Succeeded);
        first.external_task_id = Some("ext-a".to_string());
        cache.observe(first);
        cache.observe(task("b", TaskStatus::Processing));

        assert!(cache.find_by_external_id("ext-a").is_none());
        assert_eq!(cache.external_ids.len(), 0);
    }

    fn any_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Submitted),
            Just(TaskStatus::Processing),
            Just(TaskStatus::Succeeded),
            Just(TaskStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn cached_status_is_monotonic(statuses in prop::collection::vec(any_status(), 1..40)) {
            let cache = TaskCache::new();
            let mut previous: Option<TaskStatus> = None;
            for status in statuses {
                let (_, merged) = cache.observe(task("t", status));
                if let Some(prev) = previous {
                    prop_assert!(
                        merged.status == prev || prev.can_advance_to(merged.status),
                        "{prev} -> {}", merged.status
                    );
                    if prev.is_terminal() {
                        prop_assert_eq!(merged.status, prev);
                    }
                }
                previous = Some(merged.status);
            }
        }
    }
}
