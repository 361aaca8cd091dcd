use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use super::status::Status;
use super::task::{Pri, Task, TaskId};
use crate::time::{to_micros, Micros, TTL_FOREVER};

/// Defaults applied when a space is provisioned.
///
/// `temporary` marks the space as scratch for the embedding application;
/// the in-memory backend itself has nothing to persist either way.
#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    pub ttl: Option<Duration>,
    pub ttr: Option<Duration>,
    pub pri: Option<i64>,
    pub temporary: bool,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TaskDefaults {
    pub(crate) ttl: Micros,
    pub(crate) ttr: Micros,
    pub(crate) pri: Pri,
}

#[derive(Debug, Default)]
struct StatusCounts([u64; 5]);

impl StatusCounts {
    fn slot(status: Status) -> usize {
        use Status::*;

        match status {
            Ready => 0,
            Taken => 1,
            Delayed => 2,
            Blocked => 3,
            Buried => 4,
            // Panic safety: terminal tasks are removed, never stored.
            Done => unreachable!("done tasks are never stored"),
        }
    }

    fn incr(&mut self, status: Status) {
        self.0[Self::slot(status)] += 1;
    }

    fn decr(&mut self, status: Status) {
        self.0[Self::slot(status)] -= 1;
    }

    fn get(&self, status: Status) -> u64 {
        self.0[Self::slot(status)]
    }
}

/// The ordered, indexed task container backing one queue.
///
/// Four indexes are kept in step by every mutation:
///
/// * primary: id (unique)
/// * status_pri: (status, pri, id) for take/kick candidate selection
/// * watch: (status, next_event, id) for timekeeper head probes
/// * utube: (status, utube, id) for limit accounting and unblock scans
#[derive(Debug)]
pub struct TaskStore {
    name: String,
    temporary: bool,
    defaults: TaskDefaults,
    primary: BTreeMap<TaskId, Task>,
    by_pri: BTreeSet<(Status, Pri, TaskId)>,
    by_deadline: BTreeSet<(Status, Micros, TaskId)>,
    by_tube: BTreeSet<(Status, Arc<str>, TaskId)>,
    counts: StatusCounts,
}

impl TaskStore {
    /// Provisions a named space with the given defaults. Unset ttl falls
    /// back to [`TTL_FOREVER`]; unset ttr falls back to the resolved ttl;
    /// unset pri falls back to 0.
    pub fn create(name: impl Into<String>, opts: StoreOptions) -> Self {
        let ttl = opts.ttl.map(to_micros).unwrap_or(TTL_FOREVER);
        let ttr = opts.ttr.map(to_micros).unwrap_or(ttl);
        let pri = Pri(opts.pri.unwrap_or(0));

        Self {
            name: name.into(),
            temporary: opts.temporary,
            defaults: TaskDefaults { ttl, ttr, pri },
            primary: BTreeMap::new(),
            by_pri: BTreeSet::new(),
            by_deadline: BTreeSet::new(),
            by_tube: BTreeSet::new(),
            counts: StatusCounts::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.primary.get(&id)
    }

    pub(crate) fn defaults(&self) -> TaskDefaults {
        self.defaults
    }

    /// The id the next inserted task must carry: max(primary) + 1, or 0 on
    /// an empty store. O(log n) via the ordered primary; no shared counter.
    pub(crate) fn next_id(&self) -> TaskId {
        self.primary
            .last_key_value()
            .map(|(id, _)| TaskId(id.0 + 1))
            .unwrap_or(TaskId(0))
    }

    pub(crate) fn insert(&mut self, task: Task) -> &Task {
        let id = task.id;

        self.by_pri.insert((task.status, task.pri, id));
        self.by_deadline.insert((task.status, task.next_event, id));
        self.by_tube.insert((task.status, task.utube.clone(), id));
        self.counts.incr(task.status);

        assert!(self.primary.insert(id, task).is_none());

        // Panic safety: inserted just above.
        self.primary.get(&id).unwrap()
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Task> {
        let task = self.primary.remove(&id)?;

        self.by_pri.remove(&(task.status, task.pri, id));
        self.by_deadline.remove(&(task.status, task.next_event, id));
        self.by_tube.remove(&(task.status, task.utube.clone(), id));
        self.counts.decr(task.status);

        Some(task)
    }

    /// Point update: applies `f` to the stored task and re-links every
    /// secondary index entry whose key parts may have changed.
    pub(crate) fn update(
        &mut self,
        id: TaskId,
        f: impl FnOnce(&mut Task),
    ) -> Option<&Task> {
        let (old, new) = {
            let task = self.primary.get_mut(&id)?;
            let old =
                (task.status, task.pri, task.next_event, task.utube.clone());
            f(task);
            debug_assert_ne!(task.status, Status::Done);
            let new =
                (task.status, task.pri, task.next_event, task.utube.clone());
            (old, new)
        };

        self.by_pri.remove(&(old.0, old.1, id));
        self.by_pri.insert((new.0, new.1, id));
        self.by_deadline.remove(&(old.0, old.2, id));
        self.by_deadline.insert((new.0, new.2, id));
        self.by_tube.remove(&(old.0, old.3, id));
        self.by_tube.insert((new.0, new.3, id));
        self.counts.decr(old.0);
        self.counts.incr(new.0);

        self.primary.get(&id)
    }

    /// Best candidate in `status`: smallest pri, then smallest id.
    pub(crate) fn min_by_pri(&self, status: Status) -> Option<&Task> {
        self.by_pri
            .range(
                (status, Pri(i64::MIN), TaskId(0))
                    ..=(status, Pri(i64::MAX), TaskId(u64::MAX)),
            )
            .next()
            .map(|&(_, _, id)| {
                // Panic safety: index entries always reference stored tasks.
                self.primary.get(&id).unwrap()
            })
    }

    /// Earliest-expiring task in `status`.
    pub(crate) fn min_deadline(&self, status: Status) -> Option<&Task> {
        self.by_deadline
            .range((status, 0, TaskId(0))..=(status, Micros::MAX, TaskId(u64::MAX)))
            .next()
            .map(|&(_, _, id)| {
                // Panic safety: index entries always reference stored tasks.
                self.primary.get(&id).unwrap()
            })
    }

    /// Oldest task (smallest id) in `status` within one micro-tube.
    pub(crate) fn min_in_tube(
        &self,
        status: Status,
        utube: &Arc<str>,
    ) -> Option<&Task> {
        self.by_tube
            .range(
                (status, Arc::clone(utube), TaskId(0))
                    ..=(status, Arc::clone(utube), TaskId(u64::MAX)),
            )
            .next()
            .map(|&(_, _, id)| {
                // Panic safety: index entries always reference stored tasks.
                self.primary.get(&id).unwrap()
            })
    }

    pub(crate) fn count_in_tube(
        &self,
        status: Status,
        utube: &Arc<str>,
    ) -> usize {
        self.by_tube
            .range(
                (status, Arc::clone(utube), TaskId(0))
                    ..=(status, Arc::clone(utube), TaskId(u64::MAX)),
            )
            .count()
    }

    pub(crate) fn count(&self, status: Status) -> u64 {
        self.counts.get(status)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn task(id: u64, status: Status, pri: i64, utube: &str) -> Task {
        Task {
            id: TaskId(id),
            status,
            next_event: 1_000 + id,
            ttl: 1_000,
            ttr: 100,
            pri: Pri(pri),
            created: id,
            utube: utube.into(),
            data: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn next_id_is_max_plus_one() {
        let mut store = TaskStore::create("t", StoreOptions::default());
        assert_eq!(store.next_id(), TaskId(0));

        store.insert(task(0, Status::Ready, 0, ""));
        store.insert(task(1, Status::Ready, 0, ""));
        assert_eq!(store.next_id(), TaskId(2));

        // Removing the max makes its id assignable again.
        store.remove(TaskId(1)).unwrap();
        assert_eq!(store.next_id(), TaskId(1));

        store.remove(TaskId(0)).unwrap();
        assert_eq!(store.next_id(), TaskId(0));
    }

    #[test]
    fn min_by_pri_orders_by_pri_then_id() {
        let mut store = TaskStore::create("t", StoreOptions::default());
        store.insert(task(0, Status::Ready, 5, ""));
        store.insert(task(1, Status::Ready, -2, ""));
        store.insert(task(2, Status::Ready, -2, ""));
        store.insert(task(3, Status::Buried, i64::MIN, ""));

        assert_eq!(store.min_by_pri(Status::Ready).unwrap().id, TaskId(1));
        assert_eq!(store.min_by_pri(Status::Buried).unwrap().id, TaskId(3));
        assert!(store.min_by_pri(Status::Taken).is_none());
    }

    #[test]
    fn update_relinks_indexes() {
        let mut store = TaskStore::create("t", StoreOptions::default());
        store.insert(task(0, Status::Ready, 0, "a"));
        store.insert(task(1, Status::Blocked, 0, "a"));

        store
            .update(TaskId(0), |t| {
                t.status = Status::Taken;
                t.next_event = 50;
            })
            .unwrap();

        assert!(store.min_by_pri(Status::Ready).is_none());
        assert_eq!(store.min_deadline(Status::Taken).unwrap().next_event, 50);
        assert_eq!(store.count(Status::Ready), 0);
        assert_eq!(store.count(Status::Taken), 1);
        assert_eq!(store.count_in_tube(Status::Taken, &"a".into()), 1);
        assert_eq!(
            store.min_in_tube(Status::Blocked, &"a".into()).unwrap().id,
            TaskId(1)
        );
    }

    #[test]
    fn min_deadline_orders_by_next_event() {
        let mut store = TaskStore::create("t", StoreOptions::default());
        let mut later = task(0, Status::Delayed, 0, "");
        later.next_event = 500;
        let mut sooner = task(1, Status::Delayed, 0, "");
        sooner.next_event = 200;
        store.insert(later);
        store.insert(sooner);

        assert_eq!(store.min_deadline(Status::Delayed).unwrap().id, TaskId(1));
    }

    #[test]
    fn defaults_resolution() {
        let store = TaskStore::create("t", StoreOptions::default());
        assert_eq!(store.defaults().ttl, TTL_FOREVER);
        assert_eq!(store.defaults().ttr, TTL_FOREVER);
        assert_eq!(store.defaults().pri, Pri(0));

        let store = TaskStore::create(
            "t",
            StoreOptions {
                ttl: Some(Duration::from_secs(10)),
                ..Default::default()
            },
        );
        assert_eq!(store.defaults().ttl, 10_000_000);
        assert_eq!(store.defaults().ttr, 10_000_000);
    }
}
