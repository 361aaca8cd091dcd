use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::{error, fmt};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::stats::{CallCounts, QueueStats, TaskCounts};
use crate::time::{deadline, to_micros, Clock, Micros};
use crate::types::status::Status;
use crate::types::store::TaskStore;
use crate::types::task::{Pri, Task, TaskId};

pub mod events;
mod limits;
mod timekeeper;

use events::{Emit, EventKind, OnTaskChange};
use limits::Limits;

/// Configuration errors are fatal at construction: the queue refuses to
/// start.
#[derive(Debug)]
pub enum ConfigError {
    InvalidLimit { utube: String, limit: u32 },
}

impl error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLimit { utube, limit } => write!(
                f,
                "limit for micro-tube {utube:?} must be at least 1, got {limit}"
            ),
        }
    }
}

/// Queue construction options.
#[derive(Debug, Default)]
pub struct QueueOptions {
    /// Per-micro-tube concurrency limits; unlisted tubes default to 1.
    /// Every limit must be positive.
    pub limits: HashMap<String, u32>,
}

/// Per-put overrides, overlaid on the store defaults.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub pri: Option<i64>,
    pub ttl: Option<Duration>,
    pub ttr: Option<Duration>,
    /// Initial delayed period. A delayed task's ttl is extended by the
    /// delay, so its total lifetime is unaffected by waiting.
    pub delay: Option<Duration>,
    /// Micro-tube key; absent means the unnamed tube `""`.
    pub utube: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ReleaseOptions {
    /// Re-delay the task instead of returning it to its tube directly.
    pub delay: Option<Duration>,
}

pub(crate) struct Shared {
    pub(crate) core: Mutex<Core>,
    pub(crate) wake: Notify,
    pub(crate) cancel: CancellationToken,
    pub(crate) clock: Clock,
    on_change: Option<OnTaskChange>,
}

impl Shared {
    /// Delivers recorded state changes once the lock is released: wake the
    /// sleeping timekeeper first (a change may have shortened its deadline
    /// horizon), then run user code outside any critical section.
    pub(crate) fn deliver(&self, emits: &[Emit], from_timekeeper: bool) {
        if emits.is_empty() {
            return;
        }

        if !from_timekeeper {
            self.wake.notify_one();
        }

        if let Some(on_change) = &self.on_change {
            for emit in emits {
                on_change(&emit.task, emit.kind);
            }
        }
    }
}

pub(crate) struct Core {
    pub(crate) store: TaskStore,
    pub(crate) limits: Limits,
    pub(crate) calls: CallCounts,
    pub(crate) done: u64,
}

/// An in-memory priority task queue with micro-tubes, delays, ttl, ttr,
/// and per-micro-tube concurrency limits.
///
/// Producers [`put`](Queue::put) tasks; consumers [`take`](Queue::take)
/// them, then [`delete`](Queue::delete), [`release`](Queue::release), or
/// [`bury`](Queue::bury) them. Within each micro-tube at most `limit`
/// tasks are in flight (ready or taken) at once; the rest wait blocked.
/// A background timekeeper drives delay, ttl, and ttr transitions.
///
/// Operations are synchronous and never block waiting for tasks; a caller
/// wanting to wait for work polls or listens to the change callback. The
/// queue owns its timekeeper and must be created inside a tokio runtime;
/// dropping the queue stops the worker.
pub struct Queue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl Queue {
    /// Builds a queue over a provisioned store and spawns its timekeeper.
    ///
    /// `on_task_change`, if present, is invoked with a snapshot after every
    /// state change; the kind names the originating operation and is absent
    /// for timekeeper-driven transitions and unblock promotions.
    pub fn new(
        store: TaskStore,
        on_task_change: Option<OnTaskChange>,
        opts: QueueOptions,
    ) -> Result<Self, ConfigError> {
        let limits = Limits::new(opts.limits)?;

        info!(space = store.name(), "queue starting");

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                store,
                limits,
                calls: CallCounts::default(),
                done: 0,
            }),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            clock: Clock::start(),
            on_change: on_task_change,
        });

        let worker = tokio::spawn(timekeeper::run(Arc::clone(&shared)));

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn with_core<R>(
        &self,
        f: impl FnOnce(&mut Core, Micros) -> (R, Vec<Emit>),
    ) -> R {
        let now = self.shared.clock.now();

        let (ret, emits) = {
            let mut core = self.shared.core.lock();
            f(&mut core, now)
        };

        self.shared.deliver(&emits, false);
        ret
    }

    /// Enqueues a task, admitting it as ready, blocked, or delayed.
    pub fn put(&self, data: Bytes, opts: PutOptions) -> Task {
        self.with_core(|core, now| core.put(data, &opts, now))
    }

    /// Takes the best ready task (smallest pri, then smallest id), marking
    /// it taken with a ttr deadline. Returns `None` when nothing is ready.
    pub fn take(&self) -> Option<Task> {
        self.with_core(|core, now| core.take(now))
    }

    /// Returns a task to its tube, parked blocked (the oldest blocked task
    /// in the tube, possibly this one, is promoted to ready) or delayed
    /// when `opts.delay` is set.
    pub fn release(&self, id: TaskId, opts: ReleaseOptions) -> Option<Task> {
        self.with_core(|core, now| core.release(id, &opts, now))
    }

    /// Removes a task and reports it done.
    pub fn delete(&self, id: TaskId) -> Option<Task> {
        self.with_core(|core, _now| core.delete(id))
    }

    /// Sets a task aside until kicked. Its ttl deadline is unchanged.
    pub fn bury(&self, id: TaskId) -> Option<Task> {
        self.with_core(|core, _now| core.bury(id))
    }

    /// Returns up to `n` buried tasks to circulation, oldest-best first,
    /// re-admitting each through the limit accountant. Returns the number
    /// actually kicked.
    pub fn kick(&self, n: u64) -> u64 {
        self.with_core(|core, _now| core.kick(n))
    }

    /// Looks a task up without changing any state.
    pub fn peek(&self, id: TaskId) -> Option<Task> {
        self.shared.core.lock().store.get(id).cloned()
    }

    /// Snapshot of current task counts and cumulative operation counters.
    pub fn stats(&self) -> QueueStats {
        let core = self.shared.core.lock();

        QueueStats {
            tasks: TaskCounts {
                ready: core.store.count(Status::Ready),
                taken: core.store.count(Status::Taken),
                delayed: core.store.count(Status::Delayed),
                blocked: core.store.count(Status::Blocked),
                buried: core.store.count(Status::Buried),
                total: core.store.len() as u64,
                done: core.done,
            },
            calls: core.calls,
        }
    }

    /// Stops the timekeeper and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.shared.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Core {
    fn put(
        &mut self,
        data: Bytes,
        opts: &PutOptions,
        now: Micros,
    ) -> (Task, Vec<Emit>) {
        let defaults = self.store.defaults();
        let mut ttl = opts.ttl.map(to_micros).unwrap_or(defaults.ttl);
        let ttr = opts.ttr.map(to_micros).unwrap_or(defaults.ttr);
        let pri = opts.pri.map(Pri).unwrap_or(defaults.pri);
        let utube: Arc<str> = opts.utube.as_deref().unwrap_or("").into();
        let delay = opts.delay.map(to_micros).unwrap_or(0);

        let (status, next_event) = if delay > 0 {
            ttl = ttl.saturating_add(delay);
            (Status::Delayed, deadline(now, delay))
        } else {
            (self.admit(&utube), deadline(now, ttl))
        };

        let task = Task {
            id: self.store.next_id(),
            status,
            next_event,
            ttl,
            ttr,
            pri,
            created: now,
            utube,
            data,
        };

        self.calls.put += 1;
        let task = self.store.insert(task).clone();
        debug!(id = %task.id, utube = %task.utube, status = %task.status, "put");

        (
            task.clone(),
            vec![Emit {
                task,
                kind: Some(EventKind::Put),
            }],
        )
    }

    fn take(&mut self, now: Micros) -> (Option<Task>, Vec<Emit>) {
        let Some(id) = self.store.min_by_pri(Status::Ready).map(|t| t.id)
        else {
            return (None, Vec::new());
        };

        // Ready -> Taken leaves the tube's in-flight sum unchanged, so no
        // limit check is needed here.
        // Panic safety: id was read from the index just above.
        let task = self
            .store
            .update(id, |t| {
                t.status = Status::Taken;
                t.next_event = deadline(now, t.ttr);
            })
            .unwrap()
            .clone();

        self.calls.take += 1;
        debug!(id = %task.id, utube = %task.utube, "take");

        (
            Some(task.clone()),
            vec![Emit {
                task,
                kind: Some(EventKind::Take),
            }],
        )
    }

    fn release(
        &mut self,
        id: TaskId,
        opts: &ReleaseOptions,
        now: Micros,
    ) -> (Option<Task>, Vec<Emit>) {
        let Some(prior) = self.store.get(id).map(|t| t.status) else {
            return (None, Vec::new());
        };
        let delay = opts.delay.map(to_micros).unwrap_or(0);

        // Panic safety: presence was checked just above.
        let task = self
            .store
            .update(id, |t| {
                if delay > 0 {
                    t.status = Status::Delayed;
                    t.next_event = deadline(now, delay);
                    t.ttl = t.ttl.saturating_add(delay);
                } else {
                    // Parked blocked rather than straight to ready: the
                    // unblock below promotes the oldest blocked task in the
                    // tube, which keeps age order fair.
                    t.status = Status::Blocked;
                    t.next_event = deadline(t.created, t.ttl);
                }
            })
            .unwrap()
            .clone();

        self.calls.release += 1;
        debug!(id = %task.id, utube = %task.utube, status = %task.status, "release");

        let mut emits = vec![Emit {
            task: task.clone(),
            kind: Some(EventKind::Release),
        }];
        if matches!(prior, Status::Ready | Status::Taken) {
            emits.extend(self.unblock_one(&task.utube));
        }

        (Some(task), emits)
    }

    fn delete(&mut self, id: TaskId) -> (Option<Task>, Vec<Emit>) {
        let Some(mut task) = self.store.remove(id) else {
            return (None, Vec::new());
        };

        let prior = task.status;
        task.status = Status::Done;
        self.calls.delete += 1;
        self.done += 1;
        debug!(id = %task.id, utube = %task.utube, "delete");

        let mut emits = vec![Emit {
            task: task.clone(),
            kind: Some(EventKind::Delete),
        }];
        if matches!(prior, Status::Ready | Status::Taken) {
            emits.extend(self.unblock_one(&task.utube));
        }

        (Some(task), emits)
    }

    fn bury(&mut self, id: TaskId) -> (Option<Task>, Vec<Emit>) {
        let Some(prior) = self.store.get(id).map(|t| t.status) else {
            return (None, Vec::new());
        };

        // next_event stays put: a buried task keeps its ttl deadline.
        // Panic safety: presence was checked just above.
        let task = self
            .store
            .update(id, |t| t.status = Status::Buried)
            .unwrap()
            .clone();

        self.calls.bury += 1;
        debug!(id = %task.id, utube = %task.utube, "bury");

        let mut emits = vec![Emit {
            task: task.clone(),
            kind: Some(EventKind::Bury),
        }];
        if matches!(prior, Status::Ready | Status::Taken) {
            emits.extend(self.unblock_one(&task.utube));
        }

        (Some(task), emits)
    }

    fn kick(&mut self, n: u64) -> (u64, Vec<Emit>) {
        let mut emits = Vec::new();
        let mut kicked = 0;

        while kicked < n {
            let Some(id) = self.store.min_by_pri(Status::Buried).map(|t| t.id)
            else {
                break;
            };

            // Panic safety: id was read from the index just above.
            let utube = self.store.get(id).unwrap().utube.clone();
            let status = self.admit(&utube);
            let task = self
                .store
                .update(id, |t| t.status = status)
                .unwrap()
                .clone();

            debug!(id = %task.id, status = %task.status, "kick");
            emits.push(Emit {
                task,
                kind: Some(EventKind::Kick),
            });
            kicked += 1;
        }

        self.calls.kick += kicked;
        (kicked, emits)
    }
}
