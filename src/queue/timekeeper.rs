use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::sleep;
use tracing::{debug, trace};

use super::events::Emit;
use super::{Core, Shared};
use crate::time::{deadline, Micros};
use crate::types::status::Status;

/// Statuses whose next_event is a ttl deadline.
const TTL_STATUSES: [Status; 3] =
    [Status::Ready, Status::Blocked, Status::Buried];

// tokio rejects sleeps beyond roughly two years; far deadlines are capped
// here and simply re-scanned on wake.
const MAX_SLEEP: Duration = Duration::from_secs(86_400);

fn tighten(estimated: &mut Option<Micros>, remaining: Micros) {
    *estimated = Some(estimated.map_or(remaining, |e| e.min(remaining)));
}

impl Core {
    /// One timekeeper pass: probe the four watch-index heads and apply any
    /// due transition. Returns the events to deliver and the tightest
    /// remaining deadline; `Some(0)` forces an immediate re-scan, `None`
    /// means nothing is scheduled at all.
    ///
    /// Constant work per pass regardless of queue size: one head probe per
    /// regime, and a due head defers the rest to the follow-up scan.
    pub(crate) fn scan(&mut self, now: Micros) -> (Vec<Emit>, Option<Micros>) {
        let mut emits = Vec::new();
        let mut estimated: Option<Micros> = None;

        // Delayed head: promotion goes through the limit accountant.
        if let Some((id, due, utube)) = self
            .store
            .min_deadline(Status::Delayed)
            .map(|t| (t.id, t.next_event, t.utube.clone()))
        {
            if now >= due {
                let status = self.admit(&utube);
                // Panic safety: id was read from the index just above.
                let task = self
                    .store
                    .update(id, |t| {
                        t.status = status;
                        t.next_event = deadline(t.created, t.ttl);
                    })
                    .unwrap()
                    .clone();

                trace!(id = %task.id, status = %task.status, "delay elapsed");
                self.calls.delay += 1;
                emits.push(Emit { task, kind: None });
                estimated = Some(0);
            } else {
                tighten(&mut estimated, due - now);
            }
        }

        // Ttl heads: an expired task leaves the store with a synthetic done
        // notification.
        for status in TTL_STATUSES {
            let Some((id, due)) = self
                .store
                .min_deadline(status)
                .map(|t| (t.id, t.next_event))
            else {
                continue;
            };

            if now >= due {
                // Panic safety: id was read from the index just above.
                let mut task = self.store.remove(id).unwrap();
                let prior = task.status;
                task.status = Status::Done;

                trace!(id = %task.id, utube = %task.utube, "ttl expired");
                self.calls.ttl += 1;
                self.done += 1;

                let utube = task.utube.clone();
                emits.push(Emit { task, kind: None });
                // An expired ready task frees an in-flight slot.
                if prior == Status::Ready {
                    emits.extend(self.unblock_one(&utube));
                }
                estimated = Some(0);
            } else {
                tighten(&mut estimated, due - now);
            }
        }

        // Ttr head: a timed-out taken task goes straight back to ready,
        // which keeps the tube's in-flight sum unchanged.
        if let Some((id, due)) = self
            .store
            .min_deadline(Status::Taken)
            .map(|t| (t.id, t.next_event))
        {
            if now >= due {
                // Panic safety: id was read from the index just above.
                let task = self
                    .store
                    .update(id, |t| {
                        t.status = Status::Ready;
                        t.next_event = deadline(t.created, t.ttl);
                    })
                    .unwrap()
                    .clone();

                trace!(id = %task.id, "ttr timed out");
                self.calls.ttr += 1;
                emits.push(Emit { task, kind: None });
                estimated = Some(0);
            } else {
                tighten(&mut estimated, due - now);
            }
        }

        (emits, estimated)
    }
}

/// The queue's single long-lived deadline worker. Scans, delivers, then
/// sleeps until the tightest deadline or an external wakeup; cancellation
/// stops it between scans.
pub(crate) async fn run(shared: Arc<Shared>) {
    debug!("timekeeper running");

    loop {
        let (emits, estimated) = {
            let mut core = shared.core.lock();
            let now = shared.clock.now();
            core.scan(now)
        };

        shared.deliver(&emits, true);
        // NB: snapshots are dropped before suspending so the sleeping
        // worker pins no task memory.
        drop(emits);

        match estimated {
            // A head was due: re-scan immediately to drain the batch.
            Some(0) => continue,
            Some(us) => {
                let nap = Duration::from_micros(us).min(MAX_SLEEP);
                select! {
                    _ = sleep(nap) => {},
                    _ = shared.wake.notified() => {},
                    _ = shared.cancel.cancelled() => break,
                }
            },
            None => {
                select! {
                    _ = shared.wake.notified() => {},
                    _ = shared.cancel.cancelled() => break,
                }
            },
        }
    }

    debug!("timekeeper stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    use crate::queue::events::OnTaskChange;
    use crate::queue::{PutOptions, Queue, QueueOptions, ReleaseOptions};
    use crate::types::status::Status;
    use crate::types::store::{StoreOptions, TaskStore};
    use crate::types::task::TaskId;

    fn queue_with(limits: &[(&str, u32)], cb: Option<OnTaskChange>) -> Queue {
        let store = TaskStore::create("timed", StoreOptions::default());
        let limits = limits
            .iter()
            .map(|&(utube, limit)| (utube.to_string(), limit))
            .collect();
        Queue::new(store, cb, QueueOptions { limits }).unwrap()
    }

    fn opts(utube: &str) -> PutOptions {
        PutOptions {
            utube: Some(utube.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ttr_expiry_requeues_taken_task() {
        let queue = queue_with(&[("x", 1)], None);

        let put = queue.put(
            Bytes::from_static(b"w"),
            PutOptions {
                ttr: Some(Duration::from_secs(1)),
                ..opts("x")
            },
        );
        let taken = queue.take().unwrap();
        assert_eq!(taken.next_event, 1_000_000);

        sleep(Duration::from_millis(1_100)).await;

        // The timed-out task is ready again and the next take returns it.
        let again = queue.take().unwrap();
        assert_eq!(again.id, put.id);
        assert_eq!(queue.stats().calls.ttr, 1);

        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn delay_then_ttl_expiry() {
        let timed: Arc<Mutex<Vec<(TaskId, Status)>>> = Default::default();
        let cb: OnTaskChange = {
            let timed = Arc::clone(&timed);
            Box::new(move |task, kind| {
                if kind.is_none() {
                    timed.lock().push((task.id, task.status));
                }
            })
        };
        let queue = queue_with(&[], Some(cb));

        let put = queue.put(
            Bytes::from_static(b"w"),
            PutOptions {
                ttl: Some(Duration::from_secs(1)),
                delay: Some(Duration::from_millis(500)),
                ..Default::default()
            },
        );
        assert_eq!(put.status, Status::Delayed);
        assert_eq!(put.next_event, 500_000);
        // The delay extends the task's total lifetime.
        assert_eq!(put.ttl, 1_500_000);

        sleep(Duration::from_millis(600)).await;
        let promoted = queue.peek(put.id).unwrap();
        assert_eq!(promoted.status, Status::Ready);
        assert_eq!(promoted.next_event, 1_500_000);

        sleep(Duration::from_secs(1)).await;
        assert!(queue.peek(put.id).is_none());

        let timed = timed.lock();
        assert_eq!(
            *timed,
            [(put.id, Status::Ready), (put.id, Status::Done)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_lands_blocked_in_full_tube() {
        let queue = queue_with(&[("f", 1)], None);

        let _holder = queue.put(Bytes::from_static(b"w"), opts("f"));
        let second = queue.put(
            Bytes::from_static(b"w"),
            PutOptions {
                delay: Some(Duration::from_millis(100)),
                ..opts("f")
            },
        );
        assert_eq!(second.status, Status::Delayed);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.peek(second.id).unwrap().status, Status::Blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_of_ready_task_unblocks_peer() {
        let queue = queue_with(&[("g", 1)], None);

        let short = queue.put(
            Bytes::from_static(b"w"),
            PutOptions {
                ttl: Some(Duration::from_secs(1)),
                ..opts("g")
            },
        );
        let waiting = queue.put(Bytes::from_static(b"w"), opts("g"));
        assert_eq!(short.status, Status::Ready);
        assert_eq!(waiting.status, Status::Blocked);

        sleep(Duration::from_millis(1_100)).await;

        assert!(queue.peek(short.id).is_none());
        assert_eq!(queue.peek(waiting.id).unwrap().status, Status::Ready);
        assert_eq!(queue.stats().calls.ttl, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn release_with_delay_extends_ttl() {
        let queue = queue_with(&[], None);

        let put = queue.put(
            Bytes::from_static(b"w"),
            PutOptions {
                ttl: Some(Duration::from_secs(10)),
                ..Default::default()
            },
        );
        let taken = queue.take().unwrap();
        let released = queue
            .release(
                taken.id,
                ReleaseOptions {
                    delay: Some(Duration::from_secs(2)),
                },
            )
            .unwrap();
        assert_eq!(released.status, Status::Delayed);
        assert_eq!(released.next_event, 2_000_000);
        assert_eq!(released.ttl, 12_000_000);

        sleep(Duration::from_millis(2_100)).await;
        let back = queue.peek(put.id).unwrap();
        assert_eq!(back.status, Status::Ready);
        assert_eq!(back.next_event, 12_000_000);
    }
}
