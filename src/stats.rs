use serde::Serialize;

/// Currently stored tasks by status, plus the cumulative number of tasks
/// that have reached done (deleted or expired by ttl).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TaskCounts {
    pub ready: u64,
    pub taken: u64,
    pub delayed: u64,
    pub blocked: u64,
    pub buried: u64,
    /// Tasks currently stored, all statuses.
    pub total: u64,
    pub done: u64,
}

/// Cumulative operation counters. `ttl`, `ttr`, and `delay` count
/// timekeeper-driven transitions rather than caller operations.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CallCounts {
    pub put: u64,
    pub take: u64,
    pub release: u64,
    pub delete: u64,
    pub bury: u64,
    pub kick: u64,
    pub ttl: u64,
    pub ttr: u64,
    pub delay: u64,
}

/// Point-in-time statistics snapshot for one queue, taken under the queue
/// lock by [`Queue::stats`](crate::Queue::stats).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct QueueStats {
    pub tasks: TaskCounts,
    pub calls: CallCounts,
}
