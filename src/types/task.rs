use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::status::Status;
use crate::time::Micros;

/// Unique task identifier. Assigned as max(existing) + 1, so ids start at 0
/// and an id may be reused once the highest task has left the store.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority. Lower values are served first; ties break on id.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Pri(pub i64);

/// A queued work item.
///
/// `next_event` is the wall-clock moment (microseconds past the queue
/// epoch) of the task's next automatic transition: the end of its delay
/// while `Delayed`, the ttr deadline while `Taken`, and the ttl deadline
/// otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub status: Status,
    pub next_event: Micros,
    pub ttl: Micros,
    pub ttr: Micros,
    pub pri: Pri,
    pub created: Micros,
    pub utube: Arc<str>,
    pub data: Bytes,
}

impl Task {
    /// The public view of a task: scheduling internals stripped, leaving
    /// `(id, status, data)`.
    pub fn normalized(&self) -> (TaskId, Status, Bytes) {
        (self.id, self.status, self.data.clone())
    }
}
