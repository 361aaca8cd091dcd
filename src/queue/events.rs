use std::fmt;

use crate::types::task::Task;

/// Labels the queue operation that produced a state change.
///
/// Timekeeper-driven transitions (delay expiry, ttl expiry, ttr timeout)
/// and unblock promotions carry no kind: they are consequences, not caller
/// operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    Put,
    Take,
    Release,
    Delete,
    Bury,
    Kick,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        use EventKind::*;

        match self {
            Put => "put",
            Take => "take",
            Release => "release",
            Delete => "delete",
            Bury => "bury",
            Kick => "kick",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked after every state change with a snapshot of the task as
/// it left the critical section. Runs outside any lock; it may re-enter the
/// queue. Faults must be contained by the callback itself.
pub type OnTaskChange = Box<dyn Fn(&Task, Option<EventKind>) + Send + Sync>;

/// A state change recorded under the lock, delivered after it is released.
#[derive(Clone, Debug)]
pub(crate) struct Emit {
    pub(crate) task: Task,
    pub(crate) kind: Option<EventKind>,
}
