use std::fmt;

use serde::Serialize;

/// Lifecycle state of a task.
///
/// `Done` is terminal and never stored: it appears only in event
/// notifications describing a task that has just left the store.
///
/// The derived ordering exists so status can lead a composite index key;
/// every index probe selects on *equality* of status, never on its order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Status {
    Ready,
    Taken,
    Delayed,
    Blocked,
    Buried,
    Done,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        use Status::*;

        match self {
            Ready => "ready",
            Taken => "taken",
            Delayed => "delayed",
            Blocked => "blocked",
            Buried => "buried",
            Done => "done",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// This impl is used to allow task snapshots to be serialised to YAML.
impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
