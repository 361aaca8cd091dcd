use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::events::Emit;
use super::{ConfigError, Core};
use crate::types::status::Status;

/// Per-micro-tube concurrency limits. A tube without an entry is limited
/// to one in-flight task.
#[derive(Debug, Default)]
pub(crate) struct Limits {
    per_tube: HashMap<String, u32>,
}

impl Limits {
    pub(crate) fn new(
        per_tube: HashMap<String, u32>,
    ) -> Result<Self, ConfigError> {
        for (utube, &limit) in &per_tube {
            if limit < 1 {
                return Err(ConfigError::InvalidLimit {
                    utube: utube.clone(),
                    limit,
                });
            }
        }

        Ok(Self { per_tube })
    }

    pub(crate) fn for_tube(&self, utube: &str) -> u32 {
        self.per_tube.get(utube).copied().unwrap_or(1)
    }
}

impl Core {
    /// Admission state for a new or kicked task in `utube`: `Ready` while
    /// the tube has a free in-flight slot, `Blocked` otherwise.
    ///
    /// Taken tasks are counted first so a full tube is detected without
    /// probing the ready range.
    pub(crate) fn admit(&self, utube: &Arc<str>) -> Status {
        let limit = self.limits.for_tube(utube) as usize;

        let mut in_flight = self.store.count_in_tube(Status::Taken, utube);
        if in_flight < limit {
            in_flight += self.store.count_in_tube(Status::Ready, utube);
        }

        if in_flight < limit {
            Status::Ready
        } else {
            Status::Blocked
        }
    }

    /// Promotes the oldest blocked task in `utube` to ready, if any.
    /// Called by every transition that frees a ready or taken slot.
    pub(crate) fn unblock_one(&mut self, utube: &Arc<str>) -> Option<Emit> {
        let id = self.store.min_in_tube(Status::Blocked, utube)?.id;

        // Panic safety: id was read from the tube index just above.
        let task = self
            .store
            .update(id, |t| t.status = Status::Ready)
            .unwrap()
            .clone();

        debug!(id = %task.id, utube = %task.utube, "unblocked");

        Some(Emit { task, kind: None })
    }
}
