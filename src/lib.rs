//! An in-memory priority work queue with micro-tubes, delays, ttl, ttr,
//! and per-micro-tube concurrency limits.
//!
//! Tasks live in an ordered, multi-indexed store; a per-queue timekeeper
//! drives every deadline-based transition (delay expiry, ttl expiry, ttr
//! timeout). Within each micro-tube at most `limit` tasks are in flight
//! (ready or taken) at once; the rest wait blocked and are promoted oldest
//! first as slots free up.
//!
//! ```
//! use bytes::Bytes;
//! use tokio_test::block_on;
//! use tubeq::{PutOptions, Queue, QueueOptions, StoreOptions, TaskStore};
//!
//! block_on(async {
//!     let store = TaskStore::create("jobs", StoreOptions::default());
//!     let queue = Queue::new(store, None, QueueOptions::default()).unwrap();
//!
//!     let put = queue.put(Bytes::from("fetch /index"), PutOptions::default());
//!     let taken = queue.take().unwrap();
//!     assert_eq!(taken.id, put.id);
//!
//!     queue.delete(taken.id).unwrap();
//!     queue.shutdown().await;
//! });
//! ```

pub mod queue;
pub mod stats;
pub mod time;
pub mod types;

pub use queue::events::{EventKind, OnTaskChange};
pub use queue::{ConfigError, PutOptions, Queue, QueueOptions, ReleaseOptions};
pub use stats::{CallCounts, QueueStats, TaskCounts};
pub use time::{Micros, TTL_FOREVER};
pub use types::status::Status;
pub use types::store::{StoreOptions, TaskStore};
pub use types::task::{Pri, Task, TaskId};
