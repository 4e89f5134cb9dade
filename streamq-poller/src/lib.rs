//! Partition pollers for streamq.
//!
//! One poller owns the transport subscription of one partition. It resolves
//! its start position from the consume mode and the last checkpoint, then
//! fetches, decodes and appends batches to the partition's cache. Each
//! poller runs as its own tokio task ([`PollerHandle::spawn`]); partitions
//! never wait on each other.
//!
//! Failure handling:
//! - transient transport errors: exponential backoff, poller stays alive
//! - decode failures: the record is skipped and tracked
//! - fatal transport errors: poller stops, [`SupervisorEvent`] sent

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod poller;
mod start;
mod task;

pub use error::{PollerError, PollerResult};
pub use poller::{PartitionPoller, PolledBatch, PollerConfig, PollerContext};
pub use start::{resolve_start_position, StartPosition, StartReason};
pub use task::{run_poller, PollerExit, PollerHandle, SupervisorEvent};
