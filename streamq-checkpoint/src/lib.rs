//! Checkpoints for streamq partitions.
//!
//! A checkpoint is the newest offset every reader of a partition has
//! acknowledged; a restarted poller resumes just after it.
//! [`CheckpointManager`] tracks each partition's safe point and commits it
//! on a time or acknowledgement-count cadence through a [`CheckpointStore`].
//!
//! Stores:
//! - [`TransportCheckpointStore`]: the transport's consumer-group offsets
//! - [`SimulatedCheckpointStore`]: in memory, with fault injection

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod manager;
mod store;
mod transport_store;
mod types;

pub use error::{CheckpointError, CheckpointResult};
pub use manager::{CheckpointManager, CheckpointStats, CommitReport};
pub use store::{
    CheckpointStore, CheckpointStoreFaultConfig, SharedCheckpointStore, SimulatedCheckpointStore,
};
pub use transport_store::TransportCheckpointStore;
pub use types::{Checkpoint, CheckpointConfig};
