//! Partitioned queue adapter.
//!
//! Presents a partitioned, offset-addressed log as a set of pull-based
//! queues with acknowledgements:
//!
//! - [`QueueAdapter::assign`] / [`QueueAdapter::revoke`]: partition
//!   ownership, one poller task per partition
//! - [`QueueReceiver`]: `initialize`, `pull_messages`, `acknowledge`,
//!   `shutdown` over one partition's cache
//! - [`QueueAdapter::send`]: the bounded, retrying send path
//! - [`QueueAdapter::shutdown`]: bounded by `shutdown_grace_ms`
//!
//! Delivery is at-least-once. Checkpoints commit on a cadence, so a crash
//! may redeliver what was acknowledged after the last commit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamq_adapter::{AdapterDeps, QueueAdapter};
//! use streamq_config::StreamOptions;
//! use streamq_core::{PartitionId, PartitionKey};
//! use streamq_transport::{SimulatedTransport, Utf8Codec};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = SimulatedTransport::new(0);
//! transport.create_topic("orders", 1);
//! let options = StreamOptions::new(["localhost:9092"]).add_topic("orders", None);
//! let adapter = QueueAdapter::start(options, AdapterDeps::new(Arc::new(transport), Utf8Codec))?;
//!
//! let partition = PartitionKey::new("orders", PartitionId::new(0));
//! adapter.assign(partition.clone()).await?;
//! let mut receiver = adapter.create_receiver(partition)?;
//! receiver.initialize()?;
//! for entry in receiver.pull_messages(10)? {
//!     receiver.acknowledge(entry.token()).await?;
//! }
//! adapter.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod adapter;
mod deps;
mod error;
mod maintenance;
mod receiver;

pub use adapter::{QueueAdapter, ShutdownReport};
pub use deps::AdapterDeps;
pub use error::{AdapterError, AdapterResult};
pub use maintenance::{maintenance_pass, MaintenanceReport};
pub use receiver::QueueReceiver;
