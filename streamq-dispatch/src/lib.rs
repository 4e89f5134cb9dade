//! Outbound send path of the streamq adapter.
//!
//! - [`Partitioner`]: key hash or rotation onto a topic's partitions
//! - [`Dispatcher`]: bounded in-flight sends per destination, retried with
//!   backoff within the producer timeout, always reported back to the caller

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod dispatcher;
mod error;
mod partitioner;

pub use dispatcher::{DispatchConfig, DispatchStats, Delivery, Dispatcher};
pub use error::{DispatchError, DispatchResult};
pub use partitioner::Partitioner;
