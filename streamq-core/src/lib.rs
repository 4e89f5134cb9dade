//! streamq Core - Strongly-typed identifiers and record types for streamq.
//!
//! This crate holds the data model shared by every streamq component: the
//! identity of a partition, offsets and sequence tokens, the raw records a
//! transport hands back, and the decoded log entries the cache retains.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: A `SubscriptionId` can't be passed where a
//!   `PartitionId` is expected
//! - **Explicit types**: Offsets are `u64`, time is microseconds in `u64`
//! - **Injected time**: Components read time through [`Clock`] so tests can
//!   drive it deterministically
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod record;
mod time;
mod types;

pub use record::{
    Header, LogEntry, Offset, OutboundRecord, RawRecord, SafePoint, SequenceToken, Timestamp,
    Watermarks,
};
pub use time::{Clock, ManualClock, MonotonicClock};
pub use types::{PartitionId, PartitionKey, SubscriptionId, TopicName};
