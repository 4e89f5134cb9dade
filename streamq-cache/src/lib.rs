//! Bounded per-partition cache with independent read cursors.
//!
//! The poller appends decoded entries to a partition's [`CacheWindow`];
//! readers pull ordered slices through their [`Cursor`] and acknowledge what
//! they processed. Acknowledgements release entries for eviction and feed the
//! partition's safe point, the highest offset a checkpoint may commit.
//!
//! A reader that falls behind the hard size bound gets
//! [`CacheError::CacheMiss`] instead of a silent gap. What happens next is
//! set by [`streamq_config::CacheMissPolicy`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod cursor;
mod error;
mod partition;
mod registry;
mod window;

pub use config::CacheConfig;
pub use cursor::{Cursor, CursorHandle};
pub use error::{CacheError, CacheResult};
pub use partition::{CacheStats, EvictionOutcome, PartitionCache};
pub use registry::{CacheRegistry, SharedPartitionCache};
pub use window::CacheWindow;
