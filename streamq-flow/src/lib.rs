//! Flow control for streamq.
//!
//! - [`ExponentialBackoff`]: bounded retry delays for transient transport
//!   failures (pollers, dispatcher).
//! - [`RequestPool`]: FIFO-fair ceiling on concurrent requests over the
//!   shared transport. Pollers, the checkpoint store and the dispatcher all
//!   draw from one pool.
//! - [`InFlightLimiter`]: per-destination bound on outbound sends; callers
//!   beyond the bound wait.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backoff;
pub mod error;
pub mod inflight;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use error::{FlowError, FlowResult};
pub use inflight::{InFlightLimiter, InFlightPermit};
pub use pool::{PoolStats, RequestClass, RequestPermit, RequestPool};
