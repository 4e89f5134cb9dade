//! Collaborator contracts of the streamq adapter.
//!
//! - [`Transport`]: the partitioned log client (fetch, commit, produce)
//! - [`Codec`]: payload decode/encode capability
//! - [`TraceSink`]: optional fire-and-forget message tracking
//!
//! [`SimulatedTransport`] implements [`Transport`] in memory with
//! deterministic fault injection for tests and the demo binary.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod error;
mod simulated;
mod trace;
mod transport;

pub use codec::{BytesCodec, Codec, DecodeError, EncodeError, Utf8Codec};
pub use error::{TransportError, TransportResult};
pub use simulated::{SimulatedTransport, TransportFaultConfig};
pub use trace::{
    LoggingTraceSink, MemoryTraceSink, NoopTraceSink, SharedTraceSink, TraceEvent, TraceSink,
    TraceStage,
};
pub use transport::{SharedTransport, Transport};
