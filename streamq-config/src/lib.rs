//! Options for the streamq adapter and their translation onto the transport
//! client's native configuration.
//!
//! - [`StreamOptions`]: typed options, loadable from TOML, validated once at
//!   startup before any partition is assigned
//! - [`ClientOptions`]: the native client tunables, all optional
//! - [`translate`]: options to [`NativeClientConfig`] per [`ClientKind`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
mod native;
mod options;
mod translate;

pub use client::ClientOptions;
pub use error::{ConfigError, ConfigResult};
pub use native::{
    Acks, BrokerAddressFamily, ClientDnsLookup, MetadataRecoveryStrategy, NativeValue,
    SaslMechanism, SaslOauthbearerAssertionAlgorithm, SaslOauthbearerGrantType,
    SaslOauthbearerMetadataAuthenticationType, SaslOauthbearerMethod, SecurityProtocol,
    SslEndpointIdentificationAlgorithm,
};
pub use options::{
    CacheMissPolicy, ConsumeMode, Credentials, StreamOptions, TopicConfig, TopicCreationConfig,
};
pub use translate::{
    native_name, translate, ClientConfigs, ClientKind, NativeClientConfig, ADAPTER_ONLY_FIELDS,
};
