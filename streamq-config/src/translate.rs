//! Translation of `StreamOptions` onto the transport client's native
//! configuration surface.
//!
//! Translation is a pure function of the options: every set [`ClientOptions`]
//! field is copied under its native name, adapter-only fields never are, and
//! unset fields are left out so the native client keeps its own default. The
//! result is an ordered map, so two equal options objects always translate to
//! equal configs.

use std::collections::BTreeMap;
use std::fmt;

use crate::client::ClientOptions;
use crate::native::NativeValue;
use crate::options::StreamOptions;

/// `StreamOptions` fields that exist only for the adapter and never reach the
/// native client.
pub const ADAPTER_ONLY_FIELDS: &[&str] = &[
    "topics",
    "broker_list",
    "consumer_group_id",
    "poll_timeout_ms",
    "admin_request_timeout_ms",
    "consume_mode",
    "producer_timeout_ms",
    "poll_buffer_timeout_ms",
    "message_tracking_enabled",
    "import_request_context",
    "cache_max_entries",
    "cache_miss_policy",
    "max_pull_batch",
    "max_fetch_records",
    "checkpoint_interval_ms",
    "checkpoint_every_acks",
    "backoff_min_ms",
    "backoff_max_ms",
    "max_in_flight_per_destination",
    "max_concurrent_requests",
    "shutdown_grace_ms",
];

/// Which native client a config is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Fetches records and commits offsets.
    Consumer,
    /// Produces records.
    Producer,
    /// Administrative requests.
    Admin,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consumer => write!(f, "consumer"),
            Self::Producer => write!(f, "producer"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Native client configuration: property name to value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeClientConfig {
    kind: ClientKind,
    properties: BTreeMap<String, String>,
}

impl NativeClientConfig {
    fn new(kind: ClientKind) -> Self {
        Self {
            kind,
            properties: BTreeMap::new(),
        }
    }

    fn set(&mut self, name: &str, value: impl NativeValue) {
        self.properties.insert(name.to_string(), value.to_native());
    }

    /// Returns the client kind.
    #[must_use]
    pub const fn kind(&self) -> ClientKind {
        self.kind
    }

    /// Returns a property value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Returns true if the property is set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterates over properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The three immutable client configs built at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfigs {
    /// Used by pollers and the transport checkpoint store.
    pub consumer: NativeClientConfig,
    /// Used by the dispatcher.
    pub producer: NativeClientConfig,
    /// Used for topic provisioning.
    pub admin: NativeClientConfig,
}

impl ClientConfigs {
    /// Translates options for every client kind.
    #[must_use]
    pub fn from_options(options: &StreamOptions) -> Self {
        Self {
            consumer: translate(options, ClientKind::Consumer),
            producer: translate(options, ClientKind::Producer),
            admin: translate(options, ClientKind::Admin),
        }
    }
}

/// Translates options into the native config for one client kind.
///
/// Common to every kind: `bootstrap.servers` (broker list joined with `,`)
/// and every set [`ClientOptions`] field. Consumers add the group id and turn
/// off auto commit, since checkpoints own commits. Producers add the message
/// timeout, equal to the producer timeout.
#[must_use]
pub fn translate(options: &StreamOptions, kind: ClientKind) -> NativeClientConfig {
    let mut config = common_properties(options, kind);
    match kind {
        ClientKind::Consumer => {
            config.set("group.id", options.consumer_group_id.clone());
            config.set("enable.auto.commit", false);
        }
        ClientKind::Producer => {
            config.set("message.timeout.ms", options.producer_timeout_ms);
        }
        ClientKind::Admin => {}
    }
    config
}

fn common_properties(options: &StreamOptions, kind: ClientKind) -> NativeClientConfig {
    let mut config = NativeClientConfig::new(kind);
    config.set("bootstrap.servers", options.broker_list.join(","));
    for (name, value) in options.client.native_properties() {
        config.properties.insert(name.to_string(), value);
    }
    config
}

/// Returns the native property a `ClientOptions` field maps to.
#[must_use]
pub fn native_name(field: &str) -> Option<&'static str> {
    ClientOptions::MAPPING
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, native)| *native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{Acks, SaslMechanism, SecurityProtocol};
    use crate::options::Credentials;

    fn options() -> StreamOptions {
        StreamOptions::new(["b1:9092", "b2:9092"]).add_topic("orders", None)
    }

    #[test]
    fn test_common_properties() {
        let config = translate(&options(), ClientKind::Admin);
        assert_eq!(config.kind(), ClientKind::Admin);
        assert_eq!(config.get("bootstrap.servers"), Some("b1:9092,b2:9092"));
        assert_eq!(config.len(), 1, "unset tunables keep native defaults");
    }

    #[test]
    fn test_consumer_properties() {
        let config = translate(&options(), ClientKind::Consumer);
        assert_eq!(config.get("group.id"), Some("streamq"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert!(!config.contains("message.timeout.ms"));
    }

    #[test]
    fn test_producer_properties() {
        let mut opts = options();
        opts.producer_timeout_ms = 7_500;
        let config = translate(&opts, ClientKind::Producer);
        assert_eq!(config.get("message.timeout.ms"), Some("7500"));
        assert!(!config.contains("group.id"));
    }

    #[test]
    fn test_sasl_credentials_reach_every_client() {
        let opts = options().with_sasl_credentials(
            Credentials {
                username: "svc".to_string(),
                password: "pw".to_string(),
                ssl_ca_location: None,
            },
            SaslMechanism::ScramSha256,
        );
        let configs = ClientConfigs::from_options(&opts);
        for config in [&configs.consumer, &configs.producer, &configs.admin] {
            assert_eq!(config.get("sasl.username"), Some("svc"));
            assert_eq!(config.get("sasl.password"), Some("pw"));
            assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
            assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
            assert!(!config.contains("ssl.ca.location"));
        }
    }

    #[test]
    fn test_adapter_only_fields_never_translated() {
        let mut opts = options();
        opts.poll_timeout_ms = 999;
        opts.message_tracking_enabled = true;
        opts.cache_max_entries = 12;
        let config = translate(&opts, ClientKind::Consumer);

        for field in ADAPTER_ONLY_FIELDS {
            assert!(native_name(field).is_none(), "{field} has a native mapping");
        }
        assert!(config.iter().all(|(_, v)| v != "999"));
        assert!(config.iter().all(|(name, _)| !name.contains("poll")));
    }

    #[test]
    fn test_translation_is_deterministic() {
        let mut a = options();
        a.client.acks = Some(Acks::Leader);
        a.client.client_id = Some("svc".to_string());
        a.client.security_protocol = Some(SecurityProtocol::Ssl);

        // Same field values, set in a different order.
        let mut b = options();
        b.client.security_protocol = Some(SecurityProtocol::Ssl);
        b.client.client_id = Some("svc".to_string());
        b.client.acks = Some(Acks::Leader);

        assert_eq!(a, b);
        assert_eq!(
            ClientConfigs::from_options(&a),
            ClientConfigs::from_options(&b)
        );
    }

    #[test]
    fn test_every_set_tunable_is_copied() {
        let opts = StreamOptions::from_toml(
            r#"
            broker_list = ["b1:9092"]
            client_id = "svc"
            message_max_bytes = 1000000
            socket_keepalive_enable = true
            broker_address_family = "v4"
            sasl_oauthbearer_method = "oidc"
            retry_backoff_max_ms = 900
            "#,
        )
        .unwrap();
        let config = translate(&opts, ClientKind::Producer);

        for (name, value) in opts.client.native_properties() {
            assert_eq!(config.get(name), Some(value.as_str()), "property {name}");
        }
        assert_eq!(config.get("broker.address.family"), Some("v4"));
        assert_eq!(config.get("sasl.oauthbearer.method"), Some("oidc"));
    }
}
