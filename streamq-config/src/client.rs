//! Native transport client tunables.
//!
//! `ClientOptions` mirrors the transport client's own configuration surface.
//! Every field is optional; an unset field keeps the native default. The
//! mapping from field to native property name is a compile-time table built
//! by `client_options!`, so adding a tunable is one line.

use serde::{Deserialize, Serialize};

use crate::native::{
    Acks, BrokerAddressFamily, ClientDnsLookup, MetadataRecoveryStrategy, NativeValue,
    SaslMechanism, SaslOauthbearerAssertionAlgorithm, SaslOauthbearerGrantType,
    SaslOauthbearerMetadataAuthenticationType, SaslOauthbearerMethod, SecurityProtocol,
    SslEndpointIdentificationAlgorithm,
};

macro_rules! client_options {
    ( $( $(#[$doc:meta])* $field:ident : $ty:ty => $native:literal, )+ ) => {
        /// Native transport client tunables, all optional.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct ClientOptions {
            $(
                $(#[$doc])*
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )+
        }

        impl ClientOptions {
            /// `(field, native property)` for every mapped tunable, in
            /// declaration order.
            pub const MAPPING: &'static [(&'static str, &'static str)] = &[
                $( (stringify!($field), $native), )+
            ];

            /// Returns `(native property, value)` for every field that is set.
            #[must_use]
            pub fn native_properties(&self) -> Vec<(&'static str, String)> {
                let mut properties = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        properties.push(($native, value.to_native()));
                    }
                )+
                properties
            }
        }
    };
}

client_options! {
    /// SASL mechanism. Only one mechanism may be configured.
    sasl_mechanism: SaslMechanism => "sasl.mechanism",
    /// Acknowledgements required from the partition leader.
    acks: Acks => "acks",
    /// Client identifier sent with every request.
    client_id: String => "client.id",
    /// Maximum protocol request message size.
    message_max_bytes: i32 => "message.max.bytes",
    /// Maximum size for message to be copied to buffer.
    message_copy_max_bytes: i32 => "message.copy.max.bytes",
    /// Maximum protocol response message size.
    receive_message_max_bytes: i32 => "receive.message.max.bytes",
    /// Maximum in-flight requests per broker connection.
    max_in_flight: i32 => "max.in.flight.requests.per.connection",
    /// Behaviour when every known broker is unavailable.
    metadata_recovery_strategy: MetadataRecoveryStrategy => "metadata.recovery.strategy",
    /// Delay before re-bootstrapping when no broker is reachable.
    metadata_recovery_rebootstrap_trigger_ms: i32 => "metadata.recovery.rebootstrap.trigger.ms",
    /// Period of topic and broker metadata refresh.
    topic_metadata_refresh_interval_ms: i32 => "topic.metadata.refresh.interval.ms",
    /// Metadata cache max age.
    metadata_max_age_ms: i32 => "metadata.max.age.ms",
    /// Refresh interval while a leader is missing.
    topic_metadata_refresh_fast_interval_ms: i32 => "topic.metadata.refresh.fast.interval.ms",
    /// Sparse metadata requests.
    topic_metadata_refresh_sparse: bool => "topic.metadata.refresh.sparse",
    /// Wait for newly created topics to propagate.
    topic_metadata_propagation_max_ms: i32 => "topic.metadata.propagation.max.ms",
    /// Topic names to ignore in broker metadata (regex list).
    topic_blacklist: String => "topic.blacklist",
    /// Native debug contexts (comma separated).
    debug: String => "debug",
    /// Network request timeout.
    socket_timeout_ms: i32 => "socket.timeout.ms",
    /// Socket send buffer size.
    socket_send_buffer_bytes: i32 => "socket.send.buffer.bytes",
    /// Socket receive buffer size.
    socket_receive_buffer_bytes: i32 => "socket.receive.buffer.bytes",
    /// Enable TCP keep-alives.
    socket_keepalive_enable: bool => "socket.keepalive.enable",
    /// Disable Nagle's algorithm.
    socket_nagle_disable: bool => "socket.nagle.disable",
    /// Disconnect after this many send failures.
    socket_max_fails: i32 => "socket.max.fails",
    /// How long to cache broker address resolution.
    broker_address_ttl: i32 => "broker.address.ttl",
    /// Allowed broker IP address family.
    broker_address_family: BrokerAddressFamily => "broker.address.family",
    /// Maximum time for a broker connection to become ready.
    socket_connection_setup_timeout_ms: i32 => "socket.connection.setup.timeout.ms",
    /// Close idle connections after this long.
    connections_max_idle_ms: i32 => "connections.max.idle.ms",
    /// Initial reconnect backoff.
    reconnect_backoff_ms: i32 => "reconnect.backoff.ms",
    /// Maximum reconnect backoff.
    reconnect_backoff_max_ms: i32 => "reconnect.backoff.max.ms",
    /// Statistics emit interval.
    statistics_interval_ms: i32 => "statistics.interval.ms",
    /// Route native logs through a queue.
    log_queue: bool => "log.queue",
    /// Include the thread name in native log messages.
    log_thread_name: bool => "log.thread.name",
    /// Seed the native random generator on startup.
    enable_random_seed: bool => "enable.random.seed",
    /// Log broker disconnects.
    log_connection_close: bool => "log.connection.close",
    /// Signal used for quick termination.
    internal_termination_signal: i32 => "internal.termination.signal",
    /// Request broker supported API versions.
    api_version_request: bool => "api.version.request",
    /// Timeout for the API version request.
    api_version_request_timeout_ms: i32 => "api.version.request.timeout.ms",
    /// How long to use the fallback version after a failed request.
    api_version_fallback_ms: i32 => "api.version.fallback.ms",
    /// Broker version to assume when version requests are disabled.
    broker_version_fallback: String => "broker.version.fallback",
    /// Allow broker-side topic auto creation on subscribe or metadata.
    allow_auto_create_topics: bool => "allow.auto.create.topics",
    /// Protocol used to communicate with brokers.
    security_protocol: SecurityProtocol => "security.protocol",
    /// TLS cipher suites.
    ssl_cipher_suites: String => "ssl.cipher.suites",
    /// Supported TLS curves.
    ssl_curves_list: String => "ssl.curves.list",
    /// Supported TLS signature algorithms.
    ssl_sigalgs_list: String => "ssl.sigalgs.list",
    /// Client private key path.
    ssl_key_location: String => "ssl.key.location",
    /// Client private key passphrase.
    ssl_key_password: String => "ssl.key.password",
    /// Client private key in PEM.
    ssl_key_pem: String => "ssl.key.pem",
    /// Client public key path.
    ssl_certificate_location: String => "ssl.certificate.location",
    /// Client public key in PEM.
    ssl_certificate_pem: String => "ssl.certificate.pem",
    /// CA certificate path for broker verification.
    ssl_ca_location: String => "ssl.ca.location",
    /// CA certificate path for HTTPS endpoints.
    https_ca_location: String => "https.ca.location",
    /// CA certificate in PEM for HTTPS endpoints.
    https_ca_pem: String => "https.ca.pem",
    /// CA certificate in PEM for broker verification.
    ssl_ca_pem: String => "ssl.ca.pem",
    /// Windows certificate stores to load CAs from.
    ssl_ca_certificate_stores: String => "ssl.ca.certificate.stores",
    /// Certificate revocation list path.
    ssl_crl_location: String => "ssl.crl.location",
    /// Client keystore (PKCS#12) path.
    ssl_keystore_location: String => "ssl.keystore.location",
    /// Client keystore password.
    ssl_keystore_password: String => "ssl.keystore.password",
    /// OpenSSL providers to load.
    ssl_providers: String => "ssl.providers",
    /// OpenSSL engine library path.
    ssl_engine_location: String => "ssl.engine.location",
    /// OpenSSL engine id.
    ssl_engine_id: String => "ssl.engine.id",
    /// Verify the broker certificate.
    enable_ssl_certificate_verification: bool => "enable.ssl.certificate.verification",
    /// Broker hostname verification.
    ssl_endpoint_identification_algorithm: SslEndpointIdentificationAlgorithm
        => "ssl.endpoint.identification.algorithm",
    /// Kerberos principal name the brokers run as.
    sasl_kerberos_service_name: String => "sasl.kerberos.service.name",
    /// This client's Kerberos principal.
    sasl_kerberos_principal: String => "sasl.kerberos.principal",
    /// Shell command to refresh or acquire the client's Kerberos ticket.
    sasl_kerberos_kinit_cmd: String => "sasl.kerberos.kinit.cmd",
    /// Kerberos keytab path.
    sasl_kerberos_keytab: String => "sasl.kerberos.keytab",
    /// Minimum time between key refresh attempts.
    sasl_kerberos_min_time_before_relogin: i32 => "sasl.kerberos.min.time.before.relogin",
    /// SASL username for PLAIN and SCRAM.
    sasl_username: String => "sasl.username",
    /// SASL password for PLAIN and SCRAM.
    sasl_password: String => "sasl.password",
    /// OAUTHBEARER configuration string.
    sasl_oauthbearer_config: String => "sasl.oauthbearer.config",
    /// Enable the builtin unsecure JWT handler.
    enable_sasl_oauthbearer_unsecure_jwt: bool => "enable.sasl.oauthbearer.unsecure.jwt",
    /// OAUTHBEARER token retrieval method.
    sasl_oauthbearer_method: SaslOauthbearerMethod => "sasl.oauthbearer.method",
    /// OIDC client id.
    sasl_oauthbearer_client_id: String => "sasl.oauthbearer.client.id",
    /// OIDC client secret.
    sasl_oauthbearer_client_secret: String => "sasl.oauthbearer.client.secret",
    /// OIDC scope.
    sasl_oauthbearer_scope: String => "sasl.oauthbearer.scope",
    /// Additional OAUTHBEARER extensions.
    sasl_oauthbearer_extensions: String => "sasl.oauthbearer.extensions",
    /// OIDC token endpoint.
    sasl_oauthbearer_token_endpoint_url: String => "sasl.oauthbearer.token.endpoint.url",
    /// OIDC grant type.
    sasl_oauthbearer_grant_type: SaslOauthbearerGrantType => "sasl.oauthbearer.grant.type",
    /// JWT assertion signing algorithm.
    sasl_oauthbearer_assertion_algorithm: SaslOauthbearerAssertionAlgorithm
        => "sasl.oauthbearer.assertion.algorithm",
    /// JWT assertion private key path.
    sasl_oauthbearer_assertion_private_key_file: String
        => "sasl.oauthbearer.assertion.private.key.file",
    /// JWT assertion private key passphrase.
    sasl_oauthbearer_assertion_private_key_passphrase: String
        => "sasl.oauthbearer.assertion.private.key.passphrase",
    /// JWT assertion private key in PEM.
    sasl_oauthbearer_assertion_private_key_pem: String
        => "sasl.oauthbearer.assertion.private.key.pem",
    /// Pre-built JWT assertion file.
    sasl_oauthbearer_assertion_file: String => "sasl.oauthbearer.assertion.file",
    /// JWT `aud` claim.
    sasl_oauthbearer_assertion_claim_aud: String => "sasl.oauthbearer.assertion.claim.aud",
    /// JWT expiry in seconds.
    sasl_oauthbearer_assertion_claim_exp_seconds: i32
        => "sasl.oauthbearer.assertion.claim.exp.seconds",
    /// JWT `iss` claim.
    sasl_oauthbearer_assertion_claim_iss: String => "sasl.oauthbearer.assertion.claim.iss",
    /// Include a `jti` claim.
    sasl_oauthbearer_assertion_claim_jti_include: bool
        => "sasl.oauthbearer.assertion.claim.jti.include",
    /// JWT not-before offset in seconds.
    sasl_oauthbearer_assertion_claim_nbf_seconds: i32
        => "sasl.oauthbearer.assertion.claim.nbf.seconds",
    /// JWT `sub` claim.
    sasl_oauthbearer_assertion_claim_sub: String => "sasl.oauthbearer.assertion.claim.sub",
    /// JWT template file.
    sasl_oauthbearer_assertion_jwt_template_file: String
        => "sasl.oauthbearer.assertion.jwt.template.file",
    /// Metadata endpoint authentication.
    sasl_oauthbearer_metadata_authentication_type: SaslOauthbearerMetadataAuthenticationType
        => "sasl.oauthbearer.metadata.authentication.type",
    /// Plugin libraries to load (separated by `;`).
    plugin_library_paths: String => "plugin.library.paths",
    /// Rack identifier of this client.
    client_rack: String => "client.rack",
    /// Initial backoff before retrying a protocol request.
    retry_backoff_ms: i32 => "retry.backoff.ms",
    /// Maximum backoff before retrying a protocol request.
    retry_backoff_max_ms: i32 => "retry.backoff.max.ms",
    /// DNS lookup behaviour for bootstrap servers.
    client_dns_lookup: ClientDnsLookup => "client.dns.lookup",
    /// Push client metrics to the cluster.
    enable_metrics_push: bool => "enable.metrics.push",
}
