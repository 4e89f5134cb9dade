//! Value types of the transport client's native configuration surface.
//!
//! Each enum renders to the exact string the native client accepts for its
//! property. [`NativeValue`] is the single conversion point used by the
//! translation table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Renders an option value as a native property string.
pub trait NativeValue {
    /// Returns the native string form of this value.
    fn to_native(&self) -> String;
}

impl NativeValue for String {
    fn to_native(&self) -> String {
        self.clone()
    }
}

impl NativeValue for bool {
    fn to_native(&self) -> String {
        if *self { "true" } else { "false" }.to_string()
    }
}

impl NativeValue for i32 {
    fn to_native(&self) -> String {
        self.to_string()
    }
}

impl NativeValue for u64 {
    fn to_native(&self) -> String {
        self.to_string()
    }
}

/// Declares a native enum with its serde name and native string per variant.
macro_rules! native_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => ($serde:literal, $native:literal), )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $serde)]
                $variant,
            )+
        }

        impl $name {
            /// Returns the native property value.
            #[must_use]
            pub const fn as_native(self) -> &'static str {
                match self {
                    $( Self::$variant => $native, )+
                }
            }
        }

        impl NativeValue for $name {
            fn to_native(&self) -> String {
                self.as_native().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_native())
            }
        }
    };
}

native_enum! {
    /// SASL mechanism used for authentication.
    SaslMechanism {
        /// Kerberos.
        Gssapi => ("gssapi", "GSSAPI"),
        /// Username and password in clear (use with TLS).
        Plain => ("plain", "PLAIN"),
        /// SCRAM with SHA-256.
        ScramSha256 => ("scram_sha256", "SCRAM-SHA-256"),
        /// SCRAM with SHA-512.
        ScramSha512 => ("scram_sha512", "SCRAM-SHA-512"),
        /// OAuth bearer tokens.
        OAuthBearer => ("oauthbearer", "OAUTHBEARER"),
    }
}

native_enum! {
    /// Number of acknowledgements the partition leader waits for.
    Acks {
        /// No acknowledgement.
        None => ("none", "0"),
        /// Leader only.
        Leader => ("leader", "1"),
        /// All in-sync replicas.
        All => ("all", "all"),
    }
}

native_enum! {
    /// Protocol used to talk to brokers.
    SecurityProtocol {
        /// Unencrypted, unauthenticated.
        Plaintext => ("plaintext", "plaintext"),
        /// TLS.
        Ssl => ("ssl", "ssl"),
        /// SASL without TLS.
        SaslPlaintext => ("sasl_plaintext", "sasl_plaintext"),
        /// SASL over TLS.
        SaslSsl => ("sasl_ssl", "sasl_ssl"),
    }
}

native_enum! {
    /// Address family used when resolving broker addresses.
    BrokerAddressFamily {
        /// IPv4 or IPv6.
        Any => ("any", "any"),
        /// IPv4 only.
        V4 => ("v4", "v4"),
        /// IPv6 only.
        V6 => ("v6", "v6"),
    }
}

native_enum! {
    /// Broker certificate endpoint identification.
    SslEndpointIdentificationAlgorithm {
        /// No hostname verification.
        None => ("none", "none"),
        /// Verify the broker hostname against its certificate.
        Https => ("https", "https"),
    }
}

native_enum! {
    /// How OAUTHBEARER tokens are obtained.
    SaslOauthbearerMethod {
        /// Application-supplied token refresh.
        Default => ("default", "default"),
        /// Built-in OIDC client.
        Oidc => ("oidc", "oidc"),
    }
}

native_enum! {
    /// OIDC grant type.
    SaslOauthbearerGrantType {
        /// Client credentials grant.
        ClientCredentials => ("client_credentials", "client_credentials"),
        /// JWT bearer assertion grant.
        JwtBearer => ("jwt_bearer", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
    }
}

native_enum! {
    /// Signing algorithm for JWT bearer assertions.
    SaslOauthbearerAssertionAlgorithm {
        /// RSA with SHA-256.
        Rs256 => ("rs256", "RS256"),
        /// ECDSA with SHA-256.
        Es256 => ("es256", "ES256"),
    }
}

native_enum! {
    /// How the OIDC client authenticates to the metadata endpoint.
    SaslOauthbearerMetadataAuthenticationType {
        /// No metadata authentication.
        None => ("none", "none"),
        /// Azure instance metadata service.
        AzureImds => ("azure_imds", "azure_imds"),
    }
}

native_enum! {
    /// Behaviour when all known brokers become unavailable.
    MetadataRecoveryStrategy {
        /// Keep using the known brokers.
        None => ("none", "none"),
        /// Re-bootstrap from the configured broker list.
        Rebootstrap => ("rebootstrap", "rebootstrap"),
    }
}

native_enum! {
    /// DNS lookup behaviour for bootstrap servers.
    ClientDnsLookup {
        /// Try every resolved address.
        UseAllDnsIps => ("use_all_dns_ips", "use_all_dns_ips"),
        /// Resolve bootstrap names to canonical names first.
        ResolveCanonicalBootstrapServersOnly => (
            "resolve_canonical_bootstrap_servers_only",
            "resolve_canonical_bootstrap_servers_only"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_strings() {
        assert_eq!(SaslMechanism::ScramSha512.as_native(), "SCRAM-SHA-512");
        assert_eq!(Acks::None.to_native(), "0");
        assert_eq!(SecurityProtocol::SaslSsl.to_string(), "sasl_ssl");
        assert_eq!(
            SaslOauthbearerGrantType::JwtBearer.as_native(),
            "urn:ietf:params:oauth:grant-type:jwt-bearer"
        );
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(true.to_native(), "true");
        assert_eq!(false.to_native(), "false");
        assert_eq!((-1_i32).to_native(), "-1");
        assert_eq!(String::from("x").to_native(), "x");
    }
}
