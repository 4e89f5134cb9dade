//! Adapter options.
//!
//! `StreamOptions` is the single typed options object for a streamq adapter.
//! It carries the adapter-only settings (topics, brokers, poll timing, consume
//! mode, tracking flags, cache and checkpoint tuning) and, flattened into the
//! same table, the native transport tunables in [`ClientOptions`].
//!
//! # Example
//!
//! ```ignore
//! let options = StreamOptions::from_toml(r#"
//!     broker_list = ["localhost:9092"]
//!     consume_mode = "stream_start"
//!
//!     [[topics]]
//!     name = "orders"
//! "#)?;
//! options.validate()?;
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ClientOptions;
use crate::error::{ConfigError, ConfigResult};
use crate::native::{SaslMechanism, SecurityProtocol};

/// Where a fresh poller starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeMode {
    /// Oldest offset the transport still retains.
    StreamStart,
    /// Just after the last committed checkpoint; the end of the stream when
    /// no checkpoint exists.
    #[default]
    LastCommittedMessage,
    /// Only records produced after the poller starts.
    StreamEnd,
}

/// What a pull does after a lagging cursor lost entries to forced eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMissPolicy {
    /// Report the miss and leave the cursor in place until the caller resets it.
    #[default]
    Signal,
    /// Report the miss once, then move the cursor to the oldest retained entry.
    RewindToOldest,
}

/// Settings used when a topic is created on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicCreationConfig {
    /// Create the topic when missing.
    pub auto_create: bool,
    /// Partition count; -1 uses the broker default.
    pub partitions: i32,
    /// Replication factor; -1 uses the broker default.
    pub replication_factor: i16,
    /// Retention in milliseconds; the broker default (7 days) when unset.
    pub retention_period_ms: Option<u64>,
}

impl Default for TopicCreationConfig {
    fn default() -> Self {
        Self {
            auto_create: false,
            partitions: -1,
            replication_factor: 1,
            retention_period_ms: None,
        }
    }
}

/// A topic the adapter reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Topic name on the transport.
    pub name: String,
    /// Records are produced outside this system.
    pub is_external: bool,
    /// Contract name handed to the codec when decoding external records.
    pub external_contract: Option<String>,
    /// Create the topic when missing.
    pub auto_create: bool,
    /// Partition count; -1 uses the broker default.
    pub partitions: i32,
    /// Replication factor; -1 uses the broker default.
    pub replication_factor: i16,
    /// Retention in milliseconds.
    pub retention_period_ms: Option<u64>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        let creation = TopicCreationConfig::default();
        Self {
            name: String::new(),
            is_external: false,
            external_contract: None,
            auto_create: creation.auto_create,
            partitions: creation.partitions,
            replication_factor: creation.replication_factor,
            retention_period_ms: creation.retention_period_ms,
        }
    }
}

impl TopicConfig {
    /// Creates an internal topic with default creation settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Applies creation settings.
    #[must_use]
    pub fn with_creation(mut self, creation: TopicCreationConfig) -> Self {
        self.auto_create = creation.auto_create;
        self.partitions = creation.partitions;
        self.replication_factor = creation.replication_factor;
        self.retention_period_ms = creation.retention_period_ms;
        self
    }

    /// Returns the creation settings of this topic.
    #[must_use]
    pub const fn creation(&self) -> TopicCreationConfig {
        TopicCreationConfig {
            auto_create: self.auto_create,
            partitions: self.partitions,
            replication_factor: self.replication_factor,
            retention_period_ms: self.retention_period_ms,
        }
    }
}

/// SASL credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// SASL username.
    pub username: String,
    /// SASL password.
    pub password: String,
    /// CA certificate used to verify brokers.
    pub ssl_ca_location: Option<String>,
}

/// Typed options for a streamq adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Topics served by the adapter.
    pub topics: Vec<TopicConfig>,
    /// Broker addresses (`host:port`).
    pub broker_list: Vec<String>,
    /// Consumer group the checkpoints are committed under.
    pub consumer_group_id: String,
    /// Maximum time one poll blocks waiting for records.
    pub poll_timeout_ms: u64,
    /// Timeout for administrative requests.
    pub admin_request_timeout_ms: u64,
    /// Where a fresh poller starts.
    pub consume_mode: ConsumeMode,
    /// Budget for one send, retries included.
    pub producer_timeout_ms: u64,
    /// Maximum age of an entry in the cache window.
    pub poll_buffer_timeout_ms: u64,
    /// Emit tracking events to the trace sink.
    pub message_tracking_enabled: bool,
    /// Carry request context headers through the stream.
    pub import_request_context: bool,

    /// Maximum entries retained per partition window (hard bound).
    pub cache_max_entries: usize,
    /// Behaviour after a forced eviction overtakes a cursor.
    pub cache_miss_policy: CacheMissPolicy,
    /// Largest batch one pull hands to a reader.
    pub max_pull_batch: usize,
    /// Largest batch one poll fetches from the transport.
    pub max_fetch_records: usize,
    /// Commit cadence by time.
    pub checkpoint_interval_ms: u64,
    /// Commit cadence by acknowledgement count.
    pub checkpoint_every_acks: u64,
    /// Initial retry backoff for transient transport failures.
    pub backoff_min_ms: u64,
    /// Maximum retry backoff for transient transport failures.
    pub backoff_max_ms: u64,
    /// In-flight sends allowed per destination partition.
    pub max_in_flight_per_destination: usize,
    /// Concurrent transport requests across pollers and the dispatcher.
    pub max_concurrent_requests: usize,
    /// Time allowed for pollers and sends to wind down on shutdown.
    pub shutdown_grace_ms: u64,

    /// Native transport tunables.
    #[serde(flatten)]
    pub client: ClientOptions,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            broker_list: Vec::new(),
            consumer_group_id: "streamq".to_string(),
            poll_timeout_ms: 100,
            admin_request_timeout_ms: 5_000,
            consume_mode: ConsumeMode::LastCommittedMessage,
            producer_timeout_ms: 5_000,
            poll_buffer_timeout_ms: 500,
            message_tracking_enabled: false,
            import_request_context: false,
            cache_max_entries: 4_096,
            cache_miss_policy: CacheMissPolicy::Signal,
            max_pull_batch: 500,
            max_fetch_records: 500,
            checkpoint_interval_ms: 1_000,
            checkpoint_every_acks: 100,
            backoff_min_ms: 50,
            backoff_max_ms: 5_000,
            max_in_flight_per_destination: 5,
            max_concurrent_requests: 64,
            shutdown_grace_ms: 5_000,
            client: ClientOptions::default(),
        }
    }
}

impl StreamOptions {
    /// Creates options for the given brokers with defaults elsewhere.
    #[must_use]
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            broker_list: brokers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds an internal topic.
    #[must_use]
    pub fn add_topic(
        mut self,
        name: impl Into<String>,
        creation: Option<TopicCreationConfig>,
    ) -> Self {
        let mut topic = TopicConfig::new(name);
        if let Some(creation) = creation {
            topic = topic.with_creation(creation);
        }
        self.topics.push(topic);
        self
    }

    /// Adds a topic produced outside this system, decoded as `contract`.
    #[must_use]
    pub fn add_external_topic(
        mut self,
        name: impl Into<String>,
        contract: impl Into<String>,
        creation: Option<TopicCreationConfig>,
    ) -> Self {
        let mut topic = TopicConfig::new(name);
        topic.is_external = true;
        topic.external_contract = Some(contract.into());
        if let Some(creation) = creation {
            topic = topic.with_creation(creation);
        }
        self.topics.push(topic);
        self
    }

    /// Configures SASL over TLS with the given credentials.
    #[must_use]
    pub fn with_sasl_credentials(mut self, credentials: Credentials, mechanism: SaslMechanism) -> Self {
        self.client.sasl_mechanism = Some(mechanism);
        self.client.security_protocol = Some(SecurityProtocol::SaslSsl);
        self.client.sasl_username = Some(credentials.username);
        self.client.sasl_password = Some(credentials.password);
        self.client.ssl_ca_location = credentials.ssl_ca_location;
        self
    }

    /// Sets the consume mode.
    #[must_use]
    pub fn with_consume_mode(mut self, mode: ConsumeMode) -> Self {
        self.consume_mode = mode;
        self
    }

    /// Looks up a configured topic by name.
    #[must_use]
    pub fn topic(&self, name: &str) -> Option<&TopicConfig> {
        self.topics.iter().find(|t| t.name == name)
    }

    /// Poll timeout as a `Duration`.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Admin request timeout as a `Duration`.
    #[must_use]
    pub const fn admin_request_timeout(&self) -> Duration {
        Duration::from_millis(self.admin_request_timeout_ms)
    }

    /// Producer timeout as a `Duration`.
    #[must_use]
    pub const fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    /// Poll buffer timeout as a `Duration`.
    #[must_use]
    pub const fn poll_buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_buffer_timeout_ms)
    }

    /// Checkpoint interval as a `Duration`.
    #[must_use]
    pub const fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    /// Minimum retry backoff as a `Duration`.
    #[must_use]
    pub const fn backoff_min(&self) -> Duration {
        Duration::from_millis(self.backoff_min_ms)
    }

    /// Maximum retry backoff as a `Duration`.
    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns the first problem found. Nothing may be assigned until the
    /// options validate.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker_list.iter().all(|b| b.trim().is_empty()) {
            return Err(ConfigError::MissingBrokers);
        }
        if self.topics.is_empty() {
            return Err(ConfigError::MissingTopics);
        }

        let mut seen = HashSet::new();
        for topic in &self.topics {
            validate_topic(topic)?;
            if !seen.insert(topic.name.as_str()) {
                return Err(ConfigError::InvalidTopic {
                    name: topic.name.clone(),
                    message: "configured more than once".to_string(),
                });
            }
        }

        if self.consumer_group_id.trim().is_empty() {
            return Err(ConfigError::invalid_value("consumer_group_id", "must not be empty"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("poll_timeout_ms", "must be > 0"));
        }
        if self.producer_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("producer_timeout_ms", "must be > 0"));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::invalid_value("cache_max_entries", "must be > 0"));
        }
        if self.max_pull_batch == 0 {
            return Err(ConfigError::invalid_value("max_pull_batch", "must be > 0"));
        }
        if self.max_fetch_records == 0 {
            return Err(ConfigError::invalid_value("max_fetch_records", "must be > 0"));
        }
        if self.checkpoint_every_acks == 0 {
            return Err(ConfigError::invalid_value("checkpoint_every_acks", "must be > 0"));
        }
        if self.backoff_min_ms == 0 {
            return Err(ConfigError::invalid_value("backoff_min_ms", "must be > 0"));
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(ConfigError::invalid_value(
                "backoff_max_ms",
                format!(
                    "must be >= backoff_min_ms ({} < {})",
                    self.backoff_max_ms, self.backoff_min_ms
                ),
            ));
        }
        if self.max_in_flight_per_destination == 0 {
            return Err(ConfigError::invalid_value("max_in_flight_per_destination", "must be > 0"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::invalid_value("max_concurrent_requests", "must be > 0"));
        }
        Ok(())
    }

    /// Loads options from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses options from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml: &str) -> ConfigResult<Self> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Serializes the options to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn validate_topic(topic: &TopicConfig) -> ConfigResult<()> {
    let invalid = |message: &str| ConfigError::InvalidTopic {
        name: topic.name.clone(),
        message: message.to_string(),
    };

    if topic.name.trim().is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if topic.auto_create {
        if topic.partitions == 0 || topic.partitions < -1 {
            return Err(invalid("partitions must be -1 or positive"));
        }
        if topic.replication_factor == 0 || topic.replication_factor < -1 {
            return Err(invalid("replication_factor must be -1 or positive"));
        }
    }
    Ok(())
}
