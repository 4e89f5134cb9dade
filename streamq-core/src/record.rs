//! Record types flowing through streamq.
//!
//! # Record Lifecycle
//!
//! - **`RawRecord`**: What the transport returns from a fetch. Offset,
//!   timestamp, optional key, payload bytes and headers.
//! - **`LogEntry`**: A raw record after a successful decode. Created by the
//!   poller, immutable afterwards and owned by the cache until evicted.
//! - **`OutboundRecord`**: What the dispatch path hands to the transport.
//!
//! Offsets are monotonically increasing per partition. A [`SequenceToken`] is
//! the opaque, totally ordered position readers use to say "continue after
//! this entry".

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::types::PartitionKey;

/// A record header (key-value metadata).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header key.
    pub key: Bytes,
    /// Header value.
    pub value: Bytes,
}

impl Header {
    /// Creates a new header.
    #[must_use]
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the approximate size of this header in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Timestamp type for records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the current wall-clock time as a timestamp.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Timestamps won't overflow i64 for centuries.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Creates a timestamp representing "no timestamp".
    #[must_use]
    pub const fn none() -> Self {
        Self(-1)
    }

    /// Returns true if this represents "no timestamp".
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::none()
    }
}

/// Offset in a partition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw offset value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next offset.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous offset, or `None` at offset zero.
    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Returns the offset `count` positions further on.
    #[must_use]
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0.saturating_add(count))
    }

    /// Returns the number of positions from `earlier` to `self` (zero if
    /// `earlier` is ahead).
    #[must_use]
    pub const fn distance_from(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque read position within a partition.
///
/// Totally ordered within a partition and derived from the offset of the
/// entry it names. Readers hand a token back to mean "everything up to and
/// including this entry".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceToken(Offset);

impl SequenceToken {
    /// Creates the token naming the entry at `offset`.
    #[must_use]
    pub const fn from_offset(offset: Offset) -> Self {
        Self(offset)
    }

    /// Returns the offset of the entry this token names.
    #[must_use]
    pub const fn offset(self) -> Offset {
        self.0
    }

    /// Returns the offset a reader continues at after this token.
    #[must_use]
    pub const fn resume_offset(self) -> Offset {
        self.0.next()
    }
}

impl fmt::Debug for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token({})", self.0.get())
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token@{}", self.0.get())
    }
}

/// A partition's safe point as its cache saw it at one moment.
///
/// `version` counts changes to the partition's cursors. Of two reports, the
/// one with the higher version is the newer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafePoint {
    /// Newest token every cursor acknowledged. `None` when some cursor
    /// acknowledged nothing or no cursor exists.
    pub token: Option<SequenceToken>,
    /// Cursors registered when the report was taken.
    pub cursors: usize,
    /// Cursor change counter of the partition.
    pub version: u64,
}

impl SafePoint {
    /// Creates a report.
    #[must_use]
    pub const fn new(token: Option<SequenceToken>, cursors: usize, version: u64) -> Self {
        Self {
            token,
            cursors,
            version,
        }
    }

    /// Offset of the safe point token.
    #[must_use]
    pub fn offset(&self) -> Option<Offset> {
        self.token.map(SequenceToken::offset)
    }
}

/// Low and high watermarks of a partition on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// Oldest offset still retained by the transport.
    pub low: Offset,
    /// Offset the next produced record will get (one past the newest).
    pub high: Offset,
}

impl Watermarks {
    /// Creates watermarks.
    ///
    /// # Panics
    ///
    /// Panics if `low > high`.
    #[must_use]
    pub fn new(low: Offset, high: Offset) -> Self {
        assert!(low <= high, "low watermark {low} above high watermark {high}");
        Self { low, high }
    }
}

/// A record as returned by a transport fetch, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Offset in the partition.
    pub offset: Offset,
    /// Timestamp assigned by the producer or the broker.
    pub timestamp: Timestamp,
    /// Optional key used for partitioning.
    pub key: Option<Bytes>,
    /// Payload bytes.
    pub payload: Bytes,
    /// Headers.
    pub headers: Vec<Header>,
}

impl RawRecord {
    /// Creates a raw record without key or headers.
    #[must_use]
    pub fn new(offset: Offset, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            timestamp: Timestamp::now(),
            key: None,
            payload: payload.into(),
            headers: Vec::new(),
        }
    }

    /// Returns the approximate size of the record in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        let key_size = self.key.as_ref().map_or(0, Bytes::len);
        let headers_size: usize = self.headers.iter().map(Header::size).sum();
        8 + 8 + key_size + self.payload.len() + headers_size
    }
}

/// A record on its way out through the dispatch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Optional key; records with the same key land on the same partition.
    pub key: Option<Bytes>,
    /// Payload bytes.
    pub payload: Bytes,
    /// Headers.
    pub headers: Vec<Header>,
    /// Producer-side timestamp.
    pub timestamp: Timestamp,
}

impl OutboundRecord {
    /// Creates an outbound record with just a payload.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            payload: payload.into(),
            headers: Vec::new(),
            timestamp: Timestamp::now(),
        }
    }

    /// Sets the key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }
}

/// A decoded record retained in a partition's cache window.
///
/// Immutable once built. The cache hands out `Arc<LogEntry<T>>` so multiple
/// readers can hold the same entry without copying the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry<T> {
    /// Partition the entry was fetched from.
    pub partition: PartitionKey,
    /// Offset in the partition.
    pub offset: Offset,
    /// Optional record key.
    pub key: Option<Bytes>,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Record headers.
    pub headers: Vec<Header>,
    /// Producer or broker timestamp.
    pub timestamp: Timestamp,
    /// When the poller appended the entry to the cache (local clock, us).
    pub enqueued_at_us: u64,
    /// Result of decoding the payload.
    pub item: T,
}

impl<T> LogEntry<T> {
    /// Builds an entry from a fetched record and its decoded item.
    #[must_use]
    pub fn from_raw(partition: PartitionKey, raw: RawRecord, item: T, enqueued_at_us: u64) -> Self {
        Self {
            partition,
            offset: raw.offset,
            key: raw.key,
            payload: raw.payload,
            headers: raw.headers,
            timestamp: raw.timestamp,
            enqueued_at_us,
            item,
        }
    }

    /// Returns the sequence token naming this entry.
    #[must_use]
    pub const fn token(&self) -> SequenceToken {
        SequenceToken::from_offset(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartitionId;

    #[test]
    fn test_offset() {
        let offset = Offset::new(100);
        assert_eq!(offset.get(), 100);
        assert_eq!(offset.next().get(), 101);
        assert_eq!(offset.prev(), Some(Offset::new(99)));
        assert_eq!(Offset::new(0).prev(), None);
        assert_eq!(offset.advance(5), Offset::new(105));
        assert_eq!(offset.distance_from(Offset::new(40)), 60);
        assert_eq!(Offset::new(3).distance_from(Offset::new(40)), 0);
    }

    #[test]
    fn test_token_ordering_follows_offset() {
        let a = SequenceToken::from_offset(Offset::new(4));
        let b = SequenceToken::from_offset(Offset::new(9));
        assert!(a < b);
        assert_eq!(a.resume_offset(), Offset::new(5));
        assert_eq!(format!("{a:?}"), "token(4)");
    }

    #[test]
    fn test_timestamp() {
        let ts = Timestamp::from_millis(1000);
        assert_eq!(ts.as_millis(), 1000);
        assert!(!ts.is_none());
        assert!(Timestamp::none().is_none());
        assert!(Timestamp::default().is_none());
    }

    #[test]
    #[should_panic(expected = "above high watermark")]
    fn test_watermarks_reject_inverted_range() {
        let _ = Watermarks::new(Offset::new(10), Offset::new(5));
    }

    #[test]
    fn test_log_entry_from_raw() {
        let partition = PartitionKey::new("events", PartitionId::new(0));
        let mut raw = RawRecord::new(Offset::new(7), "payload");
        raw.key = Some(Bytes::from_static(b"k"));
        raw.headers.push(Header::new("trace", "abc"));

        let entry = LogEntry::from_raw(partition.clone(), raw, "decoded", 1_000);

        assert_eq!(entry.partition, partition);
        assert_eq!(entry.token(), SequenceToken::from_offset(Offset::new(7)));
        assert_eq!(entry.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(entry.headers.len(), 1);
        assert_eq!(entry.item, "decoded");
        assert_eq!(entry.enqueued_at_us, 1_000);
    }

    #[test]
    fn test_outbound_record_builder() {
        let record = OutboundRecord::new("v")
            .with_key("user-1")
            .with_header("h", "1");
        assert_eq!(record.key.as_deref(), Some(&b"user-1"[..]));
        assert_eq!(record.headers[0], Header::new("h", "1"));
    }

    #[test]
    fn test_raw_record_size_counts_key_and_headers() {
        let mut raw = RawRecord::new(Offset::new(0), vec![0u8; 10]);
        let base = raw.size();
        raw.key = Some(Bytes::from(vec![0u8; 4]));
        raw.headers.push(Header::new("ab", "cd"));
        assert_eq!(raw.size(), base + 4 + 4);
    }
}
