//! Start position resolution for a freshly assigned partition.

use streamq_config::ConsumeMode;
use streamq_core::{Offset, PartitionKey, Watermarks};
use tracing::warn;

/// Why the poller starts where it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    /// Oldest retained offset (`StreamStart`).
    StreamStart,
    /// Just after the committed checkpoint.
    Checkpoint,
    /// The checkpoint was older than the transport retains.
    CheckpointExpired,
    /// End of the stream (`StreamEnd`, or no checkpoint).
    StreamEnd,
}

/// Resolved start position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPosition {
    /// First offset to fetch.
    pub offset: Offset,
    /// How it was chosen.
    pub reason: StartReason,
}

/// Resolves where a poller starts.
///
/// `StreamStart` and `StreamEnd` ignore the checkpoint. `LastCommittedMessage`
/// resumes just after `checkpoint`, clamped into the retained range, and
/// falls back to the end of the stream when there is no checkpoint.
#[must_use]
pub fn resolve_start_position(
    partition: &PartitionKey,
    mode: ConsumeMode,
    checkpoint: Option<Offset>,
    watermarks: Watermarks,
) -> StartPosition {
    match (mode, checkpoint) {
        (ConsumeMode::StreamStart, _) => StartPosition {
            offset: watermarks.low,
            reason: StartReason::StreamStart,
        },
        (ConsumeMode::StreamEnd, _) | (ConsumeMode::LastCommittedMessage, None) => StartPosition {
            offset: watermarks.high,
            reason: StartReason::StreamEnd,
        },
        (ConsumeMode::LastCommittedMessage, Some(committed)) => {
            let resume = committed.next();
            if resume < watermarks.low {
                warn!(
                    partition = %partition,
                    checkpoint = committed.get(),
                    low_watermark = watermarks.low.get(),
                    "Checkpoint older than retained log, resuming at low watermark"
                );
                StartPosition {
                    offset: watermarks.low,
                    reason: StartReason::CheckpointExpired,
                }
            } else {
                StartPosition {
                    offset: resume.min(watermarks.high),
                    reason: StartReason::Checkpoint,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamq_core::PartitionId;

    fn key() -> PartitionKey {
        PartitionKey::new("orders", PartitionId::new(0))
    }

    fn marks(low: u64, high: u64) -> Watermarks {
        Watermarks::new(Offset::new(low), Offset::new(high))
    }

    #[test]
    fn test_modes() {
        let checkpoint = Some(Offset::new(49));
        let start = resolve_start_position(&key(), ConsumeMode::StreamStart, checkpoint, marks(10, 100));
        assert_eq!(start.offset, Offset::new(10));

        let start = resolve_start_position(&key(), ConsumeMode::StreamEnd, checkpoint, marks(10, 100));
        assert_eq!(start.offset, Offset::new(100));

        let start = resolve_start_position(
            &key(),
            ConsumeMode::LastCommittedMessage,
            checkpoint,
            marks(10, 100),
        );
        assert_eq!(
            start,
            StartPosition {
                offset: Offset::new(50),
                reason: StartReason::Checkpoint,
            }
        );
    }

    #[test]
    fn test_no_checkpoint_falls_back_to_end() {
        let start =
            resolve_start_position(&key(), ConsumeMode::LastCommittedMessage, None, marks(0, 42));
        assert_eq!(start.offset, Offset::new(42));
        assert_eq!(start.reason, StartReason::StreamEnd);
    }

    #[test]
    fn test_expired_checkpoint_resumes_at_low_watermark() {
        let start = resolve_start_position(
            &key(),
            ConsumeMode::LastCommittedMessage,
            Some(Offset::new(3)),
            marks(20, 40),
        );
        assert_eq!(start.offset, Offset::new(20));
        assert_eq!(start.reason, StartReason::CheckpointExpired);
    }

    #[test]
    fn test_checkpoint_at_end_of_log() {
        let start = resolve_start_position(
            &key(),
            ConsumeMode::LastCommittedMessage,
            Some(Offset::new(39)),
            marks(0, 40),
        );
        assert_eq!(start.offset, Offset::new(40));
    }
}
