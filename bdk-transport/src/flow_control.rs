//! Flow-control primitives shared by command writes and bulk transfers
//!
//! ```text
//!      [radio layer]                    ← implements Transport (raw writes)
//!            |
//!   [write_with_retry / chunk_size]     ← retries, payload sizing
//!            |
//!   [ThrottleTable / AckWindow]         ← OTA backpressure
//!            |
//!  [transfer engine / Speaker facade]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::{limits, timing};
use crate::types::{TransferKind, WriteMode, WriteOutcome};
use crate::Transport;

// ============================================================================
// Chunk sizing
// ============================================================================

/// Largest chunk that fits the current link for the given transfer kind.
///
/// The negotiated size is floored at the BLE minimum, and the whole frame is
/// capped at the hard per-write ceiling regardless of what was negotiated.
pub fn chunk_size(kind: TransferKind, negotiated_payload: usize) -> usize {
    let link = negotiated_payload
        .max(limits::MIN_NEGOTIATED_PAYLOAD)
        .min(limits::MAX_WRITE_LEN);
    let overhead = kind.frame_overhead();
    link.saturating_sub(overhead)
        .clamp(1, limits::MAX_WRITE_LEN - overhead)
}

// ============================================================================
// Retry policy
// ============================================================================

/// Bounded retry with escalating backoff for rejected writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Attempts that use the short backoff
    pub short_attempts: u32,
    pub short_backoff_ms: u64,
    pub long_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: timing::WRITE_RETRIES,
            short_attempts: timing::RETRY_SHORT_ATTEMPTS,
            short_backoff_ms: timing::RETRY_SHORT_BACKOFF_MS,
            long_backoff_ms: timing::RETRY_LONG_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (1-based)
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        if failed_attempt <= self.short_attempts {
            Duration::from_millis(self.short_backoff_ms)
        } else {
            Duration::from_millis(self.long_backoff_ms)
        }
    }
}

/// Write a frame, retrying synchronous rejections.
///
/// `sleep` performs each backoff and returns `false` to abandon the write
/// (e.g., the transfer was cancelled while backing off). Returns the attempt
/// number that was accepted.
pub fn write_with_retry(
    transport: &dyn Transport,
    frame: &[u8],
    mode: WriteMode,
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration) -> bool,
) -> Result<u32, TransportError> {
    let max = transport
        .negotiated_payload_size()
        .max(limits::MIN_NEGOTIATED_PAYLOAD)
        .min(limits::MAX_WRITE_LEN);
    if frame.len() > max {
        return Err(TransportError::PayloadTooLarge {
            len: frame.len(),
            max,
        });
    }

    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if !transport.is_connected() {
            return Err(TransportError::Disconnected);
        }
        match transport.write(frame, mode) {
            WriteOutcome::Queued => {
                if attempt > 1 {
                    debug!("Write of {} bytes accepted on attempt {}", frame.len(), attempt);
                }
                return Ok(attempt);
            }
            WriteOutcome::Rejected => {
                if attempt == attempts {
                    break;
                }
                let delay = policy.backoff(attempt);
                warn!(
                    "Write rejected (attempt {}/{}), retrying in {:?}",
                    attempt, attempts, delay
                );
                if !sleep(delay) {
                    return Err(TransportError::Interrupted);
                }
            }
        }
    }
    Err(TransportError::WriteRejected { attempts })
}

// ============================================================================
// OTA backpressure
// ============================================================================

/// One throttle step: once the sender is more than `chunks_ahead` chunks ahead
/// of the device, wait `delay_ms` after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleTier {
    pub chunks_ahead: u32,
    pub delay_ms: u64,
}

/// Inter-chunk delay as a function of how far the sender is ahead of the
/// device's flash writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleTable {
    /// Delay applied when the gap is below every tier
    pub base_delay_ms: u64,
    /// Tiers in ascending `chunks_ahead` order
    pub tiers: Vec<ThrottleTier>,
}

impl Default for ThrottleTable {
    fn default() -> Self {
        Self {
            base_delay_ms: timing::OTA_BASE_DELAY_MS,
            tiers: vec![
                ThrottleTier {
                    chunks_ahead: 32,
                    delay_ms: 10,
                },
                ThrottleTier {
                    chunks_ahead: 64,
                    delay_ms: 20,
                },
                ThrottleTier {
                    chunks_ahead: 128,
                    delay_ms: 40,
                },
            ],
        }
    }
}

impl ThrottleTable {
    /// Delay after a chunk given bytes sent, bytes the device has consumed,
    /// and the current chunk size
    pub fn delay_for(&self, sent: usize, consumed: usize, chunk_size: usize) -> Duration {
        let gap = sent.saturating_sub(consumed);
        let chunk_size = chunk_size.max(1);
        let delay = self
            .tiers
            .iter()
            .filter(|t| gap > t.chunks_ahead as usize * chunk_size)
            .map(|t| t.delay_ms)
            .max()
            .unwrap_or(self.base_delay_ms);
        Duration::from_millis(delay.max(self.base_delay_ms))
    }

    /// Largest delay this table can produce
    pub fn max_delay(&self) -> Duration {
        let max = self
            .tiers
            .iter()
            .map(|t| t.delay_ms)
            .fold(self.base_delay_ms, u64::max);
        Duration::from_millis(max)
    }
}

/// Which DATA frames are escalated to acknowledged writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckWindow {
    every: u32,
}

impl AckWindow {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
        }
    }

    /// Write mode for the chunk with the given 1-based index. The final chunk
    /// is always acknowledged so the link is drained before END.
    pub fn mode_for(&self, chunk_number: u32, last: bool) -> WriteMode {
        if last || chunk_number % self.every == 0 {
            WriteMode::Acknowledged
        } else {
            WriteMode::Unacknowledged
        }
    }
}

impl Default for AckWindow {
    fn default() -> Self {
        Self::new(timing::OTA_ACK_EVERY)
    }
}
