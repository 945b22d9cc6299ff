// ── Vidgraph Engine: HTTP Retry, Rate Gating & Cancellation ────────────────
//
// Shared plumbing used by the store adapters and the LLM client.
//
// Features:
//   • Exponential backoff with ±25% jitter (base 1s, max 30s, 3 retries)
//   • Retry on 429 (rate limit), 500, 502, 503, 504, 529
//   • Respects `Retry-After` header
//   • RateGate spacing consecutive LLM calls by a configured minimum interval
//   • Cooperative cancellation token checked between batches and iterations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

use crate::atoms::error::{EngineError, EngineResult};

// ── Constants ──────────────────────────────────────────────────────────────

/// Default maximum number of retry attempts per request.
pub const MAX_RETRIES: u32 = 3;

/// Initial retry delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum retry delay cap in milliseconds (30 seconds).
const MAX_RETRY_DELAY_MS: u64 = 30_000;

// ── Retryable status detection ─────────────────────────────────────────────

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

// ── Backoff delay ──────────────────────────────────────────────────────────

/// Sleep with exponential backoff + ±25% jitter.
/// Respects Retry-After if the server sent one.
/// Returns the actual delay duration for logging.
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt);
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = if let Some(secs) = retry_after_secs {
        // Use server-specified delay, but cap at 60s and floor at our computed backoff
        (secs.min(60) * 1000).max(capped_ms)
    } else {
        capped_ms
    };
    let jittered = apply_jitter(delay_ms);
    let delay = Duration::from_millis(jittered);
    tokio::time::sleep(delay).await;
    delay
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = (rand_jitter() % (2 * jitter_range + 1)) - jitter_range;
    let result = base_ms as i64 + offset;
    result.max(100) as u64
}

/// Simple jitter source using system clock nanos (no extra crate needed).
fn rand_jitter() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as i64
}

// ── Retry-After header parsing ─────────────────────────────────────────────

/// Parse Retry-After header value (integer seconds only).
/// HTTP-date format is not implemented — falls back to computed backoff.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

// ── Rate Gate ──────────────────────────────────────────────────────────────

/// Spaces consecutive calls by at least `min_interval`. Used to keep the
/// external LLM request rate under the endpoint's limits during Pass 1.
pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Construct from a seconds value; non-positive values disable gating.
    pub fn from_secs_f64(secs: f64) -> Self {
        let interval = if secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        };
        Self::new(interval)
    }

    /// Wait until the minimum interval since the previous call has elapsed,
    /// then claim the slot.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let wait_for = {
            let mut last = self.last_call.lock();
            let now = Instant::now();
            let wait = match *last {
                Some(prev) => {
                    let elapsed = now.duration_since(prev);
                    self.min_interval.checked_sub(elapsed).unwrap_or(Duration::ZERO)
                }
                None => Duration::ZERO,
            };
            *last = Some(now + wait);
            wait
        };
        if !wait_for.is_zero() {
            tokio::time::sleep(wait_for).await;
        }
    }
}

// ── Cancellation ───────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared across pipeline stages.
/// Stages call `checkpoint()` between batches and group iterations; a
/// cancelled pipeline leaves already-persisted artifacts in place.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` naming the interrupted stage when the token
    /// has been tripped.
    pub fn checkpoint(&self, stage: &str) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled(stage.to_string()))
        } else {
            Ok(())
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(529));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after(" 30 "), Some(30));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2025 07:28:00 GMT"), None);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.checkpoint("grouping").is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.checkpoint("grouping"),
            Err(EngineError::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_gate_spaces_calls() {
        let gate = RateGate::from_secs_f64(0.05);
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;
        gate.wait().await;
        // Two enforced gaps of ~50ms each
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_rate_gate_disabled() {
        let gate = RateGate::from_secs_f64(0.0);
        let start = Instant::now();
        for _ in 0..10 {
            gate.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
