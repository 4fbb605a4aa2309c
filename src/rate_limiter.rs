//! Serializing rate limiter for outbound API calls.
//!
//! Every request the exporter makes (token, listing pages, conversation
//! details, threads, attachment downloads) is wrapped in
//! [`RateLimiter::schedule`]. The limiter guarantees that:
//!
//! - at most one scheduled task runs at a time,
//! - tasks start in submission (FIFO) order,
//! - each task starts at least `min_spacing` after the previous task *started*,
//!   no matter how long the previous task ran.
//!
//! This is a fixed spacing gate, not a token bucket: there is no burst capacity.
//! A server-mandated back-off (HTTP 429 with `Retry-After`) can push the next
//! start further out via [`RateLimiter::record_rate_limit`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use helpdesk_export::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(3100));
//!
//! // First call starts immediately, the second one 3.1s after the first started.
//! let a = limiter.schedule(|| async { 1 }).await;
//! let b = limiter.schedule(|| async { 2 }).await;
//! assert_eq!(a + b, 3);
//! # }
//! ```

use std::future::Future;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

/// Cumulative server back-off after which a warning is logged.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Fixed-spacing, single-worker rate limiter.
///
/// Share it behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum time between the starts of two consecutive tasks.
    min_spacing: Duration,

    /// Whether spacing is disabled (`--rate-limit 0`). Tasks are still serialized.
    disabled: bool,

    /// Start time of the most recent task. `None` until the first task runs.
    /// The guard is held for the whole task, which is what caps in-flight calls at one.
    /// Tokio's mutex queues waiters fairly, which gives FIFO start order.
    last_start: Mutex<Option<Instant>>,

    /// Earliest instant the server allows the next call (from Retry-After).
    /// Plain mutex: only touched in short, non-async critical sections, and may be
    /// updated from inside a running task while `last_start` is held.
    not_before: std::sync::Mutex<Option<Instant>>,

    /// Total server-mandated back-off recorded so far, in milliseconds.
    cumulative_backoff_ms: AtomicU64,

    /// Number of tasks started.
    started: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter that spaces task starts by `min_spacing`.
    ///
    /// A zero spacing behaves like [`RateLimiter::disabled`].
    #[must_use]
    #[instrument(skip_all, fields(spacing_ms = min_spacing.as_millis()))]
    pub fn new(min_spacing: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            min_spacing,
            disabled: min_spacing.is_zero(),
            last_start: Mutex::new(None),
            not_before: std::sync::Mutex::new(None),
            cumulative_backoff_ms: AtomicU64::new(0),
            started: AtomicU64::new(0),
        }
    }

    /// Creates a limiter that serializes tasks without spacing them.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether spacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured minimum spacing.
    #[must_use]
    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Returns how many tasks have been started so far.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Runs `task` once its slot comes up and returns its output.
    ///
    /// Waits until both the spacing since the previous start and any recorded
    /// server back-off have elapsed, then runs the task to completion while
    /// holding the gate. Errors carried in `T` pass through untouched; the
    /// limiter's timing state is updated before the task runs, so a failing
    /// task still counts as a start.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_start = self.last_start.lock().await;

        let spacing_ready = if self.disabled {
            None
        } else {
            last_start.map(|previous| previous + self.min_spacing)
        };
        let server_ready = *self
            .not_before
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ready_at = match (spacing_ready, server_ready) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if let Some(ready_at) = ready_at {
            let now = Instant::now();
            if ready_at > now {
                trace!(
                    delay_ms = (ready_at - now).as_millis(),
                    "waiting for rate limit slot"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last_start = Some(Instant::now());
        self.started.fetch_add(1, Ordering::SeqCst);

        task().await
    }

    /// Records a server-mandated back-off (from a Retry-After header).
    ///
    /// The next scheduled task will not start before `delay` from now, on top
    /// of the regular spacing.
    #[instrument(skip(self), fields(delay_ms = delay.as_millis()))]
    pub fn record_rate_limit(&self, delay: Duration) {
        let until = Instant::now() + delay;
        {
            let mut not_before = self
                .not_before
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *not_before = Some(not_before.map_or(until, |existing| existing.max(until)));
        }

        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        let previous_ms = self
            .cumulative_backoff_ms
            .fetch_add(delay_ms, Ordering::SeqCst);
        let cumulative = Duration::from_millis(previous_ms + delay_ms);

        debug!(
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
            && Duration::from_millis(previous_ms) < CUMULATIVE_DELAY_WARNING_THRESHOLD
        {
            warn!(
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - consider raising --rate-limit"
            );
        }
    }

    /// Returns the total server-mandated back-off recorded so far.
    #[must_use]
    pub fn cumulative_backoff(&self) -> Duration {
        Duration::from_millis(self.cumulative_backoff_ms.load(Ordering::SeqCst))
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use helpdesk_export::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                max_secs = MAX_RETRY_AFTER.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        // Date is in the past
        Err(_) => Some(Duration::ZERO),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use futures_util::future::join_all;

    use super::*;

    // ==================== Construction ====================

    #[test]
    fn test_rate_limiter_new_keeps_spacing() {
        let limiter = RateLimiter::new(Duration::from_millis(3100));
        assert_eq!(limiter.min_spacing(), Duration::from_millis(3100));
        assert!(!limiter.is_disabled());
    }

    #[test]
    fn test_rate_limiter_zero_spacing_is_disabled() {
        assert!(RateLimiter::new(Duration::ZERO).is_disabled());
        assert!(RateLimiter::disabled().is_disabled());
    }

    // ==================== Spacing ====================

    #[tokio::test]
    async fn test_first_call_no_delay() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.schedule(|| async {}).await;

        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(limiter.started(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_calls_are_spaced() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.schedule(|| async {}).await;
        limiter.schedule(|| async {}).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));

        limiter.schedule(|| async {}).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_window_of_calls_respects_min_spacing() {
        tokio::time::pause();
        let spacing = Duration::from_millis(3100);
        let limiter = RateLimiter::new(spacing);
        let mut starts = Vec::new();

        for _ in 0..6 {
            let at = limiter.schedule(|| async { Instant::now() }).await;
            starts.push(at);
        }

        for window in starts.windows(2) {
            assert!(window[1] - window[0] >= spacing);
        }
        assert!(starts[5] - starts[0] >= spacing * 5);
    }

    #[tokio::test]
    async fn test_spacing_measured_from_previous_start_not_end() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        // Task runs longer than the spacing.
        limiter
            .schedule(|| async { tokio::time::sleep(Duration::from_secs(2)).await })
            .await;
        let second_start = limiter.schedule(|| async { Instant::now() }).await;

        // No extra second of waiting after the long task.
        assert!(second_start - start >= Duration::from_secs(2));
        assert!(second_start - start < Duration::from_millis(2100));
    }

    #[tokio::test]
    async fn test_disabled_applies_no_delay() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.schedule(|| async {}).await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(limiter.started(), 3);
    }

    // ==================== Serialization ====================

    #[tokio::test]
    async fn test_at_most_one_task_in_flight_and_fifo_order() {
        tokio::time::pause();
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let calls = (0..5).map(|i| {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            let order = Arc::clone(&order);
            async move {
                limiter
                    .schedule(|| async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(now, Ordering::SeqCst);
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }
        });
        join_all(calls).await;

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_task_error_propagates_and_keeps_timing() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        let failed: Result<(), &str> = limiter.schedule(|| async { Err("boom") }).await;
        assert_eq!(failed, Err("boom"));

        let ok: Result<u8, &str> = limiter.schedule(|| async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    // ==================== Server back-off ====================

    #[tokio::test]
    async fn test_record_rate_limit_delays_next_call() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.schedule(|| async {}).await;
        limiter.record_rate_limit(Duration::from_secs(10));
        limiter.schedule(|| async {}).await;

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(limiter.cumulative_backoff(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_record_rate_limit_applies_to_disabled_limiter() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();
        let start = Instant::now();

        limiter.record_rate_limit(Duration::from_secs(5));
        limiter.schedule(|| async {}).await;

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_record_rate_limit_accumulates() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.record_rate_limit(Duration::from_secs(5));
        limiter.record_rate_limit(Duration::from_secs(10));
        assert_eq!(limiter.cumulative_backoff(), Duration::from_secs(15));
    }

    // ==================== parse_retry_after ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_rejects_negative_and_garbage() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("invalid"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let duration = parse_retry_after(&httpdate::fmt_http_date(future_time)).unwrap();
        assert!(duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65));
    }
}
