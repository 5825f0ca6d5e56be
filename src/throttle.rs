//! Process-wide throttling gate.
//!
//! When any call observes a 429 the server is throttling the whole tenant, not
//! one request. [`GlobalThrottle`] records the advertised resume time and every
//! call waits at the gate before its next physical attempt, so a burst of
//! concurrent retries cannot immediately re-trigger the limit.

use async_trait::async_trait;
use http::HeaderMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::time::Instant;

/// A gate that callers pass through before each physical attempt.
///
/// The default implementation is [`GlobalThrottle::shared`]; tests and
/// embedders can inject their own through
/// [`ClientBuilder::throttle`](crate::ClientBuilder::throttle).
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Records that the server asked for all traffic to pause for `retry_after`.
    fn mark_throttled(&self, retry_after: Duration);

    /// Waits until the gate is open. Returns immediately when not throttled.
    async fn wait_if_blocked(&self);
}

#[derive(Debug, Default)]
struct ThrottleState {
    blocked: bool,
    resume_at: Option<Instant>,
}

/// Shared throttle gate guarded by a single mutex.
///
/// An atomic flag mirrors `blocked` so the common, unthrottled path never
/// touches the mutex. Waiters park on a [`Notify`] combined with a timed sleep
/// until the deadline, so they release themselves even if nobody wakes them.
///
/// While blocked, the deadline only ever moves later: a second `Retry-After`
/// that is shorter than the one in force does not cut the pause short.
///
/// # Examples
///
/// ```
/// use catalog_client::throttle::{GlobalThrottle, Throttle};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let throttle = GlobalThrottle::new();
/// throttle.mark_throttled(Duration::from_millis(10));
/// assert!(throttle.is_blocked());
///
/// throttle.wait_if_blocked().await;
/// assert!(!throttle.is_blocked());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct GlobalThrottle {
    blocked: AtomicBool,
    state: Mutex<ThrottleState>,
    wake: Notify,
}

static SHARED: OnceLock<Arc<GlobalThrottle>> = OnceLock::new();

/// Stand-in deadline for pauses too long to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

impl GlobalThrottle {
    /// Creates a new, open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide gate used by every client unless another is injected.
    pub fn shared() -> Arc<GlobalThrottle> {
        SHARED.get_or_init(|| Arc::new(GlobalThrottle::new())).clone()
    }

    /// Returns `true` while callers are being held back.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Time left until the gate reopens, if it is currently closed.
    pub fn remaining(&self) -> Option<Duration> {
        if !self.is_blocked() {
            return None;
        }
        let state = self.lock();
        state
            .resume_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Throttle for GlobalThrottle {
    fn mark_throttled(&self, retry_after: Duration) {
        let now = Instant::now();
        let candidate = now
            .checked_add(retry_after)
            .unwrap_or_else(|| now + FAR_FUTURE);
        {
            let mut state = self.lock();
            let resume_at = match state.resume_at {
                Some(current) if state.blocked && current > candidate => current,
                _ => candidate,
            };
            state.blocked = true;
            state.resume_at = Some(resume_at);
            self.blocked.store(true, Ordering::Release);
        }

        tracing::warn!(
            retry_after_ms = retry_after.as_millis(),
            "Server throttled requests - pausing all callers"
        );

        // Waiters recompute their deadline.
        self.wake.notify_waiters();
    }

    async fn wait_if_blocked(&self) {
        if !self.is_blocked() {
            return;
        }

        loop {
            // Register interest before inspecting the state so a wake-up sent
            // between the check and the wait is not lost.
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                match state.resume_at {
                    Some(at) if state.blocked && Instant::now() < at => at,
                    _ => {
                        if state.blocked {
                            state.blocked = false;
                            state.resume_at = None;
                            self.blocked.store(false, Ordering::Release);
                            self.wake.notify_waiters();
                            tracing::debug!("Throttle deadline passed - resuming requests");
                        }
                        return;
                    }
                }
            };

            tokio::select! {
                _ = &mut woken => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

/// Parses the `Retry-After` header.
///
/// Accepts delay-seconds (the form the catalog service sends) as well as an
/// HTTP date.
///
/// # Examples
///
/// ```
/// use catalog_client::throttle::retry_after;
/// use http::HeaderMap;
/// use std::time::Duration;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("retry-after", "2".parse().unwrap());
/// assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
/// ```
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[tokio::test(start_paused = true)]
    async fn test_open_gate_does_not_block_or_mutate() {
        let throttle = GlobalThrottle::new();
        let start = Instant::now();

        throttle.wait_if_blocked().await;
        throttle.wait_if_blocked().await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!throttle.is_blocked());
        assert!(throttle.lock().resume_at.is_none());
        assert_eq!(throttle.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_deadline_then_reopens() {
        let throttle = GlobalThrottle::new();
        let start = Instant::now();

        throttle.mark_throttled(Duration::from_secs(2));
        assert!(throttle.is_blocked());
        assert_eq!(throttle.remaining(), Some(Duration::from_secs(2)));

        throttle.wait_if_blocked().await;

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(!throttle.is_blocked());
        assert_eq!(throttle.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_waiters_released_at_same_deadline() {
        let throttle = Arc::new(GlobalThrottle::new());
        let start = Instant::now();
        throttle.mark_throttled(Duration::from_secs(3));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move {
                    throttle.wait_if_blocked().await;
                    start.elapsed()
                })
            })
            .collect();

        for handle in handles {
            let waited = handle.await.unwrap();
            assert!(waited >= Duration::from_secs(3), "waited {waited:?}");
            assert!(waited < Duration::from_secs(4), "waited {waited:?}");
        }
        assert!(!throttle.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_retry_after_does_not_shrink_deadline() {
        let throttle = GlobalThrottle::new();
        let start = Instant::now();

        throttle.mark_throttled(Duration::from_secs(5));
        throttle.mark_throttled(Duration::from_secs(1));
        throttle.wait_if_blocked().await;

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_retry_after_extends_in_progress_wait() {
        let throttle = Arc::new(GlobalThrottle::new());
        let start = Instant::now();
        throttle.mark_throttled(Duration::from_secs(1));

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                throttle.wait_if_blocked().await;
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        throttle.mark_throttled(Duration::from_secs(2));

        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_millis(2500), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_throttle_can_be_set_again() {
        let throttle = GlobalThrottle::new();
        throttle.mark_throttled(Duration::from_secs(1));
        throttle.wait_if_blocked().await;

        let start = Instant::now();
        throttle.mark_throttled(Duration::from_millis(200));
        throttle.wait_if_blocked().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_blocks_without_overflow() {
        let throttle = GlobalThrottle::new();
        throttle.mark_throttled(Duration::from_secs(u64::MAX));

        assert!(throttle.is_blocked());
        let remaining = throttle.remaining().unwrap();
        assert!(remaining >= Duration::from_secs(86400 * 365), "remaining {remaining:?}");

        // A later, ordinary Retry-After neither panics nor shortens the pause.
        throttle.mark_throttled(Duration::from_secs(1));
        let waited = tokio::time::timeout(Duration::from_secs(60), throttle.wait_if_blocked()).await;
        assert!(waited.is_err());
        assert!(throttle.is_blocked());
    }

    #[test]
    fn test_shared_is_a_singleton() {
        assert!(Arc::ptr_eq(&GlobalThrottle::shared(), &GlobalThrottle::shared()));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let mut headers = HeaderMap::new();
        let at = SystemTime::now() + Duration::from_secs(120);
        headers.insert(
            "retry-after",
            HeaderValue::from_str(&httpdate::fmt_http_date(at)).unwrap(),
        );

        let delay = retry_after(&headers).unwrap();
        assert!(delay > Duration::from_secs(100) && delay <= Duration::from_secs(120));
    }

    #[test]
    fn test_missing_or_garbage_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }
}
