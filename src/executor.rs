//! The retry loop.
//!
//! [`RetryExecutor`] drives one logical call through as many physical attempts
//! as it needs. Each attempt passes the throttle gate, goes through the
//! [`Transport`] once and is then [classified](classify):
//!
//! | Outcome                      | Decision                                   |
//! |------------------------------|--------------------------------------------|
//! | connection failure / timeout | retry                                      |
//! | 302                          | retry the same request, do not follow      |
//! | 401                          | refresh credentials once if a user is set  |
//! | 403                          | retry (permissions propagate lazily)       |
//! | 429                          | throttle every caller, then retry          |
//! | 5xx                          | retry                                      |
//! | 2xx                          | success                                    |
//! | anything else                | fail                                       |
//!
//! A retry is only taken while the budget lasts. Once `max_retries` retries
//! have been spent, the last outcome becomes terminal.

use crate::backoff::BackoffPolicy;
use crate::credentials::{Credentials, Impersonator};
use crate::error::{Error, Result, IMPERSONATION_FAILED};
use crate::request::LogicalRequest;
use crate::throttle::{self, Throttle};
use crate::transport::{RawResponse, Transport, TransportError};
use http::StatusCode;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Upper bound on a server-requested pause unless configured otherwise.
pub const DEFAULT_MAX_THROTTLE_WAIT: Duration = Duration::from_secs(300);

/// What to do after one physical attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The attempt succeeded.
    Success,
    /// The failure is transient; try again.
    ///
    /// `retry_after` is set when the server asked every caller to pause.
    Retry {
        /// Pause requested by the server.
        retry_after: Option<Duration>,
    },
    /// The credentials were rejected; mint new ones and try again.
    RefreshCredentials,
    /// The outcome is terminal.
    Fail,
}

/// Classifies the outcome of one physical attempt.
///
/// `can_refresh` tells whether a 401 may be answered with a credential refresh.
/// Server-requested pauses are capped at `max_throttle_wait`.
pub fn classify(
    outcome: &std::result::Result<RawResponse, TransportError>,
    can_refresh: bool,
    max_throttle_wait: Duration,
) -> Decision {
    let response = match outcome {
        Ok(response) => response,
        Err(error) if error.is_transient() => return Decision::Retry { retry_after: None },
        Err(_) => return Decision::Fail,
    };

    match response.status {
        status if status.is_success() => Decision::Success,
        StatusCode::FOUND | StatusCode::FORBIDDEN => Decision::Retry { retry_after: None },
        StatusCode::UNAUTHORIZED if can_refresh => Decision::RefreshCredentials,
        StatusCode::UNAUTHORIZED => Decision::Fail,
        StatusCode::TOO_MANY_REQUESTS => Decision::Retry {
            retry_after: throttle::retry_after(&response.headers)
                .map(|delay| delay.min(max_throttle_wait)),
        },
        status if status.is_server_error() => Decision::Retry { retry_after: None },
        _ => Decision::Fail,
    }
}

/// A terminal HTTP response and the retries it took to get it.
///
/// The status may be anything; the caller translates it.
#[derive(Debug)]
pub struct Completed {
    /// The last response received.
    pub response: RawResponse,
    /// Retries performed before this response.
    pub retries: usize,
}

#[derive(Debug, Default)]
struct RetryState {
    retries: usize,
    refreshed: bool,
}

struct Refresh<'a> {
    impersonator: &'a dyn Impersonator,
    user_id: &'a str,
    credentials: &'a RwLock<Credentials>,
}

/// Runs logical calls to completion.
pub struct RetryExecutor<'a> {
    transport: &'a dyn Transport,
    throttle: &'a dyn Throttle,
    backoff: BackoffPolicy,
    sleep: bool,
    max_throttle_wait: Duration,
    refresh: Option<Refresh<'a>>,
}

impl<'a> RetryExecutor<'a> {
    /// Creates an executor sending through `transport` and gated by `throttle`.
    pub fn new(transport: &'a dyn Transport, throttle: &'a dyn Throttle) -> Self {
        Self {
            transport,
            throttle,
            backoff: BackoffPolicy::default(),
            sleep: true,
            max_throttle_wait: DEFAULT_MAX_THROTTLE_WAIT,
            refresh: None,
        }
    }

    /// Sets the backoff between retries.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables or disables sleeping between retries.
    ///
    /// With sleeping disabled every wait is zero; the throttle gate still applies.
    pub fn sleep(mut self, sleep: bool) -> Self {
        self.sleep = sleep;
        self
    }

    /// Caps server-requested pauses.
    pub fn max_throttle_wait(mut self, max: Duration) -> Self {
        self.max_throttle_wait = max;
        self
    }

    /// Answers a 401 by impersonating `user_id` and storing the new token in `credentials`.
    pub fn refresh_with(
        mut self,
        impersonator: &'a dyn Impersonator,
        user_id: &'a str,
        credentials: &'a RwLock<Credentials>,
    ) -> Self {
        self.refresh = Some(Refresh {
            impersonator,
            user_id,
            credentials,
        });
        self
    }

    /// Sends `request` until it reaches a terminal outcome.
    ///
    /// Returns the terminal response whatever its status; transport failures
    /// that outlast the budget and failed credential refreshes are returned as
    /// errors. Dropping the returned future abandons the call, including
    /// any pending sleep.
    pub async fn execute(&self, request: &mut LogicalRequest) -> Result<Completed> {
        let max_retries = request.options().retry_budget();
        let quiet = request.options().logging_skipped();
        let mut state = RetryState::default();

        loop {
            self.throttle.wait_if_blocked().await;

            if !quiet {
                tracing::debug!(
                    method = %request.method(),
                    url = %request.url(),
                    attempt = state.retries + 1,
                    request_id = %request.request_id(),
                    "Executing HTTP request"
                );
            }

            let outcome = self.transport.send(request).await;
            let can_refresh = self.refresh.is_some() && !state.refreshed;
            let decision = classify(&outcome, can_refresh, self.max_throttle_wait);

            let retry_after = match decision {
                Decision::Success | Decision::Fail => return finish(outcome, state.retries),
                Decision::Retry { retry_after } => {
                    // Other callers must pause even if this one is about to give up.
                    if let Some(delay) = retry_after {
                        self.throttle.mark_throttled(delay);
                    }
                    retry_after
                }
                Decision::RefreshCredentials => None,
            };

            if state.retries >= max_retries {
                tracing::warn!(
                    retries = state.retries,
                    request_id = %request.request_id(),
                    last_outcome = %describe(&outcome),
                    "Retry budget exhausted"
                );
                return finish(outcome, state.retries);
            }

            if decision == Decision::RefreshCredentials {
                state.refreshed = true;
                self.refresh_credentials(request).await.map_err(|mut e| {
                    e.set_retries(state.retries);
                    e
                })?;
            }

            let delay = self.delay(state.retries + 1, retry_after);
            if !quiet {
                tracing::info!(
                    delay_ms = delay.as_millis(),
                    attempt = state.retries + 1,
                    last_outcome = %describe(&outcome),
                    request_id = %request.request_id(),
                    "Retrying request after delay"
                );
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            state.retries += 1;
        }
    }

    fn delay(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        if !self.sleep {
            return Duration::ZERO;
        }
        let backoff = self.backoff.delay(attempt);
        retry_after.map_or(backoff, |pause| pause.max(backoff))
    }

    async fn refresh_credentials(&self, request: &mut LogicalRequest) -> Result<()> {
        let Some(refresh) = &self.refresh else {
            return Err(Error::credentials(
                IMPERSONATION_FAILED,
                "No identity available to refresh credentials",
            ));
        };

        tracing::info!(
            user_id = %refresh.user_id,
            request_id = %request.request_id(),
            "Credentials rejected - impersonating user"
        );

        let token = refresh
            .impersonator
            .impersonate(refresh.user_id)
            .await
            .map_err(|e| match e {
                Error::Authentication(_) => e,
                other => Error::credentials(
                    IMPERSONATION_FAILED,
                    format!("Unable to impersonate {}: {}", refresh.user_id, other),
                ),
            })?;

        let credentials = Credentials::bearer(token);
        request.rebuild_headers(&credentials)?;
        *refresh
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
        Ok(())
    }
}

fn finish(
    outcome: std::result::Result<RawResponse, TransportError>,
    retries: usize,
) -> Result<Completed> {
    match outcome {
        Ok(response) => Ok(Completed { response, retries }),
        Err(TransportError::Config(message)) => Err(Error::ConfigurationError(message)),
        Err(error) => Err(Error::Connection {
            message: error.to_string(),
            retries,
            source: Some(Box::new(error)),
        }),
    }
}

fn describe(outcome: &std::result::Result<RawResponse, TransportError>) -> String {
    match outcome {
        Ok(response) => format!("HTTP {}", response.status.as_u16()),
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use crate::throttle::GlobalThrottle;
    use async_trait::async_trait;
    use http::{HeaderMap, HeaderValue, Method};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use url::Url;

    type Outcome = std::result::Result<RawResponse, TransportError>;

    /// Replays a fixed list of outcomes and records the headers of each attempt.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Outcome>>,
        seen: Mutex<Vec<HeaderMap>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Outcome>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn sends(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn authorization(&self, attempt: usize) -> String {
            self.seen.lock().unwrap()[attempt]["authorization"]
                .to_str()
                .unwrap()
                .to_string()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &LogicalRequest) -> Outcome {
            self.seen.lock().unwrap().push(request.headers().clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".into())))
        }
    }

    /// Fails every attempt with a timeout.
    #[derive(Default)]
    struct DeadTransport {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl Transport for DeadTransport {
        async fn send(&self, _request: &LogicalRequest) -> Outcome {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Timeout)
        }
    }

    #[derive(Default)]
    struct RecordingThrottle {
        marks: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Throttle for RecordingThrottle {
        fn mark_throttled(&self, retry_after: Duration) {
            self.marks.lock().unwrap().push(retry_after);
        }

        async fn wait_if_blocked(&self) {}
    }

    struct FixedImpersonator {
        token: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedImpersonator {
        fn ok(token: &'static str) -> Self {
            Self {
                token: Some(token),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                token: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Impersonator for FixedImpersonator {
        async fn impersonate(&self, _user_id: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token
                .map(str::to_string)
                .ok_or_else(|| Error::ConfigurationError("token endpoint down".into()))
        }
    }

    fn status(code: u16) -> Outcome {
        Ok(RawResponse::buffered(
            StatusCode::from_u16(code).unwrap(),
            HeaderMap::new(),
            "{}",
        ))
    }

    fn throttled(seconds: &'static str) -> Outcome {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static(seconds));
        Ok(RawResponse::buffered(
            StatusCode::TOO_MANY_REQUESTS,
            headers,
            "slow down",
        ))
    }

    fn request(max_retries: usize) -> LogicalRequest {
        RequestBuilder::new(
            Method::GET,
            Url::parse("https://catalog.example.com/api/meta/types").unwrap(),
        )
        .options(crate::RequestOptions::new().max_retries(max_retries))
        .build(&Credentials::bearer("expired"))
        .unwrap()
    }

    #[test]
    fn test_classify_table() {
        let wait = DEFAULT_MAX_THROTTLE_WAIT;
        let retry = Decision::Retry { retry_after: None };

        for code in [302, 403, 500, 502, 503, 504] {
            assert_eq!(classify(&status(code), true, wait), retry, "status {code}");
        }
        for code in [200, 201, 204] {
            assert_eq!(classify(&status(code), true, wait), Decision::Success);
        }
        for code in [301, 400, 404, 409, 418, 423] {
            assert_eq!(classify(&status(code), true, wait), Decision::Fail, "status {code}");
        }
        assert_eq!(
            classify(&status(401), true, wait),
            Decision::RefreshCredentials
        );
        assert_eq!(classify(&status(401), false, wait), Decision::Fail);
        assert_eq!(classify(&Err(TransportError::Timeout), false, wait), retry);
        assert_eq!(
            classify(&Err(TransportError::Body("no stream".into())), false, wait),
            retry
        );
        assert_eq!(
            classify(&Err(TransportError::Config("bad proxy".into())), false, wait),
            Decision::Fail
        );
    }

    #[test]
    fn test_classify_429_uses_capped_retry_after() {
        assert_eq!(
            classify(&throttled("2"), false, DEFAULT_MAX_THROTTLE_WAIT),
            Decision::Retry {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert_eq!(
            classify(&throttled("3600"), false, Duration::from_secs(60)),
            Decision::Retry {
                retry_after: Some(Duration::from_secs(60))
            }
        );
        assert_eq!(
            classify(&status(429), false, DEFAULT_MAX_THROTTLE_WAIT),
            Decision::Retry { retry_after: None }
        );
    }

    #[tokio::test]
    async fn test_dead_connection_makes_budget_plus_one_attempts() {
        let transport = DeadTransport::default();
        let throttle = GlobalThrottle::new();
        let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

        let err = executor.execute(&mut request(4)).await.unwrap_err();

        assert_eq!(transport.sends.load(Ordering::SeqCst), 5);
        assert!(matches!(err, Error::Connection { retries: 4, .. }));
    }

    #[tokio::test]
    async fn test_retryable_statuses_retry_at_least_once() {
        for code in [302, 403, 429, 500, 502, 503] {
            let transport = ScriptedTransport::new(vec![status(code), status(code)]);
            let throttle = GlobalThrottle::new();
            let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

            let completed = executor.execute(&mut request(1)).await.unwrap();

            assert_eq!(transport.sends(), 2, "status {code}");
            assert_eq!(completed.retries, 1);
            assert_eq!(completed.response.status.as_u16(), code);
        }
    }

    #[tokio::test]
    async fn test_terminal_statuses_never_retry() {
        for code in [200, 400, 404, 409, 423] {
            let transport = ScriptedTransport::new(vec![status(code), status(200)]);
            let throttle = GlobalThrottle::new();
            let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

            let completed = executor.execute(&mut request(3)).await.unwrap();

            assert_eq!(transport.sends(), 1, "status {code}");
            assert_eq!(completed.retries, 0);
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            status(503),
            status(200),
        ]);
        let throttle = GlobalThrottle::new();
        let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

        let completed = executor.execute(&mut request(3)).await.unwrap();

        assert_eq!(completed.response.status, StatusCode::OK);
        assert_eq!(completed.retries, 2);
    }

    #[tokio::test]
    async fn test_zero_budget_returns_first_outcome() {
        let transport = ScriptedTransport::new(vec![status(500), status(200)]);
        let throttle = GlobalThrottle::new();
        let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

        let completed = executor.execute(&mut request(0)).await.unwrap();

        assert_eq!(transport.sends(), 1);
        assert_eq!(completed.response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_401_refresh_rebuilds_headers_and_retries_once() {
        let transport = ScriptedTransport::new(vec![status(401), status(200)]);
        let throttle = GlobalThrottle::new();
        let impersonator = FixedImpersonator::ok("fresh");
        let credentials = RwLock::new(Credentials::bearer("expired"));
        let executor = RetryExecutor::new(&transport, &throttle)
            .sleep(false)
            .refresh_with(&impersonator, "jsmith", &credentials);

        let mut request = request(3);
        let request_id = request.request_id().to_string();
        let completed = executor.execute(&mut request).await.unwrap();

        assert_eq!(completed.response.status, StatusCode::OK);
        assert_eq!(completed.retries, 1);
        assert_eq!(transport.sends(), 2);
        assert_eq!(transport.authorization(0), "Bearer expired");
        assert_eq!(transport.authorization(1), "Bearer fresh");
        assert_eq!(request.request_id(), request_id);
        assert_eq!(*credentials.read().unwrap(), Credentials::bearer("fresh"));
        assert_eq!(impersonator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_401_without_identity_fails_immediately() {
        let transport = ScriptedTransport::new(vec![status(401), status(200)]);
        let throttle = GlobalThrottle::new();
        let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

        let completed = executor.execute(&mut request(3)).await.unwrap();

        assert_eq!(transport.sends(), 1);
        assert_eq!(completed.response.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_second_401_after_refresh_is_terminal() {
        let transport = ScriptedTransport::new(vec![status(401), status(401), status(200)]);
        let throttle = GlobalThrottle::new();
        let impersonator = FixedImpersonator::ok("still-bad");
        let credentials = RwLock::new(Credentials::bearer("expired"));
        let executor = RetryExecutor::new(&transport, &throttle)
            .sleep(false)
            .refresh_with(&impersonator, "jsmith", &credentials);

        let completed = executor.execute(&mut request(5)).await.unwrap();

        assert_eq!(transport.sends(), 2);
        assert_eq!(completed.response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(impersonator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_authentication_error() {
        let transport = ScriptedTransport::new(vec![status(401), status(200)]);
        let throttle = GlobalThrottle::new();
        let impersonator = FixedImpersonator::failing();
        let credentials = RwLock::new(Credentials::bearer("expired"));
        let executor = RetryExecutor::new(&transport, &throttle)
            .sleep(false)
            .refresh_with(&impersonator, "jsmith", &credentials);

        let err = executor.execute(&mut request(3)).await.unwrap_err();

        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(err.server_code(), Some(IMPERSONATION_FAILED));
        assert_eq!(transport.sends(), 1);
        assert_eq!(*credentials.read().unwrap(), Credentials::bearer("expired"));
    }

    #[tokio::test]
    async fn test_429_marks_throttle_even_when_budget_exhausted() {
        let transport = ScriptedTransport::new(vec![throttled("7")]);
        let throttle = RecordingThrottle::default();
        let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

        let completed = executor.execute(&mut request(0)).await.unwrap();

        assert_eq!(completed.response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(*throttle.marks.lock().unwrap(), vec![Duration::from_secs(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_waits_for_retry_after() {
        let transport = ScriptedTransport::new(vec![throttled("2"), status(200)]);
        let throttle = RecordingThrottle::default();
        let executor = RetryExecutor::new(&transport, &throttle).backoff(BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(20),
        ));

        let start = Instant::now();
        let completed = executor.execute(&mut request(3)).await.unwrap();

        assert_eq!(completed.response.status, StatusCode::OK);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let transport = ScriptedTransport::new(vec![status(500), status(500), status(200)]);
        let throttle = GlobalThrottle::new();
        let executor = RetryExecutor::new(&transport, &throttle).backoff(BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
        ));

        let start = Instant::now();
        executor.execute(&mut request(3)).await.unwrap();

        // attempt 1: >= 100ms, attempt 2: >= 150ms (200ms jittered)
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() <= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_mode_never_waits() {
        let transport = ScriptedTransport::new(vec![status(500), status(503), status(200)]);
        let throttle = GlobalThrottle::new();
        let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

        let start = Instant::now();
        executor.execute(&mut request(3)).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_config_transport_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Config(
            "Invalid proxy".into(),
        ))]);
        let throttle = GlobalThrottle::new();
        let executor = RetryExecutor::new(&transport, &throttle).sleep(false);

        let err = executor.execute(&mut request(3)).await.unwrap_err();

        assert!(matches!(err, Error::ConfigurationError(_)));
        assert_eq!(transport.sends(), 1);
    }
}
