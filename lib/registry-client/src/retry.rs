//! Retry stage

use async_trait::async_trait;
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use std::time::Duration;
use tracing::{debug, warn};

use crate::chain::{EndpointStream, Next, Stage};
use crate::{CallContext, ClientError, Result};

/// Retry policy for failed calls
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Deadline of a single attempt, bounded by the call deadline
    pub try_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            try_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Calculate backoff duration for the given retry count
    pub fn backoff_duration(&self, retry_count: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as u64;
        let exponential = 2u64.saturating_pow(retry_count);
        let backoff_ms = base
            .saturating_mul(exponential)
            .min(self.max_backoff.as_millis() as u64);
        Duration::from_millis(backoff_ms)
    }

    /// Check if a failed attempt should be followed by another one
    pub fn should_retry(&self, error: &ClientError, attempt: u32) -> bool {
        attempt < self.max_attempts
            && (error.is_retryable() || *error == ClientError::DeadlineExceeded)
    }
}

/// Re-runs the rest of the chain on retryable failures.
///
/// Every attempt starts from the context as it was when the call reached this
/// stage. After the last attempt the last observed error is returned.
pub struct RetryStage {
    policy: RetryPolicy,
}

impl RetryStage {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn prepare(&self, ctx: &mut CallContext, snapshot: &CallContext, attempt: u32) {
        *ctx = snapshot.clone();
        ctx.set_attempt(attempt);
        if let Some(try_timeout) = self.policy.try_timeout {
            ctx.limit_deadline(try_timeout);
        }
    }

    /// Decide on a failed attempt; `Ok` means try again
    async fn backoff(
        &self,
        operation: &str,
        snapshot: &CallContext,
        attempt: u32,
        error: ClientError,
    ) -> Result<()> {
        if snapshot.is_done() || !self.policy.should_retry(&error, attempt) {
            if attempt > 1 {
                warn!("{} failed after {} attempts: {}", operation, attempt, error);
            }
            return Err(error);
        }

        let delay = self.policy.backoff_duration(attempt - 1);
        debug!(
            "{} attempt {} failed: {}; retrying in {:?}",
            operation, attempt, error, delay
        );
        if snapshot.sleep(delay).await.is_err() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for RetryStage {
    fn name(&self) -> &'static str {
        "RetryStage"
    }

    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<NetworkServiceEndpoint> {
        let snapshot = ctx.clone();
        let mut attempt = 1;
        loop {
            self.prepare(ctx, &snapshot, attempt);
            match next.register(ctx, nse.clone()).await {
                Ok(registered) => return Ok(registered),
                Err(e) => self.backoff("register", &snapshot, attempt, e).await?,
            }
            attempt += 1;
        }
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
        next: Next<'_>,
    ) -> Result<EndpointStream> {
        let snapshot = ctx.clone();
        let mut attempt = 1;
        loop {
            self.prepare(ctx, &snapshot, attempt);
            match next.find(ctx, query.clone()).await {
                Ok(found) => return Ok(found),
                Err(e) => self.backoff("find", &snapshot, attempt, e).await?,
            }
            attempt += 1;
        }
    }

    async fn unregister(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<()> {
        let snapshot = ctx.clone();
        let mut attempt = 1;
        loop {
            self.prepare(ctx, &snapshot, attempt);
            match next.unregister(ctx, nse.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => self.backoff("unregister", &snapshot, attempt, e).await?,
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chain, Target};
    use registry_api::wire::Code;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Fails the first `failures` calls with `error`, then succeeds
    struct Flaky {
        failures: u32,
        error: ClientError,
        calls: Arc<AtomicU32>,
        attempts_seen: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    impl Flaky {
        fn new(failures: u32, error: ClientError) -> Self {
            Self {
                failures,
                error,
                calls: Arc::new(AtomicU32::new(0)),
                attempts_seen: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Stage for Flaky {
        async fn register(
            &self,
            ctx: &mut CallContext,
            nse: NetworkServiceEndpoint,
            _next: Next<'_>,
        ) -> Result<NetworkServiceEndpoint> {
            self.attempts_seen.lock().unwrap().push(ctx.attempt());
            assert!(ctx.target().is_none(), "rewrites of a failed attempt must not leak");
            ctx.set_target("tcp://localhost:1".parse::<Target>().unwrap());

            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(nse)
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            try_timeout: None,
        }
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::default();
        let backoff1 = policy.backoff_duration(0);
        let backoff2 = policy.backoff_duration(1);
        let backoff3 = policy.backoff_duration(2);

        // Each backoff should be exponentially longer
        assert!(backoff2 > backoff1);
        assert!(backoff3 > backoff2);
        assert_eq!(policy.backoff_duration(64), policy.max_backoff);
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = policy(3);
        let unavailable = ClientError::Status {
            code: Code::Unavailable,
            message: "store down".into(),
        };
        assert!(policy.should_retry(&unavailable, 1));
        assert!(policy.should_retry(&ClientError::DeadlineExceeded, 2));
        assert!(!policy.should_retry(&unavailable, 3));
        assert!(!policy.should_retry(&ClientError::Cancelled, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let flaky = Flaky::new(2, ClientError::Transport("reset".into()));
        let calls = flaky.calls.clone();
        let attempts = flaky.attempts_seen.clone();
        let chain = Chain::new().add(RetryStage::new(policy(5))).add(flaky);

        let mut ctx = CallContext::background();
        let nse = NetworkServiceEndpoint::new("nse-1", vec!["icmp".to_string()]);
        let registered = chain.head().register(&mut ctx, nse.clone()).await.unwrap();

        assert_eq!(registered, nse);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*attempts.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let error = ClientError::dial("tcp://localhost:5002", "refused");
        let flaky = Flaky::new(10, error.clone());
        let calls = flaky.calls.clone();
        let chain = Chain::new().add(RetryStage::new(policy(3))).add(flaky);

        let mut ctx = CallContext::background();
        let result = chain
            .head()
            .register(&mut ctx, NetworkServiceEndpoint::new("nse-1", vec![]))
            .await;

        assert_eq!(result, Err(error));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let error = ClientError::Status {
            code: Code::InvalidArgument,
            message: "bad name".into(),
        };
        let flaky = Flaky::new(10, error.clone());
        let calls = flaky.calls.clone();
        let chain = Chain::new().add(RetryStage::new(policy(5))).add(flaky);

        let mut ctx = CallContext::background();
        let result = chain
            .head()
            .register(&mut ctx, NetworkServiceEndpoint::new("nse-1", vec![]))
            .await;

        assert_eq!(result, Err(error));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retries() {
        let flaky = Flaky::new(100, ClientError::Transport("reset".into()));
        let calls = flaky.calls.clone();
        let chain = Chain::new().add(RetryStage::new(policy(100))).add(flaky);

        let cancel = CancellationToken::new();
        let mut ctx = CallContext::new(cancel.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            cancel.cancel();
        });

        let result = chain
            .head()
            .register(&mut ctx, NetworkServiceEndpoint::new("nse-1", vec![]))
            .await;
        canceller.await.unwrap();

        assert_eq!(result, Err(ClientError::Transport("reset".into())));
        assert!(calls.load(Ordering::SeqCst) < 100);
    }
}
