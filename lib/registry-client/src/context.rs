//! Per-call state threaded through the stage chain

use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{ClientError, Connection, Result, Target};

/// State of one logical registry call.
///
/// Every suspension point of a stage goes through [`CallContext::run`], which
/// aborts on cancellation of the token or when the deadline passes.
#[derive(Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    call_id: Option<Uuid>,
    attempt: u32,
    target: Option<Target>,
    connection: Option<Connection>,
}

impl CallContext {
    /// Create a context observing the given cancellation token
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            call_id: None,
            attempt: 0,
            target: None,
            connection: None,
        }
    }

    /// Create a context that is never cancelled
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limit_deadline(timeout);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Tighten the deadline to at most `timeout` from now
    pub fn limit_deadline(&mut self, timeout: Duration) {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(current) if current < candidate => current,
            _ => candidate,
        });
    }

    pub fn call_id(&self) -> Option<Uuid> {
        self.call_id
    }

    pub(crate) fn set_call_id(&mut self, id: Uuid) {
        self.call_id = Some(id);
    }

    /// Attempt number of the current traversal, starting at 1 under retry
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Effective target of the call
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn set_target(&mut self, target: Target) {
        self.target = Some(target);
    }

    /// Connection borrowed for the current traversal
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn set_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    pub fn take_connection(&mut self) -> Option<Connection> {
        self.connection.take()
    }

    /// Whether the call was cancelled or ran past its deadline
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Reason the call is done, if it is
    pub fn err(&self) -> Option<ClientError> {
        if self.cancel.is_cancelled() {
            Some(ClientError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ClientError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Drive a suspension point, aborting on cancellation or deadline
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            _ = deadline => Err(ClientError::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleep for `duration` unless the call ends first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = CallContext::background();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let cancel = CancellationToken::new();
        let ctx = CallContext::new(cancel.clone());
        cancel.cancel();

        let result: Result<()> = ctx.run(std::future::pending()).await;
        assert_eq!(result, Err(ClientError::Cancelled));
        assert!(ctx.is_done());
        assert_eq!(ctx.err(), Some(ClientError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline() {
        let ctx = CallContext::background().with_timeout(Duration::from_secs(1));
        let result: Result<()> = ctx.run(std::future::pending()).await;
        assert_eq!(result, Err(ClientError::DeadlineExceeded));
        assert_eq!(ctx.err(), Some(ClientError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_deadline_only_tightens() {
        let mut ctx = CallContext::background().with_timeout(Duration::from_secs(1));
        let first = ctx.deadline().unwrap();

        ctx.limit_deadline(Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(first));

        ctx.limit_deadline(Duration::from_millis(100));
        assert!(ctx.deadline().unwrap() < first);
    }

    #[tokio::test]
    async fn test_child_token_cancellation() {
        let process = CancellationToken::new();
        let ctx = CallContext::new(process.child_token());
        assert!(!ctx.is_done());
        process.cancel();
        assert!(ctx.is_done());
    }
}
