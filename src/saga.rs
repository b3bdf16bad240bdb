//! Multi-step operations spanning the identity provider and the local store.
//!
//! There is no transaction covering both systems, so each saga records a
//! compensating action for every provider side effect it commits and unwinds
//! them before surfacing an error or starting a new attempt. Retrying is
//! reserved for transient network faults; semantic failures abort at once.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{Result, ServerError};

/// Default attempt budget for a saga sequence.
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff bounded by an attempt budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy without any waiting, for tests.
    pub fn immediate() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before re-running after the given failed attempt (1-based):
    /// 1s, 2s, 4s, 8s.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds, the error is terminal, or the attempt budget
/// is exhausted. The closure owns its compensation: every attempt must leave
/// the provider clean before returning `Err`.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err)
                if err.is_transient() && attempt < policy.max_attempts =>
            {
                tracing::warn!(
                    attempt,
                    error = %err,
                    "transient provider fault, backing off"
                );
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

type CompensationFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Ordered list of compensating actions recorded while a saga advances.
///
/// Unwinds in reverse order. A compensation targeting an entity the provider
/// no longer knows is fine (`NotFound` is swallowed); any other failure is
/// logged for manual reconciliation, since there is nothing left to roll
/// back to.
#[derive(Default)]
pub struct Compensations {
    steps: Vec<(&'static str, CompensationFuture)>,
}

impl Compensations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a compensating action for a committed side effect.
    pub fn push<F>(&mut self, step: &'static str, action: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push((step, Box::pin(action)));
    }

    /// Roll back every recorded side effect, most recent first.
    pub async fn unwind(self) {
        for (step, action) in self.steps.into_iter().rev() {
            match action.await {
                Ok(()) => tracing::info!(step, "side effect compensated"),
                Err(ServerError::NotFound(_)) => {
                    tracing::debug!(step, "nothing left to compensate")
                },
                Err(err) => tracing::error!(
                    step,
                    error = %err,
                    "compensation failed, manual reconciliation required"
                ),
            }
        }
    }

    /// Drop recorded compensations once the saga has fully committed.
    pub fn commit(mut self) {
        self.steps.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn transient() -> ServerError {
        ServerError::ProviderUnavailable("connection refused".into())
    }

    #[test]
    fn test_backoff_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_faults() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);

        let result = retry(&RetryPolicy::default(), |attempt| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 { Err(transient()) } else { Ok(attempt) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_terminal_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);

        let result: Result<()> = retry(&RetryPolicy::default(), |_| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(ServerError::RoleNotFound("ADMIN".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ServerError::RoleNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_preserves_error_class() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);

        let result: Result<()> = retry(&RetryPolicy::default(), |_| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert!(matches!(result, Err(ServerError::ProviderUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_compensations_unwind_in_reverse() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut compensations = Compensations::new();

        for step in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            compensations.push(step, async move {
                order.lock().unwrap().push(step);
                Ok(())
            });
        }

        compensations.unwind().await;
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_committed_saga_skips_compensation() {
        let ran = Arc::new(AtomicU32::new(0));
        let mut compensations = Compensations::new();

        let seen = Arc::clone(&ran);
        compensations.push("delete identity", async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        compensations.commit();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
