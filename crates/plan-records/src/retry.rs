use std::future::Future;

use plan_types::RetryPolicy;
use tracing::warn;

/// Errors that may succeed when the same call is repeated.
pub(crate) trait Transient: std::fmt::Display {
    fn is_transient(&self) -> bool;
}

impl Transient for plan_store::StoreError {
    fn is_transient(&self) -> bool {
        plan_store::StoreError::is_transient(self)
    }
}

impl Transient for plan_fabric::FabricError {
    fn is_transient(&self) -> bool {
        plan_fabric::FabricError::is_transient(self)
    }
}

pub(crate) enum Failure<E> {
    /// Not worth retrying.
    Permanent(E),
    /// Still failing after the whole budget.
    Exhausted { attempts: u32, last: E },
}

impl<E: std::fmt::Display> std::fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permanent(e) => write!(f, "{e}"),
            Self::Exhausted { attempts, last } => {
                write!(f, "failed after {attempts} attempt(s): {last}")
            }
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or spends the budget.
pub(crate) async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, Failure<E>>
where
    E: Transient,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(Failure::Permanent(e)),
            Err(e) if !policy.allows_retry_after(attempt) => {
                return Err(Failure::Exhausted {
                    attempts: attempt,
                    last: e,
                })
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
