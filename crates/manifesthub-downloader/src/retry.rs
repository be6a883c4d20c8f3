//! Fixed-schedule retry: up to `attempts` tries with a constant delay
//! between them. Steam RPCs don't benefit from backoff — a denied or
//! rate-limited call is equally likely to succeed on the next poll.

use crate::catalog::CatalogError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries `op` up to `attempts` times (the first call plus `attempts - 1`
/// retries), sleeping `delay` between failures. Returns the first success
/// or the last error once attempts are exhausted.
pub async fn retry_fixed<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, CatalogError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CatalogError>>,
{
    let mut last_err = CatalogError::Transient("no attempts made".into());
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!(attempt, error = %err, "retryable rpc failed");
                last_err = err;
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    warn!(attempts, error = %last_err, "retry schedule exhausted");
    Err(last_err)
}
