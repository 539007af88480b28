use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LedgerConfig;

use super::LedgerError;

/// Outcome of one attempt at an atomic unit.
pub(crate) enum Attempt<T> {
    Done(T),
    /// A compare-and-set lost to a concurrent writer; nothing was committed
    Conflict,
}

/// Bounded retry of compare-and-set conflicts and transient storage failures.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    config: LedgerConfig,
}

impl RetryPolicy {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config.backoff(attempt)
    }

    /// Run `attempt` until it completes, fails permanently, or runs out of retries.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, LedgerError>>,
    {
        let mut conflicts = 0u32;
        let mut transient_failures = 0u32;

        loop {
            match attempt().await {
                Ok(Attempt::Done(value)) => return Ok(value),
                Ok(Attempt::Conflict) => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        warn!(
                            operation,
                            attempts = conflicts,
                            "giving up after repeated balance conflicts"
                        );
                        return Err(LedgerError::Contention {
                            operation,
                            attempts: conflicts,
                        });
                    }
                    debug!(
                        operation,
                        attempt = conflicts,
                        "balance changed concurrently, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(err)
                    if err.is_transient()
                        && transient_failures < self.config.max_storage_retries =>
                {
                    transient_failures += 1;
                    let delay = self.backoff(transient_failures);
                    warn!(
                        operation,
                        attempt = transient_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Retry a call that cannot conflict, on transient storage failures only.
    pub async fn transient<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        self.run(operation, || {
            let fut = call();
            async move { fut.await.map(Attempt::Done) }
        })
        .await
    }
}
