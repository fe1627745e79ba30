//! Generic polling loop trait and runner.
//!
//! A cycle is `prepare` followed by `process`. Cycles run back to back while
//! the processor reports more data, and an idle interval separates them
//! otherwise. Failures are contained at the cycle boundary: they are logged,
//! counted, and the loop carries on after the idle interval.

use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::emit;
use crate::metrics::events::{
    CycleFailed, IterationCompleted, IterationDuration, IterationResultType,
};

/// Result of a single processing iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationResult {
    /// Work was done and more is immediately available.
    MoreData,
    /// Work was done and the source is caught up.
    Drained,
    /// No work was available.
    NoItems,
}

impl IterationResult {
    /// Whether the loop should idle before the next cycle.
    pub fn should_idle(&self) -> bool {
        !matches!(self, IterationResult::MoreData)
    }

    fn metric(&self) -> IterationResultType {
        match self {
            IterationResult::MoreData => IterationResultType::MoreData,
            IterationResult::Drained => IterationResultType::Drained,
            IterationResult::NoItems => IterationResultType::NoItems,
        }
    }
}

/// Trait for implementing a polling-based processor.
#[async_trait]
pub trait PollingProcessor {
    /// The state type prepared for each iteration.
    type State: Send;
    /// The error type for this processor.
    type Error: std::error::Error + Send;

    /// Prepare state for a processing iteration.
    ///
    /// Returns `None` if there's no work to do.
    ///
    /// # Arguments
    /// * `cold_start` - True on the first iteration
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;

    /// Short label classifying a failure, for metrics.
    fn failure_kind(_error: &Self::Error) -> &'static str {
        "error"
    }

    /// Best-effort cleanup once the loop has stopped.
    async fn on_shutdown(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Run a polling loop with the given processor until `shutdown` fires.
///
/// A cycle in flight when shutdown is requested runs to completion; only the
/// idle wait between cycles is interrupted. `poll_jitter_secs` adds 0 to N
/// seconds to every idle wait so readers started together drift apart.
pub async fn run_polling_loop<P: PollingProcessor + Send>(
    processor: &mut P,
    poll_interval: Duration,
    poll_jitter_secs: u64,
    shutdown: CancellationToken,
    name: &str,
) {
    let mut cold_start = true;

    while !shutdown.is_cancelled() {
        let iteration_start = Instant::now();
        let outcome = run_cycle(processor, cold_start).await;
        cold_start = false;

        emit!(IterationDuration {
            duration: iteration_start.elapsed(),
            reader: name.to_string(),
        });

        let idle = match outcome {
            Ok(result) => {
                emit!(IterationCompleted {
                    result: result.metric(),
                    reader: name.to_string(),
                });
                result.should_idle()
            }
            Err(e) => {
                warn!(target = name, error = %e, "Cycle failed, retrying after idle interval");
                emit!(CycleFailed {
                    kind: P::failure_kind(&e),
                    reader: name.to_string(),
                });
                emit!(IterationCompleted {
                    result: IterationResultType::Failed,
                    reader: name.to_string(),
                });
                true
            }
        };

        if !idle {
            continue;
        }

        let sleep_duration = poll_interval + random_jitter(poll_jitter_secs);
        debug!(
            target = name,
            "Waiting {}ms before next poll",
            sleep_duration.as_millis()
        );
        if shutdown
            .run_until_cancelled(tokio::time::sleep(sleep_duration))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested during poll wait");
            break;
        }
    }

    if let Err(e) = processor.on_shutdown().await {
        warn!(target = name, error = %e, "Shutdown cleanup failed");
    }
}

async fn run_cycle<P: PollingProcessor>(
    processor: &mut P,
    cold_start: bool,
) -> Result<IterationResult, P::Error> {
    match processor.prepare(cold_start).await? {
        Some(state) => processor.process(state).await,
        None => Ok(IterationResult::NoItems),
    }
}

/// Generate a random jitter duration up to the specified maximum seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
