use std::{
    pin::Pin,
    time::{Duration, Instant, SystemTime},
};

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vue_client::domain::{DeviceGid, UsageSnapshot};

use super::{UsageSource, SCALE, UNIT};
use crate::pipeline::{Envelope, MirrorError};

pub type SnapshotStream =
    Pin<Box<dyn Stream<Item = Result<Envelope<UsageSnapshot>, MirrorError>> + Send>>;

/// Fetches usage for a fixed device set on a fixed interval.
pub struct PollingSource<U> {
    source: U,
    gids: Vec<DeviceGid>,
    interval: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    cancel: CancellationToken,
}

impl<U> PollingSource<U>
where
    U: UsageSource + 'static,
{
    pub fn new(source: U, gids: Vec<DeviceGid>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            source,
            gids,
            interval,
            max_retries: 0,
            retry_backoff: Duration::ZERO,
            cancel,
        }
    }

    /// Retry failed fetches `max_retries` times, sleeping `backoff * attempt`
    /// in between. Authentication failures are never retried.
    pub fn with_retry(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Linear backoff, saturating instead of overflowing on huge settings.
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.checked_mul(attempt).unwrap_or(Duration::MAX)
    }

    /// One snapshot, now.
    pub async fn fetch(&self) -> Result<Envelope<UsageSnapshot>, MirrorError> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            metrics::counter!("usage_fetch_total").increment(1);

            match self.source.fetch_usage(&self.gids, SCALE, UNIT).await {
                Ok(snapshot) => {
                    metrics::histogram!("usage_fetch_latency_seconds")
                        .record(started.elapsed().as_secs_f64());
                    return Ok(Envelope {
                        payload: snapshot,
                        received_at: SystemTime::now(),
                    });
                }
                Err(e) if !e.is_auth() && attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.backoff(attempt);
                    warn!(error = %e, attempt, "usage fetch failed, retrying with backoff");
                    metrics::counter!("usage_fetch_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    error!(error = %e, "usage fetch failed, giving up");
                    metrics::counter!("usage_fetch_errors_total").increment(1);
                    return Err(e.into());
                }
            }
        }
    }

    /// Snapshots forever: wait one interval, fetch, yield. The stop signal is
    /// checked before each wait and before each fetch, and interrupts either.
    /// The stream ends after the first error it yields.
    pub fn poll(self) -> SnapshotStream {
        Box::pin(async_stream::stream! {
            loop {
                if self.cancel.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }

                if self.cancel.is_cancelled() {
                    break;
                }
                let fetched = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    res = self.fetch() => res,
                };

                let failed = fetched.is_err();
                yield fetched;
                if failed {
                    break;
                }
            }
            info!("usage polling stopped");
        })
    }
}
