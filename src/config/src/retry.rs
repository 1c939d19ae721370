// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The services reject requests over their rate limit with
//! `429 Too Many Requests`. Such requests are retried, up to the configured
//! `max_retries`, after sleeping for a duration prescribed by a
//! [BackoffPolicy]. No other failures are retried.
//!
//! The sleeps can be long (minutes). They honor a
//! [CancellationToken]: once cancelled, the retry loop returns the
//! `429` error immediately.

use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_BACKOFF_MINUTES: u64 = 30;

/// Defines the trait implemented by rate-limit backoff strategies.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the delay before the next attempt.
    ///
    /// `retries` is the number of retries already performed, so it starts
    /// at zero.
    fn on_rate_limited(&self, retries: u32) -> Duration;
}

/// Sleeps `2^retries` minutes, but never more than 30 minutes.
#[derive(Clone, Debug, Default)]
pub struct RateLimitBackoff;

impl BackoffPolicy for RateLimitBackoff {
    fn on_rate_limited(&self, retries: u32) -> Duration {
        let minutes = 1_u64
            .checked_shl(retries)
            .unwrap_or(u64::MAX)
            .min(MAX_BACKOFF_MINUTES);
        Duration::from_secs(minutes * 60)
    }
}

/// Retries rate-limited requests.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Arc<dyn BackoffPolicy>,
}

impl RetryPolicy {
    /// Retries up to `max_retries` times using [RateLimitBackoff].
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Arc::new(RateLimitBackoff),
        }
    }

    /// Replaces the backoff policy.
    pub fn with_backoff_policy<T: BackoffPolicy + 'static>(mut self, v: T) -> Self {
        self.backoff = Arc::new(v);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns a policy only when `max_retries` is positive.
    pub(crate) fn from_max_retries(
        max_retries: i32,
        backoff: Option<Arc<dyn BackoffPolicy>>,
    ) -> Option<Self> {
        let policy = u32::try_from(max_retries)
            .ok()
            .filter(|n| *n > 0)
            .map(Self::new)?;
        match backoff {
            Some(backoff) => Some(Self { backoff, ..policy }),
            None => Some(policy),
        }
    }
}

/// Sleeps for `delay`. Returns `false` if `cancel` fired first.
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Calls `inner` until it succeeds, fails with something other than
/// `429 Too Many Requests`, or the policy is exhausted.
pub(crate) async fn retry_loop<F, Fut, T>(
    policy: Option<&RetryPolicy>,
    cancel: &CancellationToken,
    mut inner: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0_u32;
    loop {
        let error = match inner().await {
            Ok(r) => return Ok(r),
            Err(e) => e,
        };
        let policy = match policy {
            Some(p) if error.is_too_many_requests() && retries < p.max_retries => p,
            _ => return Err(error),
        };
        let delay = policy.backoff.on_rate_limited(retries);
        tracing::warn!(
            "received a Too Many Requests response, sleeping {} minutes before retrying",
            delay.as_secs() / 60
        );
        if !sleep_or_cancel(delay, cancel).await {
            return Err(error);
        }
        retries += 1;
    }
}
