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

use crate::Result;
use crate::errors::Error;
use crate::options::ProviderOptions;
use crate::retry::{RetryPolicy, retry_loop};
use reqwest::{Client, Request, Response};
use tokio_util::sync::CancellationToken;

pub(crate) const USER_AGENT: &str = concat!(
    "terraform-provider-iac ",
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION")
);

/// The HTTP transport shared by every client of one provider instance.
///
/// Applies the TLS options, the user agent, and the rate-limit retry policy.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    inner: Client,
    retry: Option<RetryPolicy>,
}

impl Transport {
    pub(crate) fn new(options: &ProviderOptions) -> Result<Self> {
        let builder = Client::builder().user_agent(USER_AGENT);
        let inner = crate::tls::configure(builder, options)?
            .build()
            .map_err(Error::tls)?;
        Ok(Self {
            inner,
            retry: RetryPolicy::from_max_retries(
                options.max_retries,
                options.backoff_policy.clone(),
            ),
        })
    }

    /// Sends the request produced by `build`, retrying on rate limits.
    ///
    /// `build` runs once per attempt, so signed requests carry a fresh
    /// signature on every retry.
    pub(crate) async fn execute<F>(&self, cancel: &CancellationToken, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> Result<Request>,
    {
        retry_loop(self.retry.as_ref(), cancel, || {
            let request = build(&self.inner);
            async move {
                let response = self
                    .inner
                    .execute(request?)
                    .await
                    .map_err(Error::transport)?;
                check_status(response).await
            }
        })
        .await
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::from_status(status, body))
}
