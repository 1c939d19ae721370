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

use crate::credentials::{AccessKey, TemporaryCredential};
use reqwest::{Client as ReqwestClient, StatusCode};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const SECURITY_KEY_URL: &str = "http://169.254.169.254/openstack/latest/securitykey";

// Bounds the whole request, including the connection. Off-cloud the
// link-local address never answers.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures fetching temporary credentials from the ECS metadata API.
#[derive(thiserror::Error, Debug)]
pub(crate) enum MetadataError {
    #[error("cannot send the request to the metadata API: {0}")]
    Request(#[source] reqwest::Error),
    #[error("the metadata API responded with status code = {0}")]
    Status(StatusCode),
    #[error("cannot parse the metadata API response: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("the metadata API response is missing credential.{0}")]
    MissingField(&'static str),
    #[error("cannot parse the credential expiration time {value}: {source}")]
    Expiry {
        value: String,
        #[source]
        source: time::error::Parse,
    },
}

#[derive(Debug, serde::Deserialize)]
struct SecurityKeyResponse {
    credential: Option<SecurityKey>,
}

#[derive(serde::Deserialize)]
struct SecurityKey {
    access: Option<String>,
    secret: Option<String>,
    securitytoken: Option<String>,
    expires_at: Option<String>,
}

impl std::fmt::Debug for SecurityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityKey")
            .field("access", &self.access)
            .field("secret", &"[censored]")
            .field("securitytoken", &"[censored]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A client for the ECS instance metadata API.
#[derive(Clone, Debug)]
pub(crate) struct MetadataClient {
    url: String,
    inner: ReqwestClient,
    timeout: Duration,
}

impl MetadataClient {
    pub(crate) fn new(endpoint_override: Option<String>) -> Self {
        Self {
            url: endpoint_override.unwrap_or_else(|| SECURITY_KEY_URL.to_string()),
            inner: ReqwestClient::new(),
            timeout: METADATA_TIMEOUT,
        }
    }

    /// Fetches the temporary credentials of the ECS agency bound to this instance.
    pub(crate) async fn security_key(&self) -> Result<TemporaryCredential, MetadataError> {
        let response = self
            .inner
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(MetadataError::Request)?;
        if response.status() != StatusCode::OK {
            return Err(MetadataError::Status(response.status()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| MetadataError::Decode(e.into()))?;
        let response = serde_json::from_str::<SecurityKeyResponse>(&body)
            .map_err(|e| MetadataError::Decode(e.into()))?;
        let credential = response
            .credential
            .ok_or(MetadataError::MissingField("*"))?;

        let access = credential.access.ok_or(MetadataError::MissingField("access"))?;
        let secret = credential.secret.ok_or(MetadataError::MissingField("secret"))?;
        let security_token = credential
            .securitytoken
            .ok_or(MetadataError::MissingField("securitytoken"))?;
        let expires_at = credential
            .expires_at
            .ok_or(MetadataError::MissingField("expires_at"))?;
        let expires_at = OffsetDateTime::parse(&expires_at, &Rfc3339).map_err(|source| {
            MetadataError::Expiry {
                value: expires_at.clone(),
                source,
            }
        })?;

        tracing::debug!("got the metadata security key, which will expire at: {expires_at}");
        Ok(TemporaryCredential {
            access_key: AccessKey::new(access, secret).with_security_token(security_token),
            expires_at,
        })
    }
}
