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

//! Clients addressed to one service family in one region.
//!
//! A [ServiceClient] pairs an immutable, shared identity client with a small
//! per-call scope (project id and region). Building clients for different
//! regions never changes the identity client, so concurrent requests cannot
//! observe each other's scoping.

use crate::Result;
use crate::credentials::AccessKey;
use crate::errors::Error;
use crate::http::Transport;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Method, Request, Response};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");
const PROJECT_ID: HeaderName = HeaderName::from_static("x-project-id");
const DOMAIN_ID: HeaderName = HeaderName::from_static("x-domain-id");

/// How an identity client authorizes its requests.
#[derive(Clone, PartialEq)]
pub(crate) enum ClientCredentials {
    Token(String),
    AccessKey(AccessKey),
}

impl ClientCredentials {
    /// Adds the authorization headers. Signing must run last, after every
    /// other header is in place.
    pub(crate) fn apply(&self, request: &mut Request) -> Result<()> {
        match self {
            Self::Token(token) => {
                let value = HeaderValue::from_str(token).map_err(Error::authentication)?;
                request.headers_mut().insert(AUTH_TOKEN, value);
                Ok(())
            }
            Self::AccessKey(key) => crate::signer::sign(request, key, time::OffsetDateTime::now_utc()),
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.debug_tuple("Token").field(&"[censored]").finish(),
            Self::AccessKey(key) => f.debug_tuple("AccessKey").field(key).finish(),
        }
    }
}

/// Whether an identity client is scoped to a project or to a domain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ClientKind {
    Project,
    Domain,
}

/// An authenticated identity client.
///
/// Never mutated once built. Per-request scoping is supplied through a
/// [ClientScope].
#[derive(Clone, Debug)]
pub(crate) struct IdentityClient {
    transport: Transport,
    identity_endpoint: String,
    credentials: ClientCredentials,
    kind: ClientKind,
    project_id: Option<String>,
    domain_id: Option<String>,
    region: Option<String>,
}

impl IdentityClient {
    pub(crate) fn new<S: Into<String>>(
        transport: Transport,
        identity_endpoint: S,
        credentials: ClientCredentials,
        kind: ClientKind,
    ) -> Self {
        Self {
            transport,
            identity_endpoint: identity_endpoint.into(),
            credentials,
            kind,
            project_id: None,
            domain_id: None,
            region: None,
        }
    }

    pub(crate) fn with_project_id<S: Into<String>>(mut self, v: Option<S>) -> Self {
        self.project_id = v.map(Into::into).filter(|s: &String| !s.is_empty());
        self
    }

    pub(crate) fn with_domain_id<S: Into<String>>(mut self, v: Option<S>) -> Self {
        self.domain_id = v.map(Into::into).filter(|s: &String| !s.is_empty());
        self
    }

    pub(crate) fn with_region<S: Into<String>>(mut self, v: Option<S>) -> Self {
        self.region = v.map(Into::into).filter(|s: &String| !s.is_empty());
        self
    }

    pub(crate) fn kind(&self) -> ClientKind {
        self.kind
    }

    pub(crate) fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub(crate) fn domain_id(&self) -> Option<&str> {
        self.domain_id.as_deref()
    }

    pub(crate) fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub(crate) fn identity_endpoint(&self) -> &str {
        &self.identity_endpoint
    }

    pub(crate) fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Returns the default scope: this client's own project and region.
    pub(crate) fn default_scope(&self) -> ClientScope {
        ClientScope {
            project_id: self.project_id.clone(),
            region: self.region.clone(),
        }
    }

    fn authorize(&self, request: &mut Request, scope: &ClientScope) -> Result<()> {
        if let ClientCredentials::AccessKey(_) = &self.credentials {
            let scoping = match self.kind {
                ClientKind::Project => scope
                    .project_id
                    .as_deref()
                    .or(self.project_id.as_deref())
                    .map(|id| (PROJECT_ID, id)),
                ClientKind::Domain => self.domain_id.as_deref().map(|id| (DOMAIN_ID, id)),
            };
            if let Some((name, id)) = scoping {
                let value = HeaderValue::from_str(id).map_err(Error::authentication)?;
                request.headers_mut().insert(name, value);
            }
        }
        self.credentials.apply(request)
    }

    /// Sends an authorized request, retrying on rate limits.
    pub(crate) async fn send(
        &self,
        scope: &ClientScope,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<Response> {
        self.transport
            .execute(cancel, |client| {
                let mut builder = client.request(method.clone(), url);
                if !query.is_empty() {
                    builder = builder.query(query);
                }
                if let Some(body) = body {
                    builder = builder
                        .header(CONTENT_TYPE, "application/json")
                        .body(body.to_vec());
                }
                let mut request = builder.build().map_err(Error::transport)?;
                self.authorize(&mut request, scope)?;
                Ok(request)
            })
            .await
    }
}

/// The per-call overlay applied on top of a shared identity client.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ClientScope {
    pub(crate) project_id: Option<String>,
    pub(crate) region: Option<String>,
}

/// A client for one service family, addressed to one region and project.
///
/// Obtained from [Config::new_service_client][crate::Config::new_service_client].
///
/// # Example
/// ```no_run
/// # use huaweicloud_provider_config::ServiceClient;
/// # async fn sample(client: ServiceClient) -> huaweicloud_provider_config::Result<()> {
/// // https://vpc.cn-north-4.myhuaweicloud.com/v1/{project_id}/vpcs
/// let url = client.service_url(&["vpcs"]);
/// let response = client.get(&url).await?;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct ServiceClient {
    identity: Arc<IdentityClient>,
    scope: ClientScope,
    endpoint: String,
    resource_base: String,
    cancel: CancellationToken,
}

impl ServiceClient {
    pub(crate) fn new(
        identity: Arc<IdentityClient>,
        scope: ClientScope,
        endpoint: String,
        resource_base: String,
    ) -> Self {
        Self {
            identity,
            scope,
            endpoint,
            resource_base,
            cancel: CancellationToken::new(),
        }
    }

    /// The service endpoint, always terminated by `/`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The endpoint plus the version, project id, and resource base
    /// segments that apply to this service. Always terminated by `/`.
    pub fn resource_base(&self) -> &str {
        &self.resource_base
    }

    pub fn project_id(&self) -> Option<&str> {
        self.scope.project_id.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.scope.region.as_deref()
    }

    /// Joins `parts` onto the resource base.
    pub fn service_url(&self, parts: &[&str]) -> String {
        format!("{}{}", self.resource_base, parts.join("/"))
    }

    /// Cancels rate-limit backoff sleeps when `cancel` fires.
    ///
    /// A cancelled request returns the `429 Too Many Requests` error that
    /// triggered the sleep.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send(Method::GET, url, None).await
    }

    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.send(Method::DELETE, url, None).await
    }

    pub async fn post<B: serde::Serialize>(&self, url: &str, body: &B) -> Result<Response> {
        let body = serde_json::to_vec(body).map_err(Error::serialization)?;
        self.send(Method::POST, url, Some(&body)).await
    }

    pub async fn put<B: serde::Serialize>(&self, url: &str, body: &B) -> Result<Response> {
        let body = serde_json::to_vec(body).map_err(Error::serialization)?;
        self.send(Method::PUT, url, Some(&body)).await
    }

    pub async fn patch<B: serde::Serialize>(&self, url: &str, body: &B) -> Result<Response> {
        let body = serde_json::to_vec(body).map_err(Error::serialization)?;
        self.send(Method::PATCH, url, Some(&body)).await
    }

    async fn send(&self, method: Method, url: &str, body: Option<&[u8]>) -> Result<Response> {
        self.identity
            .send(&self.scope, &self.cancel, method, url, &[], body)
            .await
    }
}
