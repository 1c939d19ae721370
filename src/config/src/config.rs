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
use crate::authenticator::{Authenticated, ClientPair, access_key_clients, authenticate};
use crate::catalog;
use crate::client::{ClientScope, IdentityClient, ServiceClient};
use crate::credentials::{AccessKey, CredentialSource, expires_soon};
use crate::errors::Error;
use crate::http::Transport;
use crate::identity::{list_domains, list_projects, list_users};
use crate::mds::MetadataClient;
use crate::options::ProviderOptions;
use crate::regions::{ProjectLookup, RegionProjects};
use std::sync::{Arc, PoisonError, RwLock};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const ALL_GRANTED_EPS: &str = "all_granted_eps";

/// The provider-level configuration, authenticated and ready to build
/// service clients.
///
/// A `Config` is shared by every resource operation. All its methods take
/// `&self` and are safe to call concurrently.
///
/// # Example
/// ```no_run
/// # use huaweicloud_provider_config::{Config, options::ProviderOptions};
/// # async fn sample() -> huaweicloud_provider_config::Result<()> {
/// let options = ProviderOptions::default()
///     .with_region("cn-north-4")
///     .with_access_key("my-access-key")
///     .with_secret_key("my-secret-key");
/// let config = Config::new(options).await?;
/// let client = config.new_service_client("ecs", "cn-north-4").await?;
/// println!("servers live under {}", client.service_url(&["cloudservers"]));
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Config {
    options: ProviderOptions,
    region: String,
    transport: Transport,
    metadata: MetadataClient,
    domain_id: Option<String>,
    user_id: Option<String>,
    clients: RwLock<Arc<ClientPair>>,
    // Also serializes the refreshes.
    expires_at: Mutex<Option<OffsetDateTime>>,
    projects: RegionProjects,
    cancel: CancellationToken,
}

impl Config {
    /// Validates `options` and authenticates with the active credential
    /// source.
    ///
    /// If no domain id is configured, the domain id is looked up with the
    /// new credentials. If a username is configured without a user id, the
    /// user id is looked up too. Failures in these two lookups are logged
    /// and otherwise ignored.
    pub async fn new(options: ProviderOptions) -> Result<Self> {
        if options.max_retries < 0 {
            return Err(Error::configuration(
                "max_retries should be a positive value",
            ));
        }
        let transport = Transport::new(&options)?;
        let source = CredentialSource::from_options(&options)?;
        tracing::debug!("authenticating with {source:?}");
        let metadata = MetadataClient::new(options.metadata_endpoint.clone());
        let cancel = CancellationToken::new();

        let Authenticated {
            options,
            region,
            mut clients,
            expires_at,
        } = authenticate(options, source, &transport, &metadata, &cancel).await?;

        let projects = RegionProjects::default();
        if let Some(id) = clients.project.project_id() {
            projects.seed(&region, id).await;
        }

        let domain_id = match &options.domain_id {
            Some(id) => Some(id.clone()),
            None => {
                match lookup_domain_id(&clients.domain, options.domain_name.as_deref(), &cancel)
                    .await
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!("get domain id failed: {e}");
                        None
                    }
                }
            }
        };
        if clients.domain.domain_id().is_none() {
            let domain = clients.domain.as_ref().clone().with_domain_id(domain_id.clone());
            clients.domain = Arc::new(domain);
        }

        let user_id = match (&options.user_id, &options.username) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(name)) => match lookup_user_id(&clients.domain, name, &cancel).await {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!("get user id failed: {e}");
                    None
                }
            },
            (None, None) => None,
        };

        Ok(Self {
            options,
            region,
            transport,
            metadata,
            domain_id,
            user_id,
            clients: RwLock::new(Arc::new(clients)),
            expires_at: Mutex::new(expires_at),
            projects,
            cancel,
        })
    }

    /// Cancels the rate-limit backoff of the identity lookups made while
    /// building service clients. The clients inherit `cancel` too.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Creates a client for `service`, addressed to `region`.
    ///
    /// # Errors
    /// Fails if the service is not in the catalog, if `region` is not the
    /// provider region and the credentials are not an access key, if the
    /// region has no project, or if expiring metadata credentials cannot be
    /// reloaded.
    pub async fn new_service_client(&self, service: &str, region: &str) -> Result<ServiceClient> {
        let entry = catalog::lookup(service).ok_or_else(|| Error::unsupported_service(service))?;
        self.refresh_security_key().await?;

        let clients = self.clients();
        let identity = if entry.admin() {
            clients.domain.clone()
        } else {
            clients.project.clone()
        };
        tracing::debug!(
            "building the {service} client with the {:?} identity client of {:?}",
            identity.kind(),
            identity.region()
        );

        if let Some(endpoint) = self.options.endpoints.get(service) {
            let endpoint = normalize_endpoint(endpoint)?;
            let resource_base =
                entry.resource_base_url(&endpoint, identity.project_id().unwrap_or_default());
            let scope = identity.default_scope();
            return Ok(ServiceClient::new(identity, scope, endpoint, resource_base)
                .with_cancellation(self.cancel.clone()));
        }

        if region != self.region && !clients.uses_access_key() {
            return Err(Error::configuration(
                "Resource-level region must be the same as Provider-level region when using non AK/SK authentication",
            ));
        }
        let lookup = IdentityProjects {
            client: &identity,
            domain_id: identity.domain_id().or(self.domain_id.as_deref()),
            cancel: &self.cancel,
        };
        let project_id = self.projects.resolve(region, &lookup).await?;

        let endpoint = entry.endpoint(region, self.options.cloud(), self.options.region_client);
        let resource_base = entry.resource_base_url(&endpoint, &project_id);
        let scope = ClientScope {
            project_id: Some(project_id),
            region: Some(region.to_string()),
        };
        Ok(ServiceClient::new(identity, scope, endpoint, resource_base)
            .with_cancellation(self.cancel.clone()))
    }

    /// The resource-level region if set, else the provider region.
    pub fn region<'a>(&'a self, resource_region: Option<&'a str>) -> &'a str {
        resource_region
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.region)
    }

    /// The resource-level enterprise project id if set, else the provider
    /// default.
    pub fn enterprise_project_id<'a>(&'a self, value: Option<&'a str>) -> Option<&'a str> {
        value
            .filter(|v| !v.is_empty())
            .or(self.options.enterprise_project_id.as_deref())
    }

    /// Like [enterprise_project_id][Self::enterprise_project_id], but data
    /// sources fall back to every enterprise project the caller can access.
    pub fn data_enterprise_project_id<'a>(&'a self, value: Option<&'a str>) -> &'a str {
        self.enterprise_project_id(value).unwrap_or(ALL_GRANTED_EPS)
    }

    /// The configured or inferred domain id.
    pub fn domain_id(&self) -> Option<&str> {
        self.domain_id.as_deref()
    }

    /// The configured or inferred user id.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The object storage (OBS) endpoint and credentials for `region`.
    ///
    /// The object storage service has its own signing scheme, so this
    /// returns the raw access key instead of a [ServiceClient].
    pub async fn object_storage(&self, region: &str) -> Result<ObjectStorage> {
        self.refresh_security_key().await?;
        let credentials = self.clients().access_key.clone().ok_or_else(|| {
            Error::configuration(
                "missing credentials for OBS, need access_key and secret_key values for provider",
            )
        })?;
        let endpoint = match self.options.endpoints.get("obs") {
            Some(e) => e.clone(),
            None => format!("https://obs.{region}.{}/", self.options.cloud()),
        };
        Ok(ObjectStorage {
            endpoint,
            credentials,
        })
    }

    fn clients(&self) -> Arc<ClientPair> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reloads metadata-sourced credentials that expire soon.
    async fn refresh_security_key(&self) -> Result<()> {
        let mut expires_at = self.expires_at.lock().await;
        let Some(current) = *expires_at else {
            return Ok(());
        };
        if !expires_soon(current, OffsetDateTime::now_utc()) {
            return Ok(());
        }

        let credential = self
            .metadata
            .security_key()
            .await
            .map_err(Error::metadata_refresh)?;
        let previous = self.clients();
        let clients = access_key_clients(
            &self.options,
            &self.transport,
            &self.region,
            credential.access_key,
            Some(&previous),
            &self.cancel,
        )
        .await?;
        *self.clients.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(clients);
        *expires_at = Some(credential.expires_at);
        tracing::debug!(
            "reloaded the metadata security key, which will expire at: {}",
            credential.expires_at
        );
        Ok(())
    }
}

/// The object storage endpoint and the credentials to sign its requests.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectStorage {
    endpoint: String,
    credentials: AccessKey,
}

impl ObjectStorage {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn credentials(&self) -> &AccessKey {
        &self.credentials
    }
}

fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        Error::configuration(format!("invalid endpoint override {endpoint}: {e}"))
    })?;
    let mut endpoint = url.to_string();
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }
    Ok(endpoint)
}

async fn lookup_domain_id(
    client: &IdentityClient,
    domain_name: Option<&str>,
    cancel: &CancellationToken,
) -> Result<String> {
    let domains = list_domains(client, cancel).await?;
    let domain = domains
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found("domain was not found"))?;
    match domain_name {
        Some(name) if name != domain.name => Err(Error::not_found(format!(
            "domain {name} was not found, got {}",
            domain.name
        ))),
        _ => Ok(domain.id),
    }
}

async fn lookup_user_id(
    client: &IdentityClient,
    name: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let users = list_users(client, cancel, name).await?;
    let user = users
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(format!("IAM user {name} was not found")))?;
    if user.name != name {
        return Err(Error::not_found(format!(
            "IAM user {name} was not found, got {}",
            user.name
        )));
    }
    Ok(user.id)
}

struct IdentityProjects<'a> {
    client: &'a IdentityClient,
    domain_id: Option<&'a str>,
    cancel: &'a CancellationToken,
}

#[async_trait::async_trait]
impl ProjectLookup for IdentityProjects<'_> {
    async fn projects(&self, region: &str) -> Result<Vec<(String, String)>> {
        let projects = list_projects(self.client, self.cancel, self.domain_id, Some(region)).await?;
        Ok(projects.into_iter().map(|p| (p.name, p.id)).collect())
    }
}
