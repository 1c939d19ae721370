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
use crate::retry::BackoffPolicy;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const DEFAULT_CLOUD: &str = "myhuaweicloud.com";

// The provider schema defaults `max_retries` to this value.
const DEFAULT_MAX_RETRIES: i32 = 5;

/// The provider-level configuration.
///
/// These are plain values, typically read from the provider block of a
/// Terraform configuration. Empty strings are treated as unset.
///
/// # Example
/// ```
/// # use huaweicloud_provider_config::options::ProviderOptions;
/// let options = ProviderOptions::default()
///     .with_region("cn-north-4")
///     .with_access_key("my-access-key")
///     .with_secret_key("my-secret-key")
///     .with_max_retries(3);
/// ```
#[derive(Clone, Default)]
pub struct ProviderOptions {
    pub(crate) region: Option<String>,
    pub(crate) access_key: Option<String>,
    pub(crate) secret_key: Option<String>,
    pub(crate) security_token: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) user_id: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) domain_id: Option<String>,
    pub(crate) domain_name: Option<String>,
    pub(crate) tenant_id: Option<String>,
    pub(crate) tenant_name: Option<String>,
    pub(crate) agency_name: Option<String>,
    pub(crate) agency_domain_name: Option<String>,
    pub(crate) delegated_project: Option<String>,
    pub(crate) identity_endpoint: Option<String>,
    pub(crate) cloud: Option<String>,
    pub(crate) insecure: bool,
    pub(crate) ca_cert: Option<String>,
    pub(crate) client_cert: Option<String>,
    pub(crate) client_key: Option<String>,
    pub(crate) max_retries: i32,
    pub(crate) backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    pub(crate) region_client: bool,
    pub(crate) enterprise_project_id: Option<String>,
    pub(crate) shared_config_file: Option<String>,
    pub(crate) profile: Option<String>,
    pub(crate) endpoints: HashMap<String, String>,
    pub(crate) metadata_endpoint: Option<String>,
}

/// An agency delegation: assume the named agency in another account.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Delegation {
    pub(crate) agency_name: String,
    pub(crate) agency_domain_name: String,
    pub(crate) delegated_project: Option<String>,
}

fn non_empty<S: Into<String>>(v: S) -> Option<String> {
    Some(v.into()).filter(|s| !s.is_empty())
}

impl ProviderOptions {
    /// Creates options from the provider's well-known environment variables.
    ///
    /// Values set later with the `with_*` functions override the values
    /// found in the environment.
    ///
    /// # Errors
    /// Returns a configuration error if `HW_MAX_RETRIES` or `HW_INSECURE`
    /// cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().and_then(non_empty);
        let max_retries = match var("HW_MAX_RETRIES") {
            None => DEFAULT_MAX_RETRIES,
            Some(v) => v.parse::<i32>().map_err(|e| {
                Error::configuration(format!("cannot parse HW_MAX_RETRIES={v}: {e}"))
            })?,
        };
        let insecure = match var("HW_INSECURE") {
            None => false,
            Some(v) => parse_bool(&v).ok_or_else(|| {
                Error::configuration(format!("cannot parse HW_INSECURE={v} as a boolean"))
            })?,
        };
        Ok(Self {
            region: var("HW_REGION_NAME"),
            access_key: var("HW_ACCESS_KEY"),
            secret_key: var("HW_SECRET_KEY"),
            security_token: var("HW_SECURITY_TOKEN"),
            token: var("HW_AUTH_TOKEN"),
            username: var("HW_USER_NAME"),
            user_id: var("HW_USER_ID"),
            password: var("HW_USER_PASSWORD"),
            domain_id: var("HW_DOMAIN_ID"),
            domain_name: var("HW_DOMAIN_NAME"),
            tenant_id: var("HW_PROJECT_ID"),
            tenant_name: var("HW_PROJECT_NAME"),
            agency_name: var("HW_AGENCY_NAME"),
            agency_domain_name: var("HW_AGENCY_DOMAIN_NAME"),
            delegated_project: var("HW_DELEGATED_PROJECT"),
            identity_endpoint: var("HW_AUTH_URL"),
            cloud: var("HW_CLOUD"),
            insecure,
            ca_cert: var("HW_CACERT"),
            client_cert: var("HW_CERT"),
            client_key: var("HW_KEY"),
            max_retries,
            enterprise_project_id: var("HW_ENTERPRISE_PROJECT_ID"),
            shared_config_file: var("HW_SHARED_CONFIG_FILE"),
            profile: var("HW_PROFILE"),
            ..Default::default()
        })
    }

    /// Sets the provider-level region.
    pub fn with_region<S: Into<String>>(mut self, v: S) -> Self {
        self.region = non_empty(v);
        self
    }

    /// Sets the access key used for AK/SK authentication.
    pub fn with_access_key<S: Into<String>>(mut self, v: S) -> Self {
        self.access_key = non_empty(v);
        self
    }

    /// Sets the secret key used for AK/SK authentication.
    pub fn with_secret_key<S: Into<String>>(mut self, v: S) -> Self {
        self.secret_key = non_empty(v);
        self
    }

    /// Sets the security token that accompanies temporary AK/SK credentials.
    pub fn with_security_token<S: Into<String>>(mut self, v: S) -> Self {
        self.security_token = non_empty(v);
        self
    }

    /// Sets an IAM token. A token takes precedence over all other credentials.
    pub fn with_token<S: Into<String>>(mut self, v: S) -> Self {
        self.token = non_empty(v);
        self
    }

    pub fn with_username<S: Into<String>>(mut self, v: S) -> Self {
        self.username = non_empty(v);
        self
    }

    pub fn with_user_id<S: Into<String>>(mut self, v: S) -> Self {
        self.user_id = non_empty(v);
        self
    }

    pub fn with_password<S: Into<String>>(mut self, v: S) -> Self {
        self.password = non_empty(v);
        self
    }

    pub fn with_domain_id<S: Into<String>>(mut self, v: S) -> Self {
        self.domain_id = non_empty(v);
        self
    }

    pub fn with_domain_name<S: Into<String>>(mut self, v: S) -> Self {
        self.domain_name = non_empty(v);
        self
    }

    /// Sets the project id for the provider-level region.
    pub fn with_tenant_id<S: Into<String>>(mut self, v: S) -> Self {
        self.tenant_id = non_empty(v);
        self
    }

    /// Sets the project name for the provider-level region.
    pub fn with_tenant_name<S: Into<String>>(mut self, v: S) -> Self {
        self.tenant_name = non_empty(v);
        self
    }

    /// Sets the agency to assume. Requires [with_agency_domain_name][Self::with_agency_domain_name].
    pub fn with_agency_name<S: Into<String>>(mut self, v: S) -> Self {
        self.agency_name = non_empty(v);
        self
    }

    /// Sets the domain that owns the agency.
    pub fn with_agency_domain_name<S: Into<String>>(mut self, v: S) -> Self {
        self.agency_domain_name = non_empty(v);
        self
    }

    /// Sets the project the agency delegates access to.
    pub fn with_delegated_project<S: Into<String>>(mut self, v: S) -> Self {
        self.delegated_project = non_empty(v);
        self
    }

    /// Sets the identity (IAM) endpoint.
    ///
    /// Defaults to `https://iam.{cloud}:443/v3`.
    pub fn with_identity_endpoint<S: Into<String>>(mut self, v: S) -> Self {
        self.identity_endpoint = non_empty(v);
        self
    }

    /// Sets the cloud domain suffix. Defaults to `myhuaweicloud.com`.
    pub fn with_cloud<S: Into<String>>(mut self, v: S) -> Self {
        self.cloud = non_empty(v);
        self
    }

    /// Disables TLS certificate verification.
    pub fn with_insecure(mut self, v: bool) -> Self {
        self.insecure = v;
        self
    }

    /// Sets the CA certificate, as a file path or as PEM contents.
    pub fn with_ca_cert<S: Into<String>>(mut self, v: S) -> Self {
        self.ca_cert = non_empty(v);
        self
    }

    /// Sets the client certificate, as a file path or as PEM contents.
    pub fn with_client_cert<S: Into<String>>(mut self, v: S) -> Self {
        self.client_cert = non_empty(v);
        self
    }

    /// Sets the client private key, as a file path or as PEM contents.
    pub fn with_client_key<S: Into<String>>(mut self, v: S) -> Self {
        self.client_key = non_empty(v);
        self
    }

    /// Sets the maximum number of retries on `429 Too Many Requests`.
    ///
    /// Zero disables retries. Negative values are rejected when the
    /// [Config][crate::Config] is created.
    pub fn with_max_retries(mut self, v: i32) -> Self {
        self.max_retries = v;
        self
    }

    /// Replaces the backoff between rate-limited attempts.
    ///
    /// Defaults to [RateLimitBackoff][crate::retry::RateLimitBackoff].
    pub fn with_backoff_policy<T: BackoffPolicy + 'static>(mut self, v: T) -> Self {
        self.backoff_policy = Some(Arc::new(v));
        self
    }

    /// Forces per-region endpoints, even for global services.
    pub fn with_region_client(mut self, v: bool) -> Self {
        self.region_client = v;
        self
    }

    pub fn with_enterprise_project_id<S: Into<String>>(mut self, v: S) -> Self {
        self.enterprise_project_id = non_empty(v);
        self
    }

    /// Sets the path of the CLI shared config file.
    pub fn with_shared_config_file<S: Into<String>>(mut self, v: S) -> Self {
        self.shared_config_file = non_empty(v);
        self
    }

    /// Selects a profile in the shared config file. Defaults to the
    /// file's `current` profile.
    pub fn with_profile<S: Into<String>>(mut self, v: S) -> Self {
        self.profile = non_empty(v);
        self
    }

    /// Overrides the endpoint for one service in the catalog.
    pub fn with_endpoint<K, V>(mut self, service: K, endpoint: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.endpoints.insert(service.into(), endpoint.into());
        self
    }

    /// Overrides the instance metadata URL used to fetch temporary credentials.
    ///
    /// This is only useful in tests.
    pub fn with_metadata_endpoint<S: Into<String>>(mut self, v: S) -> Self {
        self.metadata_endpoint = non_empty(v);
        self
    }

    pub(crate) fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub(crate) fn cloud(&self) -> &str {
        self.cloud.as_deref().unwrap_or(DEFAULT_CLOUD)
    }

    pub(crate) fn identity_endpoint(&self) -> String {
        match &self.identity_endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://iam.{}:443/v3", self.cloud()),
        }
    }

    pub(crate) fn delegation(&self) -> Option<Delegation> {
        match (&self.agency_name, &self.agency_domain_name) {
            (Some(agency_name), Some(agency_domain_name)) => Some(Delegation {
                agency_name: agency_name.clone(),
                agency_domain_name: agency_domain_name.clone(),
                delegated_project: self.delegated_project.clone(),
            }),
            _ => None,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

impl std::fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let censored = |v: &Option<String>| v.as_ref().map(|_| "[censored]");
        f.debug_struct("ProviderOptions")
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &censored(&self.secret_key))
            .field("security_token", &censored(&self.security_token))
            .field("token", &censored(&self.token))
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("password", &censored(&self.password))
            .field("domain_id", &self.domain_id)
            .field("domain_name", &self.domain_name)
            .field("tenant_id", &self.tenant_id)
            .field("tenant_name", &self.tenant_name)
            .field("agency_name", &self.agency_name)
            .field("agency_domain_name", &self.agency_domain_name)
            .field("delegated_project", &self.delegated_project)
            .field("identity_endpoint", &self.identity_endpoint)
            .field("cloud", &self.cloud)
            .field("insecure", &self.insecure)
            .field("ca_cert", &self.ca_cert)
            .field("client_cert", &self.client_cert)
            .field("client_key", &censored(&self.client_key))
            .field("max_retries", &self.max_retries)
            .field("backoff_policy", &self.backoff_policy)
            .field("region_client", &self.region_client)
            .field("enterprise_project_id", &self.enterprise_project_id)
            .field("shared_config_file", &self.shared_config_file)
            .field("profile", &self.profile)
            .field("endpoints", &self.endpoints)
            .field("metadata_endpoint", &self.metadata_endpoint)
            .finish()
    }
}
