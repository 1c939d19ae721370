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

//! Turns the active credential source into a pair of identity clients.
//!
//! Token and password credentials are exchanged for project-scoped and
//! domain-scoped tokens. Access keys sign every request directly, unless an
//! agency is configured, in which case the access key is only used to
//! assume the agency.

use crate::Result;
use crate::client::{ClientCredentials, ClientKind, IdentityClient};
use crate::credentials::{AccessKey, CredentialSource, shared_config};
use crate::errors::Error;
use crate::http::Transport;
use crate::identity::{IssuedToken, TokenMethod, TokenScope, issue_token, list_projects};
use crate::mds::MetadataClient;
use crate::options::{Delegation, ProviderOptions};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// The project-scoped and domain-scoped identity clients.
#[derive(Clone, Debug)]
pub(crate) struct ClientPair {
    pub(crate) project: Arc<IdentityClient>,
    pub(crate) domain: Arc<IdentityClient>,
    /// The access key behind the clients, if any.
    pub(crate) access_key: Option<AccessKey>,
}

impl ClientPair {
    /// Returns true if the provider was configured with an access key,
    /// either directly or through an agency assumed with it. Only those
    /// credentials may address regions other than the provider region.
    pub(crate) fn uses_access_key(&self) -> bool {
        self.access_key.is_some()
    }
}

/// The result of [authenticate].
#[derive(Debug)]
pub(crate) struct Authenticated {
    /// The options, with any shared config profile applied.
    pub(crate) options: ProviderOptions,
    pub(crate) region: String,
    pub(crate) clients: ClientPair,
    /// The expiration time of metadata-sourced credentials.
    pub(crate) expires_at: Option<OffsetDateTime>,
}

enum Method {
    Token(TokenMethod),
    AccessKey(AccessKey),
    Metadata,
}

/// Builds the identity clients for `source`.
pub(crate) async fn authenticate(
    mut options: ProviderOptions,
    source: CredentialSource,
    transport: &Transport,
    metadata: &MetadataClient,
    cancel: &CancellationToken,
) -> Result<Authenticated> {
    let method = match source {
        CredentialSource::Token(token) => Method::Token(TokenMethod::Token(token)),
        CredentialSource::AccessKey(key) => Method::AccessKey(key),
        CredentialSource::Password {
            username,
            user_id,
            password,
        } => Method::Token(TokenMethod::Password {
            username,
            user_id,
            password,
            domain_id: options.domain_id.clone(),
            domain_name: options.domain_name.clone(),
        }),
        CredentialSource::SharedConfig { path, profile } => {
            let profile = shared_config::load(&path, profile.as_deref()).await?;
            if profile.access_key_id.is_empty() || profile.secret_access_key.is_empty() {
                return Err(Error::shared_config(format!(
                    "the profile {} in the shared config file has no access key",
                    profile.name
                )));
            }
            let key = AccessKey::new(&profile.access_key_id, &profile.secret_access_key)
                .with_security_token(&profile.security_token);
            options = shared_config::apply(profile, options);
            Method::AccessKey(key)
        }
        CredentialSource::Metadata => Method::Metadata,
    };

    let region = options
        .region()
        .map(str::to_string)
        .ok_or_else(|| Error::configuration("region should be provided"))?;

    let (clients, expires_at) = match method {
        Method::Token(method) => (
            token_clients(&options, transport, &region, method, cancel).await?,
            None,
        ),
        Method::AccessKey(key) => (
            access_key_clients(&options, transport, &region, key, None, cancel).await?,
            None,
        ),
        Method::Metadata => {
            let credential = metadata
                .security_key()
                .await
                .map_err(Error::metadata_bootstrap)?;
            let clients = access_key_clients(
                &options,
                transport,
                &region,
                credential.access_key,
                None,
                cancel,
            )
            .await?;
            (clients, Some(credential.expires_at))
        }
    };
    Ok(Authenticated {
        options,
        region,
        clients,
        expires_at,
    })
}

fn token_client(
    transport: &Transport,
    endpoint: &str,
    region: &str,
    kind: ClientKind,
    issued: IssuedToken,
) -> Arc<IdentityClient> {
    let client = IdentityClient::new(
        transport.clone(),
        endpoint,
        ClientCredentials::Token(issued.token),
        kind,
    )
    .with_project_id(issued.project_id)
    .with_domain_id(issued.domain_id)
    .with_region(Some(region));
    Arc::new(client)
}

fn domain_scope(options: &ProviderOptions) -> Option<TokenScope> {
    match (&options.domain_id, &options.domain_name) {
        (Some(id), _) => Some(TokenScope::DomainId(id.clone())),
        (None, Some(name)) => Some(TokenScope::DomainName(name.clone())),
        (None, None) => None,
    }
}

fn project_scope(options: &ProviderOptions, region: &str) -> TokenScope {
    match &options.tenant_id {
        Some(id) => TokenScope::ProjectId(id.clone()),
        None => TokenScope::ProjectName {
            name: options.tenant_name.clone().unwrap_or_else(|| region.to_string()),
            domain_id: options.domain_id.clone(),
            domain_name: options.domain_name.clone(),
        },
    }
}

/// Clients for token and password credentials.
async fn token_clients(
    options: &ProviderOptions,
    transport: &Transport,
    region: &str,
    method: TokenMethod,
    cancel: &CancellationToken,
) -> Result<ClientPair> {
    let endpoint = options.identity_endpoint();
    if let Some(delegation) = options.delegation() {
        let base = match method {
            TokenMethod::Token(token) => token,
            method => {
                let scope = domain_scope(options).unwrap_or(TokenScope::Unscoped);
                issue_token(transport, &endpoint, None, &method, &scope, cancel)
                    .await?
                    .token
            }
        };
        let auth = ClientCredentials::Token(base);
        return delegated_clients(transport, &endpoint, region, &auth, &delegation, None, cancel)
            .await;
    }

    let project = issue_token(
        transport,
        &endpoint,
        None,
        &method,
        &project_scope(options, region),
        cancel,
    )
    .await?;
    let domain = match domain_scope(options) {
        Some(scope) => issue_token(transport, &endpoint, None, &method, &scope, cancel).await?,
        None => project.clone(),
    };
    Ok(ClientPair {
        project: token_client(transport, &endpoint, region, ClientKind::Project, project),
        domain: token_client(transport, &endpoint, region, ClientKind::Domain, domain),
        access_key: None,
    })
}

/// Assumes the agency with `auth` and returns clients for the agency tokens.
async fn delegated_clients(
    transport: &Transport,
    endpoint: &str,
    region: &str,
    auth: &ClientCredentials,
    delegation: &Delegation,
    access_key: Option<AccessKey>,
    cancel: &CancellationToken,
) -> Result<ClientPair> {
    tracing::debug!(
        "assuming agency {} in domain {}",
        delegation.agency_name,
        delegation.agency_domain_name
    );
    let method = TokenMethod::AssumeRole {
        agency_name: delegation.agency_name.clone(),
        agency_domain_name: delegation.agency_domain_name.clone(),
    };
    let project_scope = TokenScope::ProjectName {
        name: delegation
            .delegated_project
            .clone()
            .unwrap_or_else(|| region.to_string()),
        domain_id: None,
        domain_name: Some(delegation.agency_domain_name.clone()),
    };
    let domain_scope = TokenScope::DomainName(delegation.agency_domain_name.clone());
    let project =
        issue_token(transport, endpoint, Some(auth), &method, &project_scope, cancel).await?;
    let domain =
        issue_token(transport, endpoint, Some(auth), &method, &domain_scope, cancel).await?;
    Ok(ClientPair {
        project: token_client(transport, endpoint, region, ClientKind::Project, project),
        domain: token_client(transport, endpoint, region, ClientKind::Domain, domain),
        access_key,
    })
}

/// Clients for access key credentials.
///
/// The project and domain ids are taken from the options, then from
/// `previous` when rebuilding the clients for refreshed credentials. A
/// missing project id is looked up by name.
pub(crate) async fn access_key_clients(
    options: &ProviderOptions,
    transport: &Transport,
    region: &str,
    key: AccessKey,
    previous: Option<&ClientPair>,
    cancel: &CancellationToken,
) -> Result<ClientPair> {
    let endpoint = options.identity_endpoint();
    let credentials = ClientCredentials::AccessKey(key.clone());
    if let Some(delegation) = options.delegation() {
        return delegated_clients(
            transport,
            &endpoint,
            region,
            &credentials,
            &delegation,
            Some(key),
            cancel,
        )
        .await;
    }

    let domain_id = options
        .domain_id
        .clone()
        .or_else(|| previous.and_then(|p| p.domain.domain_id().map(str::to_string)));
    let domain = IdentityClient::new(
        transport.clone(),
        &endpoint,
        credentials.clone(),
        ClientKind::Domain,
    )
    .with_domain_id(domain_id.clone())
    .with_region(Some(region));
    let project = IdentityClient::new(transport.clone(), &endpoint, credentials, ClientKind::Project)
        .with_domain_id(domain_id)
        .with_region(Some(region));

    let project_id = match options
        .tenant_id
        .clone()
        .or_else(|| previous.and_then(|p| p.project.project_id().map(str::to_string)))
    {
        Some(id) => id,
        None => {
            let name = options.tenant_name.as_deref().unwrap_or(region);
            let projects =
                list_projects(&project, cancel, options.domain_id.as_deref(), Some(name)).await?;
            projects
                .into_iter()
                .find(|p| p.name == name)
                .map(|p| p.id)
                .ok_or_else(|| {
                    Error::not_found(format!("cannot find the project with name {name}"))
                })?
        }
    };
    Ok(ClientPair {
        project: Arc::new(project.with_project_id(Some(project_id))),
        domain: Arc::new(domain),
        access_key: Some(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::tests::token_response;
    use crate::identity::token_request_body;
    use crate::mds::tests::{PATH, security_key_body};
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;
    use std::io::Write;

    type TestResult = anyhow::Result<()>;

    fn identity(server: &Server) -> String {
        server.url("/v3").to_string()
    }

    fn unreachable_metadata() -> MetadataClient {
        MetadataClient::new(Some("http://127.0.0.1:9/openstack/latest/securitykey".into()))
    }

    async fn run(options: ProviderOptions) -> Result<Authenticated> {
        let source = CredentialSource::from_options(&options)?;
        let transport = Transport::new(&options)?;
        authenticate(
            options,
            source,
            &transport,
            &unreachable_metadata(),
            &CancellationToken::new(),
        )
        .await
    }

    fn expect_token(
        server: &Server,
        method: &TokenMethod,
        scope: &TokenScope,
        token: &str,
        project_id: Option<&str>,
    ) {
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v3/auth/tokens"),
                request::body(json_decoded(eq(token_request_body(method, scope)))),
            ])
            .respond_with(token_response(token, project_id, "test-domain-id")),
        );
    }

    #[tokio::test]
    async fn region_is_required() {
        let options = ProviderOptions::default().with_token("test-token");
        let err = run(options).await.unwrap_err();
        assert!(err.is_configuration(), "{err:?}");
        assert!(err.to_string().contains("region"), "{err}");
    }

    #[tokio::test]
    async fn token_scoped_by_region() -> TestResult {
        let server = Server::run();
        let method = TokenMethod::Token("user-token".into());
        let project_scope = TokenScope::ProjectName {
            name: "cn-north-4".into(),
            domain_id: None,
            domain_name: Some("test-domain".into()),
        };
        expect_token(&server, &method, &project_scope, "project-token", Some("test-project-id"));
        expect_token(
            &server,
            &method,
            &TokenScope::DomainName("test-domain".into()),
            "domain-token",
            None,
        );

        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_token("user-token")
            .with_domain_name("test-domain")
            .with_identity_endpoint(identity(&server));
        let got = run(options).await?;
        assert_eq!(got.region, "cn-north-4");
        assert_eq!(got.expires_at, None);
        assert!(!got.clients.uses_access_key());
        assert_eq!(got.clients.project.project_id(), Some("test-project-id"));
        assert_eq!(got.clients.project.kind(), ClientKind::Project);
        assert_eq!(
            got.clients.project.credentials(),
            &ClientCredentials::Token("project-token".into())
        );
        assert_eq!(got.clients.domain.kind(), ClientKind::Domain);
        assert_eq!(got.clients.domain.domain_id(), Some("test-domain-id"));
        assert_eq!(
            got.clients.domain.credentials(),
            &ClientCredentials::Token("domain-token".into())
        );
        assert!(got.clients.access_key.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn token_without_domain_reuses_project_token() -> TestResult {
        let server = Server::run();
        let method = TokenMethod::Token("user-token".into());
        expect_token(
            &server,
            &method,
            &TokenScope::ProjectId("test-project-id".into()),
            "project-token",
            Some("test-project-id"),
        );

        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_token("user-token")
            .with_tenant_id("test-project-id")
            .with_identity_endpoint(identity(&server));
        let got = run(options).await?;
        assert_eq!(
            got.clients.domain.credentials(),
            &ClientCredentials::Token("project-token".into())
        );
        assert_eq!(got.clients.domain.region(), Some("cn-north-4"));
        Ok(())
    }

    #[tokio::test]
    async fn password_with_delegation() -> TestResult {
        let server = Server::run();
        let password = TokenMethod::Password {
            username: Some("test-user".into()),
            user_id: None,
            password: "test-password".into(),
            domain_id: None,
            domain_name: Some("test-domain".into()),
        };
        expect_token(
            &server,
            &password,
            &TokenScope::DomainName("test-domain".into()),
            "base-token",
            None,
        );
        let assume = TokenMethod::AssumeRole {
            agency_name: "test-agency".into(),
            agency_domain_name: "agency-domain".into(),
        };
        let project_scope = TokenScope::ProjectName {
            name: "delegated-project".into(),
            domain_id: None,
            domain_name: Some("agency-domain".into()),
        };
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v3/auth/tokens"),
                request::headers(contains(("x-auth-token", "base-token"))),
                request::body(json_decoded(eq(token_request_body(&assume, &project_scope)))),
            ])
            .respond_with(token_response("agency-project-token", Some("agency-project-id"), "agency-domain-id")),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v3/auth/tokens"),
                request::headers(contains(("x-auth-token", "base-token"))),
                request::body(json_decoded(eq(token_request_body(
                    &assume,
                    &TokenScope::DomainName("agency-domain".into())
                )))),
            ])
            .respond_with(token_response("agency-domain-token", None, "agency-domain-id")),
        );

        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_username("test-user")
            .with_password("test-password")
            .with_domain_name("test-domain")
            .with_agency_name("test-agency")
            .with_agency_domain_name("agency-domain")
            .with_delegated_project("delegated-project")
            .with_identity_endpoint(identity(&server));
        let got = run(options).await?;
        assert_eq!(got.clients.project.project_id(), Some("agency-project-id"));
        assert_eq!(
            got.clients.project.credentials(),
            &ClientCredentials::Token("agency-project-token".into())
        );
        assert_eq!(
            got.clients.domain.credentials(),
            &ClientCredentials::Token("agency-domain-token".into())
        );
        Ok(())
    }

    #[tokio::test]
    async fn token_rejected() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v3/auth/tokens"))
                .respond_with(status_code(401)),
        );
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_token("expired-token")
            .with_identity_endpoint(identity(&server));
        let err = run(options).await.unwrap_err();
        assert!(err.is_authentication(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn access_key_with_project_id() -> TestResult {
        // No identity calls are expected.
        let server = Server::run();
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_access_key("test-ak")
            .with_secret_key("test-sk")
            .with_tenant_id("test-project-id")
            .with_domain_id("test-domain-id")
            .with_identity_endpoint(identity(&server));
        let got = run(options).await?;
        assert!(got.clients.uses_access_key());
        assert_eq!(got.clients.project.project_id(), Some("test-project-id"));
        assert_eq!(got.clients.domain.domain_id(), Some("test-domain-id"));
        assert_eq!(
            got.clients.access_key,
            Some(AccessKey::new("test-ak", "test-sk"))
        );
        assert_eq!(got.clients.project.region(), Some("cn-north-4"));
        assert_eq!(
            got.clients.project.identity_endpoint(),
            identity(&server).as_str()
        );
        Ok(())
    }

    #[tokio::test]
    async fn access_key_looks_up_project() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v3/projects"),
                request::query(url_decoded(contains(("name", "cn-north-4")))),
                request::headers(contains((
                    "authorization",
                    matches("^SDK-HMAC-SHA256 Access=test-ak, ")
                ))),
                request::headers(not(contains(key("x-project-id")))),
            ])
            .respond_with(json_encoded(json!({
                "projects": [
                    {"id": "sub-project-id", "name": "cn-north-4_sub"},
                    {"id": "test-project-id", "name": "cn-north-4"},
                ],
            }))),
        );
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_access_key("test-ak")
            .with_secret_key("test-sk")
            .with_identity_endpoint(identity(&server));
        let got = run(options).await?;
        assert_eq!(got.clients.project.project_id(), Some("test-project-id"));
        Ok(())
    }

    #[tokio::test]
    async fn access_key_project_not_found() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v3/projects"))
                .respond_with(json_encoded(json!({"projects": []}))),
        );
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_tenant_name("missing-project")
            .with_access_key("test-ak")
            .with_secret_key("test-sk")
            .with_identity_endpoint(identity(&server));
        let err = run(options).await.unwrap_err();
        assert!(err.is_not_found(), "{err:?}");
        assert!(err.to_string().contains("missing-project"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn access_key_with_delegation() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v3/auth/tokens"),
                request::headers(contains((
                    "authorization",
                    matches("^SDK-HMAC-SHA256 Access=test-ak, ")
                ))),
            ])
            .times(2)
            .respond_with(token_response("agency-token", Some("agency-project-id"), "agency-domain-id")),
        );
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_access_key("test-ak")
            .with_secret_key("test-sk")
            .with_agency_name("test-agency")
            .with_agency_domain_name("agency-domain")
            .with_identity_endpoint(identity(&server));
        let got = run(options).await?;
        assert!(got.clients.uses_access_key());
        assert!(
            matches!(got.clients.project.credentials(), ClientCredentials::Token(t) if t == "agency-token"),
            "{:?}",
            got.clients.project
        );
        assert_eq!(got.clients.project.project_id(), Some("agency-project-id"));
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_reuses_previous_ids() -> TestResult {
        // No identity calls are expected.
        let server = Server::run();
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_identity_endpoint(identity(&server));
        let transport = Transport::new(&options)?;
        let cancel = CancellationToken::new();
        let previous = access_key_clients(
            &options.clone().with_tenant_id("test-project-id").with_domain_id("test-domain-id"),
            &transport,
            "cn-north-4",
            AccessKey::new("old-ak", "old-sk"),
            None,
            &cancel,
        )
        .await?;
        let got = access_key_clients(
            &options,
            &transport,
            "cn-north-4",
            AccessKey::new("new-ak", "new-sk").with_security_token("new-st"),
            Some(&previous),
            &cancel,
        )
        .await?;
        assert_eq!(got.project.project_id(), Some("test-project-id"));
        assert_eq!(got.domain.domain_id(), Some("test-domain-id"));
        assert_eq!(
            got.access_key.as_ref().and_then(AccessKey::security_token),
            Some("new-st")
        );
        Ok(())
    }

    #[tokio::test]
    async fn shared_config_profile() -> TestResult {
        let mut file = tempfile::NamedTempFile::new()?;
        let contents = json!({
            "current": "default",
            "profiles": [{
                "name": "default",
                "mode": "AKSK",
                "accessKeyId": "profile-ak",
                "secretAccessKey": "profile-sk",
                "region": "ap-southeast-1",
                "projectId": "profile-project-id",
            }],
        });
        file.write_all(contents.to_string().as_bytes())?;

        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_shared_config_file(file.path().to_string_lossy());
        let got = run(options).await?;
        assert_eq!(got.region, "ap-southeast-1");
        assert_eq!(got.clients.project.project_id(), Some("profile-project-id"));
        assert_eq!(
            got.clients.access_key,
            Some(AccessKey::new("profile-ak", "profile-sk"))
        );
        assert_eq!(got.options.access_key.as_deref(), Some("profile-ak"));
        Ok(())
    }

    #[tokio::test]
    async fn shared_config_profile_without_keys() -> TestResult {
        let mut file = tempfile::NamedTempFile::new()?;
        let contents = json!({
            "current": "default",
            "profiles": [{"name": "default", "mode": "AKSK"}],
        });
        file.write_all(contents.to_string().as_bytes())?;
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_shared_config_file(file.path().to_string_lossy());
        let err = run(options).await.unwrap_err();
        assert!(err.is_shared_config(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn metadata_credentials() -> TestResult {
        let server = Server::run();
        let expires_at = OffsetDateTime::now_utc().replace_nanosecond(0)? + time::Duration::hours(1);
        server.expect(
            Expectation::matching(request::method_path("GET", PATH))
                .respond_with(json_encoded(security_key_body("metadata-ak", expires_at))),
        );
        let options = ProviderOptions::default()
            .with_region("cn-north-4")
            .with_tenant_id("test-project-id")
            .with_identity_endpoint(identity(&server));
        let transport = Transport::new(&options)?;
        let metadata = MetadataClient::new(Some(server.url(PATH).to_string()));
        let got = authenticate(
            options,
            CredentialSource::Metadata,
            &transport,
            &metadata,
            &CancellationToken::new(),
        )
        .await?;
        assert_eq!(got.expires_at, Some(expires_at));
        let key = got.clients.access_key.as_ref().unwrap();
        assert_eq!(key.access_key(), "metadata-ak");
        assert_eq!(key.security_token(), Some("metadata-ak-security-token"));
        assert!(got.clients.uses_access_key());
        Ok(())
    }

    #[tokio::test]
    async fn metadata_unavailable() {
        let options = ProviderOptions::default().with_region("cn-north-4");
        let err = run(options).await.unwrap_err();
        assert!(err.is_metadata(), "{err:?}");
        assert!(err.to_string().contains("AK/SK"), "{err}");
    }
}
