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

//! Calls to the identity (IAM) service: token issuance and entity listing.

use crate::Result;
use crate::client::{ClientCredentials, ClientScope, IdentityClient};
use crate::errors::Error;
use crate::http::Transport;
use http::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

const SUBJECT_TOKEN: &str = "x-subject-token";

/// The identity presented when requesting a token.
#[derive(Clone, PartialEq)]
pub(crate) enum TokenMethod {
    Password {
        username: Option<String>,
        user_id: Option<String>,
        password: String,
        domain_id: Option<String>,
        domain_name: Option<String>,
    },
    Token(String),
    AssumeRole {
        agency_name: String,
        agency_domain_name: String,
    },
}

impl std::fmt::Debug for TokenMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password {
                username, user_id, ..
            } => f
                .debug_struct("Password")
                .field("username", username)
                .field("user_id", user_id)
                .field("password", &"[censored]")
                .finish_non_exhaustive(),
            Self::Token(_) => f.debug_tuple("Token").field(&"[censored]").finish(),
            Self::AssumeRole {
                agency_name,
                agency_domain_name,
            } => f
                .debug_struct("AssumeRole")
                .field("agency_name", agency_name)
                .field("agency_domain_name", agency_domain_name)
                .finish(),
        }
    }
}

/// The scope of a requested token.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenScope {
    ProjectId(String),
    ProjectName {
        name: String,
        domain_id: Option<String>,
        domain_name: Option<String>,
    },
    DomainId(String),
    DomainName(String),
    Unscoped,
}

/// A token issued by the identity service.
#[derive(Clone, PartialEq)]
pub(crate) struct IssuedToken {
    pub(crate) token: String,
    pub(crate) project_id: Option<String>,
    pub(crate) domain_id: Option<String>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[censored]")
            .field("project_id", &self.project_id)
            .field("domain_id", &self.domain_id)
            .finish()
    }
}

fn domain_ref(id: &Option<String>, name: &Option<String>) -> Option<Value> {
    match (id, name) {
        (Some(id), _) => Some(json!({"id": id})),
        (None, Some(name)) => Some(json!({"name": name})),
        (None, None) => None,
    }
}

fn identity_body(method: &TokenMethod) -> Value {
    match method {
        TokenMethod::Password {
            username,
            user_id,
            password,
            domain_id,
            domain_name,
        } => {
            let user = match (user_id, username) {
                (Some(id), _) => json!({"id": id, "password": password}),
                (None, name) => {
                    let mut user = json!({"name": name, "password": password});
                    if let Some(domain) = domain_ref(domain_id, domain_name) {
                        user["domain"] = domain;
                    }
                    user
                }
            };
            json!({"methods": ["password"], "password": {"user": user}})
        }
        TokenMethod::Token(token) => json!({"methods": ["token"], "token": {"id": token}}),
        TokenMethod::AssumeRole {
            agency_name,
            agency_domain_name,
        } => json!({
            "methods": ["assume_role"],
            "assume_role": {
                "agency_name": agency_name,
                "domain_name": agency_domain_name,
            }
        }),
    }
}

fn scope_body(scope: &TokenScope) -> Option<Value> {
    match scope {
        TokenScope::ProjectId(id) => Some(json!({"project": {"id": id}})),
        TokenScope::ProjectName {
            name,
            domain_id,
            domain_name,
        } => {
            let mut project = json!({"name": name});
            if let Some(domain) = domain_ref(domain_id, domain_name) {
                project["domain"] = domain;
            }
            Some(json!({"project": project}))
        }
        TokenScope::DomainId(id) => Some(json!({"domain": {"id": id}})),
        TokenScope::DomainName(name) => Some(json!({"domain": {"name": name}})),
        TokenScope::Unscoped => None,
    }
}

pub(crate) fn token_request_body(method: &TokenMethod, scope: &TokenScope) -> Value {
    let mut auth = json!({"identity": identity_body(method)});
    if let Some(scope) = scope_body(scope) {
        auth["scope"] = scope;
    }
    json!({"auth": auth})
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenBody {
    project: Option<ScopedProject>,
    domain: Option<Entity>,
    user: Option<TokenUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScopedProject {
    id: String,
    domain: Option<Entity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenUser {
    domain: Option<Entity>,
}

/// Requests a token from `POST {identity}/auth/tokens`.
///
/// `auth` authorizes the request itself, which only `assume_role` needs.
pub(crate) async fn issue_token(
    transport: &Transport,
    identity_endpoint: &str,
    auth: Option<&ClientCredentials>,
    method: &TokenMethod,
    scope: &TokenScope,
    cancel: &CancellationToken,
) -> Result<IssuedToken> {
    let url = format!("{identity_endpoint}/auth/tokens");
    let body = serde_json::to_vec(&token_request_body(method, scope)).map_err(Error::serialization)?;
    let response = transport
        .execute(cancel, |client| {
            let mut request = client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .build()
                .map_err(Error::transport)?;
            if let Some(auth) = auth {
                auth.apply(&mut request)?;
            }
            Ok(request)
        })
        .await
        .map_err(|e| match e.status() {
            Some(_) => Error::authentication(e),
            None => e,
        })?;

    let token = response
        .headers()
        .get(SUBJECT_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::authentication("the identity service response has no X-Subject-Token"))?;
    let body = response
        .json::<TokenResponse>()
        .await
        .map_err(Error::transport)?
        .token;

    let project_domain = body.project.as_ref().and_then(|p| p.domain.as_ref());
    let domain_id = project_domain
        .or(body.domain.as_ref())
        .or(body.user.as_ref().and_then(|u| u.domain.as_ref()))
        .map(|d| d.id.clone())
        .filter(|id| !id.is_empty());
    let project_id = body
        .project
        .map(|p| p.id)
        .filter(|id| !id.is_empty());
    tracing::debug!("issued a token for {method:?}, project_id={project_id:?}, domain_id={domain_id:?}");
    Ok(IssuedToken {
        token,
        project_id,
        domain_id,
    })
}

/// An identity entity: a domain, a project, or a user.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub(crate) struct Entity {
    pub(crate) id: String,
    pub(crate) name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Links {
    next: Option<String>,
}

/// Lists `collection` starting at `url`, following `links.next`.
async fn list_all(
    client: &IdentityClient,
    cancel: &CancellationToken,
    url: String,
    query: &[(&str, &str)],
    collection: &str,
) -> Result<Vec<Entity>> {
    let scope = ClientScope::default();
    let mut all = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(url);
    let mut first = true;
    while let Some(url) = next.take() {
        // The `next` link already carries the query parameters.
        let params = if first { query } else { &[] };
        first = false;
        visited.insert(url.clone());
        let page = client
            .send(&scope, cancel, Method::GET, &url, params, None)
            .await?
            .json::<Value>()
            .await
            .map_err(Error::transport)?;
        let items = page
            .get(collection)
            .cloned()
            .map(serde_json::from_value::<Vec<Entity>>)
            .transpose()
            .map_err(Error::transport)?
            .unwrap_or_default();
        all.extend(items);
        let links = page
            .get("links")
            .cloned()
            .map(serde_json::from_value::<Links>)
            .transpose()
            .map_err(Error::transport)?
            .unwrap_or_default();
        next = links.next.filter(|n| !n.is_empty());
        if let Some(link) = next.take_if(|n| visited.contains(n.as_str())) {
            tracing::debug!("stopped listing {collection}, {link} was already visited");
        }
    }
    Ok(all)
}

/// Lists the projects visible to `client`, filtered by domain and name.
pub(crate) async fn list_projects(
    client: &IdentityClient,
    cancel: &CancellationToken,
    domain_id: Option<&str>,
    name: Option<&str>,
) -> Result<Vec<Entity>> {
    let url = format!("{}/projects", client.identity_endpoint());
    let mut query = Vec::new();
    if let Some(id) = domain_id {
        query.push(("domain_id", id));
    }
    if let Some(name) = name {
        query.push(("name", name));
    }
    list_all(client, cancel, url, &query, "projects").await
}

/// Lists the domains the credentials can access.
pub(crate) async fn list_domains(
    client: &IdentityClient,
    cancel: &CancellationToken,
) -> Result<Vec<Entity>> {
    let url = format!("{}/auth/domains", client.identity_endpoint());
    list_all(client, cancel, url, &[], "domains").await
}

/// Lists the users with the given name.
pub(crate) async fn list_users(
    client: &IdentityClient,
    cancel: &CancellationToken,
    name: &str,
) -> Result<Vec<Entity>> {
    let url = format!("{}/users", client.identity_endpoint());
    list_all(client, cancel, url, &[("name", name)], "users").await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::ClientKind;
    use crate::options::ProviderOptions;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    pub(crate) fn token_response(
        token: &str,
        project_id: Option<&str>,
        domain_id: &str,
    ) -> impl httptest::responders::Responder + use<> {
        let body = match project_id {
            Some(id) => json!({"token": {
                "project": {"id": id, "name": "cn-north-4", "domain": {"id": domain_id}},
                "user": {"domain": {"id": domain_id}},
            }}),
            None => json!({"token": {
                "domain": {"id": domain_id, "name": "test-domain"},
                "user": {"domain": {"id": domain_id}},
            }}),
        };
        status_code(201)
            .insert_header("X-Subject-Token", token.to_string())
            .insert_header("content-type", "application/json")
            .body(body.to_string())
    }

    fn client(server: &Server) -> anyhow::Result<IdentityClient> {
        Ok(IdentityClient::new(
            Transport::new(&ProviderOptions::default())?,
            server.url("/v3").to_string(),
            ClientCredentials::Token("test-token".into()),
            ClientKind::Domain,
        ))
    }

    #[test]
    fn password_body() {
        let method = TokenMethod::Password {
            username: Some("test-user".into()),
            user_id: None,
            password: "test-password".into(),
            domain_id: None,
            domain_name: Some("test-domain".into()),
        };
        let scope = TokenScope::ProjectName {
            name: "cn-north-4".into(),
            domain_id: None,
            domain_name: Some("test-domain".into()),
        };
        let got = token_request_body(&method, &scope);
        let want = json!({"auth": {
            "identity": {
                "methods": ["password"],
                "password": {"user": {
                    "name": "test-user",
                    "password": "test-password",
                    "domain": {"name": "test-domain"},
                }},
            },
            "scope": {"project": {"name": "cn-north-4", "domain": {"name": "test-domain"}}},
        }});
        assert_eq!(got, want);
    }

    #[test]
    fn password_body_user_id() {
        let method = TokenMethod::Password {
            username: Some("ignored".into()),
            user_id: Some("test-user-id".into()),
            password: "test-password".into(),
            domain_id: Some("test-domain-id".into()),
            domain_name: None,
        };
        let got = token_request_body(&method, &TokenScope::Unscoped);
        let want = json!({"auth": {"identity": {
            "methods": ["password"],
            "password": {"user": {"id": "test-user-id", "password": "test-password"}},
        }}});
        assert_eq!(got, want);
    }

    #[test]
    fn assume_role_body() {
        let method = TokenMethod::AssumeRole {
            agency_name: "test-agency".into(),
            agency_domain_name: "test-agency-domain".into(),
        };
        let got = token_request_body(&method, &TokenScope::DomainName("test-agency-domain".into()));
        let want = json!({"auth": {
            "identity": {
                "methods": ["assume_role"],
                "assume_role": {"agency_name": "test-agency", "domain_name": "test-agency-domain"},
            },
            "scope": {"domain": {"name": "test-agency-domain"}},
        }});
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn issue_token_success() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v3/auth/tokens"),
                request::body(json_decoded(eq(json!({"auth": {
                    "identity": {"methods": ["token"], "token": {"id": "user-token"}},
                    "scope": {"project": {"id": "test-project-id"}},
                }})))),
            ])
            .respond_with(token_response("scoped-token", Some("test-project-id"), "test-domain-id")),
        );
        let transport = Transport::new(&ProviderOptions::default())?;
        let got = issue_token(
            &transport,
            &server.url("/v3").to_string(),
            None,
            &TokenMethod::Token("user-token".into()),
            &TokenScope::ProjectId("test-project-id".into()),
            &CancellationToken::new(),
        )
        .await?;
        assert_eq!(
            got,
            IssuedToken {
                token: "scoped-token".into(),
                project_id: Some("test-project-id".into()),
                domain_id: Some("test-domain-id".into()),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn issue_token_authorized() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v3/auth/tokens"),
                request::headers(contains(("x-auth-token", "base-token"))),
            ])
            .respond_with(token_response("agency-token", None, "agency-domain-id")),
        );
        let transport = Transport::new(&ProviderOptions::default())?;
        let got = issue_token(
            &transport,
            &server.url("/v3").to_string(),
            Some(&ClientCredentials::Token("base-token".into())),
            &TokenMethod::AssumeRole {
                agency_name: "test-agency".into(),
                agency_domain_name: "test-agency-domain".into(),
            },
            &TokenScope::DomainName("test-agency-domain".into()),
            &CancellationToken::new(),
        )
        .await?;
        assert_eq!(got.token, "agency-token");
        assert_eq!(got.project_id, None);
        assert_eq!(got.domain_id.as_deref(), Some("agency-domain-id"));
        Ok(())
    }

    #[tokio::test]
    async fn issue_token_rejected() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v3/auth/tokens"))
                .respond_with(status_code(401).body("bad password")),
        );
        let transport = Transport::new(&ProviderOptions::default())?;
        let err = issue_token(
            &transport,
            &server.url("/v3").to_string(),
            None,
            &TokenMethod::Token("user-token".into()),
            &TokenScope::Unscoped,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.is_authentication(), "{err:?}");
        assert!(err.to_string().contains("bad password"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn issue_token_missing_header() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v3/auth/tokens"))
                .respond_with(json_encoded(json!({"token": {}}))),
        );
        let transport = Transport::new(&ProviderOptions::default())?;
        let err = issue_token(
            &transport,
            &server.url("/v3").to_string(),
            None,
            &TokenMethod::Token("user-token".into()),
            &TokenScope::Unscoped,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.is_authentication(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn list_projects_follows_links() -> anyhow::Result<()> {
        let server = Server::run();
        let page2 = server.url("/v3/projects?page=2").to_string();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v3/projects"),
                request::query(url_decoded(contains(("domain_id", "test-domain-id")))),
                request::query(url_decoded(contains(("name", "cn-north-4")))),
            ])
            .respond_with(json_encoded(json!({
                "projects": [{"id": "p1", "name": "cn-north-4"}],
                "links": {"next": page2, "self": "ignored"},
            }))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v3/projects"),
                request::query(url_decoded(contains(("page", "2")))),
            ])
            .respond_with(json_encoded(json!({
                "projects": [{"id": "p2", "name": "cn-north-4_sub"}],
                "links": {"next": null},
            }))),
        );
        let got = list_projects(
            &client(&server)?,
            &CancellationToken::new(),
            Some("test-domain-id"),
            Some("cn-north-4"),
        )
        .await?;
        let names = got.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["cn-north-4", "cn-north-4_sub"]);
        Ok(())
    }

    #[tokio::test]
    async fn list_projects_stops_on_repeated_links() -> anyhow::Result<()> {
        let server = Server::run();
        let page2 = server.url("/v3/projects?page=2").to_string();
        let page3 = server.url("/v3/projects?page=3").to_string();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v3/projects"),
                request::query(url_decoded(contains(("name", "cn-north-4")))),
            ])
            .times(1)
            .respond_with(json_encoded(json!({
                "projects": [{"id": "p1", "name": "cn-north-4"}],
                "links": {"next": page2},
            }))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v3/projects"),
                request::query(url_decoded(contains(("page", "2")))),
            ])
            .times(1)
            .respond_with(json_encoded(json!({
                "projects": [{"id": "p2", "name": "cn-north-4_a"}],
                "links": {"next": page3},
            }))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v3/projects"),
                request::query(url_decoded(contains(("page", "3")))),
            ])
            .times(1)
            .respond_with(json_encoded(json!({
                "projects": [{"id": "p3", "name": "cn-north-4_b"}],
                "links": {"next": page2},
            }))),
        );
        let got = list_projects(
            &client(&server)?,
            &CancellationToken::new(),
            None,
            Some("cn-north-4"),
        )
        .await?;
        let ids = got.iter().map(|e| e.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        Ok(())
    }

    #[tokio::test]
    async fn list_domains_and_users() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v3/auth/domains")).respond_with(
                json_encoded(json!({"domains": [{"id": "d1", "name": "test-domain"}]})),
            ),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v3/users"),
                request::query(url_decoded(contains(("name", "test-user")))),
            ])
            .respond_with(json_encoded(json!({
                "users": [{"id": "u1", "name": "test-user", "enabled": true}],
                "links": {"self": "ignored"},
            }))),
        );
        let client = client(&server)?;
        let cancel = CancellationToken::new();
        let domains = list_domains(&client, &cancel).await?;
        assert_eq!(
            domains,
            vec![Entity {
                id: "d1".into(),
                name: "test-domain".into()
            }]
        );
        let users = list_users(&client, &cancel, "test-user").await?;
        assert_eq!(users.first().map(|u| u.id.as_str()), Some("u1"));
        Ok(())
    }

    #[test]
    fn debug_censors_secrets() {
        let method = TokenMethod::Password {
            username: Some("test-user".into()),
            user_id: None,
            password: "test-only-password".into(),
            domain_id: None,
            domain_name: None,
        };
        let got = format!("{method:?}");
        assert!(!got.contains("test-only-password"), "{got}");
        let got = format!("{:?}", TokenMethod::Token("test-only-token".into()));
        assert!(!got.contains("test-only-token"), "{got}");
        let got = format!(
            "{:?}",
            IssuedToken {
                token: "test-only-token".into(),
                project_id: None,
                domain_id: None
            }
        );
        assert!(!got.contains("test-only-token"), "{got}");
    }
}
