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

pub(crate) mod shared_config;

use crate::Result;
use crate::errors::Error;
use crate::options::ProviderOptions;
use time::OffsetDateTime;

/// Temporary credentials are reloaded when they expire within this window.
pub(crate) const REFRESH_MARGIN: time::Duration = time::Duration::seconds(600);

/// An access key / secret key pair.
///
/// Temporary credentials, such as those returned by the instance metadata
/// API, also carry a security token.
#[derive(Clone, PartialEq)]
pub struct AccessKey {
    access_key: String,
    secret_key: String,
    security_token: Option<String>,
}

impl AccessKey {
    pub fn new<A: Into<String>, S: Into<String>>(access_key: A, secret_key: S) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            security_token: None,
        }
    }

    pub fn with_security_token<T: Into<String>>(mut self, v: T) -> Self {
        self.security_token = Some(v.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn security_token(&self) -> Option<&str> {
        self.security_token.as_deref()
    }
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[censored]")
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "[censored]"),
            )
            .finish()
    }
}

/// Credentials obtained from the instance metadata API.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TemporaryCredential {
    pub(crate) access_key: AccessKey,
    pub(crate) expires_at: OffsetDateTime,
}

/// Returns true if credentials expiring at `expires_at` must be reloaded.
pub(crate) fn expires_soon(expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    now + REFRESH_MARGIN > expires_at
}

/// The source of the provider credentials.
///
/// Exactly one source is active. When the options populate more than one,
/// the first in declaration order wins.
#[derive(Clone, PartialEq)]
pub enum CredentialSource {
    /// An IAM token.
    Token(String),
    /// An access key / secret key pair.
    AccessKey(AccessKey),
    /// A password, for the user named by `username` or `user_id`.
    Password {
        username: Option<String>,
        user_id: Option<String>,
        password: String,
    },
    /// An `AKSK` profile in the CLI shared config file.
    SharedConfig {
        path: String,
        profile: Option<String>,
    },
    /// Temporary credentials from the ECS instance metadata API.
    Metadata,
}

impl CredentialSource {
    /// Selects the active credential source.
    ///
    /// # Errors
    /// Fails if a password is set without a username or user id. This check
    /// never makes network calls.
    pub fn from_options(options: &ProviderOptions) -> Result<Self> {
        let access_key = match (&options.access_key, &options.secret_key) {
            (Some(ak), Some(sk)) => Some(AccessKey {
                access_key: ak.clone(),
                secret_key: sk.clone(),
                security_token: options.security_token.clone(),
            }),
            _ => None,
        };
        let configured = [
            ("token", options.token.is_some()),
            ("access_key/secret_key", access_key.is_some()),
            ("password", options.password.is_some()),
            ("shared_config_file", options.shared_config_file.is_some()),
        ];
        let mut present = configured.iter().filter(|(_, set)| *set).map(|(n, _)| *n);
        if let Some(active) = present.next() {
            let ignored = present.collect::<Vec<_>>();
            if !ignored.is_empty() {
                tracing::warn!(
                    "using {active} credentials, ignoring the configured {}",
                    ignored.join(", ")
                );
            }
        }

        if let Some(token) = &options.token {
            return Ok(Self::Token(token.clone()));
        }
        if let Some(key) = access_key {
            return Ok(Self::AccessKey(key));
        }
        if let Some(password) = &options.password {
            if options.username.is_none() && options.user_id.is_none() {
                return Err(Error::configuration(
                    "\"password\": one of `user_name, user_id` must be specified",
                ));
            }
            return Ok(Self::Password {
                username: options.username.clone(),
                user_id: options.user_id.clone(),
                password: password.clone(),
            });
        }
        if let Some(path) = &options.shared_config_file {
            return Ok(Self::SharedConfig {
                path: path.clone(),
                profile: options.profile.clone(),
            });
        }
        Ok(Self::Metadata)
    }
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.debug_tuple("Token").field(&"[censored]").finish(),
            Self::AccessKey(key) => f.debug_tuple("AccessKey").field(key).finish(),
            Self::Password {
                username, user_id, ..
            } => f
                .debug_struct("Password")
                .field("username", username)
                .field("user_id", user_id)
                .field("password", &"[censored]")
                .finish(),
            Self::SharedConfig { path, profile } => f
                .debug_struct("SharedConfig")
                .field("path", path)
                .field("profile", profile)
                .finish(),
            Self::Metadata => f.write_str("Metadata"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn all_sources() -> ProviderOptions {
        ProviderOptions::default()
            .with_token("test-token")
            .with_access_key("test-ak")
            .with_secret_key("test-sk")
            .with_username("test-user")
            .with_password("test-password")
            .with_shared_config_file("/dev/null")
    }

    #[test]
    fn precedence() -> anyhow::Result<()> {
        let options = all_sources();
        assert_eq!(
            CredentialSource::from_options(&options)?,
            CredentialSource::Token("test-token".into())
        );

        let options = options.with_token("");
        assert_eq!(
            CredentialSource::from_options(&options)?,
            CredentialSource::AccessKey(AccessKey::new("test-ak", "test-sk"))
        );

        let options = options.with_secret_key("");
        assert_eq!(
            CredentialSource::from_options(&options)?,
            CredentialSource::Password {
                username: Some("test-user".into()),
                user_id: None,
                password: "test-password".into(),
            }
        );

        let options = options.with_password("").with_profile("test-profile");
        assert_eq!(
            CredentialSource::from_options(&options)?,
            CredentialSource::SharedConfig {
                path: "/dev/null".into(),
                profile: Some("test-profile".into()),
            }
        );

        let options = options.with_shared_config_file("");
        assert_eq!(
            CredentialSource::from_options(&options)?,
            CredentialSource::Metadata
        );
        Ok(())
    }

    #[test]
    fn access_key_carries_security_token() -> anyhow::Result<()> {
        let options = ProviderOptions::default()
            .with_access_key("test-ak")
            .with_secret_key("test-sk")
            .with_security_token("test-security-token");
        let got = CredentialSource::from_options(&options)?;
        let want = AccessKey::new("test-ak", "test-sk").with_security_token("test-security-token");
        assert_eq!(got, CredentialSource::AccessKey(want));
        Ok(())
    }

    #[test]
    fn password_requires_user() {
        let options = ProviderOptions::default().with_password("test-password");
        let err = CredentialSource::from_options(&options).unwrap_err();
        assert!(err.is_configuration(), "{err:?}");
        assert!(err.to_string().contains("user_name, user_id"), "{err}");
    }

    #[test]
    fn password_with_user_id() -> anyhow::Result<()> {
        let options = ProviderOptions::default()
            .with_user_id("test-user-id")
            .with_password("test-password");
        let got = CredentialSource::from_options(&options)?;
        assert!(
            matches!(got, CredentialSource::Password { ref user_id, .. } if user_id.as_deref() == Some("test-user-id")),
            "{got:?}"
        );
        Ok(())
    }

    #[test_case(599, true; "inside margin")]
    #[test_case(600, false; "at margin")]
    #[test_case(3600, false; "valid")]
    #[test_case(-10, true; "expired")]
    fn expiry(remaining_seconds: i64, want: bool) {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + time::Duration::seconds(remaining_seconds);
        assert_eq!(expires_soon(expires_at, now), want);
    }

    #[test]
    fn debug_censors_secrets() {
        let key = AccessKey::new("test-ak", "test-only-secret").with_security_token("test-only-st");
        let got = format!("{key:?}");
        assert!(got.contains("test-ak"), "{got}");
        assert!(!got.contains("test-only-secret"), "{got}");
        assert!(!got.contains("test-only-st"), "{got}");

        let got = format!("{:?}", CredentialSource::Token("test-only-token".into()));
        assert!(!got.contains("test-only-token"), "{got}");

        let got = format!(
            "{:?}",
            CredentialSource::Password {
                username: Some("test-user".into()),
                user_id: None,
                password: "test-only-password".into()
            }
        );
        assert!(got.contains("test-user"), "{got}");
        assert!(!got.contains("test-only-password"), "{got}");
    }
}
