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

//! Profiles from the shared config file written by the HuaweiCloud CLI.
//!
//! The file looks like:
//! ```json
//! {
//!   "current": "default",
//!   "profiles": [
//!     { "name": "default", "mode": "AKSK", "accessKeyId": "...", "secretAccessKey": "..." }
//!   ]
//! }
//! ```

use crate::Result;
use crate::errors::Error;
use crate::options::ProviderOptions;
use serde::Deserialize;
use std::path::PathBuf;

const ACCESS_KEY_MODE: &str = "AKSK";

#[derive(Clone, Debug, Default, Deserialize)]
struct SharedConfig {
    #[serde(default)]
    current: String,
    #[serde(default)]
    profiles: Vec<Profile>,
}

#[derive(Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct Profile {
    pub(crate) name: String,
    pub(crate) mode: String,
    pub(crate) access_key_id: String,
    pub(crate) secret_access_key: String,
    pub(crate) security_token: String,
    pub(crate) region: String,
    pub(crate) project_id: String,
    pub(crate) domain_id: String,
    pub(crate) agency_domain_id: String,
    pub(crate) agency_domain_name: String,
    pub(crate) agency_name: String,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[censored]")
            .field("security_token", &"[censored]")
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .field("domain_id", &self.domain_id)
            .field("agency_domain_id", &self.agency_domain_id)
            .field("agency_domain_name", &self.agency_domain_name)
            .field("agency_name", &self.agency_name)
            .finish()
    }
}

/// Expands a leading `~` using `HOME`.
fn expand_home(path: &str) -> Result<PathBuf> {
    let rest = match path.strip_prefix('~') {
        None => return Ok(PathBuf::from(path)),
        Some(rest) => rest,
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        return Err(Error::shared_config(format!(
            "cannot expand the user-specific home dir in {path}"
        )));
    }
    let home = std::env::var("HOME")
        .map_err(|_| Error::shared_config(format!("cannot expand {path}, HOME is not set")))?;
    Ok(PathBuf::from(format!("{home}{rest}")))
}

/// Loads the selected profile from the shared config file.
///
/// Without an explicit `profile` the file's `current` profile is used.
pub(crate) async fn load(path: &str, profile: Option<&str>) -> Result<Profile> {
    let path = expand_home(path)?;
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::shared_config(format!(
                "the specified shared config file {} does not exist",
                path.display()
            )));
        }
        Err(e) => return Err(Error::shared_config(e)),
    };
    let config: SharedConfig = serde_json::from_str(&contents).map_err(Error::shared_config)?;

    let current = profile.unwrap_or(config.current.as_str());
    let selected = config
        .profiles
        .into_iter()
        .find(|p| p.name == current)
        .ok_or_else(|| {
            Error::shared_config(format!(
                "cannot find profile {current} in the shared config file"
            ))
        })?;
    if selected.mode != ACCESS_KEY_MODE {
        return Err(Error::shared_config(format!(
            "unsupported mode {} in the shared config file",
            selected.mode
        )));
    }
    tracing::debug!("using profile {} from {}", selected.name, path.display());
    Ok(selected)
}

/// Copies the profile credentials into the provider options.
///
/// The access key and secret key always replace the configured values. The
/// region, domain id, project id, and security token are only copied when
/// the profile sets them.
pub(crate) fn apply(profile: Profile, options: ProviderOptions) -> ProviderOptions {
    let mut options = options
        .with_access_key(profile.access_key_id)
        .with_secret_key(profile.secret_access_key);
    if !profile.region.is_empty() {
        options = options.with_region(profile.region);
    }
    if !profile.domain_id.is_empty() {
        options = options.with_domain_id(profile.domain_id);
    }
    if !profile.project_id.is_empty() {
        options = options.with_tenant_id(profile.project_id);
    }
    if !profile.security_token.is_empty() {
        options = options.with_security_token(profile.security_token);
    }
    options
}
