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

//! HuaweiCloud Terraform Provider - Credential and Service Client Provisioning
//!
//! This crate resolves the provider-level credentials into a pair of
//! authenticated identity clients, and then hands out fully addressed
//! [ServiceClient] values to the resource and data source implementations.
//!
//! The credentials come from exactly one of the following sources, in
//! precedence order:
//!
//! 1. An IAM token.
//! 2. An access key / secret key pair, optionally with a security token.
//! 3. A username (or user id) and password.
//! 4. A profile in the shared config file written by the HuaweiCloud CLI.
//! 5. Temporary credentials from the ECS instance metadata API.
//!
//! # Example
//! ```no_run
//! # use huaweicloud_provider_config::{Config, options::ProviderOptions};
//! # async fn sample() -> huaweicloud_provider_config::Result<()> {
//! let options = ProviderOptions::from_env()?.with_region("cn-north-4");
//! let config = Config::new(options).await?;
//! let client = config.new_service_client("vpc", "cn-north-4").await?;
//! let response = client.get(&client.service_url(&["vpcs"])).await?;
//! # Ok(()) }
//! ```

pub mod errors;

/// The configuration surface consumed by this crate.
pub mod options;

/// Credential sources and the values they produce.
pub mod credentials;

/// The static catalog of reachable service families.
pub mod catalog;

/// Rate-limit retry and backoff policies.
pub mod retry;

pub mod client;

mod config;
pub use client::ServiceClient;
pub use config::{Config, ObjectStorage};

pub(crate) mod authenticator;
pub(crate) mod http;
pub(crate) mod identity;
pub(crate) mod mds;
pub(crate) mod regions;
pub(crate) mod signer;
pub(crate) mod tls;

/// A `Result` alias where the `Err` case is
/// `huaweicloud_provider_config::errors::Error`.
pub type Result<T> = std::result::Result<T, crate::errors::Error>;
