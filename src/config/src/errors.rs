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

//! Errors returned while resolving credentials and building service clients.

use http::StatusCode;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for this crate.
///
/// Applications rarely need to branch on the details, but the `is_*`
/// predicates classify the failure when they do.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// Missing, contradictory, or otherwise invalid provider configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self.0, ErrorKind::Configuration(_))
    }

    /// A problem loading or using the CLI shared config file.
    pub fn is_shared_config(&self) -> bool {
        matches!(self.0, ErrorKind::SharedConfig(_))
    }

    /// A problem fetching credentials from the instance metadata API.
    pub fn is_metadata(&self) -> bool {
        matches!(self.0, ErrorKind::Metadata { .. })
    }

    /// The identity service rejected the credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(self.0, ErrorKind::Authentication(_))
    }

    /// A domain, user, or project lookup returned no results.
    pub fn is_not_found(&self) -> bool {
        matches!(self.0, ErrorKind::NotFound(_))
    }

    /// The service name is not in the catalog.
    pub fn is_unsupported_service(&self) -> bool {
        matches!(self.0, ErrorKind::UnsupportedService(_))
    }

    /// The CA or client certificate material is unreadable or malformed.
    pub fn is_tls(&self) -> bool {
        matches!(self.0, ErrorKind::Tls(_))
    }

    /// The request could not be sent, or the response could not be read.
    pub fn is_transport(&self) -> bool {
        matches!(self.0, ErrorKind::Transport(_))
    }

    /// The service responded with `429 Too Many Requests`.
    pub fn is_too_many_requests(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS)
    }

    /// The HTTP status code, if the service responded with an error.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.0 {
            ErrorKind::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn configuration<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Configuration(source.into()))
    }

    pub(crate) fn shared_config<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::SharedConfig(source.into()))
    }

    /// The metadata API failed while bootstrapping the provider credentials.
    pub(crate) fn metadata_bootstrap<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Metadata {
            context: "cannot fetch credentials from the ECS metadata API, AK/SK or an ECS agency must be provided",
            source: source.into(),
        })
    }

    /// The metadata API failed while reloading expiring credentials.
    pub(crate) fn metadata_refresh<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Metadata {
            context: "cannot reload credentials from the ECS metadata API",
            source: source.into(),
        })
    }

    pub(crate) fn authentication<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Authentication(source.into()))
    }

    pub(crate) fn not_found<T: Into<String>>(message: T) -> Error {
        Error(ErrorKind::NotFound(message.into()))
    }

    pub(crate) fn unsupported_service<T: Into<String>>(service: T) -> Error {
        Error(ErrorKind::UnsupportedService(service.into()))
    }

    pub(crate) fn tls<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Tls(source.into()))
    }

    pub(crate) fn transport<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Transport(source.into()))
    }

    pub(crate) fn serialization<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Serialization(source.into()))
    }

    pub(crate) fn from_status<T: Into<String>>(status: StatusCode, body: T) -> Error {
        Error(ErrorKind::Status {
            status,
            body: body.into(),
        })
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("invalid provider configuration: {0}")]
    Configuration(#[source] BoxError),
    #[error("cannot use the shared config file: {0}")]
    SharedConfig(#[source] BoxError),
    #[error("{context}: {source}")]
    Metadata {
        context: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("authentication failed: {0}")]
    Authentication(#[source] BoxError),
    #[error("{0}")]
    NotFound(String),
    #[error("service type {0} is invalid or not supported")]
    UnsupportedService(String),
    #[error("cannot build the TLS configuration: {0}")]
    Tls(#[source] BoxError),
    #[error("cannot send the request or read its response: {0}")]
    Transport(#[source] BoxError),
    #[error("cannot serialize the request body: {0}")]
    Serialization(#[source] BoxError),
    #[error("the service responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
}
