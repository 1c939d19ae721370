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

//! Builds the transport trust configuration from the certificate options.
//!
//! Each certificate option is either a file path or the PEM contents
//! themselves. Both forms produce the same configuration.

use crate::Result;
use crate::errors::Error;
use crate::options::ProviderOptions;
use reqwest::{Certificate, ClientBuilder, Identity};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::path::Path;

/// Returns the contents of the file at `value`, or `value` itself when no
/// such file exists.
pub(crate) fn read_path_or_contents(value: &str) -> Result<Vec<u8>> {
    let path = Path::new(value);
    if !path.is_file() {
        return Ok(value.as_bytes().to_vec());
    }
    std::fs::read(path).map_err(|e| Error::tls(format!("cannot read {value}: {e}")))
}

/// Applies the CA, client certificate, and verification options.
pub(crate) fn configure(builder: ClientBuilder, options: &ProviderOptions) -> Result<ClientBuilder> {
    let mut builder = builder;
    if let Some(ca) = &options.ca_cert {
        let roots = Certificate::from_pem_bundle(&read_path_or_contents(ca)?)
            .map_err(|e| Error::tls(format!("cannot parse the CA certificate: {e}")))?;
        if roots.is_empty() {
            return Err(Error::tls("the CA certificate contains no PEM certificates"));
        }
        // The configured CA replaces the built-in trust anchors.
        builder = builder.tls_certs_only(roots);
    }

    if options.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let (Some(cert), Some(key)) = (&options.client_cert, &options.client_key) {
        let cert = read_path_or_contents(cert)?;
        let key = read_path_or_contents(key)?;
        check_key_pair(&cert, &key)?;
        let mut pem = cert;
        pem.push(b'\n');
        pem.extend_from_slice(&key);
        let identity = Identity::from_pem(&pem)
            .map_err(|e| Error::tls(format!("cannot load the client certificate: {e}")))?;
        builder = builder.identity(identity);
    }
    Ok(builder)
}

/// Verifies the client certificate chain matches the private key.
fn check_key_pair(cert: &[u8], key: &[u8]) -> Result<()> {
    let chain = CertificateDer::pem_slice_iter(cert)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::tls(format!("cannot parse the client certificate: {e}")))?;
    if chain.is_empty() {
        return Err(Error::tls(
            "the client certificate contains no PEM certificates",
        ));
    }
    let key = PrivateKeyDer::from_pem_slice(key)
        .map_err(|e| Error::tls(format!("cannot parse the client key: {e}")))?;
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    rustls::sign::CertifiedKey::from_der(chain, key, &provider).map_err(|e| {
        Error::tls(format!(
            "the client certificate and key do not form a key pair: {e}"
        ))
    })?;
    Ok(())
}
