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

//! Signs requests with an access key using the `SDK-HMAC-SHA256` scheme.

use crate::Result;
use crate::credentials::AccessKey;
use crate::errors::Error;
use hmac::{Hmac, Mac};
use http::header::{AUTHORIZATION, HOST, HeaderName, HeaderValue};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const ALGORITHM: &str = "SDK-HMAC-SHA256";
const SDK_DATE: HeaderName = HeaderName::from_static("x-sdk-date");
const SECURITY_TOKEN: HeaderName = HeaderName::from_static("x-security-token");
const SDK_DATE_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

/// Everything but the RFC 3986 unreserved characters.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode(v: &str) -> String {
    utf8_percent_encode(v, ENCODE_SET).to_string()
}

fn header_value(v: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(v).map_err(Error::authentication)
}

/// Adds the date, host, and authorization headers to `request`.
pub(crate) fn sign(request: &mut reqwest::Request, key: &AccessKey, now: OffsetDateTime) -> Result<()> {
    let date = now
        .to_offset(UtcOffset::UTC)
        .format(SDK_DATE_FORMAT)
        .map_err(Error::authentication)?;
    let host = match (request.url().host_str(), request.url().port()) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (Some(h), None) => h.to_string(),
        (None, _) => return Err(Error::authentication("the request URL has no host")),
    };
    let headers = request.headers_mut();
    headers.insert(SDK_DATE, header_value(&date)?);
    headers.insert(HOST, header_value(&host)?);
    if let Some(token) = key.security_token() {
        headers.insert(SECURITY_TOKEN, header_value(token)?);
    }

    let (canonical_request, signed_headers) = canonical_request(request);
    let string_to_sign = [
        ALGORITHM.to_string(),
        date,
        hex::encode(Sha256::digest(canonical_request.as_bytes())),
    ]
    .join("\n");

    let mut mac = Hmac::<Sha256>::new_from_slice(key.secret_key().as_bytes())
        .map_err(Error::authentication)?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let authorization = format!(
        "{ALGORITHM} Access={}, SignedHeaders={signed_headers}, Signature={signature}",
        key.access_key()
    );
    request
        .headers_mut()
        .insert(AUTHORIZATION, header_value(&authorization)?);
    Ok(())
}

/// Returns the canonical request and the list of signed headers.
pub(crate) fn canonical_request(request: &reqwest::Request) -> (String, String) {
    let mut uri = request
        .url()
        .path()
        .split('/')
        .map(|s| encode(&percent_decode_str(s).decode_utf8_lossy()))
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }

    let mut query = request
        .url()
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .collect::<Vec<_>>();
    query.sort();
    let query = query
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut headers = request
        .headers()
        .iter()
        .map(|(k, v)| {
            let value = String::from_utf8_lossy(v.as_bytes()).trim().to_string();
            (k.as_str().to_ascii_lowercase(), value)
        })
        .collect::<Vec<_>>();
    headers.sort();
    let canonical_headers = headers
        .iter()
        .fold(String::new(), |acc, (k, v)| format!("{acc}{k}:{v}\n"));
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let body = request
        .body()
        .and_then(|b| b.as_bytes())
        .unwrap_or_default();

    let canonical = [
        request.method().as_str().to_string(),
        uri,
        query,
        canonical_headers,
        signed_headers.clone(),
        hex::encode(Sha256::digest(body)),
    ]
    .join("\n");
    (canonical, signed_headers)
}
