//! AWS Signature Version 4 request signing, implemented by hand against the
//! algorithm spec.md §4.1 pins down exactly (canonical request layout, query
//! re-encoding rules, header canonicalization, and the four-step HMAC key
//! derivation chain). This is deliberately not delegated to a managed SDK:
//! the canonicalization rules themselves are the contract under test.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use snafu::ResultExt;

use crate::error::{ObjectStoreError, SigningSnafu};

type HmacSha256 = Hmac<Sha256>;

/// RFC3986 unreserved set: everything except `A-Z a-z 0-9 - . _ ~` is
/// percent-encoded, with uppercase hex digits (`percent_encoding`'s default).
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A request about to be signed: everything the canonical request needs.
pub struct RequestToSign<'a> {
    pub method: &'a str,
    /// Path only, already percent-encoded the way it will be sent on the wire.
    pub canonical_uri: &'a str,
    /// Raw query string, `a=b&c=d`, not yet canonicalized.
    pub raw_query: &'a str,
    /// Extra headers to sign, excluding `host` and `x-amz-date`/`x-amz-content-sha256`,
    /// which this module adds itself.
    pub extra_headers: &'a [(String, String)],
    pub host: &'a str,
    pub body: &'a [u8],
}

/// Output of signing: the `Authorization` header value plus the two
/// `x-amz-*` headers that must accompany it on the wire.
pub struct Signature {
    pub authorization: String,
    pub amz_date: String,
    pub amz_content_sha256: String,
}

/// Sign `request` for `service` (always `"s3"` here) in `region`, using
/// `access_key`/`secret_key`, at `now`.
pub fn sign(
    request: &RequestToSign<'_>,
    region: &str,
    service: &str,
    access_key: &str,
    secret_key: &str,
    now: DateTime<Utc>,
) -> Result<Signature, ObjectStoreError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let payload_hash = hex_sha256(request.body);

    let mut headers_to_sign = request.extra_headers.to_vec();
    headers_to_sign.push(("host".to_string(), request.host.to_string()));
    headers_to_sign.push(("x-amz-date".to_string(), amz_date.clone()));
    headers_to_sign.push((
        "x-amz-content-sha256".to_string(),
        payload_hash.clone(),
    ));

    let (canonical_headers, signed_headers) = canonicalize_headers(&headers_to_sign);
    let canonical_query = canonicalize_query(request.raw_query);

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.canonical_uri,
        canonical_query,
        canonical_headers,
        signed_headers,
        payload_hash,
    );

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes()),
    );

    let signing_key = derive_signing_key(secret_key, &date_stamp, region, service)?;
    let signature = hex_hmac(&signing_key, string_to_sign.as_bytes())?;

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
    );

    Ok(Signature {
        authorization,
        amz_date,
        amz_content_sha256: payload_hash,
    })
}

/// Hex SHA-256 of `bytes`; the empty body hashes to the well-known
/// SHA-256("") value.
pub fn hex_sha256(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

fn derive_signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, ObjectStoreError> {
    let k_date = hmac_raw(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_raw(&k_date, region.as_bytes())?;
    let k_service = hmac_raw(&k_region, service.as_bytes())?;
    hmac_raw(&k_service, b"aws4_request")
}

fn hmac_raw(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ObjectStoreError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).context(SigningSnafu)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex_hmac(key: &[u8], data: &[u8]) -> Result<String, ObjectStoreError> {
    Ok(hex_encode(&hmac_raw(key, data)?))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Lowercase header names, trim values, sort by name, join as
/// `name:value\n` lines, and return `(canonical_headers, signed_headers)`.
fn canonicalize_headers(headers: &[(String, String)]) -> (String, String) {
    let mut lowered: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    lowered.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical = lowered
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    let signed = lowered
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    (canonical, signed)
}

/// Split on `&`, percent-decode each key/value as UTF-8 (`+` as space,
/// `%XX` case-insensitive), then re-encode under the unreserved set and
/// sort byte-wise by `(encoded-key, encoded-value)`.
fn canonicalize_query(raw_query: &str) -> String {
    if raw_query.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<(String, String)> = raw_query
        .split('&')
        .filter(|component| !component.is_empty())
        .map(|component| {
            let mut split = component.splitn(2, '=');
            let key = split.next().unwrap_or("");
            let value = split.next().unwrap_or("");
            (canonicalize_query_component(key), canonicalize_query_component(value))
        })
        .collect();

    pairs.sort();

    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonicalize_query_component(component: &str) -> String {
    let space_normalized: String = component.chars().map(|c| if c == '+' { ' ' } else { c }).collect();
    let decoded_bytes: Vec<u8> = percent_decode_case_insensitive(&space_normalized);
    let decoded = String::from_utf8_lossy(&decoded_bytes);
    utf8_percent_encode(&decoded, UNRESERVED).to_string()
}

/// `percent_encoding::percent_decode` already treats `%XX` case-insensitively;
/// this wrapper exists to make that explicit at the call site.
fn percent_decode_case_insensitive(s: &str) -> Vec<u8> {
    percent_encoding::percent_decode_str(s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_body_hashes_to_known_constant() {
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn query_canonicalization_sorts_and_reencodes() {
        let raw = "b=2&a=1&a=0";
        let canon = canonicalize_query(raw);
        assert_eq!(canon, "a=0&a=1&b=2");
    }

    #[test]
    fn query_canonicalization_decodes_plus_as_space_then_reencodes() {
        let raw = "key=a+b";
        let canon = canonicalize_query(raw);
        assert_eq!(canon, "key=a%20b");
    }

    #[test]
    fn query_canonicalization_is_case_insensitive_on_percent_escapes() {
        let lower = canonicalize_query("k=a%2bb");
        let upper = canonicalize_query("k=a%2Bb");
        assert_eq!(lower, upper);
    }

    #[test]
    fn header_canonicalization_lowercases_and_sorts() {
        let headers = vec![
            ("X-Amz-Date".to_string(), " 20231114T000000Z ".to_string()),
            ("Host".to_string(), "example.com".to_string()),
        ];
        let (canonical, signed) = canonicalize_headers(&headers);
        assert_eq!(canonical, "host:example.com\nx-amz-date:20231114T000000Z\n");
        assert_eq!(signed, "host;x-amz-date");
    }

    proptest! {
        #[test]
        fn query_canonicalization_never_panics(raw in "[a-zA-Z0-9%+&=~._ -]{0,64}") {
            let _ = canonicalize_query(&raw);
        }
    }
}
