//! S3 pre-signed URLs using the legacy signature version 2 query-string scheme.
//!
//! The signature is `Base64(HMAC-SHA1(secret, string_to_sign))` where:
//!
//! ```text
//! string_to_sign = HTTP-Verb + "\n" +
//!                  "\n" +                 (Content-MD5, always empty)
//!                  "\n" +                 (Content-Type, always empty)
//!                  Expires + "\n" +
//!                  CanonicalizedResource
//! ```
//!
//! The signed URL carries `AWSAccessKeyId`, `Expires` and `Signature` as query
//! parameters. SHA-1 is mandated by the scheme; only use it where the remote
//! service offers nothing newer.
//!
//! reference: https://docs.aws.amazon.com/AmazonS3/latest/userguide/RESTAuthentication.html#RESTAuthenticationQueryStringAuth
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};
use url::Url;
use urlencoding::encode as url_encode;

/// Query parameters by name; values keep the order they had in the URL.
pub type QueryMap = BTreeMap<String, Vec<String>>;

type HmacSha1 = Hmac<Sha1>;

pub const ACCESS_KEY_ID_PARAM: &str = "AWSAccessKeyId";
pub const EXPIRES_PARAM: &str = "Expires";
pub const SIGNATURE_PARAM: &str = "Signature";

/// Sub-resources that take part in the canonicalized resource, lowercase and
/// sorted. Every other query parameter is left out of the signature.
pub const SIGNED_SUB_RESOURCES: &[&str] = &[
    "acl",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partnumber",
    "policy",
    "requestpayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "torrent",
    "uploadid",
    "uploads",
    "versionid",
    "versioning",
    "versions",
    "website",
];

#[macro_use]
extern crate error_chain;
pub mod errors {
    error_chain! {
        errors {
            UnparsableUrl(url: String) {
                description("unparsable url")
                display("unparsable url: '{}'", url)
            }
            InvalidDuration(duration: String) {
                description("invalid duration")
                display("invalid duration: '{}'", duration)
            }
        }
    }
}

pub use errors::{Error, ErrorKind, Result, ResultExt};

// -----------------------------------------------------------------------------
/// Returns `true` if `name` is a signed sub-resource, ignoring ASCII case.
pub fn is_signed_sub_resource(name: &str) -> bool {
    SIGNED_SUB_RESOURCES
        .iter()
        .any(|sub_resource| sub_resource.eq_ignore_ascii_case(name))
}

// -----------------------------------------------------------------------------
/// Collect the decoded query pairs of `url`, grouping repeated names.
pub fn query_map(url: &Url) -> QueryMap {
    let mut query = QueryMap::new();
    url.query_pairs().for_each(|(k, v)| {
        query.entry(k.into_owned()).or_default().push(v.into_owned());
    });
    query
}

// -----------------------------------------------------------------------------
/// Escape a query name or value: everything but ASCII alphanumerics and
/// `-._~` is percent-encoded, and a space becomes `+`.
pub fn query_escape(s: &str) -> String {
    url_encode(s).replace("%20", "+")
}

// -----------------------------------------------------------------------------
/// Encode a query map as `name=value` pairs joined by `&`, sorted by name.
/// A name with several values is emitted once per value.
pub fn encode_query(query: &QueryMap) -> String {
    query
        .iter()
        .flat_map(|(k, values)| {
            values
                .iter()
                .map(move |v| format!("{}={}", query_escape(k), query_escape(v)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

// -----------------------------------------------------------------------------
/// Generate the canonical query string: only signed sub-resources, under their
/// lowercase name. Empty when no parameter qualifies.
pub fn canonical_query_string(query: &QueryMap) -> String {
    let mut signed = QueryMap::new();
    for (name, values) in query {
        if is_signed_sub_resource(name) {
            signed
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(values.iter().cloned());
        } else {
            trace!(parameter = %name, "query parameter left out of signature");
        }
    }
    encode_query(&signed)
}

// -----------------------------------------------------------------------------
/// Generate the canonicalized resource from an already percent-encoded path.
pub fn canonicalized_resource(path: &str, query: &QueryMap) -> String {
    let canonical_query = canonical_query_string(query);
    if canonical_query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, canonical_query)
    }
}

// -----------------------------------------------------------------------------
/// Generate the "string to sign". Content-MD5 and Content-Type are left blank.
pub fn string_to_sign(method: &str, expires: i64, canonicalized_resource: &str) -> String {
    format!(
        "{method}\n\n\n{expires}\n{resource}",
        method = method,
        expires = expires,
        resource = canonicalized_resource
    )
}

// -----------------------------------------------------------------------------
fn hmac_sha1_base64(secret: &[u8], message: &str) -> Result<String> {
    let mut hmac = HmacSha1::new_from_slice(secret).chain_err(|| "error hashing secret key")?;
    hmac.update(message.as_bytes());
    Ok(BASE64.encode(hmac.finalize().into_bytes()))
}

// -----------------------------------------------------------------------------
/// Compute the base64 signature for a request.
pub fn sign(
    method: &str,
    expires: i64,
    path: &str,
    query: &QueryMap,
    secret: &[u8],
) -> Result<String> {
    let resource = canonicalized_resource(path, query);
    let string_to_sign = string_to_sign(method, expires, &resource);
    debug!(string_to_sign = ?string_to_sign, "built string to sign");
    hmac_sha1_base64(secret, &string_to_sign)
}

// -----------------------------------------------------------------------------
/// Everything one signature is computed from.
#[derive(Clone)]
pub struct SigningRequest {
    pub path: String,
    pub query: QueryMap,
    pub method: String,
    pub expires: i64,
    pub secret: Vec<u8>,
}

impl SigningRequest {
    pub fn from_url(url: &Url, method: &str, expires: i64, secret: &[u8]) -> Self {
        SigningRequest {
            path: url.path().to_string(),
            query: query_map(url),
            method: method.to_string(),
            expires,
            secret: secret.to_vec(),
        }
    }

    pub fn canonicalized_resource(&self) -> String {
        canonicalized_resource(&self.path, &self.query)
    }

    pub fn string_to_sign(&self) -> String {
        string_to_sign(&self.method, self.expires, &self.canonicalized_resource())
    }

    pub fn signature(&self) -> Result<String> {
        sign(
            &self.method,
            self.expires,
            &self.path,
            &self.query,
            &self.secret,
        )
    }
}

impl fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRequest")
            .field("path", &self.path)
            .field("query", &self.query)
            .field("method", &self.method)
            .field("expires", &self.expires)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// -----------------------------------------------------------------------------
/// Unix time, in seconds, `validity` after `date_time`.
pub fn expiration(date_time: &DateTime<Utc>, validity: std::time::Duration) -> Result<i64> {
    let invalid = || ErrorKind::InvalidDuration(format!("{:?}", validity));
    let delta = chrono::Duration::from_std(validity).chain_err(invalid)?;
    let expires = date_time.checked_add_signed(delta).ok_or_else(invalid)?;
    Ok(expires.timestamp())
}

// -----------------------------------------------------------------------------
/// Parse an absolute URL.
pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).chain_err(|| ErrorKind::UnparsableUrl(url.to_string()))
}

//------------------------------------------------------------------------------
/// Generate pre-signed URL
///
/// `AWSAccessKeyId`, `Expires` and `Signature` replace any values already in
/// the query, and the whole query is re-encoded, unsigned parameters included.
pub fn pre_signed_url(
    access: &str,
    secret: &str,
    expires: i64,
    url: &Url,
    method: &str,
) -> Result<Url> {
    let mut query = query_map(url);
    let signature = sign(method, expires, url.path(), &query, secret.as_bytes())?;
    query.insert(ACCESS_KEY_ID_PARAM.to_string(), vec![access.to_string()]);
    query.insert(EXPIRES_PARAM.to_string(), vec![expires.to_string()]);
    query.insert(SIGNATURE_PARAM.to_string(), vec![signature]);
    let mut signed = url.clone();
    signed.set_query(Some(&encode_query(&query)));
    Ok(signed)
}

//------------------------------------------------------------------------------
/// Pre-sign every URL in `urls` with the same credentials and expiration.
/// One result per input, in input order; a URL that fails to parse only
/// fails its own entry.
pub fn pre_sign_urls<I, S>(
    urls: I,
    access: &str,
    secret: &str,
    expires: i64,
    method: &str,
) -> Vec<Result<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    urls.into_iter()
        .map(|url| {
            let url = parse_url(url.as_ref())?;
            Ok(pre_signed_url(access, secret, expires, &url, method)?.to_string())
        })
        .collect()
}
