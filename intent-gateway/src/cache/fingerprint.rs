use std::collections::BTreeMap;

use md5::{Digest, Md5};
use serde::Serialize;

use crate::types::request::IntentRequest;

/// Canonical form of the classification-relevant request fields. Header
/// names are lower-cased and sorted so logically identical requests hash
/// identically.
#[derive(Serialize)]
struct Canonical<'a> {
    text: Option<&'a str>,
    http_path: Option<&'a str>,
    http_method: Option<String>,
    headers: BTreeMap<String, &'a str>,
}

/// Hex MD5 digest used as the cache key for a request.
#[must_use]
pub fn fingerprint(request: &IntentRequest) -> String {
    let canonical = Canonical {
        text: request.text.as_deref(),
        http_path: request.http_path.as_deref(),
        http_method: request
            .http_method
            .as_deref()
            .map(str::to_ascii_uppercase),
        headers: request
            .headers
            .iter()
            .flatten()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .collect(),
    };
    let bytes = serde_json::to_vec(&canonical)
        .expect("canonical form is serializable");
    let digest = Md5::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        write!(out, "{byte:02x}").expect("writing to a string");
    }
    out
}
