//! URL argument escaping, form encoding, and query-string merging.
//!
//! Keys are lower-cased and both keys and the values of multi-valued
//! entries are sorted case-insensitively, so the same parameters always
//! produce the same string.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::Value;
use url::Url;

use crate::{Error, Result};

/// Parameters for form bodies and query strings. Values may be scalars or
/// arrays of scalars.
pub type Params = serde_json::Map<String, Value>;

/// Everything outside RFC 3986's unreserved set is escaped.
const URI_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Escape a string to a URL argument (RFC 3986).
pub fn escape_url_argument(value: &str) -> String {
    utf8_percent_encode(value, URI_UNRESERVED).to_string()
}

/// Unescape a URL argument. `+` decodes to a space.
///
/// Returns `None` if the percent-decoded bytes are not valid UTF-8.
pub fn unescape_url_argument(value: &str) -> Option<String> {
    let value = value.replace('+', " ");
    percent_decode_str(&value)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn case_insensitive(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Render a scalar parameter value as a string.
pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Build a `application/x-www-form-urlencoded` string from the parameters.
///
/// ```
/// use tether_http::form::form_urlencode;
///
/// let params = serde_json::json!({"k2": ["&;", "hello"], "k1": "v1"});
/// let encoded = form_urlencode(params.as_object().unwrap());
/// assert_eq!(encoded, "k1=v1&k2=%26%3B&k2=hello");
/// ```
pub fn form_urlencode(params: &Params) -> String {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in params {
        let entry = grouped.entry(key.to_lowercase()).or_default();
        match value {
            Value::Array(items) => entry.extend(items.iter().map(scalar_to_string)),
            scalar => entry.push(scalar_to_string(scalar)),
        }
    }

    let mut pairs = Vec::new();
    for (key, mut values) in grouped {
        if values.len() > 1 {
            values.sort_by(|a, b| case_insensitive(a, b));
        }
        for value in values {
            pairs.push(format!("{}={}", key, escape_url_argument(&value)));
        }
    }

    pairs.join("&")
}

/// Split a URL string into its non-query part and its query parameters.
///
/// Pairs are separated by `&` or `;`, keys are lower-cased, and repeated
/// keys collect their values in order of appearance.
pub fn parse_query_parameters(url: &str) -> (Option<String>, BTreeMap<String, Vec<String>>) {
    let (mut base, query) = match url.split_once('?') {
        Some((base, query)) => (Some(base.to_string()), query),
        None => (None, url),
    };

    let mut parameters: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in query.split(['&', ';']) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        match unescape_url_argument(value) {
            Some(value) => parameters.entry(key.to_lowercase()).or_default().push(value),
            None => tracing::warn!(value, "Failed to unescape query parameter"),
        }
    }

    if base.is_none() && parameters.is_empty() {
        base = Some(url.to_string());
    }
    (base, parameters)
}

/// Merge parameters into the query of a URL string.
///
/// Values for keys already present in the URL are appended, never dropped.
///
/// ```
/// use tether_http::form::merge_query_parameters;
///
/// let params = serde_json::json!({"k1": ["v11"]});
/// let merged = merge_query_parameters("http://d.com?k1=v1", params.as_object().unwrap());
/// assert_eq!(merged, "http://d.com?k1=v1&k1=v11");
/// ```
pub fn merge_query_parameters(url: &str, params: &Params) -> String {
    let (base, existing) = parse_query_parameters(url);

    let mut merged = Params::new();
    for (key, values) in existing {
        merged.insert(key, Value::Array(values.into_iter().map(Value::String).collect()));
    }
    for (key, value) in params {
        let key = key.to_lowercase();
        let mut values = match merged.remove(&key) {
            Some(Value::Array(values)) => values,
            _ => Vec::new(),
        };
        match value {
            Value::Array(items) => values.extend(items.iter().cloned()),
            scalar => values.push(scalar.clone()),
        }
        merged.insert(key, Value::Array(values));
    }

    let query = form_urlencode(&merged);
    let mut parts = Vec::new();
    if let Some(base) = base {
        parts.push(base);
    }
    if !query.is_empty() {
        parts.push(query);
    }
    parts.join("?")
}

/// Build a URL from a string and optional query parameters.
///
/// If the string does not parse, the query is re-encoded by merging, and as
/// a last resort the whole string is escaped.
pub fn url_for_string(url: &str, params: Option<&Params>) -> Result<Url> {
    if url.is_empty() {
        return Err(Error::InvalidUrl(url.to_string()));
    }

    let mut candidate = match params {
        Some(params) => merge_query_parameters(url, params),
        None => url.to_string(),
    };
    if let Ok(parsed) = Url::parse(&candidate) {
        return Ok(parsed);
    }

    if params.is_none() {
        candidate = merge_query_parameters(url, &Params::new());
        if let Ok(parsed) = Url::parse(&candidate) {
            return Ok(parsed);
        }
    }

    Url::parse(&escape_url_argument(&candidate)).map_err(|e| {
        tracing::debug!(url, error = %e, "URL could not be constructed");
        Error::InvalidUrl(url.to_string())
    })
}
