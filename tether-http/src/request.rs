//! Request model and payloads.

use std::time::SystemTime;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::{Error, Result};

/// An opaque object carried by a request or produced for a response.
///
/// Request processors turn the request payload into headers and body;
/// response processors turn the body into a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes.
    Bytes(Bytes),
    /// A string.
    Text(String),
    /// A JSON value. Objects double as form parameters.
    Json(serde_json::Value),
}

impl Payload {
    /// Name of the payload variant, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }

    /// Get the raw bytes, if this is a bytes payload.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the string, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the JSON value, if this is a JSON payload.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// One HTTP request, owned by its cycle.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    object: Option<Payload>,
    timestamp: Option<SystemTime>,
}

impl Request {
    /// Create a request without headers, body, or payload.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            object: None,
            timestamp: None,
        }
    }

    /// Get the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Set the HTTP method.
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Get the URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get a header value as a string.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Set a header, replacing any existing value.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::try_from(name)
            .map_err(|e| Error::EncodingFailure(format!("header name {name}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::EncodingFailure(format!("header value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Get the body.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Set the body.
    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }

    /// Get the payload.
    pub fn object(&self) -> Option<&Payload> {
        self.object.as_ref()
    }

    /// Set the payload.
    pub fn set_object(&mut self, object: Option<Payload>) {
        self.object = object;
    }

    /// Time the request was handed to the transport.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: Option<SystemTime>) {
        self.timestamp = timestamp;
    }
}
