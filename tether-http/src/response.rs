//! Response model.

use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use http::{HeaderMap, StatusCode};
use url::Url;

use crate::encoding;
use crate::request::Payload;

/// Status line and headers of a response, reported by the transport.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Final URL after redirects.
    pub url: Url,
}

impl ResponseHead {
    /// Create a response head.
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url) -> Self {
        Self {
            status,
            headers,
            url,
        }
    }

    pub(crate) fn from_reqwest(response: &reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            url: response.url().clone(),
        }
    }
}

/// One HTTP response, owned by its cycle and recreated on every (re)start.
#[derive(Debug, Clone, Default)]
pub struct Response {
    head: Option<ResponseHead>,
    data: BytesMut,
    timestamp: Option<SystemTime>,
    object: Option<Payload>,
    text_read_encoding: Option<&'static Encoding>,
}

impl Response {
    /// Create an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the status line and headers, once received.
    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    pub(crate) fn set_head(&mut self, head: ResponseHead) {
        self.head = Some(head);
        self.timestamp = Some(SystemTime::now());
    }

    /// Get the status code.
    pub fn status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(|h| h.status)
    }

    /// Get the status code as a number.
    pub fn status_code(&self) -> Option<u16> {
        self.status().map(|s| s.as_u16())
    }

    /// Get the response headers.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.head.as_ref().map(|h| &h.headers)
    }

    /// Get a header value. The lookup is case-insensitive.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers()?
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the received body.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a copy of the received body.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Append received bytes to the body.
    pub fn append_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Time the response was received.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Get the payload produced by response processors.
    pub fn object(&self) -> Option<&Payload> {
        self.object.as_ref()
    }

    /// Set the payload.
    pub fn set_object(&mut self, object: Option<Payload>) {
        self.object = object;
    }

    /// Explicit encoding to use when converting the body to text.
    pub fn text_read_encoding(&self) -> Option<&'static Encoding> {
        self.text_read_encoding
    }

    /// Override the encoding used when converting the body to text.
    pub fn set_text_read_encoding(&mut self, encoding: Option<&'static Encoding>) {
        self.text_read_encoding = encoding;
    }

    /// Encoding of the body as determined from headers and content.
    pub fn text_encoding(&self) -> Option<&'static Encoding> {
        encoding::detect_text_encoding(self.headers(), &self.data)
    }

    /// The body as text, using the explicit override, the detected
    /// encoding, or UTF-8, in that order.
    pub fn text(&self) -> Option<String> {
        self.text_with_fallback(None)
    }

    pub(crate) fn text_with_fallback(&self, preferred: Option<&'static Encoding>) -> Option<String> {
        let encoding = self
            .text_read_encoding
            .or(preferred)
            .or_else(|| self.text_encoding())
            .unwrap_or(UTF_8);
        encoding::decode(&self.data, encoding)
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status().is_some_and(|s| s.is_success())
    }
}
