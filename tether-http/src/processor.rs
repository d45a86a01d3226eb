//! Request and response processors.
//!
//! Request processors run in declared order before the transport task is
//! created and turn the request payload into headers and a body. Response
//! processors run in declared order after a successful transfer and turn
//! the body into a payload. The first failure aborts the rest of the chain.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use serde_json::Value;

use crate::encoding;
use crate::form;
use crate::request::{Payload, Request};
use crate::response::Response;
use crate::{Error, Result};

/// Transforms a request before it is sent or a response after it arrives.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Transform the request.
    async fn process_request(&self, _request: &mut Request) -> Result<()> {
        Err(Error::NotImplemented("Processor::process_request"))
    }

    /// Transform the response.
    async fn process_response(&self, _response: &mut Response) -> Result<()> {
        Err(Error::NotImplemented("Processor::process_response"))
    }
}

pub(crate) async fn run_request_chain(
    processors: &[Arc<dyn Processor>],
    request: &mut Request,
) -> Result<()> {
    for processor in processors {
        processor.process_request(request).await?;
    }
    Ok(())
}

pub(crate) async fn run_response_chain(
    processors: &[Arc<dyn Processor>],
    response: &mut Response,
) -> Result<()> {
    for processor in processors {
        processor.process_response(response).await?;
    }
    Ok(())
}

/// Passes raw bytes through in both directions.
#[derive(Debug, Clone, Default)]
pub struct DataProcessor;

impl DataProcessor {
    /// Create a data processor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for DataProcessor {
    async fn process_request(&self, request: &mut Request) -> Result<()> {
        let body = match request.object() {
            None => None,
            Some(Payload::Bytes(bytes)) => Some(bytes.clone()),
            Some(other) => {
                return Err(Error::TypeMismatch {
                    expected: "bytes",
                    found: other.kind(),
                });
            }
        };
        request.set_body(body);
        Ok(())
    }

    async fn process_response(&self, response: &mut Response) -> Result<()> {
        let bytes = response.bytes();
        response.set_object(Some(Payload::Bytes(bytes)));
        Ok(())
    }
}

/// Encodes text payloads and decodes text bodies.
#[derive(Debug, Clone)]
pub struct TextProcessor {
    write_encoding: &'static Encoding,
    read_encoding: Option<&'static Encoding>,
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self {
            write_encoding: UTF_8,
            read_encoding: None,
        }
    }
}

impl TextProcessor {
    /// Create a processor writing UTF-8 and detecting the read encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the encoding used for request bodies.
    pub fn with_write_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.write_encoding = encoding;
        self
    }

    /// Force the encoding used for response bodies.
    pub fn with_read_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.read_encoding = Some(encoding);
        self
    }
}

#[async_trait]
impl Processor for TextProcessor {
    async fn process_request(&self, request: &mut Request) -> Result<()> {
        let body = match request.object() {
            None => None,
            Some(Payload::Text(text)) => {
                let bytes = encoding::encode(text, self.write_encoding).ok_or_else(|| {
                    Error::EncodingFailure(format!(
                        "text cannot be encoded as {}",
                        self.write_encoding.name()
                    ))
                })?;
                Some(Bytes::from(bytes))
            }
            Some(other) => {
                return Err(Error::TypeMismatch {
                    expected: "text",
                    found: other.kind(),
                });
            }
        };
        request.set_body(body);
        Ok(())
    }

    async fn process_response(&self, response: &mut Response) -> Result<()> {
        let text = response
            .text_with_fallback(self.read_encoding)
            .ok_or_else(|| Error::EncodingFailure("response body is not valid text".to_string()))?;
        response.set_object(Some(Payload::Text(text)));
        Ok(())
    }
}

/// Serializes payloads to JSON and parses JSON bodies.
#[derive(Debug, Clone, Default)]
pub struct JsonProcessor;

impl JsonProcessor {
    /// Create a JSON processor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for JsonProcessor {
    async fn process_request(&self, request: &mut Request) -> Result<()> {
        let body = match request.object() {
            None => return Ok(()),
            Some(Payload::Json(value)) => serde_json::to_vec(value)?,
            Some(Payload::Text(text)) => serde_json::to_vec(text)?,
            Some(other) => {
                return Err(Error::TypeMismatch {
                    expected: "json",
                    found: other.kind(),
                });
            }
        };
        request.set_body(Some(Bytes::from(body)));
        request.set_header("Content-Type", "application/json")?;
        Ok(())
    }

    async fn process_response(&self, response: &mut Response) -> Result<()> {
        let value: Value = serde_json::from_slice(response.data())?;
        response.set_object(Some(Payload::Json(value)));
        Ok(())
    }
}

/// Encodes a JSON object as an `application/x-www-form-urlencoded` body.
///
/// Response bodies are not decoded.
#[derive(Debug, Clone, Default)]
pub struct FormProcessor;

impl FormProcessor {
    /// Create a form processor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for FormProcessor {
    async fn process_request(&self, request: &mut Request) -> Result<()> {
        let params = match request.object() {
            None => return Ok(()),
            Some(Payload::Json(Value::Object(params))) => params,
            Some(other) => {
                return Err(Error::TypeMismatch {
                    expected: "json object",
                    found: other.kind(),
                });
            }
        };
        let body = form::form_urlencode(params);
        request.set_body(Some(Bytes::from(body)));
        request.set_header("Content-Type", "application/x-www-form-urlencoded")?;
        Ok(())
    }
}

/// Adds an `Authorization: Basic` header.
#[derive(Clone)]
pub struct BasicAuthProcessor {
    username: String,
    password: String,
}

impl BasicAuthProcessor {
    /// Create a processor for the credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Header value for the credentials.
    pub fn header_value(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

impl std::fmt::Debug for BasicAuthProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthProcessor")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Processor for BasicAuthProcessor {
    async fn process_request(&self, request: &mut Request) -> Result<()> {
        request.set_header("Authorization", &self.header_value())
    }
}

/// Adds an `Authorization: Bearer` header.
#[derive(Clone)]
pub struct BearerAuthProcessor {
    token: String,
}

impl BearerAuthProcessor {
    /// Create a processor for the token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for BearerAuthProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuthProcessor").finish_non_exhaustive()
    }
}

#[async_trait]
impl Processor for BearerAuthProcessor {
    async fn process_request(&self, request: &mut Request) -> Result<()> {
        request.set_header("Authorization", &format!("Bearer {}", self.token))
    }
}
