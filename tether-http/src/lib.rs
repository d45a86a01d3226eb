//! # Tether HTTP
//!
//! HTTP exchanges as managed *cycles*: each cycle runs request processors,
//! executes on a pluggable transport, retries transient failures, routes
//! authentication challenges to handlers, and runs response processors
//! before its completion handler is called exactly once.
//!
//! ## Features
//!
//! - **Sessions**: A registry of live cycles with lookup by task and identifier
//! - **Retries**: Timeouts and 408/503 responses are retried after a delay
//! - **Processors**: Text, JSON, form, and auth header processors, chained in order
//! - **Authentication**: Challenge handlers with an interactive fallback
//! - **Transfers**: Data, upload, and download tasks with progress reporting
//! - **Services**: Resources described by a JSON or TOML profile
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_http::{Session, SessionConfig, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::with_reqwest(TransportConfig::default(), SessionConfig::default())?;
//!
//!     let cycle = session
//!         .get("https://api.example.com/users")
//!         .query("page", 2)
//!         .send()
//!         .await?;
//!
//!     println!("Status: {:?}", cycle.response().status());
//!     println!("Body: {:?}", cycle.response().text());
//!     Ok(())
//! }
//! ```
//!
//! ## With Processors
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_http::processor::{JsonProcessor, Processor};
//! use tether_http::{Session, SessionConfig, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .max_retries(5)
//!         .retry_delay(Duration::from_secs(1))
//!         .build();
//!     let session = Session::with_reqwest(TransportConfig::default(), config)?;
//!
//!     let json: Arc<dyn Processor> = Arc::new(JsonProcessor::new());
//!     let cycle = session
//!         .post("https://api.example.com/orders")
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))
//!         .request_processors(vec![json.clone()])
//!         .response_processors(vec![json])
//!         .send()
//!         .await?;
//!
//!     println!("Order: {:?}", cycle.response().object());
//!     Ok(())
//! }
//! ```

mod builder;
mod config;
mod cycle;
mod error;
mod request;
mod response;
mod session;

pub mod auth;
pub mod encoding;
pub mod form;
pub mod processor;
pub mod service;
pub mod testing;
pub mod transport;
pub mod uri_template;

pub use builder::CycleBuilder;
pub use config::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, SessionConfig, SessionConfigBuilder, TransportConfig,
    TransportConfigBuilder,
};
pub use cycle::{
    CompletionHandler, Cycle, CycleId, DownloadFinishedHandler, Phase, Progress, ProgressHandler,
};
pub use error::{Error, Result, TransportError};
pub use request::{Payload, Request};
pub use response::{Response, ResponseHead};
pub use session::{Session, SessionDelegate};
pub use transport::{
    EventSink, Invalidation, ReqwestTransport, TaskId, TaskKind, Transport, TransportEvent,
    UploadSource,
};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use tether_http::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{AuthAction, Authentication, BasicAuthentication, Challenge};
    pub use crate::builder::CycleBuilder;
    pub use crate::config::{SessionConfig, TransportConfig};
    pub use crate::cycle::{Cycle, Phase, Progress};
    pub use crate::error::{Error, Result, TransportError};
    pub use crate::processor::{
        BasicAuthProcessor, BearerAuthProcessor, DataProcessor, FormProcessor, JsonProcessor,
        Processor, TextProcessor,
    };
    pub use crate::request::{Payload, Request};
    pub use crate::response::Response;
    pub use crate::service::{CycleOption, ResourceRequest, Service, ServiceProfile};
    pub use crate::session::{Session, SessionDelegate};
    pub use crate::transport::{TaskKind, UploadSource};
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
}
