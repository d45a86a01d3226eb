//! Cycle builder.

use std::path::Path;
use std::sync::Arc;

use http::Method;
use serde::Serialize;

use crate::auth::Authentication;
use crate::cycle::{Cycle, CycleState, DownloadFinishedHandler, Progress, ProgressHandler};
use crate::form::{self, Params};
use crate::processor::Processor;
use crate::request::Payload;
use crate::session::Session;
use crate::transport::{TaskKind, UploadSource};
use crate::{Error, Result};

/// Builds and registers a [`Cycle`].
pub struct CycleBuilder {
    session: Session,
    method: Method,
    url: String,
    kind: TaskKind,
    params: Option<Params>,
    object: Option<Payload>,
    headers: Vec<(String, String)>,
    request_processors: Option<Vec<Arc<dyn Processor>>>,
    response_processors: Option<Vec<Arc<dyn Processor>>>,
    authentications: Option<Vec<Arc<dyn Authentication>>>,
    solicited: bool,
    identifier: Option<String>,
    data_sent: Option<ProgressHandler>,
    data_written: Option<ProgressHandler>,
    download_finished: Option<DownloadFinishedHandler>,
    error: Option<Error>,
}

impl CycleBuilder {
    pub(crate) fn new(session: Session, method: Method, url: String, kind: TaskKind) -> Self {
        Self {
            session,
            method,
            url,
            kind,
            params: None,
            object: None,
            headers: Vec::new(),
            request_processors: None,
            response_processors: None,
            authentications: None,
            solicited: false,
            identifier: None,
            data_sent: None,
            data_written: None,
            download_finished: None,
            error: None,
        }
    }

    /// Merge parameters into the query string of the URL.
    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Add one query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params
            .get_or_insert_with(Params::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the request payload.
    pub fn object(mut self, object: impl Into<Payload>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Set the request payload from a serializable value.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => self.object = Some(Payload::Json(value)),
            Err(e) => self.error = Some(Error::Json(e)),
        }
        self
    }

    /// Add a header to the request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Use these request processors instead of the session defaults.
    pub fn request_processors(mut self, processors: Vec<Arc<dyn Processor>>) -> Self {
        self.request_processors = Some(processors);
        self
    }

    /// Use these response processors instead of the session defaults.
    pub fn response_processors(mut self, processors: Vec<Arc<dyn Processor>>) -> Self {
        self.response_processors = Some(processors);
        self
    }

    /// Use these authentication handlers instead of the session defaults.
    pub fn authentications(mut self, authentications: Vec<Arc<dyn Authentication>>) -> Self {
        self.authentications = Some(authentications);
        self
    }

    /// Retry without limit until the transfer succeeds.
    pub fn solicited(mut self, solicited: bool) -> Self {
        self.solicited = solicited;
        self
    }

    /// Give the cycle an identifier, unique within the session.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Receive upload progress.
    pub fn on_data_sent<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Cycle, Progress) + Send + Sync + 'static,
    {
        self.data_sent = Some(Arc::new(handler));
        self
    }

    /// Receive download progress.
    pub fn on_data_written<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Cycle, Progress) + Send + Sync + 'static,
    {
        self.data_written = Some(Arc::new(handler));
        self
    }

    /// Build the cycle and register it with the session.
    ///
    /// Fails with [`Error::InvalidUrl`] if the URL cannot be constructed,
    /// even after re-encoding it.
    pub fn build(self) -> Result<Cycle> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let url = form::url_for_string(&self.url, self.params.as_ref())?;
        let mut state = CycleState::new(self.method, url, self.kind);
        for (name, value) in &self.headers {
            state.request.set_header(name, value)?;
        }
        state.request.set_object(self.object);
        state.solicited = self.solicited;
        state.identifier = self.identifier;
        state.request_processors = self.request_processors;
        state.response_processors = self.response_processors;
        state.authentications = self.authentications;
        state.data_sent = self.data_sent;
        state.data_written = self.data_written;
        state.download_finished = self.download_finished;

        Cycle::register(&self.session, state)
    }

    /// Build the cycle and start it.
    pub fn start<F>(self, handler: F) -> Result<Cycle>
    where
        F: Fn(&Cycle, Result<()>) + Send + Sync + 'static,
    {
        let cycle = self.build()?;
        cycle.start_with(handler);
        Ok(cycle)
    }

    /// Build the cycle, start it, and wait for its outcome.
    pub async fn send(self) -> Result<Cycle> {
        let _session = self.session.clone();
        self.build()?.send().await
    }
}

impl Session {
    /// Create a GET cycle builder.
    pub fn get(&self, url: impl Into<String>) -> CycleBuilder {
        self.request(Method::GET, url)
    }

    /// Create a HEAD cycle builder.
    pub fn head(&self, url: impl Into<String>) -> CycleBuilder {
        self.request(Method::HEAD, url)
    }

    /// Create a POST cycle builder.
    pub fn post(&self, url: impl Into<String>) -> CycleBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT cycle builder.
    pub fn put(&self, url: impl Into<String>) -> CycleBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a PATCH cycle builder.
    pub fn patch(&self, url: impl Into<String>) -> CycleBuilder {
        self.request(Method::PATCH, url)
    }

    /// Create a DELETE cycle builder.
    pub fn delete(&self, url: impl Into<String>) -> CycleBuilder {
        self.request(Method::DELETE, url)
    }

    /// Create a data cycle builder with a custom method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> CycleBuilder {
        CycleBuilder::new(self.clone(), method, url.into(), TaskKind::Data)
    }

    /// Create a POST upload cycle builder.
    pub fn upload(&self, url: impl Into<String>, source: UploadSource) -> CycleBuilder {
        CycleBuilder::new(self.clone(), Method::POST, url.into(), TaskKind::Upload(source))
    }

    /// Create a GET download cycle builder. `handler` receives the location
    /// of the downloaded file.
    pub fn download<F>(&self, url: impl Into<String>, handler: F) -> CycleBuilder
    where
        F: Fn(&Cycle, &Path) + Send + Sync + 'static,
    {
        let mut builder = CycleBuilder::new(self.clone(), Method::GET, url.into(), TaskKind::Download);
        builder.download_finished = Some(Arc::new(handler));
        builder
    }
}
