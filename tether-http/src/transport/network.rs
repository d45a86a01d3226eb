//! Transport backed by reqwest.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderName, HeaderValue, StatusCode, header};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EventSink, Invalidation, TaskId, TaskKind, Transport, TransportEvent, UploadSource};
use crate::TransportError;
use crate::auth::{AuthMethod, Challenge, ChallengeResponder, Credential, Disposition};
use crate::config::TransportConfig;
use crate::request::Request;
use crate::response::ResponseHead;

/// Size of the chunks upload bodies are sent in.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Challenges answered for one task before the 401 is delivered as is.
const MAX_CHALLENGES: u32 = 8;

type Outcome = Result<ResponseHead, (Option<ResponseHead>, TransportError)>;

struct PendingTask {
    request: Request,
    kind: TaskKind,
    events: EventSink,
}

enum TaskSlot {
    Pending(PendingTask),
    Running(oneshot::Sender<()>),
}

struct Inner {
    client: reqwest::Client,
    tasks: Mutex<HashMap<TaskId, TaskSlot>>,
    invalidated: AtomicBool,
    runtime: Handle,
}

/// Production transport executing tasks with a shared `reqwest::Client`.
///
/// Basic credentials supplied for a challenge are applied by resending the
/// request; other schemes deliver the 401 response unchanged.
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("tasks", &self.inner.tasks.lock().len())
            .field("invalidated", &self.inner.invalidated.load(Ordering::Acquire))
            .finish()
    }
}

impl ReqwestTransport {
    /// Create a transport. Must be called inside a Tokio runtime.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|e| TransportError::Other(e.to_string()))?;

        let mut headers = http::HeaderMap::new();
        for (name, value) in &config.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Ignoring invalid default header"),
            }
        }

        let redirect = match config.redirect_limit {
            Some(limit) => reqwest::redirect::Policy::limited(limit),
            None => reqwest::redirect::Policy::none(),
        };
        let builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .gzip(config.compression)
            .brotli(config.compression)
            .redirect(redirect);

        let client = builder.build()?;
        Ok(Self::from_client(client, runtime))
    }

    /// Create a transport around an existing client.
    pub fn from_client(client: reqwest::Client, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                tasks: Mutex::new(HashMap::new()),
                invalidated: AtomicBool::new(false),
                runtime,
            }),
        }
    }

    /// Get the underlying reqwest client.
    pub fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }
}

impl Transport for ReqwestTransport {
    fn create_task(
        &self,
        request: &Request,
        kind: &TaskKind,
        events: EventSink,
    ) -> Result<TaskId, TransportError> {
        if self.inner.invalidated.load(Ordering::Acquire) {
            return Err(TransportError::Invalidated);
        }
        let task = TaskId::next();
        let pending = PendingTask {
            request: request.clone(),
            kind: kind.clone(),
            events,
        };
        self.inner.tasks.lock().insert(task, TaskSlot::Pending(pending));
        Ok(task)
    }

    fn resume(&self, task: TaskId) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let pending = {
            let mut tasks = self.inner.tasks.lock();
            match tasks.remove(&task) {
                Some(TaskSlot::Pending(pending)) => {
                    tasks.insert(task, TaskSlot::Running(cancel_tx));
                    pending
                }
                Some(running) => {
                    tasks.insert(task, running);
                    return;
                }
                None => {
                    debug!(%task, "Resume for unknown task");
                    return;
                }
            }
        };

        let inner = self.inner.clone();
        self.inner
            .runtime
            .spawn(run_task(inner, task, pending, cancel_rx));
    }

    fn cancel(&self, task: TaskId) {
        let slot = self.inner.tasks.lock().remove(&task);
        match slot {
            Some(TaskSlot::Pending(pending)) => {
                pending.events.send(TransportEvent::Completed {
                    task,
                    response: None,
                    error: Some(TransportError::Cancelled),
                });
            }
            Some(TaskSlot::Running(cancel)) => {
                let _ = cancel.send(());
            }
            None => debug!(%task, "Cancel for unknown task"),
        }
    }

    fn invalidate(&self, mode: Invalidation) {
        self.inner.invalidated.store(true, Ordering::Release);
        if mode == Invalidation::Cancel {
            let tasks: Vec<TaskId> = self.inner.tasks.lock().keys().copied().collect();
            for task in tasks {
                self.cancel(task);
            }
        }
    }
}

async fn run_task(
    inner: Arc<Inner>,
    task: TaskId,
    pending: PendingTask,
    cancel: oneshot::Receiver<()>,
) {
    let outcome = tokio::select! {
        outcome = execute(&inner.client, task, &pending) => outcome,
        Ok(()) = cancel => Err((None, TransportError::Cancelled)),
    };
    inner.tasks.lock().remove(&task);

    let (response, error) = match outcome {
        Ok(head) => (Some(head), None),
        Err((head, e)) => (head, Some(e)),
    };
    pending.events.send(TransportEvent::Completed {
        task,
        response,
        error,
    });
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::TimedOut
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Http(e)
    }
}

async fn execute(client: &reqwest::Client, task: TaskId, pending: &PendingTask) -> Outcome {
    let events = &pending.events;
    let mut credential: Option<Credential> = None;
    let mut failures = 0;

    let response = loop {
        let builder = build_request(client, task, pending, credential.as_ref())
            .await
            .map_err(|e| (None, e))?;
        let response = builder.send().await.map_err(|e| (None, map_error(e)))?;

        let challenge_header = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok());
        let Some(challenge_header) = challenge_header.filter(|_| {
            response.status() == StatusCode::UNAUTHORIZED && failures < MAX_CHALLENGES
        }) else {
            break response;
        };

        let challenge = Challenge::from_www_authenticate(response.url(), challenge_header, failures);
        let method = challenge.protection_space.method.clone();
        let (responder, answer) = ChallengeResponder::new();
        events.send(TransportEvent::AuthChallenge {
            task,
            challenge,
            responder,
        });

        match answer.await.unwrap_or((Disposition::PerformDefaultHandling, None)) {
            (Disposition::UseCredential, Some(supplied)) if method == AuthMethod::Basic => {
                debug!(%task, user = %supplied.user, "Resending with credentials");
                credential = Some(supplied);
                failures += 1;
            }
            (Disposition::CancelChallenge, _) => {
                let head = ResponseHead::from_reqwest(&response);
                return Err((Some(head), TransportError::Cancelled));
            }
            (disposition, _) => {
                debug!(%task, ?disposition, %method, "Delivering challenge response as is");
                break response;
            }
        }
    };

    let head = ResponseHead::from_reqwest(&response);
    let streamed = match pending.kind {
        TaskKind::Download => write_download(task, response, events).await,
        _ => receive_body(task, response, events).await,
    };
    match streamed {
        Ok(()) => Ok(head),
        Err(e) => Err((Some(head), e)),
    }
}

async fn build_request(
    client: &reqwest::Client,
    task: TaskId,
    pending: &PendingTask,
    credential: Option<&Credential>,
) -> Result<reqwest::RequestBuilder, TransportError> {
    let request = &pending.request;
    let mut builder = client
        .request(request.method().clone(), request.url().clone())
        .headers(request.headers().clone());
    if let Some(credential) = credential {
        builder = builder.basic_auth(&credential.user, Some(&credential.password));
    }

    match &pending.kind {
        TaskKind::Upload(source) => {
            let bytes = match source {
                UploadSource::Bytes(bytes) => bytes.clone(),
                UploadSource::File(path) => Bytes::from(tokio::fs::read(path).await?),
            };
            let expected = bytes.len() as u64;
            builder = builder
                .header(header::CONTENT_LENGTH, expected)
                .body(upload_body(task, bytes, pending.events.clone()));
        }
        _ => {
            if let Some(body) = request.body() {
                builder = builder.body(body.clone());
            }
        }
    }
    Ok(builder)
}

/// Stream the upload in chunks, reporting progress as each one is taken.
fn upload_body(task: TaskId, bytes: Bytes, events: EventSink) -> reqwest::Body {
    let expected = bytes.len() as u64;
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_SIZE).min(bytes.len())))
        .collect();

    let mut total = 0u64;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        let sent = chunk.len() as u64;
        total += sent;
        events.send(TransportEvent::DataSent {
            task,
            bytes: sent,
            total,
            expected: Some(expected),
        });
        Ok::<Bytes, io::Error>(chunk)
    });
    reqwest::Body::wrap_stream(stream)
}

async fn receive_body(
    task: TaskId,
    response: reqwest::Response,
    events: &EventSink,
) -> Result<(), TransportError> {
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let data = chunk.map_err(map_error)?;
        events.send(TransportEvent::DataReceived { task, data });
    }
    Ok(())
}

async fn write_download(
    task: TaskId,
    response: reqwest::Response,
    events: &EventSink,
) -> Result<(), TransportError> {
    let expected = response.content_length();
    let location = std::env::temp_dir().join(format!("tether-{}.download", Uuid::new_v4()));
    let mut file = tokio::fs::File::create(&location).await?;

    let mut total = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let data = chunk.map_err(map_error)?;
        file.write_all(&data).await?;
        total += data.len() as u64;
        events.send(TransportEvent::DataWritten {
            task,
            bytes: data.len() as u64,
            total,
            expected,
        });
    }
    file.flush().await?;

    events.send(TransportEvent::DownloadFinished { task, location });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Dispatch;
    use http::Method;
    use tokio::sync::mpsc;
    use url::Url;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<Dispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx), rx)
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let transport = ReqwestTransport::new(TransportConfig::default()).unwrap();
        let (events, mut rx) = sink();
        let request = Request::new(Method::GET, Url::parse("http://127.0.0.1:9/").unwrap());

        let task = transport.create_task(&request, &TaskKind::Data, events).unwrap();
        transport.cancel(task);

        match rx.recv().await {
            Some(Dispatch::Transport(TransportEvent::Completed { task: t, error, .. })) => {
                assert_eq!(t, task);
                assert!(error.unwrap().is_cancelled());
            }
            _ => panic!("expected a completion"),
        }
    }

    #[tokio::test]
    async fn test_invalidated_transport_rejects_tasks() {
        let transport = ReqwestTransport::new(TransportConfig::default()).unwrap();
        transport.invalidate(Invalidation::Finish);

        let (events, _rx) = sink();
        let request = Request::new(Method::GET, Url::parse("http://127.0.0.1:9/").unwrap());
        let err = transport
            .create_task(&request, &TaskKind::Data, events)
            .unwrap_err();
        assert!(matches!(err, TransportError::Invalidated));
    }
}
