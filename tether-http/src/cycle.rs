//! One logical HTTP exchange and its retry state.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use http::Method;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use crate::auth::Authentication;
use crate::processor::Processor;
use crate::request::{Payload, Request};
use crate::response::Response;
use crate::session::{Session, SessionInner};
use crate::transport::{TaskId, TaskKind};
use crate::{Error, Result};

/// Identity of a cycle within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CycleId(u64);

impl CycleId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle-{}", self.0)
    }
}

/// Where a cycle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not started.
    Idle,
    /// Request processors are running.
    Preparing,
    /// Bound to a transport task.
    Running,
    /// Waiting for the retry delay to pass.
    RetryPending,
    /// Response processors are running.
    Processing,
    /// Finalized and removed from the session.
    Finished,
}

/// Transfer progress reported to progress handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes transferred since the last report.
    pub bytes: u64,
    /// Bytes transferred so far.
    pub total: u64,
    /// Total bytes expected, if known.
    pub expected: Option<u64>,
}

/// Called once with the outcome of the cycle.
pub type CompletionHandler = Arc<dyn Fn(&Cycle, Result<()>) + Send + Sync>;

/// Called with upload or download progress.
pub type ProgressHandler = Arc<dyn Fn(&Cycle, Progress) + Send + Sync>;

/// Called with the location of a finished download.
pub type DownloadFinishedHandler = Arc<dyn Fn(&Cycle, &Path) + Send + Sync>;

pub(crate) struct CycleState {
    pub(crate) phase: Phase,
    pub(crate) kind: TaskKind,
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) task: Option<TaskId>,
    pub(crate) identifier: Option<String>,
    pub(crate) solicited: bool,
    pub(crate) retried_count: u32,
    pub(crate) explicitly_canceling: bool,
    pub(crate) request_processors: Option<Vec<Arc<dyn Processor>>>,
    pub(crate) response_processors: Option<Vec<Arc<dyn Processor>>>,
    pub(crate) authentications: Option<Vec<Arc<dyn Authentication>>>,
    pub(crate) completion: Option<CompletionHandler>,
    pub(crate) data_sent: Option<ProgressHandler>,
    pub(crate) data_written: Option<ProgressHandler>,
    pub(crate) download_finished: Option<DownloadFinishedHandler>,
}

impl CycleState {
    pub(crate) fn new(method: Method, url: Url, kind: TaskKind) -> Self {
        Self {
            phase: Phase::Idle,
            kind,
            request: Request::new(method, url),
            response: Response::new(),
            task: None,
            identifier: None,
            solicited: false,
            retried_count: 0,
            explicitly_canceling: false,
            request_processors: None,
            response_processors: None,
            authentications: None,
            completion: None,
            data_sent: None,
            data_written: None,
            download_finished: None,
        }
    }

    /// Drop everything a previous attempt left behind and enter `Preparing`.
    pub(crate) fn begin_preparation(&mut self) {
        self.task = None;
        self.request.set_timestamp(None);
        self.response = Response::new();
        self.explicitly_canceling = false;
        self.phase = Phase::Preparing;
    }
}

pub(crate) struct CycleInner {
    id: CycleId,
    session: Weak<SessionInner>,
    pub(crate) state: Mutex<CycleState>,
}

/// Handle to one HTTP exchange.
///
/// Handles are cheap to clone; all clones refer to the same exchange. A
/// cycle registers itself with its session when it is created and is
/// removed exactly once, when it finishes or is cancelled.
#[derive(Clone)]
pub struct Cycle {
    pub(crate) inner: Arc<CycleInner>,
}

impl fmt::Debug for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Cycle")
            .field("id", &self.inner.id)
            .field("phase", &state.phase)
            .field("kind", &state.kind.name())
            .field("url", &state.request.url().as_str())
            .field("identifier", &state.identifier)
            .finish()
    }
}

impl PartialEq for Cycle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Cycle {}

impl Cycle {
    /// Create a cycle and register it with the session.
    pub fn new(session: &Session, method: Method, url: Url, kind: TaskKind) -> Result<Self> {
        Self::register(session, CycleState::new(method, url, kind))
    }

    pub(crate) fn register(session: &Session, state: CycleState) -> Result<Self> {
        let cycle = Self {
            inner: Arc::new(CycleInner {
                id: CycleId::next(),
                session: Arc::downgrade(&session.inner),
                state: Mutex::new(state),
            }),
        };
        session.add_cycle(&cycle)?;
        Ok(cycle)
    }

    fn session_inner(&self) -> Option<Arc<SessionInner>> {
        self.inner.session.upgrade()
    }

    /// Get the cycle id.
    pub fn id(&self) -> CycleId {
        self.inner.id
    }

    /// Get the owning session, if it is still alive.
    pub fn session(&self) -> Option<Session> {
        self.session_inner().map(|inner| Session { inner })
    }

    /// Get the lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Get the task kind.
    pub fn kind(&self) -> TaskKind {
        self.inner.state.lock().kind.clone()
    }

    /// Get the transport task currently bound to the cycle.
    pub fn task(&self) -> Option<TaskId> {
        self.inner.state.lock().task
    }

    /// Get the identifier.
    pub fn identifier(&self) -> Option<String> {
        self.inner.state.lock().identifier.clone()
    }

    /// Set or clear the identifier. Fails if another live cycle of the
    /// session already uses it.
    pub fn set_identifier(&self, identifier: Option<String>) -> Result<()> {
        match self.session_inner() {
            Some(session) => session.reindex(self, identifier),
            None => {
                self.inner.state.lock().identifier = identifier;
                Ok(())
            }
        }
    }

    /// Check if the cycle retries without limit.
    pub fn solicited(&self) -> bool {
        self.inner.state.lock().solicited
    }

    /// Retry without limit until the transfer succeeds.
    pub fn set_solicited(&self, solicited: bool) {
        self.inner.state.lock().solicited = solicited;
    }

    /// Number of retries attempted so far.
    pub fn retried_count(&self) -> u32 {
        self.inner.state.lock().retried_count
    }

    /// Check if the cycle was cancelled explicitly.
    pub fn explicitly_canceling(&self) -> bool {
        self.inner.state.lock().explicitly_canceling
    }

    /// Get a copy of the request.
    pub fn request(&self) -> Request {
        self.inner.state.lock().request.clone()
    }

    /// Modify the request before the cycle starts.
    pub fn with_request<R>(&self, f: impl FnOnce(&mut Request) -> R) -> R {
        f(&mut self.inner.state.lock().request)
    }

    /// Set the payload request processors turn into a body.
    pub fn set_request_object(&self, object: Option<Payload>) {
        self.inner.state.lock().request.set_object(object);
    }

    /// Get a copy of the response of the current attempt.
    pub fn response(&self) -> Response {
        self.inner.state.lock().response.clone()
    }

    /// Read the response of the current attempt without copying it.
    pub fn with_response<R>(&self, f: impl FnOnce(&Response) -> R) -> R {
        f(&self.inner.state.lock().response)
    }

    /// Request processors in effect, falling back to the session defaults.
    pub fn request_processors(&self) -> Vec<Arc<dyn Processor>> {
        let own = self.inner.state.lock().request_processors.clone();
        own.or_else(|| {
            self.session_inner()
                .map(|s| s.defaults.read().request_processors.clone())
        })
        .unwrap_or_default()
    }

    /// Override the session's default request processors.
    pub fn set_request_processors(&self, processors: Option<Vec<Arc<dyn Processor>>>) {
        self.inner.state.lock().request_processors = processors;
    }

    /// Response processors in effect, falling back to the session defaults.
    pub fn response_processors(&self) -> Vec<Arc<dyn Processor>> {
        let own = self.inner.state.lock().response_processors.clone();
        own.or_else(|| {
            self.session_inner()
                .map(|s| s.defaults.read().response_processors.clone())
        })
        .unwrap_or_default()
    }

    /// Override the session's default response processors.
    pub fn set_response_processors(&self, processors: Option<Vec<Arc<dyn Processor>>>) {
        self.inner.state.lock().response_processors = processors;
    }

    /// Authentication handlers in effect, falling back to the session defaults.
    pub fn authentications(&self) -> Vec<Arc<dyn Authentication>> {
        let own = self.inner.state.lock().authentications.clone();
        own.or_else(|| {
            self.session_inner()
                .map(|s| s.defaults.read().authentications.clone())
        })
        .unwrap_or_default()
    }

    /// Override the session's default authentication handlers.
    pub fn set_authentications(&self, authentications: Option<Vec<Arc<dyn Authentication>>>) {
        self.inner.state.lock().authentications = authentications;
    }

    /// Set the completion handler.
    pub fn set_completion_handler<F>(&self, handler: F)
    where
        F: Fn(&Cycle, Result<()>) + Send + Sync + 'static,
    {
        self.inner.state.lock().completion = Some(Arc::new(handler));
    }

    /// Set the upload progress handler.
    pub fn set_data_sent_handler<F>(&self, handler: F)
    where
        F: Fn(&Cycle, Progress) + Send + Sync + 'static,
    {
        self.inner.state.lock().data_sent = Some(Arc::new(handler));
    }

    /// Set the download progress handler.
    pub fn set_data_written_handler<F>(&self, handler: F)
    where
        F: Fn(&Cycle, Progress) + Send + Sync + 'static,
    {
        self.inner.state.lock().data_written = Some(Arc::new(handler));
    }

    /// Set the handler receiving the location of a finished download.
    pub fn set_download_finished_handler<F>(&self, handler: F)
    where
        F: Fn(&Cycle, &Path) + Send + Sync + 'static,
    {
        self.inner.state.lock().download_finished = Some(Arc::new(handler));
    }

    /// Start the exchange.
    ///
    /// If a transport task is bound it is resumed. A cycle that is already
    /// preparing, waiting for a retry, or processing its response is left
    /// alone, and a cycle that was removed from its session does nothing.
    pub fn start(&self) {
        self.start_inner(None);
    }

    /// Start the exchange with a completion handler.
    pub fn start_with<F>(&self, handler: F)
    where
        F: Fn(&Cycle, Result<()>) + Send + Sync + 'static,
    {
        self.start_inner(Some(Arc::new(handler)));
    }

    fn start_inner(&self, handler: Option<CompletionHandler>) {
        enum Next {
            Resume(TaskId),
            Prepare,
            Wait(Phase),
        }

        let Some(session) = self.session_inner() else {
            warn!(cycle = %self.id(), "Session is gone, cycle not started");
            return;
        };

        let next = {
            let registry = session.registry.lock();
            let mut state = self.inner.state.lock();
            if !registry.contains(self.id()) || state.phase == Phase::Finished {
                debug!(cycle = %self.id(), "Cycle is no longer registered, not starting");
                return;
            }
            if let Some(handler) = handler {
                state.completion = Some(handler);
            }
            match (state.task, state.phase) {
                (Some(task), _) => Next::Resume(task),
                (None, Phase::Idle) => {
                    state.begin_preparation();
                    Next::Prepare
                }
                (None, phase) => Next::Wait(phase),
            }
        };

        match next {
            Next::Resume(task) => session.transport.resume(task),
            Next::Prepare => session.prepare(self.clone()),
            Next::Wait(phase) => debug!(cycle = %self.id(), ?phase, "Cycle already in progress"),
        }
    }

    /// Cancel the bound task, drop the current attempt, and start again.
    ///
    /// A pending retry is started right away. Cycles that are preparing or
    /// processing their response are left alone.
    pub fn restart(&self) {
        let Some(session) = self.session_inner() else {
            return;
        };

        let cancelled = {
            let mut registry = session.registry.lock();
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Idle | Phase::Running | Phase::RetryPending => {}
                phase => {
                    debug!(cycle = %self.id(), ?phase, "Cycle cannot restart now");
                    return;
                }
            }
            let task = state.task.take();
            if let Some(task) = task {
                registry.unbind(task);
            }
            state.phase = Phase::Idle;
            task
        };

        if let Some(task) = cancelled {
            session.transport.cancel(task);
        }
        self.start();
    }

    /// Start the next attempt once the retry delay has passed.
    pub(crate) fn resume_after_retry(&self) {
        let Some(session) = self.session_inner() else {
            return;
        };

        {
            let registry = session.registry.lock();
            let mut state = self.inner.state.lock();
            if !registry.contains(self.id()) || state.phase != Phase::RetryPending {
                debug!(cycle = %self.id(), phase = ?state.phase, "Retry no longer wanted");
                return;
            }
            state.begin_preparation();
        }
        session.prepare(self.clone());
    }

    /// Cancel the exchange. An explicit cancellation suppresses the
    /// completion handler.
    pub fn cancel(&self, explicitly: bool) {
        if let Some(session) = self.session() {
            session.cancel_cycles(std::slice::from_ref(self), explicitly);
        }
    }

    /// Start the exchange and wait for its outcome.
    ///
    /// Resolves to [`Error::Cancelled`] if the completion is suppressed by
    /// an explicit cancellation or the cycle cannot start. The session is
    /// kept alive while waiting.
    pub async fn send(&self) -> Result<Cycle> {
        let _session = self.session();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.start_with(move |cycle, result| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(result.map(|()| cycle.clone()));
            }
        });
        rx.await.unwrap_or_else(|_| Err(Error::Cancelled))
    }
}
