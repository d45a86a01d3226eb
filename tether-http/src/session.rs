//! Session: the registry and policy engine for live cycles.
//!
//! Every transport event and every completion is funnelled through one
//! dispatcher task per session, so events of a cycle are handled in the
//! order the transport emitted them. Locks are always taken registry
//! first, then cycle state.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use http::StatusCode;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::auth::{Authentication, Challenge, ChallengeResponder, Disposition, perform_action};
use crate::config::{SessionConfig, TransportConfig};
use crate::cycle::{CompletionHandler, Cycle, CycleId, Phase, Progress};
use crate::processor::{Processor, run_request_chain, run_response_chain};
use crate::request::Request;
use crate::response::{Response, ResponseHead};
use crate::transport::{
    EventSink, Invalidation, ReqwestTransport, TaskId, TaskKind, Transport, TransportEvent,
};
use crate::{Error, Result, TransportError};

/// Work for the dispatcher task.
pub(crate) enum Dispatch {
    Transport(TransportEvent),
    Deliver {
        cycle: Cycle,
        handler: CompletionHandler,
        result: Result<()>,
    },
}

/// Hooks to override the session's retry and status policies.
///
/// Returning `None` falls back to the default policy.
pub trait SessionDelegate: Send + Sync {
    /// Decide whether the finished attempt of `cycle` should be retried.
    fn should_retry(
        &self,
        _session: &Session,
        _cycle: &Cycle,
        _error: Option<&TransportError>,
    ) -> Option<bool> {
        None
    }

    /// Decide whether the status code counts as a failure.
    fn status_is_failure(&self, _session: &Session, _status: StatusCode) -> Option<bool> {
        None
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    cycles: HashMap<CycleId, Cycle>,
    by_task: HashMap<TaskId, CycleId>,
    by_identifier: HashMap<String, CycleId>,
}

impl Registry {
    pub(crate) fn contains(&self, id: CycleId) -> bool {
        self.cycles.contains_key(&id)
    }

    pub(crate) fn unbind(&mut self, task: TaskId) {
        self.by_task.remove(&task);
    }

    fn bound(&self, task: TaskId) -> Option<Cycle> {
        self.by_task
            .get(&task)
            .and_then(|id| self.cycles.get(id))
            .cloned()
    }

    fn remove(&mut self, id: CycleId) -> Option<Cycle> {
        let cycle = self.cycles.remove(&id)?;
        self.by_identifier.retain(|_, owner| *owner != id);
        self.by_task.retain(|_, owner| *owner != id);
        Some(cycle)
    }
}

#[derive(Default)]
pub(crate) struct Defaults {
    pub(crate) request_processors: Vec<Arc<dyn Processor>>,
    pub(crate) response_processors: Vec<Arc<dyn Processor>>,
    pub(crate) authentications: Vec<Arc<dyn Authentication>>,
}

pub(crate) struct SessionInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: SessionConfig,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) defaults: RwLock<Defaults>,
    delegate: RwLock<Option<Arc<dyn SessionDelegate>>>,
    events: mpsc::UnboundedSender<Dispatch>,
    runtime: Handle,
}

/// Registry of live cycles bound to one transport.
///
/// `Session` is a cheap handle; clones share the same registry. Cycles hold
/// only a weak link back, so keep a handle alive while cycles run.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("cycles", &self.cycle_count())
            .finish()
    }
}

impl Session {
    /// Create a session on top of a transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let runtime = Handle::current();
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            transport,
            config,
            registry: Mutex::new(Registry::default()),
            defaults: RwLock::new(Defaults::default()),
            delegate: RwLock::new(None),
            events,
            runtime: runtime.clone(),
        });
        runtime.spawn(dispatch_loop(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Create a session backed by [`ReqwestTransport`].
    pub fn with_reqwest(transport: TransportConfig, config: SessionConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(transport)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Get the transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Install or remove the policy delegate.
    pub fn set_delegate(&self, delegate: Option<Arc<dyn SessionDelegate>>) {
        *self.inner.delegate.write() = delegate;
    }

    /// Request processors used by cycles without their own.
    pub fn default_request_processors(&self) -> Vec<Arc<dyn Processor>> {
        self.inner.defaults.read().request_processors.clone()
    }

    /// Set the default request processors.
    pub fn set_default_request_processors(&self, processors: Vec<Arc<dyn Processor>>) {
        self.inner.defaults.write().request_processors = processors;
    }

    /// Response processors used by cycles without their own.
    pub fn default_response_processors(&self) -> Vec<Arc<dyn Processor>> {
        self.inner.defaults.read().response_processors.clone()
    }

    /// Set the default response processors.
    pub fn set_default_response_processors(&self, processors: Vec<Arc<dyn Processor>>) {
        self.inner.defaults.write().response_processors = processors;
    }

    /// Authentication handlers used by cycles without their own.
    pub fn default_authentications(&self) -> Vec<Arc<dyn Authentication>> {
        self.inner.defaults.read().authentications.clone()
    }

    /// Set the default authentication handlers.
    pub fn set_default_authentications(&self, authentications: Vec<Arc<dyn Authentication>>) {
        self.inner.defaults.write().authentications = authentications;
    }

    /// Register a cycle.
    pub fn add_cycle(&self, cycle: &Cycle) -> Result<()> {
        let mut registry = self.inner.registry.lock();
        if registry.contains(cycle.id()) {
            error!(cycle = %cycle.id(), "Cycle has already been added");
            return Err(Error::DuplicateCycle(cycle.id()));
        }

        let identifier = cycle.inner.state.lock().identifier.clone();
        if let Some(identifier) = identifier {
            if registry.by_identifier.contains_key(&identifier) {
                error!(cycle = %cycle.id(), %identifier, "Duplicate cycle identifier");
                return Err(Error::DuplicateIdentifier(identifier));
            }
            registry.by_identifier.insert(identifier, cycle.id());
        }
        registry.cycles.insert(cycle.id(), cycle.clone());
        Ok(())
    }

    /// Unregister a cycle. Returns `false` if it was not registered.
    pub fn remove_cycle(&self, cycle: &Cycle) -> bool {
        if self.inner.registry.lock().remove(cycle.id()).is_none() {
            warn!(cycle = %cycle.id(), "Cycle to remove is not registered");
            return false;
        }
        true
    }

    /// Check if the cycle is registered.
    pub fn contains(&self, cycle: &Cycle) -> bool {
        self.inner.registry.lock().contains(cycle.id())
    }

    /// Number of live cycles.
    pub fn cycle_count(&self) -> usize {
        self.inner.registry.lock().cycles.len()
    }

    /// All live cycles.
    pub fn cycles(&self) -> Vec<Cycle> {
        self.inner.registry.lock().cycles.values().cloned().collect()
    }

    /// Get the cycle bound to a transport task.
    pub fn cycle_for_task(&self, task: TaskId) -> Result<Cycle> {
        self.inner.registry.lock().bound(task).ok_or_else(|| {
            error!(%task, "No cycle is bound to the task");
            Error::CycleNotFound(task)
        })
    }

    /// Get the live cycle with the identifier.
    pub fn cycle_for_identifier(&self, identifier: &str) -> Option<Cycle> {
        let registry = self.inner.registry.lock();
        registry
            .by_identifier
            .get(identifier)
            .and_then(|id| registry.cycles.get(id))
            .cloned()
    }

    /// Default retry policy.
    ///
    /// Solicited cycles always retry. Others retry on a transport timeout
    /// or a 408/503 response until `max_retries` is reached.
    pub fn should_retry(
        &self,
        solicited: bool,
        retried_count: u32,
        request: &Request,
        response: Option<&Response>,
        error: Option<&TransportError>,
    ) -> bool {
        self.inner
            .should_retry(solicited, retried_count, request, response, error)
    }

    /// Cancel cycles. An explicit cancellation suppresses their completion
    /// handlers.
    pub fn cancel_cycles(&self, cycles: &[Cycle], explicitly: bool) {
        self.inner.cancel_cycles(cycles, explicitly);
    }

    /// Cancel every cycle and stop the transport from accepting new tasks.
    pub fn invalidate_and_cancel(&self, explicitly: bool) {
        let cycles = self.cycles();
        self.inner.cancel_cycles(&cycles, explicitly);
        self.inner.transport.invalidate(Invalidation::Cancel);
    }

    /// Let running tasks finish, then stop the transport from accepting new
    /// tasks.
    pub fn finish_and_invalidate(&self, explicitly: bool) {
        for cycle in self.cycles() {
            cycle.inner.state.lock().explicitly_canceling = explicitly;
        }
        self.inner.transport.invalidate(Invalidation::Finish);
    }
}

async fn dispatch_loop(session: Weak<SessionInner>, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(dispatch) = rx.recv().await {
        match dispatch {
            Dispatch::Deliver {
                cycle,
                handler,
                result,
            } => handler(&cycle, result),
            Dispatch::Transport(event) => {
                let Some(inner) = session.upgrade() else {
                    debug!("Session dropped, dispatcher stopping");
                    break;
                };
                inner.handle_event(event);
            }
        }
    }
}

impl SessionInner {
    fn handle(self: &Arc<Self>) -> Session {
        Session {
            inner: self.clone(),
        }
    }

    pub(crate) fn should_retry(
        &self,
        solicited: bool,
        retried_count: u32,
        _request: &Request,
        response: Option<&Response>,
        error: Option<&TransportError>,
    ) -> bool {
        if solicited {
            return true;
        }
        if retried_count >= self.config.max_retries {
            return false;
        }
        if error.is_some_and(TransportError::is_timeout) {
            return true;
        }
        matches!(
            response.and_then(Response::status_code),
            Some(408) | Some(503)
        )
    }

    pub(crate) fn reindex(&self, cycle: &Cycle, identifier: Option<String>) -> Result<()> {
        let mut registry = self.registry.lock();
        let registered = registry.contains(cycle.id());
        let mut state = cycle.inner.state.lock();

        if registered {
            if let Some(new) = &identifier
                && let Some(owner) = registry.by_identifier.get(new)
                && *owner != cycle.id()
            {
                error!(cycle = %cycle.id(), identifier = %new, "Duplicate cycle identifier");
                return Err(Error::DuplicateIdentifier(new.clone()));
            }
            if let Some(old) = &state.identifier
                && registry.by_identifier.get(old) == Some(&cycle.id())
            {
                registry.by_identifier.remove(old);
            }
            if let Some(new) = &identifier {
                registry.by_identifier.insert(new.clone(), cycle.id());
            }
        }

        state.identifier = identifier;
        Ok(())
    }

    /// Run the request processors off the dispatcher, then bind a task.
    pub(crate) fn prepare(self: &Arc<Self>, cycle: Cycle) {
        let (kind, mut request) = {
            let state = cycle.inner.state.lock();
            (state.kind.clone(), state.request.clone())
        };
        let processors = cycle.request_processors();
        let session = self.clone();

        self.runtime.spawn(async move {
            if kind == TaskKind::Data
                && let Err(e) = run_request_chain(&processors, &mut request).await
            {
                debug!(cycle = %cycle.id(), error = %e, "Request processor failed");
                session.finalize(&cycle, Err(e));
                return;
            }
            session.bind_and_resume(&cycle, request);
        });
    }

    fn bind_and_resume(&self, cycle: &Cycle, mut request: Request) {
        let bound = {
            let mut registry = self.registry.lock();
            if !registry.contains(cycle.id()) {
                debug!(cycle = %cycle.id(), "Cycle removed while preparing");
                return;
            }
            let mut state = cycle.inner.state.lock();
            if state.phase != Phase::Preparing || state.task.is_some() {
                debug!(cycle = %cycle.id(), phase = ?state.phase, "Cycle no longer preparing");
                return;
            }

            if state.kind == TaskKind::Download && state.download_finished.is_none() {
                error!(cycle = %cycle.id(), "Download cycle has no download-finished handler");
                Err(Error::MissingDownloadHandler(cycle.id()))
            } else {
                request.set_timestamp(Some(SystemTime::now()));
                let events = EventSink::new(self.events.clone());
                match self.transport.create_task(&request, &state.kind, events) {
                    Ok(task) => {
                        state.request = request;
                        state.task = Some(task);
                        state.phase = Phase::Running;
                        registry.by_task.insert(task, cycle.id());
                        Ok(task)
                    }
                    Err(e) => Err(Error::Transport(e)),
                }
            }
        };

        match bound {
            Ok(task) => {
                debug!(cycle = %cycle.id(), %task, "Cycle started");
                self.transport.resume(task);
            }
            Err(e) => self.finalize(cycle, Err(e)),
        }
    }

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        let task = event.task();
        let Some(cycle) = self.registry.lock().bound(task) else {
            debug!(%task, "Dropping event for unbound task");
            if let TransportEvent::AuthChallenge { responder, .. } = event {
                responder.respond(Disposition::CancelChallenge, None);
            }
            return;
        };

        match event {
            TransportEvent::Completed { response, error, .. } => {
                self.task_completed(cycle, task, response, error);
            }
            TransportEvent::DataSent {
                bytes,
                total,
                expected,
                ..
            } => {
                let handler = cycle.inner.state.lock().data_sent.clone();
                if let Some(handler) = handler {
                    handler(&cycle, Progress { bytes, total, expected });
                }
            }
            TransportEvent::DataWritten {
                bytes,
                total,
                expected,
                ..
            } => {
                let handler = cycle.inner.state.lock().data_written.clone();
                if let Some(handler) = handler {
                    handler(&cycle, Progress { bytes, total, expected });
                }
            }
            TransportEvent::DownloadFinished { location, .. } => {
                let handler = cycle.inner.state.lock().download_finished.clone();
                if let Some(handler) = handler {
                    handler(&cycle, &location);
                }
            }
            TransportEvent::DataReceived { data, .. } => {
                let mut state = cycle.inner.state.lock();
                if state.task == Some(task) {
                    state.response.append_data(&data);
                }
            }
            TransportEvent::AuthChallenge {
                challenge,
                responder,
                ..
            } => self.dispatch_challenge(&cycle, challenge, responder),
        }
    }

    fn dispatch_challenge(&self, cycle: &Cycle, challenge: Challenge, responder: ChallengeResponder) {
        let mut handled = 0;
        for handler in cycle.authentications() {
            if !handler.can_handle(&challenge, cycle) {
                continue;
            }
            handled += 1;
            let action = handler.decide_action(&challenge, cycle);
            debug!(
                cycle = %cycle.id(),
                method = %challenge.protection_space.method,
                ?action,
                "Handling authentication challenge"
            );
            perform_action(
                handler,
                action,
                challenge.clone(),
                responder.clone(),
                cycle.clone(),
            );
        }

        if handled == 0 {
            debug!(cycle = %cycle.id(), "No handler for challenge, using default handling");
            responder.respond(Disposition::PerformDefaultHandling, None);
        }
    }

    fn task_completed(
        self: &Arc<Self>,
        cycle: Cycle,
        task: TaskId,
        head: Option<ResponseHead>,
        error: Option<TransportError>,
    ) {
        {
            let mut registry = self.registry.lock();
            registry.unbind(task);
            let mut state = cycle.inner.state.lock();
            if state.task != Some(task) {
                debug!(cycle = %cycle.id(), %task, "Completion for a replaced task");
                return;
            }
            state.task = None;
            if let Some(head) = head {
                state.response.set_head(head);
            }
        }

        // Only a cancellation error consults the explicit flag. A task that
        // drains normally after `finish_and_invalidate` is delivered as usual.
        let error = match error {
            Some(e) if e.is_cancelled() => {
                self.finalize(&cycle, Err(Error::Transport(e)));
                return;
            }
            other => other,
        };

        if self.decide_retry(&cycle, error.as_ref()) {
            self.schedule_retry(cycle);
            return;
        }

        let status = cycle.inner.state.lock().response.status();
        if let Some(status) = status
            && self.status_is_failure(status)
        {
            self.finalize(
                &cycle,
                Err(Error::StatusSeemsToHaveErred {
                    status: status.as_u16(),
                }),
            );
            return;
        }

        if let Some(e) = error {
            self.finalize(&cycle, Err(Error::Transport(e)));
            return;
        }

        self.process_response(cycle);
    }

    fn decide_retry(self: &Arc<Self>, cycle: &Cycle, error: Option<&TransportError>) -> bool {
        let delegate = self.delegate.read().clone();
        if let Some(delegate) = delegate
            && let Some(retry) = delegate.should_retry(&self.handle(), cycle, error)
        {
            return retry;
        }

        let state = cycle.inner.state.lock();
        self.should_retry(
            state.solicited,
            state.retried_count,
            &state.request,
            Some(&state.response),
            error,
        )
    }

    fn status_is_failure(self: &Arc<Self>, status: StatusCode) -> bool {
        let delegate = self.delegate.read().clone();
        delegate
            .and_then(|d| d.status_is_failure(&self.handle(), status))
            .unwrap_or(status.as_u16() >= 400)
    }

    fn schedule_retry(self: &Arc<Self>, cycle: Cycle) {
        let attempt = {
            let mut state = cycle.inner.state.lock();
            if state.phase != Phase::Running {
                return;
            }
            state.retried_count += 1;
            state.phase = Phase::RetryPending;
            state.retried_count
        };

        let delay = self.config.retry_delay;
        debug!(cycle = %cycle.id(), attempt, ?delay, "Retrying cycle");

        let session = Arc::downgrade(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if session.upgrade().is_some() {
                cycle.resume_after_retry();
            }
        });
    }

    fn process_response(self: &Arc<Self>, cycle: Cycle) {
        let mut response = {
            let mut state = cycle.inner.state.lock();
            if state.phase != Phase::Running {
                debug!(
                    cycle = %cycle.id(),
                    phase = ?state.phase,
                    "Cycle finished before processing"
                );
                return;
            }
            state.phase = Phase::Processing;
            mem::take(&mut state.response)
        };
        let processors = cycle.response_processors();
        let session = self.clone();

        self.runtime.spawn(async move {
            let result = run_response_chain(&processors, &mut response).await;
            cycle.inner.state.lock().response = response;
            if let Err(e) = &result {
                debug!(cycle = %cycle.id(), error = %e, "Response processor failed");
            }
            session.finalize(&cycle, result);
        });
    }

    fn cancel_cycles(&self, cycles: &[Cycle], explicitly: bool) {
        enum Cancel {
            Task(TaskId),
            Finalize,
        }

        for cycle in cycles {
            let cancel = {
                let mut state = cycle.inner.state.lock();
                if state.phase == Phase::Finished {
                    continue;
                }
                state.explicitly_canceling = explicitly;
                match (state.task, state.phase) {
                    (Some(task), _) => Cancel::Task(task),
                    // `Running` without a task: the completion is being handled
                    // and a retry may be about to be scheduled.
                    (
                        None,
                        Phase::Idle | Phase::Preparing | Phase::Running | Phase::RetryPending,
                    ) => Cancel::Finalize,
                    (None, _) => continue,
                }
            };

            match cancel {
                Cancel::Task(task) => {
                    debug!(cycle = %cycle.id(), %task, explicitly, "Cancelling task");
                    self.transport.cancel(task);
                }
                Cancel::Finalize => self.finalize(cycle, Err(Error::Cancelled)),
            }
        }
    }

    /// Finish a cycle exactly once: unregister it, then hand the result to
    /// its completion handler on the dispatcher.
    pub(crate) fn finalize(&self, cycle: &Cycle, result: Result<()>) {
        let (handler, suppressed) = {
            let mut registry = self.registry.lock();
            let mut state = cycle.inner.state.lock();
            if state.phase == Phase::Finished {
                debug!(cycle = %cycle.id(), "Cycle already finished");
                return;
            }
            state.phase = Phase::Finished;
            state.task = None;
            registry.remove(cycle.id());

            let suppressed = state.explicitly_canceling
                && result.as_ref().err().is_some_and(Error::is_cancelled);
            (state.completion.take(), suppressed)
        };

        match &result {
            Ok(()) => debug!(cycle = %cycle.id(), "Cycle finished"),
            Err(e) => debug!(cycle = %cycle.id(), error = %e, suppressed, "Cycle failed"),
        }
        if suppressed {
            return;
        }

        let Some(handler) = handler else {
            return;
        };
        let deliver = Dispatch::Deliver {
            cycle: cycle.clone(),
            handler,
            result,
        };
        if let Err(mpsc::error::SendError(Dispatch::Deliver {
            cycle,
            handler,
            result,
        })) = self.events.send(deliver)
        {
            handler(&cycle, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use http::Method;
    use url::Url;

    fn session(max_retries: u32) -> Session {
        let config = SessionConfig::builder().max_retries(max_retries).build();
        Session::new(Arc::new(MockTransport::new()), config)
    }

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("http://d.com").unwrap())
    }

    #[tokio::test]
    async fn test_retry_policy() {
        let session = session(3);
        let req = request();

        assert!(session.should_retry(true, 100, &req, None, Some(&TransportError::Cancelled)));
        assert!(session.should_retry(false, 0, &req, None, Some(&TransportError::TimedOut)));
        assert!(!session.should_retry(false, 3, &req, None, Some(&TransportError::TimedOut)));
        assert!(!session.should_retry(false, 0, &req, None, Some(&TransportError::Other("x".into()))));
        assert!(!session.should_retry(false, 0, &req, None, None));
    }

    #[tokio::test]
    async fn test_retry_on_status() {
        let session = session(3);
        let req = request();
        let mut response = Response::new();
        response.set_head(ResponseHead::new(
            StatusCode::SERVICE_UNAVAILABLE,
            Default::default(),
            Url::parse("http://d.com").unwrap(),
        ));
        assert!(session.should_retry(false, 2, &req, Some(&response), None));
        assert!(!session.should_retry(false, 3, &req, Some(&response), None));

        response.set_head(ResponseHead::new(
            StatusCode::NOT_FOUND,
            Default::default(),
            Url::parse("http://d.com").unwrap(),
        ));
        assert!(!session.should_retry(false, 0, &req, Some(&response), None));
    }

    #[tokio::test]
    async fn test_registry_identifiers() {
        let session = session(3);
        let url = Url::parse("http://d.com").unwrap();
        let a = Cycle::new(&session, Method::GET, url.clone(), TaskKind::Data).unwrap();
        let b = Cycle::new(&session, Method::GET, url, TaskKind::Data).unwrap();

        a.set_identifier(Some("one".to_string())).unwrap();
        assert_eq!(session.cycle_for_identifier("one"), Some(a.clone()));
        assert!(matches!(
            b.set_identifier(Some("one".to_string())),
            Err(Error::DuplicateIdentifier(_))
        ));

        a.set_identifier(Some("two".to_string())).unwrap();
        assert!(session.cycle_for_identifier("one").is_none());
        b.set_identifier(Some("one".to_string())).unwrap();

        assert!(matches!(session.add_cycle(&a), Err(Error::DuplicateCycle(_))));
        assert_eq!(session.cycle_count(), 2);
        assert!(session.remove_cycle(&a));
        assert!(!session.remove_cycle(&a));
        assert!(session.cycle_for_identifier("two").is_none());
        assert!(matches!(
            session.cycle_for_task(TaskId::next()),
            Err(Error::CycleNotFound(_))
        ));
    }
}
