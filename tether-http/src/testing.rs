//! Test support.
//!
//! [`MockTransport`] never touches the network. It records what the session
//! asks of it and lets a test decide when and how each task finishes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_http::testing::MockTransport;
//! use tether_http::{Session, SessionConfig};
//!
//! # async fn example() -> tether_http::Result<()> {
//! let transport = Arc::new(MockTransport::new());
//! let session = Session::new(transport.clone(), SessionConfig::default());
//!
//! let pending = tokio::spawn(session.get("http://example.com").send());
//! let tasks = transport.wait_for_tasks(1).await;
//! transport.respond(tasks[0], 200, b"Hello World");
//!
//! let cycle = pending.await.expect("task panicked")?;
//! assert_eq!(cycle.response().text().as_deref(), Some("Hello World"));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use crate::TransportError;
use crate::auth::{Challenge, ChallengeAnswer, ChallengeResponder};
use crate::request::Request;
use crate::response::ResponseHead;
use crate::transport::{EventSink, Invalidation, TaskId, TaskKind, Transport, TransportEvent};

struct MockTask {
    request: Request,
    kind: TaskKind,
    events: EventSink,
    completed: bool,
}

#[derive(Default)]
struct MockState {
    tasks: HashMap<TaskId, MockTask>,
    created: Vec<TaskId>,
    resumed: Vec<TaskId>,
    cancelled: Vec<TaskId>,
    invalidations: Vec<Invalidation>,
}

/// Scripted transport for tests.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    created: Notify,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("created", &state.created)
            .field("resumed", &state.resumed)
            .field("cancelled", &state.cancelled)
            .field("invalidations", &state.invalidations)
            .finish()
    }
}

impl MockTransport {
    /// Create a transport with no tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks created so far, in order.
    pub fn created(&self) -> Vec<TaskId> {
        self.state.lock().created.clone()
    }

    /// Tasks resumed so far, in order. A task resumed twice appears twice.
    pub fn resumed(&self) -> Vec<TaskId> {
        self.state.lock().resumed.clone()
    }

    /// Tasks cancelled so far, in order.
    pub fn cancelled(&self) -> Vec<TaskId> {
        self.state.lock().cancelled.clone()
    }

    /// Invalidation requests received so far.
    pub fn invalidations(&self) -> Vec<Invalidation> {
        self.state.lock().invalidations.clone()
    }

    /// The request a task was created for.
    pub fn request(&self, task: TaskId) -> Option<Request> {
        self.state.lock().tasks.get(&task).map(|t| t.request.clone())
    }

    /// The kind of transfer a task was created for.
    pub fn kind(&self, task: TaskId) -> Option<TaskKind> {
        self.state.lock().tasks.get(&task).map(|t| t.kind.clone())
    }

    /// Wait until at least `count` tasks have been created.
    pub async fn wait_for_tasks(&self, count: usize) -> Vec<TaskId> {
        loop {
            let notified = self.created.notified();
            {
                let state = self.state.lock();
                if state.created.len() >= count {
                    return state.created.clone();
                }
            }
            notified.await;
        }
    }

    /// Send an event for a task. Returns `false` if the task is unknown or
    /// its session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let sink = {
            let mut state = self.state.lock();
            let Some(task) = state.tasks.get_mut(&event.task()) else {
                return false;
            };
            if matches!(event, TransportEvent::Completed { .. }) {
                task.completed = true;
            }
            task.events.clone()
        };
        sink.send(event)
    }

    /// Deliver `body` and complete the task with `status`.
    pub fn respond(&self, task: TaskId, status: u16, body: &[u8]) -> bool {
        self.respond_with_headers(task, status, HeaderMap::new(), body)
    }

    /// Deliver `body` and complete the task with `status` and `headers`.
    pub fn respond_with_headers(
        &self,
        task: TaskId,
        status: u16,
        headers: HeaderMap,
        body: &[u8],
    ) -> bool {
        let Some(request) = self.request(task) else {
            return false;
        };
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if !body.is_empty() {
            self.emit(TransportEvent::DataReceived {
                task,
                data: Bytes::copy_from_slice(body),
            });
        }
        self.emit(TransportEvent::Completed {
            task,
            response: Some(ResponseHead::new(status, headers, request.url().clone())),
            error: None,
        })
    }

    /// Complete the task without a response.
    pub fn fail(&self, task: TaskId, error: TransportError) -> bool {
        self.emit(TransportEvent::Completed {
            task,
            response: None,
            error: Some(error),
        })
    }

    /// Raise an authentication challenge and return where its answer lands.
    pub fn challenge(&self, task: TaskId, challenge: Challenge) -> oneshot::Receiver<ChallengeAnswer> {
        let (responder, answer) = ChallengeResponder::new();
        self.emit(TransportEvent::AuthChallenge {
            task,
            challenge,
            responder,
        });
        answer
    }
}

impl Transport for MockTransport {
    fn create_task(
        &self,
        request: &Request,
        kind: &TaskKind,
        events: EventSink,
    ) -> Result<TaskId, TransportError> {
        let task = {
            let mut state = self.state.lock();
            if !state.invalidations.is_empty() {
                return Err(TransportError::Invalidated);
            }
            let task = TaskId::next();
            state.tasks.insert(
                task,
                MockTask {
                    request: request.clone(),
                    kind: kind.clone(),
                    events,
                    completed: false,
                },
            );
            state.created.push(task);
            task
        };
        self.created.notify_waiters();
        Ok(task)
    }

    fn resume(&self, task: TaskId) {
        self.state.lock().resumed.push(task);
    }

    fn cancel(&self, task: TaskId) {
        let sink = {
            let mut state = self.state.lock();
            state.cancelled.push(task);
            match state.tasks.get_mut(&task) {
                Some(t) if !t.completed => {
                    t.completed = true;
                    Some(t.events.clone())
                }
                _ => None,
            }
        };

        if let Some(sink) = sink {
            sink.send(TransportEvent::Completed {
                task,
                response: None,
                error: Some(TransportError::Cancelled),
            });
        }
    }

    fn invalidate(&self, mode: Invalidation) {
        let pending: Vec<TaskId> = {
            let mut state = self.state.lock();
            state.invalidations.push(mode);
            match mode {
                Invalidation::Cancel => state
                    .tasks
                    .iter()
                    .filter(|(_, t)| !t.completed)
                    .map(|(id, _)| *id)
                    .collect(),
                Invalidation::Finish => Vec::new(),
            }
        };

        for task in pending {
            self.cancel(task);
        }
    }
}
