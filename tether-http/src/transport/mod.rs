//! Transport abstraction.
//!
//! A transport executes data, upload, and download transfers and reports
//! what happens to them as [`TransportEvent`]s through an [`EventSink`].
//! The session routes every event to the cycle bound to the task.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::TransportError;
use crate::auth::{Challenge, ChallengeResponder};
use crate::request::Request;
use crate::response::ResponseHead;
use crate::session::Dispatch;

mod network;

pub use network::ReqwestTransport;

/// Identity of one transport task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate a process-wide unique task id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Where the body of an upload comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadSource {
    /// In-memory bytes.
    Bytes(Bytes),
    /// A local file.
    File(PathBuf),
}

/// The kind of transfer a cycle performs.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaskKind {
    /// Body is received into memory.
    #[default]
    Data,
    /// Body is sent from a source; the response is received into memory.
    Upload(UploadSource),
    /// Body is written to a file; a download handler receives its location.
    Download,
}

impl TaskKind {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Upload(_) => "upload",
            Self::Download => "download",
        }
    }
}

/// How a transport should stop accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// Cancel outstanding tasks now.
    Cancel,
    /// Let outstanding tasks finish.
    Finish,
}

/// Something that happened to a transport task.
#[derive(Debug)]
pub enum TransportEvent {
    /// The task finished, with or without a response.
    Completed {
        /// The task.
        task: TaskId,
        /// Status line and headers, if any were received.
        response: Option<ResponseHead>,
        /// Why the transfer failed, if it did.
        error: Option<TransportError>,
    },
    /// Upload progress.
    DataSent {
        /// The task.
        task: TaskId,
        /// Bytes sent since the last event.
        bytes: u64,
        /// Bytes sent so far.
        total: u64,
        /// Total bytes expected, if known.
        expected: Option<u64>,
    },
    /// Download progress.
    DataWritten {
        /// The task.
        task: TaskId,
        /// Bytes written since the last event.
        bytes: u64,
        /// Bytes written so far.
        total: u64,
        /// Total bytes expected, if known.
        expected: Option<u64>,
    },
    /// A download finished and the body is at `location`.
    DownloadFinished {
        /// The task.
        task: TaskId,
        /// Local file holding the body.
        location: PathBuf,
    },
    /// A chunk of the response body arrived.
    DataReceived {
        /// The task.
        task: TaskId,
        /// The chunk.
        data: Bytes,
    },
    /// The server asked for credentials.
    AuthChallenge {
        /// The task.
        task: TaskId,
        /// The challenge.
        challenge: Challenge,
        /// Receives the disposition chosen for the challenge.
        responder: ChallengeResponder,
    },
}

impl TransportEvent {
    /// The task the event belongs to.
    pub fn task(&self) -> TaskId {
        match self {
            Self::Completed { task, .. }
            | Self::DataSent { task, .. }
            | Self::DataWritten { task, .. }
            | Self::DownloadFinished { task, .. }
            | Self::DataReceived { task, .. }
            | Self::AuthChallenge { task, .. } => *task,
        }
    }
}

/// Channel a transport reports task events through.
///
/// Events sent through one sink are delivered in order.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Dispatch>) -> Self {
        Self { tx }
    }

    /// Report an event. Returns `false` if the session is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(Dispatch::Transport(event)).is_ok()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// An engine that executes HTTP transfers.
///
/// Methods must not block and must not call back into the session
/// synchronously; everything a task does is reported through the sink
/// given to [`create_task`](Transport::create_task).
pub trait Transport: Send + Sync {
    /// Create a suspended task for the request.
    fn create_task(
        &self,
        request: &Request,
        kind: &TaskKind,
        events: EventSink,
    ) -> Result<TaskId, TransportError>;

    /// Start or continue a task.
    fn resume(&self, task: TaskId);

    /// Cancel a task. The task completes with [`TransportError::Cancelled`].
    fn cancel(&self, task: TaskId);

    /// Stop accepting new tasks, cancelling or draining the outstanding ones.
    fn invalidate(&self, mode: Invalidation);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert!(a.to_string().starts_with("task-"));
    }

    #[test]
    fn test_event_task() {
        let task = TaskId::next();
        let event = TransportEvent::DataReceived {
            task,
            data: Bytes::from_static(b"x"),
        };
        assert_eq!(event.task(), task);
        assert_eq!(TaskKind::default().name(), "data");
    }

    #[tokio::test]
    async fn test_sink_reports_closed_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        drop(rx);
        assert!(!sink.send(TransportEvent::DataReceived {
            task: TaskId::next(),
            data: Bytes::new(),
        }));
    }
}
