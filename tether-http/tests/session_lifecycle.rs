//! Cycle lifecycle tests against the scripted transport.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_http::auth::{
    AuthAction, AuthMethod, Authentication, BasicAuthentication, Challenge, Disposition,
    InteractionDone, InteractionState, ProtectionSpace,
};
use tether_http::processor::{Processor, TextProcessor};
use tether_http::testing::MockTransport;
use tether_http::{
    Cycle, Error, Invalidation, Method, Phase, Progress, Request, Response, Result, Session,
    SessionConfig, SessionDelegate, StatusCode, TaskKind, TransportError, TransportEvent,
    UploadSource, Url,
};
use tokio::sync::mpsc;

fn setup(max_retries: u32) -> (Arc<MockTransport>, Session) {
    let transport = Arc::new(MockTransport::new());
    let config = SessionConfig::builder()
        .max_retries(max_retries)
        .retry_delay(Duration::from_secs(1))
        .build();
    let session = Session::new(transport.clone(), config);
    (transport, session)
}

fn start(cycle: &Cycle) -> mpsc::UnboundedReceiver<Result<()>> {
    let (tx, rx) = mpsc::unbounded_channel();
    cycle.start_with(move |_, result| {
        let _ = tx.send(result);
    });
    rx
}

fn challenge(failures: u32) -> Challenge {
    Challenge::new(
        ProtectionSpace {
            host: "d.com".to_string(),
            port: Some(80),
            realm: Some("Fake Realm".to_string()),
            method: AuthMethod::Basic,
        },
        failures,
    )
}

/// Records its name, then fails if told to.
struct Step {
    name: &'static str,
    fail: bool,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Step {
    fn new(name: &'static str, fail: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Processor> {
        Arc::new(Self {
            name,
            fail,
            log: log.clone(),
        })
    }

    fn run(&self) -> Result<()> {
        self.log.lock().push(self.name);
        if self.fail {
            return Err(Error::TypeMismatch {
                expected: "text",
                found: "bytes",
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Processor for Step {
    async fn process_request(&self, _request: &mut Request) -> Result<()> {
        self.run()
    }

    async fn process_response(&self, _response: &mut Response) -> Result<()> {
        self.run()
    }
}

#[tokio::test]
async fn test_successful_cycle() {
    let (transport, session) = setup(3);
    let cycle = session
        .get("http://d.com/hello")
        .response_processors(vec![Arc::new(TextProcessor::new())])
        .build()
        .unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    assert_eq!(session.cycle_for_task(tasks[0]).unwrap(), cycle);
    assert!(transport.respond(tasks[0], 200, b"Hello World"));

    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(cycle.phase(), Phase::Finished);
    assert_eq!(cycle.response().status(), Some(StatusCode::OK));
    assert_eq!(cycle.response().text().as_deref(), Some("Hello World"));
    assert_eq!(
        cycle.response().object().and_then(|o| o.as_text()),
        Some("Hello World")
    );
    assert!(cycle.request().timestamp().is_some());
    assert!(cycle.response().timestamp().is_some());
    assert_eq!(session.cycle_count(), 0);
    assert!(results.recv().await.is_none());
}

#[tokio::test]
async fn test_send_resolves_with_cycle() {
    let (transport, session) = setup(3);
    let pending = tokio::spawn(session.get("http://d.com/").send());

    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 204, b"");

    let cycle = pending.await.unwrap().unwrap();
    assert_eq!(cycle.response().status_code(), Some(204));
    assert!(cycle.response().data().is_empty());
}

#[tokio::test]
async fn test_double_start_creates_one_task() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);
    cycle.start();

    let tasks = transport.wait_for_tasks(1).await;
    cycle.start();
    transport.respond(tasks[0], 200, b"ok");

    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(transport.created().len(), 1);

    // A finished cycle does not start again.
    cycle.start();
    tokio::task::yield_now().await;
    assert_eq!(transport.created().len(), 1);
}

#[tokio::test]
async fn test_explicit_cancel_suppresses_completion() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    cycle.cancel(true);

    assert!(results.recv().await.is_none());
    assert_eq!(transport.cancelled(), vec![tasks[0]]);
    assert!(cycle.explicitly_canceling());
    assert!(!session.contains(&cycle));
}

#[tokio::test]
async fn test_cancel_reports_cancellation() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    transport.wait_for_tasks(1).await;
    cycle.cancel(false);

    let error = results.recv().await.unwrap().unwrap_err();
    assert!(error.is_cancelled());
    assert_eq!(session.cycle_count(), 0);
}

#[tokio::test]
async fn test_cancel_idle_cycle() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    cycle.cancel(true);

    assert_eq!(cycle.phase(), Phase::Finished);
    assert!(!session.contains(&cycle));
    cycle.start();
    tokio::task::yield_now().await;
    assert!(transport.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_on_service_unavailable() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 503, b"busy");

    let tasks = transport.wait_for_tasks(2).await;
    assert_ne!(tasks[0], tasks[1]);
    assert_eq!(cycle.retried_count(), 1);
    assert_eq!(cycle.task(), Some(tasks[1]));
    transport.respond(tasks[1], 200, b"ok");

    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(cycle.response().status_code(), Some(200));
    assert_eq!(cycle.response().data(), b"ok");
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_retry_up_to_the_limit() {
    let (transport, session) = setup(2);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    for attempt in 1..=3 {
        let tasks = transport.wait_for_tasks(attempt).await;
        transport.fail(tasks[attempt - 1], TransportError::TimedOut);
    }

    let error = results.recv().await.unwrap().unwrap_err();
    assert!(error.is_timeout());
    assert_eq!(cycle.retried_count(), 2);
    assert_eq!(transport.created().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_solicited_cycle_retries_other_failures() {
    let (transport, session) = setup(0);
    let cycle = session.get("http://d.com/").solicited(true).build().unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    transport.fail(tasks[0], TransportError::Connection("refused".to_string()));
    let tasks = transport.wait_for_tasks(2).await;
    transport.respond(tasks[1], 200, b"");

    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(cycle.retried_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retry_delay() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 503, b"");
    while cycle.phase() != Phase::RetryPending {
        tokio::task::yield_now().await;
    }

    cycle.cancel(false);
    assert!(matches!(results.recv().await.unwrap(), Err(Error::Cancelled)));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.created().len(), 1);
    assert_eq!(cycle.phase(), Phase::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_cancel_during_retry_delay() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 503, b"");
    while cycle.phase() != Phase::RetryPending {
        tokio::task::yield_now().await;
    }

    cycle.cancel(true);
    assert!(results.recv().await.is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.created().len(), 1);
    assert_eq!(cycle.phase(), Phase::Finished);
    assert!(!session.contains(&cycle));
}

/// Cancels the cycle explicitly while its completion is being handled,
/// then asks for a retry.
struct CancelBeforeRetry;

impl SessionDelegate for CancelBeforeRetry {
    fn should_retry(
        &self,
        _session: &Session,
        cycle: &Cycle,
        _error: Option<&TransportError>,
    ) -> Option<bool> {
        cycle.cancel(true);
        Some(true)
    }
}

#[tokio::test(start_paused = true)]
async fn test_explicit_cancel_before_retry_is_scheduled() {
    let (transport, session) = setup(3);
    session.set_delegate(Some(Arc::new(CancelBeforeRetry)));
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 503, b"");
    assert!(results.recv().await.is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.created().len(), 1);
    assert_eq!(cycle.phase(), Phase::Finished);
    assert_eq!(cycle.retried_count(), 0);
    assert_eq!(session.cycle_count(), 0);
}

#[tokio::test]
async fn test_finish_and_invalidate_delivers_drained_cycles() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;

    session.finish_and_invalidate(true);
    assert_eq!(transport.invalidations(), vec![Invalidation::Finish]);
    assert!(transport.cancelled().is_empty());

    transport.respond(tasks[0], 200, b"Hello World");
    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(cycle.response().text().as_deref(), Some("Hello World"));
    assert_eq!(session.cycle_count(), 0);

    let late = session.get("http://d.com/late").build().unwrap();
    let mut late_results = start(&late);
    assert!(matches!(
        late_results.recv().await.unwrap(),
        Err(Error::Transport(TransportError::Invalidated))
    ));
}

#[tokio::test]
async fn test_failure_status() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/missing").build().unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 404, b"not here");

    let error = results.recv().await.unwrap().unwrap_err();
    assert!(matches!(error, Error::StatusSeemsToHaveErred { status: 404 }));
    assert_eq!(error.status_code(), Some(404));
    assert_eq!(cycle.response().status_code(), Some(404));
    assert_eq!(cycle.retried_count(), 0);
}

struct Lenient;

impl SessionDelegate for Lenient {
    fn should_retry(
        &self,
        _session: &Session,
        _cycle: &Cycle,
        _error: Option<&TransportError>,
    ) -> Option<bool> {
        Some(false)
    }

    fn status_is_failure(&self, _session: &Session, status: StatusCode) -> Option<bool> {
        (status == StatusCode::SERVICE_UNAVAILABLE).then_some(false)
    }
}

#[tokio::test]
async fn test_delegate_overrides_policies() {
    let (transport, session) = setup(3);
    session.set_delegate(Some(Arc::new(Lenient)));

    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 503, b"");
    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(transport.created().len(), 1);

    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);
    let tasks = transport.wait_for_tasks(2).await;
    transport.respond(tasks[1], 500, b"");
    assert!(matches!(
        results.recv().await.unwrap(),
        Err(Error::StatusSeemsToHaveErred { status: 500 })
    ));
}

#[tokio::test]
async fn test_response_chain_stops_at_first_failure() {
    let (transport, session) = setup(3);
    let log = Arc::new(Mutex::new(Vec::new()));
    session.set_default_response_processors(vec![
        Step::new("first", false, &log),
        Step::new("second", true, &log),
        Step::new("third", false, &log),
    ]);

    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 200, b"data");

    assert!(matches!(
        results.recv().await.unwrap(),
        Err(Error::TypeMismatch { .. })
    ));
    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert_eq!(cycle.response().data(), b"data");
}

#[tokio::test]
async fn test_request_processor_failure_creates_no_task() {
    let (transport, session) = setup(3);
    let log = Arc::new(Mutex::new(Vec::new()));
    let cycle = session
        .post("http://d.com/")
        .object("payload")
        .request_processors(vec![Step::new("encode", true, &log)])
        .build()
        .unwrap();

    let mut results = start(&cycle);
    assert!(matches!(
        results.recv().await.unwrap(),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(transport.created().is_empty());
    assert_eq!(session.cycle_count(), 0);
}

#[tokio::test]
async fn test_request_processors_shape_the_request() {
    let (transport, session) = setup(3);
    let cycle = session
        .post("http://d.com/echo")
        .object("hi")
        .request_processors(vec![Arc::new(TextProcessor::new())])
        .build()
        .unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    let request = transport.request(tasks[0]).unwrap();
    assert_eq!(request.method(), &Method::POST);
    assert_eq!(request.body().map(|b| b.as_ref()), Some(&b"hi"[..]));

    transport.respond(tasks[0], 200, b"");
    assert!(results.recv().await.unwrap().is_ok());
}

#[tokio::test]
async fn test_identifier_is_released_when_finished() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").identifier("sync").build().unwrap();
    assert!(matches!(
        session.get("http://d.com/").identifier("sync").build(),
        Err(Error::DuplicateIdentifier(_))
    ));

    let mut results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;
    transport.respond(tasks[0], 200, b"");
    assert!(results.recv().await.unwrap().is_ok());

    assert!(session.cycle_for_identifier("sync").is_none());
    let again = session.get("http://d.com/").identifier("sync").build().unwrap();
    assert_eq!(session.cycle_for_identifier("sync"), Some(again));
}

#[tokio::test]
async fn test_restart_replaces_the_task() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    let first = transport.wait_for_tasks(1).await[0];
    cycle.restart();
    let second = transport.wait_for_tasks(2).await[1];
    assert_eq!(transport.cancelled(), vec![first]);

    transport.respond(second, 200, b"fresh");
    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(cycle.response().data(), b"fresh");
    assert!(results.recv().await.is_none());
}

/// Always answers with the default handling.
struct Deferring {
    interaction: InteractionState,
}

impl Authentication for Deferring {
    fn can_handle(&self, _challenge: &Challenge, _cycle: &Cycle) -> bool {
        true
    }

    fn decide_action(&self, _challenge: &Challenge, _cycle: &Cycle) -> AuthAction {
        AuthAction::PerformDefaultHandling
    }

    fn interaction(&self) -> &InteractionState {
        &self.interaction
    }
}

#[tokio::test]
async fn test_first_authentication_answer_wins() {
    let (transport, session) = setup(3);
    let deferring = Arc::new(Deferring {
        interaction: InteractionState::new(),
    });
    let cycle = session
        .get("http://d.com/private")
        .authentications(vec![Arc::new(BasicAuthentication::new("user", "pw")), deferring])
        .build()
        .unwrap();
    let _results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;

    let (disposition, credential) = transport.challenge(tasks[0], challenge(0)).await.unwrap();
    assert_eq!(disposition, Disposition::UseCredential);
    assert_eq!(credential.unwrap().user, "user");
}

#[tokio::test]
async fn test_unhandled_challenge_uses_default_handling() {
    let (transport, session) = setup(3);
    let cycle = session
        .get("http://d.com/private")
        .authentications(vec![Arc::new(
            BasicAuthentication::new("user", "pw").with_methods(vec![AuthMethod::Digest]),
        )])
        .build()
        .unwrap();
    let _results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;

    let (disposition, credential) = transport.challenge(tasks[0], challenge(0)).await.unwrap();
    assert_eq!(disposition, Disposition::PerformDefaultHandling);
    assert!(credential.is_none());
}

#[tokio::test]
async fn test_failed_credentials_without_interaction_cancel() {
    let (transport, session) = setup(3);
    session.set_default_authentications(vec![Arc::new(BasicAuthentication::new("user", "pw"))]);
    let cycle = session.get("http://d.com/private").build().unwrap();
    let _results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;

    let (disposition, _) = transport.challenge(tasks[0], challenge(1)).await.unwrap();
    assert_eq!(disposition, Disposition::CancelChallenge);
}

#[tokio::test]
async fn test_interactive_authentication() {
    let (transport, session) = setup(3);
    let (dones, mut pending) = mpsc::unbounded_channel::<InteractionDone>();
    let auth = Arc::new(
        BasicAuthentication::new("user", "wrong").with_interactor(move |_, _, done| {
            let _ = dones.send(done);
        }),
    );
    let cycle = session
        .get("http://d.com/private")
        .authentications(vec![auth.clone()])
        .build()
        .unwrap();
    let _results = start(&cycle);
    let tasks = transport.wait_for_tasks(1).await;

    let answer = transport.challenge(tasks[0], challenge(1));
    let done = pending.recv().await.unwrap();
    assert!(auth.interaction().is_interacting());

    // A second challenge while the user is being asked is cancelled.
    let (disposition, _) = transport.challenge(tasks[0], challenge(1)).await.unwrap();
    assert_eq!(disposition, Disposition::CancelChallenge);

    auth.set_credentials("user", "right");
    done(AuthAction::UseCredentials);
    let (disposition, credential) = answer.await.unwrap();
    assert_eq!(disposition, Disposition::UseCredential);
    assert_eq!(credential.unwrap().password, "right");
    assert!(!auth.interaction().is_interacting());
}

#[tokio::test]
async fn test_download_reports_progress_and_location() {
    let (transport, session) = setup(3);
    let location = Arc::new(Mutex::new(None::<PathBuf>));
    let progress = Arc::new(Mutex::new(Vec::new()));

    let seen = location.clone();
    let written = progress.clone();
    let cycle = session
        .download("http://d.com/file", move |_, path| {
            *seen.lock() = Some(path.to_path_buf());
        })
        .on_data_written(move |_, p: Progress| written.lock().push(p))
        .build()
        .unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    assert_eq!(transport.kind(tasks[0]), Some(TaskKind::Download));
    transport.emit(TransportEvent::DataWritten {
        task: tasks[0],
        bytes: 4,
        total: 4,
        expected: Some(4),
    });
    transport.emit(TransportEvent::DownloadFinished {
        task: tasks[0],
        location: PathBuf::from("/tmp/file.download"),
    });
    transport.respond(tasks[0], 200, b"");

    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(*location.lock(), Some(PathBuf::from("/tmp/file.download")));
    assert_eq!(
        *progress.lock(),
        vec![Progress {
            bytes: 4,
            total: 4,
            expected: Some(4)
        }]
    );
}

#[tokio::test]
async fn test_download_without_handler_fails() {
    let (transport, session) = setup(3);
    let url = Url::parse("http://d.com/file").unwrap();
    let cycle = Cycle::new(&session, Method::GET, url, TaskKind::Download).unwrap();
    let mut results = start(&cycle);

    assert!(matches!(
        results.recv().await.unwrap(),
        Err(Error::MissingDownloadHandler(_))
    ));
    assert!(transport.created().is_empty());
}

#[tokio::test]
async fn test_upload_skips_request_processors() {
    let (transport, session) = setup(3);
    let log = Arc::new(Mutex::new(Vec::new()));
    session.set_default_request_processors(vec![Step::new("encode", true, &log)]);

    let sent = Arc::new(Mutex::new(Vec::new()));
    let recorded = sent.clone();
    let cycle = session
        .upload("http://d.com/upload", UploadSource::Bytes("abc".into()))
        .on_data_sent(move |_, p| recorded.lock().push(p.total))
        .build()
        .unwrap();
    let mut results = start(&cycle);

    let tasks = transport.wait_for_tasks(1).await;
    transport.emit(TransportEvent::DataSent {
        task: tasks[0],
        bytes: 3,
        total: 3,
        expected: Some(3),
    });
    transport.respond(tasks[0], 201, b"created");

    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(*sent.lock(), vec![3]);
    assert!(log.lock().is_empty());
    assert_eq!(cycle.response().data(), b"created");
}

#[tokio::test]
async fn test_invalidate_and_cancel() {
    let (transport, session) = setup(3);
    let a = session.get("http://d.com/a").build().unwrap();
    let b = session.get("http://d.com/b").build().unwrap();
    let mut a_results = start(&a);
    let mut b_results = start(&b);
    transport.wait_for_tasks(2).await;

    session.invalidate_and_cancel(false);
    assert!(a_results.recv().await.unwrap().unwrap_err().is_cancelled());
    assert!(b_results.recv().await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(transport.invalidations(), vec![Invalidation::Cancel]);
    assert_eq!(session.cycle_count(), 0);

    let late = session.get("http://d.com/c").build().unwrap();
    let mut late_results = start(&late);
    assert!(matches!(
        late_results.recv().await.unwrap(),
        Err(Error::Transport(TransportError::Invalidated))
    ));
}

#[tokio::test]
async fn test_stale_events_are_dropped() {
    let (transport, session) = setup(3);
    let cycle = session.get("http://d.com/").build().unwrap();
    let mut results = start(&cycle);

    let first = transport.wait_for_tasks(1).await[0];
    cycle.restart();
    let second = transport.wait_for_tasks(2).await[1];

    // The old task is unbound; its late data must not leak into the response.
    transport.emit(TransportEvent::DataReceived {
        task: first,
        data: "stale".into(),
    });
    transport.respond(second, 200, b"live");

    assert!(results.recv().await.unwrap().is_ok());
    assert_eq!(cycle.response().data(), b"live");
}
