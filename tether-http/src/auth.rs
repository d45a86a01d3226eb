//! Authentication challenge handling.
//!
//! When the transport reports a challenge, the session offers it to every
//! [`Authentication`] configured for the cycle. Each handler that can
//! handle it decides an [`AuthAction`], and [`perform_action`] turns that
//! action into a [`Disposition`] for the transport.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use crate::cycle::Cycle;
use crate::{Error, Result};

/// Authentication scheme named by a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// HTTP Basic.
    Basic,
    /// HTTP Digest.
    Digest,
    /// NTLM.
    Ntlm,
    /// Negotiate (Kerberos/SPNEGO).
    Negotiate,
    /// Bearer token.
    Bearer,
    /// Any other scheme, as sent by the server.
    Other(String),
}

impl AuthMethod {
    /// Parse a scheme name. Matching is case-insensitive.
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme.trim().to_ascii_lowercase().as_str() {
            "basic" => Self::Basic,
            "digest" => Self::Digest,
            "ntlm" => Self::Ntlm,
            "negotiate" => Self::Negotiate,
            "bearer" => Self::Bearer,
            _ => Self::Other(scheme.trim().to_string()),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => f.write_str("Basic"),
            Self::Digest => f.write_str("Digest"),
            Self::Ntlm => f.write_str("NTLM"),
            Self::Negotiate => f.write_str("Negotiate"),
            Self::Bearer => f.write_str("Bearer"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// The realm a challenge protects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSpace {
    /// Host of the protected resource.
    pub host: String,
    /// Port of the protected resource.
    pub port: Option<u16>,
    /// Realm announced by the server.
    pub realm: Option<String>,
    /// Authentication scheme.
    pub method: AuthMethod,
}

/// An authentication prompt raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// What is being protected.
    pub protection_space: ProtectionSpace,
    /// How many times credentials were already rejected for this task.
    pub previous_failure_count: u32,
}

impl Challenge {
    /// Create a challenge.
    pub fn new(protection_space: ProtectionSpace, previous_failure_count: u32) -> Self {
        Self {
            protection_space,
            previous_failure_count,
        }
    }

    /// Build a challenge from a `WWW-Authenticate` header value.
    pub fn from_www_authenticate(url: &Url, header: &str, previous_failure_count: u32) -> Self {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));

        let realm = rest.split(',').find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_string())
        });

        Self {
            protection_space: ProtectionSpace {
                host: url.host_str().unwrap_or_default().to_string(),
                port: url.port_or_known_default(),
                realm,
                method: AuthMethod::from_scheme(scheme),
            },
            previous_failure_count,
        }
    }
}

/// What the transport should do about a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Use the supplied credential.
    UseCredential,
    /// Let the transport handle it; for HTTP this means delivering the 401.
    PerformDefaultHandling,
    /// Cancel the transfer.
    CancelChallenge,
    /// Reject this protection space and let the transport try the next one.
    RejectProtectionSpace,
}

/// A username and password supplied for one challenge. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Credential {
    /// Create a credential.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Answer to a challenge.
pub type ChallengeAnswer = (Disposition, Option<Credential>);

/// Delivers the answer to a challenge back to the transport.
///
/// Only the first answer counts; later ones are logged and dropped.
#[derive(Clone)]
pub struct ChallengeResponder {
    tx: Arc<Mutex<Option<oneshot::Sender<ChallengeAnswer>>>>,
}

impl ChallengeResponder {
    /// Create a responder and the receiver its answer arrives on.
    pub fn new() -> (Self, oneshot::Receiver<ChallengeAnswer>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Answer the challenge. Returns `false` if it was already answered.
    pub fn respond(&self, disposition: Disposition, credential: Option<Credential>) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            debug!(?disposition, "Challenge already answered");
            return false;
        };
        if tx.send((disposition, credential)).is_err() {
            debug!(?disposition, "Challenge receiver is gone");
        }
        true
    }

    /// Check if the challenge was answered.
    pub fn is_answered(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl fmt::Debug for ChallengeResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResponder")
            .field("answered", &self.is_answered())
            .finish()
    }
}

/// What a handler decided to do about a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Supply credentials without asking anyone.
    UseCredentials,
    /// Ask the user first, then continue with the action they choose.
    UseCredentialsWithInteraction,
    /// Let the transport handle the challenge.
    PerformDefaultHandling,
    /// Reject the protection space.
    RejectProtectionSpace,
    /// Cancel the transfer.
    CancelConnection,
}

/// Guard flag for a handler's interactive flow.
#[derive(Debug, Default)]
pub struct InteractionState(AtomicBool);

impl InteractionState {
    /// Create a state that is not interacting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the interactive flow. Returns `false` if already interacting.
    pub fn begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Leave the interactive flow.
    pub fn end(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Check if an interactive flow is running.
    pub fn is_interacting(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Called once an interactive flow ends, with the action to continue with.
pub type InteractionDone = Box<dyn FnOnce(AuthAction) + Send>;

/// A strategy for answering authentication challenges.
pub trait Authentication: Send + Sync {
    /// Check if this handler can answer the challenge.
    fn can_handle(&self, challenge: &Challenge, cycle: &Cycle) -> bool;

    /// Decide what to do. Credentials are tried silently first; once they
    /// have failed, the user is asked.
    fn decide_action(&self, challenge: &Challenge, _cycle: &Cycle) -> AuthAction {
        if challenge.previous_failure_count == 0 {
            AuthAction::UseCredentials
        } else {
            AuthAction::UseCredentialsWithInteraction
        }
    }

    /// Produce the credential for [`AuthAction::UseCredentials`].
    fn credential(&self, _challenge: &Challenge, _cycle: &Cycle) -> Result<Credential> {
        Err(Error::NotImplemented("Authentication::credential"))
    }

    /// Start an interactive flow; call `done` when it ends.
    fn start_interaction(
        &self,
        _challenge: &Challenge,
        _cycle: &Cycle,
        _done: InteractionDone,
    ) -> Result<()> {
        Err(Error::NotImplemented("Authentication::start_interaction"))
    }

    /// Interaction guard of this handler.
    fn interaction(&self) -> &InteractionState;
}

/// Carry out an action for a challenge and answer it through `responder`.
pub fn perform_action(
    handler: Arc<dyn Authentication>,
    action: AuthAction,
    challenge: Challenge,
    responder: ChallengeResponder,
    cycle: Cycle,
) {
    match action {
        AuthAction::UseCredentials => match handler.credential(&challenge, &cycle) {
            Ok(credential) => {
                responder.respond(Disposition::UseCredential, Some(credential));
            }
            Err(e) => {
                warn!(cycle = %cycle.id(), error = %e, "No credential for challenge");
                responder.respond(Disposition::CancelChallenge, None);
            }
        },
        AuthAction::UseCredentialsWithInteraction => {
            if !handler.interaction().begin() {
                debug!(cycle = %cycle.id(), "Interaction already running, cancelling challenge");
                responder.respond(Disposition::CancelChallenge, None);
                return;
            }

            let done: InteractionDone = {
                let handler = handler.clone();
                let challenge = challenge.clone();
                let responder = responder.clone();
                let cycle = cycle.clone();
                Box::new(move |next| {
                    handler.interaction().end();
                    perform_action(handler, next, challenge, responder, cycle);
                })
            };

            if let Err(e) = handler.start_interaction(&challenge, &cycle, done) {
                warn!(cycle = %cycle.id(), error = %e, "Interaction could not start");
                handler.interaction().end();
                responder.respond(Disposition::CancelChallenge, None);
            }
        }
        AuthAction::PerformDefaultHandling => {
            responder.respond(Disposition::PerformDefaultHandling, None);
        }
        AuthAction::RejectProtectionSpace => {
            responder.respond(Disposition::RejectProtectionSpace, None);
        }
        AuthAction::CancelConnection => {
            responder.respond(Disposition::CancelChallenge, None);
        }
    }
}

/// Interactive flow for [`BasicAuthentication`].
pub type Interactor = Arc<dyn Fn(&Challenge, &Cycle, InteractionDone) + Send + Sync>;

/// Username/password handler for Basic, Digest, and NTLM challenges.
pub struct BasicAuthentication {
    credentials: RwLock<(String, String)>,
    methods: Vec<AuthMethod>,
    interactor: Option<Interactor>,
    interaction: InteractionState,
}

impl BasicAuthentication {
    /// Create a handler for Basic, Digest, and NTLM challenges.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: RwLock::new((username.into(), password.into())),
            methods: vec![AuthMethod::Basic, AuthMethod::Digest, AuthMethod::Ntlm],
            interactor: None,
            interaction: InteractionState::new(),
        }
    }

    /// Restrict the schemes this handler answers.
    pub fn with_methods(mut self, methods: Vec<AuthMethod>) -> Self {
        self.methods = methods;
        self
    }

    /// Set the interactive flow used once the credentials have failed.
    pub fn with_interactor<F>(mut self, interactor: F) -> Self
    where
        F: Fn(&Challenge, &Cycle, InteractionDone) + Send + Sync + 'static,
    {
        self.interactor = Some(Arc::new(interactor));
        self
    }

    /// Replace the username and password, e.g. from an interactive flow.
    pub fn set_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        *self.credentials.write() = (username.into(), password.into());
    }

    /// Current username.
    pub fn username(&self) -> String {
        self.credentials.read().0.clone()
    }

    /// Schemes this handler answers.
    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }
}

impl fmt::Debug for BasicAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthentication")
            .field("username", &self.credentials.read().0)
            .field("methods", &self.methods)
            .field("interactive", &self.interactor.is_some())
            .finish()
    }
}

impl Authentication for BasicAuthentication {
    fn can_handle(&self, challenge: &Challenge, _cycle: &Cycle) -> bool {
        self.methods.contains(&challenge.protection_space.method)
    }

    fn credential(&self, _challenge: &Challenge, _cycle: &Cycle) -> Result<Credential> {
        let (user, password) = self.credentials.read().clone();
        Ok(Credential::new(user, password))
    }

    fn start_interaction(
        &self,
        challenge: &Challenge,
        cycle: &Cycle,
        done: InteractionDone,
    ) -> Result<()> {
        match &self.interactor {
            Some(interactor) => {
                interactor(challenge, cycle, done);
                Ok(())
            }
            None => Err(Error::NotImplemented("BasicAuthentication::start_interaction")),
        }
    }

    fn interaction(&self) -> &InteractionState {
        &self.interaction
    }
}
