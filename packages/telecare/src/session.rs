//! Session lifecycle: token recovery, login, logout, onboarding redirects.
//!
//! A [`SessionManager`] owns the only authenticated identity in the client.
//! Its state is published through a `watch` channel; views subscribe to it
//! instead of polling. A session exists only when the token decodes, has not
//! expired, and the backend returned the owner's profile. Anything less
//! leaves the client anonymous.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use telecare_auth::{AuthError, Claims};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use crate::api::{ApiClient, Credentials, Registration};
use crate::error::ApiError;
use crate::models::User;
use crate::token_store::TokenStore;

/// Where the front-end should go after a session transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Onboarding,
    Dashboard,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::Onboarding => "/onboarding",
            Self::Dashboard => "/dashboard",
        }
    }
}

/// User-facing session failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A recovered token turned out to be expired, malformed, or unverifiable.
    #[error("Authentication failed. Please log in again.")]
    AuthenticationFailed,

    #[error("Invalid credentials. Please try again.")]
    InvalidCredentials,

    /// The backend refused a login or registration with its own message.
    #[error("{0}")]
    Rejected(String),

    #[error("Could not save the session locally. Please try again.")]
    Storage,
}

/// An established session. All three parts are present or none is.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub claims: Claims,
    pub user: User,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .field("user", &self.user)
            .finish()
    }
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    /// True until `initialize` has finished.
    pub loading: bool,
    pub error: Option<SessionError>,
    /// Latest navigation request, for the front-end to act on.
    pub redirect: Option<Route>,
}

impl SessionSnapshot {
    fn starting() -> Self {
        Self {
            session: None,
            loading: true,
            error: None,
            redirect: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }
}

/// What the session manager needs from the backend.
pub trait SessionBackend: Send + Sync {
    fn fetch_profile(&self, token: &str) -> impl Future<Output = Result<User, ApiError>> + Send;

    /// Called whenever the established token changes.
    fn bearer_changed(&self, _token: Option<&str>) {}
}

impl SessionBackend for ApiClient {
    async fn fetch_profile(&self, token: &str) -> Result<User, ApiError> {
        ApiClient::fetch_profile(self, token).await
    }

    fn bearer_changed(&self, token: Option<&str>) {
        self.set_bearer(token.map(str::to_owned));
    }
}

/// Why a candidate token was refused.
#[derive(Debug)]
enum Rejection {
    Token(AuthError),
    Profile(ApiError),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(e) => write!(f, "{e} ({})", e.error_code()),
            Self::Profile(e) => write!(f, "profile fetch failed: {e}"),
        }
    }
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct SessionManager<B> {
    backend: B,
    store: Arc<dyn TokenStore>,
    state: watch::Sender<SessionSnapshot>,
    /// Serializes transitions so two logins cannot interleave.
    transition: Mutex<()>,
    now: Clock,
}

impl<B: SessionBackend> SessionManager<B> {
    pub fn new(backend: B, store: Arc<dyn TokenStore>) -> Self {
        Self {
            backend,
            store,
            state: watch::Sender::new(SessionSnapshot::starting()),
            transition: Mutex::new(()),
            now: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Replace the wall clock (Unix seconds) used for expiry checks.
    pub fn with_clock(mut self, now: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.now = Arc::new(now);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.expire_if_due();
        self.state.subscribe()
    }

    /// Latest snapshot. A session whose token has expired is dropped first.
    pub fn current(&self) -> SessionSnapshot {
        self.expire_if_due();
        self.state.borrow().clone()
    }

    /// Drop the session if its token expired. Returns whether it did.
    ///
    /// Expiry ends the session the same way a rejected token does on
    /// startup: the store and bearer are cleared, the error is surfaced and
    /// the front-end is sent to Login.
    pub fn expire_if_due(&self) -> bool {
        let now = (self.now)();
        let expired = match &self.state.borrow().session {
            Some(session) if session.claims.is_expired_at(now) => session.token.clone(),
            _ => return false,
        };

        let dropped = self.state.send_if_modified(|s| {
            if s.token() != Some(expired.as_str()) {
                return false;
            }
            s.session = None;
            s.error = Some(SessionError::AuthenticationFailed);
            s.redirect = Some(Route::Login);
            s.loading = false;
            true
        });
        if dropped {
            warn!("Session token expired; logging out");
            if let Err(e) = self.store.clear() {
                warn!("Failed to clear persisted token: {}", e);
            }
            self.backend.bearer_changed(None);
        }
        dropped
    }

    /// Resolves once the current session has expired and been dropped.
    /// Never resolves while anonymous.
    pub async fn expired(&self) {
        loop {
            let exp = self.state.borrow().session.as_ref().map(|s| s.claims.exp);
            let Some(exp) = exp else {
                return std::future::pending().await;
            };
            let remaining = exp.saturating_sub((self.now)());
            if remaining > 0 {
                tokio::time::sleep(Duration::from_secs(remaining.unsigned_abs())).await;
            }
            if self.expire_if_due() {
                return;
            }
        }
    }

    /// Recover the persisted token on application start.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        let _guard = self.transition.lock().await;

        let stored = self.store.load().unwrap_or_else(|e| {
            warn!("Failed to read persisted token: {}", e);
            None
        });

        let Some(token) = stored else {
            info!("No persisted token; starting anonymous");
            self.state.send_modify(|s| {
                s.session = None;
                s.loading = false;
            });
            return Ok(());
        };

        match self.verify(&token).await {
            Ok(session) => {
                info!(user = %session.user.user_id(), role = %session.claims.role, "Session restored");
                self.backend.bearer_changed(Some(&session.token));
                self.state.send_modify(|s| {
                    s.session = Some(session);
                    s.error = None;
                    s.loading = false;
                });
                Ok(())
            }
            Err(rejection) => {
                warn!("Discarding persisted token: {}", rejection);
                if let Err(e) = self.store.clear() {
                    warn!("Failed to clear persisted token: {}", e);
                }
                self.backend.bearer_changed(None);
                let err = SessionError::AuthenticationFailed;
                self.state.send_modify(|s| {
                    s.session = None;
                    s.error = Some(err.clone());
                    s.redirect = Some(Route::Login);
                    s.loading = false;
                });
                Err(err)
            }
        }
    }

    /// Establish a session from a freshly issued token.
    ///
    /// On failure nothing is persisted and the current session is untouched.
    pub async fn login(&self, raw_token: &str) -> Result<Route, SessionError> {
        let _guard = self.transition.lock().await;

        let session = match self.verify(raw_token).await {
            Ok(session) => session,
            Err(rejection) => {
                warn!("Login rejected: {}", rejection);
                return Err(self.surface(SessionError::InvalidCredentials));
            }
        };

        if let Err(e) = self.store.save(&session.token) {
            warn!("Failed to persist token: {}", e);
            return Err(self.surface(SessionError::Storage));
        }

        let route = if session.user.profile.needs_onboarding() {
            Route::Onboarding
        } else {
            Route::Dashboard
        };
        info!(user = %session.user.user_id(), route = route.path(), "Logged in");

        self.backend.bearer_changed(Some(&session.token));
        self.state.send_modify(|s| {
            s.session = Some(session);
            s.error = None;
            s.redirect = Some(route);
            s.loading = false;
        });
        Ok(route)
    }

    /// Drop the session. Always succeeds and never touches the network.
    pub async fn logout(&self) -> Route {
        let _guard = self.transition.lock().await;

        if let Err(e) = self.store.clear() {
            warn!("Failed to clear persisted token: {}", e);
        }
        self.backend.bearer_changed(None);
        self.state.send_modify(|s| {
            s.session = None;
            s.error = None;
            s.redirect = Some(Route::Login);
            s.loading = false;
        });
        info!("Logged out");
        Route::Login
    }

    /// Acknowledge a surfaced error and head back to the login screen.
    pub fn dismiss_error(&self) {
        self.state.send_modify(|s| {
            s.error = None;
            s.redirect = Some(Route::Login);
        });
    }

    fn surface(&self, err: SessionError) -> SessionError {
        self.state.send_modify(|s| {
            s.error = Some(err.clone());
            s.loading = false;
        });
        err
    }

    /// Decode, check expiry, then confirm with the backend. Expired or
    /// malformed tokens never reach the network.
    async fn verify(&self, token: &str) -> Result<Session, Rejection> {
        let claims = Claims::decode_unexpired(token, (self.now)()).map_err(Rejection::Token)?;
        let user = self
            .backend
            .fetch_profile(token)
            .await
            .map_err(Rejection::Profile)?;
        Ok(Session {
            token: token.to_string(),
            claims,
            user,
        })
    }
}

impl SessionManager<ApiClient> {
    /// Exchange email and password for a token, then log in with it.
    pub async fn login_with_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Route, SessionError> {
        let response = self.backend.login(credentials).await.map_err(|e| {
            warn!("Credential login failed: {}", e);
            self.surface(rejection_message(e, "Failed to login."))
        })?;
        match response.token {
            Some(token) => self.login(&token).await,
            None => Err(self.surface(SessionError::InvalidCredentials)),
        }
    }

    /// Create a patient account. Logs in when the backend returns a token;
    /// returns `None` when the account needs confirmation first.
    pub async fn register(
        &self,
        registration: &Registration,
    ) -> Result<Option<Route>, SessionError> {
        let response = self.backend.register(registration).await.map_err(|e| {
            warn!("Registration failed: {}", e);
            self.surface(rejection_message(e, "Failed to register."))
        })?;
        match response.token {
            Some(token) => self.login(&token).await.map(Some),
            None => Ok(None),
        }
    }
}

fn rejection_message(err: ApiError, fallback: &str) -> SessionError {
    match err {
        ApiError::Status { message, .. } => SessionError::Rejected(message),
        _ => SessionError::Rejected(fallback.to_string()),
    }
}
