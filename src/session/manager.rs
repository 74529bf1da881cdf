use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, OnceCell};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::api::AuthApi;
use crate::broadcast::{LocalBroadcast, SessionBroadcast};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigV1;
use crate::error::{SessionError, SessionResult};
use crate::guard::SessionSnapshot;
use crate::models::{AuthResponse, LoginRequest, PersistedSession, RegisterRequest, Session, User};
use crate::navigation::{HistoryNavigator, Location, Navigator};
use crate::scheduler::{Scheduler, TaskHandle, TokioScheduler};
use crate::store::{self, SessionStore, Tier};
use crate::utils::log_throttle::LogThrottle;

/// Reason shown when another tab of the same profile signed in.
pub const COMPETING_LOGIN_REASON: &str =
    "Your account was signed in from another window; this session has ended.";

/// Reason shown when the server rejected the credentials or tokens outright.
pub const CREDENTIALS_REJECTED_REASON: &str =
    "Your credentials were rejected; please sign in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Authenticated,
    Anonymous,
}

/// Timing and routing knobs of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub refresh_lead_ms: i64,
    pub min_refresh_delay_ms: i64,
    pub login_path: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            refresh_lead_ms: 60_000,
            min_refresh_delay_ms: 10_000,
            login_path: "/login".to_string(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &ConfigV1) -> Self {
        SessionSettings {
            refresh_lead_ms: config.session.refresh_lead_ms,
            min_refresh_delay_ms: config.session.min_refresh_delay_ms,
            login_path: config.routes.login_path.clone(),
        }
    }
}

/// Collaborators of the session manager.
pub struct SessionDeps {
    pub api: Arc<dyn AuthApi>,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub broadcast: Arc<dyn SessionBroadcast>,
    pub navigator: Arc<dyn Navigator>,
}

impl SessionDeps {
    /// Production defaults around the given API and store.
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn SessionStore>) -> Self {
        SessionDeps {
            api,
            store,
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
            broadcast: Arc::new(LocalBroadcast::new()),
            navigator: Arc::new(HistoryNavigator::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_broadcast(mut self, broadcast: Arc<dyn SessionBroadcast>) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }
}

/// Delay before the proactive refresh: `max(expires_at - now - lead, min_delay)`.
pub fn refresh_delay(expires_at: i64, now_ms: i64, lead_ms: i64, min_delay_ms: i64) -> Duration {
    let ms = expires_at
        .saturating_sub(now_ms)
        .saturating_sub(lead_ms)
        .max(min_delay_ms)
        .max(0);
    Duration::from_millis(ms as u64)
}

/// Which tiers a sign-out wipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClearScope {
    AllTiers,
    /// The durable tier belongs to another tab's newer session.
    TabOnly,
}

struct Inner {
    session: Session,
    state: SessionState,
    /// Bumped on every sign-in and sign-out; in-flight results from an older
    /// generation are discarded.
    generation: u64,
    /// Bumped whenever tokens are rotated.
    token_epoch: u64,
    /// Identifies the currently armed refresh timer.
    timer_epoch: u64,
    refresh_timer: Option<TaskHandle>,
    listener: Option<AbortHandle>,
}

/// Owns the session of one tab/process and its token lifecycle.
pub struct SessionManager {
    me: Weak<SessionManager>,
    settings: SessionSettings,
    session_id: String,
    api: Arc<dyn AuthApi>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    broadcast: Arc<dyn SessionBroadcast>,
    navigator: Arc<dyn Navigator>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    init: OnceCell<()>,
    refresh_flight: tokio::sync::Mutex<()>,
    logging_out: AtomicBool,
    storage_log: LogThrottle,
}

impl SessionManager {
    pub fn new(settings: SessionSettings, deps: SessionDeps) -> Arc<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        Arc::new_cyclic(|me| SessionManager {
            me: me.clone(),
            settings,
            session_id: session_id.clone(),
            api: deps.api,
            store: deps.store,
            clock: deps.clock,
            scheduler: deps.scheduler,
            broadcast: deps.broadcast,
            navigator: deps.navigator,
            inner: Mutex::new(Inner {
                session: Session::new(session_id),
                state: SessionState::Uninitialized,
                generation: 0,
                token_epoch: 0,
                timer_epoch: 0,
                refresh_timer: None,
                listener: None,
            }),
            state_tx,
            init: OnceCell::new(),
            refresh_flight: tokio::sync::Mutex::new(()),
            logging_out: AtomicBool::new(false),
            storage_log: LogThrottle::default(),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state != state {
            debug!(session_id = %self.session_id, ?state, "Session state changed");
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    // -- Queries

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner().session.is_authenticated(self.clock.now_ms())
    }

    pub fn user(&self) -> Option<User> {
        self.inner().session.user.clone()
    }

    pub fn expires_at(&self) -> i64 {
        self.inner().session.expires_at
    }

    pub fn has_refresh_token(&self) -> bool {
        self.inner().session.refresh_token.is_some()
    }

    /// `"<scheme> <token>"` while authenticated.
    pub fn authorization_header(&self) -> Option<String> {
        let now = self.clock.now_ms();
        let inner = self.inner();
        if inner.session.is_authenticated(now) {
            inner.session.authorization_header()
        } else {
            None
        }
    }

    pub fn has_any_role<S: AsRef<str>>(&self, required: &[S]) -> bool {
        if required.is_empty() {
            return true;
        }
        let now = self.clock.now_ms();
        let inner = self.inner();
        if !inner.session.is_authenticated(now) {
            return false;
        }
        inner
            .session
            .user
            .as_ref()
            .is_some_and(|user| user.has_any_role(required))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.clock.now_ms();
        let inner = self.inner();
        SessionSnapshot {
            authenticated: inner.session.is_authenticated(now),
            logging_out: self.logging_out.load(Ordering::SeqCst),
            roles: inner.session.roles().cloned().collect::<BTreeSet<_>>(),
        }
    }

    // -- Lifecycle

    /// Restores the persisted session once per process. Concurrent callers
    /// share the in-flight run.
    pub async fn initialize(&self) -> SessionState {
        self.init.get_or_init(|| self.run_initialize()).await;
        self.state()
    }

    async fn run_initialize(&self) {
        let generation = {
            let mut inner = self.inner();
            if inner.generation > 0 || inner.state == SessionState::Authenticated {
                debug!("Session already established; nothing to restore");
                return;
            }
            self.set_state(&mut inner, SessionState::Initializing);
            inner.generation
        };

        let now = self.clock.now_ms();
        let stored = match store::load(self.store.as_ref()) {
            Ok(stored) => stored,
            Err(e) => {
                self.warn_storage("read", &e);
                None
            }
        };

        match stored.filter(|s| s.is_usable(now)) {
            Some(stored) => {
                let authorization = {
                    let mut inner = self.inner();
                    inner.session.adopt(stored);
                    inner.session.authorization_header()
                };
                let profile = match authorization {
                    Some(authorization) => self.api.me(&authorization).await,
                    None => Err(SessionError::IncompleteResponse("no access token".into())),
                };
                self.finish_restore(generation, profile);
            }
            None => {
                debug!("No usable persisted session; starting anonymous");
                let mut inner = self.inner();
                if inner.generation == generation {
                    self.sign_out_locked(&mut inner, ClearScope::AllTiers);
                }
            }
        }

        {
            let mut inner = self.inner();
            if inner.state == SessionState::Initializing {
                self.set_state(&mut inner, SessionState::Anonymous);
            }
        }
        self.schedule_refresh();
    }

    fn finish_restore(&self, generation: u64, profile: SessionResult<User>) {
        let mut inner = self.inner();
        if inner.generation != generation {
            debug!("Session changed while restoring; keeping the newer state");
            return;
        }
        match profile {
            Ok(user) => {
                info!(session_id = %self.session_id, "Restored session for '{}'", user.username);
                inner.session.user = Some(user);
                self.set_state(&mut inner, SessionState::Authenticated);
                let persisted = inner.session.to_persisted();
                drop(inner);
                self.write_through(&persisted);
                self.arm_listener();
            }
            Err(e) => {
                // Fail closed.
                warn!("Failed to fetch user info during init: {}", e);
                self.sign_out_locked(&mut inner, ClearScope::AllTiers);
            }
        }
    }

    pub async fn login(&self, credentials: LoginRequest, remember_me: bool) -> SessionResult<User> {
        let response = self.api.login(&credentials).await;
        self.complete_sign_in("login", response, remember_me)
    }

    pub async fn register(&self, details: RegisterRequest, remember_me: bool) -> SessionResult<User> {
        let response = self.api.register(&details).await;
        self.complete_sign_in("register", response, remember_me)
    }

    fn complete_sign_in(
        &self,
        operation: &str,
        response: SessionResult<AuthResponse>,
        remember_me: bool,
    ) -> SessionResult<User> {
        let response = match response {
            Ok(response) => response,
            Err(e @ SessionError::Unauthorized { .. }) => {
                warn!("{} was rejected by the server", operation);
                self.force_logout(CREDENTIALS_REJECTED_REASON);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // Validate everything before touching the current session.
        let tokens = response
            .tokens
            .ok_or_else(|| SessionError::IncompleteResponse("missing tokens".into()))?;
        if tokens.access_token().is_none() {
            return Err(SessionError::IncompleteResponse(
                "missing tokens.accessToken".into(),
            ));
        }
        let user = response
            .user
            .ok_or_else(|| SessionError::IncompleteResponse("missing user".into()))?;

        let now = self.clock.now_ms();
        let persisted = {
            let mut inner = self.inner();
            let mut session = Session::new(self.session_id.clone());
            session.apply_tokens(&tokens, now)?;
            session.remember_me = remember_me;
            session.user = Some(user.clone());
            inner.session = session;
            inner.generation += 1;
            inner.token_epoch += 1;
            self.set_state(&mut inner, SessionState::Authenticated);
            inner.session.to_persisted()
        };

        self.write_through(&persisted);
        self.schedule_refresh();
        self.arm_listener();
        if remember_me {
            self.broadcast.announce(&self.session_id);
        }
        info!(
            session_id = %self.session_id,
            remember_me,
            "{} succeeded for '{}'",
            operation,
            user.username
        );
        Ok(user)
    }

    /// Trades the refresh token for a new access token and returns it.
    ///
    /// Only one refresh runs at a time; a caller that waited behind a
    /// successful refresh gets that token without another network call.
    pub async fn refresh(&self) -> SessionResult<String> {
        let observed_epoch = self.inner().token_epoch;
        let _flight = self.refresh_flight.lock().await;

        let now = self.clock.now_ms();
        let (refresh_token, generation) = {
            let inner = self.inner();
            let refresh_token = inner
                .session
                .refresh_token
                .clone()
                .ok_or(SessionError::MissingRefreshToken)?;
            if inner.token_epoch != observed_epoch && inner.session.is_authenticated(now) {
                if let Some(access) = inner.session.access_token.clone() {
                    debug!("Reusing token from a refresh that finished while waiting");
                    return Ok(access);
                }
            }
            (refresh_token, inner.generation)
        };

        let outcome = self.api.refresh(&refresh_token).await;
        if self.inner().generation != generation {
            debug!("Discarding refresh outcome for a session that has ended");
            return Err(SessionError::SessionChanged);
        }
        let tokens = match outcome {
            Ok(tokens) => tokens,
            Err(SessionError::Unauthorized { .. }) => {
                return Err(SessionError::RefreshRejected(
                    "the refresh token was rejected".into(),
                ))
            }
            Err(SessionError::IncompleteResponse(message)) => {
                return Err(SessionError::RefreshRejected(message))
            }
            Err(SessionError::Status {
                status, message, ..
            }) if status.is_client_error() => {
                return Err(SessionError::RefreshRejected(format!("{}: {}", status, message)))
            }
            Err(e) => return Err(e),
        };
        if tokens.access_token().is_none() {
            return Err(SessionError::RefreshRejected(
                "the response carried no access token".into(),
            ));
        }

        let now = self.clock.now_ms();
        let (access, persisted) = {
            let mut inner = self.inner();
            if inner.generation != generation {
                debug!("Discarding refresh result for a session that has ended");
                return Err(SessionError::SessionChanged);
            }
            let access = inner.session.apply_tokens(&tokens, now)?;
            inner.token_epoch += 1;
            self.set_state(&mut inner, SessionState::Authenticated);
            (access, inner.session.to_persisted())
        };
        self.write_through(&persisted);
        self.schedule_refresh();
        info!(session_id = %self.session_id, "Access token refreshed");
        Ok(access)
    }

    /// Ends the session locally. The server is told on a best-effort basis.
    pub fn logout(&self) {
        self.logging_out.store(true, Ordering::SeqCst);
        self.sign_out(ClearScope::AllTiers);
        self.logging_out.store(false, Ordering::SeqCst);
        info!(session_id = %self.session_id, "Logged out");
    }

    /// Logs out and sends the user to the login route with `reason`.
    pub fn force_logout(&self, reason: &str) {
        self.force_logout_scoped(reason, ClearScope::AllTiers);
    }

    fn force_logout_scoped(&self, reason: &str, scope: ClearScope) {
        self.logging_out.store(true, Ordering::SeqCst);
        warn!(session_id = %self.session_id, reason, "Forcing logout");
        self.sign_out(scope);

        let mut location = Location::new(self.settings.login_path.clone());
        if let Some(current) = self.navigator.current_path() {
            let current_route = current.split('?').next().unwrap_or_default();
            if current_route != self.settings.login_path {
                location = location.with_query("redirect", current);
            }
        }
        self.navigator
            .navigate(location.with_query("reason", reason));
        self.logging_out.store(false, Ordering::SeqCst);
    }

    fn sign_out(&self, scope: ClearScope) {
        let authorization = {
            let mut inner = self.inner();
            let authorization = inner.session.authorization_header();
            self.sign_out_locked(&mut inner, scope);
            authorization
        };
        if let Some(authorization) = authorization {
            self.notify_server_logout(authorization);
        }
    }

    fn sign_out_locked(&self, inner: &mut Inner, scope: ClearScope) {
        inner.session.clear();
        inner.generation += 1;
        inner.timer_epoch += 1;
        if let Some(timer) = inner.refresh_timer.take() {
            timer.cancel();
        }
        if let Some(listener) = inner.listener.take() {
            listener.abort();
        }
        self.set_state(inner, SessionState::Anonymous);

        let cleared = match scope {
            ClearScope::AllTiers => store::clear_all(self.store.as_ref()),
            ClearScope::TabOnly => self.store.clear(Tier::Tab),
        };
        if let Err(e) = cleared {
            self.warn_storage("clear", &e);
        }
    }

    /// Fire-and-forget; failures are logged and never retried.
    fn notify_server_logout(&self, authorization: String) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                debug!("No runtime available; skipping server logout notification");
                return;
            }
        };
        let api = Arc::clone(&self.api);
        runtime.spawn(async move {
            if let Err(e) = api.logout(&authorization).await {
                warn!("Server-side logout notification failed: {}", e);
            }
        });
    }

    // -- Proactive refresh

    fn schedule_refresh(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner();
        if let Some(timer) = inner.refresh_timer.take() {
            timer.cancel();
        }
        inner.timer_epoch += 1;

        let session = &inner.session;
        if session.access_token.is_none()
            || session.refresh_token.is_none()
            || session.expires_at == 0
        {
            return;
        }
        let delay = refresh_delay(
            session.expires_at,
            now,
            self.settings.refresh_lead_ms,
            self.settings.min_refresh_delay_ms,
        );
        let epoch = inner.timer_epoch;
        let me = self.me.clone();
        let task = async move {
            if let Some(manager) = me.upgrade() {
                manager.on_refresh_timer(epoch).await;
            }
        }
        .boxed();
        inner.refresh_timer = Some(self.scheduler.schedule(delay, task));
        debug!(delay_ms = delay.as_millis() as u64, "Armed proactive refresh");
    }

    async fn on_refresh_timer(&self, epoch: u64) {
        {
            let mut inner = self.inner();
            if inner.timer_epoch != epoch {
                return;
            }
            // The timer has fired; it must not be cancelled by the re-arm below.
            inner.refresh_timer.take();
        }
        match self.refresh().await {
            Ok(_) => debug!("Proactive refresh succeeded"),
            Err(SessionError::SessionChanged) => debug!("Proactive refresh outlived its session"),
            Err(e) => {
                warn!("Automatic token refresh failed: {}", e);
                self.force_logout(&format!("Your session could not be renewed: {}", e));
            }
        }
    }

    // -- Cross-tab invalidation

    fn arm_listener(&self) {
        let mut inner = self.inner();
        if inner.listener.is_some() {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                debug!("No runtime available; cross-tab listener not started");
                return;
            }
        };
        let mut announcements = self.broadcast.subscribe();
        let me = self.me.clone();
        let task = runtime.spawn(async move {
            loop {
                match announcements.recv().await {
                    Ok(announced) => match me.upgrade() {
                        Some(manager) => manager.on_session_announced(&announced),
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Cross-tab listener lagged behind announcements")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        inner.listener = Some(task.abort_handle());
    }

    /// Handles a session id announced by some tab of this profile.
    pub fn on_session_announced(&self, announced: &str) {
        if announced == self.session_id || !self.is_authenticated() {
            return;
        }
        info!(
            session_id = %self.session_id,
            competing = announced,
            "Another window signed in; ending this session"
        );
        self.force_logout_scoped(COMPETING_LOGIN_REASON, ClearScope::TabOnly);
    }

    // -- Storage

    fn write_through(&self, session: &PersistedSession) {
        if let Err(e) = store::persist(self.store.as_ref(), session) {
            self.warn_storage("write", &e);
        }
    }

    fn warn_storage(&self, action: &str, error: &SessionError) {
        if let Some(suppressed) = self.storage_log.should_emit(action) {
            warn!(suppressed, "Failed to {} session storage: {}", action, error);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(timer) = inner.refresh_timer.take() {
            timer.cancel();
        }
        if let Some(listener) = inner.listener.take() {
            listener.abort();
        }
    }
}
