// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state store: the authoritative state machine for the dashboard
//! session, published to subscribers as whole snapshots.
//!
//! ARCHITECTURE
//! ============
//! State machine: Anonymous → Authenticating → {TwoFactorPending,
//! Authenticated}; Authenticated → Refreshing → Authenticated; any state
//! → Anonymous via logout or unrecoverable refresh failure. All mutation
//! goes through the store's operations; subscribers observe either the
//! pre-operation or post-operation snapshot, never a half-set value.
//!
//! TRADE-OFFS
//! ==========
//! Refresh coalescing uses a single `is_refreshing` flag checked-and-set
//! under the state lock rather than a request queue; the second caller
//! returns immediately with no side effects, which favors at-most-one
//! in-flight network call over completion notification for every caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::claims;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::gateway::{AuthGateway, Credentials, HttpAuthGateway, LoginReply, User};
use crate::persist::{FileTokenStore, TokenStore};
use crate::scheduler::RefreshScheduler;

/// User-facing failure recorded on the session. A forced sign-out from a
/// failed refresh is distinguishable from a voluntary logout (which leaves
/// no message at all).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionMessage {
    LoginFailed { message: String },
    SessionExpired { message: String },
}

impl SessionMessage {
    pub fn message(&self) -> &str {
        match self {
            Self::LoginFailed { message } | Self::SessionExpired { message } => message,
        }
    }
}

/// Snapshot of the session, published on every state-affecting operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub user: Option<User>,
    pub access_token: Option<String>,
    /// Only ever durably persisted when remember-me was requested at login.
    pub refresh_token: Option<String>,
    pub is_loading: bool,
    /// Re-entrancy guard for the refresh path.
    pub is_refreshing: bool,
    /// A second factor is required to complete login. Carries no tokens.
    pub two_factor_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionMessage>,
    /// Last state-affecting user action, epoch seconds.
    pub last_activity: Option<u64>,
    /// Derived exclusively from the access token's decoded expiry claim.
    pub session_expiry: Option<u64>,
}

impl SessionState {
    /// Derived, never stored: true iff both user and access token are present.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.access_token.is_some()
    }

    /// Seconds until expiry, for UI countdowns. Zero once past.
    pub fn expires_in_secs(&self, now: u64) -> Option<u64> {
        self.session_expiry.map(|exp| exp.saturating_sub(now))
    }
}

/// Options for [`SessionStore::login`].
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub two_factor_code: Option<String>,
    pub remember_me: bool,
}

/// Result of a successful [`SessionStore::login`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn,
    /// The account requires a second factor; nothing was committed. Call
    /// `login` again with the code to complete.
    TwoFactorRequired,
}

/// The session store owns the [`SessionState`] exclusively and composes
/// the token codec, clock, durable token slot, gateway, and scheduler.
pub struct SessionStore {
    gateway: Arc<dyn AuthGateway>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenStore>,
    scheduler: Arc<RefreshScheduler>,
    /// Whether rotated refresh tokens should be re-persisted. Set at login
    /// (remember-me) or rehydration, cleared at teardown.
    remember: AtomicBool,
    state: RwLock<SessionState>,
    watch_tx: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new(
        gateway: Arc<dyn AuthGateway>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenStore>,
        refresh_margin: Duration,
    ) -> Arc<Self> {
        let (watch_tx, _) = watch::channel(SessionState::default());
        Arc::new(Self {
            gateway,
            clock,
            tokens,
            scheduler: RefreshScheduler::new(refresh_margin),
            remember: AtomicBool::new(false),
            state: RwLock::new(SessionState::default()),
            watch_tx,
        })
    }

    /// Production wiring: HTTP gateway, system clock, file-backed token slot.
    pub fn from_config(config: &SessionConfig) -> Arc<Self> {
        Self::new(
            Arc::new(HttpAuthGateway::from_config(config)),
            Arc::new(SystemClock),
            Arc::new(FileTokenStore::new(config.token_path())),
            config.refresh_margin(),
        )
    }

    // -- subscriptions --------------------------------------------------------

    /// Subscribe to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.watch_tx.subscribe()
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> SessionState {
        self.watch_tx.borrow().clone()
    }

    /// True while a proactive refresh timer is pending.
    pub fn is_refresh_scheduled(&self) -> bool {
        self.scheduler.is_armed()
    }

    fn publish(&self, state: &SessionState) {
        self.watch_tx.send_replace(state.clone());
    }

    // -- lifecycle ------------------------------------------------------------

    /// Attempt rehydration from a persisted refresh token. On absence or any
    /// failure, settles into the anonymous state; never returns an error.
    pub async fn init(self: &Arc<Self>) {
        let persisted = match self.tokens.load() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(err = %e, "failed to read persisted refresh token");
                None
            }
        };
        let Some(stored_refresh) = persisted else {
            tracing::debug!("no persisted refresh token; starting anonymous");
            return;
        };

        {
            let mut st = self.state.write().await;
            st.is_loading = true;
            self.publish(&st);
        }

        match self.rehydrate(&stored_refresh).await {
            Ok(()) => tracing::info!("session rehydrated from persisted refresh token"),
            Err(e) => {
                tracing::info!(code = e.as_str(), "session rehydration failed; starting anonymous");
                // A rejected persisted token is dead; stop retrying it on
                // every startup.
                if e.is_auth_rejection() {
                    if let Err(ce) = self.tokens.clear() {
                        tracing::warn!(err = %ce, "failed to clear persisted refresh token");
                    }
                }
                self.remember.store(false, Ordering::SeqCst);
                let mut st = self.state.write().await;
                *st = SessionState::default();
                self.publish(&st);
            }
        }
    }

    async fn rehydrate(self: &Arc<Self>, stored_refresh: &str) -> Result<(), SessionError> {
        let grant = self.gateway.refresh(stored_refresh).await?;
        let claims = claims::decode(&grant.access_token)?;
        let now = self.clock.now();
        if claims.exp <= now {
            return Err(SessionError::Unauthorized("rehydrated token already expired".to_owned()));
        }
        let user = self.gateway.current_user(&grant.access_token).await?;

        self.remember.store(true, Ordering::SeqCst);
        let refresh_token =
            grant.refresh_token.clone().unwrap_or_else(|| stored_refresh.to_owned());
        self.persist_refresh(&refresh_token);

        {
            let mut st = self.state.write().await;
            st.user = Some(user);
            st.access_token = Some(grant.access_token.clone());
            st.refresh_token = Some(refresh_token);
            st.session_expiry = Some(claims.exp);
            st.is_loading = false;
            st.two_factor_pending = false;
            st.error = None;
            st.last_activity = Some(now);
            self.publish(&st);
        }
        self.arm_refresh(claims.exp);
        Ok(())
    }

    /// Authenticate. When the backend signals a second-factor requirement
    /// and no code was supplied, returns [`LoginOutcome::TwoFactorRequired`]
    /// without committing any token; re-invoke with the code to complete.
    pub async fn login(
        self: &Arc<Self>,
        username: &str,
        password: &str,
        options: LoginOptions,
    ) -> Result<LoginOutcome, SessionError> {
        {
            let mut st = self.state.write().await;
            st.is_loading = true;
            st.error = None;
            self.publish(&st);
        }

        let credentials = Credentials {
            username: username.to_owned(),
            password: password.to_owned(),
            two_factor_code: options.two_factor_code.clone(),
            remember_me: options.remember_me,
        };

        let reply = match self.gateway.login(&credentials).await {
            Ok(r) => r,
            Err(e) => {
                tracing::info!(username, code = e.as_str(), "login failed");
                let mut st = self.state.write().await;
                st.is_loading = false;
                st.error = Some(SessionMessage::LoginFailed { message: e.message() });
                self.publish(&st);
                return Err(e);
            }
        };

        match reply {
            LoginReply::TwoFactorRequired => {
                tracing::info!(username, "second factor required");
                let mut st = self.state.write().await;
                st.is_loading = false;
                st.two_factor_pending = true;
                self.publish(&st);
                Ok(LoginOutcome::TwoFactorRequired)
            }
            LoginReply::Granted { grant, user } => {
                // A token that does not decode is fatal to this attempt:
                // nothing is committed.
                let claims = match claims::decode(&grant.access_token) {
                    Ok(c) => c,
                    Err(e) => {
                        let err = SessionError::from(e);
                        tracing::warn!(username, err = %e, "login returned an undecodable token");
                        let mut st = self.state.write().await;
                        st.is_loading = false;
                        st.two_factor_pending = false;
                        st.error =
                            Some(SessionMessage::LoginFailed { message: err.message() });
                        self.publish(&st);
                        return Err(err);
                    }
                };

                self.remember.store(options.remember_me, Ordering::SeqCst);
                if options.remember_me {
                    if let Some(rt) = &grant.refresh_token {
                        self.persist_refresh(rt);
                    }
                }

                let now = self.clock.now();
                {
                    let mut st = self.state.write().await;
                    st.user = Some(user);
                    st.access_token = Some(grant.access_token.clone());
                    st.refresh_token = grant.refresh_token.clone();
                    st.session_expiry = Some(claims.exp);
                    st.is_loading = false;
                    st.two_factor_pending = false;
                    st.error = None;
                    st.last_activity = Some(now);
                    self.publish(&st);
                }
                self.arm_refresh(claims.exp);
                tracing::info!(username, expiry = claims.exp, "login succeeded");
                Ok(LoginOutcome::LoggedIn)
            }
        }
    }

    /// Voluntary sign-out. Timer cancellation happens-before the durable
    /// token clear happens-before the state reset, so a racing timer cannot
    /// resurrect a cleared session.
    pub async fn logout(&self) {
        self.scheduler.cancel();
        self.remember.store(false, Ordering::SeqCst);
        if let Err(e) = self.tokens.clear() {
            tracing::warn!(err = %e, "failed to clear persisted refresh token");
        }
        let access = {
            let mut st = self.state.write().await;
            let access = st.access_token.take();
            *st = SessionState::default();
            self.publish(&st);
            access
        };
        // Best-effort backend notification; local teardown already happened.
        if let Some(token) = access {
            if let Err(e) = self.gateway.logout(&token).await {
                tracing::debug!(code = e.as_str(), "backend logout failed");
            }
        }
        tracing::info!("logged out");
    }

    /// Refresh the access token. Coalesced: when a refresh is already in
    /// flight, later callers return immediately with no network call. Any
    /// failure tears the session down with a "session expired" message —
    /// background callers are not handed the error.
    pub async fn refresh(self: &Arc<Self>) {
        let refresh_token = {
            let mut st = self.state.write().await;
            if st.is_refreshing {
                tracing::debug!("refresh already in flight; coalescing");
                return;
            }
            let Some(rt) = st.refresh_token.clone() else {
                if st.is_authenticated() {
                    // An authenticated session with no refresh token cannot
                    // outlive its access token.
                    drop(st);
                    tracing::warn!("refresh due but no refresh token held; forcing logout");
                    self.expire_session("session expired, please log in again").await;
                } else {
                    tracing::debug!("no refresh token; skipping refresh");
                }
                return;
            };
            st.is_refreshing = true;
            self.publish(&st);
            rt
        };

        let grant = match self.gateway.refresh(&refresh_token).await {
            Ok(g) => g,
            Err(e) => {
                if !self.finish_refresh().await {
                    return;
                }
                tracing::warn!(code = e.as_str(), "token refresh failed; forcing logout");
                self.expire_session("session expired, please log in again").await;
                return;
            }
        };

        let claims = match claims::decode(&grant.access_token) {
            Ok(c) => c,
            Err(e) => {
                if !self.finish_refresh().await {
                    return;
                }
                tracing::warn!(err = %e, "refreshed token failed to decode; forcing logout");
                self.expire_session("session expired, please log in again").await;
                return;
            }
        };

        let new_refresh = grant.refresh_token.clone().unwrap_or(refresh_token);
        {
            let mut st = self.state.write().await;
            if !st.is_refreshing {
                tracing::debug!("session torn down during refresh; dropping grant");
                return;
            }
            st.access_token = Some(grant.access_token.clone());
            st.refresh_token = Some(new_refresh.clone());
            st.session_expiry = Some(claims.exp);
            st.is_refreshing = false;
            st.error = None;
            self.publish(&st);
        }
        if self.remember.load(Ordering::SeqCst) {
            self.persist_refresh(&new_refresh);
        }
        self.arm_refresh(claims.exp);
        tracing::info!(expiry = claims.exp, "token refreshed");
    }

    /// Settle the in-flight marker for a finished refresh. Returns false
    /// when the session was torn down while the call was in flight —
    /// logout and forced expiry reset `is_refreshing`, which marks the
    /// outcome as superseded: it must be dropped, not acted on.
    async fn finish_refresh(&self) -> bool {
        let mut st = self.state.write().await;
        if !st.is_refreshing {
            tracing::debug!("session torn down during refresh; dropping outcome");
            return false;
        }
        st.is_refreshing = false;
        true
    }

    /// Check the stored access token against the backend. Any failure tears
    /// the session down.
    pub async fn verify_token(self: &Arc<Self>) -> bool {
        let access = { self.state.read().await.access_token.clone() };
        let Some(token) = access else {
            return false;
        };
        match self.gateway.current_user(&token).await {
            Ok(user) => {
                let mut st = self.state.write().await;
                st.user = Some(user);
                self.publish(&st);
                true
            }
            Err(e) => {
                tracing::info!(code = e.as_str(), "token verification failed; logging out");
                self.logout().await;
                false
            }
        }
    }

    // -- observations ---------------------------------------------------------

    /// Record user activity. Purely observational; never affects expiry.
    pub async fn update_activity(&self) {
        let mut st = self.state.write().await;
        st.last_activity = Some(self.clock.now());
        self.publish(&st);
    }

    /// True iff an expiry is set and is at or before now.
    pub async fn is_session_expired(&self) -> bool {
        let st = self.state.read().await;
        st.session_expiry.is_some_and(|exp| exp <= self.clock.now())
    }

    /// True iff the session expiry is within the safety window of now.
    pub async fn needs_token_refresh(&self) -> bool {
        let st = self.state.read().await;
        st.session_expiry.is_some_and(|exp| {
            claims::is_within_window(exp, self.scheduler.safety_window_secs(), self.clock.now())
        })
    }

    /// Clear the last error without touching authentication state.
    pub async fn clear_error(&self) {
        let mut st = self.state.write().await;
        st.error = None;
        self.publish(&st);
    }

    // -- internals ------------------------------------------------------------

    /// Forced teardown after an unrecoverable refresh failure. Same cleanup
    /// order as [`Self::logout`], but leaves a [`SessionMessage`] behind so
    /// the UI can explain why the user was signed out.
    async fn expire_session(&self, message: &str) {
        self.scheduler.cancel();
        self.remember.store(false, Ordering::SeqCst);
        if let Err(e) = self.tokens.clear() {
            tracing::warn!(err = %e, "failed to clear persisted refresh token");
        }
        let mut st = self.state.write().await;
        *st = SessionState::default();
        st.error = Some(SessionMessage::SessionExpired { message: message.to_owned() });
        self.publish(&st);
    }

    fn persist_refresh(&self, refresh_token: &str) {
        if let Err(e) = self.tokens.save(refresh_token) {
            tracing::warn!(err = %e, "failed to persist refresh token");
        }
    }

    fn arm_refresh(self: &Arc<Self>, expiry: u64) {
        let store = Arc::clone(self);
        self.scheduler.arm(expiry, self.clock.now(), move || async move {
            store.refresh().await;
        });
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
