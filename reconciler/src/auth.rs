use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use shared::UserId;

use crate::clock::Clock;
use crate::session::{AwardOutcome, StatsReconciler, StatsSession, StatsView};
use crate::store::StoreError;

/// Identity and session-lifecycle collaborator. Fires on sign-in and
/// sign-out; the session manager opens and closes stats sessions off it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;

    /// Watchable auth state; `None` means signed out.
    fn subscribe(&self) -> watch::Receiver<Option<UserId>>;

    async fn sign_out(&self) -> anyhow::Result<()>;
}

/// In-memory auth provider for the demo binary and tests.
pub struct StaticAuth {
    state: watch::Sender<Option<UserId>>,
}

impl StaticAuth {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn sign_in(&self, user: &str) {
        self.state.send_replace(Some(user.to_owned()));
    }
}

impl Default for StaticAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<UserId> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        self.state.send_replace(None);
        Ok(())
    }
}

struct ManagerState {
    session: Option<StatsSession>,
    background_since: Option<DateTime<Utc>>,
}

/// Owns the current user's stats session across the auth lifecycle:
/// constructed on sign-in, disposed on sign-out, replaced on user change.
/// Also applies the idle auto-logout rule: coming back to the foreground
/// after a long enough background stay signs the user out instead of
/// resuming.
pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    reconciler: StatsReconciler,
    clock: Arc<dyn Clock>,
    idle_after: Duration,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        reconciler: StatsReconciler,
        clock: Arc<dyn Clock>,
        idle_after: Duration,
    ) -> Self {
        Self {
            auth,
            reconciler,
            clock,
            idle_after,
            state: Mutex::new(ManagerState {
                session: None,
                background_since: None,
            }),
        }
    }

    /// Drives session lifecycle from auth-state changes until the provider
    /// goes away.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut auth_rx = self.auth.subscribe();
        self.handle_auth_change(self.auth.current_user()).await;

        while auth_rx.changed().await.is_ok() {
            let user = auth_rx.borrow_and_update().clone();
            self.handle_auth_change(user).await;
        }
        debug!("auth stream ended, session manager stopping");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn handle_auth_change(&self, user: Option<UserId>) {
        let mut state = self.state.lock().await;
        match user {
            Some(user) => {
                if state
                    .session
                    .as_ref()
                    .is_some_and(|session| session.user() == user)
                {
                    return;
                }
                if let Some(old) = state.session.take() {
                    old.close();
                }
                info!(%user, "opening stats session");
                match self.reconciler.observe(&user).await {
                    Ok(session) => {
                        if let Err(e) = session.on_focus().await {
                            warn!(%user, "initial reconcile failed: {e}");
                        }
                        state.session = Some(session);
                    }
                    Err(e) => warn!(%user, "failed to open stats subscription: {e}"),
                }
            }
            None => {
                if let Some(session) = state.session.take() {
                    info!(user = session.user(), "closing stats session");
                    session.close();
                }
            }
        }
    }

    /// The app moved to the background; remember when.
    pub async fn on_background(&self) {
        let mut state = self.state.lock().await;
        state.background_since = Some(self.clock.now());
    }

    /// The app came back to the foreground. Signs the user out after a
    /// long idle stay, otherwise runs a focus reconciliation pass.
    pub async fn on_foreground(&self) -> anyhow::Result<()> {
        let idle_expired = {
            let mut state = self.state.lock().await;
            state
                .background_since
                .take()
                .is_some_and(|since| self.clock.now() - since >= self.idle_after)
        };

        if idle_expired {
            info!("idle window exceeded, signing out");
            self.auth.sign_out().await?;
            // Close directly as well, in case nothing is driving `run`.
            self.handle_auth_change(None).await;
            return Ok(());
        }

        let state = self.state.lock().await;
        if let Some(session) = &state.session {
            session.on_focus().await?;
        }
        Ok(())
    }

    /// Pass-through to the current session's award path.
    pub async fn award_xp(
        &self,
        activity: &str,
        base_xp: u32,
    ) -> Result<AwardOutcome, StoreError> {
        let state = self.state.lock().await;
        match &state.session {
            Some(session) => session.award_xp(activity, base_xp).await,
            None => Err(StoreError::Closed),
        }
    }

    /// Latest surfaced view, if a session is open.
    pub async fn view(&self) -> Option<StatsView> {
        let state = self.state.lock().await;
        state.session.as_ref().map(|session| session.view())
    }
}
