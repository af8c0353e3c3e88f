use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use shared::{scaled_xp, ActivityId, StatsRecord, UserId};

use crate::clock::Clock;
use crate::rollover::{day_one_write, plan_rollover};
use crate::store::{AwardWrite, Snapshot, StatsStore, StoreError};

/// What a consuming surface renders. `Loading` (no snapshot yet) and
/// `Bootstrapping` (record absent remotely, defaults surfaced while the
/// two-phase creation runs) are distinct states on purpose.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsView {
    Loading,
    Bootstrapping(StatsRecord),
    Ready(StatsRecord),
    /// The subscription broke. Not retried here; the consumer re-observes
    /// on its next focus.
    Failed(String),
}

impl StatsView {
    pub fn record(&self) -> Option<&StatsRecord> {
        match self {
            StatsView::Bootstrapping(record) | StatsView::Ready(record) => Some(record),
            StatsView::Loading | StatsView::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    Granted { amount: u32 },
    /// The activity already paid out today; nothing was written.
    AlreadyAwarded,
}

type InFlight = Arc<Mutex<HashSet<UserId>>>;

/// Marks a user as having a reconciliation write outstanding. Held across
/// the write, released when dropped, success or failure.
struct WriteGuard {
    user: UserId,
    in_flight: InFlight,
}

impl WriteGuard {
    fn try_acquire(in_flight: &InFlight, user: &str) -> Option<Self> {
        if !in_flight.lock().unwrap().insert(user.to_owned()) {
            return None;
        }
        Some(Self {
            user: user.to_owned(),
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.user);
    }
}

/// Factory for per-user stats sessions. Holds the shared in-flight marker
/// map so reconciliation for different users never cross-contaminates.
#[derive(Clone)]
pub struct StatsReconciler {
    store: Arc<dyn StatsStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
}

impl StatsReconciler {
    pub fn new(store: Arc<dyn StatsStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Opens a live subscription to the user's record and starts the
    /// snapshot loop. Re-invoking after a session was closed opens a fresh
    /// subscription.
    #[instrument(skip(self))]
    pub async fn observe(&self, user: &str) -> Result<StatsSession, StoreError> {
        let snapshots = self.store.subscribe(user).await?;
        let (view_tx, view_rx) = watch::channel(StatsView::Loading);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let core = Arc::new(SessionCore {
            user: user.to_owned(),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            in_flight: Arc::clone(&self.in_flight),
            active: AtomicBool::new(true),
            view: view_tx,
        });

        let task = tokio::spawn(Arc::clone(&core).run(snapshots, shutdown_rx));

        Ok(StatsSession {
            core,
            _task: task,
            view_rx,
            shutdown: shutdown_tx,
            awarded: Mutex::new(BTreeSet::new()),
        })
    }
}

/// One user's live stats session: surfaced view, focus-driven
/// reconciliation and XP awards. Closing (or dropping) the session tears
/// the subscription down; an in-flight write finishes but its result is
/// not acted upon.
pub struct StatsSession {
    core: Arc<SessionCore>,
    _task: JoinHandle<()>,
    view_rx: watch::Receiver<StatsView>,
    shutdown: watch::Sender<bool>,
    /// Activities already awarded within this session, checked before the
    /// remote record so a repeat award is refused even before the store
    /// round-trips.
    awarded: Mutex<BTreeSet<ActivityId>>,
}

impl StatsSession {
    pub fn user(&self) -> &str {
        &self.core.user
    }

    /// Latest surfaced state.
    pub fn view(&self) -> StatsView {
        self.view_rx.borrow().clone()
    }

    /// Change-notified handle on the surfaced state.
    pub fn watch(&self) -> watch::Receiver<StatsView> {
        self.core.view.subscribe()
    }

    /// One reconciliation pass, run when the consuming surface becomes
    /// active: reads the authoritative record and rolls it over if a new
    /// day (or bootstrap) is due.
    #[instrument(skip(self), fields(user = %self.core.user))]
    pub async fn on_focus(&self) -> Result<(), StoreError> {
        if !self.core.is_active() {
            return Err(StoreError::Closed);
        }
        let record = self.core.store.get(&self.core.user).await?;
        self.core.reconcile(record).await
    }

    /// Records XP for a completed activity, scaled by the current streak.
    /// At most one grant per activity per calendar day.
    #[instrument(skip(self), fields(user = %self.core.user))]
    pub async fn award_xp(
        &self,
        activity: &str,
        base_xp: u32,
    ) -> Result<AwardOutcome, StoreError> {
        if !self.core.is_active() {
            return Err(StoreError::Closed);
        }
        if self.awarded.lock().unwrap().contains(activity) {
            debug!("activity already awarded this session");
            return Ok(AwardOutcome::AlreadyAwarded);
        }

        let streak = {
            let view = self.core.view.borrow();
            let Some(record) = view.record() else {
                return Err(StoreError::Transient("stats not loaded yet".into()));
            };
            if record.has_completed(activity) {
                self.awarded.lock().unwrap().insert(activity.to_owned());
                return Ok(AwardOutcome::AlreadyAwarded);
            }
            record.streak
        };

        // Reserve the activity before the write so a racing call in the
        // same session cannot pass the checks twice.
        self.awarded.lock().unwrap().insert(activity.to_owned());

        let amount = scaled_xp(base_xp, streak);
        let write = AwardWrite {
            activity: activity.to_owned(),
            amount,
        };
        if let Err(e) = self.core.store.award(&self.core.user, write).await {
            self.awarded.lock().unwrap().remove(activity);
            return Err(e);
        }

        info!(amount, "xp awarded");
        Ok(AwardOutcome::Granted { amount })
    }

    /// Tears the session down. Idempotent.
    pub fn close(&self) {
        if self.core.active.swap(false, Ordering::SeqCst) {
            debug!(user = %self.core.user, "closing stats session");
        }
        let _ = self.shutdown.send(true);
    }
}

impl Drop for StatsSession {
    fn drop(&mut self) {
        // The snapshot loop sees the dropped shutdown sender and exits on
        // its own; an in-flight write still runs to completion.
        self.close();
    }
}

struct SessionCore {
    user: UserId,
    store: Arc<dyn StatsStore>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
    active: AtomicBool,
    view: watch::Sender<StatsView>,
}

impl SessionCore {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn surface(&self, view: StatsView) {
        if self.is_active() {
            let _ = self.view.send(view);
        }
    }

    /// Snapshot loop: one reconciliation at a time, stopped by shutdown.
    async fn run(
        self: Arc<Self>,
        mut snapshots: mpsc::UnboundedReceiver<Snapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let snapshot = tokio::select! {
                snapshot = snapshots.recv() => snapshot,
                _ = shutdown.changed() => break,
            };
            let Some(snapshot) = snapshot else {
                // Stream ended without a close on our side.
                self.surface(StatsView::Failed("stats subscription closed".into()));
                break;
            };
            if !self.is_active() {
                break;
            }
            self.process(snapshot).await;
        }
    }

    async fn process(&self, snapshot: Snapshot) {
        if snapshot.has_pending_writes {
            debug!(user = %self.user, "echo snapshot skipped");
            return;
        }
        if let Err(e) = self.reconcile(snapshot.record).await {
            // Last-known-good stays surfaced; the persisted last_active
            // never advanced, so the next focus cycle retries naturally.
            warn!(user = %self.user, "reconcile failed, will retry on next focus: {e}");
        }
    }

    /// Surfaces the record and issues at most one write if the record is
    /// absent (bootstrap) or stale (daily rollover). The snapshot only
    /// decides whether to try; the record is re-read under the in-flight
    /// guard so a stale snapshot can never drive a write.
    async fn reconcile(&self, record: Option<StatsRecord>) -> Result<(), StoreError> {
        match record {
            None => {
                // Surface defaults immediately so the consumer is not
                // blocked on the remote round-trip.
                self.surface(StatsView::Bootstrapping(StatsRecord::default()));

                let Some(_guard) = WriteGuard::try_acquire(&self.in_flight, &self.user) else {
                    debug!(user = %self.user, "bootstrap already in flight");
                    return Ok(());
                };
                self.bootstrap().await
            }
            Some(current) => {
                // A record that exists but was never initialized is still
                // inside the bootstrap window.
                if current.last_active.is_none() {
                    self.surface(StatsView::Bootstrapping(current.clone()));
                } else {
                    self.surface(StatsView::Ready(current.clone()));
                }

                if plan_rollover(&current, self.clock.now()).is_none() {
                    return Ok(());
                }
                let Some(_guard) = WriteGuard::try_acquire(&self.in_flight, &self.user) else {
                    debug!(user = %self.user, "rollover already in flight");
                    return Ok(());
                };
                if !self.is_active() {
                    return Ok(());
                }

                let Some(fresh) = self.store.get(&self.user).await? else {
                    return Ok(());
                };
                let Some(write) = plan_rollover(&fresh, self.clock.now()) else {
                    return Ok(());
                };

                info!(user = %self.user, streak = write.streak, gained = write.xp_today, "applying daily rollover");
                self.store.apply_rollover(&self.user, write).await
            }
        }
    }

    /// Two-phase record creation: the default document first, then the
    /// day-1 initialization once the create is acknowledged. No observable
    /// state ever combines `streak == 0` with a present `last_active`.
    async fn bootstrap(&self) -> Result<(), StoreError> {
        if self
            .store
            .get(&self.user)
            .await
            .map(|r| r.is_some())
            .unwrap_or(false)
        {
            // Someone else created it since the snapshot was taken.
            return Ok(());
        }

        info!(user = %self.user, "creating stats record");
        self.store.create(&self.user, StatsRecord::default()).await?;

        if !self.is_active() {
            return Ok(());
        }

        info!(user = %self.user, "granting first-day login bonus");
        self.store
            .apply_rollover(&self.user, day_one_write(self.clock.now()))
            .await
    }
}
