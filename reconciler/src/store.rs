use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::mpsc;

use shared::{ActivityId, StatsRecord, UserId, DAYS_IN_WEEK};

/// One store notification for a user's stats document.
///
/// `has_pending_writes` marks a notification caused by this process's own
/// not-yet-confirmed write (an echo). Echoes carry optimistic local state
/// and must never re-enter the reconciliation decision logic.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub record: Option<StatsRecord>,
    pub has_pending_writes: bool,
}

/// Full replacement of the rollover-owned fields. `last_active` is assigned
/// server-side when the write lands, so it is not part of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloverWrite {
    pub streak: u32,
    pub xp_today: u32,
    pub weekly_xp: u32,
    pub total_xp: u32,
    pub weekly_log: [bool; DAYS_IN_WEEK],
    pub completed_today: BTreeSet<ActivityId>,
}

/// Additive XP grant: atomic increments on the three XP counters plus a
/// set-union of the activity id, safe under concurrent awards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardWrite {
    pub activity: ActivityId,
    pub amount: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Retryable: network or contention. Nothing is rolled back locally;
    /// the next focus cycle re-attempts since `last_active` never advanced.
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("permission denied for user {0}")]
    PermissionDenied(UserId),
    #[error("store closed")]
    Closed,
}

/// The remote document store holding one stats record per user.
///
/// Implementations must deliver snapshots per user in order, flag locally
/// originated unconfirmed writes via [`Snapshot::has_pending_writes`], and
/// perform [`StatsStore::award`] with atomic increment/set-union semantics
/// rather than a full-document replace.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn get(&self, user: &str) -> Result<Option<StatsRecord>, StoreError>;

    /// Opens a live subscription to the user's record. The current state is
    /// delivered as the first snapshot. Dropping the receiver cancels the
    /// subscription; calling again opens a fresh one.
    async fn subscribe(&self, user: &str) -> Result<mpsc::UnboundedReceiver<Snapshot>, StoreError>;

    /// Full-document create with the given contents.
    async fn create(&self, user: &str, record: StatsRecord) -> Result<(), StoreError>;

    /// Partial update of the rollover fields; the store stamps
    /// `last_active` with its own clock.
    async fn apply_rollover(&self, user: &str, write: RolloverWrite) -> Result<(), StoreError>;

    async fn award(&self, user: &str, write: AwardWrite) -> Result<(), StoreError>;
}
