use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::instrument;

use shared::{StatsRecord, UserId};

use crate::clock::Clock;
use crate::store::{AwardWrite, RolloverWrite, Snapshot, StatsStore, StoreError};

#[derive(Default)]
struct Inner {
    records: HashMap<UserId, StatsRecord>,
    subscribers: HashMap<UserId, Vec<mpsc::UnboundedSender<Snapshot>>>,
}

/// In-memory [`StatsStore`] used by the demo binary and the tests.
///
/// Mirrors the notification behavior of the real document store: every
/// write first echoes back to local subscribers with
/// `has_pending_writes = true`, then again as a confirmed snapshot.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Pre-populates a user's record without notifying subscribers, the way
    /// an out-of-band admin script would.
    pub fn seed(&self, user: &str, record: StatsRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.records.insert(user.to_owned(), record);
    }

    /// Makes every subsequent write fail with [`StoreError::Transient`]
    /// until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Transient("injected write failure".into()));
        }
        Ok(())
    }

    /// Applies `mutate` to the user's entry and notifies subscribers with
    /// the echo/confirmed snapshot pair.
    fn write(
        &self,
        user: &str,
        mutate: impl FnOnce(&mut HashMap<UserId, StatsRecord>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.check_writable()?;

        let mut inner = self.inner.lock().unwrap();
        mutate(&mut inner.records)?;

        let record = inner.records.get(user).cloned();
        if let Some(senders) = inner.subscribers.get_mut(user) {
            senders.retain(|tx| {
                tx.send(Snapshot {
                    record: record.clone(),
                    has_pending_writes: true,
                })
                .and_then(|_| {
                    tx.send(Snapshot {
                        record: record.clone(),
                        has_pending_writes: false,
                    })
                })
                .is_ok()
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn get(&self, user: &str) -> Result<Option<StatsRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.records.get(user).cloned())
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, user: &str) -> Result<mpsc::UnboundedReceiver<Snapshot>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();

        // The current state is always the first delivered snapshot.
        tx.send(Snapshot {
            record: inner.records.get(user).cloned(),
            has_pending_writes: false,
        })
        .map_err(|_| StoreError::Closed)?;

        inner.subscribers.entry(user.to_owned()).or_default().push(tx);
        Ok(rx)
    }

    #[instrument(skip(self, record))]
    async fn create(&self, user: &str, record: StatsRecord) -> Result<(), StoreError> {
        self.write(user, |records| {
            records.insert(user.to_owned(), record);
            Ok(())
        })
    }

    #[instrument(skip(self, write))]
    async fn apply_rollover(&self, user: &str, write: RolloverWrite) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.write(user, |records| {
            let record = records
                .get_mut(user)
                .ok_or_else(|| StoreError::Transient(format!("no record for {user}")))?;
            record.streak = write.streak;
            record.xp_today = write.xp_today;
            record.weekly_xp = write.weekly_xp;
            record.total_xp = write.total_xp;
            record.weekly_log = write.weekly_log;
            record.completed_today = write.completed_today;
            record.last_active = Some(now);
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn award(&self, user: &str, write: AwardWrite) -> Result<(), StoreError> {
        self.write(user, |records| {
            let record = records
                .get_mut(user)
                .ok_or_else(|| StoreError::Transient(format!("no record for {user}")))?;
            record.xp_today += write.amount;
            record.weekly_xp += write.amount;
            record.total_xp += write.amount;
            record.completed_today.insert(write.activity);
            Ok(())
        })
    }
}
