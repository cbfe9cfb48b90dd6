//! Single-flight background saves, one per (community, scope).
//!
//! A mutation never writes synchronously. It schedules the scopes it
//! touched; if a save for a scope is already running the request only sets
//! a pending flag, and the running task makes exactly one more pass when it
//! finishes. A burst of mutations therefore costs at most one trailing write
//! beyond the one in flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use ladder_db::{ActiveBucket, SnapshotStore};
use ladder_types::{
    CategoryConfig, CategoryKey, CommunityId, HistoryRow, PlayerId, PlayerMeta, PlayerRecord,
};

use crate::community::Community;

/// A unit of durable state that is always written as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SaveScope {
    Categories,
    Roster(CategoryKey),
    Removed(CategoryKey),
    /// Category key or the global bio scope.
    Bios(String),
    Meta,
    ActiveMatches,
    History,
}

/// The captured contents of one scope, detached from the community lock.
#[derive(Debug)]
pub enum ScopeData {
    Categories(Vec<CategoryConfig>),
    Roster(CategoryKey, Vec<(PlayerId, PlayerRecord)>),
    Removed(CategoryKey, Vec<(PlayerId, PlayerRecord)>),
    Bios(String, BTreeMap<PlayerId, String>),
    Meta(BTreeMap<PlayerId, PlayerMeta>),
    ActiveMatches(BTreeMap<CategoryKey, ActiveBucket>),
    History(Vec<HistoryRow>),
}

impl Community {
    /// Snapshot a scope. History is drained: the rows belong to the writer
    /// until it either stores them or hands them back.
    pub fn capture(&mut self, scope: &SaveScope) -> ScopeData {
        match scope {
            SaveScope::Categories => ScopeData::Categories(self.categories.values().cloned().collect()),
            SaveScope::Roster(key) => ScopeData::Roster(
                key.clone(),
                self.rosters
                    .get(key)
                    .map(|r| r.active_records().to_vec())
                    .unwrap_or_default(),
            ),
            SaveScope::Removed(key) => ScopeData::Removed(
                key.clone(),
                self.rosters
                    .get(key)
                    .map(|r| r.removed_records().to_vec())
                    .unwrap_or_default(),
            ),
            SaveScope::Bios(scope) => {
                ScopeData::Bios(scope.clone(), self.bios.get(scope).cloned().unwrap_or_default())
            }
            SaveScope::Meta => ScopeData::Meta(self.meta.clone()),
            SaveScope::ActiveMatches => ScopeData::ActiveMatches(self.registry.clone()),
            SaveScope::History => ScopeData::History(std::mem::take(&mut self.pending_history)),
        }
    }

    /// Put back history rows whose write failed, ahead of anything newer.
    pub fn requeue_history(&mut self, rows: Vec<HistoryRow>) {
        self.pending_history.splice(0..0, rows);
    }

    /// Every scope this community currently has data for.
    pub fn all_scopes(&self) -> Vec<SaveScope> {
        let mut scopes = vec![SaveScope::Categories, SaveScope::Meta, SaveScope::ActiveMatches];
        for key in self.rosters.keys() {
            scopes.push(SaveScope::Roster(key.clone()));
            scopes.push(SaveScope::Removed(key.clone()));
        }
        for scope in self.bios.keys() {
            scopes.push(SaveScope::Bios(scope.clone()));
        }
        scopes.push(SaveScope::History);
        scopes
    }
}

impl ScopeData {
    pub fn write(&self, store: &dyn SnapshotStore, community: CommunityId) -> anyhow::Result<()> {
        match self {
            Self::Categories(cats) => store.save_categories(community, cats),
            Self::Roster(key, records) => store.save_roster(community, key, records),
            Self::Removed(key, records) => store.save_removed(community, key, records),
            Self::Bios(scope, bios) => store.save_bios(community, scope, bios),
            Self::Meta(meta) => store.save_meta(community, meta),
            Self::ActiveMatches(registry) => store.save_active_matches(community, registry),
            Self::History(rows) => store.append_history_rows(community, rows),
        }
    }
}

struct Slot {
    pending: bool,
    task: Option<JoinHandle<()>>,
}

type SlotKey = (CommunityId, SaveScope);

#[derive(Clone)]
pub struct SaveScheduler {
    store: Arc<dyn SnapshotStore>,
    slots: Arc<StdMutex<HashMap<SlotKey, Slot>>>,
    /// Signalled whenever the slot map becomes empty.
    idle: Arc<Notify>,
}

impl SaveScheduler {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            slots: Arc::new(StdMutex::new(HashMap::new())),
            idle: Arc::new(Notify::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SlotKey, Slot>> {
        // The map holds no invariants a panic could break.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request a background write of `scope`. Must be called from inside a
    /// tokio runtime.
    pub fn schedule(&self, community: CommunityId, scope: SaveScope, state: Arc<Mutex<Community>>) {
        let key = (community, scope);
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(&key) {
            slot.pending = true;
            return;
        }
        slots.insert(
            key.clone(),
            Slot {
                pending: false,
                task: None,
            },
        );
        let task = tokio::spawn(self.clone().run(key.clone(), state));
        if let Some(slot) = slots.get_mut(&key) {
            slot.task = Some(task);
        }
    }

    async fn run(self, key: SlotKey, state: Arc<Mutex<Community>>) {
        let (community, scope) = key.clone();
        loop {
            self.save_once(community, &scope, &state).await;

            let again = {
                let mut slots = self.slots();
                match slots.get_mut(&key) {
                    Some(slot) if slot.pending => {
                        slot.pending = false;
                        true
                    }
                    _ => {
                        slots.remove(&key);
                        if slots.is_empty() {
                            self.idle.notify_waiters();
                        }
                        false
                    }
                }
            };
            if !again {
                break;
            }
        }
    }

    async fn save_once(&self, community: CommunityId, scope: &SaveScope, state: &Arc<Mutex<Community>>) {
        // History is written under the community lock so readers holding it
        // see every row exactly once, either stored or still pending.
        let mut held = match scope {
            SaveScope::History => Some(state.clone().lock_owned().await),
            _ => None,
        };
        let data = match held.as_mut() {
            Some(guard) => guard.capture(scope),
            None => state.lock().await.capture(scope),
        };
        let store = self.store.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = data.write(store.as_ref(), community);
            (data, result)
        })
        .await;

        match outcome {
            Ok((_, Ok(()))) => debug!("Saved {:?} for community {}", scope, community),
            Ok((data, Err(e))) => {
                warn!("Save of {:?} for community {} failed: {:#}", scope, community, e);
                if let (ScopeData::History(rows), Some(guard)) = (data, held.as_mut()) {
                    guard.requeue_history(rows);
                }
            }
            Err(e) => error!("Save task for community {} panicked: {}", community, e),
        }
    }

    /// Number of scopes with a save running.
    pub fn in_flight(&self) -> usize {
        self.slots().len()
    }

    /// Wait until no save is running or queued.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a wakeup between the two is kept.
            let mut notified = std::pin::pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Write every scope of a community right now, bypassing the queue.
    pub async fn flush(&self, community: CommunityId, state: &Arc<Mutex<Community>>) {
        let mut guard = state.lock().await;
        let scopes = guard.all_scopes();
        let batch: Vec<ScopeData> = scopes.iter().map(|scope| guard.capture(scope)).collect();
        let store = self.store.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut failed_history = Vec::new();
            for data in batch {
                if let Err(e) = data.write(store.as_ref(), community) {
                    warn!("Flush for community {} failed: {:#}", community, e);
                    if let ScopeData::History(rows) = data {
                        failed_history = rows;
                    }
                }
            }
            failed_history
        })
        .await;

        match outcome {
            Ok(rows) => guard.requeue_history(rows),
            Err(e) => error!("Flush task for community {} panicked: {}", community, e),
        }
    }

    /// Abort every running save task. Writes already handed to the store
    /// finish on their own; queued re-runs are lost.
    pub fn shutdown(&self) {
        let drained: Vec<Slot> = self.slots().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
        self.idle.notify_waiters();
    }
}
