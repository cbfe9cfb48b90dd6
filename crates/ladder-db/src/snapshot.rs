use std::collections::BTreeMap;

use anyhow::Result;

use ladder_types::{
    CategoryConfig, CategoryKey, CommunityId, HistoryRow, Match, PlayerId, PlayerMeta,
    PlayerRecord, ScheduledDeletion,
};

use crate::Database;

/// Active and removed records of one category, each in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterSnapshot {
    pub active: Vec<(PlayerId, PlayerRecord)>,
    pub removed: Vec<(PlayerId, PlayerRecord)>,
}

/// The active registry of one category: live matches plus pending thread cleanups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveBucket {
    pub matches: Vec<Match>,
    pub deletions: Vec<ScheduledDeletion>,
}

#[derive(Debug, Clone, Default)]
pub struct CommunitySnapshot {
    pub categories: Vec<CategoryConfig>,
    pub rosters: BTreeMap<CategoryKey, RosterSnapshot>,
    /// Bio scope (category key or the global scope) -> player -> bio.
    pub bios: BTreeMap<String, BTreeMap<PlayerId, String>>,
    pub meta: BTreeMap<PlayerId, PlayerMeta>,
    pub active: BTreeMap<CategoryKey, ActiveBucket>,
}

/// Everything durable except match history, which is read on demand.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub communities: BTreeMap<CommunityId, CommunitySnapshot>,
}

/// Durable snapshot storage keyed by community.
///
/// Every `save_*` replaces its whole scope atomically: rows currently stored
/// for the scope are deleted and the given snapshot is reinserted, so calling
/// it twice with the same input is a no-op. History is the exception and only
/// ever appends.
pub trait SnapshotStore: Send + Sync {
    fn load_all(&self) -> Result<Snapshot>;

    fn load_roster(&self, community: CommunityId, category: &CategoryKey) -> Result<RosterSnapshot>;

    fn save_categories(&self, community: CommunityId, categories: &[CategoryConfig]) -> Result<()>;

    fn save_roster(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        records: &[(PlayerId, PlayerRecord)],
    ) -> Result<()>;

    fn save_removed(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        records: &[(PlayerId, PlayerRecord)],
    ) -> Result<()>;

    fn save_bios(
        &self,
        community: CommunityId,
        scope: &str,
        bios: &BTreeMap<PlayerId, String>,
    ) -> Result<()>;

    fn save_meta(&self, community: CommunityId, meta: &BTreeMap<PlayerId, PlayerMeta>) -> Result<()>;

    fn save_active_matches(
        &self,
        community: CommunityId,
        registry: &BTreeMap<CategoryKey, ActiveBucket>,
    ) -> Result<()>;

    fn append_history_rows(&self, community: CommunityId, rows: &[HistoryRow]) -> Result<()>;

    fn load_history(
        &self,
        community: CommunityId,
        category: Option<&CategoryKey>,
    ) -> Result<Vec<HistoryRow>>;
}

impl SnapshotStore for Database {
    fn load_all(&self) -> Result<Snapshot> {
        Database::load_all(self)
    }

    fn load_roster(&self, community: CommunityId, category: &CategoryKey) -> Result<RosterSnapshot> {
        Database::load_roster(self, community, category)
    }

    fn save_categories(&self, community: CommunityId, categories: &[CategoryConfig]) -> Result<()> {
        Database::save_categories(self, community, categories)
    }

    fn save_roster(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        records: &[(PlayerId, PlayerRecord)],
    ) -> Result<()> {
        Database::save_players(self, "players", community, category, records)
    }

    fn save_removed(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        records: &[(PlayerId, PlayerRecord)],
    ) -> Result<()> {
        Database::save_players(self, "removed_players", community, category, records)
    }

    fn save_bios(
        &self,
        community: CommunityId,
        scope: &str,
        bios: &BTreeMap<PlayerId, String>,
    ) -> Result<()> {
        Database::save_bios(self, community, scope, bios)
    }

    fn save_meta(&self, community: CommunityId, meta: &BTreeMap<PlayerId, PlayerMeta>) -> Result<()> {
        Database::save_meta(self, community, meta)
    }

    fn save_active_matches(
        &self,
        community: CommunityId,
        registry: &BTreeMap<CategoryKey, ActiveBucket>,
    ) -> Result<()> {
        Database::save_active_matches(self, community, registry)
    }

    fn append_history_rows(&self, community: CommunityId, rows: &[HistoryRow]) -> Result<()> {
        Database::append_history_rows(self, community, rows)
    }

    fn load_history(
        &self,
        community: CommunityId,
        category: Option<&CategoryKey>,
    ) -> Result<Vec<HistoryRow>> {
        Database::load_history(self, community, category)
    }
}
