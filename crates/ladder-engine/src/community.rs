use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use ladder_db::{ActiveBucket, CommunitySnapshot};
use ladder_types::{
    CategoryConfig, CategoryKey, CommunityId, HistoryRow, Match, MatchId, PlayerId, PlayerMeta,
    ScheduledDeletion, ThreadId,
};

use crate::roster::Roster;

/// All in-memory state of one community. Owned behind a single lock so
/// every mutation of a community is applied sequentially.
#[derive(Debug)]
pub struct Community {
    pub id: CommunityId,
    pub categories: BTreeMap<CategoryKey, CategoryConfig>,
    /// Hydrated on first use.
    pub rosters: HashMap<CategoryKey, Roster>,
    pub registry: BTreeMap<CategoryKey, ActiveBucket>,
    pub bios: BTreeMap<String, BTreeMap<PlayerId, String>>,
    pub meta: BTreeMap<PlayerId, PlayerMeta>,
    /// Completed-match rows not yet written.
    pub pending_history: Vec<HistoryRow>,
}

impl Community {
    pub fn new(id: CommunityId) -> Self {
        Self {
            id,
            categories: BTreeMap::new(),
            rosters: HashMap::new(),
            registry: BTreeMap::new(),
            bios: BTreeMap::new(),
            meta: BTreeMap::new(),
            pending_history: Vec::new(),
        }
    }

    pub fn from_snapshot(id: CommunityId, snapshot: CommunitySnapshot) -> Self {
        let mut community = Self::new(id);
        community.categories = snapshot
            .categories
            .into_iter()
            .map(|cfg| (cfg.key.clone(), cfg))
            .collect();
        community.rosters = snapshot
            .rosters
            .into_iter()
            .map(|(key, roster)| (key, Roster::from_snapshot(roster)))
            .collect();
        community.registry = snapshot.active;
        community.bios = snapshot.bios;
        community.meta = snapshot.meta;
        community
    }

    /// The live match a player is part of, anywhere in the community.
    pub fn active_match_of(&self, player: PlayerId, exclude: Option<MatchId>) -> Option<&Match> {
        self.registry
            .values()
            .flat_map(|bucket| bucket.matches.iter())
            .filter(|m| Some(m.id) != exclude)
            .find(|m| !m.status.is_terminal() && m.involves(player))
    }

    pub fn roster(&self, category: &CategoryKey) -> Option<&Roster> {
        self.rosters.get(category)
    }

    pub fn find_match(&self, category: &CategoryKey, id: MatchId) -> Option<&Match> {
        self.registry
            .get(category)?
            .matches
            .iter()
            .find(|m| m.id == id)
    }

    pub fn find_match_mut(&mut self, category: &CategoryKey, id: MatchId) -> Option<&mut Match> {
        self.registry
            .get_mut(category)?
            .matches
            .iter_mut()
            .find(|m| m.id == id)
    }

    /// Take a match out of the registry.
    pub fn detach_match(&mut self, category: &CategoryKey, id: MatchId) -> Option<Match> {
        let bucket = self.registry.get_mut(category)?;
        let index = bucket.matches.iter().position(|m| m.id == id)?;
        Some(bucket.matches.remove(index))
    }

    /// Queue a thread for cleanup, moving an existing entry for the same
    /// thread instead of adding a second one.
    pub fn schedule_thread_deletion(
        &mut self,
        category: &CategoryKey,
        thread: ThreadId,
        delete_at: DateTime<Utc>,
    ) {
        let deletions = &mut self.registry.entry(category.clone()).or_default().deletions;
        match deletions.iter_mut().find(|d| d.thread == thread) {
            Some(existing) => existing.delete_at = delete_at,
            None => deletions.push(ScheduledDeletion { thread, delete_at }),
        }
    }
}
