use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{info, warn};

use ladder_db::SnapshotStore;
use ladder_types::api::{HistoryEntry, Profile, RankEntry};
use ladder_types::events::{CancelReason, Notification};
use ladder_types::{
    Actor, CategoryConfig, CategoryKey, CommunityId, GLOBAL_BIO_SCOPE, HistoryOutcome,
    HistoryRow, Match, MatchStatus, Mode, PlayerId, PlayerRecord, RoleId, ThreadId,
};

use crate::community::Community;
use crate::config::EngineConfig;
use crate::error::{LadderError, Result};
use crate::notify::Notifier;
use crate::persist::{SaveScheduler, SaveScope};
use crate::roster::Roster;

pub const MAX_BIO_CHARS: usize = 100;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Rows shown on a profile.
const PROFILE_HISTORY_LEN: usize = 5;

/// The ranking and matchmaking core. Holds every community's state and
/// hands each mutation to the save scheduler and the notifier.
pub struct Engine {
    pub(crate) config: EngineConfig,
    store: Arc<dyn SnapshotStore>,
    communities: RwLock<HashMap<CommunityId, Arc<Mutex<Community>>>>,
    saver: SaveScheduler,
    notifier: Notifier,
}

impl Engine {
    /// An engine with no state. Rosters still hydrate lazily from `store`.
    pub fn new(config: EngineConfig, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            config,
            saver: SaveScheduler::new(store.clone()),
            store,
            communities: RwLock::new(HashMap::new()),
            notifier: Notifier::new(),
        }
    }

    /// Rebuild all in-memory state from the last durable snapshot.
    pub async fn load(config: EngineConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        let loader = store.clone();
        let snapshot = tokio::task::spawn_blocking(move || loader.load_all())
            .await
            .map_err(|e| LadderError::Persistence(anyhow::anyhow!("snapshot load panicked: {}", e)))??;

        let engine = Self::new(config, store);
        {
            let mut communities = engine.communities.write().await;
            for (id, data) in snapshot.communities {
                let community = Community::from_snapshot(id, data);
                let live: usize = community.registry.values().map(|b| b.matches.len()).sum();
                info!(
                    "Restored community {}: {} categories, {} active matches",
                    id,
                    community.categories.len(),
                    live
                );
                communities.insert(id, Arc::new(Mutex::new(community)));
            }
        }
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// A handle for publishing alongside the engine, e.g. from a janitor.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn saver(&self) -> &SaveScheduler {
        &self.saver
    }

    pub(crate) fn notify(&self, event: Notification) {
        self.notifier.publish(event);
    }

    pub(crate) async fn community(&self, id: CommunityId) -> Arc<Mutex<Community>> {
        if let Some(state) = self.communities.read().await.get(&id) {
            return state.clone();
        }
        self.communities
            .write()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(Community::new(id))))
            .clone()
    }

    /// A community's state if anything was ever stored for it. Reads go
    /// through here so a query for an unknown id leaves no entry behind.
    pub(crate) async fn existing(&self, id: CommunityId) -> Option<Arc<Mutex<Community>>> {
        self.communities.read().await.get(&id).cloned()
    }

    /// The state of a community that must already hold `category`.
    pub(crate) async fn hosting(&self, id: CommunityId, category: &CategoryKey) -> Result<Arc<Mutex<Community>>> {
        self.existing(id).await.ok_or_else(|| unknown_category(category))
    }

    async fn loaded(&self) -> Vec<(CommunityId, Arc<Mutex<Community>>)> {
        self.communities
            .read()
            .await
            .iter()
            .map(|(id, state)| (*id, state.clone()))
            .collect()
    }

    pub(crate) fn persist(
        &self,
        id: CommunityId,
        state: &Arc<Mutex<Community>>,
        scopes: impl IntoIterator<Item = SaveScope>,
    ) {
        for scope in scopes {
            self.saver.schedule(id, scope, state.clone());
        }
    }

    /// Load a category's roster from storage the first time it is touched.
    pub(crate) async fn ensure_roster(&self, c: &mut Community, category: &CategoryKey) -> Result<()> {
        if c.rosters.contains_key(category) {
            return Ok(());
        }
        let store = self.store.clone();
        let id = c.id;
        let key = category.clone();
        let snapshot = tokio::task::spawn_blocking(move || store.load_roster(id, &key))
            .await
            .map_err(|e| LadderError::Persistence(anyhow::anyhow!("roster load panicked: {}", e)))??;
        c.rosters
            .insert(category.clone(), Roster::from_snapshot(snapshot));
        Ok(())
    }

    /// Refresh the cached display name and avatar. Returns true on change.
    pub(crate) fn record_meta(c: &mut Community, actor: &Actor) -> bool {
        let Some(meta) = actor.meta() else {
            return false;
        };
        if c.meta.get(&actor.id) == Some(&meta) {
            return false;
        }
        c.meta.insert(actor.id, meta);
        true
    }

    // -- Categories --

    /// Create a category or update the fields given for an existing one.
    /// Mode changes only affect matches issued afterwards.
    pub async fn configure_category(
        &self,
        community: CommunityId,
        name: &str,
        mode: Option<Mode>,
        participant_role: Option<RoleId>,
        thread_cleanup_secs: Option<u64>,
    ) -> Result<CategoryConfig> {
        let key = CategoryKey::new(name);
        if key.as_str().is_empty() {
            return Err(LadderError::validation("Leaderboard name cannot be empty."));
        }

        let state = self.community(community).await;
        let mut c = state.lock().await;
        let cfg = match c.categories.get_mut(&key) {
            Some(cfg) => {
                cfg.name = name.trim().to_string();
                if let Some(mode) = mode {
                    cfg.mode = mode;
                }
                if participant_role.is_some() {
                    cfg.participant_role = participant_role;
                }
                if let Some(secs) = thread_cleanup_secs {
                    cfg.thread_cleanup_secs = secs;
                }
                cfg.clone()
            }
            None => {
                let mut cfg = CategoryConfig::new(name, mode.unwrap_or_default());
                cfg.participant_role = participant_role;
                cfg.thread_cleanup_secs =
                    thread_cleanup_secs.unwrap_or(self.config.default_thread_cleanup.as_secs());
                c.categories.insert(key.clone(), cfg.clone());
                cfg
            }
        };
        drop(c);

        info!(
            "Community {}: leaderboard {} configured ({})",
            community,
            cfg.key,
            cfg.mode.label()
        );
        self.persist(community, &state, [SaveScope::Categories]);
        Ok(cfg)
    }

    /// Drop a category with its roster and bios. Live matches are cancelled
    /// and their threads cleaned up on the next sweep. Match history stays.
    pub async fn remove_category(&self, community: CommunityId, category: &CategoryKey) -> Result<Vec<Match>> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        if !c.categories.contains_key(category) {
            return Err(unknown_category(category));
        }

        let now = Utc::now();
        c.categories.remove(category);
        // An empty roster stays behind so a later category of the same name
        // starts fresh instead of hydrating rows the pending saves erase.
        c.rosters.insert(category.clone(), Roster::default());
        c.bios.remove(category.as_str());

        let cancelled: Vec<Match> = c
            .registry
            .get_mut(category)
            .map(|bucket| std::mem::take(&mut bucket.matches))
            .unwrap_or_default();
        for m in &cancelled {
            if let Some(thread) = m.thread {
                c.schedule_thread_deletion(category, thread, now);
            }
        }
        if c.registry.get(category).is_some_and(|b| b.deletions.is_empty()) {
            c.registry.remove(category);
        }
        drop(c);

        for m in &cancelled {
            self.notify(Notification::MatchCancelled {
                community,
                category: category.clone(),
                match_id: m.id,
                reason: CancelReason::CategoryRemoved,
            });
        }
        info!("Community {}: leaderboard {} removed", community, category);
        // Every store write goes through the scheduler, so a save that
        // captured the old roster is followed by one writing it empty.
        self.persist(
            community,
            &state,
            [
                SaveScope::Categories,
                SaveScope::Roster(category.clone()),
                SaveScope::Removed(category.clone()),
                SaveScope::Bios(category.as_str().to_string()),
                SaveScope::ActiveMatches,
            ],
        );
        Ok(cancelled
            .into_iter()
            .map(|mut m| {
                m.status = MatchStatus::Cancelled;
                m
            })
            .collect())
    }

    /// Give a category a new display name and key. Its roster, bios and
    /// live matches move along; history rows keep the key they were
    /// recorded under.
    pub async fn rename_category(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        new_name: &str,
    ) -> Result<CategoryConfig> {
        let new_key = CategoryKey::new(new_name);
        if new_key.as_str().is_empty() {
            return Err(LadderError::validation("New name cannot be empty."));
        }
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let mut cfg = category_config(&c, category)?;
        let moved = &new_key != category;
        if moved && c.categories.contains_key(&new_key) {
            return Err(LadderError::conflict("A leaderboard with that name already exists."));
        }
        self.ensure_roster(&mut c, category).await?;

        c.categories.remove(category);
        cfg.key = new_key.clone();
        cfg.name = new_name.trim().to_string();
        c.categories.insert(new_key.clone(), cfg.clone());

        let mut scopes = vec![SaveScope::Categories];
        if moved {
            // The old key keeps an empty roster so its stored rows get cleared.
            let roster = c
                .rosters
                .insert(category.clone(), Roster::default())
                .unwrap_or_default();
            c.rosters.insert(new_key.clone(), roster);
            if let Some(bios) = c.bios.remove(category.as_str()) {
                c.bios.insert(new_key.as_str().to_string(), bios);
            }
            if let Some(mut bucket) = c.registry.remove(category) {
                for m in bucket.matches.iter_mut() {
                    m.category = new_key.clone();
                }
                c.registry.insert(new_key.clone(), bucket);
            }
            for key in [category, &new_key] {
                scopes.push(SaveScope::Roster(key.clone()));
                scopes.push(SaveScope::Removed(key.clone()));
                scopes.push(SaveScope::Bios(key.as_str().to_string()));
            }
            scopes.push(SaveScope::ActiveMatches);
        }
        drop(c);

        info!("Community {}: leaderboard {} renamed to {}", community, category, new_key);
        self.persist(community, &state, scopes);
        self.notify(Notification::CategoryRenamed {
            community,
            from: category.clone(),
            to: new_key,
        });
        Ok(cfg)
    }

    /// Moderator correction of a player's rating or win/loss record. Fields
    /// left out keep their value; a player without a record gets one.
    #[allow(clippy::too_many_arguments)]
    pub async fn edit_player_stats(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        player: PlayerId,
        rating: Option<f64>,
        wins: Option<u32>,
        losses: Option<u32>,
    ) -> Result<PlayerRecord> {
        require_moderator(actor)?;
        if rating.is_none() && wins.is_none() && losses.is_none() {
            return Err(LadderError::validation("Nothing to change."));
        }
        if rating.is_some_and(|r| !r.is_finite() || r < 0.0) {
            return Err(LadderError::validation("Rating must be a non-negative number."));
        }

        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;

        let default_rating = self.config.default_rating;
        let roster = c.rosters.entry(category.clone()).or_default();
        let record = roster.record_mut(player, default_rating);
        if let Some(rating) = rating {
            record.rating = rating;
        }
        if let Some(wins) = wins {
            record.wins = wins;
        }
        if let Some(losses) = losses {
            record.losses = losses;
        }
        let record = *record;
        drop(c);

        info!(
            "Community {}: stats of player {} in {} set to {:.1} ({}-{}) by {}",
            community, player, category, record.rating, record.wins, record.losses, actor.id
        );
        self.persist(
            community,
            &state,
            [SaveScope::Roster(category.clone()), SaveScope::Removed(category.clone())],
        );
        self.notify(Notification::StatsEdited {
            community,
            category: category.clone(),
            player,
            record,
        });
        Ok(record)
    }

    /// Make every scheduled thread cleanup in `category`, or in the whole
    /// community, due now. Returns how many threads the next sweep deletes.
    pub async fn purge_threads(
        &self,
        community: CommunityId,
        actor: &Actor,
        category: Option<&CategoryKey>,
    ) -> Result<usize> {
        require_moderator(actor)?;
        let Some(state) = self.existing(community).await else {
            return match category {
                Some(key) => Err(unknown_category(key)),
                None => Ok(0),
            };
        };
        let mut c = state.lock().await;
        if let Some(key) = category {
            if !c.categories.contains_key(key) && !c.registry.contains_key(key) {
                return Err(unknown_category(key));
            }
        }

        let now = Utc::now();
        let mut queued = 0;
        for (key, bucket) in c.registry.iter_mut() {
            if category.is_some_and(|k| k != key) {
                continue;
            }
            for deletion in bucket.deletions.iter_mut() {
                deletion.delete_at = deletion.delete_at.min(now);
                queued += 1;
            }
        }
        drop(c);

        if queued > 0 {
            info!("Community {}: {} thread cleanups moved up by {}", community, queued, actor.id);
            self.persist(community, &state, [SaveScope::ActiveMatches]);
        }
        Ok(queued)
    }

    pub async fn list_categories(&self, community: CommunityId) -> Vec<CategoryConfig> {
        let Some(state) = self.existing(community).await else {
            return Vec::new();
        };
        let c = state.lock().await;
        c.categories.values().cloned().collect()
    }

    // -- Roster --

    pub async fn remove_player(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        player: PlayerId,
    ) -> Result<PlayerRecord> {
        require_moderator(actor)?;
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;

        let roster = c.rosters.entry(category.clone()).or_default();
        if !roster.remove(player) {
            return Err(LadderError::not_found("That player is not on this leaderboard."));
        }
        let record = roster.get(player).copied().unwrap_or_default();
        drop(c);

        info!("Community {}: player {} removed from {}", community, player, category);
        self.persist(
            community,
            &state,
            [SaveScope::Roster(category.clone()), SaveScope::Removed(category.clone())],
        );
        self.notify(Notification::RosterChanged {
            community,
            category: category.clone(),
            player,
            active: false,
        });
        Ok(record)
    }

    pub async fn restore_player(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        player: PlayerId,
    ) -> Result<PlayerRecord> {
        require_moderator(actor)?;
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;

        let default_rating = self.config.default_rating;
        let roster = c.rosters.entry(category.clone()).or_default();
        if !roster.is_removed(player) {
            return Err(LadderError::not_found("That player is not currently removed."));
        }
        let (record, _) = roster.restore(player, default_rating);
        drop(c);

        info!("Community {}: player {} restored to {}", community, player, category);
        self.persist(
            community,
            &state,
            [SaveScope::Roster(category.clone()), SaveScope::Removed(category.clone())],
        );
        self.notify(Notification::RosterChanged {
            community,
            category: category.clone(),
            player,
            active: true,
        });
        Ok(record)
    }

    /// Follow an external role change: categories gated on a revoked role
    /// move the player to the removed pool, categories gated on a granted
    /// role bring a removed player back. Returns each move made.
    pub async fn sync_member_roles(
        &self,
        community: CommunityId,
        player: PlayerId,
        removed_roles: &[RoleId],
        added_roles: &[RoleId],
    ) -> Result<Vec<(CategoryKey, bool)>> {
        let Some(state) = self.existing(community).await else {
            return Ok(Vec::new());
        };
        let mut c = state.lock().await;

        let gated: Vec<(CategoryKey, RoleId)> = c
            .categories
            .values()
            .filter_map(|cfg| cfg.participant_role.map(|role| (cfg.key.clone(), role)))
            .collect();

        let mut moves = Vec::new();
        for (key, role) in gated {
            let revoked = removed_roles.contains(&role);
            let granted = added_roles.contains(&role);
            if revoked == granted {
                continue;
            }
            self.ensure_roster(&mut c, &key).await?;
            let default_rating = self.config.default_rating;
            let roster = c.rosters.entry(key.clone()).or_default();
            if revoked && roster.remove(player) {
                moves.push((key, false));
            } else if granted && roster.is_removed(player) {
                roster.restore(player, default_rating);
                moves.push((key, true));
            }
        }
        drop(c);

        for (key, active) in &moves {
            info!(
                "Community {}: role sync moved player {} {} {}",
                community,
                player,
                if *active { "back into" } else { "out of" },
                key
            );
            self.persist(
                community,
                &state,
                [SaveScope::Roster(key.clone()), SaveScope::Removed(key.clone())],
            );
            self.notify(Notification::RosterChanged {
                community,
                category: key.clone(),
                player,
                active: *active,
            });
        }
        Ok(moves)
    }

    /// Set or clear (empty text) the player's community-wide bio.
    pub async fn set_bio(&self, community: CommunityId, actor: &Actor, text: &str) -> Result<()> {
        let text = text.trim();
        if text.chars().count() > MAX_BIO_CHARS {
            return Err(LadderError::validation(format!(
                "Bio must be {} characters or fewer.",
                MAX_BIO_CHARS
            )));
        }

        let state = self.community(community).await;
        let mut c = state.lock().await;
        let bios = c.bios.entry(GLOBAL_BIO_SCOPE.to_string()).or_default();
        if text.is_empty() {
            bios.remove(&actor.id);
        } else {
            bios.insert(actor.id, text.to_string());
        }
        let meta_changed = Self::record_meta(&mut c, actor);
        drop(c);

        self.persist(community, &state, [SaveScope::Bios(GLOBAL_BIO_SCOPE.to_string())]);
        if meta_changed {
            self.persist(community, &state, [SaveScope::Meta]);
        }
        Ok(())
    }

    // -- Projections --

    pub async fn leaderboard(&self, community: CommunityId, category: &CategoryKey) -> Result<Vec<RankEntry>> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;
        Ok(c.roster(category).map(Roster::standings).unwrap_or_default())
    }

    pub async fn query_rank(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        player: PlayerId,
    ) -> Result<Option<RankEntry>> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;
        Ok(c.roster(category)
            .and_then(|r| r.rank(player))
            .map(|(rank, record)| RankEntry { rank, player, record }))
    }

    /// Live matches of a category, oldest first.
    pub async fn active_matches(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        player: Option<PlayerId>,
    ) -> Result<Vec<Match>> {
        let state = self.hosting(community, category).await?;
        let c = state.lock().await;
        category_config(&c, category)?;
        Ok(c.registry
            .get(category)
            .map(|bucket| {
                bucket
                    .matches
                    .iter()
                    .filter(|m| player.is_none_or(|p| m.involves(p)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Stored rows plus rows still waiting for their write, oldest first.
    async fn history_rows(
        &self,
        community: CommunityId,
        category: Option<&CategoryKey>,
    ) -> Result<Vec<HistoryRow>> {
        // Hold the lock across the read so an in-flight history save cannot
        // hide or double a row.
        let Some(state) = self.existing(community).await else {
            return Ok(Vec::new());
        };
        let c = state.lock().await;
        let store = self.store.clone();
        let key = category.cloned();
        let mut rows = tokio::task::spawn_blocking(move || store.load_history(community, key.as_ref()))
            .await
            .map_err(|e| LadderError::Persistence(anyhow::anyhow!("history load panicked: {}", e)))??;
        rows.extend(
            c.pending_history
                .iter()
                .filter(|row| category.is_none_or(|k| &row.category == k))
                .cloned(),
        );
        Ok(rows)
    }

    /// Completed matches, newest first. Without a player each match shows
    /// once, from the winner's side; with one, from that player's side.
    pub async fn history(
        &self,
        community: CommunityId,
        category: Option<&CategoryKey>,
        player: Option<PlayerId>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = self.history_rows(community, category).await?;
        Ok(rows
            .into_iter()
            .rev()
            .filter(|row| match player {
                Some(p) => row.player == p,
                None => row.outcome == HistoryOutcome::Win,
            })
            .take(limit)
            .map(history_entry)
            .collect())
    }

    /// A player's standing in one category. Without a category, the one
    /// they have played most is used (ties go to the lexically first).
    pub async fn profile(
        &self,
        community: CommunityId,
        player: PlayerId,
        category: Option<&CategoryKey>,
    ) -> Result<Profile> {
        let rows = self.history_rows(community, category).await?;
        let rows: Vec<HistoryRow> = rows.into_iter().filter(|r| r.player == player).collect();

        let state = match category {
            Some(key) => self.hosting(community, key).await?,
            None => self
                .existing(community)
                .await
                .ok_or_else(|| LadderError::not_found("No leaderboards configured."))?,
        };
        let mut c = state.lock().await;
        let key = match category {
            Some(key) => {
                category_config(&c, key)?;
                key.clone()
            }
            None => most_active_category(&rows)
                .filter(|key| c.categories.contains_key(key))
                .or_else(|| c.categories.keys().next().cloned())
                .ok_or_else(|| LadderError::not_found("No leaderboards configured."))?,
        };
        let cfg = category_config(&c, &key)?;
        self.ensure_roster(&mut c, &key).await?;

        let roster = c.roster(&key);
        let record = roster
            .and_then(|r| r.get(player).copied())
            .unwrap_or_else(|| PlayerRecord::fresh(self.config.default_rating));
        let rank = roster.and_then(|r| r.rank(player)).map(|(rank, _)| rank);
        let meta = c.meta.get(&player).cloned().unwrap_or_default();
        let bio = c
            .bios
            .get(GLOBAL_BIO_SCOPE)
            .and_then(|b| b.get(&player))
            .or_else(|| c.bios.get(key.as_str()).and_then(|b| b.get(&player)))
            .cloned();

        let in_category: Vec<&HistoryRow> = rows.iter().filter(|r| r.category == key).collect();
        let latest_delta = in_category.last().map(|r| r.rating_change);
        let history = in_category
            .iter()
            .rev()
            .take(PROFILE_HISTORY_LEN)
            .map(|r| history_entry((*r).clone()))
            .collect();

        Ok(Profile {
            player,
            category: key,
            mode: cfg.mode,
            record,
            rank,
            matches_played: record.matches_played(),
            name: meta.name,
            avatar: meta.avatar,
            bio,
            latest_delta,
            history,
        })
    }

    // -- Sweeper hooks --

    /// Cancel every targeted challenge whose response window has closed.
    /// A pending challenge stored without a deadline gets one counted from
    /// its creation.
    pub async fn expire_pending(&self, now: DateTime<Utc>) -> Vec<(CommunityId, Match)> {
        let timeout = ChronoDuration::from_std(self.config.pending_timeout)
            .unwrap_or_else(|_| ChronoDuration::hours(6));
        let mut expired = Vec::new();

        for (id, state) in self.loaded().await {
            let mut c = state.lock().await;
            let mut changed = false;
            let mut due = Vec::new();
            for (key, bucket) in c.registry.iter_mut() {
                for m in bucket.matches.iter_mut() {
                    if m.status != MatchStatus::Pending || m.opponent.is_none() {
                        continue;
                    }
                    let deadline = match m.response_deadline {
                        Some(deadline) => deadline,
                        None => {
                            let deadline = m.created_at + timeout;
                            m.response_deadline = Some(deadline);
                            changed = true;
                            deadline
                        }
                    };
                    if deadline <= now {
                        due.push((key.clone(), m.id));
                    }
                }
            }

            for (key, match_id) in due {
                if let Some(mut m) = c.detach_match(&key, match_id) {
                    m.status = MatchStatus::Cancelled;
                    if let Some(thread) = m.thread {
                        c.schedule_thread_deletion(&key, thread, now);
                    }
                    info!("Community {}: challenge {} expired without a response", id, m.id);
                    self.notify(Notification::MatchCancelled {
                        community: id,
                        category: key,
                        match_id: m.id,
                        reason: CancelReason::Expired,
                    });
                    expired.push((id, m));
                    changed = true;
                }
            }
            drop(c);

            if changed {
                self.persist(id, &state, [SaveScope::ActiveMatches]);
            }
        }
        expired
    }

    /// Remove and return every thread cleanup that is due. Live matches
    /// holding one of those threads lose the reference.
    pub async fn take_due_deletions(&self, now: DateTime<Utc>) -> Vec<(CommunityId, ThreadId)> {
        let mut due_all = Vec::new();
        for (id, state) in self.loaded().await {
            let mut c = state.lock().await;
            let mut due = Vec::new();
            for bucket in c.registry.values_mut() {
                bucket.deletions.retain(|d| {
                    if d.delete_at <= now {
                        due.push(d.thread);
                        false
                    } else {
                        true
                    }
                });
                for m in bucket.matches.iter_mut() {
                    if m.thread.is_some_and(|t| due.contains(&t)) {
                        m.thread = None;
                    }
                }
            }
            if due.is_empty() {
                continue;
            }
            let categories: Vec<CategoryKey> = c.categories.keys().cloned().collect();
            c.registry.retain(|key, bucket| {
                categories.contains(key) || !bucket.matches.is_empty() || !bucket.deletions.is_empty()
            });
            drop(c);

            self.persist(id, &state, [SaveScope::ActiveMatches]);
            due_all.extend(due.into_iter().map(|thread| (id, thread)));
        }
        due_all
    }

    // -- Shutdown --

    /// Write every scope of every loaded community now.
    pub async fn flush(&self) {
        for (id, state) in self.loaded().await {
            self.saver.flush(id, &state).await;
        }
    }

    /// Let running saves finish, then write everything once more. Saves
    /// still running after the grace period are aborted. Mutations made
    /// after this returns are not persisted.
    pub async fn shutdown(&self) {
        if tokio::time::timeout(SHUTDOWN_GRACE, self.saver.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "{} saves still running after {:?}, aborting them",
                self.saver.in_flight(),
                SHUTDOWN_GRACE
            );
            self.saver.shutdown();
        }
        self.flush().await;
        info!("Ladder engine stopped");
    }
}

// -- Shared checks --

pub(crate) fn unknown_category(category: &CategoryKey) -> LadderError {
    LadderError::not_found(format!("No leaderboard named '{}'.", category))
}

pub(crate) fn category_config(c: &Community, category: &CategoryKey) -> Result<CategoryConfig> {
    c.categories
        .get(category)
        .cloned()
        .ok_or_else(|| unknown_category(category))
}

pub(crate) fn require_moderator(actor: &Actor) -> Result<()> {
    if actor.privileged {
        Ok(())
    } else {
        Err(LadderError::permission("You do not have permission."))
    }
}

fn history_entry(row: HistoryRow) -> HistoryEntry {
    HistoryEntry {
        category: row.category,
        player: row.player,
        opponent: row.opponent,
        outcome: row.outcome,
        player_value: row.player_value,
        opponent_value: row.opponent_value,
        rating_change: row.rating_change,
        recorded_at: row.recorded_at,
    }
}

fn most_active_category(rows: &[HistoryRow]) -> Option<CategoryKey> {
    let mut counts: BTreeMap<&CategoryKey, usize> = BTreeMap::new();
    for row in rows {
        *counts.entry(&row.category).or_default() += 1;
    }
    // BTreeMap iterates lexically, so max_by_key must keep the first maximum.
    let mut best: Option<(&CategoryKey, usize)> = None;
    for (key, count) in counts {
        if best.is_none_or(|(_, n)| count > n) {
            best = Some((key, count));
        }
    }
    best.map(|(key, _)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(category: &str) -> HistoryRow {
        HistoryRow {
            category: CategoryKey::new(category),
            player: PlayerId(1),
            opponent: PlayerId(2),
            recorded_at: Utc::now(),
            was_challenger: true,
            player_value: "3".into(),
            opponent_value: "1".into(),
            outcome: HistoryOutcome::Win,
            rating_change: 10.0,
        }
    }

    #[tokio::test]
    async fn reads_leave_unknown_communities_untouched() {
        let db = Arc::new(ladder_db::Database::open_in_memory().unwrap());
        let engine = Engine::new(EngineConfig::default(), db);
        let key = CategoryKey::new("any%");
        let stranger = CommunityId(404);

        assert!(engine.list_categories(stranger).await.is_empty());
        assert!(engine.leaderboard(stranger, &key).await.is_err());
        assert!(engine.history(stranger, None, None, 10).await.unwrap().is_empty());
        assert!(engine.profile(stranger, PlayerId(1), None).await.is_err());
        assert!(engine.sync_member_roles(stranger, PlayerId(1), &[], &[]).await.unwrap().is_empty());
        assert!(
            engine
                .issue_open_challenge(stranger, &key, &Actor::new(PlayerId(1)), None, false)
                .await
                .is_err()
        );
        assert!(engine.communities.read().await.is_empty());
    }

    #[test]
    fn most_active_category_breaks_ties_lexically() {
        let rows = vec![row("zeta"), row("alpha"), row("zeta"), row("alpha"), row("mid")];
        assert_eq!(most_active_category(&rows), Some(CategoryKey::new("alpha")));
        let rows = vec![row("zeta"), row("zeta"), row("alpha")];
        assert_eq!(most_active_category(&rows), Some(CategoryKey::new("zeta")));
        assert_eq!(most_active_category(&[]), None);
    }
}
