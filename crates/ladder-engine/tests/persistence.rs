use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};

use ladder_db::{ActiveBucket, Database, RosterSnapshot, Snapshot, SnapshotStore};
use ladder_engine::{Engine, EngineConfig};
use ladder_types::api::Outcome;
use ladder_types::{
    Actor, CategoryConfig, CategoryKey, CommunityId, HistoryRow, Mode, PlayerId, PlayerMeta,
    PlayerRecord, ResultKind,
};

const C: CommunityId = CommunityId(3);

/// SQLite store with knobs: slow registry or roster writes, and one-shot
/// failures of registry and history writes.
#[derive(Default)]
struct ScriptedStore {
    inner: Option<Database>,
    registry_writes: AtomicUsize,
    registry_delay: Duration,
    roster_delay: Duration,
    fail_registry_once: AtomicBool,
    fail_history_once: AtomicBool,
}

impl ScriptedStore {
    fn new() -> Self {
        Self {
            inner: Some(Database::open_in_memory().unwrap()),
            ..Self::default()
        }
    }

    fn db(&self) -> &Database {
        self.inner.as_ref().unwrap()
    }
}

impl SnapshotStore for ScriptedStore {
    fn load_all(&self) -> Result<Snapshot> {
        self.db().load_all()
    }

    fn load_roster(&self, community: CommunityId, category: &CategoryKey) -> Result<RosterSnapshot> {
        self.db().load_roster(community, category)
    }

    fn save_categories(&self, community: CommunityId, categories: &[CategoryConfig]) -> Result<()> {
        self.db().save_categories(community, categories)
    }

    fn save_roster(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        records: &[(PlayerId, PlayerRecord)],
    ) -> Result<()> {
        std::thread::sleep(self.roster_delay);
        SnapshotStore::save_roster(self.db(), community, category, records)
    }

    fn save_removed(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        records: &[(PlayerId, PlayerRecord)],
    ) -> Result<()> {
        SnapshotStore::save_removed(self.db(), community, category, records)
    }

    fn save_bios(
        &self,
        community: CommunityId,
        scope: &str,
        bios: &BTreeMap<PlayerId, String>,
    ) -> Result<()> {
        self.db().save_bios(community, scope, bios)
    }

    fn save_meta(&self, community: CommunityId, meta: &BTreeMap<PlayerId, PlayerMeta>) -> Result<()> {
        self.db().save_meta(community, meta)
    }

    fn save_active_matches(
        &self,
        community: CommunityId,
        registry: &BTreeMap<CategoryKey, ActiveBucket>,
    ) -> Result<()> {
        self.registry_writes.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.registry_delay);
        if self.fail_registry_once.swap(false, Ordering::SeqCst) {
            bail!("disk full");
        }
        self.db().save_active_matches(community, registry)
    }

    fn append_history_rows(&self, community: CommunityId, rows: &[HistoryRow]) -> Result<()> {
        if self.fail_history_once.swap(false, Ordering::SeqCst) {
            bail!("disk full");
        }
        self.db().append_history_rows(community, rows)
    }

    fn load_history(
        &self,
        community: CommunityId,
        category: Option<&CategoryKey>,
    ) -> Result<Vec<HistoryRow>> {
        self.db().load_history(community, category)
    }
}

async fn engine_with(store: ScriptedStore) -> (Arc<ScriptedStore>, Engine, CategoryKey) {
    let store = Arc::new(store);
    let engine = Engine::new(EngineConfig::default(), store.clone());
    let key = engine
        .configure_category(C, "Any%", None, None, None)
        .await
        .unwrap()
        .key;
    engine.saver().wait_idle().await;
    (store, engine, key)
}

async fn play(engine: &Engine, key: &CategoryKey, winner: u64, loser: u64) {
    let m = engine
        .issue_targeted_challenge(C, key, &Actor::new(PlayerId(winner)), &Actor::new(PlayerId(loser)))
        .await
        .unwrap();
    engine
        .accept_match(C, key, &Actor::new(PlayerId(loser)), m.id)
        .await
        .unwrap();
    engine
        .submit_result(C, key, &Actor::new(PlayerId(winner)), ResultKind::Win, "50")
        .await
        .unwrap();
    let outcome = engine
        .submit_result(C, key, &Actor::new(PlayerId(loser)), ResultKind::Loss, "55")
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Completed(_)));
}

#[tokio::test]
async fn burst_of_mutations_coalesces_registry_writes() {
    let (store, engine, key) = engine_with(ScriptedStore {
        registry_delay: Duration::from_millis(100),
        ..ScriptedStore::new()
    })
    .await;

    for id in 1..=10 {
        engine
            .issue_open_challenge(C, &key, &Actor::new(PlayerId(id)), None, false)
            .await
            .unwrap();
    }
    engine.saver().wait_idle().await;

    // One write in flight plus at most one trailing pass per stall.
    let writes = store.registry_writes.load(Ordering::SeqCst);
    assert!((1..=3).contains(&writes), "{} registry writes", writes);

    let snapshot = store.load_all().unwrap();
    let bucket = &snapshot.communities[&C].active[&key];
    assert_eq!(bucket.matches.len(), 10);
    assert_eq!(bucket.matches[0].challenger, PlayerId(1));
}

#[tokio::test]
async fn flush_writes_state_without_waiting_for_the_queue() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let engine = Engine::new(EngineConfig::default(), db.clone());
    let key = engine
        .configure_category(C, "Any%", None, None, None)
        .await
        .unwrap()
        .key;
    engine
        .issue_open_challenge(C, &key, &Actor::new(PlayerId(1)), Some(2), false)
        .await
        .unwrap();
    engine.flush().await;

    let snapshot = db.load_all().unwrap();
    let community = &snapshot.communities[&C];
    assert_eq!(community.categories.len(), 1);
    assert_eq!(community.active[&key].matches[0].rank_range, Some(2));
}

#[tokio::test]
async fn failed_registry_save_keeps_state_and_retries() {
    let (store, engine, key) = engine_with(ScriptedStore::new()).await;
    store.fail_registry_once.store(true, Ordering::SeqCst);

    let m = engine
        .issue_targeted_challenge(C, &key, &Actor::new(PlayerId(1)), &Actor::new(PlayerId(2)))
        .await
        .unwrap();
    engine.saver().wait_idle().await;

    // The write failed but the challenge stands.
    let live = engine.active_matches(C, &key, None).await.unwrap();
    assert_eq!(live.len(), 1);
    let stored = store.load_all().unwrap();
    assert!(
        stored.communities[&C]
            .active
            .get(&key)
            .is_none_or(|b| b.matches.is_empty())
    );

    engine
        .accept_match(C, &key, &Actor::new(PlayerId(2)), m.id)
        .await
        .unwrap();
    engine.saver().wait_idle().await;

    let stored = store.load_all().unwrap();
    let bucket = &stored.communities[&C].active[&key];
    assert_eq!(bucket.matches.len(), 1);
    assert_eq!(bucket.matches[0].id, m.id);
    assert_eq!(bucket.matches[0].opponent, Some(PlayerId(2)));
}

#[tokio::test]
async fn failed_history_rows_are_written_with_the_next_batch() {
    let (store, engine, key) = engine_with(ScriptedStore::new()).await;
    store.fail_history_once.store(true, Ordering::SeqCst);

    play(&engine, &key, 1, 2).await;
    engine.saver().wait_idle().await;

    assert!(store.load_history(C, None).unwrap().is_empty());
    let visible = engine.history(C, Some(&key), None, 10).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].player, PlayerId(1));

    play(&engine, &key, 3, 4).await;
    engine.saver().wait_idle().await;

    let stored = store.load_history(C, None).unwrap();
    let players: Vec<u64> = stored.iter().map(|r| r.player.0).collect();
    assert_eq!(players, vec![1, 2, 3, 4]);
    assert_eq!(engine.history(C, None, None, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn removing_a_category_outlasts_a_running_roster_save() {
    let (store, engine, _) = engine_with(ScriptedStore {
        roster_delay: Duration::from_millis(200),
        ..ScriptedStore::new()
    })
    .await;
    let bo3 = engine
        .configure_category(C, "Bo3", Some(Mode::score(2)), None, None)
        .await
        .unwrap()
        .key;

    let m = engine
        .issue_targeted_challenge(C, &bo3, &Actor::new(PlayerId(1)), &Actor::new(PlayerId(2)))
        .await
        .unwrap();
    engine
        .decline_match(C, &bo3, &Actor::new(PlayerId(2)), m.id)
        .await
        .unwrap();
    // Let the roster save pick up both records and stall inside the store.
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.remove_category(C, &bo3).await.unwrap();
    engine.saver().wait_idle().await;

    let roster = store.load_roster(C, &bo3).unwrap();
    assert!(roster.active.is_empty());
    assert!(roster.removed.is_empty());

    // Results outlive the category.
    let history = store.load_history(C, Some(&bo3)).unwrap();
    assert_eq!(history.len(), 2);

    engine
        .configure_category(C, "Bo3", Some(Mode::score(2)), None, None)
        .await
        .unwrap();
    assert!(engine.leaderboard(C, &bo3).await.unwrap().is_empty());
}
