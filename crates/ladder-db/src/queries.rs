use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::warn;
use uuid::Uuid;

use ladder_types::{
    CategoryConfig, CategoryKey, CommunityId, HistoryOutcome, HistoryRow, Match, MatchStatus,
    Mode, PlayerId, PlayerMeta, PlayerRecord, ResultKind, RoleId, ScheduledDeletion, Submission,
    ThreadId,
};

use crate::models::{ActiveMatchRow, HistoryRecordRow, SubmissionRow};
use crate::snapshot::{ActiveBucket, CommunitySnapshot, RosterSnapshot, Snapshot};
use crate::Database;

impl Database {
    // -- Snapshot load --

    pub fn load_all(&self) -> Result<Snapshot> {
        self.with_conn(|conn| {
            let mut snapshot = Snapshot::default();
            load_categories(conn, &mut snapshot)?;
            load_players(conn, "players", &mut snapshot)?;
            load_players(conn, "removed_players", &mut snapshot)?;
            load_bios(conn, &mut snapshot)?;
            load_meta(conn, &mut snapshot)?;
            load_active(conn, &mut snapshot)?;
            Ok(snapshot)
        })
    }

    pub fn load_roster(&self, community: CommunityId, category: &CategoryKey) -> Result<RosterSnapshot> {
        self.with_conn(|conn| {
            Ok(RosterSnapshot {
                active: query_roster(conn, "players", community, category)?,
                removed: query_roster(conn, "removed_players", community, category)?,
            })
        })
    }

    // -- Whole-scope saves --

    pub fn save_categories(&self, community: CommunityId, categories: &[CategoryConfig]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM categories WHERE community_id = ?1",
                [to_sql_id(community.0)],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO categories (community_id, category, display_name, mode_key, mode_target, participant_role_id, thread_cleanup_secs)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for cfg in categories {
                    stmt.execute(rusqlite::params![
                        to_sql_id(community.0),
                        cfg.key.as_str(),
                        cfg.name,
                        cfg.mode.key(),
                        cfg.mode.target().map(i64::from),
                        cfg.participant_role.map(|r| to_sql_id(r.0)),
                        cfg.thread_cleanup_secs.min(i64::MAX as u64) as i64,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Replace one category's rows in `players` or `removed_players`.
    /// Rows are inserted in slice order so rowid order reproduces it on load.
    pub fn save_players(
        &self,
        table: &str,
        community: CommunityId,
        category: &CategoryKey,
        records: &[(PlayerId, PlayerRecord)],
    ) -> Result<()> {
        let table = roster_table(table)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!("DELETE FROM {} WHERE community_id = ?1 AND category = ?2", table),
                rusqlite::params![to_sql_id(community.0), category.as_str()],
            )?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {} (community_id, category, user_id, rating, wins, losses) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    table
                ))?;
                for (player, record) in records {
                    stmt.execute(rusqlite::params![
                        to_sql_id(community.0),
                        category.as_str(),
                        to_sql_id(player.0),
                        record.rating,
                        record.wins,
                        record.losses,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn save_bios(
        &self,
        community: CommunityId,
        scope: &str,
        bios: &BTreeMap<PlayerId, String>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM bios WHERE community_id = ?1 AND scope = ?2",
                rusqlite::params![to_sql_id(community.0), scope],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO bios (community_id, scope, user_id, bio) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (player, bio) in bios {
                    stmt.execute(rusqlite::params![to_sql_id(community.0), scope, to_sql_id(player.0), bio])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn save_meta(&self, community: CommunityId, meta: &BTreeMap<PlayerId, PlayerMeta>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM player_meta WHERE community_id = ?1",
                [to_sql_id(community.0)],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO player_meta (community_id, user_id, display_name, avatar_url) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (player, m) in meta {
                    stmt.execute(rusqlite::params![
                        to_sql_id(community.0),
                        to_sql_id(player.0),
                        m.name,
                        m.avatar,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Replace the community's whole active registry: matches, their
    /// submissions and cancel votes, and scheduled thread cleanups.
    pub fn save_active_matches(
        &self,
        community: CommunityId,
        registry: &BTreeMap<CategoryKey, ActiveBucket>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let cid = to_sql_id(community.0);
            for table in [
                "active_matches",
                "active_match_submissions",
                "active_match_cancel_votes",
                "scheduled_deletions",
            ] {
                tx.execute(&format!("DELETE FROM {} WHERE community_id = ?1", table), [cid])?;
            }
            for (category, bucket) in registry {
                insert_bucket(&tx, cid, category, bucket)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- History --

    pub fn append_history_rows(&self, community: CommunityId, rows: &[HistoryRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO match_history (community_id, category, user_id, opponent_id, recorded_at, challenger, user_value, opponent_value, result, rating_change)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for row in rows {
                    stmt.execute(rusqlite::params![
                        to_sql_id(community.0),
                        row.category.as_str(),
                        to_sql_id(row.player.0),
                        to_sql_id(row.opponent.0),
                        row.recorded_at.to_rfc3339(),
                        row.was_challenger,
                        row.player_value,
                        row.opponent_value,
                        row.outcome.as_str(),
                        row.rating_change,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// History rows in append order, optionally limited to one category.
    pub fn load_history(
        &self,
        community: CommunityId,
        category: Option<&CategoryKey>,
    ) -> Result<Vec<HistoryRow>> {
        self.with_conn(|conn| {
            let rows = query_history(conn, community, category)?;
            Ok(rows.into_iter().filter_map(history_from_row).collect())
        })
    }
}

// -- Helpers --

/// SQLite integers are signed; ids round-trip through a bit cast.
fn to_sql_id(id: u64) -> i64 {
    id as i64
}

fn from_sql_id(id: i64) -> u64 {
    id as u64
}

fn roster_table(table: &str) -> Result<&'static str> {
    match table {
        "players" => Ok("players"),
        "removed_players" => Ok("removed_players"),
        other => Err(anyhow::anyhow!("Not a roster table: {}", other)),
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn community_entry(snapshot: &mut Snapshot, id: i64) -> &mut CommunitySnapshot {
    snapshot
        .communities
        .entry(CommunityId(from_sql_id(id)))
        .or_default()
}

fn insert_bucket(
    tx: &Transaction<'_>,
    cid: i64,
    category: &CategoryKey,
    bucket: &ActiveBucket,
) -> Result<()> {
    let mut match_stmt = tx.prepare(
        "INSERT INTO active_matches (community_id, category, match_id, challenger_id, opponent_id, status, mode_key, mode_target, rank_range, thread_id, created_at, accepted_at, response_deadline)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    let mut sub_stmt = tx.prepare(
        "INSERT INTO active_match_submissions (community_id, category, match_id, user_id, kind, value, metric, submitted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let mut vote_stmt = tx.prepare(
        "INSERT INTO active_match_cancel_votes (community_id, category, match_id, user_id) VALUES (?1, ?2, ?3, ?4)",
    )?;

    for m in &bucket.matches {
        let match_id = m.id.to_string();
        match_stmt.execute(rusqlite::params![
            cid,
            category.as_str(),
            match_id,
            to_sql_id(m.challenger.0),
            m.opponent.map(|p| to_sql_id(p.0)),
            m.status.as_str(),
            m.mode.key(),
            m.mode.target().map(i64::from),
            m.rank_range.map(i64::from),
            m.thread.map(|t| to_sql_id(t.0)),
            m.created_at.to_rfc3339(),
            m.accepted_at.map(|t| t.to_rfc3339()),
            m.response_deadline.map(|t| t.to_rfc3339()),
        ])?;
        for (player, sub) in &m.submissions {
            sub_stmt.execute(rusqlite::params![
                cid,
                category.as_str(),
                match_id,
                to_sql_id(player.0),
                sub.kind.as_str(),
                sub.value,
                sub.metric,
                sub.submitted_at.to_rfc3339(),
            ])?;
        }
        for player in &m.cancel_votes {
            vote_stmt.execute(rusqlite::params![cid, category.as_str(), match_id, to_sql_id(player.0)])?;
        }
    }

    let mut del_stmt = tx.prepare(
        "INSERT OR REPLACE INTO scheduled_deletions (community_id, category, thread_id, delete_at) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for d in &bucket.deletions {
        del_stmt.execute(rusqlite::params![
            cid,
            category.as_str(),
            to_sql_id(d.thread.0),
            d.delete_at.to_rfc3339(),
        ])?;
    }
    Ok(())
}

fn load_categories(conn: &Connection, snapshot: &mut Snapshot) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT community_id, category, display_name, mode_key, mode_target, participant_role_id, thread_cleanup_secs
         FROM categories ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (cid, key, name, mode_key, target, role, cleanup) in rows {
        let Some(mode) = Mode::from_parts(&mode_key, target) else {
            warn!("Skipping category {} with unknown mode '{}'", key, mode_key);
            continue;
        };
        community_entry(snapshot, cid).categories.push(CategoryConfig {
            key: CategoryKey::new(&key),
            name,
            mode,
            participant_role: role.map(|r| RoleId(from_sql_id(r))),
            thread_cleanup_secs: cleanup.max(0) as u64,
        });
    }
    Ok(())
}

fn load_players(conn: &Connection, table: &str, snapshot: &mut Snapshot) -> Result<()> {
    let table = roster_table(table)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT community_id, category, user_id, rating, wins, losses FROM {} ORDER BY rowid",
        table
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                PlayerRecord {
                    rating: row.get(3)?,
                    wins: row.get(4)?,
                    losses: row.get(5)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (cid, category, user, record) in rows {
        let roster = community_entry(snapshot, cid)
            .rosters
            .entry(CategoryKey::new(&category))
            .or_default();
        let pool = if table == "players" {
            &mut roster.active
        } else {
            &mut roster.removed
        };
        pool.push((PlayerId(from_sql_id(user)), record));
    }
    Ok(())
}

fn load_bios(conn: &Connection, snapshot: &mut Snapshot) -> Result<()> {
    let mut stmt = conn.prepare("SELECT community_id, scope, user_id, bio FROM bios")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (cid, scope, user, bio) in rows {
        community_entry(snapshot, cid)
            .bios
            .entry(scope)
            .or_default()
            .insert(PlayerId(from_sql_id(user)), bio);
    }
    Ok(())
}

fn load_meta(conn: &Connection, snapshot: &mut Snapshot) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT community_id, user_id, display_name, avatar_url FROM player_meta")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                PlayerMeta {
                    name: row.get(2)?,
                    avatar: row.get(3)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (cid, user, meta) in rows {
        community_entry(snapshot, cid)
            .meta
            .insert(PlayerId(from_sql_id(user)), meta);
    }
    Ok(())
}

fn load_active(conn: &Connection, snapshot: &mut Snapshot) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT community_id, category, match_id, challenger_id, opponent_id, status, mode_key, mode_target, rank_range, thread_id, created_at, accepted_at, response_deadline
         FROM active_matches ORDER BY rowid",
    )?;
    let match_rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                ActiveMatchRow {
                    category: row.get(1)?,
                    match_id: row.get(2)?,
                    challenger_id: row.get(3)?,
                    opponent_id: row.get(4)?,
                    status: row.get(5)?,
                    mode_key: row.get(6)?,
                    mode_target: row.get(7)?,
                    rank_range: row.get(8)?,
                    thread_id: row.get(9)?,
                    created_at: row.get(10)?,
                    accepted_at: row.get(11)?,
                    response_deadline: row.get(12)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT community_id, category, match_id, user_id, kind, value, metric, submitted_at FROM active_match_submissions",
    )?;
    let sub_rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                SubmissionRow {
                    category: row.get(1)?,
                    match_id: row.get(2)?,
                    user_id: row.get(3)?,
                    kind: row.get(4)?,
                    value: row.get(5)?,
                    metric: row.get(6)?,
                    submitted_at: row.get(7)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT community_id, category, match_id, user_id FROM active_match_cancel_votes",
    )?;
    let vote_rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT community_id, category, thread_id, delete_at FROM scheduled_deletions ORDER BY rowid",
    )?;
    let deletion_rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // Build matches first, then attach children by (community, category, match id).
    let mut built: BTreeMap<(i64, String, String), Match> = BTreeMap::new();
    let mut order: Vec<(i64, String, String)> = Vec::new();
    for (cid, row) in match_rows {
        let key = (cid, row.category.clone(), row.match_id.clone());
        if let Some(m) = match_from_row(row) {
            order.push(key.clone());
            built.insert(key, m);
        }
    }

    for (cid, row) in sub_rows {
        let key = (cid, row.category.clone(), row.match_id.clone());
        let Some(m) = built.get_mut(&key) else {
            continue;
        };
        let Ok(kind) = ResultKind::from_str(&row.kind) else {
            warn!("Dropping submission with unknown kind '{}' on match {}", row.kind, row.match_id);
            continue;
        };
        let submitted_at = parse_time(&row.submitted_at).unwrap_or_else(Utc::now);
        m.submissions.insert(
            PlayerId(from_sql_id(row.user_id)),
            Submission {
                kind,
                value: row.value,
                metric: row.metric,
                submitted_at,
            },
        );
    }

    for (cid, category, match_id, user) in vote_rows {
        if let Some(m) = built.get_mut(&(cid, category, match_id)) {
            m.cancel_votes.insert(PlayerId(from_sql_id(user)));
        }
    }

    for key in order {
        if let Some(m) = built.remove(&key) {
            community_entry(snapshot, key.0)
                .active
                .entry(m.category.clone())
                .or_default()
                .matches
                .push(m);
        }
    }

    for (cid, category, thread, delete_at) in deletion_rows {
        let Some(delete_at) = parse_time(&delete_at) else {
            warn!("Dropping scheduled deletion for thread {} with bad timestamp", thread);
            continue;
        };
        community_entry(snapshot, cid)
            .active
            .entry(CategoryKey::new(&category))
            .or_default()
            .deletions
            .push(ScheduledDeletion {
                thread: ThreadId(from_sql_id(thread)),
                delete_at,
            });
    }
    Ok(())
}

/// Terminal or unparseable rows never make it back into the registry.
fn match_from_row(row: ActiveMatchRow) -> Option<Match> {
    let status = match MatchStatus::from_str(&row.status) {
        Ok(s) if !s.is_terminal() => s,
        Ok(s) => {
            warn!("Dropping match {} stored with terminal status {}", row.match_id, s);
            return None;
        }
        Err(e) => {
            warn!("Dropping match {}: {}", row.match_id, e);
            return None;
        }
    };
    let Some(mode) = Mode::from_parts(&row.mode_key, row.mode_target) else {
        warn!("Dropping match {} with unknown mode '{}'", row.match_id, row.mode_key);
        return None;
    };
    let Ok(id) = Uuid::parse_str(&row.match_id) else {
        warn!("Dropping match with malformed id '{}'", row.match_id);
        return None;
    };

    Some(Match {
        id,
        category: CategoryKey::new(&row.category),
        challenger: PlayerId(from_sql_id(row.challenger_id)),
        opponent: row.opponent_id.map(|p| PlayerId(from_sql_id(p))),
        status,
        mode,
        submissions: BTreeMap::new(),
        cancel_votes: Default::default(),
        rank_range: row.rank_range.map(|r| r.clamp(0, u32::MAX as i64) as u32),
        created_at: parse_time(&row.created_at).unwrap_or_else(Utc::now),
        accepted_at: row.accepted_at.as_deref().and_then(parse_time),
        response_deadline: row.response_deadline.as_deref().and_then(parse_time),
        thread: row.thread_id.map(|t| ThreadId(from_sql_id(t))),
        result: None,
    })
}

fn query_roster(
    conn: &Connection,
    table: &str,
    community: CommunityId,
    category: &CategoryKey,
) -> Result<Vec<(PlayerId, PlayerRecord)>> {
    let table = roster_table(table)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT user_id, rating, wins, losses FROM {} WHERE community_id = ?1 AND category = ?2 ORDER BY rowid",
        table
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![to_sql_id(community.0), category.as_str()],
            |row| {
                Ok((
                    PlayerId(from_sql_id(row.get(0)?)),
                    PlayerRecord {
                        rating: row.get(1)?,
                        wins: row.get(2)?,
                        losses: row.get(3)?,
                    },
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_history(
    conn: &Connection,
    community: CommunityId,
    category: Option<&CategoryKey>,
) -> Result<Vec<HistoryRecordRow>> {
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<HistoryRecordRow> {
        Ok(HistoryRecordRow {
            category: row.get(0)?,
            user_id: row.get(1)?,
            opponent_id: row.get(2)?,
            recorded_at: row.get(3)?,
            challenger: row.get(4)?,
            user_value: row.get(5)?,
            opponent_value: row.get(6)?,
            result: row.get(7)?,
            rating_change: row.get(8)?,
        })
    };
    let columns = "category, user_id, opponent_id, recorded_at, challenger, user_value, opponent_value, result, rating_change";

    let rows = match category {
        Some(category) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM match_history WHERE community_id = ?1 AND category = ?2 ORDER BY id",
                columns
            ))?;
            stmt.query_map(
                rusqlite::params![to_sql_id(community.0), category.as_str()],
                map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM match_history WHERE community_id = ?1 ORDER BY id",
                columns
            ))?;
            stmt.query_map([to_sql_id(community.0)], map_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(rows)
}

fn history_from_row(row: HistoryRecordRow) -> Option<HistoryRow> {
    let Ok(outcome) = HistoryOutcome::from_str(&row.result) else {
        warn!("Skipping history row with unknown result '{}'", row.result);
        return None;
    };
    Some(HistoryRow {
        category: CategoryKey::new(&row.category),
        player: PlayerId(from_sql_id(row.user_id)),
        opponent: PlayerId(from_sql_id(row.opponent_id)),
        recorded_at: parse_time(&row.recorded_at)?,
        was_challenger: row.challenger,
        player_value: row.user_value,
        opponent_value: row.opponent_value,
        outcome,
        rating_change: row.rating_change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cid() -> CommunityId {
        CommunityId(42)
    }

    #[test]
    fn roster_roundtrip_keeps_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let key = CategoryKey::new("any%");
        let records = vec![
            (PlayerId(9), PlayerRecord::fresh(800.0)),
            (PlayerId(3), PlayerRecord::fresh(800.0)),
            (PlayerId(u64::MAX), PlayerRecord { rating: 812.5, wins: 2, losses: 1 }),
        ];
        db.save_players("players", cid(), &key, &records).unwrap();
        db.save_players("removed_players", cid(), &key, &[(PlayerId(5), PlayerRecord::fresh(770.0))])
            .unwrap();

        let roster = db.load_roster(cid(), &key).unwrap();
        assert_eq!(roster.active, records);
        assert_eq!(roster.removed, vec![(PlayerId(5), PlayerRecord::fresh(770.0))]);
    }

    #[test]
    fn scope_save_replaces_previous_rows() {
        let db = Database::open_in_memory().unwrap();
        let key = CategoryKey::new("any%");
        db.save_players("players", cid(), &key, &[(PlayerId(1), PlayerRecord::default())])
            .unwrap();
        db.save_players("players", cid(), &key, &[(PlayerId(2), PlayerRecord::default())])
            .unwrap();
        // Same input twice is a no-op.
        db.save_players("players", cid(), &key, &[(PlayerId(2), PlayerRecord::default())])
            .unwrap();

        let roster = db.load_roster(cid(), &key).unwrap();
        assert_eq!(roster.active, vec![(PlayerId(2), PlayerRecord::default())]);
    }

    #[test]
    fn unknown_roster_table_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db.save_players("bios", cid(), &CategoryKey::new("x"), &[]);
        assert!(err.is_err());
    }

    #[test]
    fn active_registry_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let key = CategoryKey::new("Glitchless");
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut awaiting = Match::new(key.clone(), PlayerId(1), Mode::score(3), now);
        awaiting.opponent = Some(PlayerId(2));
        awaiting.status = MatchStatus::PendingCancel;
        awaiting.accepted_at = Some(now);
        awaiting.thread = Some(ThreadId(77));
        awaiting.cancel_votes.insert(PlayerId(2));
        awaiting.submissions.insert(
            PlayerId(1),
            Submission {
                kind: ResultKind::Win,
                value: "3".into(),
                metric: 3.0,
                submitted_at: now,
            },
        );

        let mut pending = Match::new(key.clone(), PlayerId(3), Mode::score(3), now);
        pending.opponent = Some(PlayerId(4));
        pending.status = MatchStatus::Pending;
        pending.response_deadline = Some(now + Duration::hours(6));

        let mut open = Match::new(key.clone(), PlayerId(5), Mode::score(3), now);
        open.rank_range = Some(3);

        let bucket = ActiveBucket {
            matches: vec![awaiting.clone(), pending.clone(), open.clone()],
            deletions: vec![ScheduledDeletion {
                thread: ThreadId(12),
                delete_at: now + Duration::seconds(21_600),
            }],
        };
        let registry = BTreeMap::from([(key.clone(), bucket.clone())]);
        db.save_active_matches(cid(), &registry).unwrap();

        let snapshot = db.load_all().unwrap();
        let loaded = &snapshot.communities[&cid()].active[&key];
        assert_eq!(loaded, &bucket);

        // Emptying the registry clears every child table too.
        db.save_active_matches(cid(), &BTreeMap::new()).unwrap();
        let snapshot = db.load_all().unwrap();
        assert!(
            snapshot
                .communities
                .get(&cid())
                .map(|c| c.active.is_empty())
                .unwrap_or(true)
        );
    }

    #[test]
    fn terminal_rows_are_not_restored() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO active_matches (community_id, category, match_id, challenger_id, status, mode_key, created_at)
                 VALUES (42, 'any%', ?1, 1, 'completed', 'speedrun', '2026-03-01T12:00:00+00:00')",
                [Uuid::new_v4().to_string()],
            )?;
            conn.execute(
                "INSERT INTO active_matches (community_id, category, match_id, challenger_id, status, mode_key, created_at)
                 VALUES (42, 'any%', ?1, 1, 'open', 'bingo', '2026-03-01T12:00:00+00:00')",
                [Uuid::new_v4().to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let snapshot = db.load_all().unwrap();
        let empty = snapshot
            .communities
            .get(&cid())
            .map(|c| c.active.values().all(|b| b.matches.is_empty()))
            .unwrap_or(true);
        assert!(empty);
    }

    #[test]
    fn history_appends_and_filters_by_category() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let row = |category: &str, player: u64, outcome: HistoryOutcome, change: f64| HistoryRow {
            category: CategoryKey::new(category),
            player: PlayerId(player),
            opponent: PlayerId(if player == 1 { 2 } else { 1 }),
            recorded_at: now,
            was_challenger: player == 1,
            player_value: "1:00.000".into(),
            opponent_value: "1:02.000".into(),
            outcome,
            rating_change: change,
        };

        db.append_history_rows(
            cid(),
            &[
                row("any%", 1, HistoryOutcome::Win, 7.0),
                row("any%", 2, HistoryOutcome::Loss, -7.0),
            ],
        )
        .unwrap();
        db.append_history_rows(cid(), &[row("100%", 1, HistoryOutcome::Win, 12.0)])
            .unwrap();

        let all = db.load_history(cid(), None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].outcome, HistoryOutcome::Win);
        assert_eq!(all[1].rating_change, -7.0);

        let scoped = db.load_history(cid(), Some(&CategoryKey::new("100%"))).unwrap();
        assert_eq!(scoped.len(), 1);
        assert!(db.load_history(CommunityId(1), None).unwrap().is_empty());
    }

    #[test]
    fn categories_bios_and_meta_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = CategoryConfig::new("Best Of", Mode::score(5));
        cfg.participant_role = Some(RoleId(11));
        cfg.thread_cleanup_secs = 60;
        db.save_categories(cid(), std::slice::from_ref(&cfg)).unwrap();
        db.save_bios(
            cid(),
            ladder_types::GLOBAL_BIO_SCOPE,
            &BTreeMap::from([(PlayerId(1), "speedy".to_string())]),
        )
        .unwrap();
        db.save_meta(
            cid(),
            &BTreeMap::from([(
                PlayerId(1),
                PlayerMeta {
                    name: Some("Runner".into()),
                    avatar: None,
                },
            )]),
        )
        .unwrap();

        let snapshot = db.load_all().unwrap();
        let community = &snapshot.communities[&cid()];
        assert_eq!(community.categories, vec![cfg]);
        assert_eq!(
            community.bios[ladder_types::GLOBAL_BIO_SCOPE][&PlayerId(1)],
            "speedy"
        );
        assert_eq!(community.meta[&PlayerId(1)].name.as_deref(), Some("Runner"));
    }
}
