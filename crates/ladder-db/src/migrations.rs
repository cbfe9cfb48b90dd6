use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Ladder DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE categories (
                community_id        INTEGER NOT NULL,
                category            TEXT NOT NULL,
                display_name        TEXT NOT NULL,
                mode_key            TEXT NOT NULL,
                mode_target         INTEGER,
                participant_role_id INTEGER,
                thread_cleanup_secs INTEGER NOT NULL DEFAULT 21600,
                PRIMARY KEY (community_id, category)
            );

            CREATE TABLE players (
                community_id INTEGER NOT NULL,
                category     TEXT NOT NULL,
                user_id      INTEGER NOT NULL,
                rating       REAL NOT NULL,
                wins         INTEGER NOT NULL,
                losses       INTEGER NOT NULL,
                PRIMARY KEY (community_id, category, user_id)
            );

            CREATE TABLE removed_players (
                community_id INTEGER NOT NULL,
                category     TEXT NOT NULL,
                user_id      INTEGER NOT NULL,
                rating       REAL NOT NULL,
                wins         INTEGER NOT NULL,
                losses       INTEGER NOT NULL,
                PRIMARY KEY (community_id, category, user_id)
            );

            CREATE TABLE bios (
                community_id INTEGER NOT NULL,
                scope        TEXT NOT NULL,
                user_id      INTEGER NOT NULL,
                bio          TEXT NOT NULL,
                PRIMARY KEY (community_id, scope, user_id)
            );

            CREATE TABLE player_meta (
                community_id INTEGER NOT NULL,
                user_id      INTEGER NOT NULL,
                display_name TEXT,
                avatar_url   TEXT,
                PRIMARY KEY (community_id, user_id)
            );

            CREATE TABLE match_history (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                community_id   INTEGER NOT NULL,
                category       TEXT NOT NULL,
                user_id        INTEGER NOT NULL,
                opponent_id    INTEGER NOT NULL,
                recorded_at    TEXT NOT NULL,
                challenger     INTEGER NOT NULL,
                user_value     TEXT NOT NULL,
                opponent_value TEXT NOT NULL,
                result         TEXT NOT NULL,
                rating_change  REAL NOT NULL
            );

            CREATE INDEX idx_history_lookup
                ON match_history(community_id, category, user_id);

            CREATE TABLE active_matches (
                community_id      INTEGER NOT NULL,
                category          TEXT NOT NULL,
                match_id          TEXT NOT NULL,
                challenger_id     INTEGER NOT NULL,
                opponent_id       INTEGER,
                status            TEXT NOT NULL,
                mode_key          TEXT NOT NULL,
                mode_target       INTEGER,
                rank_range        INTEGER,
                thread_id         INTEGER,
                created_at        TEXT NOT NULL,
                accepted_at       TEXT,
                response_deadline TEXT,
                PRIMARY KEY (community_id, category, match_id)
            );

            CREATE TABLE active_match_submissions (
                community_id INTEGER NOT NULL,
                category     TEXT NOT NULL,
                match_id     TEXT NOT NULL,
                user_id      INTEGER NOT NULL,
                kind         TEXT NOT NULL,
                value        TEXT NOT NULL,
                metric       REAL NOT NULL,
                submitted_at TEXT NOT NULL,
                PRIMARY KEY (community_id, category, match_id, user_id)
            );

            CREATE TABLE active_match_cancel_votes (
                community_id INTEGER NOT NULL,
                category     TEXT NOT NULL,
                match_id     TEXT NOT NULL,
                user_id      INTEGER NOT NULL,
                PRIMARY KEY (community_id, category, match_id, user_id)
            );

            CREATE TABLE scheduled_deletions (
                community_id INTEGER NOT NULL,
                category     TEXT NOT NULL,
                thread_id    INTEGER NOT NULL,
                delete_at    TEXT NOT NULL,
                PRIMARY KEY (community_id, category, thread_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
