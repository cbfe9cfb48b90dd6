//! Database row types. These map directly to SQLite rows; conversion into
//! the domain model happens in `queries`, where malformed rows are dropped.

pub struct ActiveMatchRow {
    pub category: String,
    pub match_id: String,
    pub challenger_id: i64,
    pub opponent_id: Option<i64>,
    pub status: String,
    pub mode_key: String,
    pub mode_target: Option<i64>,
    pub rank_range: Option<i64>,
    pub thread_id: Option<i64>,
    pub created_at: String,
    pub accepted_at: Option<String>,
    pub response_deadline: Option<String>,
}

pub struct SubmissionRow {
    pub category: String,
    pub match_id: String,
    pub user_id: i64,
    pub kind: String,
    pub value: String,
    pub metric: f64,
    pub submitted_at: String,
}

pub struct HistoryRecordRow {
    pub category: String,
    pub user_id: i64,
    pub opponent_id: i64,
    pub recorded_at: String,
    pub challenger: bool,
    pub user_value: String,
    pub opponent_value: String,
    pub result: String,
    pub rating_change: f64,
}
