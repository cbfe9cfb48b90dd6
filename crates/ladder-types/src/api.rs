use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Actor, CategoryKey, HistoryOutcome, Match, MatchId, MatchResult, MatchStatus, Mode,
    PlayerId, PlayerRecord, ResultKind, RoleId, ThreadId,
};

// -- Operation results --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub match_id: MatchId,
    pub category: CategoryKey,
    pub result: MatchResult,
    pub winner_rank: Option<usize>,
    pub loser_rank: Option<usize>,
}

/// What a lifecycle operation did to its match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum Outcome {
    Accepted(Match),
    /// Submission stored; the other side has not reported yet.
    AwaitingOpponent(Match),
    Disputed(Match),
    CancelRequested(Match),
    Cancelled(Match),
    Completed(Completion),
}

impl Outcome {
    pub fn status(&self) -> MatchStatus {
        match self {
            Self::Accepted(m) | Self::AwaitingOpponent(m) => m.status,
            Self::Disputed(_) => MatchStatus::Disputed,
            Self::CancelRequested(_) => MatchStatus::PendingCancel,
            Self::Cancelled(_) => MatchStatus::Cancelled,
            Self::Completed(_) => MatchStatus::Completed,
        }
    }
}

// -- Projections --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: usize,
    pub player: PlayerId,
    pub record: PlayerRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub category: CategoryKey,
    pub player: PlayerId,
    pub opponent: PlayerId,
    pub outcome: HistoryOutcome,
    pub player_value: String,
    pub opponent_value: String,
    pub rating_change: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub player: PlayerId,
    pub category: CategoryKey,
    pub mode: Mode,
    pub record: PlayerRecord,
    pub rank: Option<usize>,
    pub matches_played: u32,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub latest_delta: Option<f64>,
    pub history: Vec<HistoryEntry>,
}

// -- Requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigureCategoryRequest {
    pub name: String,
    pub mode: Option<String>,
    pub participant_role: Option<RoleId>,
    pub thread_cleanup_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenChallengeRequest {
    pub actor: Actor,
    pub rank_range: Option<u32>,
    #[serde(default)]
    pub auto_match: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetedChallengeRequest {
    pub actor: Actor,
    pub opponent: Actor,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchActionRequest {
    pub actor: Actor,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitResultRequest {
    pub actor: Actor,
    pub kind: ResultKind,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideRequest {
    pub actor: Actor,
    pub winner: PlayerId,
    pub loser: PlayerId,
    pub winner_value: String,
    pub loser_value: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelBetweenRequest {
    pub actor: Actor,
    pub first: PlayerId,
    pub second: PlayerId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterMoveRequest {
    pub actor: Actor,
    pub player: PlayerId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditStatsRequest {
    pub actor: Actor,
    pub player: PlayerId,
    pub rating: Option<f64>,
    pub wins: Option<u32>,
    pub losses: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameCategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeThreadsRequest {
    pub actor: Actor,
    pub category: Option<CategoryKey>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeThreadsResponse {
    /// Thread cleanups now due on the next sweep.
    pub queued: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSyncRequest {
    pub player: PlayerId,
    #[serde(default)]
    pub removed_roles: Vec<RoleId>,
    #[serde(default)]
    pub added_roles: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetBioRequest {
    pub actor: Actor,
    pub bio: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachThreadRequest {
    pub thread: ThreadId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
