use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rating handed to a record the first time a player shows up on a roster.
pub const DEFAULT_START_RATING: f64 = 800.0;

/// Bio scope shared by every category of a community.
pub const GLOBAL_BIO_SCOPE: &str = "__global";

/// Seconds a finished match's thread lingers before cleanup.
pub const DEFAULT_THREAD_CLEANUP_SECS: u64 = 21_600;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake_id!(
    /// Tenant scope. Nothing is shared between communities.
    CommunityId
);
snowflake_id!(PlayerId);
snowflake_id!(RoleId);
snowflake_id!(
    /// Opaque handle to an external discussion thread attached to a match.
    ThreadId
);

pub type MatchId = Uuid;

// -- Categories --

/// Normalized category name: spaces become underscores, everything lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CategoryKey(String);

impl CategoryKey {
    pub fn new(name: &str) -> Self {
        Self(name.trim().replace(' ', "_").to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Title-cased display form used when no display name was stored.
    pub fn display_name(&self) -> String {
        self.0
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<String> for CategoryKey {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for CategoryKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<CategoryKey> for String {
    fn from(value: CategoryKey) -> Self {
        value.0
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a category decides its winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "key", rename_all = "snake_case")]
pub enum Mode {
    /// Lower time wins.
    #[default]
    Speedrun,
    /// First to `target` wins.
    Score { target: u32 },
}

impl Mode {
    pub fn score(target: u32) -> Self {
        Self::Score {
            target: target.max(1),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Speedrun => "speedrun",
            Self::Score { .. } => "score",
        }
    }

    pub fn target(&self) -> Option<u32> {
        match self {
            Self::Speedrun => None,
            Self::Score { target } => Some(*target),
        }
    }

    /// Rebuild from stored columns. Unknown keys yield `None`.
    pub fn from_parts(key: &str, target: Option<i64>) -> Option<Self> {
        match key {
            "speedrun" | "time" => Some(Self::Speedrun),
            "score" => {
                let target = target.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
                Some(Self::score(target))
            }
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Speedrun => "Speedrun".to_string(),
            Self::Score { target } => format!("First to {}", target),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    /// Accepts `speedrun`, `score` and the `ftN` shorthand.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        if let Some(rest) = lowered.strip_prefix("ft") {
            let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
            let target = digits.parse::<u32>().unwrap_or(1);
            return Ok(Self::score(target));
        }
        Self::from_parts(&lowered, None).ok_or_else(|| format!("unknown mode '{}'", s))
    }
}

/// Per-community category configuration. Role and cleanup references are
/// opaque to the engine; the presentation layer owns their meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub key: CategoryKey,
    pub name: String,
    pub mode: Mode,
    pub participant_role: Option<RoleId>,
    pub thread_cleanup_secs: u64,
}

impl CategoryConfig {
    pub fn new(name: &str, mode: Mode) -> Self {
        Self {
            key: CategoryKey::new(name),
            name: name.trim().to_string(),
            mode,
            participant_role: None,
            thread_cleanup_secs: DEFAULT_THREAD_CLEANUP_SECS,
        }
    }

    /// Everyone is eligible unless a participant role is configured.
    pub fn admits(&self, roles: &BTreeSet<RoleId>) -> bool {
        match self.participant_role {
            Some(role) => roles.contains(&role),
            None => true,
        }
    }
}

// -- Players --

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub rating: f64,
    pub wins: u32,
    pub losses: u32,
}

impl PlayerRecord {
    pub fn fresh(rating: f64) -> Self {
        Self {
            rating,
            wins: 0,
            losses: 0,
        }
    }

    pub fn matches_played(&self) -> u32 {
        self.wins + self.losses
    }
}

impl Default for PlayerRecord {
    fn default() -> Self {
        Self::fresh(DEFAULT_START_RATING)
    }
}

/// Last known display snapshot of a player, kept for rendering history
/// rows of players who have since left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMeta {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// The caller of an operation as described by the presentation layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actor {
    pub id: PlayerId,
    #[serde(default)]
    pub roles: BTreeSet<RoleId>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

impl Actor {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn as_moderator(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn meta(&self) -> Option<PlayerMeta> {
        if self.display_name.is_none() && self.avatar.is_none() {
            return None;
        }
        Some(PlayerMeta {
            name: self.display_name.clone(),
            avatar: self.avatar.clone(),
        })
    }
}

// -- Matches --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Open,
    Pending,
    AwaitingResult,
    Disputed,
    PendingCancel,
    Completed,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::AwaitingResult => "awaiting_result",
            Self::Disputed => "disputed",
            Self::PendingCancel => "pending_cancel",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "open" => Self::Open,
            "pending" => Self::Pending,
            "awaiting_result" => Self::AwaitingResult,
            "disputed" => Self::Disputed,
            "pending_cancel" => Self::PendingCancel,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            other => return Err(format!("unknown match status '{}'", other)),
        })
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Win,
    Loss,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
        }
    }
}

impl FromStr for ResultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(Self::Win),
            "loss" => Ok(Self::Loss),
            other => Err(format!("unknown result kind '{}'", other)),
        }
    }
}

/// A participant's self-reported outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub kind: ResultKind,
    /// Normalized display form of the submitted value.
    pub value: String,
    pub metric: f64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner: PlayerId,
    pub loser: PlayerId,
    pub winner_value: String,
    pub loser_value: String,
    pub delta_winner: f64,
    pub delta_loser: f64,
    pub winner_old_rating: f64,
    pub loser_old_rating: f64,
    pub winner_new_rating: f64,
    pub loser_new_rating: f64,
    pub notes: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub category: CategoryKey,
    pub challenger: PlayerId,
    pub opponent: Option<PlayerId>,
    pub status: MatchStatus,
    /// Mode captured at issuance; later category edits do not affect it.
    pub mode: Mode,
    #[serde(default)]
    pub submissions: BTreeMap<PlayerId, Submission>,
    #[serde(default)]
    pub cancel_votes: BTreeSet<PlayerId>,
    pub rank_range: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub response_deadline: Option<DateTime<Utc>>,
    pub thread: Option<ThreadId>,
    pub result: Option<MatchResult>,
}

impl Match {
    pub fn new(category: CategoryKey, challenger: PlayerId, mode: Mode, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            challenger,
            opponent: None,
            status: MatchStatus::Open,
            mode,
            submissions: BTreeMap::new(),
            cancel_votes: BTreeSet::new(),
            rank_range: None,
            created_at: now,
            accepted_at: None,
            response_deadline: None,
            thread: None,
            result: None,
        }
    }

    pub fn participants(&self) -> Vec<PlayerId> {
        std::iter::once(self.challenger).chain(self.opponent).collect()
    }

    pub fn involves(&self, player: PlayerId) -> bool {
        self.challenger == player || self.opponent == Some(player)
    }

    /// True for the player's own open queue that nobody has taken yet.
    pub fn is_unmatched_queue_of(&self, player: PlayerId) -> bool {
        self.status == MatchStatus::Open && self.opponent.is_none() && self.challenger == player
    }

    pub fn other_participant(&self, player: PlayerId) -> Option<PlayerId> {
        if self.challenger == player {
            self.opponent
        } else if self.opponent == Some(player) {
            Some(self.challenger)
        } else {
            None
        }
    }
}

/// A thread cleanup the sweeper owes the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledDeletion {
    pub thread: ThreadId,
    pub delete_at: DateTime<Utc>,
}

// -- History --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOutcome {
    Win,
    Loss,
}

impl HistoryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "Win",
            Self::Loss => "Loss",
        }
    }
}

impl FromStr for HistoryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Win" | "DeclineWin" => Ok(Self::Win),
            "Loss" => Ok(Self::Loss),
            other => Err(format!("unknown history outcome '{}'", other)),
        }
    }
}

/// One participant's immutable view of a completed match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub category: CategoryKey,
    pub player: PlayerId,
    pub opponent: PlayerId,
    pub recorded_at: DateTime<Utc>,
    pub was_challenger: bool,
    pub player_value: String,
    pub opponent_value: String,
    pub outcome: HistoryOutcome,
    pub rating_change: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_key_normalizes() {
        let key = CategoryKey::new("Any Percent ");
        assert_eq!(key.as_str(), "any_percent");
        assert_eq!(key.display_name(), "Any Percent");
    }

    #[test]
    fn mode_parses_shorthand() {
        assert_eq!("ft5".parse::<Mode>().unwrap(), Mode::Score { target: 5 });
        assert_eq!("FT0".parse::<Mode>().unwrap(), Mode::Score { target: 1 });
        assert_eq!("speedrun".parse::<Mode>().unwrap(), Mode::Speedrun);
        assert_eq!("score".parse::<Mode>().unwrap(), Mode::Score { target: 1 });
        assert!("bingo".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_serializes_tagged() {
        let json = serde_json::to_value(Mode::score(3)).unwrap();
        assert_eq!(json, serde_json::json!({"key": "score", "target": 3}));
        let back: Mode = serde_json::from_value(serde_json::json!({"key": "speedrun"})).unwrap();
        assert_eq!(back, Mode::Speedrun);
    }

    #[test]
    fn participant_role_gates_admission() {
        let mut cfg = CategoryConfig::new("Any Percent", Mode::Speedrun);
        assert!(cfg.admits(&BTreeSet::new()));
        cfg.participant_role = Some(RoleId(7));
        assert!(!cfg.admits(&BTreeSet::new()));
        assert!(cfg.admits(&BTreeSet::from([RoleId(7)])));
    }

    #[test]
    fn match_submissions_roundtrip_through_json() {
        let now = Utc::now();
        let mut m = Match::new(CategoryKey::new("glitchless"), PlayerId(1), Mode::Speedrun, now);
        m.opponent = Some(PlayerId(2));
        m.submissions.insert(
            PlayerId(2),
            Submission {
                kind: ResultKind::Loss,
                value: "1:02.000".into(),
                metric: 62.0,
                submitted_at: now,
            },
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Match = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
