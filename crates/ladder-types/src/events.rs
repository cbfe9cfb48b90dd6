use serde::{Deserialize, Serialize};

use crate::models::{
    CategoryKey, CommunityId, Match, MatchId, MatchResult, PlayerId, PlayerRecord, ThreadId,
};

/// Why a match left the active registry without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The challenger pulled an open queue, or a side backed out of a pending challenge.
    Withdrawn,
    /// Every participant voted to cancel.
    Mutual,
    /// The targeted opponent never answered.
    Expired,
    /// A moderator removed it.
    Moderator,
    /// The challenger started a new action while the queue was still open.
    Superseded,
    /// The category itself was removed.
    CategoryRemoved,
}

/// Events emitted by the engine for the presentation layer to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Notification {
    /// A new challenge entered the registry
    ChallengeOpened { community: CommunityId, matchup: Match },

    /// An opponent took the challenge
    ChallengeAccepted { community: CommunityId, matchup: Match },

    /// One side reported and the other has not yet
    ResultSubmitted {
        community: CommunityId,
        match_id: MatchId,
        player: PlayerId,
    },

    /// Both sides claimed the same outcome
    MatchDisputed { community: CommunityId, matchup: Match },

    /// A participant asked to cancel and the other has not agreed yet
    CancelRequested {
        community: CommunityId,
        match_id: MatchId,
        player: PlayerId,
    },

    MatchCancelled {
        community: CommunityId,
        category: CategoryKey,
        match_id: MatchId,
        reason: CancelReason,
    },

    /// Ratings were applied and history recorded
    MatchCompleted {
        community: CommunityId,
        category: CategoryKey,
        match_id: MatchId,
        result: MatchResult,
        winner_rank: Option<usize>,
        loser_rank: Option<usize>,
    },

    /// A player left or rejoined a category's active roster
    RosterChanged {
        community: CommunityId,
        category: CategoryKey,
        player: PlayerId,
        active: bool,
    },

    /// A moderator set a player's rating or record by hand
    StatsEdited {
        community: CommunityId,
        category: CategoryKey,
        player: PlayerId,
        record: PlayerRecord,
    },

    CategoryRenamed {
        community: CommunityId,
        from: CategoryKey,
        to: CategoryKey,
    },

    /// A thread reached its cleanup time
    ThreadCleanupDue { community: CommunityId, thread: ThreadId },
}

impl Notification {
    pub fn community(&self) -> CommunityId {
        match self {
            Self::ChallengeOpened { community, .. }
            | Self::ChallengeAccepted { community, .. }
            | Self::ResultSubmitted { community, .. }
            | Self::MatchDisputed { community, .. }
            | Self::CancelRequested { community, .. }
            | Self::MatchCancelled { community, .. }
            | Self::MatchCompleted { community, .. }
            | Self::RosterChanged { community, .. }
            | Self::StatsEdited { community, .. }
            | Self::CategoryRenamed { community, .. }
            | Self::ThreadCleanupDue { community, .. } => *community,
        }
    }
}
