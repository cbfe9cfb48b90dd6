//! The match state machine: issuing, accepting, declining, cancelling,
//! reporting and overriding.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::info;

use ladder_types::api::{Completion, Outcome};
use ladder_types::events::{CancelReason, Notification};
use ladder_types::{
    Actor, CategoryConfig, CategoryKey, CommunityId, HistoryOutcome, HistoryRow, Match, MatchId,
    MatchResult, MatchStatus, Mode, PlayerId, ResultKind, Submission, ThreadId,
};

use crate::community::Community;
use crate::engine::{Engine, category_config, require_moderator};
use crate::error::{LadderError, Result};
use crate::persist::SaveScope;
use crate::rating;
use crate::values::{self, ReportedValue};

fn ensure_participant_role(cfg: &CategoryConfig, actor: &Actor, msg: &str) -> Result<()> {
    if cfg.admits(&actor.roles) {
        Ok(())
    } else {
        Err(LadderError::permission(msg))
    }
}

fn ensure_not_removed(c: &Community, category: &CategoryKey, player: PlayerId) -> Result<()> {
    if c.roster(category).is_some_and(|r| r.is_removed(player)) {
        Err(LadderError::permission("That player has been removed from this leaderboard."))
    } else {
        Ok(())
    }
}

/// Enforce one live match per player. The player's own unmatched open
/// queue does not block; it is returned so the caller can withdraw it
/// once every other check has passed.
fn busy_check(
    c: &Community,
    player: PlayerId,
    exclude: Option<MatchId>,
) -> Result<Option<(CategoryKey, MatchId)>> {
    match c.active_match_of(player, exclude) {
        None => Ok(None),
        Some(m) if m.is_unmatched_queue_of(player) => Ok(Some((m.category.clone(), m.id))),
        Some(_) => Err(LadderError::conflict("You already have an active challenge.")),
    }
}

fn rank_of(c: &Community, category: &CategoryKey, player: PlayerId) -> Option<usize> {
    c.roster(category).and_then(|r| r.rank(player)).map(|(rank, _)| rank)
}

/// Both ranks must be known for a window to apply; unranked players pass.
fn within_window(a: Option<usize>, b: Option<usize>, range: Option<u32>) -> bool {
    match (a, b, range) {
        (Some(a), Some(b), Some(range)) => a.abs_diff(b) <= range as usize,
        _ => true,
    }
}

fn cleanup_delay(cfg: &CategoryConfig) -> ChronoDuration {
    ChronoDuration::seconds(cfg.thread_cleanup_secs.min(i64::MAX as u64) as i64)
}

/// Finish the live match `match_id` with the given result: take it out of
/// the registry, move rating between the pair and queue both history rows.
/// Nothing changes if the match is gone or names one player twice.
#[allow(clippy::too_many_arguments)]
fn complete(
    c: &mut Community,
    cfg: &CategoryConfig,
    match_id: MatchId,
    winner: PlayerId,
    loser: PlayerId,
    mut winner_value: ReportedValue,
    loser_value: ReportedValue,
    notes: Option<String>,
    default_rating: f64,
    now: DateTime<Utc>,
) -> Result<Completion> {
    let key = cfg.key.clone();
    let mut m = c
        .detach_match(&key, match_id)
        .ok_or_else(|| LadderError::not_found("Match not found or already closed."))?;

    // A losing report can never leave the winner short of the target.
    if let Mode::Score { target } = m.mode {
        if winner_value.metric < f64::from(target) {
            winner_value = ReportedValue {
                display: target.to_string(),
                metric: f64::from(target),
            };
        }
    }

    let roster = c.rosters.entry(key.clone()).or_default();
    let Some((w, l)) = roster.pair_mut(winner, loser, default_rating) else {
        c.registry.entry(key).or_default().matches.push(m);
        return Err(LadderError::validation(
            "Winner and loser must be different players.",
        ));
    };
    let delta = rating::compute_delta(
        m.mode,
        w.rating,
        l.rating,
        winner_value.metric,
        loser_value.metric,
    );
    let transfer = rating::apply(delta, w, l);
    let winner_rank = roster.rank(winner).map(|(r, _)| r);
    let loser_rank = roster.rank(loser).map(|(r, _)| r);

    for (player, opponent, own, theirs, outcome, change) in [
        (winner, loser, &winner_value, &loser_value, HistoryOutcome::Win, transfer.delta),
        (loser, winner, &loser_value, &winner_value, HistoryOutcome::Loss, -transfer.delta),
    ] {
        c.pending_history.push(HistoryRow {
            category: key.clone(),
            player,
            opponent,
            recorded_at: now,
            was_challenger: player == m.challenger,
            player_value: own.display.clone(),
            opponent_value: theirs.display.clone(),
            outcome,
            rating_change: change,
        });
    }

    let result = MatchResult {
        winner,
        loser,
        winner_value: winner_value.display,
        loser_value: loser_value.display,
        delta_winner: transfer.delta,
        delta_loser: -transfer.delta,
        winner_old_rating: transfer.winner_old,
        loser_old_rating: transfer.loser_old,
        winner_new_rating: transfer.winner_new,
        loser_new_rating: transfer.loser_new,
        notes,
        completed_at: now,
    };

    if let Some(thread) = m.thread {
        c.schedule_thread_deletion(&key, thread, now + cleanup_delay(cfg));
    }
    m.status = MatchStatus::Completed;
    m.submissions.clear();
    m.cancel_votes.clear();
    m.result = Some(result.clone());

    Ok(Completion {
        match_id: m.id,
        category: key,
        result,
        winner_rank,
        loser_rank,
    })
}

fn completion_scopes(category: &CategoryKey) -> [SaveScope; 4] {
    [
        SaveScope::Roster(category.clone()),
        SaveScope::Removed(category.clone()),
        SaveScope::History,
        SaveScope::ActiveMatches,
    ]
}

impl Engine {
    /// Take a match out of the registry as cancelled. Player-driven
    /// cancels clean their thread up straight away.
    fn withdraw(
        &self,
        c: &mut Community,
        category: &CategoryKey,
        match_id: MatchId,
        reason: CancelReason,
        thread_delete_at: DateTime<Utc>,
    ) -> Option<Match> {
        let mut m = c.detach_match(category, match_id)?;
        m.status = MatchStatus::Cancelled;
        if let Some(thread) = m.thread {
            c.schedule_thread_deletion(category, thread, thread_delete_at);
        }
        self.notify(Notification::MatchCancelled {
            community: c.id,
            category: category.clone(),
            match_id,
            reason,
        });
        Some(m)
    }

    fn finish(&self, community: CommunityId, completion: &Completion) {
        let r = &completion.result;
        info!(
            "Community {}: {} beat {} in {} ({} vs {}, {:+.1})",
            community,
            r.winner,
            r.loser,
            completion.category,
            r.winner_value,
            r.loser_value,
            r.delta_winner
        );
        self.notify(Notification::MatchCompleted {
            community,
            category: completion.category.clone(),
            match_id: completion.match_id,
            result: r.clone(),
            winner_rank: completion.winner_rank,
            loser_rank: completion.loser_rank,
        });
    }

    /// Post an open challenge, or with `auto_match` take the oldest open
    /// queue whose rank windows both players satisfy.
    pub async fn issue_open_challenge(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        rank_range: Option<u32>,
        auto_match: bool,
    ) -> Result<Match> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let cfg = category_config(&c, category)?;
        ensure_participant_role(&cfg, actor, "You need the participant role to issue challenges.")?;
        self.ensure_roster(&mut c, category).await?;
        ensure_not_removed(&c, category, actor.id)?;
        let superseded = busy_check(&c, actor.id, None)?;

        let now = Utc::now();
        let rank_range = rank_range.filter(|r| *r > 0);
        let mut scopes = vec![SaveScope::ActiveMatches];
        if Self::record_meta(&mut c, actor) {
            scopes.push(SaveScope::Meta);
        }
        if let Some((key, id)) = superseded {
            self.withdraw(&mut c, &key, id, CancelReason::Superseded, now);
        }

        let candidate = if auto_match {
            let own_rank = rank_of(&c, category, actor.id);
            c.registry.get(category).and_then(|bucket| {
                bucket
                    .matches
                    .iter()
                    .filter(|m| m.status == MatchStatus::Open && m.opponent.is_none())
                    .filter(|m| m.challenger != actor.id)
                    .find(|m| {
                        let theirs = rank_of(&c, category, m.challenger);
                        within_window(own_rank, theirs, m.rank_range)
                            && within_window(own_rank, theirs, rank_range)
                    })
                    .map(|m| m.id)
            })
        } else {
            None
        };

        let matchup = match candidate.and_then(|id| c.find_match_mut(category, id)) {
            Some(m) => {
                m.opponent = Some(actor.id);
                m.status = MatchStatus::AwaitingResult;
                m.accepted_at = Some(now);
                m.response_deadline = None;
                m.cancel_votes.clear();
                let m = m.clone();
                self.notify(Notification::ChallengeAccepted {
                    community,
                    matchup: m.clone(),
                });
                m
            }
            None => {
                let mut m = Match::new(category.clone(), actor.id, cfg.mode, now);
                m.rank_range = rank_range;
                c.registry
                    .entry(category.clone())
                    .or_default()
                    .matches
                    .push(m.clone());
                self.notify(Notification::ChallengeOpened {
                    community,
                    matchup: m.clone(),
                });
                m
            }
        };
        drop(c);

        self.persist(community, &state, scopes);
        Ok(matchup)
    }

    /// Challenge one specific opponent, who must answer before the
    /// response deadline.
    pub async fn issue_targeted_challenge(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        opponent: &Actor,
    ) -> Result<Match> {
        if actor.id == opponent.id {
            return Err(LadderError::validation("You cannot challenge yourself."));
        }
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let cfg = category_config(&c, category)?;
        ensure_participant_role(&cfg, actor, "You need the participant role to issue challenges.")?;
        ensure_participant_role(&cfg, opponent, "That player is not registered for this leaderboard.")?;
        self.ensure_roster(&mut c, category).await?;
        ensure_not_removed(&c, category, actor.id)?;
        ensure_not_removed(&c, category, opponent.id)?;
        let superseded = busy_check(&c, actor.id, None)?;
        if c.active_match_of(opponent.id, None).is_some() {
            return Err(LadderError::conflict("That player already has an active challenge."));
        }

        let now = Utc::now();
        let timeout = ChronoDuration::from_std(self.config.pending_timeout)
            .map_err(|e| LadderError::validation(format!("Bad response window: {}", e)))?;
        let mut scopes = vec![SaveScope::ActiveMatches];
        let actor_meta = Self::record_meta(&mut c, actor);
        let opponent_meta = Self::record_meta(&mut c, opponent);
        if actor_meta || opponent_meta {
            scopes.push(SaveScope::Meta);
        }
        if let Some((key, id)) = superseded {
            self.withdraw(&mut c, &key, id, CancelReason::Superseded, now);
        }

        let mut m = Match::new(category.clone(), actor.id, cfg.mode, now);
        m.opponent = Some(opponent.id);
        m.status = MatchStatus::Pending;
        m.response_deadline = Some(now + timeout);
        c.registry
            .entry(category.clone())
            .or_default()
            .matches
            .push(m.clone());
        drop(c);

        self.notify(Notification::ChallengeOpened {
            community,
            matchup: m.clone(),
        });
        self.persist(community, &state, scopes);
        Ok(m)
    }

    pub async fn accept_match(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        match_id: MatchId,
    ) -> Result<Outcome> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let cfg = category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;
        let m = c
            .find_match(category, match_id)
            .ok_or_else(|| LadderError::not_found("Match not found or already closed."))?;
        let now = Utc::now();

        match m.status {
            MatchStatus::Pending => {
                if m.opponent != Some(actor.id) {
                    return Err(LadderError::permission(
                        "This challenge is reserved for another player.",
                    ));
                }
                if m.response_deadline.is_some_and(|d| d <= now) {
                    return Err(LadderError::conflict("This challenge has expired."));
                }
            }
            MatchStatus::Open => {
                if m.challenger == actor.id {
                    return Err(LadderError::conflict("Waiting for another player to accept."));
                }
                let challenger_rank = rank_of(&c, category, m.challenger);
                let acceptor_rank = rank_of(&c, category, actor.id);
                if !within_window(challenger_rank, acceptor_rank, m.rank_range) {
                    return Err(LadderError::permission(format!(
                        "You must be within {} ranks of the challenger to accept.",
                        m.rank_range.unwrap_or_default()
                    )));
                }
            }
            _ => {
                return Err(LadderError::conflict(
                    "This match is no longer accepting players.",
                ));
            }
        }
        ensure_participant_role(&cfg, actor, "You need the participant role to accept challenges.")?;
        ensure_not_removed(&c, category, actor.id)?;
        let superseded = busy_check(&c, actor.id, Some(match_id))?;

        let mut scopes = vec![SaveScope::ActiveMatches];
        if Self::record_meta(&mut c, actor) {
            scopes.push(SaveScope::Meta);
        }
        if let Some((key, id)) = superseded {
            self.withdraw(&mut c, &key, id, CancelReason::Superseded, now);
        }
        let m = c
            .find_match_mut(category, match_id)
            .ok_or_else(|| LadderError::not_found("Match not found or already closed."))?;
        m.opponent = Some(actor.id);
        m.status = MatchStatus::AwaitingResult;
        m.accepted_at = Some(now);
        m.response_deadline = None;
        m.cancel_votes.clear();
        let m = m.clone();
        drop(c);

        self.notify(Notification::ChallengeAccepted {
            community,
            matchup: m.clone(),
        });
        self.persist(community, &state, scopes);
        Ok(Outcome::Accepted(m))
    }

    /// Turning down a targeted challenge forfeits it.
    pub async fn decline_match(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        match_id: MatchId,
    ) -> Result<Outcome> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let cfg = category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;
        let m = c
            .find_match(category, match_id)
            .ok_or_else(|| LadderError::not_found("Match not found or already closed."))?;
        if m.status != MatchStatus::Pending {
            return Err(LadderError::conflict("This challenge is not awaiting your response."));
        }
        if m.opponent != Some(actor.id) {
            return Err(LadderError::permission("Only the challenged player can decline."));
        }

        let (winner_value, loser_value) = values::forfeit_values(m.mode);
        let winner = m.challenger;
        let completion = complete(
            &mut c,
            &cfg,
            match_id,
            winner,
            actor.id,
            winner_value,
            loser_value,
            Some("Declined".to_string()),
            self.config.default_rating,
            Utc::now(),
        )?;
        drop(c);

        self.finish(community, &completion);
        self.persist(community, &state, completion_scopes(category));
        Ok(Outcome::Completed(completion))
    }

    /// Withdraw an open queue, back out of a pending challenge, or vote to
    /// cancel an accepted match.
    pub async fn cancel_match(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        match_id: MatchId,
    ) -> Result<Outcome> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        category_config(&c, category)?;
        let m = c
            .find_match(category, match_id)
            .ok_or_else(|| LadderError::not_found("Match not found or already closed."))?;
        if m.status.is_terminal() {
            return Err(LadderError::conflict("This match is no longer active."));
        }
        if !m.involves(actor.id) {
            return Err(LadderError::permission(
                "Only the players in this match can cancel it.",
            ));
        }

        let now = Utc::now();
        let immediate = m.opponent.is_none() || m.status == MatchStatus::Pending;
        if immediate {
            let Some(cancelled) = self.withdraw(&mut c, category, match_id, CancelReason::Withdrawn, now)
            else {
                return Err(LadderError::not_found("Match not found or already closed."));
            };
            drop(c);
            self.persist(community, &state, [SaveScope::ActiveMatches]);
            return Ok(Outcome::Cancelled(cancelled));
        }

        if m.cancel_votes.contains(&actor.id) {
            return Err(LadderError::conflict("You have already requested cancellation."));
        }
        let everyone = m
            .participants()
            .into_iter()
            .all(|p| p == actor.id || m.cancel_votes.contains(&p));

        let outcome = if everyone {
            match self.withdraw(&mut c, category, match_id, CancelReason::Mutual, now) {
                Some(cancelled) => Outcome::Cancelled(cancelled),
                None => return Err(LadderError::not_found("Match not found or already closed.")),
            }
        } else {
            let Some(m) = c.find_match_mut(category, match_id) else {
                return Err(LadderError::not_found("Match not found or already closed."));
            };
            m.cancel_votes.insert(actor.id);
            m.status = MatchStatus::PendingCancel;
            let m = m.clone();
            self.notify(Notification::CancelRequested {
                community,
                match_id,
                player: actor.id,
            });
            Outcome::CancelRequested(m)
        };
        drop(c);

        self.persist(community, &state, [SaveScope::ActiveMatches]);
        Ok(outcome)
    }

    /// Report the actor's own result for their live match in `category`.
    /// Opposite reports from both sides complete the match; matching
    /// reports put it in dispute.
    pub async fn submit_result(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        kind: ResultKind,
        raw_value: &str,
    ) -> Result<Outcome> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let cfg = category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;
        let m = c
            .registry
            .get(category)
            .and_then(|b| b.matches.iter().find(|m| m.involves(actor.id)))
            .ok_or_else(|| LadderError::not_found("You do not have an active challenge."))?;
        match m.status {
            MatchStatus::AwaitingResult => {}
            MatchStatus::PendingCancel => {
                return Err(LadderError::conflict(
                    "This match is pending cancellation. Ask a moderator to resolve it.",
                ));
            }
            MatchStatus::Disputed => {
                return Err(LadderError::conflict(
                    "This match is disputed. A moderator must override the result.",
                ));
            }
            _ => return Err(LadderError::conflict("This match is not ready for results yet.")),
        }
        let reported = values::parse_reported(m.mode, kind, raw_value)?;
        let match_id = m.id;
        let other = m.other_participant(actor.id);

        let now = Utc::now();
        let meta_changed = Self::record_meta(&mut c, actor);
        let Some(m) = c.find_match_mut(category, match_id) else {
            return Err(LadderError::not_found("You do not have an active challenge."));
        };
        m.submissions.insert(
            actor.id,
            Submission {
                kind,
                value: reported.display.clone(),
                metric: reported.metric,
                submitted_at: now,
            },
        );
        let theirs = other.and_then(|p| m.submissions.get(&p).cloned());

        let outcome = match (other, theirs) {
            (Some(other), Some(theirs)) if theirs.kind != kind => {
                let their_value = ReportedValue {
                    display: theirs.value,
                    metric: theirs.metric,
                };
                let (winner, loser, winner_value, loser_value) = match kind {
                    ResultKind::Win => (actor.id, other, reported, their_value),
                    ResultKind::Loss => (other, actor.id, their_value, reported),
                };
                let completion = complete(
                    &mut c,
                    &cfg,
                    match_id,
                    winner,
                    loser,
                    winner_value,
                    loser_value,
                    None,
                    self.config.default_rating,
                    now,
                )?;
                self.finish(community, &completion);
                Outcome::Completed(completion)
            }
            (_, Some(_)) => {
                m.status = MatchStatus::Disputed;
                let m = m.clone();
                info!("Community {}: match {} disputed", community, match_id);
                self.notify(Notification::MatchDisputed {
                    community,
                    matchup: m.clone(),
                });
                Outcome::Disputed(m)
            }
            _ => {
                let m = m.clone();
                self.notify(Notification::ResultSubmitted {
                    community,
                    match_id,
                    player: actor.id,
                });
                Outcome::AwaitingOpponent(m)
            }
        };
        drop(c);

        let mut scopes = match outcome {
            Outcome::Completed(_) => completion_scopes(category).to_vec(),
            _ => vec![SaveScope::ActiveMatches],
        };
        if meta_changed {
            scopes.push(SaveScope::Meta);
        }
        self.persist(community, &state, scopes);
        Ok(outcome)
    }

    /// Moderator ruling on the live match between two players, whatever
    /// its state and whatever they reported.
    #[allow(clippy::too_many_arguments)]
    pub async fn override_result(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        winner: PlayerId,
        loser: PlayerId,
        winner_value: &str,
        loser_value: &str,
        notes: Option<String>,
    ) -> Result<Outcome> {
        require_moderator(actor)?;
        if winner == loser {
            return Err(LadderError::validation("Winner and loser must be different players."));
        }
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let cfg = category_config(&c, category)?;
        self.ensure_roster(&mut c, category).await?;
        let m = c
            .registry
            .get(category)
            .and_then(|b| {
                b.matches
                    .iter()
                    .find(|m| m.involves(winner) && m.involves(loser))
            })
            .ok_or_else(|| LadderError::not_found("No active match found between those players."))?;
        let winner_value = values::parse_reported(m.mode, ResultKind::Win, winner_value)?;
        let loser_value = values::parse_reported(m.mode, ResultKind::Loss, loser_value)?;
        let match_id = m.id;

        let notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let completion = complete(
            &mut c,
            &cfg,
            match_id,
            winner,
            loser,
            winner_value,
            loser_value,
            notes,
            self.config.default_rating,
            Utc::now(),
        )?;
        drop(c);

        info!("Community {}: result of match {} overridden by {}", community, match_id, actor.id);
        self.finish(community, &completion);
        self.persist(community, &state, completion_scopes(category));
        Ok(Outcome::Completed(completion))
    }

    /// Moderator removal of every live match between two players.
    pub async fn cancel_between(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        actor: &Actor,
        first: PlayerId,
        second: PlayerId,
    ) -> Result<Vec<Match>> {
        require_moderator(actor)?;
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let cfg = category_config(&c, category)?;
        let ids: Vec<MatchId> = c
            .registry
            .get(category)
            .map(|b| {
                b.matches
                    .iter()
                    .filter(|m| m.involves(first) && m.involves(second))
                    .map(|m| m.id)
                    .collect()
            })
            .unwrap_or_default();
        if ids.is_empty() {
            return Err(LadderError::not_found("No active match found between those players."));
        }

        let delete_at = Utc::now() + cleanup_delay(&cfg);
        let cancelled: Vec<Match> = ids
            .into_iter()
            .filter_map(|id| self.withdraw(&mut c, category, id, CancelReason::Moderator, delete_at))
            .collect();
        drop(c);

        info!(
            "Community {}: {} match(es) between {} and {} cancelled by {}",
            community,
            cancelled.len(),
            first,
            second,
            actor.id
        );
        self.persist(community, &state, [SaveScope::ActiveMatches]);
        Ok(cancelled)
    }

    /// Link an external discussion thread to a live match.
    pub async fn attach_thread(
        &self,
        community: CommunityId,
        category: &CategoryKey,
        match_id: MatchId,
        thread: ThreadId,
    ) -> Result<Match> {
        let state = self.hosting(community, category).await?;
        let mut c = state.lock().await;
        let m = c
            .find_match_mut(category, match_id)
            .ok_or_else(|| LadderError::not_found("Match not found or already closed."))?;
        m.thread = Some(thread);
        let m = m.clone();
        drop(c);

        self.persist(community, &state, [SaveScope::ActiveMatches]);
        Ok(m)
    }
}
