use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use ladder_types::api::{
    AttachThreadRequest, CancelBetweenRequest, MatchActionRequest, OpenChallengeRequest,
    OverrideRequest, SubmitResultRequest, TargetedChallengeRequest,
};
use ladder_types::{CategoryKey, CommunityId, PlayerId};

use crate::error::ApiResult;
use crate::state::AppState;

type CategoryPath = Path<(CommunityId, CategoryKey)>;
type MatchPath = Path<(CommunityId, CategoryKey, Uuid)>;

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    pub player: Option<PlayerId>,
}

pub async fn active_matches(
    State(state): State<AppState>,
    Path((community, category)): CategoryPath,
    Query(query): Query<ActiveQuery>,
) -> ApiResult<impl IntoResponse> {
    let matches = state
        .engine
        .active_matches(community, &category, query.player)
        .await?;
    Ok(Json(matches))
}

pub async fn open_challenge(
    State(state): State<AppState>,
    Path((community, category)): CategoryPath,
    Json(req): Json<OpenChallengeRequest>,
) -> ApiResult<impl IntoResponse> {
    let m = state
        .engine
        .issue_open_challenge(community, &category, &req.actor, req.rank_range, req.auto_match)
        .await?;
    Ok((StatusCode::CREATED, Json(m)))
}

pub async fn targeted_challenge(
    State(state): State<AppState>,
    Path((community, category)): CategoryPath,
    Json(req): Json<TargetedChallengeRequest>,
) -> ApiResult<impl IntoResponse> {
    let m = state
        .engine
        .issue_targeted_challenge(community, &category, &req.actor, &req.opponent)
        .await?;
    Ok((StatusCode::CREATED, Json(m)))
}

pub async fn accept(
    State(state): State<AppState>,
    Path((community, category, match_id)): MatchPath,
    Json(req): Json<MatchActionRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .accept_match(community, &category, &req.actor, match_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn decline(
    State(state): State<AppState>,
    Path((community, category, match_id)): MatchPath,
    Json(req): Json<MatchActionRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .decline_match(community, &category, &req.actor, match_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path((community, category, match_id)): MatchPath,
    Json(req): Json<MatchActionRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .cancel_match(community, &category, &req.actor, match_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn attach_thread(
    State(state): State<AppState>,
    Path((community, category, match_id)): MatchPath,
    Json(req): Json<AttachThreadRequest>,
) -> ApiResult<impl IntoResponse> {
    let m = state
        .engine
        .attach_thread(community, &category, match_id, req.thread)
        .await?;
    Ok(Json(m))
}

pub async fn submit_result(
    State(state): State<AppState>,
    Path((community, category)): CategoryPath,
    Json(req): Json<SubmitResultRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .submit_result(community, &category, &req.actor, req.kind, &req.value)
        .await?;
    Ok(Json(outcome))
}

pub async fn override_result(
    State(state): State<AppState>,
    Path((community, category)): CategoryPath,
    Json(req): Json<OverrideRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .override_result(
            community,
            &category,
            &req.actor,
            req.winner,
            req.loser,
            &req.winner_value,
            &req.loser_value,
            req.notes,
        )
        .await?;
    Ok(Json(outcome))
}

pub async fn cancel_between(
    State(state): State<AppState>,
    Path((community, category)): CategoryPath,
    Json(req): Json<CancelBetweenRequest>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state
        .engine
        .cancel_between(community, &category, &req.actor, req.first, req.second)
        .await?;
    Ok(Json(cancelled))
}
