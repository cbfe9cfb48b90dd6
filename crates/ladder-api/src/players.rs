use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use ladder_engine::LadderError;
use ladder_types::api::{EditStatsRequest, RoleSyncRequest, RosterMoveRequest, SetBioRequest};
use ladder_types::{CategoryKey, CommunityId, PlayerId};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub category: Option<CategoryKey>,
    pub player: Option<PlayerId>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub category: Option<CategoryKey>,
}

pub async fn leaderboard(
    State(state): State<AppState>,
    Path((community, category)): Path<(CommunityId, CategoryKey)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.leaderboard(community, &category).await?))
}

pub async fn rank(
    State(state): State<AppState>,
    Path((community, category, player)): Path<(CommunityId, CategoryKey, PlayerId)>,
) -> ApiResult<impl IntoResponse> {
    let entry = state
        .engine
        .query_rank(community, &category, player)
        .await?
        .ok_or_else(|| LadderError::not_found("That player is not ranked on this leaderboard."))?;
    Ok(Json(entry))
}

pub async fn profile(
    State(state): State<AppState>,
    Path((community, player)): Path<(CommunityId, PlayerId)>,
    Query(query): Query<ProfileQuery>,
) -> ApiResult<impl IntoResponse> {
    let profile = state
        .engine
        .profile(community, player, query.category.as_ref())
        .await?;
    Ok(Json(profile))
}

pub async fn history(
    State(state): State<AppState>,
    Path(community): Path<CommunityId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = state
        .engine
        .history(community, query.category.as_ref(), query.player, query.limit.min(100))
        .await?;
    Ok(Json(rows))
}

pub async fn remove_player(
    State(state): State<AppState>,
    Path((community, category)): Path<(CommunityId, CategoryKey)>,
    Json(req): Json<RosterMoveRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .engine
        .remove_player(community, &category, &req.actor, req.player)
        .await?;
    Ok(Json(record))
}

pub async fn restore_player(
    State(state): State<AppState>,
    Path((community, category)): Path<(CommunityId, CategoryKey)>,
    Json(req): Json<RosterMoveRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .engine
        .restore_player(community, &category, &req.actor, req.player)
        .await?;
    Ok(Json(record))
}

pub async fn edit_stats(
    State(state): State<AppState>,
    Path((community, category)): Path<(CommunityId, CategoryKey)>,
    Json(req): Json<EditStatsRequest>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .engine
        .edit_player_stats(
            community,
            &category,
            &req.actor,
            req.player,
            req.rating,
            req.wins,
            req.losses,
        )
        .await?;
    Ok(Json(record))
}

pub async fn sync_roles(
    State(state): State<AppState>,
    Path(community): Path<CommunityId>,
    Json(req): Json<RoleSyncRequest>,
) -> ApiResult<impl IntoResponse> {
    let moves = state
        .engine
        .sync_member_roles(community, req.player, &req.removed_roles, &req.added_roles)
        .await?;
    Ok(Json(moves))
}

pub async fn set_bio(
    State(state): State<AppState>,
    Path(community): Path<CommunityId>,
    Json(req): Json<SetBioRequest>,
) -> ApiResult<impl IntoResponse> {
    state.engine.set_bio(community, &req.actor, &req.bio).await?;
    Ok(StatusCode::NO_CONTENT)
}
