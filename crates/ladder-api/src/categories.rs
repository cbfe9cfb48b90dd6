use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use ladder_engine::LadderError;
use ladder_types::api::{
    ConfigureCategoryRequest, PurgeThreadsRequest, PurgeThreadsResponse, RenameCategoryRequest,
};
use ladder_types::{CategoryKey, CommunityId, Mode};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_categories(
    State(state): State<AppState>,
    Path(community): Path<CommunityId>,
) -> impl IntoResponse {
    Json(state.engine.list_categories(community).await)
}

pub async fn configure_category(
    State(state): State<AppState>,
    Path(community): Path<CommunityId>,
    Json(req): Json<ConfigureCategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let mode = req
        .mode
        .as_deref()
        .map(Mode::from_str)
        .transpose()
        .map_err(LadderError::validation)?;

    let cfg = state
        .engine
        .configure_category(
            community,
            &req.name,
            mode,
            req.participant_role,
            req.thread_cleanup_secs,
        )
        .await?;
    Ok(Json(cfg))
}

pub async fn remove_category(
    State(state): State<AppState>,
    Path((community, category)): Path<(CommunityId, CategoryKey)>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.engine.remove_category(community, &category).await?;
    Ok((StatusCode::OK, Json(cancelled)))
}

pub async fn rename_category(
    State(state): State<AppState>,
    Path((community, category)): Path<(CommunityId, CategoryKey)>,
    Json(req): Json<RenameCategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let cfg = state
        .engine
        .rename_category(community, &category, &req.name)
        .await?;
    Ok(Json(cfg))
}

pub async fn purge_threads(
    State(state): State<AppState>,
    Path(community): Path<CommunityId>,
    Json(req): Json<PurgeThreadsRequest>,
) -> ApiResult<impl IntoResponse> {
    let queued = state
        .engine
        .purge_threads(community, &req.actor, req.category.as_ref())
        .await?;
    Ok(Json(PurgeThreadsResponse { queued }))
}
