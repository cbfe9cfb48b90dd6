pub mod categories;
pub mod error;
pub mod events;
pub mod matches;
pub mod middleware;
pub mod players;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Every operation route, behind service auth.
pub fn router(state: AppState) -> Router {
    let category = "/communities/{community}/categories/{category}";
    let one_match = "/communities/{community}/categories/{category}/matches/{match_id}";

    Router::new()
        .route(
            "/communities/{community}/categories",
            get(categories::list_categories).post(categories::configure_category),
        )
        .route(category, delete(categories::remove_category))
        .route(&format!("{category}/rename"), post(categories::rename_category))
        .route(&format!("{category}/leaderboard"), get(players::leaderboard))
        .route(&format!("{category}/players/{{player}}/rank"), get(players::rank))
        .route(&format!("{category}/matches"), get(matches::active_matches))
        .route(&format!("{category}/challenges/open"), post(matches::open_challenge))
        .route(&format!("{category}/challenges/targeted"), post(matches::targeted_challenge))
        .route(&format!("{one_match}/accept"), post(matches::accept))
        .route(&format!("{one_match}/decline"), post(matches::decline))
        .route(&format!("{one_match}/cancel"), post(matches::cancel))
        .route(&format!("{one_match}/thread"), post(matches::attach_thread))
        .route(&format!("{category}/results"), post(matches::submit_result))
        .route(&format!("{category}/override"), post(matches::override_result))
        .route(&format!("{category}/cancel-between"), post(matches::cancel_between))
        .route(&format!("{category}/roster/remove"), post(players::remove_player))
        .route(&format!("{category}/roster/restore"), post(players::restore_player))
        .route(&format!("{category}/roster/stats"), post(players::edit_stats))
        .route("/communities/{community}/purge-threads", post(categories::purge_threads))
        .route("/communities/{community}/role-sync", post(players::sync_roles))
        .route("/communities/{community}/bio", put(players::set_bio))
        .route("/communities/{community}/history", get(players::history))
        .route("/communities/{community}/players/{player}/profile", get(players::profile))
        .route("/events", get(events::events_upgrade))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
