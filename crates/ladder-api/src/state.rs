use std::sync::Arc;

use ladder_engine::Engine;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Arc<Engine>,
    pub jwt_secret: String,
}
