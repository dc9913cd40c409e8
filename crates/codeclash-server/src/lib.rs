pub mod actor;
pub mod broadcast;
pub mod config;
pub mod health;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::services::ServeDir;

use codeclash_core::question::QuestionBank;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state. Spawns the session actor,
/// so it must be called from inside a tokio runtime.
pub fn build_app(config: ServerConfig, questions: QuestionBank) -> (Router<()>, AppState) {
    let web_root = config.web_root.clone();
    let state = AppState::new(config, questions);

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .fallback_service(ServeDir::new(&web_root))
        .with_state(state.clone());

    (app, state)
}
