//! Landing page and static assets.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::path::Path;
use tower_http::services::ServeDir;
use tracing::warn;

use crate::AppState;

/// Serve `<static_dir>/index.html`, or a JSON 404 if it is missing.
pub async fn index_handler(State(state): State<AppState>) -> Response {
    let index_path = state.server_config.index_path();
    match tokio::fs::read(&index_path).await {
        Ok(body) => ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response(),
        Err(e) => {
            warn!("Landing page unavailable at {}: {}", index_path.display(), e);
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "index.html not found" })),
            )
                .into_response()
        }
    }
}

/// Asset mounts under the static directory. Missing files are plain 404s.
pub fn static_routes(static_dir: &Path) -> axum::Router<AppState> {
    axum::Router::new()
        .nest_service("/static", ServeDir::new(static_dir))
        .nest_service("/css", ServeDir::new(static_dir.join("css")))
        .nest_service("/js", ServeDir::new(static_dir.join("js")))
}
