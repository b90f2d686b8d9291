//! REST endpoint handlers organized by resource.

pub mod rpc;
pub mod system;
pub mod tools;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// Routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(tools::routes())
        .merge(rpc::routes())
        .route("/stats", get(system::stats_handler))
}
