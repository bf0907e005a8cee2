use axum::{routing::get, Router};

use crate::state::AppState;

pub mod charge_provisions;
pub mod health;
pub mod regularizations;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(charge_provisions::router())
        .merge(regularizations::router())
}
