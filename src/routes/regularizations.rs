use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::AppResult,
    schemas::{
        ComputeRegularizationInput, LeasePath, RegularizationPath, RegularizationsQuery,
        SendRegularizationInput, ValidatedJson,
    },
    services::{audit::write_audit_log, regularization},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/regularizations",
            axum::routing::post(compute_regularization),
        )
        .route(
            "/regularizations/preview",
            axum::routing::post(preview_regularization),
        )
        .route(
            "/regularizations/{regularization_id}",
            axum::routing::get(get_regularization),
        )
        .route(
            "/regularizations/{regularization_id}/send",
            axum::routing::post(send_regularization),
        )
        .route(
            "/regularizations/{regularization_id}/finalize",
            axum::routing::post(finalize_regularization),
        )
        .route(
            "/leases/{lease_id}/regularizations",
            axum::routing::get(list_regularizations),
        )
}

async fn compute_regularization(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<ComputeRegularizationInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let record = regularization::compute_regularization(
        &state.store,
        &state.lease_locks,
        &user_id,
        &payload,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(record.lease_id()),
        Some(&user_id),
        "compute",
        "charge_regularizations",
        Some(&record.id),
        None,
        serde_json::to_value(&record).ok(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!(record))))
}

async fn preview_regularization(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<ComputeRegularizationInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let figures = regularization::preview_regularization(&state.store, &user_id, &payload).await?;
    Ok(Json(json!(figures)))
}

async fn list_regularizations(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    Query(query): Query<RegularizationsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let rows = regularization::list_regularizations(
        &state.store,
        &user_id,
        &path.lease_id,
        query.year,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_regularization(
    State(state): State<AppState>,
    Path(path): Path<RegularizationPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let record =
        regularization::get_regularization(&state.store, &user_id, &path.regularization_id)
            .await?;
    Ok(Json(json!(record)))
}

async fn send_regularization(
    State(state): State<AppState>,
    Path(path): Path<RegularizationPath>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<SendRegularizationInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let sent = regularization::send_regularization(
        &state.store,
        &state.renderer,
        &state.storage,
        &state.notifier,
        &user_id,
        &path.regularization_id,
        &payload,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(sent.lease_id()),
        Some(&user_id),
        "send",
        "charge_regularizations",
        Some(&sent.id),
        None,
        serde_json::to_value(&sent).ok(),
    )
    .await;

    Ok(Json(json!(sent)))
}

async fn finalize_regularization(
    State(state): State<AppState>,
    Path(path): Path<RegularizationPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let outcome = regularization::finalize_regularization(
        &state.store,
        &state.notifier,
        &state.lease_locks,
        &user_id,
        &path.regularization_id,
        Utc::now().date_naive(),
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(outcome.regularization.lease_id()),
        Some(&user_id),
        "finalize",
        "charge_regularizations",
        Some(&outcome.regularization.id),
        None,
        serde_json::to_value(&outcome.regularization).ok(),
    )
    .await;

    Ok(Json(json!(outcome)))
}
