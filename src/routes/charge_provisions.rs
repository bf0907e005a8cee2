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
        CreateProvisionInput, FinalizeProvisionInput, LeasePath, ProvisionPath,
        ProvisionsCollectedQuery, ValidatedJson,
    },
    services::{
        audit::write_audit_log, charge_provisions, proration::DatePeriod, provision_ledger,
    },
    state::AppState,
    tenancy::load_visible_lease,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/leases/{lease_id}/charge-provisions",
            axum::routing::get(list_provisions).post(create_provision),
        )
        .route(
            "/leases/{lease_id}/charge-provisions/finalize",
            axum::routing::post(finalize_provision),
        )
        .route(
            "/leases/{lease_id}/provisions-collected",
            axum::routing::get(provisions_collected),
        )
        .route(
            "/charge-provisions/{provision_id}",
            axum::routing::get(get_provision),
        )
}

async fn create_provision(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<CreateProvisionInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let provision = charge_provisions::create_provision(
        &state.store,
        &state.notifier,
        &state.lease_locks,
        &user_id,
        &path.lease_id,
        &payload,
        Utc::now().date_naive(),
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&provision.lease_id),
        Some(&user_id),
        "create",
        "charge_provisions",
        Some(&provision.id),
        None,
        serde_json::to_value(&provision).ok(),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "provision_id": provision.id,
            "provision": provision,
        })),
    ))
}

async fn list_provisions(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let rows = charge_provisions::list_provisions(&state.store, &user_id, &path.lease_id).await?;
    Ok(Json(json!({ "data": rows })))
}

async fn get_provision(
    State(state): State<AppState>,
    Path(path): Path<ProvisionPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let provision =
        charge_provisions::get_provision(&state.store, &user_id, &path.provision_id).await?;
    Ok(Json(json!(provision)))
}

async fn finalize_provision(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<FinalizeProvisionInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let outcome = charge_provisions::finalize_provision(
        &state.store,
        &state.notifier,
        &state.lease_locks,
        &user_id,
        &path.lease_id,
        &payload,
        Utc::now().date_naive(),
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&outcome.provision.lease_id),
        Some(&user_id),
        "finalize",
        "charge_provisions",
        Some(&outcome.provision.id),
        None,
        serde_json::to_value(&outcome.provision).ok(),
    )
    .await;

    Ok(Json(json!({
        "provision_id": outcome.provision.id,
        "refund_amount": outcome.refund_amount,
        "deposit_retention": outcome.deposit_retention,
    })))
}

async fn provisions_collected(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    Query(query): Query<ProvisionsCollectedQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let lease = load_visible_lease(&state.store, &path.lease_id, &user_id).await?;
    let period = DatePeriod::new(query.period_start, query.period_end)?;
    let collected = provision_ledger::provisions_collected(&state.store, &lease.id, &period).await?;
    Ok(Json(json!(collected)))
}
