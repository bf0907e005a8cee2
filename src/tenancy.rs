use crate::{
    error::{AppError, AppResult},
    models::Lease,
    repository::charge_store::ChargeStore,
};

pub fn is_lease_owner(lease: &Lease, user_id: &str) -> bool {
    let user_id = user_id.trim();
    !user_id.is_empty() && lease.owner_user_id == user_id
}

pub fn is_lease_tenant(lease: &Lease, user_id: &str) -> bool {
    let user_id = user_id.trim();
    !user_id.is_empty() && lease.tenant_user_id.as_deref() == Some(user_id)
}

pub fn assert_lease_owner(lease: &Lease, user_id: &str) -> AppResult<()> {
    if is_lease_owner(lease, user_id) {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: only the lease owner can perform this action.".to_string(),
    ))
}

pub fn assert_lease_party(lease: &Lease, user_id: &str) -> AppResult<()> {
    if is_lease_owner(lease, user_id) || is_lease_tenant(lease, user_id) {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: not a party to this lease.".to_string(),
    ))
}

pub async fn load_lease<S: ChargeStore>(store: &S, lease_id: &str) -> AppResult<Lease> {
    store
        .get_lease(lease_id)
        .await?
        .ok_or_else(|| AppError::NotFound("leases record not found.".to_string()))
}

/// Fetch a lease the caller owns; mutations on charges go through here.
pub async fn load_owned_lease<S: ChargeStore>(
    store: &S,
    lease_id: &str,
    user_id: &str,
) -> AppResult<Lease> {
    let lease = load_lease(store, lease_id).await?;
    assert_lease_owner(&lease, user_id)?;
    Ok(lease)
}

/// Fetch a lease the caller owns or rents.
pub async fn load_visible_lease<S: ChargeStore>(
    store: &S,
    lease_id: &str,
    user_id: &str,
) -> AppResult<Lease> {
    let lease = load_lease(store, lease_id).await?;
    assert_lease_party(&lease, user_id)?;
    Ok(lease)
}
