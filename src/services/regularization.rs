use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::{
    error::{AppError, AppResult, ChargeRuleError},
    models::{
        BalanceType, Lease, NewRegularization, Regularization, RegularizationFigures,
        RegularizationStatus, RegularizationStatusUpdate,
    },
    money::Money,
    repository::charge_store::ChargeStore,
    schemas::{ComputeRegularizationInput, FinalizeProvisionInput, SendRegularizationInput},
    services::{
        charge_provisions::{self, ProvisionFinalizationOutcome},
        documents::{
            regularization_document_data, regularization_document_key, DocumentRenderer,
            ObjectStorage, PDF_CONTENT_TYPE, REGULARIZATION_TEMPLATE,
        },
        lease_locks::LeaseLocks,
        notifications::{self, dispatch_best_effort, Notifier},
        proration::{occupancy_window, theoretical_provisions, DatePeriod, OccupancyWindow},
        provision_ledger::{provisions_collected, ProvisionsCollected},
    },
    tenancy::{load_owned_lease, load_visible_lease},
};

/// Stored precision of `occupancy_ratio`.
const RATIO_SCALE: u32 = 6;

/// Real charges for the year, split between what the tenant can be charged
/// and what stays with the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChargeSplit {
    pub total: Money,
    pub recoverable: Money,
    pub non_recoverable: Money,
}

pub fn resolve_charge_split(
    total: Money,
    recoverable: Money,
    non_recoverable: Option<Money>,
) -> Result<ChargeSplit, ChargeRuleError> {
    if total.is_negative()
        || recoverable.is_negative()
        || non_recoverable.is_some_and(|amount| amount.is_negative())
    {
        return Err(ChargeRuleError::NegativeCharges);
    }

    let non_recoverable = non_recoverable.unwrap_or(total - recoverable);
    if recoverable + non_recoverable != total || non_recoverable.is_negative() {
        return Err(ChargeRuleError::ChargeSplitMismatch {
            total,
            recoverable,
            non_recoverable,
        });
    }

    Ok(ChargeSplit {
        total,
        recoverable,
        non_recoverable,
    })
}

/// Core arithmetic: the tenant owes recoverable charges prorated to the
/// occupied days; the balance is what was collected minus that share.
pub fn calculate(
    lease: &Lease,
    window: &OccupancyWindow,
    collected: &ProvisionsCollected,
    split: ChargeSplit,
    calculation_notes: Option<String>,
) -> RegularizationFigures {
    let fraction = window.fraction();
    let tenant_share = split.recoverable.scale(fraction);
    let balance = collected.total_collected - tenant_share;

    RegularizationFigures {
        lease_id: lease.id.clone(),
        year: window.year,
        provisions_period_start: collected.period.start,
        provisions_period_end: collected.period.end,
        occupancy_start: window.period.start,
        occupancy_end: window.period.end,
        days_occupied: window.days_occupied,
        days_in_year: window.days_in_year,
        occupancy_ratio: fraction.round_dp(RATIO_SCALE),
        theoretical_provisions: theoretical_provisions(lease.monthly_charges, window),
        total_provisions_collected: collected.total_collected,
        receipt_count: i64::from(collected.receipt_count),
        total_real_charges: split.total,
        recoverable_charges: split.recoverable,
        non_recoverable_charges: split.non_recoverable,
        tenant_share,
        balance,
        balance_type: BalanceType::from_balance(balance),
        calculation_notes,
    }
}

async fn build_figures<S: ChargeStore>(
    store: &S,
    lease: &Lease,
    input: &ComputeRegularizationInput,
) -> AppResult<RegularizationFigures> {
    let window = occupancy_window(lease.starts_on, lease.ends_on, input.year)
        .ok_or(ChargeRuleError::NoOccupancy { year: input.year })?;
    let period = DatePeriod::new(
        input.provisions_period_start.unwrap_or(window.period.start),
        input.provisions_period_end.unwrap_or(window.period.end),
    )?;
    let split = resolve_charge_split(
        input.total_real_charges,
        input.recoverable_charges,
        input.non_recoverable_charges,
    )?;
    let collected = provisions_collected(store, &lease.id, &period).await?;
    let notes = input
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty())
        .map(str::to_string);

    Ok(calculate(lease, &window, &collected, split, notes))
}

/// Compute without persisting anything.
pub async fn preview_regularization<S: ChargeStore>(
    store: &S,
    actor_user_id: &str,
    input: &ComputeRegularizationInput,
) -> AppResult<RegularizationFigures> {
    let lease = load_owned_lease(store, &input.lease_id, actor_user_id).await?;
    build_figures(store, &lease, input).await
}

/// Compute and persist as a draft. A draft for the same lease and year is
/// overwritten; a sent or finalized one blocks the computation.
pub async fn compute_regularization<S: ChargeStore>(
    store: &S,
    locks: &LeaseLocks,
    actor_user_id: &str,
    input: &ComputeRegularizationInput,
) -> AppResult<Regularization> {
    let lease = load_owned_lease(store, &input.lease_id, actor_user_id).await?;
    let figures = build_figures(store, &lease, input).await?;

    let _guard = locks.acquire(&lease.id).await;
    let existing = store
        .list_regularizations(&lease.id, Some(input.year))
        .await?;
    if let Some(locked) = existing
        .iter()
        .find(|item| item.status != RegularizationStatus::Draft)
    {
        return Err(ChargeRuleError::RegularizationExists {
            year: input.year,
            status: locked.status,
        }
        .into());
    }

    let record = NewRegularization {
        figures,
        status: RegularizationStatus::Draft,
        created_by_user_id: Some(actor_user_id.to_string()),
    };
    let saved = match existing.first() {
        Some(draft) => store.replace_regularization(&draft.id, &record).await?,
        None => store.insert_regularization(&record).await?,
    };

    tracing::info!(
        lease_id = %lease.id,
        regularization_id = %saved.id,
        year = saved.figures.year,
        balance = %saved.figures.balance,
        "Charge regularization computed"
    );
    Ok(saved)
}

pub async fn list_regularizations<S: ChargeStore>(
    store: &S,
    actor_user_id: &str,
    lease_id: &str,
    year: Option<i32>,
) -> AppResult<Vec<Regularization>> {
    let lease = load_visible_lease(store, lease_id, actor_user_id).await?;
    store.list_regularizations(&lease.id, year).await
}

pub async fn get_regularization<S: ChargeStore>(
    store: &S,
    actor_user_id: &str,
    regularization_id: &str,
) -> AppResult<Regularization> {
    let regularization = load_regularization(store, regularization_id).await?;
    load_visible_lease(store, regularization.lease_id(), actor_user_id).await?;
    Ok(regularization)
}

async fn load_regularization<S: ChargeStore>(
    store: &S,
    regularization_id: &str,
) -> AppResult<Regularization> {
    store
        .get_regularization(regularization_id)
        .await?
        .ok_or_else(|| AppError::NotFound("charge_regularizations record not found.".to_string()))
}

/// Draft to sent: render the statement, store it, then tell the tenant.
/// Rendering or storage failures abort with the record left in draft.
#[allow(clippy::too_many_arguments)]
pub async fn send_regularization<S, R, O, N>(
    store: &S,
    renderer: &R,
    storage: &O,
    notifier: &N,
    actor_user_id: &str,
    regularization_id: &str,
    input: &SendRegularizationInput,
) -> AppResult<Regularization>
where
    S: ChargeStore,
    R: DocumentRenderer,
    O: ObjectStorage,
    N: Notifier,
{
    let regularization = load_regularization(store, regularization_id).await?;
    let lease = load_owned_lease(store, regularization.lease_id(), actor_user_id).await?;
    if regularization.lease_id() != input.lease_id.trim() || regularization.figures.year != input.year
    {
        return Err(ChargeRuleError::RequestMismatch.into());
    }
    if regularization.status != RegularizationStatus::Draft {
        return Err(ChargeRuleError::RegularizationStatus {
            current: regularization.status,
            expected: "draft",
        }
        .into());
    }

    let data = regularization_document_data(&lease, &regularization);
    let pdf = renderer.render_pdf(REGULARIZATION_TEMPLATE, &data).await?;
    let key = regularization_document_key(&regularization);
    let document_path = storage.put_object(&key, pdf, PDF_CONTENT_TYPE).await?;

    let update = RegularizationStatusUpdate {
        status: RegularizationStatus::Sent,
        document_path: Some(document_path),
        sent_at: Some(Utc::now()),
        finalized_at: None,
    };
    let sent = store
        .update_regularization_status(&regularization.id, &update)
        .await?;

    tracing::info!(
        lease_id = %lease.id,
        regularization_id = %sent.id,
        document_path = sent.document_path.as_deref().unwrap_or_default(),
        "Charge regularization sent"
    );
    dispatch_best_effort(notifier, notifications::regularization_sent(&lease, &sent)).await;
    Ok(sent)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegularizationFinalizationOutcome {
    pub regularization: Regularization,
    pub provision: Option<ProvisionFinalizationOutcome>,
}

/// Close a regularization. When the lease still has an active provision it
/// is settled against this regularization's balance.
pub async fn finalize_regularization<S: ChargeStore, N: Notifier>(
    store: &S,
    notifier: &N,
    locks: &LeaseLocks,
    actor_user_id: &str,
    regularization_id: &str,
    today: NaiveDate,
) -> AppResult<RegularizationFinalizationOutcome> {
    let regularization = load_regularization(store, regularization_id).await?;
    let lease = load_owned_lease(store, regularization.lease_id(), actor_user_id).await?;
    if regularization.status == RegularizationStatus::Finalized {
        return Err(ChargeRuleError::RegularizationStatus {
            current: regularization.status,
            expected: "draft or sent",
        }
        .into());
    }

    let provision = match store.find_active_provision(&lease.id).await? {
        Some(active) => {
            let input = FinalizeProvisionInput {
                regularization_id: regularization.id.clone(),
                final_balance: regularization.figures.balance,
                refund_amount: None,
                finalization_date: None,
                provision_id: Some(active.id),
            };
            Some(
                charge_provisions::finalize_provision(
                    store,
                    notifier,
                    locks,
                    actor_user_id,
                    &lease.id,
                    &input,
                    today,
                )
                .await?,
            )
        }
        None => None,
    };

    let current = load_regularization(store, &regularization.id).await?;
    let finalized = if current.status == RegularizationStatus::Finalized {
        current
    } else {
        let update = RegularizationStatusUpdate {
            status: RegularizationStatus::Finalized,
            document_path: None,
            sent_at: None,
            finalized_at: Some(Utc::now()),
        };
        store
            .update_regularization_status(&regularization.id, &update)
            .await?
    };

    tracing::info!(
        lease_id = %lease.id,
        regularization_id = %finalized.id,
        with_provision = provision.is_some(),
        "Charge regularization finalized"
    );
    if provision.is_none() {
        dispatch_best_effort(
            notifier,
            notifications::regularization_finalized(&lease, &finalized),
        )
        .await;
    }

    Ok(RegularizationFinalizationOutcome {
        regularization: finalized,
        provision,
    })
}
