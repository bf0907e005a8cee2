use serde::Serialize;

use crate::{
    models::{DepositRetention, RetentionLine},
    money::Money,
    repository::charge_store::ChargeStore,
};

pub const REFUND_LINE_CATEGORY: &str = "charges";
pub const REFUND_LINE_DESCRIPTION: &str =
    "Remboursement provision charges - Régularisation définitive";

/// What happened to the deposit-retention ledger after a provision refund.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetentionOutcome {
    Applied {
        retention_id: String,
        total_retained: Money,
        amount_to_refund: Money,
    },
    /// The refund line for this provision is already on the ledger.
    AlreadyApplied { retention_id: String },
    /// No move-out retention exists yet for the lease.
    NoRetentionRecord,
    /// Nothing to refund.
    NotApplicable,
    Failed,
}

/// Ledger state after appending a refund line.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionAdjustment {
    pub line: RetentionLine,
    pub total_retained: Money,
    pub amount_to_refund: Money,
}

/// Refund line and new totals. The retained total is clamped at zero; any
/// refund beyond it only shows up in `amount_to_refund`.
pub fn refund_adjustment(
    retention: &DepositRetention,
    refund_amount: Money,
    provision_id: &str,
) -> RetentionAdjustment {
    RetentionAdjustment {
        line: RetentionLine {
            category: REFUND_LINE_CATEGORY.to_string(),
            description: REFUND_LINE_DESCRIPTION.to_string(),
            amount: -refund_amount,
            is_provisional: false,
            source_provision_id: Some(provision_id.to_string()),
        },
        total_retained: (retention.total_retained - refund_amount).max(Money::ZERO),
        amount_to_refund: retention.amount_to_refund + refund_amount,
    }
}

fn has_refund_for(retention: &DepositRetention, provision_id: &str) -> bool {
    retention
        .retention_lines
        .iter()
        .any(|line| line.source_provision_id.as_deref() == Some(provision_id))
}

/// Best-effort: apply a finalized provision's refund to the lease's deposit
/// retention. Never fails; problems are logged and reported in the outcome.
pub async fn reconcile_provision_refund<S: ChargeStore>(
    store: &S,
    lease_id: &str,
    provision_id: &str,
    refund_amount: Money,
) -> RetentionOutcome {
    if !refund_amount.is_positive() {
        return RetentionOutcome::NotApplicable;
    }

    let retention = match store.get_deposit_retention(lease_id).await {
        Ok(Some(retention)) => retention,
        Ok(None) => {
            tracing::info!(
                lease_id,
                provision_id,
                "No deposit retention for lease, refund reconciliation skipped"
            );
            return RetentionOutcome::NoRetentionRecord;
        }
        Err(error) => {
            tracing::warn!(lease_id, provision_id, %error, "Failed to load deposit retention");
            return RetentionOutcome::Failed;
        }
    };

    if has_refund_for(&retention, provision_id) {
        return RetentionOutcome::AlreadyApplied {
            retention_id: retention.id,
        };
    }

    let adjustment = refund_adjustment(&retention, refund_amount, provision_id);
    if retention.total_retained < refund_amount {
        tracing::warn!(
            lease_id,
            provision_id,
            refund = %refund_amount,
            retained = %retention.total_retained,
            "Provision refund exceeds retained deposit; retained total clamped at zero"
        );
    }

    let mut updated = retention;
    updated.retention_lines.push(adjustment.line);
    updated.total_retained = adjustment.total_retained;
    updated.amount_to_refund = adjustment.amount_to_refund;

    match store.save_deposit_retention(&updated).await {
        Ok(saved) => {
            tracing::info!(
                lease_id,
                provision_id,
                refund = %refund_amount,
                total_retained = %saved.total_retained,
                amount_to_refund = %saved.amount_to_refund,
                "Provision refund applied to deposit retention"
            );
            RetentionOutcome::Applied {
                retention_id: saved.id,
                total_retained: saved.total_retained,
                amount_to_refund: saved.amount_to_refund,
            }
        }
        Err(error) => {
            tracing::warn!(lease_id, provision_id, %error, "Failed to save deposit retention");
            RetentionOutcome::Failed
        }
    }
}
