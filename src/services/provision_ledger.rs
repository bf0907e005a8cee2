use serde::Serialize;

use crate::{
    error::AppResult,
    models::{ReceiptStatus, RentReceipt},
    money::Money,
    repository::charge_store::ChargeStore,
    services::proration::DatePeriod,
};

/// Provisions actually collected from a tenant over a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProvisionsCollected {
    pub period: DatePeriod,
    pub total_collected: Money,
    pub receipt_count: u32,
    pub average_monthly: Money,
}

/// Sum the charges part of paid receipts whose payment date falls inside the
/// period. Unpaid or undated receipts are ignored.
pub fn summarize_receipts(receipts: &[RentReceipt], period: &DatePeriod) -> ProvisionsCollected {
    let counted = receipts
        .iter()
        .filter(|receipt| receipt.status == ReceiptStatus::Paid)
        .filter(|receipt| {
            receipt
                .payment_date
                .is_some_and(|payment_date| period.contains(payment_date))
        })
        .collect::<Vec<_>>();

    let total_collected: Money = counted.iter().map(|receipt| receipt.charges_amount).sum();

    ProvisionsCollected {
        period: *period,
        total_collected,
        receipt_count: counted.len() as u32,
        average_monthly: total_collected.split(period.months().max(1)),
    }
}

pub async fn provisions_collected<S: ChargeStore>(
    store: &S,
    lease_id: &str,
    period: &DatePeriod,
) -> AppResult<ProvisionsCollected> {
    let receipts = store.list_receipts(lease_id, period).await?;
    let summary = summarize_receipts(&receipts, period);
    tracing::debug!(
        lease_id,
        receipts = receipts.len(),
        counted = summary.receipt_count,
        total = %summary.total_collected,
        "Summed collected provisions"
    );
    Ok(summary)
}
