use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub id: String,
    pub owner_user_id: String,
    #[serde(default)]
    pub tenant_user_id: Option<String>,
    #[serde(default)]
    pub tenant_full_name: Option<String>,
    #[serde(default)]
    pub tenant_email: Option<String>,
    pub starts_on: NaiveDate,
    #[serde(default)]
    pub ends_on: Option<NaiveDate>,
    #[serde(default)]
    pub monthly_rent: Money,
    /// Monthly service-charge provision billed with the rent.
    #[serde(default)]
    pub monthly_charges: Money,
    #[serde(default)]
    pub security_deposit: Money,
    #[serde(default)]
    pub property_label: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Paid,
    Pending,
    Late,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RentReceipt {
    pub id: String,
    pub lease_id: String,
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub rent_amount: Money,
    #[serde(default)]
    pub charges_amount: Money,
    pub status: ReceiptStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStatus {
    Active,
    Finalized,
}

impl ProvisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeProvision {
    pub id: String,
    pub lease_id: String,
    pub provision_amount: Money,
    pub max_allowed_amount: Money,
    pub deposit_amount: Money,
    #[serde(default)]
    pub supporting_documents: Vec<String>,
    #[serde(default)]
    pub justification_notes: Option<String>,
    pub provision_date: NaiveDate,
    #[serde(default)]
    pub expected_finalization_date: Option<NaiveDate>,
    pub status: ProvisionStatus,
    #[serde(default)]
    pub final_regularization_id: Option<String>,
    #[serde(default)]
    pub final_balance: Option<Money>,
    #[serde(default)]
    pub refund_amount: Option<Money>,
    #[serde(default)]
    pub finalization_date: Option<NaiveDate>,
    #[serde(default)]
    pub created_by_user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Insert payload for `charge_provisions`; the store assigns id and timestamps.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewChargeProvision {
    pub lease_id: String,
    pub provision_amount: Money,
    pub max_allowed_amount: Money,
    pub deposit_amount: Money,
    pub supporting_documents: Vec<String>,
    pub justification_notes: Option<String>,
    pub provision_date: NaiveDate,
    pub expected_finalization_date: Option<NaiveDate>,
    pub status: ProvisionStatus,
    pub created_by_user_id: Option<String>,
}

/// Fields stamped on the `active -> finalized` transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProvisionFinalization {
    pub status: ProvisionStatus,
    pub final_regularization_id: String,
    pub final_balance: Money,
    pub refund_amount: Money,
    pub finalization_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationStatus {
    Draft,
    Sent,
    Finalized,
}

impl RegularizationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for RegularizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the money owed once provisions are compared to real charges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceType {
    /// Provisions exceeded the tenant share: the owner refunds the tenant.
    Refund,
    /// Tenant share exceeded provisions: the tenant pays the complement.
    Complement,
    Settled,
}

impl BalanceType {
    pub fn from_balance(balance: Money) -> Self {
        if balance.is_positive() {
            Self::Refund
        } else if balance.is_negative() {
            Self::Complement
        } else {
            Self::Settled
        }
    }
}

/// Computed figures shared by persisted regularizations and previews.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegularizationFigures {
    pub lease_id: String,
    pub year: i32,
    pub provisions_period_start: NaiveDate,
    pub provisions_period_end: NaiveDate,
    pub occupancy_start: NaiveDate,
    pub occupancy_end: NaiveDate,
    pub days_occupied: i64,
    pub days_in_year: i64,
    pub occupancy_ratio: Decimal,
    pub theoretical_provisions: Money,
    pub total_provisions_collected: Money,
    pub receipt_count: i64,
    pub total_real_charges: Money,
    pub recoverable_charges: Money,
    pub non_recoverable_charges: Money,
    pub tenant_share: Money,
    pub balance: Money,
    pub balance_type: BalanceType,
    #[serde(default)]
    pub calculation_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Regularization {
    pub id: String,
    #[serde(flatten)]
    pub figures: RegularizationFigures,
    pub status: RegularizationStatus,
    #[serde(default)]
    pub document_path: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by_user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Regularization {
    pub fn lease_id(&self) -> &str {
        &self.figures.lease_id
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewRegularization {
    #[serde(flatten)]
    pub figures: RegularizationFigures,
    pub status: RegularizationStatus,
    pub created_by_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RegularizationStatusUpdate {
    pub status: RegularizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionLine {
    pub category: String,
    pub description: String,
    /// Signed: negative lines reduce what is withheld from the deposit.
    pub amount: Money,
    #[serde(default)]
    pub is_provisional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_provision_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepositRetention {
    pub id: String,
    pub lease_id: String,
    #[serde(default)]
    pub deposit_amount: Money,
    #[serde(default)]
    pub retention_lines: Vec<RetentionLine>,
    #[serde(default)]
    pub total_retained: Money,
    #[serde(default)]
    pub amount_to_refund: Money,
}

#[cfg(test)]
mod tests {
    use super::{BalanceType, ChargeProvision, ProvisionStatus, Regularization};
    use crate::money::Money;
    use serde_json::json;

    #[test]
    fn balance_type_follows_sign() {
        assert_eq!(BalanceType::from_balance(Money::from(120)), BalanceType::Refund);
        assert_eq!(
            BalanceType::from_balance(-Money::from(180)),
            BalanceType::Complement
        );
        assert_eq!(BalanceType::from_balance(Money::ZERO), BalanceType::Settled);
    }

    #[test]
    fn reads_provision_rows_as_returned_by_postgres() {
        let row = json!({
            "id": "3f0d7f0e-3b7a-4c57-9d7e-2f4b3b1de001",
            "lease_id": "3f0d7f0e-3b7a-4c57-9d7e-2f4b3b1de002",
            "provision_amount": 150.0,
            "max_allowed_amount": 200,
            "deposit_amount": "1000.00",
            "supporting_documents": ["docs/invoice-2025.pdf"],
            "justification_notes": null,
            "provision_date": "2026-01-15",
            "expected_finalization_date": null,
            "status": "active",
            "created_at": "2026-01-15T09:30:00.123456+00:00"
        });
        let provision: ChargeProvision =
            serde_json::from_value(row).expect("provision row should deserialize");
        assert_eq!(provision.provision_amount, Money::from(150));
        assert_eq!(provision.deposit_amount, Money::from(1000));
        assert_eq!(provision.status, ProvisionStatus::Active);
        assert!(provision.final_balance.is_none());
    }

    #[test]
    fn regularization_rows_flatten_figures() {
        let row = json!({
            "id": "reg-1",
            "lease_id": "lease-1",
            "year": 2025,
            "provisions_period_start": "2025-01-01",
            "provisions_period_end": "2025-12-31",
            "occupancy_start": "2025-01-01",
            "occupancy_end": "2025-12-31",
            "days_occupied": 365,
            "days_in_year": 365,
            "occupancy_ratio": 1.0,
            "theoretical_provisions": 900,
            "total_provisions_collected": 900,
            "receipt_count": 12,
            "total_real_charges": 1000,
            "recoverable_charges": 780,
            "non_recoverable_charges": 220,
            "tenant_share": 780,
            "balance": 120,
            "balance_type": "refund",
            "status": "draft"
        });
        let regularization: Regularization =
            serde_json::from_value(row).expect("regularization row should deserialize");
        assert_eq!(regularization.lease_id(), "lease-1");
        assert_eq!(regularization.figures.balance, Money::from(120));
    }
}
