use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{
        ChargeProvision, DepositRetention, Lease, NewChargeProvision, NewRegularization,
        ProvisionFinalization, ProvisionStatus, Regularization, RegularizationStatusUpdate,
        RentReceipt,
    },
    repository::charge_store::ChargeStore,
    services::proration::DatePeriod,
};

#[derive(Default)]
struct Tables {
    leases: HashMap<String, Lease>,
    receipts: Vec<RentReceipt>,
    provisions: Vec<ChargeProvision>,
    regularizations: Vec<Regularization>,
    retentions: HashMap<String, DepositRetention>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-process `ChargeStore` mirroring the Postgres constraints, for tests.
#[derive(Clone, Default)]
pub struct MemoryChargeStore {
    tables: Arc<Mutex<Tables>>,
    fail_retention_writes: Arc<AtomicBool>,
    fail_regularization_writes: Arc<AtomicBool>,
}

impl MemoryChargeStore {
    fn tables(&self) -> AppResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("memory store poisoned".to_string()))
    }

    pub fn put_lease(&self, lease: Lease) {
        if let Ok(mut tables) = self.tables() {
            tables.leases.insert(lease.id.clone(), lease);
        }
    }

    pub fn put_receipt(&self, receipt: RentReceipt) {
        if let Ok(mut tables) = self.tables() {
            tables.receipts.push(receipt);
        }
    }

    pub fn put_deposit_retention(&self, retention: DepositRetention) {
        if let Ok(mut tables) = self.tables() {
            tables.retentions.insert(retention.lease_id.clone(), retention);
        }
    }

    pub fn fail_retention_writes(&self, fail: bool) {
        self.fail_retention_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_regularization_writes(&self, fail: bool) {
        self.fail_regularization_writes.store(fail, Ordering::SeqCst);
    }

    pub fn provisions(&self) -> Vec<ChargeProvision> {
        self.tables()
            .map(|tables| tables.provisions.clone())
            .unwrap_or_default()
    }
}

impl ChargeStore for MemoryChargeStore {
    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>> {
        Ok(self.tables()?.leases.get(lease_id).cloned())
    }

    async fn list_receipts(
        &self,
        lease_id: &str,
        period: &DatePeriod,
    ) -> AppResult<Vec<RentReceipt>> {
        Ok(self
            .tables()?
            .receipts
            .iter()
            .filter(|receipt| receipt.lease_id == lease_id)
            .filter(|receipt| {
                receipt
                    .payment_date
                    .is_some_and(|payment_date| period.contains(payment_date))
            })
            .cloned()
            .collect())
    }

    async fn get_provision(&self, provision_id: &str) -> AppResult<Option<ChargeProvision>> {
        Ok(self
            .tables()?
            .provisions
            .iter()
            .find(|provision| provision.id == provision_id)
            .cloned())
    }

    async fn find_active_provision(&self, lease_id: &str) -> AppResult<Option<ChargeProvision>> {
        Ok(self
            .tables()?
            .provisions
            .iter()
            .find(|provision| {
                provision.lease_id == lease_id && provision.status == ProvisionStatus::Active
            })
            .cloned())
    }

    async fn list_provisions(&self, lease_id: &str) -> AppResult<Vec<ChargeProvision>> {
        let mut rows = self
            .tables()?
            .provisions
            .iter()
            .filter(|provision| provision.lease_id == lease_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.reverse();
        Ok(rows)
    }

    async fn list_overdue_provisions(&self, date: NaiveDate) -> AppResult<Vec<ChargeProvision>> {
        Ok(self
            .tables()?
            .provisions
            .iter()
            .filter(|provision| provision.status == ProvisionStatus::Active)
            .filter(|provision| {
                provision
                    .expected_finalization_date
                    .is_some_and(|expected| expected <= date)
            })
            .cloned()
            .collect())
    }

    async fn insert_provision(&self, provision: &NewChargeProvision) -> AppResult<ChargeProvision> {
        let mut tables = self.tables()?;
        if provision.status == ProvisionStatus::Active
            && tables.provisions.iter().any(|existing| {
                existing.lease_id == provision.lease_id
                    && existing.status == ProvisionStatus::Active
            })
        {
            return Err(AppError::Conflict(
                "Duplicate value violates a unique constraint.".to_string(),
            ));
        }

        let created = ChargeProvision {
            id: tables.next_id("prov"),
            lease_id: provision.lease_id.clone(),
            provision_amount: provision.provision_amount,
            max_allowed_amount: provision.max_allowed_amount,
            deposit_amount: provision.deposit_amount,
            supporting_documents: provision.supporting_documents.clone(),
            justification_notes: provision.justification_notes.clone(),
            provision_date: provision.provision_date,
            expected_finalization_date: provision.expected_finalization_date,
            status: provision.status,
            final_regularization_id: None,
            final_balance: None,
            refund_amount: None,
            finalization_date: None,
            created_by_user_id: provision.created_by_user_id.clone(),
            created_at: Some(Utc::now()),
        };
        tables.provisions.push(created.clone());
        Ok(created)
    }

    async fn finalize_provision(
        &self,
        provision_id: &str,
        finalization: &ProvisionFinalization,
    ) -> AppResult<Option<ChargeProvision>> {
        let mut tables = self.tables()?;
        let Some(provision) = tables.provisions.iter_mut().find(|provision| {
            provision.id == provision_id && provision.status == ProvisionStatus::Active
        }) else {
            return Ok(None);
        };

        provision.status = finalization.status;
        provision.final_regularization_id = Some(finalization.final_regularization_id.clone());
        provision.final_balance = Some(finalization.final_balance);
        provision.refund_amount = Some(finalization.refund_amount);
        provision.finalization_date = Some(finalization.finalization_date);
        Ok(Some(provision.clone()))
    }

    async fn get_regularization(
        &self,
        regularization_id: &str,
    ) -> AppResult<Option<Regularization>> {
        Ok(self
            .tables()?
            .regularizations
            .iter()
            .find(|regularization| regularization.id == regularization_id)
            .cloned())
    }

    async fn list_regularizations(
        &self,
        lease_id: &str,
        year: Option<i32>,
    ) -> AppResult<Vec<Regularization>> {
        Ok(self
            .tables()?
            .regularizations
            .iter()
            .filter(|regularization| regularization.lease_id() == lease_id)
            .filter(|regularization| year.is_none_or(|year| regularization.figures.year == year))
            .cloned()
            .collect())
    }

    async fn insert_regularization(
        &self,
        regularization: &NewRegularization,
    ) -> AppResult<Regularization> {
        let mut tables = self.tables()?;
        let created = Regularization {
            id: tables.next_id("reg"),
            figures: regularization.figures.clone(),
            status: regularization.status,
            document_path: None,
            sent_at: None,
            finalized_at: None,
            created_by_user_id: regularization.created_by_user_id.clone(),
            created_at: Some(Utc::now()),
        };
        tables.regularizations.push(created.clone());
        Ok(created)
    }

    async fn replace_regularization(
        &self,
        regularization_id: &str,
        regularization: &NewRegularization,
    ) -> AppResult<Regularization> {
        let mut tables = self.tables()?;
        let existing = tables
            .regularizations
            .iter_mut()
            .find(|existing| existing.id == regularization_id)
            .ok_or_else(|| {
                AppError::NotFound("charge_regularizations record not found.".to_string())
            })?;
        existing.figures = regularization.figures.clone();
        existing.status = regularization.status;
        Ok(existing.clone())
    }

    async fn update_regularization_status(
        &self,
        regularization_id: &str,
        update: &RegularizationStatusUpdate,
    ) -> AppResult<Regularization> {
        if self.fail_regularization_writes.load(Ordering::SeqCst) {
            return Err(AppError::Dependency("Database operation failed.".to_string()));
        }
        let mut tables = self.tables()?;
        let existing = tables
            .regularizations
            .iter_mut()
            .find(|existing| existing.id == regularization_id)
            .ok_or_else(|| {
                AppError::NotFound("charge_regularizations record not found.".to_string())
            })?;
        existing.status = update.status;
        if let Some(path) = &update.document_path {
            existing.document_path = Some(path.clone());
        }
        if update.sent_at.is_some() {
            existing.sent_at = update.sent_at;
        }
        if update.finalized_at.is_some() {
            existing.finalized_at = update.finalized_at;
        }
        Ok(existing.clone())
    }

    async fn get_deposit_retention(&self, lease_id: &str) -> AppResult<Option<DepositRetention>> {
        Ok(self.tables()?.retentions.get(lease_id).cloned())
    }

    async fn save_deposit_retention(
        &self,
        retention: &DepositRetention,
    ) -> AppResult<DepositRetention> {
        if self.fail_retention_writes.load(Ordering::SeqCst) {
            return Err(AppError::Dependency("Database operation failed.".to_string()));
        }
        let mut tables = self.tables()?;
        tables
            .retentions
            .insert(retention.lease_id.clone(), retention.clone());
        Ok(retention.clone())
    }
}
