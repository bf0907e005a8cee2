use std::future::Future;

use chrono::NaiveDate;

use crate::{
    error::AppResult,
    models::{
        ChargeProvision, DepositRetention, Lease, NewChargeProvision, NewRegularization,
        ProvisionFinalization, Regularization, RegularizationStatusUpdate, RentReceipt,
    },
    services::proration::DatePeriod,
};

/// Persistence seam for the charge services.
///
/// `finalize_provision` must only touch a row that is still `active` and
/// return `None` otherwise. `insert_provision` must reject a second active
/// provision for the same lease with `AppError::Conflict`.
pub trait ChargeStore: Send + Sync {
    fn get_lease(&self, lease_id: &str) -> impl Future<Output = AppResult<Option<Lease>>> + Send;

    fn list_receipts(
        &self,
        lease_id: &str,
        period: &DatePeriod,
    ) -> impl Future<Output = AppResult<Vec<RentReceipt>>> + Send;

    fn get_provision(
        &self,
        provision_id: &str,
    ) -> impl Future<Output = AppResult<Option<ChargeProvision>>> + Send;

    fn find_active_provision(
        &self,
        lease_id: &str,
    ) -> impl Future<Output = AppResult<Option<ChargeProvision>>> + Send;

    fn list_provisions(
        &self,
        lease_id: &str,
    ) -> impl Future<Output = AppResult<Vec<ChargeProvision>>> + Send;

    /// Active provisions whose expected finalization date is on or before `date`.
    fn list_overdue_provisions(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = AppResult<Vec<ChargeProvision>>> + Send;

    fn insert_provision(
        &self,
        provision: &NewChargeProvision,
    ) -> impl Future<Output = AppResult<ChargeProvision>> + Send;

    fn finalize_provision(
        &self,
        provision_id: &str,
        finalization: &ProvisionFinalization,
    ) -> impl Future<Output = AppResult<Option<ChargeProvision>>> + Send;

    fn get_regularization(
        &self,
        regularization_id: &str,
    ) -> impl Future<Output = AppResult<Option<Regularization>>> + Send;

    fn list_regularizations(
        &self,
        lease_id: &str,
        year: Option<i32>,
    ) -> impl Future<Output = AppResult<Vec<Regularization>>> + Send;

    fn insert_regularization(
        &self,
        regularization: &NewRegularization,
    ) -> impl Future<Output = AppResult<Regularization>> + Send;

    /// Overwrite the computed figures of a draft in place.
    fn replace_regularization(
        &self,
        regularization_id: &str,
        regularization: &NewRegularization,
    ) -> impl Future<Output = AppResult<Regularization>> + Send;

    fn update_regularization_status(
        &self,
        regularization_id: &str,
        update: &RegularizationStatusUpdate,
    ) -> impl Future<Output = AppResult<Regularization>> + Send;

    fn get_deposit_retention(
        &self,
        lease_id: &str,
    ) -> impl Future<Output = AppResult<Option<DepositRetention>>> + Send;

    fn save_deposit_retention(
        &self,
        retention: &DepositRetention,
    ) -> impl Future<Output = AppResult<DepositRetention>> + Send;
}
