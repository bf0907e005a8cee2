use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::{
        ChargeProvision, DepositRetention, Lease, NewChargeProvision, NewRegularization,
        ProvisionFinalization, ProvisionStatus, Regularization, RegularizationStatusUpdate,
        RentReceipt,
    },
    repository::{
        charge_store::ChargeStore,
        table_service::{create_row, get_row, list_rows, update_row, update_row_where},
    },
    schemas::{remove_nulls, serialize_to_map},
    services::proration::DatePeriod,
};

const LEASES: &str = "leases";
const RECEIPTS: &str = "rent_receipts";
const PROVISIONS: &str = "charge_provisions";
const REGULARIZATIONS: &str = "charge_regularizations";
const RETENTIONS: &str = "deposit_retentions";

/// `ChargeStore` over the JSON row helpers in `table_service`.
#[derive(Clone)]
pub struct PgChargeStore {
    pool: Option<PgPool>,
}

impl PgChargeStore {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> AppResult<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            AppError::Dependency(
                "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL."
                    .to_string(),
            )
        })
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        table: &str,
        row_id: &str,
    ) -> AppResult<Option<T>> {
        match get_row(self.pool()?, table, row_id, "id").await {
            Ok(row) => decode_row(table, row).map(Some),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn fetch_many<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &Map<String, Value>,
        limit: i64,
        order_by: &str,
        ascending: bool,
    ) -> AppResult<Vec<T>> {
        let rows = list_rows(self.pool()?, table, Some(filters), limit, order_by, ascending).await?;
        rows.into_iter().map(|row| decode_row(table, row)).collect()
    }
}

fn decode_row<T: DeserializeOwned>(table: &str, row: Value) -> AppResult<T> {
    serde_json::from_value(row).map_err(|error| {
        tracing::error!(table, %error, "Row does not match the expected shape");
        AppError::Internal(format!("Could not read {table} record."))
    })
}

fn filters(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

impl ChargeStore for PgChargeStore {
    async fn get_lease(&self, lease_id: &str) -> AppResult<Option<Lease>> {
        self.fetch_optional(LEASES, lease_id).await
    }

    async fn list_receipts(
        &self,
        lease_id: &str,
        period: &DatePeriod,
    ) -> AppResult<Vec<RentReceipt>> {
        let filters = filters(&[
            ("lease_id", json!(lease_id)),
            ("payment_date__gte", json!(period.start)),
            ("payment_date__lte", json!(period.end)),
        ]);
        self.fetch_many(RECEIPTS, &filters, 1000, "payment_date", true)
            .await
    }

    async fn get_provision(&self, provision_id: &str) -> AppResult<Option<ChargeProvision>> {
        self.fetch_optional(PROVISIONS, provision_id).await
    }

    async fn find_active_provision(&self, lease_id: &str) -> AppResult<Option<ChargeProvision>> {
        let filters = filters(&[
            ("lease_id", json!(lease_id)),
            ("status", json!(ProvisionStatus::Active.as_str())),
        ]);
        let mut rows: Vec<ChargeProvision> = self
            .fetch_many(PROVISIONS, &filters, 1, "created_at", false)
            .await?;
        Ok(rows.pop())
    }

    async fn list_provisions(&self, lease_id: &str) -> AppResult<Vec<ChargeProvision>> {
        let filters = filters(&[("lease_id", json!(lease_id))]);
        self.fetch_many(PROVISIONS, &filters, 500, "created_at", false)
            .await
    }

    async fn list_overdue_provisions(&self, date: NaiveDate) -> AppResult<Vec<ChargeProvision>> {
        let filters = filters(&[
            ("status", json!(ProvisionStatus::Active.as_str())),
            ("expected_finalization_date__lte", json!(date)),
        ]);
        self.fetch_many(
            PROVISIONS,
            &filters,
            1000,
            "expected_finalization_date",
            true,
        )
        .await
    }

    async fn insert_provision(&self, provision: &NewChargeProvision) -> AppResult<ChargeProvision> {
        let record = remove_nulls(serialize_to_map(provision));
        let row = create_row(self.pool()?, PROVISIONS, &record).await?;
        decode_row(PROVISIONS, row)
    }

    async fn finalize_provision(
        &self,
        provision_id: &str,
        finalization: &ProvisionFinalization,
    ) -> AppResult<Option<ChargeProvision>> {
        let guard = filters(&[("status", json!(ProvisionStatus::Active.as_str()))]);
        let patch = serialize_to_map(finalization);
        let row = update_row_where(self.pool()?, PROVISIONS, provision_id, "id", &guard, &patch)
            .await?;
        row.map(|row| decode_row(PROVISIONS, row)).transpose()
    }

    async fn get_regularization(
        &self,
        regularization_id: &str,
    ) -> AppResult<Option<Regularization>> {
        self.fetch_optional(REGULARIZATIONS, regularization_id)
            .await
    }

    async fn list_regularizations(
        &self,
        lease_id: &str,
        year: Option<i32>,
    ) -> AppResult<Vec<Regularization>> {
        let mut filters = filters(&[("lease_id", json!(lease_id))]);
        if let Some(year) = year {
            filters.insert("year".to_string(), json!(year));
        }
        self.fetch_many(REGULARIZATIONS, &filters, 200, "year", false)
            .await
    }

    async fn insert_regularization(
        &self,
        regularization: &NewRegularization,
    ) -> AppResult<Regularization> {
        let record = remove_nulls(serialize_to_map(regularization));
        let row = create_row(self.pool()?, REGULARIZATIONS, &record).await?;
        decode_row(REGULARIZATIONS, row)
    }

    async fn replace_regularization(
        &self,
        regularization_id: &str,
        regularization: &NewRegularization,
    ) -> AppResult<Regularization> {
        let mut patch = serialize_to_map(&regularization.figures);
        patch.insert("status".to_string(), json!(regularization.status));
        let row = update_row(
            self.pool()?,
            REGULARIZATIONS,
            regularization_id,
            &patch,
            "id",
        )
        .await?;
        decode_row(REGULARIZATIONS, row)
    }

    async fn update_regularization_status(
        &self,
        regularization_id: &str,
        update: &RegularizationStatusUpdate,
    ) -> AppResult<Regularization> {
        let patch = serialize_to_map(update);
        let row = update_row(
            self.pool()?,
            REGULARIZATIONS,
            regularization_id,
            &patch,
            "id",
        )
        .await?;
        decode_row(REGULARIZATIONS, row)
    }

    async fn get_deposit_retention(&self, lease_id: &str) -> AppResult<Option<DepositRetention>> {
        let filters = filters(&[("lease_id", json!(lease_id))]);
        let mut rows: Vec<DepositRetention> = self
            .fetch_many(RETENTIONS, &filters, 1, "created_at", false)
            .await?;
        Ok(rows.pop())
    }

    async fn save_deposit_retention(
        &self,
        retention: &DepositRetention,
    ) -> AppResult<DepositRetention> {
        let patch = filters(&[
            ("retention_lines", json!(retention.retention_lines)),
            ("total_retained", json!(retention.total_retained)),
            ("amount_to_refund", json!(retention.amount_to_refund)),
        ]);
        let row = update_row(self.pool()?, RETENTIONS, &retention.id, &patch, "id").await?;
        decode_row(RETENTIONS, row)
    }
}
