use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::AppError,
    money::{deserialize_cents, deserialize_optional_cents, Money},
};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

/// JSON body extractor that runs `validator` rules before the handler.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(json_rejection)?;
        validate_input(&value)?;
        Ok(Self(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::JsonDataError(error) => AppError::UnprocessableEntity(error.body_text()),
        other => AppError::BadRequest(other.body_text()),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateProvisionInput {
    #[serde(deserialize_with = "deserialize_cents")]
    pub provision_amount: Money,
    #[validate(length(max = 2000))]
    pub justification_notes: Option<String>,
    pub expected_finalization_date: Option<NaiveDate>,
    pub provision_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub supporting_documents: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FinalizeProvisionInput {
    #[validate(length(min = 1, max = 64))]
    pub regularization_id: String,
    #[serde(deserialize_with = "deserialize_cents")]
    pub final_balance: Money,
    #[serde(default, deserialize_with = "deserialize_optional_cents")]
    pub refund_amount: Option<Money>,
    pub finalization_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 64))]
    pub provision_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ComputeRegularizationInput {
    #[validate(length(min = 1, max = 64))]
    pub lease_id: String,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    pub provisions_period_start: Option<NaiveDate>,
    pub provisions_period_end: Option<NaiveDate>,
    #[serde(deserialize_with = "deserialize_cents")]
    pub total_real_charges: Money,
    #[serde(deserialize_with = "deserialize_cents")]
    pub recoverable_charges: Money,
    #[serde(default, deserialize_with = "deserialize_optional_cents")]
    pub non_recoverable_charges: Option<Money>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SendRegularizationInput {
    #[validate(length(min = 1, max = 64))]
    pub lease_id: String,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionsCollectedQuery {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegularizationsQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeasePath {
    pub lease_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionPath {
    pub provision_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegularizationPath {
    pub regularization_id: String,
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}
