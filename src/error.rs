use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{
    models::{ProvisionStatus, RegularizationStatus},
    money::Money,
};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    ChargeRule(#[from] ChargeRuleError),
}

/// Business-rule violations raised by the provision and regularization services.
#[derive(Debug, Error, PartialEq)]
pub enum ChargeRuleError {
    #[error("Provision amount must be greater than zero.")]
    NonPositiveProvision,

    #[error(
        "Provision amount {requested} exceeds the maximum allowed {max_allowed} (20% of the {deposit} security deposit)."
    )]
    ExceedsDepositCap {
        requested: Money,
        max_allowed: Money,
        deposit: Money,
    },

    #[error("An active charge provision already exists for this lease.")]
    ActiveProvisionExists { provision_id: String },

    #[error("This lease has no active charge provision to finalize.")]
    NoActiveProvision,

    #[error("Charge provision is {status}; only active provisions can be finalized.")]
    ProvisionNotActive { status: ProvisionStatus },

    #[error("Regularization does not belong to this lease.")]
    LeaseMismatch,

    #[error("Regularization is {current}; expected {expected}.")]
    RegularizationStatus {
        current: RegularizationStatus,
        expected: &'static str,
    },

    #[error("A {status} regularization already exists for {year}.")]
    RegularizationExists {
        year: i32,
        status: RegularizationStatus,
    },

    #[error("Lease has no occupied days in {year}.")]
    NoOccupancy { year: i32 },

    #[error(
        "Recoverable ({recoverable}) and non-recoverable ({non_recoverable}) charges must add up to the total real charges ({total})."
    )]
    ChargeSplitMismatch {
        total: Money,
        recoverable: Money,
        non_recoverable: Money,
    },

    #[error("Charge amounts cannot be negative.")]
    NegativeCharges,

    #[error("Invalid period: start {start} is after end {end}.")]
    InvalidPeriod {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Request lease or year does not match the regularization record.")]
    RequestMismatch,
}

impl ChargeRuleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ActiveProvisionExists { .. }
            | Self::NoActiveProvision
            | Self::ProvisionNotActive { .. }
            | Self::RegularizationStatus { .. }
            | Self::RegularizationExists { .. } => StatusCode::CONFLICT,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NonPositiveProvision => "provision_not_positive",
            Self::ExceedsDepositCap { .. } => "provision_exceeds_cap",
            Self::ActiveProvisionExists { .. } => "active_provision_exists",
            Self::NoActiveProvision => "no_active_provision",
            Self::ProvisionNotActive { .. } => "provision_not_active",
            Self::LeaseMismatch => "lease_mismatch",
            Self::RegularizationStatus { .. } => "regularization_status",
            Self::RegularizationExists { .. } => "regularization_exists",
            Self::NoOccupancy { .. } => "no_occupancy",
            Self::ChargeSplitMismatch { .. } => "charge_split_mismatch",
            Self::NegativeCharges => "negative_charges",
            Self::InvalidPeriod { .. } => "invalid_period",
            Self::RequestMismatch => "request_mismatch",
        }
    }

    fn extra_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            Self::ExceedsDepositCap {
                requested,
                max_allowed,
                deposit,
            } => {
                fields.insert("requested".to_string(), json!(requested));
                fields.insert("max_allowed".to_string(), json!(max_allowed));
                fields.insert("deposit_amount".to_string(), json!(deposit));
            }
            Self::ActiveProvisionExists { provision_id } => {
                fields.insert("provision_id".to_string(), json!(provision_id));
            }
            Self::ProvisionNotActive { status } => {
                fields.insert("status".to_string(), json!(status));
            }
            _ => {}
        }
        fields
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "detail": message })),
            Self::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, json!({ "detail": message }))
            }
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, json!({ "detail": message })),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "detail": message })),
            Self::Conflict(message) => (StatusCode::CONFLICT, json!({ "detail": message })),
            Self::UnprocessableEntity(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "detail": message }),
            ),
            Self::Dependency(message) => {
                tracing::error!(detail = %message, "Dependency failure");
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "detail": "A backing service failed. Please retry the request." }),
                )
            }
            Self::Internal(message) => {
                tracing::error!(detail = %message, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "Internal server error. Please retry the request." }),
                )
            }
            Self::ChargeRule(rule) => {
                let mut body = rule.extra_fields();
                body.insert("detail".to_string(), Value::String(rule.to_string()));
                body.insert("code".to_string(), Value::String(rule.code().to_string()));
                (rule.status_code(), Value::Object(body))
            }
        };

        (status, Json(body)).into_response()
    }
}
