use std::future::Future;

use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client as S3Client,
};
use reqwest::Client;
use serde_json::{json, Value};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    models::{Lease, Regularization},
};

pub const REGULARIZATION_TEMPLATE: &str = "charge_regularization";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Turns structured data into a PDF using an external rendering service.
pub trait DocumentRenderer: Send + Sync {
    fn render_pdf(
        &self,
        template: &str,
        data: &Value,
    ) -> impl Future<Output = AppResult<Vec<u8>>> + Send;
}

/// Durable blob storage; returns the key the object was stored under.
pub trait ObjectStorage: Send + Sync {
    fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = AppResult<String>> + Send;
}

#[derive(Clone)]
pub struct HttpDocumentRenderer {
    http_client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl HttpDocumentRenderer {
    pub fn new(http_client: Client, endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self {
            http_client,
            endpoint,
            api_key,
        }
    }
}

impl DocumentRenderer for HttpDocumentRenderer {
    async fn render_pdf(&self, template: &str, data: &Value) -> AppResult<Vec<u8>> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            AppError::Dependency(
                "Document service is not configured. Set DOCUMENT_SERVICE_URL.".to_string(),
            )
        })?;

        let mut request = self
            .http_client
            .post(format!("{}/render", endpoint.trim_end_matches('/')))
            .json(&json!({ "template": template, "format": "pdf", "data": data }));
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            AppError::Dependency(format!("Document service request failed: {error}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Dependency(format!(
                "Document service returned {status}."
            )));
        }

        let bytes = response.bytes().await.map_err(|error| {
            AppError::Dependency(format!("Document service response unreadable: {error}"))
        })?;
        if bytes.is_empty() {
            return Err(AppError::Dependency(
                "Document service returned an empty document.".to_string(),
            ));
        }
        Ok(bytes.to_vec())
    }
}

/// S3-compatible storage (path-style, works against Supabase storage).
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Option<S3Client>,
    bucket: String,
}

impl S3ObjectStorage {
    pub async fn from_config(config: &AppConfig) -> Self {
        let Some(bucket) = config.storage_bucket.clone() else {
            return Self::disabled();
        };

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.storage_region.clone()))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(endpoint) = config.storage_endpoint.as_deref() {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (
            config.storage_access_key_id.as_deref(),
            config.storage_secret_access_key.as_deref(),
        ) {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "app-config",
            ));
        }

        Self {
            client: Some(S3Client::from_conf(builder.build())),
            bucket,
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            bucket: String::new(),
        }
    }
}

impl ObjectStorage for S3ObjectStorage {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> AppResult<String> {
        let client = self.client.as_ref().ok_or_else(|| {
            AppError::Dependency(
                "Object storage is not configured. Set STORAGE_BUCKET.".to_string(),
            )
        })?;

        client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|error| {
                AppError::Dependency(format!("Object storage upload failed: {error}"))
            })?;

        Ok(key.to_string())
    }
}

pub fn regularization_document_key(regularization: &Regularization) -> String {
    format!(
        "regularizations/{}/{}/{}.pdf",
        regularization.lease_id(),
        regularization.figures.year,
        regularization.id
    )
}

/// Data handed to the `charge_regularization` template.
pub fn regularization_document_data(lease: &Lease, regularization: &Regularization) -> Value {
    let figures = &regularization.figures;
    json!({
        "lease": {
            "id": lease.id,
            "tenant_full_name": lease.tenant_full_name,
            "property_label": lease.property_label,
            "starts_on": lease.starts_on,
            "ends_on": lease.ends_on,
            "monthly_charges": lease.monthly_charges,
        },
        "regularization": {
            "id": regularization.id,
            "year": figures.year,
            "occupancy_start": figures.occupancy_start,
            "occupancy_end": figures.occupancy_end,
            "days_occupied": figures.days_occupied,
            "days_in_year": figures.days_in_year,
            "provisions_period_start": figures.provisions_period_start,
            "provisions_period_end": figures.provisions_period_end,
            "theoretical_provisions": figures.theoretical_provisions,
            "total_provisions_collected": figures.total_provisions_collected,
            "total_real_charges": figures.total_real_charges,
            "recoverable_charges": figures.recoverable_charges,
            "non_recoverable_charges": figures.non_recoverable_charges,
            "tenant_share": figures.tenant_share,
            "balance": figures.balance,
            "balance_abs": figures.balance.abs(),
            "balance_type": figures.balance_type,
            "calculation_notes": figures.calculation_notes,
        }
    })
}
