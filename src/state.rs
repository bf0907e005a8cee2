use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::PgPool;

use crate::{
    config::AppConfig,
    db,
    repository::pg_store::PgChargeStore,
    services::{
        documents::{HttpDocumentRenderer, S3ObjectStorage},
        lease_locks::LeaseLocks,
        notifications::PlatformNotifier,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: Client,
    pub store: PgChargeStore,
    pub notifier: PlatformNotifier,
    pub renderer: HttpDocumentRenderer,
    pub storage: S3ObjectStorage,
    pub lease_locks: LeaseLocks,
}

impl AppState {
    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(20))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let db_pool = db::create_pool(&config)?;
        if config.db_run_migrations {
            if let Some(pool) = db_pool.as_ref() {
                db::run_migrations(pool).await?;
            }
        }

        let storage = S3ObjectStorage::from_config(&config).await;
        let renderer = HttpDocumentRenderer::new(
            http_client.clone(),
            config.document_service_url.clone(),
            config.document_service_api_key.clone(),
        );
        let notifier = PlatformNotifier::new(
            db_pool.clone(),
            http_client.clone(),
            config.resend_api_key.clone(),
            config.email_from_address.clone(),
            config.app_public_url.clone(),
        );
        let lease_locks = LeaseLocks::new();

        Ok(Self {
            store: PgChargeStore::new(db_pool.clone()),
            config: Arc::new(config),
            db_pool,
            http_client,
            notifier,
            renderer,
            storage,
            lease_locks,
        })
    }
}
