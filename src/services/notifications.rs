use std::future::Future;

use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    models::{ChargeProvision, Lease, Regularization},
    money::Money,
    repository::table_service::{count_rows, create_row},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    ProvisionCreated,
    ProvisionFinalized,
    RegularizationSent,
    RegularizationFinalized,
    ProvisionFinalizationDue,
}

impl NotificationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProvisionCreated => "provision_created",
            Self::ProvisionFinalized => "provision_finalized",
            Self::RegularizationSent => "regularization_sent",
            Self::RegularizationFinalized => "regularization_finalized",
            Self::ProvisionFinalizationDue => "provision_finalization_due",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub lease_id: String,
    pub recipient_user_id: Option<String>,
    pub recipient_email: Option<String>,
    pub title: String,
    pub body: String,
    pub link_path: Option<String>,
    pub dedupe_key: Option<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("in-app notification could not be stored: {0}")]
    Store(String),
    #[error("email delivery failed: {0}")]
    Email(String),
}

pub trait Notifier: Send + Sync {
    fn send(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Fire-and-forget delivery: failures are logged, never returned. Yields
/// whether the notifier accepted the notification.
pub async fn dispatch_best_effort<N: Notifier>(
    notifier: &N,
    notification: Notification,
) -> bool {
    if notification.recipient_user_id.is_none() && notification.recipient_email.is_none() {
        tracing::debug!(
            event = notification.event.as_str(),
            lease_id = %notification.lease_id,
            "Notification skipped: no recipient on lease"
        );
        return false;
    }

    match notifier.send(&notification).await {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(
                event = notification.event.as_str(),
                lease_id = %notification.lease_id,
                %error,
                "Notification dispatch failed"
            );
            false
        }
    }
}

/// Stores in-app notifications in Postgres and mails through Resend.
#[derive(Clone)]
pub struct PlatformNotifier {
    pool: Option<PgPool>,
    http_client: Client,
    resend_api_key: Option<String>,
    email_from_address: String,
    app_public_url: String,
}

impl PlatformNotifier {
    pub fn new(
        pool: Option<PgPool>,
        http_client: Client,
        resend_api_key: Option<String>,
        email_from_address: String,
        app_public_url: String,
    ) -> Self {
        Self {
            pool,
            http_client,
            resend_api_key,
            email_from_address,
            app_public_url,
        }
    }

    fn email_text(&self, notification: &Notification) -> String {
        match notification.link_path.as_deref() {
            Some(link) => format!(
                "{}\n\n{}{}",
                notification.body,
                self.app_public_url.trim_end_matches('/'),
                link
            ),
            None => notification.body.clone(),
        }
    }

    async fn store_in_app(&self, notification: &Notification) -> Result<(), DispatchError> {
        let Some(recipient) = notification.recipient_user_id.as_deref() else {
            return Ok(());
        };
        let Some(pool) = self.pool.as_ref() else {
            return Err(DispatchError::Store("database is not configured".to_string()));
        };

        if let Some(key) = notification.dedupe_key.as_deref() {
            let mut filters = Map::new();
            filters.insert("dedupe_key".to_string(), Value::String(key.to_string()));
            let existing = count_rows(pool, "notifications", Some(&filters))
                .await
                .map_err(|error| DispatchError::Store(error.to_string()))?;
            if existing > 0 {
                return Ok(());
            }
        }

        let mut record = Map::new();
        record.insert(
            "recipient_user_id".to_string(),
            Value::String(recipient.to_string()),
        );
        record.insert(
            "lease_id".to_string(),
            Value::String(notification.lease_id.clone()),
        );
        record.insert(
            "event_type".to_string(),
            Value::String(notification.event.as_str().to_string()),
        );
        record.insert(
            "title".to_string(),
            Value::String(notification.title.clone()),
        );
        record.insert("body".to_string(), Value::String(notification.body.clone()));
        if let Some(link) = &notification.link_path {
            record.insert("link_path".to_string(), Value::String(link.clone()));
        }
        if let Some(key) = &notification.dedupe_key {
            record.insert("dedupe_key".to_string(), Value::String(key.clone()));
        }
        record.insert(
            "metadata".to_string(),
            Value::Object(notification.metadata.clone()),
        );

        create_row(pool, "notifications", &record)
            .await
            .map(|_| ())
            .map_err(|error| DispatchError::Store(error.to_string()))
    }

    async fn send_email(&self, notification: &Notification) -> Result<(), DispatchError> {
        let Some(recipient) = notification.recipient_email.as_deref() else {
            return Ok(());
        };
        let Some(api_key) = self.resend_api_key.as_deref() else {
            tracing::debug!(
                event = notification.event.as_str(),
                "RESEND_API_KEY not configured, email skipped"
            );
            return Ok(());
        };

        let response = self
            .http_client
            .post("https://api.resend.com/emails")
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.email_from_address,
                "to": [recipient],
                "subject": notification.title,
                "text": self.email_text(notification),
            }))
            .send()
            .await
            .map_err(|error| DispatchError::Email(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(DispatchError::Email(format!("Resend returned {status}: {detail}")))
    }
}

impl Notifier for PlatformNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        let stored = self.store_in_app(notification).await;
        let mailed = self.send_email(notification).await;
        stored.and(mailed)
    }
}

// ── Message builders ───────────────────────────────────────────────

fn tenant_notification(
    lease: &Lease,
    event: NotificationEvent,
    title: String,
    body: String,
) -> Notification {
    Notification {
        event,
        lease_id: lease.id.clone(),
        recipient_user_id: lease.tenant_user_id.clone(),
        recipient_email: lease.tenant_email.clone(),
        title,
        body,
        link_path: Some(format!("/leases/{}/charges", lease.id)),
        dedupe_key: None,
        metadata: Map::new(),
    }
}

fn greeting(lease: &Lease) -> String {
    match lease.tenant_full_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("Bonjour {name},"),
        _ => "Bonjour,".to_string(),
    }
}

pub fn provision_created(lease: &Lease, provision: &ChargeProvision) -> Notification {
    let expected = provision
        .expected_finalization_date
        .map(|date| format!(" Régularisation définitive prévue le {}.", date.format("%d/%m/%Y")))
        .unwrap_or_default();
    let mut notification = tenant_notification(
        lease,
        NotificationEvent::ProvisionCreated,
        "Provision sur charges retenue sur votre dépôt de garantie".to_string(),
        format!(
            "{}\n\nVotre bailleur retient {} € sur votre dépôt de garantie ({} €) en attendant la régularisation des charges.{expected}",
            greeting(lease),
            provision.provision_amount,
            provision.deposit_amount,
        ),
    );
    notification
        .metadata
        .insert("provision_id".to_string(), json!(provision.id));
    notification
        .metadata
        .insert("provision_amount".to_string(), json!(provision.provision_amount));
    notification
}

pub fn provision_finalized(
    lease: &Lease,
    provision: &ChargeProvision,
    refund_amount: Money,
) -> Notification {
    let outcome = if refund_amount.is_positive() {
        format!(
            "Un remboursement de {refund_amount} € vous est dû au titre de la provision sur charges."
        )
    } else {
        "La provision retenue couvre intégralement votre quote-part de charges : aucun remboursement n'est dû.".to_string()
    };
    let mut notification = tenant_notification(
        lease,
        NotificationEvent::ProvisionFinalized,
        "Régularisation définitive de la provision sur charges".to_string(),
        format!(
            "{}\n\nLa provision de {} € a été soldée après régularisation des charges.\n{outcome}",
            greeting(lease),
            provision.provision_amount,
        ),
    );
    notification
        .metadata
        .insert("provision_id".to_string(), json!(provision.id));
    notification
        .metadata
        .insert("refund_amount".to_string(), json!(refund_amount));
    notification
}

pub fn regularization_sent(lease: &Lease, regularization: &Regularization) -> Notification {
    let figures = &regularization.figures;
    let outcome = if figures.balance.is_positive() {
        format!("Solde en votre faveur : {} €.", figures.balance)
    } else if figures.balance.is_negative() {
        format!("Complément à régler : {} €.", figures.balance.abs())
    } else {
        "Aucun solde à régler.".to_string()
    };
    let mut notification = tenant_notification(
        lease,
        NotificationEvent::RegularizationSent,
        format!("Régularisation des charges {}", figures.year),
        format!(
            "{}\n\nVotre décompte de régularisation des charges {} est disponible.\nProvisions versées : {} €. Quote-part des charges récupérables : {} €.\n{outcome}",
            greeting(lease),
            figures.year,
            figures.total_provisions_collected,
            figures.tenant_share,
        ),
    );
    notification
        .metadata
        .insert("regularization_id".to_string(), json!(regularization.id));
    if let Some(path) = &regularization.document_path {
        notification
            .metadata
            .insert("document_path".to_string(), json!(path));
    }
    notification
}

pub fn regularization_finalized(lease: &Lease, regularization: &Regularization) -> Notification {
    let mut notification = tenant_notification(
        lease,
        NotificationEvent::RegularizationFinalized,
        format!("Régularisation des charges {} clôturée", regularization.figures.year),
        format!(
            "{}\n\nLa régularisation des charges {} est définitive. Solde : {} €.",
            greeting(lease),
            regularization.figures.year,
            regularization.figures.balance,
        ),
    );
    notification
        .metadata
        .insert("regularization_id".to_string(), json!(regularization.id));
    notification
}

/// Reminder to the owner, deduplicated per provision and day.
pub fn provision_finalization_due(
    lease: &Lease,
    provision: &ChargeProvision,
    today: NaiveDate,
) -> Notification {
    let due = provision
        .expected_finalization_date
        .unwrap_or(today)
        .format("%d/%m/%Y");
    let mut metadata = Map::new();
    metadata.insert("provision_id".to_string(), json!(provision.id));
    metadata.insert(
        "reminded_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    Notification {
        event: NotificationEvent::ProvisionFinalizationDue,
        lease_id: lease.id.clone(),
        recipient_user_id: Some(lease.owner_user_id.clone()),
        recipient_email: None,
        title: "Provision sur charges à régulariser".to_string(),
        body: format!(
            "La provision de {} € retenue sur le dépôt de garantie devait être régularisée le {due}. Finalisez-la avec la régularisation des charges.",
            provision.provision_amount
        ),
        link_path: Some(format!("/leases/{}/charges", lease.id)),
        dedupe_key: Some(format!("provision_due:{}:{today}", provision.id)),
        metadata,
    }
}
