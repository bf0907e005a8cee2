use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Append an audit row. Failures are logged and ignored.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    lease_id: Option<&str>,
    actor_user_id: Option<&str>,
    action: &str,
    entity_name: &str,
    entity_id: Option<&str>,
    before_state: Option<Value>,
    after_state: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut record = Map::new();
    if let Some(lease_id) = lease_id {
        record.insert("lease_id".to_string(), Value::String(lease_id.to_string()));
    }
    if let Some(actor) = actor_user_id {
        record.insert(
            "actor_user_id".to_string(),
            Value::String(actor.to_string()),
        );
    }
    record.insert("action".to_string(), Value::String(action.to_string()));
    record.insert(
        "entity_name".to_string(),
        Value::String(entity_name.to_string()),
    );
    if let Some(entity_id) = entity_id {
        record.insert("entity_id".to_string(), Value::String(entity_id.to_string()));
    }
    if let Some(before) = before_state {
        record.insert("before_state".to_string(), before);
    }
    if let Some(after) = after_state {
        record.insert("after_state".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &record).await {
        tracing::warn!(%error, action, entity_name, "Audit log write failed");
    }
}
