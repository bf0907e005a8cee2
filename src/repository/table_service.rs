use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "audit_logs",
    "charge_provisions",
    "charge_regularizations",
    "deposit_retentions",
    "leases",
    "notifications",
    "rent_receipts",
];

const MAX_PAGE_SIZE: i64 = 1000;

/// Rows of `table` as JSON objects. Filter keys are column names with an
/// optional `__gt`, `__gte`, `__lt` or `__lte` suffix; null values are skipped.
pub async fn list_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = match order_by.trim() {
        "" => "created_at",
        column => validate_identifier(column)?,
    };

    let mut query = select_rows(table_name);
    if let Some(filters) = filters {
        push_filters(&mut query, filters)?;
    }
    query
        .push(" ORDER BY t.")
        .push(order_name)
        .push(if ascending { " ASC" } else { " DESC" })
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, MAX_PAGE_SIZE));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(rows.into_iter().filter_map(json_column).collect())
}

pub async fn get_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let mut query = select_rows(table_name);
    push_id_clause(&mut query, id_field, row_id)?;
    query.push(" LIMIT 1");

    fetch_json_row(pool, query)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let columns = payload_columns(payload)?;
    if columns.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    // jsonb_populate_record lets PostgreSQL resolve column types (uuid,
    // numeric, date, jsonb) from the table definition.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push(*column);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push("r.");
            separated.push_unseparated(*column);
        }
    }
    push_record_source(&mut query, table_name, payload);
    query
        .push(" RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    fetch_json_row(pool, query)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    update_row_where(pool, table, row_id, id_field, &Map::new(), payload)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} record not found.", table.trim())))
}

/// Update the row only while it still matches `guard`. `None` means no row
/// matched, either because it is gone or because the guard no longer holds.
pub async fn update_row_where(
    pool: &PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
    guard: &Map<String, Value>,
    payload: &Map<String, Value>,
) -> Result<Option<Value>, AppError> {
    let query = build_update(table, row_id, id_field, guard, payload)?;
    fetch_json_row(pool, query).await
}

pub async fn count_rows(
    pool: &PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;
    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    if let Some(filters) = filters {
        push_filters(&mut query, filters)?;
    }

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    row.try_get::<i64, _>("total").map_err(map_db_error)
}

fn select_rows(table_name: &str) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    query
}

fn build_update(
    table: &str,
    row_id: &str,
    id_field: &str,
    guard: &Map<String, Value>,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'static, Postgres>, AppError> {
    let table_name = validate_table(table)?;
    let columns = payload_columns(payload)?;
    if columns.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push(*column);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*column);
        }
    }
    push_record_source(&mut query, table_name, payload);
    query.push(" WHERE 1=1");
    push_id_clause(&mut query, id_field, row_id)?;
    push_filters(&mut query, guard)?;
    query.push(" RETURNING row_to_json(t) AS row");
    Ok(query)
}

fn push_record_source(
    query: &mut QueryBuilder<'_, Postgres>,
    table_name: &str,
    payload: &Map<String, Value>,
) {
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ")
        .push_bind(Value::Object(payload.clone()))
        .push(") r");
}

fn payload_columns(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut columns = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    columns.sort_unstable();
    Ok(columns)
}

async fn fetch_json_row(
    pool: &PgPool,
    mut query: QueryBuilder<'_, Postgres>,
) -> Result<Option<Value>, AppError> {
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;
    Ok(row.and_then(json_column))
}

fn json_column(row: PgRow) -> Option<Value> {
    row.try_get::<Option<Value>, _>("row").ok().flatten()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    let well_formed = trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_')
        && trimmed.chars().all(|character| {
            character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
        });
    if well_formed {
        Ok(trimmed)
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Gt => " > ",
            Self::Gte => " >= ",
            Self::Lt => " < ",
            Self::Lte => " <= ",
        }
    }
}

/// Bound value with the SQL type inferred from the column name.
#[derive(Debug, Clone, PartialEq)]
enum FilterValue {
    Text(String),
    Uuid(Uuid),
    Int(i64),
    Date(NaiveDate),
}

fn parse_filter_key(filter_key: &str) -> Result<(&str, Comparison), AppError> {
    let (column, comparison) = match filter_key.rsplit_once("__") {
        Some((column, "gt")) => (column, Comparison::Gt),
        Some((column, "gte")) => (column, Comparison::Gte),
        Some((column, "lt")) => (column, Comparison::Lt),
        Some((column, "lte")) => (column, Comparison::Lte),
        _ => (filter_key, Comparison::Eq),
    };
    Ok((validate_identifier(column)?, comparison))
}

fn push_filters(
    query: &mut QueryBuilder<'_, Postgres>,
    filters: &Map<String, Value>,
) -> Result<(), AppError> {
    for (key, value) in filters {
        if value.is_null() {
            continue;
        }
        let (column, comparison) = parse_filter_key(key)?;
        let value = infer_filter_value(column, value).ok_or_else(|| {
            AppError::BadRequest(format!("Filter '{key}' needs a scalar value."))
        })?;
        push_comparison(query, column, comparison, value);
    }
    Ok(())
}

fn push_id_clause(
    query: &mut QueryBuilder<'_, Postgres>,
    id_field: &str,
    row_id: &str,
) -> Result<(), AppError> {
    let column = validate_identifier(id_field)?;
    let value = infer_filter_value(column, &Value::String(row_id.to_string()))
        .unwrap_or_else(|| FilterValue::Text(row_id.to_string()));
    push_comparison(query, column, Comparison::Eq, value);
    Ok(())
}

fn push_comparison(
    query: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    comparison: Comparison,
    value: FilterValue,
) {
    query.push(" AND t.").push(column);
    match value {
        FilterValue::Text(text) => {
            query.push("::text").push(comparison.sql()).push_bind(text);
        }
        FilterValue::Uuid(id) => {
            query.push(comparison.sql()).push_bind(id);
        }
        FilterValue::Int(number) => {
            query.push(comparison.sql()).push_bind(number);
        }
        FilterValue::Date(date) => {
            query.push(comparison.sql()).push_bind(date);
        }
    }
}

fn infer_filter_value(column: &str, value: &Value) -> Option<FilterValue> {
    match value {
        Value::Number(number) => Some(
            number
                .as_i64()
                .map(FilterValue::Int)
                .unwrap_or_else(|| FilterValue::Text(number.to_string())),
        ),
        Value::Bool(flag) => Some(FilterValue::Text(flag.to_string())),
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_column(column) {
                if let Ok(id) = Uuid::parse_str(trimmed) {
                    return Some(FilterValue::Uuid(id));
                }
            }
            if is_date_column(column) {
                if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return Some(FilterValue::Date(date));
                }
            }
            Some(FilterValue::Text(trimmed.to_string()))
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn is_uuid_column(column: &str) -> bool {
    column == "id" || column.ends_with("_id")
}

fn is_date_column(column: &str) -> bool {
    ["_date", "_on", "_start", "_end"]
        .iter()
        .any(|suffix| column.ends_with(suffix))
}

fn map_db_error(error: sqlx::Error) -> AppError {
    if let Some(db_error) = error.as_database_error() {
        if db_error.is_unique_violation() {
            tracing::warn!(
                constraint = db_error.constraint().unwrap_or_default(),
                "Unique constraint rejected write"
            );
            return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
        }
    }
    tracing::error!(db_error = %error, "Database query failed");
    AppError::Dependency("Database operation failed.".to_string())
}
