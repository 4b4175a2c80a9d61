//! Config document persistence.
//!
//! The YAML file on disk seeds a single stored document; on every start
//! the two are merged, disk winning for non-empty values, and the merged
//! result is written back. This lets operators blank a field on disk and
//! keep the last known good value from the store.

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::domain::error::StoreError;
use crate::domain::models::config::Config;

/// Load the stored config document, if any.
pub async fn load(pool: &SqlitePool) -> Result<Option<Value>, StoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT document FROM config_document WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    match row {
        Some((document,)) => Ok(Some(serde_json::from_str(&document)?)),
        None => Ok(None),
    }
}

/// Replace the stored config document.
pub async fn save(pool: &SqlitePool, document: &Value) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO config_document (id, document) VALUES (1, ?1)
         ON CONFLICT (id) DO UPDATE SET document = excluded.document",
    )
    .bind(document.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete the stored config document.
pub async fn clear(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM config_document").execute(pool).await?;
    Ok(())
}

/// Merge the disk config with the stored document and persist the
/// result. Store failures are logged and the disk config wins outright.
pub async fn sync_with_store(pool: &SqlitePool, disk: Config) -> Config {
    let disk_value = match serde_json::to_value(&disk) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "config not serializable, using disk config as-is");
            return disk;
        }
    };

    let merged_value = match load(pool).await {
        Ok(Some(stored)) => {
            debug!("merging disk config with stored document");
            merge(&disk_value, &stored)
        }
        Ok(None) => {
            debug!("no config document found in store");
            disk_value
        }
        Err(e) => {
            warn!(error = %e, "loading config from store failed");
            disk_value
        }
    };

    if let Err(e) = save(pool, &merged_value).await {
        warn!(error = %e, "posting config to the store failed");
    }

    match serde_json::from_value(merged_value) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "merged config invalid, using disk config");
            disk
        }
    }
}

/// True for values the merge treats as "not set on disk".
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_i64() == Some(0) || n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) => false,
    }
}

/// Recursive merge: disk wins wherever it carries a non-empty value,
/// the stored document fills the gaps.
fn merge(disk: &Value, stored: &Value) -> Value {
    match (disk, stored) {
        (Value::Object(disk_map), Value::Object(stored_map)) => {
            let mut merged = serde_json::Map::new();
            for (key, disk_value) in disk_map {
                match stored_map.get(key) {
                    Some(stored_value) => {
                        merged.insert(key.clone(), merge(disk_value, stored_value));
                    }
                    None => {
                        merged.insert(key.clone(), disk_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        _ if is_empty(disk) && !is_empty(stored) => stored.clone(),
        _ => disk.clone(),
    }
}
