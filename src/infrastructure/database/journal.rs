//! The append-only lifecycle journal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::error;

use crate::domain::error::StoreError;
use crate::domain::models::journal::JournalType;
use crate::domain::ports::{Journal, LocationSource};

const ISO8601_SECONDS: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Journal writing to the `journal` table.
///
/// Every write is best-effort: a failure is logged and swallowed so the
/// pipeline never blocks on the journal. When a location source is
/// attached, each entry is decorated with a VM-to-hypervisor snapshot.
pub struct SqliteJournal {
    pool: SqlitePool,
    location: Option<Arc<dyn LocationSource>>,
}

impl SqliteJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            location: None,
        }
    }

    /// Attach a best-effort location source for entry decoration.
    pub fn with_location_source(mut self, location: Arc<dyn LocationSource>) -> Self {
        self.location = Some(location);
        self
    }

    async fn insert(
        &self,
        log_type: JournalType,
        stack_id: &str,
        details: &Value,
        location: Option<&Value>,
    ) -> Result<(), StoreError> {
        let timestamp = Utc::now().format(ISO8601_SECONDS).to_string();
        sqlx::query(
            "INSERT INTO journal (log_stackid, log_timestamp, log_type, log_details, log_location)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(stack_id)
        .bind(&timestamp)
        .bind(log_type.as_str())
        .bind(details.to_string())
        .bind(location.map(Value::to_string))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Journal for SqliteJournal {
    async fn append(&self, log_type: JournalType, stack_id: &str, details: Value) {
        let location = match &self.location {
            Some(source) => source.stack_location(stack_id).await,
            None => None,
        };

        if let Err(e) = self
            .insert(log_type, stack_id, &details, location.as_ref())
            .await
        {
            error!(log_type = log_type.as_str(), error = %e, "posting to journal failed");
        }
    }
}

/// Delete every journal entry.
pub async fn clear_journal(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM journal").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::DatabaseConnection;
    use serde_json::json;

    #[derive(sqlx::FromRow)]
    struct Row {
        log_stackid: String,
        log_type: String,
        log_details: String,
        log_location: Option<String>,
    }

    async fn rows(pool: &SqlitePool) -> Vec<Row> {
        sqlx::query_as::<_, Row>(
            "SELECT log_stackid, log_type, log_details, log_location FROM journal ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn appends_entries_with_timestamp_and_details() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let journal = SqliteJournal::new(db.pool().clone());

        journal
            .append(
                JournalType::EventReceived,
                "stack-1",
                json!({"name": "overload"}),
            )
            .await;

        let rows = rows(db.pool()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].log_stackid, "stack-1");
        assert_eq!(rows[0].log_type, "event_received");
        let details: Value = serde_json::from_str(&rows[0].log_details).unwrap();
        assert_eq!(details["name"], "overload");
        assert!(rows[0].log_location.is_none());
    }

    struct FixedLocation;

    #[async_trait]
    impl LocationSource for FixedLocation {
        async fn stack_location(&self, _stack_id: &str) -> Option<Value> {
            Some(json!({"vm-1": "host-a"}))
        }
    }

    #[tokio::test]
    async fn entries_are_decorated_with_location() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let journal =
            SqliteJournal::new(db.pool().clone()).with_location_source(Arc::new(FixedLocation));

        journal
            .append(JournalType::AdaptationStarted, "stack-1", json!({}))
            .await;

        let rows = rows(db.pool()).await;
        let location: Value = serde_json::from_str(rows[0].log_location.as_ref().unwrap()).unwrap();
        assert_eq!(location["vm-1"], "host-a");
    }

    #[tokio::test]
    async fn clear_journal_empties_the_table() {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let journal = SqliteJournal::new(db.pool().clone());

        journal
            .append(JournalType::EventReceived, "s", json!({}))
            .await;
        clear_journal(db.pool()).await.unwrap();

        assert!(rows(db.pool()).await.is_empty());
    }
}
