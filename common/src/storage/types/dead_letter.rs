use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// A row quarantined by the sink writer's bisection-retry algorithm: it
/// could not be committed after narrowing the failing batch down to the
/// single offending row. Never committed to `work_order`, so replay is just
/// re-running backfill over a narrowed range.
stored_object!(DeadLetter, "dead_letter", {
    source_table: String,
    source_identity: String,
    sink_error_code: String,
    sink_error_message: String,
    raw_payload: serde_json::Value,
    quarantined_at: DateTime<Utc>
});

impl DeadLetter {
    #[must_use]
    pub fn new(
        source_table: String,
        source_identity: String,
        sink_error_code: String,
        sink_error_message: String,
        raw_payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_table,
            source_identity,
            sink_error_code,
            sink_error_message,
            raw_payload,
            quarantined_at: now,
        }
    }

    pub async fn record(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self.clone()).await.map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn count_for_table(
        source_table: &str,
        db: &SurrealDbClient,
    ) -> Result<u64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: u64,
        }

        let mut response = db
            .client
            .query(
                "SELECT count() AS count FROM type::table($table) \
                 WHERE source_table = $source_table GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("source_table", source_table.to_owned()))
            .await
            .map_err(AppError::Database)?;

        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().next().map_or(0, |r| r.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn quarantined_rows_are_counted_per_source_table() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        DeadLetter::new(
            "orders".to_string(),
            "bad-1".to_string(),
            "23502".to_string(),
            "null value in column notified_at".to_string(),
            json!({"raw": "row"}),
        )
        .record(&db)
        .await
        .expect("record dead letter");

        let count = DeadLetter::count_for_table("orders", &db)
            .await
            .expect("count_for_table");
        assert_eq!(count, 1);
    }
}
