use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// A single work order row read from the source warehouse, scrubbed of PII
/// and ready for AI enrichment and downstream consumption.
///
/// The record id is derived from `(source_table, source_identity)` so
/// re-processing the same source row is idempotent: upserting twice with the
/// same identity overwrites rather than duplicates.
stored_object!(WorkOrder, "work_order", {
    source_table: String,
    source_identity: String,
    /// The watermark column value used for `(watermark, identity)` total ordering.
    watermark: DateTime<Utc>,
    facility_id: String,
    order_type: String,
    status: String,
    /// PII-scrubbed row payload.
    payload: serde_json::Value
});

impl WorkOrder {
    #[must_use]
    pub fn new(
        source_table: String,
        source_identity: String,
        watermark: DateTime<Utc>,
        facility_id: String,
        order_type: String,
        status: String,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::record_key(&source_table, &source_identity),
            created_at: now,
            updated_at: now,
            source_table,
            source_identity,
            watermark,
            facility_id,
            order_type,
            status,
            payload,
        }
    }

    /// Deterministic record key for a source row, used as the upsert target.
    #[must_use]
    pub fn record_key(source_table: &str, source_identity: &str) -> String {
        format!("{source_table}__{source_identity}")
    }

    /// Idempotent upsert: re-applying the same row is a no-op beyond
    /// `updated_at`. `CONTENT $order` replaces the whole record, so
    /// `created_at` is carried forward from the existing row (if any)
    /// rather than re-stamped from `self`.
    pub async fn upsert(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let mut order = self.clone();
        if let Some(existing) =
            Self::find_by_identity(&order.source_table, &order.source_identity, db).await?
        {
            order.created_at = existing.created_at;
        }
        order.updated_at = Utc::now();

        db.client
            .query("UPSERT type::thing($table, $id) CONTENT $order")
            .bind(("table", Self::table_name()))
            .bind(("id", order.id.clone()))
            .bind(("order", order))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn find_by_identity(
        source_table: &str,
        source_identity: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        db.get_item(&Self::record_key(source_table, source_identity))
            .await
            .map_err(AppError::Database)
    }

    /// Highest watermark committed so far for a source table, used to resume
    /// incremental sync after a restart.
    pub async fn max_watermark(
        source_table: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            watermark: DateTime<Utc>,
        }

        let mut response = db
            .client
            .query(
                "SELECT watermark FROM type::table($table) \
                 WHERE source_table = $source_table \
                 ORDER BY watermark DESC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("source_table", source_table.to_owned()))
            .await
            .map_err(AppError::Database)?;

        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().next().map(|r| r.watermark))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_order(identity: &str, watermark: DateTime<Utc>) -> WorkOrder {
        WorkOrder::new(
            "orders".to_string(),
            identity.to_string(),
            watermark,
            "facility-1".to_string(),
            "lab".to_string(),
            "open".to_string(),
            json!({ "notes": "redacted" }),
        )
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_identity() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let order = sample_order("abc-1", Utc::now());
        order.upsert(&db).await.expect("first upsert");
        order.upsert(&db).await.expect("second upsert");

        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE source_identity = $id")
            .bind(("table", WorkOrder::table_name()))
            .bind(("id", "abc-1"))
            .await
            .expect("query");
        let rows: Vec<WorkOrder> = response.take(0).expect("take");
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn upsert_preserves_created_at_on_resubmission() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let order = sample_order("abc-1", Utc::now());
        let original_created_at = order.created_at;
        order.upsert(&db).await.expect("first upsert");

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        order.upsert(&db).await.expect("second upsert");

        let stored = WorkOrder::find_by_identity("orders", "abc-1", &db)
            .await
            .expect("lookup")
            .expect("row exists");
        assert_eq!(stored.created_at, original_created_at);
        assert!(stored.updated_at >= original_created_at);
    }

    #[tokio::test]
    async fn max_watermark_picks_the_latest_row() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let earlier = Utc::now() - chrono::Duration::hours(1);
        let later = Utc::now();

        sample_order("abc-1", earlier)
            .upsert(&db)
            .await
            .expect("upsert earlier");
        sample_order("abc-2", later)
            .upsert(&db)
            .await
            .expect("upsert later");

        let max = WorkOrder::max_watermark("orders", &db)
            .await
            .expect("max watermark")
            .expect("some watermark");
        assert_eq!(max.timestamp_millis(), later.timestamp_millis());
    }
}
