use surrealdb::RecordId;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Semantic embedding for a work order, stored in its own table rather than
/// inline, so re-embedding a row never rewrites `work_order` itself.
stored_object!(Embedding, "embedding", {
    work_order_id: RecordId,
    model: String,
    model_version: String,
    vector: Vec<f32>
});

impl Embedding {
    #[must_use]
    pub fn new(work_order_id: &str, model: String, model_version: String, vector: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            work_order_id: RecordId::from_table_key("work_order", work_order_id),
            model,
            model_version,
            vector,
        }
    }

    /// Store the embedding for a work order. Overwrites any embedding
    /// already present for that work order, since re-embedding on a model
    /// bump replaces rather than appends.
    pub async fn upsert_for_work_order(
        work_order_id: &str,
        model: String,
        model_version: String,
        vector: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if let Some(existing) = Self::get_by_work_order_id(
            &RecordId::from_table_key("work_order", work_order_id),
            db,
        )
        .await?
        {
            db.delete_item::<Self>(&existing.id)
                .await
                .map_err(AppError::Database)?;
        }

        let embedding = Self::new(work_order_id, model, model_version, vector);
        db.store_item(embedding).await.map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn get_by_work_order_id(
        work_order_id: &RecordId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE work_order_id = $id LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("id", work_order_id.clone()))
            .await
            .map_err(AppError::Database)?;
        let rows: Vec<Self> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().next())
    }

    /// Cosine-similarity vector search over embeddings, fetching the owning work order.
    pub async fn vector_search(
        query_vector: Vec<f32>,
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<(RecordId, f32)>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            work_order_id: RecordId,
            score: f32,
        }

        let sql = format!(
            "SELECT work_order_id, vector::similarity::cosine(vector, $query) AS score \
             FROM {table} \
             WHERE vector <|{take},100|> $query \
             ORDER BY score DESC \
             LIMIT {take};",
            table = Self::table_name(),
        );

        let mut response = db
            .client
            .query(sql)
            .bind(("query", query_vector))
            .await
            .map_err(AppError::Database)?;
        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;

        Ok(rows.into_iter().map(|r| (r.work_order_id, r.score)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn upsert_replaces_existing_embedding() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        Embedding::upsert_for_work_order(
            "order-1",
            "text-embed".to_string(),
            "v1".to_string(),
            vec![0.1, 0.2, 0.3],
            &db,
        )
        .await
        .expect("first upsert");

        Embedding::upsert_for_work_order(
            "order-1",
            "text-embed".to_string(),
            "v2".to_string(),
            vec![0.4, 0.5, 0.6],
            &db,
        )
        .await
        .expect("second upsert");

        let rid = RecordId::from_table_key("work_order", "order-1");
        let stored = Embedding::get_by_work_order_id(&rid, &db)
            .await
            .expect("fetch")
            .expect("embedding present");
        assert_eq!(stored.model_version, "v2");
        assert_eq!(stored.vector, vec![0.4, 0.5, 0.6]);
    }
}
