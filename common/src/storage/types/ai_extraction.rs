use surrealdb::RecordId;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Structured output of an AI enrichment call for a single work order, plus
/// the token/cost accounting needed for budget gating (spec §4.7).
stored_object!(AiExtraction, "ai_extraction", {
    work_order_id: RecordId,
    model: String,
    extracted: serde_json::Value,
    prompt_tokens: u32,
    completion_tokens: u32,
    cost_usd: f64
});

impl AiExtraction {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        work_order_id: &str,
        model: String,
        extracted: serde_json::Value,
        prompt_tokens: u32,
        completion_tokens: u32,
        cost_usd: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            work_order_id: RecordId::from_table_key("work_order", work_order_id),
            model,
            extracted,
            prompt_tokens,
            completion_tokens,
            cost_usd,
        }
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

    /// Sum of cost spent on AI calls since `since`, used by the budget gate.
    pub async fn spend_since(
        since: chrono::DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<f64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            total: f64,
        }

        let mut response = db
            .client
            .query(
                "SELECT math::sum(cost_usd) AS total FROM type::table($table) \
                 WHERE created_at >= $since GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("since", since))
            .await
            .map_err(AppError::Database)?;

        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;
        Ok(rows.into_iter().next().map_or(0.0, |r| r.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn spend_since_sums_recent_costs() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let extraction = AiExtraction::new(
            "order-1",
            "gpt-test".to_string(),
            json!({"diagnosis": "n/a"}),
            120,
            40,
            0.0032,
        );
        db.store_item(extraction).await.expect("store extraction");

        let total = AiExtraction::spend_since(Utc::now() - chrono::Duration::hours(1), &db)
            .await
            .expect("spend_since");
        assert!((total - 0.0032).abs() < f64::EPSILON);
    }
}
