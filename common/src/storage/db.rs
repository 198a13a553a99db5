use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{future::BoxFuture, Stream};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Notification, Surreal,
};
use tokio_retry::RetryIf;
use tracing::warn;

use super::types::{work_order::WorkOrder, StoredObject};
use crate::error::{AppError, ErrorKind, SinkError};
use crate::resilience::{backoff::BackoffPolicy, circuit_breaker::CircuitBreaker};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
    circuit_breaker: Arc<CircuitBreaker>,
    backoff_policy: BackoffPolicy,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient {
            client: db,
            circuit_breaker: Arc::new(CircuitBreaker::new("sink", 5, Duration::from_secs(60))),
            backoff_policy: BackoffPolicy::default(),
        })
    }

    pub async fn ensure_initialized(&self, embedding_dimension: usize) -> Result<(), AppError> {
        Self::build_indexes(self)
            .await
            .map_err(AppError::Database)?;
        super::indexes::ensure_runtime_indexes(self, embedding_dimension).await?;
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_work_order_table_identity ON work_order \
                 FIELDS source_table, source_identity UNIQUE;",
            )
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_work_order_watermark ON work_order FIELDS source_table, watermark;")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_work_order_status ON work_order FIELDS status;")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_ai_extraction_work_order ON ai_extraction FIELDS work_order_id;")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_dead_letter_source ON dead_letter FIELDS source_table, source_identity;")
            .await?;

        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, Error>>, Error>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        self.client.select(T::table_name()).live().await
    }

    /// Upsert a batch of work orders. A transient sink failure (deadlock,
    /// serialization conflict, connection reset) retries the whole batch on
    /// `backoff_policy`'s schedule rather than bisecting it; bisection is
    /// reserved for constraint violations, which retrying cannot fix.
    /// Preserves each row's original `created_at` so re-upserting an
    /// unchanged row is idempotent up to `updated_at`.
    pub async fn upsert_work_order_batch(
        &self,
        orders: Vec<WorkOrder>,
    ) -> Result<BatchOutcome, AppError> {
        let orders = self.preserve_created_at(orders).await?;
        self.upsert_batch_with_retry(orders).await
    }

    /// Reads each order's currently stored row (if any) and carries its
    /// `created_at` forward, stamping `updated_at` to now. A row with no
    /// existing counterpart is left as-is (first upsert sets both).
    async fn preserve_created_at(
        &self,
        mut orders: Vec<WorkOrder>,
    ) -> Result<Vec<WorkOrder>, AppError> {
        for order in &mut orders {
            // TODO: batch this into a single SELECT ... WHERE id IN $ids
            // lookup instead of one query per row.
            if let Some(existing) = self
                .get_item::<WorkOrder>(&order.id)
                .await
                .map_err(AppError::Database)?
            {
                order.created_at = existing.created_at;
            }
            order.updated_at = Utc::now();
        }
        Ok(orders)
    }

    async fn upsert_batch_with_retry(&self, orders: Vec<WorkOrder>) -> Result<BatchOutcome, AppError> {
        if orders.is_empty() {
            return Ok(BatchOutcome::default());
        }

        if !self.circuit_breaker.allow_call() {
            return Err(AppError::Sink(SinkError::Transient(
                "circuit breaker open for sink, batch upsert skipped".to_string(),
            )));
        }

        let result = RetryIf::spawn(
            self.backoff_policy.strategy(),
            || self.try_upsert_transaction(&orders),
            |err: &AppError| err.kind() == ErrorKind::Transient,
        )
        .await;

        match result {
            Ok(()) => {
                self.circuit_breaker.record_success();
                Ok(BatchOutcome {
                    committed: orders.len(),
                    quarantined: Vec::new(),
                })
            }
            Err(err) if err.kind() == ErrorKind::Data => {
                self.circuit_breaker.record_success();
                self.upsert_batch_inner(orders).await
            }
            Err(err) => {
                self.circuit_breaker.record_failure();
                warn!(error = %err, "sink batch upsert exhausted retries, aborting run");
                Err(AppError::InternalError(format!(
                    "sink batch upsert failed after exhausting retries: {err}"
                )))
            }
        }
    }

    /// Bisects `orders` and retries each half until a constraint-violating
    /// row is isolated, then quarantines that row as a dead letter and
    /// continues with the rest. Only reached once a batch has already been
    /// classified as a constraint (not transient) failure.
    fn upsert_batch_inner(
        &self,
        orders: Vec<WorkOrder>,
    ) -> BoxFuture<'_, Result<BatchOutcome, AppError>> {
        Box::pin(async move {
            if orders.is_empty() {
                return Ok(BatchOutcome::default());
            }

            match self.try_upsert_transaction(&orders).await {
                Ok(()) => Ok(BatchOutcome {
                    committed: orders.len(),
                    quarantined: Vec::new(),
                }),
                Err(err) if orders.len() == 1 => {
                    let Some(order) = orders.into_iter().next() else {
                        return Ok(BatchOutcome::default());
                    };
                    warn!(
                        source_table = %order.source_table,
                        source_identity = %order.source_identity,
                        error = %err,
                        "quarantining row that failed to commit in isolation"
                    );
                    let dead_letter = super::types::dead_letter::DeadLetter::new(
                        order.source_table.clone(),
                        order.source_identity.clone(),
                        sink_error_code(&err),
                        err.to_string(),
                        order.payload.clone(),
                    );
                    dead_letter.record(self).await?;
                    Ok(BatchOutcome {
                        committed: 0,
                        quarantined: vec![order],
                    })
                }
                Err(_) => {
                    let mid = orders.len() / 2;
                    let mut iter = orders.into_iter();
                    let left: Vec<_> = iter.by_ref().take(mid).collect();
                    let right: Vec<_> = iter.collect();

                    let left_outcome = self.upsert_batch_inner(left).await?;
                    let right_outcome = self.upsert_batch_inner(right).await?;
                    Ok(left_outcome.merge(right_outcome))
                }
            }
        })
    }

    async fn try_upsert_transaction(&self, orders: &[WorkOrder]) -> Result<(), AppError> {
        let query = "
            BEGIN TRANSACTION;
            FOR $order IN $orders {
                UPSERT type::thing('work_order', $order.id) CONTENT $order;
            };
            COMMIT TRANSACTION;
        ";

        self.client
            .query(query)
            .bind(("orders", orders.to_vec()))
            .await
            .map_err(|e| AppError::Sink(classify_sink_error(&e)))?
            .check()
            .map_err(|e| AppError::Sink(classify_sink_error(&e)))?;

        Ok(())
    }
}

/// Best-effort classification of a SurrealDB error string into the sink's
/// constraint/transient taxonomy; SurrealDB does not expose typed
/// constraint-violation codes the way a SQL sink would. A unique-index hit
/// is a constraint violation (retrying the same batch cannot fix it);
/// everything else is treated as transient and worth retrying.
fn classify_sink_error(err: &surrealdb::Error) -> SinkError {
    let message = err.to_string();
    if message.contains("already contains") || message.contains("UNIQUE") {
        SinkError::Constraint {
            code: "unique_constraint".to_string(),
            message,
        }
    } else {
        SinkError::Transient(message)
    }
}

/// Dead-letter error code for a sink failure, derived from the same
/// classification `try_upsert_transaction` uses.
fn sink_error_code(err: &AppError) -> String {
    match err {
        AppError::Sink(SinkError::Constraint { code, .. }) => code.clone(),
        _ => "transaction_failed".to_string(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    pub committed: usize,
    pub quarantined: Vec<WorkOrder>,
}

impl BatchOutcome {
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.committed += other.committed;
        self.quarantined.extend(other.quarantined);
        self
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient {
            client: db,
            circuit_breaker: Arc::new(CircuitBreaker::new("sink", 5, Duration::from_secs(60))),
            backoff_policy: BackoffPolicy::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_basic_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));

        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_build_indexes() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.build_indexes().await.expect("Failed to build indexes");
    }

    #[tokio::test]
    async fn upsert_batch_commits_all_valid_rows() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let orders = vec![
            WorkOrder::new(
                "orders".to_string(),
                "a".to_string(),
                Utc::now(),
                "facility-1".to_string(),
                "lab".to_string(),
                "open".to_string(),
                serde_json::json!({}),
            ),
            WorkOrder::new(
                "orders".to_string(),
                "b".to_string(),
                Utc::now(),
                "facility-1".to_string(),
                "lab".to_string(),
                "open".to_string(),
                serde_json::json!({}),
            ),
        ];

        let outcome = db
            .upsert_work_order_batch(orders)
            .await
            .expect("batch upsert");
        assert_eq!(outcome.committed, 2);
        assert!(outcome.quarantined.is_empty());
    }

    #[tokio::test]
    async fn upsert_batch_preserves_created_at_on_resubmission() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let order = WorkOrder::new(
            "orders".to_string(),
            "a".to_string(),
            Utc::now(),
            "facility-1".to_string(),
            "lab".to_string(),
            "open".to_string(),
            serde_json::json!({}),
        );
        let original_created_at = order.created_at;

        db.upsert_work_order_batch(vec![order.clone()])
            .await
            .expect("first batch upsert");

        // Resubmit the same row unchanged after a moment passes.
        tokio::time::sleep(Duration::from_millis(5)).await;
        db.upsert_work_order_batch(vec![order])
            .await
            .expect("second batch upsert");

        let stored = db
            .get_item::<WorkOrder>("orders__a")
            .await
            .expect("fetch")
            .expect("row exists");
        assert_eq!(stored.created_at, original_created_at);
        assert!(stored.updated_at >= original_created_at);
    }
}
