use chrono::Duration as ChronoDuration;

use crate::{error::AppError, error::MetadataError, storage::db::SurrealDbClient, stored_object};

/// Default lease duration for a table claimed by a sync/backfill run.
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Per-table watermark and lease state, keyed by table name rather than by
/// task id: one row per source table, not one row per job run.
stored_object!(EtlMetadata, "etl_metadata", {
    table_name: String,
    last_watermark: DateTime<Utc>,
    last_identity: String,
    leased_by: Option<String>,
    leased_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>
});

impl EtlMetadata {
    #[must_use]
    pub fn new(table_name: String, initial_watermark: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: table_name.clone(),
            created_at: now,
            updated_at: now,
            table_name,
            last_watermark: initial_watermark,
            last_identity: String::new(),
            leased_by: None,
            leased_at: None,
            lease_expires_at: None,
        }
    }

    /// Fetch the metadata row for a table, creating one at the epoch
    /// watermark if this is the table's first sync (cold start).
    pub async fn get_or_create(
        table_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(existing) = db.get_item::<Self>(table_name).await? {
            return Ok(existing);
        }

        let fresh = Self::new(table_name.to_string(), DateTime::<Utc>::UNIX_EPOCH);
        db.store_item(fresh.clone()).await?;
        Ok(fresh)
    }

    /// Try to acquire the lease for a table. Fails with `MetadataError::Conflict`
    /// if another worker currently holds a non-expired lease.
    pub async fn acquire_lease(
        table_name: &str,
        worker_id: &str,
        lease_secs: i64,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let metadata = Self::get_or_create(table_name, db).await?;
        let now = Utc::now();

        if let Some(expires_at) = metadata.lease_expires_at {
            if expires_at > now
                && metadata.leased_by.as_deref() != Some(worker_id)
            {
                return Err(AppError::Metadata(MetadataError::Conflict {
                    table: table_name.to_string(),
                    reason: format!(
                        "leased by {} until {}",
                        metadata.leased_by.unwrap_or_default(),
                        expires_at
                    ),
                }));
            }
        }

        let expires_at = now
            + ChronoDuration::seconds(lease_secs.max(1));

        let updated: Option<Self> = db
            .client
            .update((Self::table_name(), table_name))
            .merge(serde_json::json!({
                "leased_by": worker_id,
                "leased_at": now,
                "lease_expires_at": expires_at,
                "updated_at": now,
            }))
            .await
            .map_err(AppError::Database)?;

        updated.ok_or_else(|| {
            AppError::Metadata(MetadataError::Conflict {
                table: table_name.to_string(),
                reason: "metadata row disappeared while acquiring lease".to_string(),
            })
        })
    }

    /// Release the lease and advance the watermark/identity in one write,
    /// committing progress for the run that held the lease.
    pub async fn advance_and_release(
        table_name: &str,
        new_watermark: DateTime<Utc>,
        new_identity: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), table_name))
            .merge(serde_json::json!({
                "last_watermark": new_watermark,
                "last_identity": new_identity,
                "leased_by": Option::<String>::None,
                "leased_at": Option::<DateTime<Utc>>::None,
                "lease_expires_at": Option::<DateTime<Utc>>::None,
                "updated_at": now,
            }))
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Release the lease without advancing the watermark, e.g. after an
    /// aborted run that made no committed progress.
    pub async fn release_lease(table_name: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let now = Utc::now();
        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), table_name))
            .merge(serde_json::json!({
                "leased_by": Option::<String>::None,
                "leased_at": Option::<DateTime<Utc>>::None,
                "lease_expires_at": Option::<DateTime<Utc>>::None,
                "updated_at": now,
            }))
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn cold_start_creates_epoch_watermark() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        let metadata = EtlMetadata::get_or_create("orders", &db)
            .await
            .expect("get_or_create");
        assert_eq!(metadata.last_watermark, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn acquire_lease_rejects_concurrent_worker() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        EtlMetadata::acquire_lease("orders", "worker-a", DEFAULT_LEASE_SECS, &db)
            .await
            .expect("first lease");

        let second = EtlMetadata::acquire_lease("orders", "worker-b", DEFAULT_LEASE_SECS, &db).await;
        assert!(matches!(
            second,
            Err(AppError::Metadata(MetadataError::Conflict { .. }))
        ));
    }

    #[tokio::test]
    async fn advance_and_release_clears_lease_and_commits_progress() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory surrealdb");

        EtlMetadata::acquire_lease("orders", "worker-a", DEFAULT_LEASE_SECS, &db)
            .await
            .expect("acquire lease");

        let new_watermark = Utc::now();
        EtlMetadata::advance_and_release("orders", new_watermark, "id-99".to_string(), &db)
            .await
            .expect("advance and release");

        let metadata = EtlMetadata::get_or_create("orders", &db)
            .await
            .expect("reload metadata");
        assert!(metadata.leased_by.is_none());
        assert_eq!(metadata.last_identity, "id-99");

        // A second worker can now acquire the lease.
        EtlMetadata::acquire_lease("orders", "worker-b", DEFAULT_LEASE_SECS, &db)
            .await
            .expect("second worker can now lease");
    }
}
