//! Advisory sync lock + block cursor, one row per chain.
//!
//! `acquire` is a single conditional UPDATE so two overlapping invocations
//! can never both observe an unlocked row — the affected-row count is the
//! test-and-set result. A lock older than `STALE_LOCK_SECS` is treated as
//! abandoned by a crashed run and may be stolen.

use sqlx::SqlitePool;

use crate::config::STALE_LOCK_SECS;
use crate::db::models::IndexerStateRow;
use crate::error::Result;
use crate::types::{now_secs, CycleError};

pub struct SyncStateStore {
    pool: SqlitePool,
    chain_id: i64,
}

impl SyncStateStore {
    pub fn new(pool: SqlitePool, chain_id: i64) -> Self {
        Self { pool, chain_id }
    }

    /// Try to take the cycle lock. `false` means another invocation holds a
    /// fresh lock and the caller must no-op.
    pub async fn acquire(&self) -> Result<bool> {
        let now = now_secs();

        sqlx::query("INSERT OR IGNORE INTO indexer_state (chain_id) VALUES (?)")
            .bind(self.chain_id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE indexer_state
            SET is_syncing = 1, sync_started_at = ?
            WHERE chain_id = ?
              AND (is_syncing = 0 OR sync_started_at IS NULL OR sync_started_at < ?)
            "#,
        )
        .bind(now)
        .bind(self.chain_id)
        .bind(now - STALE_LOCK_SECS)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the lock and commit the cycle outcome. The block cursor only
    /// ever moves forward; a stale `new_block` cannot rewind it.
    pub async fn release(&self, new_block: u64, errors: &[CycleError]) -> Result<()> {
        let now = now_secs();
        let joined = if errors.is_empty() {
            None
        } else {
            Some(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        let had_errors = !errors.is_empty();

        sqlx::query(
            r#"
            UPDATE indexer_state
            SET is_syncing = 0,
                sync_started_at = NULL,
                last_indexed_at = ?,
                last_indexed_block = MAX(last_indexed_block, ?),
                last_error = ?,
                consecutive_errors = CASE WHEN ? THEN consecutive_errors + 1 ELSE 0 END
            WHERE chain_id = ?
            "#,
        )
        .bind(now)
        .bind(new_block as i64)
        .bind(joined)
        .bind(had_errors)
        .bind(self.chain_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn last_indexed_block(&self) -> Result<u64> {
        let block: Option<i64> = sqlx::query_scalar(
            "SELECT last_indexed_block FROM indexer_state WHERE chain_id = ?",
        )
        .bind(self.chain_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(block.unwrap_or(0) as u64)
    }

    pub async fn state(&self) -> Result<Option<IndexerStateRow>> {
        let row = sqlx::query_as::<_, IndexerStateRow>(
            "SELECT * FROM indexer_state WHERE chain_id = ?",
        )
        .bind(self.chain_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::CyclePhase;

    #[tokio::test]
    async fn second_acquire_within_stale_window_fails() {
        let store = SyncStateStore::new(test_pool().await, 1);

        assert!(store.acquire().await.unwrap());
        assert!(!store.acquire().await.unwrap(), "fresh lock must be exclusive");
    }

    #[tokio::test]
    async fn stale_lock_is_stolen() {
        let pool = test_pool().await;
        let store = SyncStateStore::new(pool.clone(), 1);

        assert!(store.acquire().await.unwrap());

        // Age the lock past the staleness cutoff, as if the holder crashed.
        sqlx::query("UPDATE indexer_state SET sync_started_at = ? WHERE chain_id = 1")
            .bind(now_secs() - STALE_LOCK_SECS - 1)
            .execute(&pool)
            .await
            .unwrap();

        assert!(store.acquire().await.unwrap(), "stale lock must be reclaimable");
    }

    #[tokio::test]
    async fn release_then_acquire_succeeds() {
        let store = SyncStateStore::new(test_pool().await, 1);

        assert!(store.acquire().await.unwrap());
        store.release(100, &[]).await.unwrap();
        assert!(store.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn block_cursor_never_rewinds() {
        let store = SyncStateStore::new(test_pool().await, 1);

        store.acquire().await.unwrap();
        store.release(500, &[]).await.unwrap();
        assert_eq!(store.last_indexed_block().await.unwrap(), 500);

        store.acquire().await.unwrap();
        store.release(400, &[]).await.unwrap();
        assert_eq!(store.last_indexed_block().await.unwrap(), 500);
    }

    #[tokio::test]
    async fn consecutive_errors_increment_and_reset() {
        let store = SyncStateStore::new(test_pool().await, 1);
        let err = CycleError::new(CyclePhase::Refresh, "0xabc", "rpc timeout");

        store.acquire().await.unwrap();
        store.release(10, &[err.clone()]).await.unwrap();
        store.acquire().await.unwrap();
        store.release(20, &[err]).await.unwrap();

        let state = store.state().await.unwrap().unwrap();
        assert_eq!(state.consecutive_errors, 2);
        assert!(state.last_error.unwrap().contains("rpc timeout"));

        store.acquire().await.unwrap();
        store.release(30, &[]).await.unwrap();
        let state = store.state().await.unwrap().unwrap();
        assert_eq!(state.consecutive_errors, 0);
        assert!(state.last_error.is_none());
    }
}
