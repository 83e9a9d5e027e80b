use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use tally_core::{Item, Transaction};
use tally_storage::cache::ReadCache;
use tally_storage::db::{self, DbPool, StorageError};

use crate::feed::{FeedClient, FeedError};

#[derive(Debug, Error)]
enum ItemSyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Sync policy knobs. The defaults mirror production behavior; tests dial
/// them down.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    /// How long a claimed item stays off-limits to concurrent syncs.
    pub lock_lease_secs: i64,
    /// Hard cap on pages per item per call — bounds worst-case latency even
    /// if the feed never reports completion. Hitting it is not an error;
    /// the next call resumes from the stored cursor.
    pub max_pages: u32,
    pub page_size: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            lock_lease_secs: 300,
            max_pages: 20,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Items synced to completion this call. Locked and failed items are
    /// absent — locked ones silently, failed ones with a log line.
    pub items_processed: u32,
    pub added: u64,
    pub modified: u64,
    pub removed: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct PageCounts {
    added: u64,
    modified: u64,
    removed: u64,
}

/// Drives every one of a user's items to convergence against the feed,
/// under per-item lease locks so concurrent sync calls never double-apply.
pub struct SyncReconciler<F: FeedClient> {
    feed: F,
    pool: DbPool,
    cache: Arc<ReadCache>,
    policy: SyncPolicy,
}

impl<F: FeedClient> SyncReconciler<F> {
    pub fn new(feed: F, pool: DbPool, cache: Arc<ReadCache>, policy: SyncPolicy) -> Self {
        Self {
            feed,
            pool,
            cache,
            policy,
        }
    }

    /// One sync pass. Item failures are contained: they log and contribute
    /// zero to the counts, and the remaining items still run.
    pub async fn sync_user(&self, user_id: &str) -> Result<SyncOutcome, StorageError> {
        let items = db::items_for_user(&self.pool, user_id).await?;

        let mut claimed: Vec<Item> = Vec::new();
        for item in items {
            let now = Utc::now();
            let until = now + Duration::seconds(self.policy.lock_lease_secs);
            if db::claim_item_lock(&self.pool, &item.id, now, until).await? {
                claimed.push(item);
            } else {
                tracing::debug!(item = %item.id, "item locked by a concurrent sync, skipping");
            }
        }

        let mut outcome = SyncOutcome::default();
        for item in &claimed {
            match self.sync_item(item).await {
                Ok(counts) => {
                    outcome.items_processed += 1;
                    outcome.added += counts.added;
                    outcome.modified += counts.modified;
                    outcome.removed += counts.removed;
                }
                Err(err) => {
                    tracing::warn!(item = %item.id, error = %err, "item sync failed");
                }
            }
        }

        // Hand the leases back instead of waiting them out.
        for item in &claimed {
            db::release_item_lock(&self.pool, &item.id, Utc::now()).await?;
        }

        self.cache.invalidate_user(user_id).await;
        Ok(outcome)
    }

    async fn sync_item(&self, item: &Item) -> Result<PageCounts, ItemSyncError> {
        let mut cursor = item.cursor.clone();
        let mut counts = PageCounts::default();

        for _ in 0..self.policy.max_pages {
            let page = self
                .feed
                .fetch_delta_page(&item.access_token, cursor.as_deref(), self.policy.page_size)
                .await?;

            if page.is_empty() {
                // Termination is signaled by has_more=false on a page with
                // content, never by an empty page.
                tracing::error!(item = %item.id, page = ?page, "feed returned an all-empty delta page");
                return Err(FeedError::EmptyPage.into());
            }

            let mut upserts: Vec<Transaction> = Vec::new();
            for row in page.added.iter().chain(page.modified.iter()) {
                upserts.push(row.clone().into_transaction(&item.user_id, &item.id));
            }
            let removed_ids: Vec<String> =
                page.removed.iter().map(|r| r.id.clone()).collect();

            // Rows, removal flags, cursor, and lease renewal land in one
            // transaction; a crash here resumes from this page's cursor.
            let lock_until = Utc::now() + Duration::seconds(self.policy.lock_lease_secs);
            db::apply_sync_page(
                &self.pool,
                &item.id,
                &upserts,
                &removed_ids,
                &page.next_cursor,
                lock_until,
            )
            .await?;

            counts.added += page.added.len() as u64;
            counts.modified += page.modified.len() as u64;
            counts.removed += removed_ids.len() as u64;
            cursor = Some(page.next_cursor);

            if !page.has_more {
                break;
            }
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DeltaPage, FeedTransaction, MockFeed, RemovedTransaction};
    use chrono::NaiveDate;
    use tally_storage::db::create_db;

    async fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("test.db")).await.unwrap();
        (dir, pool)
    }

    fn item(id: &str, cursor: Option<&str>) -> Item {
        Item {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            access_token: format!("token-{id}"),
            cursor: cursor.map(str::to_string),
            lock_until: None,
            institution_name: None,
        }
    }

    fn feed_tx(id: &str, amount: &str) -> FeedTransaction {
        FeedTransaction {
            id: id.to_string(),
            account_id: "acct-1".to_string(),
            amount: amount.parse().unwrap(),
            currency_code: Some("USD".to_string()),
            name: "ROW".to_string(),
            merchant_name: None,
            original_description: None,
            datetime: None,
            date: NaiveDate::from_ymd_opt(2024, 1, 15),
            authorized_datetime: None,
            pending: false,
            category: None,
        }
    }

    fn page(
        added: Vec<FeedTransaction>,
        removed: Vec<&str>,
        next_cursor: &str,
        has_more: bool,
    ) -> DeltaPage {
        DeltaPage {
            added,
            modified: Vec::new(),
            removed: removed
                .into_iter()
                .map(|id| RemovedTransaction { id: id.to_string() })
                .collect(),
            next_cursor: next_cursor.to_string(),
            has_more,
        }
    }

    fn reconciler(feed: MockFeed, pool: &DbPool) -> SyncReconciler<MockFeed> {
        SyncReconciler::new(
            feed,
            pool.clone(),
            Arc::new(ReadCache::default()),
            SyncPolicy {
                lock_lease_secs: 300,
                max_pages: 5,
                page_size: 100,
            },
        )
    }

    #[tokio::test]
    async fn single_item_multi_page_sync_accumulates_counts() {
        let (_dir, pool) = test_pool().await;
        db::upsert_item(&pool, &item("item-1", None)).await.unwrap();

        let feed = MockFeed::new(vec![
            Ok(page(
                vec![feed_tx("t1", "10.00"), feed_tx("t2", "-10.00")],
                vec![],
                "c1",
                true,
            )),
            Ok(page(vec![feed_tx("t3", "5.00")], vec!["t1"], "c2", false)),
        ]);
        let outcome = reconciler(feed, &pool).sync_user("user-1").await.unwrap();

        assert_eq!(outcome.items_processed, 1);
        assert_eq!(outcome.added, 3);
        assert_eq!(outcome.modified, 0);
        assert_eq!(outcome.removed, 1);

        let stored = db::get_item(&pool, "item-1").await.unwrap().unwrap();
        assert_eq!(stored.cursor.as_deref(), Some("c2"));
        assert!(db::transaction_by_id(&pool, "t1").await.unwrap().unwrap().is_removed);
    }

    #[tokio::test]
    async fn sync_resumes_from_the_stored_cursor() {
        let (_dir, pool) = test_pool().await;
        db::upsert_item(&pool, &item("item-1", Some("c1"))).await.unwrap();

        let feed = MockFeed::new(vec![Ok(page(
            vec![feed_tx("t1", "10.00")],
            vec![],
            "c2",
            false,
        ))]);
        let sync = reconciler(feed, &pool);
        sync.sync_user("user-1").await.unwrap();

        // The first (and only) request carried the persisted cursor — page
        // one was not re-requested.
        assert_eq!(sync.feed.requested_cursors(), vec![Some("c1".to_string())]);
    }

    #[tokio::test]
    async fn locked_item_is_skipped_without_a_feed_request() {
        let (_dir, pool) = test_pool().await;
        let mut locked = item("item-1", None);
        locked.lock_until = Some(Utc::now() + Duration::minutes(5));
        db::upsert_item(&pool, &locked).await.unwrap();

        let feed = MockFeed::new(vec![Ok(page(
            vec![feed_tx("t1", "10.00")],
            vec![],
            "c1",
            false,
        ))]);
        let sync = reconciler(feed, &pool);
        let outcome = sync.sync_user("user-1").await.unwrap();

        assert_eq!(outcome.items_processed, 0);
        assert_eq!(outcome.added, 0);
        assert!(sync.feed.requested_cursors().is_empty());
        assert_eq!(sync.feed.remaining_pages(), 1);
    }

    #[tokio::test]
    async fn failing_item_does_not_poison_the_others() {
        let (_dir, pool) = test_pool().await;
        db::upsert_item(&pool, &item("item-a", None)).await.unwrap();
        db::upsert_item(&pool, &item("item-b", None)).await.unwrap();

        // Items are claimed in id order: item-a gets the failure, item-b
        // gets a good page.
        let feed = MockFeed::new(vec![
            Err(FeedError::Protocol("rate limited".to_string())),
            Ok(page(vec![feed_tx("t1", "10.00")], vec![], "c1", false)),
        ]);
        let outcome = reconciler(feed, &pool).sync_user("user-1").await.unwrap();

        assert_eq!(outcome.items_processed, 1);
        assert_eq!(outcome.added, 1);
        assert!(db::transaction_by_id(&pool, "t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn all_empty_page_aborts_the_item() {
        let (_dir, pool) = test_pool().await;
        db::upsert_item(&pool, &item("item-1", None)).await.unwrap();

        let feed = MockFeed::new(vec![Ok(page(vec![], vec![], "c1", true))]);
        let outcome = reconciler(feed, &pool).sync_user("user-1").await.unwrap();

        assert_eq!(outcome.items_processed, 0);
        // The cursor did not advance past the poisoned page.
        let stored = db::get_item(&pool, "item-1").await.unwrap().unwrap();
        assert_eq!(stored.cursor, None);
    }

    #[tokio::test]
    async fn page_cap_stops_early_without_error() {
        let (_dir, pool) = test_pool().await;
        db::upsert_item(&pool, &item("item-1", None)).await.unwrap();

        // Five claimable pages but a cap of two: the call applies two and
        // leaves the rest for the next sync.
        let pages: Vec<Result<DeltaPage, FeedError>> = (1..=5)
            .map(|n| {
                Ok(page(
                    vec![feed_tx(&format!("t{n}"), "1.00")],
                    vec![],
                    &format!("c{n}"),
                    true,
                ))
            })
            .collect();
        let feed = MockFeed::new(pages);
        let sync = SyncReconciler::new(
            feed,
            pool.clone(),
            Arc::new(ReadCache::default()),
            SyncPolicy {
                lock_lease_secs: 300,
                max_pages: 2,
                page_size: 100,
            },
        );
        let outcome = sync.sync_user("user-1").await.unwrap();

        assert_eq!(outcome.items_processed, 1);
        assert_eq!(outcome.added, 2);
        let stored = db::get_item(&pool, "item-1").await.unwrap().unwrap();
        assert_eq!(stored.cursor.as_deref(), Some("c2"));
        assert_eq!(sync.feed.remaining_pages(), 3);
    }

    #[tokio::test]
    async fn locks_are_released_after_the_pass() {
        let (_dir, pool) = test_pool().await;
        db::upsert_item(&pool, &item("item-1", None)).await.unwrap();

        let feed = MockFeed::new(vec![Ok(page(
            vec![feed_tx("t1", "10.00")],
            vec![],
            "c1",
            false,
        ))]);
        reconciler(feed, &pool).sync_user("user-1").await.unwrap();

        // A follow-up sync can claim the item again right away.
        let now = Utc::now();
        assert!(
            db::claim_item_lock(&pool, "item-1", now, now + Duration::minutes(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn replaying_the_same_page_is_idempotent() {
        let (_dir, pool) = test_pool().await;
        db::upsert_item(&pool, &item("item-1", None)).await.unwrap();

        let batch = || {
            Ok(page(
                vec![feed_tx("t1", "10.00"), feed_tx("t2", "-10.00")],
                vec!["t9"],
                "c1",
                false,
            ))
        };
        let sync = reconciler(MockFeed::new(vec![batch()]), &pool);
        sync.sync_user("user-1").await.unwrap();

        // Same page again, as after a crash before the cursor was read back.
        let replay = reconciler(MockFeed::new(vec![batch()]), &pool);
        replay.sync_user("user-1").await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 2);
    }
}
