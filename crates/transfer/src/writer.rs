use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use tally_core::DateWindow;
use tally_storage::cache::ReadCache;
use tally_storage::db::{self, DbPool, EnrichedTransaction, StorageError};

use crate::candidate::{Candidate, MatchableLeg};
use crate::matcher::{MatchTolerances, TransferMatcher};

#[derive(Debug, Clone, Default)]
pub struct ApplyParams {
    /// Pair ids picked from a preview. Contents are never trusted — only
    /// the ids, resolved against a freshly recomputed candidate set.
    pub pair_ids: Vec<String>,
    pub window: DateWindow,
    pub tolerances: MatchTolerances,
    /// Replace existing group assignments instead of skipping them.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    /// Requested pairs that resolved against the fresh candidate set. Stale
    /// or tampered ids simply lower this count.
    pub approved: u32,
    pub written_pairs: u32,
    pub skipped_existing: u32,
    pub applied_pair_ids: Vec<String>,
}

/// Persists a user-approved subset of candidate pairs as shared transfer
/// groups. An empty or fully stale selection is a zero-write no-op.
pub async fn apply(
    pool: &DbPool,
    cache: &ReadCache,
    user_id: &str,
    params: &ApplyParams,
) -> Result<ApplyOutcome, StorageError> {
    let mut outcome = ApplyOutcome::default();
    if params.pair_ids.is_empty() {
        return Ok(outcome);
    }

    // Re-derive with already-grouped legs in the pool: they are what the
    // existing-assignment check (and overwrite) must see.
    let rows = db::match_pool_for_user(
        pool,
        user_id,
        &params.window,
        params.tolerances.include_pending,
        true,
    )
    .await?;
    let legs: Vec<MatchableLeg> = rows
        .iter()
        .filter_map(MatchableLeg::from_transaction)
        .collect();
    let matched = TransferMatcher::new(params.tolerances).preview(&legs).matched;
    let by_pair: HashMap<&str, &Candidate> =
        matched.iter().map(|c| (c.pair_id.as_str(), c)).collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut touched: Vec<String> = Vec::new();
    for requested in &params.pair_ids {
        if !seen.insert(requested.as_str()) {
            continue;
        }
        // Stale approvals (the transactions changed, or were matched away)
        // are dropped silently.
        let Some(candidate) = by_pair.get(requested.as_str()) else {
            continue;
        };
        outcome.approved += 1;

        let existing_outflow = db::transfer_group_of(pool, &candidate.outflow_id).await?;
        let existing_inflow = db::transfer_group_of(pool, &candidate.inflow_id).await?;
        if (existing_outflow.is_some() || existing_inflow.is_some()) && !params.overwrite {
            outcome.skipped_existing += 1;
            continue;
        }

        // A fresh group id on every approval — groups are never reused,
        // even for the same two transactions.
        let group = Uuid::new_v4().to_string();
        db::assign_transfer_group_pair(pool, &candidate.outflow_id, &candidate.inflow_id, &group)
            .await?;
        outcome.written_pairs += 1;
        outcome.applied_pair_ids.push(requested.clone());
        touched.push(candidate.outflow_id.clone());
        touched.push(candidate.inflow_id.clone());
    }

    if !touched.is_empty() {
        cache.invalidate_transactions(&touched).await;
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmarkOutcome {
    pub cleared_rows: u64,
    pub cleared_groups: usize,
}

/// Withdraws recognition: nulls the transfer-group field for every
/// transaction in the given groups.
pub async fn unmark(
    pool: &DbPool,
    cache: &ReadCache,
    group_ids: &[String],
) -> Result<UnmarkOutcome, StorageError> {
    let (cleared_rows, touched, cleared_groups) =
        db::clear_transfer_groups(pool, group_ids).await?;
    if !touched.is_empty() {
        cache.invalidate_transactions(&touched).await;
    }
    Ok(UnmarkOutcome {
        cleared_rows,
        cleared_groups,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedGroup {
    pub group_id: String,
    /// Two legs normally; more only if an ambiguous overwrite history left
    /// extra members.
    pub transactions: Vec<EnrichedTransaction>,
}

/// Recognized transfers for a user, grouped by shared group id, newest
/// group first.
pub async fn recognized(
    pool: &DbPool,
    user_id: &str,
    window: &DateWindow,
) -> Result<Vec<RecognizedGroup>, StorageError> {
    let rows = db::grouped_rows_for_user(pool, user_id, window).await?;

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<EnrichedTransaction>> = HashMap::new();
    for row in rows {
        let Some(group) = row.transfer_group.clone() else {
            continue;
        };
        if !groups.contains_key(&group) {
            order.push(group.clone());
        }
        groups.entry(group).or_default().push(row);
    }

    Ok(order
        .into_iter()
        .map(|group_id| RecognizedGroup {
            transactions: groups.remove(&group_id).unwrap_or_default(),
            group_id,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::pair_id;
    use chrono::{DateTime, TimeZone, Utc};
    use tally_core::Transaction;
    use tally_storage::db::create_db;

    async fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("test.db")).await.unwrap();
        (dir, pool)
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    fn tx(id: &str, account: &str, cents: i64, when: DateTime<Utc>) -> Transaction {
        Transaction {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            item_id: "item-1".to_string(),
            account_id: account.to_string(),
            amount_cents: cents,
            currency_code: "USD".to_string(),
            name: "TRANSFER".to_string(),
            merchant_name: None,
            original_description: None,
            datetime: Some(when),
            authorized_datetime: None,
            pending: false,
            category_primary: None,
            category_detailed: None,
            is_removed: false,
        }
    }

    async fn seed_pair(pool: &DbPool) -> String {
        db::upsert_transactions(
            pool,
            &[
                tx("A", "checking", 5000, at(1, 10)),
                tx("B", "savings", -5000, at(2, 10)),
            ],
        )
        .await
        .unwrap();
        pair_id("A", "B")
    }

    fn params(pair_ids: Vec<String>, overwrite: bool) -> ApplyParams {
        ApplyParams {
            pair_ids,
            window: DateWindow::unbounded(),
            tolerances: MatchTolerances::default(),
            overwrite,
        }
    }

    #[tokio::test]
    async fn apply_writes_both_legs_under_one_group() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let pair = seed_pair(&pool).await;

        let outcome = apply(&pool, &cache, "user-1", &params(vec![pair.clone()], false))
            .await
            .unwrap();
        assert_eq!(outcome.approved, 1);
        assert_eq!(outcome.written_pairs, 1);
        assert_eq!(outcome.skipped_existing, 0);
        assert_eq!(outcome.applied_pair_ids, vec![pair]);

        let group_a = db::transfer_group_of(&pool, "A").await.unwrap().unwrap();
        let group_b = db::transfer_group_of(&pool, "B").await.unwrap().unwrap();
        assert_eq!(group_a, group_b);
    }

    #[tokio::test]
    async fn reapply_without_overwrite_is_skipped() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let pair = seed_pair(&pool).await;

        apply(&pool, &cache, "user-1", &params(vec![pair.clone()], false))
            .await
            .unwrap();
        let second = apply(&pool, &cache, "user-1", &params(vec![pair], false))
            .await
            .unwrap();

        assert_eq!(second.approved, 1);
        assert_eq!(second.skipped_existing, 1);
        assert_eq!(second.written_pairs, 0);
        assert!(second.applied_pair_ids.is_empty());
    }

    #[tokio::test]
    async fn reapply_with_overwrite_mints_a_new_group() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let pair = seed_pair(&pool).await;

        apply(&pool, &cache, "user-1", &params(vec![pair.clone()], false))
            .await
            .unwrap();
        let first_group = db::transfer_group_of(&pool, "A").await.unwrap().unwrap();

        let second = apply(&pool, &cache, "user-1", &params(vec![pair], true))
            .await
            .unwrap();
        assert_eq!(second.written_pairs, 1);

        let second_group = db::transfer_group_of(&pool, "A").await.unwrap().unwrap();
        assert_ne!(first_group, second_group);
        assert_eq!(
            db::transfer_group_of(&pool, "B").await.unwrap().unwrap(),
            second_group
        );
    }

    #[tokio::test]
    async fn unknown_pair_ids_are_dropped_silently() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        seed_pair(&pool).await;

        let outcome = apply(
            &pool,
            &cache,
            "user-1",
            &params(vec!["not-a-real-pair".to_string()], false),
        )
        .await
        .unwrap();
        assert_eq!(outcome.approved, 0);
        assert_eq!(outcome.written_pairs, 0);
    }

    #[tokio::test]
    async fn empty_selection_is_a_noop() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        seed_pair(&pool).await;

        let outcome = apply(&pool, &cache, "user-1", &params(vec![], false))
            .await
            .unwrap();
        assert_eq!(outcome.approved, 0);
        assert_eq!(outcome.written_pairs, 0);
    }

    #[tokio::test]
    async fn duplicate_pair_ids_count_once() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let pair = seed_pair(&pool).await;

        let outcome = apply(
            &pool,
            &cache,
            "user-1",
            &params(vec![pair.clone(), pair], false),
        )
        .await
        .unwrap();
        assert_eq!(outcome.approved, 1);
        assert_eq!(outcome.written_pairs, 1);
    }

    #[tokio::test]
    async fn apply_invalidates_the_read_cache() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let pair = seed_pair(&pool).await;

        // Warm the cache before the write.
        let before = cache.get_all_active(&pool, "user-1").await.unwrap();
        assert!(before.iter().all(|r| r.transfer_group.is_none()));

        apply(&pool, &cache, "user-1", &params(vec![pair], false))
            .await
            .unwrap();

        let after = cache.get_all_active(&pool, "user-1").await.unwrap();
        assert!(after.iter().all(|r| r.transfer_group.is_some()));
    }

    #[tokio::test]
    async fn unmark_clears_groups_and_reports_counts() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let pair = seed_pair(&pool).await;

        apply(&pool, &cache, "user-1", &params(vec![pair], false))
            .await
            .unwrap();
        let group = db::transfer_group_of(&pool, "A").await.unwrap().unwrap();

        let outcome = unmark(&pool, &cache, &[group, "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.cleared_rows, 2);
        assert_eq!(outcome.cleared_groups, 1);
        assert_eq!(db::transfer_group_of(&pool, "A").await.unwrap(), None);
        assert_eq!(db::transfer_group_of(&pool, "B").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unmark_with_no_groups_is_a_noop() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let outcome = unmark(&pool, &cache, &[]).await.unwrap();
        assert_eq!(outcome.cleared_rows, 0);
        assert_eq!(outcome.cleared_groups, 0);
    }

    #[tokio::test]
    async fn recognized_groups_legs_by_shared_id() {
        let (_dir, pool) = test_pool().await;
        let cache = ReadCache::default();
        let pair = seed_pair(&pool).await;
        db::upsert_transactions(
            &pool,
            &[
                tx("C", "checking", 9000, at(5, 10)),
                tx("D", "brokerage", -9000, at(5, 12)),
            ],
        )
        .await
        .unwrap();
        let second = pair_id("C", "D");

        apply(&pool, &cache, "user-1", &params(vec![pair, second], false))
            .await
            .unwrap();

        let groups = recognized(&pool, "user-1", &DateWindow::unbounded())
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
        for group in &groups {
            assert_eq!(group.transactions.len(), 2);
            assert!(group
                .transactions
                .iter()
                .all(|t| t.transfer_group.as_deref() == Some(group.group_id.as_str())));
        }
        // Newest group first.
        let first_ids: Vec<&str> = groups[0]
            .transactions
            .iter()
            .map(|t| t.transaction.id.as_str())
            .collect();
        assert!(first_ids.contains(&"C"));
    }
}
