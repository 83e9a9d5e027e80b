use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::db::{self, DbPool, EnrichedTransaction, StorageError};

pub const DEFAULT_PAGE_SIZE: usize = 250;

/// Invalidate-on-write side cache over the active-transaction read. Not a
/// source of truth: every mutation path must invalidate before reporting
/// success, and a partially evicted entry is treated as a full miss rather
/// than served.
pub struct ReadCache {
    page_size: usize,
    state: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    /// (user id, page index) → page rows.
    pages: HashMap<(String, usize), Vec<EnrichedTransaction>>,
    /// user id → number of pages a complete entry has.
    counts: HashMap<String, usize>,
    /// user id → transaction id → page index, for targeted eviction.
    index: HashMap<String, HashMap<String, usize>>,
}

impl Default for ReadCache {
    fn default() -> Self {
        ReadCache::new(DEFAULT_PAGE_SIZE)
    }
}

impl ReadCache {
    pub fn new(page_size: usize) -> Self {
        ReadCache {
            page_size: page_size.max(1),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// The full ordered active list for a user. Warm entries are assembled
    /// strictly from cached pages; a cold or partially evicted entry is
    /// recomputed from the store.
    pub async fn get_all_active(
        &self,
        pool: &DbPool,
        user_id: &str,
    ) -> Result<Vec<EnrichedTransaction>, StorageError> {
        if let Some(rows) = self.assemble(user_id).await {
            return Ok(rows);
        }
        let rows = db::active_rows_for_user(pool, user_id).await?;
        self.store(user_id, &rows).await;
        Ok(rows)
    }

    async fn assemble(&self, user_id: &str) -> Option<Vec<EnrichedTransaction>> {
        let state = self.state.read().await;
        let count = *state.counts.get(user_id)?;
        let mut rows = Vec::new();
        for page in 0..count {
            // Any missing page means the whole entry is a miss — never
            // serve a partial list.
            let chunk = state.pages.get(&(user_id.to_string(), page))?;
            rows.extend(chunk.iter().cloned());
        }
        Some(rows)
    }

    async fn store(&self, user_id: &str, rows: &[EnrichedTransaction]) {
        let mut state = self.state.write().await;
        purge_user(&mut state, user_id);

        let mut index = HashMap::new();
        let mut page_count = 0;
        for (page, chunk) in rows.chunks(self.page_size).enumerate() {
            for row in chunk {
                index.insert(row.transaction.id.clone(), page);
            }
            state.pages.insert((user_id.to_string(), page), chunk.to_vec());
            page_count = page + 1;
        }
        state.counts.insert(user_id.to_string(), page_count);
        state.index.insert(user_id.to_string(), index);
    }

    pub async fn invalidate_user(&self, user_id: &str) {
        let mut state = self.state.write().await;
        purge_user(&mut state, user_id);
    }

    /// Targeted eviction after a sparse write: drops only the pages holding
    /// the given transaction ids, plus the owning users' page counts so the
    /// next read recomputes. Semantically equivalent to `invalidate_user`
    /// for every affected user.
    pub async fn invalidate_transactions(&self, ids: &[String]) {
        let mut state = self.state.write().await;
        let mut evict: Vec<(String, usize)> = Vec::new();
        for (user_id, by_txn) in &state.index {
            for id in ids {
                if let Some(&page) = by_txn.get(id) {
                    evict.push((user_id.clone(), page));
                }
            }
        }
        for (user_id, page) in evict {
            state.pages.remove(&(user_id.clone(), page));
            state.counts.remove(&user_id);
        }
    }
}

fn purge_user(state: &mut CacheState, user_id: &str) {
    state.counts.remove(user_id);
    state.index.remove(user_id);
    state.pages.retain(|(user, _), _| user != user_id);
}
