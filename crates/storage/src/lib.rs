pub mod cache;
pub mod db;

pub use cache::ReadCache;
pub use db::{
    active_rows_for_user, advance_cursor, apply_sync_page, assign_transfer_group_pair,
    claim_item_lock, clear_transfer_groups, create_db, get_item, grouped_rows_for_user,
    items_for_user, match_pool_for_user, meta_for, release_item_lock, set_tags,
    set_transfer_group, transaction_by_id, transfer_group_of, upsert_account, upsert_item,
    upsert_transactions, DbPool, EnrichedTransaction, StorageError,
};
