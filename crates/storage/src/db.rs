use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use tally_core::{Account, DateWindow, Item, TagAssignment, Transaction, TransactionMeta};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("transaction {0} is a transfer leg and cannot take bucket tags")]
    ClassificationConflict(String),
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            access_token TEXT NOT NULL,
            cursor TEXT,
            lock_until TEXT,
            institution_name TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            mask TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency_code TEXT NOT NULL,
            name TEXT NOT NULL,
            merchant_name TEXT,
            original_description TEXT,
            datetime TEXT,
            authorized_datetime TEXT,
            pending INTEGER NOT NULL DEFAULT 0,
            category_primary TEXT,
            category_detailed TEXT,
            is_removed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transaction_meta (
            transaction_id TEXT PRIMARY KEY,
            transfer_group TEXT,
            bucket1_tag TEXT,
            bucket2_tag TEXT,
            meta_tag TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, is_removed)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_meta_transfer_group ON transaction_meta(transfer_group)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

// Timestamps are stored as fixed-width RFC 3339 UTC text so that SQL string
// comparison orders them correctly (the lock-until lease check relies on it).
fn encode_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    item_id: String,
    account_id: String,
    amount_cents: i64,
    currency_code: String,
    name: String,
    merchant_name: Option<String>,
    original_description: Option<String>,
    datetime: Option<String>,
    authorized_datetime: Option<String>,
    pending: i64,
    category_primary: Option<String>,
    category_detailed: Option<String>,
    is_removed: i64,
}

impl TransactionRow {
    fn into_transaction(self) -> Transaction {
        Transaction {
            id: self.id,
            user_id: self.user_id,
            item_id: self.item_id,
            account_id: self.account_id,
            amount_cents: self.amount_cents,
            currency_code: self.currency_code,
            name: self.name,
            merchant_name: self.merchant_name,
            original_description: self.original_description,
            datetime: self.datetime.as_deref().and_then(decode_ts),
            authorized_datetime: self.authorized_datetime.as_deref().and_then(decode_ts),
            pending: self.pending != 0,
            category_primary: self.category_primary,
            category_detailed: self.category_detailed,
            is_removed: self.is_removed != 0,
        }
    }
}

const TRANSACTION_COLUMNS: &str = "t.id, t.user_id, t.item_id, t.account_id, t.amount_cents, \
     t.currency_code, t.name, t.merchant_name, t.original_description, t.datetime, \
     t.authorized_datetime, t.pending, t.category_primary, t.category_detailed, t.is_removed";

/// A transaction joined with its account/institution names and metadata —
/// the shape the read path serves.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub account_name: Option<String>,
    pub institution_name: Option<String>,
    pub transfer_group: Option<String>,
    pub bucket1_tag: Option<String>,
    pub bucket2_tag: Option<String>,
    pub meta_tag: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct EnrichedRow {
    id: String,
    user_id: String,
    item_id: String,
    account_id: String,
    amount_cents: i64,
    currency_code: String,
    name: String,
    merchant_name: Option<String>,
    original_description: Option<String>,
    datetime: Option<String>,
    authorized_datetime: Option<String>,
    pending: i64,
    category_primary: Option<String>,
    category_detailed: Option<String>,
    is_removed: i64,
    account_name: Option<String>,
    institution_name: Option<String>,
    transfer_group: Option<String>,
    bucket1_tag: Option<String>,
    bucket2_tag: Option<String>,
    meta_tag: Option<String>,
}

impl EnrichedRow {
    fn into_enriched(self) -> EnrichedTransaction {
        EnrichedTransaction {
            transaction: Transaction {
                id: self.id,
                user_id: self.user_id,
                item_id: self.item_id,
                account_id: self.account_id,
                amount_cents: self.amount_cents,
                currency_code: self.currency_code,
                name: self.name,
                merchant_name: self.merchant_name,
                original_description: self.original_description,
                datetime: self.datetime.as_deref().and_then(decode_ts),
                authorized_datetime: self.authorized_datetime.as_deref().and_then(decode_ts),
                pending: self.pending != 0,
                category_primary: self.category_primary,
                category_detailed: self.category_detailed,
                is_removed: self.is_removed != 0,
            },
            account_name: self.account_name,
            institution_name: self.institution_name,
            transfer_group: self.transfer_group,
            bucket1_tag: self.bucket1_tag,
            bucket2_tag: self.bucket2_tag,
            meta_tag: self.meta_tag,
        }
    }
}

const ENRICHED_COLUMNS: &str = "t.id, t.user_id, t.item_id, t.account_id, t.amount_cents, \
     t.currency_code, t.name, t.merchant_name, t.original_description, t.datetime, \
     t.authorized_datetime, t.pending, t.category_primary, t.category_detailed, t.is_removed, \
     a.name AS account_name, i.institution_name, m.transfer_group, m.bucket1_tag, \
     m.bucket2_tag, m.meta_tag";

const ENRICHED_JOINS: &str = "FROM transactions t \
     LEFT JOIN accounts a ON a.id = t.account_id \
     LEFT JOIN items i ON i.id = t.item_id \
     LEFT JOIN transaction_meta m ON m.transaction_id = t.id";

// ── Transactions ──────────────────────────────────────────────────────────────

async fn upsert_transaction_conn(
    conn: &mut SqliteConnection,
    row: &Transaction,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, user_id, item_id, account_id, amount_cents, currency_code, name,
            merchant_name, original_description, datetime, authorized_datetime,
            pending, category_primary, category_detailed, is_removed
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            item_id = excluded.item_id,
            account_id = excluded.account_id,
            amount_cents = excluded.amount_cents,
            currency_code = excluded.currency_code,
            name = excluded.name,
            merchant_name = excluded.merchant_name,
            original_description = excluded.original_description,
            datetime = excluded.datetime,
            authorized_datetime = excluded.authorized_datetime,
            pending = excluded.pending,
            category_primary = excluded.category_primary,
            category_detailed = excluded.category_detailed,
            is_removed = excluded.is_removed
        "#,
    )
    .bind(&row.id)
    .bind(&row.user_id)
    .bind(&row.item_id)
    .bind(&row.account_id)
    .bind(row.amount_cents)
    .bind(&row.currency_code)
    .bind(&row.name)
    .bind(&row.merchant_name)
    .bind(&row.original_description)
    .bind(row.datetime.map(encode_ts))
    .bind(row.authorized_datetime.map(encode_ts))
    .bind(i64::from(row.pending))
    .bind(&row.category_primary)
    .bind(&row.category_detailed)
    .bind(i64::from(row.is_removed))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Inserts or fully overwrites rows by id. Replaying the same batch is a
/// no-op; cache invalidation is the caller's responsibility.
pub async fn upsert_transactions(
    pool: &DbPool,
    rows: &[Transaction],
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    for row in rows {
        upsert_transaction_conn(&mut tx, row).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Applies one feed delta page as a single unit: row upserts, removal
/// flags, cursor advance, and lease renewal commit together, so a crash
/// between pages resumes cleanly from the stored cursor.
pub async fn apply_sync_page(
    pool: &DbPool,
    item_id: &str,
    upserts: &[Transaction],
    removed_ids: &[String],
    next_cursor: &str,
    lock_until: DateTime<Utc>,
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    for row in upserts {
        upsert_transaction_conn(&mut tx, row).await?;
    }
    for id in removed_ids {
        sqlx::query("UPDATE transactions SET is_removed = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("UPDATE items SET cursor = ?, lock_until = ? WHERE id = ?")
        .bind(next_cursor)
        .bind(encode_ts(lock_until))
        .bind(item_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn transaction_by_id(
    pool: &DbPool,
    id: &str,
) -> Result<Option<Transaction>, StorageError> {
    let row: Option<TransactionRow> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(TransactionRow::into_transaction))
}

/// The full enriched active-transaction list for a user, newest first.
/// This is the query the ReadCache memoizes.
pub async fn active_rows_for_user(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<EnrichedTransaction>, StorageError> {
    let rows: Vec<EnrichedRow> = sqlx::query_as(&format!(
        "SELECT {ENRICHED_COLUMNS} {ENRICHED_JOINS} \
         WHERE t.user_id = ? AND t.is_removed = 0 \
         ORDER BY COALESCE(t.datetime, t.authorized_datetime) DESC, t.id DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(EnrichedRow::into_enriched).collect())
}

/// The pool of transactions eligible for transfer matching. Filters compose
/// with AND semantics regardless of which are present; zero-amount rows are
/// excluded here on purpose — they are neither outflow nor inflow.
pub async fn match_pool_for_user(
    pool: &DbPool,
    user_id: &str,
    window: &DateWindow,
    include_pending: bool,
    include_grouped: bool,
) -> Result<Vec<Transaction>, StorageError> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions t \
         LEFT JOIN transaction_meta m ON m.transaction_id = t.id \
         WHERE t.is_removed = 0 AND t.amount_cents != 0 AND t.user_id = "
    ));
    qb.push_bind(user_id);
    if !include_grouped {
        qb.push(" AND m.transfer_group IS NULL");
    }
    if !include_pending {
        qb.push(" AND t.pending = 0");
    }
    if let Some(start) = window.start {
        qb.push(" AND date(COALESCE(t.datetime, t.authorized_datetime)) >= ");
        qb.push_bind(start.to_string());
    }
    if let Some(end) = window.end {
        qb.push(" AND date(COALESCE(t.datetime, t.authorized_datetime)) <= ");
        qb.push_bind(end.to_string());
    }
    qb.push(" ORDER BY COALESCE(t.datetime, t.authorized_datetime) DESC, t.id DESC");

    let rows: Vec<TransactionRow> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(TransactionRow::into_transaction)
        .collect())
}

/// Enriched rows that belong to a recognized transfer group, newest first.
pub async fn grouped_rows_for_user(
    pool: &DbPool,
    user_id: &str,
    window: &DateWindow,
) -> Result<Vec<EnrichedTransaction>, StorageError> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {ENRICHED_COLUMNS} {ENRICHED_JOINS} \
         WHERE t.is_removed = 0 AND m.transfer_group IS NOT NULL AND t.user_id = "
    ));
    qb.push_bind(user_id);
    if let Some(start) = window.start {
        qb.push(" AND date(COALESCE(t.datetime, t.authorized_datetime)) >= ");
        qb.push_bind(start.to_string());
    }
    if let Some(end) = window.end {
        qb.push(" AND date(COALESCE(t.datetime, t.authorized_datetime)) <= ");
        qb.push_bind(end.to_string());
    }
    qb.push(" ORDER BY COALESCE(t.datetime, t.authorized_datetime) DESC, t.id DESC");

    let rows: Vec<EnrichedRow> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(EnrichedRow::into_enriched).collect())
}

// ── Items ─────────────────────────────────────────────────────────────────────

pub async fn upsert_item(pool: &DbPool, item: &Item) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO items (id, user_id, access_token, cursor, lock_until, institution_name)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            access_token = excluded.access_token,
            cursor = excluded.cursor,
            lock_until = excluded.lock_until,
            institution_name = excluded.institution_name
        "#,
    )
    .bind(&item.id)
    .bind(&item.user_id)
    .bind(&item.access_token)
    .bind(&item.cursor)
    .bind(item.lock_until.map(encode_ts))
    .bind(&item.institution_name)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_account(pool: &DbPool, account: &Account) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO accounts (id, item_id, user_id, name, mask)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            item_id = excluded.item_id,
            user_id = excluded.user_id,
            name = excluded.name,
            mask = excluded.mask
        "#,
    )
    .bind(&account.id)
    .bind(&account.item_id)
    .bind(&account.user_id)
    .bind(&account.name)
    .bind(&account.mask)
    .execute(pool)
    .await?;
    Ok(())
}

fn item_from_row(
    row: (
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
    ),
) -> Item {
    Item {
        id: row.0,
        user_id: row.1,
        access_token: row.2,
        cursor: row.3,
        lock_until: row.4.as_deref().and_then(decode_ts),
        institution_name: row.5,
    }
}

pub async fn items_for_user(pool: &DbPool, user_id: &str) -> Result<Vec<Item>, StorageError> {
    let rows: Vec<(
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT id, user_id, access_token, cursor, lock_until, institution_name \
         FROM items WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(item_from_row).collect())
}

pub async fn get_item(pool: &DbPool, item_id: &str) -> Result<Option<Item>, StorageError> {
    let row: Option<(
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT id, user_id, access_token, cursor, lock_until, institution_name \
         FROM items WHERE id = ?",
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(item_from_row))
}

/// Conditionally claims the per-item sync lease. Returns false when another
/// sync holds it — a single guarded UPDATE, so the claim is atomic across
/// server processes.
pub async fn claim_item_lock(
    pool: &DbPool,
    item_id: &str,
    now: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE items SET lock_until = ? WHERE id = ? AND (lock_until IS NULL OR lock_until <= ?)",
    )
    .bind(encode_ts(until))
    .bind(item_id)
    .bind(encode_ts(now))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Ends the lease early instead of waiting it out.
pub async fn release_item_lock(
    pool: &DbPool,
    item_id: &str,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE items SET lock_until = ? WHERE id = ?")
        .bind(encode_ts(at))
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn advance_cursor(
    pool: &DbPool,
    item_id: &str,
    cursor: &str,
    lock_until: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE items SET cursor = ?, lock_until = ? WHERE id = ?")
        .bind(cursor)
        .bind(encode_ts(lock_until))
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Transaction metadata ──────────────────────────────────────────────────────

// Assigning a transfer group clears bucket tags in the same statement: a
// transaction is a categorized event or a transfer leg, never both.
async fn set_transfer_group_conn(
    conn: &mut SqliteConnection,
    transaction_id: &str,
    group: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transaction_meta (transaction_id, transfer_group)
        VALUES (?, ?)
        ON CONFLICT(transaction_id) DO UPDATE SET
            transfer_group = excluded.transfer_group,
            bucket1_tag = CASE WHEN excluded.transfer_group IS NOT NULL THEN NULL ELSE bucket1_tag END,
            bucket2_tag = CASE WHEN excluded.transfer_group IS NOT NULL THEN NULL ELSE bucket2_tag END
        "#,
    )
    .bind(transaction_id)
    .bind(group)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_transfer_group(
    pool: &DbPool,
    transaction_id: &str,
    group: Option<&str>,
) -> Result<(), StorageError> {
    let mut conn = pool.acquire().await?;
    set_transfer_group_conn(&mut conn, transaction_id, group).await?;
    Ok(())
}

/// Writes both legs of an approved pair under one group id atomically.
pub async fn assign_transfer_group_pair(
    pool: &DbPool,
    outflow_id: &str,
    inflow_id: &str,
    group: &str,
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    set_transfer_group_conn(&mut tx, outflow_id, Some(group)).await?;
    set_transfer_group_conn(&mut tx, inflow_id, Some(group)).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn transfer_group_of(
    pool: &DbPool,
    transaction_id: &str,
) -> Result<Option<String>, StorageError> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT transfer_group FROM transaction_meta WHERE transaction_id = ?")
            .bind(transaction_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|r| r.0))
}

pub async fn meta_for(
    pool: &DbPool,
    transaction_id: &str,
) -> Result<Option<TransactionMeta>, StorageError> {
    let row: Option<(
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT transaction_id, transfer_group, bucket1_tag, bucket2_tag, meta_tag \
         FROM transaction_meta WHERE transaction_id = ?",
    )
    .bind(transaction_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| TransactionMeta {
        transaction_id: r.0,
        transfer_group: r.1,
        bucket1_tag: r.2,
        bucket2_tag: r.3,
        meta_tag: r.4,
    }))
}

/// Overwrites the tag assignment (absent fields clear). Rejected when a
/// bucket tag would land on a recognized transfer leg.
pub async fn set_tags(
    pool: &DbPool,
    transaction_id: &str,
    tags: &TagAssignment,
) -> Result<(), StorageError> {
    if tags.has_bucket() && transfer_group_of(pool, transaction_id).await?.is_some() {
        return Err(StorageError::ClassificationConflict(
            transaction_id.to_string(),
        ));
    }
    sqlx::query(
        r#"
        INSERT INTO transaction_meta (transaction_id, bucket1_tag, bucket2_tag, meta_tag)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(transaction_id) DO UPDATE SET
            bucket1_tag = excluded.bucket1_tag,
            bucket2_tag = excluded.bucket2_tag,
            meta_tag = excluded.meta_tag
        "#,
    )
    .bind(transaction_id)
    .bind(&tags.bucket1_tag)
    .bind(&tags.bucket2_tag)
    .bind(&tags.meta_tag)
    .execute(pool)
    .await?;
    Ok(())
}

/// Nulls every transfer-group assignment matching the given group ids.
/// Returns (cleared rows, touched transaction ids, distinct groups found).
pub async fn clear_transfer_groups(
    pool: &DbPool,
    group_ids: &[String],
) -> Result<(u64, Vec<String>, usize), StorageError> {
    if group_ids.is_empty() {
        return Ok((0, Vec::new(), 0));
    }

    let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT transaction_id, transfer_group FROM transaction_meta WHERE transfer_group IN (",
    );
    let mut separated = select.separated(", ");
    for group in group_ids {
        separated.push_bind(group);
    }
    select.push(")");
    let rows: Vec<(String, String)> = select.build_query_as().fetch_all(pool).await?;

    let touched: Vec<String> = rows.iter().map(|(id, _)| id.clone()).collect();
    let groups: HashSet<&str> = rows.iter().map(|(_, group)| group.as_str()).collect();

    let mut update: QueryBuilder<Sqlite> = QueryBuilder::new(
        "UPDATE transaction_meta SET transfer_group = NULL WHERE transfer_group IN (",
    );
    let mut separated = update.separated(", ");
    for group in group_ids {
        separated.push_bind(group);
    }
    update.push(")");
    let result = update.build().execute(pool).await?;

    Ok((result.rows_affected(), touched, groups.len()))
}
