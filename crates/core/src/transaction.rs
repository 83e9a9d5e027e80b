use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One bank-reported movement of money, as delivered by the aggregation
/// feed. Positive amounts are outflows (money left the account), negative
/// amounts are inflows — the feed's sign convention, kept as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Feed-assigned, globally unique, stable across syncs. Upsert key.
    pub id: String,
    pub user_id: String,
    pub item_id: String,
    pub account_id: String,
    pub amount_cents: i64,
    pub currency_code: String,
    pub name: String,
    pub merchant_name: Option<String>,
    pub original_description: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub authorized_datetime: Option<DateTime<Utc>>,
    pub pending: bool,
    pub category_primary: Option<String>,
    pub category_detailed: Option<String>,
    /// Soft delete — the feed withdrew this transaction. Never physically
    /// deleted.
    pub is_removed: bool,
}

impl Transaction {
    /// First non-null of the two feed timestamps is authoritative. Every
    /// consumer (matching, filtering, display) goes through this one place.
    pub fn effective_datetime(&self) -> Option<DateTime<Utc>> {
        self.datetime.or(self.authorized_datetime)
    }

    /// UTC calendar day of the effective timestamp.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.effective_datetime().map(|dt| dt.date_naive())
    }

    pub fn is_outflow(&self) -> bool {
        self.amount_cents > 0
    }

    pub fn is_inflow(&self) -> bool {
        self.amount_cents < 0
    }
}

/// Sparse per-transaction side record: at most one per transaction id,
/// created lazily on the first tag or transfer write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub transaction_id: String,
    /// Non-null means "this transaction is a leg of a recognized transfer".
    pub transfer_group: Option<String>,
    pub bucket1_tag: Option<String>,
    pub bucket2_tag: Option<String>,
    pub meta_tag: Option<String>,
}

impl TransactionMeta {
    /// A transaction is either a categorized spend/income event or a
    /// transfer leg, never both.
    pub fn has_classification_conflict(&self) -> bool {
        self.transfer_group.is_some() && (self.bucket1_tag.is_some() || self.bucket2_tag.is_some())
    }
}

/// A full tag assignment. Overwrites the stored values — absent fields
/// clear, they do not merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagAssignment {
    pub bucket1_tag: Option<String>,
    pub bucket2_tag: Option<String>,
    pub meta_tag: Option<String>,
}

impl TagAssignment {
    pub fn has_bucket(&self) -> bool {
        self.bucket1_tag.is_some() || self.bucket2_tag.is_some()
    }
}
