use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tally_core::Transaction;

/// Order-independent identifier for a proposed pairing: SHA-256 over the two
/// transaction ids joined in lexicographic order, hex-encoded. The same two
/// transactions always produce the same pair id, whichever leg comes first.
pub fn pair_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(lo.as_bytes());
    hasher.update(b":");
    hasher.update(hi.as_bytes());
    hex::encode(hasher.finalize())
}

/// Human-readable label for the tightest gaps. Wider gaps inside tolerance
/// are still valid candidates, just unlabeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    SameDay,
    OneDayGap,
    TwoDayGap,
}

impl MatchReason {
    pub fn for_gap(day_gap: i64) -> Option<Self> {
        match day_gap {
            0 => Some(MatchReason::SameDay),
            1 => Some(MatchReason::OneDayGap),
            2 => Some(MatchReason::TwoDayGap),
            _ => None,
        }
    }
}

/// One side of a potential transfer, reduced to the fields matching needs.
/// Construction is the single gate for eligibility that does not depend on
/// tolerances: zero amounts and undated transactions never become legs.
#[derive(Debug, Clone)]
pub struct MatchableLeg {
    pub id: String,
    pub account_id: String,
    pub amount_cents: i64,
    pub effective_at: DateTime<Utc>,
    pub pending: bool,
}

impl MatchableLeg {
    pub fn from_transaction(tx: &Transaction) -> Option<Self> {
        if tx.amount_cents == 0 {
            return None;
        }
        let effective_at = tx.effective_datetime()?;
        Some(MatchableLeg {
            id: tx.id.clone(),
            account_id: tx.account_id.clone(),
            amount_cents: tx.amount_cents,
            effective_at,
            pending: tx.pending,
        })
    }

    pub fn day(&self) -> NaiveDate {
        self.effective_at.date_naive()
    }
}

/// A proposed outflow/inflow pairing. Ephemeral — computed per preview,
/// persisted only once a user approves it as a transfer group.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub pair_id: String,
    pub outflow_id: String,
    pub inflow_id: String,
    /// Absolute amount of the pair, in minor units.
    pub amount_cents: i64,
    pub day_gap: i64,
    pub time_diff_ms: i64,
    pub reason: Option<MatchReason>,
}

impl Candidate {
    /// The transaction-id pair in lexicographic order — the final, fully
    /// deterministic component of the tie-break.
    pub fn id_pair(&self) -> (&str, &str) {
        if self.outflow_id <= self.inflow_id {
            (&self.outflow_id, &self.inflow_id)
        } else {
            (&self.inflow_id, &self.outflow_id)
        }
    }

    pub fn touches(&self, transaction_id: &str) -> bool {
        self.outflow_id == transaction_id || self.inflow_id == transaction_id
    }
}

/// Tie-break order: tighter day gap first, then smaller wall-clock
/// difference, then the lexicographic id pair so equal candidates rank
/// deterministically.
pub(crate) fn tie_break(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    a.day_gap
        .cmp(&b.day_gap)
        .then(a.time_diff_ms.cmp(&b.time_diff_ms))
        .then_with(|| a.id_pair().cmp(&b.id_pair()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pair_id_is_symmetric() {
        assert_eq!(pair_id("txn-a", "txn-b"), pair_id("txn-b", "txn-a"));
    }

    #[test]
    fn pair_id_distinguishes_pairs() {
        assert_ne!(pair_id("txn-a", "txn-b"), pair_id("txn-a", "txn-c"));
    }

    #[test]
    fn pair_id_is_hex_sha256() {
        let id = pair_id("a", "b");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn reason_labels_only_tight_gaps() {
        assert_eq!(MatchReason::for_gap(0), Some(MatchReason::SameDay));
        assert_eq!(MatchReason::for_gap(1), Some(MatchReason::OneDayGap));
        assert_eq!(MatchReason::for_gap(2), Some(MatchReason::TwoDayGap));
        assert_eq!(MatchReason::for_gap(3), None);
        assert_eq!(MatchReason::for_gap(30), None);
    }

    #[test]
    fn zero_amount_never_becomes_a_leg() {
        let mut tx = sample_tx();
        tx.amount_cents = 0;
        assert!(MatchableLeg::from_transaction(&tx).is_none());
    }

    #[test]
    fn undated_transaction_never_becomes_a_leg() {
        let mut tx = sample_tx();
        tx.datetime = None;
        tx.authorized_datetime = None;
        assert!(MatchableLeg::from_transaction(&tx).is_none());
    }

    #[test]
    fn leg_uses_effective_datetime() {
        let mut tx = sample_tx();
        let authorized = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        tx.datetime = None;
        tx.authorized_datetime = Some(authorized);
        let leg = MatchableLeg::from_transaction(&tx).unwrap();
        assert_eq!(leg.effective_at, authorized);
        assert_eq!(leg.day(), authorized.date_naive());
    }

    fn sample_tx() -> Transaction {
        Transaction {
            id: "txn-1".to_string(),
            user_id: "user-1".to_string(),
            item_id: "item-1".to_string(),
            account_id: "checking".to_string(),
            amount_cents: 5000,
            currency_code: "USD".to_string(),
            name: "TRANSFER".to_string(),
            merchant_name: None,
            original_description: None,
            datetime: Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()),
            authorized_datetime: None,
            pending: false,
            category_primary: None,
            category_detailed: None,
            is_removed: false,
        }
    }
}
