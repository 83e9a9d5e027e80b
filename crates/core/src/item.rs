use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A linked bank connection. Owns the opaque feed credential, the opaque
/// resumption cursor, and the lease timestamp used for sync mutual
/// exclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    /// Feed-assigned; advanced after every successfully applied page. None
    /// until the first sync.
    pub cursor: Option<String>,
    /// A sync in progress holds the lease until this instant. None or past
    /// means unclaimed.
    pub lock_until: Option<DateTime<Utc>>,
    pub institution_name: Option<String>,
}

impl Item {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub item_id: String,
    pub user_id: String,
    pub name: String,
    pub mask: Option<String>,
}
