use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_core::{Money, Transaction};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed protocol violation: {0}")]
    Protocol(String),
    #[error("feed returned an all-empty delta page instead of terminating")]
    EmptyPage,
}

/// One raw transaction row as the aggregation feed delivers it. Signs
/// follow the feed convention: positive is money leaving the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTransaction {
    pub id: String,
    pub account_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency_code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub original_description: Option<String>,
    /// Full timestamp when the feed has one; otherwise only `date` is set.
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub authorized_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub category: Option<FeedCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCategory {
    pub primary: String,
    #[serde(default)]
    pub detailed: Option<String>,
}

impl FeedTransaction {
    /// Lowers a feed row into the stored shape for one user's item.
    /// Date-only rows become midnight UTC so every stored transaction with
    /// a date also has a timestamp.
    pub fn into_transaction(self, user_id: &str, item_id: &str) -> Transaction {
        let datetime = self
            .datetime
            .or_else(|| self.date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc()));
        Transaction {
            id: self.id,
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            account_id: self.account_id,
            amount_cents: Money::from_decimal(self.amount).to_cents(),
            currency_code: self.currency_code.unwrap_or_else(|| "USD".to_string()),
            name: self.name,
            merchant_name: self.merchant_name,
            original_description: self.original_description,
            datetime,
            authorized_datetime: self.authorized_datetime,
            pending: self.pending,
            category_primary: self.category.as_ref().map(|c| c.primary.clone()),
            category_detailed: self.category.and_then(|c| c.detailed),
            is_removed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedTransaction {
    pub id: String,
}

/// One page of the paginated delta stream: everything that changed since
/// the cursor, plus where to resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPage {
    #[serde(default)]
    pub added: Vec<FeedTransaction>,
    #[serde(default)]
    pub modified: Vec<FeedTransaction>,
    #[serde(default)]
    pub removed: Vec<RemovedTransaction>,
    pub next_cursor: String,
    pub has_more: bool,
}

impl DeltaPage {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// The aggregation feed, reduced to the one call sync needs. Treated as
/// unreliable: requests fail, and pages can be malformed.
pub trait FeedClient: Send + Sync {
    fn fetch_delta_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> impl Future<Output = Result<DeltaPage, FeedError>> + Send;
}

// ── HTTP-backed client ────────────────────────────────────────────────────────

/// Real client: one JSON POST per page against the aggregator's delta
/// endpoint.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeltaRequest<'a> {
    access_token: &'a str,
    cursor: Option<&'a str>,
    page_size: u32,
}

impl FeedClient for HttpFeed {
    fn fetch_delta_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> impl Future<Output = Result<DeltaPage, FeedError>> + Send {
        let request = self
            .client
            .post(format!("{}/transactions/delta", self.base_url))
            .json(&DeltaRequest {
                access_token,
                cursor,
                page_size,
            });
        async move {
            let response = request.send().await?.error_for_status()?;
            Ok(response.json::<DeltaPage>().await?)
        }
    }
}

// ── Mock client (always available, used for tests) ────────────────────────────

/// Serves a preprogrammed sequence of pages or failures, recording every
/// requested cursor — enough to exercise the reconciler without a network.
#[derive(Default)]
pub struct MockFeed {
    pages: Mutex<VecDeque<Result<DeltaPage, FeedError>>>,
    requested_cursors: Mutex<Vec<Option<String>>>,
}

impl MockFeed {
    pub fn new(pages: Vec<Result<DeltaPage, FeedError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            requested_cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.requested_cursors.lock().unwrap().clone()
    }

    pub fn remaining_pages(&self) -> usize {
        self.pages.lock().unwrap().len()
    }
}

impl FeedClient for MockFeed {
    fn fetch_delta_page(
        &self,
        _access_token: &str,
        cursor: Option<&str>,
        _page_size: u32,
    ) -> impl Future<Output = Result<DeltaPage, FeedError>> + Send {
        self.requested_cursors
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));
        let next = self.pages.lock().unwrap().pop_front();
        async move {
            next.unwrap_or_else(|| {
                Err(FeedError::Protocol(
                    "mock feed ran out of pages".to_string(),
                ))
            })
        }
    }
}
