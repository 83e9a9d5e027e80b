use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use tally_core::{DateWindow, Money, TagAssignment};
use tally_storage::cache::ReadCache;
use tally_storage::db::{self, DbPool, EnrichedTransaction};
use tally_sync::{FeedClient, SyncOutcome, SyncReconciler};
use tally_transfer::{
    apply, recognized, unmark, ApplyParams, Candidate, MatchSummary, MatchTolerances,
    MatchableLeg, TransferMatcher,
};

use crate::error::ServerError;

pub struct AppState<F: FeedClient> {
    pub db: DbPool,
    pub cache: Arc<ReadCache>,
    pub reconciler: SyncReconciler<F>,
}

pub fn router<F: FeedClient + 'static>(state: Arc<AppState<F>>) -> Router {
    Router::new()
        .route("/users/{user_id}/sync", post(sync_user::<F>))
        .route("/users/{user_id}/transactions", get(list_transactions::<F>))
        .route(
            "/users/{user_id}/transactions/{transaction_id}/tags",
            put(set_transaction_tags::<F>),
        )
        .route(
            "/users/{user_id}/transfers/preview",
            post(preview_transfers::<F>),
        )
        .route("/users/{user_id}/transfers/apply", post(apply_transfers::<F>))
        .route(
            "/users/{user_id}/transfers/unmark",
            post(unmark_transfers::<F>),
        )
        .route(
            "/users/{user_id}/transfers/recognized",
            get(recognized_transfers::<F>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Request shapes ────────────────────────────────────────────────────────────

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ServerError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ServerError::Validation(format!("{field} must be a YYYY-MM-DD date")))
}

fn window_from(
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<DateWindow, ServerError> {
    let start = start_date.map(|s| parse_date("startDate", s)).transpose()?;
    let end = end_date.map(|s| parse_date("endDate", s)).transpose()?;
    let window = DateWindow::new(start, end);
    if !window.is_valid() {
        return Err(ServerError::Validation(
            "startDate must not be after endDate".to_string(),
        ));
    }
    Ok(window)
}

fn tolerances_from(
    include_pending: Option<bool>,
    amount_tolerance: Option<Decimal>,
    day_range_tolerance: Option<i64>,
) -> Result<MatchTolerances, ServerError> {
    let defaults = MatchTolerances::default();
    let amount_tolerance_cents = match amount_tolerance {
        Some(tolerance) if tolerance.is_sign_negative() => {
            return Err(ServerError::Validation(
                "amountTolerance must not be negative".to_string(),
            ));
        }
        Some(tolerance) => Money::from_decimal(tolerance).to_cents(),
        None => defaults.amount_tolerance_cents,
    };
    let day_range = match day_range_tolerance {
        Some(days) if days < 0 => {
            return Err(ServerError::Validation(
                "dayRangeTolerance must not be negative".to_string(),
            ));
        }
        Some(days) => days,
        None => defaults.day_range,
    };
    Ok(MatchTolerances {
        amount_tolerance_cents,
        day_range,
        include_pending: include_pending.unwrap_or(defaults.include_pending),
    }
    .clamped())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PreviewRequest {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub include_pending: Option<bool>,
    pub amount_tolerance: Option<Decimal>,
    pub day_range_tolerance: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplyRequest {
    pub pair_ids: Vec<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub include_pending: Option<bool>,
    #[serde(default)]
    pub amount_tolerance: Option<Decimal>,
    #[serde(default)]
    pub day_range_tolerance: Option<i64>,
    #[serde(default)]
    pub overwrite: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnmarkRequest {
    pub group_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RecognizedQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TagsRequest {
    pub bucket1_tag: Option<String>,
    pub bucket2_tag: Option<String>,
    pub meta_tag: Option<String>,
}

// ── Response shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairView {
    pub pair_id: String,
    pub outflow_id: String,
    pub inflow_id: String,
    pub amount: Money,
    pub day_gap: i64,
    pub time_diff_ms: i64,
    pub reason: Option<tally_transfer::MatchReason>,
}

impl From<&Candidate> for PairView {
    fn from(candidate: &Candidate) -> Self {
        PairView {
            pair_id: candidate.pair_id.clone(),
            outflow_id: candidate.outflow_id.clone(),
            inflow_id: candidate.inflow_id.clone(),
            amount: Money::from_cents(candidate.amount_cents),
            day_gap: candidate.day_gap,
            time_diff_ms: candidate.time_diff_ms,
            reason: candidate.reason,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub summary: MatchSummary,
    pub pairs: Vec<PairView>,
    pub ambiguous_pairs: Vec<PairView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub approved: u32,
    pub written_pairs: u32,
    pub skipped_existing: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub summary: ApplySummary,
    pub applied_pair_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: String,
    pub account_id: String,
    pub account_name: Option<String>,
    pub institution_name: Option<String>,
    pub amount: Money,
    pub currency_code: String,
    pub name: String,
    pub merchant_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub pending: bool,
    pub category_primary: Option<String>,
    pub category_detailed: Option<String>,
    pub transfer_group: Option<String>,
    pub bucket1_tag: Option<String>,
    pub bucket2_tag: Option<String>,
    pub meta_tag: Option<String>,
}

impl From<EnrichedTransaction> for TransactionView {
    fn from(row: EnrichedTransaction) -> Self {
        let date = row.transaction.effective_date();
        TransactionView {
            id: row.transaction.id,
            account_id: row.transaction.account_id,
            account_name: row.account_name,
            institution_name: row.institution_name,
            amount: Money::from_cents(row.transaction.amount_cents),
            currency_code: row.transaction.currency_code,
            name: row.transaction.name,
            merchant_name: row.transaction.merchant_name,
            date,
            pending: row.transaction.pending,
            category_primary: row.transaction.category_primary,
            category_detailed: row.transaction.category_detailed,
            transfer_group: row.transfer_group,
            bucket1_tag: row.bucket1_tag,
            bucket2_tag: row.bucket2_tag,
            meta_tag: row.meta_tag,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedGroupView {
    pub group_id: String,
    pub transactions: Vec<TransactionView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedResponse {
    pub groups: Vec<RecognizedGroupView>,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub async fn sync_user<F: FeedClient>(
    State(state): State<Arc<AppState<F>>>,
    Path(user_id): Path<String>,
) -> Result<Json<SyncOutcome>, ServerError> {
    let outcome = state.reconciler.sync_user(&user_id).await?;
    Ok(Json(outcome))
}

pub async fn list_transactions<F: FeedClient>(
    State(state): State<Arc<AppState<F>>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<TransactionView>>, ServerError> {
    let rows = state.cache.get_all_active(&state.db, &user_id).await?;
    Ok(Json(rows.into_iter().map(TransactionView::from).collect()))
}

pub async fn set_transaction_tags<F: FeedClient>(
    State(state): State<Arc<AppState<F>>>,
    Path((user_id, transaction_id)): Path<(String, String)>,
    Json(request): Json<TagsRequest>,
) -> Result<StatusCode, ServerError> {
    let transaction = db::transaction_by_id(&state.db, &transaction_id)
        .await?
        .filter(|tx| tx.user_id == user_id)
        .ok_or_else(|| ServerError::NotFound("transaction".to_string()))?;

    db::set_tags(
        &state.db,
        &transaction.id,
        &TagAssignment {
            bucket1_tag: request.bucket1_tag,
            bucket2_tag: request.bucket2_tag,
            meta_tag: request.meta_tag,
        },
    )
    .await?;
    state
        .cache
        .invalidate_transactions(std::slice::from_ref(&transaction.id))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn preview_transfers<F: FeedClient>(
    State(state): State<Arc<AppState<F>>>,
    Path(user_id): Path<String>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ServerError> {
    let window = window_from(request.start_date.as_deref(), request.end_date.as_deref())?;
    let tolerances = tolerances_from(
        request.include_pending,
        request.amount_tolerance,
        request.day_range_tolerance,
    )?;

    let rows = db::match_pool_for_user(
        &state.db,
        &user_id,
        &window,
        tolerances.include_pending,
        false,
    )
    .await?;
    let legs: Vec<MatchableLeg> = rows
        .iter()
        .filter_map(MatchableLeg::from_transaction)
        .collect();
    let outcome = TransferMatcher::new(tolerances).preview(&legs);

    Ok(Json(PreviewResponse {
        summary: outcome.summary,
        pairs: outcome.matched.iter().map(PairView::from).collect(),
        ambiguous_pairs: outcome.ambiguous.iter().map(PairView::from).collect(),
    }))
}

pub async fn apply_transfers<F: FeedClient>(
    State(state): State<Arc<AppState<F>>>,
    Path(user_id): Path<String>,
    Json(request): Json<ApplyRequest>,
) -> Result<Json<ApplyResponse>, ServerError> {
    let window = window_from(request.start_date.as_deref(), request.end_date.as_deref())?;
    let tolerances = tolerances_from(
        request.include_pending,
        request.amount_tolerance,
        request.day_range_tolerance,
    )?;

    let outcome = apply(
        &state.db,
        &state.cache,
        &user_id,
        &ApplyParams {
            pair_ids: request.pair_ids,
            window,
            tolerances,
            overwrite: request.overwrite.unwrap_or(false),
        },
    )
    .await?;

    Ok(Json(ApplyResponse {
        summary: ApplySummary {
            approved: outcome.approved,
            written_pairs: outcome.written_pairs,
            skipped_existing: outcome.skipped_existing,
        },
        applied_pair_ids: outcome.applied_pair_ids,
    }))
}

pub async fn unmark_transfers<F: FeedClient>(
    State(state): State<Arc<AppState<F>>>,
    Path(_user_id): Path<String>,
    Json(request): Json<UnmarkRequest>,
) -> Result<Json<tally_transfer::UnmarkOutcome>, ServerError> {
    let outcome = unmark(&state.db, &state.cache, &request.group_ids).await?;
    Ok(Json(outcome))
}

pub async fn recognized_transfers<F: FeedClient>(
    State(state): State<Arc<AppState<F>>>,
    Path(user_id): Path<String>,
    Query(query): Query<RecognizedQuery>,
) -> Result<Json<RecognizedResponse>, ServerError> {
    let window = window_from(query.start_date.as_deref(), query.end_date.as_deref())?;
    let groups = recognized(&state.db, &user_id, &window).await?;
    Ok(Json(RecognizedResponse {
        groups: groups
            .into_iter()
            .map(|group| RecognizedGroupView {
                group_id: group.group_id,
                transactions: group
                    .transactions
                    .into_iter()
                    .map(TransactionView::from)
                    .collect(),
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_request_rejects_unknown_fields() {
        let parsed: Result<PreviewRequest, _> =
            serde_json::from_str(r#"{"startDate": "2024-01-01", "bogus": true}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn preview_request_accepts_camel_case_fields() {
        let request: PreviewRequest = serde_json::from_str(
            r#"{"startDate": "2024-01-01", "endDate": "2024-01-31", "amountTolerance": "0.50", "dayRangeTolerance": 5}"#,
        )
        .unwrap();
        assert_eq!(request.start_date.as_deref(), Some("2024-01-01"));
        assert_eq!(request.day_range_tolerance, Some(5));
    }

    #[test]
    fn malformed_dates_are_rejected_before_side_effects() {
        let err = window_from(Some("01/02/2024"), None).unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[test]
    fn reversed_window_is_rejected() {
        let err = window_from(Some("2024-02-01"), Some("2024-01-01")).unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[test]
    fn tolerances_convert_currency_units_to_cents() {
        let tolerances =
            tolerances_from(None, Some("0.50".parse().unwrap()), None).unwrap();
        assert_eq!(tolerances.amount_tolerance_cents, 50);
        assert_eq!(tolerances.day_range, 3);
        assert!(!tolerances.include_pending);
    }

    #[test]
    fn negative_tolerances_are_rejected() {
        assert!(matches!(
            tolerances_from(None, Some("-1".parse().unwrap()), None),
            Err(ServerError::Validation(_))
        ));
        assert!(matches!(
            tolerances_from(None, None, Some(-2)),
            Err(ServerError::Validation(_))
        ));
    }

    #[test]
    fn oversized_day_range_is_clamped_not_rejected() {
        let tolerances = tolerances_from(None, None, Some(365)).unwrap();
        assert_eq!(tolerances.day_range, tally_transfer::MAX_DAY_RANGE);
    }

    #[test]
    fn apply_request_requires_pair_ids_field() {
        let parsed: Result<ApplyRequest, _> = serde_json::from_str(r#"{"overwrite": true}"#);
        assert!(parsed.is_err());

        let parsed: ApplyRequest = serde_json::from_str(r#"{"pairIds": []}"#).unwrap();
        assert!(parsed.pair_ids.is_empty());
        assert_eq!(parsed.overwrite, None);
    }
}
