use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::candidate::{pair_id, tie_break, Candidate, MatchReason, MatchableLeg};

/// Hard cap on the day-range tolerance, whatever the caller asks for.
pub const MAX_DAY_RANGE: i64 = 30;

/// Matching policy. The defaults (exact amount, three-day window, settled
/// transactions only) are configurable per request, not invariants.
#[derive(Debug, Clone, Copy)]
pub struct MatchTolerances {
    /// Maximum absolute difference between the two legs, in minor units.
    pub amount_tolerance_cents: i64,
    /// Maximum UTC calendar-day gap between the two legs, inclusive.
    pub day_range: i64,
    /// Pending amounts and dates may still change, so they sit out by
    /// default.
    pub include_pending: bool,
}

impl Default for MatchTolerances {
    fn default() -> Self {
        Self {
            amount_tolerance_cents: 0,
            day_range: 3,
            include_pending: false,
        }
    }
}

impl MatchTolerances {
    pub fn clamped(mut self) -> Self {
        self.day_range = self.day_range.clamp(0, MAX_DAY_RANGE);
        self.amount_tolerance_cents = self.amount_tolerance_cents.max(0);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub scanned: usize,
    pub candidates: usize,
    pub matched_pairs: usize,
    pub ambiguous_transactions: usize,
    pub ambiguous_pairs: usize,
}

#[derive(Debug)]
pub struct MatchOutcome {
    /// Unambiguous pairs, tightest first — selectable for approval.
    pub matched: Vec<Candidate>,
    /// Candidates touching a transaction with equally-good alternatives.
    /// Surfaced for visibility, never selectable.
    pub ambiguous: Vec<Candidate>,
    pub summary: MatchSummary,
}

/// Proposes transfer pairs from a pool of one user's transactions.
///
/// Greedy-by-tightness rather than optimal weighted matching: ambiguity is
/// surfaced and excluded instead of resolved, so the matcher never silently
/// guesses between equally-good options.
pub struct TransferMatcher {
    tolerances: MatchTolerances,
}

impl TransferMatcher {
    pub fn new(tolerances: MatchTolerances) -> Self {
        Self {
            tolerances: tolerances.clamped(),
        }
    }

    pub fn preview(&self, legs: &[MatchableLeg]) -> MatchOutcome {
        let scanned = legs.len();
        let eligible: Vec<&MatchableLeg> = legs
            .iter()
            .filter(|leg| self.tolerances.include_pending || !leg.pending)
            .collect();

        let outflows: Vec<&MatchableLeg> = eligible
            .iter()
            .copied()
            .filter(|leg| leg.amount_cents > 0)
            .collect();
        let inflows: Vec<&MatchableLeg> = eligible
            .iter()
            .copied()
            .filter(|leg| leg.amount_cents < 0)
            .collect();

        let mut candidates = Vec::new();
        for outflow in &outflows {
            for inflow in &inflows {
                if let Some(candidate) = self.pair_up(outflow, inflow) {
                    candidates.push(candidate);
                }
            }
        }
        let candidate_count = candidates.len();

        let ambiguous_ids = find_ambiguous_ids(&candidates);

        let (mut ambiguous, mut selectable): (Vec<Candidate>, Vec<Candidate>) =
            candidates.into_iter().partition(|c| {
                ambiguous_ids.contains(c.outflow_id.as_str())
                    || ambiguous_ids.contains(c.inflow_id.as_str())
            });
        ambiguous.sort_by(tie_break);
        selectable.sort_by(tie_break);

        // Greedy selection: every transaction ends up in at most one pair,
        // and tighter matches win.
        let mut matched = Vec::new();
        let mut used: HashSet<String> = HashSet::new();
        for candidate in selectable {
            if used.contains(&candidate.outflow_id) || used.contains(&candidate.inflow_id) {
                continue;
            }
            used.insert(candidate.outflow_id.clone());
            used.insert(candidate.inflow_id.clone());
            matched.push(candidate);
        }

        let summary = MatchSummary {
            scanned,
            candidates: candidate_count,
            matched_pairs: matched.len(),
            ambiguous_transactions: ambiguous_ids.len(),
            ambiguous_pairs: ambiguous.len(),
        };

        MatchOutcome {
            matched,
            ambiguous,
            summary,
        }
    }

    fn pair_up(&self, outflow: &MatchableLeg, inflow: &MatchableLeg) -> Option<Candidate> {
        // A transfer moves money between two of the user's accounts.
        if outflow.account_id == inflow.account_id {
            return None;
        }
        if (outflow.amount_cents + inflow.amount_cents).abs() > self.tolerances.amount_tolerance_cents
        {
            return None;
        }
        let day_gap = (outflow.day() - inflow.day()).num_days().abs();
        if day_gap > self.tolerances.day_range {
            return None;
        }
        let time_diff_ms = (outflow.effective_at - inflow.effective_at)
            .num_milliseconds()
            .abs();
        Some(Candidate {
            pair_id: pair_id(&outflow.id, &inflow.id),
            outflow_id: outflow.id.clone(),
            inflow_id: inflow.id.clone(),
            amount_cents: outflow.amount_cents.abs(),
            day_gap,
            time_diff_ms,
            reason: MatchReason::for_gap(day_gap),
        })
    }
}

/// A transaction is ambiguous when its two best-ranked candidates are
/// exactly tied on (day gap, time difference) — there is no principled way
/// to pick one.
fn find_ambiguous_ids(candidates: &[Candidate]) -> HashSet<String> {
    let mut by_txn: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, candidate) in candidates.iter().enumerate() {
        by_txn.entry(candidate.outflow_id.as_str()).or_default().push(i);
        by_txn.entry(candidate.inflow_id.as_str()).or_default().push(i);
    }

    let mut ambiguous = HashSet::new();
    for (txn_id, mut ranked) in by_txn {
        if ranked.len() < 2 {
            continue;
        }
        ranked.sort_by(|&a, &b| tie_break(&candidates[a], &candidates[b]));
        let best = &candidates[ranked[0]];
        let runner_up = &candidates[ranked[1]];
        if best.day_gap == runner_up.day_gap && best.time_diff_ms == runner_up.time_diff_ms {
            ambiguous.insert(txn_id.to_string());
        }
    }
    ambiguous
}
