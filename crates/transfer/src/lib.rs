pub mod candidate;
pub mod matcher;
pub mod writer;

pub use candidate::{pair_id, Candidate, MatchReason, MatchableLeg};
pub use matcher::{MatchOutcome, MatchSummary, MatchTolerances, TransferMatcher, MAX_DAY_RANGE};
pub use writer::{apply, recognized, unmark, ApplyOutcome, ApplyParams, RecognizedGroup, UnmarkOutcome};
