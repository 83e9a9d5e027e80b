pub mod feed;
pub mod reconciler;

pub use feed::{DeltaPage, FeedClient, FeedError, FeedTransaction, HttpFeed, MockFeed, RemovedTransaction};
pub use reconciler::{SyncOutcome, SyncPolicy, SyncReconciler};
