//! Nest filtering: policy, minimal updates, refresh orchestration and
//! overlap resolution

pub mod differ;
pub mod overlap;
pub mod policy;
pub mod refresher;

pub use overlap::OverlapResolver;
pub use policy::{Classification, Evaluation};
pub use refresher::{DbRefresher, NestRefreshOutcome, OverlapOutcome, RefreshSummary};
