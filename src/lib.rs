//! Nest Refresher - derives, filters and de-duplicates nest records
//!
//! A nest is a geofenced region with cached derived attributes: its area and
//! the number of spawnpoints inside it. The refresher recomputes whatever is
//! unknown, classifies each nest as active or discarded, writes only the
//! attributes that changed, and finally deactivates nests that mostly overlap
//! another active nest.
//!
//! ## Architecture
//!
//! - **Nest store** (`db`): SQLite table of nests behind the `NestStore` trait
//! - **Spawnpoint source** (`golbat`): read-only spatial queries against the
//!   scanner database behind the `SpawnpointSource` trait
//! - **Filters** (`filters`): policy, differ, refresher and overlap resolver
//! - **Worker pool** (`worker`): bounded concurrency with first-error abort
//!
//! ## Discard reasons
//!
//! | Reason | Meaning |
//! |--------|---------|
//! | `invalid` | polygon missing, unparsable or degenerate |
//! | `area` | area outside `[min_area_m2, max_area_m2]` |
//! | `spawnpoints` | fewer than `min_spawnpoints` recent spawnpoints |
//! | `overlap` | mostly covered by another active nest |

pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod geometry;
pub mod golbat;
pub mod models;
pub mod worker;

// Re-exports
pub use config::{Config, FilterConfig};
pub use db::{ListNestsOptions, NestStore, NestsDb};
pub use error::{NestError, Result};
pub use filters::{DbRefresher, NestRefreshOutcome, OverlapOutcome, OverlapResolver, RefreshSummary};
pub use geometry::NestGeometry;
pub use golbat::{GolbatDb, SpawnpointSource};
pub use models::{DiscardReason, Nest, NestPartialUpdate, NewNest};
