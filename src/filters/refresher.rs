//! Refresh orchestration
//!
//! [`DbRefresher`] evaluates nests against the filter policy, writes the
//! minimal update for each, and after a full pass over the collection runs
//! the overlap resolver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FilterConfig;
use crate::db::{ListNestsOptions, NestStore};
use crate::error::{NestError, Result};
use crate::filters::differ;
use crate::filters::overlap::OverlapResolver;
use crate::filters::policy::{self, Classification, Evaluation};
use crate::golbat::SpawnpointSource;
use crate::models::Nest;
use crate::worker::for_each_concurrent;

/// What happened to a single nest.
#[derive(Debug, Clone)]
pub struct NestRefreshOutcome {
    /// The nest as stored after the refresh
    pub nest: Nest,
    pub classification: Classification,
    pub changed_fields: Vec<&'static str>,
    pub explanations: Vec<String>,
    /// Whether an update was written
    pub written: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OverlapOutcome {
    Skipped { max_overlap_percent: f64 },
    Completed { disabled: usize },
}

/// Totals for a full refresh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub processed: usize,
    pub changed: usize,
    pub overlap: OverlapOutcome,
}

/// Refreshes nests stored behind a [`NestStore`].
#[derive(Clone)]
pub struct DbRefresher {
    nests: Arc<dyn NestStore>,
    golbat: Option<Arc<dyn SpawnpointSource>>,
}

impl DbRefresher {
    /// `golbat` is optional; without it spawnpoint counts are never queried.
    pub fn new(nests: Arc<dyn NestStore>, golbat: Option<Arc<dyn SpawnpointSource>>) -> Self {
        Self { nests, golbat }
    }

    pub async fn evaluate(&self, config: &FilterConfig, nest: &Nest) -> Evaluation {
        policy::evaluate(nest, config, self.golbat.as_deref()).await
    }

    /// Evaluate one nest and persist whatever changed.
    ///
    /// The nest must carry its polygon. On a failed write the stored row is
    /// left as it was and [`NestError::Persistence`] is returned.
    pub async fn refresh_nest(
        &self,
        config: &FilterConfig,
        nest: &Nest,
    ) -> Result<NestRefreshOutcome> {
        let label = nest.full_name();
        let evaluation = self.evaluate(config, nest).await;

        let Some(mut update) = differ::build_update(nest, &evaluation) else {
            debug!(nest = %label, "Nest unchanged");
            return Ok(NestRefreshOutcome {
                nest: nest.clone(),
                classification: evaluation.classification,
                changed_fields: Vec::new(),
                explanations: evaluation.explanations,
                written: false,
            });
        };
        differ::stamp(&mut update, chrono::Utc::now().timestamp());

        if let Err(e) = self.nests.update_nest_partial(nest.nest_id, &update).await {
            error!(nest = %label, error = %e, "Failed to update nest");
            return Err(NestError::Persistence {
                nest_id: nest.nest_id,
                message: e.to_string(),
            });
        }

        let refreshed = differ::apply(nest, &update);
        match evaluation.classification {
            Classification::Active if !nest.is_active() => {
                info!(nest = %label, "Activated nest");
            }
            Classification::Discarded(reason) if nest.discarded != Some(reason) => {
                warn!(
                    nest = %label,
                    reason = %reason,
                    details = %evaluation.explanations.last().map(String::as_str).unwrap_or(""),
                    "Deactivated nest"
                );
            }
            _ => {}
        }

        Ok(NestRefreshOutcome {
            nest: refreshed,
            classification: evaluation.classification,
            changed_fields: update.changed_fields(),
            explanations: evaluation.explanations,
            written: true,
        })
    }

    pub async fn refresh_nest_by_id(
        &self,
        config: &FilterConfig,
        nest_id: i64,
    ) -> Result<NestRefreshOutcome> {
        let nest = self.nests.get_nest(nest_id, true).await?;
        self.refresh_nest(config, &nest).await
    }

    /// Refresh every stored nest, then resolve overlaps.
    ///
    /// The overlap pass only runs if every nest was refreshed and
    /// `max_overlap_percent` is strictly between 0 and 100.
    pub async fn refresh_all_nests(
        &self,
        config: &FilterConfig,
        cancel: CancellationToken,
    ) -> Result<RefreshSummary> {
        config.validate()?;

        let nests = self
            .nests
            .list_nests(ListNestsOptions {
                include_polygon: true,
            })
            .await?;
        info!(nests = nests.len(), concurrency = config.concurrency, "Refreshing nests");

        let processed = Arc::new(AtomicUsize::new(0));
        let changed = Arc::new(AtomicUsize::new(0));
        {
            let refresher = self.clone();
            let shared_config = Arc::new(config.clone());
            let processed = Arc::clone(&processed);
            let changed = Arc::clone(&changed);

            for_each_concurrent(nests, config.concurrency, &cancel, move |nest: Nest| {
                let refresher = refresher.clone();
                let config = Arc::clone(&shared_config);
                let processed = Arc::clone(&processed);
                let changed = Arc::clone(&changed);
                async move {
                    let outcome = refresher.refresh_nest(&config, &nest).await?;
                    processed.fetch_add(1, Ordering::Relaxed);
                    if outcome.written {
                        changed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok::<(), NestError>(())
                }
            })
            .await?;
        }

        let processed = processed.load(Ordering::Relaxed);
        let changed = changed.load(Ordering::Relaxed);
        info!(processed, changed, "Nest refresh finished");

        let overlap = if config.overlap_enabled() {
            let resolver = OverlapResolver::new(Arc::clone(&self.nests));
            match resolver.disable_overlapping(config.max_overlap_percent).await {
                Ok(disabled) => OverlapOutcome::Completed { disabled },
                Err(e) => {
                    error!(error = %e, "Overlap pass failed");
                    return Err(e);
                }
            }
        } else {
            info!(
                max_overlap_percent = config.max_overlap_percent,
                "Overlap pass skipped"
            );
            OverlapOutcome::Skipped {
                max_overlap_percent: config.max_overlap_percent,
            }
        };

        Ok(RefreshSummary {
            processed,
            changed,
            overlap,
        })
    }
}
