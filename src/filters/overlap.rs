//! Overlap resolver
//!
//! Runs after a refresh over the active nests. For every pair whose shared
//! area exceeds the threshold (as a percentage of the smaller nest), the
//! smaller nest is deactivated with reason `overlap`. On equal areas the
//! nest with the higher id goes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::NestStore;
use crate::error::{NestError, Result};
use crate::filters::differ;
use crate::filters::policy::{Classification, Evaluation};
use crate::geometry::{BBox, NestGeometry};
use crate::models::{DiscardReason, Nest};

struct Candidate {
    nest: Nest,
    geometry: NestGeometry,
    bbox: BBox,
    area: f64,
    disabled: bool,
}

/// Deactivates active nests mostly covered by another active nest.
pub struct OverlapResolver {
    nests: Arc<dyn NestStore>,
}

impl OverlapResolver {
    pub fn new(nests: Arc<dyn NestStore>) -> Self {
        Self { nests }
    }

    /// Deactivate overlapping nests; returns how many were deactivated.
    ///
    /// `threshold_percent` must lie strictly between 0 and 100.
    pub async fn disable_overlapping(&self, threshold_percent: f64) -> Result<usize> {
        if !(threshold_percent > 0.0 && threshold_percent < 100.0) {
            return Err(NestError::ConfigInvalid(format!(
                "overlap threshold must be between 0 and 100 (got {})",
                threshold_percent
            )));
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for nest in self.nests.list_active_nests().await? {
            match nest.geometry() {
                Ok(geometry) => candidates.push(Candidate {
                    bbox: geometry.bbox(),
                    area: geometry.area_m2(),
                    geometry,
                    nest,
                    disabled: false,
                }),
                Err(e) => {
                    warn!(
                        nest = %nest.full_name(),
                        error = %e,
                        "Skipping nest with invalid geometry in overlap pass"
                    );
                }
            }
        }
        candidates.sort_by_key(|c| c.nest.nest_id);

        info!(nests = candidates.len(), threshold_percent, "Checking active nests for overlap");

        let mut disabled = 0;
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                if candidates[i].disabled {
                    break;
                }
                if candidates[j].disabled {
                    continue;
                }

                let (a, b) = (&candidates[i], &candidates[j]);
                if !a.bbox.intersects(&b.bbox) {
                    continue;
                }
                let base = a.area.min(b.area);
                if base <= 0.0 {
                    continue;
                }

                let percent = a.geometry.intersection_area_m2(&b.geometry) / base * 100.0;
                if percent <= threshold_percent {
                    continue;
                }

                let (loser, keeper) = if b.area <= a.area { (j, i) } else { (i, j) };
                self.deactivate(&candidates[loser].nest, &candidates[keeper].nest, percent)
                    .await?;
                candidates[loser].disabled = true;
                disabled += 1;
            }
        }

        info!(disabled, "Overlap pass finished");
        Ok(disabled)
    }

    async fn deactivate(&self, nest: &Nest, kept: &Nest, percent: f64) -> Result<()> {
        let evaluation = Evaluation {
            m2: nest.m2,
            spawnpoints: nest.spawnpoints,
            classification: Classification::Discarded(DiscardReason::Overlap),
            explanations: Vec::new(),
        };
        let Some(mut update) = differ::build_update(nest, &evaluation) else {
            debug!(nest = %nest.full_name(), "Nest already discarded for overlap");
            return Ok(());
        };
        differ::stamp(&mut update, chrono::Utc::now().timestamp());

        self.nests
            .update_nest_partial(nest.nest_id, &update)
            .await
            .map_err(|e| NestError::Persistence {
                nest_id: nest.nest_id,
                message: e.to_string(),
            })?;

        warn!(
            nest = %nest.full_name(),
            overlaps = %kept.full_name(),
            overlap_percent = percent,
            "Deactivated nest for overlap"
        );
        Ok(())
    }
}
