//! Nest filter policy
//!
//! Decides, for one nest, what its area and spawnpoint count should be and
//! whether it stays active. Classification precedence:
//!
//! 1. area unknown -> `invalid`
//! 2. area below `min_area_m2` or above a positive `max_area_m2` -> `area`
//! 3. known count below `min_spawnpoints` -> `spawnpoints`
//! 4. otherwise active
//!
//! An unknown spawnpoint count never discards a nest on its own. A nest the
//! overlap pass discarded stays discarded while it would otherwise be active.

use tracing::{info, warn};

use crate::config::FilterConfig;
use crate::error::NestError;
use crate::geometry::NestGeometry;
use crate::golbat::SpawnpointSource;
use crate::models::{DiscardReason, Nest};

/// Result of applying the policy to a nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Active,
    Discarded(DiscardReason),
}

impl Classification {
    pub fn is_active(&self) -> bool {
        matches!(self, Classification::Active)
    }

    pub fn discarded(&self) -> Option<DiscardReason> {
        match self {
            Classification::Active => None,
            Classification::Discarded(reason) => Some(*reason),
        }
    }
}

/// Outcome of computing a nest's area from its polygon.
#[derive(Debug)]
pub enum AreaOutcome {
    /// Geometry parsed; the parsed shape is kept for the spawnpoint query
    Computed { m2: f64, geometry: NestGeometry },
    Invalid(NestError),
}

/// Target state for a nest after evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub m2: Option<f64>,
    pub spawnpoints: Option<i64>,
    pub classification: Classification,
    /// Human-readable notes on what was computed and why the nest was discarded
    pub explanations: Vec<String>,
}

pub fn compute_area(nest: &Nest) -> AreaOutcome {
    match nest.geometry() {
        Ok(geometry) => AreaOutcome::Computed {
            m2: geometry.area_m2(),
            geometry,
        },
        Err(e) => AreaOutcome::Invalid(e),
    }
}

/// Whether the spawnpoint count should be (re)queried for a nest.
///
/// Oversized nests are never queried; they get discarded on area anyway and
/// the query cost grows with the polygon.
pub fn needs_spawnpoint_query(
    m2: Option<f64>,
    spawnpoints: Option<i64>,
    config: &FilterConfig,
    source_configured: bool,
) -> bool {
    let Some(area) = m2 else {
        return false;
    };
    let size_ok = config.max_area_m2 <= 0.0 || area <= config.max_area_m2;
    let wanted = spawnpoints.is_none() || config.force_spawnpoints_refresh;
    size_ok && wanted && source_configured
}

pub fn classify(
    m2: Option<f64>,
    spawnpoints: Option<i64>,
    config: &FilterConfig,
) -> Classification {
    judge(m2, spawnpoints, config).0
}

/// Classification plus a description of the failed criterion.
fn judge(
    m2: Option<f64>,
    spawnpoints: Option<i64>,
    config: &FilterConfig,
) -> (Classification, Option<String>) {
    let Some(area) = m2 else {
        return (
            Classification::Discarded(DiscardReason::Invalid),
            Some("area unknown: geometry is invalid".to_string()),
        );
    };

    if area < config.min_area_m2 {
        return (
            Classification::Discarded(DiscardReason::Area),
            Some(format!(
                "area {:.1} m2 is below the minimum of {:.1} m2",
                area, config.min_area_m2
            )),
        );
    }
    if config.max_area_m2 > 0.0 && area > config.max_area_m2 {
        return (
            Classification::Discarded(DiscardReason::Area),
            Some(format!(
                "area {:.1} m2 is above the maximum of {:.1} m2",
                area, config.max_area_m2
            )),
        );
    }

    if let Some(count) = spawnpoints {
        if count < config.min_spawnpoints {
            return (
                Classification::Discarded(DiscardReason::Spawnpoints),
                Some(format!(
                    "{} spawnpoints is below the minimum of {}",
                    count, config.min_spawnpoints
                )),
            );
        }
    }

    (Classification::Active, None)
}

/// Derive the target attributes and classification for a nest.
///
/// Never fails: geometry problems classify the nest as invalid and a failed
/// spawnpoint query falls back to the current count.
pub async fn evaluate(
    nest: &Nest,
    config: &FilterConfig,
    source: Option<&dyn SpawnpointSource>,
) -> Evaluation {
    let label = nest.full_name();
    let mut m2 = nest.m2;
    let mut spawnpoints = nest.spawnpoints;
    let mut explanations = Vec::new();
    let mut geometry = None;

    if m2.is_none() {
        match compute_area(nest) {
            AreaOutcome::Computed { m2: area, geometry: parsed } => {
                info!(nest = %label, area_m2 = area, "Computed nest area");
                explanations.push(format!("area computed: {:.1} m2", area));
                m2 = Some(area);
                geometry = Some(parsed);
            }
            AreaOutcome::Invalid(e) => {
                warn!(nest = %label, error = %e, "Nest geometry is invalid");
                explanations.push(format!("invalid geometry: {}", e));
            }
        }
    }

    if let Some(source) = source.filter(|_| needs_spawnpoint_query(m2, spawnpoints, config, true)) {
        let parsed = match geometry.take() {
            Some(parsed) => Ok(parsed),
            None => nest.geometry(),
        };

        match parsed {
            Err(e) => {
                warn!(
                    nest = %label,
                    error = %e,
                    "Nest geometry is invalid, resetting area and spawnpoints"
                );
                explanations.push(format!("invalid geometry: {}", e));
                m2 = None;
                spawnpoints = None;
            }
            Ok(parsed) => match source.spawnpoint_count(&parsed).await {
                Ok(count) => {
                    info!(nest = %label, spawnpoints = count, "Counted nest spawnpoints");
                    explanations.push(format!("spawnpoints counted: {}", count));
                    spawnpoints = Some(count);
                }
                Err(e) => match spawnpoints {
                    Some(current) => {
                        warn!(
                            nest = %label,
                            error = %e,
                            spawnpoints = current,
                            "Spawnpoint query failed, keeping current count"
                        );
                        explanations.push(format!(
                            "spawnpoint query failed ({}), keeping current count {}",
                            e, current
                        ));
                    }
                    None => {
                        warn!(
                            nest = %label,
                            error = %e,
                            "Spawnpoint query failed, skipping spawnpoint filtering"
                        );
                        explanations.push(format!(
                            "spawnpoint query failed ({}), spawnpoint filter not applied",
                            e
                        ));
                    }
                },
            },
        }
    }

    let (mut classification, reason) = judge(m2, spawnpoints, config);
    if let Some(reason) = reason {
        explanations.push(reason);
    }

    // the overlap pass owns this state; a passing policy does not undo it
    if classification.is_active() && nest.discarded == Some(DiscardReason::Overlap) {
        explanations.push("kept discarded: overlaps another nest".into());
        classification = Classification::Discarded(DiscardReason::Overlap);
    }

    Evaluation {
        m2,
        spawnpoints,
        classification,
        explanations,
    }
}
