//! Nest data model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NestError;
use crate::geometry::NestGeometry;

/// Why a nest is inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardReason {
    /// Geometry could not be parsed or is degenerate
    Invalid,
    /// Area below the minimum or above the maximum
    Area,
    /// Too few spawnpoints
    Spawnpoints,
    /// Mostly covered by another active nest
    Overlap,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Invalid => "invalid",
            DiscardReason::Area => "area",
            DiscardReason::Spawnpoints => "spawnpoints",
            DiscardReason::Overlap => "overlap",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscardReason {
    type Err = NestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "invalid" => Ok(DiscardReason::Invalid),
            "area" => Ok(DiscardReason::Area),
            "spawnpoints" => Ok(DiscardReason::Spawnpoints),
            "overlap" => Ok(DiscardReason::Overlap),
            other => Err(NestError::Query(format!("unknown discard reason '{}'", other))),
        }
    }
}

/// A persisted nest.
///
/// Derived attributes are `None` while unknown; unknown is distinct from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nest {
    pub nest_id: i64,
    pub name: String,
    pub area_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    /// GeoJSON text. `None` when loaded without the polygon payload.
    pub polygon: Option<String>,
    pub m2: Option<f64>,
    pub spawnpoints: Option<i64>,
    pub pokemon_id: Option<i64>,
    pub active: Option<bool>,
    pub discarded: Option<DiscardReason>,
    pub updated: Option<i64>,
}

impl Nest {
    /// Label used in logs: `area/name(id)`.
    pub fn full_name(&self) -> String {
        match &self.area_name {
            Some(area) if !area.is_empty() => format!("{}/{}({})", area, self.name, self.nest_id),
            _ => format!("{}({})", self.name, self.nest_id),
        }
    }

    /// Parse the stored polygon.
    pub fn geometry(&self) -> crate::error::Result<NestGeometry> {
        let text = self
            .polygon
            .as_deref()
            .ok_or_else(|| NestError::GeometryInvalid("nest has no polygon".into()))?;
        NestGeometry::parse(text)
    }

    pub fn is_active(&self) -> bool {
        self.active == Some(true)
    }
}

/// Input for inserting a nest. Derived attributes start unknown.
#[derive(Debug, Clone, Default)]
pub struct NewNest {
    pub nest_id: Option<i64>,
    pub name: String,
    pub area_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub polygon: Option<String>,
}

/// Sparse update of a single nest row.
///
/// Outer `None` leaves the column untouched, `Some(None)` writes NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestPartialUpdate {
    pub m2: Option<Option<f64>>,
    pub spawnpoints: Option<Option<i64>>,
    pub active: Option<Option<bool>>,
    pub discarded: Option<Option<DiscardReason>>,
    pub pokemon_id: Option<Option<i64>>,
    pub updated: Option<Option<i64>>,
}

impl NestPartialUpdate {
    pub fn is_empty(&self) -> bool {
        self.m2.is_none()
            && self.spawnpoints.is_none()
            && self.active.is_none()
            && self.discarded.is_none()
            && self.pokemon_id.is_none()
            && self.updated.is_none()
    }

    /// Names of the columns this update touches, in column order.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.m2.is_some() {
            fields.push("m2");
        }
        if self.spawnpoints.is_some() {
            fields.push("spawnpoints");
        }
        if self.active.is_some() {
            fields.push("active");
        }
        if self.discarded.is_some() {
            fields.push("discarded");
        }
        if self.pokemon_id.is_some() {
            fields.push("pokemon_id");
        }
        if self.updated.is_some() {
            fields.push("updated");
        }
        fields
    }

    /// Apply to an in-memory nest so it mirrors what was written.
    pub fn apply_to(&self, nest: &mut Nest) {
        if let Some(m2) = self.m2 {
            nest.m2 = m2;
        }
        if let Some(spawnpoints) = self.spawnpoints {
            nest.spawnpoints = spawnpoints;
        }
        if let Some(active) = self.active {
            nest.active = active;
        }
        if let Some(discarded) = self.discarded {
            nest.discarded = discarded;
        }
        if let Some(pokemon_id) = self.pokemon_id {
            nest.pokemon_id = pokemon_id;
        }
        if let Some(updated) = self.updated {
            nest.updated = updated;
        }
    }
}

/// Nest counts by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NestStats {
    pub total: i64,
    pub active: i64,
    pub undetermined: i64,
    pub discarded_invalid: i64,
    pub discarded_area: i64,
    pub discarded_spawnpoints: i64,
    pub discarded_overlap: i64,
}
