//! Nest geometry parsing and spatial primitives.
//!
//! Nest polygons are stored as GeoJSON geometry text (`Polygon` or
//! `MultiPolygon`, optionally wrapped in a `Feature`). This module turns that
//! text into `geo-types` shapes and provides what the refresher and the
//! overlap resolver need:
//! - validation (unparsable, empty, unclosed or self-intersecting rings)
//! - bounding boxes for index prefiltering
//! - geodesic area in square meters, independent of ring winding order
//! - point containment and pairwise intersection area
//!
//! Coordinates follow GeoJSON order: `[lon, lat]`.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, BooleanOps, BoundingRect, Contains, GeodesicArea};
use geo_types::{Coord, Line, LineString, MultiPolygon, Point, Polygon};
use serde_json::{json, Value};

use crate::error::{NestError, Result};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BBox {
    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Polygon,
    MultiPolygon,
}

/// A validated nest polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct NestGeometry {
    kind: ShapeKind,
    shape: MultiPolygon<f64>,
}

impl NestGeometry {
    /// Parse GeoJSON text into a validated geometry.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| NestError::GeometryInvalid(format!("not valid GeoJSON: {}", e)))?;
        Self::from_geojson(&value)
    }

    /// Build from an already-decoded GeoJSON value.
    pub fn from_geojson(value: &Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| NestError::GeometryInvalid("missing geometry type".into()))?;

        let geometry = match kind {
            "Feature" => {
                let inner = value
                    .get("geometry")
                    .filter(|g| !g.is_null())
                    .ok_or_else(|| NestError::GeometryInvalid("feature has no geometry".into()))?;
                return Self::from_geojson(inner);
            }
            "Polygon" => {
                let rings = rings_from_value(coordinates(value)?)?;
                Self {
                    kind: ShapeKind::Polygon,
                    shape: MultiPolygon::new(vec![polygon_from_rings(rings)?]),
                }
            }
            "MultiPolygon" => {
                let polygons: Vec<Value> = serde_json::from_value(coordinates(value)?.clone())
                    .map_err(|e| NestError::GeometryInvalid(format!("bad coordinates: {}", e)))?;
                let polygons = polygons
                    .iter()
                    .map(|p| rings_from_value(p).and_then(polygon_from_rings))
                    .collect::<Result<Vec<_>>>()?;
                Self {
                    kind: ShapeKind::MultiPolygon,
                    shape: MultiPolygon::new(polygons),
                }
            }
            other => {
                return Err(NestError::GeometryInvalid(format!(
                    "unsupported geometry type {}",
                    other
                )))
            }
        };

        geometry.validate()?;
        // geodesic area is only correct for counter-clockwise exteriors
        Ok(Self {
            kind: geometry.kind,
            shape: geometry.shape.orient(Direction::Default),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.shape.0.is_empty() {
            return Err(NestError::GeometryInvalid("geometry has no polygons".into()));
        }

        for polygon in &self.shape.0 {
            for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                validate_ring(ring)?;
            }
            if polygon.unsigned_area() == 0.0 {
                return Err(NestError::GeometryInvalid("polygon has zero area".into()));
            }
        }

        Ok(())
    }

    /// Serialize back to GeoJSON geometry text.
    pub fn to_geojson(&self) -> Result<String> {
        let polygon_coords = |polygon: &Polygon<f64>| -> Vec<Vec<[f64; 2]>> {
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
                .collect()
        };

        let value = match self.kind {
            ShapeKind::Polygon => json!({
                "type": "Polygon",
                "coordinates": polygon_coords(&self.shape.0[0]),
            }),
            ShapeKind::MultiPolygon => json!({
                "type": "MultiPolygon",
                "coordinates": self.shape.0.iter().map(polygon_coords).collect::<Vec<_>>(),
            }),
        };

        serde_json::to_string(&value).map_err(|e| NestError::GeometrySerialize(e.to_string()))
    }

    pub fn bbox(&self) -> BBox {
        // validate() guarantees at least one non-empty ring
        let origin = Coord { x: 0.0, y: 0.0 };
        let rect = self
            .shape
            .bounding_rect()
            .unwrap_or_else(|| geo_types::Rect::new(origin, origin));
        BBox {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lon: rect.min().x,
            max_lon: rect.max().x,
        }
    }

    /// Area on the WGS84 ellipsoid in square meters.
    pub fn area_m2(&self) -> f64 {
        self.shape.geodesic_area_unsigned()
    }

    /// Strict containment; points on the boundary are not contained.
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        self.shape.contains(&Point::new(lon, lat))
    }

    /// Area in square meters shared by both geometries.
    pub fn intersection_area_m2(&self, other: &NestGeometry) -> f64 {
        if !self.bbox().intersects(&other.bbox()) {
            return 0.0;
        }
        if self.shape == other.shape {
            return self.area_m2();
        }
        let shared = self.shape.intersection(&other.shape);
        shared.orient(Direction::Default).geodesic_area_unsigned()
    }
}

fn coordinates(value: &Value) -> Result<&Value> {
    value
        .get("coordinates")
        .ok_or_else(|| NestError::GeometryInvalid("missing coordinates".into()))
}

fn rings_from_value(value: &Value) -> Result<Vec<LineString<f64>>> {
    let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(value.clone())
        .map_err(|e| NestError::GeometryInvalid(format!("bad coordinates: {}", e)))?;

    rings
        .into_iter()
        .map(|ring| {
            ring.into_iter()
                .map(|position| match position.as_slice() {
                    [lon, lat, ..] => Ok(Coord { x: *lon, y: *lat }),
                    _ => Err(NestError::GeometryInvalid(
                        "position needs at least two values".into(),
                    )),
                })
                .collect::<Result<Vec<_>>>()
                .and_then(closed_ring)
        })
        .collect()
}

/// Checked on raw positions since `Polygon::new` closes rings itself.
fn closed_ring(coords: Vec<Coord<f64>>) -> Result<LineString<f64>> {
    if coords.len() < 4 {
        return Err(NestError::GeometryInvalid(format!(
            "ring has {} positions, need at least 4",
            coords.len()
        )));
    }
    if coords.first() != coords.last() {
        return Err(NestError::GeometryInvalid("ring is not closed".into()));
    }
    Ok(LineString::new(coords))
}

fn polygon_from_rings(mut rings: Vec<LineString<f64>>) -> Result<Polygon<f64>> {
    if rings.is_empty() {
        return Err(NestError::GeometryInvalid("polygon has no rings".into()));
    }
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

fn validate_ring(ring: &LineString<f64>) -> Result<()> {
    for c in &ring.0 {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(NestError::GeometryInvalid("non-finite coordinate".into()));
        }
        if !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y) {
            return Err(NestError::GeometryInvalid(format!(
                "coordinate out of range: [{}, {}]",
                c.x, c.y
            )));
        }
    }
    if ring_self_intersects(ring) {
        return Err(NestError::GeometryInvalid("ring self-intersects".into()));
    }
    Ok(())
}

fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let lines: Vec<Line<f64>> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = lines.len();

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(lines[i], lines[j]) {
                None => {}
                // neighbours share exactly one vertex
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => return true,
            }
        }
    }

    false
}
