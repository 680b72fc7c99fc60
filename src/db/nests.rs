//! Nest table queries

use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{NestError, Result};
use crate::models::{DiscardReason, Nest, NestPartialUpdate, NestStats, NewNest};

const NEST_COLUMNS: &str =
    "nest_id, name, area_name, lat, lon, spawnpoints, m2, active, pokemon_id, discarded, updated";

fn select_sql(include_polygon: bool, filter: &str) -> String {
    let polygon = if include_polygon { "polygon" } else { "NULL AS polygon" };
    format!(
        "SELECT {}, {} FROM nests {} ORDER BY nest_id",
        NEST_COLUMNS, polygon, filter
    )
}

fn nest_from_row(row: &Row) -> rusqlite::Result<Nest> {
    let discarded = row
        .get::<_, Option<String>>("discarded")?
        .map(|raw| raw.parse::<DiscardReason>())
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(Nest {
        nest_id: row.get("nest_id")?,
        name: row.get("name")?,
        area_name: row.get("area_name")?,
        lat: row.get("lat")?,
        lon: row.get("lon")?,
        polygon: row.get("polygon")?,
        m2: row.get("m2")?,
        spawnpoints: row.get("spawnpoints")?,
        pokemon_id: row.get("pokemon_id")?,
        active: row.get("active")?,
        discarded,
        updated: row.get("updated")?,
    })
}

pub fn get_nest(conn: &Connection, nest_id: i64, include_polygon: bool) -> Result<Nest> {
    let sql = select_sql(include_polygon, "WHERE nest_id = ?1");
    conn.query_row(&sql, params![nest_id], nest_from_row)
        .optional()?
        .ok_or(NestError::NestNotFound(nest_id))
}

pub fn list_nests(conn: &Connection, include_polygon: bool) -> Result<Vec<Nest>> {
    let mut stmt = conn.prepare(&select_sql(include_polygon, ""))?;
    let nests = stmt
        .query_map([], nest_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nests)
}

pub fn list_active_nests(conn: &Connection) -> Result<Vec<Nest>> {
    let mut stmt = conn.prepare(&select_sql(true, "WHERE active = 1"))?;
    let nests = stmt
        .query_map([], nest_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nests)
}

pub fn insert_nest(conn: &Connection, nest: &NewNest) -> Result<i64> {
    conn.execute(
        "INSERT INTO nests (nest_id, name, area_name, lat, lon, polygon)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            nest.nest_id,
            nest.name,
            nest.area_name,
            nest.lat,
            nest.lon,
            nest.polygon,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Write only the columns present in `update` for a single row.
pub fn update_nest_partial(
    conn: &Connection,
    nest_id: i64,
    update: &NestPartialUpdate,
) -> Result<()> {
    let mut assignments: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(m2) = update.m2 {
        assignments.push("m2 = ?");
        values.push(m2.map(Value::Real).unwrap_or(Value::Null));
    }
    if let Some(spawnpoints) = update.spawnpoints {
        assignments.push("spawnpoints = ?");
        values.push(spawnpoints.map(Value::Integer).unwrap_or(Value::Null));
    }
    if let Some(active) = update.active {
        assignments.push("active = ?");
        values.push(active.map(|a| Value::Integer(a as i64)).unwrap_or(Value::Null));
    }
    if let Some(discarded) = update.discarded {
        assignments.push("discarded = ?");
        values.push(
            discarded
                .map(|d| Value::Text(d.as_str().to_string()))
                .unwrap_or(Value::Null),
        );
    }
    if let Some(pokemon_id) = update.pokemon_id {
        assignments.push("pokemon_id = ?");
        values.push(pokemon_id.map(Value::Integer).unwrap_or(Value::Null));
    }
    if let Some(updated) = update.updated {
        assignments.push("updated = ?");
        values.push(updated.map(Value::Integer).unwrap_or(Value::Null));
    }

    if assignments.is_empty() {
        return Ok(());
    }

    values.push(Value::Integer(nest_id));
    let sql = format!(
        "UPDATE nests SET {} WHERE nest_id = ?",
        assignments.join(", ")
    );

    let changed = conn.execute(&sql, params_from_iter(values))?;
    if changed == 0 {
        return Err(NestError::NestNotFound(nest_id));
    }
    Ok(())
}

pub fn stats(conn: &Connection) -> Result<NestStats> {
    let stats = conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN active = 1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN active IS NULL AND discarded IS NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN discarded = 'invalid' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN discarded = 'area' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN discarded = 'spawnpoints' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN discarded = 'overlap' THEN 1 ELSE 0 END), 0)
         FROM nests",
        [],
        |row| {
            Ok(NestStats {
                total: row.get(0)?,
                active: row.get(1)?,
                undetermined: row.get(2)?,
                discarded_invalid: row.get(3)?,
                discarded_area: row.get(4)?,
                discarded_spawnpoints: row.get(5)?,
                discarded_overlap: row.get(6)?,
            })
        },
    )?;
    Ok(stats)
}
