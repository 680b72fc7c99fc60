//! Configuration for nest-refresher
//!
//! Loaded from a TOML file; CLI flags in `main.rs` override individual fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nests_db: DbConfig,

    /// Spawnpoint database. Absent means spawnpoint counts are never queried.
    #[serde(default)]
    pub golbat_db: Option<DbConfig>,

    #[serde(default)]
    pub filters: FilterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("nests.db"),
        }
    }
}

/// Thresholds and knobs for the refresh pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of nests refreshed in parallel (<= 0 runs sequentially)
    #[serde(default = "default_concurrency")]
    pub concurrency: i32,

    /// Re-query spawnpoint counts even when already known
    #[serde(default)]
    pub force_spawnpoints_refresh: bool,

    #[serde(default = "default_min_area_m2")]
    pub min_area_m2: f64,

    /// 0 disables the upper bound
    #[serde(default = "default_max_area_m2")]
    pub max_area_m2: f64,

    #[serde(default = "default_min_spawnpoints")]
    pub min_spawnpoints: i64,

    /// Overlap pass runs only for values strictly between 0 and 100
    #[serde(default = "default_max_overlap_percent")]
    pub max_overlap_percent: f64,
}

fn default_concurrency() -> i32 {
    4
}

fn default_min_area_m2() -> f64 {
    100.0
}

fn default_max_area_m2() -> f64 {
    10_000_000.0
}

fn default_min_spawnpoints() -> i64 {
    10
}

fn default_max_overlap_percent() -> f64 {
    60.0
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            force_spawnpoints_refresh: false,
            min_area_m2: default_min_area_m2(),
            max_area_m2: default_max_area_m2(),
            min_spawnpoints: default_min_spawnpoints(),
            max_overlap_percent: default_max_overlap_percent(),
        }
    }
}

impl FilterConfig {
    /// Reject nonsensical thresholds before any nest is touched.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("min_area_m2", self.min_area_m2),
            ("max_area_m2", self.max_area_m2),
            ("max_overlap_percent", self.max_overlap_percent),
        ] {
            if !value.is_finite() {
                return Err(NestError::ConfigInvalid(format!("{} must be a finite number", name)));
            }
        }

        if self.min_area_m2 < 0.0 {
            return Err(NestError::ConfigInvalid(format!(
                "min_area_m2 must not be negative (got {})",
                self.min_area_m2
            )));
        }
        if self.max_area_m2 > 0.0 && self.min_area_m2 > self.max_area_m2 {
            return Err(NestError::ConfigInvalid(format!(
                "min_area_m2 ({}) is larger than max_area_m2 ({})",
                self.min_area_m2, self.max_area_m2
            )));
        }
        if self.min_spawnpoints < 0 {
            return Err(NestError::ConfigInvalid(format!(
                "min_spawnpoints must not be negative (got {})",
                self.min_spawnpoints
            )));
        }

        Ok(())
    }

    /// Whether the overlap pass should run after a refresh.
    pub fn overlap_enabled(&self) -> bool {
        self.max_overlap_percent > 0.0 && self.max_overlap_percent < 100.0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nests_db: DbConfig::default(),
            golbat_db: None,
            filters: FilterConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| NestError::ConfigInvalid(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| NestError::ConfigInvalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.filters.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.golbat_db.is_none());
        assert!(config.filters.overlap_enabled());
    }

    #[test]
    fn test_overlap_threshold_bounds() {
        let mut filters = FilterConfig::default();
        let cases = [
            (0.0, false),
            (-5.0, false),
            (100.0, false),
            (150.0, false),
            (0.1, true),
            (99.9, true),
        ];
        for (percent, enabled) in cases {
            filters.max_overlap_percent = percent;
            assert_eq!(filters.overlap_enabled(), enabled, "percent {}", percent);
        }
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let bad = [
            FilterConfig { min_area_m2: f64::NAN, ..Default::default() },
            FilterConfig { min_area_m2: -1.0, ..Default::default() },
            FilterConfig { min_area_m2: 500.0, max_area_m2: 100.0, ..Default::default() },
            FilterConfig { min_spawnpoints: -3, ..Default::default() },
            FilterConfig { max_overlap_percent: f64::INFINITY, ..Default::default() },
        ];
        for filters in bad {
            assert!(
                matches!(filters.validate(), Err(NestError::ConfigInvalid(_))),
                "{:?}",
                filters
            );
        }

        // max_area_m2 <= 0 disables the upper bound, so any min is fine
        let unbounded = FilterConfig { min_area_m2: 500.0, max_area_m2: 0.0, ..Default::default() };
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[golbat_db]
path = "/var/lib/golbat.db"

[filters]
min_spawnpoints = 3
"#,
        )
        .unwrap();

        assert_eq!(config.nests_db.path, PathBuf::from("nests.db"));
        assert_eq!(config.golbat_db.unwrap().path, PathBuf::from("/var/lib/golbat.db"));
        assert_eq!(config.filters.min_spawnpoints, 3);
        assert_eq!(config.filters.concurrency, 4);
        assert_eq!(config.filters.max_overlap_percent, 60.0);
    }
}
