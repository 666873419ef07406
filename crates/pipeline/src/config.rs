//! Pipeline configuration
//!
//! Loaded from a JSON file in which every field is optional; missing fields
//! take the defaults below. The CLI overrides individual fields from flags
//! and then calls [`PipelineConfig::validate`].

use std::path::{Path, PathBuf};

use landpulse_algorithms::change::{ChangeClass, DEFAULT_CHANGE_THRESHOLD};
use landpulse_algorithms::composite::CompositeStatistic;
use landpulse_core::crs::Projection;
use landpulse_core::{Error, Result, CRS};
use serde::{Deserialize, Serialize};

/// The two bands of a normalized-difference index, `(b - a) / (b + a)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBands {
    pub a: String,
    pub b: String,
}

impl Default for IndexBands {
    fn default() -> Self {
        Self {
            a: "red".into(),
            b: "nir".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the artifact store; relative output paths resolve below it
    pub data_root: PathBuf,
    pub sensor: String,
    /// Bands composited per period
    pub bands: Vec<String>,
    pub index_bands: IndexBands,
    /// File stem of the index composite
    pub index_name: String,
    pub target_epsg: u32,
    /// Pixel size in target CRS units
    pub target_resolution: f64,
    /// `[min_x, min_y, max_x, max_y]` in the target CRS
    pub target_extent: Option<[f64; 4]>,
    pub change_threshold: f64,
    /// Median speckle filter window applied after reprojection
    pub speckle_window: Option<usize>,
    pub composite_statistic: CompositeStatistic,
    /// Worker threads; all cores when unset
    pub threads: Option<usize>,
    /// Zone polygons (GeoJSON) for zonal aggregation
    pub zones: Option<PathBuf>,
    pub zone_id_field: String,
    /// Labels indexed by class code
    pub class_names: Vec<String>,
    /// JSON catalog file; defaults to `catalog.json` under `data_root`
    pub catalog: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            sensor: "sentinel-2".into(),
            bands: vec!["red".into(), "nir".into()],
            index_bands: IndexBands::default(),
            index_name: "ndvi".into(),
            target_epsg: 3857,
            target_resolution: 10.0,
            target_extent: None,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            speckle_window: None,
            composite_statistic: CompositeStatistic::Median,
            threads: None,
            zones: None,
            zone_id_field: "admin_id".into(),
            class_names: ChangeClass::ALL.iter().map(|c| c.name().to_string()).collect(),
            catalog: None,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn target_crs(&self) -> CRS {
        CRS::from_epsg(self.target_epsg)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| self.data_root.join("catalog.json"))
    }

    /// Configured label of `class`, falling back to its default name
    pub fn class_name(&self, class: ChangeClass) -> String {
        self.class_names
            .get(class.code() as usize)
            .cloned()
            .unwrap_or_else(|| class.name().to_string())
    }

    /// Reject settings no stage could run with.
    ///
    /// # Errors
    /// [`Error::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !self.target_resolution.is_finite() || self.target_resolution <= 0.0 {
            return Err(invalid(
                "target_resolution",
                self.target_resolution,
                "must be positive and finite",
            ));
        }
        if !self.change_threshold.is_finite() || self.change_threshold < 0.0 {
            return Err(invalid("change_threshold", self.change_threshold, "must be finite and >= 0"));
        }
        if let Some(w) = self.speckle_window
            && (w == 0 || w % 2 == 0)
        {
            return Err(invalid("speckle_window", w, "must be odd and >= 1"));
        }
        if Projection::from_epsg(self.target_epsg).is_none() {
            return Err(invalid("target_epsg", self.target_epsg, "unsupported CRS"));
        }
        if let Some([min_x, min_y, max_x, max_y]) = self.target_extent
            && !(min_x < max_x && min_y < max_y)
        {
            return Err(invalid(
                "target_extent",
                format!("{:?}", self.target_extent),
                "expected min_x < max_x and min_y < max_y",
            ));
        }
        if self.threads == Some(0) {
            return Err(invalid("threads", 0, "must be >= 1"));
        }
        if self.sensor.is_empty() {
            return Err(invalid("sensor", "", "must not be empty"));
        }
        for band in [&self.index_bands.a, &self.index_bands.b] {
            if !self.bands.contains(band) {
                return Err(invalid("index_bands", band, "index band is not in `bands`"));
            }
        }
        if self.index_name.is_empty() || self.index_name.contains(['/', '\\']) {
            return Err(invalid("index_name", &self.index_name, "must be a plain file stem"));
        }
        if self.bands.contains(&self.index_name) {
            return Err(invalid("index_name", &self.index_name, "collides with a band composite"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> Error {
    Error::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.target_crs(), CRS::web_mercator());
        assert_eq!(config.class_name(ChangeClass::Loss), "Loss");
        assert_eq!(config.catalog_path(), PathBuf::from("data/catalog.json"));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"target_epsg": 32630, "speckle_window": 3, "composite_statistic": "mean"}"#)
                .unwrap();
        assert_eq!(config.target_epsg, 32630);
        assert_eq!(config.speckle_window, Some(3));
        assert_eq!(config.composite_statistic, CompositeStatistic::Mean);
        assert_eq!(config.bands, vec!["red", "nir"]);
        assert_eq!(config.zone_id_field, "admin_id");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects() {
        let bad = [
            PipelineConfig {
                target_resolution: 0.0,
                ..Default::default()
            },
            PipelineConfig {
                change_threshold: -0.1,
                ..Default::default()
            },
            PipelineConfig {
                speckle_window: Some(4),
                ..Default::default()
            },
            PipelineConfig {
                target_epsg: 2154,
                ..Default::default()
            },
            PipelineConfig {
                bands: vec!["red".into()],
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(Error::InvalidParameter { .. })),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landpulse.json");
        let config = PipelineConfig {
            target_extent: Some([0.0, 0.0, 100.0, 100.0]),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }
}
