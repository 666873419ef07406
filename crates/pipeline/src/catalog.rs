//! Record catalog collaborator
//!
//! The pipeline only needs a narrow interface: scenes by sensor and period,
//! and idempotent inserts keyed by each record's natural key. Inserting a
//! record whose key already exists does nothing and returns `false`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use landpulse_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::records::{ChangeFeature, ChangeRun, CompositeRecord, Period, SceneRecord};

/// Relational/object catalog holding pipeline records
pub trait Catalog: Send + Sync {
    /// Scenes of `sensor` acquired within `period`, by acquisition date
    fn scenes_for_period(&self, sensor: &str, period: &Period) -> Result<Vec<SceneRecord>>;

    fn insert_scene_record(&self, scene: SceneRecord) -> Result<bool>;

    fn insert_composite_record(&self, record: CompositeRecord) -> Result<bool>;

    fn find_composite(&self, sensor: &str, period: &Period, band: &str) -> Result<Option<CompositeRecord>>;

    /// Store the features of one change run; a run is inserted at most once
    fn insert_change_features(&self, run: &ChangeRun, features: Vec<ChangeFeature>) -> Result<bool>;

    fn change_features(&self, run: &ChangeRun) -> Result<Vec<ChangeFeature>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChangeRunRecord {
    run: ChangeRun,
    features: Vec<ChangeFeature>,
}

/// Record tables shared by the catalog implementations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogState {
    #[serde(default)]
    scenes: Vec<SceneRecord>,
    #[serde(default)]
    composites: Vec<CompositeRecord>,
    #[serde(default)]
    changes: Vec<ChangeRunRecord>,
}

impl CatalogState {
    fn scenes_for_period(&self, sensor: &str, period: &Period) -> Vec<SceneRecord> {
        let mut scenes: Vec<SceneRecord> = self
            .scenes
            .iter()
            .filter(|s| s.sensor == sensor && period.contains(s.acquired))
            .cloned()
            .collect();
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        scenes
    }

    fn insert_scene(&mut self, scene: SceneRecord) -> bool {
        if self.scenes.iter().any(|s| s.id == scene.id) {
            return false;
        }
        self.scenes.push(scene);
        true
    }

    fn insert_composite(&mut self, record: CompositeRecord) -> bool {
        if self.composites.iter().any(|c| c.key() == record.key()) {
            return false;
        }
        self.composites.push(record);
        true
    }

    fn find_composite(&self, sensor: &str, period: &Period, band: &str) -> Option<CompositeRecord> {
        self.composites
            .iter()
            .find(|c| c.sensor == sensor && c.period == *period && c.band == band)
            .cloned()
    }

    fn insert_changes(&mut self, run: &ChangeRun, features: Vec<ChangeFeature>) -> bool {
        if self.changes.iter().any(|c| c.run == *run) {
            return false;
        }
        self.changes.push(ChangeRunRecord {
            run: run.clone(),
            features,
        });
        true
    }

    fn change_features(&self, run: &ChangeRun) -> Vec<ChangeFeature> {
        self.changes
            .iter()
            .find(|c| c.run == *run)
            .map(|c| c.features.clone())
            .unwrap_or_default()
    }
}

fn lock(state: &Mutex<CatalogState>) -> Result<MutexGuard<'_, CatalogState>> {
    state
        .lock()
        .map_err(|_| Error::external("catalog", "catalog lock poisoned"))
}

/// Catalog kept in memory, for tests and one-shot runs
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn composite_count(&self) -> usize {
        lock(&self.state).map(|s| s.composites.len()).unwrap_or(0)
    }

    pub fn change_run_count(&self) -> usize {
        lock(&self.state).map(|s| s.changes.len()).unwrap_or(0)
    }
}

impl Catalog for InMemoryCatalog {
    fn scenes_for_period(&self, sensor: &str, period: &Period) -> Result<Vec<SceneRecord>> {
        Ok(lock(&self.state)?.scenes_for_period(sensor, period))
    }

    fn insert_scene_record(&self, scene: SceneRecord) -> Result<bool> {
        Ok(lock(&self.state)?.insert_scene(scene))
    }

    fn insert_composite_record(&self, record: CompositeRecord) -> Result<bool> {
        Ok(lock(&self.state)?.insert_composite(record))
    }

    fn find_composite(&self, sensor: &str, period: &Period, band: &str) -> Result<Option<CompositeRecord>> {
        Ok(lock(&self.state)?.find_composite(sensor, period, band))
    }

    fn insert_change_features(&self, run: &ChangeRun, features: Vec<ChangeFeature>) -> Result<bool> {
        Ok(lock(&self.state)?.insert_changes(run, features))
    }

    fn change_features(&self, run: &ChangeRun) -> Result<Vec<ChangeFeature>> {
        Ok(lock(&self.state)?.change_features(run))
    }
}

/// Catalog persisted as one JSON document.
///
/// The file is loaded on open and rewritten (atomically) after every insert
/// that changes it.
#[derive(Debug)]
pub struct JsonCatalog {
    path: PathBuf,
    state: Mutex<CatalogState>,
}

impl JsonCatalog {
    /// Open `path`, starting empty when the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            CatalogState::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, state: &CatalogState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Apply `insert` and save when it changed the state
    fn insert_with(&self, insert: impl FnOnce(&mut CatalogState) -> bool) -> Result<bool> {
        let mut state = lock(&self.state)?;
        let inserted = insert(&mut state);
        if inserted {
            self.save(&state)?;
        }
        Ok(inserted)
    }
}

impl Catalog for JsonCatalog {
    fn scenes_for_period(&self, sensor: &str, period: &Period) -> Result<Vec<SceneRecord>> {
        Ok(lock(&self.state)?.scenes_for_period(sensor, period))
    }

    fn insert_scene_record(&self, scene: SceneRecord) -> Result<bool> {
        self.insert_with(|s| s.insert_scene(scene))
    }

    fn insert_composite_record(&self, record: CompositeRecord) -> Result<bool> {
        self.insert_with(|s| s.insert_composite(record))
    }

    fn find_composite(&self, sensor: &str, period: &Period, band: &str) -> Result<Option<CompositeRecord>> {
        Ok(lock(&self.state)?.find_composite(sensor, period, band))
    }

    fn insert_change_features(&self, run: &ChangeRun, features: Vec<ChangeFeature>) -> Result<bool> {
        self.insert_with(|s| s.insert_changes(run, features))
    }

    fn change_features(&self, run: &ChangeRun) -> Result<Vec<ChangeFeature>> {
        Ok(lock(&self.state)?.change_features(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;

    fn scene(id: &str, sensor: &str, day: u32) -> SceneRecord {
        SceneRecord {
            id: id.to_string(),
            sensor: sensor.to_string(),
            acquired: NaiveDate::from_ymd_opt(2023, 1, day).unwrap(),
            cloud_cover: 0.1,
            footprint: None,
            bands: BTreeMap::new(),
        }
    }

    fn composite(band: &str) -> CompositeRecord {
        CompositeRecord {
            sensor: "s2".into(),
            period: Period::month(2023, 1).unwrap(),
            band: band.into(),
            path: PathBuf::from(format!("composites/s2/2023-01/{}.tif", band)),
            footprint: None,
            scene_count: 2,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_scenes_filtered_and_sorted() {
        let cat = InMemoryCatalog::new();
        assert!(cat.insert_scene_record(scene("b", "s2", 20)).unwrap());
        assert!(cat.insert_scene_record(scene("a", "s2", 3)).unwrap());
        assert!(cat.insert_scene_record(scene("c", "l8", 5)).unwrap());
        assert!(!cat.insert_scene_record(scene("a", "s2", 3)).unwrap());

        let jan = Period::month(2023, 1).unwrap();
        let ids: Vec<String> = cat.scenes_for_period("s2", &jan).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(cat.scenes_for_period("s2", &Period::month(2023, 2).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_composite_natural_key() {
        let cat = InMemoryCatalog::new();
        assert!(cat.insert_composite_record(composite("red")).unwrap());
        assert!(!cat.insert_composite_record(composite("red")).unwrap());
        assert!(cat.insert_composite_record(composite("nir")).unwrap());
        assert_eq!(cat.composite_count(), 2);

        let jan = Period::month(2023, 1).unwrap();
        assert!(cat.find_composite("s2", &jan, "nir").unwrap().is_some());
        assert!(cat.find_composite("s2", &jan, "green").unwrap().is_none());
    }

    #[test]
    fn test_json_catalog_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let run = ChangeRun {
            sensor: "s2".into(),
            baseline: Period::month(2022, 12).unwrap(),
            target: Period::month(2023, 1).unwrap(),
        };

        {
            let cat = JsonCatalog::open(&path).unwrap();
            cat.insert_scene_record(scene("a", "s2", 3)).unwrap();
            cat.insert_composite_record(composite("red")).unwrap();
            assert!(cat.insert_change_features(&run, vec![]).unwrap());
        }

        let cat = JsonCatalog::open(&path).unwrap();
        let jan = Period::month(2023, 1).unwrap();
        assert_eq!(cat.scenes_for_period("s2", &jan).unwrap().len(), 1);
        assert!(cat.find_composite("s2", &jan, "red").unwrap().is_some());
        assert!(!cat.insert_change_features(&run, vec![]).unwrap());
    }
}
