//! Artifact storage collaborator
//!
//! Rasters and vector layers are addressed by path. Relative paths resolve
//! against the store root; absolute paths (raw scene files) are used as-is.
//! Writers publish atomically so readers never see a partial artifact.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use landpulse_core::io::{
    features_to_geojson, read_geojson, read_geotiff, read_geotiff_meta, write_geotiff_to_buffer,
    RasterMeta,
};
use landpulse_core::raster::{Raster, RasterElement};
use landpulse_core::vector::FeatureCollection;
use landpulse_core::{Error, Result};

/// Blob storage holding every pipeline artifact
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn read_raster(&self, path: &Path) -> Result<Raster<f64>>;

    fn read_classes(&self, path: &Path) -> Result<Raster<u8>>;

    /// Grid geometry and no-data without decoding pixels
    fn read_meta(&self, path: &Path) -> Result<RasterMeta>;

    fn write_raster(&self, path: &Path, raster: &Raster<f64>) -> Result<()>;

    fn write_classes(&self, path: &Path, classes: &Raster<u8>) -> Result<()>;

    fn write_features(&self, path: &Path, features: &FeatureCollection) -> Result<()>;

    fn read_features(&self, path: &Path) -> Result<FeatureCollection>;
}

/// Store on the local filesystem under a root directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `path`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Write `bytes` to a temporary file next to the destination, then
    /// rename it into place
    fn publish(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dest = self.resolve(path);
        let dir = dest
            .parent()
            .ok_or_else(|| Error::Other(format!("no parent directory for {}", dest.display())))?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&dest).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

impl ArtifactStore for FsStore {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    fn read_raster(&self, path: &Path) -> Result<Raster<f64>> {
        read_geotiff(self.resolve(path), None)
    }

    fn read_classes(&self, path: &Path) -> Result<Raster<u8>> {
        read_geotiff(self.resolve(path), None)
    }

    fn read_meta(&self, path: &Path) -> Result<RasterMeta> {
        read_geotiff_meta(self.resolve(path))
    }

    fn write_raster(&self, path: &Path, raster: &Raster<f64>) -> Result<()> {
        self.publish(path, &write_geotiff_to_buffer(raster, None)?)
    }

    fn write_classes(&self, path: &Path, classes: &Raster<u8>) -> Result<()> {
        self.publish(path, &write_geotiff_to_buffer(classes, None)?)
    }

    fn write_features(&self, path: &Path, features: &FeatureCollection) -> Result<()> {
        let text = features_to_geojson(features).to_string();
        self.publish(path, text.as_bytes())
    }

    fn read_features(&self, path: &Path) -> Result<FeatureCollection> {
        read_geojson(self.resolve(path))
    }
}

#[derive(Debug, Clone)]
enum Artifact {
    Raster(Raster<f64>),
    Classes(Raster<u8>),
    Features(FeatureCollection),
}

/// In-memory store for tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: Mutex<HashMap<PathBuf, Artifact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts
    pub fn len(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .artifacts
            .lock()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    fn get(&self, path: &Path) -> Result<Artifact> {
        self.artifacts
            .lock()
            .map_err(|_| Error::external("memory-store", "lock poisoned"))?
            .get(path)
            .cloned()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no artifact at {}", path.display()),
                ))
            })
    }

    fn put(&self, path: &Path, artifact: Artifact) -> Result<()> {
        self.artifacts
            .lock()
            .map_err(|_| Error::external("memory-store", "lock poisoned"))?
            .insert(path.to_path_buf(), artifact);
        Ok(())
    }

    fn wrong_kind(path: &Path, expected: &str) -> Error {
        Error::UnsupportedDataType(format!("{} is not a {}", path.display(), expected))
    }
}

fn meta_of<T: RasterElement>(raster: &Raster<T>) -> RasterMeta {
    RasterMeta {
        spec: raster.grid_spec(),
        nodata: raster.nodata().and_then(|v| v.to_f64()),
        data_type: T::DATA_TYPE,
    }
}

impl ArtifactStore for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.artifacts
            .lock()
            .map(|a| a.contains_key(path))
            .unwrap_or(false)
    }

    fn read_raster(&self, path: &Path) -> Result<Raster<f64>> {
        match self.get(path)? {
            Artifact::Raster(r) => Ok(r),
            Artifact::Classes(c) => {
                let (rows, cols) = c.shape();
                let mut r = c.with_same_meta::<f64>(rows, cols);
                let nodata = c.nodata();
                r.set_nodata(Some(f64::NAN));
                *r.data_mut() = c
                    .data()
                    .mapv(|v| if v.is_nodata(nodata) { f64::NAN } else { v as f64 });
                Ok(r)
            }
            Artifact::Features(_) => Err(Self::wrong_kind(path, "raster")),
        }
    }

    fn read_classes(&self, path: &Path) -> Result<Raster<u8>> {
        match self.get(path)? {
            Artifact::Classes(c) => Ok(c),
            _ => Err(Self::wrong_kind(path, "class raster")),
        }
    }

    fn read_meta(&self, path: &Path) -> Result<RasterMeta> {
        match self.get(path)? {
            Artifact::Raster(r) => Ok(meta_of(&r)),
            Artifact::Classes(c) => Ok(meta_of(&c)),
            Artifact::Features(_) => Err(Self::wrong_kind(path, "raster")),
        }
    }

    fn write_raster(&self, path: &Path, raster: &Raster<f64>) -> Result<()> {
        self.put(path, Artifact::Raster(raster.clone()))
    }

    fn write_classes(&self, path: &Path, classes: &Raster<u8>) -> Result<()> {
        self.put(path, Artifact::Classes(classes.clone()))
    }

    fn write_features(&self, path: &Path, features: &FeatureCollection) -> Result<()> {
        self.put(path, Artifact::Features(features.clone()))
    }

    fn read_features(&self, path: &Path) -> Result<FeatureCollection> {
        match self.get(path)? {
            Artifact::Features(f) => Ok(f),
            _ => Err(Self::wrong_kind(path, "feature collection")),
        }
    }
}

/// Registry of outputs currently being built.
///
/// A second build of the same path waits for the first to finish and then
/// reuses its output, so every path has a single writer. Waiting blocks the
/// calling thread; callers running on a rayon pool must never contend for a
/// path another worker of the same pool holds.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<PathBuf>>,
    finished: Condvar,
}

/// Releases a claimed path on drop, whether the build succeeded or not
pub(crate) struct Claim<'a> {
    owner: &'a InFlight,
    path: PathBuf,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.owner.active.lock() {
            active.remove(&self.path);
        }
        self.owner.finished.notify_all();
    }
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `path` is free, then hold it until the claim is dropped
    pub(crate) fn claim(&self, path: &Path) -> Result<Claim<'_>> {
        let poisoned = |_| Error::Other("in-flight registry lock poisoned".into());
        let mut active = self.active.lock().map_err(poisoned)?;
        while active.contains(path) {
            active = self.finished.wait(active).map_err(poisoned)?;
        }
        active.insert(path.to_path_buf());
        Ok(Claim {
            owner: self,
            path: path.to_path_buf(),
        })
    }

    /// Run `build` unless `path` already exists in `store`.
    ///
    /// Returns `true` when this call built the output, `false` when it was
    /// reused.
    pub fn publish_once<F>(&self, path: &Path, store: &dyn ArtifactStore, build: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let _claim = self.claim(path)?;
        if store.exists(path) {
            return Ok(false);
        }
        build()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landpulse_core::raster::DataType;
    use landpulse_core::{GeoTransform, CRS};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn make_grid() -> Raster<f64> {
        let mut r = Raster::from_vec(vec![0.1, 0.2, f64::NAN, 0.4], 2, 2).unwrap();
        r.set_transform(GeoTransform::north_up(500_000.0, 4_000_020.0, 10.0));
        r.set_crs(Some(CRS::utm(31, true)));
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let path = Path::new("composites/s2/2023-01/red.tif");

        assert!(!store.exists(path));
        store.write_raster(path, &make_grid()).unwrap();
        assert!(store.exists(path));

        let meta = store.read_meta(path).unwrap();
        assert_eq!(meta.shape(), (2, 2));
        assert_eq!(meta.spec.crs, Some(CRS::utm(31, true)));

        let back = store.read_raster(path).unwrap();
        assert!(back.get(1, 0).unwrap().is_nan());
        assert!((back.get(1, 1).unwrap() - 0.4).abs() < 1e-6);

        // No temporary files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("composites/s2/2023-01"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_fs_store_features() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let path = Path::new("changes/run/change.geojson");
        let fc = FeatureCollection::new(Some(CRS::web_mercator()));
        store.write_features(path, &fc).unwrap();
        let back = store.read_features(path).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.crs, Some(CRS::web_mercator()));
    }

    #[test]
    fn test_memory_store_kinds() {
        let store = MemoryStore::new();
        let path = Path::new("a.tif");
        store.write_raster(path, &make_grid()).unwrap();
        assert!(store.read_classes(path).is_err());
        assert_eq!(store.read_meta(path).unwrap().data_type, DataType::Float64);
        assert!(store.read_raster(Path::new("missing.tif")).is_err());
    }

    #[test]
    fn test_publish_once_single_writer() {
        let store = Arc::new(MemoryStore::new());
        let in_flight = Arc::new(InFlight::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let path = PathBuf::from("x.tif");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (store, in_flight, builds, path) =
                    (store.clone(), in_flight.clone(), builds.clone(), path.clone());
                std::thread::spawn(move || {
                    in_flight
                        .publish_once(&path, store.as_ref(), || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            store.write_raster(&path, &make_grid())
                        })
                        .unwrap()
                })
            })
            .collect();

        let built: usize = handles.into_iter().map(|h| h.join().unwrap() as usize).sum();
        assert_eq!(built, 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
