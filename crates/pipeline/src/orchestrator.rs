//! Change-detection job orchestrator
//!
//! Drives one (sensor, period) job through the stages of [`JobState`]:
//!
//! 1. select the period's scenes from the catalog
//! 2. plan the target grid
//! 3. reproject every scene band onto it and composite each band, as one
//!    [`TaskGraph`](crate::dag::TaskGraph) of `Reproject(scene, band) -> Composite(band)` nodes
//! 4. compute the normalized-difference index of two band composites
//! 5. classify change against the baseline period's index
//! 6. vectorize the change grid into hectare-attributed features
//! 7. apportion feature areas to zones
//!
//! Every output is published through [`InFlight::publish_once`]: an output
//! that already exists is reused, so re-running a job resumes where the
//! last run stopped and never writes a path twice.
//!
//! Jobs over the same (sensor, period) share every output below that period.
//! [`Orchestrator::run`] serializes them on the calling thread before entering
//! the worker pool, so a later job reuses what the earlier one built and no
//! pool worker ever waits on another job's output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use geo::BooleanOps;
use geo_types::{Geometry, MultiPolygon, Polygon};
use landpulse_algorithms::change::{ChangeClass, ChangeClassifier, ThresholdClassifier};
use landpulse_algorithms::composite::composite_with_count;
use landpulse_algorithms::filters::median_filter;
use landpulse_algorithms::imagery::normalized_difference;
use landpulse_algorithms::reproject::{plan_grid, reproject_to_grid, transform_bounds, Bounds};
use landpulse_algorithms::vector::{area_hectares, vectorize, zonal_stats, AreaFeature, ZonalArea, ZoneSet};
use landpulse_core::raster::{GridSpec, Raster};
use landpulse_core::vector::{AttributeValue, Feature, FeatureCollection};
use landpulse_core::{Error, Result, CRS};
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::dag::{CancelToken, TaskGraphBuilder};
use crate::job::{JobReport, JobSpec, JobState, Stage};
use crate::records::{ChangeFeature, ChangeRun, CompositeRecord, Period, SceneRecord};
use crate::store::{ArtifactStore, InFlight};

/// Reprojected scene band: `processed/{sensor}/{period}/{scene}/{band}.tif`
pub fn processed_path(sensor: &str, period: &Period, scene: &str, band: &str) -> PathBuf {
    PathBuf::from("processed")
        .join(sensor)
        .join(period.label())
        .join(scene)
        .join(format!("{}.tif", band))
}

/// Band or index composite: `composites/{sensor}/{period}/{name}.tif`
pub fn composite_path(sensor: &str, period: &Period, name: &str) -> PathBuf {
    PathBuf::from("composites")
        .join(sensor)
        .join(period.label())
        .join(format!("{}.tif", name))
}

/// Outputs of one change run: `changes/{sensor}/{baseline}_{target}/`
pub fn change_dir(run: &ChangeRun) -> PathBuf {
    PathBuf::from("changes").join(&run.sensor).join(run.label())
}

/// A node of the preprocess/composite graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Task {
    Reproject { scene: String, band: String },
    Composite { band: String },
}

impl Task {
    fn stage(&self) -> Stage {
        match self {
            Task::Reproject { .. } => Stage::Preprocess,
            Task::Composite { .. } => Stage::Composite,
        }
    }
}

/// One scene file feeding a band composite
#[derive(Debug, Clone)]
struct BandInput {
    scene: String,
    path: PathBuf,
}

/// An error tagged with the stage it aborted
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

type StageResult<T> = std::result::Result<T, StageFailure>;

/// Runs change-detection jobs against injected catalog and store collaborators
pub struct Orchestrator {
    config: PipelineConfig,
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn ArtifactStore>,
    classifier: Box<dyn ChangeClassifier>,
    in_flight: InFlight,
    /// (sensor, period) keys of the jobs currently running
    jobs: InFlight,
    cancel: CancelToken,
    pool: rayon::ThreadPool,
}

impl Orchestrator {
    /// Validate `config` and build an orchestrator using the threshold
    /// classifier at `config.change_threshold`.
    pub fn new(config: PipelineConfig, catalog: Arc<dyn Catalog>, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        config.validate()?;
        let classifier = ThresholdClassifier::new(config.change_threshold)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .build()
            .map_err(|e| Error::Other(format!("failed to build worker pool: {}", e)))?;

        Ok(Self {
            config,
            catalog,
            store,
            classifier: Box::new(classifier),
            in_flight: InFlight::new(),
            jobs: InFlight::new(),
            cancel: CancelToken::new(),
            pool,
        })
    }

    /// Replace the change classification strategy
    pub fn with_classifier(mut self, classifier: Box<dyn ChangeClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token aborting running and future jobs of this orchestrator
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Index composite of `sensor` over `period`
    pub fn index_path(&self, sensor: &str, period: &Period) -> PathBuf {
        composite_path(sensor, period, &self.config.index_name)
    }

    /// Run one job to a terminal state
    pub fn run(&self, spec: &JobSpec) -> JobReport {
        let mut report = JobReport::new(spec.clone());
        info!(
            sensor = %spec.sensor,
            period = %spec.period,
            baseline = ?spec.baseline.map(|p| p.label()),
            classifier = self.classifier.name(),
            "Starting job"
        );

        let key = PathBuf::from(&spec.sensor).join(spec.period.label());
        let outcome = self.jobs.claim(&key).at(Stage::SelectScenes).and_then(|_job| {
            debug!(job = %key.display(), "Job claimed");
            self.pool.install(|| self.drive(&mut report))
        });
        if let Err(StageFailure { stage, error }) = outcome {
            let reason = match error {
                Error::Cancelled => "cancelled".to_string(),
                e => e.to_string(),
            };
            warn!(period = %spec.period, %stage, %reason, "Job failed");
            if let Err(e) = report.advance(JobState::Failed { stage, reason }) {
                error!("{}", e);
            }
        } else {
            info!(
                period = %spec.period,
                state = %report.state,
                built = report.built.len(),
                reused = report.reused.len(),
                "Job finished"
            );
        }
        report
    }

    /// Run consecutive calendar months of `year`.
    ///
    /// Each month is compared to the month before it when that month's index
    /// composite exists; otherwise the month runs without a baseline.
    pub fn run_months(&self, year: i32, months: &[u32]) -> Result<Vec<JobReport>> {
        let mut reports = Vec::with_capacity(months.len());
        for &month in months {
            let period = Period::month(year, month)?;
            let previous = period.previous_month()?;
            let mut spec = JobSpec::new(self.config.sensor.clone(), period);
            if self.store.exists(&self.index_path(&spec.sensor, &previous)) {
                spec = spec.with_baseline(previous);
            } else {
                debug!(period = %period, "No index for {}, running without baseline", previous);
            }
            reports.push(self.run(&spec));
        }
        Ok(reports)
    }

    fn drive(&self, report: &mut JobReport) -> StageResult<()> {
        let spec = report.spec.clone();

        // 1. select scenes
        self.cancel.check().at(Stage::SelectScenes)?;
        let scenes = self
            .catalog
            .scenes_for_period(&spec.sensor, &spec.period)
            .at(Stage::SelectScenes)?;
        report.scene_count = scenes.len();
        if scenes.is_empty() {
            warn!(sensor = %spec.sensor, period = %spec.period, "No scenes, skipping");
            return report.advance(JobState::Skipped).at(Stage::SelectScenes);
        }
        info!(period = %spec.period, scenes = scenes.len(), "Scenes selected");
        report.advance(JobState::ScenesSelected).at(Stage::SelectScenes)?;

        // 2-3. plan the grid, then reproject and composite every band
        self.cancel.check().at(Stage::Preprocess)?;
        let inputs = self.band_inputs(&scenes, report);
        let grid = self.plan_target_grid(&inputs).at(Stage::Preprocess)?;
        info!(rows = grid.rows, cols = grid.cols, crs = ?grid.crs.as_ref().map(|c| c.identifier()), "Target grid planned");

        self.build_composites(&spec, &scenes, &inputs, &grid, report)?;
        report.advance(JobState::Preprocessed).at(Stage::Preprocess)?;
        report.advance(JobState::Composited).at(Stage::Composite)?;

        // 4. index
        self.cancel.check().at(Stage::Index)?;
        let index = self.build_index(&spec, &scenes, &inputs, report).at(Stage::Index)?;
        report.index = Some(index.clone());
        report.advance(JobState::IndexComputed).at(Stage::Index)?;

        // 5. classify
        let Some(baseline) = spec.baseline else {
            let note = format!("no baseline period for {}; change detection skipped", spec.period);
            info!("{}", note);
            report.notes.push(note);
            return report.advance(JobState::Done).at(Stage::Index);
        };
        self.cancel.check().at(Stage::Classify)?;
        let run = ChangeRun {
            sensor: spec.sensor.clone(),
            baseline,
            target: spec.period,
        };
        let change = self.classify(&run, &index, report).at(Stage::Classify)?;
        report.change = Some(change.clone());
        report.advance(JobState::Classified).at(Stage::Classify)?;

        // 6. vectorize
        self.cancel.check().at(Stage::Vectorize)?;
        let features = self.vectorize_run(&run, &change, report).at(Stage::Vectorize)?;
        report.feature_count = features.len();
        report.advance(JobState::Vectorized).at(Stage::Vectorize)?;

        // 7. aggregate
        self.cancel.check().at(Stage::Aggregate)?;
        report.zonal = self.aggregate(&features).at(Stage::Aggregate)?;
        report.advance(JobState::Aggregated).at(Stage::Aggregate)?;
        report.advance(JobState::Done).at(Stage::Aggregate)
    }

    /// Scene files per configured band, skipping missing bands and files
    fn band_inputs(&self, scenes: &[SceneRecord], report: &mut JobReport) -> BTreeMap<String, Vec<BandInput>> {
        let mut inputs: BTreeMap<String, Vec<BandInput>> = BTreeMap::new();
        for band in &self.config.bands {
            let entry = inputs.entry(band.clone()).or_default();
            for scene in scenes {
                let warning = match scene.band_path(band) {
                    None => format!("scene {} has no band '{}'", scene.id, band),
                    Some(path) if !self.store.exists(path) => {
                        format!("scene {} band '{}' file {} is missing", scene.id, band, path.display())
                    }
                    Some(path) => {
                        entry.push(BandInput {
                            scene: scene.id.clone(),
                            path: path.clone(),
                        });
                        continue;
                    }
                };
                warn!("Skipping input: {}", warning);
                report.warnings.push(warning);
            }
        }
        inputs
    }

    /// Grid every scene of the period is warped onto.
    ///
    /// Uses the configured extent, or the union of all input bounds in the
    /// target CRS read from file headers. Pixels are snapped to multiples of
    /// the resolution.
    fn plan_target_grid(&self, inputs: &BTreeMap<String, Vec<BandInput>>) -> Result<GridSpec> {
        let crs = self.config.target_crs();
        let resolution = self.config.target_resolution;
        if let Some([min_x, min_y, max_x, max_y]) = self.config.target_extent {
            return plan_grid((min_x, min_y, max_x, max_y), &crs, resolution, true);
        }

        let mut union: Option<Bounds> = None;
        for input in inputs.values().flatten() {
            let meta = self.store.read_meta(&input.path)?;
            let source_crs = meta
                .spec
                .crs
                .as_ref()
                .ok_or_else(|| Error::Geometry(format!("{} has no CRS", input.path.display())))?;
            let b = transform_bounds(meta.bounds(), source_crs, &crs)?;
            union = Some(match union {
                None => b,
                Some(u) => (u.0.min(b.0), u.1.min(b.1), u.2.max(b.2), u.3.max(b.3)),
            });
        }

        let bounds = union.ok_or_else(|| {
            Error::EmptyInput(format!("no input files for bands {:?}", self.config.bands))
        })?;
        plan_grid(bounds, &crs, resolution, true)
    }

    fn build_composites(
        &self,
        spec: &JobSpec,
        scenes: &[SceneRecord],
        inputs: &BTreeMap<String, Vec<BandInput>>,
        grid: &GridSpec,
        report: &mut JobReport,
    ) -> StageResult<()> {
        let mut builder = TaskGraphBuilder::new();
        for (band, band_inputs) in inputs {
            let mut deps = Vec::with_capacity(band_inputs.len());
            for input in band_inputs {
                let node = Task::Reproject {
                    scene: input.scene.clone(),
                    band: band.clone(),
                };
                builder.add(node.clone(), vec![]);
                deps.push(node);
            }
            builder.add(Task::Composite { band: band.clone() }, deps);
        }
        let graph = builder.build().at(Stage::Preprocess)?;
        debug!(nodes = graph.len(), "Task graph built");

        let outputs: Mutex<Vec<(PathBuf, bool)>> = Mutex::new(Vec::new());
        let record = |path: PathBuf, built: bool| {
            if let Ok(mut outputs) = outputs.lock() {
                outputs.push((path, built));
            }
        };

        let result = graph.execute(&self.cancel, |task| match task {
            Task::Reproject { scene, band } => {
                let input = inputs
                    .get(band)
                    .and_then(|list| list.iter().find(|i| &i.scene == scene))
                    .ok_or_else(|| Error::Algorithm(format!("no input for {:?}", task)))?;
                let out = processed_path(&spec.sensor, &spec.period, scene, band);
                let built = self.in_flight.publish_once(&out, self.store.as_ref(), || {
                    debug!(scene = %scene, band = %band, "Reprojecting");
                    let raw = self.store.read_raster(&input.path)?;
                    let mut warped = reproject_to_grid(&raw, grid)?;
                    if let Some(window) = self.config.speckle_window {
                        warped = median_filter(&warped, window)?;
                    }
                    self.store.write_raster(&out, &warped)
                })?;
                record(out, built);
                Ok(())
            }
            Task::Composite { band } => {
                let band_inputs = inputs.get(band).map(Vec::as_slice).unwrap_or_default();
                if band_inputs.is_empty() {
                    return Err(Error::EmptyInput(format!(
                        "no scene of {} provides band '{}'",
                        spec.period, band
                    )));
                }
                let out = composite_path(&spec.sensor, &spec.period, band);
                let built = self.in_flight.publish_once(&out, self.store.as_ref(), || {
                    debug!(band = %band, inputs = band_inputs.len(), "Compositing");
                    let grids = band_inputs
                        .iter()
                        .map(|i| {
                            self.store
                                .read_raster(&processed_path(&spec.sensor, &spec.period, &i.scene, band))
                        })
                        .collect::<Result<Vec<Raster<f64>>>>()?;
                    let (composite, _count) = composite_with_count(&grids, self.config.composite_statistic)?;
                    self.store.write_raster(&out, &composite)
                })?;

                let inserted = self.catalog.insert_composite_record(CompositeRecord {
                    sensor: spec.sensor.clone(),
                    period: spec.period,
                    band: band.clone(),
                    path: out.clone(),
                    footprint: footprint_union(scenes, band_inputs),
                    scene_count: band_inputs.len(),
                    created_at: Utc::now(),
                })?;
                debug!(band = %band, inserted, "Composite record");
                record(out, built);
                Ok(())
            }
        });

        if let Err(failure) = result {
            return Err(StageFailure {
                stage: failure.node.stage(),
                error: failure.error,
            });
        }

        let outputs = outputs
            .into_inner()
            .map_err(|_| Error::Other("output list lock poisoned".into()))
            .at(Stage::Composite)?;
        for (path, built) in outputs {
            if path.starts_with("composites") {
                if let Some(band) = path.file_stem().and_then(|s| s.to_str()) {
                    report.composites.insert(band.to_string(), path.clone());
                }
            }
            report.record_output(path, built);
        }
        info!(bands = report.composites.len(), "Composites ready");
        Ok(())
    }

    fn build_index(
        &self,
        spec: &JobSpec,
        scenes: &[SceneRecord],
        inputs: &BTreeMap<String, Vec<BandInput>>,
        report: &mut JobReport,
    ) -> Result<PathBuf> {
        let out = self.index_path(&spec.sensor, &spec.period);
        let band_path = |band: &str| {
            report
                .composites
                .get(band)
                .cloned()
                .ok_or_else(|| Error::EmptyInput(format!("no composite for index band '{}'", band)))
        };
        let a = band_path(&self.config.index_bands.a)?;
        let b = band_path(&self.config.index_bands.b)?;

        let built = self.in_flight.publish_once(&out, self.store.as_ref(), || {
            let a = self.store.read_raster(&a)?;
            let b = self.store.read_raster(&b)?;
            let index = normalized_difference(&a, &b)?;
            self.store.write_raster(&out, &index)
        })?;
        info!(index = %self.config.index_name, path = %out.display(), built, "Index computed");

        // scenes contributing to both index bands
        let bands = &self.config.index_bands;
        let provides = |band: &str, scene: &str| {
            inputs
                .get(band)
                .is_some_and(|list| list.iter().any(|i| i.scene == scene))
        };
        let both: Vec<BandInput> = inputs
            .get(&bands.a)
            .map(|list| list.iter().filter(|i| provides(&bands.b, &i.scene)).cloned().collect())
            .unwrap_or_default();
        let inserted = self.catalog.insert_composite_record(CompositeRecord {
            sensor: spec.sensor.clone(),
            period: spec.period,
            band: self.config.index_name.clone(),
            path: out.clone(),
            footprint: footprint_union(scenes, &both),
            scene_count: both.len(),
            created_at: Utc::now(),
        })?;
        debug!(index = %self.config.index_name, inserted, "Composite record");
        report.record_output(out.clone(), built);
        Ok(out)
    }

    fn classify(&self, run: &ChangeRun, index: &Path, report: &mut JobReport) -> Result<PathBuf> {
        let baseline_index = self.index_path(&run.sensor, &run.baseline);
        if !self.store.exists(&baseline_index) {
            return Err(Error::EmptyInput(format!(
                "baseline index {} does not exist",
                baseline_index.display()
            )));
        }

        let dir = change_dir(run);
        let out = dir.join("change.tif");
        let confidence_out = dir.join("confidence.tif");
        let built = self.in_flight.publish_once(&out, self.store.as_ref(), || {
            let before = self.store.read_raster(&baseline_index)?;
            let after = self.store.read_raster(index)?;
            let map = self.classifier.classify_scored(&before, &after)?;
            if let Some(confidence) = &map.confidence {
                self.store.write_raster(&confidence_out, confidence)?;
            }
            self.store.write_classes(&out, &map.classes)
        })?;
        info!(run = %run.label(), classifier = self.classifier.name(), built, "Change classified");
        report.record_output(out.clone(), built);
        Ok(out)
    }

    fn vectorize_run(&self, run: &ChangeRun, change: &Path, report: &mut JobReport) -> Result<Vec<ChangeFeature>> {
        let dir = change_dir(run);
        let out = dir.join("change.geojson");
        let confidence_path = dir.join("confidence.tif");
        let crs = self.config.target_crs();

        let mut fresh = None;
        let built = self.in_flight.publish_once(&out, self.store.as_ref(), || {
            let classes = self.store.read_classes(change)?;
            let confidence = if self.store.exists(&confidence_path) {
                Some(self.store.read_raster(&confidence_path)?)
            } else {
                None
            };
            let features = self.change_features(run, &classes, confidence.as_ref())?;
            self.store
                .write_features(&out, &self.feature_collection(&features, &crs))?;
            fresh = Some(features);
            Ok(())
        })?;

        let features = match fresh {
            Some(features) => features,
            None => self
                .store
                .read_features(&out)?
                .iter()
                .map(change_feature_from)
                .collect::<Result<Vec<_>>>()?,
        };

        let inserted = self.catalog.insert_change_features(run, features.clone())?;
        info!(run = %run.label(), features = features.len(), built, inserted, "Change vectorized");
        report.features = Some(out.clone());
        report.record_output(out, built);
        Ok(features)
    }

    /// Polygonize non-stable classes and attribute each polygon
    fn change_features(
        &self,
        run: &ChangeRun,
        classes: &Raster<u8>,
        confidence: Option<&Raster<f64>>,
    ) -> Result<Vec<ChangeFeature>> {
        let crs = classes
            .crs()
            .cloned()
            .ok_or_else(|| Error::Geometry("change grid has no CRS".into()))?;
        let baseline = self.composite_id(&run.sensor, &run.baseline);
        let target = self.composite_id(&run.sensor, &run.target);

        let mut features = Vec::new();
        for region in vectorize(classes, ChangeClass::Stable.code())? {
            let Some(class) = ChangeClass::from_code(region.class_id) else {
                warn!(code = region.class_id, "Ignoring region with unknown class code");
                continue;
            };
            let area_ha = area_hectares(&region.polygon, &crs)?;
            let confidence = confidence.and_then(|grid| mean_at(grid, &region.pixels));
            features.push(ChangeFeature {
                polygon: region.polygon,
                class,
                baseline: baseline.clone(),
                target: target.clone(),
                area_ha,
                confidence,
                pixel_count: region.pixel_count,
            });
        }
        Ok(features)
    }

    /// `{sensor}/{period}/{index}` identifier of an index composite
    fn composite_id(&self, sensor: &str, period: &Period) -> String {
        format!("{}/{}/{}", sensor, period.label(), self.config.index_name)
    }

    fn feature_collection(&self, features: &[ChangeFeature], crs: &CRS) -> FeatureCollection {
        let mut collection = FeatureCollection::new(Some(crs.clone()));
        for f in features {
            collection.push(
                Feature::new(Geometry::Polygon(f.polygon.clone()))
                    .with_property("class_id", f.class.code() as i64)
                    .with_property("class_name", self.config.class_name(f.class))
                    .with_property("area_ha", f.area_ha)
                    .with_property("pixel_count", f.pixel_count as i64)
                    .with_property("confidence", f.confidence)
                    .with_property("baseline", f.baseline.as_str())
                    .with_property("target", f.target.as_str()),
            );
        }
        collection
    }

    fn aggregate(&self, features: &[ChangeFeature]) -> Result<Vec<ZonalArea>> {
        let Some(zones_path) = &self.config.zones else {
            debug!("No zones configured");
            return Ok(Vec::new());
        };
        let crs = self.config.target_crs();
        let zones = ZoneSet::from_features(&self.store.read_features(zones_path)?, &self.config.zone_id_field)?
            .to_crs(&crs)?;
        let area_features: Vec<AreaFeature> = features
            .iter()
            .map(|f| AreaFeature {
                polygon: f.polygon.clone(),
                class: f.class,
                area_ha: f.area_ha,
            })
            .collect();
        let zonal = zonal_stats(&area_features, &crs, &zones)?;
        info!(zones = zones.len(), rows = zonal.len(), "Zonal statistics");
        Ok(zonal)
    }
}

/// Union of the WGS84 footprints of the scenes feeding a composite
fn footprint_union(scenes: &[SceneRecord], inputs: &[BandInput]) -> Option<MultiPolygon<f64>> {
    let footprints: Vec<&Polygon<f64>> = scenes
        .iter()
        .filter(|s| inputs.iter().any(|i| i.scene == s.id))
        .filter_map(|s| s.footprint.as_ref())
        .collect();
    if footprints.is_empty() {
        return None;
    }
    Some(
        footprints
            .into_iter()
            .fold(MultiPolygon::new(vec![]), |acc, p| {
                acc.union(&MultiPolygon::new(vec![p.clone()]))
            }),
    )
}

/// Mean of the valid samples of `grid` at `pixels`
fn mean_at(grid: &Raster<f64>, pixels: &[(usize, usize)]) -> Option<f64> {
    let (sum, n) = pixels
        .iter()
        .filter_map(|&(row, col)| grid.get(row, col).ok())
        .filter(|v| !grid.is_nodata(*v))
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Rebuild a change feature from a GeoJSON layer written by a previous run
fn change_feature_from(feature: &Feature) -> Result<ChangeFeature> {
    let invalid = |what: &str| Error::Geometry(format!("change feature without valid {}", what));
    let polygon = match &feature.geometry {
        Some(Geometry::Polygon(p)) => p.clone(),
        _ => return Err(invalid("polygon geometry")),
    };
    let number = |key: &str| feature.get_property(key).and_then(AttributeValue::as_f64);
    let text = |key: &str| match feature.get_property(key) {
        Some(AttributeValue::String(s)) => Ok(s.clone()),
        _ => Err(invalid(key)),
    };

    let class = number("class_id")
        .filter(|c| (0.0..=255.0).contains(c))
        .and_then(|c| ChangeClass::from_code(c as u8))
        .ok_or_else(|| invalid("class_id"))?;

    Ok(ChangeFeature {
        polygon,
        class,
        baseline: text("baseline")?,
        target: text("target")?,
        area_ha: number("area_ha").ok_or_else(|| invalid("area_ha"))?,
        confidence: number("confidence"),
        pixel_count: number("pixel_count").ok_or_else(|| invalid("pixel_count"))? as usize,
    })
}
