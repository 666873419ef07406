//! LandPulse CLI - satellite change detection

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use geo_types::Geometry;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use landpulse_algorithms::change::{index_difference, ChangeClass, ChangeClassifier, ThresholdClassifier};
use landpulse_algorithms::composite::{composite_with_count, CompositeStatistic};
use landpulse_algorithms::filters::median_filter;
use landpulse_algorithms::imagery::{ndvi, ndwi};
use landpulse_algorithms::reproject::reproject;
use landpulse_algorithms::vector::{area_hectares, vectorize, zonal_stats, AreaFeature, ZoneSet};
use landpulse_core::io::{read_geojson, read_geotiff, write_geojson, write_geotiff, GeoTiffOptions};
use landpulse_core::vector::{AttributeValue, Feature, FeatureCollection};
use landpulse_core::{Raster, CRS};
use landpulse_pipeline::{
    Catalog, FsStore, JobReport, JobSpec, JobState, JsonCatalog, Orchestrator, Period, PipelineConfig,
    SceneRecord,
};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "landpulse")]
#[command(author, version, about = "Satellite land-cover change detection", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Reproject a raster with bilinear resampling
    Reproject {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Target EPSG code (4326, 3857, 6933, 326xx, 327xx)
        #[arg(short, long)]
        epsg: u32,
        /// Target pixel size in target CRS units
        #[arg(short, long)]
        resolution: f64,
    },
    /// NDVI: Normalized Difference Vegetation Index
    Ndvi {
        /// Red band file
        #[arg(long)]
        red: PathBuf,
        /// NIR band file
        #[arg(long)]
        nir: PathBuf,
        /// Output file
        output: PathBuf,
    },
    /// NDWI: Normalized Difference Water Index
    Ndwi {
        /// NIR band file
        #[arg(long)]
        nir: PathBuf,
        /// Green band file
        #[arg(long)]
        green: PathBuf,
        /// Output file
        output: PathBuf,
    },
    /// Median speckle filter
    MedianFilter {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Odd window size in cells
        #[arg(short, long, default_value = "3")]
        window: usize,
    },
    /// Temporal composite of aligned rasters
    Composite {
        /// Output file
        output: PathBuf,
        /// Input rasters, all on the same grid
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Statistic: median, mean, min, max
        #[arg(short, long, default_value = "median")]
        statistic: String,
        /// Also write the per-pixel count of valid observations
        #[arg(long)]
        count: Option<PathBuf>,
    },
    /// Threshold change classification between two index rasters
    Change {
        /// Baseline index raster
        #[arg(long)]
        before: PathBuf,
        /// Target index raster
        #[arg(long)]
        after: PathBuf,
        /// Output class raster (0 Stable, 1 Loss, 2 Gain, 255 no-data)
        output: PathBuf,
        /// Minimum index change counted as Loss or Gain
        #[arg(short, long, default_value = "0.2")]
        threshold: f64,
        /// Also write the continuous difference raster
        #[arg(long)]
        difference: Option<PathBuf>,
    },
    /// Polygonize a class raster into a GeoJSON layer with hectare areas
    Vectorize {
        /// Input class raster
        input: PathBuf,
        /// Output GeoJSON file
        output: PathBuf,
        /// Class code left out of the output
        #[arg(short, long, default_value = "0")]
        background: u8,
    },
    /// Change area per zone and class
    Zonal {
        /// Change layer written by `vectorize` or `run`
        #[arg(long)]
        features: PathBuf,
        /// Zone polygons (GeoJSON)
        #[arg(long)]
        zones: PathBuf,
        /// Zone identifier property
        #[arg(long, default_value = "admin_id")]
        id_field: String,
        /// Write rows as JSON instead of printing a table
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Register a scene in the catalog
    Register {
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Scene identifier
        #[arg(long)]
        id: String,
        /// Acquisition date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
        /// Cloud cover fraction
        #[arg(long, default_value = "0.0")]
        cloud_cover: f64,
        /// Band file as name=path; repeat per band
        #[arg(long = "band", required = true)]
        bands: Vec<String>,
    },
    /// Run change-detection jobs
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Period to process (YYYY-MM or YYYY-MM-DD_YYYY-MM-DD)
        #[arg(long, conflicts_with = "year")]
        period: Option<Period>,
        /// Baseline period compared against `--period`
        #[arg(long, requires = "period")]
        baseline: Option<Period>,
        /// Year of consecutive monthly runs
        #[arg(long, requires = "months")]
        year: Option<i32>,
        /// Months to run, e.g. 1,2,3
        #[arg(long, value_delimiter = ',')]
        months: Vec<u32>,
        /// Write the job reports as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

/// Configuration file and the flags overriding it
#[derive(Args)]
struct PipelineArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Artifact root directory
    #[arg(long)]
    data_root: Option<PathBuf>,
    /// Catalog file
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Sensor name
    #[arg(long)]
    sensor: Option<String>,
    /// Worker threads
    #[arg(short = 'j', long)]
    threads: Option<usize>,
    /// Change threshold
    #[arg(long)]
    threshold: Option<f64>,
    /// Zone polygons (GeoJSON), relative to the data root unless absolute
    #[arg(long)]
    zones: Option<PathBuf>,
}

impl PipelineArgs {
    fn load(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(root) = &self.data_root {
            config.data_root = root.clone();
        }
        if let Some(catalog) = &self.catalog {
            config.catalog = Some(catalog.clone());
        }
        if let Some(sensor) = &self.sensor {
            config.sensor = sensor.clone();
        }
        if let Some(threads) = self.threads {
            config.threads = Some(threads);
        }
        if let Some(threshold) = self.threshold {
            config.change_threshold = threshold;
        }
        if let Some(zones) = &self.zones {
            config.zones = Some(zones.clone());
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_raster(path: &Path) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> = read_geotiff(path, None)
        .with_context(|| format!("Failed to read raster {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn read_u8(path: &Path) -> Result<Raster<u8>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<u8> = read_geotiff(path, None)
        .with_context(|| format!("Failed to read raster {}", path.display()))?;
    pb.finish_and_clear();
    Ok(raster)
}

fn write_result(raster: &Raster<f64>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, Some(GeoTiffOptions::default())).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn write_result_u8(raster: &Raster<u8>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, Some(GeoTiffOptions::default())).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn write_result_u16(raster: &Raster<u16>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path, Some(GeoTiffOptions::default())).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_band(s: &str) -> Result<(String, PathBuf)> {
    let (name, path) = s
        .split_once('=')
        .with_context(|| format!("Band must be 'name=path', got: {}", s))?;
    if name.is_empty() || path.is_empty() {
        anyhow::bail!("Band must be 'name=path', got: {}", s);
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

/// Change layer with one feature per connected region of `classes`
fn class_layer(classes: &Raster<u8>, background: u8) -> Result<FeatureCollection> {
    let crs = classes
        .crs()
        .cloned()
        .context("Class raster has no CRS; areas cannot be computed")?;
    let regions = vectorize(classes, background).context("Failed to vectorize")?;

    let mut layer = FeatureCollection::new(Some(crs.clone()));
    for region in regions {
        let area_ha = area_hectares(&region.polygon, &crs).context("Failed to compute area")?;
        let class_name = ChangeClass::from_code(region.class_id).map(|c| c.name());
        layer.push(
            Feature::new(Geometry::Polygon(region.polygon))
                .with_property("class_id", region.class_id as i64)
                .with_property("class_name", class_name)
                .with_property("area_ha", area_ha)
                .with_property("pixel_count", region.pixel_count as i64),
        );
    }
    Ok(layer)
}

/// Area features of a change layer
fn area_features(layer: &FeatureCollection) -> Result<Vec<AreaFeature>> {
    layer
        .iter()
        .filter_map(|f| match &f.geometry {
            Some(Geometry::Polygon(p)) => Some((f, p)),
            _ => None,
        })
        .map(|(f, polygon)| {
            let class = f
                .get_property("class_id")
                .and_then(AttributeValue::as_f64)
                .and_then(|c| ChangeClass::from_code(c as u8))
                .context("Feature without a valid class_id")?;
            let area_ha = f
                .get_property("area_ha")
                .and_then(AttributeValue::as_f64)
                .context("Feature without area_ha")?;
            Ok(AreaFeature {
                polygon: polygon.clone(),
                class,
                area_ha,
            })
        })
        .collect()
}

fn print_report(reports: &[JobReport]) {
    for r in reports {
        println!("{} {}: {}", r.spec.sensor, r.spec.period, r.state);
        println!(
            "  Scenes: {}  Built: {}  Reused: {}  Features: {}",
            r.scene_count,
            r.built.len(),
            r.reused.len(),
            r.feature_count
        );
        for w in &r.warnings {
            println!("  Warning: {}", w);
        }
        for n in &r.notes {
            println!("  Note: {}", n);
        }
        for z in &r.zonal {
            println!("  Zone {:<16} {:<12} {:>12.4} ha", z.zone_id, z.class, z.area_ha);
        }
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster = read_raster(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = raster.crs() {
                println!("CRS: {}", crs);
            }
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len().max(1) as f64
            );
        }

        // ── Raster kernels ───────────────────────────────────────────
        Commands::Reproject {
            input,
            output,
            epsg,
            resolution,
        } => {
            let raster = read_raster(&input)?;
            let start = Instant::now();
            let result = reproject(&raster, &CRS::from_epsg(epsg), resolution).context("Failed to reproject")?;
            let elapsed = start.elapsed();
            info!("Output: {} x {}", result.cols(), result.rows());
            write_result(&result, &output)?;
            done("Reprojected raster", &output, elapsed);
        }

        Commands::Ndvi { red, nir, output } => {
            let red = read_raster(&red)?;
            let nir = read_raster(&nir)?;
            let start = Instant::now();
            let result = ndvi(&red, &nir).context("Failed to calculate NDVI")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("NDVI", &output, elapsed);
        }

        Commands::Ndwi { nir, green, output } => {
            let nir = read_raster(&nir)?;
            let green = read_raster(&green)?;
            let start = Instant::now();
            let result = ndwi(&nir, &green).context("Failed to calculate NDWI")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("NDWI", &output, elapsed);
        }

        Commands::MedianFilter { input, output, window } => {
            let raster = read_raster(&input)?;
            let start = Instant::now();
            let result = median_filter(&raster, window).context("Failed to filter")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("Median filter", &output, elapsed);
        }

        Commands::Composite {
            output,
            inputs,
            statistic,
            count,
        } => {
            let statistic: CompositeStatistic = statistic.parse().context("Invalid statistic")?;
            let grids = inputs
                .iter()
                .map(|p| read_raster(p))
                .collect::<Result<Vec<_>>>()?;
            let start = Instant::now();
            let (result, valid) = composite_with_count(&grids, statistic).context("Failed to composite")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            if let Some(count_path) = count {
                write_result_u16(&valid, &count_path)?;
            }
            done("Composite", &output, elapsed);
        }

        Commands::Change {
            before,
            after,
            output,
            threshold,
            difference,
        } => {
            let classifier = ThresholdClassifier::new(threshold).context("Invalid threshold")?;
            let before = read_raster(&before)?;
            let after = read_raster(&after)?;
            let start = Instant::now();
            let classes = classifier.classify(&before, &after).context("Failed to classify change")?;
            let elapsed = start.elapsed();
            write_result_u8(&classes, &output)?;
            if let Some(path) = difference {
                let diff = index_difference(&before, &after).context("Failed to compute difference")?;
                write_result(&diff, &path)?;
            }
            done("Change classes", &output, elapsed);
        }

        // ── Vector ───────────────────────────────────────────────────
        Commands::Vectorize {
            input,
            output,
            background,
        } => {
            let classes = read_u8(&input)?;
            let start = Instant::now();
            let layer = class_layer(&classes, background)?;
            let elapsed = start.elapsed();
            let pb = spinner("Writing output...");
            write_geojson(&layer, &output).context("Failed to write output")?;
            pb.finish_and_clear();
            println!("  Features: {}", layer.len());
            done("Change layer", &output, elapsed);
        }

        Commands::Zonal {
            features,
            zones,
            id_field,
            output,
        } => {
            let layer = read_geojson(&features)
                .with_context(|| format!("Failed to read {}", features.display()))?;
            let crs = layer.crs.clone().unwrap_or_else(CRS::wgs84);
            let zones = read_geojson(&zones).with_context(|| format!("Failed to read {}", zones.display()))?;
            let zones = ZoneSet::from_features(&zones, &id_field)
                .context("Invalid zones")?
                .to_crs(&crs)
                .context("Failed to reproject zones")?;

            let start = Instant::now();
            let rows = zonal_stats(&area_features(&layer)?, &crs, &zones).context("Failed to aggregate")?;
            let elapsed = start.elapsed();

            match output {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&rows)?)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    done("Zonal statistics", &path, elapsed);
                }
                None => {
                    for row in &rows {
                        println!("{:<16} {:<12} {:>12.4} ha", row.zone_id, row.class, row.area_ha);
                    }
                    println!("  Processing time: {:.2?}", elapsed);
                }
            }
        }

        // ── Pipeline ─────────────────────────────────────────────────
        Commands::Register {
            pipeline,
            id,
            date,
            cloud_cover,
            bands,
        } => {
            let config = pipeline.load()?;
            let bands: BTreeMap<String, PathBuf> = bands
                .iter()
                .map(|b| parse_band(b))
                .collect::<Result<_>>()?;
            let catalog = JsonCatalog::open(config.catalog_path()).context("Failed to open catalog")?;
            let inserted = catalog
                .insert_scene_record(SceneRecord {
                    id: id.clone(),
                    sensor: config.sensor.clone(),
                    acquired: date,
                    cloud_cover,
                    footprint: None,
                    bands,
                })
                .context("Failed to register scene")?;
            if inserted {
                println!("Registered scene {} ({})", id, config.sensor);
            } else {
                warn!("Scene {} is already registered", id);
            }
        }

        Commands::Run {
            pipeline,
            period,
            baseline,
            year,
            months,
            report,
        } => {
            let config = pipeline.load()?;
            let catalog = Arc::new(JsonCatalog::open(config.catalog_path()).context("Failed to open catalog")?);
            let store = Arc::new(FsStore::new(&config.data_root));
            let sensor = config.sensor.clone();
            let orchestrator = Orchestrator::new(config, catalog, store).context("Failed to set up pipeline")?;

            let start = Instant::now();
            let reports = match (period, year) {
                (Some(period), _) => {
                    let mut spec = JobSpec::new(sensor, period);
                    if let Some(baseline) = baseline {
                        spec = spec.with_baseline(baseline);
                    }
                    vec![orchestrator.run(&spec)]
                }
                (None, Some(year)) => orchestrator.run_months(year, &months).context("Failed to run months")?,
                (None, None) => anyhow::bail!("Pass --period or --year with --months"),
            };
            let elapsed = start.elapsed();

            print_report(&reports);
            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&reports)?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            println!("  Processing time: {:.2?}", elapsed);

            let failed = reports
                .iter()
                .filter(|r| matches!(r.state, JobState::Failed { .. }))
                .count();
            if failed > 0 {
                anyhow::bail!("{} of {} jobs failed", failed, reports.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use landpulse_core::GeoTransform;

    #[test]
    fn test_parse_band() {
        let (name, path) = parse_band("nir=/data/B08.tif").unwrap();
        assert_eq!(name, "nir");
        assert_eq!(path, PathBuf::from("/data/B08.tif"));
        assert!(parse_band("nir").is_err());
        assert!(parse_band("=x.tif").is_err());
    }

    #[test]
    fn test_class_layer_attributes() {
        let mut classes = Raster::filled(3, 3, 0u8);
        classes.set(1, 1, ChangeClass::Loss.code()).unwrap();
        classes.set_transform(GeoTransform::north_up(500_000.0, 4_000_000.0, 10.0));
        classes.set_crs(Some(CRS::utm(31, true)));

        let layer = class_layer(&classes, ChangeClass::Stable.code()).unwrap();
        assert_eq!(layer.len(), 1);
        let feature = &layer.features[0];
        let area = feature.get_property("area_ha").and_then(AttributeValue::as_f64).unwrap();
        assert!((area - 0.01).abs() < 1e-12, "area {}", area);

        let areas = area_features(&layer).unwrap();
        assert_eq!(areas[0].class, ChangeClass::Loss);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["landpulse", "run", "--year", "2023", "--months", "1,2,3", "-j", "2"]).unwrap();
        match cli.command {
            Commands::Run { year, months, pipeline, .. } => {
                assert_eq!(year, Some(2023));
                assert_eq!(months, vec![1, 2, 3]);
                assert_eq!(pipeline.threads, Some(2));
            }
            _ => panic!("expected run"),
        }
    }
}
