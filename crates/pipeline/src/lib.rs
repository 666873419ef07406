//! # LandPulse Pipeline
//!
//! Orchestration of monthly change-detection jobs on top of
//! `landpulse-algorithms`.
//!
//! - **records**: periods, scene, composite and change-feature records
//! - **catalog**: record catalog collaborator ([`InMemoryCatalog`], [`JsonCatalog`])
//! - **store**: artifact store collaborator ([`FsStore`], [`MemoryStore`]) and
//!   single-writer publishing
//! - **dag**: dependency graph of tasks run on the rayon pool
//! - **job**: job state machine and report
//! - **orchestrator**: the stage sequence from scene selection to zonal
//!   statistics
//! - **config**: JSON pipeline configuration

pub mod catalog;
pub mod config;
pub mod dag;
pub mod job;
pub mod orchestrator;
pub mod records;
pub mod store;

pub use catalog::{Catalog, InMemoryCatalog, JsonCatalog};
pub use config::{IndexBands, PipelineConfig};
pub use dag::{CancelToken, NodeFailure, TaskGraph, TaskGraphBuilder};
pub use job::{JobReport, JobSpec, JobState, Stage};
pub use orchestrator::Orchestrator;
pub use records::{ChangeFeature, ChangeRun, CompositeRecord, Period, SceneRecord};
pub use store::{ArtifactStore, FsStore, InFlight, MemoryStore};
