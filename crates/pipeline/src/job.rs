//! Job specification, state machine and report

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use landpulse_algorithms::vector::ZonalArea;
use landpulse_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::records::Period;

/// A unit of work that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SelectScenes,
    Preprocess,
    Composite,
    Index,
    Classify,
    Vectorize,
    Aggregate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SelectScenes => "select-scenes",
            Stage::Preprocess => "preprocess",
            Stage::Composite => "composite",
            Stage::Index => "index",
            Stage::Classify => "classify",
            Stage::Vectorize => "vectorize",
            Stage::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one (sensor, period) job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    ScenesSelected,
    Preprocessed,
    Composited,
    IndexComputed,
    Classified,
    Vectorized,
    Aggregated,
    Done,
    /// No scenes in the period
    Skipped,
    Failed { stage: Stage, reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Skipped | JobState::Failed { .. })
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: &JobState) -> bool {
        use JobState::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed { .. }) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, ScenesSelected)
                | (Pending, Skipped)
                | (ScenesSelected, Preprocessed)
                | (Preprocessed, Composited)
                | (Composited, IndexComputed)
                | (IndexComputed, Classified)
                | (IndexComputed, Done)
                | (Classified, Vectorized)
                | (Vectorized, Aggregated)
                | (Aggregated, Done)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Failed { stage, reason } => write!(f, "failed at {}: {}", stage, reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// What to run: a sensor over a period, optionally compared to a baseline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub sensor: String,
    pub period: Period,
    pub baseline: Option<Period>,
}

impl JobSpec {
    pub fn new(sensor: impl Into<String>, period: Period) -> Self {
        Self {
            sensor: sensor.into(),
            period,
            baseline: None,
        }
    }

    pub fn with_baseline(mut self, baseline: Period) -> Self {
        self.baseline = Some(baseline);
        self
    }
}

/// Outcome of a job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub spec: JobSpec,
    pub state: JobState,
    /// Every state the job passed through, in order
    pub history: Vec<JobState>,
    pub scene_count: usize,
    /// Band name to composite path
    pub composites: BTreeMap<String, PathBuf>,
    pub index: Option<PathBuf>,
    pub change: Option<PathBuf>,
    pub features: Option<PathBuf>,
    pub feature_count: usize,
    pub zonal: Vec<ZonalArea>,
    /// Outputs written by this run
    pub built: Vec<PathBuf>,
    /// Outputs found from an earlier run and reused
    pub reused: Vec<PathBuf>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobReport {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            state: JobState::Pending,
            history: vec![JobState::Pending],
            scene_count: 0,
            composites: BTreeMap::new(),
            index: None,
            change: None,
            features: None,
            feature_count: 0,
            zonal: Vec::new(),
            built: Vec::new(),
            reused: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// [`Error::Algorithm`] for a transition the state machine forbids.
    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_advance_to(&next) {
            return Err(Error::Algorithm(format!(
                "illegal job transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next.clone();
        self.history.push(next);
        if self.state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record an output path as built (`true`) or reused (`false`)
    pub fn record_output(&mut self, path: PathBuf, built: bool) {
        if built {
            self.built.push(path);
        } else {
            self.reused.push(path);
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }
}
