//! Change classification delegated to an external model

use ndarray::Array2;
use landpulse_core::raster::{Raster, RasterStack};
use landpulse_core::{Error, Result};

use super::{ChangeClass, ChangeClassifier, ChangeMap, CLASS_NODATA};

/// Per-pixel prediction returned by a [`ChangeModel`]
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Arg-max class code per pixel, `(rows, cols)` of the input stack
    pub classes: Array2<u8>,
    /// Probability of the chosen class, if the model reports one
    pub confidence: Option<Array2<f64>>,
}

/// A trained change model.
///
/// Receives a 2-band stack (band 0 = before, band 1 = after) and returns a
/// class code per pixel.
pub trait ChangeModel: Send + Sync {
    /// Identifier used in error reports
    fn name(&self) -> &str;

    fn predict(&self, stack: &RasterStack<f64>) -> Result<ModelOutput>;
}

/// [`ChangeClassifier`] backed by a [`ChangeModel`]
pub struct ModelClassifier<M: ChangeModel> {
    model: M,
}

impl<M: ChangeModel> ModelClassifier<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn predict(&self, before: &Raster<f64>, after: &Raster<f64>) -> Result<ModelOutput> {
        let stack = RasterStack::from_bands(&[before, after]).map_err(|e| match e {
            Error::GridMismatch { reason, .. } => Error::mismatch(reason),
            other => other,
        })?;

        let output = self.model.predict(&stack).map_err(|e| match e {
            e @ Error::ExternalService { .. } => e,
            other => Error::external(self.model.name(), other),
        })?;

        let expected = before.shape();
        if output.classes.dim() != expected {
            return Err(Error::mismatch(format!(
                "model '{}' returned classes of shape {:?}, expected {:?}",
                self.model.name(),
                output.classes.dim(),
                expected
            )));
        }
        if let Some(conf) = &output.confidence
            && conf.dim() != expected
        {
            return Err(Error::mismatch(format!(
                "model '{}' returned confidence of shape {:?}, expected {:?}",
                self.model.name(),
                conf.dim(),
                expected
            )));
        }
        if let Some(&bad) = output
            .classes
            .iter()
            .find(|&&c| c != CLASS_NODATA && ChangeClass::from_code(c).is_none())
        {
            return Err(Error::external(
                self.model.name(),
                format!("unknown class code {}", bad),
            ));
        }

        Ok(output)
    }
}

impl<M: ChangeModel> ChangeClassifier for ModelClassifier<M> {
    fn name(&self) -> &str {
        self.model.name()
    }

    fn classify(&self, before: &Raster<f64>, after: &Raster<f64>) -> Result<Raster<u8>> {
        Ok(self.classify_scored(before, after)?.classes)
    }

    fn classify_scored(&self, before: &Raster<f64>, after: &Raster<f64>) -> Result<ChangeMap> {
        let output = self.predict(before, after)?;
        let (rows, cols) = before.shape();

        let mut classes = before.with_same_meta::<u8>(rows, cols);
        classes.set_nodata(Some(CLASS_NODATA));
        *classes.data_mut() = output.classes;

        let confidence = output.confidence.map(|conf| {
            let mut grid = before.with_same_meta::<f64>(rows, cols);
            grid.set_nodata(Some(f64::NAN));
            *grid.data_mut() = conf;
            grid
        });

        Ok(ChangeMap {
            classes,
            confidence,
        })
    }
}
