//! Speckle and noise filters

mod median;

pub use median::{median_filter, MedianFilter, MedianParams};
