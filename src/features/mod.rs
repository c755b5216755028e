//! Feature engineering: the fixed feature layout and its computation over a
//! sensor's look-back window.

mod engineer;
mod meteo;
mod vector;
mod window;

pub use engineer::{FeatureEngineer, FeatureSettings};
pub use vector::{Feature, FeatureVector, FEATURE_COUNT};
