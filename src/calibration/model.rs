//! Regression models behind a single `predict` capability.
//!
//! Artifacts are JSON documents tagged by `kind`:
//!
//! ```json
//! { "kind": "tree_ensemble", "base_score": 0.1,
//!   "trees": [ { "nodes": [
//!       { "feature": "temperature", "threshold": 20.0, "left": 1, "right": 2 },
//!       { "leaf": 0.4 }, { "leaf": -0.2 } ] } ] }
//!
//! { "kind": "linear", "intercept": 0.5,
//!   "coefficients": { "temperature": 0.02, "humidity": -0.01 } }
//! ```
//!
//! Feature names resolve to vector indices once, at load time.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::regime::RegimeThresholds;
use crate::error::{CalibrationError, Result};
use crate::features::{Feature, FeatureVector};

// ---

/// Anything that maps a feature vector to a scalar.
pub trait RegressionModel: Send + Sync + fmt::Debug {
    fn predict(&self, features: &FeatureVector) -> f64;

    /// Short description for startup logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    TreeEnsemble {
        #[serde(default)]
        base_score: f64,
        trees: Vec<TreeArtifact>,
    },
    Linear {
        intercept: f64,
        coefficients: BTreeMap<String, f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeArtifact {
    pub nodes: Vec<NodeArtifact>,
}

/// `x < threshold` goes left; a missing value follows `default_left`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeArtifact {
    Split {
        feature: String,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default)]
        default_left: bool,
    },
    Leaf {
        leaf: f64,
    },
}

/// Regime thresholds the models were fitted with, from `metadata.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleMetadata {
    #[serde(default, alias = "temp_thresholds")]
    pub thresholds: Option<RegimeThresholds>,
}

// ---

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        default_left: bool,
    },
    Leaf(f64),
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn eval(&self, x: &FeatureVector) -> f64 {
        // ---
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf(value) => return value,
                Node::Split { feature, threshold, left, right, default_left } => {
                    i = match x.value_at(feature) {
                        Some(v) if v < threshold => left,
                        Some(_) => right,
                        None if default_left => left,
                        None => right,
                    };
                }
            }
        }
    }
}

/// Additive ensemble of regression trees.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    base_score: f64,
    trees: Vec<Tree>,
}

impl RegressionModel for TreeEnsemble {
    fn predict(&self, features: &FeatureVector) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.eval(features)).sum::<f64>()
    }

    fn describe(&self) -> String {
        format!("tree ensemble ({} trees)", self.trees.len())
    }
}

/// Intercept plus weighted features.
#[derive(Debug, Clone)]
pub struct LinearModel {
    intercept: f64,
    terms: Vec<(usize, f64)>,
}

impl RegressionModel for LinearModel {
    fn predict(&self, features: &FeatureVector) -> f64 {
        // A missing input yields NaN, which the calibrator rejects.
        self.terms.iter().fold(self.intercept, |acc, (idx, coef)| {
            acc + coef * features.value_at(*idx).unwrap_or(f64::NAN)
        })
    }

    fn describe(&self) -> String {
        format!("linear ({} terms)", self.terms.len())
    }
}

fn resolve(name: &str) -> Result<usize> {
    Feature::from_name(name)
        .map(Feature::index)
        .ok_or_else(|| CalibrationError::ModelLoad(format!("unknown feature '{name}'")))
}

fn compile_tree(tree: &TreeArtifact, tree_idx: usize) -> Result<Tree> {
    // ---
    let err = |msg: String| CalibrationError::ModelLoad(format!("tree {tree_idx}: {msg}"));
    if tree.nodes.is_empty() {
        return Err(err("no nodes".into()));
    }
    let len = tree.nodes.len();
    let nodes = tree
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| match node {
            NodeArtifact::Leaf { leaf } if leaf.is_finite() => Ok(Node::Leaf(*leaf)),
            NodeArtifact::Leaf { .. } => Err(err(format!("node {i} has a non-finite leaf"))),
            NodeArtifact::Split { feature, threshold, left, right, default_left } => {
                // Children must point forward so evaluation always terminates.
                for child in [*left, *right] {
                    if child <= i || child >= len {
                        return Err(err(format!("node {i} has invalid child {child}")));
                    }
                }
                Ok(Node::Split {
                    feature: resolve(feature)?,
                    threshold: *threshold,
                    left: *left,
                    right: *right,
                    default_left: *default_left,
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tree { nodes })
}

impl ModelArtifact {
    /// Resolve names and validate structure into a runnable model.
    pub fn compile(&self) -> Result<Arc<dyn RegressionModel>> {
        // ---
        match self {
            ModelArtifact::TreeEnsemble { base_score, trees } => {
                let trees = trees
                    .iter()
                    .enumerate()
                    .map(|(i, t)| compile_tree(t, i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(TreeEnsemble {
                    base_score: *base_score,
                    trees,
                }))
            }
            ModelArtifact::Linear { intercept, coefficients } => {
                let terms = coefficients
                    .iter()
                    .map(|(name, coef)| Ok((resolve(name)?, *coef)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(LinearModel {
                    intercept: *intercept,
                    terms,
                }))
            }
        }
    }
}

/// Load and compile one artifact file.
pub fn load_model(path: &Path) -> Result<Arc<dyn RegressionModel>> {
    // ---
    let bytes = fs::read(path)
        .map_err(|e| CalibrationError::ModelLoad(format!("{}: {e}", path.display())))?;
    let artifact: ModelArtifact = serde_json::from_slice(&bytes)
        .map_err(|e| CalibrationError::ModelLoad(format!("{}: {e}", path.display())))?;
    artifact
        .compile()
        .map_err(|e| CalibrationError::ModelLoad(format!("{}: {e}", path.display())))
}

/// Read `metadata.json` if the bundle ships one.
pub fn load_metadata(dir: &Path) -> Result<Option<BundleMetadata>> {
    // ---
    let path = dir.join("metadata.json");
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(&path)
        .map_err(|e| CalibrationError::ModelLoad(format!("{}: {e}", path.display())))?;
    let metadata = serde_json::from_slice(&bytes)
        .map_err(|e| CalibrationError::ModelLoad(format!("{}: {e}", path.display())))?;
    Ok(Some(metadata))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn vector_with(temp: f64) -> FeatureVector {
        let mut v = FeatureVector::default();
        v.set(Feature::Temperature, temp);
        v.set(Feature::Humidity, 50.0);
        v
    }

    fn artifact(value: serde_json::Value) -> ModelArtifact {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_tree_ensemble_predicts() {
        // ---
        let model = artifact(json!({
            "kind": "tree_ensemble",
            "base_score": 0.5,
            "trees": [
                { "nodes": [
                    { "feature": "temperature", "threshold": 20.0, "left": 1, "right": 2 },
                    { "leaf": -1.0 },
                    { "leaf": 1.0 }
                ] },
                { "nodes": [ { "leaf": 0.25 } ] }
            ]
        }))
        .compile()
        .unwrap();

        assert_eq!(model.predict(&vector_with(15.0)), -0.25);
        assert_eq!(model.predict(&vector_with(20.0)), 1.75);
        assert!(model.describe().contains("2 trees"));
    }

    #[test]
    fn test_missing_value_follows_default_direction() {
        // ---
        let model = artifact(json!({
            "kind": "tree_ensemble",
            "trees": [ { "nodes": [
                { "feature": "dewpoint", "threshold": 5.0, "left": 1, "right": 2, "default_left": true },
                { "leaf": 3.0 },
                { "leaf": 4.0 }
            ] } ]
        }))
        .compile()
        .unwrap();
        assert_eq!(model.predict(&vector_with(10.0)), 3.0);
    }

    #[test]
    fn test_linear_model() {
        // ---
        let model = artifact(json!({
            "kind": "linear",
            "intercept": 1.0,
            "coefficients": { "temperature": 0.1, "humidity": -0.02 }
        }))
        .compile()
        .unwrap();
        assert!((model.predict(&vector_with(20.0)) - 2.0).abs() < 1e-12);

        let mut sparse = FeatureVector::default();
        sparse.set(Feature::Temperature, 20.0);
        assert!(model.predict(&sparse).is_nan());
    }

    #[test]
    fn test_invalid_artifacts_fail_to_compile() {
        // ---
        let unknown = artifact(json!({
            "kind": "linear", "intercept": 0.0, "coefficients": { "pm25": 1.0 }
        }));
        assert!(matches!(unknown.compile(), Err(CalibrationError::ModelLoad(_))));

        let cyclic = artifact(json!({
            "kind": "tree_ensemble",
            "trees": [ { "nodes": [
                { "feature": "temperature", "threshold": 1.0, "left": 0, "right": 1 },
                { "leaf": 0.0 }
            ] } ]
        }));
        assert!(cyclic.compile().is_err());

        let empty = artifact(json!({ "kind": "tree_ensemble", "trees": [ { "nodes": [] } ] }));
        assert!(empty.compile().is_err());
    }

    #[test]
    fn test_metadata_accepts_percentile_names() {
        // ---
        let meta: BundleMetadata =
            serde_json::from_value(json!({ "temp_thresholds": { "p25": 8.0, "p75": 27.0 } })).unwrap();
        let t = meta.thresholds.unwrap();
        assert_eq!((t.low, t.high), (8.0, 27.0));
    }
}
