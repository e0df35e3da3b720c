//! Pre-trained classifier and label artifacts.
//!
//! The forest is an export of a scikit-learn style random forest: splits go
//! left when `x[feature] <= threshold`, leaves carry per-class weights.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::features::{EncodedRow, FEATURE_COUNT, TRAIN_FEATURE_COLUMNS};

/// Scored-prediction oracle over encoded feature rows.
pub trait Classifier: Send + Sync {
    /// Class ids, in the column order of [`Classifier::predict_proba`].
    fn classes(&self) -> &[i64];

    fn predict_proba(&self, rows: &[EncodedRow]) -> Vec<Vec<f64>>;

    /// Class id of the most probable class per row; ties go to the first.
    fn predict(&self, rows: &[EncodedRow]) -> Vec<i64> {
        let classes = self.classes();
        self.predict_proba(rows)
            .iter()
            .map(|probs| classes[argmax(probs)])
            .collect()
    }
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Tree { nodes }
    }

    fn leaf(&self, row: &EncodedRow) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { value } => return value,
            }
        }
    }

    /// Children must point forward so every walk terminates.
    fn validate(&self, tree: usize, n_classes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidModel(format!("tree {tree} has no nodes")));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(Error::InvalidModel(format!(
                            "tree {tree} node {idx} splits on feature {feature}"
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(Error::InvalidModel(format!(
                                "tree {tree} node {idx} has bad child {child}"
                            )));
                        }
                    }
                }
                Node::Leaf { value } => {
                    if value.len() != n_classes {
                        return Err(Error::InvalidModel(format!(
                            "tree {tree} node {idx} has {} class weights, expected {n_classes}",
                            value.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ForestArtifact {
    features: Vec<String>,
    classes: Vec<i64>,
    trees: Vec<Tree>,
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    classes: Vec<i64>,
    trees: Vec<Tree>,
}

impl RandomForest {
    pub fn new(classes: Vec<i64>, trees: Vec<Tree>) -> Result<Self> {
        if classes.is_empty() {
            return Err(Error::InvalidModel("forest has no classes".into()));
        }
        if trees.is_empty() {
            return Err(Error::InvalidModel("forest has no trees".into()));
        }
        for (i, tree) in trees.iter().enumerate() {
            tree.validate(i, classes.len())?;
        }
        Ok(RandomForest { classes, trees })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let artifact: ForestArtifact = read_json(path)?;
        if artifact.features != TRAIN_FEATURE_COLUMNS {
            return Err(Error::InvalidModel(format!(
                "{} was trained on a different feature schema",
                path.display()
            )));
        }

        let forest = RandomForest::new(artifact.classes, artifact.trees)?;
        info!(
            path = %path.display(),
            trees = forest.trees.len(),
            classes = forest.classes.len(),
            "loaded classifier"
        );
        Ok(forest)
    }

    fn row_proba(&self, row: &EncodedRow) -> Vec<f64> {
        let mut probs = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let leaf = tree.leaf(row);
            let total: f64 = leaf.iter().sum();
            if total > 0.0 {
                for (p, w) in probs.iter_mut().zip(leaf) {
                    *p += w / total;
                }
            }
        }
        let n = self.trees.len() as f64;
        probs.iter_mut().for_each(|p| *p /= n);
        probs
    }
}

impl Classifier for RandomForest {
    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn predict_proba(&self, rows: &[EncodedRow]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.row_proba(row)).collect()
    }
}

/// Class id to human label; the label at index `i` belongs to id `i`.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct LabelRegistry {
    labels: Vec<String>,
}

impl LabelRegistry {
    pub fn new(labels: Vec<String>) -> Self {
        LabelRegistry { labels }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let registry: LabelRegistry = read_json(path)?;
        info!(path = %path.display(), labels = registry.labels.len(), "loaded labels");
        Ok(registry)
    }

    pub fn label(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }

    pub fn id(&self, label: &str) -> Option<i64> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| i as i64)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| Error::artifact(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::artifact(path, e))
}
