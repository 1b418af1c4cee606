//! Random forest of Gini decision trees
//!
//! Each tree draws a bootstrap sample and, at every node, a random subset of
//! candidate features. Tree `i` is seeded with `random_state + i`, so the
//! forest is identical whether trees are grown on the rayon pool or serially.

use super::{Classifier, RANDOM_FOREST};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Number of candidate features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `ceil(sqrt(width))`
    Sqrt,
    /// `ceil(log2(width))`
    Log2,
    /// Every feature
    All,
}

impl MaxFeatures {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn resolve(self, width: usize) -> usize {
        let k = match self {
            Self::Sqrt => (width as f64).sqrt().ceil() as usize,
            Self::Log2 => (width as f64).log2().ceil() as usize,
            Self::All => width,
        };
        k.clamp(1, width)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Log2 => "log2",
            Self::All => "all",
        }
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum tree depth (`None` = grow until pure)
    pub max_depth: Option<usize>,
    /// Minimum samples required to split a node
    pub min_samples_split: usize,
    /// Features considered per split
    pub max_features: MaxFeatures,
    /// Base seed
    pub random_state: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(10),
            min_samples_split: 2,
            max_features: MaxFeatures::Sqrt,
            random_state: 42,
        }
    }
}

impl RandomForestParams {
    pub(super) fn to_param_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("n_estimators".to_string(), self.n_estimators.to_string()),
            (
                "max_depth".to_string(),
                self.max_depth
                    .map_or_else(|| "none".to_string(), |d| d.to_string()),
            ),
            (
                "min_samples_split".to_string(),
                self.min_samples_split.to_string(),
            ),
            (
                "max_features".to_string(),
                self.max_features.as_str().to_string(),
            ),
            ("random_state".to_string(), self.random_state.to_string()),
        ])
    }

    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(Error::training(RANDOM_FOREST, "n_estimators must be > 0"));
        }
        if self.max_depth == Some(0) {
            return Err(Error::training(RANDOM_FOREST, "max_depth must be > 0"));
        }
        if self.min_samples_split < 2 {
            return Err(Error::training(
                RANDOM_FOREST,
                format!(
                    "min_samples_split must be >= 2, got {}",
                    self.min_samples_split
                ),
            ));
        }
        Ok(())
    }

    pub(super) fn fit(&self, x: &[Vec<f64>], y: &[u8]) -> Result<RandomForestModel> {
        self.validate()?;
        let width = x[0].len();
        let grower = TreeGrower {
            x,
            y,
            max_depth: self.max_depth.unwrap_or(usize::MAX),
            min_samples_split: self.min_samples_split,
            max_features: self.max_features.resolve(width),
        };
        let seeds: Vec<u64> = (0..self.n_estimators as u64)
            .map(|i| self.random_state.wrapping_add(i))
            .collect();

        #[cfg(feature = "rayon")]
        let grown: Vec<(Tree, Vec<f64>)> = seeds.par_iter().map(|&s| grower.grow(s)).collect();
        #[cfg(not(feature = "rayon"))]
        let grown: Vec<(Tree, Vec<f64>)> = seeds.iter().map(|&s| grower.grow(s)).collect();

        let mut importances = vec![0.0; width];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, tree_importance) in grown {
            let total: f64 = tree_importance.iter().sum();
            if total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(&tree_importance) {
                    *acc += v / total;
                }
            }
            trees.push(tree);
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(RandomForestModel { trees, importances })
    }
}

/// One node of a flattened tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        proba: f64,
    },
}

/// Decision tree stored as a node arena; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { proba } => return *proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

struct TreeGrower<'a> {
    x: &'a [Vec<f64>],
    y: &'a [u8],
    max_depth: usize,
    min_samples_split: usize,
    max_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

impl TreeGrower<'_> {
    fn grow(&self, seed: u64) -> (Tree, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = self.y.len();
        let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

        let mut nodes = Vec::new();
        let mut importances = vec![0.0; self.x[0].len()];
        self.build(&mut nodes, &mut importances, bootstrap, 0, &mut rng);
        (Tree { nodes }, importances)
    }

    /// Appends the subtree for `samples` and returns its root index.
    fn build(
        &self,
        nodes: &mut Vec<Node>,
        importances: &mut [f64],
        samples: Vec<usize>,
        depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let idx = nodes.len();
        let positives = samples.iter().filter(|&&i| self.y[i] == 1).count();
        #[allow(clippy::cast_precision_loss)]
        let proba = positives as f64 / samples.len() as f64;
        nodes.push(Node::Leaf { proba });

        if depth >= self.max_depth
            || samples.len() < self.min_samples_split
            || positives == 0
            || positives == samples.len()
        {
            return idx;
        }
        let Some(best) = self.best_split(&samples, positives, rng) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .copied()
            .partition(|&i| self.x[i][best.feature] <= best.threshold);
        importances[best.feature] += best.decrease;

        let left = self.build(nodes, importances, left, depth + 1, rng);
        let right = self.build(nodes, importances, right, depth + 1, rng);
        nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    /// Best Gini split over a random feature subset. The decrease is weighted
    /// by node size so summed decreases are mean-decrease-in-impurity.
    #[allow(clippy::cast_precision_loss)]
    fn best_split(&self, samples: &[usize], positives: usize, rng: &mut StdRng) -> Option<BestSplit> {
        let n = samples.len();
        let parent = gini(positives, n);
        let mut best: Option<BestSplit> = None;
        let mut order: Vec<(f64, u8)> = Vec::with_capacity(n);

        for feature in sample(rng, self.x[0].len(), self.max_features) {
            order.clear();
            order.extend(samples.iter().map(|&i| (self.x[i][feature], self.y[i])));
            order.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for k in 1..n {
                left_pos += usize::from(order[k - 1].1);
                if order[k - 1].0 == order[k].0 {
                    continue;
                }
                let right_pos = positives - left_pos;
                let weighted = (k as f64 * gini(left_pos, k)
                    + (n - k) as f64 * gini(right_pos, n - k))
                    / n as f64;
                let decrease = (parent - weighted) * n as f64;
                if decrease > 1e-12 && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (order[k - 1].0 + order[k].0) / 2.0,
                        decrease,
                    });
                }
            }
        }
        best
    }
}

#[allow(clippy::cast_precision_loss)]
fn gini(positives: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

/// Fitted random forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl RandomForestModel {
    /// Number of fitted trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForestModel {
    #[allow(clippy::cast_precision_loss)]
    fn predict_proba(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict_proba(row)).sum();
        sum / self.trees.len() as f64
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}
