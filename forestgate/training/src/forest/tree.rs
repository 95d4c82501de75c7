use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::SplitCriterion;

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    /// Impurity measure.
    pub criterion: SplitCriterion,
    /// Minimum samples a node needs before it may split.
    pub min_samples_split: usize,
    /// Minimum samples each child must keep.
    pub min_samples_leaf: usize,
    /// Depth limit (root is depth 0).
    pub max_depth: Option<usize>,
    /// Features with a valid split to inspect before settling.
    pub max_features: usize,
}

impl SplitCriterion {
    /// Impurity of a node holding `positives` out of `total` samples.
    #[must_use]
    pub fn impurity(self, positives: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let p = positives as f64 / total as f64;
        let q = 1.0 - p;
        match self {
            Self::Gini => 1.0 - p * p - q * q,
            Self::Entropy => [p, q]
                .into_iter()
                .filter(|share| *share > 0.0)
                .map(|share| -share * share.log2())
                .sum(),
        }
    }
}

/// Node of a fitted tree, stored in a flat arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Terminal node.
    Leaf {
        /// Share of positive samples that reached the leaf.
        positive_fraction: f64,
        /// Samples (with bootstrap repeats) that reached the leaf.
        samples: usize,
    },
    /// Internal node: `feature <= threshold` goes left.
    Split {
        /// Feature column.
        feature: usize,
        /// Decision threshold.
        threshold: f64,
        /// Arena index of the left child.
        left: usize,
        /// Arena index of the right child.
        right: usize,
    },
}

/// Binary classification tree. The root lives at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature: usize,
    threshold: f64,
    improvement: f64,
}

struct Builder<'a, 'r> {
    features: ArrayView2<'a, f64>,
    classes: &'r [u8],
    params: TreeParams,
    rng: &'r mut ChaCha8Rng,
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `sample_indices` (repeats allowed).
    ///
    /// `classes` holds one `0`/`1` entry per row of `features`.
    #[must_use]
    pub fn fit<'a, 'r>(
        features: ArrayView2<'a, f64>,
        classes: &'r [u8],
        sample_indices: &mut [usize],
        params: TreeParams,
        rng: &'r mut ChaCha8Rng,
    ) -> Self {
        let mut builder = Builder {
            features,
            classes,
            params,
            rng,
            nodes: Vec::new(),
        };
        builder.grow(sample_indices, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    /// Positive-class probability for one sample.
    #[must_use]
    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf {
                    positive_fraction, ..
                } => return *positive_fraction,
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

    /// Node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Longest root-to-leaf path, in edges.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

impl Builder<'_, '_> {
    fn grow(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let total = indices.len();
        let positives = self.count_positives(indices);
        let at_depth_limit = self.params.max_depth.is_some_and(|limit| depth >= limit);
        let splittable = total >= self.params.min_samples_split
            && total >= 2 * self.params.min_samples_leaf
            && positives != 0
            && positives != total
            && !at_depth_limit;

        let candidate = if splittable {
            self.best_split(indices, positives)
        } else {
            None
        };
        let leaf = Node::Leaf {
            positive_fraction: positives as f64 / total.max(1) as f64,
            samples: total,
        };
        let Some(candidate) = candidate else {
            return self.push(leaf);
        };

        let mid = self.partition(indices, candidate);
        if mid == 0 || mid == total {
            return self.push(leaf);
        }
        let slot = self.push(Node::Leaf {
            positive_fraction: 0.0,
            samples: 0,
        });
        let (left_indices, right_indices) = indices.split_at_mut(mid);
        let left = self.grow(left_indices, depth + 1);
        let right = self.grow(right_indices, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: candidate.feature,
            threshold: candidate.threshold,
            left,
            right,
        };
        slot
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn count_positives(&self, indices: &[usize]) -> usize {
        indices
            .iter()
            .filter(|&&idx| self.classes[idx] == 1)
            .count()
    }

    /// Features are visited in a shuffled order. Features without any valid
    /// split do not count toward `max_features`.
    fn best_split(&mut self, indices: &[usize], positives: usize) -> Option<Candidate> {
        let total = indices.len();
        let parent = self.params.criterion.impurity(positives, total);
        let mut order: Vec<usize> = (0..self.features.ncols()).collect();
        order.shuffle(&mut *self.rng);

        let mut best: Option<Candidate> = None;
        let mut useful = 0;
        let mut column: Vec<(f64, u8)> = Vec::with_capacity(total);
        for feature in order {
            if useful >= self.params.max_features {
                break;
            }
            column.clear();
            column.extend(
                indices
                    .iter()
                    .map(|&idx| (self.features[[idx, feature]], self.classes[idx])),
            );
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            if let Some(found) = self.scan_feature(feature, &column, positives, parent) {
                useful += 1;
                if best.map_or(true, |current| found.improvement > current.improvement) {
                    best = Some(found);
                }
            }
        }
        best
    }

    fn scan_feature(
        &self,
        feature: usize,
        sorted: &[(f64, u8)],
        positives: usize,
        parent: f64,
    ) -> Option<Candidate> {
        let total = sorted.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<Candidate> = None;
        let mut left_positives = 0;
        for split in 1..total {
            left_positives += usize::from(sorted[split - 1].1);
            let (lo, hi) = (sorted[split - 1].0, sorted[split].0);
            let degenerate = lo.is_nan() || hi.is_nan() || lo >= hi;
            if degenerate || split < min_leaf || total - split < min_leaf {
                continue;
            }
            let right = total - split;
            let weighted = (split as f64
                * self.params.criterion.impurity(left_positives, split)
                + right as f64
                    * self
                        .params
                        .criterion
                        .impurity(positives - left_positives, right))
                / total as f64;
            let improvement = parent - weighted;
            if best.map_or(true, |current| improvement > current.improvement) {
                let mut threshold = lo + (hi - lo) / 2.0;
                if threshold >= hi || !threshold.is_finite() {
                    threshold = lo;
                }
                best = Some(Candidate {
                    feature,
                    threshold,
                    improvement,
                });
            }
        }
        best
    }

    fn partition(&self, indices: &mut [usize], candidate: Candidate) -> usize {
        let mut mid = 0;
        for i in 0..indices.len() {
            if self.features[[indices[i], candidate.feature]] <= candidate.threshold {
                indices.swap(i, mid);
                mid += 1;
            }
        }
        mid
    }
}
