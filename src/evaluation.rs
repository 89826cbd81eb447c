//! Ranking metrics for scored matrices
//!
//! Precision and recall at k look only at the k highest scores. The top k
//! are selected with a bounded min-heap (O(n log k)) instead of a full sort;
//! ties go to the lower row index so results are deterministic.
//!
//! k is given either as a percentile of the scored rows
//! (`k = floor(n * p / 100)`) or as an absolute row count.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Which thresholds to evaluate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    /// Top-percentile thresholds, in percent (e.g. `10.0`)
    #[serde(default)]
    pub percentiles: Vec<f64>,
    /// Absolute top-n thresholds
    #[serde(default)]
    pub top_n: Vec<usize>,
}

/// A threshold for precision/recall
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Top `p` percent of rows
    Percentile(f64),
    /// Top `n` rows
    Count(usize),
}

impl Threshold {
    /// Number of rows selected out of `n_rows`
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn k(&self, n_rows: usize) -> usize {
        let k = match *self {
            Self::Percentile(p) => ((n_rows as f64) * p / 100.0).floor().max(0.0) as usize,
            Self::Count(n) => n,
        };
        k.min(n_rows)
    }

    /// Registry parameter string, `10_pct` or `50_abs`
    #[must_use]
    pub fn parameter(&self) -> String {
        match self {
            Self::Percentile(p) => format!("{p}_pct"),
            Self::Count(n) => format!("{n}_abs"),
        }
    }
}

/// One computed metric value
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// `precision@`, `recall@` or `roc_auc`
    pub metric: &'static str,
    /// Threshold parameter; empty for threshold-free metrics
    pub parameter: String,
    /// Value
    pub value: f64,
}

impl EvaluationConfig {
    /// Configured thresholds, percentiles first
    #[must_use]
    pub fn thresholds(&self) -> Vec<Threshold> {
        self.percentiles
            .iter()
            .map(|&p| Threshold::Percentile(p))
            .chain(self.top_n.iter().map(|&n| Threshold::Count(n)))
            .collect()
    }

    /// Compute every defined metric for `scores` against binary `labels`.
    ///
    /// Undefined values (empty top k, no positives, a single class) are
    /// left out.
    #[must_use]
    pub fn evaluate(&self, scores: &[f64], labels: &[u8]) -> Vec<MetricValue> {
        let mut out = Vec::new();
        for threshold in self.thresholds() {
            let k = threshold.k(scores.len());
            if let Some(value) = precision_at_k(scores, labels, k) {
                out.push(MetricValue {
                    metric: "precision@",
                    parameter: threshold.parameter(),
                    value,
                });
            }
            if let Some(value) = recall_at_k(scores, labels, k) {
                out.push(MetricValue {
                    metric: "recall@",
                    parameter: threshold.parameter(),
                    value,
                });
            }
        }
        if let Some(value) = roc_auc(scores, labels) {
            out.push(MetricValue {
                metric: "roc_auc",
                parameter: String::new(),
                value,
            });
        }
        out
    }
}

// Max-heap order is "worse first": lower score, then higher index
#[derive(Debug)]
struct HeapItem {
    score: f64,
    index: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Indices of the `k` highest scores, best first.
#[must_use]
pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::with_capacity(k.min(scores.len()) + 1);
    for (index, &score) in scores.iter().enumerate() {
        let item = HeapItem { score, index };
        if heap.len() < k {
            heap.push(item);
        } else if heap.peek().is_some_and(|worst| item < *worst) {
            heap.pop();
            heap.push(item);
        }
    }
    heap.into_sorted_vec().into_iter().map(|item| item.index).collect()
}

fn positives_in_top_k(scores: &[f64], labels: &[u8], k: usize) -> usize {
    top_k_indices(scores, k)
        .into_iter()
        .filter(|&i| labels.get(i).copied().unwrap_or(0) != 0)
        .count()
}

/// Share of positives among the top `k` rows; `None` when `k` is zero.
#[must_use]
pub fn precision_at_k(scores: &[f64], labels: &[u8], k: usize) -> Option<f64> {
    let k = k.min(scores.len());
    if k == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let precision = positives_in_top_k(scores, labels, k) as f64 / k as f64;
    Some(precision)
}

/// Share of all positives found in the top `k` rows; `None` without positives.
#[must_use]
pub fn recall_at_k(scores: &[f64], labels: &[u8], k: usize) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l != 0).count();
    if positives == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let recall = positives_in_top_k(scores, labels, k.min(scores.len())) as f64 / positives as f64;
    Some(recall)
}

/// Area under the ROC curve via average ranks; `None` for a single class.
#[must_use]
pub fn roc_auc(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let n = scores.len().min(labels.len());
    let positives = labels[..n].iter().filter(|&&l| l != 0).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]].total_cmp(&scores[order[i]]) == Ordering::Equal {
            j += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] != 0 {
                positive_rank_sum += average_rank;
            }
        }
        i = j + 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let (p, q) = (positives as f64, negatives as f64);
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * q))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_indices() {
        let scores = [0.1, 0.9, 0.5, 0.9, 0.3];
        assert_eq!(top_k_indices(&scores, 3), vec![1, 3, 2]);
        assert_eq!(top_k_indices(&scores, 10), vec![1, 3, 2, 4, 0]);
        assert!(top_k_indices(&scores, 0).is_empty());
    }

    #[test]
    fn test_precision_and_recall_at_k() {
        let scores = [0.9, 0.8, 0.7, 0.2];
        let labels = [1, 0, 1, 1];
        assert_eq!(precision_at_k(&scores, &labels, 2), Some(0.5));
        assert_eq!(recall_at_k(&scores, &labels, 3), Some(2.0 / 3.0));
        assert_eq!(precision_at_k(&scores, &labels, 0), None);
        assert_eq!(recall_at_k(&scores, &[0, 0, 0, 0], 2), None);
    }

    #[test]
    fn test_threshold_k() {
        assert_eq!(Threshold::Percentile(50.0).k(5), 2);
        assert_eq!(Threshold::Percentile(100.0).k(5), 5);
        assert_eq!(Threshold::Count(10).k(5), 5);
        assert_eq!(Threshold::Percentile(10.0).parameter(), "10_pct");
        assert_eq!(Threshold::Count(3).parameter(), "3_abs");
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &[1, 1, 0, 0]), Some(1.0));
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &[1, 1, 0, 0]), Some(0.0));
        assert_eq!(roc_auc(&[0.5, 0.5], &[1, 0]), Some(0.5));
        assert_eq!(roc_auc(&[0.5, 0.6], &[1, 1]), None);
    }

    #[test]
    fn test_evaluate_skips_undefined_metrics() {
        let config = EvaluationConfig {
            percentiles: vec![50.0],
            top_n: vec![1],
        };
        let metrics = config.evaluate(&[0.9, 0.1], &[1, 0]);
        let names: Vec<_> = metrics.iter().map(|m| (m.metric, m.parameter.as_str())).collect();
        assert_eq!(
            names,
            vec![
                ("precision@", "50_pct"),
                ("recall@", "50_pct"),
                ("precision@", "1_abs"),
                ("recall@", "1_abs"),
                ("roc_auc", ""),
            ]
        );

        let single_class = config.evaluate(&[0.9, 0.1], &[0, 0]);
        assert!(single_class.iter().all(|m| m.metric == "precision@"));
    }
}
