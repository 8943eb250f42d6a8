//! Evaluation metrics and per-iteration metric bookkeeping
//!
//! Metrics are dispatched through the [`Metric`] enum. Every model owns a
//! [`Monitor`] holding the optional train/test evaluation splits and the
//! append-only [`MetricsRecord`] filled after each training iteration.

use crate::core::{Pair, RatingSet, Result, ZeroError};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Number of ranked positions considered by DCG and NDCG
pub const RANKING_CUTOFF: usize = 100;

/// Recognised evaluation metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Rmse,
    Mae,
    Dcg,
    Ndcg,
}

impl Metric {
    /// All metrics, in display order
    pub const ALL: [Metric; 4] = [Metric::Rmse, Metric::Mae, Metric::Dcg, Metric::Ndcg];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
            Metric::Dcg => "dcg",
            Metric::Ndcg => "ndcg",
        }
    }

    /// Score predictions against ground truth
    pub fn score(&self, y_pred: &[f64], y_true: &[f64]) -> Result<f64> {
        if y_pred.len() != y_true.len() {
            return Err(ZeroError::DimensionMismatch {
                expected: y_true.len(),
                actual: y_pred.len(),
            });
        }
        let value = match self {
            Metric::Rmse => rmse(y_pred, y_true),
            Metric::Mae => mae(y_pred, y_true),
            Metric::Dcg => dcg(y_pred, y_true),
            Metric::Ndcg => ndcg(y_pred, y_true),
        };
        Ok(value)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = ZeroError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| ZeroError::UnknownMetric(s.to_string()))
    }
}

/// Names accepted wherever a metric is selected by name
pub fn available_evaluation_metrics() -> Vec<&'static str> {
    Metric::ALL.iter().map(Metric::name).collect()
}

/// Root mean squared error; 0 for empty input
pub fn rmse(y_pred: &[f64], y_true: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let sum: f64 = y_pred
        .iter()
        .zip(y_true)
        .map(|(p, t)| (t - p).powi(2))
        .sum();
    (sum / y_true.len() as f64).sqrt()
}

/// Mean absolute error; 0 for empty input
pub fn mae(y_pred: &[f64], y_true: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let sum: f64 = y_pred.iter().zip(y_true).map(|(p, t)| (t - p).abs()).sum();
    sum / y_true.len() as f64
}

/// Ground-truth relevances ordered by descending prediction
///
/// This is an ascending argsort read backwards, so tied predictions come out
/// in descending position order.
pub fn ranked_gains(y_pred: &[f64], y_true: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..y_pred.len()).collect();
    order.sort_by(|&a, &b| y_pred[a].total_cmp(&y_pred[b]).then(a.cmp(&b)));
    order.into_iter().rev().map(|i| y_true[i]).collect()
}

/// Discounted cumulative gain of the first `k` relevances
///
/// `Σ (2^r − 1) / log2(rank + 1)` with ranks starting at 1; 0 when empty.
pub fn dcg_at_k(relevances: &[f64], k: usize) -> f64 {
    relevances
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, &r)| (2f64.powf(r) - 1.0) / ((i + 2) as f64).log2())
        .sum()
}

/// DCG normalised by the ideal ordering; 0 when the ideal DCG is 0
pub fn ndcg_at_k(relevances: &[f64], k: usize) -> f64 {
    let mut ideal = relevances.to_vec();
    ideal.sort_by(|a, b| b.total_cmp(a));
    let idcg = dcg_at_k(&ideal, k);
    if idcg == 0.0 {
        return 0.0;
    }
    dcg_at_k(relevances, k) / idcg
}

pub fn dcg(y_pred: &[f64], y_true: &[f64]) -> f64 {
    dcg_at_k(&ranked_gains(y_pred, y_true), RANKING_CUTOFF)
}

pub fn ndcg(y_pred: &[f64], y_true: &[f64]) -> f64 {
    ndcg_at_k(&ranked_gains(y_pred, y_true), RANKING_CUTOFF)
}

/// Evaluation split a metric value was computed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => f.write_str("train"),
            Split::Test => f.write_str("test"),
        }
    }
}

/// Append-only metric history keyed by split then metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    train: BTreeMap<Metric, Vec<f64>>,
    test: BTreeMap<Metric, Vec<f64>>,
}

impl MetricsRecord {
    /// Record with an empty history for each metric on both splits
    pub fn new(metrics: &[Metric]) -> Self {
        let empty: BTreeMap<Metric, Vec<f64>> = metrics.iter().map(|&m| (m, Vec::new())).collect();
        Self {
            train: empty.clone(),
            test: empty,
        }
    }

    fn split(&self, split: Split) -> &BTreeMap<Metric, Vec<f64>> {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    fn split_mut(&mut self, split: Split) -> &mut BTreeMap<Metric, Vec<f64>> {
        match split {
            Split::Train => &mut self.train,
            Split::Test => &mut self.test,
        }
    }

    pub fn push(&mut self, split: Split, metric: Metric, value: f64) {
        self.split_mut(split).entry(metric).or_default().push(value);
    }

    /// History of one metric on one split, empty if never recorded
    pub fn history(&self, split: Split, metric: Metric) -> &[f64] {
        self.split(split)
            .get(&metric)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Most recent value of a metric on a split
    pub fn last(&self, split: Split, metric: Metric) -> Option<f64> {
        self.history(split, metric).last().copied()
    }

    /// Replace a whole history, used when an external solver reports its own log
    pub fn replace(&mut self, split: Split, metric: Metric, values: Vec<f64>) {
        self.split_mut(split).insert(metric, values);
    }

    pub fn clear(&mut self) {
        self.train.values_mut().for_each(Vec::clear);
        self.test.values_mut().for_each(Vec::clear);
    }
}

/// A metric value computed during training
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub split: Split,
    pub metric: Metric,
    pub value: f64,
}

/// Evaluation splits and metric history owned by a model
#[derive(Debug, Clone)]
pub struct Monitor {
    metrics: Vec<Metric>,
    record: MetricsRecord,
    train: Option<RatingSet>,
    test: Option<RatingSet>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(vec![Metric::Rmse])
    }
}

impl Monitor {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self {
            record: MetricsRecord::new(&metrics),
            metrics,
            train: None,
            test: None,
        }
    }

    /// Attach the splits evaluated after every training iteration
    pub fn set_evaluation(&mut self, train: Option<RatingSet>, test: Option<RatingSet>) {
        self.train = train;
        self.test = test;
    }

    pub fn set_metrics(&mut self, metrics: Vec<Metric>) {
        self.record = MetricsRecord::new(&metrics);
        self.metrics = metrics;
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn test_set(&self) -> Option<&RatingSet> {
        self.test.as_ref()
    }

    /// Whether any split is attached
    pub fn is_active(&self) -> bool {
        self.train.is_some() || self.test.is_some()
    }

    pub fn record(&self) -> &MetricsRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut MetricsRecord {
        &mut self.record
    }

    /// Score every attached split with `predict`
    pub fn evaluate<F>(&self, predict: F) -> Result<Vec<Evaluation>>
    where
        F: Fn(&[Pair]) -> Result<Vec<f64>>,
    {
        let mut evaluations = Vec::new();
        for (split, set) in [(Split::Train, &self.train), (Split::Test, &self.test)] {
            let Some(set) = set else { continue };
            let y_pred = predict(&set.pairs())?;
            let y_true = set.values();
            for &metric in &self.metrics {
                evaluations.push(Evaluation {
                    split,
                    metric,
                    value: metric.score(&y_pred, &y_true)?,
                });
            }
        }
        Ok(evaluations)
    }

    /// Append evaluations to the record, logging one line per split
    pub fn append(&mut self, evaluations: Vec<Evaluation>) {
        for split in [Split::Train, Split::Test] {
            let mut line = split.to_string();
            let mut any = false;
            for eval in evaluations.iter().filter(|e| e.split == split) {
                self.record.push(split, eval.metric, eval.value);
                line.push_str(&format!(" {}={:.6}", eval.metric, eval.value));
                any = true;
            }
            if any {
                info!("{line}");
            }
        }
    }
}
