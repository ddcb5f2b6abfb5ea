//! Rolling statistical baselines
//!
//! Each monitored metric keeps a bounded window of recent values and derives
//! mean, standard deviation, min and max over its most recent points. A new
//! value is judged against three independent criteria (z-score, deviation
//! from an exponentially smoothed expectation, and range blowout) and the
//! verdict carries a confidence scaled by how much history backs it.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::trend::mean;
use super::{Anomaly, AnomalyKind, AnomalyMetrics, Severity};
use crate::config::DetectionSettings;
use crate::models::MetricSample;

/// Minimum points before a baseline produces a verdict
pub const MIN_SAMPLES_FOR_VERDICT: usize = 10;

/// Exponential smoothing factor for the expected value
const SMOOTHING_ALPHA: f64 = 0.3;

/// Most recent points fed into exponential smoothing
const SMOOTHING_POINTS: usize = 10;

const Z_SCORE_THRESHOLD: f64 = 2.5;

const DEVIATION_THRESHOLD_PERCENT: f64 = 30.0;

/// Points per half when comparing recent and preceding means
const TREND_POINTS: usize = 10;

const TREND_CHANGE_PERCENT: f64 = 5.0;

/// Points required before seasonality is estimated
const SEASONALITY_MIN_POINTS: usize = 100;

const SEASONALITY_MAX_LAG: usize = 50;

/// Points at which the data-quality factor saturates
const FULL_QUALITY_POINTS: f64 = 100.0;

/// Metrics tracked by a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineMetric {
    Cpu,
    Memory,
    Network,
    Disk,
}

impl BaselineMetric {
    pub const ALL: [BaselineMetric; 4] = [
        BaselineMetric::Cpu,
        BaselineMetric::Memory,
        BaselineMetric::Network,
        BaselineMetric::Disk,
    ];

    /// Scalar value of this metric in a sample
    pub fn value_of(&self, sample: &MetricSample) -> f64 {
        match self {
            BaselineMetric::Cpu => sample.cpu.usage_percent,
            BaselineMetric::Memory => sample.memory.usage_percent,
            BaselineMetric::Network => sample.connections.established_count as f64,
            BaselineMetric::Disk => sample.max_disk_usage(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineMetric::Cpu => "cpu",
            BaselineMetric::Memory => "memory",
            BaselineMetric::Network => "network",
            BaselineMetric::Disk => "disk",
        }
    }
}

/// Direction of recent movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    Unknown,
}

/// Periodicity estimate from autocorrelation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seasonality {
    /// Lag (in samples) with the strongest correlation
    pub period: usize,
    pub strength: f64,
    pub is_significant: bool,
}

/// Which criteria triggered a verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionFactors {
    pub statistical: bool,
    pub deviation: bool,
    pub range: bool,
}

/// Verdict for a single value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub is_anomaly: bool,
    pub confidence: f64,
    pub severity: Severity,
    pub expected: f64,
    /// Percentage distance from `expected`
    pub deviation: f64,
    pub z_score: f64,
    pub factors: PredictionFactors,
}

impl Prediction {
    fn cold(value: f64) -> Self {
        Self {
            is_anomaly: false,
            confidence: 0.0,
            severity: Severity::Low,
            expected: value,
            deviation: 0.0,
            z_score: 0.0,
            factors: PredictionFactors::default(),
        }
    }
}

/// Summary of a baseline for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineStats {
    pub data_points: usize,
    pub is_ready: bool,
    pub mean: f64,
    pub std_dev: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub trend: Trend,
    pub seasonality: Option<Seasonality>,
}

/// Bounded window of historical values for one metric
#[derive(Debug, Clone)]
pub struct Baseline {
    capacity: usize,
    stats_window: usize,
    samples: VecDeque<f64>,
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
}

impl Baseline {
    /// Create a baseline retaining `capacity` points, with statistics over
    /// the most recent `stats_window` of them
    pub fn new(capacity: usize, stats_window: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            stats_window: stats_window.clamp(1, capacity),
            samples: VecDeque::with_capacity(capacity.min(1024)),
            mean: 0.0,
            std_dev: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Append a value, evicting the oldest beyond capacity
    pub fn train(&mut self, value: f64) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.recalculate_stats();
    }

    fn recalculate_stats(&mut self) {
        let recent: Vec<f64> = self.recent(self.stats_window);
        if recent.is_empty() {
            return;
        }

        let n = recent.len() as f64;
        self.mean = recent.iter().sum::<f64>() / n;
        let variance = recent.iter().map(|v| (v - self.mean).powi(2)).sum::<f64>() / n;
        self.std_dev = variance.sqrt();
        self.min = recent.iter().copied().fold(f64::INFINITY, f64::min);
        self.max = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    }

    /// The last `n` values in insertion order
    fn recent(&self, n: usize) -> Vec<f64> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained values, oldest first
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    pub fn has_sufficient_data(&self) -> bool {
        self.samples.len() >= MIN_SAMPLES_FOR_VERDICT
    }

    /// Judge `value` against the current window
    pub fn predict(&self, value: f64) -> Prediction {
        if !self.has_sufficient_data() {
            return Prediction::cold(value);
        }

        let z_score = (value - self.mean).abs() / self.std_dev.max(1.0);
        let expected = self.expected(value);
        let deviation = (value - expected).abs() / expected.max(1.0) * 100.0;

        let factors = PredictionFactors {
            statistical: z_score > Z_SCORE_THRESHOLD,
            deviation: deviation > DEVIATION_THRESHOLD_PERCENT,
            range: value < self.min * 0.5 || value > self.max * 1.5,
        };

        let mut confidence = 0.0;
        if factors.statistical {
            confidence += 0.4;
        }
        if factors.deviation {
            confidence += 0.3;
        }
        if factors.range {
            confidence += 0.3;
        }
        confidence *= self.data_quality();
        let confidence = (confidence * 100.0).round() / 100.0;

        Prediction {
            is_anomaly: factors.statistical || factors.deviation || factors.range,
            confidence,
            severity: Severity::from_confidence(confidence),
            expected,
            deviation,
            z_score,
            factors,
        }
    }

    fn data_quality(&self) -> f64 {
        (self.samples.len() as f64 / FULL_QUALITY_POINTS).min(1.0)
    }

    /// Exponentially smoothed value of the most recent points
    ///
    /// Falls back to `value` when the window is empty.
    fn expected(&self, value: f64) -> f64 {
        let recent = self.recent(SMOOTHING_POINTS);
        let Some((first, rest)) = recent.split_first() else {
            return value;
        };

        rest.iter().fold(*first, |smoothed, v| {
            SMOOTHING_ALPHA * v + (1.0 - SMOOTHING_ALPHA) * smoothed
        })
    }

    /// Compare the last 10 points against the 10 before them
    pub fn trend(&self) -> Trend {
        let len = self.samples.len();
        if len < TREND_POINTS {
            return Trend::Unknown;
        }

        let values: Vec<f64> = self.recent(TREND_POINTS * 2);
        let split = values.len() - TREND_POINTS;
        let (older, recent) = values.split_at(split);
        if older.is_empty() {
            return Trend::Unknown;
        }

        let older_avg = mean(older);
        let recent_avg = mean(recent);
        if older_avg.abs() < f64::EPSILON {
            return if recent_avg > f64::EPSILON {
                Trend::Increasing
            } else {
                Trend::Stable
            };
        }

        let change = (recent_avg - older_avg) / older_avg * 100.0;
        if change > TREND_CHANGE_PERCENT {
            Trend::Increasing
        } else if change < -TREND_CHANGE_PERCENT {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Strongest autocorrelation lag, once enough history exists
    pub fn seasonality(&self) -> Option<Seasonality> {
        let len = self.samples.len();
        if len < SEASONALITY_MIN_POINTS {
            return None;
        }

        let data: Vec<f64> = self.samples.iter().copied().collect();
        let max_lag = SEASONALITY_MAX_LAG.min(len / 4);

        let (period, strength) = (1..=max_lag)
            .map(|lag| (lag, autocorrelation(&data, lag)))
            .fold((0, 0.0), |best, (lag, corr)| {
                if corr > best.1 {
                    (lag, corr)
                } else {
                    best
                }
            });

        Some(Seasonality {
            period,
            strength,
            is_significant: strength > 0.3,
        })
    }

    pub fn stats(&self, min_training_size: usize) -> BaselineStats {
        let populated = !self.samples.is_empty();
        BaselineStats {
            data_points: self.samples.len(),
            is_ready: self.samples.len() >= min_training_size,
            mean: self.mean,
            std_dev: self.std_dev,
            min: populated.then_some(self.min),
            max: populated.then_some(self.max),
            trend: self.trend(),
            seasonality: self.seasonality(),
        }
    }
}

/// Pearson correlation between the series and itself shifted by `lag`
fn autocorrelation(data: &[f64], lag: usize) -> f64 {
    if lag >= data.len() {
        return 0.0;
    }

    let n = data.len() - lag;
    let head = &data[..n];
    let tail = &data[lag..];
    let mean_head = mean(head);
    let mean_tail = mean(tail);

    let mut numerator = 0.0;
    let mut denom_head = 0.0;
    let mut denom_tail = 0.0;
    for (a, b) in head.iter().zip(tail) {
        let da = a - mean_head;
        let db = b - mean_tail;
        numerator += da * db;
        denom_head += da * da;
        denom_tail += db * db;
    }

    let denominator = (denom_head * denom_tail).sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// One baseline per monitored metric
#[derive(Debug, Clone)]
pub struct BaselineSet {
    baselines: BTreeMap<BaselineMetric, Baseline>,
    min_training_size: usize,
}

impl BaselineSet {
    pub fn new(settings: &DetectionSettings) -> Self {
        let baselines = BaselineMetric::ALL
            .iter()
            .map(|m| {
                (
                    *m,
                    Baseline::new(settings.baseline_capacity, settings.stats_window),
                )
            })
            .collect();

        Self {
            baselines,
            min_training_size: settings.min_training_size,
        }
    }

    /// Feed every metric of a sample into its baseline
    pub fn train(&mut self, sample: &MetricSample) {
        for (metric, baseline) in self.baselines.iter_mut() {
            baseline.train(metric.value_of(sample));
        }
    }

    pub fn get(&self, metric: BaselineMetric) -> Option<&Baseline> {
        self.baselines.get(&metric)
    }

    /// Baseline verdicts for a sample, limited to trained metrics
    pub fn detect(&self, sample: &MetricSample) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for (metric, baseline) in &self.baselines {
            if baseline.len() < self.min_training_size {
                continue;
            }

            let value = metric.value_of(sample);
            let prediction = baseline.predict(value);
            if !prediction.is_anomaly {
                continue;
            }

            anomalies.push(Anomaly {
                kind: AnomalyKind::GenericMlAnomaly,
                severity: prediction.severity,
                confidence: prediction.confidence,
                message: format!(
                    "ML detected {} anomaly: {} (expected: {:.2})",
                    metric.as_str(),
                    value,
                    prediction.expected
                ),
                metric: Some(*metric),
                metrics: AnomalyMetrics {
                    actual: value,
                    expected: Some(prediction.expected),
                    deviation: Some(prediction.deviation),
                    z_score: Some(prediction.z_score),
                    ..Default::default()
                },
            });
        }

        anomalies
    }

    pub fn stats(&self) -> BTreeMap<BaselineMetric, BaselineStats> {
        self.baselines
            .iter()
            .map(|(metric, baseline)| (*metric, baseline.stats(self.min_training_size)))
            .collect()
    }
}
