//! Issue prediction engine
//!
//! Keeps one rolling window per metric type and runs three independent
//! detectors on every update cycle:
//! - resource exhaustion forecast (metrics with a configured threshold)
//! - z-score anomaly detection
//! - performance degradation (latency-class metrics only)
//!
//! Each cycle replaces the current prediction set wholesale; every prediction
//! ever produced is also appended to an unbounded history.

use super::window::{
    AnomalyScore, ExhaustionForecast, MetricDataPoint, MetricWindow, MIN_FORECAST_SAMPLES,
};
use crate::models::{MetricType, Severity};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Minimum samples before the anomaly and degradation detectors run
const MIN_DETECTION_SAMPLES: usize = MIN_FORECAST_SAMPLES;

/// Window fill at which detector confidence saturates
const CONFIDENT_SAMPLES: f64 = 30.0;

/// Configuration for the trend analyzer
#[derive(Debug, Clone)]
pub struct TrendConfig {
    /// Samples kept per metric type (default: 100)
    pub window_size: usize,
    /// Wall-clock time represented by one sample (default: 60 seconds)
    pub sample_interval: Duration,
    /// Forecasts further out than this are suppressed (default: 24 hours)
    pub forecast_horizon: Duration,
    /// Exhaustion within this span is critical (default: 1 hour)
    pub critical_horizon: Duration,
    pub anomaly_warning_z: f64,
    pub anomaly_critical_z: f64,
    /// Minimum |slope / mean| for latency degradation (default: 5%)
    pub degradation_ratio: f64,
    /// Degradation at or above this ratio is critical (default: 20%)
    pub critical_degradation_ratio: f64,
    /// Exhaustion thresholds; metrics without one are never forecast
    pub thresholds: HashMap<MetricType, f64>,
}

impl Default for TrendConfig {
    fn default() -> Self {
        let thresholds = HashMap::from([
            (MetricType::CpuUsage, 95.0),
            (MetricType::MemoryUsage, 95.0),
            (MetricType::DiskUsage, 95.0),
            (MetricType::ErrorRate, 5.0),
        ]);

        Self {
            window_size: 100,
            sample_interval: Duration::from_secs(60),
            forecast_horizon: Duration::from_secs(24 * 60 * 60),
            critical_horizon: Duration::from_secs(60 * 60),
            anomaly_warning_z: 2.5,
            anomaly_critical_z: 4.0,
            degradation_ratio: 0.05,
            critical_degradation_ratio: 0.20,
            thresholds,
        }
    }
}

/// Which detector produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    ResourceExhaustion,
    Anomaly,
    PerformanceDegradation,
}

/// A forecast or detected issue for one metric
#[derive(Debug, Clone, Serialize)]
pub struct IssuePrediction {
    pub metric_type: MetricType,
    pub kind: PredictionKind,
    pub severity: Severity,
    /// 0.0 - 1.0
    pub probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_time: Option<DateTime<Utc>>,
    pub description: String,
    pub recommended_actions: Vec<String>,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub supporting_data: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

/// Summary statistics for one metric window
#[derive(Debug, Clone, Serialize)]
pub struct MetricStats {
    pub count: usize,
    pub current: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Slope per sample, absent below two samples
    pub trend: Option<f64>,
}

#[derive(Default)]
struct AnalyzerState {
    windows: HashMap<MetricType, MetricWindow>,
    current: Vec<IssuePrediction>,
    history: Vec<IssuePrediction>,
}

/// Trend, anomaly and exhaustion analysis over metric time series
pub struct TrendAnalyzer {
    config: TrendConfig,
    thresholds: RwLock<HashMap<MetricType, f64>>,
    state: RwLock<AnalyzerState>,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            thresholds: RwLock::new(config.thresholds.clone()),
            state: RwLock::new(AnalyzerState::default()),
            config,
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    pub fn set_threshold(&self, metric: MetricType, threshold: f64) {
        self.thresholds.write().insert(metric, threshold);
    }

    pub fn threshold(&self, metric: MetricType) -> Option<f64> {
        self.thresholds.read().get(&metric).copied()
    }

    /// Record one value and run a single-metric update cycle
    pub fn update_metric(&self, metric: MetricType, value: f64) -> Vec<IssuePrediction> {
        self.update_points(vec![(metric, MetricDataPoint::new(value))])
    }

    pub fn update_metric_with_metadata(
        &self,
        metric: MetricType,
        value: f64,
        metadata: HashMap<String, String>,
    ) -> Vec<IssuePrediction> {
        let mut point = MetricDataPoint::new(value);
        point.metadata = metadata;
        self.update_points(vec![(metric, point)])
    }

    /// Record several values as one update cycle
    pub fn update_metrics(&self, batch: &[(MetricType, f64)]) -> Vec<IssuePrediction> {
        self.update_points(
            batch
                .iter()
                .map(|(metric, value)| (*metric, MetricDataPoint::new(*value)))
                .collect(),
        )
    }

    fn update_points(&self, batch: Vec<(MetricType, MetricDataPoint)>) -> Vec<IssuePrediction> {
        let thresholds = self.thresholds.read().clone();
        let now = Utc::now();
        let mut state = self.state.write();

        let mut touched: Vec<MetricType> = Vec::new();
        for (metric, point) in batch {
            state
                .windows
                .entry(metric)
                .or_insert_with(|| MetricWindow::new(self.config.window_size))
                .push(point);
            if !touched.contains(&metric) {
                touched.push(metric);
            }
        }

        let mut predictions = Vec::new();
        for metric in touched {
            let Some(window) = state.windows.get(&metric) else {
                continue;
            };

            if let Some(threshold) = thresholds.get(&metric) {
                predictions.extend(self.detect_exhaustion(metric, window, *threshold, now));
            }
            predictions.extend(self.detect_anomaly(metric, window, now));
            if metric.is_latency() {
                predictions.extend(self.detect_degradation(metric, window, now));
            }
        }

        rank(&mut predictions);

        for prediction in &predictions {
            debug!(
                metric = %prediction.metric_type,
                kind = ?prediction.kind,
                severity = %prediction.severity,
                probability = prediction.probability,
                "Issue predicted"
            );
        }

        state.current = predictions.clone();
        state.history.extend(predictions.iter().cloned());
        predictions
    }

    fn detect_exhaustion(
        &self,
        metric: MetricType,
        window: &MetricWindow,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Option<IssuePrediction> {
        let forecast = window.predict_exhaustion(threshold)?;

        let eta_secs = forecast.samples_ahead * self.config.sample_interval.as_secs_f64();
        let horizon_secs = self.config.forecast_horizon.as_secs_f64();
        if eta_secs > horizon_secs {
            debug!(metric = %metric, eta_secs, "Exhaustion beyond forecast horizon");
            return None;
        }

        let severity = if eta_secs <= self.config.critical_horizon.as_secs_f64() {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let probability = (0.5 + 0.45 * (1.0 - eta_secs / horizon_secs)).clamp(0.0, 0.95);

        let supporting_data = BTreeMap::from([
            ("current".to_string(), forecast.current),
            ("threshold".to_string(), forecast.threshold),
            ("slope_per_sample".to_string(), forecast.slope),
            ("samples_ahead".to_string(), forecast.samples_ahead),
            ("eta_seconds".to_string(), eta_secs),
            ("r_squared".to_string(), forecast.r_squared),
        ]);

        Some(IssuePrediction {
            metric_type: metric,
            kind: PredictionKind::ResourceExhaustion,
            severity,
            probability,
            predicted_time: Some(now + chrono::Duration::milliseconds((eta_secs * 1000.0) as i64)),
            description: format!(
                "{} projected to reach {:.1} in {:.1} minutes \
                 (currently {:.1}, rising {:.2} per sample)",
                metric,
                threshold,
                eta_secs / 60.0,
                forecast.current,
                forecast.slope
            ),
            recommended_actions: exhaustion_actions(metric),
            confidence: forecast.r_squared.clamp(0.0, 1.0),
            supporting_data,
            created_at: now,
        })
    }

    fn detect_anomaly(
        &self,
        metric: MetricType,
        window: &MetricWindow,
        now: DateTime<Utc>,
    ) -> Option<IssuePrediction> {
        if window.len() < MIN_DETECTION_SAMPLES {
            return None;
        }

        let score = window.anomaly(self.config.anomaly_warning_z)?;
        if !score.is_anomaly {
            return None;
        }

        let severity = if score.z_score > self.config.anomaly_critical_z {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let supporting_data = BTreeMap::from([
            ("value".to_string(), score.value),
            ("mean".to_string(), score.mean),
            ("std_dev".to_string(), score.std_dev),
            ("z_score".to_string(), score.z_score),
        ]);

        Some(IssuePrediction {
            metric_type: metric,
            kind: PredictionKind::Anomaly,
            severity,
            probability: (score.z_score / 5.0).min(0.95),
            predicted_time: None,
            description: format!(
                "Anomalous {} value {:.2} (mean {:.2}, z-score {:.1})",
                metric, score.value, score.mean, score.z_score
            ),
            recommended_actions: vec![
                format!("Investigate recent changes affecting {}", metric),
                "Correlate with deployments and traffic spikes".to_string(),
            ],
            confidence: sample_confidence(window.len()),
            supporting_data,
            created_at: now,
        })
    }

    fn detect_degradation(
        &self,
        metric: MetricType,
        window: &MetricWindow,
        now: DateTime<Utc>,
    ) -> Option<IssuePrediction> {
        if window.len() < MIN_DETECTION_SAMPLES {
            return None;
        }

        let fit = window.fit()?;
        let mean = window.mean()?;
        if fit.slope <= 0.0 || mean.abs() < f64::EPSILON {
            return None;
        }

        let ratio = (fit.slope / mean).abs();
        if ratio < self.config.degradation_ratio {
            return None;
        }

        let severity = if ratio >= self.config.critical_degradation_ratio {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let supporting_data = BTreeMap::from([
            ("slope_per_sample".to_string(), fit.slope),
            ("mean".to_string(), mean),
            ("relative_growth".to_string(), ratio),
            ("r_squared".to_string(), fit.r_squared),
        ]);

        Some(IssuePrediction {
            metric_type: metric,
            kind: PredictionKind::PerformanceDegradation,
            severity,
            probability: (0.5 + ratio).min(0.9),
            predicted_time: None,
            description: format!(
                "{} degrading: growing {:.1}% of its mean per sample",
                metric,
                ratio * 100.0
            ),
            recommended_actions: vec![
                "Profile slow code paths and recent releases".to_string(),
                "Check downstream dependencies for latency".to_string(),
                "Consider caching or scaling the affected service".to_string(),
            ],
            confidence: fit.r_squared,
            supporting_data,
            created_at: now,
        })
    }

    pub fn trend(&self, metric: MetricType) -> Option<f64> {
        self.state.read().windows.get(&metric)?.trend()
    }

    pub fn anomaly(&self, metric: MetricType, z_threshold: f64) -> Option<AnomalyScore> {
        self.state.read().windows.get(&metric)?.anomaly(z_threshold)
    }

    pub fn predict_exhaustion(
        &self,
        metric: MetricType,
        threshold: f64,
    ) -> Option<ExhaustionForecast> {
        self.state
            .read()
            .windows
            .get(&metric)?
            .predict_exhaustion(threshold)
    }

    pub fn window_len(&self, metric: MetricType) -> usize {
        self.state
            .read()
            .windows
            .get(&metric)
            .map(MetricWindow::len)
            .unwrap_or(0)
    }

    /// Samples currently held for `metric`, oldest first
    pub fn data_points(&self, metric: MetricType) -> Vec<MetricDataPoint> {
        self.state
            .read()
            .windows
            .get(&metric)
            .map(|window| window.points().cloned().collect())
            .unwrap_or_default()
    }

    pub fn current_predictions(&self) -> Vec<IssuePrediction> {
        self.state.read().current.clone()
    }

    pub fn prediction_history(&self) -> Vec<IssuePrediction> {
        self.state.read().history.clone()
    }

    pub fn metrics_summary(&self) -> BTreeMap<MetricType, MetricStats> {
        let state = self.state.read();
        state
            .windows
            .iter()
            .filter_map(|(metric, window)| {
                Some((
                    *metric,
                    MetricStats {
                        count: window.len(),
                        current: window.current()?,
                        mean: window.mean()?,
                        std_dev: window.std_dev()?,
                        min: window.min()?,
                        max: window.max()?,
                        trend: window.trend(),
                    },
                ))
            })
            .collect()
    }

    /// Drop current predictions and history; windows are kept
    pub fn clear_predictions(&self) {
        let mut state = self.state.write();
        state.current.clear();
        state.history.clear();
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

/// Most severe first, then most probable
fn rank(predictions: &mut [IssuePrediction]) {
    predictions.sort_by(|a, b| {
        b.severity.cmp(&a.severity).then(
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
}

fn sample_confidence(samples: usize) -> f64 {
    (samples as f64 / CONFIDENT_SAMPLES).min(1.0)
}

fn exhaustion_actions(metric: MetricType) -> Vec<String> {
    let actions: &[&str] = match metric {
        MetricType::CpuUsage => &[
            "Scale out compute capacity",
            "Defer background and low-priority work",
        ],
        MetricType::MemoryUsage => &[
            "Release caches and buffers",
            "Check for memory leaks in long-running components",
        ],
        MetricType::DiskUsage => &[
            "Rotate or compress logs",
            "Purge temporary files and expand storage",
        ],
        MetricType::ErrorRate => &[
            "Review recent deployments for regressions",
            "Enable circuit breakers on failing dependencies",
        ],
        _ => &["Review capacity planning for this metric"],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(predictions: &[IssuePrediction]) -> Vec<PredictionKind> {
        predictions.iter().map(|p| p.kind).collect()
    }

    #[test]
    fn test_metadata_kept_with_samples() {
        let analyzer = TrendAnalyzer::default();
        analyzer.update_metric(MetricType::RequestRate, 4.0);
        analyzer.update_metric_with_metadata(
            MetricType::RequestRate,
            7.0,
            HashMap::from([("endpoint".to_string(), "/ingest".to_string())]),
        );

        let points = analyzer.data_points(MetricType::RequestRate);
        assert_eq!(points.len(), 2);
        assert!(points[0].metadata.is_empty());
        assert_eq!(points[1].value, 7.0);
        assert_eq!(points[1].metadata.get("endpoint").map(String::as_str), Some("/ingest"));
        assert!(analyzer.data_points(MetricType::CpuUsage).is_empty());
    }

    #[test]
    fn test_cpu_ramp_forecasts_exhaustion() {
        let analyzer = TrendAnalyzer::default();

        let mut last = Vec::new();
        for v in 60..80 {
            last = analyzer.update_metric(MetricType::CpuUsage, v as f64);
        }

        let exhaustion = last
            .iter()
            .find(|p| p.kind == PredictionKind::ResourceExhaustion)
            .expect("exhaustion forecast");

        assert_eq!(exhaustion.metric_type, MetricType::CpuUsage);
        assert!((exhaustion.supporting_data["samples_ahead"] - 16.0).abs() < 1e-6);
        // 16 samples at 60s is within the critical hour
        assert_eq!(exhaustion.severity, Severity::Critical);
        assert!(exhaustion.predicted_time.is_some());
        assert!((0.0..=1.0).contains(&exhaustion.probability));
        assert!((0.0..=1.0).contains(&exhaustion.confidence));
    }

    #[test]
    fn test_forecast_beyond_horizon_suppressed() {
        let analyzer = TrendAnalyzer::new(TrendConfig {
            sample_interval: Duration::from_secs(3600),
            ..Default::default()
        });

        let mut last = Vec::new();
        for v in 0..20 {
            last = analyzer.update_metric(MetricType::MemoryUsage, 40.0 + v as f64 * 0.5);
        }

        // (95 - 49.5) / 0.5 = 91 samples of an hour each
        assert!(!kinds(&last).contains(&PredictionKind::ResourceExhaustion));
    }

    #[test]
    fn test_no_forecast_without_threshold() {
        let analyzer = TrendAnalyzer::default();

        let mut last = Vec::new();
        for v in 0..20 {
            last = analyzer.update_metric(MetricType::RequestRate, v as f64);
        }

        assert!(!kinds(&last).contains(&PredictionKind::ResourceExhaustion));
    }

    #[test]
    fn test_flat_series_yields_nothing() {
        let analyzer = TrendAnalyzer::default();
        for _ in 0..30 {
            analyzer.update_metric(MetricType::CpuUsage, 50.0);
        }

        assert!(analyzer.current_predictions().is_empty());
        assert!(analyzer.prediction_history().is_empty());
    }

    #[test]
    fn test_outlier_flags_anomaly() {
        let analyzer = TrendAnalyzer::default();
        for _ in 0..20 {
            analyzer.update_metric(MetricType::RequestRate, 100.0);
        }

        let predictions = analyzer.update_metric(MetricType::RequestRate, 400.0);
        let anomaly = predictions
            .iter()
            .find(|p| p.kind == PredictionKind::Anomaly)
            .expect("anomaly");

        // z = sqrt(20) ~= 4.47
        assert_eq!(anomaly.severity, Severity::Critical);
        assert!((anomaly.probability - 0.894).abs() < 0.01);
    }

    #[test]
    fn test_latency_degradation() {
        let analyzer = TrendAnalyzer::default();

        let mut last = Vec::new();
        for i in 0..15 {
            last = analyzer.update_metric(MetricType::ResponseTime, 100.0 + 10.0 * i as f64);
        }

        let degradation = last
            .iter()
            .find(|p| p.kind == PredictionKind::PerformanceDegradation)
            .expect("degradation");
        assert_eq!(degradation.severity, Severity::Warning);

        // Same ramp on a non-latency metric is not a degradation
        for i in 0..15 {
            last = analyzer.update_metric(MetricType::RequestRate, 100.0 + 10.0 * i as f64);
        }
        assert!(!kinds(&last).contains(&PredictionKind::PerformanceDegradation));
    }

    #[test]
    fn test_current_replaced_history_accumulates() {
        let analyzer = TrendAnalyzer::default();
        for v in 60..80 {
            analyzer.update_metric(MetricType::CpuUsage, v as f64);
        }
        let history_len = analyzer.prediction_history().len();
        assert!(!analyzer.current_predictions().is_empty());

        // A quiet cycle on another metric empties the current set
        analyzer.update_metric(MetricType::RequestRate, 1.0);
        assert!(analyzer.current_predictions().is_empty());
        assert_eq!(analyzer.prediction_history().len(), history_len);

        analyzer.clear_predictions();
        assert!(analyzer.prediction_history().is_empty());
        assert_eq!(analyzer.window_len(MetricType::CpuUsage), 20);
    }

    #[test]
    fn test_metrics_summary() {
        let analyzer = TrendAnalyzer::default();
        analyzer.update_metrics(&[(MetricType::CpuUsage, 10.0), (MetricType::DiskUsage, 70.0)]);
        analyzer.update_metrics(&[(MetricType::CpuUsage, 20.0), (MetricType::DiskUsage, 70.0)]);

        let summary = analyzer.metrics_summary();
        assert_eq!(summary.len(), 2);

        let cpu = &summary[&MetricType::CpuUsage];
        assert_eq!(cpu.count, 2);
        assert_eq!(cpu.current, 20.0);
        assert_eq!(cpu.mean, 15.0);
        assert_eq!(cpu.trend, Some(10.0));
    }

    #[test]
    fn test_ranked_by_severity() {
        let analyzer = TrendAnalyzer::default();
        analyzer.set_threshold(MetricType::ResponseTime, 10_000.0);

        let mut last = Vec::new();
        for i in 0..15 {
            last = analyzer.update_metric(MetricType::ResponseTime, 100.0 + 10.0 * i as f64);
        }

        for pair in last.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
        }
    }
}
