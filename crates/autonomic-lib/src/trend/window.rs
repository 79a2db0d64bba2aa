//! Bounded rolling window with closed-form statistics
//!
//! Samples are indexed by position, one time unit per sample. Regression,
//! z-scores and exhaustion forecasts are all computed over the whole window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Minimum samples required before extrapolating a trend
pub const MIN_FORECAST_SAMPLES: usize = 10;

/// A single observation of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl MetricDataPoint {
    pub fn new(value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            value,
            metadata: HashMap::new(),
        }
    }
}

/// Least-squares fit of value against sample index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Standardized deviation of the latest sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyScore {
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: f64,
    pub threshold: f64,
    pub is_anomaly: bool,
}

/// Linear extrapolation to a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExhaustionForecast {
    pub current: f64,
    pub threshold: f64,
    pub slope: f64,
    /// Samples until the threshold is crossed
    pub samples_ahead: f64,
    pub r_squared: f64,
}

/// Fixed-capacity window, oldest sample evicted on overflow
#[derive(Debug, Clone)]
pub struct MetricWindow {
    points: VecDeque<MetricDataPoint>,
    capacity: usize,
}

impl MetricWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, point: MetricDataPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn push_value(&mut self, value: f64) {
        self.push(MetricDataPoint::new(value));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn points(&self) -> impl Iterator<Item = &MetricDataPoint> {
        self.points.iter()
    }

    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    pub fn current(&self) -> Option<f64> {
        self.points.back().map(|p| p.value)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.values().sum::<f64>() / self.points.len() as f64)
    }

    /// Population standard deviation over the window
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance =
            self.values().map(|v| (v - mean).powi(2)).sum::<f64>() / self.points.len() as f64;
        Some(variance.sqrt())
    }

    pub fn min(&self) -> Option<f64> {
        self.values().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.values().reduce(f64::max)
    }

    /// Least-squares fit over (index, value); `None` below two samples
    pub fn fit(&self) -> Option<LinearFit> {
        let n = self.points.len() as f64;
        if self.points.len() < 2 {
            return None;
        }

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_xx = 0.0;

        for (i, y) in self.values().enumerate() {
            let x = i as f64;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_xx += x * x;
        }

        let denominator = n * sum_xx - sum_x * sum_x;
        if denominator.abs() < f64::EPSILON {
            return None;
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;

        let mean_y = sum_y / n;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for (i, y) in self.values().enumerate() {
            let predicted = slope * i as f64 + intercept;
            ss_res += (y - predicted).powi(2);
            ss_tot += (y - mean_y).powi(2);
        }

        // A perfectly flat series is perfectly explained by its fit
        let r_squared = if ss_tot.abs() < f64::EPSILON {
            1.0
        } else {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        };

        Some(LinearFit {
            slope,
            intercept,
            r_squared,
        })
    }

    /// Slope per sample; `None` means undefined (fewer than two samples)
    pub fn trend(&self) -> Option<f64> {
        self.fit().map(|fit| fit.slope)
    }

    /// Z-score of the latest sample against the window. A zero standard
    /// deviation never flags an anomaly.
    pub fn anomaly(&self, z_threshold: f64) -> Option<AnomalyScore> {
        if self.points.len() < 2 {
            return None;
        }

        let value = self.current()?;
        let mean = self.mean()?;
        let std_dev = self.std_dev()?;

        let z_score = if std_dev < f64::EPSILON {
            0.0
        } else {
            (value - mean).abs() / std_dev
        };

        Some(AnomalyScore {
            value,
            mean,
            std_dev,
            z_score,
            threshold: z_threshold,
            is_anomaly: z_score > z_threshold,
        })
    }

    /// Samples until `threshold` is crossed, if the series is rising toward it
    pub fn predict_exhaustion(&self, threshold: f64) -> Option<ExhaustionForecast> {
        if self.points.len() < MIN_FORECAST_SAMPLES {
            return None;
        }

        let current = self.current()?;
        let fit = self.fit()?;

        if fit.slope <= 0.0 || current >= threshold {
            return None;
        }

        Some(ExhaustionForecast {
            current,
            threshold,
            slope: fit.slope,
            samples_ahead: (threshold - current) / fit.slope,
            r_squared: fit.r_squared,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_of(values: impl IntoIterator<Item = f64>) -> MetricWindow {
        let mut window = MetricWindow::new(100);
        for v in values {
            window.push_value(v);
        }
        window
    }

    #[test]
    fn test_trend_undefined_below_two_samples() {
        assert!(window_of([]).trend().is_none());
        assert!(window_of([5.0]).trend().is_none());
        assert!(window_of([5.0, 6.0]).trend().is_some());
    }

    #[test]
    fn test_trend_constant_series_is_flat() {
        let slope = window_of(std::iter::repeat(42.0).take(30)).trend().unwrap();
        assert!(slope.abs() < 1e-9);
    }

    #[test]
    fn test_trend_follows_ramp_sign() {
        let rising = window_of((0..20).map(|i| 10.0 + 2.5 * i as f64));
        let falling = window_of((0..20).map(|i| 90.0 - 0.5 * i as f64));

        assert!((rising.trend().unwrap() - 2.5).abs() < 1e-9);
        assert!(falling.trend().unwrap() < 0.0);
    }

    #[test]
    fn test_anomaly_on_outlier() {
        let mut window = window_of(std::iter::repeat(50.0).take(20));
        window.push_value(100.0);

        let score = window.anomaly(2.5).unwrap();
        assert!(score.z_score > 2.5);
        assert!(score.is_anomaly);
    }

    #[test]
    fn test_anomaly_never_on_zero_deviation() {
        let window = window_of(std::iter::repeat(7.0).take(20));
        let score = window.anomaly(0.0).unwrap();

        assert_eq!(score.z_score, 0.0);
        assert!(!score.is_anomaly);
    }

    #[test]
    fn test_predict_exhaustion_linear_ramp() {
        let window = window_of((60..80).map(|v| v as f64));
        let forecast = window.predict_exhaustion(95.0).unwrap();

        assert!((forecast.samples_ahead - 16.0).abs() < 1e-6);
        assert!((forecast.slope - 1.0).abs() < 1e-9);
        assert!(forecast.r_squared > 0.99);
    }

    #[test]
    fn test_predict_exhaustion_none_cases() {
        // Flat
        assert!(window_of(std::iter::repeat(50.0).take(20))
            .predict_exhaustion(95.0)
            .is_none());
        // Too few samples
        assert!(window_of((60..65).map(|v| v as f64))
            .predict_exhaustion(95.0)
            .is_none());
        // Already past the threshold
        assert!(window_of((90..110).map(|v| v as f64))
            .predict_exhaustion(95.0)
            .is_none());
        // Falling
        assert!(window_of((0..20).map(|v| 80.0 - v as f64))
            .predict_exhaustion(95.0)
            .is_none());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = MetricWindow::new(3);
        for v in 1..=5 {
            window.push_value(v as f64);
        }

        assert_eq!(window.len(), 3);
        assert_eq!(window.min(), Some(3.0));
        assert_eq!(window.max(), Some(5.0));
        assert_eq!(window.mean(), Some(4.0));
    }
}
