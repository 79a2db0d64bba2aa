//! Trend analysis and issue prediction over metric time series
//!
//! This module provides:
//! - Bounded rolling windows per metric type
//! - Least-squares trend, z-score anomalies and exhaustion forecasts
//! - Ranked `IssuePrediction` records from the prediction engine

mod engine;
mod window;

pub use engine::{IssuePrediction, MetricStats, PredictionKind, TrendAnalyzer, TrendConfig};
pub use window::{
    AnomalyScore, ExhaustionForecast, LinearFit, MetricDataPoint, MetricWindow,
    MIN_FORECAST_SAMPLES,
};
