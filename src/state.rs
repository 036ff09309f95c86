//! # Application State Management
//!
//! Shared state for all HTTP request handlers: the runtime-updatable
//! configuration, the metrics counters, and the correction store handle.
//!
//! ## Concurrency:
//! Everything mutable sits behind `Arc<RwLock<T>>`: any number of handlers
//! can read at once, writers get exclusive access, and locks are held only
//! long enough to copy data out. Lock poisoning is not recoverable here, so
//! the accessors use `unwrap()` on lock acquisition.

use crate::config::AppConfig;
use crate::corrections::CorrectionStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (updated by middleware on every request)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Correction examples injected into future evaluation prompts
    pub corrections: Arc<dyn CorrectionStore>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests and calls.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of active simulated calls
    pub active_calls: u32,

    /// Evaluations completed since server start
    pub evaluations_completed: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, corrections: Arc<dyn CorrectionStore>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            corrections,
            start_time: Instant::now(),
        }
    }

    /// A copy of the current configuration. Cloning releases the lock
    /// immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a call connects. Tracks live load for the health and
    /// metrics endpoints.
    pub fn increment_active_calls(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_calls += 1;
    }

    /// Called on disconnect. Guarded against underflow.
    pub fn decrement_active_calls(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_calls > 0 {
            metrics.active_calls -= 1;
        }
    }

    pub fn active_calls(&self) -> u32 {
        self.metrics.read().unwrap().active_calls
    }

    pub fn increment_evaluations_completed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.evaluations_completed += 1;
    }

    /// Consistent copy of the metrics, cloned so no lock outlives the
    /// snapshot.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_calls: metrics.active_calls,
            evaluations_completed: metrics.evaluations_completed,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate as a fraction in 0.0..=1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
