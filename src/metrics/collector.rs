//! Metrics collection using Prometheus
//!
//! This module provides comprehensive metrics collection for the switchboard
//! pairing service using Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the pairing service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue-related metrics
    queue_metrics: QueueMetrics,

    /// Session-related metrics
    session_metrics: SessionMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue-related metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Total pair requests processed
    pub pair_requests_total: IntCounter,

    /// Entries currently in Waiting status
    pub waiting_entries: IntGauge,

    /// Conditional claims lost to a concurrent writer
    pub claim_conflicts_total: IntCounter,

    /// Abandoned entries removed by sweeps or re-enqueues
    pub stale_entries_reclaimed_total: IntCounter,
}

/// Session-related metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Sessions currently awaiting a partner
    pub pending_sessions: IntGauge,

    /// Total matches by kind (immediate or deferred)
    pub matches_total: IntCounterVec,

    /// Sessions that expired without a partner
    pub timeouts_total: IntCounter,

    /// Sessions cancelled by the user
    pub cancellations_total: IntCounter,

    /// Time spent waiting before a session resolved
    pub wait_duration_seconds: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Enqueue operation processing time
    pub enqueue_duration: Histogram,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            session_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get session metrics
    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a pair request being processed
    pub fn record_enqueue(&self, duration: Duration) {
        self.queue_metrics.pair_requests_total.inc();
        self.performance_metrics
            .enqueue_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a claim that succeeded on the enqueue path
    pub fn record_immediate_match(&self) {
        self.session_metrics
            .matches_total
            .with_label_values(&["immediate"])
            .inc();
    }

    /// Record a match delivered to a waiting session
    pub fn record_deferred_match(&self) {
        self.session_metrics
            .matches_total
            .with_label_values(&["deferred"])
            .inc();
    }

    /// Record a session that expired without a partner
    pub fn record_timeout(&self) {
        self.session_metrics.timeouts_total.inc();
    }

    /// Record a session cancelled by the user
    pub fn record_cancellation(&self) {
        self.session_metrics.cancellations_total.inc();
    }

    /// Record a conditional claim lost to a concurrent writer
    pub fn record_claim_conflict(&self) {
        self.queue_metrics.claim_conflicts_total.inc();
    }

    /// Record abandoned entries reclaimed by a sweep or re-enqueue
    pub fn record_stale_reclaims(&self, count: u64) {
        self.queue_metrics.stale_entries_reclaimed_total.inc_by(count);
    }

    /// Track a session entering the pending state
    pub fn inc_pending_sessions(&self) {
        self.session_metrics.pending_sessions.inc();
    }

    /// Track a session leaving the pending state
    pub fn dec_pending_sessions(&self) {
        self.session_metrics.pending_sessions.dec();
    }

    /// Observe how long a session waited before resolving
    pub fn observe_wait_duration(&self, seconds: f64) {
        self.session_metrics.wait_duration_seconds.observe(seconds);
    }

    /// Refresh the queue depth gauge from the store
    pub fn set_waiting_entries(&self, count: usize) {
        self.queue_metrics.waiting_entries.set(count as i64);
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("switchboard_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "switchboard_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("switchboard_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "switchboard_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("switchboard_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pair_requests_total = IntCounter::new(
            "switchboard_pair_requests_total",
            "Total pair requests processed",
        )?;
        registry.register(Box::new(pair_requests_total.clone()))?;

        let waiting_entries = IntGauge::new(
            "switchboard_waiting_entries",
            "Entries currently in Waiting status",
        )?;
        registry.register(Box::new(waiting_entries.clone()))?;

        let claim_conflicts_total = IntCounter::new(
            "switchboard_claim_conflicts_total",
            "Conditional claims lost to a concurrent writer",
        )?;
        registry.register(Box::new(claim_conflicts_total.clone()))?;

        let stale_entries_reclaimed_total = IntCounter::new(
            "switchboard_stale_entries_reclaimed_total",
            "Abandoned entries removed by sweeps or re-enqueues",
        )?;
        registry.register(Box::new(stale_entries_reclaimed_total.clone()))?;

        Ok(Self {
            pair_requests_total,
            waiting_entries,
            claim_conflicts_total,
            stale_entries_reclaimed_total,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pending_sessions = IntGauge::new(
            "switchboard_pending_sessions",
            "Sessions currently awaiting a partner",
        )?;
        registry.register(Box::new(pending_sessions.clone()))?;

        let matches_total = IntCounterVec::new(
            Opts::new("switchboard_matches_total", "Total matches by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(matches_total.clone()))?;

        let timeouts_total = IntCounter::new(
            "switchboard_session_timeouts_total",
            "Sessions that expired without a partner",
        )?;
        registry.register(Box::new(timeouts_total.clone()))?;

        let cancellations_total = IntCounter::new(
            "switchboard_session_cancellations_total",
            "Sessions cancelled by the user",
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let wait_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "switchboard_session_wait_duration_seconds",
                "Time spent waiting before a session resolved",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(wait_duration_seconds.clone()))?;

        Ok(Self {
            pending_sessions,
            matches_total,
            timeouts_total,
            cancellations_total,
            wait_duration_seconds,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let enqueue_duration = Histogram::with_opts(
            HistogramOpts::new(
                "switchboard_enqueue_duration_seconds",
                "Enqueue processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(enqueue_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "switchboard_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            enqueue_duration,
            amqp_operation_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
