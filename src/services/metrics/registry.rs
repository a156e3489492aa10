use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics registry for the collection pipeline
pub struct CollectorMetrics {
    registry: Registry,

    // Upstream client
    pub client_requests_total: CounterVec,

    // Fetch jobs
    pub fetch_outcomes_total: CounterVec,
    pub fetch_duration_seconds: Histogram,

    // Batch dispatch
    pub dispatch_entities_total: CounterVec,

    // Scheduler
    pub scheduler_polls_total: CounterVec,

    // Worker
    pub jobs_total: CounterVec,
}

impl CollectorMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let client_requests_total = CounterVec::new(
            Opts::new("stats_collector_client_requests_total", "Outbound hiscore requests by result"),
            &["result"],
        )?;
        registry.register(Box::new(client_requests_total.clone()))?;

        let fetch_outcomes_total = CounterVec::new(
            Opts::new("stats_collector_fetch_outcomes_total", "Fetch job outcomes by status"),
            &["status"],
        )?;
        registry.register(Box::new(fetch_outcomes_total.clone()))?;

        let fetch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("stats_collector_fetch_duration_seconds", "Fetch job duration")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(fetch_duration_seconds.clone()))?;

        let dispatch_entities_total = CounterVec::new(
            Opts::new("stats_collector_dispatch_entities_total", "Entities seen by batch dispatch, by stage"),
            &["stage"],
        )?;
        registry.register(Box::new(dispatch_entities_total.clone()))?;

        let scheduler_polls_total = CounterVec::new(
            Opts::new("stats_collector_scheduler_polls_total", "Scheduler poll decisions"),
            &["decision"],
        )?;
        registry.register(Box::new(scheduler_polls_total.clone()))?;

        let jobs_total = CounterVec::new(
            Opts::new("stats_collector_jobs_total", "Queued job attempts by kind and result"),
            &["kind", "result"],
        )?;
        registry.register(Box::new(jobs_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            client_requests_total,
            fetch_outcomes_total,
            fetch_duration_seconds,
            dispatch_entities_total,
            scheduler_polls_total,
            jobs_total,
        }))
    }

    pub fn record_client_request(&self, result: &str) {
        self.client_requests_total.with_label_values(&[result]).inc();
    }

    pub fn record_fetch_outcome(&self, status: &str, duration_secs: f64) {
        self.fetch_outcomes_total.with_label_values(&[status]).inc();
        self.fetch_duration_seconds.observe(duration_secs);
    }

    pub fn record_dispatch(&self, due: usize, enqueued: usize, failed: usize) {
        self.dispatch_entities_total
            .with_label_values(&["due"])
            .inc_by(due as f64);
        self.dispatch_entities_total
            .with_label_values(&["enqueued"])
            .inc_by(enqueued as f64);
        self.dispatch_entities_total
            .with_label_values(&["failed"])
            .inc_by(failed as f64);
    }

    pub fn record_scheduler_poll(&self, decision: &str) {
        self.scheduler_polls_total.with_label_values(&[decision]).inc();
    }

    pub fn record_job(&self, kind: &str, result: &str) {
        self.jobs_total.with_label_values(&[kind, result]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
