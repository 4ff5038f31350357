use chrono::{DateTime, Utc};
use kube::{
    client::Client,
    runtime::events::{Recorder, Reporter},
};
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use serde::Serialize;
use tokio::time::Instant;

use crate::Error;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "hmc-controller".into(),
        }
    }
}

impl Diagnostics {
    pub(crate) fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

/// Reconcile counters and timings, labelled by controller.
#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "hmc_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["controller"],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "hmc_controller_reconciliation_errors_total",
                "reconciliation errors"
            ),
            &["controller", "error"],
        )?;
        let reconciliations = IntCounterVec::new(
            opts!("hmc_controller_reconciliations_total", "reconciliations"),
            &["controller"],
        )?;

        Ok(Metrics {
            reconciliations,
            failures,
            reconcile_duration,
        })
    }

    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> prometheus::Result<Self> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, controller: &str, e: &Error) {
        self.failures
            .with_label_values(&[controller, e.metric_label()])
            .inc()
    }

    pub fn count_and_measure(&self, controller: &'static str) -> ReconcileMeasurer {
        self.reconciliations.with_label_values(&[controller]).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            controller,
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    controller: &'static str,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.controller])
            .observe(duration);
    }
}
