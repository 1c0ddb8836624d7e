//! Metrics for blob client operations.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

/// Metrics for store and retrieve operations.
#[derive(Clone)]
pub struct BlobMetrics {
    /// Histogram for operation latencies.
    pub operations: Histogram<f64>,

    /// Counter for classified failures of individual network calls.
    pub errors: Counter<u64>,

    /// Counter for retrievals returned without a matching hash.
    pub unverified_reads: Counter<u64>,
}

impl BlobMetrics {
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("blob_client_operation_duration_seconds")
            .with_description("Duration of blob client store/retrieve operations in seconds")
            .build();

        let errors = meter
            .u64_counter("blob_client_errors_total")
            .with_description("Failed storage network calls by error class")
            .build();

        let unverified_reads = meter
            .u64_counter("blob_client_unverified_reads_total")
            .with_description("Retrievals returned without a verified hash")
            .build();

        Self {
            operations,
            errors,
            unverified_reads,
        }
    }

    pub fn record_error(&self, op: &'static str, class: &'static str) {
        self.errors.add(
            1,
            &[KeyValue::new("op", op), KeyValue::new("class", class)],
        );
    }
}

/// Records how long one client operation took, labelled with the operation
/// name, when dropped.
pub struct OperationTimer {
    started: Instant,
    histogram: Histogram<f64>,
    op: &'static str,
}

impl OperationTimer {
    pub fn start(metrics: &BlobMetrics, op: &'static str) -> Self {
        Self {
            started: Instant::now(),
            histogram: metrics.operations.clone(),
            op,
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.histogram.record(
            self.started.elapsed().as_secs_f64(),
            &[KeyValue::new("op", self.op)],
        );
    }
}
