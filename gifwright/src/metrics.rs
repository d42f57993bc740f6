//! Domain metrics, recorded through the `metrics` facade.
//!
//! When `enable_metrics` is on, the Prometheus recorder installed by the router exports these at
//! `/internal/metrics`; otherwise the macros are no-ops.

use metrics::{counter, histogram};

use crate::errors::ErrorKind;

pub fn record_ingest(accepted: usize, rejected: usize) {
    counter!("gifwright_images_ingested_total").increment(accepted as u64);
    if rejected > 0 {
        counter!("gifwright_images_rejected_total").increment(rejected as u64);
    }
}

pub fn record_ingest_failure(kind: ErrorKind) {
    counter!("gifwright_ingest_failures_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_animation(frames: usize) {
    counter!("gifwright_animations_created_total").increment(1);
    histogram!("gifwright_animation_frames").record(frames as f64);
}

pub fn record_animation_failure(kind: ErrorKind) {
    counter!("gifwright_animation_failures_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_archive_failure() {
    counter!("gifwright_archive_failures_total").increment(1);
}
