//! Registration and reporting helpers for our Prometheus metrics.

use std::sync::LazyLock;

pub use paste::paste;
pub use prometheus;

mod labels;
mod macros;
mod reporting;
mod timer;

pub use crate::{
    labels::{
        IntoLabel,
        Labels,
        MetricLabel,
        StaticMetricLabel,
        STATUS_LABEL,
    },
    reporting::{
        get_desc,
        log_counter,
        log_counter_with_labels,
        log_distribution,
        log_distribution_with_labels,
        log_gauge,
        log_gauge_with_labels,
    },
    timer::{
        StatusTimer,
        Timer,
    },
};

/// All metrics in the process register here; an exporter scrapes this
/// registry.
pub static GRID_METRICS_REGISTRY: LazyLock<prometheus::Registry> =
    LazyLock::new(prometheus::Registry::new);
