use prometheus::{
    core::Collector,
    Gauge,
    GaugeVec,
    Histogram,
    HistogramVec,
    IntCounter,
    IntCounterVec,
};

use crate::labels::{
    Labels,
    MetricLabel,
};

pub fn log_counter(counter: &IntCounter, increment: u64) {
    counter.inc_by(increment);
}

pub fn log_counter_with_labels(counter: &IntCounterVec, increment: u64, labels: Labels) {
    match counter.get_metric_with(&labels.iter().map(MetricLabel::split_key_value).collect::<std::collections::HashMap<&str, &str>>()) {
        Ok(metric) => metric.inc_by(increment),
        Err(e) => log_invalid_metric(get_desc(counter), e),
    }
}

pub fn log_gauge(gauge: &Gauge, value: f64) {
    gauge.set(value);
}

pub fn log_gauge_with_labels(gauge: &GaugeVec, value: f64, labels: Labels) {
    match gauge.get_metric_with(&labels.iter().map(MetricLabel::split_key_value).collect::<std::collections::HashMap<&str, &str>>()) {
        Ok(metric) => metric.set(value),
        Err(e) => log_invalid_metric(get_desc(gauge), e),
    }
}

pub fn log_distribution(histogram: &Histogram, value: f64) {
    histogram.observe(value);
}

pub fn log_distribution_with_labels(histogram: &HistogramVec, value: f64, labels: Labels) {
    match histogram.get_metric_with(&labels.iter().map(MetricLabel::split_key_value).collect::<std::collections::HashMap<&str, &str>>()) {
        Ok(metric) => metric.observe(value),
        Err(e) => log_invalid_metric(get_desc(histogram), e),
    }
}

pub fn get_desc<M: Collector>(metric: &M) -> String {
    metric
        .desc()
        .first()
        .map(|d| d.fq_name.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

fn log_invalid_metric(desc: String, e: prometheus::Error) {
    tracing::error!("Failed to report metric {desc}: {e}");
}
