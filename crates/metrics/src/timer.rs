use std::time::{
    Duration,
    Instant,
};

use prometheus::{
    Histogram,
    HistogramVec,
};

use crate::{
    get_desc,
    labels::StaticMetricLabel,
    log_distribution,
    log_distribution_with_labels,
};

/// Observes the elapsed wall time into a histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: &'static Histogram,
}

impl Timer {
    pub fn new(histogram: &'static Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let elapsed = self.start.elapsed();
        tracing::debug!("{elapsed:?} for timer {:?}", get_desc(self.histogram));
        log_distribution(self.histogram, elapsed.as_secs_f64());
    }
}

/// Timer over a status-labeled histogram that reports `status="error"` unless
/// `.finish()` is explicitly called upon success.
pub struct StatusTimer {
    start: Instant,
    histogram: &'static HistogramVec,
    status: StaticMetricLabel,
}

impl StatusTimer {
    pub fn new(histogram: &'static HistogramVec) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            status: StaticMetricLabel::STATUS_ERROR,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(mut self) -> Duration {
        self.status = StaticMetricLabel::STATUS_SUCCESS;
        self.elapsed()
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let elapsed = self.start.elapsed();
        log_distribution_with_labels(
            self.histogram,
            elapsed.as_secs_f64(),
            vec![self.status.clone()],
        );
    }
}
