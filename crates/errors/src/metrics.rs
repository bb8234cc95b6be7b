use metrics::{
    log_counter_with_labels,
    register_grid_counter,
    StaticMetricLabel,
};

use crate::ErrorMetadataAnyhowExt;

register_grid_counter!(
    ERRORS_REPORTED_TOTAL,
    "Count of errors surfaced to callers, by code",
    &["code"]
);

/// Log an error that is about to be surfaced and bump its per-code counter.
pub fn report_error(e: &anyhow::Error) {
    let code = e
        .error_code()
        .map(|c| c.metric_label_value())
        .unwrap_or("untagged");
    tracing::error!("Caught error (code {code}): {e:#}");
    log_counter_with_labels(
        &ERRORS_REPORTED_TOTAL,
        1,
        vec![StaticMetricLabel::new("code", code)],
    );
}
