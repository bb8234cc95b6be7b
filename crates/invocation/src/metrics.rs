use metrics::{
    log_counter,
    log_counter_with_labels,
    log_gauge,
    register_grid_counter,
    register_grid_gauge,
    register_grid_histogram,
    IntoLabel,
    StaticMetricLabel,
    StatusTimer,
    Timer,
    STATUS_LABEL,
};

register_grid_counter!(
    INVOCATION_DISPATCH_TOTAL,
    "Count of operation dispatches, by locality",
    &["mode"]
);
pub fn log_dispatch(local: bool) {
    let mode = if local { "local" } else { "remote" };
    log_counter_with_labels(
        &INVOCATION_DISPATCH_TOTAL,
        1,
        vec![StaticMetricLabel::new("mode", mode)],
    );
}

register_grid_counter!(
    INVOCATION_RETRY_TOTAL,
    "Count of re-dispatches after a retryable failure"
);
pub fn log_invocation_retry() {
    log_counter(&INVOCATION_RETRY_TOTAL, 1);
}

register_grid_counter!(
    INVOCATION_COMPLETE_TOTAL,
    "Count of invocations reaching a terminal state, by outcome",
    &["outcome"]
);
pub fn log_invocation_complete(outcome: &'static str) {
    log_counter_with_labels(
        &INVOCATION_COMPLETE_TOTAL,
        1,
        vec![StaticMetricLabel::new("outcome", outcome)],
    );
}

register_grid_counter!(
    IS_STILL_EXECUTING_PROBE_TOTAL,
    "Count of liveness probes, by verdict",
    &["executing"]
);
pub fn log_probe_verdict(executing: bool) {
    log_counter_with_labels(
        &IS_STILL_EXECUTING_PROBE_TOTAL,
        1,
        vec![StaticMetricLabel::new("executing", executing.as_label())],
    );
}

register_grid_gauge!(
    PENDING_CALLS_TOTAL,
    "Number of registered pending remote calls"
);
pub fn log_pending_calls(pending: usize) {
    log_gauge(&PENDING_CALLS_TOTAL, pending as f64);
}

register_grid_histogram!(
    INVOCATION_SECONDS,
    "Time from invoke to terminal outcome",
    &STATUS_LABEL
);
pub fn invocation_timer() -> StatusTimer {
    StatusTimer::new(&INVOCATION_SECONDS)
}

register_grid_histogram!(
    IS_STILL_EXECUTING_SECONDS,
    "Duration of liveness probes"
);
pub fn probe_timer() -> Timer {
    Timer::new(&IS_STILL_EXECUTING_SECONDS)
}
