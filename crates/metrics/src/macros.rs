/// Register an integer counter with the grid metrics registry and store it in
/// a static variable. An optional third argument specifies label names; with
/// labels the static is an `IntCounterVec`. The reported metric name is the
/// lower_snake_case version of the declared variable name.
#[macro_export]
macro_rules! register_grid_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_int_counter_with_registry!(
                    name,
                    $HELP,
                    $crate::GRID_METRICS_REGISTRY,
                )
                .expect("Metric initialization failed")
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounterVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_int_counter_vec_with_registry!(
                    name,
                    $HELP,
                    $LABELS,
                    $crate::GRID_METRICS_REGISTRY,
                )
                .expect("Metric initialization failed")
            });
    };
}

/// Register a gauge with the grid metrics registry and store it in a static
/// variable. An optional third argument specifies label names.
#[macro_export]
macro_rules! register_grid_gauge {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Gauge> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_gauge_with_registry!(
                    name,
                    $HELP,
                    $crate::GRID_METRICS_REGISTRY,
                )
                .expect("Metric initialization failed")
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::GaugeVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_gauge_vec_with_registry!(
                    name,
                    $HELP,
                    $LABELS,
                    $crate::GRID_METRICS_REGISTRY,
                )
                .expect("Metric initialization failed")
            });
    };
}

/// Register a histogram with the grid metrics registry and store it in a
/// static variable. An optional third argument specifies label names.
#[macro_export]
macro_rules! register_grid_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_histogram_with_registry!(
                    name,
                    $HELP,
                    $crate::GRID_METRICS_REGISTRY,
                )
                .expect("Metric initialization failed")
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::HistogramVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                #[allow(clippy::disallowed_macros)]
                $crate::prometheus::register_histogram_vec_with_registry!(
                    name,
                    $HELP,
                    $LABELS,
                    $crate::GRID_METRICS_REGISTRY,
                )
                .expect("Metric initialization failed")
            });
    };
}
