use std::{
    env,
    fmt::Debug,
    fs::File,
    io,
    str::FromStr,
    sync::LazyLock,
};

use tracing::Level;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Read a typed override for `name` from the environment, falling back to
/// `default` when the variable is unset or unparseable.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let raw = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match raw.parse::<T>() {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {raw} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Set `GRID_TRACE_FILE` to additionally mirror logs into
/// `<exe name>.log` next to the process.
static GRID_TRACE_FILE: LazyLock<Option<File>> = LazyLock::new(|| {
    env::var("GRID_TRACE_FILE").ok()?;
    let exe_path = env::current_exe().expect("Couldn't find exe name");
    let exe_name = exe_path
        .file_name()
        .expect("Path was empty")
        .to_str()
        .expect("Not valid unicode");
    let filename = format!("{exe_name}.log");
    let file =
        File::create(&filename).unwrap_or_else(|_| panic!("Could not create file {filename}"));
    Some(file)
});

/// Guard object. Hold onto it for as long as the `GRID_TRACE_FILE` sink
/// should keep flushing.
pub struct TracingGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Call this from services at startup.
pub fn config_service() -> TracingGuard {
    let mut layers = Vec::new();
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(env::var("NO_COLOR").is_err())
        .with_writer(io::stdout)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(Level::INFO.as_str())),
        )
        .boxed();
    layers.push(stdout_layer);

    let guard = if let Some(ref file) = *GRID_TRACE_FILE {
        let (file_writer, guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(
                EnvFilter::from_default_env()
                    .add_directive(Level::INFO.into())
                    .add_directive("invocation=debug".parse().unwrap()),
            )
            .boxed();
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };
    tracing_subscriber::registry().with(layers).init();

    TracingGuard { _guard: guard }
}

pub fn config_test() {
    // Ok if this fails - it probably means a previous test in the same
    // process already installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
