use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DISPATCH_LOG";

/// Install the global subscriber. Output goes to stderr so command output on
/// stdout stays clean.
///
/// Field contract: state changes carry `job_id`, plus `worker_id` and `epoch`
/// when the event concerns an assignment.
pub fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `DISPATCH_LOG` first, then `RUST_LOG`, then `info` (`debug` when verbose).
pub fn env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}
