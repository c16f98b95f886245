use env_logger::{Env, Target};

/// Initialise the global logger on stderr.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `debug = true`.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .target(Target::Stderr)
        .format_timestamp_secs()
        .init();
}
