// ABOUTME: Tracing subscriber setup for the command line tool
// ABOUTME: RUST_LOG wins when set; otherwise info, or debug with --debug or SANDCASTLE_DEBUG

use sandcastle_config::{constants::SANDCASTLE_DEBUG, parse_flag};
use tracing_subscriber::EnvFilter;

pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Debug requested through the environment
pub fn debug_from_env() -> bool {
    std::env::var(SANDCASTLE_DEBUG)
        .map(|v| parse_flag(SANDCASTLE_DEBUG, &v, false))
        .unwrap_or(false)
}

pub fn init_tracing(debug: bool) {
    let debug = debug || debug_from_env();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();
}
