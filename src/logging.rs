//! Log setup for the binary.
//!
//! Logs go to stderr so command output on stdout stays clean. `RUST_LOG`
//! takes precedence over `[logging] level`:
//!
//! ```bash
//! RUST_LOG=docchat=debug docchat ask "what changed in Q3?"
//! ```

use tracing_subscriber::{fmt, EnvFilter};

/// Filter directive for a bare level: applies it to this crate only and
/// keeps dependencies at `warn`.
pub fn directive(level: &str) -> String {
    format!("warn,docchat={}", level.trim().to_ascii_lowercase())
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive(level)))
        .unwrap_or_else(|_| EnvFilter::new(directive("info")));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
