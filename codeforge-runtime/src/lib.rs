//! Composition root for the CodeForge persistence core.
//!
//! [`Runtime::start`] builds the storage facade, persistence queue, sync
//! orchestrator and auto-sync manager from a [`RuntimeConfig`];
//! [`Runtime::shutdown`] flushes and closes them.

pub mod config;
pub mod runtime;

pub use config::{ENV_DATA_DIR, ENV_REMOTE_URL, RuntimeConfig};
pub use runtime::Runtime;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Later calls are no-ops.
pub fn init_logging(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
