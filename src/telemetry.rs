//! Tracing and metrics initialization.
//!
//! Installs the global tracing subscriber once per process and bridges the
//! `log` facade so dependency logs flow through the same pipeline.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Log output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize tracing for the process.
///
/// `RUST_LOG` overrides the configured level when set. Safe to call more
/// than once; only the first call installs a subscriber.
pub fn init_tracing(level: &str, format: LogFormat) {
    if TELEMETRY_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Route `log` records from reqwest, sea-orm and friends into tracing.
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already installed: {err}");
    }
}
