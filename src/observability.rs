//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::CourierOptions;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process.
///
/// Log format defaults to plain text and can be switched to JSON via
/// `COURIER_LOG_FORMAT=json`. Filter defaults to `info` if `RUST_LOG` is
/// unset.
pub fn init_tracing() {
    init_with_filter("info");
}

/// Initialize tracing according to the runtime options.
///
/// `enable_console_logging = false` suppresses the subscriber entirely;
/// `enable_detailed_logging` lowers the default filter to `debug`.
/// `RUST_LOG` still wins when set.
pub fn init_tracing_with(options: &CourierOptions) {
    if !options.enable_console_logging {
        return;
    }
    let default_filter = if options.enable_detailed_logging {
        "debug"
    } else {
        "info"
    };
    init_with_filter(default_filter);
}

fn init_with_filter(default_filter: &str) {
    TRACING_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let json = std::env::var("COURIER_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}
