use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;

static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn set_json_mode(v: bool) {
    let _ = JSON_MODE.set(v);
}

/// True when `--json` was given: plan/result envelopes go to stdout.
pub fn json_mode() -> bool {
    *JSON_MODE.get().unwrap_or(&false)
}

pub fn logs_are_json() -> bool {
    matches!(std::env::var("SCRAPE_LOG_FORMAT").as_deref(), Ok("json"))
}

/// Initialize tracing/logging according to RUST_LOG, SCRAPE_LOG_FORMAT and SCRAPE_LOG_FILE.
/// - Defaults to `info` if `RUST_LOG` is unset
/// - Supports `SCRAPE_LOG_FORMAT=json` for JSON logs (stderr)
/// - `SCRAPE_LOG_FILE=path` additionally appends plain-text logs to that file
///
/// The returned guard must be held until exit so the file writer drains.
pub fn init_tracing() -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, EnvFilter};
    use tracing_subscriber::prelude::*; // for .with()

    // Default filter if RUST_LOG unset
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_writer, guard) = match std::env::var("SCRAPE_LOG_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            let (w, g) = file_writer(Path::new(path.trim()));
            (Some(w), Some(g))
        }
        _ => (None, None),
    };
    let file_layer = file_writer.map(|w| fmt::layer().with_ansi(false).with_target(false).with_writer(w));

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let builder = tracing_subscriber::registry().with(filter).with(file_layer);

    if logs_are_json() {
        let _ = builder.with(fmt_layer.json().flatten_event(true)).try_init();
    } else {
        // human-friendly compact text
        let _ = builder.with(fmt_layer.compact()).try_init();
    }
    guard
}

fn file_writer(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "scrape.log".into());
    let appender = tracing_appender::rolling::never(dir, name);
    tracing_appender::non_blocking(appender)
}
