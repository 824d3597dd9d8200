//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "warn,homework_gen=debug,reqwest=info").
//! - Without LOG_LEVEL, `--verbose` raises our own target to debug.
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Logs go to stderr; stdout is reserved for the run summary.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,homework_gen=info";
const VERBOSE_FILTER: &str = "warn,homework_gen=debug";

fn default_filter(verbose: bool) -> &'static str {
  if verbose {
    VERBOSE_FILTER
  } else {
    DEFAULT_FILTER
  }
}

pub fn init_tracing(verbose: bool) {
  let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(true)
    .with_file(verbose)
    .with_line_number(verbose);

  match std::env::var("LOG_FORMAT").as_deref() {
    Ok("json") => builder.json().init(),
    _ => builder.init(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verbose_raises_own_target_only() {
    assert_eq!(default_filter(false), "warn,homework_gen=info");
    assert_eq!(default_filter(true), "warn,homework_gen=debug");
    assert!(EnvFilter::try_new(default_filter(true)).is_ok());
  }
}
