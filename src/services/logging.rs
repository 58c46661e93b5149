//! Tracing subscriber setup
//!
//! Console output only; JSON by default so the supervisor and the processing
//! worker (which inherits stdout) produce one uniform log stream.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "librarian_ingest=debug";

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let json_layer = json.then(|| fmt::layer().json());
    let text_layer = (!json).then(|| fmt::layer());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init();
}
