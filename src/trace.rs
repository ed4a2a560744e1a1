use std::sync::OnceLock;

use tracing::dispatcher::{Dispatch, set_global_default};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber.
///
/// `levels` is an `EnvFilter` directive string such as
/// `"gpu_verify=debug,kube=info"`; an unparsable string falls back to
/// `info`. Repeated calls are ignored, since tests initialize this many times.
pub fn init(color: bool, json: bool, levels: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_new(levels).unwrap_or_else(|_| EnvFilter::new("info"));

        let dispatch = if json {
            Dispatch::new(
                FmtSubscriber::builder()
                    .with_env_filter(filter)
                    .json()
                    .flatten_event(true)
                    .finish(),
            )
        } else {
            Dispatch::new(
                FmtSubscriber::builder()
                    .with_ansi(color)
                    .with_env_filter(filter)
                    .finish(),
            )
        };

        // Ignore errors when setting, another subscriber may already be
        // installed by the embedding test harness.
        let _ = set_global_default(dispatch);
    });
}
