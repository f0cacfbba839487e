//! Logging bootstrap.

use tracing::{Level, Subscriber};

/// The fmt subscriber used by [`init_logging`].
pub fn subscriber(level: Level) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .finish()
}

/// Install the fmt subscriber for the whole process. Returns `false` when a
/// global subscriber is already installed.
pub fn init_logging(level: Level) -> bool {
    tracing::subscriber::set_global_default(subscriber(level)).is_ok()
}
