//! Global ZMQ context management
//!
//! Provides a process-wide ZMQ context with configurable IO thread count.
//! Every socket that talks over `inproc://`, and the ZAP handler that
//! authenticates CURVE peers, must live on the same context.

use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::{debug, warn};

/// Environment variable for configuring ZMQ IO threads
pub const ZMQ_IO_THREADS_ENV: &str = "SERVICEKIT_ZMQ_IO_THREADS";

/// Default number of IO threads for ZMQ context
const DEFAULT_IO_THREADS: i32 = 1;

static ZMQ_CONTEXT: Lazy<Arc<zmq::Context>> = Lazy::new(|| {
    let io_threads = io_thread_count();
    debug!("initializing global ZMQ context with {} IO thread(s)", io_threads);

    let ctx = zmq::Context::new();
    if let Err(e) = ctx.set_io_threads(io_threads) {
        warn!("Failed to set ZMQ IO threads to {}: {}, using default", io_threads, e);
    }

    Arc::new(ctx)
});

/// Get the global ZMQ context.
///
/// Initialized lazily on first access. Tests and embedders that need
/// isolation create their own `zmq::Context` instead.
pub fn global_context() -> Arc<zmq::Context> {
    Arc::clone(&ZMQ_CONTEXT)
}

/// Get the configured number of IO threads.
///
/// Returns the value from the environment variable, or the default (1).
pub fn io_thread_count() -> i32 {
    std::env::var(ZMQ_IO_THREADS_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &i32| *n > 0)
        .unwrap_or(DEFAULT_IO_THREADS)
}
