//! # Profiling
//!
//! With the `profiling` feature, structural operations, command playback
//! and parallel chunk loops open `tracing` spans. [`init_tracing`] prints
//! them to stdout and [`init_file_tracing`] routes them to a file, both
//! through a non-blocking writer.
//!
//! ```ignore
//! let _guard = chunked_ecs::profiling::init_file_tracing("trace.json", true)?;
//! let mut world = World::new();
//! // spans from world operations land in trace.json
//! ```
//!
//! Keep the returned guard alive until the program exits; dropping it
//! flushes the writer.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;

use crate::error::{EcsError, Result};

/// Install a global subscriber writing to stdout. `json` selects JSON lines
/// instead of the plain text format.
pub fn init_tracing(json: bool) -> Result<WorkerGuard> {
    install(std::io::stdout(), json)
}

/// Install a global subscriber writing every span and event to `path`.
/// `json` selects JSON lines instead of the plain text format.
pub fn init_file_tracing(path: impl AsRef<Path>, json: bool) -> Result<WorkerGuard> {
    let file = File::create(path.as_ref())
        .map_err(|err| EcsError::ConfigError(format!("trace file: {err}")))?;
    install(file, json)
}

fn install<W: Write + Send + 'static>(writer: W, json: bool) -> Result<WorkerGuard> {
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    let builder = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| EcsError::ConfigError(format!("tracing subscriber: {err}")))?;
    Ok(guard)
}
