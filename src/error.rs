use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced across the engine's public boundary.
///
/// `Validation` errors are recoverable and travel back to the caller over a
/// batch's notification channel; the write-loop keeps running. `Fatal`
/// errors mean the write-loop or flush worker cannot make progress (disk
/// I/O, manifest append, allocation) and the thread that hit them exits,
/// per §7 of the spec.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("invalid write: {0}")]
    Validation(String),

    #[error("fatal engine error: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Fatal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Invoked when the write-loop or flush worker hits a fatal error (§7,
/// §10.2). Production code should terminate the process; tests install a
/// handler that records the failure instead, so a single I/O fault doesn't
/// take down the whole test binary.
pub type FatalHandler = Arc<dyn Fn(&EngineError) + Send + Sync>;

pub fn process_exit_fatal_handler() -> FatalHandler {
    Arc::new(|err| {
        tracing::error!(error = %err, "fatal engine error, exiting process");
        std::process::exit(1);
    })
}
