//! Error handling for probescope
//!
//! This module defines the crate error type and a Result alias used
//! throughout the library.

use thiserror::Error;

/// Main error type for probescope operations
#[derive(Error, Debug)]
pub enum ProbeScopeError {
    /// Errors related to probe/SWD operations
    #[error("Probe error: {0}")]
    Probe(#[from] probe_rs::Error),

    /// Errors related to debug probe operations
    #[error("Debug probe error: {0}")]
    DebugProbe(#[from] probe_rs::probe::DebugProbeError),

    /// Errors related to target registry
    #[error("Registry error: {0}")]
    Registry(#[from] probe_rs::config::RegistryError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to a variable definition
    #[error("Variable error: {0}")]
    Variable(String),

    /// Errors related to memory access
    #[error("Memory access error at address 0x{address:08X}: {message}")]
    MemoryAccess { address: u64, message: String },

    /// Errors related to the trace stream
    #[error("Trace error: {0}")]
    Trace(String),

    /// An acquisition session stopped because a health threshold was exceeded
    #[error("Session stopped: {0}")]
    SessionStopped(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ProbeScopeError>,
    },
}

impl ProbeScopeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ProbeScopeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for probescope operations
pub type Result<T> = std::result::Result<T, ProbeScopeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
