use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced by bridge operations.
///
/// Conversion and argument errors are detected at the proxy boundary and
/// returned to the immediate caller. Engine exceptions surface as
/// [`BridgeError::Script`] (for evaluations) or [`BridgeError::NativeCall`]
/// (for calls made through a native-to-JS proxy).
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Script error: {0}")]
    Script(ScriptError),

    #[error("Argument mismatch calling '{method}': {reason}")]
    ArgumentMismatch { method: String, reason: String },

    #[error("Call to {target} failed: {message}")]
    NativeCall {
        target: String,
        message: String,
        stack: Option<String>,
    },

    #[error("Bridge session is closed")]
    SessionClosed,

    #[error("Bridge session has not been started")]
    NotStarted,

    #[error("Handle {0} has been released")]
    InvalidHandle(u64),

    #[error("Invalid interface contract: {0}")]
    InvalidContract(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start engine: {0}")]
    Startup(String),

    #[error("Internal bridge error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Shorthand for an [`BridgeError::ArgumentMismatch`].
    pub fn argument_mismatch(method: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::ArgumentMismatch {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error was caused by the session being released.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, BridgeError::SessionClosed)
    }
}

impl From<ScriptError> for BridgeError {
    fn from(err: ScriptError) -> Self {
        BridgeError::Script(err)
    }
}

/// Where a script error originated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Script path, when the source was loaded from a file
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file.as_deref().unwrap_or("<eval>"))?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

/// An exception raised by the engine, captured on the native side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptError {
    /// Human-readable message (`TypeError: x is not a function`, `undefined`, ...)
    pub message: String,
    pub location: Option<SourceLocation>,
    pub stack: Option<String>,
    /// JSON rendering of the thrown value, when it could be rendered
    pub thrown: Option<serde_json::Value>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {location})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

pub type Result<T> = std::result::Result<T, BridgeError>;
