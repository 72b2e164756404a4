//! Bridge configuration.
//!
//! Engine limits, console redirection and the unhandled-error handler for a
//! [`BridgeSession`](crate::BridgeSession).

use jsbridge_common::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Limits applied to the engine's runtime.
///
/// # Memory Limiting
///
/// Boa has no heap cap. The stack, recursion and loop limits are what bound
/// allocation growth of runaway scripts.
///
/// # Example
///
/// ```
/// use jsbridge_runtime::EngineLimits;
///
/// let limits = EngineLimits::new()
///     .with_recursion_limit(512)
///     .with_loop_iteration_limit(1_000_000);
/// assert!(limits.validate().is_ok());
/// ```
///
/// Limits deserialize from JSON; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Maximum VM stack size (in values)
    pub stack_size_limit: usize,
    /// Maximum call depth
    pub recursion_limit: usize,
    /// Maximum iterations of a single loop; `u64::MAX` disables the limit
    pub loop_iteration_limit: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            stack_size_limit: 1024 * 10,
            recursion_limit: 400,
            loop_iteration_limit: u64::MAX,
        }
    }
}

impl EngineLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack_size_limit(mut self, limit: usize) -> Self {
        self.stack_size_limit = limit;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }

    /// Validates the limits.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit is zero.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.stack_size_limit == 0 {
            return Err("stack size limit must be greater than zero".to_string());
        }
        if self.recursion_limit == 0 {
            return Err("recursion limit must be greater than zero".to_string());
        }
        if self.loop_iteration_limit == 0 {
            return Err("loop iteration limit must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Severity of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }
}

/// How console arguments are rendered before reaching the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleMode {
    /// Each argument is converted with the engine's string conversion, joined by spaces
    #[default]
    AsString,
    /// Each argument is rendered as JSON, joined by spaces
    AsJson,
    /// `console` methods exist but discard their arguments
    Empty,
}

/// Receives rendered console output.
pub type ConsoleSink = Arc<dyn Fn(ConsoleLevel, &str) + Send + Sync>;

/// Receives errors nobody was waiting for: failed fire-and-forget
/// evaluations and promise jobs that threw.
pub type UnhandledErrorHandler = Arc<dyn Fn(&BridgeError) + Send + Sync>;

/// Console redirection settings.
#[derive(Clone, Default)]
pub struct ConsoleConfig {
    pub mode: ConsoleMode,
    /// Where messages go; `None` forwards them to `tracing` under the
    /// `jsbridge::console` target.
    pub sink: Option<ConsoleSink>,
}

impl ConsoleConfig {
    pub fn new(mode: ConsoleMode) -> Self {
        Self { mode, sink: None }
    }

    pub fn with_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(ConsoleLevel, &str) + Send + Sync + 'static,
    {
        self.sink = Some(Arc::new(sink));
        self
    }
}

impl fmt::Debug for ConsoleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleConfig")
            .field("mode", &self.mode)
            .field("sink", &self.sink.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Configuration for a bridge session.
///
/// # Example
///
/// ```
/// use jsbridge_runtime::{BridgeConfig, ConsoleConfig, ConsoleMode, EngineLimits};
///
/// let config = BridgeConfig::new()
///     .with_limits(EngineLimits::new().with_recursion_limit(256))
///     .with_console(ConsoleConfig::new(ConsoleMode::AsJson))
///     .with_thread_name("scripting");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct BridgeConfig {
    pub limits: EngineLimits,
    pub console: ConsoleConfig,
    pub unhandled_error_handler: Option<UnhandledErrorHandler>,
    /// Name of the engine worker thread
    pub thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            limits: EngineLimits::default(),
            console: ConsoleConfig::default(),
            unhandled_error_handler: None,
            thread_name: "jsbridge-engine".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_console(mut self, console: ConsoleConfig) -> Self {
        self.console = console;
        self
    }

    pub fn with_unhandled_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BridgeError) + Send + Sync + 'static,
    {
        self.unhandled_error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] if the limits are invalid or the
    /// thread name is empty or contains a NUL byte.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate().map_err(BridgeError::InvalidConfig)?;

        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return Err(BridgeError::InvalidConfig(
                "thread name must be non-empty and must not contain NUL".to_string(),
            ));
        }
        Ok(())
    }

    /// Hands an error to the configured handler, or logs it.
    pub(crate) fn report_unhandled(&self, err: &BridgeError) {
        match &self.unhandled_error_handler {
            Some(handler) => handler(err),
            None => tracing::error!("Unhandled bridge error: {err}"),
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("limits", &self.limits)
            .field("console", &self.console)
            .field(
                "unhandled_error_handler",
                &self.unhandled_error_handler.as_ref().map(|_| "<fn>"),
            )
            .field("thread_name", &self.thread_name)
            .finish()
    }
}
