//! Bridge session.
//!
//! A [`BridgeSession`] owns one engine (on its worker thread), the queue in
//! front of it and the registry of live handles. Sessions move through
//! `Uninitialized -> Running -> Released`; only a running session accepts
//! work, and release is terminal.

use crate::config::BridgeConfig;
use crate::dispatcher::{self, Dispatcher, PendingCall, PendingResult, Reply, Work};
use crate::proxy::{self, JsObjectProxy, NativeObjectProxy};
use crate::registry::HandleRegistry;
use crate::value::{JsRef, NativeObject, Value};
use jsbridge_common::{BridgeError, InterfaceContract, Result, ValueType};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::oneshot;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created but not started; work fails with [`BridgeError::NotStarted`]
    Uninitialized = 0,
    Running = 1,
    /// Terminal; work fails with [`BridgeError::SessionClosed`]
    Released = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Uninitialized,
            1 => SessionState::Running,
            _ => SessionState::Released,
        }
    }
}

/// State shared by session handles, value handles and the worker.
pub(crate) struct SessionShared {
    pub(crate) id: u64,
    state: AtomicU8,
    pub(crate) config: BridgeConfig,
    pub(crate) registry: HandleRegistry,
    dispatcher: OnceLock<Dispatcher>,
    start_lock: Mutex<()>,
}

impl SessionShared {
    fn new(config: BridgeConfig) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(SessionState::Uninitialized as u8),
            config,
            registry: HandleRegistry::new(),
            dispatcher: OnceLock::new(),
            start_lock: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub(crate) fn is_released(&self) -> bool {
        self.state() == SessionState::Released
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        match self.state() {
            SessionState::Running => Ok(()),
            SessionState::Uninitialized => Err(BridgeError::NotStarted),
            SessionState::Released => Err(BridgeError::SessionClosed),
        }
    }

    fn dispatcher(&self) -> Result<&Dispatcher> {
        self.ensure_running()?;
        self.dispatcher.get().ok_or(BridgeError::NotStarted)
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        let _guard = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.state() {
            SessionState::Running => return Ok(()),
            SessionState::Released => return Err(BridgeError::SessionClosed),
            SessionState::Uninitialized => {}
        }

        let dispatcher = Dispatcher::spawn(Arc::clone(self))?;
        if let Err(dispatcher) = self.dispatcher.set(dispatcher) {
            dispatcher.shutdown();
            return Err(BridgeError::Internal("session dispatcher already set".into()));
        }

        // A release that raced the spawn has already moved the state on.
        let started = self.state.compare_exchange(
            SessionState::Uninitialized as u8,
            SessionState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if started.is_err() {
            if let Some(dispatcher) = self.dispatcher.get() {
                dispatcher.shutdown();
            }
            tracing::debug!(session = self.id, "Session released while starting");
            return Err(BridgeError::SessionClosed);
        }
        tracing::info!(session = self.id, "Bridge session started");
        Ok(())
    }

    /// Releases the session. Returns false if it was already released.
    ///
    /// Safe to race with [`start`](Self::start): whichever side observes the
    /// other stops the worker.
    pub(crate) fn release(&self) -> bool {
        let previous = self.state.swap(SessionState::Released as u8, Ordering::AcqRel);
        if SessionState::from_u8(previous) == SessionState::Released {
            return false;
        }

        let invalidated = self.registry.clear();
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.shutdown();
        }
        tracing::info!(session = self.id, invalidated, "Bridge session released");
        true
    }

    fn submit(&self, call: PendingCall) {
        match self.dispatcher() {
            Ok(dispatcher) => dispatcher.send(call),
            Err(err) => call.fail(err),
        }
    }

    /// Runs `work` and blocks until it completes.
    ///
    /// On the worker thread the work runs inline on the context lent by the
    /// enclosing native call.
    pub(crate) fn run_blocking(self: &Arc<Self>, label: &'static str, work: Work) -> Result<Value> {
        let dispatcher = self.dispatcher()?;

        if dispatcher.is_worker_thread() {
            tracing::trace!(session = self.id, label, "Running re-entrant call inline");
            return dispatcher::with_lent_context(self.id, |ctx| work(ctx, self)).unwrap_or_else(|| {
                Err(BridgeError::Internal(format!(
                    "blocking '{label}' issued on the engine thread outside a native call"
                )))
            });
        }

        self.run_async(label, work).wait()
    }

    pub(crate) fn run_async(&self, label: &'static str, work: Work) -> PendingResult {
        let (tx, rx) = oneshot::channel();
        let worker = self.dispatcher.get().map(Dispatcher::worker_id);
        self.submit(PendingCall::new(label, work, Reply::Channel(tx)));
        PendingResult::waiting(rx, worker)
    }

    pub(crate) fn run_with_callback(
        &self,
        label: &'static str,
        work: Work,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) {
        self.submit(PendingCall::new(label, work, Reply::Callback(Box::new(callback))));
    }

    pub(crate) fn run_detached(&self, label: &'static str, work: Work) {
        self.submit(PendingCall::new(label, work, Reply::Detached));
    }
}

struct SessionInner {
    shared: Arc<SessionShared>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// Handle to a bridge session.
///
/// Clones share the session. It is released by [`release`](Self::release) or
/// when the last clone is dropped; a native object that holds a clone keeps
/// the session alive until it is released explicitly.
///
/// # Example
///
/// ```no_run
/// use jsbridge_runtime::{BridgeConfig, BridgeSession, Value, ValueType};
///
/// let session = BridgeSession::open(BridgeConfig::default())?;
/// let sum = session.evaluate("1.5 + 2", ValueType::F64)?;
/// assert_eq!(sum, Value::Double(3.5));
/// session.release();
/// # Ok::<(), jsbridge_common::BridgeError>(())
/// ```
#[derive(Clone)]
pub struct BridgeSession {
    inner: Arc<SessionInner>,
}

impl BridgeSession {
    /// Creates a session without starting its engine.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                shared: Arc::new(SessionShared::new(config)),
            }),
        })
    }

    /// Creates and starts a session.
    pub fn open(config: BridgeConfig) -> Result<Self> {
        let session = Self::new(config)?;
        session.start()?;
        Ok(session)
    }

    /// Starts the engine worker. Starting a running session is a no-op.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionClosed`] if the session was released, even by a
    /// release racing this call; [`BridgeError::Startup`] if the worker or
    /// its engine could not be created.
    pub fn start(&self) -> Result<()> {
        self.shared().start()
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.inner.shared
    }

    /// Process-unique id of the session, as it appears in log fields.
    pub fn id(&self) -> u64 {
        self.shared().id
    }

    /// Current lifecycle state.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use jsbridge_runtime::{BridgeConfig, BridgeSession, SessionState};
    ///
    /// let session = BridgeSession::new(BridgeConfig::default())?;
    /// assert_eq!(session.state(), SessionState::Uninitialized);
    /// session.start()?;
    /// assert_eq!(session.state(), SessionState::Running);
    /// session.release();
    /// assert_eq!(session.state(), SessionState::Released);
    /// # Ok::<(), jsbridge_common::BridgeError>(())
    /// ```
    pub fn state(&self) -> SessionState {
        self.shared().state()
    }

    /// Shorthand for `state() == SessionState::Released`.
    pub fn is_released(&self) -> bool {
        self.shared().is_released()
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &BridgeConfig {
        &self.shared().config
    }

    /// Number of live handles (engine values and native proxies).
    pub fn live_handles(&self) -> usize {
        self.shared().registry.len()
    }

    /// Releases the engine. Pending calls fail with
    /// [`BridgeError::SessionClosed`] and every handle becomes invalid.
    pub fn release(&self) {
        if !self.shared().release() {
            tracing::warn!(session = self.id(), "Bridge session already released");
        }
    }

    /// Evaluates `source` and waits for the result.
    ///
    /// A returned promise is awaited: fulfilled values are marshalled,
    /// rejections become [`BridgeError::Script`]. Promises still pending after
    /// the job queue drains come back as an object handle.
    pub fn evaluate(&self, source: &str, expected: ValueType) -> Result<Value> {
        self.shared().run_blocking(
            "evaluate",
            dispatcher::evaluate_work(source.to_string(), None, expected),
        )
    }

    /// Queues an evaluation and returns immediately.
    pub fn evaluate_async(&self, source: impl Into<String>, expected: ValueType) -> PendingResult {
        self.shared().run_async(
            "evaluate_async",
            dispatcher::evaluate_work(source.into(), None, expected),
        )
    }

    /// Queues an evaluation; `callback` receives the result on the engine thread.
    pub fn evaluate_with<F>(&self, source: impl Into<String>, expected: ValueType, callback: F)
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        self.shared().run_with_callback(
            "evaluate_with",
            dispatcher::evaluate_work(source.into(), None, expected),
            callback,
        );
    }

    /// Queues an evaluation whose result is discarded. Failures go to the
    /// unhandled-error handler.
    pub fn execute(&self, source: impl Into<String>) {
        self.shared().run_detached(
            "execute",
            dispatcher::evaluate_work(source.into(), None, ValueType::Void),
        );
    }

    /// Reads and evaluates a script file; errors carry the file path.
    pub fn evaluate_file(&self, path: impl AsRef<Path>, expected: ValueType) -> Result<Value> {
        let path = path.as_ref();
        self.shared().ensure_running()?;
        let source = std::fs::read_to_string(path)?;
        tracing::debug!(session = self.id(), path = %path.display(), "Evaluating script file");
        self.shared().run_blocking(
            "evaluate_file",
            dispatcher::evaluate_work(source, Some(path.to_path_buf()), expected),
        )
    }

    /// Evaluates `js_code` and keeps the result behind a handle.
    pub fn create_value(&self, js_code: &str) -> Result<JsRef> {
        let value = self
            .shared()
            .run_blocking("create_value", dispatcher::capture_work(js_code.to_string()))?;
        into_handle(value)
    }

    /// Creates `new Function(...params, body)` and returns a handle to it.
    pub fn new_function(&self, params: &[&str], body: &str) -> Result<JsRef> {
        let params = params.iter().map(|p| p.to_string()).collect();
        let value = self.shared().run_blocking(
            "new_function",
            dispatcher::new_function_work(params, body.to_string()),
        )?;
        into_handle(value)
    }

    /// Native-to-JS proxy over `value`.
    pub fn create_from_js_value(&self, value: &JsRef, contract: InterfaceContract) -> Result<JsObjectProxy> {
        proxy::create_from_js_value(self, value, contract)
    }

    /// JS-to-native proxy over `object`.
    pub fn create_from_native_object<T: NativeObject>(
        &self,
        object: T,
        contract: InterfaceContract,
    ) -> Result<NativeObjectProxy> {
        proxy::create_from_native_object(self, Arc::new(object), contract)
    }

    /// Exposes a single native function `name` with the given signature.
    pub fn create_from_native_fn<F>(
        &self,
        name: &str,
        params: Vec<ValueType>,
        returns: ValueType,
        function: F,
    ) -> Result<NativeObjectProxy>
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        proxy::create_from_native_fn(self, name, params, returns, function)
    }
}

fn into_handle(value: Value) -> Result<JsRef> {
    match value {
        Value::Object(handle) | Value::Function(handle) => Ok(handle),
        other => Err(BridgeError::Internal(format!(
            "expected a handle, engine returned {}",
            other.type_name()
        ))),
    }
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
