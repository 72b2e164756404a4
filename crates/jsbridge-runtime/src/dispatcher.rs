//! Call dispatcher.
//!
//! The engine is owned by one dedicated worker thread. Every evaluation and
//! proxy call becomes a [`PendingCall`] pushed onto a FIFO queue that the
//! worker drains one unit at a time, so callers on any thread observe their
//! own submissions executing in order. Engine timers fire on the same
//! thread whenever the queue is idle.
//!
//! # Re-entrancy
//!
//! Native methods invoked from script run on the worker while the engine is
//! mid-call. A blocking bridge call made from inside such a method cannot be
//! queued (the worker would wait on itself), so the engine context is lent to
//! the native call and the nested unit runs inline. See [`lend_context`].

use crate::engine::{marshal, Engine};
use crate::registry::global_name;
use crate::session::SessionShared;
use crate::value::{JsRef, RefKind, Value};
use boa_engine::{Context, JsObject, JsString, JsValue, Source};
use jsbridge_common::{BridgeError, Result, ValueType};
use std::cell::RefCell;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context as TaskContext, Poll};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};

/// A unit of engine work. Runs on the worker with exclusive engine access.
pub(crate) type Work = Box<dyn FnOnce(&mut Context, &Arc<SessionShared>) -> Result<Value> + Send>;

type Callback = Box<dyn FnOnce(Result<Value>) + Send>;

/// Where the outcome of a unit of work goes.
pub(crate) enum Reply {
    Channel(oneshot::Sender<Result<Value>>),
    Callback(Callback),
    /// Nobody is waiting; failures go to the unhandled-error handler
    Detached,
}

pub(crate) struct PendingCall {
    pub(crate) label: &'static str,
    pub(crate) work: Work,
    pub(crate) reply: Reply,
}

impl PendingCall {
    pub(crate) fn new(label: &'static str, work: Work, reply: Reply) -> Self {
        Self { label, work, reply }
    }

    /// Completes the call with `err` without running it.
    pub(crate) fn fail(self, err: BridgeError) {
        match self.reply {
            Reply::Channel(tx) => {
                let _ = tx.send(Err(err));
            }
            Reply::Callback(callback) => callback(Err(err)),
            Reply::Detached => {
                tracing::debug!(label = self.label, "Dropping detached call: {err}");
            }
        }
    }

    pub(crate) fn cancel(self) {
        self.fail(BridgeError::SessionClosed);
    }
}

pub(crate) enum Command {
    Call(PendingCall),
    Shutdown,
}

/// Outcome of a non-blocking bridge call.
///
/// Await it from async code or [`wait`](Self::wait) for it from a plain
/// thread. A session released before the call ran resolves it with
/// [`BridgeError::SessionClosed`].
#[must_use = "a pending result does nothing unless awaited or waited on"]
pub struct PendingResult {
    state: PendingState,
    worker: Option<ThreadId>,
}

enum PendingState {
    Waiting(oneshot::Receiver<Result<Value>>),
    Failed(Option<BridgeError>),
}

impl PendingResult {
    pub(crate) fn waiting(rx: oneshot::Receiver<Result<Value>>, worker: Option<ThreadId>) -> Self {
        Self {
            state: PendingState::Waiting(rx),
            worker,
        }
    }

    pub(crate) fn failed(err: BridgeError) -> Self {
        Self {
            state: PendingState::Failed(Some(err)),
            worker: None,
        }
    }

    /// Blocks the current thread until the call completes.
    ///
    /// # Errors
    ///
    /// Besides the call's own error, fails with [`BridgeError::Internal`]
    /// when called on the engine thread, where waiting could never finish.
    pub fn wait(self) -> Result<Value> {
        if self.worker == Some(thread::current().id()) {
            return Err(BridgeError::Internal(
                "cannot wait for a pending result on the engine thread".into(),
            ));
        }
        futures_lite::future::block_on(self)
    }
}

impl Future for PendingResult {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PendingState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(BridgeError::SessionClosed))),
            PendingState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(BridgeError::SessionClosed)))
            }
        }
    }
}

/// Sending half of the queue plus the worker that consumes it.
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Command>,
    worker: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Starts the worker thread and waits until its engine is ready.
    pub(crate) fn spawn(shared: Arc<SessionShared>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = std::sync::mpsc::channel();
        let thread_name = shared.config.thread_name.clone();

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_worker(shared, rx, init_tx))
            .map_err(|e| BridgeError::Startup(format!("failed to spawn engine thread: {e}")))?;

        let init = init_rx.recv();
        match init {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(BridgeError::Startup(
                    "engine thread exited during initialization".into(),
                ));
            }
        }

        Ok(Self {
            tx,
            worker: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn worker_id(&self) -> ThreadId {
        self.worker
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker
    }

    pub(crate) fn send(&self, call: PendingCall) {
        if let Err(mpsc::error::SendError(command)) = self.tx.send(Command::Call(call)) {
            if let Command::Call(call) = command {
                call.cancel();
            }
        }
    }

    /// Stops the worker. Joins it unless called from the worker itself.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        if self.is_worker_thread() {
            return;
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Engine worker thread panicked");
            }
        }
    }
}

fn run_worker(
    shared: Arc<SessionShared>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    init_tx: std::sync::mpsc::Sender<Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = init_tx.send(Err(BridgeError::Startup(format!(
                "failed to build worker runtime: {err}"
            ))));
            return;
        }
    };
    let mut engine = match Engine::new(Arc::clone(&shared)) {
        Ok(engine) => engine,
        Err(err) => {
            let _ = init_tx.send(Err(err));
            return;
        }
    };
    let _ = init_tx.send(Ok(()));
    tracing::debug!(session = shared.id, "Engine worker started");

    runtime.block_on(serve(&mut engine, &shared, &mut rx));

    rx.close();
    let mut cancelled = 0usize;
    while let Ok(command) = rx.try_recv() {
        if let Command::Call(call) = command {
            call.cancel();
            cancelled += 1;
        }
    }

    drop(engine);
    tracing::debug!(session = shared.id, cancelled, "Engine worker stopped");
}

/// Executes queued calls in order. While the queue is empty, waits for the
/// next command or the next timer deadline, whichever comes first.
async fn serve(engine: &mut Engine, shared: &SessionShared, rx: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        let command = match engine.next_timer() {
            Some(deadline) => tokio::select! {
                biased;
                command = rx.recv() => command,
                () = tokio::time::sleep_until(deadline.into()) => {
                    if !shared.is_released() {
                        engine.run_timers();
                    }
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match command {
            Some(Command::Call(call)) if shared.is_released() => call.cancel(),
            Some(Command::Call(call)) => {
                engine.execute(call);
                if !shared.is_released() {
                    engine.run_timers();
                }
            }
            Some(Command::Shutdown) | None => break,
        }
    }
}

thread_local! {
    static LENT_CONTEXTS: RefCell<Vec<(u64, *mut Context)>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` with `ctx` registered as the engine context of `session` on
/// this thread, making it available to [`with_lent_context`].
pub(crate) fn lend_context<R>(session: u64, ctx: &mut Context, f: impl FnOnce() -> R) -> R {
    struct Unlend;

    impl Drop for Unlend {
        fn drop(&mut self) {
            LENT_CONTEXTS.with(|lent| {
                lent.borrow_mut().pop();
            });
        }
    }

    LENT_CONTEXTS.with(|lent| lent.borrow_mut().push((session, ptr::from_mut(ctx))));
    let _unlend = Unlend;
    f()
}

/// Runs `f` on the innermost context lent for `session`, if any.
///
/// The entry is emptied while `f` runs so the same context is never handed
/// out twice; a native call made from within `f` lends it again.
pub(crate) fn with_lent_context<R>(session: u64, f: impl FnOnce(&mut Context) -> R) -> Option<R> {
    struct Restore {
        index: usize,
        ctx: *mut Context,
    }

    impl Drop for Restore {
        fn drop(&mut self) {
            LENT_CONTEXTS.with(|lent| {
                if let Some(entry) = lent.borrow_mut().get_mut(self.index) {
                    entry.1 = self.ctx;
                }
            });
        }
    }

    let (index, ctx) = LENT_CONTEXTS.with(|lent| {
        let mut lent = lent.borrow_mut();
        let index = lent
            .iter()
            .rposition(|(id, ctx)| *id == session && !ctx.is_null())?;
        let ctx = std::mem::replace(&mut lent[index].1, ptr::null_mut());
        Some((index, ctx))
    })?;
    let _restore = Restore { index, ctx };

    // SAFETY: the pointer was taken from the `&mut Context` held by the
    // `lend_context` frame below us on this thread's stack. That frame does
    // not touch the context until `f` returns, and the entry is nulled while
    // we hold it, so this is the only live mutable reference.
    let ctx = unsafe { &mut *ctx };
    Some(f(ctx))
}

/// Compiles and runs `source`, settling a returned promise.
pub(crate) fn evaluate_work(source: String, path: Option<PathBuf>, expected: ValueType) -> Work {
    Box::new(move |ctx, session| {
        let evaluated = match &path {
            Some(path) => ctx.eval(Source::from_bytes(source.as_bytes()).with_path(path)),
            None => ctx.eval(Source::from_bytes(source.as_bytes())),
        };
        let value = evaluated
            .map_err(|err| BridgeError::Script(marshal::script_error(err, path.as_deref(), ctx)))?;
        let value = marshal::settle(value, ctx)?;
        marshal::to_native_value(&value, &expected, session, ctx)
    })
}

/// Evaluates `source` and keeps the result, whatever it is, behind a new handle.
pub(crate) fn capture_work(source: String) -> Work {
    Box::new(move |ctx, session| {
        let value = ctx
            .eval(Source::from_bytes(source.as_bytes()))
            .map_err(|err| BridgeError::Script(marshal::script_error(err, None, ctx)))?;
        let kind = if value.is_callable() {
            RefKind::Function
        } else {
            RefKind::Object
        };
        marshal::retain(value, kind, session, ctx).map(Value::from)
    })
}

/// Builds `new Function(...params, body)`.
pub(crate) fn new_function_work(params: Vec<String>, body: String) -> Work {
    Box::new(move |ctx, session| {
        let args: Vec<JsValue> = params
            .iter()
            .chain(std::iter::once(&body))
            .map(|text| JsValue::new(JsString::from(text.as_str())))
            .collect();
        let constructor = ctx.intrinsics().constructors().function().constructor();
        let function = constructor
            .construct(&args, None, ctx)
            .map_err(|err| BridgeError::Script(marshal::script_error(err, None, ctx)))?;
        marshal::retain(function.into(), RefKind::Function, session, ctx).map(Value::from)
    })
}

/// Calls `method` on the target (or the target itself when `method` is
/// `None`), marshalling arguments with `params` and the result with `returns`.
pub(crate) fn invoke_work(
    target: JsRef,
    method: Option<String>,
    args: Vec<Value>,
    params: Vec<ValueType>,
    returns: ValueType,
) -> Work {
    Box::new(move |ctx, session| {
        let target_name = target.to_string();
        let this = marshal::lookup(&target, session, ctx)?;
        let callee = resolve_callee(&this, method.as_deref(), &target_name, ctx)?;

        let mut js_args = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let ty = params.get(index).unwrap_or(&ValueType::Any);
            js_args.push(marshal::to_engine_value(arg, ty, session, ctx)?);
        }

        let label = match &method {
            Some(method) => format!("{target_name}.{method}"),
            None => target_name.clone(),
        };
        tracing::trace!(target = %label, args = js_args.len(), "Invoking engine function");

        let result = callee
            .call(&this, &js_args, ctx)
            .map_err(|err| marshal::native_call_error(&label, err, ctx))?;
        let result = marshal::settle(result, ctx)?;
        marshal::to_native_value(&result, &returns, session, ctx)
    })
}

/// Checks that every name in `methods` resolves to something callable.
pub(crate) fn verify_work(target: JsRef, methods: Vec<String>) -> Work {
    Box::new(move |ctx, session| {
        let target_name = target.to_string();
        let this = marshal::lookup(&target, session, ctx)?;
        for method in &methods {
            resolve_callee(&this, Some(method), &target_name, ctx)?;
        }
        Ok(Value::Null)
    })
}

/// Marshals the value behind `target` with `expected`.
pub(crate) fn read_work(target: JsRef, expected: ValueType) -> Work {
    Box::new(move |ctx, session| {
        let value = marshal::lookup(&target, session, ctx)?;
        marshal::to_native_value(&value, &expected, session, ctx)
    })
}

pub(crate) fn get_property_work(target: JsRef, property: String, expected: ValueType) -> Work {
    Box::new(move |ctx, session| {
        let target_name = target.to_string();
        let this = marshal::lookup(&target, session, ctx)?;
        let object = this.as_object().ok_or_else(|| not_an_object(&target_name))?;
        let value = object
            .get(JsString::from(property.as_str()), ctx)
            .map_err(|err| BridgeError::Script(marshal::script_error(err, None, ctx)))?;
        marshal::to_native_value(&value, &expected, session, ctx)
    })
}

pub(crate) fn assign_global_work(target: JsRef, name: String) -> Work {
    Box::new(move |ctx, session| {
        let value = marshal::lookup(&target, session, ctx)?;
        ctx.global_object()
            .set(JsString::from(name.as_str()), value, true, ctx)
            .map_err(|err| BridgeError::Script(marshal::script_error(err, None, ctx)))?;
        Ok(Value::Null)
    })
}

/// Deletes the engine global backing handle `id`, after everything queued
/// before it.
pub(crate) fn release_global(session: &Arc<SessionShared>, id: u64) {
    let work: Work = Box::new(move |ctx, _| {
        let name = JsString::from(global_name(id).as_str());
        if let Err(err) = ctx.global_object().delete_property_or_throw(name, ctx) {
            tracing::debug!(handle = id, "Failed to delete handle global: {err}");
        }
        Ok(Value::Null)
    });
    session.run_detached("release_handle", work);
}

fn not_an_object(target: &str) -> BridgeError {
    BridgeError::NativeCall {
        target: target.to_string(),
        message: "value is not an object".into(),
        stack: None,
    }
}

fn resolve_callee(
    this: &JsValue,
    method: Option<&str>,
    target: &str,
    ctx: &mut Context,
) -> Result<JsObject> {
    let object = this.as_object().ok_or_else(|| not_an_object(target))?.clone();

    let Some(method) = method else {
        if object.is_callable() {
            return Ok(object);
        }
        return Err(BridgeError::NativeCall {
            target: target.to_string(),
            message: "value is not callable".into(),
            stack: None,
        });
    };

    let member = object
        .get(JsString::from(method), ctx)
        .map_err(|err| marshal::native_call_error(target, err, ctx))?;
    if let Some(member) = member.as_object() {
        if member.is_callable() {
            return Ok(member.clone());
        }
    }
    if object.is_callable() {
        return Ok(object);
    }

    Err(BridgeError::NativeCall {
        target: target.to_string(),
        message: format!("no callable member '{method}'"),
        stack: None,
    })
}
