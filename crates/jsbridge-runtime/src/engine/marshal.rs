//! Value marshalling between [`Value`] and engine values.
//!
//! # Rules
//!
//! - Engine numbers are doubles. Reading one as `i32`/`i64` truncates toward
//!   zero and fails on NaN, infinities and out-of-range values.
//! - Strings are never coerced to numbers (or anything else).
//! - null/undefined read as [`Value::Null`] unless a non-optional primitive is
//!   expected, which fails.
//! - Arrays convert element-wise. Other objects and functions stay in the
//!   engine and come back as [`JsRef`] handles.
//! - Proxies of native objects come back as the original [`NativeRef`].
//!   Proxies are recognised by their object data, which scripts cannot forge.
//! - A [`Deferred`] becomes a pending promise settled from the job queue.
//! - Without an expected type, integral numbers in `i32` range read as
//!   [`Value::Int`], other numbers as [`Value::Double`].

use crate::dispatcher::lend_context;
use crate::engine::json::js_value_to_json;
use crate::registry::global_name;
use crate::session::SessionShared;
use crate::value::{Deferred, JsRef, NativeRef, RefKind, Value};
use boa_engine::{
    Context, JsData, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    builtins::promise::PromiseState,
    job::{Job, NativeAsyncJob},
    js_string,
    native_function::NativeFunction,
    object::{FunctionObjectBuilder, builtins::{JsArray, JsPromise}},
};
use boa_gc::{Finalize, Trace};
use jsbridge_common::{BridgeError, MethodSignature, Result, ScriptError, SourceLocation, ValueType};
use std::path::Path;
use std::sync::Arc;

/// Object data of an engine-side native proxy.
#[derive(Debug, Trace, Finalize, JsData)]
struct NativeProxyTag {
    session: u64,
    id: u64,
}

enum ProxyLookup {
    NotAProxy,
    Live(NativeRef),
    /// A proxy of this session whose native side was released
    Released(u64),
}

const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// Converts a native value into an engine value.
///
/// # Errors
///
/// [`BridgeError::TypeConversion`] when `value` does not conform to
/// `expected` or references another session; [`BridgeError::InvalidHandle`]
/// for released handles.
pub(crate) fn to_engine_value(
    value: &Value,
    expected: &ValueType,
    session: &Arc<SessionShared>,
    ctx: &mut Context,
) -> Result<JsValue> {
    value.check(expected)?;

    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::new(*b)),
        Value::Int(i) => Ok(match i32::try_from(*i) {
            Ok(small) => JsValue::new(small),
            Err(_) => JsValue::new(*i as f64),
        }),
        Value::Double(d) => Ok(JsValue::new(*d)),
        Value::Str(s) => Ok(JsValue::new(JsString::from(s.as_str()))),
        Value::Array(items) => {
            let element = element_type(expected);
            let array = JsArray::new(ctx);
            for (i, item) in items.iter().enumerate() {
                let item = to_engine_value(item, element, session, ctx)
                    .map_err(|e| in_context(e, format!("array element {i}")))?;
                array
                    .push(item, ctx)
                    .map_err(|e| BridgeError::Internal(format!("failed to push array element {i}: {e}")))?;
            }
            Ok(array.into())
        }
        Value::Object(handle) | Value::Function(handle) => lookup(handle, session, ctx),
        Value::Native(native) => native_to_engine(native, session, ctx),
        Value::Deferred(deferred) => deferred_to_engine(deferred, expected, session, ctx),
    }
}

/// Converts a value native code hands over for the engine to keep, such as a
/// native method's result. Native objects in it that no other clone owns stay
/// exposed until the session is released.
fn hand_over(
    value: Value,
    expected: &ValueType,
    session: &Arc<SessionShared>,
    ctx: &mut Context,
) -> Result<JsValue> {
    let converted = to_engine_value(&value, expected, session, ctx)?;
    retain_unowned(value, session);
    Ok(converted)
}

fn retain_unowned(value: Value, session: &SessionShared) {
    match value {
        Value::Native(native) if native.is_sole_owner() && !native.bindings().is_empty() => {
            session.registry.retain_native(native);
        }
        Value::Array(items) => {
            for item in items {
                retain_unowned(item, session);
            }
        }
        _ => {}
    }
}

/// Converts an engine value into a native value of type `expected`.
pub(crate) fn to_native_value(
    value: &JsValue,
    expected: &ValueType,
    session: &Arc<SessionShared>,
    ctx: &mut Context,
) -> Result<Value> {
    if value.is_null_or_undefined() {
        if expected.accepts_null() {
            return Ok(Value::Null);
        }
        return Err(mismatch(value, expected));
    }

    match expected {
        ValueType::Optional(inner) => to_native_value(value, inner, session, ctx),
        ValueType::Any => infer(value, session, ctx),
        ValueType::Void => Ok(Value::Null),
        ValueType::Bool => value
            .as_boolean()
            .map(Value::Bool)
            .ok_or_else(|| mismatch(value, expected)),
        ValueType::I32 => {
            let n = value.as_number().ok_or_else(|| mismatch(value, expected))?;
            truncate(n, f64::from(i32::MIN), f64::from(i32::MAX) + 1.0, expected).map(Value::Int)
        }
        ValueType::I64 => {
            let n = value.as_number().ok_or_else(|| mismatch(value, expected))?;
            truncate(n, I64_LOWER, I64_UPPER, expected).map(Value::Int)
        }
        ValueType::F64 => value
            .as_number()
            .map(Value::Double)
            .ok_or_else(|| mismatch(value, expected)),
        ValueType::Str => value
            .as_string()
            .map(|s| Value::Str(s.to_std_string_escaped()))
            .ok_or_else(|| mismatch(value, expected)),
        ValueType::Array(element) => {
            let object = as_object(value).filter(JsObject::is_array);
            let object = object.ok_or_else(|| mismatch(value, expected))?;
            array_to_native(&object, element, session, ctx)
        }
        ValueType::Object => {
            let object = as_object(value).ok_or_else(|| mismatch(value, expected))?;
            object_to_native(object, session, ctx)
        }
        ValueType::Function => {
            let object = as_object(value)
                .filter(JsObject::is_callable)
                .ok_or_else(|| mismatch(value, expected))?;
            object_to_native(object, session, ctx)
        }
        ValueType::Native => {
            let object = as_object(value).ok_or_else(|| mismatch(value, expected))?;
            match native_of(&object, session) {
                ProxyLookup::Live(native) => Ok(Value::Native(native)),
                ProxyLookup::Released(id) => Err(BridgeError::InvalidHandle(id)),
                ProxyLookup::NotAProxy => Err(mismatch(value, expected)),
            }
        }
    }
}

fn infer(value: &JsValue, session: &Arc<SessionShared>, ctx: &mut Context) -> Result<Value> {
    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }
    if let Some(i) = value.as_i32() {
        return Ok(Value::Int(i64::from(i)));
    }
    if let Some(n) = value.as_number() {
        return Ok(integral_i32(n).map_or(Value::Double(n), Value::Int));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::Str(s.to_std_string_escaped()));
    }
    if let Some(object) = as_object(value) {
        if object.is_array() {
            return array_to_native(&object, &ValueType::Any, session, ctx);
        }
        return object_to_native(object, session, ctx);
    }

    Err(BridgeError::TypeConversion(format!(
        "unsupported engine value of type {}",
        value.type_of()
    )))
}

fn integral_i32(n: f64) -> Option<i64> {
    let is_negative_zero = n == 0.0 && n.is_sign_negative();
    if n.fract() == 0.0 && !is_negative_zero && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) {
        Some(n as i64)
    } else {
        None
    }
}

/// Truncates toward zero; `upper` is exclusive.
fn truncate(n: f64, lower: f64, upper: f64, expected: &ValueType) -> Result<i64> {
    if !n.is_finite() {
        return Err(BridgeError::TypeConversion(format!(
            "cannot convert non-finite number {n} to {expected}"
        )));
    }
    let truncated = n.trunc();
    if truncated < lower || truncated >= upper {
        return Err(BridgeError::TypeConversion(format!(
            "number {n} is out of range for {expected}"
        )));
    }
    Ok(truncated as i64)
}

fn array_to_native(
    object: &JsObject,
    element: &ValueType,
    session: &Arc<SessionShared>,
    ctx: &mut Context,
) -> Result<Value> {
    let array = JsArray::from_object(object.clone())
        .map_err(|e| BridgeError::TypeConversion(format!("object is not a valid array: {e}")))?;
    let length = array
        .length(ctx)
        .map_err(|e| BridgeError::TypeConversion(format!("failed to get array length: {e}")))?;

    let mut items = Vec::new();
    for i in 0..length {
        let item = array
            .get(i, ctx)
            .map_err(|e| BridgeError::TypeConversion(format!("failed to get array element {i}: {e}")))?;
        let item = to_native_value(&item, element, session, ctx)
            .map_err(|e| in_context(e, format!("array element {i}")))?;
        items.push(item);
    }
    Ok(Value::Array(items))
}

fn object_to_native(object: JsObject, session: &Arc<SessionShared>, ctx: &mut Context) -> Result<Value> {
    if let ProxyLookup::Live(native) = native_of(&object, session) {
        return Ok(Value::Native(native));
    }
    let kind = if object.is_callable() {
        RefKind::Function
    } else {
        RefKind::Object
    };
    retain(object.into(), kind, session, ctx).map(Value::from)
}

/// Keeps `value` reachable under a fresh handle global.
pub(crate) fn retain(
    value: JsValue,
    kind: RefKind,
    session: &Arc<SessionShared>,
    ctx: &mut Context,
) -> Result<JsRef> {
    let id = session.registry.register(kind, None);
    let name = JsString::from(global_name(id).as_str());
    if let Err(err) = ctx.global_object().set(name, value, true, ctx) {
        session.registry.remove(id);
        return Err(BridgeError::Internal(format!("failed to retain engine value: {err}")));
    }
    Ok(JsRef::new(id, kind, Arc::clone(session)))
}

/// Reads the engine value behind `handle`.
pub(crate) fn lookup(handle: &JsRef, session: &Arc<SessionShared>, ctx: &mut Context) -> Result<JsValue> {
    if !Arc::ptr_eq(handle.session(), session) {
        return Err(BridgeError::TypeConversion(format!(
            "handle {} belongs to a different session",
            handle.id()
        )));
    }
    global_handle(handle.id(), session, ctx)
}

fn global_handle(id: u64, session: &SessionShared, ctx: &mut Context) -> Result<JsValue> {
    if !session.registry.contains(id) {
        return Err(BridgeError::InvalidHandle(id));
    }
    let name = JsString::from(global_name(id).as_str());
    ctx.global_object()
        .get(name, ctx)
        .map_err(|err| BridgeError::Internal(format!("failed to read handle {id}: {err}")))
}

/// The native object behind `object`, if it is a proxy made by this session.
fn native_of(object: &JsObject, session: &SessionShared) -> ProxyLookup {
    let Some((owner, id)) = object
        .downcast_ref::<NativeProxyTag>()
        .map(|tag| (tag.session, tag.id))
    else {
        return ProxyLookup::NotAProxy;
    };
    if owner != session.id {
        return ProxyLookup::NotAProxy;
    }
    match session.registry.native(id) {
        Some(native) => ProxyLookup::Live(native.with_handle(session.id, id)),
        None => ProxyLookup::Released(id),
    }
}

/// Reuses the proxy `native` came from or already owns in this session, or
/// installs a new one owned by `native`.
fn native_to_engine(native: &NativeRef, session: &Arc<SessionShared>, ctx: &mut Context) -> Result<JsValue> {
    if let Some(id) = native.handle_in(session.id) {
        if session.registry.contains(id) {
            return global_handle(id, session, ctx);
        }
    }

    let mut bindings = native.bindings();
    bindings.retain(JsRef::is_valid);
    if let Some(bound) = bindings.iter().find(|bound| Arc::ptr_eq(bound.session(), session)) {
        return global_handle(bound.id(), session, ctx);
    }

    let id = session.registry.register(RefKind::Native, Some(native.detached()));
    let owner = JsRef::new(id, RefKind::Native, Arc::clone(session));
    let object = install_native_proxy(native, id, session, ctx)?;
    bindings.push(owner);
    Ok(object.into())
}

/// Builds the engine-side proxy of `native` and stores it under handle `id`.
///
/// Each contract method becomes a function property that checks arity and
/// argument types, runs the native method with the engine context lent to
/// it, and marshals the return with the declared type. Argument errors throw
/// a `TypeError`; a failing native method, or a call after the handle was
/// released, throws an `Error`.
pub(crate) fn install_native_proxy(
    native: &NativeRef,
    id: u64,
    session: &Arc<SessionShared>,
    ctx: &mut Context,
) -> Result<JsObject> {
    let prototype = ctx.intrinsics().constructors().object().prototype();
    let object = JsObject::from_proto_and_data(prototype, NativeProxyTag { session: session.id, id });

    let realm = ctx.realm().clone();
    for signature in native.contract().methods() {
        let method = NativeMethod {
            signature: signature.clone(),
            native: native.detached(),
            session: Arc::clone(session),
            id,
        };
        let function = FunctionObjectBuilder::new(
            &realm,
            NativeFunction::from_copy_closure_with_captures(NativeMethod::invoke, method),
        )
        .name(JsString::from(signature.name.as_str()))
        .length(signature.arity())
        .build();

        object
            .create_data_property_or_throw(JsString::from(signature.name.as_str()), function, ctx)
            .map_err(|e| {
                BridgeError::Internal(format!("failed to define method '{}': {e}", signature.name))
            })?;
    }

    let name = JsString::from(global_name(id).as_str());
    ctx.global_object()
        .set(name, object.clone(), true, ctx)
        .map_err(|e| BridgeError::Internal(format!("failed to store native proxy: {e}")))?;

    tracing::debug!(
        session = session.id,
        handle = id,
        contract = native.contract().name(),
        "Installed native proxy"
    );
    Ok(object)
}

/// One method of a native proxy, captured by its engine function.
#[derive(Trace, Finalize)]
struct NativeMethod {
    #[unsafe_ignore_trace]
    signature: MethodSignature,
    #[unsafe_ignore_trace]
    native: NativeRef,
    #[unsafe_ignore_trace]
    session: Arc<SessionShared>,
    id: u64,
}

impl NativeMethod {
    fn invoke(_this: &JsValue, args: &[JsValue], method: &Self, ctx: &mut Context) -> JsResult<JsValue> {
        method.call(args, ctx).map_err(|err| throwable(&err))
    }

    fn call(&self, args: &[JsValue], ctx: &mut Context) -> Result<JsValue> {
        self.session.ensure_running()?;
        if !self.session.registry.contains(self.id) {
            return Err(BridgeError::InvalidHandle(self.id));
        }

        let signature = &self.signature;
        signature.check_arity(args.len())?;

        let mut native_args = Vec::with_capacity(args.len());
        for (index, (arg, ty)) in args.iter().zip(&signature.params).enumerate() {
            let value = to_native_value(arg, ty, &self.session, ctx).map_err(|err| {
                BridgeError::argument_mismatch(&signature.name, format!("argument {index}: {err}"))
            })?;
            native_args.push(value);
        }

        tracing::trace!(
            contract = self.native.contract().name(),
            method = %signature.name,
            "Calling native method"
        );
        let object = Arc::clone(self.native.object());
        let returned = lend_context(self.session.id, ctx, || object.call(&signature.name, native_args))?;

        if signature.returns == ValueType::Void {
            return Ok(JsValue::undefined());
        }
        hand_over(returned, &signature.returns, &self.session, ctx).map_err(|err| {
            in_context(err, format!("return value of '{}'", signature.name))
        })
    }
}

/// The engine exception thrown for a failed native call.
fn throwable(err: &BridgeError) -> JsError {
    let error = match err {
        BridgeError::ArgumentMismatch { .. } | BridgeError::TypeConversion(_) => JsNativeError::typ(),
        _ => JsNativeError::error(),
    };
    error.with_message(err.to_string()).into()
}

/// Returns a pending promise and queues an async job that settles it with
/// the deferred outcome, marshalled with `expected`.
fn deferred_to_engine(
    deferred: &Deferred,
    expected: &ValueType,
    session: &Arc<SessionShared>,
    ctx: &mut Context,
) -> Result<JsValue> {
    let future = deferred.take()?;
    let (promise, resolvers) = JsPromise::new_pending(ctx);
    let expected = expected.clone();
    let session = Arc::clone(session);

    let job = NativeAsyncJob::new(async move |context| {
        let outcome = future.await;
        let mut guard = context.borrow_mut();
        let ctx: &mut Context = &mut guard;
        let settled = outcome.and_then(|value| hand_over(value, &expected, &session, ctx));
        match settled {
            Ok(value) => resolvers.resolve.call(&JsValue::undefined(), &[value], ctx),
            Err(err) => {
                tracing::debug!(session = session.id, "Deferred value rejected: {err}");
                let reason = throwable(&err).to_opaque(ctx);
                resolvers.reject.call(&JsValue::undefined(), &[reason], ctx)
            }
        }
    });
    ctx.enqueue_job(Job::AsyncJob(job));
    Ok(promise.into())
}

/// Resolves a settled promise to its value; rejections become script errors.
///
/// The job queue is drained first so promises that settle through reactions
/// already queued are observed as settled.
pub(crate) fn settle(value: JsValue, ctx: &mut Context) -> Result<JsValue> {
    let Some(object) = as_object(&value) else {
        return Ok(value);
    };
    let Ok(promise) = JsPromise::from_object(object) else {
        return Ok(value);
    };

    if let Err(err) = ctx.run_jobs() {
        return Err(BridgeError::Script(script_error(err, None, ctx)));
    }

    match promise.state() {
        PromiseState::Fulfilled(result) => Ok(result),
        PromiseState::Rejected(reason) => Err(BridgeError::Script(script_error(
            JsError::from_opaque(reason),
            None,
            ctx,
        ))),
        PromiseState::Pending => Ok(value),
    }
}

/// Captures an engine exception.
///
/// Syntax errors carry their position in the message; it becomes the line and
/// column of the location.
pub(crate) fn script_error(err: JsError, file: Option<&Path>, ctx: &mut Context) -> ScriptError {
    let position = err
        .as_native()
        .and_then(|native| error_position(&native.to_string()));
    let location = match (file, position) {
        (None, None) => None,
        (file, position) => Some(SourceLocation {
            file: file.map(|path| path.display().to_string()),
            line: position.map(|(line, _)| line),
            column: position.map(|(_, column)| column),
        }),
    };

    let Some(thrown) = err.as_opaque().cloned() else {
        // Engine-raised errors (syntax errors, runtime limits) stay native.
        return ScriptError {
            message: err.to_string(),
            location,
            stack: None,
            thrown: Some(serde_json::Value::String(err.to_string())),
        };
    };

    let (message, stack) = describe_thrown(&thrown, ctx);
    ScriptError {
        message,
        location,
        stack,
        thrown: js_value_to_json(&thrown, ctx).ok(),
    }
}

/// Error for a failed call through a native-to-JS proxy.
pub(crate) fn native_call_error(target: &str, err: JsError, ctx: &mut Context) -> BridgeError {
    let error = script_error(err, None, ctx);
    BridgeError::NativeCall {
        target: target.to_string(),
        message: error.message,
        stack: error.stack,
    }
}

fn describe_thrown(thrown: &JsValue, ctx: &mut Context) -> (String, Option<String>) {
    let Some(object) = as_object(thrown) else {
        let message = thrown
            .to_string(ctx)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| thrown.display().to_string());
        return (message, None);
    };

    let stack = object
        .get(js_string!("stack"), ctx)
        .ok()
        .and_then(|stack| stack.as_string().map(|s| s.to_std_string_escaped()));

    let is_error_like = object.has_property(js_string!("message"), ctx).unwrap_or(false);
    let message = if is_error_like {
        thrown.to_string(ctx).map(|s| s.to_std_string_escaped()).ok()
    } else {
        js_value_to_json(thrown, ctx).ok().map(|json| json.to_string())
    };

    (message.unwrap_or_else(|| thrown.display().to_string()), stack)
}

/// Parses the trailing `at line L, col C` the parser appends to its errors.
fn error_position(message: &str) -> Option<(u32, u32)> {
    let (_, tail) = message.rsplit_once("at line ")?;
    let (line, column) = tail.split_once(", col ")?;
    let column: String = column.chars().take_while(char::is_ascii_digit).collect();
    Some((line.trim().parse().ok()?, column.parse().ok()?))
}

fn as_object(value: &JsValue) -> Option<JsObject> {
    value.as_object().map(|object| object.clone())
}

fn element_type(expected: &ValueType) -> &ValueType {
    match expected {
        ValueType::Array(element) => element,
        ValueType::Optional(inner) => element_type(inner),
        _ => &ValueType::Any,
    }
}

fn mismatch(value: &JsValue, expected: &ValueType) -> BridgeError {
    let found = if value.is_null() {
        "null"
    } else if value.is_callable() {
        "function"
    } else if value.as_object().is_some_and(|o| o.is_array()) {
        "array"
    } else {
        value.type_of()
    };
    BridgeError::TypeConversion(format!("expected {expected}, found {found}"))
}

fn in_context(err: BridgeError, context: String) -> BridgeError {
    match err {
        BridgeError::TypeConversion(message) => {
            BridgeError::TypeConversion(format!("{context}: {message}"))
        }
        other => other,
    }
}
