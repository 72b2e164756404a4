//! Native-side values.
//!
//! [`Value`] is what crosses the boundary. Primitives are copied; engine
//! objects and functions are never deep-copied but referenced through a
//! [`JsRef`], and native objects exposed to the engine travel as a
//! [`NativeRef`]. A [`Deferred`] lets a native method answer later; the engine
//! sees it as a `Promise`.

use crate::dispatcher::{self, PendingResult};
use crate::registry::global_name;
use crate::session::SessionShared;
use jsbridge_common::{BridgeError, InterfaceContract, Result, ValueType};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// A value marshalled out of (or into) the engine.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// `null` or `undefined`
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
    Object(JsRef),
    Function(JsRef),
    Native(NativeRef),
    /// A result still being computed; becomes a `Promise` in the engine
    Deferred(Deferred),
}

impl Value {
    /// Short name of the variant, as used in conversion errors.
    ///
    /// # Example
    ///
    /// ```
    /// use jsbridge_runtime::Value;
    ///
    /// assert_eq!(Value::Int(1).type_name(), "integer");
    /// assert_eq!(Value::from("a").type_name(), "string");
    /// ```
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Native(_) => "native object",
            Value::Deferred(_) => "deferred",
        }
    }

    /// True for [`Value::Null`], which also stands for `undefined`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is a [`Value::Int`]. Doubles are not truncated;
    /// use [`as_f64`](Self::as_f64) for a numeric view of either.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to doubles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Borrows the string of a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the elements of a [`Value::Array`].
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The engine handle behind a [`Value::Object`] or [`Value::Function`].
    pub fn as_js_ref(&self) -> Option<&JsRef> {
        match self {
            Value::Object(handle) | Value::Function(handle) => Some(handle),
            _ => None,
        }
    }

    /// The native object behind a [`Value::Native`].
    pub fn as_native(&self) -> Option<&NativeRef> {
        match self {
            Value::Native(native) => Some(native),
            _ => None,
        }
    }

    /// Whether this value can be passed where `ty` is declared.
    ///
    /// A [`Value::Deferred`] conforms to everything but `Void`; its eventual
    /// result is checked when it arrives.
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (ty, self) {
            (ValueType::Any, _) => true,
            (ValueType::Void, Value::Deferred(_)) => false,
            (_, Value::Deferred(_)) => true,
            (ValueType::Optional(inner), value) => value.is_null() || value.conforms_to(inner),
            (ty, Value::Null) => ty.accepts_null(),
            (ValueType::Void, _) => false,
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::I32, Value::Int(i)) => i32::try_from(*i).is_ok(),
            (ValueType::I64, Value::Int(_)) => true,
            (ValueType::F64, Value::Int(_) | Value::Double(_)) => true,
            (ValueType::Str, Value::Str(_)) => true,
            (ValueType::Array(element), Value::Array(items)) => {
                items.iter().all(|item| item.conforms_to(element))
            }
            (ValueType::Object, Value::Object(_) | Value::Function(_) | Value::Native(_)) => true,
            (ValueType::Function, Value::Function(_)) => true,
            (ValueType::Native, Value::Native(_)) => true,
            _ => false,
        }
    }

    /// Like [`conforms_to`](Self::conforms_to), failing with a conversion error.
    pub fn check(&self, ty: &ValueType) -> Result<()> {
        if self.conforms_to(ty) {
            Ok(())
        } else {
            Err(BridgeError::TypeConversion(format!(
                "cannot convert {} {} to {ty}",
                self.type_name(),
                self
            )))
        }
    }

    /// JSON view of the value. References render as their engine expression.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(handle) | Value::Function(handle) => {
                serde_json::Value::String(handle.to_string())
            }
            Value::Native(native) => {
                serde_json::Value::String(format!("[native {}]", native.contract().name()))
            }
            Value::Deferred(_) => serde_json::Value::String("[deferred]".into()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) | (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Deferred(a), Value::Deferred(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Object(handle) | Value::Function(handle) => write!(f, "{handle}"),
            Value::Deferred(_) => f.write_str("[deferred]"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<Deferred> for Value {
    fn from(deferred: Deferred) -> Self {
        Value::Deferred(deferred)
    }
}

impl From<JsRef> for Value {
    fn from(handle: JsRef) -> Self {
        match handle.kind() {
            RefKind::Function => Value::Function(handle),
            _ => Value::Object(handle),
        }
    }
}

/// What a [`JsRef`] points at in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Object,
    Function,
    /// The engine-side proxy of a native object
    Native,
}

struct RefInner {
    id: u64,
    kind: RefKind,
    session: Arc<SessionShared>,
}

impl Drop for RefInner {
    fn drop(&mut self) {
        if self.session.is_running() && self.session.registry.remove(self.id) {
            dispatcher::release_global(&self.session, self.id);
        }
    }
}

/// Handle to a value living in the engine.
///
/// Clones share the handle; the engine value stays reachable until the last
/// clone is dropped, [`release`](Self::release) is called, or the session is
/// released. Using a released handle fails with
/// [`BridgeError::InvalidHandle`] or [`BridgeError::SessionClosed`].
///
/// The `Display` form evaluates, inside the engine, to the wrapped value, so a
/// handle can be spliced into source text:
///
/// ```ignore
/// let sum = session.evaluate(&format!("{callback}(2, 3)"), ValueType::I32)?;
/// ```
#[derive(Clone)]
pub struct JsRef {
    inner: Arc<RefInner>,
}

impl JsRef {
    pub(crate) fn new(id: u64, kind: RefKind, session: Arc<SessionShared>) -> Self {
        Self {
            inner: Arc::new(RefInner { id, kind, session }),
        }
    }

    /// Registry id of the handle, unique within its session.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// What the handle points at.
    pub fn kind(&self) -> RefKind {
        self.inner.kind
    }

    pub(crate) fn session(&self) -> &Arc<SessionShared> {
        &self.inner.session
    }

    /// Name of the engine global holding the value.
    pub fn global_name(&self) -> String {
        global_name(self.inner.id)
    }

    /// Whether the handle can still be used.
    ///
    /// # Returns
    ///
    /// False once the handle was released, or its session was.
    pub fn is_valid(&self) -> bool {
        self.ensure_valid().is_ok()
    }

    pub(crate) fn ensure_valid(&self) -> Result<()> {
        self.inner.session.ensure_running()?;
        if !self.inner.session.registry.contains(self.inner.id) {
            return Err(BridgeError::InvalidHandle(self.inner.id));
        }
        Ok(())
    }

    /// Calls the referenced function with `this` set to the function itself.
    pub fn call(&self, args: Vec<Value>, expected: ValueType) -> Result<Value> {
        self.ensure_valid()?;
        let work = dispatcher::invoke_work(self.clone(), None, args, Vec::new(), expected);
        self.session().run_blocking("call", work)
    }

    /// Calls `method` on the referenced object.
    pub fn call_method(&self, method: &str, args: Vec<Value>, expected: ValueType) -> Result<Value> {
        self.ensure_valid()?;
        let work = dispatcher::invoke_work(
            self.clone(),
            Some(method.to_string()),
            args,
            Vec::new(),
            expected,
        );
        self.session().run_blocking("call_method", work)
    }

    /// Non-blocking variant of [`call_method`](Self::call_method).
    pub fn call_method_async(&self, method: &str, args: Vec<Value>, expected: ValueType) -> PendingResult {
        if let Err(err) = self.ensure_valid() {
            return PendingResult::failed(err);
        }
        let work = dispatcher::invoke_work(
            self.clone(),
            Some(method.to_string()),
            args,
            Vec::new(),
            expected,
        );
        self.session().run_async("call_method", work)
    }

    /// Converts the referenced value itself, e.g. an array handle to
    /// [`Value::Array`]. Objects and functions come back as new handles.
    pub fn evaluate(&self, expected: ValueType) -> Result<Value> {
        self.ensure_valid()?;
        let work = dispatcher::read_work(self.clone(), expected);
        self.session().run_blocking("read", work)
    }

    /// Reads a property of the referenced object.
    pub fn get(&self, property: &str, expected: ValueType) -> Result<Value> {
        self.ensure_valid()?;
        let work = dispatcher::get_property_work(self.clone(), property.to_string(), expected);
        self.session().run_blocking("get", work)
    }

    /// Also exposes the value under a user-chosen global name.
    pub fn assign_to_global(&self, name: &str) -> Result<()> {
        self.ensure_valid()?;
        let work = dispatcher::assign_global_work(self.clone(), name.to_string());
        self.session().run_blocking("assign_to_global", work).map(|_| ())
    }

    /// Releases the engine value now instead of when the last clone drops.
    pub fn release(&self) -> Result<()> {
        self.inner.session.ensure_running()?;
        if !self.inner.session.registry.remove(self.inner.id) {
            return Err(BridgeError::InvalidHandle(self.inner.id));
        }
        dispatcher::release_global(&self.inner.session, self.inner.id);
        Ok(())
    }
}

impl PartialEq for JsRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id && Arc::ptr_eq(&self.inner.session, &other.inner.session)
    }
}

impl fmt::Display for JsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "globalThis[\"{}\"]", self.global_name())
    }
}

impl fmt::Debug for JsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsRef")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("session", &self.inner.session.id)
            .finish()
    }
}

/// A native object callable from the engine.
///
/// Implementations run on the engine worker thread. They may call back into
/// the same session (evaluate, proxy calls); those calls execute inline.
///
/// Closures taking `(method, args)` implement the trait directly.
pub trait NativeObject: Send + Sync + 'static {
    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value>;
}

impl<F> NativeObject for F
where
    F: Fn(&str, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
{
    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self(method, args)
    }
}

/// A native object paired with the contract it is exposed through.
///
/// Passing a `NativeRef` into a session creates an engine-side proxy for it
/// there, once. The proxy lives as long as some clone of this `NativeRef`
/// does (or, for proxies made by
/// [`create_from_native_object`](crate::create_from_native_object), as long
/// as the [`NativeObjectProxy`](crate::NativeObjectProxy)). Calls through a
/// proxy that outlived its owner fail with [`BridgeError::InvalidHandle`].
#[derive(Clone)]
pub struct NativeRef {
    object: Arc<dyn NativeObject>,
    contract: Arc<InterfaceContract>,
    /// Session id and registry id of the proxy this reference came from
    handle: Option<(u64, u64)>,
    bindings: Arc<Mutex<Vec<JsRef>>>,
}

impl NativeRef {
    /// Pairs `object` with `contract`. No proxy exists until the reference is
    /// first passed into a session.
    pub fn new(object: Arc<dyn NativeObject>, contract: InterfaceContract) -> Self {
        Self {
            object,
            contract: Arc::new(contract),
            handle: None,
            bindings: Arc::default(),
        }
    }

    /// The wrapped object.
    pub fn object(&self) -> &Arc<dyn NativeObject> {
        &self.object
    }

    /// The contract the object is exposed through.
    pub fn contract(&self) -> &InterfaceContract {
        &self.contract
    }

    /// Registry id of the engine-side proxy this reference came from, if any.
    pub fn handle(&self) -> Option<u64> {
        self.handle.map(|(_, id)| id)
    }

    /// Registry id of the proxy in session `session`, if this reference came
    /// from there.
    pub(crate) fn handle_in(&self, session: u64) -> Option<u64> {
        self.handle
            .filter(|(owner, _)| *owner == session)
            .map(|(_, id)| id)
    }

    pub(crate) fn with_handle(mut self, session: u64, id: u64) -> Self {
        self.handle = Some((session, id));
        self
    }

    /// Same object and contract, without any proxy ownership. The registry
    /// stores these so entries never own themselves.
    pub(crate) fn detached(&self) -> Self {
        Self {
            object: Arc::clone(&self.object),
            contract: Arc::clone(&self.contract),
            handle: None,
            bindings: Arc::default(),
        }
    }

    /// Handles of the proxies this reference owns, at most one per session.
    pub(crate) fn bindings(&self) -> MutexGuard<'_, Vec<JsRef>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when no other clone shares this reference's proxies.
    pub(crate) fn is_sole_owner(&self) -> bool {
        Arc::strong_count(&self.bindings) == 1
    }
}

impl PartialEq for NativeRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.object), Arc::as_ptr(&other.object))
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRef")
            .field("contract", &self.contract.name())
            .field("handle", &self.handle())
            .finish()
    }
}

type BoxedResult = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// A native result that is not ready yet.
///
/// Returned from a native method (or passed as an argument), it reaches the
/// engine as a pending `Promise` that settles with the future's outcome. The
/// future is polled on the engine thread while the job queue drains, and the
/// worker waits for it there. It must not wait on work queued to the same
/// session or on tokio timers; complete it from another thread through
/// [`Deferred::channel`] instead.
///
/// A `Deferred` converts into a promise once; clones share the same future.
///
/// # Example
///
/// ```no_run
/// use jsbridge_runtime::{Deferred, Value};
///
/// let (deferred, sender) = Deferred::channel();
/// std::thread::spawn(move || sender.resolve(Value::Int(42)));
/// let returned = Value::Deferred(deferred);
/// # let _ = returned;
/// ```
#[derive(Clone)]
pub struct Deferred {
    future: Arc<Mutex<Option<BoxedResult>>>,
}

impl Deferred {
    /// Wraps a future producing the eventual value.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            future: Arc::new(Mutex::new(Some(Box::pin(future)))),
        }
    }

    /// A deferred completed through the returned sender, from any thread.
    ///
    /// Dropping the sender without completing rejects the promise.
    pub fn channel() -> (Self, DeferredSender) {
        let (tx, rx) = oneshot::channel();
        let deferred = Self::new(async move {
            rx.await.unwrap_or_else(|_| {
                Err(BridgeError::Internal("deferred value dropped before completion".into()))
            })
        });
        (deferred, DeferredSender { tx })
    }

    /// Takes the future out; fails if a promise was already made from it.
    pub(crate) fn take(&self) -> Result<BoxedResult> {
        self.future
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| BridgeError::TypeConversion("deferred value was already consumed".into()))
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.future, &other.future)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .future
            .lock()
            .map(|future| future.is_some())
            .unwrap_or(false);
        f.debug_struct("Deferred").field("pending", &pending).finish()
    }
}

/// Completes a [`Deferred`] made by [`Deferred::channel`].
#[derive(Debug)]
pub struct DeferredSender {
    tx: oneshot::Sender<Result<Value>>,
}

impl DeferredSender {
    /// Fulfils the promise with `value`.
    pub fn resolve(self, value: Value) {
        self.complete(Ok(value));
    }

    /// Rejects the promise with an `Error` carrying `err`'s message.
    pub fn reject(self, err: BridgeError) {
        self.complete(Err(err));
    }

    pub fn complete(self, result: Result<Value>) {
        if self.tx.send(result).is_err() {
            tracing::debug!("Deferred value completed after its promise was dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conforms_to_primitives() {
        assert!(Value::Int(5).conforms_to(&ValueType::I32));
        assert!(Value::Int(5).conforms_to(&ValueType::F64));
        assert!(!Value::Int(i64::MAX).conforms_to(&ValueType::I32));
        assert!(Value::Int(i64::MAX).conforms_to(&ValueType::I64));
        assert!(!Value::Double(1.5).conforms_to(&ValueType::I32));
        assert!(!Value::from("1").conforms_to(&ValueType::I32));
        assert!(Value::Bool(true).conforms_to(&ValueType::Bool));
    }

    #[test]
    fn test_conforms_to_null() {
        assert!(!Value::Null.conforms_to(&ValueType::I32));
        assert!(!Value::Null.conforms_to(&ValueType::Str));
        assert!(Value::Null.conforms_to(&ValueType::optional(ValueType::I32)));
        assert!(Value::Null.conforms_to(&ValueType::Object));
        assert!(Value::Null.conforms_to(&ValueType::Void));
        assert!(!Value::Int(1).conforms_to(&ValueType::Void));
    }

    #[test]
    fn test_conforms_to_arrays() {
        let ints = Value::from(vec![1, 2, 3]);
        assert!(ints.conforms_to(&ValueType::array(ValueType::I32)));
        assert!(!ints.conforms_to(&ValueType::array(ValueType::Str)));

        let mixed = Value::Array(vec![Value::Int(1), Value::from("two")]);
        assert!(mixed.conforms_to(&ValueType::array(ValueType::Any)));
        assert!(!mixed.conforms_to(&ValueType::array(ValueType::I32)));
    }

    #[test]
    fn test_check_reports_types() {
        let err = Value::Double(1.5).check(&ValueType::I32).unwrap_err();
        assert!(matches!(err, BridgeError::TypeConversion(_)));
        assert!(err.to_string().contains("double 1.5"));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Double(3.5).as_i64(), None);
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_display_and_json() {
        assert_eq!(Value::from("plain").to_string(), "plain");
        assert_eq!(Value::Double(3.5).to_string(), "3.5");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::from("a"), Value::Null]).to_string(),
            r#"[1,"a",null]"#
        );
    }

    #[test]
    fn test_closure_native_object() {
        let echo = |method: &str, args: Vec<Value>| -> Result<Value> {
            Ok(Value::Array(
                std::iter::once(Value::from(method)).chain(args).collect(),
            ))
        };
        let result = NativeObject::call(&echo, "ping", vec![Value::Int(1)]).unwrap();
        assert_eq!(result, Value::Array(vec![Value::from("ping"), Value::Int(1)]));
    }

    #[test]
    fn test_native_ref_equality_is_identity() {
        let contract = InterfaceContract::builder("Echo").build().unwrap();
        let object: Arc<dyn NativeObject> =
            Arc::new(|_: &str, _: Vec<Value>| -> Result<Value> { Ok(Value::Null) });
        let a = NativeRef::new(Arc::clone(&object), contract.clone());
        let b = a.clone().with_handle(1, 7);
        let other: Arc<dyn NativeObject> =
            Arc::new(|_: &str, _: Vec<Value>| -> Result<Value> { Ok(Value::Null) });
        let c = NativeRef::new(other, contract);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(b.handle(), Some(7));
        assert_eq!(b.handle_in(1), Some(7));
        assert_eq!(b.handle_in(2), None);
    }

    #[test]
    fn test_detached_native_ref_shares_nothing() {
        let contract = InterfaceContract::builder("Echo").build().unwrap();
        let object: Arc<dyn NativeObject> =
            Arc::new(|_: &str, _: Vec<Value>| -> Result<Value> { Ok(Value::Null) });
        let owner = NativeRef::new(object, contract).with_handle(1, 3);
        let copy = owner.clone();
        assert!(!owner.is_sole_owner());
        drop(copy);
        assert!(owner.is_sole_owner());

        let detached = owner.detached();
        assert_eq!(detached, owner);
        assert_eq!(detached.handle(), None);
        assert!(detached.is_sole_owner());
    }

    #[test]
    fn test_deferred_conforms_to_non_void() {
        let deferred = Value::Deferred(Deferred::new(async { Ok(Value::Int(1)) }));
        assert!(deferred.conforms_to(&ValueType::I32));
        assert!(deferred.conforms_to(&ValueType::Str));
        assert!(!deferred.conforms_to(&ValueType::Void));
        assert_eq!(deferred.type_name(), "deferred");
        assert_eq!(deferred.to_string(), "[deferred]");
        assert_eq!(deferred, deferred.clone());
    }

    #[test]
    fn test_deferred_is_consumed_once() {
        let deferred = Deferred::new(async { Ok(Value::Null) });
        assert!(deferred.take().is_ok());
        assert!(matches!(deferred.take(), Err(BridgeError::TypeConversion(_))));
    }

    #[test]
    fn test_deferred_channel() {
        let (deferred, sender) = Deferred::channel();
        sender.resolve(Value::from("done"));
        let future = deferred.take().unwrap();
        assert_eq!(futures_lite::future::block_on(future).unwrap(), Value::from("done"));

        let (deferred, sender) = Deferred::channel();
        drop(sender);
        let future = deferred.take().unwrap();
        assert!(matches!(futures_lite::future::block_on(future), Err(BridgeError::Internal(_))));
    }
}
