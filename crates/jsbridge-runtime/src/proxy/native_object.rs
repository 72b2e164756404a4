use crate::engine::marshal;
use crate::session::BridgeSession;
use crate::value::{JsRef, NativeObject, NativeRef, RefKind, Value};
use jsbridge_common::{InterfaceContract, MethodSignature, Result, ValueType};
use std::fmt;
use std::sync::Arc;

/// Engine-side proxy of a native object.
///
/// The engine object is kept under a global, and the `Display` form of the
/// proxy names it, so it can be spliced into evaluated source:
///
/// ```ignore
/// let calc = session.create_from_native_object(calculator, contract)?;
/// let five = session.evaluate(&format!("{calc}.calcSum(2, 3)"), ValueType::I32)?;
/// ```
///
/// It can also be passed as a [`Value::Native`] argument. Dropping the proxy
/// (or calling [`release`](Self::release)) removes the global; scripts that
/// kept the engine object get an `Error` from any further call.
#[derive(Debug, Clone)]
pub struct NativeObjectProxy {
    handle: JsRef,
    native: NativeRef,
}

/// Exposes `object` to the engine through `contract`.
pub fn create_from_native_object(
    session: &BridgeSession,
    object: Arc<dyn NativeObject>,
    contract: InterfaceContract,
) -> Result<NativeObjectProxy> {
    let shared = session.shared();
    shared.ensure_running()?;

    let native = NativeRef::new(object, contract);
    let id = shared.registry.register(RefKind::Native, Some(native.detached()));
    let native = native.with_handle(shared.id, id);

    let installed = native.clone();
    let result = shared.run_blocking(
        "create_from_native_object",
        Box::new(move |ctx, session| {
            marshal::install_native_proxy(&installed, id, session, ctx)?;
            Ok(Value::Null)
        }),
    );
    if let Err(err) = result {
        shared.registry.remove(id);
        return Err(err);
    }

    Ok(NativeObjectProxy {
        handle: JsRef::new(id, RefKind::Native, Arc::clone(shared)),
        native,
    })
}

/// Exposes a single native function. The engine sees an object with one
/// method, `name`.
pub fn create_from_native_fn<F>(
    session: &BridgeSession,
    name: &str,
    params: Vec<ValueType>,
    returns: ValueType,
    function: F,
) -> Result<NativeObjectProxy>
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
{
    let contract = InterfaceContract::builder(name)
        .signature(MethodSignature::new(name, params, returns))
        .build()?;
    let object = move |_: &str, args: Vec<Value>| function(args);
    create_from_native_object(session, Arc::new(object), contract)
}

impl NativeObjectProxy {
    /// Handle of the engine-side object.
    pub fn handle(&self) -> &JsRef {
        &self.handle
    }

    pub fn contract(&self) -> &InterfaceContract {
        self.native.contract()
    }

    /// The proxy as a value that can be passed into the engine.
    pub fn to_value(&self) -> Value {
        Value::Native(self.native.clone())
    }

    /// Expression calling `method`, for splicing into source text.
    pub fn method_ref(&self, method: &str) -> String {
        format!("{}.{method}", self.handle)
    }

    /// Removes the engine-side object now.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidHandle`](jsbridge_common::BridgeError::InvalidHandle)
    /// if it was already released.
    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}

impl fmt::Display for NativeObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.handle)
    }
}
