use crate::dispatcher::{self, PendingResult, Work};
use crate::session::BridgeSession;
use crate::value::{JsRef, Value};
use jsbridge_common::{BridgeError, InterfaceContract, Result};
use std::fmt;
use std::sync::Arc;

/// Native-side proxy over an engine object.
///
/// Every call is checked against the contract before it is queued: unknown
/// methods, wrong arity and arguments that do not conform to the declared
/// parameter types fail with [`BridgeError::ArgumentMismatch`] without
/// touching the engine. Failures inside the engine (missing member, thrown
/// exception) come back as [`BridgeError::NativeCall`].
#[derive(Debug, Clone)]
pub struct JsObjectProxy {
    target: JsRef,
    contract: Arc<InterfaceContract>,
}

/// Creates a native-to-JS proxy over `value`.
///
/// # Errors
///
/// Fails if the handle is no longer valid or belongs to another session.
pub fn create_from_js_value(
    session: &BridgeSession,
    value: &JsRef,
    contract: InterfaceContract,
) -> Result<JsObjectProxy> {
    if !Arc::ptr_eq(value.session(), session.shared()) {
        return Err(BridgeError::TypeConversion(format!(
            "handle {} belongs to a different session",
            value.id()
        )));
    }
    value.ensure_valid()?;

    tracing::debug!(
        session = session.id(),
        handle = value.id(),
        contract = contract.name(),
        "Created proxy over engine value"
    );
    Ok(JsObjectProxy {
        target: value.clone(),
        contract: Arc::new(contract),
    })
}

impl JsObjectProxy {
    /// Handle of the engine object calls are made on.
    pub fn target(&self) -> &JsRef {
        &self.target
    }

    pub fn contract(&self) -> &InterfaceContract {
        &self.contract
    }

    /// Calls `method` and blocks until the engine returns.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let work = self.prepare(method, args)?;
        self.target.session().run_blocking("proxy_call", work)
    }

    /// Queues a call to `method` and returns immediately.
    pub fn call_async(&self, method: &str, args: Vec<Value>) -> PendingResult {
        match self.prepare(method, args) {
            Ok(work) => self.target.session().run_async("proxy_call", work),
            Err(err) => PendingResult::failed(err),
        }
    }

    /// Checks up front that every contract method resolves to something
    /// callable on the target.
    pub fn verify(&self) -> Result<()> {
        self.target.ensure_valid()?;
        let methods = self.contract.methods().iter().map(|m| m.name.clone()).collect();
        self.target
            .session()
            .run_blocking("proxy_verify", dispatcher::verify_work(self.target.clone(), methods))
            .map(|_| ())
    }

    fn prepare(&self, method: &str, args: Vec<Value>) -> Result<Work> {
        let signature = self.contract.require(method)?;
        signature.check_arity(args.len())?;

        for (index, (arg, ty)) in args.iter().zip(&signature.params).enumerate() {
            if !arg.conforms_to(ty) {
                return Err(BridgeError::argument_mismatch(
                    method,
                    format!("argument {index} must be {ty}, got {} {arg}", arg.type_name()),
                ));
            }
        }

        self.target.ensure_valid()?;
        Ok(dispatcher::invoke_work(
            self.target.clone(),
            Some(method.to_string()),
            args,
            signature.params.clone(),
            signature.returns.clone(),
        ))
    }
}

impl fmt::Display for JsObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)
    }
}
