//! jsbridge runtime
//!
//! A bidirectional bridge between Rust and an embedded Boa JavaScript engine:
//!
//! - native code evaluates scripts and calls engine functions, blocking or not;
//! - engine code calls native objects through proxies generated from an
//!   [`InterfaceContract`];
//! - values cross the boundary through well-defined conversion rules.
//!
//! The engine lives on a dedicated worker thread owned by a [`BridgeSession`];
//! all work reaches it through one FIFO queue.
//!
//! # Example
//!
//! ```no_run
//! use jsbridge_runtime::{BridgeConfig, BridgeSession, InterfaceContract, Value, ValueType};
//!
//! let session = BridgeSession::open(BridgeConfig::default())?;
//!
//! let calculator = session.create_value("({ calcSum: (a, b) => a + b })")?;
//! let contract = InterfaceContract::builder("Calculator")
//!     .method("calcSum", vec![ValueType::I32, ValueType::I32], ValueType::I32)
//!     .build()?;
//! let proxy = session.create_from_js_value(&calculator, contract)?;
//! assert_eq!(proxy.call("calcSum", vec![6.into(), 4.into()])?, Value::Int(10));
//! # Ok::<(), jsbridge_common::BridgeError>(())
//! ```

pub mod config;
pub mod dispatcher;
pub mod proxy;
pub mod session;
pub mod value;

mod engine;
mod registry;


pub use config::{
    BridgeConfig, ConsoleConfig, ConsoleLevel, ConsoleMode, ConsoleSink, EngineLimits,
    UnhandledErrorHandler,
};
pub use dispatcher::PendingResult;
pub use jsbridge_common::{
    BridgeError, InterfaceContract, MethodSignature, Result, ScriptError, SourceLocation, ValueType,
};
pub use proxy::{
    JsObjectProxy, NativeObjectProxy, create_from_js_value, create_from_native_fn,
    create_from_native_object,
};
pub use session::{BridgeSession, SessionState};
pub use value::{Deferred, DeferredSender, JsRef, NativeObject, NativeRef, RefKind, Value};
