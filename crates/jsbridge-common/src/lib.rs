//! jsbridge common types
//!
//! Engine-independent pieces shared by the runtime and the command line tool:
//!
//! - [`ValueType`] - semantic type tags used to describe parameters and returns
//! - [`InterfaceContract`] / [`MethodSignature`] - declared method sets used to
//!   generate proxies in both directions
//! - [`BridgeError`] - the error taxonomy surfaced by every bridge operation
//!
//! # Example
//!
//! ```
//! use jsbridge_common::{InterfaceContract, ValueType};
//!
//! let contract = InterfaceContract::builder("Calculator")
//!     .method("calcSum", vec![ValueType::I32, ValueType::I32], ValueType::I32)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(contract.method("calcSum").unwrap().params.len(), 2);
//! ```

pub mod contract;
pub mod error;
pub mod types;


pub use contract::{ContractBuilder, InterfaceContract, MethodSignature};
pub use error::{BridgeError, Result, ScriptError, SourceLocation};
pub use types::ValueType;
