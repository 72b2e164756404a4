//! Proxy generators for both directions of the bridge.
//!
//! - [`JsObjectProxy`]: native code calling an engine object through a contract
//! - [`NativeObjectProxy`]: engine code calling a native object through a contract

mod js_object;
mod native_object;

pub use js_object::{JsObjectProxy, create_from_js_value};
pub use native_object::{NativeObjectProxy, create_from_native_fn, create_from_native_object};
