//! JSON rendering of engine values.
//!
//! Used for the JSON form of thrown values and for the console's JSON mode.
//!
//! | JavaScript | JSON |
//! |------------|------|
//! | undefined, null, symbol, function | null |
//! | Boolean | boolean |
//! | Number | number (non-finite numbers fail) |
//! | String | string |
//! | Array | array |
//! | Object | object (symbol keys skipped) |
//!
//! Nesting deeper than [`MAX_DEPTH`] fails, which also stops cyclic objects.

use boa_engine::{
    Context, JsValue,
    object::builtins::JsArray,
    property::PropertyKey,
};
use jsbridge_common::{BridgeError, Result};
use serde_json::Value as JsonValue;

pub(crate) const MAX_DEPTH: usize = 64;

pub(crate) fn js_value_to_json(value: &JsValue, ctx: &mut Context) -> Result<JsonValue> {
    to_json(value, ctx, 0)
}

fn to_json(value: &JsValue, ctx: &mut Context, depth: usize) -> Result<JsonValue> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::TypeConversion(format!(
            "value nests deeper than {MAX_DEPTH} levels"
        )));
    }

    if value.is_undefined() || value.is_null() || value.is_symbol() {
        return Ok(JsonValue::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(JsonValue::Bool(b));
    }

    if let Some(i) = value.as_i32() {
        return Ok(JsonValue::Number(i.into()));
    }

    if let Some(n) = value.as_number() {
        return serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .ok_or_else(|| BridgeError::TypeConversion(format!("{n} has no JSON representation")));
    }

    if let Some(s) = value.as_string() {
        return Ok(JsonValue::String(s.to_std_string_escaped()));
    }

    let Some(obj) = value.as_object() else {
        return Err(BridgeError::TypeConversion(format!(
            "{} has no JSON representation",
            value.type_of()
        )));
    };
    let obj = obj.clone();

    if obj.is_callable() {
        return Ok(JsonValue::Null);
    }

    if obj.is_array() {
        let array = JsArray::from_object(obj)
            .map_err(|e| BridgeError::TypeConversion(format!("object is not a valid array: {e}")))?;
        let length = array
            .length(ctx)
            .map_err(|e| BridgeError::TypeConversion(format!("failed to get array length: {e}")))?;

        let mut result = Vec::new();
        for i in 0..length {
            let element = array.get(i, ctx).map_err(|e| {
                BridgeError::TypeConversion(format!("failed to get array element {i}: {e}"))
            })?;
            result.push(to_json(&element, ctx, depth + 1)?);
        }
        return Ok(JsonValue::Array(result));
    }

    let keys = obj
        .own_property_keys(ctx)
        .map_err(|e| BridgeError::TypeConversion(format!("failed to get object keys: {e}")))?;

    let mut result = serde_json::Map::new();
    for key in keys {
        let name = match &key {
            PropertyKey::String(s) => s.to_std_string_escaped(),
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };

        let property = obj.get(key.clone(), ctx).map_err(|e| {
            BridgeError::TypeConversion(format!("failed to get property '{name}': {e}"))
        })?;
        result.insert(name, to_json(&property, ctx, depth + 1)?);
    }

    Ok(JsonValue::Object(result))
}
