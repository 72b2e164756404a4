//! Rendering of bridge values and console output for the terminal.

use anyhow::{Context, Result, anyhow};
use jsbridge_runtime::{BridgeSession, ConsoleLevel, ConsoleMode, EngineLimits, Value, ValueType};
use serde_json::Value as JsonValue;
use std::path::Path;

/// Parses the `--console` option.
pub fn parse_console_mode(value: &str) -> std::result::Result<ConsoleMode, String> {
    match value {
        "string" => Ok(ConsoleMode::AsString),
        "json" => Ok(ConsoleMode::AsJson),
        "empty" | "none" => Ok(ConsoleMode::Empty),
        other => Err(format!(
            "unknown console mode '{other}' (expected string, json or empty)"
        )),
    }
}

/// Console sink for the binary: warnings and errors go to stderr.
pub fn print_console(level: ConsoleLevel, message: &str) {
    match level {
        ConsoleLevel::Warn | ConsoleLevel::Error => eprintln!("{message}"),
        ConsoleLevel::Log | ConsoleLevel::Debug | ConsoleLevel::Info => println!("{message}"),
    }
}

/// Reads engine limits from a JSON file.
pub fn load_limits(path: &Path) -> Result<EngineLimits> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read limits file {}", path.display()))?;
    let limits: EngineLimits = serde_json::from_str(&text)
        .with_context(|| format!("invalid JSON in limits file {}", path.display()))?;
    limits
        .validate()
        .map_err(|e| anyhow!("invalid limits in {}: {e}", path.display()))?;
    Ok(limits)
}

/// Converts a result to JSON for printing.
///
/// Object handles are serialized inside the engine with `JSON.stringify`,
/// so the output shows their contents instead of the handle name.
pub fn to_output_json(session: &BridgeSession, value: &Value) -> Result<JsonValue> {
    match value {
        Value::Object(handle) => {
            let text = session.evaluate(
                &format!("JSON.stringify({handle})"),
                ValueType::optional(ValueType::Str),
            )?;
            match text.as_str() {
                Some(text) => Ok(serde_json::from_str(text)?),
                None => Ok(JsonValue::Null),
            }
        }
        Value::Function(_) => Ok(JsonValue::String("[function]".to_string())),
        Value::Array(items) => items
            .iter()
            .map(|item| to_output_json(session, item))
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array),
        other => Ok(other.to_json()),
    }
}

/// Formats a result for stdout. `Void` results print nothing.
pub fn render_result(
    session: &BridgeSession,
    value: &Value,
    expected: &ValueType,
    pretty: bool,
) -> Result<Option<String>> {
    if *expected == ValueType::Void {
        return Ok(None);
    }
    let json = to_output_json(session, value)?;
    let text = if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        json.to_string()
    };
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsbridge_runtime::BridgeConfig;
    use serde_json::json;
    use std::fs;
    use tempfile::NamedTempFile;

    fn session() -> BridgeSession {
        BridgeSession::open(BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_console_mode() {
        assert_eq!(parse_console_mode("string").unwrap(), ConsoleMode::AsString);
        assert_eq!(parse_console_mode("json").unwrap(), ConsoleMode::AsJson);
        assert_eq!(parse_console_mode("none").unwrap(), ConsoleMode::Empty);
        assert!(parse_console_mode("xml").unwrap_err().contains("xml"));
    }

    #[test]
    fn test_render_primitives() {
        let session = session();
        let rendered = render_result(&session, &Value::Double(3.5), &ValueType::Any, false).unwrap();
        assert_eq!(rendered.as_deref(), Some("3.5"));

        let rendered = render_result(&session, &Value::from("hi"), &ValueType::Str, false).unwrap();
        assert_eq!(rendered.as_deref(), Some("\"hi\""));
    }

    #[test]
    fn test_render_void_prints_nothing() {
        let session = session();
        let rendered = render_result(&session, &Value::Null, &ValueType::Void, false).unwrap();
        assert!(rendered.is_none());
    }

    #[test]
    fn test_objects_render_contents() {
        let session = session();
        let value = session
            .evaluate("[{ a: 1, b: [true, null] }, x => x]", ValueType::Any)
            .unwrap();
        let json = to_output_json(&session, &value).unwrap();
        assert_eq!(json, json!([{ "a": 1, "b": [true, null] }, "[function]"]));
    }

    #[test]
    fn test_load_limits() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{"recursion_limit": 50}"#).unwrap();
        let limits = load_limits(file.path()).unwrap();
        assert_eq!(limits.recursion_limit, 50);

        fs::write(file.path(), r#"{"recursion_limit": 0}"#).unwrap();
        assert!(load_limits(file.path()).is_err());

        fs::write(file.path(), "not json").unwrap();
        assert!(load_limits(file.path()).is_err());
    }
}
