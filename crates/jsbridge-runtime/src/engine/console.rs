//! Console API
//!
//! Installs `console.log/debug/info/warn/error`. Output is rendered according
//! to the session's [`ConsoleMode`] and handed to its sink, or to `tracing`
//! under the `jsbridge::console` target when no sink is configured.

use crate::config::{ConsoleConfig, ConsoleLevel, ConsoleMode, ConsoleSink};
use crate::engine::json::js_value_to_json;
use boa_engine::{
    Context, JsObject, JsResult, JsString, JsValue, js_string, native_function::NativeFunction,
    object::FunctionObjectBuilder,
};
use boa_gc::{Finalize, Trace};
use jsbridge_common::{BridgeError, Result};
use std::sync::Arc;

const LEVELS: [ConsoleLevel; 5] = [
    ConsoleLevel::Log,
    ConsoleLevel::Debug,
    ConsoleLevel::Info,
    ConsoleLevel::Warn,
    ConsoleLevel::Error,
];

/// What each console function closes over.
#[derive(Trace, Finalize)]
struct ConsoleTarget {
    #[unsafe_ignore_trace]
    sink: ConsoleSink,
    #[unsafe_ignore_trace]
    level: ConsoleLevel,
    #[unsafe_ignore_trace]
    mode: ConsoleMode,
}

fn write_console(_this: &JsValue, args: &[JsValue], target: &ConsoleTarget, ctx: &mut Context) -> JsResult<JsValue> {
    if target.mode != ConsoleMode::Empty {
        (target.sink)(target.level, &render(target.mode, args, ctx));
    }
    Ok(JsValue::undefined())
}

/// Install the console object into the global object.
pub(crate) fn install_console(ctx: &mut Context, config: &ConsoleConfig) -> Result<()> {
    let console = JsObject::with_object_proto(ctx.intrinsics());
    let sink = config
        .sink
        .clone()
        .unwrap_or_else(|| Arc::new(log_to_tracing) as ConsoleSink);
    let realm = ctx.realm().clone();

    for level in LEVELS {
        let target = ConsoleTarget {
            sink: Arc::clone(&sink),
            level,
            mode: config.mode,
        };
        let function = NativeFunction::from_copy_closure_with_captures(write_console, target);

        let function = FunctionObjectBuilder::new(&realm, function)
            .name(JsString::from(level.as_str()))
            .length(0)
            .build();
        console
            .set(JsString::from(level.as_str()), function, false, ctx)
            .map_err(|e| BridgeError::Startup(format!("failed to install console.{}: {e}", level.as_str())))?;
    }

    ctx.global_object()
        .set(js_string!("console"), console, false, ctx)
        .map_err(|e| BridgeError::Startup(format!("failed to install console: {e}")))?;
    Ok(())
}

fn render(mode: ConsoleMode, args: &[JsValue], ctx: &mut Context) -> String {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let part = match mode {
            ConsoleMode::AsJson => js_value_to_json(arg, ctx)
                .map(|json| json.to_string())
                .unwrap_or_else(|_| arg.display().to_string()),
            _ => match arg.as_string() {
                Some(s) => s.to_std_string_escaped(),
                None => arg
                    .to_string(ctx)
                    .map(|s| s.to_std_string_escaped())
                    .unwrap_or_else(|_| arg.display().to_string()),
            },
        };
        parts.push(part);
    }
    parts.join(" ")
}

fn log_to_tracing(level: ConsoleLevel, message: &str) {
    match level {
        ConsoleLevel::Error => tracing::error!(target: "jsbridge::console", "{message}"),
        ConsoleLevel::Warn => tracing::warn!(target: "jsbridge::console", "{message}"),
        ConsoleLevel::Debug => tracing::debug!(target: "jsbridge::console", "{message}"),
        ConsoleLevel::Log | ConsoleLevel::Info => {
            tracing::info!(target: "jsbridge::console", "{message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use std::sync::Mutex;

    fn capture(mode: ConsoleMode, source: &str) -> Vec<(ConsoleLevel, String)> {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lines_clone = Arc::clone(&lines);
        let config = ConsoleConfig::new(mode).with_sink(move |level, message| {
            lines_clone.lock().unwrap().push((level, message.to_string()));
        });

        let mut ctx = Context::default();
        install_console(&mut ctx, &config).unwrap();
        ctx.eval(Source::from_bytes(source)).unwrap();

        let captured = lines.lock().unwrap().clone();
        captured
    }

    #[test]
    fn test_console_as_string() {
        let lines = capture(ConsoleMode::AsString, "console.log('Hello', 42, true, null)");
        assert_eq!(lines, vec![(ConsoleLevel::Log, "Hello 42 true null".to_string())]);
    }

    #[test]
    fn test_console_as_json() {
        let lines = capture(ConsoleMode::AsJson, "console.warn('x', { a: [1, 2] })");
        assert_eq!(lines, vec![(ConsoleLevel::Warn, r#""x" {"a":[1,2]}"#.to_string())]);
    }

    #[test]
    fn test_console_empty_discards() {
        let lines = capture(ConsoleMode::Empty, "console.error('ignored'); 1");
        assert!(lines.is_empty());
    }

    #[test]
    fn test_console_levels() {
        let lines = capture(
            ConsoleMode::AsString,
            "console.debug('d'); console.info('i'); console.error('e')",
        );
        let levels: Vec<_> = lines.iter().map(|(level, _)| *level).collect();
        assert_eq!(levels, vec![ConsoleLevel::Debug, ConsoleLevel::Info, ConsoleLevel::Error]);
    }

    #[test]
    fn test_default_sink_does_not_panic() {
        let mut ctx = Context::default();
        install_console(&mut ctx, &ConsoleConfig::default()).unwrap();
        ctx.eval(Source::from_bytes("console.log('to tracing')")).unwrap();
    }
}
