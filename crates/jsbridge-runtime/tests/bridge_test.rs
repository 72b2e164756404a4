//! Bridge session integration tests
//!
//! Covers the session as a whole: queue ordering, blocking and asynchronous
//! submission, callbacks, re-entrant calls from native code, console output,
//! timers, unhandled errors, script files and release semantics.

use jsbridge_runtime::{
    BridgeConfig, BridgeError, BridgeSession, ConsoleConfig, ConsoleLevel, ConsoleMode,
    EngineLimits, InterfaceContract, SessionState, Value, ValueType,
};
use std::fs;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const TIMEOUT: Duration = Duration::from_secs(10);

fn session() -> BridgeSession {
    BridgeSession::open(BridgeConfig::default()).unwrap()
}

/// Helper function to create temporary test scripts
fn create_test_script(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    fs::write(file.path(), content).unwrap();
    file
}

/// Re-evaluates `source` until it yields `expected` or the timeout expires.
fn wait_for(session: &BridgeSession, source: &str, expected: Value) {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if session.evaluate(source, ValueType::Any).unwrap() == expected {
            return;
        }
        assert!(Instant::now() < deadline, "`{source}` never became {expected}");
        thread::sleep(Duration::from_millis(5));
    }
}

// ============================================================================
// Queue ordering
// ============================================================================

#[test]
fn test_async_before_blocking_completes_first() {
    let session = session();

    let first = session.evaluate_async("globalThis.order = ['async']; 1", ValueType::I32);
    let order = session
        .evaluate("order.push('blocking'); order.join(',')", ValueType::Str)
        .unwrap();

    assert_eq!(order, Value::from("async,blocking"));
    assert_eq!(first.wait().unwrap(), Value::Int(1));
}

#[test]
fn test_submissions_run_in_order() {
    let session = session();
    session.execute("globalThis.log = []");

    let pending: Vec<_> = (0..20)
        .map(|i| session.evaluate_async(format!("log.push({i}); {i}"), ValueType::I32))
        .collect();
    for (i, result) in pending.into_iter().enumerate() {
        assert_eq!(result.wait().unwrap(), Value::Int(i as i64));
    }

    let log = session.evaluate("log", ValueType::array(ValueType::I32)).unwrap();
    assert_eq!(log, Value::from((0..20).collect::<Vec<i64>>()));
}

#[test]
fn test_callers_on_many_threads() {
    let session = session();
    session.execute("globalThis.total = 0");

    let workers: Vec<_> = (1..=8)
        .map(|i| {
            let session = session.clone();
            thread::spawn(move || {
                session
                    .evaluate(&format!("total += {i}; {i} * 2"), ValueType::I32)
                    .unwrap()
            })
        })
        .collect();
    for (i, worker) in workers.into_iter().enumerate() {
        assert_eq!(worker.join().unwrap(), Value::Int((i as i64 + 1) * 2));
    }

    assert_eq!(session.evaluate("total", ValueType::I32).unwrap(), Value::Int(36));
}

// ============================================================================
// Asynchronous submission
// ============================================================================

#[tokio::test]
async fn test_evaluate_async_await() {
    let session = session();
    let result = session.evaluate_async("[1, 2, 3].map(x => x * 2)", ValueType::array(ValueType::I32));
    assert_eq!(result.await.unwrap(), Value::from(vec![2, 4, 6]));
}

#[tokio::test]
async fn test_proxy_call_async() {
    let session = session();
    let target = session.create_value("({ greet: name => 'hello ' + name })").unwrap();
    let contract = InterfaceContract::builder("Greeter")
        .method("greet", vec![ValueType::Str], ValueType::Str)
        .build()
        .unwrap();
    let proxy = session.create_from_js_value(&target, contract).unwrap();

    let greeting = proxy.call_async("greet", vec!["bridge".into()]).await.unwrap();
    assert_eq!(greeting, Value::from("hello bridge"));

    let mismatch = proxy.call_async("greet", vec![]).await;
    assert!(matches!(mismatch, Err(BridgeError::ArgumentMismatch { .. })));
}

#[tokio::test]
async fn test_call_method_async() {
    let session = session();
    let list = session.create_value("[3, 1, 2]").unwrap();
    let joined = list
        .call_method_async("join", vec!["-".into()], ValueType::Str)
        .await
        .unwrap();
    assert_eq!(joined, Value::from("3-1-2"));
}

#[test]
fn test_evaluate_with_callback() {
    let session = session();
    let (tx, rx) = mpsc::channel();
    session.evaluate_with("'called back'", ValueType::Str, move |result| {
        tx.send(result).unwrap();
    });

    let result = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(result.unwrap(), Value::from("called back"));
}

#[test]
fn test_callback_receives_errors() {
    let session = session();
    let (tx, rx) = mpsc::channel();
    session.evaluate_with("undefinedName", ValueType::Any, move |result| {
        tx.send(result).unwrap();
    });

    let result = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(result, Err(BridgeError::Script(_))));
}

#[test]
fn test_callback_can_reenter_session() {
    let session = session();
    let inner = session.clone();
    let (tx, rx) = mpsc::channel();
    session.evaluate_with("20", ValueType::I32, move |result| {
        let doubled = result.and_then(|v| {
            inner.evaluate(&format!("{} * 2", v.as_i64().unwrap_or(0)), ValueType::I32)
        });
        tx.send(doubled).unwrap();
    });

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().unwrap(), Value::Int(40));
    session.release();
}

#[test]
fn test_execute_failure_reaches_handler() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let config = BridgeConfig::new().with_unhandled_error_handler(move |err| {
        sink.lock().unwrap().push(err.to_string());
    });
    let session = BridgeSession::open(config).unwrap();

    session.execute("throw new Error('lost')");
    session.evaluate("1", ValueType::Any).unwrap();

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Error: lost"));
}

#[test]
fn test_wait_on_engine_thread_is_rejected() {
    let session = session();
    let inner = session.clone();
    let contract = InterfaceContract::builder("Waiter")
        .method("wait", vec![], ValueType::Str)
        .build()
        .unwrap();
    let proxy = session
        .create_from_native_object(
            move |_: &str, _: Vec<Value>| -> jsbridge_runtime::Result<Value> {
                match inner.evaluate_async("1", ValueType::Any).wait() {
                    Err(BridgeError::Internal(message)) => Ok(Value::from(message)),
                    other => Ok(Value::from(format!("{other:?}"))),
                }
            },
            contract,
        )
        .unwrap();

    let message = session
        .evaluate(&format!("{proxy}.wait()"), ValueType::Str)
        .unwrap();
    assert!(message.as_str().unwrap().contains("engine thread"));
    session.release();
}

// ============================================================================
// Re-entrancy
// ============================================================================

#[test]
fn test_native_reenters_session() {
    let session = session();
    let inner = session.clone();
    let contract = InterfaceContract::builder("Oracle")
        .method("answer", vec![], ValueType::I32)
        .build()
        .unwrap();
    let proxy = session
        .create_from_native_object(
            move |_: &str, _: Vec<Value>| -> jsbridge_runtime::Result<Value> {
                inner.evaluate("40 + 2", ValueType::I32)
            },
            contract,
        )
        .unwrap();

    let result = session
        .evaluate(&format!("{proxy}.answer() + 1"), ValueType::I32)
        .unwrap();
    assert_eq!(result, Value::Int(43));
    session.release();
}

#[test]
fn test_nested_native_and_engine_calls() {
    let session = session();
    let inner = session.clone();
    let contract = InterfaceContract::builder("Counter")
        .method("countDown", vec![ValueType::I32], ValueType::I32)
        .build()
        .unwrap();
    let proxy = session
        .create_from_native_object(
            move |_: &str, args: Vec<Value>| -> jsbridge_runtime::Result<Value> {
                let n = args[0].as_i64().unwrap_or(0);
                if n == 0 {
                    return Ok(Value::Int(0));
                }
                let rest = inner.evaluate(&format!("counter.countDown({})", n - 1), ValueType::I32)?;
                Ok(Value::Int(n + rest.as_i64().unwrap_or(0)))
            },
            contract,
        )
        .unwrap();
    proxy.handle().assign_to_global("counter").unwrap();

    let result = session.evaluate("counter.countDown(4)", ValueType::I32).unwrap();
    assert_eq!(result, Value::Int(10));
    session.release();
}

// ============================================================================
// Console
// ============================================================================

#[test]
fn test_console_sink() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&lines);
    let console = ConsoleConfig::new(ConsoleMode::AsString).with_sink(move |level, message| {
        captured.lock().unwrap().push((level, message.to_string()));
    });
    let session = BridgeSession::open(BridgeConfig::new().with_console(console)).unwrap();

    session
        .evaluate("console.log('sum', 2 + 3); console.error('oops')", ValueType::Void)
        .unwrap();

    let lines = lines.lock().unwrap();
    assert_eq!(
        *lines,
        vec![
            (ConsoleLevel::Log, "sum 5".to_string()),
            (ConsoleLevel::Error, "oops".to_string()),
        ]
    );
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_set_timeout_fires_after_evaluation() {
    let session = session();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let proxy = session
        .create_from_native_fn("notify", vec![ValueType::Str], ValueType::Void, move |args| {
            let word = args[0].as_str().unwrap_or_default().to_string();
            tx.lock().unwrap().send(word).unwrap();
            Ok(Value::Null)
        })
        .unwrap();

    let notify = proxy.method_ref("notify");
    let id = session
        .evaluate(
            &format!("setTimeout((word) => {notify}(word), 20, 'ding')"),
            ValueType::I32,
        )
        .unwrap();
    assert!(id.as_i64().unwrap() > 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "ding");
}

#[test]
fn test_interval_until_cleared() {
    let session = session();
    session
        .evaluate(
            "globalThis.ticks = 0;
             globalThis.cancelled = false;
             globalThis.timer = setInterval(() => { ticks += 1; if (ticks === 3) clearInterval(timer); }, 1);
             clearTimeout(setTimeout(() => { cancelled = true; }, 1));",
            ValueType::Void,
        )
        .unwrap();

    wait_for(&session, "ticks", Value::Int(3));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(session.evaluate("ticks", ValueType::I32).unwrap(), Value::Int(3));
    assert_eq!(
        session.evaluate("cancelled", ValueType::Bool).unwrap(),
        Value::Bool(false)
    );
}

#[test]
fn test_timer_drains_promise_reactions() {
    let session = session();
    session
        .evaluate(
            "globalThis.seen = 'no';
             setTimeout(() => Promise.resolve('yes').then(v => { seen = v; }), 0);",
            ValueType::Void,
        )
        .unwrap();
    wait_for(&session, "seen", Value::from("yes"));
}

#[test]
fn test_timer_failure_reaches_handler() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let config = BridgeConfig::new().with_unhandled_error_handler(move |err| {
        sink.lock().unwrap().push(err.to_string());
    });
    let session = BridgeSession::open(config).unwrap();

    session.execute("setTimeout(() => { throw new Error('late failure'); }, 0)");
    let deadline = Instant::now() + TIMEOUT;
    while errors.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "timer error never reported");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(errors.lock().unwrap()[0].contains("late failure"));
    assert_eq!(session.evaluate("1", ValueType::I32).unwrap(), Value::Int(1));
}

// ============================================================================
// Script files
// ============================================================================

#[test]
fn test_evaluate_file() {
    let session = session();
    let script = create_test_script("const base = 20;\nbase * 2 + 2");
    assert_eq!(
        session.evaluate_file(script.path(), ValueType::I32).unwrap(),
        Value::Int(42)
    );
}

#[test]
fn test_evaluate_file_error_names_file() {
    let session = session();
    let script = create_test_script("// setup\nthrow new Error('from file');");

    match session.evaluate_file(script.path(), ValueType::Any) {
        Err(BridgeError::Script(error)) => {
            assert_eq!(error.message, "Error: from file");
            let location = error.location.unwrap();
            assert_eq!(location.file.as_deref(), Some(script.path().to_str().unwrap()));
        }
        other => panic!("expected a script error, got {other:?}"),
    }
}

#[test]
fn test_evaluate_missing_file() {
    let session = session();
    let result = session.evaluate_file("/nonexistent/jsbridge/script.js", ValueType::Any);
    assert!(matches!(result, Err(BridgeError::Io(_))));
}

// ============================================================================
// Limits
// ============================================================================

#[test]
fn test_recursion_limit() {
    let limits = EngineLimits::new().with_recursion_limit(64);
    let session = BridgeSession::open(BridgeConfig::new().with_limits(limits)).unwrap();

    let result = session.evaluate("function f(n) { return f(n + 1); } f(0)", ValueType::Any);
    assert!(matches!(result, Err(BridgeError::Script(_))));
    assert_eq!(session.evaluate("2 + 2", ValueType::I32).unwrap(), Value::Int(4));
}

#[test]
fn test_loop_iteration_limit() {
    let limits = EngineLimits::new().with_loop_iteration_limit(1_000);
    let session = BridgeSession::open(BridgeConfig::new().with_limits(limits)).unwrap();

    let result = session.evaluate("while (true) {}", ValueType::Any);
    assert!(matches!(result, Err(BridgeError::Script(_))));
}

// ============================================================================
// Release
// ============================================================================

#[test]
fn test_release_cancels_queued_work() {
    let session = session();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    // Park the engine thread inside a callback.
    session.evaluate_with("1", ValueType::Any, move |_| {
        entered_tx.send(()).unwrap();
        let _ = gate_rx.recv();
    });
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    let queued = session.evaluate_async("2", ValueType::Any);
    let releaser = {
        let session = session.clone();
        thread::spawn(move || session.release())
    };
    while !session.is_released() {
        thread::sleep(Duration::from_millis(1));
    }
    gate_tx.send(()).unwrap();
    releaser.join().unwrap();

    assert!(matches!(queued.wait(), Err(BridgeError::SessionClosed)));
    assert_eq!(session.state(), SessionState::Released);
}

#[test]
fn test_release_invalidates_handles() {
    let session = session();
    let handle = session.create_value("({ x: 1 })").unwrap();
    session.release();

    assert!(!handle.is_valid());
    assert!(matches!(
        handle.get("x", ValueType::I32),
        Err(BridgeError::SessionClosed)
    ));
    assert!(matches!(
        session.create_value("({})"),
        Err(BridgeError::SessionClosed)
    ));
    assert_eq!(session.live_handles(), 0);
}

#[test]
fn test_start_after_release_fails() {
    let session = BridgeSession::new(BridgeConfig::default()).unwrap();
    session.release();
    assert!(matches!(session.start(), Err(BridgeError::SessionClosed)));
    assert_eq!(session.state(), SessionState::Released);
}

#[test]
fn test_start_racing_release_stays_released() {
    for _ in 0..20 {
        let session = BridgeSession::new(BridgeConfig::default()).unwrap();
        let starter = {
            let session = session.clone();
            thread::spawn(move || session.start())
        };
        let releaser = {
            let session = session.clone();
            thread::spawn(move || session.release())
        };
        let started = starter.join().unwrap();
        releaser.join().unwrap();

        if let Err(err) = started {
            assert!(err.is_session_closed(), "unexpected start error: {err}");
        }
        assert_eq!(session.state(), SessionState::Released);
        assert!(matches!(
            session.evaluate("1", ValueType::Any),
            Err(BridgeError::SessionClosed)
        ));
    }
}

#[tokio::test]
async fn test_async_after_release() {
    let session = session();
    session.release();
    let result = session.evaluate_async("1", ValueType::Any).await;
    assert!(matches!(result, Err(BridgeError::SessionClosed)));
}
