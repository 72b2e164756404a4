//! # jsbridge CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Evaluate an expression (prints JSON)
//! jsbridge eval "1.5 + 2"
//!
//! # Require an integer result
//! jsbridge eval "1.5 + 2" --expect i32
//!
//! # Run a script with a recursion limit and JSON console output
//! jsbridge --recursion-limit 200 --console json run script.js
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::{Context, Result};
use argh::FromArgs;
use jsbridge_cli::output::{load_limits, parse_console_mode, print_console, render_result};
use jsbridge_runtime::{
    BridgeConfig, BridgeSession, ConsoleConfig, ConsoleMode, EngineLimits, ValueType,
};
use std::path::PathBuf;

#[derive(FromArgs)]
/// jsbridge - run JavaScript on the embedded bridge engine
struct Cli {
    /// maximum VM stack size, in values
    #[argh(option)]
    stack_size_limit: Option<usize>,

    /// maximum call depth
    #[argh(option)]
    recursion_limit: Option<usize>,

    /// maximum iterations of a single loop
    #[argh(option)]
    loop_iteration_limit: Option<u64>,

    /// JSON file with engine limits; the limit flags override its values
    #[argh(option)]
    limits: Option<PathBuf>,

    /// console rendering: string, json or empty
    #[argh(option, default = "ConsoleMode::AsString", from_str_fn(parse_console_mode))]
    console: ConsoleMode,

    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Eval(EvalArgs),
    Run(RunArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "eval")]
/// evaluate a JavaScript expression and print the result as JSON
struct EvalArgs {
    /// source code to evaluate
    #[argh(positional)]
    source: String,

    /// expected result type (any, void, bool, i32, i64, f64, string, array<T>, T?)
    #[argh(option, short = 'e', default = "ValueType::Any")]
    expect: ValueType,

    /// pretty-print the result
    #[argh(switch, short = 'p')]
    pretty: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// evaluate a script file
struct RunArgs {
    /// path to the script
    #[argh(positional)]
    script: PathBuf,

    /// expected result type; the result is printed unless this is void
    #[argh(option, short = 'e', default = "ValueType::Void")]
    expect: ValueType,

    /// pretty-print the result
    #[argh(switch, short = 'p')]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Stdout carries results and console output; logs go to stderr.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let session = BridgeSession::open(build_config(&cli)?)?;
    let outcome = run(&session, cli.command).await;
    session.release();
    outcome
}

async fn run(session: &BridgeSession, command: Commands) -> Result<()> {
    let (value, expected, pretty) = match command {
        Commands::Eval(args) => {
            tracing::debug!("Evaluating expression ({} bytes)", args.source.len());
            let value = session.evaluate_async(args.source, args.expect.clone()).await?;
            (value, args.expect, args.pretty)
        }
        Commands::Run(args) => {
            tracing::info!("Running script: {}", args.script.display());
            let value = session
                .evaluate_file(&args.script, args.expect.clone())
                .with_context(|| format!("failed to run {}", args.script.display()))?;
            (value, args.expect, args.pretty)
        }
    };

    if let Some(text) = render_result(session, &value, &expected, pretty)? {
        println!("{text}");
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut limits = match &cli.limits {
        Some(path) => load_limits(path)?,
        None => EngineLimits::default(),
    };
    if let Some(limit) = cli.stack_size_limit {
        limits = limits.with_stack_size_limit(limit);
    }
    if let Some(limit) = cli.recursion_limit {
        limits = limits.with_recursion_limit(limit);
    }
    if let Some(limit) = cli.loop_iteration_limit {
        limits = limits.with_loop_iteration_limit(limit);
    }

    let config = BridgeConfig::new()
        .with_limits(limits)
        .with_console(ConsoleConfig::new(cli.console).with_sink(print_console));
    config.validate()?;
    Ok(config)
}

/// CLI argument parsing tests.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_eval() {
        let cli = Cli::from_args(&["jsbridge"], &["eval", "1.5 + 2"]).unwrap();
        match cli.command {
            Commands::Eval(EvalArgs { source, expect, pretty }) => {
                assert_eq!(source, "1.5 + 2");
                assert_eq!(expect, ValueType::Any); // default
                assert!(!pretty);
            }
            _ => panic!("Expected Eval command"),
        }
        assert_eq!(cli.console, ConsoleMode::AsString);
    }

    #[test]
    fn test_cli_parse_eval_with_expect() {
        let cli = Cli::from_args(&["jsbridge"], &["eval", "[1, 2]", "--expect", "array<i32>", "-p"])
            .unwrap();
        match cli.command {
            Commands::Eval(EvalArgs { expect, pretty, .. }) => {
                assert_eq!(expect, ValueType::array(ValueType::I32));
                assert!(pretty);
            }
            _ => panic!("Expected Eval command"),
        }
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::from_args(&["jsbridge"], &["run", "script.js"]).unwrap();
        match cli.command {
            Commands::Run(RunArgs { script, expect, .. }) => {
                assert_eq!(script, PathBuf::from("script.js"));
                assert_eq!(expect, ValueType::Void); // default
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_global_options() {
        let cli = Cli::from_args(
            &["jsbridge"],
            &[
                "--recursion-limit", "64",
                "--loop-iteration-limit", "1000",
                "--console", "json",
                "eval", "1",
            ],
        )
        .unwrap();
        assert_eq!(cli.recursion_limit, Some(64));
        assert_eq!(cli.loop_iteration_limit, Some(1000));
        assert_eq!(cli.console, ConsoleMode::AsJson);

        let config = build_config(&cli).unwrap();
        assert_eq!(config.limits.recursion_limit, 64);
        assert_eq!(config.limits.loop_iteration_limit, 1000);
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(Cli::from_args(&["jsbridge"], &["eval", "1", "--expect", "decimal"]).is_err());
        assert!(Cli::from_args(&["jsbridge"], &["--console", "xml", "eval", "1"]).is_err());
        assert!(Cli::from_args(&["jsbridge"], &["eval"]).is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let cli = Cli::from_args(&["jsbridge"], &["--recursion-limit", "0", "eval", "1"]).unwrap();
        assert!(build_config(&cli).is_err());
    }
}
