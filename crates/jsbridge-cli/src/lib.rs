//! # jsbridge CLI
//!
//! Command-line runner for the jsbridge engine.
//!
//! - `jsbridge eval <source>`: evaluate an expression and print the result as JSON
//! - `jsbridge run <script>`: evaluate a script file
//!
//! Engine limits and console rendering are set with global options. The
//! helpers in [`output`] turn bridge values into printable JSON and route
//! script console output to the terminal.

pub mod output;
