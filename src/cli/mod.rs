//! The `waymark` command line.

pub mod app;
mod archive;
mod commands;
mod context;
mod dispatch;
mod env;
mod guardrail;
mod info;
mod output;
mod recall;
mod run;
mod runtime;
mod store;

pub use output::OutputFormat;
