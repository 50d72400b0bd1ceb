//! A small interactive shell built directly on fork, pipe, dup2 and exec.
//!
//! A line is split into words, checked against a single-level
//! `if`/`then`/`else`/`fi` state machine, split into `|`-separated stages with
//! an optional trailing redirection each, and then run either as a built-in
//! inside this process or as one forked child per stage. Commands ending in
//! `&` are tracked as background jobs and reaped on later prompt cycles.
//!
//! The main entry point is [`Interpreter`]. Line input is abstracted by
//! [`LineSource`], so the same session logic serves a terminal (through
//! `rustyline`) and scripted input.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
mod external;
pub mod flow;
pub mod io_adapters;
mod interpreter;
pub mod jobs;
pub mod lexer;
pub mod parser;
pub mod signals;

pub use config::Config;
pub use error::ShellError;
pub use interpreter::Interpreter;
pub use io_adapters::{EditorSource, Input, LineSource, MemWriter, PipedSource};
