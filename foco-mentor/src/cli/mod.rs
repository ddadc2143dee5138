//! Command-line surface: argument parsing, one-shot commands and the chat REPL.

mod args;
mod commands;
mod repl;

pub use args::Cli;
pub use commands::execute;
