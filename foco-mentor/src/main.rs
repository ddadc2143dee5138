//! Foco Mentor - a reading mentor you chat with, backed by Gemini.
//!
//! Architecture:
//! - `chat` owns sessions and the streaming send flow
//! - `gemini` talks to the completion API over SSE
//! - `store` persists the session collection as one JSON blob
//! - `cli` and `server` are the terminal and web front ends

mod chat;
mod cli;
mod config;
mod gemini;
mod logging;
mod models;
mod server;
mod store;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli).await
}
