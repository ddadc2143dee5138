//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Foco Mentor - a reading mentor you can chat with
#[derive(Parser, Debug)]
#[command(name = "foco-mentor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Gemini API key (falls back to API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Gemini model to use
    #[arg(short, long, default_value = DEFAULT_MODEL, global = true)]
    pub model: String,

    /// Directory where chat sessions are stored
    #[arg(long, env = "FOCO_MENTOR_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Keep sessions in memory only
    #[arg(long, global = true, conflicts_with = "data_dir")]
    pub ephemeral: bool,

    /// Gemini API base URL
    #[arg(long, hide = true, default_value = DEFAULT_BASE_URL, global = true)]
    pub base_url: String,

    /// Subcommand to execute (defaults to `chat`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Chat with the mentor in the terminal
    Chat,

    /// Ask one question in the current session and print the reply
    Ask {
        /// The message to send
        text: String,
    },

    /// Start a new chat session
    New,

    /// List stored chat sessions
    List,

    /// Print the messages of a session
    Show {
        /// Session number (from `list`) or id prefix; defaults to the newest
        session: Option<String>,
    },

    /// Delete a chat session
    Delete {
        /// Session number (from `list`) or id prefix
        session: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Serve the chat as a local web page
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "58232")]
        port: u16,

        /// Open browser automatically
        #[arg(long)]
        open: bool,
    },
}
