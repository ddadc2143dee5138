//! Resolved runtime settings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::chat::ChatService;
use crate::cli::Cli;
use crate::gemini::{GeminiClient, GeminiOptions, MENTOR_SYSTEM_PROMPT, MENTOR_TEMPERATURE};
use crate::store::{BlobStore, FileBlobStore, MemoryBlobStore, SessionStore};

/// Fallback variable for the API key.
const FALLBACK_API_KEY_ENV: &str = "API_KEY";

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// `None` keeps sessions in memory only.
    pub data_dir: Option<PathBuf>,
}

impl Settings {
    /// Resolve settings from parsed arguments and the environment.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let api_key = cli
            .api_key
            .clone()
            .or_else(|| std::env::var(FALLBACK_API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty());

        if api_key.is_none() {
            tracing::error!("API Key is missing; replies will fail until GEMINI_API_KEY is set");
        }

        let data_dir = if cli.ephemeral {
            None
        } else {
            let dir = match &cli.data_dir {
                Some(dir) => dir.clone(),
                None => FileBlobStore::default_dir().context("Could not find a data directory")?,
            };
            Some(dir)
        };

        Ok(Self {
            api_key,
            model: cli.model.clone(),
            base_url: cli.base_url.clone(),
            data_dir,
        })
    }

    /// Open the session store for these settings.
    pub fn session_store(&self) -> SessionStore {
        let blobs: Arc<dyn BlobStore> = match &self.data_dir {
            Some(dir) => Arc::new(FileBlobStore::open_at(dir)),
            None => Arc::new(MemoryBlobStore::new()),
        };
        SessionStore::new(blobs)
    }

    /// Wire the Gemini client and store into a chat service.
    pub fn chat_service(&self) -> ChatService {
        let client = GeminiClient::new(GeminiOptions {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            temperature: MENTOR_TEMPERATURE,
        });
        ChatService::new(Arc::new(client), self.session_store(), MENTOR_SYSTEM_PROMPT)
    }
}
