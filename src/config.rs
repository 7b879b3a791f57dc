//! Environment-driven settings.
//!
//! All configuration comes from process environment variables, optionally
//! seeded from a `.env` file in the working directory. Variables already set
//! in the environment always win over the `.env` file.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `discord_token` / `DISCORD_TOKEN` | required |
//! | `OPENAI_API_KEY` | required |
//! | `RAG_DB_PATH` | `./rag_db` |
//! | `RAG_DOCUMENTS_PATH` | `./rag_documents` |
//! | `RAG_COLLECTION` | `reachy_mini` |
//! | `OPENAI_MODEL` | `gpt-4o-mini` |
//! | `OPENAI_EMBEDDING_MODEL` | `text-embedding-3-small` |
//! | `THREAD_HISTORY_LIMIT` | `25` |
//! | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_DB_PATH: &str = "./rag_db";
pub const DEFAULT_DOCUMENTS_PATH: &str = "./rag_documents";
pub const DEFAULT_COLLECTION: &str = "reachy_mini";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_THREAD_HISTORY_LIMIT: usize = 25;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("discord_token is required. Set it in .env or env vars.")]
    MissingDiscordToken,
    #[error("OPENAI_API_KEY is required. Set it in .env or env vars.")]
    MissingOpenAiKey,
}

/// Which credentials a command needs.
///
/// The bot needs both; offline commands (ingest, query, stats) only talk
/// to the embedding API and never connect to Discord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Bot,
    OpenAiOnly,
}

/// Immutable runtime configuration, loaded once at process start.
#[derive(Clone)]
pub struct Settings {
    pub discord_token: String,
    pub openai_api_key: String,
    pub rag_db_path: PathBuf,
    pub rag_documents_path: PathBuf,
    pub rag_collection: String,
    pub openai_model: String,
    pub openai_embedding_model: String,
    pub thread_history_limit: usize,
    pub openai_base_url: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("discord_token", &redact(&self.discord_token))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("rag_db_path", &self.rag_db_path)
            .field("rag_documents_path", &self.rag_documents_path)
            .field("rag_collection", &self.rag_collection)
            .field("openai_model", &self.openai_model)
            .field("openai_embedding_model", &self.openai_embedding_model)
            .field("thread_history_limit", &self.thread_history_limit)
            .field("openai_base_url", &self.openai_base_url)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Settings {
    /// Load settings for running the bot (both credentials required).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_for(Requirement::Bot)
    }

    /// Load settings from the environment (and `.env`, if present).
    pub fn from_env_for(requirement: Requirement) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok(), requirement)
    }

    /// Build settings from an arbitrary variable lookup.
    ///
    /// Every value is trimmed. Unparseable numbers fall back to their
    /// default instead of failing.
    pub fn from_lookup<F>(lookup: F, requirement: Requirement) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| default.to_string())
        };

        // Lowercase name takes precedence over the conventional one.
        let discord_token = lookup("discord_token")
            .or_else(|| lookup("DISCORD_TOKEN"))
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        let openai_api_key = get("OPENAI_API_KEY", "");

        let thread_history_limit = lookup("THREAD_HISTORY_LIMIT")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_THREAD_HISTORY_LIMIT);

        if requirement == Requirement::Bot && discord_token.is_empty() {
            return Err(ConfigError::MissingDiscordToken);
        }
        if openai_api_key.is_empty() {
            return Err(ConfigError::MissingOpenAiKey);
        }

        Ok(Self {
            discord_token,
            openai_api_key,
            rag_db_path: PathBuf::from(get("RAG_DB_PATH", DEFAULT_DB_PATH)),
            rag_documents_path: PathBuf::from(get("RAG_DOCUMENTS_PATH", DEFAULT_DOCUMENTS_PATH)),
            rag_collection: get("RAG_COLLECTION", DEFAULT_COLLECTION),
            openai_model: get("OPENAI_MODEL", DEFAULT_CHAT_MODEL),
            openai_embedding_model: get("OPENAI_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            thread_history_limit,
            openai_base_url: get("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Path of the SQLite file inside the vector database directory.
    pub fn db_file(&self) -> PathBuf {
        self.rag_db_path.join("rag.sqlite")
    }
}
