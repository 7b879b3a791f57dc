//! # Reachy Mini support bot
//!
//! A Discord bot that answers troubleshooting questions about the Reachy
//! Mini robot with retrieval-augmented generation.
//!
//! Documents are ingested offline into a SQLite-backed vector store. When a
//! user mentions the bot, it opens (or reuses) a thread, retrieves the most
//! similar chunks, combines them with the thread history, and relays the
//! model's answer in pieces that fit Discord's message limit.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Documents  │──▶│  Extract +  │──▶│    SQLite    │
//! │ txt/md/pdf  │   │ Chunk+Embed │   │  rag_chunks  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ top-k
//! ┌─────────────┐   ┌─────────────┐   ┌──────▼───────┐
//! │   Discord   │──▶│  Responder  │──▶│ Prompt → LLM │
//! │  (serenity) │◀──│  (handler)  │◀──│  completion  │
//! └─────────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reachy-bot ingest ./rag_documents     # build the vector store
//! reachy-bot query "robot won't boot"   # check retrieval
//! reachy-bot stats                      # chunk counts per source
//! reachy-bot run                        # start the Discord bot
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-driven settings |
//! | [`models`] | Core data types |
//! | [`chunk`] | Sliding-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store trait and in-memory backend |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`rag`] | Upsert and query over one collection |
//! | [`completion`] | Chat completion client |
//! | [`extract`] | Text extraction from documents |
//! | [`ingest`] | Folder ingestion |
//! | [`prompt`] | Prompt construction |
//! | [`handler`] | Platform-agnostic message handling |
//! | [`discord`] | Discord gateway glue |
//! | [`transcript`] | Saved thread transcripts |
//! | [`search`] | Command-line retrieval |
//! | [`stats`] | Collection statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod discord;
pub mod embedding;
pub mod extract;
pub mod handler;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod transcript;
