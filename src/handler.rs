//! Chat event handling, independent of any particular chat SDK.
//!
//! The [`Responder`] owns the query pipeline: filter the incoming message,
//! resolve (or create) the conversation thread, gather attachments, thread
//! history and retrieved context, call the completion model, and relay the
//! answer in pieces that fit the platform's message limit.
//!
//! Everything the responder needs from the chat service goes through the
//! [`ChatPlatform`] trait. The Discord implementation lives in
//! [`discord`](crate::discord); tests drive the responder with in-memory fakes.
//!
//! # Flow
//!
//! ```text
//! message ──▶ filter ──▶ mention? ──▶ thread ──▶ semaphore
//!                                                   │
//!             attachments + history + top-5 chunks ◀┘
//!                                │
//!                 prompt ──▶ completion ──▶ split_reply ──▶ send
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::completion::CompletionClient;
use crate::prompt::{build_messages, format_history, HistoryEntry};
use crate::rag::RagStore;
use crate::transcript::{write_thread_document, ThreadRef};

/// Chunks retrieved per question.
pub const TOP_K: usize = 5;
pub const TEMPERATURE: f32 = 0.2;
/// Largest reply piece sent in one message (Discord's hard limit is 2000).
pub const REPLY_LIMIT: usize = 1900;
pub const MAX_ATTACHMENT_BYTES: u64 = 1_000_000;
/// Questions answered at the same time; further mentions wait.
pub const MAX_CONCURRENT: usize = 3;
pub const THREAD_AUTO_ARCHIVE_MINUTES: u16 = 60;
pub const THREAD_PREFIX: &str = "Reachy Mini: ";

const TITLE_MAX_CHARS: usize = 48;
const ATTACHMENT_EXTENSIONS: &[&str] = &[".txt", ".log", ".md"];

pub const APOLOGY: &str = "Sorry, I hit an error processing that.";
pub const NO_THREAD_PERMISSION: &str = "I don't have permission to create threads here.";
pub const EMPTY_REPLY: &str = "(no content)";

/// A file attached to an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub url: String,
}

impl AttachmentRef {
    /// Text-like attachment within the size cap.
    pub fn is_accepted(&self) -> bool {
        let name = self.filename.to_ascii_lowercase();
        let texty = ATTACHMENT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
            || self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("text/"));
        texty && self.size <= MAX_ATTACHMENT_BYTES
    }
}

/// The subset of a chat message the responder looks at.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author_is_bot: bool,
    pub in_guild: bool,
    pub content: String,
    /// User ids from the platform's structured mention list.
    pub mention_ids: Vec<u64>,
    /// Set when the message was posted inside a thread.
    pub thread: Option<ThreadRef>,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("missing permission to create threads")]
    Forbidden,
    #[error("thread creation failed: {0}")]
    Other(String),
}

/// Opaque handle that keeps a typing indicator alive until dropped.
pub type TypingGuard = Box<dyn std::any::Any + Send>;

/// Operations the responder needs from a chat service.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Start a thread from `message_id` in `channel_id`.
    async fn create_thread(
        &self,
        channel_id: u64,
        message_id: u64,
        name: &str,
        auto_archive_minutes: u16,
    ) -> Result<ThreadRef, ThreadError>;

    /// Post `text` to a channel or thread, optionally as a reply to `reply_to`.
    async fn send(&self, channel_id: u64, text: &str, reply_to: Option<u64>) -> Result<()>;

    /// Messages of a thread in chronological order.
    ///
    /// With `before` set, only messages older than it are considered. With
    /// `limit` set, only the most recent `limit` of those are returned: the
    /// messages right before a question carry the context it refers to, and
    /// the start of a long thread is usually stale by then.
    async fn history(
        &self,
        thread_id: u64,
        before: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>>;

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>>;

    fn start_typing(&self, channel_id: u64) -> TypingGuard;
}

/// What [`Responder::on_message`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not for us: bot author, direct message, or no mention.
    Ignored,
    /// Thread creation was refused; the user was told.
    Forbidden,
    /// Answer sent as `pieces` messages to `channel_id`.
    Answered { channel_id: u64, pieces: usize },
    /// Something failed after the thread was resolved; an apology was attempted.
    Failed,
}

/// Result of saving a thread transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    NotInThread,
    Empty,
    Saved(PathBuf),
}

impl SaveOutcome {
    /// User-facing text for the slash command reply.
    pub fn message(&self) -> String {
        match self {
            SaveOutcome::NotInThread => "Use /add_rag inside a thread.".to_string(),
            SaveOutcome::Empty => "Thread has no text content to save.".to_string(),
            SaveOutcome::Saved(path) => format!(
                "Saved thread content to `{}`. Re-run ingestion on that folder to update the RAG DB.",
                path.display()
            ),
        }
    }
}

/// Where the answer goes: a thread, or inline in the original channel.
#[derive(Debug, Clone, Copy)]
struct Target {
    channel_id: u64,
    /// Trigger message to reference; set only for inline replies.
    reply_to: Option<u64>,
    /// Thread whose history is included in the prompt.
    history_thread: Option<u64>,
}

/// Answers questions addressed to the bot.
#[derive(Clone)]
pub struct Responder {
    rag: RagStore,
    completion: Arc<dyn CompletionClient>,
    permits: Arc<Semaphore>,
    history_limit: usize,
    documents_path: PathBuf,
}

impl Responder {
    pub fn new(
        rag: RagStore,
        completion: Arc<dyn CompletionClient>,
        history_limit: usize,
        documents_path: PathBuf,
    ) -> Self {
        Self {
            rag,
            completion,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT)),
            history_limit,
            documents_path,
        }
    }

    /// Handle one incoming message end to end. Never returns an error:
    /// failures are logged and reported to the user.
    pub async fn on_message<P>(&self, platform: &P, bot_id: u64, msg: &IncomingMessage) -> Outcome
    where
        P: ChatPlatform + ?Sized,
    {
        if msg.author_is_bot || !msg.in_guild {
            return Outcome::Ignored;
        }
        if !is_mentioning(bot_id, msg) {
            return Outcome::Ignored;
        }

        let target = match &msg.thread {
            Some(thread) => Target {
                channel_id: thread.id,
                reply_to: None,
                history_thread: Some(thread.id),
            },
            None => {
                let name = thread_name(bot_id, &msg.content);
                match platform
                    .create_thread(msg.channel_id, msg.id, &name, THREAD_AUTO_ARCHIVE_MINUTES)
                    .await
                {
                    Ok(thread) => {
                        tracing::info!(thread_id = thread.id, name = %thread.name, "created thread");
                        Target {
                            channel_id: thread.id,
                            reply_to: None,
                            history_thread: Some(thread.id),
                        }
                    }
                    Err(ThreadError::Forbidden) => {
                        tracing::warn!(channel_id = msg.channel_id, "no permission to create threads");
                        if let Err(e) = platform
                            .send(msg.channel_id, NO_THREAD_PERMISSION, Some(msg.id))
                            .await
                        {
                            tracing::warn!(error = %e, "failed to report missing thread permission");
                        }
                        return Outcome::Forbidden;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "replying inline instead");
                        Target {
                            channel_id: msg.channel_id,
                            reply_to: Some(msg.id),
                            history_thread: None,
                        }
                    }
                }
            }
        };

        match self.answer(platform, bot_id, msg, target).await {
            Ok(pieces) => Outcome::Answered {
                channel_id: target.channel_id,
                pieces,
            },
            Err(e) => {
                tracing::error!(message_id = msg.id, error = ?e, "error handling message");
                let _ = platform
                    .send(target.channel_id, APOLOGY, target.reply_to)
                    .await;
                Outcome::Failed
            }
        }
    }

    async fn answer<P>(
        &self,
        platform: &P,
        bot_id: u64,
        msg: &IncomingMessage,
        target: Target,
    ) -> Result<usize>
    where
        P: ChatPlatform + ?Sized,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("Concurrency gate closed")?;
        let _typing = platform.start_typing(target.channel_id);

        let mut user_text = strip_mentions(bot_id, &msg.content).trim().to_string();
        let attachments = collect_attachment_texts(platform, &msg.attachments).await;
        if !attachments.is_empty() {
            user_text.push_str("\n\n[Attachments]\n");
            user_text.push_str(&attachments.join("\n\n"));
        }

        let docs = self
            .rag
            .query(&user_text, TOP_K)
            .await
            .context("Retrieval failed")?;

        let history = match target.history_thread {
            Some(thread_id) if self.history_limit > 0 => {
                match platform
                    .history(thread_id, Some(msg.id), Some(self.history_limit))
                    .await
                {
                    Ok(entries) => format_history(&entries),
                    Err(e) => {
                        tracing::warn!(thread_id, error = %e, "could not fetch thread history");
                        String::new()
                    }
                }
            }
            _ => String::new(),
        };

        tracing::debug!(
            docs = docs.len(),
            history_chars = history.len(),
            "assembled prompt context"
        );

        let messages = build_messages(&user_text, &history, &docs);
        let reply = self
            .completion
            .complete(&messages, TEMPERATURE)
            .await
            .context("Completion failed")?;

        let pieces = split_reply(&reply, REPLY_LIMIT);
        for (i, piece) in pieces.iter().enumerate() {
            let reply_to = if i == 0 { target.reply_to } else { None };
            platform
                .send(target.channel_id, piece, reply_to)
                .await
                .context("Failed to send reply")?;
        }
        Ok(pieces.len())
    }

    /// Write the full history of `thread` to the documents folder.
    pub async fn save_thread<P>(&self, platform: &P, thread: Option<&ThreadRef>) -> Result<SaveOutcome>
    where
        P: ChatPlatform + ?Sized,
    {
        let Some(thread) = thread else {
            return Ok(SaveOutcome::NotInThread);
        };

        let entries = platform
            .history(thread.id, None, None)
            .await
            .with_context(|| format!("Failed to read history of thread {}", thread.id))?;
        let content = format_history(&entries);
        if content.trim().is_empty() {
            return Ok(SaveOutcome::Empty);
        }

        let path = write_thread_document(&self.documents_path, thread, &content).await?;
        tracing::info!(thread_id = thread.id, path = %path.display(), "saved thread transcript");
        Ok(SaveOutcome::Saved(path))
    }
}

/// True when the bot is in the structured mentions or tagged in the text.
pub fn is_mentioning(bot_id: u64, msg: &IncomingMessage) -> bool {
    msg.mention_ids.contains(&bot_id)
        || msg.content.contains(&format!("<@{}>", bot_id))
        || msg.content.contains(&format!("<@!{}>", bot_id))
}

/// Replace the bot's mention tokens with spaces.
pub fn strip_mentions(bot_id: u64, content: &str) -> String {
    content
        .replace(&format!("<@{}>", bot_id), " ")
        .replace(&format!("<@!{}>", bot_id), " ")
}

/// Short title derived from the message text.
pub fn thread_title(bot_id: u64, content: &str) -> String {
    let stripped = strip_mentions(bot_id, content);
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "Conversation".to_string();
    }
    if collapsed.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
        title.push('…');
        title
    } else {
        collapsed
    }
}

pub fn thread_name(bot_id: u64, content: &str) -> String {
    format!("{}{}", THREAD_PREFIX, thread_title(bot_id, content))
}

/// Split `text` into pieces of at most `limit` characters.
pub fn split_reply(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![EMPTY_REPLY.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Download and decode accepted attachments. Failures skip the attachment.
pub async fn collect_attachment_texts<P>(platform: &P, attachments: &[AttachmentRef]) -> Vec<String>
where
    P: ChatPlatform + ?Sized,
{
    let mut texts = Vec::new();
    for attachment in attachments.iter().filter(|a| a.is_accepted()) {
        match platform.download_attachment(attachment).await {
            Ok(bytes) if bytes.len() as u64 <= MAX_ATTACHMENT_BYTES => {
                texts.push(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(bytes) => {
                tracing::debug!(file = %attachment.filename, size = bytes.len(), "attachment too large");
            }
            Err(e) => {
                tracing::warn!(file = %attachment.filename, error = %e, "failed to download attachment");
            }
        }
    }
    texts
}
