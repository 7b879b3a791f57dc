//! Discord glue over `serenity`.
//!
//! [`DiscordPlatform`] implements [`ChatPlatform`] with the serenity HTTP
//! client, and [`Handler`] forwards gateway events to the [`Responder`].
//! Slash commands `/ping` and `/add_rag` are registered globally once the
//! gateway reports ready.

use std::sync::{Arc, OnceLock};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serenity::all::{
    AutoArchiveDuration, Channel, ChannelId, ChannelType, Client, Command, CommandInteraction,
    Context, CreateCommand, CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, CreateMessage, CreateThread, EventHandler, GatewayIntents,
    GetMessages, GuildChannel, Interaction, Message, MessageId, Ready,
};
use serenity::http::{Http, HttpError};

use crate::completion::OpenAiChatClient;
use crate::config::Settings;
use crate::handler::{
    is_mentioning, AttachmentRef, ChatPlatform, IncomingMessage, Responder, SaveOutcome,
    ThreadError, TypingGuard, APOLOGY,
};
use crate::prompt::HistoryEntry;
use crate::rag::RagStore;
use crate::transcript::ThreadRef;

/// Discord returns at most 100 messages per history request.
const HISTORY_PAGE: usize = 100;

/// [`ChatPlatform`] backed by the Discord REST API.
#[derive(Clone)]
pub struct DiscordPlatform {
    http: Arc<Http>,
    downloads: reqwest::Client,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, downloads: reqwest::Client) -> Self {
        Self { http, downloads }
    }
}

fn is_forbidden(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => {
            is_forbidden_status(resp.status_code.as_u16())
        }
        _ => false,
    }
}

fn is_forbidden_status(status: u16) -> bool {
    status == 403
}

fn archive_duration(minutes: u16) -> AutoArchiveDuration {
    match minutes {
        0..=60 => AutoArchiveDuration::OneHour,
        61..=1440 => AutoArchiveDuration::OneDay,
        1441..=4320 => AutoArchiveDuration::ThreeDays,
        _ => AutoArchiveDuration::OneWeek,
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn create_thread(
        &self,
        channel_id: u64,
        message_id: u64,
        name: &str,
        auto_archive_minutes: u16,
    ) -> Result<ThreadRef, ThreadError> {
        let builder =
            CreateThread::new(name).auto_archive_duration(archive_duration(auto_archive_minutes));
        let channel = ChannelId::new(channel_id);
        match channel
            .create_thread_from_message(self.http.as_ref(), MessageId::new(message_id), builder)
            .await
        {
            Ok(thread) => Ok(ThreadRef {
                id: thread.id.get(),
                name: thread.name.clone(),
                parent_name: None,
            }),
            Err(e) if is_forbidden(&e) => Err(ThreadError::Forbidden),
            Err(e) => Err(ThreadError::Other(e.to_string())),
        }
    }

    async fn send(&self, channel_id: u64, text: &str, reply_to: Option<u64>) -> Result<()> {
        let channel = ChannelId::new(channel_id);
        let mut builder = CreateMessage::new().content(text);
        if let Some(id) = reply_to {
            builder = builder.reference_message((channel, MessageId::new(id)));
        }
        channel
            .send_message(self.http.as_ref(), builder)
            .await
            .with_context(|| format!("Failed to send message to channel {}", channel_id))?;
        Ok(())
    }

    async fn history(
        &self,
        thread_id: u64,
        before: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>> {
        let channel = ChannelId::new(thread_id);
        let mut cursor = before.map(MessageId::new);
        let mut newest_first = Vec::new();

        loop {
            let want = match limit {
                Some(limit) => limit.saturating_sub(newest_first.len()),
                None => HISTORY_PAGE,
            };
            if want == 0 {
                break;
            }
            let page_size = want.min(HISTORY_PAGE);

            let mut request = GetMessages::new().limit(page_size as u8);
            if let Some(cursor) = cursor {
                request = request.before(cursor);
            }
            let page = channel
                .messages(self.http.as_ref(), request)
                .await
                .with_context(|| format!("Failed to fetch history of thread {}", thread_id))?;

            let fetched = page.len();
            if let Some(oldest) = page.last() {
                cursor = Some(oldest.id);
            }
            newest_first.extend(page.into_iter().map(|m| HistoryEntry {
                message_id: m.id.get(),
                author_is_bot: m.author.bot,
                content: m.content,
            }));
            if fetched < page_size {
                break;
            }
        }

        newest_first.reverse();
        Ok(newest_first)
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        let resp = self
            .downloads
            .get(&attachment.url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", attachment.filename))?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    fn start_typing(&self, channel_id: u64) -> TypingGuard {
        Box::new(ChannelId::new(channel_id).start_typing(&self.http))
    }
}

fn is_thread(channel: &GuildChannel) -> bool {
    matches!(
        channel.kind,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
    )
}

/// Thread details for `channel_id`, or `None` when it is not a thread.
async fn resolve_thread(ctx: &Context, channel_id: ChannelId) -> Option<ThreadRef> {
    let channel = match channel_id.to_channel(ctx).await {
        Ok(Channel::Guild(channel)) if is_thread(&channel) => channel,
        Ok(_) => return None,
        Err(e) => {
            tracing::warn!(channel_id = channel_id.get(), error = %e, "could not resolve channel");
            return None;
        }
    };
    let parent_name = match channel.parent_id {
        Some(parent) => parent.name(ctx).await.ok(),
        None => None,
    };
    Some(ThreadRef {
        id: channel.id.get(),
        name: channel.name.clone(),
        parent_name,
    })
}

fn slash_commands() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("ping").description("Check bot latency"),
        CreateCommand::new("add_rag").description("Save this thread's content for RAG ingestion"),
    ]
}

/// Gateway event handler.
pub struct Handler {
    responder: Responder,
    bot_id: OnceLock<u64>,
    downloads: reqwest::Client,
}

impl Handler {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            bot_id: OnceLock::new(),
            downloads: reqwest::Client::new(),
        }
    }

    fn platform(&self, ctx: &Context) -> DiscordPlatform {
        DiscordPlatform::new(ctx.http.clone(), self.downloads.clone())
    }

    async fn reply_ephemeral(&self, ctx: &Context, command: &CommandInteraction, text: &str) {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(text)
                .ephemeral(true),
        );
        if let Err(e) = command.create_response(&ctx.http, response).await {
            tracing::warn!(command = %command.data.name, error = %e, "failed to respond to command");
        }
    }

    async fn add_rag(&self, ctx: &Context, command: &CommandInteraction) {
        let Some(thread) = resolve_thread(ctx, command.channel_id).await else {
            self.reply_ephemeral(ctx, command, &SaveOutcome::NotInThread.message())
                .await;
            return;
        };

        if let Err(e) = command.defer_ephemeral(&ctx.http).await {
            tracing::warn!(error = %e, "failed to defer /add_rag");
            return;
        }

        let text = match self
            .responder
            .save_thread(&self.platform(ctx), Some(&thread))
            .await
        {
            Ok(outcome) => outcome.message(),
            Err(e) => {
                tracing::error!(thread_id = thread.id, error = ?e, "failed to save thread");
                APOLOGY.to_string()
            }
        };

        let followup = CreateInteractionResponseFollowup::new()
            .content(text)
            .ephemeral(true);
        if let Err(e) = command.create_followup(&ctx.http, followup).await {
            tracing::warn!(error = %e, "failed to send /add_rag followup");
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        let _ = self.bot_id.set(ready.user.id.get());
        tracing::info!(user = %ready.user.name, id = ready.user.id.get(), "logged in");

        match Command::set_global_commands(&ctx.http, slash_commands()).await {
            Ok(commands) => tracing::info!(count = commands.len(), "registered slash commands"),
            Err(e) => tracing::warn!(error = %e, "could not register slash commands"),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(&bot_id) = self.bot_id.get() else {
            return;
        };
        if msg.author.bot || msg.guild_id.is_none() {
            return;
        }

        let mut incoming = IncomingMessage {
            id: msg.id.get(),
            channel_id: msg.channel_id.get(),
            author_is_bot: msg.author.bot,
            in_guild: true,
            content: msg.content.clone(),
            mention_ids: msg.mentions.iter().map(|u| u.id.get()).collect(),
            thread: None,
            attachments: msg
                .attachments
                .iter()
                .map(|a| AttachmentRef {
                    filename: a.filename.clone(),
                    size: u64::from(a.size),
                    content_type: a.content_type.clone(),
                    url: a.url.clone(),
                })
                .collect(),
        };
        if !is_mentioning(bot_id, &incoming) {
            return;
        }
        incoming.thread = resolve_thread(&ctx, msg.channel_id).await;

        let outcome = self
            .responder
            .on_message(&self.platform(&ctx), bot_id, &incoming)
            .await;
        tracing::debug!(message_id = incoming.id, ?outcome, "handled message");
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        match command.data.name.as_str() {
            "ping" => self.reply_ephemeral(&ctx, &command, "Pong!").await,
            "add_rag" => self.add_rag(&ctx, &command).await,
            other => tracing::debug!(command = other, "ignoring unknown command"),
        }
    }
}

/// Connect to the Discord gateway and serve until the client stops.
pub async fn run_bot(settings: Settings) -> Result<()> {
    let rag = RagStore::from_settings(&settings).await?;
    let completion = OpenAiChatClient::new(
        &settings.openai_api_key,
        &settings.openai_base_url,
        &settings.openai_model,
    );
    let model = completion.model().to_string();
    let responder = Responder::new(
        rag,
        Arc::new(completion),
        settings.thread_history_limit,
        settings.rag_documents_path.clone(),
    );

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&settings.discord_token, intents)
        .event_handler(Handler::new(responder))
        .await
        .context("Failed to build Discord client")?;

    tracing::info!(
        collection = %settings.rag_collection,
        model = %model,
        "starting Reachy Mini bot"
    );
    client.start().await.context("Discord client stopped")?;
    Ok(())
}
