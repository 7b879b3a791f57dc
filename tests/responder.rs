//! End-to-end tests for the message pipeline.
//!
//! A fake chat platform, a keyword embedder and a recording completion client
//! drive the [`Responder`] through thread creation, retrieval, prompt
//! assembly and chunked replies, without any network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reachy_mini_bot::completion::{ChatMessage, CompletionClient, Role};
use reachy_mini_bot::embedding::EmbeddingProvider;
use reachy_mini_bot::handler::{
    AttachmentRef, ChatPlatform, IncomingMessage, Outcome, Responder, SaveOutcome, ThreadError,
    TypingGuard, APOLOGY, MAX_CONCURRENT, NO_THREAD_PERMISSION,
};
use reachy_mini_bot::prompt::HistoryEntry;
use reachy_mini_bot::rag::RagStore;
use reachy_mini_bot::store::memory::InMemoryStore;
use reachy_mini_bot::transcript::ThreadRef;
use serde_json::json;
use tempfile::TempDir;

const BOT: u64 = 999;
const CHANNEL: u64 = 10;
const NEW_THREAD: u64 = 500;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Embeds text as keyword counts, so similarity follows shared topics.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

const KEYWORDS: &[&str] = &["reset", "wifi", "battery", "motor"];

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = KEYWORDS
                    .iter()
                    .map(|k| lower.matches(k).count() as f32)
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

/// Records every request and replies with a fixed answer (or fails).
struct RecordingCompletion {
    reply: Result<String, String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingCompletion {
    fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            reply: Err("model unavailable".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for RecordingCompletion {
    async fn complete(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(e) => bail!("{}", e),
        }
    }
}

/// Holds each request for a while and tracks how many overlap.
struct SlowCompletion {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    done: AtomicUsize,
}

#[async_trait]
impl CompletionClient for SlowCompletion {
    async fn complete(&self, _messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok("done".to_string())
    }
}

#[derive(Clone, Copy)]
enum ThreadBehavior {
    Create,
    Forbidden,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
struct Sent {
    channel_id: u64,
    text: String,
    reply_to: Option<u64>,
}

struct FakePlatform {
    thread_behavior: ThreadBehavior,
    created: Mutex<Vec<(u64, u64, String)>>,
    sent: Mutex<Vec<Sent>>,
    history: HashMap<u64, Vec<HistoryEntry>>,
    history_calls: Mutex<Vec<(u64, Option<u64>, Option<usize>)>>,
    fail_history: bool,
    downloads: HashMap<String, Vec<u8>>,
    downloaded: Mutex<Vec<String>>,
    typing: AtomicUsize,
}

impl FakePlatform {
    fn new(thread_behavior: ThreadBehavior) -> Self {
        Self {
            thread_behavior,
            created: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            history: HashMap::new(),
            history_calls: Mutex::new(Vec::new()),
            fail_history: false,
            downloads: HashMap::new(),
            downloaded: Mutex::new(Vec::new()),
            typing: AtomicUsize::new(0),
        }
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn create_thread(
        &self,
        channel_id: u64,
        message_id: u64,
        name: &str,
        _auto_archive_minutes: u16,
    ) -> Result<ThreadRef, ThreadError> {
        match self.thread_behavior {
            ThreadBehavior::Create => {
                self.created
                    .lock()
                    .unwrap()
                    .push((channel_id, message_id, name.to_string()));
                Ok(ThreadRef {
                    id: NEW_THREAD,
                    name: name.to_string(),
                    parent_name: None,
                })
            }
            ThreadBehavior::Forbidden => Err(ThreadError::Forbidden),
            ThreadBehavior::Fail => Err(ThreadError::Other("rate limited".into())),
        }
    }

    async fn send(&self, channel_id: u64, text: &str, reply_to: Option<u64>) -> Result<()> {
        self.sent.lock().unwrap().push(Sent {
            channel_id,
            text: text.to_string(),
            reply_to,
        });
        Ok(())
    }

    async fn history(
        &self,
        thread_id: u64,
        before: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>> {
        self.history_calls
            .lock()
            .unwrap()
            .push((thread_id, before, limit));
        if self.fail_history {
            bail!("history unavailable");
        }
        let all = self.history.get(&thread_id).cloned().unwrap_or_default();
        let older: Vec<HistoryEntry> = all
            .into_iter()
            .filter(|e| before.map_or(true, |b| e.message_id < b))
            .collect();
        let skip = limit.map_or(0, |l| older.len().saturating_sub(l));
        Ok(older.into_iter().skip(skip).collect())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        self.downloaded
            .lock()
            .unwrap()
            .push(attachment.filename.clone());
        match self.downloads.get(&attachment.url) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("404 for {}", attachment.url),
        }
    }

    fn start_typing(&self, _channel_id: u64) -> TypingGuard {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Box::new(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

struct Fixture {
    responder: Responder,
    completion: Arc<RecordingCompletion>,
    embedder: Arc<KeywordEmbedder>,
    _docs: TempDir,
}

async fn seeded_rag() -> (RagStore, Arc<KeywordEmbedder>) {
    let embedder = Arc::new(KeywordEmbedder {
        calls: AtomicUsize::new(0),
    });
    let rag = RagStore::new(
        Arc::new(InMemoryStore::new()),
        embedder.clone(),
        "reachy_mini",
    );
    rag.upsert(
        &["c1".to_string(), "c2".to_string(), "c3".to_string()],
        &[
            "To reset the robot, hold the power button for ten seconds.".to_string(),
            "A factory reset restores the default motor calibration.".to_string(),
            "Battery level is shown on the dashboard.".to_string(),
        ],
        &[
            json!({ "source": "docs/reset.md" }),
            json!({ "source": "docs/factory.md" }),
            json!({ "source": "docs/battery.md" }),
        ],
    )
    .await
    .unwrap();
    embedder.calls.store(0, Ordering::SeqCst);
    (rag, embedder)
}

async fn fixture(completion: RecordingCompletion, history_limit: usize) -> Fixture {
    let (rag, embedder) = seeded_rag().await;
    let completion = Arc::new(completion);
    let docs = TempDir::new().unwrap();
    let responder = Responder::new(
        rag,
        completion.clone(),
        history_limit,
        docs.path().to_path_buf(),
    );
    Fixture {
        responder,
        completion,
        embedder,
        _docs: docs,
    }
}

fn mention(content: &str) -> IncomingMessage {
    IncomingMessage {
        id: 1000,
        channel_id: CHANNEL,
        author_is_bot: false,
        in_guild: true,
        content: content.to_string(),
        mention_ids: vec![BOT],
        thread: None,
        attachments: Vec::new(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mention_creates_thread_and_answers_with_context() {
    let fx = fixture(RecordingCompletion::replying("- Hold power for 10s (docs/reset.md)"), 25).await;
    let platform = FakePlatform::new(ThreadBehavior::Create);

    let outcome = fx
        .responder
        .on_message(&platform, BOT, &mention("<@999> how do I reset the robot?"))
        .await;

    assert_eq!(
        outcome,
        Outcome::Answered {
            channel_id: NEW_THREAD,
            pieces: 1
        }
    );

    let created = platform.created.lock().unwrap().clone();
    assert_eq!(
        created,
        vec![(CHANNEL, 1000, "Reachy Mini: how do I reset the robot?".to_string())]
    );

    let requests = fx.completion.requests();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0];
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].role, Role::User);
    let user = &messages[1].content;
    assert!(user.starts_with("User message:\nhow do I reset the robot?\n\n"));
    assert!(user.contains("[Source: docs/reset.md]\nTo reset the robot"));
    assert!(user.contains("[Source: docs/factory.md]\nA factory reset"));
    assert!(!user.contains("<@999>"));
    assert!(user.ends_with("Answer as Reachy Mini."));

    assert_eq!(
        platform.sent(),
        vec![Sent {
            channel_id: NEW_THREAD,
            text: "- Hold power for 10s (docs/reset.md)".to_string(),
            reply_to: None,
        }]
    );
    assert_eq!(platform.typing.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ignores_bots_direct_messages_and_unmentioned() {
    let fx = fixture(RecordingCompletion::replying("hi"), 25).await;
    let platform = FakePlatform::new(ThreadBehavior::Create);

    let mut from_bot = mention("<@999> hello");
    from_bot.author_is_bot = true;
    let mut dm = mention("<@999> hello");
    dm.in_guild = false;
    let mut unmentioned = mention("just chatting");
    unmentioned.mention_ids.clear();

    for msg in [from_bot, dm, unmentioned] {
        assert_eq!(
            fx.responder.on_message(&platform, BOT, &msg).await,
            Outcome::Ignored
        );
    }
    assert!(platform.sent().is_empty());
    assert!(platform.created.lock().unwrap().is_empty());
    assert!(fx.completion.requests().is_empty());
}

#[tokio::test]
async fn test_forbidden_thread_reports_and_stops() {
    let fx = fixture(RecordingCompletion::replying("unused"), 25).await;
    let platform = FakePlatform::new(ThreadBehavior::Forbidden);

    let outcome = fx
        .responder
        .on_message(&platform, BOT, &mention("<@999> reset?"))
        .await;

    assert_eq!(outcome, Outcome::Forbidden);
    assert_eq!(
        platform.sent(),
        vec![Sent {
            channel_id: CHANNEL,
            text: NO_THREAD_PERMISSION.to_string(),
            reply_to: Some(1000),
        }]
    );
    assert!(fx.completion.requests().is_empty());
    assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_thread_failure_replies_inline_referencing_first_piece_only() {
    let long_reply = "r".repeat(4000);
    let fx = fixture(RecordingCompletion::replying(&long_reply), 25).await;
    let platform = FakePlatform::new(ThreadBehavior::Fail);

    let outcome = fx
        .responder
        .on_message(&platform, BOT, &mention("<@999> reset?"))
        .await;

    assert_eq!(
        outcome,
        Outcome::Answered {
            channel_id: CHANNEL,
            pieces: 3
        }
    );
    let sent = platform.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|s| s.channel_id == CHANNEL));
    assert_eq!(sent[0].reply_to, Some(1000));
    assert_eq!(sent[1].reply_to, None);
    assert_eq!(sent[2].reply_to, None);
    assert_eq!(sent[0].text.chars().count(), 1900);
    assert_eq!(
        sent.iter().map(|s| s.text.as_str()).collect::<String>(),
        long_reply
    );
    // Inline replies have no thread to read history from.
    assert!(platform.history_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_completion_error_sends_apology() {
    let fx = fixture(RecordingCompletion::failing(), 25).await;
    let platform = FakePlatform::new(ThreadBehavior::Create);

    let outcome = fx
        .responder
        .on_message(&platform, BOT, &mention("<@999> reset?"))
        .await;

    assert_eq!(outcome, Outcome::Failed);
    assert_eq!(
        platform.sent(),
        vec![Sent {
            channel_id: NEW_THREAD,
            text: APOLOGY.to_string(),
            reply_to: None,
        }]
    );
}

#[tokio::test]
async fn test_existing_thread_includes_recent_history() {
    let fx = fixture(RecordingCompletion::replying("ok"), 2).await;
    let mut platform = FakePlatform::new(ThreadBehavior::Create);
    let thread = ThreadRef {
        id: 77,
        name: "Reachy Mini: motor noise".into(),
        parent_name: Some("support".into()),
    };
    platform.history.insert(
        77,
        vec![
            HistoryEntry { message_id: 1, author_is_bot: false, content: "first".into() },
            HistoryEntry { message_id: 2, author_is_bot: true, content: "second".into() },
            HistoryEntry { message_id: 3, author_is_bot: false, content: "third".into() },
            HistoryEntry { message_id: 1000, author_is_bot: false, content: "<@999> and now?".into() },
        ],
    );

    let mut msg = mention("<@999> and now?");
    msg.channel_id = 77;
    msg.thread = Some(thread);

    let outcome = fx.responder.on_message(&platform, BOT, &msg).await;
    assert_eq!(
        outcome,
        Outcome::Answered {
            channel_id: 77,
            pieces: 1
        }
    );
    assert!(platform.created.lock().unwrap().is_empty());
    assert_eq!(
        platform.history_calls.lock().unwrap().clone(),
        vec![(77, Some(1000), Some(2))]
    );

    let user = fx.completion.requests()[0][1].content.clone();
    assert!(user.contains("Thread history:\nassistant: second\nuser: third\n\n"));
    assert!(!user.contains("first"));
}

#[tokio::test]
async fn test_history_error_still_answers_without_history() {
    let fx = fixture(RecordingCompletion::replying("ok"), 25).await;
    let mut platform = FakePlatform::new(ThreadBehavior::Create);
    platform.fail_history = true;

    let mut msg = mention("<@999> battery dies fast");
    msg.channel_id = 77;
    msg.thread = Some(ThreadRef {
        id: 77,
        name: "Reachy Mini: battery".into(),
        parent_name: Some("support".into()),
    });

    let outcome = fx.responder.on_message(&platform, BOT, &msg).await;
    assert_eq!(
        outcome,
        Outcome::Answered {
            channel_id: 77,
            pieces: 1
        }
    );
    assert_eq!(platform.history_calls.lock().unwrap().len(), 1);
    let user = fx.completion.requests()[0][1].content.clone();
    assert!(!user.contains("Thread history:"));
    assert!(user.contains("[Source: docs/battery.md]"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mentions_limited_to_permits() {
    let (rag, _) = seeded_rag().await;
    let completion = Arc::new(SlowCompletion {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
    });
    let docs = TempDir::new().unwrap();
    let responder = Responder::new(rag, completion.clone(), 25, docs.path().to_path_buf());
    let platform = Arc::new(FakePlatform::new(ThreadBehavior::Create));

    let mut tasks = Vec::new();
    for i in 0..10u64 {
        let responder = responder.clone();
        let platform = platform.clone();
        tasks.push(tokio::spawn(async move {
            let mut msg = mention("<@999> motor reset?");
            msg.id = 2000 + i;
            responder.on_message(platform.as_ref(), BOT, &msg).await
        }));
    }
    for task in tasks {
        assert!(matches!(task.await.unwrap(), Outcome::Answered { .. }));
    }

    assert_eq!(completion.done.load(Ordering::SeqCst), 10);
    let peak = completion.peak.load(Ordering::SeqCst);
    assert!(peak <= MAX_CONCURRENT, "peak in-flight was {peak}");
    assert!(peak > 1, "requests never overlapped");
    assert_eq!(platform.sent().len(), 10);
    assert_eq!(platform.created.lock().unwrap().len(), 10);
}

#[tokio::test]
async fn test_text_attachments_appended() {
    let fx = fixture(RecordingCompletion::replying("ok"), 25).await;
    let mut platform = FakePlatform::new(ThreadBehavior::Create);
    platform
        .downloads
        .insert("u/crash.log".into(), b"motor error 42".to_vec());
    platform
        .downloads
        .insert("u/notes".into(), b"battery at 3%".to_vec());

    let mut msg = mention("<@999> motor stopped");
    msg.attachments = vec![
        AttachmentRef {
            filename: "crash.log".into(),
            size: 14,
            content_type: None,
            url: "u/crash.log".into(),
        },
        AttachmentRef {
            filename: "photo.png".into(),
            size: 10,
            content_type: Some("image/png".into()),
            url: "u/photo.png".into(),
        },
        AttachmentRef {
            filename: "huge.txt".into(),
            size: 2_000_000,
            content_type: Some("text/plain".into()),
            url: "u/huge.txt".into(),
        },
        AttachmentRef {
            filename: "missing.md".into(),
            size: 5,
            content_type: None,
            url: "u/missing.md".into(),
        },
        AttachmentRef {
            filename: "notes".into(),
            size: 13,
            content_type: Some("text/plain".into()),
            url: "u/notes".into(),
        },
    ];

    fx.responder.on_message(&platform, BOT, &msg).await;

    assert_eq!(
        platform.downloaded.lock().unwrap().clone(),
        vec!["crash.log", "missing.md", "notes"]
    );
    let user = fx.completion.requests()[0][1].content.clone();
    assert!(user.starts_with(
        "User message:\nmotor stopped\n\n[Attachments]\nmotor error 42\n\nbattery at 3%\n\n"
    ));
}

#[tokio::test]
async fn test_mention_only_message_has_no_retrieval() {
    let fx = fixture(RecordingCompletion::replying("Hi! What's wrong with your robot?"), 25).await;
    let platform = FakePlatform::new(ThreadBehavior::Create);

    fx.responder
        .on_message(&platform, BOT, &mention("<@999>"))
        .await;

    assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        platform.created.lock().unwrap()[0].2,
        "Reachy Mini: Conversation"
    );
    let user = fx.completion.requests()[0][1].content.clone();
    assert!(user.contains("Retrieved context:\n(no context found)"));
}

#[tokio::test]
async fn test_save_thread() {
    let fx = fixture(RecordingCompletion::replying("unused"), 25).await;
    let mut platform = FakePlatform::new(ThreadBehavior::Create);
    let thread = ThreadRef {
        id: 88,
        name: "Reachy Mini: wifi drops".into(),
        parent_name: Some("support".into()),
    };

    assert_eq!(
        fx.responder.save_thread(&platform, None).await.unwrap(),
        SaveOutcome::NotInThread
    );
    assert_eq!(
        fx.responder.save_thread(&platform, Some(&thread)).await.unwrap(),
        SaveOutcome::Empty
    );

    platform.history.insert(
        88,
        vec![
            HistoryEntry { message_id: 1, author_is_bot: false, content: "wifi drops".into() },
            HistoryEntry { message_id: 2, author_is_bot: true, content: "Move closer.".into() },
        ],
    );
    let outcome = fx.responder.save_thread(&platform, Some(&thread)).await.unwrap();
    let SaveOutcome::Saved(path) = outcome else {
        panic!("expected saved transcript, got {outcome:?}");
    };
    assert!(path.ends_with("threads/Reachy_Mini_wifi_drops.md"));
    let body = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        body,
        "# Reachy Mini: wifi drops\nThread ID: 88\nParent channel: support\n\nuser: wifi drops\nassistant: Move closer."
    );
    assert_eq!(
        platform.history_calls.lock().unwrap().last().cloned(),
        Some((88, None, None))
    );
}
