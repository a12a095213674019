//! Live subscriptions over the store.
//!
//! A [`FeedSource`] is polled on an interval by a background task that
//! forwards its events through a channel. The returned [`Subscription`]
//! stops the task when cancelled or when its last clone is dropped; the task
//! also stops once the receiving end of the channel goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::chat::{ChatMessage, PANIC_NOTIFICATION_TITLE};
use crate::device::{LocalNotification, Notifier};
use crate::error::Result;
use crate::report::{Category, Comment, Report};
use crate::storage::SharedStorage;

/// Events buffered per subscription before the poller waits for the consumer.
const FEED_BUFFER: usize = 64;

/// Body used for a panic notification whose message has no text.
const PANIC_FALLBACK_BODY: &str = "New emergency message";

/// Something that can be polled for new events.
#[async_trait::async_trait]
pub trait FeedSource: Send + 'static {
    /// What the feed emits.
    type Event: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Events that appeared since the previous poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read. The poller logs it and
    /// tries again on the next tick.
    async fn poll(&mut self) -> Result<Vec<Self::Event>>;
}

#[derive(Debug)]
struct FeedState {
    running: AtomicBool,
    stop: Notify,
}

impl FeedState {
    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }
}

#[derive(Debug)]
struct CancelOnDrop(Arc<FeedState>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Handle to a running feed.
///
/// Clones share the same feed. Dropping the last clone cancels it.
#[derive(Debug, Clone)]
pub struct Subscription {
    name: &'static str,
    state: Arc<FeedState>,
    _guard: Arc<CancelOnDrop>,
}

impl Subscription {
    fn new(name: &'static str) -> Self {
        let state = Arc::new(FeedState {
            running: AtomicBool::new(true),
            stop: Notify::new(),
        });
        Self {
            name,
            _guard: Arc::new(CancelOnDrop(Arc::clone(&state))),
            state,
        }
    }

    /// Name of the feed.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the feed, interrupting a pending tick, poll or send.
    pub fn cancel(&self) {
        debug!(feed = self.name, "Cancelling feed");
        self.state.stop();
    }

    /// Whether the feed is still polling.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

/// Start polling `source` every `poll_interval`.
///
/// The first poll happens immediately. Must be called within a tokio runtime.
pub fn subscribe<S: FeedSource>(
    mut source: S,
    poll_interval: Duration,
) -> (Subscription, mpsc::Receiver<S::Event>) {
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let subscription = Subscription::new(source.name());
    let state = Arc::clone(&subscription.state);
    let name = subscription.name;

    tokio::spawn(async move {
        debug!(
            feed = name,
            interval_ms = poll_interval.as_millis(),
            "Starting feed"
        );
        tokio::select! {
            () = state.stop.notified() => {}
            () = pump(&mut source, &tx, poll_interval, name) => {}
        }

        state.running.store(false, Ordering::SeqCst);
        debug!(feed = name, "Feed stopped");
    });

    (subscription, rx)
}

/// Poll and forward events until the receiver goes away.
async fn pump<S: FeedSource>(
    source: &mut S,
    tx: &mpsc::Sender<S::Event>,
    poll_interval: Duration,
    name: &'static str,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match source.poll().await {
            Ok(events) => {
                trace!(feed = name, count = events.len(), "Polled feed");
                for event in events {
                    if tx.send(event).await.is_err() {
                        debug!(feed = name, "Feed receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => warn!(feed = name, error = %e, "Feed poll failed"),
        }
    }
}

/// The full report list after a change.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportsChanged {
    /// Store revision the list was read at.
    pub revision: i64,
    /// Reports, newest first.
    pub reports: Vec<Report>,
}

/// Emits the report list at start and whenever a report or vote is written.
#[derive(Debug)]
pub struct ReportsFeed {
    storage: SharedStorage,
    category: Option<Category>,
    last_revision: Option<i64>,
}

impl ReportsFeed {
    /// Follow all reports, or only those of `category`.
    #[must_use]
    pub fn new(storage: SharedStorage, category: Option<Category>) -> Self {
        Self {
            storage,
            category,
            last_revision: None,
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for ReportsFeed {
    type Event = ReportsChanged;

    fn name(&self) -> &'static str {
        "reports"
    }

    async fn poll(&mut self) -> Result<Vec<ReportsChanged>> {
        let storage = self.storage.lock().await;
        let revision = storage.reports_revision()?;
        if self.last_revision == Some(revision) {
            return Ok(Vec::new());
        }

        let reports = match self.category {
            Some(category) => storage.reports_by_category(category)?,
            None => storage.reports()?,
        };
        self.last_revision = Some(revision);
        Ok(vec![ReportsChanged { revision, reports }])
    }
}

/// Emits every message of a zone in send order, history first.
#[derive(Debug)]
pub struct ChatFeed {
    storage: SharedStorage,
    zone: String,
    last_id: i64,
}

impl ChatFeed {
    /// Follow a zone from its first message.
    #[must_use]
    pub fn new(storage: SharedStorage, zone: impl Into<String>) -> Self {
        Self {
            storage,
            zone: zone.into(),
            last_id: 0,
        }
    }

    /// Skip messages up to and including `last_id`.
    #[must_use]
    pub fn after(mut self, last_id: i64) -> Self {
        self.last_id = last_id;
        self
    }
}

#[async_trait::async_trait]
impl FeedSource for ChatFeed {
    type Event = ChatMessage;

    fn name(&self) -> &'static str {
        "chat"
    }

    async fn poll(&mut self) -> Result<Vec<ChatMessage>> {
        let messages = self
            .storage
            .lock()
            .await
            .messages_after(&self.zone, self.last_id)?;
        if let Some(last) = messages.last() {
            self.last_id = last.id;
        }
        Ok(messages)
    }
}

/// Emits every comment of a report in posting order, history first.
#[derive(Debug)]
pub struct CommentsFeed {
    storage: SharedStorage,
    report_id: i64,
    last_id: i64,
}

impl CommentsFeed {
    /// Follow a report's comments from the first one.
    #[must_use]
    pub fn new(storage: SharedStorage, report_id: i64) -> Self {
        Self {
            storage,
            report_id,
            last_id: 0,
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for CommentsFeed {
    type Event = Comment;

    fn name(&self) -> &'static str {
        "comments"
    }

    async fn poll(&mut self) -> Result<Vec<Comment>> {
        let comments = self
            .storage
            .lock()
            .await
            .comments_after(self.report_id, self.last_id)?;
        if let Some(last) = comments.last() {
            self.last_id = last.id;
        }
        Ok(comments)
    }
}

/// Raises a local notification for each panic alert posted to a zone.
///
/// Only messages newer than the watcher's starting point notify, so history
/// delivered by a [`ChatFeed`] stays silent.
pub struct PanicWatcher {
    notifier: Arc<dyn Notifier>,
    since_id: i64,
}

impl std::fmt::Debug for PanicWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanicWatcher")
            .field("since_id", &self.since_id)
            .finish_non_exhaustive()
    }
}

impl PanicWatcher {
    /// Notify for panic messages with an id above `since_id`.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, since_id: i64) -> Self {
        Self { notifier, since_id }
    }

    /// Start watching a zone from its current last message.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn for_zone(
        storage: &SharedStorage,
        zone: &str,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let since_id = storage.lock().await.latest_message_id(zone)?;
        Ok(Self::new(notifier, since_id))
    }

    /// Handle one chat event. Returns whether a notification was raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the notifier fails.
    pub async fn handle(&mut self, message: &ChatMessage) -> Result<bool> {
        if message.id <= self.since_id || !message.is_panic() {
            return Ok(false);
        }
        self.since_id = message.id;

        let body = if message.text.trim().is_empty() {
            PANIC_FALLBACK_BODY.to_string()
        } else {
            message.text.clone()
        };
        debug!(message_id = message.id, zone = %message.zone, "Panic alert received");
        self.notifier
            .schedule_local(LocalNotification::new(PANIC_NOTIFICATION_TITLE, body))
            .await?;
        Ok(true)
    }

    /// Consume a chat event stream in the background.
    ///
    /// The task ends when the stream closes and yields the number of
    /// notifications raised.
    #[must_use]
    pub fn spawn(mut self, mut events: mpsc::Receiver<ChatMessage>) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut raised = 0;
            while let Some(message) = events.recv().await {
                match self.handle(&message).await {
                    Ok(true) => raised += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Failed to raise panic notification"),
                }
            }
            raised
        })
    }
}
