//! Message loading
//!
//! Loads a channel's messages with one compiled entry query and merges them
//! into a [`MessageStore`]. Used for the initial page, for paging backwards,
//! and for the full resync after a schema change.

use chrono::{DateTime, Utc};
use flux_core::predicates::{CARD_HIDDEN, EDITED_TO, HAS_MESSAGE, IS_POPULAR, REACTION, REPLY_TO};
use flux_core::{FluxConfig, LinkAdapter, PerspectiveId};
use flux_query::{graph, query_entries, EntryQuery, EntryRow};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use crate::delta::MessageDelta;
use crate::error::SyncError;
use crate::message::{emoji_content, literal_text, Message, MessageEdit, Reaction};
use crate::store::MessageStore;

/// One page of messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    /// Loaded messages
    pub messages: Vec<Message>,
    /// Older messages exist beyond this page
    pub has_more: bool,
}

/// Loads one channel's messages.
#[derive(Clone)]
pub struct MessageLoader {
    adapter: Arc<dyn LinkAdapter>,
    perspective: PerspectiveId,
    channel: String,
    page_limit: usize,
    concurrency: usize,
}

impl MessageLoader {
    /// Loader for `channel` in `perspective`.
    pub fn new(
        adapter: Arc<dyn LinkAdapter>,
        perspective: PerspectiveId,
        channel: impl Into<String>,
        config: &FluxConfig,
    ) -> Self {
        Self {
            adapter,
            perspective,
            channel: channel.into(),
            page_limit: config.query.page_limit.max(1),
            concurrency: config.repository.resolve_concurrency.max(1),
        }
    }

    /// Channel this loader reads.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The entry query for the channel's messages.
    pub fn entry_query(&self) -> EntryQuery {
        EntryQuery::new(HAS_MESSAGE)
            .source(self.channel.clone())
            .property("reactions", REACTION)
            .property("reply_to", REPLY_TO)
            .property("edits", EDITED_TO)
            .property("card_hidden", CARD_HIDDEN)
            .property("popular", IS_POPULAR)
    }

    /// The newest `page_limit` messages sent before `before` (or at all).
    ///
    /// The bound is part of the compiled rule, so older pages never pull
    /// newer messages out of the runtime. The rule compares milliseconds;
    /// the exact cut is applied to the decoded rows.
    ///
    /// # Errors
    ///
    /// A missing schema procedure surfaces as `QueryError::SubjectNotRegistered`
    /// (see [`SyncError::is_not_registered`]); callers should wait for the
    /// community to sync and retry once.
    pub async fn load(&self, before: Option<DateTime<Utc>>) -> Result<MessagePage, SyncError> {
        let query = match before {
            Some(before) => self.entry_query().until(before),
            None => self.entry_query(),
        };
        let rows = query_entries(&self.adapter, &self.perspective, &query)
            .await
            .map_err(|e| {
                let e = SyncError::from(e);
                if e.is_not_registered() {
                    tracing::warn!(
                        perspective = %self.perspective,
                        channel = %self.channel,
                        "community schema missing, wait for the community to sync"
                    );
                }
                e
            })?;

        let mut seen = HashSet::new();
        let mut messages: Vec<Message> = rows
            .iter()
            .filter(|row| seen.insert(row.id.clone()))
            .map(message_from_row)
            .filter(|message| before.map_or(true, |before| message.timestamp < before))
            .collect();
        messages.sort_by_key(|message| message.timestamp);

        let has_more = messages.len() > self.page_limit;
        if has_more {
            messages.drain(..messages.len() - self.page_limit);
        }

        let messages = stream::iter(messages.into_iter().map(|message| self.check_popular(message)))
            .buffered(self.concurrency)
            .collect()
            .await;
        tracing::debug!(
            perspective = %self.perspective,
            channel = %self.channel,
            has_more,
            "loaded message page"
        );
        Ok(MessagePage { messages, has_more })
    }

    /// Load a page and merge it into `store`.
    pub async fn load_into(
        &self,
        store: &MessageStore,
        before: Option<DateTime<Utc>>,
    ) -> Result<MessagePage, SyncError> {
        let page = self.load(before).await?;
        store
            .apply(MessageDelta::MessagesLoaded {
                messages: page.messages.clone(),
                replace: false,
            })
            .await;
        Ok(page)
    }

    /// Replace the store's messages with the newest page.
    pub async fn resync(&self, store: &MessageStore) -> Result<usize, SyncError> {
        tracing::info!(perspective = %self.perspective, channel = %self.channel, "resyncing messages");
        let page = self.load(None).await?;
        let count = page.messages.len();
        store
            .apply(MessageDelta::MessagesLoaded {
                messages: page.messages,
                replace: true,
            })
            .await;
        Ok(count)
    }

    async fn check_popular(&self, mut message: Message) -> Message {
        if message.popular {
            return message;
        }
        match graph::is_popular(self.adapter.as_ref(), &self.perspective, &message.id).await {
            Ok(popular) => message.popular = popular,
            Err(e) => {
                tracing::debug!(id = %message.id, error = %e, "popularity check failed, assuming not popular");
            }
        }
        message
    }
}

impl std::fmt::Debug for MessageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLoader")
            .field("perspective", &self.perspective)
            .field("channel", &self.channel)
            .field("page_limit", &self.page_limit)
            .finish_non_exhaustive()
    }
}

/// Build a message from a decoded entry row.
pub fn message_from_row(row: &EntryRow) -> Message {
    let values = |name: &str| row.property(name).map(|column| column.values()).unwrap_or_default();

    let mut message = Message::new(&row.id, &row.author, row.timestamp, true);
    for value in values("reactions") {
        let content = emoji_content(&value.content);
        if !message.reactions.iter().any(|r| r.same_as(&value.author, content)) {
            message.reactions.push(Reaction {
                author: value.author.clone(),
                content: content.to_string(),
                timestamp: value.timestamp,
                synced: true,
            });
        }
    }
    message.edits = values("edits")
        .iter()
        .map(|value| MessageEdit {
            author: value.author.clone(),
            content: literal_text(&value.content),
            timestamp: value.timestamp,
            synced: true,
        })
        .collect();
    message.edits.sort_by_key(|edit| edit.timestamp);
    message.reply_to = row
        .property("reply_to")
        .and_then(|column| column.latest())
        .map(|value| value.content.clone());
    message.card_hidden = !values("card_hidden").is_empty();
    message.popular = !values("popular").is_empty();
    message
}
