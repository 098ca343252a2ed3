//! Chat actions
//!
//! Local writes for one channel. Sends and reactions are optimistic: the
//! store shows them unsynced right away and the reconciled event confirms
//! them later. A write the runtime rejects is rolled back.

use chrono::Utc;
use flux_core::predicates::{CARD_HIDDEN, EDITED_TO, HAS_MESSAGE, REACTION, REPLY_TO};
use flux_core::{Link, LinkAdapter, LinkQuery, Literal, PerspectiveId};
use serde_json::Value;
use std::sync::Arc;

use crate::delta::MessageDelta;
use crate::error::SyncError;
use crate::message::{emoji_content, emoji_target, new_message_id, Message, MessageEdit, Reaction};
use crate::store::MessageStore;

/// Writes to one channel on behalf of the local agent.
#[derive(Clone)]
pub struct ChatActions {
    adapter: Arc<dyn LinkAdapter>,
    perspective: PerspectiveId,
    channel: String,
    me: String,
    store: MessageStore,
}

impl ChatActions {
    /// Actions for `channel`, authored by `me`.
    pub fn new(
        adapter: Arc<dyn LinkAdapter>,
        perspective: PerspectiveId,
        channel: impl Into<String>,
        me: impl Into<String>,
        store: MessageStore,
    ) -> Self {
        Self {
            adapter,
            perspective,
            channel: channel.into(),
            me: me.into(),
            store,
        }
    }

    /// Send a message.
    pub async fn send_message(&self, body: &str) -> Result<Message, SyncError> {
        self.send(body, None).await
    }

    /// Send a reply to `parent_id`.
    pub async fn send_reply(&self, body: &str, parent_id: &str) -> Result<Message, SyncError> {
        self.send(body, Some(parent_id)).await
    }

    async fn send(&self, body: &str, reply_to: Option<&str>) -> Result<Message, SyncError> {
        let id = new_message_id(body);
        let mut message = Message::new(&id, &self.me, Utc::now(), false);
        message.reply_to = reply_to.map(str::to_string);
        self.store
            .apply(MessageDelta::MessageAdded(message.clone()))
            .await;

        let channel_link = Link::new(self.channel.clone(), HAS_MESSAGE, id.clone());
        let sent = self.adapter.add_link(&self.perspective, channel_link.clone()).await;
        if let Err(e) = sent {
            tracing::warn!(perspective = %self.perspective, channel = %self.channel, error = %e, "message send failed");
            self.store
                .apply(MessageDelta::MessageRemoved { message_id: id })
                .await;
            return Err(e.into());
        }

        if let Some(parent) = reply_to {
            let reply_link = Link::new(id.clone(), REPLY_TO, parent);
            if let Err(source) = self.adapter.add_link(&self.perspective, reply_link.clone()).await {
                tracing::warn!(perspective = %self.perspective, id = %id, error = %source, "reply link failed");
                self.store
                    .apply(MessageDelta::ReplyCleared {
                        message_id: id.clone(),
                    })
                    .await;
                return Err(SyncError::PartialSend {
                    message_id: id,
                    sent: channel_link,
                    failed: reply_link,
                    source,
                });
            }
        }
        Ok(message)
    }

    /// Edit a loaded message. Applied once the runtime accepts the link.
    pub async fn edit_message(&self, message_id: &str, body: &str) -> Result<MessageEdit, SyncError> {
        self.require(message_id).await?;
        let link = self
            .adapter
            .add_link(
                &self.perspective,
                Link::new(message_id, EDITED_TO, Literal::from_string(body).to_url()),
            )
            .await?;
        let edit = MessageEdit::from_link(&link);
        self.store
            .apply(MessageDelta::EditAdded {
                message_id: message_id.to_string(),
                edit: edit.clone(),
            })
            .await;
        Ok(edit)
    }

    /// React with an emoji code point (hex, with or without `emoji://`).
    pub async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<(), SyncError> {
        let content = emoji_content(emoji).to_string();
        self.store
            .apply(MessageDelta::ReactionAdded {
                message_id: message_id.to_string(),
                reaction: Reaction {
                    author: self.me.clone(),
                    content: content.clone(),
                    timestamp: Utc::now(),
                    synced: false,
                },
            })
            .await;

        let added = self
            .adapter
            .add_link(&self.perspective, Link::new(message_id, REACTION, emoji_target(emoji)))
            .await;
        if let Err(e) = added {
            tracing::warn!(perspective = %self.perspective, id = message_id, error = %e, "reaction failed");
            self.store
                .apply(MessageDelta::ReactionRemoved {
                    message_id: message_id.to_string(),
                    author: self.me.clone(),
                    content,
                })
                .await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove the local agent's reaction links for `emoji`.
    pub async fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<(), SyncError> {
        let query = LinkQuery::new()
            .source(message_id)
            .predicate(REACTION)
            .target(emoji_target(emoji));
        let own: Vec<_> = self
            .adapter
            .query_links(&self.perspective, &query)
            .await?
            .into_iter()
            .filter(|link| link.author == self.me)
            .collect();
        if !own.is_empty() {
            self.adapter.remove_links(&self.perspective, &own).await?;
        }
        self.store
            .apply(MessageDelta::ReactionRemoved {
                message_id: message_id.to_string(),
                author: self.me.clone(),
                content: emoji_content(emoji).to_string(),
            })
            .await;
        Ok(())
    }

    /// Hide the preview card of a loaded message.
    pub async fn hide_embeds(&self, message_id: &str) -> Result<(), SyncError> {
        self.require(message_id).await?;
        self.adapter
            .add_link(
                &self.perspective,
                Link::new(message_id, CARD_HIDDEN, Literal::from_value(&Value::Bool(true)).to_url()),
            )
            .await?;
        self.store
            .apply(MessageDelta::CardHidden {
                message_id: message_id.to_string(),
                hidden: true,
            })
            .await;
        Ok(())
    }

    async fn require(&self, message_id: &str) -> Result<(), SyncError> {
        match self.store.message(message_id).await {
            Some(_) => Ok(()),
            None => Err(SyncError::unknown_message(message_id)),
        }
    }
}

impl std::fmt::Debug for ChatActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatActions")
            .field("perspective", &self.perspective)
            .field("channel", &self.channel)
            .field("me", &self.me)
            .finish_non_exhaustive()
    }
}
