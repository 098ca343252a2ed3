//! Message Deltas and State Transitions
//!
//! Every change to the keyed message collection is a [`MessageDelta`] applied
//! by [`ChatState::apply`]. Transitions touch one entry (or merge a loaded
//! page) and never rebuild the collection from scratch.
//!
//! Transitions are idempotent: applying the same delta twice leaves the same
//! state as applying it once. Deltas that name a message the state does not
//! hold never insert it, so a late lookup cannot resurrect a removed message.
//!
//! Links hang off a message independently of its channel link, so a
//! reaction, edit, reply or hide flag may arrive first. Those deltas are
//! held per message id and replayed when the message is added or loaded.
//! Popularity results are not held; they are recomputed.

use flux_core::LinkExpression;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::message::{Message, MessageEdit, Reaction};

/// Incremental change to the message collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDelta {
    /// A message was sent, or its optimistic copy was confirmed
    MessageAdded(Message),
    /// A page of messages was loaded; `replace` drops everything else
    MessagesLoaded {
        /// Loaded messages
        messages: Vec<Message>,
        /// Full resync
        replace: bool,
    },
    /// The channel link of a message was removed
    MessageRemoved {
        /// Message id
        message_id: String,
    },
    /// A reaction was added, or its optimistic copy was confirmed
    ReactionAdded {
        /// Message id
        message_id: String,
        /// The reaction
        reaction: Reaction,
    },
    /// A reaction link was removed
    ReactionRemoved {
        /// Message id
        message_id: String,
        /// Reacting agent
        author: String,
        /// Emoji code point
        content: String,
    },
    /// A message was edited
    EditAdded {
        /// Message id
        message_id: String,
        /// The edit
        edit: MessageEdit,
    },
    /// A message was marked as a reply
    ReplyLinked {
        /// Reply message id
        message_id: String,
        /// Replied-to message id
        parent_id: String,
    },
    /// A reply marker was withdrawn
    ReplyCleared {
        /// Message id
        message_id: String,
    },
    /// The preview card of a message was hidden or shown
    CardHidden {
        /// Message id
        message_id: String,
        /// New flag value
        hidden: bool,
    },
    /// The popularity of a message changed
    PopularityChanged {
        /// Message id
        message_id: String,
        /// New flag value
        popular: bool,
    },
    /// A schema program arrived; the collection must be reloaded
    SchemaChanged,
    /// An event matched no classification
    Unhandled(UnhandledEvent),
}

impl MessageDelta {
    /// Message the delta is about, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::MessageAdded(message) => Some(message.id.as_str()),
            Self::MessageRemoved { message_id }
            | Self::ReactionAdded { message_id, .. }
            | Self::ReactionRemoved { message_id, .. }
            | Self::EditAdded { message_id, .. }
            | Self::ReplyLinked { message_id, .. }
            | Self::ReplyCleared { message_id }
            | Self::CardHidden { message_id, .. }
            | Self::PopularityChanged { message_id, .. } => Some(message_id.as_str()),
            Self::MessagesLoaded { .. } | Self::SchemaChanged | Self::Unhandled(_) => None,
        }
    }
}

/// Direction of an unhandled link event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Link added
    Added,
    /// Link removed
    Removed,
}

/// A link event no classification matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhandledEvent {
    /// Added or removed
    pub kind: EventKind,
    /// The link
    pub link: LinkExpression,
}

/// Keyed message collection plus reconciliation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatState {
    messages: IndexMap<String, Message>,
    needs_resync: bool,
    unhandled: VecDeque<UnhandledEvent>,
    unhandled_capacity: usize,
    held: IndexMap<String, Vec<MessageDelta>>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChatState {
    /// Empty state keeping at most `unhandled_capacity` unhandled events.
    pub fn new(unhandled_capacity: usize) -> Self {
        Self {
            messages: IndexMap::new(),
            needs_resync: false,
            unhandled: VecDeque::new(),
            unhandled_capacity: unhandled_capacity.max(1),
            held: IndexMap::new(),
        }
    }

    /// One message.
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Messages keyed by id, in insertion order.
    pub fn messages(&self) -> &IndexMap<String, Message> {
        &self.messages
    }

    /// Messages sorted by send time, oldest first.
    pub fn sorted(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.messages.values().cloned().collect();
        messages.sort_by_key(|message| message.timestamp);
        messages
    }

    /// A schema change arrived since the last full load.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Recent unhandled events, oldest first.
    pub fn unhandled(&self) -> impl Iterator<Item = &UnhandledEvent> {
        self.unhandled.iter()
    }

    /// Deltas waiting for `id` to arrive.
    pub fn held(&self, id: &str) -> &[MessageDelta] {
        self.held.get(id).map_or(&[], Vec::as_slice)
    }

    /// Apply a delta. Returns whether the visible state changed; holding a
    /// delta for a message not yet seen does not count.
    pub fn apply(&mut self, delta: &MessageDelta) -> bool {
        if let Some(id) = holdable(delta) {
            if !self.messages.contains_key(id) {
                self.hold(id, delta);
                return false;
            }
        }
        if let MessageDelta::ReactionRemoved {
            message_id,
            author,
            content,
        } = delta
        {
            if !self.messages.contains_key(message_id) {
                self.release_reaction(message_id, author, content);
                return false;
            }
        }

        match delta {
            MessageDelta::MessageAdded(message) => self.add_message(message),
            MessageDelta::MessagesLoaded { messages, replace } => {
                let before = self.clone();
                if *replace {
                    self.messages.clear();
                    self.needs_resync = false;
                }
                for message in messages {
                    self.merge_loaded(message);
                    self.replay(&message.id);
                }
                *self != before
            }
            MessageDelta::MessageRemoved { message_id } => {
                self.held.shift_remove(message_id);
                self.messages.shift_remove(message_id).is_some()
            }
            MessageDelta::ReactionAdded {
                message_id,
                reaction,
            } => self.update(message_id, |message| add_reaction(message, reaction)),
            MessageDelta::ReactionRemoved {
                message_id,
                author,
                content,
            } => self.update(message_id, |message| {
                let before = message.reactions.len();
                message
                    .reactions
                    .retain(|reaction| !reaction.same_as(author, content));
                message.reactions.len() != before
            }),
            MessageDelta::EditAdded { message_id, edit } => {
                self.update(message_id, |message| add_edit(message, edit))
            }
            MessageDelta::ReplyLinked {
                message_id,
                parent_id,
            } => self.update(message_id, |message| {
                replace(&mut message.reply_to, Some(parent_id.clone()))
            }),
            MessageDelta::ReplyCleared { message_id } => {
                self.update(message_id, |message| replace(&mut message.reply_to, None))
            }
            MessageDelta::CardHidden { message_id, hidden } => {
                self.update(message_id, |message| replace(&mut message.card_hidden, *hidden))
            }
            MessageDelta::PopularityChanged {
                message_id,
                popular,
            } => self.update(message_id, |message| replace(&mut message.popular, *popular)),
            MessageDelta::SchemaChanged => replace(&mut self.needs_resync, true),
            MessageDelta::Unhandled(event) => {
                if self.unhandled.len() == self.unhandled_capacity {
                    self.unhandled.pop_front();
                }
                self.unhandled.push_back(event.clone());
                true
            }
        }
    }

    fn update(&mut self, id: &str, change: impl FnOnce(&mut Message) -> bool) -> bool {
        self.messages.get_mut(id).is_some_and(change)
    }

    fn hold(&mut self, id: &str, delta: &MessageDelta) {
        if let Some(waiting) = self.held.get_mut(id) {
            if !waiting.contains(delta) {
                waiting.push(delta.clone());
            }
            return;
        }
        if self.held.len() == self.unhandled_capacity {
            self.held.shift_remove_index(0);
        }
        self.held.insert(id.to_string(), vec![delta.clone()]);
    }

    fn release_reaction(&mut self, id: &str, author: &str, content: &str) {
        if let Some(waiting) = self.held.get_mut(id) {
            waiting.retain(|delta| {
                !matches!(delta, MessageDelta::ReactionAdded { reaction, .. } if reaction.same_as(author, content))
            });
            if waiting.is_empty() {
                self.held.shift_remove(id);
            }
        }
    }

    fn replay(&mut self, id: &str) {
        if let Some(waiting) = self.held.shift_remove(id) {
            for delta in &waiting {
                self.apply(delta);
            }
        }
    }

    fn add_message(&mut self, message: &Message) -> bool {
        match self.messages.get_mut(&message.id) {
            None => {
                self.messages.insert(message.id.clone(), message.clone());
                self.replay(&message.id);
                true
            }
            Some(existing) if message.synced && !existing.synced => {
                existing.synced = true;
                existing.timestamp = message.timestamp;
                existing.author.clone_from(&message.author);
                if message.reply_to.is_some() {
                    existing.reply_to.clone_from(&message.reply_to);
                }
                true
            }
            Some(_) => false,
        }
    }

    fn merge_loaded(&mut self, message: &Message) {
        match self.messages.get_mut(&message.id) {
            None => {
                self.messages.insert(message.id.clone(), message.clone());
            }
            Some(existing) => {
                let pending_reactions: Vec<Reaction> = existing
                    .reactions
                    .iter()
                    .filter(|r| !r.synced && !message.reactions.iter().any(|l| l.same_as(&r.author, &r.content)))
                    .cloned()
                    .collect();
                let pending_edits: Vec<MessageEdit> = existing
                    .edits
                    .iter()
                    .filter(|e| !e.synced)
                    .cloned()
                    .collect();
                *existing = message.clone();
                existing.reactions.extend(pending_reactions);
                for edit in pending_edits {
                    add_edit(existing, &edit);
                }
            }
        }
    }
}

/// Message id of a delta that is held until its message arrives.
fn holdable(delta: &MessageDelta) -> Option<&str> {
    match delta {
        MessageDelta::ReactionAdded { message_id, .. }
        | MessageDelta::EditAdded { message_id, .. }
        | MessageDelta::ReplyLinked { message_id, .. }
        | MessageDelta::CardHidden { message_id, .. } => Some(message_id.as_str()),
        _ => None,
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn add_reaction(message: &mut Message, reaction: &Reaction) -> bool {
    match message
        .reactions
        .iter_mut()
        .find(|existing| existing.same_as(&reaction.author, &reaction.content))
    {
        None => {
            message.reactions.push(reaction.clone());
            true
        }
        Some(existing) if reaction.synced && !existing.synced => {
            existing.synced = true;
            existing.timestamp = reaction.timestamp;
            true
        }
        Some(_) => false,
    }
}

fn add_edit(message: &mut Message, edit: &MessageEdit) -> bool {
    let same = |existing: &MessageEdit| existing.author == edit.author && existing.content == edit.content;
    if let Some(pending) = message
        .edits
        .iter_mut()
        .find(|existing| same(existing) && !existing.synced)
    {
        if !edit.synced {
            return false;
        }
        pending.synced = true;
        pending.timestamp = edit.timestamp;
        return true;
    }
    if message
        .edits
        .iter()
        .any(|existing| same(existing) && existing.timestamp == edit.timestamp)
    {
        return false;
    }
    message.edits.push(edit.clone());
    true
}
