//! Chat message records
//!
//! A message is the target of a `channel -flux://has_message-> id` link. The
//! id is a JSON literal carrying the body and a nonce, so the content travels
//! with the link and needs no extra lookup.

use chrono::{DateTime, Utc};
use flux_core::predicates::EMOJI_SCHEME;
use flux_core::{LinkExpression, Literal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// A reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// Reacting agent
    pub author: String,
    /// Emoji code point in hex, without the `emoji://` scheme
    pub content: String,
    /// Link timestamp, or the local time of an optimistic write
    pub timestamp: DateTime<Utc>,
    /// Whether the runtime has confirmed the link
    pub synced: bool,
}

impl Reaction {
    /// Reaction carried by a `message -flux://has_reaction-> emoji://..` link.
    pub fn from_link(link: &LinkExpression) -> Self {
        Self {
            author: link.author.clone(),
            content: emoji_content(link.target()).to_string(),
            timestamp: link.timestamp,
            synced: true,
        }
    }

    /// Same agent and same emoji.
    pub fn same_as(&self, author: &str, content: &str) -> bool {
        self.author == author && self.content == content
    }
}

/// One edit of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEdit {
    /// Editing agent
    pub author: String,
    /// Replacement body
    pub content: String,
    /// Link timestamp, or the local time of an optimistic write
    pub timestamp: DateTime<Utc>,
    /// Whether the runtime has confirmed the link
    pub synced: bool,
}

impl MessageEdit {
    /// Edit carried by a `message -flux://edited_to-> literal` link.
    pub fn from_link(link: &LinkExpression) -> Self {
        Self {
            author: link.author.clone(),
            content: literal_text(link.target()),
            timestamp: link.timestamp,
            synced: true,
        }
    }
}

/// A chat message as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id (the target of the channel link)
    pub id: String,
    /// Sending agent
    pub author: String,
    /// Original body
    pub content: String,
    /// Send time
    pub timestamp: DateTime<Utc>,
    /// Parent message when this is a reply
    pub reply_to: Option<String>,
    /// Reactions, one per (author, emoji)
    pub reactions: Vec<Reaction>,
    /// Edits in arrival order
    pub edits: Vec<MessageEdit>,
    /// Neighbourhood preview card hidden
    pub card_hidden: bool,
    /// Marked popular by the community rule
    pub popular: bool,
    /// Whether the runtime has confirmed the channel link
    pub synced: bool,
}

impl Message {
    /// Message announced by a `channel -flux://has_message-> id` link.
    pub fn from_link(link: &LinkExpression) -> Self {
        Self::new(link.target(), &link.author, link.timestamp, true)
    }

    /// Message with no reactions, edits or flags.
    pub fn new(id: &str, author: &str, timestamp: DateTime<Utc>, synced: bool) -> Self {
        Self {
            id: id.to_string(),
            author: author.to_string(),
            content: message_body(id),
            timestamp,
            reply_to: None,
            reactions: Vec::new(),
            edits: Vec::new(),
            card_hidden: false,
            popular: false,
            synced,
        }
    }

    /// Body after the latest edit.
    pub fn current_content(&self) -> &str {
        self.edits
            .iter()
            .max_by_key(|edit| edit.timestamp)
            .map_or(self.content.as_str(), |edit| edit.content.as_str())
    }
}

/// A fresh message id carrying `body`.
pub fn new_message_id(body: &str) -> String {
    Literal::Json(json!({
        "body": body,
        "nonce": Uuid::new_v4().to_string(),
    }))
    .to_url()
}

/// Body encoded in a message id. Ids that are not literals are returned as is.
pub fn message_body(id: &str) -> String {
    match Literal::from_url(id) {
        Ok(Literal::Json(Value::Object(object))) => match object.get("body") {
            Some(Value::String(body)) => body.clone(),
            Some(other) => other.to_string(),
            None => id.to_string(),
        },
        Ok(literal) => literal_value_text(&literal),
        Err(_) => id.to_string(),
    }
}

/// Text of a literal target, or the target itself.
pub fn literal_text(target: &str) -> String {
    Literal::from_url(target).map_or_else(|_| target.to_string(), |literal| literal_value_text(&literal))
}

fn literal_value_text(literal: &Literal) -> String {
    match literal.to_value() {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Emoji code point of a reaction target.
pub fn emoji_content(target: &str) -> &str {
    target.strip_prefix(EMOJI_SCHEME).unwrap_or(target)
}

/// Reaction target for an emoji code point.
pub fn emoji_target(content: &str) -> String {
    format!("{EMOJI_SCHEME}{}", emoji_content(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::Link;

    #[test]
    fn test_message_id_carries_body() {
        let id = new_message_id("hello \"world\"");
        assert!(id.starts_with("literal://json:"));
        assert_eq!(message_body(&id), "hello \"world\"");
        assert_ne!(new_message_id("same"), new_message_id("same"));
    }

    #[test]
    fn test_body_of_other_ids() {
        assert_eq!(message_body("literal://string:hi%20there"), "hi there");
        assert_eq!(message_body("expr://abc"), "expr://abc");
    }

    #[test]
    fn test_reaction_strips_scheme() {
        let link = LinkExpression::new(
            "did:a",
            Utc::now(),
            Link::new("m1", "flux://has_reaction", "emoji://1f44d"),
        );
        let reaction = Reaction::from_link(&link);
        assert_eq!(reaction.content, "1f44d");
        assert!(reaction.same_as("did:a", "1f44d"));
        assert_eq!(emoji_target("1f44d"), "emoji://1f44d");
        assert_eq!(emoji_target("emoji://1f44d"), "emoji://1f44d");
    }

    #[test]
    fn test_current_content_follows_latest_edit() {
        let mut message = Message::new("literal://string:first", "did:a", Utc::now(), true);
        assert_eq!(message.current_content(), "first");
        message.edits.push(MessageEdit {
            author: "did:a".into(),
            content: "second".into(),
            timestamp: Utc::now(),
            synced: true,
        });
        assert_eq!(message.current_content(), "second");
    }
}
