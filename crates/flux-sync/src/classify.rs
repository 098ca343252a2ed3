//! Link classification
//!
//! Maps one link event to what it means for a channel's messages. Rules are
//! checked in priority order and the first match wins:
//!
//! | Priority | Added link                                   | Class            |
//! |----------|----------------------------------------------|------------------|
//! | 1        | `* -ad4m://has_zome-> *`                     | `SchemaChanged`  |
//! | 2        | `message -flux://has_reaction-> emoji://..`  | `Reaction`       |
//! | 3        | `channel -flux://has_message-> message`      | `NewMessage`     |
//! | 4        | `message -flux://edited_to-> literal`        | `Edit`           |
//! | 5        | `reply -flux://has_reply-> parent`           | `Reply`          |
//! | 6        | `message -flux://card_hidden-> *`            | `HideFlag`       |
//! | 7        | `message -flux://is_popular-> *`             | `PopularityFlag` |
//!
//! Removals of reactions, channel-to-message links and popularity markers are
//! classified; every other event is `Unhandled`.

use flux_core::predicates::{
    CARD_HIDDEN, EDITED_TO, HAS_MESSAGE, HAS_SDNA, IS_POPULAR, REACTION, REPLY_TO,
};
use flux_core::{LinkEvent, LinkExpression};

use crate::delta::{EventKind, UnhandledEvent};
use crate::message::{emoji_content, Message, MessageEdit, Reaction};

/// Meaning of a link event for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkClass {
    /// A schema program was added
    SchemaChanged,
    /// A reaction was added to a message
    Reaction {
        /// Message id
        message_id: String,
        /// The reaction
        reaction: Reaction,
    },
    /// A message was sent to the channel
    NewMessage(Message),
    /// A message was edited
    Edit {
        /// Message id
        message_id: String,
        /// The edit
        edit: MessageEdit,
    },
    /// A message was marked as a reply
    Reply {
        /// Reply message id
        message_id: String,
        /// Replied-to message id
        parent_id: String,
    },
    /// A message's preview card was hidden
    HideFlag {
        /// Message id
        message_id: String,
    },
    /// A popularity marker was added or removed
    PopularityFlag {
        /// Message id
        message_id: String,
        /// Whether the marker is present
        popular: bool,
    },
    /// A reaction was removed
    ReactionRemoved {
        /// Message id
        message_id: String,
        /// Reacting agent
        author: String,
        /// Emoji code point
        content: String,
    },
    /// A message was removed from the channel
    MessageRemoved {
        /// Message id
        message_id: String,
    },
    /// Nothing above matched
    Unhandled(UnhandledEvent),
}

impl LinkClass {
    /// Serialization key: the message the event is about.
    ///
    /// Schema changes and unhandled events share the channel-wide key `""`.
    pub fn key(&self) -> &str {
        match self {
            Self::NewMessage(message) => message.id.as_str(),
            Self::Reaction { message_id, .. }
            | Self::Edit { message_id, .. }
            | Self::Reply { message_id, .. }
            | Self::HideFlag { message_id }
            | Self::PopularityFlag { message_id, .. }
            | Self::ReactionRemoved { message_id, .. }
            | Self::MessageRemoved { message_id } => message_id.as_str(),
            Self::SchemaChanged | Self::Unhandled(_) => "",
        }
    }
}

/// Classify an event for `channel`.
pub fn classify(event: &LinkEvent, channel: &str) -> LinkClass {
    match event {
        LinkEvent::Added(link) => classify_added(link, channel),
        LinkEvent::Removed(link) => classify_removed(link, channel),
    }
}

fn classify_added(link: &LinkExpression, channel: &str) -> LinkClass {
    let predicate = link.predicate();
    if predicate == HAS_SDNA {
        LinkClass::SchemaChanged
    } else if predicate == REACTION {
        LinkClass::Reaction {
            message_id: link.source().to_string(),
            reaction: Reaction::from_link(link),
        }
    } else if predicate == HAS_MESSAGE && link.source() == channel {
        LinkClass::NewMessage(Message::from_link(link))
    } else if predicate == EDITED_TO {
        LinkClass::Edit {
            message_id: link.source().to_string(),
            edit: MessageEdit::from_link(link),
        }
    } else if predicate == REPLY_TO {
        LinkClass::Reply {
            message_id: link.source().to_string(),
            parent_id: link.target().to_string(),
        }
    } else if predicate == CARD_HIDDEN {
        LinkClass::HideFlag {
            message_id: link.source().to_string(),
        }
    } else if predicate == IS_POPULAR {
        LinkClass::PopularityFlag {
            message_id: link.source().to_string(),
            popular: true,
        }
    } else {
        unhandled(EventKind::Added, link)
    }
}

fn classify_removed(link: &LinkExpression, channel: &str) -> LinkClass {
    let predicate = link.predicate();
    if predicate == REACTION {
        LinkClass::ReactionRemoved {
            message_id: link.source().to_string(),
            author: link.author.clone(),
            content: emoji_content(link.target()).to_string(),
        }
    } else if predicate == HAS_MESSAGE && link.source() == channel {
        LinkClass::MessageRemoved {
            message_id: link.target().to_string(),
        }
    } else if predicate == IS_POPULAR {
        LinkClass::PopularityFlag {
            message_id: link.source().to_string(),
            popular: false,
        }
    } else {
        unhandled(EventKind::Removed, link)
    }
}

fn unhandled(kind: EventKind, link: &LinkExpression) -> LinkClass {
    LinkClass::Unhandled(UnhandledEvent {
        kind,
        link: link.clone(),
    })
}
