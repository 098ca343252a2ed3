//! Built-in Flux models
//!
//! Schemas for the classes every Flux community uses, and typed views that
//! decode a [`SubjectRecord`](crate::SubjectRecord) via serde.

use chrono::{DateTime, Utc};
use flux_core::predicates::{
    BODY, COMMUNITY, CONVERSATION, CONVERSATION_SUBGROUP, DESCRIPTION, EMBEDDING, ENTRY_TYPE,
    FLUX_APP, HAS_CHANNEL, HAS_EMBEDDING, HAS_MESSAGE, HAS_POST, ICON, IMAGE, MODEL, NAME, PKG,
    SUMMARY, THUMBNAIL, TITLE, URL,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SubjectError;
use crate::schema::{SubjectSchema, ValueKind};

/// `Community`: the perspective's own metadata, stored on `ad4m://self`.
pub fn community() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("Community")
        .flag(ENTRY_TYPE, COMMUNITY)
        .property("name", NAME)
        .property("description", DESCRIPTION)
        .reference("image", IMAGE)
        .reference("thumbnail", THUMBNAIL)
        .build()
}

/// `Channel`
pub fn channel() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("Channel")
        .flag(ENTRY_TYPE, HAS_CHANNEL)
        .property("name", NAME)
        .property("description", DESCRIPTION)
        .collection("views", FLUX_APP, ValueKind::Reference)
        .build()
}

/// `Message`
pub fn message() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("Message")
        .flag(ENTRY_TYPE, HAS_MESSAGE)
        .property("body", BODY)
        .build()
}

/// `Post`
pub fn post() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("Post")
        .flag(ENTRY_TYPE, HAS_POST)
        .property("title", TITLE)
        .property("body", BODY)
        .property("url", URL)
        .reference("image", IMAGE)
        .build()
}

/// `Conversation`
pub fn conversation() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("Conversation")
        .flag(ENTRY_TYPE, CONVERSATION)
        .property("name", NAME)
        .property("summary", SUMMARY)
        .build()
}

/// `ConversationSubgroup`
pub fn conversation_subgroup() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("ConversationSubgroup")
        .flag(ENTRY_TYPE, CONVERSATION_SUBGROUP)
        .property("name", NAME)
        .property("summary", SUMMARY)
        .build()
}

/// `Embedding`: a vector expression plus the model that produced it.
pub fn embedding() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("Embedding")
        .flag(ENTRY_TYPE, HAS_EMBEDDING)
        .reference("embedding", EMBEDDING)
        .property("model", MODEL)
        .build()
}

/// `App`: a plugin view installed in a community.
pub fn app() -> Result<SubjectSchema, SubjectError> {
    SubjectSchema::builder("App")
        .flag(ENTRY_TYPE, FLUX_APP)
        .property("name", NAME)
        .property("description", DESCRIPTION)
        .property("icon", ICON)
        .property("pkg", PKG)
        .build()
}

/// Decoded `Community`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Community {
    /// Base id
    pub id: String,
    /// Creator
    pub author: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Image expression URL
    #[serde(default)]
    pub image: Option<String>,
    /// Thumbnail expression URL
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Decoded `Channel`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Channel {
    /// Base id
    pub id: String,
    /// Creator
    pub author: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Installed app ids
    #[serde(default)]
    pub views: Vec<String>,
}

/// Decoded `Post`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Post {
    /// Base id
    pub id: String,
    /// Creator
    pub author: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Title
    #[serde(default)]
    pub title: Option<String>,
    /// Body text
    #[serde(default)]
    pub body: Option<String>,
    /// Link URL
    #[serde(default)]
    pub url: Option<String>,
    /// Image expression URL
    #[serde(default)]
    pub image: Option<String>,
}

/// Decoded `Conversation` or `ConversationSubgroup`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Conversation {
    /// Base id
    pub id: String,
    /// Creator
    pub author: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Title
    #[serde(default)]
    pub name: Option<String>,
    /// Generated summary
    #[serde(default)]
    pub summary: Option<String>,
}

/// Decoded `Embedding`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Embedding {
    /// Base id
    pub id: String,
    /// Creator
    pub author: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Vector expression
    #[serde(default)]
    pub embedding: Value,
    /// Model name
    #[serde(default)]
    pub model: Option<String>,
}

/// Decoded `App`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct App {
    /// Base id
    pub id: String,
    /// Creator
    pub author: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Icon name
    #[serde(default)]
    pub icon: Option<String>,
    /// Package name
    #[serde(default)]
    pub pkg: Option<String>,
}
