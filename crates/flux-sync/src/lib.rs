//! Flux Sync - Event Reconciliation for Chat Views
//!
//! Keeps a channel's in-memory messages consistent with the perspective's
//! link stream.
//!
//! # Architecture
//!
//! ```text
//! link event ─> classify ─> KeyedTaskQueue (per message id) ─> MessageStore::apply
//! ChatActions (optimistic) ────────────────────────────────────> MessageStore::apply
//! MessageLoader (page / resync) ───────────────────────────────> MessageStore::apply
//! ```
//!
//! [`MessageStore`] is the only owner of the state, and every change is a
//! [`MessageDelta`] applied by the pure transition [`ChatState::apply`].

#![forbid(unsafe_code)]

pub mod actions;
pub mod classify;
pub mod delta;
pub mod directory;
pub mod error;
pub mod loader;
pub mod message;
pub mod queue;
pub mod reconciler;
pub mod store;

pub use actions::ChatActions;
pub use classify::{classify, LinkClass};
pub use delta::{ChatState, EventKind, MessageDelta, UnhandledEvent};
pub use directory::{CommunityDirectory, CommunitySummary};
pub use error::SyncError;
pub use loader::{message_from_row, MessageLoader, MessagePage};
pub use message::{new_message_id, Message, MessageEdit, Reaction};
pub use queue::KeyedTaskQueue;
pub use reconciler::Reconciler;
pub use store::MessageStore;
