//! Message Store
//!
//! The single owner of a channel's [`ChatState`]. Reconciled events,
//! optimistic writes and loaded pages all go through [`MessageStore::apply`],
//! so they are serialized against each other. Applied deltas that changed the
//! state are broadcast to view subscribers.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::delta::{ChatState, MessageDelta, UnhandledEvent};
use crate::message::Message;

const UPDATE_BUFFER: usize = 256;

/// Shared handle to one channel's message state.
#[derive(Clone)]
pub struct MessageStore {
    state: Arc<RwLock<ChatState>>,
    updates: broadcast::Sender<MessageDelta>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::from_state(ChatState::default())
    }
}

impl MessageStore {
    /// Empty store keeping at most `unhandled_capacity` unhandled events.
    pub fn new(unhandled_capacity: usize) -> Self {
        Self::from_state(ChatState::new(unhandled_capacity))
    }

    fn from_state(state: ChatState) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            state: Arc::new(RwLock::new(state)),
            updates,
        }
    }

    /// Apply a delta. Returns whether the state changed.
    ///
    /// An added message is broadcast as stored, with any links that arrived
    /// ahead of it already applied.
    pub async fn apply(&self, delta: MessageDelta) -> bool {
        let mut state = self.state.write().await;
        let changed = state.apply(&delta);
        let delta = match delta {
            MessageDelta::MessageAdded(message) if changed => {
                MessageDelta::MessageAdded(state.message(&message.id).cloned().unwrap_or(message))
            }
            other => other,
        };
        drop(state);
        tracing::trace!(message_id = ?delta.message_id(), changed, "applied message delta");
        if changed {
            // No receivers is fine.
            let _ = self.updates.send(delta);
        }
        changed
    }

    /// Deltas that changed the state, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageDelta> {
        self.updates.subscribe()
    }

    /// One message.
    pub async fn message(&self, id: &str) -> Option<Message> {
        self.state.read().await.message(id).cloned()
    }

    /// Messages sorted by send time, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.sorted()
    }

    /// Whether a schema change is waiting for a full reload.
    pub async fn needs_resync(&self) -> bool {
        self.state.read().await.needs_resync()
    }

    /// Recent unhandled events, oldest first.
    pub async fn unhandled(&self) -> Vec<UnhandledEvent> {
        self.state.read().await.unhandled().cloned().collect()
    }

    /// Copy of the whole state.
    pub async fn snapshot(&self) -> ChatState {
        self.state.read().await.clone()
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("subscribers", &self.updates.receiver_count())
            .finish_non_exhaustive()
    }
}
