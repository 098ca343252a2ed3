//! Event Reconciler
//!
//! Keeps a [`MessageStore`] consistent with a perspective's link stream
//! without reloading the channel on every event.
//!
//! Each event is classified synchronously in the subscription callback (see
//! [`classify`](crate::classify::classify)), then its state transition is
//! queued under the id of the message it concerns. Transitions that need a
//! follow-up lookup (the popularity re-check after a reaction) finish that
//! lookup before any later event for the same message is processed.
//!
//! Unclassified events are recorded in the store as unhandled, never dropped.
//!
//! A schema change is a queue barrier: the resync it triggers starts after
//! every earlier transition and replaces the store before any later event
//! is applied, so nothing delivered during the reload is overwritten.

use flux_core::{
    FluxConfig, LinkAdapter, LinkEvent, LinkExpression, LinkListener, PerspectiveId,
    ReconcilerConfig, Subscription,
};
use flux_query::graph;
use std::sync::Arc;

use crate::classify::{classify, LinkClass};
use crate::delta::MessageDelta;
use crate::error::SyncError;
use crate::loader::MessageLoader;
use crate::queue::KeyedTaskQueue;
use crate::store::MessageStore;

struct ReconcilerInner {
    adapter: Arc<dyn LinkAdapter>,
    perspective: PerspectiveId,
    channel: String,
    store: MessageStore,
    queue: KeyedTaskQueue,
    loader: MessageLoader,
    config: ReconcilerConfig,
}

/// Live reconciliation of one channel. Dropping it unsubscribes.
pub struct Reconciler {
    inner: Arc<ReconcilerInner>,
    subscription: Subscription,
}

struct Listener(Arc<ReconcilerInner>);

impl LinkListener for Listener {
    fn on_added(&self, link: &LinkExpression) {
        self.0.dispatch(&LinkEvent::Added(link.clone()));
    }

    fn on_removed(&self, link: &LinkExpression) {
        self.0.dispatch(&LinkEvent::Removed(link.clone()));
    }
}

impl Reconciler {
    /// Subscribe to `perspective` and reconcile `channel` into `store`.
    pub async fn start(
        adapter: Arc<dyn LinkAdapter>,
        perspective: PerspectiveId,
        channel: impl Into<String>,
        store: MessageStore,
        config: &FluxConfig,
    ) -> Result<Self, SyncError> {
        let channel = channel.into();
        let loader = MessageLoader::new(adapter.clone(), perspective.clone(), channel.clone(), config);
        let inner = Arc::new(ReconcilerInner {
            adapter: adapter.clone(),
            perspective: perspective.clone(),
            channel,
            store,
            queue: KeyedTaskQueue::current(),
            loader,
            config: config.reconciler.clone(),
        });
        let subscription = adapter
            .subscribe_links(&perspective, Arc::new(Listener(inner.clone())))
            .await?;
        tracing::info!(%perspective, channel = %inner.channel, "reconciler started");
        Ok(Self {
            inner,
            subscription,
        })
    }

    /// The store being reconciled.
    pub fn store(&self) -> &MessageStore {
        &self.inner.store
    }

    /// Loader for the reconciled channel.
    pub fn loader(&self) -> &MessageLoader {
        &self.inner.loader
    }

    /// Feed an event directly, as if the subscription delivered it.
    pub fn handle(&self, event: &LinkEvent) {
        self.inner.dispatch(event);
    }

    /// Reload the channel once every queued transition has been applied.
    /// Events delivered meanwhile are applied on top of the reload.
    pub fn resync(&self) {
        self.inner.queue_resync();
    }

    /// Wait until every queued transition has been applied.
    pub async fn settled(&self) {
        self.inner.queue.settled().await;
    }

    /// Stop receiving events. Queued transitions still complete.
    pub fn stop(self) {
        tracing::info!(
            perspective = %self.inner.perspective,
            channel = %self.inner.channel,
            "reconciler stopped"
        );
        self.subscription.unsubscribe();
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("perspective", &self.inner.perspective)
            .field("channel", &self.inner.channel)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

impl ReconcilerInner {
    fn dispatch(self: &Arc<Self>, event: &LinkEvent) {
        let class = classify(event, &self.channel);
        if let LinkClass::Unhandled(unhandled) = &class {
            tracing::debug!(
                perspective = %self.perspective,
                kind = ?unhandled.kind,
                predicate = unhandled.link.predicate(),
                "unhandled link event"
            );
        } else {
            tracing::trace!(perspective = %self.perspective, key = class.key(), "classified link event");
        }

        let key = class.key().to_string();
        let inner = self.clone();
        if matches!(class, LinkClass::SchemaChanged) {
            self.queue.push_barrier(Box::pin(async move { inner.process(class).await }));
        } else {
            self.queue.push(key, Box::pin(async move { inner.process(class).await }));
        }
    }

    fn queue_resync(self: &Arc<Self>) {
        let inner = self.clone();
        self.queue.push_barrier(Box::pin(async move { inner.resync().await }));
    }

    async fn resync(&self) {
        if let Err(e) = self.loader.resync(&self.store).await {
            tracing::warn!(perspective = %self.perspective, error = %e, "resync failed");
        }
    }

    async fn process(&self, class: LinkClass) {
        match class {
            LinkClass::SchemaChanged => {
                self.store.apply(MessageDelta::SchemaChanged).await;
                if self.config.auto_resync {
                    self.resync().await;
                }
            }
            LinkClass::Reaction {
                message_id,
                reaction,
            } => {
                self.store
                    .apply(MessageDelta::ReactionAdded {
                        message_id: message_id.clone(),
                        reaction,
                    })
                    .await;
                self.recheck_popularity(message_id, true).await;
            }
            LinkClass::ReactionRemoved {
                message_id,
                author,
                content,
            } => {
                self.store
                    .apply(MessageDelta::ReactionRemoved {
                        message_id: message_id.clone(),
                        author,
                        content,
                    })
                    .await;
                self.recheck_popularity(message_id, false).await;
            }
            LinkClass::NewMessage(message) => {
                let message_id = message.id.clone();
                self.store.apply(MessageDelta::MessageAdded(message)).await;
                let replayed = self
                    .store
                    .message(&message_id)
                    .await
                    .is_some_and(|message| !message.reactions.is_empty() && !message.popular);
                if replayed {
                    self.recheck_popularity(message_id, true).await;
                }
            }
            LinkClass::Edit { message_id, edit } => {
                self.store
                    .apply(MessageDelta::EditAdded { message_id, edit })
                    .await;
            }
            LinkClass::Reply {
                message_id,
                parent_id,
            } => {
                self.store
                    .apply(MessageDelta::ReplyLinked {
                        message_id,
                        parent_id,
                    })
                    .await;
            }
            LinkClass::HideFlag { message_id } => {
                self.store
                    .apply(MessageDelta::CardHidden {
                        message_id,
                        hidden: true,
                    })
                    .await;
            }
            LinkClass::PopularityFlag {
                message_id,
                popular,
            } => {
                self.store
                    .apply(MessageDelta::PopularityChanged {
                        message_id,
                        popular,
                    })
                    .await;
            }
            LinkClass::MessageRemoved { message_id } => {
                self.store
                    .apply(MessageDelta::MessageRemoved { message_id })
                    .await;
            }
            LinkClass::Unhandled(event) => {
                self.store.apply(MessageDelta::Unhandled(event)).await;
            }
        }
    }

    /// After a reaction is added only an upgrade is applied; after one is
    /// removed only a downgrade.
    async fn recheck_popularity(&self, message_id: String, added: bool) {
        if self.store.message(&message_id).await.is_none() {
            return;
        }
        match graph::is_popular(self.adapter.as_ref(), &self.perspective, &message_id).await {
            Ok(popular) if popular == added => {
                self.store
                    .apply(MessageDelta::PopularityChanged {
                        message_id,
                        popular,
                    })
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    perspective = %self.perspective,
                    id = %message_id,
                    error = %e,
                    "popularity re-check failed"
                );
            }
        }
    }
}
