//! Reconciler behaviour against the in-memory runtime.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use flux_core::predicates::{
    CARD_HIDDEN, EDITED_TO, HAS_MESSAGE, IS_POPULAR, REACTION, REPLY_TO,
};
use flux_core::{
    AdapterError, FluxConfig, Link, LinkAdapter, LinkEvent, LinkExpression, LinkListener,
    LinkQuery, Literal, PerspectiveId, QueryOutcome, Subscription,
};
use flux_subject::community_sdna;
use flux_sync::{new_message_id, EventKind, MessageDelta, MessageStore, Reconciler};
use flux_testkit::MemoryRuntime;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

const CHANNEL: &str = "literal://string:general";
const ALICE: &str = "did:key:alice";
const BOB: &str = "did:key:bob";
const THUMBS_UP: &str = "emoji://1f44d";

struct Chat {
    runtime: MemoryRuntime,
    perspective: PerspectiveId,
    reconciler: Reconciler,
}

impl Chat {
    fn store(&self) -> &MessageStore {
        self.reconciler.store()
    }

    fn inject(&self, author: &str, source: &str, predicate: &str, target: &str) -> LinkExpression {
        let link = LinkExpression::new(author, Utc::now(), Link::new(source, predicate, target));
        self.runtime.inject_link(&self.perspective, link.clone());
        link
    }

    fn post(&self, author: &str, body: &str) -> String {
        let id = new_message_id(body);
        self.inject(author, CHANNEL, HAS_MESSAGE, &id);
        id
    }
}

fn config(threshold: usize) -> FluxConfig {
    let mut config = FluxConfig::default();
    config.reconciler.popularity_threshold = threshold;
    config
}

async fn community(runtime: &MemoryRuntime, threshold: usize) -> PerspectiveId {
    let perspective = runtime.create_perspective("community");
    runtime
        .add_sdna(&perspective, "Popularity", &community_sdna("1f44d", threshold))
        .await
        .unwrap();
    perspective
}

async fn chat(threshold: usize) -> Chat {
    flux_testkit::init_test_tracing();
    let runtime = MemoryRuntime::new("did:key:me");
    let perspective = community(&runtime, threshold).await;
    let reconciler = Reconciler::start(
        Arc::new(runtime.clone()),
        perspective.clone(),
        CHANNEL,
        MessageStore::new(16),
        &config(threshold),
    )
    .await
    .unwrap();
    Chat {
        runtime,
        perspective,
        reconciler,
    }
}

#[tokio::test]
async fn channel_link_adds_a_synced_message() {
    let chat = chat(3).await;
    let id = chat.post(ALICE, "hello");
    chat.reconciler.settled().await;

    let message = chat.store().message(&id).await.unwrap();
    assert_eq!(message.content, "hello");
    assert_eq!(message.author, ALICE);
    assert!(message.synced);
}

#[tokio::test]
async fn links_of_other_channels_are_unhandled() {
    let chat = chat(3).await;
    chat.inject(ALICE, "literal://string:random", HAS_MESSAGE, &new_message_id("elsewhere"));
    chat.reconciler.settled().await;

    assert!(chat.store().messages().await.is_empty());
    let unhandled = chat.store().unhandled().await;
    assert_eq!(unhandled.len(), 1);
    assert_eq!(unhandled[0].kind, EventKind::Added);
}

#[tokio::test]
async fn repeated_events_apply_once() {
    let chat = chat(3).await;
    let id = chat.post(ALICE, "hello");
    let reaction = chat.inject(BOB, &id, REACTION, THUMBS_UP);
    chat.reconciler.settled().await;
    let once = chat.store().snapshot().await;

    let message_link = chat
        .runtime
        .links(&chat.perspective)
        .into_iter()
        .find(|link| link.predicate() == HAS_MESSAGE)
        .unwrap();
    chat.runtime.emit(&chat.perspective, LinkEvent::Added(message_link));
    chat.runtime.emit(&chat.perspective, LinkEvent::Added(reaction));
    chat.reconciler.settled().await;

    assert_eq!(chat.store().snapshot().await, once);
    assert_eq!(chat.store().message(&id).await.unwrap().reactions.len(), 1);
}

#[tokio::test]
async fn removed_reaction_leaves_the_message() {
    let chat = chat(3).await;
    let id = chat.post(ALICE, "hello");
    let reaction = chat.inject(BOB, &id, REACTION, THUMBS_UP);
    chat.inject(ALICE, &id, REACTION, "emoji://1f389");
    chat.reconciler.settled().await;
    assert_eq!(chat.store().message(&id).await.unwrap().reactions.len(), 2);

    chat.runtime
        .remove_links(&chat.perspective, &[reaction])
        .await
        .unwrap();
    chat.reconciler.settled().await;

    let message = chat.store().message(&id).await.unwrap();
    assert_eq!(message.reactions.len(), 1);
    assert_eq!(message.reactions[0].author, ALICE);
    assert_eq!(message.reactions[0].content, "1f389");
}

#[tokio::test]
async fn popularity_follows_reactions_both_ways() {
    let chat = chat(2).await;
    let hot = chat.post(ALICE, "hot take");
    let quiet = chat.post(ALICE, "quiet one");
    chat.inject(ALICE, &hot, REACTION, THUMBS_UP);
    let bob = chat.inject(BOB, &hot, REACTION, THUMBS_UP);
    chat.inject(BOB, &quiet, REACTION, THUMBS_UP);
    chat.reconciler.settled().await;

    assert!(chat.store().message(&hot).await.unwrap().popular);
    assert!(!chat.store().message(&quiet).await.unwrap().popular);

    chat.runtime.remove_links(&chat.perspective, &[bob]).await.unwrap();
    chat.reconciler.settled().await;

    assert!(!chat.store().message(&hot).await.unwrap().popular);
    assert!(!chat.store().message(&quiet).await.unwrap().popular);
}

#[tokio::test]
async fn popularity_flag_links_are_applied() {
    let chat = chat(3).await;
    let id = chat.post(ALICE, "flagged");
    let flag = chat.inject(ALICE, &id, IS_POPULAR, "literal://json:true");
    chat.reconciler.settled().await;
    assert!(chat.store().message(&id).await.unwrap().popular);

    chat.runtime.remove_links(&chat.perspective, &[flag]).await.unwrap();
    chat.reconciler.settled().await;
    assert!(!chat.store().message(&id).await.unwrap().popular);
}

#[tokio::test]
async fn edits_replies_and_hidden_cards() {
    let chat = chat(3).await;
    let parent = chat.post(ALICE, "question");
    let child = chat.post(BOB, "answer");
    chat.inject(BOB, &child, REPLY_TO, &parent);
    chat.inject(ALICE, &parent, EDITED_TO, &Literal::from_string("better question").to_url());
    chat.inject(ALICE, &parent, CARD_HIDDEN, "literal://json:true");
    chat.reconciler.settled().await;

    let parent_message = chat.store().message(&parent).await.unwrap();
    assert_eq!(parent_message.current_content(), "better question");
    assert_eq!(parent_message.content, "question");
    assert!(parent_message.card_hidden);

    let child_message = chat.store().message(&child).await.unwrap();
    assert_eq!(child_message.reply_to.as_deref(), Some(parent.as_str()));
}

#[tokio::test]
async fn links_that_arrive_before_their_message_are_kept() {
    let chat = chat(1).await;
    let parent = chat.post(ALICE, "question");
    let reply = new_message_id("answer");
    chat.inject(BOB, &reply, REPLY_TO, &parent);
    chat.inject(BOB, &reply, CARD_HIDDEN, "literal://json:true");
    chat.inject(ALICE, &reply, REACTION, THUMBS_UP);
    chat.reconciler.settled().await;
    assert!(chat.store().message(&reply).await.is_none());

    chat.inject(BOB, CHANNEL, HAS_MESSAGE, &reply);
    chat.reconciler.settled().await;

    let message = chat.store().message(&reply).await.unwrap();
    assert_eq!(message.reply_to.as_deref(), Some(parent.as_str()));
    assert!(message.card_hidden);
    assert_eq!(message.reactions.len(), 1);
    assert!(message.popular);
}

#[tokio::test]
async fn removed_channel_link_removes_the_message() {
    let chat = chat(3).await;
    let id = chat.post(ALICE, "short lived");
    chat.reconciler.settled().await;

    let link = chat
        .runtime
        .links(&chat.perspective)
        .into_iter()
        .find(|link| link.target() == id)
        .unwrap();
    chat.runtime.remove_links(&chat.perspective, &[link]).await.unwrap();
    chat.reconciler.settled().await;

    assert!(chat.store().message(&id).await.is_none());
}

#[tokio::test]
async fn events_for_unknown_messages_are_ignored() {
    let chat = chat(1).await;
    chat.inject(BOB, "literal://string:ghost", REACTION, THUMBS_UP);
    chat.inject(BOB, "literal://string:ghost", EDITED_TO, "literal://string:boo");
    chat.reconciler.settled().await;

    assert!(chat.store().messages().await.is_empty());
    assert!(chat.store().unhandled().await.is_empty());
}

#[tokio::test]
async fn unclassified_events_are_recorded() {
    let chat = chat(3).await;
    let id = chat.post(ALICE, "hello");
    let edit = chat.inject(ALICE, &id, EDITED_TO, "literal://string:hi");
    chat.inject(ALICE, "flux://somewhere", "flux://unknown_predicate", "x");
    chat.reconciler.settled().await;

    chat.runtime.remove_links(&chat.perspective, &[edit]).await.unwrap();
    chat.reconciler.settled().await;

    let unhandled = chat.store().unhandled().await;
    assert_eq!(unhandled.len(), 2);
    assert_eq!(unhandled[0].kind, EventKind::Added);
    assert_eq!(unhandled[0].link.predicate(), "flux://unknown_predicate");
    assert_eq!(unhandled[1].kind, EventKind::Removed);
    assert_eq!(unhandled[1].link.predicate(), EDITED_TO);
}

#[tokio::test]
async fn schema_change_triggers_resync() {
    let chat = chat(3).await;
    chat.runtime.inject_link(
        &chat.perspective,
        LinkExpression::new(
            ALICE,
            Utc::now() - Duration::minutes(5),
            Link::new(CHANNEL, HAS_MESSAGE, new_message_id("before subscribe")),
        ),
    );
    chat.reconciler.settled().await;
    chat.store()
        .apply(MessageDelta::MessagesLoaded {
            messages: Vec::new(),
            replace: true,
        })
        .await;
    assert!(chat.store().messages().await.is_empty());

    chat.runtime
        .add_sdna(&chat.perspective, "Channel", "channel_marker(x).")
        .await
        .unwrap();
    chat.reconciler.settled().await;

    let messages = chat.store().messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "before subscribe");
    assert!(!chat.store().needs_resync().await);
}

#[tokio::test]
async fn schema_change_without_auto_resync_marks_the_store() {
    flux_testkit::init_test_tracing();
    let runtime = MemoryRuntime::new("did:key:me");
    let perspective = community(&runtime, 3).await;
    let mut config = config(3);
    config.reconciler.auto_resync = false;
    let reconciler = Reconciler::start(
        Arc::new(runtime.clone()),
        perspective.clone(),
        CHANNEL,
        MessageStore::new(16),
        &config,
    )
    .await
    .unwrap();

    runtime
        .add_sdna(&perspective, "Channel", "channel_marker(x).")
        .await
        .unwrap();
    reconciler.settled().await;
    assert!(reconciler.store().needs_resync().await);

    reconciler.resync();
    reconciler.settled().await;
    assert!(!reconciler.store().needs_resync().await);
}

#[tokio::test]
async fn stop_unsubscribes() {
    let chat = chat(3).await;
    assert_eq!(chat.runtime.subscriber_count(&chat.perspective), 1);

    let Chat {
        runtime,
        perspective,
        reconciler,
    } = chat;
    let store = reconciler.store().clone();
    reconciler.stop();
    assert_eq!(runtime.subscriber_count(&perspective), 0);

    runtime.inject_link(
        &perspective,
        LinkExpression::new(ALICE, Utc::now(), Link::new(CHANNEL, HAS_MESSAGE, new_message_id("late"))),
    );
    tokio::task::yield_now().await;
    assert!(store.messages().await.is_empty());
}

/// Delegates to a `MemoryRuntime` but holds every `isPopular` query until
/// the test releases it.
struct GatedAdapter {
    inner: MemoryRuntime,
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl GatedAdapter {
    fn new(inner: MemoryRuntime) -> Self {
        Self {
            inner,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl LinkAdapter for GatedAdapter {
    async fn add_link(
        &self,
        perspective: &PerspectiveId,
        link: Link,
    ) -> Result<LinkExpression, AdapterError> {
        self.inner.add_link(perspective, link).await
    }

    async fn query_links(
        &self,
        perspective: &PerspectiveId,
        query: &LinkQuery,
    ) -> Result<Vec<LinkExpression>, AdapterError> {
        self.inner.query_links(perspective, query).await
    }

    async fn remove_links(
        &self,
        perspective: &PerspectiveId,
        links: &[LinkExpression],
    ) -> Result<(), AdapterError> {
        self.inner.remove_links(perspective, links).await
    }

    async fn run_graph_query(
        &self,
        perspective: &PerspectiveId,
        program: &str,
    ) -> Result<QueryOutcome, AdapterError> {
        if program.starts_with("isPopular(") {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
        }
        self.inner.run_graph_query(perspective, program).await
    }

    async fn add_sdna(
        &self,
        perspective: &PerspectiveId,
        class_name: &str,
        sdna: &str,
    ) -> Result<(), AdapterError> {
        self.inner.add_sdna(perspective, class_name, sdna).await
    }

    async fn subscribe_links(
        &self,
        perspective: &PerspectiveId,
        listener: Arc<dyn LinkListener>,
    ) -> Result<Subscription, AdapterError> {
        self.inner.subscribe_links(perspective, listener).await
    }
}

async fn gated_chat() -> (Arc<GatedAdapter>, Chat) {
    flux_testkit::init_test_tracing();
    let runtime = MemoryRuntime::new("did:key:me");
    let perspective = community(&runtime, 1).await;
    let adapter = Arc::new(GatedAdapter::new(runtime.clone()));
    let reconciler = Reconciler::start(
        adapter.clone(),
        perspective.clone(),
        CHANNEL,
        MessageStore::new(16),
        &config(1),
    )
    .await
    .unwrap();
    (
        adapter,
        Chat {
            runtime,
            perspective,
            reconciler,
        },
    )
}

#[tokio::test]
async fn popularity_result_does_not_resurrect_a_removed_message() {
    let (adapter, chat) = gated_chat().await;
    let id = chat.post(ALICE, "contested");
    chat.reconciler.settled().await;

    chat.inject(BOB, &id, REACTION, THUMBS_UP);
    adapter.entered.notified().await;

    assert!(
        chat.store()
            .apply(MessageDelta::MessageRemoved {
                message_id: id.clone(),
            })
            .await
    );
    adapter.release.add_permits(1);
    chat.reconciler.settled().await;

    assert!(chat.store().message(&id).await.is_none());
    assert!(chat.store().messages().await.is_empty());
}

#[tokio::test]
async fn removal_event_waits_for_the_popularity_recheck() {
    let (adapter, chat) = gated_chat().await;
    let id = chat.post(ALICE, "contested");
    chat.reconciler.settled().await;
    let channel_link = chat
        .runtime
        .links(&chat.perspective)
        .into_iter()
        .find(|link| link.target() == id)
        .unwrap();

    chat.inject(BOB, &id, REACTION, THUMBS_UP);
    adapter.entered.notified().await;

    chat.runtime
        .remove_links(&chat.perspective, &[channel_link])
        .await
        .unwrap();
    tokio::task::yield_now().await;
    assert!(chat.store().message(&id).await.is_some());

    adapter.release.add_permits(1);
    chat.reconciler.settled().await;

    assert!(chat.store().message(&id).await.is_none());
}

#[tokio::test]
async fn messages_sent_during_a_resync_survive_it() {
    let (adapter, chat) = gated_chat().await;
    let old = chat.post(ALICE, "before the schema change");
    chat.reconciler.settled().await;

    chat.runtime
        .add_sdna(&chat.perspective, "Channel", "channel_marker(x).")
        .await
        .unwrap();
    adapter.entered.notified().await;

    let fresh = chat.post(BOB, "during the reload");
    tokio::task::yield_now().await;
    assert!(chat.store().message(&fresh).await.is_none());

    adapter.release.add_permits(1);
    chat.reconciler.settled().await;

    let ids: Vec<String> = chat.store().messages().await.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![old, fresh]);
    assert!(!chat.store().needs_resync().await);
}
