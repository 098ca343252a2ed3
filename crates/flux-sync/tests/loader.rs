//! Message pages loaded through the compiled entry query.

#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use flux_core::predicates::{CARD_HIDDEN, EDITED_TO, HAS_MESSAGE, REACTION, REPLY_TO};
use flux_core::{AdapterError, FluxConfig, Link, LinkAdapter, LinkExpression, Literal, PerspectiveId};
use flux_subject::community_sdna;
use flux_sync::{new_message_id, MessageDelta, MessageLoader, MessageStore, Reaction};
use flux_testkit::{MemoryRuntime, Operation};
use parking_lot::Mutex;
use std::sync::Arc;

const CHANNEL: &str = "literal://string:general";
const ALICE: &str = "did:key:alice";
const BOB: &str = "did:key:bob";

fn at(minutes_ago: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes_ago)
}

fn inject(runtime: &MemoryRuntime, p: &PerspectiveId, author: &str, when: DateTime<Utc>, link: Link) {
    runtime.inject_link(p, LinkExpression::new(author, when, link));
}

fn post(runtime: &MemoryRuntime, p: &PerspectiveId, body: &str, minutes_ago: i64) -> String {
    let id = new_message_id(body);
    inject(runtime, p, ALICE, at(minutes_ago), Link::new(CHANNEL, HAS_MESSAGE, id.clone()));
    id
}

fn loader(runtime: &MemoryRuntime, p: &PerspectiveId, page_limit: usize) -> MessageLoader {
    flux_testkit::init_test_tracing();
    let mut config = FluxConfig::default();
    config.query.page_limit = page_limit;
    MessageLoader::new(Arc::new(runtime.clone()), p.clone(), CHANNEL, &config)
}

#[tokio::test]
async fn page_holds_the_newest_messages_oldest_first() {
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    let oldest = post(&runtime, &p, "one", 30);
    let middle = post(&runtime, &p, "two", 20);
    let newest = post(&runtime, &p, "three", 10);

    let page = loader(&runtime, &p, 2).load(None).await.unwrap();
    assert!(page.has_more);
    let ids: Vec<&str> = page.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![middle.as_str(), newest.as_str()]);

    let older = loader(&runtime, &p, 2)
        .load(Some(page.messages[0].timestamp))
        .await
        .unwrap();
    assert!(!older.has_more);
    assert_eq!(older.messages.len(), 1);
    assert_eq!(older.messages[0].id, oldest);
    assert_eq!(older.messages[0].content, "one");
}

#[tokio::test]
async fn rows_carry_reactions_edits_replies_and_flags() {
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    runtime
        .add_sdna(&p, "Popularity", &community_sdna("1f44d", 2))
        .await
        .unwrap();
    let parent = post(&runtime, &p, "parent", 30);
    let child = post(&runtime, &p, "child", 20);
    inject(&runtime, &p, BOB, at(19), Link::new(child.clone(), REPLY_TO, parent.clone()));
    inject(&runtime, &p, ALICE, at(18), Link::new(parent.clone(), REACTION, "emoji://1f44d"));
    inject(&runtime, &p, BOB, at(17), Link::new(parent.clone(), REACTION, "emoji://1f44d"));
    inject(&runtime, &p, BOB, at(16), Link::new(parent.clone(), REACTION, "emoji://1f44d"));
    inject(
        &runtime,
        &p,
        ALICE,
        at(15),
        Link::new(parent.clone(), EDITED_TO, Literal::from_string("parent v2").to_url()),
    );
    inject(&runtime, &p, ALICE, at(14), Link::new(child.clone(), CARD_HIDDEN, "literal://json:true"));

    let page = loader(&runtime, &p, 50).load(None).await.unwrap();
    assert!(!page.has_more);
    assert_eq!(page.messages.len(), 2);

    let parent_message = &page.messages[0];
    assert_eq!(parent_message.id, parent);
    assert_eq!(parent_message.reactions.len(), 2);
    assert!(parent_message.reactions.iter().all(|r| r.synced && r.content == "1f44d"));
    assert_eq!(parent_message.current_content(), "parent v2");
    assert!(parent_message.popular);
    assert!(!parent_message.card_hidden);

    let child_message = &page.messages[1];
    assert_eq!(child_message.reply_to.as_deref(), Some(parent.as_str()));
    assert!(child_message.card_hidden);
    assert!(!child_message.popular);
}

#[tokio::test]
async fn missing_popularity_rule_counts_as_not_popular() {
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    let id = post(&runtime, &p, "lonely", 5);

    let page = loader(&runtime, &p, 50).load(None).await.unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].id, id);
    assert!(!page.messages[0].popular);
}

#[tokio::test]
async fn missing_schema_is_reported_as_not_registered() {
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    runtime.fail_when(|op| match op {
        Operation::Query(text) if text.starts_with("assertz(") => Some(AdapterError::execution(
            "error(existence_error(procedure, link/5), link/5)",
        )),
        _ => None,
    });

    let err = loader(&runtime, &p, 50).load(None).await.unwrap_err();
    assert!(err.is_not_registered());
}

#[tokio::test]
async fn load_into_keeps_pending_reactions() {
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    let id = post(&runtime, &p, "hello", 5);
    let loader = loader(&runtime, &p, 50);
    let store = MessageStore::new(16);

    loader.load_into(&store, None).await.unwrap();
    store
        .apply(MessageDelta::ReactionAdded {
            message_id: id.clone(),
            reaction: Reaction {
                author: runtime.did().to_string(),
                content: "1f389".to_string(),
                timestamp: Utc::now(),
                synced: false,
            },
        })
        .await;

    loader.load_into(&store, None).await.unwrap();
    let message = store.message(&id).await.unwrap();
    assert_eq!(message.reactions.len(), 1);
    assert!(!message.reactions[0].synced);

    assert_eq!(loader.resync(&store).await.unwrap(), 1);
    assert!(store.message(&id).await.unwrap().reactions.is_empty());
}

#[tokio::test]
async fn query_rules_are_retracted_after_loading() {
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    post(&runtime, &p, "hello", 5);

    loader(&runtime, &p, 50).load(None).await.unwrap();
    assert_eq!(runtime.rule_count(&p, "entry_"), 0);
}

#[tokio::test]
async fn older_pages_bound_the_rule_itself() {
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    let oldest = post(&runtime, &p, "one", 30);
    post(&runtime, &p, "two", 20);
    let rules = Arc::new(Mutex::new(Vec::new()));
    let seen = rules.clone();
    runtime.fail_when(move |op| {
        if let Operation::Query(text) = op {
            if text.starts_with("assertz((entry_query_") {
                seen.lock().push(text.to_string());
            }
        }
        None
    });

    let cut = at(25);
    let page = loader(&runtime, &p, 50).load(Some(cut)).await.unwrap();
    let ids: Vec<&str> = page.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![oldest.as_str()]);

    let rules = rules.lock();
    assert_eq!(rules.len(), 1);
    assert!(rules[0].contains(&format!("(Timestamp =< {})", cut.timestamp_millis())));
}
