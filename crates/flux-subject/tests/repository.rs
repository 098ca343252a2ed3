//! Subject repository behaviour against the in-memory runtime.

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use chrono::Utc;
use flux_core::predicates::{BODY, HAS_CHILD, HAS_SDNA, NAME, SELF};
use flux_core::{AdapterError, Link, LinkAdapter, LinkExpression, PerspectiveId};
use flux_subject::models::{self, Post};
use flux_subject::{
    subject_data, PropertyValue, ResolveFn, SubjectError, SubjectRepository, SubjectSchema,
};
use futures::future::BoxFuture;
use flux_testkit::{MemoryRuntime, Operation};
use serde_json::json;
use std::sync::Arc;

fn setup(schema: SubjectSchema) -> (MemoryRuntime, PerspectiveId, SubjectRepository) {
    flux_testkit::init_test_tracing();
    let runtime = MemoryRuntime::default();
    let p = runtime.create_perspective("community");
    let adapter: Arc<dyn LinkAdapter> = Arc::new(runtime.clone());
    let repository = SubjectRepository::new(adapter, p.clone(), Arc::new(schema));
    (runtime, p, repository)
}

fn count(runtime: &MemoryRuntime, p: &PerspectiveId, predicate: &str) -> usize {
    runtime
        .links(p)
        .iter()
        .filter(|link| link.predicate() == predicate)
        .count()
}

#[tokio::test]
async fn create_round_trips_declared_properties() {
    let (runtime, _p, posts) = setup(models::post().unwrap());
    let data = subject_data([
        ("title", PropertyValue::from("Release notes")),
        ("body", PropertyValue::from("Everything \"quoted\" & escaped")),
        ("url", PropertyValue::from("https://example.org/a?b=c")),
    ]);

    let created = posts.create(&data, None, None).await.unwrap();
    assert!(created.id.starts_with("literal://string:"));
    assert_eq!(created.author, runtime.did());

    let fetched = posts.get_data(Some(&created.id)).await.unwrap().unwrap();
    for (name, value) in &data {
        assert_eq!(fetched.get(name), Some(value), "property {name}");
    }
    assert_eq!(fetched.get("image"), Some(&PropertyValue::Null));

    let post: Post = fetched.decode().unwrap();
    assert_eq!(post.title.as_deref(), Some("Release notes"));
    assert_eq!(post.image, None);
}

#[tokio::test]
async fn numbers_and_reference_properties_read_back_as_written() {
    let schema = SubjectSchema::builder("Measurement")
        .flag("flux://entry_type", "flux://measurement")
        .property("count", "flux://count")
        .property("ratio", "flux://ratio")
        .property("whole", "flux://whole")
        .reference("image", "flux://image")
        .reference("thumbnail", "flux://thumbnail")
        .build()
        .unwrap();
    let (runtime, p, measurements) = setup(schema);
    let data = subject_data([
        ("count", PropertyValue::literal(json!(9_007_199_254_740_993_u64))),
        ("ratio", PropertyValue::literal(json!(0.1))),
        ("whole", PropertyValue::literal(json!(1.0))),
        ("image", PropertyValue::reference("https://example.org/cat.png")),
        ("thumbnail", PropertyValue::from("not a uri")),
    ]);

    let created = measurements.create(&data, None, None).await.unwrap();
    for (name, value) in &data {
        assert_eq!(created.get(name), Some(value), "property {name}");
    }
    assert_eq!(created.to_json()["whole"], json!(1.0));
    assert!(runtime
        .links(&p)
        .iter()
        .any(|l| l.predicate() == "flux://image" && l.target() == "https://example.org/cat.png"));
}

#[tokio::test]
async fn create_writes_flag_membership_and_property_links() {
    let (runtime, p, channels) = setup(models::channel().unwrap());
    let data = subject_data([("name", "general")]);
    let created = channels.create(&data, Some("chan-1"), None).await.unwrap();

    assert_eq!(created.id, "chan-1");
    let links = runtime.links(&p);
    assert!(links
        .iter()
        .any(|l| l.source() == SELF && l.predicate() == HAS_CHILD && l.target() == "chan-1"));
    assert!(links
        .iter()
        .any(|l| l.source() == "chan-1" && l.predicate() == NAME && l.target() == "literal://string:general"));
    assert_eq!(created.get("views"), Some(&PropertyValue::List(Vec::new())));
}

#[tokio::test]
async fn schema_is_registered_once() {
    let (runtime, p, channels) = setup(models::channel().unwrap());
    channels.create(&subject_data([("name", "a")]), None, None).await.unwrap();
    channels.create(&subject_data([("name", "b")]), None, None).await.unwrap();

    let adapter: Arc<dyn LinkAdapter> = Arc::new(runtime.clone());
    let second = SubjectRepository::new(adapter, p.clone(), Arc::new(models::channel().unwrap()));
    second.ensure_subject().await.unwrap();

    assert_eq!(count(&runtime, &p, HAS_SDNA), 1);
    assert_eq!(second.get_all(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn get_all_deduplicates_by_base_id() {
    let (runtime, p, channels) = setup(models::channel().unwrap());
    let created = channels
        .create(&subject_data([("name", "general")]), None, None)
        .await
        .unwrap();
    runtime.inject_link(
        &p,
        LinkExpression::new(
            "did:key:other",
            Utc::now(),
            Link::new(SELF, "flux://has_channel", created.id.clone()),
        ),
    );

    let handles = channels.get_all(None).await.unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].id, created.id);
    assert_eq!(channels.get_all_data(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn get_without_id_returns_first_instance() {
    let (_runtime, _p, channels) = setup(models::channel().unwrap());
    assert!(channels.get(None).await.unwrap().is_none());

    let first = channels.create(&subject_data([("name", "one")]), None, None).await.unwrap();
    channels.create(&subject_data([("name", "two")]), None, None).await.unwrap();

    assert_eq!(channels.get(None).await.unwrap().unwrap().id, first.id);
}

#[tokio::test]
async fn update_resolves_last_write_without_retracting() {
    let (runtime, p, channels) = setup(models::channel().unwrap());
    let created = channels.create(&subject_data([("name", "old")]), None, None).await.unwrap();

    let updated = channels
        .update(&created.id, &subject_data([("name", "new")]))
        .await
        .unwrap();

    assert_eq!(updated.get("name").and_then(PropertyValue::as_str), Some("new"));
    assert_eq!(count(&runtime, &p, NAME), 2);
}

#[tokio::test]
async fn update_of_missing_instance_is_not_found() {
    let (_runtime, _p, channels) = setup(models::channel().unwrap());
    let result = channels.update("nope", &subject_data([("name", "x")])).await;
    assert_matches!(result, Err(SubjectError::NotFound { id, .. }) if id == "nope");
}

#[tokio::test]
async fn writes_reject_unknown_and_read_only_properties() {
    let schema = SubjectSchema::builder("Note")
        .flag("flux://entry_type", "flux://note")
        .property("body", BODY)
        .property("checksum", "flux://checksum")
        .read_only("checksum")
        .build()
        .unwrap();
    let (runtime, p, notes) = setup(schema);

    let result = notes.create(&subject_data([("colour", "red")]), None, None).await;
    assert_matches!(result, Err(SubjectError::UnknownProperty { property, .. }) if property == "colour");

    let result = notes.create(&subject_data([("checksum", "abc")]), None, None).await;
    assert_matches!(result, Err(SubjectError::PropertyNotWritable { .. }));

    assert_eq!(count(&runtime, &p, "flux://entry_type"), 0);
}

#[tokio::test]
async fn failed_property_write_reports_partial_failure() {
    let (runtime, _p, messages) = setup(models::message().unwrap());
    messages.ensure_subject().await.unwrap();
    runtime.fail_when(|op| match op {
        Operation::AddLink(link) if link.predicate == BODY => {
            Some(AdapterError::unavailable("socket closed"))
        }
        _ => None,
    });

    let result = messages
        .create(&subject_data([("body", "hello")]), Some("m1"), None)
        .await;

    assert_matches!(result, Err(SubjectError::PartialWriteFailure { written, failed, .. }) => {
        assert_eq!(written.len(), 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.predicate, BODY);
    });
}

#[tokio::test]
async fn failed_flag_write_is_creation_failure() {
    let (runtime, _p, messages) = setup(models::message().unwrap());
    messages.ensure_subject().await.unwrap();
    runtime.fail_when(|op| match op {
        Operation::AddLink(_) => Some(AdapterError::unavailable("offline")),
        _ => None,
    });

    let result = messages.create(&subject_data([("body", "x")]), None, None).await;
    assert_matches!(result, Err(SubjectError::SubjectCreationFailed { .. }));
}

#[tokio::test]
async fn remove_detaches_and_purge_deletes() {
    let (runtime, p, channels) = setup(models::channel().unwrap());
    let kept = channels.create(&subject_data([("name", "kept")]), None, None).await.unwrap();
    let gone = channels.create(&subject_data([("name", "gone")]), None, None).await.unwrap();

    channels.remove(&kept.id).await.unwrap();
    assert!(channels.get_all(None).await.unwrap().iter().all(|h| h.id != kept.id));
    assert!(channels.get(Some(&kept.id)).await.unwrap().is_some());

    channels.purge(&gone.id).await.unwrap();
    assert!(channels.get(Some(&gone.id)).await.unwrap().is_none());
    assert!(runtime.links(&p).iter().all(|l| l.source() != gone.id));
}

#[tokio::test]
async fn unreachable_runtime_is_wrapped_with_context() {
    let (runtime, _p, channels) = setup(models::channel().unwrap());
    runtime.fail_when(|op| match op {
        Operation::Query(_) => Some(AdapterError::unavailable("down")),
        _ => None,
    });

    let result = channels.get_all(None).await;
    assert_matches!(
        result,
        Err(SubjectError::Adapter { class, source: AdapterError::RuntimeUnavailable { .. }, .. })
            if class == "Channel"
    );
}

#[tokio::test]
async fn custom_resolver_replaces_link_lookup() {
    let resolver: ResolveFn = Arc::new(
        |_adapter: Arc<dyn LinkAdapter>,
         _perspective: PerspectiveId,
         base: String|
         -> BoxFuture<'static, Result<PropertyValue, AdapterError>> {
            Box::pin(async move { Ok(PropertyValue::literal(json!(format!("body of {base}")))) })
        },
    );
    let schema = SubjectSchema::builder("Message")
        .flag("flux://entry_type", "flux://has_message")
        .property("body", BODY)
        .resolver("body", resolver)
        .build()
        .unwrap();
    let (_runtime, _p, messages) = setup(schema);

    let record = messages
        .create(&subject_data([("body", "ignored")]), Some("m9"), None)
        .await
        .unwrap();
    assert_eq!(record.get("body").and_then(PropertyValue::as_str), Some("body of m9"));
}
