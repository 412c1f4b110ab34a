//! End-to-end store scenarios against both backends.

use std::sync::Arc;

use parking_lot::Mutex;
use pm_domain::config::{BackendChoice, StoreConfig};
use pm_domain::model::{Actor, AnnotationStatus, EventKind, EventPayload, NewAnnotation};
use pm_events::EventBus;
use pm_store::{BackendKind, Store, TenantStore};

fn comment(text: &str) -> NewAnnotation {
    NewAnnotation {
        comment: text.into(),
        element: "h1".into(),
        element_path: "body > h1".into(),
        timestamp: 1_700_000_000_000,
        ..NewAnnotation::default()
    }
}

fn memory_config() -> StoreConfig {
    StoreConfig {
        backend: BackendChoice::Memory,
        ..StoreConfig::default()
    }
}

fn create_resolve_replay(store: &Store) -> anyhow::Result<()> {
    let session = store.create_session("http://localhost:3000", None)?;
    let annotation = store
        .add_annotation(&session.id, comment("heading is too large"))?
        .expect("session exists");
    let created_seq = store.bus().sequence();

    store.update_annotation_status(&annotation.id, AnnotationStatus::Resolved, Some(Actor::Agent))?;

    let replay = store.events_since(&session.id, created_seq - 1)?;
    assert_eq!(replay.len(), 2);
    assert_eq!(replay[0].kind, EventKind::AnnotationCreated);
    assert_eq!(replay[0].sequence, created_seq);
    assert_eq!(replay[1].kind, EventKind::AnnotationUpdated);
    assert_eq!(replay[1].sequence, created_seq + 1);
    match &replay[1].payload {
        EventPayload::Annotation(a) => {
            assert_eq!(a.status, AnnotationStatus::Resolved);
            assert_eq!(a.resolved_by, Some(Actor::Agent));
            assert!(a.resolved_at.is_some());
        }
        other => panic!("unexpected payload {other:?}"),
    }
    Ok(())
}

#[test]
fn create_resolve_replay_in_memory() -> anyhow::Result<()> {
    let store = Store::open(&memory_config(), EventBus::new())?;
    assert_eq!(store.backend_kind(), BackendKind::Memory);
    create_resolve_replay(&store)
}

#[test]
fn create_resolve_replay_on_sqlite() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = StoreConfig {
        backend: BackendChoice::Sqlite,
        path: Some(dir.path().join("store.db")),
        ..StoreConfig::default()
    };
    let store = Store::open(&config, EventBus::new())?;
    assert_eq!(store.backend_kind(), BackendKind::Sqlite);
    create_resolve_replay(&store)
}

#[test]
fn sequence_survives_restart_on_sqlite() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = StoreConfig {
        backend: BackendChoice::Sqlite,
        path: Some(dir.path().join("store.db")),
        ..StoreConfig::default()
    };

    let session_id = {
        let store = Store::open(&config, EventBus::new())?;
        let s = store.create_session("http://localhost", None)?;
        store.add_annotation(&s.id, comment("a"))?;
        store.add_annotation(&s.id, comment("b"))?;
        s.id
    };

    let store = Store::open(&config, EventBus::new())?;
    assert_eq!(store.bus().sequence(), 3);
    assert_eq!(store.session_annotations(&session_id)?.len(), 2);
    let a = store.add_annotation(&session_id, comment("c"))?.expect("session persisted");
    let last = store.events_since(&session_id, 3)?;
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].sequence, 4);
    assert_eq!(store.get_annotation(&a.id)?, Some(a));
    Ok(())
}

#[test]
fn zero_retention_prunes_on_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = StoreConfig {
        backend: BackendChoice::Sqlite,
        path: Some(dir.path().join("store.db")),
        ..StoreConfig::default()
    };
    let session_id = {
        let store = Store::open(&config, EventBus::new())?;
        store.create_session("http://localhost", None)?.id
    };

    config.event_retention_days = 0;
    let store = Store::open(&config, EventBus::new())?;
    assert!(store.events_since(&session_id, 0)?.is_empty());
    // Numbering continues even though the log was emptied.
    assert_eq!(store.bus().sequence(), 1);
    Ok(())
}

#[test]
fn session_and_user_subscribers_are_isolated() -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&memory_config(), EventBus::new())?);
    let tenants = TenantStore::new(store.clone());

    let org = tenants.create_organization("Acme")?;
    let alice = tenants.create_user("alice@acme.test", &org.id, None)?;
    let bob = tenants.create_user("bob@acme.test", &org.id, None)?;

    let alice_seen = Arc::new(Mutex::new(Vec::new()));
    let sink = alice_seen.clone();
    let _alice_sub = tenants.user_bus().subscribe_for_user(&alice.id, move |e| {
        sink.lock().push(e.sequence);
        Ok(())
    });

    let a_session = tenants.create_session_for_user(&alice.id, "http://localhost/a", None)?;
    let b_session = tenants.create_session_for_user(&bob.id, "http://localhost/b", None)?;

    let scoped = Arc::new(Mutex::new(Vec::new()));
    let sink = scoped.clone();
    let _scoped_sub = tenants.user_bus().subscribe_to_session_for_user(
        &bob.id,
        &b_session.id,
        move |e| {
            sink.lock().push(e.session_id.clone());
            Ok(())
        },
    );

    tenants.add_annotation_for_user(&alice.id, &a_session.id, comment("a1"))?;
    tenants.add_annotation_for_user(&bob.id, &b_session.id, comment("b1"))?;
    // Bob cannot write into Alice's session.
    assert!(tenants
        .add_annotation_for_user(&bob.id, &a_session.id, comment("intrusion"))?
        .is_none());

    assert_eq!(*alice_seen.lock(), vec![1, 3]);
    assert_eq!(*scoped.lock(), vec![b_session.id.clone()]);

    // A global-bus mutation interleaves with the same sequence.
    let shared = store.create_session("http://localhost/shared", None)?;
    assert_eq!(store.events_since(&shared.id, 0)?[0].sequence, 5);
    Ok(())
}
