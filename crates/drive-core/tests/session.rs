use drive_core::{
    ChangeEvent, Collection, EngineEvent, EngineOptions, InMemoryRemote, RemoteError, StarTarget,
    SyncEngine, ToggleOutcome,
};

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn dir(id: &str, name: &str, parent: &str, created: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "parentId": parent,
        "isStarred": false,
        "created": created,
        "updated": created,
        "collectionId": "pbc_dirs",
        "collectionName": "directories"
    })
}

fn file(id: &str, name: &str, parent: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "directoryRelationId": parent,
        "size": 2048,
        "keywords": "q1,finance",
        "isStarred": false,
        "created": "2024-02-01T10:00:00.000Z",
        "updated": "2024-02-01T10:00:00.000Z"
    })
}

async fn session() -> (Arc<InMemoryRemote>, SyncEngine<InMemoryRemote>) {
    let remote = Arc::new(InMemoryRemote::new());
    remote.seed(
        Collection::Directories,
        vec![
            dir("docs", "Docs", "", "2024-01-01T00:00:00.000Z"),
            dir("y2024", "2024", "docs", "2024-01-02T00:00:00.000Z"),
        ],
    );
    remote.seed(
        Collection::Files,
        vec![
            file("f1", "Q1 Report.pdf", "y2024"),
            file("f2", "reporting_tool.exe", "docs"),
            file("f3", "holiday.jpg", "missing"),
        ],
    );
    let engine = SyncEngine::start(Arc::clone(&remote), EngineOptions::default())
        .await
        .unwrap();
    (remote, engine)
}

#[tokio::test]
async fn test_created_directory_arrives_through_stream() {
    let (_remote, engine) = session().await;

    let created = engine.create_directory(" Invoices ", "y2024").await.unwrap();
    assert_eq!(created.name, "Invoices");
    // Not visible until the stream event is applied.
    assert!(engine.resolve_by_full_path("/Docs/2024/Invoices/").is_none());

    assert_eq!(engine.process_pending().await, 1);
    let resolved = engine.resolve_by_full_path("/Docs/2024/Invoices/").unwrap();
    assert_eq!(resolved.id, created.id);
}

#[tokio::test]
async fn test_rename_moves_record_to_end() {
    let (_remote, engine) = session().await;

    engine.rename_directory("docs", "Papers").await.unwrap();
    engine.process_pending().await;

    let ids: Vec<_> = engine.directories().iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids, vec!["y2024", "docs"]);
    assert!(engine.resolve_by_full_path("/Papers/2024/").is_some());
    assert!(engine.resolve_by_full_path("/Docs/").is_none());
}

#[tokio::test]
async fn test_star_toggle_commits_and_mirror_confirms() {
    let (_remote, engine) = session().await;
    let target = StarTarget::File("f1".into());

    let outcome = engine.toggle_star(&target).await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Committed(true));
    assert!(engine.star_control(&target).unwrap().value());

    engine.process_pending().await;
    let starred = engine.starred();
    assert_eq!(starred.files.len(), 1);
    assert_eq!(starred.files[0].id, "f1");
}

#[tokio::test]
async fn test_star_toggle_reverts_on_remote_failure() {
    let (remote, engine) = session().await;
    let reverted = Arc::new(Mutex::new(Vec::new()));
    let reverted_clone = Arc::clone(&reverted);
    let _sub = engine.events().subscribe(move |event: EngineEvent| {
        if let EngineEvent::StarReverted { id, .. } = event {
            reverted_clone.lock().unwrap().push(id);
        }
    });

    remote.fail_next_write(RemoteError::Unavailable("offline".into()));
    let target = StarTarget::Directory("docs".into());
    let outcome = engine.toggle_star(&target).await.unwrap();

    assert_eq!(outcome, ToggleOutcome::Reverted(false));
    let control = engine.star_control(&target).unwrap();
    assert!(!control.value());
    assert!(!control.is_in_flight());
    assert_eq!(*reverted.lock().unwrap(), vec!["docs".to_string()]);
    assert_eq!(engine.process_pending().await, 0);
}

#[tokio::test]
async fn test_control_follows_remote_edits() {
    let (remote, engine) = session().await;
    let target = StarTarget::Directory("y2024".into());
    let control = engine.star_control(&target).unwrap();
    assert!(!control.value());

    let mut starred = dir("y2024", "2024", "docs", "2024-01-02T00:00:00.000Z");
    starred["isStarred"] = json!(true);
    remote.publish(Collection::Directories, ChangeEvent::update(starred));
    engine.process_pending().await;

    assert!(engine.star_control(&target).unwrap().value());
    assert_eq!(engine.starred().directories[0].full_path, "/Docs/2024/");
}

#[tokio::test]
async fn test_malformed_event_is_dropped_and_reported() {
    let (remote, engine) = session().await;
    let before = engine.files();

    remote.publish(
        Collection::Files,
        ChangeEvent::create(json!({"id": "bad", "name": "x", "size": -1})),
    );
    assert_eq!(engine.process_next().await, Some(Collection::Files));

    assert_eq!(engine.files(), before);
    let skipped = engine.diagnostics().entries();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].record_id.as_deref(), Some("bad"));
}

#[tokio::test]
async fn test_search_and_browse() {
    let (_remote, engine) = session().await;

    let hits: Vec<_> = engine
        .search("report")
        .into_iter()
        .map(|hit| (hit.file.name, hit.full_path))
        .collect();
    assert_eq!(
        hits,
        vec![
            ("Q1 Report.pdf".to_string(), "/Docs/2024/".to_string()),
            ("reporting_tool.exe".to_string(), "/Docs/".to_string()),
        ]
    );
    assert!(engine.search("").is_empty());
    assert!(engine.search("holiday").is_empty());
    assert_eq!(engine.files().len(), 3);

    let listing = engine.browse("/Docs/2024").unwrap();
    assert_eq!(listing.files[0].keyword_list(), vec!["q1", "finance"]);
}

#[tokio::test]
async fn test_keywords_round_trip_through_remote() {
    let (_remote, engine) = session().await;

    let updated = engine
        .set_file_keywords("f1", &[" tax ", "", "2024"])
        .await
        .unwrap();
    assert_eq!(updated.keywords, "tax,2024");

    engine.process_pending().await;
    assert_eq!(engine.files().last().unwrap().id, "f1");
}

#[tokio::test]
async fn test_missing_records_are_errors() {
    let (_remote, engine) = session().await;

    assert!(engine.star_control(&StarTarget::File("nope".into())).is_err());
    assert!(engine.rename_file("nope", "x").await.is_err());
    assert!(engine.delete_directory("nope").await.is_err());
}

#[tokio::test]
async fn test_dropping_engine_releases_streams() {
    let (remote, engine) = session().await;
    for collection in Collection::ALL {
        assert_eq!(remote.subscriber_count(collection), 1);
    }

    drop(engine);
    for collection in Collection::ALL {
        assert_eq!(remote.subscriber_count(collection), 0);
    }
    // Publishing after teardown reaches nobody.
    remote.publish(Collection::Directories, ChangeEvent::delete(json!({"id": "docs"})));
}

#[tokio::test]
async fn test_settings_created_and_updated() {
    let (_remote, engine) = session().await;

    let setting = engine.create_setting("anthropicApiKey", false).await.unwrap();
    engine.process_pending().await;
    assert_eq!(engine.enabled_setting_value("anthropicApiKey"), None);

    engine.update_setting(&setting.id, true, "sk-test").await.unwrap();
    engine.process_pending().await;
    assert_eq!(
        engine.enabled_setting_value("anthropicApiKey").as_deref(),
        Some("sk-test")
    );
}
