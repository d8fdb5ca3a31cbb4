use entitykit_core::{
    ContextKind, Entity, Repository, SortSpec, StackState, StoreConfiguration, StoreError,
    StoreRegistry,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Book {
    title: String,
}

impl Entity for Book {
    const ENTITY_NAME: &'static str = "Book";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Author {
    name: String,
}

impl Entity for Author {
    const ENTITY_NAME: &'static str = "Author";
}

type Reported = Arc<Mutex<Vec<String>>>;

fn configuration_with_handler(path: &Path) -> (StoreConfiguration, Reported) {
    let reported: Reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let configuration = StoreConfiguration::new("Library")
        .with_location(path)
        .with_error_handler(move |err| {
            let label = match err {
                StoreError::StoreOpenFailed { .. } => "open",
                StoreError::PersistFailed { .. } => "persist",
                _ => "other",
            };
            sink.lock().unwrap().push(label.to_string());
        });
    (configuration, reported)
}

fn reject_titles(path: &Path, title: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TRIGGER reject_title BEFORE INSERT ON entities
         WHEN json_extract(NEW.attributes, '$.title') = '{title}'
         BEGIN
             SELECT RAISE(ABORT, 'rejected');
         END;"
    ))
    .unwrap();
}

fn book(title: &str) -> Book {
    Book {
        title: title.to_string(),
    }
}

fn stored_rows(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT COUNT(*) FROM entities;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn get_is_idempotent_per_identity() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new();
    let path = dir.path().join("a.sqlite");
    let configuration = StoreConfiguration::new("Library").with_location(path);

    let first = registry.get(configuration.clone());
    let second = registry.get(configuration);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    assert_eq!(first.state(), StackState::Ready);
}

#[test]
fn concurrent_get_creates_one_stack() {
    const CALLERS: usize = 16;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.sqlite");
    let registry = Arc::new(StoreRegistry::new());
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.get(StoreConfiguration::new("Library").with_location(path))
            })
        })
        .collect();
    let stacks: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(registry.len(), 1);
    assert!(stacks.iter().all(|stack| Arc::ptr_eq(stack, &stacks[0])));
    assert_eq!(stacks[0].state(), StackState::Ready);
}

#[test]
fn identities_differing_in_location_get_separate_stacks() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new();

    let first_path = dir.path().join("a.sqlite");
    let second_path = dir.path().join("b.sqlite");

    let first = registry.get(StoreConfiguration::new("Library").with_location(first_path));
    let second = registry.get(StoreConfiguration::new("Library").with_location(second_path));

    assert!(!Arc::ptr_eq(&first, &second));
    let listed = registry.list();
    assert_eq!(listed.len(), 2);
    assert!(Arc::ptr_eq(&listed[0], &first));
    assert!(Arc::ptr_eq(&listed[1], &second));
    assert!(registry.find(first.identity()).is_some());
}

#[test]
fn repositories_of_different_kinds_share_one_stack() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new();
    let path = dir.path().join("lib.sqlite");
    let configuration = StoreConfiguration::new("Library").with_location(path);

    let books = Repository::<Book>::new(
        &registry,
        configuration.clone(),
        SortSpec::ascending("title"),
    );
    let authors = Repository::<Author>::new(&registry, configuration, SortSpec::ascending("name"));

    assert!(Arc::ptr_eq(books.stack(), authors.stack()));
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(
        &books.context(ContextKind::Main).unwrap(),
        &authors.context(ContextKind::Main).unwrap()
    ));
}

#[test]
fn contexts_are_created_once_and_are_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new();
    let path = dir.path().join("lib.sqlite");
    let stack = registry.get(StoreConfiguration::new("Library").with_location(path));

    assert!(stack.existing_context(ContextKind::Main).is_none());
    let main = stack.main_context().unwrap();
    let background = stack.background_context().unwrap();

    assert!(Arc::ptr_eq(&main, &stack.context(ContextKind::Main).unwrap()));
    assert!(!Arc::ptr_eq(&main, &background));
    assert_eq!(main.kind(), ContextKind::Main);
    assert_eq!(background.kind(), ContextKind::Background);
}

#[test]
fn open_failure_is_reported_and_not_retried_implicitly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let (configuration, reported) = configuration_with_handler(&path);
    let registry = StoreRegistry::new();
    let stack = registry.get(configuration);

    assert!(matches!(stack.state(), StackState::Failed(_)));
    assert_eq!(*reported.lock().unwrap(), vec!["open".to_string()]);

    let err = stack.main_context().err().unwrap();
    assert!(matches!(err, StoreError::StoreOpenFailed { .. }));
    assert_eq!(reported.lock().unwrap().len(), 1);

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 0;").unwrap();
    drop(conn);

    stack.reopen().unwrap();
    assert_eq!(stack.state(), StackState::Ready);
    assert!(stack.main_context().is_ok());
}

#[test]
fn disabled_auto_migrate_fails_on_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let (configuration, reported) = configuration_with_handler(&dir.path().join("fresh.sqlite"));
    let registry = StoreRegistry::new();

    let stack = registry.get(configuration.with_auto_migrate(false));

    match stack.state() {
        StackState::Failed(reason) => assert!(reason.contains("migration")),
        other => panic!("unexpected state: {other:?}"),
    }
    assert_eq!(reported.lock().unwrap().len(), 1);
}

#[test]
fn failed_repository_operations_surface_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new();
    let configuration = StoreConfiguration::new("Library")
        .with_location(dir.path().join("fresh.sqlite"))
        .with_auto_migrate(false);
    let books = Repository::<Book>::new(&registry, configuration, SortSpec::ascending("title"));

    assert!(matches!(
        books.count(ContextKind::Main, None),
        Err(StoreError::StoreOpenFailed { .. })
    ));
}

#[test]
fn flush_all_persists_every_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.sqlite");
    let registry = StoreRegistry::new();
    let books = Repository::<Book>::new(
        &registry,
        StoreConfiguration::new("Library").with_location(&path),
        SortSpec::ascending("title"),
    );

    books
        .insert(ContextKind::Main, book("Dune"))
        .unwrap();
    books
        .insert(ContextKind::Background, book("Emma"))
        .unwrap();
    assert_eq!(stored_rows(&path), 0);

    registry.flush_all();

    assert_eq!(stored_rows(&path), 2);
    assert!(!books.context(ContextKind::Main).unwrap().has_changes());
    assert!(!books.context(ContextKind::Background).unwrap().has_changes());
}

#[test]
fn flush_all_reports_save_failures_and_keeps_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.sqlite");
    let (configuration, reported) = configuration_with_handler(&path);
    let registry = StoreRegistry::new();
    let books = Repository::<Book>::new(&registry, configuration, SortSpec::ascending("title"));
    reject_titles(&path, "reject");

    books
        .insert(ContextKind::Main, book("reject"))
        .unwrap();

    registry.flush_all();

    assert_eq!(*reported.lock().unwrap(), vec!["persist".to_string()]);
    assert_eq!(
        books.context(ContextKind::Main).unwrap().pending_change_count(),
        1
    );
    assert_eq!(stored_rows(&path), 0);
}

#[test]
fn save_changes_propagates_persist_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.sqlite");
    let registry = StoreRegistry::new();
    let stack = registry.get(StoreConfiguration::new("Library").with_location(&path));
    let books = Repository::<Book>::new(
        &registry,
        StoreConfiguration::new("Library").with_location(&path),
        SortSpec::ascending("title"),
    );
    reject_titles(&path, "reject");

    books
        .insert(ContextKind::Background, book("reject"))
        .unwrap();

    let err = stack.save_changes(ContextKind::Background).unwrap_err();
    assert!(matches!(
        err,
        StoreError::PersistFailed {
            context: ContextKind::Background,
            ..
        }
    ));
    assert!(stack.background_context().unwrap().has_changes());
}
