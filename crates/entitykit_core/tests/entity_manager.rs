use entitykit_core::{
    ContextKind, Entity, EntityManager, Pagination, PredicateBuilder, PredicateOperator, SortSpec,
    StoreConfiguration, StoreError, StoreRegistry,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Note {
    title: String,
    rank: i64,
}

impl Entity for Note {
    const ENTITY_NAME: &'static str = "Note";
}

fn note(title: &str, rank: i64) -> Note {
    Note {
        title: title.to_string(),
        rank,
    }
}

fn manager(path: &Path) -> EntityManager<Note> {
    let registry = StoreRegistry::new();
    EntityManager::new(
        &registry,
        StoreConfiguration::new("Notes").with_location(path),
        SortSpec::ascending("rank"),
    )
}

fn manager_with_handler(path: &Path) -> (EntityManager<Note>, Arc<Mutex<Vec<String>>>) {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let registry = StoreRegistry::new();
    let manager = EntityManager::new(
        &registry,
        StoreConfiguration::new("Notes")
            .with_location(path)
            .with_error_handler(move |err| sink.lock().unwrap().push(err.to_string())),
        SortSpec::ascending("rank"),
    );
    (manager, reported)
}

#[test]
fn blocking_form_returns_results() {
    let dir = tempfile::tempdir().unwrap();
    let notes = manager(&dir.path().join("notes.sqlite"));

    let created = notes
        .insert(ContextKind::Main, note("first", 1))
        .wait()
        .unwrap();
    notes.save_changes(ContextKind::Main).wait().unwrap();

    let fetched = notes
        .fetch_all(ContextKind::Main, None, None)
        .wait()
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id(), created.id());
    assert_eq!(notes.count(ContextKind::Main, None).wait().unwrap(), 1);
}

#[test]
fn work_on_one_context_runs_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let notes = manager(&dir.path().join("notes.sqlite"));

    let _ = notes.create(ContextKind::Background);
    let _ = notes.insert(ContextKind::Background, note("second", 2));
    let count = notes.count(ContextKind::Background, None).wait().unwrap();
    assert_eq!(count, 2);

    let (tx, rx) = mpsc::channel();
    for rank in 0..10 {
        let tx = tx.clone();
        notes
            .insert(ContextKind::Background, note("queued", rank))
            .on_complete(move |result| tx.send(result.unwrap().rank).unwrap());
    }
    let observed: Vec<i64> = (0..10)
        .map(|_| rx.recv_timeout(CALLBACK_TIMEOUT).unwrap())
        .collect();
    assert_eq!(observed, (0..10).collect::<Vec<_>>());
}

#[test]
fn completion_runs_on_context_thread() {
    let dir = tempfile::tempdir().unwrap();
    let notes = manager(&dir.path().join("notes.sqlite"));

    let (tx, rx) = mpsc::channel();
    notes
        .count(ContextKind::Background, None)
        .on_complete(move |_| {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        });

    let name = rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
    assert_eq!(name.as_deref(), Some("entitykit-Notes-background"));
}

#[test]
fn completion_receives_exactly_one_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let notes = manager(&dir.path().join("notes.sqlite"));
    let calls = Arc::new(AtomicUsize::new(0));

    let (tx, rx) = mpsc::channel();
    for query in ["rank > 1", "rank >"] {
        let calls = Arc::clone(&calls);
        let tx = tx.clone();
        notes
            .search_query(ContextKind::Main, query, None, None)
            .on_complete(move |result| {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(result.map(|found| found.len())).unwrap();
            });
    }

    let success = rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
    let failure = rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();
    assert_eq!(success.unwrap(), 0);
    assert!(matches!(failure, Err(StoreError::MalformedQuery { .. })));
    notes.count(ContextKind::Main, None).wait().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn persist_failure_reaches_completion_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.sqlite");
    let notes = manager(&path);
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_note BEFORE INSERT ON entities
         WHEN json_extract(NEW.attributes, '$.title') = 'reject'
         BEGIN
             SELECT RAISE(ABORT, 'rejected');
         END;",
    )
    .unwrap();

    notes
        .insert(ContextKind::Main, note("reject", 1))
        .wait()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    notes
        .save_changes(ContextKind::Main)
        .on_complete(move |result| tx.send(result).unwrap());

    assert!(matches!(
        rx.recv_timeout(CALLBACK_TIMEOUT).unwrap(),
        Err(StoreError::PersistFailed {
            context: ContextKind::Main,
            ..
        })
    ));
}

#[test]
fn success_handler_is_skipped_on_failure_and_error_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (notes, reported) = manager_with_handler(&dir.path().join("notes.sqlite"));
    let invoked = Arc::new(AtomicUsize::new(0));

    let flag = Arc::clone(&invoked);
    notes
        .search_query(ContextKind::Main, "rank ==", None, None)
        .on_success(move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        });
    let flag = Arc::clone(&invoked);
    notes
        .exists(
            ContextKind::Main,
            PredicateBuilder::new()
                .condition("rank", PredicateOperator::Equals, 1)
                .build()
                .unwrap(),
        )
        .on_success(move |found| {
            assert!(!found);
            flag.fetch_add(1, Ordering::SeqCst);
        });

    // Barrier: queued after both callbacks on the same context.
    notes.count(ContextKind::Main, None).wait().unwrap();

    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("malformed filter"));
}

#[test]
fn failed_store_completes_tasks_with_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let registry = StoreRegistry::new();
    let notes: EntityManager<Note> = EntityManager::new(
        &registry,
        StoreConfiguration::new("Notes")
            .with_location(dir.path().join("fresh.sqlite"))
            .with_auto_migrate(false),
        SortSpec::ascending("rank"),
    );

    let task = notes.fetch_all(ContextKind::Background, None, Some(Pagination::limit(1)));
    assert_eq!(task.context(), ContextKind::Background);
    assert!(matches!(task.wait(), Err(StoreError::StoreOpenFailed { .. })));

    let (tx, rx) = mpsc::channel();
    notes
        .count(ContextKind::Main, None)
        .on_complete(move |result| tx.send(result.is_err()).unwrap());
    assert!(rx.try_recv().unwrap());
}

#[test]
fn update_and_delete_run_on_owning_context() {
    let dir = tempfile::tempdir().unwrap();
    let notes = manager(&dir.path().join("notes.sqlite"));
    for rank in 0..3 {
        let _ = notes.insert(ContextKind::Main, note("seed", rank));
    }
    notes.save_changes(ContextKind::Main).wait().unwrap();

    let mut loaded = notes
        .fetch_all(ContextKind::Background, None, None)
        .wait()
        .unwrap();
    let mut first = loaded.remove(0);
    first.title = "edited".to_string();
    notes.update(first.clone()).wait().unwrap();
    notes.save_changes(ContextKind::Background).wait().unwrap();

    let main_saves = notes
        .stack()
        .main_context()
        .unwrap()
        .stats()
        .saves;
    notes.delete(loaded.remove(0)).wait().unwrap();
    assert_eq!(notes.stack().main_context().unwrap().stats().saves, main_saves);

    let remaining = notes
        .fetch_all(ContextKind::Main, None, None)
        .wait()
        .unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].title, "edited");
    assert_eq!(remaining[1].rank, 2);
}

#[test]
fn delete_all_then_count_is_zero() {
    let dir = tempfile::tempdir().unwrap();
    let notes = manager(&dir.path().join("notes.sqlite"));
    for rank in 0..4 {
        let _ = notes.insert(ContextKind::Background, note("bulk", rank));
    }
    notes.save_changes(ContextKind::Background).wait().unwrap();

    let removed = notes.delete_all(ContextKind::Background).wait().unwrap();
    assert_eq!(removed, 4);
    assert_eq!(notes.count(ContextKind::Background, None).wait().unwrap(), 0);
    assert_eq!(notes.count(ContextKind::Main, None).wait().unwrap(), 0);
}

#[test]
fn search_with_prebuilt_predicate() {
    let dir = tempfile::tempdir().unwrap();
    let notes = manager(&dir.path().join("notes.sqlite"));
    for rank in 0..6 {
        let _ = notes.insert(ContextKind::Main, note(&format!("n{rank}"), rank));
    }

    let predicate = PredicateBuilder::new()
        .between("rank", 2, 4)
        .build()
        .unwrap();
    let found = notes
        .search(
            ContextKind::Main,
            predicate,
            Some(SortSpec::descending("rank")),
            None,
        )
        .wait()
        .unwrap();
    let ranks: Vec<i64> = found.iter().map(|entity| entity.rank).collect();
    assert_eq!(ranks, vec![4, 3, 2]);
}
