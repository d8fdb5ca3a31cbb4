use entitykit_core::db::migrations::{latest_version, pending_migration_count};
use entitykit_core::db::{open_db, BootFlags, DbError};
use rusqlite::Connection;

#[test]
fn open_db_applies_all_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("store.sqlite"), BootFlags::default()).unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_column_exists(&conn, "entities", "attributes");
    assert_column_exists(&conn, "entities", "updated_at");
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
}

#[test]
fn open_db_creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("store.sqlite");

    open_db(&path, BootFlags::default()).unwrap();
    assert!(path.exists());
}

#[test]
fn opening_same_store_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite");

    let conn_first = open_db(&path, BootFlags::default()).unwrap();
    conn_first
        .execute(
            "INSERT INTO entities (id, kind, attributes) VALUES ('a', 'Book', '{}');",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path, BootFlags::default()).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let rows: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM entities;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn attributes_must_be_valid_json() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("store.sqlite"), BootFlags::default()).unwrap();

    let result = conn.execute(
        "INSERT INTO entities (id, kind, attributes) VALUES ('a', 'Book', 'not json');",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn opening_store_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path, BootFlags::default()).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn disabled_auto_migrate_refuses_pending_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.sqlite");

    let err = open_db(&path, MANUAL_MIGRATION).unwrap_err();
    assert!(matches!(
        err,
        DbError::MigrationRequired {
            db_version: 0,
            ..
        }
    ));

    let conn = Connection::open(&path).unwrap();
    assert_eq!(
        pending_migration_count(&conn).unwrap(),
        (0, latest_version() as usize)
    );
}

#[test]
fn disabled_auto_migrate_opens_current_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("current.sqlite");
    drop(open_db(&path, BootFlags::default()).unwrap());

    let conn = open_db(&path, MANUAL_MIGRATION).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
}

const MANUAL_MIGRATION: BootFlags = BootFlags {
    auto_migrate: false,
};

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_column_exists(conn: &Connection, table_name: &str, column_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM pragma_table_info(?1)
                WHERE name = ?2
            );",
            [table_name, column_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "column {table_name}.{column_name} does not exist");
}
