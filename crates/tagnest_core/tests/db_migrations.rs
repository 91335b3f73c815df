use rusqlite::Connection;
use tagnest_core::db::migrations::latest_version;
use tagnest_core::db::{open_db, open_db_in_memory, DbError};
use tagnest_core::{SqliteWorkspaceRepository, WorkspaceRepoError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "groups",
        "tags",
        "group_member_tags",
        "group_member_groups",
        "cards",
        "card_tags",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tagnest.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "group_member_groups");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
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
fn repository_refuses_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    match SqliteWorkspaceRepository::try_new(conn) {
        Err(WorkspaceRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        }) => {
            assert_eq!(expected_version, latest_version());
            assert_eq!(actual_version, 0);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unmigrated connection must be refused"),
    }
}

#[test]
fn nesting_a_group_in_itself_violates_schema_check() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO groups (group_uuid, workspace_uuid, name) VALUES ('g1', 'w1', 'a');",
        [],
    )
    .unwrap();

    let result = conn.execute(
        "INSERT INTO group_member_groups (parent_uuid, child_uuid) VALUES ('g1', 'g1');",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
