//! End-to-end tests for the façade against file-backed SQLite databases.

use polyquery::engine::types::{ColumnInfo, ForeignKeyEntry, PrimaryKeyEntry, TableInfo, Value};
use polyquery::{facade, ConnectionDescriptor, EngineKind, MetadataAction};
use serde_json::json;
use tempfile::TempDir;

/// Fresh database file inside a temp dir that lives as long as the guard
fn fresh_db() -> (TempDir, ConnectionDescriptor) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("app.db");
    let descriptor = ConnectionDescriptor::new(EngineKind::Sqlite, path.to_string_lossy());
    (dir, descriptor)
}

async fn run_all(descriptor: &ConnectionDescriptor, statements: &[&str]) {
    for statement in statements {
        let result = facade::execute_query(descriptor, statement).await;
        assert!(!result.is_error(), "{statement}: {:?}", result.error_message());
    }
}

async fn users_db() -> (TempDir, ConnectionDescriptor) {
    let (dir, descriptor) = fresh_db();
    run_all(
        &descriptor,
        &["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"],
    )
    .await;
    (dir, descriptor)
}

#[tokio::test]
async fn users_table_is_listed() {
    let (_dir, descriptor) = users_db().await;

    let tables = facade::get_tables(&descriptor).await;
    assert_eq!(
        serde_json::to_value(&tables).expect("serializable"),
        json!([{ "name": "users", "type": "TABLE" }])
    );
    assert_eq!(tables.data(), Some(&vec![TableInfo::table("users", None)]));
}

#[tokio::test]
async fn users_columns_flag_the_primary_key() {
    let (_dir, descriptor) = users_db().await;

    let columns = facade::get_columns(&descriptor, "users")
        .await
        .into_result()
        .expect("columns");
    assert_eq!(
        columns,
        vec![
            ColumnInfo {
                name: "id".into(),
                data_type: "INTEGER".into(),
                nullable: true,
                default_value: None,
                primary_key: true,
            },
            ColumnInfo {
                name: "name".into(),
                data_type: "TEXT".into(),
                nullable: true,
                default_value: None,
                primary_key: false,
            },
        ]
    );
}

#[tokio::test]
async fn columns_follow_creation_order_and_constraints() {
    let (_dir, descriptor) = fresh_db();
    run_all(
        &descriptor,
        &["CREATE TABLE orders (
            zeta TEXT NOT NULL,
            alpha INTEGER DEFAULT 7,
            mid REAL,
            PRIMARY KEY (alpha, zeta)
        )"],
    )
    .await;

    let columns = facade::get_columns(&descriptor, "orders")
        .await
        .into_result()
        .expect("columns");

    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["zeta", "alpha", "mid"]);
    assert!(!columns[0].nullable);
    assert!(columns[1].nullable);
    assert_eq!(columns[1].default_value.as_deref(), Some("7"));
    let pk: Vec<bool> = columns.iter().map(|c| c.primary_key).collect();
    assert_eq!(pk, [true, true, false]);

    let keys = facade::get_primary_keys(&descriptor, "orders")
        .await
        .into_result()
        .expect("keys");
    assert_eq!(
        keys,
        vec![
            PrimaryKeyEntry {
                column_name: "alpha".into(),
                position: 1,
            },
            PrimaryKeyEntry {
                column_name: "zeta".into(),
                position: 2,
            },
        ]
    );
}

#[tokio::test]
async fn select_one_is_a_single_cell_rowset() {
    let (_dir, descriptor) = fresh_db();

    let result = facade::execute_query(&descriptor, "SELECT 1").await;
    let columns = result.columns().expect("rowset");
    let rows = result.row_set().expect("rowset");

    assert_eq!(columns.len(), 1);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 1);
    assert_eq!(rows[0].values().next(), Some(&Value::Int(1)));
}

#[tokio::test]
async fn every_row_has_one_key_per_column_in_engine_order() {
    let (_dir, descriptor) = users_db().await;
    run_all(
        &descriptor,
        &[
            "INSERT INTO users (name) VALUES ('ada')",
            "INSERT INTO users (name) VALUES ('grace')",
            "INSERT INTO users (name) VALUES (NULL)",
        ],
    )
    .await;

    let result = facade::execute_query(&descriptor, "SELECT id, name FROM users ORDER BY id").await;
    let columns = result.columns().expect("rowset");
    let rows = result.row_set().expect("rowset");

    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.len(), columns.len());
        assert_eq!(row.keys().collect::<Vec<_>>(), ["id", "name"]);
    }
    assert_eq!(rows[0].get("name"), Some(&Value::Text("ada".into())));
    assert_eq!(rows[2].get("name"), Some(&Value::Null));
    assert_eq!(rows[2].get("id").and_then(Value::as_i64), Some(3));
}

#[tokio::test]
async fn update_reports_a_status_without_rows() {
    let (_dir, descriptor) = users_db().await;
    run_all(
        &descriptor,
        &[
            "INSERT INTO users (name) VALUES ('a')",
            "INSERT INTO users (name) VALUES ('b')",
        ],
    )
    .await;

    let result = facade::execute_query(&descriptor, "UPDATE users SET name = 'z'").await;
    assert!(result.columns().is_none());
    assert!(result.row_set().is_none());
    assert!(result
        .message()
        .expect("status form")
        .starts_with("Success. Changes: 2"));

    let wire = serde_json::to_value(&result).expect("serializable");
    assert!(wire.get("message").is_some());
    assert!(wire.get("rows").is_none());
    assert!(wire.get("columns").is_none());
}

#[tokio::test]
async fn dropping_a_missing_table_is_the_error_form() {
    let (_dir, descriptor) = fresh_db();

    let result = facade::execute_query(&descriptor, "DROP TABLE nonexistent_table_xyz").await;
    let message = result.error_message().expect("error form");
    assert!(message.contains("nonexistent_table_xyz"));
    assert!(result.columns().is_none());
    assert!(result.message().is_none());

    let wire = serde_json::to_value(&result).expect("serializable");
    assert_eq!(wire.as_object().map(|o| o.len()), Some(1));
}

#[tokio::test]
async fn syntax_errors_are_the_error_form() {
    let (_dir, descriptor) = fresh_db();

    let result = facade::execute_query(&descriptor, "SELEC oops").await;
    assert!(result.is_error());
}

#[tokio::test]
async fn views_indexes_and_ddl() {
    let (_dir, descriptor) = users_db().await;
    run_all(
        &descriptor,
        &[
            "CREATE INDEX idx_users_name ON users (name)",
            "CREATE VIEW named_users AS SELECT name FROM users WHERE name IS NOT NULL",
        ],
    )
    .await;

    let views = facade::get_views(&descriptor).await.into_result().expect("views");
    assert_eq!(views, vec![TableInfo::view("named_users", None)]);

    let tables = facade::get_tables(&descriptor).await.into_result().expect("tables");
    assert_eq!(tables.len(), 1, "views are not tables");

    let all = facade::get_indexes(&descriptor, None).await.into_result().expect("indexes");
    assert!(all.iter().any(|i| i.name == "idx_users_name" && i.table_name == "users"));

    let none = facade::get_indexes(&descriptor, Some("missing"))
        .await
        .into_result()
        .expect("indexes");
    assert!(none.is_empty());

    let ddl = facade::get_ddl(&descriptor, "users").await.into_result().expect("ddl");
    assert_eq!(ddl, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)");
}

#[tokio::test]
async fn foreign_keys_carry_referential_actions() {
    let (_dir, descriptor) = users_db().await;
    run_all(
        &descriptor,
        &["CREATE TABLE posts (
            id INTEGER PRIMARY KEY,
            author_id INTEGER REFERENCES users(id) ON DELETE CASCADE
        )"],
    )
    .await;

    let keys = facade::get_foreign_keys(&descriptor, "posts")
        .await
        .into_result()
        .expect("foreign keys");
    assert_eq!(
        keys,
        vec![ForeignKeyEntry {
            column_name: "author_id".into(),
            referenced_table: "users".into(),
            referenced_column: "id".into(),
            constraint_name: None,
            on_update: Some("NO ACTION".into()),
            on_delete: Some("CASCADE".into()),
        }]
    );

    let none = facade::get_foreign_keys(&descriptor, "users")
        .await
        .into_result()
        .expect("foreign keys");
    assert!(none.is_empty());
}

#[tokio::test]
async fn table_names_are_bound_not_spliced() {
    let (_dir, descriptor) = users_db().await;

    let columns = facade::get_columns(&descriptor, "users'); DROP TABLE users; --")
        .await
        .into_result()
        .expect("columns");
    assert!(columns.is_empty());

    let tables = facade::get_tables(&descriptor).await.into_result().expect("tables");
    assert_eq!(tables.len(), 1);
}

#[tokio::test]
async fn metadata_dispatch_returns_json_payloads() {
    let (_dir, descriptor) = users_db().await;

    let tables = facade::run_metadata(MetadataAction::ListTables, &descriptor, None)
        .await
        .expect("dispatched");
    assert_eq!(tables, json!([{ "name": "users", "type": "TABLE" }]));

    let keys = facade::run_metadata(MetadataAction::ListPrimaryKeys, &descriptor, Some("users"))
        .await
        .expect("dispatched");
    assert_eq!(keys, json!([{ "columnName": "id", "pkPosition": 1 }]));

    let missing = facade::run_metadata(MetadataAction::GetDdl, &descriptor, None).await;
    assert_eq!(
        missing.expect_err("table required").to_string(),
        "Missing tableName"
    );
}

#[tokio::test]
async fn unreachable_database_is_the_error_form_for_metadata() {
    let descriptor = ConnectionDescriptor::new(
        EngineKind::Sqlite,
        "/nonexistent-dir/definitely/missing.db",
    );

    let tables = facade::get_tables(&descriptor).await;
    assert!(tables.is_error());

    let value = facade::run_metadata(MetadataAction::ListViews, &descriptor, None)
        .await
        .expect("dispatched");
    assert!(value.get("error").and_then(|e| e.as_str()).is_some());
}

#[tokio::test]
async fn concurrent_calls_are_independent() {
    let (_dir, descriptor) = users_db().await;

    let (a, b, c) = tokio::join!(
        facade::execute_query(&descriptor, "SELECT count(*) AS n FROM users"),
        facade::get_tables(&descriptor),
        facade::get_columns(&descriptor, "users"),
    );
    assert!(!a.is_error());
    assert!(!b.is_error());
    assert!(!c.is_error());
}

#[tokio::test]
async fn a_batch_is_refused_without_running_any_part() {
    let (_dir, descriptor) = users_db().await;

    let result = facade::execute_query(&descriptor, "SELECT 1 AS x; DROP TABLE users").await;
    assert_eq!(
        result.error_message(),
        Some("Only one statement can be executed at a time")
    );

    let tables = facade::get_tables(&descriptor).await.into_result().expect("tables");
    assert_eq!(tables, vec![TableInfo::table("users", None)]);

    let trailing = facade::execute_query(&descriptor, "SELECT 1 AS x;").await;
    assert!(!trailing.is_error(), "{:?}", trailing.error_message());
}

#[tokio::test]
async fn repeated_column_names_keep_every_value() {
    let (_dir, descriptor) = fresh_db();

    let result = facade::execute_query(&descriptor, "SELECT 1 AS a, 2 AS a").await;
    let columns = result.columns().expect("rowset");
    let rows = result.row_set().expect("rowset");

    assert_eq!(columns, ["a", "a_1"]);
    assert_eq!(rows[0].len(), columns.len());
    assert_eq!(rows[0].get("a"), Some(&Value::Int(1)));
    assert_eq!(rows[0].get("a_1"), Some(&Value::Int(2)));
}
