//! Demo controllers served by the reference binary.

use cream_core::{
    App, Args, ControllerDef, ControllerScope, Database, Dependencies, Error, Injectable, PropKind,
    Reply, Result, RouteDef,
};
use serde_json::{json, Map, Value};
use std::time::Instant;

/// Schema for the notes table on SQLite
pub const NOTES_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS notes (\
    id INTEGER PRIMARY KEY AUTOINCREMENT, \
    title TEXT NOT NULL, \
    body TEXT, \
    DELETED INTEGER NOT NULL DEFAULT 0)";

/// Liveness endpoint
pub struct Health {
    started: Instant,
}

impl Injectable for Health {
    fn construct(_: &Dependencies<'_>) -> Result<Self> {
        Ok(Self {
            started: Instant::now(),
        })
    }
}

fn health() -> ControllerDef<Health> {
    ControllerDef::new("/health").route(
        RouteDef::get("/"),
        "status",
        |scope: ControllerScope<Health>, _| async move {
            Ok(Reply::value(json!({
                "status": "ok",
                "version": cream_core::VERSION,
                "uptimeSecs": scope.started.elapsed().as_secs(),
            })))
        },
    )
}

/// CRUD over the `notes` table
pub struct Notes;

impl Injectable for Notes {
    fn construct(_: &Dependencies<'_>) -> Result<Self> {
        Ok(Self)
    }
}

fn no_database() -> Error {
    Error::request(500, "Database not configured")
}

fn object(value: Option<&Map<String, Value>>) -> Map<String, Value> {
    value.cloned().unwrap_or_default()
}

fn notes() -> ControllerDef<Notes> {
    ControllerDef::new("/notes")
        .prop("notes", PropKind::Table, "notes")
        .route(
            RouteDef::get("/list").query_map(),
            "list",
            |scope: ControllerScope<Notes>, args: Args| async move {
                let table = scope.table("notes").ok_or_else(no_database)?;
                let filter = object(args.object(0));
                let groups = if filter.is_empty() {
                    vec![]
                } else {
                    vec![filter]
                };
                Reply::json(&table.fetch(&["id", "title", "body"], &groups).await?)
            },
        )
        .route(
            RouteDef::post("/create").fields().required("title"),
            "create",
            |scope: ControllerScope<Notes>, args: Args| async move {
                let table = scope.table("notes").ok_or_else(no_database)?;
                Reply::json(&table.put(&object(args.object(0))).await?)
            },
        )
        .route(
            RouteDef::post("/update")
                .field("id")
                .field("set")
                .required("id"),
            "update",
            |scope: ControllerScope<Notes>, args: Args| async move {
                let table = scope.table("notes").ok_or_else(no_database)?;
                let mut by_id = Map::new();
                by_id.insert(
                    "id".to_string(),
                    args.json(0).cloned().unwrap_or(Value::Null),
                );
                Reply::json(&table.update(&object(args.object(1)), &[by_id]).await?)
            },
        )
        .route(
            RouteDef::post("/remove").fields().required("id"),
            "remove",
            |scope: ControllerScope<Notes>, args: Args| async move {
                let table = scope.table("notes").ok_or_else(no_database)?;
                Reply::json(&table.remove(&object(args.object(0))).await?)
            },
        )
}

/// Create the demo schema where the backend supports it
///
/// # Errors
///
/// `Error::Statement` when the schema cannot be created.
pub async fn ensure_schema(database: &Database) -> Result<()> {
    if database.backend() == "sqlite" {
        database.execute(NOTES_SCHEMA).await?;
    }
    Ok(())
}

/// Register every demo controller
pub fn install(app: App) -> App {
    app.controller(health()).controller(notes())
}
