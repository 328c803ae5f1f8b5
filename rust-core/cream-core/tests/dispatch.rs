//! Full pipeline tests: raw hyper requests through body parsing, routing,
//! injection and the response envelope.

use cream_core::{
    App, AppConfig, ControllerDef, ControllerScope, Database, Dependencies, Error, Injectable,
    Method, ParamKind, PropKind, QueryCompiler, Reply, Response, Result, RouteDef, Server,
};
use http_body_util::Full;
use hyper::body::Bytes;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct Users {
    creates: AtomicUsize,
}

impl Injectable for Users {
    fn construct(_: &Dependencies<'_>) -> Result<Self> {
        Ok(Self::default())
    }
}

fn users() -> ControllerDef<Users> {
    ControllerDef::new("/users")
        .route(RouteDef::get("/42"), "show", |_, _| async {
            Ok(Reply::value(json!({"id": 42, "name": "amy"})))
        })
        .route(RouteDef::get("/[0-9]+/posts"), "posts", |_, _| async {
            Ok(Reply::value(json!([])))
        })
        .route(
            RouteDef::post("/create").field("name").required("name"),
            "create",
            |scope: ControllerScope<Users>, args| async move {
                scope.creates.fetch_add(1, Ordering::SeqCst);
                Ok(Reply::value(json!({"name": args.str(0)})))
            },
        )
        .route(
            RouteDef::post("/avatar").file("avatar").field("caption"),
            "avatar",
            |_, args| async move {
                let file = args.file(0).ok_or_else(|| Error::request(400, "no file"))?;
                Ok(Reply::value(json!({
                    "filename": file.filename,
                    "size": file.len(),
                    "caption": args.str(1),
                })))
            },
        )
        .route(RouteDef::get("/export"), "export", |_, _| async {
            Ok(Reply::raw("id,name\n42,amy\n")
                .with_header("Content-Disposition", "attachment; filename=users.csv"))
        })
}

fn server(config: AppConfig) -> Server {
    App::new()
        .config(config)
        .controller(users())
        .into_server()
        .unwrap()
}

fn request(
    method: &str,
    uri: &str,
    content_type: Option<&str>,
    body: &str,
) -> hyper::Request<Full<Bytes>> {
    let mut builder = hyper::Request::builder().method(method).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn envelope(response: &Response) -> Value {
    response.json().unwrap()
}

#[tokio::test]
async fn test_literal_key_resolves_and_unknown_id_is_not_found() {
    let server = server(AppConfig::default());

    let res = server
        .test_request(request("GET", "/users/42", None, ""))
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(
        envelope(&res),
        json!({"code": 200, "data": {"id": 42, "name": "amy"}, "msg": "success"})
    );

    let res = server
        .test_request(request("GET", "/users/43", None, ""))
        .await;
    assert_eq!(res.status, 404);
    assert_eq!(envelope(&res)["code"], json!(404));
}

#[tokio::test]
async fn test_pattern_key_matches() {
    let server = server(AppConfig::default());
    let res = server
        .test_request(request("GET", "/users/7/posts", None, ""))
        .await;
    assert_eq!(envelope(&res)["data"], json!([]));
}

#[tokio::test]
async fn test_options_succeeds_regardless_of_verbs() {
    let server = server(AppConfig::default());
    for uri in ["/users/42", "/users/create", "/users/export"] {
        let res = server.test_request(request("OPTIONS", uri, None, "")).await;
        assert_eq!(res.status, 200);
        assert_eq!(envelope(&res)["data"], json!("ok"));
        assert!(res.header("access-control-allow-methods").is_some());
    }
}

#[tokio::test]
async fn test_required_field_missing_from_json_body() {
    let server = server(AppConfig::default());
    let res = server
        .test_request(request(
            "POST",
            "/users/create",
            Some("application/json"),
            "{}",
        ))
        .await;
    assert_eq!(
        envelope(&res),
        json!({"code": 400, "data": null, "msg": "Require param: name"})
    );
    let users = server.dispatcher().container().resolve::<Users>().unwrap();
    assert_eq!(users.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_urlencoded_body_feeds_fields() {
    let server = server(AppConfig::default());
    let res = server
        .test_request(request(
            "POST",
            "/users/create",
            Some("application/x-www-form-urlencoded"),
            "name=amy+lee",
        ))
        .await;
    assert_eq!(envelope(&res)["data"], json!({"name": "amy lee"}));
}

#[tokio::test]
async fn test_multipart_upload() {
    let server = server(AppConfig::default());
    let body = "--XYZ\r\n\
        Content-Disposition: form-data; name=\"caption\"\r\n\r\n\
        me\r\n\
        --XYZ\r\n\
        Content-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n\
        Content-Type: image/png\r\n\r\n\
        PNGDATA\r\n\
        --XYZ--\r\n";
    let res = server
        .test_request(request(
            "POST",
            "/users/avatar",
            Some("multipart/form-data; boundary=XYZ"),
            body,
        ))
        .await;
    assert_eq!(
        envelope(&res)["data"],
        json!({"filename": "a.png", "size": 7, "caption": "me"})
    );
}

#[tokio::test]
async fn test_raw_reply_keeps_headers() {
    let server = server(AppConfig::default());
    let res = server
        .test_request(request("GET", "/users/export", None, ""))
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, Bytes::from("id,name\n42,amy\n"));
    assert_eq!(
        res.header("content-disposition"),
        Some("attachment; filename=users.csv")
    );
}

#[tokio::test]
async fn test_body_over_limit() {
    let config = AppConfig {
        max_body_size: 8,
        ..AppConfig::default()
    };
    let server = server(config);
    let res = server
        .test_request(request(
            "POST",
            "/users/create",
            Some("application/json"),
            r#"{"name": "a very long name"}"#,
        ))
        .await;
    assert_eq!(res.status, 413);
    assert_eq!(envelope(&res)["code"], json!(413));
}

#[tokio::test]
async fn test_undeclared_and_extension_verbs_are_forbidden() {
    let server = server(AppConfig::default());
    for verb in ["PATCH", "PURGE"] {
        let res = server
            .test_request(request(verb, "/users/42", None, ""))
            .await;
        assert_eq!(
            envelope(&res),
            json!({"code": 503, "data": null, "msg": "Forbidden"})
        );
    }
}

#[test]
fn test_update_statement() {
    let entity = json!({"status": "x"});
    let group = json!({"id?ne": 5});
    let statement = QueryCompiler::new("t")
        .update(
            entity.as_object().unwrap(),
            &[group.as_object().unwrap().clone()],
        )
        .unwrap();
    assert_eq!(
        statement.sql,
        "UPDATE t SET status = ? WHERE ( id <> ? ) AND DELETED = 0"
    );
    assert_eq!(statement.args_display(), "x,5");
}

struct Tasks;

impl Injectable for Tasks {
    fn construct(_: &Dependencies<'_>) -> Result<Self> {
        Ok(Self)
    }
}

#[tokio::test]
async fn test_update_soft_deleted_rows_untouched() {
    let db = Database::connect("sqlite::memory:", None).await.unwrap();
    db.execute(
        "CREATE TABLE tasks (id INTEGER PRIMARY KEY, status TEXT, \
         DELETED INTEGER NOT NULL DEFAULT 0)",
    )
    .await
    .unwrap();
    db.execute(
        "INSERT INTO tasks (id, status, DELETED) VALUES (1, 'open', 0), (5, 'open', 0), (6, 'open', 1)",
    )
    .await
    .unwrap();

    let def = ControllerDef::<Tasks>::new("/tasks")
        .prop("tasks", PropKind::Table, "tasks")
        .route(RouteDef::post("/close"), "close", |scope, _| async move {
            let table = scope
                .table("tasks")
                .ok_or_else(|| Error::request(500, "no db"))?;
            let entity = json!({"status": "x"})
                .as_object()
                .cloned()
                .unwrap_or_default();
            let group = json!({"id?ne": 5}).as_object().cloned().unwrap_or_default();
            let ack = table.update(&entity, &[group]).await?;
            Reply::json(&ack)
        })
        .route(RouteDef::get("/all"), "all", |scope, _| async move {
            let table = scope
                .table("tasks")
                .ok_or_else(|| Error::request(500, "no db"))?;
            Reply::json(&table.fetch(&["id", "status"], &[]).await?)
        });
    let server = App::new()
        .database(db.clone())
        .controller(def)
        .into_server()
        .unwrap();

    let res = server
        .test_request(request("POST", "/tasks/close", None, ""))
        .await;
    assert_eq!(envelope(&res)["data"], json!({"msg": "ok"}));

    let res = server
        .test_request(request("GET", "/tasks/all", None, ""))
        .await;
    assert_eq!(
        envelope(&res)["data"]["rows"],
        json!([{"id": 1, "status": "x"}, {"id": 5, "status": "open"}])
    );

    let hidden = db
        .query(&cream_core::Statement {
            sql: "SELECT status FROM tasks WHERE id = ?".to_string(),
            args: vec![cream_core::DbValue::Int(6)],
        })
        .await
        .unwrap();
    assert_eq!(hidden.rows[0]["status"], json!("open"));
}

struct Echo;

impl Injectable for Echo {
    fn construct(_: &Dependencies<'_>) -> Result<Self> {
        Ok(Self)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_arguments_follow_declared_index(
        order in Just((0..5_usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let mut route = RouteDef::get("/echo");
        for &index in &order {
            route = route.param_at(index, ParamKind::Query, format!("k{index}"));
        }
        let def = ControllerDef::<Echo>::new("/").route(route, "echo", |_, args| async move {
            let values: Vec<Option<String>> = args
                .iter()
                .map(|v| v.as_str().map(ToString::to_string))
                .collect();
            Ok(Reply::value(json!(values)))
        });
        let server = App::new().controller(def).into_server().unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let res = runtime.block_on(server.test_request(request(
            "GET",
            "/echo?k0=a&k1=b&k2=c&k3=d&k4=e",
            None,
            "",
        )));

        prop_assert_eq!(
            envelope(&res)["data"].clone(),
            json!(["a", "b", "c", "d", "e"])
        );
    }
}

#[tokio::test]
async fn test_sparse_argument_positions() {
    let route = RouteDef::get("/sparse")
        .param_at(2, ParamKind::Query, "c")
        .param_at(0, ParamKind::Query, "a");
    let def = ControllerDef::<Echo>::new("/").route(route, "sparse", |_, args| async move {
        Ok(Reply::value(json!([
            args.str(0),
            args.str(1),
            args.str(2),
            args.len()
        ])))
    });
    let server = App::new().controller(def).into_server().unwrap();

    let res = server
        .test_request(request("GET", "/sparse?a=x&b=y&c=z", None, ""))
        .await;
    assert_eq!(envelope(&res)["data"], json!(["x", null, "z", 3]));
}

#[test]
fn test_method_mapping() {
    assert_eq!(Method::from_hyper(&hyper::Method::GET), Some(Method::Get));
    let purge = hyper::Method::from_bytes(b"PURGE").unwrap();
    assert_eq!(Method::from_hyper(&purge), None);
}
