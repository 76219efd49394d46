use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use datavis::app::{AppState, router};
use datavis::config::ServerConfig;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;

const SALES_CSV: &[u8] = b"region,amount\neast,10\neast,1000\nwest,12\n";

fn create_test_app() -> Router {
    let config = ServerConfig::default();
    let state = Arc::new(AppState::in_memory(&config).unwrap());
    router(state, config.upload_limit_bytes())
}

/// Helper to create a multipart body for file upload
fn create_multipart_body(filename: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "----TestBoundary1234567890";
    let mut body = Vec::new();

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    (boundary.to_string(), body)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn parse(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

/// Registers `alice`, logs in and returns the `session=<token>` cookie pair
async fn login(app: &Router) -> String {
    let (status, _, _) = send(
        app,
        json_request(
            "POST",
            "/register",
            None,
            json!({"username": "alice", "password": "secret1", "confirm_password": "secret1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, body) = send(
        app,
        json_request(
            "POST",
            "/login",
            None,
            json!({"username": "alice", "password": "secret1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["username"], "alice");

    let set_cookie = headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));
    set_cookie.split(';').next().unwrap().to_string()
}

async fn upload(app: &Router, cookie: &str, filename: &str, content: &[u8]) -> (StatusCode, Value) {
    let (boundary, body) = create_multipart_body(filename, content);
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap();
    let (status, _, body) = send(app, request).await;
    (status, parse(&body))
}

#[tokio::test]
async fn test_health_is_public() {
    let app = create_test_app();
    let (status, _, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["status"], "ok");
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = create_test_app();

    let (status, _, body) = send(&app, get("/get_tables", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(parse(&body)["kind"], "Unauthorized");

    let (status, _, _) = send(&app, get("/get_tables", Some("session=made-up"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, headers, _) = send(&app, get("/", None)).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers.get(header::LOCATION).unwrap(), "/login");
}

#[tokio::test]
async fn test_register_and_login_errors() {
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/register",
            None,
            json!({"username": "bob", "password": "secret1", "confirm_password": "secret2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse(&body)["kind"], "ValidationError");

    let cookie = login(&app).await;
    let (status, _, body) = send(&app, get("/check_session", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["username"], "alice");

    let (status, _, _) = send(
        &app,
        json_request(
            "POST",
            "/login",
            None,
            json!({"username": "alice", "password": "wrong-password"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let app = create_test_app();
    let cookie = login(&app).await;

    let (status, _, _) = send(&app, json_request("POST", "/logout", Some(&cookie), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, get("/check_session", Some(&cookie))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authenticated_requests_renew_session_cookie() {
    let app = create_test_app();
    let cookie = login(&app).await;

    let (status, headers, _) = send(&app, get("/check_session", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let renewed = headers
        .get(header::SET_COOKIE)
        .expect("session cookie is re-sent")
        .to_str()
        .unwrap();
    assert!(renewed.starts_with(&cookie));
    assert!(renewed.contains("Max-Age=1800"));
    assert!(renewed.contains("HttpOnly"));

    let (status, headers, _) = send(&app, get("/", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get(header::SET_COOKIE).is_some());

    let (status, headers, _) = send(&app, get("/check_session", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_upload_query_edit_and_delete() {
    let app = create_test_app();
    let cookie = login(&app).await;

    let (status, json) = upload(&app, &cookie, "sales.csv", SALES_CSV).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["table_name"], "sales");
    assert_eq!(json["row_count"], 3);
    assert_eq!(json["columns"], json!(["region", "amount"]));

    let (status, json) = upload(&app, &cookie, "sales.csv", SALES_CSV).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "DuplicateName");

    let (status, _, body) = send(&app, get("/table_schema?table_name=sales", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let schema = parse(&body);
    assert_eq!(schema["schema"][0]["kind"], "categorical");
    assert_eq!(schema["schema"][1]["kind"], "numeric");

    // second page of the case-insensitive filter
    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/filter_data",
            Some(&cookie),
            json!({"table_name": "sales", "filters": {"region": "EA"}, "page": 2, "limit": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page = parse(&body);
    assert_eq!(page["total_records"], 2);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["data"], json!([{"_id": 2, "region": "east", "amount": 1000}]));

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/update_cell",
            Some(&cookie),
            json!({"table_name": "sales", "row_id": 3, "column": "amount", "value": ""}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["value"], Value::Null);

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/update_cell",
            Some(&cookie),
            json!({"table_name": "sales", "row_id": 1, "column": "amount", "value": "lots"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse(&body)["kind"], "ValidationError");

    let (_, _, body) = send(
        &app,
        json_request(
            "POST",
            "/filter_data",
            Some(&cookie),
            json!({"table_name": "sales", "filters": {}, "page": 1, "limit": 10}),
        ),
    )
    .await;
    assert_eq!(parse(&body)["data"][2]["amount"], Value::Null);

    let request = Request::builder()
        .method("DELETE")
        .uri("/delete_table?table_name=ghost")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse(&body)["kind"], "NotFound");

    let request = Request::builder()
        .method("DELETE")
        .uri("/delete_table?table_name=sales")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = send(&app, get("/get_tables", Some(&cookie))).await;
    assert_eq!(parse(&body)["tables"], json!([]));
}

#[tokio::test]
async fn test_analysis_and_summary() {
    let app = create_test_app();
    let cookie = login(&app).await;
    upload(&app, &cookie, "sales.csv", SALES_CSV).await;

    let (status, _, body) = send(&app, get("/analyze_table?table_name=sales", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let report = parse(&body);
    assert_eq!(report["row_count"], 3);
    assert_eq!(report["insights"][0]["column"], "region");
    assert_eq!(report["insights"][0]["most_common"], "east");
    assert_eq!(report["insights"][0]["missing_count"], 0);
    assert_eq!(report["insights"][0]["duplicate_count"], 1);
    assert_eq!(report["anomalies"].as_array().unwrap().len(), 1);
    assert_eq!(report["anomalies"][0]["row_id"], 2);
    assert_eq!(report["anomalies"][0]["value"], 1000);

    let (status, _, body) = send(&app, get("/table_summary?table_name=sales", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        parse(&body)["summary"]["region"],
        json!([{"region": "east", "count": 2}, {"region": "west", "count": 1}])
    );

    let (status, _, _) = send(&app, get("/analyze_table?table_name=ghost", Some(&cookie))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_export_and_chart_validation() {
    let app = create_test_app();
    let cookie = login(&app).await;
    upload(&app, &cookie, "sales.csv", SALES_CSV).await;

    let (status, headers, body) = send(&app, get("/export?table_name=sales&format=csv", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        headers
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("sales.csv")
    );
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "region,amount\neast,10\neast,1000\nwest,12\n"
    );

    let (status, _, _) = send(&app, get("/export?table_name=sales&format=pdf", Some(&cookie))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(
        &app,
        get("/chart?table_name=sales&column=region&kind=radar", Some(&cookie)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse(&body)["kind"], "ValidationError");
}

#[tokio::test]
async fn test_upload_rejects_bad_files() {
    let app = create_test_app();
    let cookie = login(&app).await;

    let (status, json) = upload(&app, &cookie, "notes.txt", b"hello").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "ValidationError");

    let (status, json) = upload(&app, &cookie, "empty.csv", b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "EmptyInput");
}

#[tokio::test]
async fn test_pages_render_for_logged_in_user() {
    let app = create_test_app();
    let cookie = login(&app).await;
    upload(&app, &cookie, "sales.csv", SALES_CSV).await;

    let (status, _, body) = send(&app, get("/", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("/tables/sales"));

    let (status, _, body) = send(&app, get("/tables/sales?f_region=west", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("1 matching rows"));

    let (status, _, body) = send(&app, get("/insights/sales", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("Anomalies"));

    let (status, _, _) = send(&app, get("/tables/ghost", Some(&cookie))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&app, get("/login", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("/auth/login"));
}
