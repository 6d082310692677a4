use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use notice_grid::app::{AppState, router};
use notice_grid::login::AuthConfig;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

const NOTICES: &str = "\
LoanNumber,BorrowerFullName,LetterDate,Error,Complete,Approved,Processing,RowColor
1001,Alice Smith,3/5/2024,0,-1,0,0,4
1002,Bob Jones,3/6/2024,0,0,0,0,0
";

const BOUNDARY: &str = "notice-grid-boundary";

fn app(state: &Arc<AppState>) -> Router {
    router(state.clone())
}

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(AuthConfig::default()))
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response<Body> {
    app(state).oneshot(request).await.unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location(response: &Response<Body>) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

async fn login(state: &Arc<AppState>) -> String {
    let request = Request::post("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=+admin+&password=admin"))
        .unwrap();
    let response = send(state, request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/grid");

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

fn get(uri: &str, cookie: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn with_json(method: &str, uri: &str, cookie: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload_request(cookie: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::post("/api/upload")
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn test_auth_gate() {
    println!("\n====== Testing the login gate ======");
    let state = test_state();

    let response = send(&state, Request::get("/grid").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    println!("✓ Pages redirect to the login page without a session");

    let response = send(&state, Request::get("/api/state").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "error": "Not signed in", "dismiss_after_ms": 5000 }));
    println!("✓ API calls get a JSON 401");

    let response = send(&state, get("/api/state", "session=forged")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    println!("✓ Unknown session ids are rejected");

    let request = Request::post("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=admin&password=wrong"))
        .unwrap();
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(response).await, "Invalid username or password");
    assert!(state.sessions.is_empty());
    println!("✓ Bad credentials create no session");

    let response = send(&state, Request::get("/login").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    println!("✓ The login page is public");
}

async fn test_session_lifecycle() {
    println!("\n====== Testing session lifecycle ======");
    let state = test_state();
    let cookie = login(&state).await;
    assert_eq!(state.sessions.len(), 1);

    let state_body = body_json(send(&state, get("/api/state", &cookie)).await).await;
    assert_eq!(state_body["username"], "admin");
    assert_eq!(state_body["page_size"], 20);
    assert_eq!(state_body["dataset"], Value::Null);
    assert!(state_body.get("error").is_none());
    println!("✓ A new session starts empty with the default page size");

    let response = send(&state, with_json("PUT", "/api/page-size", &cookie, json!({ "page_size": 50 }))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = send(&state, with_json("PUT", "/api/page-size", &cookie, json!({ "page_size": 7 }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let state_body = body_json(send(&state, get("/api/state", &cookie)).await).await;
    assert_eq!(state_body["page_size"], 50);
    println!("✓ Page size preference is kept per session");

    let request = Request::post("/logout")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let response = send(&state, request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    assert!(state.sessions.is_empty());

    let response = send(&state, get("/api/state", &cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    println!("✓ Logout ends the session");
}

async fn test_upload_and_grid() {
    println!("\n====== Testing upload and grid ======");
    let state = test_state();
    let cookie = login(&state).await;

    let response = send(&state, get("/api/grid", &cookie)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = send(&state, with_json("POST", "/api/grid", &cookie, json!({}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    println!("✓ The grid needs data");

    let response = send(&state, upload_request(&cookie, "notices.csv", NOTICES.as_bytes())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["loading"], false);
    assert_eq!(body["dataset"]["source"], "notices.csv");
    assert_eq!(body["dataset"]["row_count"], 2);
    assert_eq!(body["dataset"]["date_columns"], json!(["LetterDate"]));
    assert_eq!(
        body["dataset"]["visible_columns"],
        json!(["Selected", "Override", "Status", "LoanNumber", "BorrowerFullName", "LetterDate"])
    );
    println!("✓ A CSV upload becomes the session's dataset");

    let query = json!({
        "filters": [{ "column": "Status", "type": "text", "op": "equals", "value": "review" }],
        "sort": { "column": "LoanNumber", "direction": "desc" }
    });
    let page = body_json(send(&state, with_json("POST", "/api/grid", &cookie, query)).await).await;
    assert_eq!(page["filtered_rows"], 1);
    assert_eq!(page["total_rows"], 2);
    assert_eq!(page["rows"][0]["index"], 0);
    assert_eq!(page["rows"][0]["class"], "row-status-review");
    assert_eq!(page["columns"][3]["header_name"], "Account Number");
    println!("✓ Grid pages are filtered and rendered");

    let bad = json!({ "filters": [{ "column": "LetterDate", "type": "text", "op": "contains", "value": "3" }] });
    let response = send(&state, with_json("POST", "/api/grid", &cookie, bad)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Column LetterDate takes a date filter");
    println!("✓ Mismatched filters are a 400 with a message");

    let response = send(&state, upload_request(&cookie, "notes.txt", b"hello")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Please upload an Excel file (.xlsx, .xls) or CSV.");
    assert_eq!(body["dismiss_after_ms"], 5000);

    let response = send(&state, upload_request(&cookie, "empty.csv", b"A,B\n")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let state_body = body_json(send(&state, get("/api/state", &cookie)).await).await;
    assert_eq!(state_body["dataset"]["source"], "notices.csv");
    assert_eq!(state_body["loading"], false);
    println!("✓ A failed upload leaves the previous dataset in place");
}

async fn test_columns_and_flags() {
    println!("\n====== Testing columns and flags ======");
    let state = test_state();
    let cookie = login(&state).await;
    send(&state, upload_request(&cookie, "notices.csv", NOTICES.as_bytes())).await;

    let choices = body_json(send(&state, get("/api/columns?q=name", &cookie)).await).await;
    assert_eq!(
        choices,
        json!([{ "name": "BorrowerFullName", "display_name": "Full Name", "visible": true }])
    );
    println!("✓ Column search");

    let body = body_json(send(&state, with_json("POST", "/api/columns/toggle", &cookie, json!({ "column": "Error" }))).await).await;
    assert_eq!(body["all_visible"], false);
    assert_eq!(
        body["visible_columns"],
        json!(["Selected", "Override", "Status", "LoanNumber", "BorrowerFullName", "LetterDate", "Error"])
    );

    let response = send(&state, with_json("POST", "/api/columns/toggle", &cookie, json!({ "column": "Status" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(send(&state, with_json("PUT", "/api/columns", &cookie, json!({ "columns": ["RowColor"] }))).await).await;
    assert_eq!(body["visible_columns"], json!(["Selected", "Override", "Status", "RowColor"]));

    let request = Request::post("/api/columns/show-all")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let body = body_json(send(&state, request).await).await;
    assert_eq!(body["all_visible"], true);

    let request = Request::post("/api/columns/reset")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let body = body_json(send(&state, request).await).await;
    assert_eq!(body["visible_columns"].as_array().unwrap().len(), 6);
    println!("✓ Toggle, set, show all and reset");

    let flags = json!({ "rows": [1], "flag": "selected", "value": true });
    let body = body_json(send(&state, with_json("POST", "/api/rows/flags", &cookie, flags)).await).await;
    assert_eq!(body["updated"], 1);

    let flags = json!({ "rows": [0, 5], "flag": "override", "value": true });
    let response = send(&state, with_json("POST", "/api/rows/flags", &cookie, flags)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let page = body_json(send(&state, with_json("POST", "/api/grid", &cookie, json!({}))).await).await;
    assert_eq!(page["rows"][0]["cells"][0]["value"], false);
    assert_eq!(page["rows"][0]["cells"][1]["value"], false);
    assert_eq!(page["rows"][1]["cells"][0]["value"], true);
    println!("✓ Flags change only through valid requests");
}

async fn test_export() {
    println!("\n====== Testing export ======");
    let state = test_state();
    let cookie = login(&state).await;
    send(&state, upload_request(&cookie, "notices.csv", NOTICES.as_bytes())).await;

    let query = json!({ "filters": [{ "column": "BorrowerFullName", "type": "text", "op": "contains", "value": "bob" }] });
    let response = send(&state, with_json("POST", "/api/export?format=csv", &cookie, query)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notices-export.csv\""
    );
    let csv = body_text(response).await;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines, vec![
        "Selected,Override,Status,Account Number,Full Name,Letter Date",
        "false,false,Pending,1002,Bob Jones,03/06/2024",
    ]);
    println!("✓ CSV export of the filtered view");

    let response = send(&state, with_json("POST", "/api/export?format=xlsx", &cookie, json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"PK"));
    println!("✓ XLSX export");
}

async fn test_dataset_lifecycle() {
    println!("\n====== Testing the default dataset ======");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.csv");
    std::fs::write(&path, NOTICES).unwrap();

    let mut inner = AppState::new(AuthConfig::default());
    inner.default_dataset = Some(path.clone());
    let state = Arc::new(inner);
    let cookie = login(&state).await;

    let body = body_json(send(&state, get("/api/state", &cookie)).await).await;
    assert_eq!(body["dataset"]["row_count"], 2);
    assert_eq!(body["dataset"]["source"], path.display().to_string());
    println!("✓ The default dataset loads on first request");

    let request = Request::delete("/api/dataset")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&state, request).await.status(), StatusCode::NO_CONTENT);

    let body = body_json(send(&state, get("/api/state", &cookie)).await).await;
    assert_eq!(body["dataset"], Value::Null);
    println!("✓ Cleared data is not reloaded in the same session");

    let mut inner = AppState::new(AuthConfig::default());
    inner.default_dataset = Some(PathBuf::from("/nonexistent/notices.csv"));
    let state = Arc::new(inner);
    let cookie = login(&state).await;

    let body = body_json(send(&state, get("/api/state", &cookie)).await).await;
    assert_eq!(body["dataset"], Value::Null);
    assert_eq!(body["error"]["dismiss_after_ms"], 5000);
    assert!(body["error"]["error"].as_str().unwrap().starts_with("Failed to read file"));

    let body = body_json(send(&state, get("/api/state", &cookie)).await).await;
    assert!(body.get("error").is_none());
    println!("✓ A failed default load is reported once");
}

async fn test_upload_while_loading() {
    println!("\n====== Testing overlapping uploads ======");
    let state = test_state();
    state.sessions.insert("busy".to_string(), "admin");
    state.sessions.with_session("busy", |s| s.loading = true).unwrap();

    let response = send(&state, upload_request("session=busy", "notices.csv", NOTICES.as_bytes())).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let still_loading = state.sessions.with_session("busy", |s| (s.loading, s.dataset.is_none()));
    assert_eq!(still_loading, Some((true, true)));
    println!("✓ A second upload is refused while one is parsing");
}

async fn test_shared_reads() {
    println!("\n====== Testing shared session reads ======");
    let state = test_state();
    state.sessions.insert("first".to_string(), "admin");
    state.sessions.insert("second".to_string(), "admin");

    // A reader on another thread gets through while this one holds the store
    let pages = state
        .sessions
        .read_session("first", |first| {
            let second = std::thread::scope(|scope| {
                scope
                    .spawn(|| state.sessions.read_session("second", |s| s.page_size))
                    .join()
                    .unwrap()
            });
            (first.page_size, second)
        })
        .unwrap();
    assert_eq!(pages, (20, Some(20)));
    println!("✓ Readers of different sessions do not wait on each other");

    assert_eq!(state.sessions.read_session("missing", |s| s.page_size), None);
    println!("✓ Reading an unknown session gives nothing");
}

async fn run_tests() {
    println!("Starting web app tests");
    test_auth_gate().await;
    test_session_lifecycle().await;
    test_upload_and_grid().await;
    test_columns_and_flags().await;
    test_export().await;
    test_dataset_lifecycle().await;
    test_upload_while_loading().await;
    test_shared_reads().await;
    println!("All tests passed!");
}

#[tokio::test]
async fn app_suite() {
    run_tests().await;
}

#[tokio::main]
async fn main() {
    run_tests().await;
}
