//! End-to-end runs against in-process fakes of the Kubecost and Optima APIs.
//!
//! Every test pins "today" to 2024-03-01, so the only invoice month is
//! February 2024 (29 days), a past month that is uploaded only when every
//! day has a file.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use kubecost_optima::cli::run::{run_with_config, RunError};
use kubecost_optima::config::{parse_config, Config};
use kubecost_optima::lock::DirLock;
use kubecost_optima::optima::MonthOutcome;
use md5::{Digest, Md5};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const STALE_ID: &str = "6f1c2a4e-9b7d-4c3e-8a5f-1d2e3f4a5b6c";

#[derive(Clone, Default)]
struct FakeState {
    calls: Arc<Mutex<Vec<String>>>,
    starts: Arc<AtomicUsize>,
    failing_day: Option<&'static str>,
}

impl FakeState {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

async fn allocation(State(state): State<FakeState>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let window = params.get("window").cloned().unwrap_or_default();
    let day = &window[..10];

    if state.failing_day == Some(day) {
        return Json(json!({"code": 500, "message": "query failed"}));
    }
    if params.get("offset").map(String::as_str) != Some("0") {
        return Json(json!({"code": 200, "data": [{}]}));
    }

    let start = format!("{day}T00:00:00Z");
    Json(json!({
        "code": 200,
        "data": [{
            "cluster-one/web/deployment/api/api-1": {
                "name": "cluster-one/web/deployment/api/api-1",
                "properties": {
                    "cluster": "cluster-one",
                    "namespace": "web",
                    "pod": "api-1",
                    "labels": {"app": "api"}
                },
                "window": {"start": start, "end": "x"},
                "start": start,
                "end": "x",
                "cpuCost": 1.25,
                "cpuCoreHours": 24.0
            },
            "cluster-one/__idle__": {
                "name": "cluster-one/__idle__",
                "properties": {"cluster": "cluster-one"},
                "ramCost": 3.0
            }
        }]
    }))
}

async fn get_configs() -> Json<Value> {
    Json(json!({"data": {"currencyCode": "EUR"}}))
}

async fn token(State(state): State<FakeState>) -> Json<Value> {
    state.record("token".to_string());
    Json(json!({"access_token": "test-token"}))
}

async fn start_upload(State(state): State<FakeState>, Json(body): Json<Value>) -> impl IntoResponse {
    state.record(format!("start {}", body["billingPeriod"].as_str().unwrap_or_default()));
    if state.starts.fetch_add(1, Ordering::SeqCst) == 0 {
        let message = format!("an existing billUpload (ID: {STALE_ID}) is in progress");
        return (StatusCode::CONFLICT, Json(json!({"message": message})));
    }
    (StatusCode::CREATED, Json(json!({"id": "upload-1"})))
}

async fn upload_file(
    State(state): State<FakeState>,
    Path((_org, id, name)): Path<(String, String, String)>,
    body: Bytes,
) -> Json<Value> {
    state.record(format!("file {id} {name}"));
    Json(json!({"id": name, "billUploadId": id, "md5": format!("{:x}", Md5::digest(&body))}))
}

async fn operation(
    State(state): State<FakeState>,
    Path((_org, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.record(format!("{} {id}", body["operation"].as_str().unwrap_or_default()));
    StatusCode::OK
}

async fn serve(state: FakeState) -> String {
    let app = Router::new()
        .route("/model/allocation", get(allocation))
        .route("/model/getConfigs", get(get_configs))
        .route("/oidc/token", post(token))
        .route("/optima/orgs/:org/billUploads", post(start_upload))
        .route("/optima/orgs/:org/billUploads/:id/files/:name", post(upload_file))
        .route("/optima/orgs/:org/billUploads/:id/operations", post(operation))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(base: &str, output_dir: &std::path::Path) -> Config {
    let yaml = format!(
        r#"
kubecost:
  base_url: {base}/model/
optima:
  org_id: "42"
  bill_connect_id: cbi-oi-optima-kubecost
  refresh_token: refresh
  token_url: {base}/oidc/token
  api_base_url: {base}
  rate_limit_backoff: 10ms
export:
  output_dir: {dir}
  page_size: 10
  max_file_rows: 1000
http:
  request_timeout: 10s
"#,
        dir = output_dir.display()
    );
    parse_config(&yaml).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn read_gz(path: &std::path::Path) -> String {
    let mut out = String::new();
    GzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut out)
        .unwrap();
    out
}

#[tokio::test]
async fn test_full_run_commits_complete_month() {
    let dir = TempDir::new().unwrap();
    // Leftovers from earlier runs
    fs::write(dir.path().join("kubecost-2024-02-03.csv.gz.tmp"), b"partial").unwrap();
    fs::write(dir.path().join("kubecost-2023-12-01.csv.gz"), b"expired").unwrap();
    fs::write(dir.path().join("kubecost-2024-01-15.csv.gz"), b"retained").unwrap();

    let state = FakeState::default();
    let base = serve(state.clone()).await;
    let config = config(&base, dir.path());

    let summary = run_with_config(&config, today()).await.unwrap();

    assert_eq!(summary.export.exported, 29);
    assert_eq!(summary.export.failed, 0);
    assert_eq!(
        summary.upload.outcome("2024-02"),
        Some(&MonthOutcome::Committed { files: 29 })
    );
    assert!(!summary.upload.failed());

    assert!(!dir.path().join("kubecost-2024-02-03.csv.gz.tmp").exists());
    assert!(!dir.path().join("kubecost-2023-12-01.csv.gz").exists());
    assert!(dir.path().join("kubecost-2024-01-15.csv.gz").exists());
    assert!(!dir.path().join(kubecost_optima::lock::LOCK_FILE_NAME).exists());

    let content = read_gz(&dir.path().join("kubecost-2024-02-10.csv.gz"));
    let lines: Vec<_> = content.lines().collect();
    assert!(lines[0].starts_with("ResourceID,Cost,CurrencyCode,Aggregation,UsageType"));
    // 8 regular rows followed by 8 idle rows
    assert_eq!(lines.len(), 1 + 16);
    assert!(lines[1].starts_with("cluster-one/web/deployment/api/api-1,1.25000,EUR,pod,cpuCost,24.00000,cpuCoreHours"));
    assert!(lines[9].starts_with("cluster-one/__idle__,"));
    assert!(lines[11].contains(",3.00000,EUR,pod,ramCost,"));

    let calls = state.calls();
    assert_eq!(calls[0], "token");
    assert_eq!(calls[1], "start 2024-02");
    assert_eq!(calls[2], format!("abort {STALE_ID}"));
    assert_eq!(calls[3], "start 2024-02");
    assert_eq!(calls[4], "file upload-1 kubecost-2024-02-01.csv.gz");
    assert_eq!(calls.iter().filter(|c| c.starts_with("file ")).count(), 29);
    assert_eq!(calls.last().unwrap(), "commit upload-1");
}

#[tokio::test]
async fn test_incomplete_past_month_is_skipped() {
    let dir = TempDir::new().unwrap();
    let state = FakeState {
        failing_day: Some("2024-02-10"),
        ..Default::default()
    };
    let base = serve(state.clone()).await;
    let config = config(&base, dir.path());

    let summary = run_with_config(&config, today()).await.unwrap();

    assert_eq!(summary.export.exported, 28);
    assert_eq!(summary.export.failed, 1);
    assert!(matches!(
        summary.upload.outcome("2024-02"),
        Some(MonthOutcome::Skipped { .. })
    ));
    assert!(!summary.upload.failed());
    assert!(!dir.path().join("kubecost-2024-02-10.csv.gz").exists());
    assert_eq!(state.calls(), vec!["token"]);
}

#[tokio::test]
async fn test_run_fails_while_lock_is_held() {
    let dir = TempDir::new().unwrap();
    let state = FakeState::default();
    let base = serve(state.clone()).await;
    let config = config(&base, dir.path());

    let _held = DirLock::acquire(dir.path()).unwrap();
    let err = run_with_config(&config, today()).await.unwrap_err();

    assert!(matches!(err, RunError::Lock(_)));
    assert!(state.calls().is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_rejected_token_leaves_output_dir_untouched() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("kubecost-2023-11-15.csv.gz"), b"expired").unwrap();
    fs::write(dir.path().join("kubecost-2024-02-10.csv.gz.tmp"), b"partial").unwrap();
    let app = Router::new().route("/oidc/token", post(|| async { StatusCode::UNAUTHORIZED }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = config(&base, dir.path());

    let err = run_with_config(&config, today()).await.unwrap_err();

    assert!(matches!(err, RunError::Optima(_)));
    let mut names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["kubecost-2023-11-15.csv.gz", "kubecost-2024-02-10.csv.gz.tmp"]
    );
}
