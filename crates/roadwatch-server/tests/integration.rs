//! End-to-end tests against a real listener: multipart upload over HTTP,
//! then frame streaming over a WebSocket client.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::{SinkExt, StreamExt};
use roadwatch_core::{BoundingBox, Detection, LabelVocabulary, SessionId, VideoOpener};
use roadwatch_server::{start, ServerDeps, ServerHandle, SessionStore};
use roadwatch_settings::RoadwatchSettings;
use roadwatch_vision::mock::{synthetic_frame_index, ScriptedDetector, SyntheticOpener};
use roadwatch_vision::FramePipeline;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    handle: ServerHandle,
    store: Arc<SessionStore>,
    upload_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.handle.addr())
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws/process", self.handle.addr())
    }
}

fn car(x: f32) -> Detection {
    Detection {
        class_id: 2,
        label: "car".into(),
        confidence: 0.9,
        bbox: BoundingBox::new(x, 2.0, 6.0, 6.0),
    }
}

/// Boot a server on an ephemeral port with in-process vision doubles.
async fn boot_server(opener: impl VideoOpener + 'static, pacing_ms: u64) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = RoadwatchSettings::default();
    settings.server.port = 0;
    settings.server.upload_dir = dir.path().join("uploads");
    settings.session.pacing_ms = pacing_ms;
    settings.session.start_timeout_secs = 5;
    settings.session.shutdown_timeout_secs = 5;

    let detector = Arc::new(ScriptedDetector::new(vec![car(1.0), car(12.0)]));
    let deps = ServerDeps {
        opener: Arc::new(opener),
        pipeline: Arc::new(FramePipeline::new(detector, LabelVocabulary::default(), 70)),
    };
    let handle = start(&settings, deps).await.unwrap();
    let store = Arc::clone(handle.store());
    TestServer {
        handle,
        store,
        upload_dir: settings.server.upload_dir,
        _dir: dir,
    }
}

async fn upload(server: &TestServer, bytes: Vec<u8>) -> (SessionId, String) {
    let part = reqwest::multipart::Part::bytes(bytes).file_name("clip.mp4");
    let form = reqwest::multipart::Form::new().part("file", part);
    let resp = reqwest::Client::new()
        .post(server.http_url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let id = SessionId::from_raw(body["session_id"].as_str().unwrap());
    let path = body["path"].as_str().unwrap().to_string();
    (id, path)
}

async fn open_ws(server: &TestServer, start: Value) -> WsStream {
    let (mut ws, _) = timeout(TIMEOUT, connect_async(server.ws_url()))
        .await
        .unwrap()
        .unwrap();
    ws.send(Message::Text(start.to_string().into())).await.unwrap();
    ws
}

/// Read until the server closes. Returns text payloads and the close code.
async fn read_until_close(ws: &mut WsStream) -> (Vec<Value>, Option<u16>) {
    let mut frames = Vec::new();
    loop {
        let next = timeout(TIMEOUT, ws.next()).await.expect("server went quiet");
        match next {
            Some(Ok(Message::Text(text))) => frames.push(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(frame))) => {
                return (frames, frame.map(|f| u16::from(f.code)));
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return (frames, None),
        }
    }
}

/// Decode a frame message's JPEG and recover the synthetic frame index.
fn frame_index(message: &Value) -> usize {
    let jpeg = base64::engine::general_purpose::STANDARD
        .decode(message["frame"].as_str().unwrap())
        .unwrap();
    let image = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
        .unwrap()
        .to_rgb8();
    synthetic_frame_index(&image)
}

/// Read a rejected socket to its close frame. Fails if any data arrives.
async fn rejection(ws: &mut WsStream) -> (u16, String) {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("server went quiet") {
            Some(Ok(Message::Close(Some(frame)))) => {
                return (u16::from(frame.code), frame.reason.to_string());
            }
            Some(Ok(Message::Text(text))) => panic!("unexpected data frame: {text}"),
            Some(Ok(_)) => {}
            other => panic!("socket ended without a close frame: {other:?}"),
        }
    }
}

async fn wait_until_gone(store: &SessionStore, id: &SessionId) {
    timeout(TIMEOUT, async {
        while store.contains(id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was never cleaned up");
}

#[tokio::test]
async fn streams_every_frame_in_order_then_closes() {
    let server = boot_server(SyntheticOpener::new(10), 1).await;
    let (id, path) = upload(&server, b"fake video".to_vec()).await;
    assert!(Path::new(&path).exists());

    let mut ws = open_ws(&server, json!({ "session_id": id.as_str(), "path": path })).await;
    let (frames, code) = read_until_close(&mut ws).await;

    assert_eq!(frames.len(), 10);
    assert_eq!(code, Some(1000));
    for frame in &frames {
        assert_eq!(frame["session_id"], id.as_str());
        let counts = frame["counts"].as_object().unwrap();
        assert_eq!(counts.len(), 6);
        assert_eq!(counts["car"], 2);
        assert_eq!(counts["person"], 0);
        assert!(!frame["frame"].as_str().unwrap().is_empty());
    }
    let order: Vec<usize> = frames.iter().map(frame_index).collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());

    assert!(!server.store.contains(&id));
    assert!(!Path::new(&path).exists());
}

#[tokio::test]
async fn start_without_path_closes_with_no_messages() {
    let server = boot_server(SyntheticOpener::new(5), 1).await;
    let (id, path) = upload(&server, b"video".to_vec()).await;

    let mut ws = open_ws(&server, json!({ "session_id": "x" })).await;
    let (code, _) = rejection(&mut ws).await;
    assert_eq!(code, 1008);

    // The real upload is untouched.
    assert!(server.store.contains(&id));
    assert!(Path::new(&path).exists());
}

#[tokio::test]
async fn malformed_start_message_closes_with_no_messages() {
    let server = boot_server(SyntheticOpener::new(5), 1).await;
    let (mut ws, _) = connect_async(server.ws_url()).await.unwrap();
    ws.send(Message::Text("not json".into())).await.unwrap();
    let (frames, _) = read_until_close(&mut ws).await;
    assert!(frames.is_empty());
}

#[tokio::test]
async fn foreign_path_is_rejected_and_never_deleted() {
    let server = boot_server(SyntheticOpener::new(5), 1).await;
    let (id, path) = upload(&server, b"video".to_vec()).await;

    let bystander = server.upload_dir.join("bystander.txt");
    std::fs::write(&bystander, b"keep me").unwrap();

    let mut ws = open_ws(
        &server,
        json!({ "session_id": id.as_str(), "path": bystander.to_string_lossy() }),
    )
    .await;
    let (code, reason) = rejection(&mut ws).await;

    assert_eq!(code, 1008);
    assert_eq!(reason, "path does not match the uploaded file");
    assert!(bystander.exists());
    assert!(server.store.contains(&id));
    assert!(Path::new(&path).exists());
}

#[tokio::test]
async fn second_claim_of_a_session_is_rejected() {
    let server = boot_server(SyntheticOpener::new(10_000), 20).await;
    let (id, path) = upload(&server, b"video".to_vec()).await;
    let start = json!({ "session_id": id.as_str(), "path": path });

    let mut first = open_ws(&server, start.clone()).await;
    let msg = timeout(TIMEOUT, first.next()).await.unwrap().unwrap().unwrap();
    assert!(msg.is_text());

    let mut second = open_ws(&server, start).await;
    let (code, reason) = rejection(&mut second).await;
    assert_eq!(code, 1008);
    assert_eq!(reason, "session already has a connection");
    assert!(server.store.contains(&id));
}

#[tokio::test]
async fn disconnect_mid_stream_cleans_up() {
    let server = boot_server(SyntheticOpener::new(10_000), 20).await;
    let (id, path) = upload(&server, b"video".to_vec()).await;

    let mut ws = open_ws(&server, json!({ "session_id": id.as_str(), "path": path })).await;
    for _ in 0..2 {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        assert!(msg.is_text());
    }
    ws.close(None).await.unwrap();
    drop(ws);

    wait_until_gone(&server.store, &id).await;
    assert!(!Path::new(&path).exists());
}

#[tokio::test]
async fn decode_failure_closes_with_internal_error() {
    let server = boot_server(SyntheticOpener::new(10).failing_after(3), 1).await;
    let (id, path) = upload(&server, b"video".to_vec()).await;

    let mut ws = open_ws(&server, json!({ "session_id": id.as_str(), "path": path })).await;
    let (frames, code) = read_until_close(&mut ws).await;

    assert_eq!(frames.len(), 3);
    assert_eq!(code, Some(1011));
    assert!(!server.store.contains(&id));
    assert!(!Path::new(&path).exists());
}

#[tokio::test]
async fn shutdown_sweep_removes_all_sessions_and_files() {
    let server = boot_server(SyntheticOpener::new(100_000), 50).await;

    let mut paths = Vec::new();
    let mut sockets = Vec::new();
    for i in 0..4 {
        let (id, path) = upload(&server, vec![i; 64]).await;
        // Leave one upload unclaimed.
        if i < 3 {
            let mut ws =
                open_ws(&server, json!({ "session_id": id.as_str(), "path": path })).await;
            let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
            assert!(msg.is_text());
            sockets.push(ws);
        }
        paths.push(PathBuf::from(path));
    }
    assert_eq!(server.store.len(), 4);

    let store = Arc::clone(&server.store);
    let report = server.handle.shutdown().await;

    assert!(store.is_empty());
    assert!(paths.iter().all(|p| !p.exists()));
    assert!(report.files_removed <= 4);
    assert!(!report.timed_out);

    for mut ws in sockets {
        let (_, code) = read_until_close(&mut ws).await;
        assert!(code.is_none() || code == Some(1001));
    }
}

#[tokio::test]
async fn concurrent_uploads_get_unique_ids_and_exact_bytes() {
    let server = Arc::new(boot_server(SyntheticOpener::new(1), 1).await);

    let uploads = (0..8u8).map(|i| {
        let server = Arc::clone(&server);
        async move {
            let bytes: Vec<u8> = (0..4096u32).map(|n| (n as u8).wrapping_mul(i + 1)).collect();
            let (id, path) = upload(&server, bytes.clone()).await;
            (id, path, bytes)
        }
    });
    let results = futures::future::join_all(uploads).await;

    let ids: std::collections::HashSet<_> = results.iter().map(|(id, _, _)| id.clone()).collect();
    assert_eq!(ids.len(), 8);
    for (_, path, bytes) in &results {
        assert_eq!(&std::fs::read(path).unwrap(), bytes);
    }
    assert_eq!(server.store.len(), 8);
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let server = boot_server(SyntheticOpener::new(1), 1).await;
    let form = reqwest::multipart::Form::new().text("note", "no video here");
    let resp = reqwest::Client::new()
        .post(server.http_url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
    assert!(server.store.is_empty());
}
