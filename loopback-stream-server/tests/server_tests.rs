use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use loopback_stream_core::mock::{pcm_stereo_48k, MockDirectory, MockTap};
use loopback_stream_core::{CaptureSession, EndpointFlow, StreamConfiguration};
use loopback_stream_server::{serve, AppState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SPEAKERS: &str = "{0.0.0.00000000}.{speakers}";
const HEADSET: &str = "{0.0.0.00000000}.{headset}";
const MIC: &str = "{0.0.1.00000000}.{mic}";

struct TestServer {
    addr: SocketAddr,
    http: reqwest::Client,
    speakers: Arc<MockTap>,
    headset: Arc<MockTap>,
    directory: MockDirectory,
    state: AppState<MockDirectory>,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let directory = MockDirectory::new();
        let speakers = directory.add_endpoint(EndpointFlow::Render, SPEAKERS, "Speakers", pcm_stereo_48k());
        let headset = directory.add_endpoint(EndpointFlow::Render, HEADSET, "Headset", pcm_stereo_48k());
        directory.add_endpoint(EndpointFlow::Capture, MIC, "Microphone", pcm_stereo_48k());

        let session = CaptureSession::new(directory.clone(), StreamConfiguration::default()).unwrap();
        let state = AppState::new(Arc::new(session));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_state = state.clone();
        let server = tokio::spawn(async move {
            serve(listener, server_state, async move {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            http: reqwest::Client::new(),
            speakers,
            headset,
            directory,
            state,
            shutdown: Some(shutdown_tx),
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self.http.get(self.url(path)).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut request = self.http.post(self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn select(&self, device_id: &str) -> (u16, Value) {
        self.post("/api/audio/select", Some(serde_json::json!({ "deviceId": device_id })))
            .await
    }

    async fn connect(&self) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/audio", self.addr))
            .await
            .unwrap();
        client
    }

    /// Poll status until `connectedClients` reaches `expected`.
    async fn wait_for_clients(&self, expected: u64) {
        for _ in 0..100 {
            let (_, status) = self.get("/api/audio/status").await;
            if status["connectedClients"] == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("connectedClients never reached {}", expected);
    }
}

/// 8 stereo 16-bit frames; frame `i` is `[i, i, i, i]`.
fn eight_frames() -> Vec<u8> {
    (0u8..8).flat_map(|i| [i; 4]).collect()
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("transport error")
}

async fn expect_handshake(client: &mut Client) -> Value {
    match next_message(client).await {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected handshake text, got {:?}", other),
    }
}

async fn expect_binary(client: &mut Client) -> Vec<u8> {
    match next_message(client).await {
        Message::Binary(data) => data.to_vec(),
        other => panic!("expected binary audio, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lists_render_and_capture_devices() {
    let server = TestServer::start().await;

    let (status, listing) = server.get("/api/audio/devices").await;
    assert_eq!(status, 200);
    assert_eq!(listing["renderDevices"].as_array().unwrap().len(), 2);
    assert_eq!(listing["captureDevices"].as_array().unwrap().len(), 1);

    let speakers = &listing["renderDevices"][0];
    assert_eq!(speakers["index"], 0);
    assert_eq!(speakers["name"], "Speakers");
    assert_eq!(speakers["id"], SPEAKERS);
    assert_eq!(speakers["state"], "Active");
    assert_eq!(speakers["isDefault"], true);
    assert!(listing.get("error").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_failure_degrades_to_empty_sets() {
    let server = TestServer::start().await;
    server
        .directory
        .set_listing_error(Some(loopback_stream_core::StreamError::PrimitiveFailure("enumerator gone".into())));

    let (status, listing) = server.get("/api/audio/devices").await;
    assert_eq!(status, 200);
    assert!(listing["renderDevices"].as_array().unwrap().is_empty());
    assert!(listing["captureDevices"].as_array().unwrap().is_empty());
    assert!(listing["error"].as_str().unwrap().contains("enumerator gone"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_without_selection_is_rejected() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/api/audio/start", None).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "no device selected");

    let (_, status) = server.get("/api/audio/status").await;
    assert_eq!(status["isCapturing"], false);
    assert_eq!(status["phase"], "idle");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_device_keeps_previous_selection() {
    let server = TestServer::start().await;

    let (status, body) = server.select(SPEAKERS).await;
    assert_eq!(status, 200);
    assert_eq!(body["deviceId"], SPEAKERS);

    let (status, body) = server.select("{missing}").await;
    assert_eq!(status, 404);
    assert!(body["error"].as_str().unwrap().contains("{missing}"));

    let (_, status) = server.get("/api/audio/status").await;
    assert_eq!(status["selectedDevice"]["id"], SPEAKERS);
    assert_eq!(status["selectedDevice"]["name"], "Speakers");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_lifecycle_over_http() {
    let server = TestServer::start().await;

    server.select(SPEAKERS).await;
    let (status, _) = server.post("/api/audio/start", None).await;
    assert_eq!(status, 200);
    assert!(server.speakers.is_running());

    let (_, status) = server.get("/api/audio/status").await;
    assert_eq!(status["isCapturing"], true);
    assert_eq!(status["phase"], "capturing");
    assert_eq!(status["waveFormat"]["originalSampleRate"], 48000);
    assert_eq!(status["waveFormat"]["effectiveSampleRate"], 12000);
    assert_eq!(status["waveFormat"]["downsampleFactor"], 4);
    assert_eq!(status["waveFormat"]["encoding"], "Pcm");
    assert!(status["captureStartedAt"].is_string());

    let (status, body) = server.post("/api/audio/start", None).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "capture already running");
    assert_eq!(server.speakers.start_count(), 1);
    assert!(server.speakers.is_running());

    let (status, _) = server.post("/api/audio/stop", None).await;
    assert_eq!(status, 200);
    let (status, _) = server.post("/api/audio/stop", None).await;
    assert_eq!(status, 200);
    assert!(!server.speakers.is_running());

    let (_, status) = server.get("/api/audio/status").await;
    assert_eq!(status["isCapturing"], false);
    assert_eq!(status["phase"], "deviceSelected");
    assert!(status.get("waveFormat").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reselect_while_capturing_stops_previous_capture() {
    let server = TestServer::start().await;

    server.select(SPEAKERS).await;
    server.post("/api/audio/start", None).await;
    assert!(server.speakers.is_running());

    let (status, _) = server.select(HEADSET).await;
    assert_eq!(status, 200);
    assert!(!server.speakers.is_running());
    assert!(!server.headset.is_running());

    let (_, status) = server.get("/api/audio/status").await;
    assert_eq!(status["isCapturing"], false);
    assert_eq!(status["selectedDevice"]["id"], HEADSET);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriber_gets_handshake_then_decimated_audio() {
    let server = TestServer::start().await;
    server.select(SPEAKERS).await;
    server.post("/api/audio/start", None).await;

    let mut client = server.connect().await;
    let handshake = expect_handshake(&mut client).await;
    assert_eq!(handshake["sampleRate"], 12000);
    assert_eq!(handshake["originalSampleRate"], 48000);
    assert_eq!(handshake["bitsPerSample"], 16);
    assert_eq!(handshake["channels"], 2);
    assert_eq!(handshake["downsampleFactor"], 4);

    assert!(server.speakers.deliver(&eight_frames()));
    assert_eq!(expect_binary(&mut client).await, vec![0, 0, 0, 0, 4, 4, 4, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriber_connected_before_start_gets_handshake_first() {
    let server = TestServer::start().await;
    server.select(SPEAKERS).await;

    let mut client = server.connect().await;
    server.wait_for_clients(1).await;

    server.post("/api/audio/start", None).await;
    server.speakers.deliver(&eight_frames());

    let handshake = expect_handshake(&mut client).await;
    assert_eq!(handshake["sampleRate"], 12000);
    assert_eq!(expect_binary(&mut client).await.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_payloads_are_ignored() {
    let server = TestServer::start().await;
    server.select(SPEAKERS).await;
    server.post("/api/audio/start", None).await;

    let mut client = server.connect().await;
    expect_handshake(&mut client).await;

    client.send(Message::Text("hello".into())).await.unwrap();
    client.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();

    server.speakers.deliver(&eight_frames());
    assert_eq!(expect_binary(&mut client).await.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_subscriber_does_not_affect_others() {
    let server = TestServer::start().await;
    server.select(SPEAKERS).await;
    server.post("/api/audio/start", None).await;

    let mut first = server.connect().await;
    let mut second = server.connect().await;
    expect_handshake(&mut first).await;
    expect_handshake(&mut second).await;

    first.close(None).await.unwrap();
    server.wait_for_clients(1).await;

    server.speakers.deliver(&eight_frames());
    assert_eq!(expect_binary(&mut second).await, vec![0, 0, 0, 0, 4, 4, 4, 4]);
    assert!(server.speakers.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_close_is_answered_once() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    server.wait_for_clients(1).await;

    client.close(None).await.unwrap();

    let mut close_frames = 0;
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        match message {
            Ok(Message::Close(_)) => close_frames += 1,
            Ok(other) => panic!("unexpected message after close: {:?}", other),
            Err(_) => break,
        }
    }
    assert!(close_frames <= 1);
    server.wait_for_clients(0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_capture_keeps_subscribers_connected() {
    let server = TestServer::start().await;
    server.select(SPEAKERS).await;
    server.post("/api/audio/start", None).await;

    let mut client = server.connect().await;
    expect_handshake(&mut client).await;

    server.post("/api/audio/stop", None).await;
    server.wait_for_clients(1).await;

    server.post("/api/audio/start", None).await;
    let handshake = expect_handshake(&mut client).await;
    assert_eq!(handshake["sampleRate"], 12000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_streams_and_stops_capture() {
    let mut server = TestServer::start().await;
    server.select(SPEAKERS).await;
    server.post("/api/audio/start", None).await;

    let mut client = server.connect().await;
    expect_handshake(&mut client).await;

    server.shutdown.take().unwrap().send(()).unwrap();

    match next_message(&mut client).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {:?}", other),
    }
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), &mut server.server)
        .await
        .expect("server did not shut down")
        .unwrap();
    assert!(!server.speakers.is_running());
    assert!(!server.state.session.status().is_capturing);
}
