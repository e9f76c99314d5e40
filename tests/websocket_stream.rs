//! Live `/ws/usage` stream against a real listener.

use astra_monitor::core::{ProfilerConfig, Sample, SystemProfiler};
use astra_monitor::server::{create_router, AppState};
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn serve(profiler: SystemProfiler) -> String {
    let state = AppState {
        profiler,
        board: "ssh:root@10.0.0.7".to_string(),
        window: Duration::from_secs(10),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state, false)).await.unwrap();
    });
    format!("ws://{}/ws/usage", addr)
}

fn profiler_with_sample() -> SystemProfiler {
    let profiler = SystemProfiler::new(ProfilerConfig {
        interval: Duration::from_millis(50),
        window: Duration::from_secs(10),
    });
    profiler.record(Sample {
        timestamp: 100.0,
        cpu: BTreeMap::from([("cpu".to_string(), 25.0), ("cpu0".to_string(), 50.0)]),
        npu: 12.5,
    });
    profiler
}

#[tokio::test]
async fn test_reports_are_pushed() {
    let url = serve(profiler_with_sample()).await;
    let (mut ws, _) = connect_async(url).await.unwrap();

    // Two reports prove the push repeats on the interval
    for _ in 0..2 {
        let msg = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        let Message::Text(text) = msg else {
            panic!("expected a text frame, got {:?}", msg);
        };
        let report: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(report["board"], "ssh:root@10.0.0.7");
        assert_eq!(report["window_s"], 10.0);
        assert_eq!(report["cpu"].as_array().unwrap().len(), 2);
        assert_eq!(report["status"]["samples"], 1);
        assert!(report["latest"].as_array().unwrap().last().unwrap().as_str().unwrap().contains("NPU"));
    }
}

#[tokio::test]
async fn test_ping_is_answered_and_close_ends_stream() {
    let url = serve(profiler_with_sample()).await;
    let (mut ws, _) = connect_async(url).await.unwrap();

    ws.send(Message::Ping(vec![7, 7])).await.unwrap();
    let pong = timeout(WAIT, async {
        while let Some(msg) = ws.next().await {
            if let Message::Pong(data) = msg.unwrap() {
                return data;
            }
        }
        panic!("stream ended before a pong arrived");
    })
    .await
    .unwrap();
    assert_eq!(pong, vec![7, 7]);

    ws.send(Message::Close(None)).await.unwrap();
    let ended = timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}
