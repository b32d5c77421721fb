#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{spawn_relay, CannedDownstream};
use serde_json::{json, Value};
use verdict_relay::rate_limit::FixedWindowLimiter;
use verdict_relay::telemetry::{RotatingWriter, TelemetrySink};
use verdict_relay::{AppState, RotationConfig};

async fn fire(url: String, ip: String) -> u16 {
    reqwest::Client::new()
        .post(&url)
        .header("x-forwarded-for", ip)
        .json(&json!({"code": "let x = 1;"}))
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

#[tokio::test]
async fn every_relayed_request_writes_one_event() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("relay_events.jsonl");
    let writer = RotatingWriter::open(
        &log_path,
        RotationConfig {
            max_bytes: None,
            keep: 1,
            compress: false,
        },
    )
    .unwrap();
    let downstream = CannedDownstream::new(Ok(json!({
        "decision": "needs more info", "summary": "secret summary", "findings": []
    })));
    let state = AppState::new(downstream, FixedWindowLimiter::default())
        .with_telemetry(TelemetrySink::new(Some(writer), false));
    let telemetry = state.telemetry.clone();
    let (url, handle) = spawn_relay(state).await;

    let total = 60u32;
    let mut tasks = Vec::new();
    for i in 0..total {
        // 6 distinct clients, 10 requests each: all within the limit
        tasks.push(tokio::spawn(fire(url.clone(), format!("10.0.0.{}", i % 6))));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 200);
    }
    handle.abort();

    let content = fs::read_to_string(&log_path).unwrap();
    assert!(!content.contains("let x = 1;"), "code must never be logged");
    assert!(!content.contains("secret summary"));
    let events: Vec<Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.len() as u32, total);
    assert_eq!(telemetry.lines_total(), total as u64);
    for event in &events {
        assert_eq!(event["schemaVersion"], 1);
        assert_eq!(event["outcome"], "ok");
        assert_eq!(event["status"], 200);
        assert_eq!(event["decision"], "needs_more_info");
        assert_eq!(event["codeChars"], 10);
        assert_eq!(event["findings"], 0);
        assert_eq!(event["malformedFindings"], 0);
        assert!(event["clientId"].as_str().unwrap().starts_with("10.0.0."));
    }
}
