//! Tests for the JSON API, run against a real listener

use super::health_tests::{spawn_server, TestServer};
use crate::engine::events::EventType;
use crate::engine::fixtures::{creative, date, day, snapshot, utc, with_content};
use crate::model::creative::MetricSnapshot;
use chrono::Duration;
use serde_json::{json, Value};

async fn put_creatives(server: &TestServer) {
    for c in [
        with_content(
            creative("cr-a", "ag-1", utc(2026, 4, 1)),
            "Summer sale on running shoes",
            "Free shipping on every order",
        ),
        with_content(
            creative("cr-b", "ag-1", utc(2026, 4, 1)),
            "New trail collection is here",
            "Built for mud, rock and rain",
        ),
    ] {
        let response = server
            .client
            .put(server.url(&format!("/api/v1/creatives/{}", c.id)))
            .json(&c)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
    }
}

async fn post_snapshots(server: &TestServer, creative_id: &str, snapshots: &[MetricSnapshot]) {
    let response = server
        .client
        .post(server.url(&format!("/api/v1/creatives/{}/snapshots", creative_id)))
        .json(snapshots)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["recorded"], snapshots.len());
}

fn days(creative_id: &str, first: chrono::NaiveDate, count: i64, d: crate::engine::fixtures::Day) -> Vec<MetricSnapshot> {
    (0..count)
        .map(|i| snapshot(creative_id, first + Duration::days(i), d))
        .collect()
}

async fn create_experiment(server: &TestServer) -> Value {
    let response = server
        .client
        .post(server.url("/api/v1/experiments"))
        .json(&json!({
            "name": "trail headline",
            "adGroupId": "ag-1",
            "control": { "creativeId": "cr-a" },
            "test": { "creativeId": "cr-b" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_ingest_and_analyze_performance() {
    // ARRANGE
    let server = spawn_server(18090).await;
    put_creatives(&server).await;
    post_snapshots(
        &server,
        "cr-a",
        &days("cr-a", date(2026, 6, 6), 10, day(12_500, 1_000, 50)),
    )
    .await;

    // ACT
    let response = server
        .client
        .get(server.url("/api/v1/creatives/cr-a/performance?lookbackDays=30"))
        .send()
        .await
        .unwrap();

    // ASSERT
    assert_eq!(response.status(), 200);
    let profile: Value = response.json().await.unwrap();
    assert_eq!(profile["creativeId"], "cr-a");
    assert_eq!(profile["totals"]["impressions"], 125_000);

    let group: Value = server
        .client
        .get(server.url("/api/v1/ad-groups/ag-1/performance"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(group["adGroupId"], "ag-1");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_ingest_rejects_mismatched_ids() {
    let server = spawn_server(18091).await;
    put_creatives(&server).await;

    let c = creative("cr-x", "ag-1", utc(2026, 4, 1));
    let response = server
        .client
        .put(server.url("/api/v1/creatives/cr-y"))
        .json(&c)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_configuration");

    let response = server
        .client
        .post(server.url("/api/v1/creatives/cr-a/snapshots"))
        .json(&days("cr-b", date(2026, 6, 1), 1, day(100, 1, 0)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    let response = server
        .client
        .post(server.url("/api/v1/creatives/missing/snapshots"))
        .json(&days("missing", date(2026, 6, 1), 1, day(100, 1, 0)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_error_classes_map_to_status_codes() {
    let server = spawn_server(18092).await;
    put_creatives(&server).await;

    // Unknown experiment
    let response = server
        .client
        .get(server.url(&format!("/api/v1/experiments/{}", uuid::Uuid::new_v4())))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    // Empty ad group
    let response = server
        .client
        .post(server.url("/api/v1/ad-groups/ag-empty/rotation/analysis"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "empty_ad_group");

    // Traffic split that does not sum to 100
    let response = server
        .client
        .post(server.url("/api/v1/experiments"))
        .json(&json!({
            "name": "bad split",
            "adGroupId": "ag-1",
            "control": { "creativeId": "cr-a" },
            "test": { "creativeId": "cr-b" },
            "config": { "controlTrafficPercent": 60, "testTrafficPercent": 60 },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    // Analysis before start
    let experiment = create_experiment(&server).await;
    let id = experiment["id"].as_str().unwrap();
    let response = server
        .client
        .post(server.url(&format!("/api/v1/experiments/{}/analysis", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_transition");

    // Malformed id never reaches the engine
    let response = server
        .client
        .get(server.url("/api/v1/experiments/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_experiment_lifecycle_over_http() {
    // ARRANGE
    let server = spawn_server(18093).await;
    put_creatives(&server).await;
    let experiment = create_experiment(&server).await;
    assert_eq!(experiment["status"], "READY");
    let id = experiment["id"].as_str().unwrap().to_string();
    let path = |action: &str| server.url(&format!("/api/v1/experiments/{}/{}", id, action));

    // ACT / ASSERT
    let started: Value = server
        .client
        .post(path("start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["status"], "RUNNING");

    let paused: Value = server
        .client
        .post(path("pause"))
        .json(&json!({ "reason": "budget review" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(paused["status"], "PAUSED");

    let resumed = server.client.post(path("resume")).send().await.unwrap();
    assert_eq!(resumed.status(), 200);

    let stopped: Value = server
        .client
        .post(path("stop"))
        .json(&json!({ "reason": "MANUAL" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["status"], "COMPLETED");
    assert_eq!(stopped["stopReason"], "MANUAL");

    let response = server.client.post(path("cancel")).send().await.unwrap();
    assert_eq!(response.status(), 409);

    let listed: Value = server
        .client
        .get(server.url("/api/v1/experiments?adGroupId=ag-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    assert_eq!(server.events.events_of(EventType::ExperimentStarted).len(), 1);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_winner_selection_and_rollout_over_http() {
    // ARRANGE: experiment started 2026-06-15, two weeks of 5.0% vs 5.5% CTR
    let server = spawn_server(18094).await;
    put_creatives(&server).await;
    let experiment = create_experiment(&server).await;
    let id = experiment["id"].as_str().unwrap().to_string();
    let response = server
        .client
        .post(server.url(&format!("/api/v1/experiments/{}/start", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    post_snapshots(&server, "cr-a", &days("cr-a", date(2026, 6, 16), 10, day(1_900, 95, 5))).await;
    let mut test_days = days("cr-b", date(2026, 6, 16), 10, day(1_900, 104, 6));
    for s in test_days.iter_mut().take(5) {
        s.clicks += 1;
        s.cost += 0.5;
    }
    post_snapshots(&server, "cr-b", &test_days).await;
    server.clock.advance(Duration::days(14));

    // ACT
    let response = server
        .client
        .post(server.url(&format!("/api/v1/experiments/{}/selections", id)))
        .json(&json!({ "criteria": {}, "market": {} }))
        .send()
        .await
        .unwrap();

    // ASSERT
    assert_eq!(response.status(), 200);
    let selection: Value = response.json().await.unwrap();
    assert_eq!(selection["decision"], "SELECT_WINNER");
    assert_eq!(selection["winner"], "TEST");
    assert_eq!(selection["implementationStatus"], "PENDING");
    let selection_id = selection["id"].as_str().unwrap().to_string();

    let implemented: Value = server
        .client
        .post(server.url(&format!("/api/v1/selections/{}/implementation", selection_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(implemented["implementationStatus"], "IN_PROGRESS");

    // No live data yet: monitoring notes it and keeps going
    let report: Value = server
        .client
        .post(server.url(&format!("/api/v1/selections/{}/monitoring", selection_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["recommendation"], "CONTINUE");

    let intents: Value = server
        .client
        .get(server.url("/api/v1/intents"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kinds: Vec<&str> = intents
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["action"]["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["ACTIVATE_VARIANTS", "SHIFT_TRAFFIC"]);

    let listed: Value = server
        .client
        .get(server.url(&format!("/api/v1/experiments/{}/selections", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_rotation_apply_over_http() {
    let server = spawn_server(18095).await;
    put_creatives(&server).await;

    let response = server
        .client
        .get(server.url("/api/v1/ad-groups/ag-1/rotation/schedule"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let applied: Value = server
        .client
        .post(server.url("/api/v1/ad-groups/ag-1/rotation/apply"))
        .json(&json!({ "strategy": "EVEN" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(applied["strategy"], "EVEN");

    let response = server
        .client
        .get(server.url("/api/v1/ad-groups/ag-1/rotation/schedule"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let schedule: Value = response.json().await.unwrap();
    assert_eq!(schedule["adGroupId"], "ag-1");

    server.stop().await.unwrap();
}
