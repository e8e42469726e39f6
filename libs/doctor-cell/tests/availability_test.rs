use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use doctor_cell::router::doctor_routes;
use shared_utils::test_utils::{JwtTestUtils, MockPostgrest, TestConfig, TestUser};

struct TestHarness {
    app: Router,
    token: String,
    #[allow(dead_code)]
    mock_server: MockServer,
}

async fn harness() -> TestHarness {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let user = TestUser::patient(Uuid::new_v4());
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, None);
    let app = doctor_routes(Arc::new(config.to_app_config()));

    TestHarness {
        app,
        token,
        mock_server,
    }
}

async fn get_availability(harness: &TestHarness, uri: &str) -> (StatusCode, Value) {
    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("Authorization", format!("Bearer {}", harness.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn mount_doctor(mock_server: &MockServer, doctor_id: Uuid, doctor_row: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([doctor_row])))
        .mount(mock_server)
        .await;
}

async fn mount_appointments(mock_server: &MockServer, rows: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn open_monday_yields_sixteen_half_hour_slots() {
    let harness = harness().await;
    let doctor_id = Uuid::new_v4();

    let doctor = MockPostgrest::doctor_row(
        doctor_id,
        true,
        vec![MockPostgrest::weekly_slot("monday", "10:00", "18:00", true)],
    );
    mount_doctor(&harness.mock_server, doctor_id, doctor).await;
    mount_appointments(&harness.mock_server, json!([])).await;

    // 2024-01-01 was a Monday.
    let (status, body) = get_availability(
        &harness,
        &format!("/{}/availability?date=2024-01-01&duration=30", doctor_id),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let slots = body["available_slots"].as_array().unwrap();
    assert_eq!(slots.len(), 16);
    assert_eq!(slots[0], json!({ "start": "10:00", "end": "10:30" }));
    assert_eq!(slots[15], json!({ "start": "17:30", "end": "18:00" }));
    assert_eq!(body["working_window"], json!({ "start": "10:00", "end": "18:00" }));
}

#[tokio::test]
async fn booked_interval_is_removed_and_echoed() {
    let harness = harness().await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    let doctor = MockPostgrest::doctor_row(
        doctor_id,
        true,
        vec![MockPostgrest::weekly_slot("monday", "10:00", "18:00", true)],
    );
    mount_doctor(&harness.mock_server, doctor_id, doctor).await;
    mount_appointments(
        &harness.mock_server,
        json!([MockPostgrest::appointment_row(
            Uuid::new_v4(),
            patient_id,
            doctor_id,
            "2024-01-01",
            "14:00",
            "14:30",
            "scheduled"
        )]),
    )
    .await;

    let (status, body) = get_availability(
        &harness,
        &format!("/{}/availability?date=2024-01-01", doctor_id),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let slots = body["available_slots"].as_array().unwrap();
    assert_eq!(slots.len(), 15);
    assert!(!slots.contains(&json!({ "start": "14:00", "end": "14:30" })));
    assert_eq!(
        body["booked_slots"],
        json!([{ "start": "14:00", "end": "14:30" }])
    );
}

#[tokio::test]
async fn day_without_schedule_entry_has_no_window_and_no_slots() {
    let harness = harness().await;
    let doctor_id = Uuid::new_v4();

    let doctor = MockPostgrest::doctor_row(
        doctor_id,
        true,
        vec![MockPostgrest::weekly_slot("monday", "10:00", "18:00", true)],
    );
    mount_doctor(&harness.mock_server, doctor_id, doctor).await;
    mount_appointments(&harness.mock_server, json!([])).await;

    // 2024-01-07 was a Sunday.
    let (status, body) = get_availability(
        &harness,
        &format!("/{}/availability?date=2024-01-07", doctor_id),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["working_window"], Value::Null);
    assert_eq!(body["available_slots"], json!([]));
}

#[tokio::test]
async fn inactive_doctor_reads_as_empty_day() {
    let harness = harness().await;
    let doctor_id = Uuid::new_v4();

    let doctor = MockPostgrest::doctor_row(
        doctor_id,
        false,
        vec![MockPostgrest::weekly_slot("monday", "10:00", "18:00", true)],
    );
    mount_doctor(&harness.mock_server, doctor_id, doctor).await;

    let (status, body) = get_availability(
        &harness,
        &format!("/{}/availability?date=2024-01-01", doctor_id),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["working_window"], Value::Null);
    assert_eq!(body["available_slots"], json!([]));
}

#[tokio::test]
async fn unknown_doctor_is_a_404() {
    let harness = harness().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&harness.mock_server)
        .await;

    let (status, _) = get_availability(
        &harness,
        &format!("/{}/availability?date=2024-01-01", doctor_id),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let harness = harness().await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/{}/availability?date=2024-01-01", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
