use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{AppointmentError, BookabilityRequest};
use appointment_cell::services::conflict::ConflictDetectionService;
use shared_models::time::{TimeOfDay, TimeSlot};
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::{MockPostgrest, TestConfig};

const TOKEN: &str = "service-test-token";

fn t(s: &str) -> TimeOfDay {
    s.parse().expect("test time")
}

fn slot(start: &str, end: &str) -> TimeSlot {
    TimeSlot {
        start: t(start),
        end: t(end),
    }
}

fn date(s: &str) -> NaiveDate {
    s.parse().expect("test date")
}

/// Service under test, pinned to Monday 2024-01-01 12:00 UTC.
async fn service_at_noon(mock_server: &MockServer) -> ConflictDetectionService {
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    ConflictDetectionService::with_clock(&config, clock)
}

fn request(doctor_id: Uuid, patient_id: Uuid, day: &str, start: &str, end: &str) -> BookabilityRequest {
    BookabilityRequest {
        doctor_id,
        patient_id,
        date: date(day),
        slot: slot(start, end),
        exclude_appointment_id: None,
    }
}

async fn mount_monday_doctor(mock_server: &MockServer, doctor_id: Uuid) {
    let doctor = MockPostgrest::doctor_row(
        doctor_id,
        true,
        vec![MockPostgrest::weekly_slot("monday", "10:00", "18:00", true)],
    );
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([doctor])))
        .mount(mock_server)
        .await;
}

async fn mount_empty_appointments(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn missing_doctor_fails_first() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let result = service
        .check_bookable(
            &request(Uuid::new_v4(), Uuid::new_v4(), "2024-01-08", "10:00", "10:30"),
            TOKEN,
        )
        .await;

    assert_matches!(result, Err(AppointmentError::DoctorNotFound));
}

#[tokio::test]
async fn inactive_doctor_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();

    let doctor = MockPostgrest::doctor_row(
        doctor_id,
        false,
        vec![MockPostgrest::weekly_slot("monday", "10:00", "18:00", true)],
    );
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([doctor])))
        .mount(&mock_server)
        .await;

    let result = service
        .check_bookable(
            &request(doctor_id, Uuid::new_v4(), "2024-01-08", "10:00", "10:30"),
            TOKEN,
        )
        .await;

    assert_matches!(result, Err(AppointmentError::InactiveDoctor));
}

#[tokio::test]
async fn day_without_schedule_is_unavailable() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;

    // 2024-01-07 was a Sunday; the doctor only works Mondays.
    let result = service
        .check_bookable(
            &request(doctor_id, Uuid::new_v4(), "2024-01-07", "10:00", "10:30"),
            TOKEN,
        )
        .await;

    assert_matches!(result, Err(AppointmentError::UnavailableDay(_)));
}

#[tokio::test]
async fn interval_outside_the_window_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;

    for (start, end) in [("08:00", "08:30"), ("09:45", "10:15"), ("17:45", "18:15")] {
        let result = service
            .check_bookable(
                &request(doctor_id, Uuid::new_v4(), "2024-01-08", start, end),
                TOKEN,
            )
            .await;
        assert_matches!(
            result,
            Err(AppointmentError::OutsideHours { .. }),
            "{start}-{end} should be outside 10:00-18:00"
        );
    }
}

#[tokio::test]
async fn past_date_wins_even_when_the_slot_also_conflicts() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;
    // An overlapping appointment exists on that past date; the temporal check
    // must still report first.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrest::appointment_row(
                Uuid::new_v4(),
                patient_id,
                doctor_id,
                "2023-12-25",
                "14:00",
                "14:30",
                "scheduled"
            )
        ])))
        .mount(&mock_server)
        .await;

    // 2023-12-25 was a Monday, but it is before the pinned "today".
    let result = service
        .check_bookable(
            &request(doctor_id, patient_id, "2023-12-25", "14:00", "14:30"),
            TOKEN,
        )
        .await;

    assert_matches!(result, Err(AppointmentError::PastDate));
}

#[tokio::test]
async fn same_day_start_must_be_strictly_after_now() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;
    mount_empty_appointments(&mock_server).await;

    // Clock is pinned to 12:00 on 2024-01-01. One minute earlier fails...
    let result = service
        .check_bookable(
            &request(doctor_id, Uuid::new_v4(), "2024-01-01", "11:59", "12:29"),
            TOKEN,
        )
        .await;
    assert_matches!(result, Err(AppointmentError::PastTime));

    // ...and so does starting exactly now: "strictly after" means 12:00 is gone.
    let result = service
        .check_bookable(
            &request(doctor_id, Uuid::new_v4(), "2024-01-01", "12:00", "12:30"),
            TOKEN,
        )
        .await;
    assert_matches!(result, Err(AppointmentError::PastTime));

    let result = service
        .check_bookable(
            &request(doctor_id, Uuid::new_v4(), "2024-01-01", "12:01", "12:31"),
            TOKEN,
        )
        .await;
    assert_matches!(result, Ok(()));
}

#[tokio::test]
async fn patient_overlap_is_reported_before_doctor_overlap() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let other_doctor = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;
    // The patient is busy 14:00-14:30 with another doctor.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrest::appointment_row(
                Uuid::new_v4(),
                patient_id,
                other_doctor,
                "2024-01-08",
                "14:00",
                "14:30",
                "confirmed"
            )
        ])))
        .mount(&mock_server)
        .await;
    mount_empty_appointments(&mock_server).await;

    let result = service
        .check_bookable(
            &request(doctor_id, patient_id, "2024-01-08", "14:15", "14:45"),
            TOKEN,
        )
        .await;

    assert_matches!(result, Err(AppointmentError::PatientConflict));
}

#[tokio::test]
async fn identical_interval_for_the_doctor_conflicts() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;
    // Patient side is clear.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    // The doctor already has 14:00-14:30 with someone else.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockPostgrest::appointment_row(
                Uuid::new_v4(),
                Uuid::new_v4(),
                doctor_id,
                "2024-01-08",
                "14:00",
                "14:30",
                "scheduled"
            )
        ])))
        .mount(&mock_server)
        .await;

    let result = service
        .check_bookable(
            &request(doctor_id, patient_id, "2024-01-08", "14:00", "14:30"),
            TOKEN,
        )
        .await;

    assert_matches!(result, Err(AppointmentError::DoctorConflict));
}

#[tokio::test]
async fn cancelled_appointments_do_not_hold_their_slot() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;
    // The storage filter excludes cancelled/no-show rows, so both day queries
    // come back empty and the slot is free again.
    mount_empty_appointments(&mock_server).await;

    let result = service
        .check_bookable(
            &request(doctor_id, Uuid::new_v4(), "2024-01-08", "14:00", "14:30"),
            TOKEN,
        )
        .await;

    assert_matches!(result, Ok(()));
}

#[tokio::test]
async fn excluded_appointment_never_conflicts_with_itself() {
    let mock_server = MockServer::start().await;
    let service = service_at_noon(&mock_server).await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    mount_monday_doctor(&mock_server, doctor_id).await;
    // Both day queries must carry id=neq.<own id>; the mocks only answer when
    // the exclusion is present, and the filtered result is empty.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let result = service
        .check_bookable(
            &BookabilityRequest {
                doctor_id,
                patient_id,
                date: date("2024-01-08"),
                slot: slot("14:00", "14:30"),
                exclude_appointment_id: Some(appointment_id),
            },
            TOKEN,
        )
        .await;

    assert_matches!(result, Ok(()));
}
