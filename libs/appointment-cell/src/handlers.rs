use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::time::{TimeOfDay, TimeSlot};

use crate::models::{
    Actor, AppointmentError, BookAppointmentRequest, BookabilityRequest,
    CancelAppointmentRequest, RescheduleAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::booking::AppointmentBookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub from_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub exclude_appointment_id: Option<Uuid>,
}

// ==============================================================================
// HELPERS
// ==============================================================================

fn actor_from_user(user: &User) -> Result<Actor, AppError> {
    let id = Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Invalid subject claim".to_string()))?;

    // Ownership checks downstream do the real guarding; an unrecognised role
    // gets patient-level authority.
    Ok(match user.role.as_deref() {
        Some("admin") => Actor::Admin(id),
        Some("doctor") => Actor::Doctor(id),
        _ => Actor::Patient(id),
    })
}

fn map_appointment_error(err: AppointmentError) -> AppError {
    match &err {
        AppointmentError::Validation(_) => AppError::BadRequest(err.to_string()),
        AppointmentError::NotFound
        | AppointmentError::DoctorNotFound
        | AppointmentError::PatientNotFound => AppError::NotFound(err.to_string()),
        AppointmentError::InactiveDoctor
        | AppointmentError::UnavailableDay(_)
        | AppointmentError::OutsideHours { .. }
        | AppointmentError::PastDate
        | AppointmentError::PastTime => AppError::BadRequest(err.to_string()),
        AppointmentError::PatientConflict
        | AppointmentError::DoctorConflict
        | AppointmentError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
        AppointmentError::Permission(_) => AppError::Forbidden(err.to_string()),
        AppointmentError::Database(_) => AppError::Database(err.to_string()),
    }
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .book_appointment(&actor, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_appointment_error)?;

    let may_view = match actor {
        Actor::Admin(_) => true,
        Actor::Doctor(id) => appointment.doctor_id == id,
        Actor::Patient(id) => appointment.patient_id == id,
    };
    if !may_view {
        return Err(AppError::Forbidden(
            "Not authorized to view this appointment".to_string(),
        ));
    }

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .update_appointment(&actor, appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .reschedule_appointment(&actor, appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .cancel_appointment(&actor, appointment_id, request, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let may_view = match actor {
        Actor::Admin(_) => true,
        Actor::Patient(id) => id == patient_id,
        Actor::Doctor(_) => false,
    };
    if !may_view {
        return Err(AppError::Forbidden(
            "Not authorized to view this patient's appointments".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);
    let appointments = booking_service
        .list_for_patient(patient_id, query.from_date, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let may_view = match actor {
        Actor::Admin(_) => true,
        Actor::Doctor(id) => id == doctor_id,
        Actor::Patient(_) => false,
    };
    if !may_view {
        return Err(AppError::Forbidden(
            "Not authorized to view this doctor's appointments".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);
    let appointments = booking_service
        .list_for_doctor(doctor_id, query.from_date, auth.token())
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

/// Dry-run probe: answers "could this interval be booked right now" without
/// writing anything. Scheduling verdicts come back as 200 + reason; lookup
/// and storage failures keep their error status.
#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<ConflictCheckQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    actor_from_user(&user)?;

    let slot = TimeSlot::new(query.start_time, query.end_time)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let booking_service = AppointmentBookingService::new(&state);
    let result = booking_service
        .check_bookable(
            &BookabilityRequest {
                doctor_id: query.doctor_id,
                patient_id: query.patient_id,
                date: query.date,
                slot,
                exclude_appointment_id: query.exclude_appointment_id,
            },
            auth.token(),
        )
        .await;

    match result {
        Ok(()) => Ok(Json(json!({ "bookable": true }))),
        Err(
            err @ (AppointmentError::NotFound
            | AppointmentError::DoctorNotFound
            | AppointmentError::PatientNotFound
            | AppointmentError::Validation(_)
            | AppointmentError::Database(_)),
        ) => Err(map_appointment_error(err)),
        Err(verdict) => Ok(Json(json!({
            "bookable": false,
            "reason": verdict.to_string()
        }))),
    }
}
