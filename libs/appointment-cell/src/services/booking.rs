use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::services::availability::DEFAULT_SLOT_MINUTES;
use shared_config::AppConfig;
use shared_database::{SupabaseClient, SupabaseError};
use shared_models::time::{TimeOfDay, TimeSlot};
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{
    Actor, Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest,
    BookabilityRequest, CancelAppointmentRequest, RescheduleAppointmentRequest,
    UpdateAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    clock: Arc<dyn Clock>,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            conflict_service: ConflictDetectionService::with_clock(config, Arc::clone(&clock)),
            lifecycle_service: AppointmentLifecycleService::new(),
            clock,
        }
    }

    /// Books a new appointment: bookability check first, then one atomic
    /// write that inserts the row and appends the id to both parties'
    /// appointment reference lists.
    pub async fn book_appointment(
        &self,
        actor: &Actor,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking appointment for patient {} with doctor {} on {}",
            request.patient_id, request.doctor_id, request.appointment_date
        );

        if let Actor::Patient(id) = actor {
            if *id != request.patient_id {
                return Err(AppointmentError::Permission(
                    "Patients may only book appointments for themselves".to_string(),
                ));
            }
        }

        let slot = Self::requested_slot(
            request.start_time,
            request.duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES),
        )?;

        self.verify_patient_exists(request.patient_id, auth_token)
            .await?;

        self.conflict_service
            .check_bookable(
                &BookabilityRequest {
                    doctor_id: request.doctor_id,
                    patient_id: request.patient_id,
                    date: request.appointment_date,
                    slot,
                    exclude_appointment_id: None,
                },
                auth_token,
            )
            .await?;

        let appointment = self
            .insert_appointment(actor, &request, slot, auth_token)
            .await?;

        info!(
            "Appointment {} booked for {} at {}",
            appointment.id, appointment.appointment_date, appointment.start_time
        );
        Ok(appointment)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        let row = result.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| AppointmentError::Database(format!("Failed to parse appointment: {}", e)))
    }

    /// Field and status mutation under the lifecycle authority rules.
    pub async fn update_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Updating appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        self.lifecycle_service
            .authorize_update(actor, &current, &request)?;

        if let Some(next) = &request.status {
            self.lifecycle_service
                .validate_transition(actor, &current.status, next)?;
        }

        let mut update_data = Map::new();
        if let Some(status) = &request.status {
            update_data.insert("status".to_string(), json!(status));
            if *status == AppointmentStatus::Cancelled {
                update_data.insert("cancelled_by".to_string(), json!(actor.as_cancel_actor()));
            }
        }
        if let Some(appointment_type) = &request.appointment_type {
            update_data.insert("appointment_type".to_string(), json!(appointment_type));
        }
        if let Some(department) = &request.department {
            update_data.insert("department".to_string(), json!(department));
        }
        if let Some(reason) = &request.reason {
            update_data.insert("reason".to_string(), json!(reason));
        }
        if let Some(notes) = &request.notes {
            update_data.insert("notes".to_string(), json!(notes));
        }

        if update_data.is_empty() {
            return Ok(current);
        }

        self.patch_appointment(appointment_id, update_data, auth_token)
            .await
    }

    /// Moves an appointment to a new date/time. The bookability check runs
    /// with the appointment itself excluded so it cannot conflict with its
    /// own slot, and a successful move always lands back in `scheduled`,
    /// whatever progress the old slot had made.
    pub async fn reschedule_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Rescheduling appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        self.lifecycle_service
            .authorize_owner_action(actor, &current, "reschedule")?;
        self.lifecycle_service.ensure_reschedulable(&current.status)?;

        let duration = request
            .new_duration_minutes
            .unwrap_or(current.duration_minutes);
        let slot = Self::requested_slot(request.new_start_time, duration)?;

        self.conflict_service
            .check_bookable(
                &BookabilityRequest {
                    doctor_id: current.doctor_id,
                    patient_id: current.patient_id,
                    date: request.new_date,
                    slot,
                    exclude_appointment_id: Some(appointment_id),
                },
                auth_token,
            )
            .await?;

        let mut update_data = Map::new();
        update_data.insert("appointment_date".to_string(), json!(request.new_date));
        update_data.insert("start_time".to_string(), json!(slot.start));
        update_data.insert("end_time".to_string(), json!(slot.end));
        update_data.insert("duration_minutes".to_string(), json!(duration));
        update_data.insert("status".to_string(), json!(AppointmentStatus::Scheduled));

        let rescheduled = self
            .patch_appointment(appointment_id, update_data, auth_token)
            .await?;

        info!(
            "Appointment {} rescheduled to {} at {}",
            appointment_id, rescheduled.appointment_date, rescheduled.start_time
        );
        Ok(rescheduled)
    }

    /// Cancels a scheduled or confirmed appointment, recording who cancelled
    /// and why. The freed interval becomes bookable again immediately.
    pub async fn cancel_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        self.lifecycle_service
            .authorize_owner_action(actor, &current, "cancel")?;
        self.lifecycle_service.ensure_cancellable(&current.status)?;

        let mut update_data = Map::new();
        update_data.insert("status".to_string(), json!(AppointmentStatus::Cancelled));
        update_data.insert("cancelled_by".to_string(), json!(actor.as_cancel_actor()));
        if let Some(reason) = &request.reason {
            update_data.insert("cancel_reason".to_string(), json!(reason));
        }

        let cancelled = self
            .patch_appointment(appointment_id, update_data, auth_token)
            .await?;

        info!("Appointment {} cancelled", appointment_id);
        Ok(cancelled)
    }

    pub async fn list_for_patient(
        &self,
        patient_id: Uuid,
        from_date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_appointments("patient_id", patient_id, from_date, auth_token)
            .await
    }

    pub async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        from_date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_appointments("doctor_id", doctor_id, from_date, auth_token)
            .await
    }

    /// Dry-run bookability probe, for the conflicts/check endpoint.
    pub async fn check_bookable(
        &self,
        request: &BookabilityRequest,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        self.conflict_service.check_bookable(request, auth_token).await
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    fn requested_slot(start: TimeOfDay, duration_minutes: u16) -> Result<TimeSlot, AppointmentError> {
        if duration_minutes == 0 {
            return Err(AppointmentError::Validation(
                "Appointment duration must be at least one minute".to_string(),
            ));
        }
        let end = start.plus_minutes(duration_minutes).ok_or_else(|| {
            AppointmentError::Validation(
                "Appointment may not run past midnight".to_string(),
            )
        })?;
        TimeSlot::new(start, end).map_err(|e| AppointmentError::Validation(e.to_string()))
    }

    async fn verify_patient_exists(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/patients?id=eq.{}&select=id", patient_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::PatientNotFound);
        }
        Ok(())
    }

    /// Single atomic write: the `book_appointment_refs` function inserts the
    /// appointment and appends its id to the patient's and doctor's
    /// reference lists (set-like, so retries cannot duplicate) in one
    /// transaction. The partial unique index on active
    /// `(doctor_id, appointment_date, start_time)` rows backstops the
    /// conflict check: a concurrent double-book surfaces as 409.
    async fn insert_appointment(
        &self,
        actor: &Actor,
        request: &BookAppointmentRequest,
        slot: TimeSlot,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let now = self.clock.now();

        let payload = json!({
            "p_patient_id": request.patient_id,
            "p_doctor_id": request.doctor_id,
            "p_appointment_date": request.appointment_date,
            "p_start_time": slot.start,
            "p_end_time": slot.end,
            "p_duration_minutes": slot.duration_minutes(),
            "p_appointment_type": request.appointment_type,
            "p_status": AppointmentStatus::Scheduled,
            "p_department": request.department,
            "p_reason": request.reason,
            "p_notes": request.notes,
            "p_created_by": actor.id(),
            "p_created_at": now.to_rfc3339(),
        });

        let row: Value = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/rpc/book_appointment_refs",
                Some(auth_token),
                Some(payload),
            )
            .await
            .map_err(|e| match e {
                SupabaseError::Conflict(body) => {
                    warn!("Storage constraint rejected booking: {}", body);
                    AppointmentError::DoctorConflict
                }
                other => AppointmentError::Database(other.to_string()),
            })?;

        serde_json::from_value(row).map_err(|e| {
            AppointmentError::Database(format!("Failed to parse created appointment: {}", e))
        })
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        mut update_data: Map<String, Value>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        update_data.insert(
            "updated_at".to_string(),
            json!(self.clock.now().to_rfc3339()),
        );

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(headers),
            )
            .await
            .map_err(|e| match e {
                SupabaseError::Conflict(body) => {
                    warn!("Storage constraint rejected update: {}", body);
                    AppointmentError::DoctorConflict
                }
                other => AppointmentError::Database(other.to_string()),
            })?;

        let row = result.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row).map_err(|e| {
            AppointmentError::Database(format!("Failed to parse updated appointment: {}", e))
        })
    }

    async fn list_appointments(
        &self,
        column: &str,
        id: Uuid,
        from_date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?{}=eq.{}&order=appointment_date.asc,start_time.asc",
            column, id
        );
        if let Some(from) = from_date {
            path.push_str(&format!("&appointment_date=gte.{}", from));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::Database(format!("Failed to parse appointments: {}", e)))
    }
}
