use std::sync::Arc;

use chrono::{NaiveDate, Timelike};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use doctor_cell::models::{DayOfWeek, DoctorError};
use doctor_cell::services::availability::resolve_working_window;
use doctor_cell::services::doctor::DoctorService;
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::time::TimeOfDay;
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{Appointment, AppointmentError, BookabilityRequest};

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
    doctors: DoctorService,
    clock: Arc<dyn Clock>,
}

impl ConflictDetectionService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let doctors = DoctorService::with_client(Arc::clone(&supabase));
        Self {
            supabase,
            doctors,
            clock,
        }
    }

    /// Decides whether the requested interval may be booked. Every check is a
    /// hard precondition; the first failure aborts with its own error kind so
    /// callers always see the most actionable problem:
    ///
    /// 1. the doctor exists and is active;
    /// 2. the weekly schedule yields a window for that weekday;
    /// 3. the interval lies inside the window;
    /// 4. the date is not in the past, and a same-day start is still ahead
    ///    of the wall clock;
    /// 5. the patient has no overlapping active appointment on that date;
    /// 6. neither does the doctor.
    ///
    /// `exclude_appointment_id` keeps a reschedule from colliding with the
    /// appointment being moved.
    pub async fn check_bookable(
        &self,
        request: &BookabilityRequest,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        debug!(
            "Checking bookability for doctor {} / patient {} on {} at {}",
            request.doctor_id, request.patient_id, request.date, request.slot
        );

        let doctor = self
            .doctors
            .get_doctor(request.doctor_id, auth_token)
            .await
            .map_err(|e| match e {
                DoctorError::NotFound => AppointmentError::DoctorNotFound,
                DoctorError::Validation(msg) => AppointmentError::Validation(msg),
                DoctorError::Database(msg) => AppointmentError::Database(msg),
            })?;

        if !doctor.is_active {
            return Err(AppointmentError::InactiveDoctor);
        }

        let window = resolve_working_window(&doctor.availability, request.date)
            .ok_or_else(|| AppointmentError::UnavailableDay(DayOfWeek::from_date(request.date)))?;

        if !window.contains(&request.slot) {
            return Err(AppointmentError::OutsideHours {
                requested: request.slot,
                window,
            });
        }

        let now = self.clock.now();
        let today = now.date_naive();
        if request.date < today {
            return Err(AppointmentError::PastDate);
        }
        if request.date == today {
            let wall_clock = TimeOfDay::from_hm(now.hour() as u16, now.minute() as u16)
                .expect("chrono hour/minute are in range");
            if request.slot.start <= wall_clock {
                return Err(AppointmentError::PastTime);
            }
        }

        let patient_day = self
            .active_appointments_for(
                "patient_id",
                request.patient_id,
                request.date,
                request.exclude_appointment_id,
                auth_token,
            )
            .await?;
        if let Some(existing) = patient_day
            .iter()
            .find(|apt| apt.status.occupies_slot() && apt.slot().overlaps(&request.slot))
        {
            warn!(
                "Patient {} already booked {} on {}",
                request.patient_id,
                existing.slot(),
                request.date
            );
            return Err(AppointmentError::PatientConflict);
        }

        let doctor_day = self
            .active_appointments_for(
                "doctor_id",
                request.doctor_id,
                request.date,
                request.exclude_appointment_id,
                auth_token,
            )
            .await?;
        if let Some(existing) = doctor_day
            .iter()
            .find(|apt| apt.status.occupies_slot() && apt.slot().overlaps(&request.slot))
        {
            warn!(
                "Doctor {} already booked {} on {}",
                request.doctor_id,
                existing.slot(),
                request.date
            );
            return Err(AppointmentError::DoctorConflict);
        }

        Ok(())
    }

    /// Non-cancelled, non-no-show appointments for one party on one date.
    async fn active_appointments_for(
        &self,
        column: &str,
        id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("{}=eq.{}", column, id),
            format!("appointment_date=eq.{}", date),
            "status=not.in.(cancelled,no_show)".to_string(),
        ];
        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=start_time.asc",
            query_parts.join("&")
        );

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
