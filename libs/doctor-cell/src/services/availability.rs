use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::time::{TimeOfDay, TimeSlot};

use crate::models::{DayAvailability, DayOfWeek, DoctorError, WeeklyAvailabilitySlot, WorkingWindow};
use crate::services::doctor::DoctorService;

pub const DEFAULT_SLOT_MINUTES: u16 = 30;

/// Resolves the window a doctor works on `date` from their recurring weekly
/// schedule: linear scan, first entry whose weekday matches and is marked
/// available. Duplicate entries for the same weekday are legal data; the
/// first one in list order wins.
pub fn resolve_working_window(
    availability: &[WeeklyAvailabilitySlot],
    date: NaiveDate,
) -> Option<WorkingWindow> {
    let day = DayOfWeek::from_date(date);
    availability
        .iter()
        .find(|entry| entry.day == day && entry.is_available)
        .map(|entry| WorkingWindow {
            start: entry.start_time,
            end: entry.end_time,
        })
}

/// Steps through `window` in `slot_minutes` increments and keeps every
/// candidate that fits entirely inside the window and overlaps none of the
/// booked slots. Output is chronological; pure and recomputed per query.
pub fn generate_free_slots(
    window: &WorkingWindow,
    booked: &[TimeSlot],
    slot_minutes: u16,
) -> Vec<TimeSlot> {
    if slot_minutes == 0 {
        return Vec::new();
    }

    let window_end = u32::from(window.end.minutes_since_midnight());
    let mut slots = Vec::new();
    let mut current = window.start;

    loop {
        let slot_end = u32::from(current.minutes_since_midnight()) + u32::from(slot_minutes);
        if slot_end > window_end {
            break;
        }
        let candidate = TimeSlot {
            start: current,
            end: TimeOfDay::from_minutes(slot_end as u16).expect("bounded by window end"),
        };

        if !booked.iter().any(|taken| candidate.overlaps(taken)) {
            slots.push(candidate);
        }

        current = match current.plus_minutes(slot_minutes) {
            Some(next) => next,
            None => break,
        };
    }

    slots
}

#[derive(Debug, Deserialize)]
struct BookedRow {
    start_time: TimeOfDay,
    end_time: TimeOfDay,
}

pub struct AvailabilityService {
    supabase: Arc<SupabaseClient>,
    doctors: DoctorService,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let doctors = DoctorService::with_client(Arc::clone(&supabase));
        Self { supabase, doctors }
    }

    /// Computes the bookable slots for a doctor on a date: resolve the weekly
    /// window, subtract the day's occupying appointments, emit both lists.
    pub async fn day_availability(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        slot_minutes: Option<u16>,
        auth_token: &str,
    ) -> Result<DayAvailability, DoctorError> {
        debug!("Calculating availability for doctor {} on {}", doctor_id, date);

        let slot_minutes = slot_minutes.unwrap_or(DEFAULT_SLOT_MINUTES);
        if slot_minutes == 0 {
            return Err(DoctorError::Validation(
                "Slot duration must be at least one minute".to_string(),
            ));
        }

        let doctor = self.doctors.get_doctor(doctor_id, auth_token).await?;

        // An inactive doctor has nothing bookable; the write path reports
        // this as a hard error, the read path as an empty day.
        if !doctor.is_active {
            debug!("Doctor {} is inactive, returning empty day", doctor_id);
            return Ok(DayAvailability {
                doctor_id,
                date,
                working_window: None,
                available_slots: Vec::new(),
                booked_slots: Vec::new(),
            });
        }

        let working_window = resolve_working_window(&doctor.availability, date);
        let booked_slots = self.booked_slots(doctor_id, date, auth_token).await?;

        let available_slots = match &working_window {
            Some(window) => generate_free_slots(window, &booked_slots, slot_minutes),
            None => Vec::new(),
        };

        debug!(
            "Doctor {} on {}: {} free slots, {} booked",
            doctor_id,
            date,
            available_slots.len(),
            booked_slots.len()
        );

        Ok(DayAvailability {
            doctor_id,
            date,
            working_window,
            available_slots,
            booked_slots,
        })
    }

    /// Intervals already occupying the date for this doctor. Cancelled and
    /// no-show appointments do not hold their slot.
    pub async fn booked_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, DoctorError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=not.in.(cancelled,no_show)&select=start_time,end_time&order=start_time.asc",
            doctor_id, date
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let rows: Vec<BookedRow> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| DoctorError::Database(format!("Failed to parse appointments: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| TimeSlot {
                start: row.start_time,
                end: row.end_time,
            })
            .collect())
    }
}
