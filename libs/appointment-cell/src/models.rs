use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use doctor_cell::models::{DayOfWeek, WorkingWindow};
use shared_models::time::{TimeOfDay, TimeSlot};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub duration_minutes: u16,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub department: Option<String>,
    pub reason: String,
    pub notes: Option<String>,
    pub cancelled_by: Option<CancelActor>,
    pub cancel_reason: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Terminal statuses admit no further transitions (doctor override aside).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether an appointment in this status holds its time slot. Cancelled
    /// and no-show appointments free the interval for others.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Consultation,
    FollowUp,
    Emergency,
    Surgery,
    Checkup,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppointmentType::Consultation => "consultation",
            AppointmentType::FollowUp => "follow_up",
            AppointmentType::Emergency => "emergency",
            AppointmentType::Surgery => "surgery",
            AppointmentType::Checkup => "checkup",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Patient,
    Doctor,
    Admin,
}

/// The authenticated caller, as the mutation-authority rules see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Patient(Uuid),
    Doctor(Uuid),
    Admin(Uuid),
}

impl Actor {
    pub fn id(&self) -> Uuid {
        match self {
            Actor::Patient(id) | Actor::Doctor(id) | Actor::Admin(id) => *id,
        }
    }

    pub fn as_cancel_actor(&self) -> CancelActor {
        match self {
            Actor::Patient(_) => CancelActor::Patient,
            Actor::Doctor(_) => CancelActor::Doctor,
            Actor::Admin(_) => CancelActor::Admin,
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: TimeOfDay,
    /// Defaults to the standard 30-minute slot.
    pub duration_minutes: Option<u16>,
    pub appointment_type: AppointmentType,
    pub department: Option<String>,
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub department: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl UpdateAppointmentRequest {
    /// Fields a patient is not allowed to touch.
    pub fn touches_clinical_fields(&self) -> bool {
        self.appointment_type.is_some() || self.department.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_date: NaiveDate,
    pub new_start_time: TimeOfDay,
    pub new_duration_minutes: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

/// Input to the bookability check; `exclude_appointment_id` lets a reschedule
/// ignore the appointment being moved.
#[derive(Debug, Clone, Copy)]
pub struct BookabilityRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub exclude_appointment_id: Option<Uuid>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Doctor is not accepting appointments")]
    InactiveDoctor,

    #[error("Doctor has no availability on {0}")]
    UnavailableDay(DayOfWeek),

    #[error("Requested time {requested} is outside working hours {window}")]
    OutsideHours {
        requested: TimeSlot,
        window: WorkingWindow,
    },

    #[error("Patient already has an overlapping appointment on this date")]
    PatientConflict,

    #[error("Doctor already has an overlapping appointment on this date")]
    DoctorConflict,

    #[error("Appointment date is in the past")]
    PastDate,

    #[error("Appointment start time has already passed")]
    PastTime,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Not permitted: {0}")]
    Permission(String),

    #[error("Database error: {0}")]
    Database(String),
}
