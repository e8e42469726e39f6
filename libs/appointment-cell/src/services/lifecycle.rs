use tracing::{debug, warn};

use crate::models::{
    Actor, Appointment, AppointmentError, AppointmentStatus, UpdateAppointmentRequest,
};

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// The one-directional status machine. Reschedule is not a transition
    /// here: it rewrites date and time and forces the status back to
    /// `scheduled` after a fresh bookability check.
    pub fn valid_transitions(&self, current: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::InProgress => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            // Terminal states
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Validates a status change for the given actor. Terminal states are
    /// immutable for patients; doctors and admins may override them to
    /// correct records (a mistaken no-show, for instance).
    pub fn validate_transition(
        &self,
        actor: &Actor,
        current: &AppointmentStatus,
        next: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition {} -> {}", current, next);

        if current.is_terminal() && matches!(actor, Actor::Doctor(_) | Actor::Admin(_)) {
            warn!("Terminal override: {} -> {} by {:?}", current, next, actor);
            return Ok(());
        }

        if !self.valid_transitions(current).contains(next) {
            warn!("Invalid status transition attempted: {} -> {}", current, next);
            return Err(AppointmentError::InvalidTransition {
                from: *current,
                to: *next,
            });
        }

        Ok(())
    }

    /// Cancellation is only reachable from the two pre-care statuses.
    pub fn ensure_cancellable(&self, current: &AppointmentStatus) -> Result<(), AppointmentError> {
        match current {
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed => Ok(()),
            _ => Err(AppointmentError::InvalidTransition {
                from: *current,
                to: AppointmentStatus::Cancelled,
            }),
        }
    }

    /// Reschedule is blocked once an appointment is completed or cancelled.
    /// A no-show may still be rescheduled.
    pub fn ensure_reschedulable(&self, current: &AppointmentStatus) -> Result<(), AppointmentError> {
        match current {
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => {
                Err(AppointmentError::InvalidTransition {
                    from: *current,
                    to: AppointmentStatus::Scheduled,
                })
            }
            _ => Ok(()),
        }
    }

    /// Field-level mutation authority. Doctors may edit anything on their own
    /// appointments, admins anywhere; patients only their reason/notes and a
    /// cancellation, and only before care starts.
    pub fn authorize_update(
        &self,
        actor: &Actor,
        appointment: &Appointment,
        request: &UpdateAppointmentRequest,
    ) -> Result<(), AppointmentError> {
        match actor {
            Actor::Admin(_) => Ok(()),
            Actor::Doctor(id) => {
                if appointment.doctor_id != *id {
                    return Err(AppointmentError::Permission(
                        "Doctors may only modify their own appointments".to_string(),
                    ));
                }
                Ok(())
            }
            Actor::Patient(id) => {
                if appointment.patient_id != *id {
                    return Err(AppointmentError::Permission(
                        "Patients may only modify their own appointments".to_string(),
                    ));
                }
                if request.touches_clinical_fields() {
                    return Err(AppointmentError::Permission(
                        "Patients may only edit the reason and notes".to_string(),
                    ));
                }
                if let Some(status) = &request.status {
                    if *status != AppointmentStatus::Cancelled {
                        return Err(AppointmentError::Permission(
                            "Patients may only cancel an appointment".to_string(),
                        ));
                    }
                }
                if !matches!(
                    appointment.status,
                    AppointmentStatus::Scheduled | AppointmentStatus::Confirmed
                ) {
                    return Err(AppointmentError::Permission(
                        "Appointment can no longer be modified by the patient".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Reschedule and cancel are invocable by the owning patient, the owning
    /// doctor, or an admin.
    pub fn authorize_owner_action(
        &self,
        actor: &Actor,
        appointment: &Appointment,
        action: &str,
    ) -> Result<(), AppointmentError> {
        let owns = match actor {
            Actor::Admin(_) => true,
            Actor::Doctor(id) => appointment.doctor_id == *id,
            Actor::Patient(id) => appointment.patient_id == *id,
        };
        if !owns {
            return Err(AppointmentError::Permission(format!(
                "Only the appointment's patient or doctor may {}",
                action
            )));
        }
        Ok(())
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
