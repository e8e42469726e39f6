//! Shared helpers for cell integration tests: deterministic config, signed
//! test tokens, and canned PostgREST row payloads.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl TestUser {
    pub fn new(id: Uuid, email: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn patient(id: Uuid) -> Self {
        Self::new(id, "patient@example.com", "patient")
    }

    pub fn doctor(id: Uuid) -> Self {
        Self::new(id, "doctor@example.com", "doctor")
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, "admin@example.com", "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({ "alg": "HS256", "typ": "JWT" });
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows in the shapes the cells deserialize.
pub struct MockPostgrest;

impl MockPostgrest {
    pub fn weekly_slot(day: &str, start: &str, end: &str, is_available: bool) -> Value {
        json!({
            "day": day,
            "start_time": start,
            "end_time": end,
            "is_available": is_available
        })
    }

    pub fn doctor_row(doctor_id: Uuid, is_active: bool, availability: Vec<Value>) -> Value {
        json!({
            "id": doctor_id,
            "full_name": "Dr. Test",
            "specialty": "General Practice",
            "is_active": is_active,
            "availability": availability
        })
    }

    /// Doctor working Monday through Friday, 09:00-17:00.
    pub fn weekday_doctor_row(doctor_id: Uuid) -> Value {
        let availability = ["monday", "tuesday", "wednesday", "thursday", "friday"]
            .iter()
            .map(|day| Self::weekly_slot(day, "09:00", "17:00", true))
            .collect();
        Self::doctor_row(doctor_id, true, availability)
    }

    pub fn patient_row(patient_id: Uuid) -> Value {
        json!({
            "id": patient_id,
            "full_name": "Test Patient",
            "email": "patient@example.com"
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn appointment_row(
        id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
        date: &str,
        start: &str,
        end: &str,
        status: &str,
    ) -> Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_date": date,
            "start_time": start,
            "end_time": end,
            "duration_minutes": 30,
            "appointment_type": "consultation",
            "status": status,
            "department": null,
            "reason": "Routine visit",
            "notes": null,
            "cancelled_by": null,
            "cancel_reason": null,
            "created_by": patient_id,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }
}
