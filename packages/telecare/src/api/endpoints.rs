//! Typed endpoints. Paths are owned by the backend; these mirror its routes.

use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ApiClient;
use crate::error::ApiError;
use crate::models::{
    Activity, AiAnalysis, Appointment, AppointmentRequest, Conversation, DailyCount, Doctor,
    DoctorUpdate, HealthMetrics, MedicalRecord, MedicalRecordForm, Message, NewDoctor,
    ProfileNames, Role, SearchResults, Stats, User, UserWithMetrics,
};

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Self-service sign-up. New accounts are always patients.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub profile: ProfileNames,
}

impl Registration {
    pub fn patient(email: String, password: String, first_name: String, last_name: String) -> Self {
        Self {
            email,
            password,
            role: Role::Patient,
            profile: ProfileNames::new(first_name, last_name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// `/activities` answers with either a bare array or `{ "data": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ActivityList {
    Bare(Vec<Activity>),
    Wrapped {
        #[serde(default)]
        data: Vec<Activity>,
    },
}

#[derive(Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    data: Option<SearchResults>,
}

impl ApiClient {
    // -- auth ------------------------------------------------------------

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        self.post("/auth/login", credentials).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        self.post("/auth/register", registration).await
    }

    /// Profile of the token's owner, verified by the backend.
    pub async fn fetch_profile(&self, token: &str) -> Result<User, ApiError> {
        self.get_with_bearer("/user/profile", token).await
    }

    // -- dashboard -------------------------------------------------------

    pub async fn stats(&self) -> Result<Stats, ApiError> {
        self.get("/stats").await
    }

    pub async fn weekly_stats(&self) -> Result<Vec<DailyCount>, ApiError> {
        self.get("/stats/weekly").await
    }

    pub async fn activities(&self) -> Result<Vec<Activity>, ApiError> {
        let list: ActivityList = self.get("/activities").await?;
        Ok(match list {
            ActivityList::Bare(items) | ActivityList::Wrapped { data: items } => items,
        })
    }

    pub async fn recent_appointments(&self) -> Result<Vec<Appointment>, ApiError> {
        self.get("/activities/recent").await
    }

    // -- appointments ----------------------------------------------------

    pub async fn appointments(&self) -> Result<Vec<Appointment>, ApiError> {
        self.get("/appointments").await
    }

    pub async fn appointment(&self, id: &str) -> Result<Appointment, ApiError> {
        self.get(&format!("/appointments/{id}")).await
    }

    pub async fn create_appointment(
        &self,
        request: &AppointmentRequest,
    ) -> Result<Appointment, ApiError> {
        self.post("/appointments", request).await
    }

    pub async fn update_appointment(
        &self,
        id: &str,
        request: &AppointmentRequest,
    ) -> Result<Appointment, ApiError> {
        self.put(&format!("/appointments/{id}"), request).await
    }

    pub async fn delete_appointment(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/appointments/{id}")).await
    }

    // -- doctors ---------------------------------------------------------

    pub async fn doctors(&self) -> Result<Vec<Doctor>, ApiError> {
        self.get("/doctors").await
    }

    pub async fn doctor(&self, id: &str) -> Result<Doctor, ApiError> {
        self.get(&format!("/doctors/{id}")).await
    }

    pub async fn create_doctor(&self, doctor: &NewDoctor) -> Result<Doctor, ApiError> {
        self.post("/doctors", doctor).await
    }

    pub async fn update_doctor(&self, id: &str, update: &DoctorUpdate) -> Result<Doctor, ApiError> {
        self.put(&format!("/doctors/{id}"), update).await
    }

    // -- chat ------------------------------------------------------------

    pub async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get("/conversations").await
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        self.get(&format!("/conversations/{conversation_id}/messages"))
            .await
    }

    // -- AI assistant ----------------------------------------------------

    pub async fn analysis_history(&self) -> Result<Vec<AiAnalysis>, ApiError> {
        self.get("/ai/history").await
    }

    pub async fn analyze_symptoms(&self, symptoms: &[String]) -> Result<AiAnalysis, ApiError> {
        let payload = json!({
            "type": "symptom",
            "inputData": { "symptoms": symptoms },
        });
        self.post("/ai/analyze", &payload).await
    }

    // -- search ----------------------------------------------------------

    pub async fn search(&self, keyword: &str) -> Result<SearchResults, ApiError> {
        let query = [
            ("keyword", keyword),
            ("type", "all"),
            ("page", "1"),
            ("limit", "10"),
        ];
        let envelope: SearchEnvelope = self.get_query("/search", &query).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    // -- admin -----------------------------------------------------------

    pub async fn admin_users(&self) -> Result<Vec<User>, ApiError> {
        self.get("/admin/users").await
    }

    pub async fn medical_records(&self) -> Result<Vec<MedicalRecord>, ApiError> {
        self.get("/admin/medical-records").await
    }

    pub async fn medical_record(&self, id: &str) -> Result<MedicalRecord, ApiError> {
        self.get(&format!("/admin/medical-records/{id}")).await
    }

    pub async fn create_medical_record(
        &self,
        form: &MedicalRecordForm,
    ) -> Result<MedicalRecord, ApiError> {
        let form = record_form(form, false)?;
        self.send_form(Method::POST, "/medical-records", form).await
    }

    /// Replace a record's fields. Files not listed in `existing_files` are
    /// dropped by the backend.
    pub async fn update_medical_record(
        &self,
        id: &str,
        form: &MedicalRecordForm,
    ) -> Result<MedicalRecord, ApiError> {
        let form = record_form(form, true)?;
        self.send_form(Method::PUT, &format!("/admin/medical-records/{id}"), form)
            .await
    }

    pub async fn delete_medical_record(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/admin/medical-records/{id}")).await
    }

    pub async fn health_metrics(&self) -> Result<Vec<UserWithMetrics>, ApiError> {
        self.get("/admin/health-metrics").await
    }

    pub async fn update_health_metrics(
        &self,
        user_id: &str,
        metrics: &HealthMetrics,
    ) -> Result<HealthMetrics, ApiError> {
        self.put(&format!("/admin/health-metrics/{user_id}"), metrics)
            .await
    }

    pub async fn delete_health_metrics(&self, user_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/admin/health-metrics/{user_id}"))
            .await
    }
}

fn record_form(record: &MedicalRecordForm, editing: bool) -> Result<Form, ApiError> {
    if record.patient.trim().is_empty() {
        return Err(ApiError::Invalid("Patient and type are required".into()));
    }
    let mut form = Form::new()
        .text("patient", record.patient.clone())
        .text("type", record.kind.as_str());
    let optional = [
        ("doctor", &record.doctor),
        ("appointment", &record.appointment),
        ("title", &record.title),
        ("description", &record.description),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            form = form.text(name, value.clone());
        }
    }
    form = form.text("tags", encode_field(&record.tags)?);
    if let Some(private) = record.is_private {
        form = form.text("isPrivate", private.to_string());
    }
    if editing {
        form = form.text("existingFiles", encode_field(&record.existing_files)?);
    }
    for attachment in &record.attachments {
        let part = Part::bytes(attachment.bytes.clone())
            .file_name(attachment.file_name.clone())
            .mime_str(&attachment.mime)
            .map_err(ApiError::from_reqwest)?;
        form = form.part("files", part);
    }
    Ok(form)
}

/// List fields travel as JSON text inside the form.
fn encode_field<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string(value).map_err(|e| ApiError::Other(e.into()))
}
