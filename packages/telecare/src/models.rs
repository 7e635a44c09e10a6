//! Resource payloads shared by the REST API and live events.
//!
//! Field names follow the backend's camelCase JSON. Documents carry their
//! id as `_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use telecare_auth::Role;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub has_completed_profile: bool,
    #[serde(default)]
    pub has_accepted_terms: bool,
}

impl UserProfile {
    /// Missing onboarding flags count as not done.
    pub fn needs_onboarding(&self) -> bool {
        !self.has_completed_profile || !self.has_accepted_terms
    }

    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }
}

/// Names sent in request bodies. The onboarding flags belong to the backend
/// and are never part of a create or update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileNames {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl ProfileNames {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: Some(first_name.into()),
            last_name: Some(last_name.into()),
        }
    }
}

/// Authenticated account. The backend sends `id`, `_id`, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub profile: UserProfile,
}

impl User {
    pub fn user_id(&self) -> &str {
        if self.id.is_empty() {
            self.object_id.as_deref().unwrap_or_default()
        } else {
            &self.id
        }
    }

    pub fn display_name(&self) -> String {
        self.profile
            .display_name()
            .unwrap_or_else(|| self.email.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(rename = "_id")]
    pub id: String,
    pub patient: User,
    pub doctor: User,
    pub date_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_link: Option<String>,
}

/// Body for creating or rescheduling an appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    /// Doctor id.
    pub doctor: String,
    pub date_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: User,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Conversation id this message belongs to.
    pub conversation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: String,
    pub participants: Vec<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    pub last_activity: DateTime<Utc>,
}

/// Outbound chat message, sent over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Symptom,
    Vitals,
    Image,
    Voice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub risk_level: Level,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub suggested_specialty: String,
    pub urgency: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AnalysisKind,
    pub analysis: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(default)]
    pub upcoming_appointments: u64,
    #[serde(default)]
    pub ai_analyses: u64,
    #[serde(default)]
    pub new_messages: u64,
    #[serde(default)]
    pub prescriptions_ready: u64,
}

/// One day of the dashboard chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub day: String,
    #[serde(default)]
    pub appointments: u64,
    #[serde(default)]
    pub messages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrescriptionStatus {
    Pending,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    #[serde(rename = "_id")]
    pub id: String,
    pub patient: User,
    pub doctor: User,
    pub medication: String,
    pub status: PrescriptionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    Appointment,
    Message,
    AiAnalysis,
    Prescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Id of the related appointment, message, analysis or prescription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultation_fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub doctor_profile: DoctorProfile,
}

/// Body for registering a doctor account (admin only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDoctor {
    pub email: String,
    pub password: String,
    pub profile: ProfileNames,
    pub doctor_profile: DoctorProfile,
    pub role: Role,
}

/// Body for updating a doctor's public details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorUpdate {
    pub profile: ProfileNames,
    pub doctor_profile: DoctorProfile,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// A user row from the admin health-metrics screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithMetrics {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub health_metrics: Option<HealthMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Consultation,
    Test,
    Prescription,
    Report,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consultation => "consultation",
            Self::Test => "test",
            Self::Prescription => "prescription",
            Self::Report => "report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFile {
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
    pub size: u64,
    pub url: String,
}

/// Either a populated user or a bare `{ "_id": ... }` reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Populated(User),
    Id {
        #[serde(rename = "_id")]
        id: String,
    },
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Populated(user) => user.user_id(),
            Self::Id { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub patient: UserRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment: Option<String>,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<RecordFile>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A file to upload with a medical record.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Fields of a medical record create or edit. Sent as `multipart/form-data`:
/// scalars as text, lists as JSON, attachments as `files` parts.
#[derive(Debug, Clone, PartialEq)]
pub struct MedicalRecordForm {
    /// Patient id. Required.
    pub patient: String,
    pub doctor: Option<String>,
    pub appointment: Option<String>,
    pub kind: RecordKind,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub is_private: Option<bool>,
    /// Files already on the record that an edit keeps.
    pub existing_files: Vec<RecordFile>,
    pub attachments: Vec<Attachment>,
}

impl MedicalRecordForm {
    pub fn new(patient: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            patient: patient.into(),
            doctor: None,
            appointment: None,
            kind,
            title: None,
            description: None,
            tags: Vec::new(),
            is_private: None,
            existing_files: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
}

/// Hits for one resource type (`doctors`, `patients`, `appointments`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBucket {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

pub type SearchResults = std::collections::BTreeMap<String, SearchBucket>;
