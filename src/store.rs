//! Profile store collaborator.
//!
//! The router only ever calls [`ProfileStore::get`]; the account flows own
//! every write. [`WorkStore`] holds client projects and support tickets.
//! [`MemoryProfileStore`] implements both, keeps records in memory and can
//! mirror them to a JSON snapshot file under the data directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{ProfilePatch, UserProfile};

mod memory;

pub use memory::MemoryProfileStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("profile {0} not found")]
    NotFound(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("ticket {0} not found")]
    TicketNotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Answers collected by the onboarding questionnaire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnboardingAnswers {
    pub business_name: String,
    pub industry: String,
    pub location: String,
    #[serde(default)]
    pub service_area: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub secondary_color: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// Free-form answers from later wizard steps.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingRecord {
    pub user_id: String,
    pub answers: OnboardingAnswers,
    pub completed_at: DateTime<Utc>,
}

/// Password credential as persisted: the Argon2 PHC string, never the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Trimmed and lower-cased.
    pub email: String,
    pub user_id: String,
    pub phc: String,
}

impl StoredCredential {
    pub fn new(email: &str, user_id: impl Into<String>, phc: impl Into<String>) -> Self {
        Self { email: credential_key(email), user_id: user_id.into(), phc: phc.into() }
    }
}

pub fn credential_key(email: &str) -> String { email.trim().to_lowercase() }

/// Delivery stage of a client website project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Onboarding,
    Design,
    Development,
    Review,
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    AwaitingInfo,
    Completed,
}

impl TicketStatus {
    /// Still needs agency work.
    pub fn is_open(&self) -> bool { matches!(self, TicketStatus::Open | TicketStatus::InProgress) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketComment {
    pub id: String,
    pub message: String,
    pub is_staff_reply: bool,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default)]
    pub comments: Vec<TicketComment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no profile exists for `uid`.
    async fn get(&self, uid: &str) -> StoreResult<Option<UserProfile>>;
    /// Create or replace.
    async fn put(&self, profile: UserProfile) -> StoreResult<()>;
    /// Merge `patch` into an existing profile and return the result.
    async fn update(&self, uid: &str, patch: ProfilePatch) -> StoreResult<UserProfile>;
    async fn list(&self) -> StoreResult<Vec<UserProfile>>;
    async fn save_onboarding(&self, record: OnboardingRecord) -> StoreResult<()>;
    async fn onboarding(&self, uid: &str) -> StoreResult<Option<OnboardingRecord>>;
    /// Credential for `email`, matched case-insensitively.
    async fn credential(&self, email: &str) -> StoreResult<Option<StoredCredential>>;
    /// Insert unless the e-mail already has one. Returns false when taken.
    async fn insert_credential(&self, cred: StoredCredential) -> StoreResult<bool>;
}

#[async_trait]
pub trait WorkStore: Send + Sync {
    async fn put_project(&self, project: Project) -> StoreResult<()>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
    async fn put_ticket(&self, ticket: Ticket) -> StoreResult<()>;
    async fn ticket(&self, id: &str) -> StoreResult<Option<Ticket>>;
    /// Newest first.
    async fn list_tickets(&self) -> StoreResult<Vec<Ticket>>;
    /// Append a comment and bump `updated_at`.
    async fn add_comment(&self, ticket_id: &str, comment: TicketComment) -> StoreResult<Ticket>;
    async fn set_ticket_status(&self, ticket_id: &str, status: TicketStatus) -> StoreResult<Ticket>;
}
