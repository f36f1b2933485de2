use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Client,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Some(Role::Client),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Starter,
    Growth,
    Pro,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    #[default]
    Trialing,
}

/// Profile record kept by the profile store, keyed by the identity uid.
/// The session router reads `role` and `onboarding_complete` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub onboarding_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Fresh profile as created at first sign-in: starter plan on trial,
    /// onboarding not done.
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            avatar_url: None,
            phone: None,
            company: None,
            role,
            plan: Plan::Starter,
            subscription_status: SubscriptionStatus::Trialing,
            onboarding_complete: false,
            created_at: now,
            updated_at: now,
            last_login_at: Some(now),
        }
    }

    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

/// Partial update merged into an existing profile. `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: Option<Role>,
    pub plan: Option<Plan>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub onboarding_complete: Option<bool>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl ProfilePatch {
    pub fn touch_login(at: DateTime<Utc>) -> Self {
        Self { last_login_at: Some(at), ..Default::default() }
    }

    pub fn apply(self, profile: &mut UserProfile) {
        if let Some(v) = self.name { profile.name = v; }
        if let Some(v) = self.avatar_url { profile.avatar_url = Some(v); }
        if let Some(v) = self.phone { profile.phone = Some(v); }
        if let Some(v) = self.company { profile.company = Some(v); }
        if let Some(v) = self.role { profile.role = v; }
        if let Some(v) = self.plan { profile.plan = v; }
        if let Some(v) = self.subscription_status { profile.subscription_status = v; }
        if let Some(v) = self.onboarding_complete { profile.onboarding_complete = v; }
        if let Some(v) = self.last_login_at { profile.last_login_at = Some(v); }
        profile.updated_at = Utc::now();
    }
}
