//! Dev personas: canned users for demos and local work. The persona is chosen
//! once at process start (`PORTAL_DEV_PERSONA`) and seeds both the identity
//! stream and the profile store; nothing toggles it at runtime.

use serde::{Deserialize, Serialize};

use super::profile::{Plan, Role, SubscriptionStatus, UserProfile};
use super::user::AuthUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevPersona {
    NewUser,
    ReturningUser,
    Admin,
}

impl DevPersona {
    pub fn parse(s: &str) -> Option<DevPersona> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "new_user" | "new" => Some(DevPersona::NewUser),
            "returning_user" | "returning" => Some(DevPersona::ReturningUser),
            "admin" => Some(DevPersona::Admin),
            _ => None,
        }
    }

    pub fn user(&self) -> AuthUser {
        let p = self.profile();
        AuthUser { uid: p.id, email: p.email, display_name: Some(p.name), avatar_url: None }
    }

    pub fn profile(&self) -> UserProfile {
        match self {
            DevPersona::NewUser => UserProfile::new("dev-new-user", "newuser@portal.test", "New User (Dev)", Role::Client),
            DevPersona::ReturningUser => {
                let mut p = UserProfile::new("dev-returning-user", "returning@portal.test", "Returning User (Dev)", Role::Client);
                p.plan = Plan::Growth;
                p.subscription_status = SubscriptionStatus::Active;
                p.onboarding_complete = true;
                p.company = Some("Demo Company Ltd".into());
                p.phone = Some("+44 7123 456789".into());
                p
            }
            DevPersona::Admin => {
                let mut p = UserProfile::new("dev-admin", "admin@portal.test", "Admin (Dev)", Role::Admin);
                p.plan = Plan::Pro;
                p.subscription_status = SubscriptionStatus::Active;
                p.onboarding_complete = true;
                p
            }
        }
    }

    /// Where this persona lands after signing in.
    pub fn landing_path(&self) -> &'static str {
        match self {
            DevPersona::NewUser => "/onboarding",
            DevPersona::ReturningUser => "/",
            DevPersona::Admin => "/admin",
        }
    }
}
