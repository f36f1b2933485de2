use serde::{Deserialize, Serialize};

/// Signed-in user as reported by the identity provider. Opaque to the
/// router apart from `uid`, which keys the profile lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self { uid: uid.into(), email: email.into(), ..Default::default() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Identity asserted by an external provider (e.g. Google) after its own
/// sign-in flow has completed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<FederatedIdentity> for AuthUser {
    fn from(f: FederatedIdentity) -> Self {
        AuthUser { uid: f.uid, email: f.email, display_name: f.display_name, avatar_url: f.avatar_url }
    }
}
