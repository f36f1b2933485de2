//! Account flows: the only code that creates or mutates profiles.
//!
//! Profiles are created at first successful sign-in with the client role
//! (admin when the e-mail is on the allow-list) and onboarding pending.
//! Onboarding completion flips the flag exactly once. Password credentials
//! are kept as Argon2 PHC strings in the same store as the profiles, so they
//! persist with the snapshot.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::identity::{hash_password, verify_password, AdminAllowList, AuthUser, FederatedIdentity, Plan, ProfilePatch, Role, UserProfile};
use crate::store::{credential_key, OnboardingAnswers, OnboardingRecord, ProfileStore, StoreError, StoredCredential};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));
static HEX_COLOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("color regex"));

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_NAME_LEN: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("invalid e-mail address")]
    InvalidEmail,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("name must be at least 2 characters")]
    InvalidName,
    #[error("an account with this e-mail already exists")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("no profile for user {0}")]
    ProfileNotFound(String),
    #[error("admin accounts do not go through onboarding")]
    AdminOnboarding,
    #[error("admin role required")]
    NotAdmin,
    #[error("invalid onboarding answers: {0}")]
    InvalidAnswers(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::InvalidEmail => "invalid_email",
            AccountError::WeakPassword => "weak_password",
            AccountError::InvalidName => "invalid_name",
            AccountError::EmailTaken => "email_taken",
            AccountError::InvalidCredentials => "invalid_credentials",
            AccountError::ProfileNotFound(_) => "profile_not_found",
            AccountError::AdminOnboarding => "admin_onboarding",
            AccountError::NotAdmin => "admin_only",
            AccountError::InvalidAnswers(_) => "invalid_answers",
            AccountError::Hash(_) => "hash_failed",
            AccountError::Store(_) => "store_error",
        }
    }
}

pub type AccountResult<T> = Result<T, AccountError>;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Fields a signed-in user may change on their own profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// A completed sign-in: who, their profile, and whether it was just created.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub user: AuthUser,
    pub profile: UserProfile,
    pub created: bool,
}

#[derive(Clone)]
pub struct AccountService {
    profiles: Arc<dyn ProfileStore>,
    admins: AdminAllowList,
}

fn validate_answers(a: &OnboardingAnswers) -> AccountResult<()> {
    for (field, value) in [("business_name", &a.business_name), ("industry", &a.industry), ("location", &a.location)] {
        if value.trim().is_empty() {
            return Err(AccountError::InvalidAnswers(format!("{field} is required")));
        }
    }
    for (field, value) in [("primary_color", &a.primary_color), ("secondary_color", &a.secondary_color)] {
        if let Some(c) = value {
            if !HEX_COLOR_RE.is_match(c) {
                return Err(AccountError::InvalidAnswers(format!("{field} must be a #RRGGBB color")));
            }
        }
    }
    Ok(())
}

impl AccountService {
    pub fn new(profiles: Arc<dyn ProfileStore>, admins: AdminAllowList) -> Self {
        Self { profiles, admins }
    }

    pub fn profiles(&self) -> Arc<dyn ProfileStore> { self.profiles.clone() }

    pub fn admins(&self) -> &AdminAllowList { &self.admins }

    pub async fn profile(&self, uid: &str) -> AccountResult<Option<UserProfile>> {
        Ok(self.profiles.get(uid).await?)
    }

    pub async fn register(&self, req: RegisterRequest) -> AccountResult<SignIn> {
        let email = req.email.trim().to_string();
        if !EMAIL_RE.is_match(&email) { return Err(AccountError::InvalidEmail); }
        if req.password.chars().count() < MIN_PASSWORD_LEN { return Err(AccountError::WeakPassword); }
        let name = req.name.trim().to_string();
        if name.chars().count() < MIN_NAME_LEN { return Err(AccountError::InvalidName); }
        if self.email_in_use(&email).await? { return Err(AccountError::EmailTaken); }

        let uid = uuid::Uuid::new_v4().to_string();
        let phc = hash_password(&req.password).map_err(|e| AccountError::Hash(e.to_string()))?;
        let inserted = self.profiles.insert_credential(StoredCredential::new(&email, uid.clone(), phc)).await?;
        if !inserted { return Err(AccountError::EmailTaken); }

        let profile = UserProfile::new(uid.clone(), email.clone(), name.clone(), self.admins.role_for(&email));
        self.profiles.put(profile.clone()).await?;
        info!(target: "accounts", "registered uid={} role={}", uid, profile.role.as_str());
        Ok(SignIn { user: AuthUser::new(uid, email).with_name(name), profile, created: true })
    }

    /// An e-mail is taken once it has a credential or any profile carries it,
    /// whichever way that profile was created.
    async fn email_in_use(&self, email: &str) -> AccountResult<bool> {
        if self.profiles.credential(email).await?.is_some() {
            return Ok(true);
        }
        let key = credential_key(email);
        Ok(self.profiles.list().await?.iter().any(|p| credential_key(&p.email) == key))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AccountResult<SignIn> {
        let cred = self.profiles.credential(email).await?;
        let Some(cred) = cred.filter(|c| verify_password(&c.phc, password)) else {
            warn!(target: "accounts", "failed sign-in for {}", credential_key(email));
            return Err(AccountError::InvalidCredentials);
        };
        let user = AuthUser::new(cred.user_id, email.trim());
        self.touch_or_create(user, None).await
    }

    /// Sign-in asserted by an external provider. An existing profile only has
    /// its login time updated; its role is left as stored.
    pub async fn sign_in_federated(&self, identity: FederatedIdentity) -> AccountResult<SignIn> {
        let name = identity.display_name.clone();
        self.touch_or_create(identity.into(), name).await
    }

    async fn touch_or_create(&self, user: AuthUser, name: Option<String>) -> AccountResult<SignIn> {
        match self.profiles.get(&user.uid).await? {
            Some(_) => {
                let profile = self.profiles.update(&user.uid, ProfilePatch::touch_login(Utc::now())).await?;
                info!(target: "accounts", "signed in uid={}", user.uid);
                Ok(SignIn { user, profile, created: false })
            }
            None => {
                let name = name.or_else(|| user.display_name.clone()).unwrap_or_else(|| "User".to_string());
                let mut profile = UserProfile::new(user.uid.clone(), user.email.clone(), name, self.admins.role_for(&user.email));
                profile.avatar_url = user.avatar_url.clone();
                self.profiles.put(profile.clone()).await?;
                info!(target: "accounts", "created profile at sign-in uid={} role={}", user.uid, profile.role.as_str());
                Ok(SignIn { user, profile, created: true })
            }
        }
    }

    /// Persist the questionnaire and mark onboarding complete. Completing
    /// twice returns the stored profile untouched.
    pub async fn complete_onboarding(&self, uid: &str, answers: OnboardingAnswers) -> AccountResult<UserProfile> {
        let profile = self
            .profiles
            .get(uid)
            .await?
            .ok_or_else(|| AccountError::ProfileNotFound(uid.to_string()))?;
        if profile.role == Role::Admin { return Err(AccountError::AdminOnboarding); }
        if profile.onboarding_complete { return Ok(profile); }
        validate_answers(&answers)?;

        self.profiles
            .save_onboarding(OnboardingRecord { user_id: uid.to_string(), answers, completed_at: Utc::now() })
            .await?;
        let patch = ProfilePatch { onboarding_complete: Some(true), ..Default::default() };
        let profile = self.profiles.update(uid, patch).await?;
        info!(target: "accounts", "onboarding complete uid={}", uid);
        Ok(profile)
    }

    /// Change name, plan or contact details. A name, when given, follows the
    /// registration rule.
    pub async fn update_profile(&self, uid: &str, update: ProfileUpdate) -> AccountResult<UserProfile> {
        let name = match update.name {
            Some(n) => {
                let n = n.trim().to_string();
                if n.chars().count() < MIN_NAME_LEN { return Err(AccountError::InvalidName); }
                Some(n)
            }
            None => None,
        };
        let patch = ProfilePatch { name, plan: update.plan, phone: update.phone, company: update.company, ..Default::default() };
        let profile = match self.profiles.update(uid, patch).await {
            Err(StoreError::NotFound(_)) => return Err(AccountError::ProfileNotFound(uid.to_string())),
            other => other?,
        };
        info!(target: "accounts", "profile updated uid={} plan={:?}", uid, profile.plan);
        Ok(profile)
    }

    /// Whether the stored profile for `uid` currently has the admin role.
    pub async fn is_admin(&self, uid: &str) -> AccountResult<bool> {
        Ok(self.profiles.get(uid).await?.map(|p| p.is_admin()).unwrap_or(false))
    }

    /// Profile an admin may act as. The role is read from the real user's
    /// stored profile, never from whoever they are currently acting as.
    pub async fn impersonation_target(&self, real_uid: &str, target_uid: &str) -> AccountResult<UserProfile> {
        if !self.is_admin(real_uid).await? {
            warn!(target: "accounts", "impersonation refused uid={}", real_uid);
            return Err(AccountError::NotAdmin);
        }
        self.profiles
            .get(target_uid)
            .await?
            .ok_or_else(|| AccountError::ProfileNotFound(target_uid.to_string()))
    }

    /// Promote existing client profiles whose e-mail is on the allow-list.
    /// Run once at startup.
    pub async fn seed_admins(&self) -> AccountResult<usize> {
        if self.admins.is_empty() { return Ok(0); }
        let mut promoted = 0usize;
        for p in self.profiles.list().await? {
            if p.role == Role::Client && self.admins.contains(&p.email) {
                let patch = ProfilePatch { role: Some(Role::Admin), ..Default::default() };
                self.profiles.update(&p.id, patch).await?;
                info!(target: "accounts", "promoted uid={} to admin", p.id);
                promoted += 1;
            }
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryProfileStore;

    fn service(admins: &str) -> AccountService {
        AccountService::new(Arc::new(MemoryProfileStore::new()), AdminAllowList::parse(admins))
    }

    fn reg(email: &str) -> RegisterRequest {
        RegisterRequest { email: email.into(), password: "hunter22".into(), name: "Pat Client".into() }
    }

    fn answers() -> OnboardingAnswers {
        OnboardingAnswers {
            business_name: "Pat's Plumbing".into(),
            industry: "trades".into(),
            location: "Leeds".into(),
            primary_color: Some("#7C3AED".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn register_creates_client_profile() {
        let svc = service("");
        let s = svc.register(reg("pat@shop.test")).await.unwrap();
        assert!(s.created);
        assert_eq!(s.profile.role, Role::Client);
        assert!(!s.profile.onboarding_complete);
        assert_eq!(svc.profile(&s.user.uid).await.unwrap().map(|p| p.email), Some("pat@shop.test".into()));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let svc = service("");
        assert!(matches!(svc.register(reg("not-an-email")).await, Err(AccountError::InvalidEmail)));
        let short = RegisterRequest { password: "12345".into(), ..reg("a@b.test") };
        assert!(matches!(svc.register(short).await, Err(AccountError::WeakPassword)));
        let noname = RegisterRequest { name: " x ".into(), ..reg("a@b.test") };
        assert!(matches!(svc.register(noname).await, Err(AccountError::InvalidName)));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let svc = service("");
        svc.register(reg("pat@shop.test")).await.unwrap();
        assert!(matches!(svc.register(reg("PAT@shop.test")).await, Err(AccountError::EmailTaken)));
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let svc = service("");
        let created = svc.register(reg("pat@shop.test")).await.unwrap();
        let s = svc.sign_in("pat@shop.test", "hunter22").await.unwrap();
        assert_eq!(s.user.uid, created.user.uid);
        assert!(!s.created);
        assert!(s.profile.last_login_at.is_some());
        assert!(matches!(svc.sign_in("pat@shop.test", "nope").await, Err(AccountError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn allow_listed_email_is_created_admin() {
        let svc = service("boss@agency.test");
        let s = svc.register(reg("Boss@Agency.test")).await.unwrap();
        assert_eq!(s.profile.role, Role::Admin);
    }

    #[tokio::test]
    async fn federated_sign_in_creates_then_touches() {
        let svc = service("");
        let id = FederatedIdentity { uid: "g-1".into(), email: "g@shop.test".into(), display_name: Some("Gee".into()), avatar_url: None };
        let first = svc.sign_in_federated(id.clone()).await.unwrap();
        assert!(first.created);
        assert_eq!(first.profile.name, "Gee");
        let second = svc.sign_in_federated(id).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.profile.created_at, first.profile.created_at);
    }

    #[tokio::test]
    async fn federated_relogin_does_not_repromote() {
        let store = Arc::new(MemoryProfileStore::new());
        let svc = AccountService::new(store.clone(), AdminAllowList::parse("boss@agency.test"));
        let id = FederatedIdentity { uid: "g-boss".into(), email: "boss@agency.test".into(), ..Default::default() };
        svc.sign_in_federated(id.clone()).await.unwrap();
        // demoted by other tooling
        store.update("g-boss", ProfilePatch { role: Some(Role::Client), ..Default::default() }).await.unwrap();
        let again = svc.sign_in_federated(id).await.unwrap();
        assert_eq!(again.profile.role, Role::Client);
    }

    #[tokio::test]
    async fn seed_admins_promotes_existing_profiles() {
        let store = Arc::new(MemoryProfileStore::new());
        store.put(UserProfile::new("u1", "boss@agency.test", "Boss", Role::Client)).await.unwrap();
        store.put(UserProfile::new("u2", "pat@shop.test", "Pat", Role::Client)).await.unwrap();
        let svc = AccountService::new(store.clone(), AdminAllowList::parse("boss@agency.test"));
        assert_eq!(svc.seed_admins().await.unwrap(), 1);
        assert_eq!(store.get("u1").await.unwrap().unwrap().role, Role::Admin);
        assert_eq!(store.get("u2").await.unwrap().unwrap().role, Role::Client);
        assert_eq!(svc.seed_admins().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn complete_onboarding_once() {
        let svc = service("");
        let s = svc.register(reg("pat@shop.test")).await.unwrap();
        let p = svc.complete_onboarding(&s.user.uid, answers()).await.unwrap();
        assert!(p.onboarding_complete);
        let rec = svc.profiles().onboarding(&s.user.uid).await.unwrap().unwrap();
        assert_eq!(rec.answers.business_name, "Pat's Plumbing");

        let other = OnboardingAnswers { business_name: "Changed".into(), ..answers() };
        let again = svc.complete_onboarding(&s.user.uid, other).await.unwrap();
        assert!(again.onboarding_complete);
        let rec = svc.profiles().onboarding(&s.user.uid).await.unwrap().unwrap();
        assert_eq!(rec.answers.business_name, "Pat's Plumbing");
    }

    #[tokio::test]
    async fn complete_onboarding_rejects_bad_answers_and_admins() {
        let svc = service("boss@agency.test");
        let client = svc.register(reg("pat@shop.test")).await.unwrap();
        let blank = OnboardingAnswers { location: "  ".into(), ..answers() };
        assert!(matches!(svc.complete_onboarding(&client.user.uid, blank).await, Err(AccountError::InvalidAnswers(_))));
        let badcolor = OnboardingAnswers { secondary_color: Some("purple".into()), ..answers() };
        assert!(matches!(svc.complete_onboarding(&client.user.uid, badcolor).await, Err(AccountError::InvalidAnswers(_))));

        let admin = svc.register(reg("boss@agency.test")).await.unwrap();
        assert!(matches!(svc.complete_onboarding(&admin.user.uid, answers()).await, Err(AccountError::AdminOnboarding)));
        assert!(matches!(svc.complete_onboarding("ghost", answers()).await, Err(AccountError::ProfileNotFound(_))));
    }

    #[tokio::test]
    async fn credentials_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        let uid = {
            let store = Arc::new(MemoryProfileStore::open(&path).unwrap());
            let svc = AccountService::new(store, AdminAllowList::default());
            svc.register(reg("pat@shop.test")).await.unwrap().user.uid
        };

        let store = Arc::new(MemoryProfileStore::open(&path).unwrap());
        let svc = AccountService::new(store.clone(), AdminAllowList::default());
        let s = svc.sign_in("Pat@Shop.test", "hunter22").await.unwrap();
        assert_eq!(s.user.uid, uid);
        assert!(!s.created);
        assert!(matches!(svc.register(reg("pat@shop.test")).await, Err(AccountError::EmailTaken)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_rejects_email_of_federated_profile() {
        let svc = service("");
        let id = FederatedIdentity { uid: "g-7".into(), email: "Sam@Shop.test".into(), ..Default::default() };
        svc.sign_in_federated(id).await.unwrap();
        assert!(matches!(svc.register(reg("sam@shop.test")).await, Err(AccountError::EmailTaken)));
        assert_eq!(svc.profiles().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_profile_changes_name_and_plan() {
        let svc = service("");
        let s = svc.register(reg("pat@shop.test")).await.unwrap();
        let p = svc
            .update_profile(&s.user.uid, ProfileUpdate { name: Some(" Pat Jones ".into()), plan: Some(Plan::Growth), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(p.name, "Pat Jones");
        assert_eq!(p.plan, Plan::Growth);
        assert_eq!(p.role, Role::Client);

        let short = ProfileUpdate { name: Some("P".into()), ..Default::default() };
        assert!(matches!(svc.update_profile(&s.user.uid, short).await, Err(AccountError::InvalidName)));
        assert!(matches!(
            svc.update_profile("ghost", ProfileUpdate::default()).await,
            Err(AccountError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn impersonation_requires_stored_admin_role() {
        let svc = service("boss@agency.test");
        let admin = svc.register(reg("boss@agency.test")).await.unwrap();
        let client = svc.register(reg("pat@shop.test")).await.unwrap();

        let target = svc.impersonation_target(&admin.user.uid, &client.user.uid).await.unwrap();
        assert_eq!(target.email, "pat@shop.test");
        assert!(matches!(
            svc.impersonation_target(&client.user.uid, &admin.user.uid).await,
            Err(AccountError::NotAdmin)
        ));
        assert!(matches!(
            svc.impersonation_target(&admin.user.uid, "ghost").await,
            Err(AccountError::ProfileNotFound(_))
        ));
    }
}
