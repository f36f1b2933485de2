use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::navigation::Navigator;
use super::redirect::{is_onboarding_path, login_redirect, resolve_destination};
use super::{ADMIN_PATH, DASHBOARD_PATH, LOGIN_PATH, ONBOARDING_PATH};
use crate::error::RouteError;
use crate::identity::{AuthSubscription, IdentityProvider, Role, UserProfile};
use crate::store::{ProfileStore, StoreResult};

/// What a protected route demands of the signed-in user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequirements {
    #[serde(default)]
    pub required_role: Option<Role>,
    #[serde(default)]
    pub require_onboarding_complete: bool,
}

impl RouteRequirements {
    pub fn signed_in() -> Self { Self::default() }

    pub fn onboarded_client() -> Self {
        Self { required_role: Some(Role::Client), require_onboarding_complete: true }
    }

    pub fn admin_only() -> Self {
        Self { required_role: Some(Role::Admin), require_onboarding_complete: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "target", rename_all = "snake_case")]
pub enum GuardState {
    Checking,
    Authorized,
    Redirecting(String),
}

impl GuardState {
    pub fn target(&self) -> Option<&str> {
        match self {
            GuardState::Redirecting(t) => Some(t.as_str()),
            _ => None,
        }
    }
}

/// What the protected page shows for a given guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendered {
    Loading,
    Content,
    Nothing,
}

/// Outcome of the identity check plus profile fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileLookup {
    SignedOut,
    Missing,
    Failed,
    Found(UserProfile),
}

impl ProfileLookup {
    pub fn from_fetch(result: StoreResult<Option<UserProfile>>) -> Self {
        match result {
            Ok(Some(p)) => ProfileLookup::Found(p),
            Ok(None) => ProfileLookup::Missing,
            Err(e) => {
                warn!(target: "guard", "profile fetch failed: {}", e);
                ProfileLookup::Failed
            }
        }
    }
}

fn redirect_for(err: RouteError) -> GuardState {
    let target = err.fallback_destination().unwrap_or(LOGIN_PATH);
    debug!(target: "guard", "{} -> {}", err, target);
    GuardState::Redirecting(target.to_string())
}

/// Decide a navigation to `path` once the lookup is known. Never returns
/// `Checking`.
pub fn decide(lookup: &ProfileLookup, path: &str, req: &RouteRequirements) -> GuardState {
    let profile = match lookup {
        ProfileLookup::SignedOut => return GuardState::Redirecting(login_redirect(path)),
        // The onboarding page is where a missing profile gets created.
        ProfileLookup::Missing if is_onboarding_path(path) => return GuardState::Authorized,
        ProfileLookup::Missing => return redirect_for(RouteError::ProfileNotFound),
        ProfileLookup::Failed => return redirect_for(RouteError::ProfileFetchFailed),
        ProfileLookup::Found(p) => p,
    };

    if let Some(role) = req.required_role {
        if profile.role != role {
            return GuardState::Redirecting(resolve_destination(Some(profile), None));
        }
    }

    match profile.role {
        Role::Admin => {
            if path == DASHBOARD_PATH || is_onboarding_path(path) {
                return GuardState::Redirecting(ADMIN_PATH.to_string());
            }
        }
        Role::Client => {
            if !profile.onboarding_complete && (req.require_onboarding_complete || !is_onboarding_path(path)) {
                return GuardState::Redirecting(ONBOARDING_PATH.to_string());
            }
        }
    }
    GuardState::Authorized
}

/// Shared handle on a guard's mount epoch. Unmounting through it makes any
/// in-flight profile fetch of that mount a no-op.
#[derive(Debug, Clone, Default)]
pub struct GuardLifetime {
    epoch: Arc<AtomicU64>,
}

impl GuardLifetime {
    fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub fn unmount(&self) {
        self.advance();
    }
}

/// Per-page guard. Mount it for a path, let it settle, and render only when
/// it reports [`GuardState::Authorized`].
pub struct RouteGuard {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    requirements: RouteRequirements,
    path: String,
    state: GuardState,
    subscription: Option<AuthSubscription>,
    mounted: Option<u64>,
    lifetime: GuardLifetime,
}

impl RouteGuard {
    pub fn new(identity: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileStore>, requirements: RouteRequirements) -> Self {
        Self {
            identity,
            profiles,
            requirements,
            path: DASHBOARD_PATH.to_string(),
            state: GuardState::Checking,
            subscription: None,
            mounted: None,
            lifetime: GuardLifetime::default(),
        }
    }

    /// Start checking a navigation to `path`. Any previous subscription is
    /// dropped before the new one is taken.
    pub fn mount(&mut self, path: &str) {
        self.subscription = None;
        let epoch = self.lifetime.advance();
        self.mounted = Some(epoch);
        self.path = path.to_string();
        self.state = GuardState::Checking;
        self.subscription = Some(self.identity.subscribe());
        debug!(target: "guard", "mount path={} epoch={}", path, epoch);
    }

    pub fn unmount(&mut self) {
        self.lifetime.unmount();
        self.release();
    }

    fn release(&mut self) {
        self.mounted = None;
        self.subscription = None;
    }

    pub fn lifetime(&self) -> GuardLifetime { self.lifetime.clone() }

    pub fn state(&self) -> &GuardState { &self.state }

    pub fn path(&self) -> &str { &self.path }

    pub fn is_subscribed(&self) -> bool { self.subscription.is_some() }

    pub fn render(&self) -> Rendered {
        match self.state {
            GuardState::Checking => Rendered::Loading,
            GuardState::Authorized => Rendered::Content,
            GuardState::Redirecting(_) => Rendered::Nothing,
        }
    }

    /// Wait for the identity stream and decide. A settled guard keeps its
    /// state; a guard unmounted meanwhile applies nothing.
    pub async fn settle(&mut self, nav: &dyn Navigator) -> GuardState {
        if self.state != GuardState::Checking {
            return self.state.clone();
        }
        self.check(nav).await
    }

    /// Wait for the next identity change after settling and check again.
    /// This is how a sign-out on another tab reaches an open page.
    pub async fn revalidate(&mut self, nav: &dyn Navigator) -> GuardState {
        if self.mounted.is_none() {
            return self.state.clone();
        }
        self.state = GuardState::Checking;
        self.check(nav).await
    }

    async fn check(&mut self, nav: &dyn Navigator) -> GuardState {
        let Some(epoch) = self.mounted else { return self.state.clone(); };
        if !self.lifetime.is_current(epoch) {
            self.release();
            return self.state.clone();
        }
        let Some(sub) = self.subscription.as_mut() else { return self.state.clone(); };
        let user = sub.next().await.flatten();

        let lookup = match user {
            None => ProfileLookup::SignedOut,
            Some(u) => ProfileLookup::from_fetch(self.profiles.get(&u.uid).await),
        };

        if !self.lifetime.is_current(epoch) {
            debug!(target: "guard", "stale check discarded path={}", self.path);
            self.release();
            return self.state.clone();
        }

        let next = decide(&lookup, &self.path, &self.requirements);
        match &next {
            GuardState::Redirecting(target) => {
                info!(target: "guard", "redirect path={} -> {}", self.path, target);
                nav.replace(target);
            }
            _ => debug!(target: "guard", "authorized path={}", self.path),
        }
        self.state = next;
        self.state.clone()
    }
}
