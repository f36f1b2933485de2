use tracing::debug;

use super::{ADMIN_PATH, DASHBOARD_PATH, LOGIN_PATH, ONBOARDING_PATH};
use crate::error::RouteError;
use crate::identity::{Role, UserProfile};

/// Decide where a user goes after authentication.
///
/// First match wins: no profile goes to `/login`; admins always go to
/// `/admin`; a valid requested path is honored; users who have not finished
/// onboarding go to `/onboarding`; everyone else lands on the dashboard.
pub fn resolve_destination(profile: Option<&UserProfile>, requested: Option<&str>) -> String {
    let Some(profile) = profile else { return LOGIN_PATH.to_string(); };
    if profile.role == Role::Admin {
        return ADMIN_PATH.to_string();
    }
    if let Some(path) = requested {
        match validate_redirect(path) {
            Ok(path) => return path.to_string(),
            Err(e) => debug!(target: "guard", "{}", e),
        }
    }
    if !profile.onboarding_complete {
        return ONBOARDING_PATH.to_string();
    }
    DASHBOARD_PATH.to_string()
}

/// Accept only internal, non-login paths. Rejects external and
/// protocol-relative URLs and anything that would loop back to the login page.
/// Browsers read a backslash after the leading slash as `//`.
pub fn validate_redirect(path: &str) -> Result<&str, RouteError> {
    let rejected = !path.starts_with('/')
        || path.starts_with("//")
        || path.starts_with("/\\")
        || path == LOGIN_PATH
        || path.starts_with("/login?");
    if rejected {
        return Err(RouteError::ValidationRejected(path.to_string()));
    }
    Ok(path)
}

pub fn is_valid_redirect(path: &str) -> bool {
    validate_redirect(path).is_ok()
}

pub fn dashboard_route(profile: Option<&UserProfile>) -> &'static str {
    match profile {
        None => LOGIN_PATH,
        Some(p) if p.role == Role::Admin => ADMIN_PATH,
        Some(_) => DASHBOARD_PATH,
    }
}

pub fn should_redirect_to_onboarding(profile: Option<&UserProfile>) -> bool {
    match profile {
        None => false,
        Some(p) if p.role == Role::Admin => false,
        Some(p) => !p.onboarding_complete,
    }
}

/// `/login?redirect=<path>`, with the path percent-encoded.
pub fn login_redirect(path: &str) -> String {
    format!("{}?redirect={}", LOGIN_PATH, urlencoding::encode(path))
}

/// The onboarding page itself or one of its sub-paths.
pub fn is_onboarding_path(path: &str) -> bool {
    path == ONBOARDING_PATH
        || path
            .strip_prefix(ONBOARDING_PATH)
            .map(|rest| rest.starts_with('/') || rest.starts_with('?'))
            .unwrap_or(false)
}
