//! Session routing: where a navigation is allowed to land.
//!
//! [`resolve_destination`] is the pure post-login decision. [`RouteGuard`] is
//! the per-page check that subscribes to the identity stream, fetches the
//! profile once and either authorizes the page or redirects.

mod redirect;
mod guard;
mod navigation;

pub use redirect::{
    dashboard_route, is_onboarding_path, is_valid_redirect, login_redirect, resolve_destination,
    should_redirect_to_onboarding, validate_redirect,
};
pub use guard::{decide, GuardLifetime, GuardState, ProfileLookup, Rendered, RouteGuard, RouteRequirements};
pub use navigation::{Navigator, RecordingNavigator};

pub const LOGIN_PATH: &str = "/login";
pub const ONBOARDING_PATH: &str = "/onboarding";
pub const ADMIN_PATH: &str = "/admin";
pub const DASHBOARD_PATH: &str = "/";
