//! Identity, profiles and sessions for the portal.
//! Keep the public surface thin and split implementation across sub-modules.

mod user;
mod profile;
mod provider;
mod session;
mod credentials;
mod admin;
mod dev;

pub use user::{AuthUser, FederatedIdentity};
pub use profile::{Plan, ProfilePatch, Role, SubscriptionStatus, UserProfile};
pub use provider::{AuthState, AuthSubscription, IdentityProvider};
pub use session::{Session, SessionManager, SessionToken};
pub use credentials::{hash_password, verify_password};
pub use admin::AdminAllowList;
pub use dev::DevPersona;
