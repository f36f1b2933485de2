use tokio::sync::watch;

use super::user::AuthUser;

/// Identity collaborator: a push-based stream of the current auth state.
///
/// `subscribe` hands out an [`AuthSubscription`] which yields the current
/// state first and then every change. Dropping the subscription is the
/// unsubscribe.
pub trait IdentityProvider: Send + Sync {
    fn subscribe(&self) -> AuthSubscription;
    fn current_user(&self) -> Option<AuthUser>;
}

/// One live subscription to an identity stream.
#[derive(Debug)]
pub struct AuthSubscription {
    rx: watch::Receiver<Option<AuthUser>>,
    primed: bool,
}

impl AuthSubscription {
    fn new(rx: watch::Receiver<Option<AuthUser>>) -> Self {
        Self { rx, primed: false }
    }

    /// Next auth state. `None` once the provider has gone away.
    pub async fn next(&mut self) -> Option<Option<AuthUser>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Auth state of one browser session. Sign-in and sign-out push to every
/// subscriber.
#[derive(Debug)]
pub struct AuthState {
    tx: watch::Sender<Option<AuthUser>>,
}

impl AuthState {
    pub fn new(initial: Option<AuthUser>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn signed_out() -> Self { Self::new(None) }

    pub fn signed_in(user: AuthUser) -> Self { Self::new(Some(user)) }

    pub fn set(&self, user: Option<AuthUser>) {
        self.tx.send_replace(user);
    }

    pub fn sign_out(&self) { self.set(None); }

    pub fn subscriber_count(&self) -> usize { self.tx.receiver_count() }
}

impl Default for AuthState {
    fn default() -> Self { Self::signed_out() }
}

impl IdentityProvider for AuthState {
    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.tx.subscribe())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.tx.borrow().clone()
    }
}
