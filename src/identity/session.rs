use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use base64::Engine;
use tracing::debug;

use super::provider::AuthState;
use super::user::AuthUser;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    /// The user who signed in, whoever they are acting as.
    pub user_id: String,
    pub real_user: AuthUser,
    /// Set while an admin is viewing the portal as another user.
    pub acting_as: Option<String>,
    pub token: SessionToken,
    pub csrf: String,
    pub identity: Arc<AuthState>,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

impl Session {
    pub fn user(&self) -> Option<AuthUser> {
        use super::provider::IdentityProvider;
        self.identity.current_user()
    }

    /// Uid whose portal this session is showing.
    pub fn effective_user_id(&self) -> &str {
        self.acting_as.as_deref().unwrap_or(&self.user_id)
    }

    pub fn is_impersonating(&self) -> bool { self.acting_as.is_some() }
}

fn gen_id() -> Result<String> {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)
        .map_err(|e| anyhow!(e.to_string()))
        .context("While generating session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionToken, Session>,
    by_user: HashMap<String, HashSet<SessionToken>>,
}

impl Tables {
    fn remove(&mut self, token: &str) -> Option<Session> {
        let s = self.sessions.remove(token)?;
        if let Some(set) = self.by_user.get_mut(&s.user_id) {
            set.remove(token);
            if set.is_empty() { self.by_user.remove(&s.user_id); }
        }
        Some(s)
    }

    fn take_expired(&mut self, now: Instant) -> Vec<Session> {
        let expired: Vec<SessionToken> =
            self.sessions.iter().filter(|(_, s)| s.expires_at <= now).map(|(t, _)| t.clone()).collect();
        expired.iter().filter_map(|t| self.remove(t)).collect()
    }
}

/// Cookie sessions. Each session owns an [`AuthState`] stream so that a
/// sign-out reaches every guard subscribed to it.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    tables: Arc<RwLock<Tables>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, tables: Arc::new(RwLock::new(Tables::default())) }
    }

    /// New session for `user`. Sessions that have already expired are
    /// dropped on the way in.
    pub fn issue(&self, user: AuthUser) -> Result<Session> {
        let now = Instant::now();
        let uid = user.uid.clone();
        let sess = Session {
            session_id: gen_id()?,
            user_id: uid.clone(),
            real_user: user.clone(),
            acting_as: None,
            token: gen_id()?,
            csrf: gen_id()?,
            identity: Arc::new(AuthState::signed_in(user)),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        let expired = {
            let mut t = self.tables.write();
            let expired = t.take_expired(now);
            t.sessions.insert(sess.token.clone(), sess.clone());
            t.by_user.entry(uid.clone()).or_default().insert(sess.token.clone());
            expired
        };
        sign_out_all(&expired);
        debug!(
            target: "auth",
            "session.issue user={} sid={} ttl_secs={} pruned={}",
            uid,
            sess.session_id,
            self.ttl.as_secs(),
            expired.len()
        );
        Ok(sess)
    }

    /// Live session for `token`. Expired sessions are signed out and dropped.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let now = Instant::now();
        let expired = {
            let t = self.tables.read();
            match t.sessions.get(token) {
                Some(s) if s.expires_at > now => return Some(s.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.logout(token);
        }
        None
    }

    pub fn csrf_matches(&self, token: &str, provided: &str) -> bool {
        self.validate(token).map(|s| s.csrf == provided).unwrap_or(false)
    }

    pub fn logout(&self, token: &str) -> bool {
        let removed = self.tables.write().remove(token);
        match removed {
            Some(s) => {
                s.identity.sign_out();
                debug!(target: "auth", "session.logout sid={}", s.session_id);
                true
            }
            None => false,
        }
    }

    pub fn revoke_user(&self, user_id: &str) -> usize {
        let dropped: Vec<Session> = {
            let mut t = self.tables.write();
            let tokens = t.by_user.remove(user_id).unwrap_or_default();
            tokens.iter().filter_map(|tok| t.sessions.remove(tok)).collect()
        };
        sign_out_all(&dropped);
        debug!(target: "auth", "session.revoke user={} count={}", user_id, dropped.len());
        dropped.len()
    }

    /// Drop every expired session and sign out its identity stream.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.tables.write().take_expired(Instant::now());
        sign_out_all(&expired);
        expired.len()
    }

    /// Make the session act as `target`. Guards subscribed to the session's
    /// identity stream see the switch as a sign-in of `target`.
    pub fn impersonate(&self, token: &str, target: AuthUser) -> Option<Session> {
        let sess = {
            let mut t = self.tables.write();
            let s = t.sessions.get_mut(token)?;
            s.acting_as = Some(target.uid.clone());
            s.clone()
        };
        debug!(target: "auth", "session.impersonate sid={} real={} as={}", sess.session_id, sess.user_id, target.uid);
        sess.identity.set(Some(target));
        Some(sess)
    }

    /// Return the session to its real user.
    pub fn stop_impersonation(&self, token: &str) -> Option<Session> {
        let sess = {
            let mut t = self.tables.write();
            let s = t.sessions.get_mut(token)?;
            s.acting_as.take()?;
            s.clone()
        };
        debug!(target: "auth", "session.impersonate.stop sid={}", sess.session_id);
        sess.identity.set(Some(sess.real_user.clone()));
        Some(sess)
    }

    pub fn len(&self) -> usize { self.tables.read().sessions.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

fn sign_out_all(sessions: &[Session]) {
    for s in sessions {
        s.identity.sign_out();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityProvider;

    #[test]
    fn issue_then_validate() {
        let sm = SessionManager::default();
        let s = sm.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        let got = sm.validate(&s.token).expect("live session");
        assert_eq!(got.user().map(|u| u.uid), Some("u1".into()));
        assert!(sm.csrf_matches(&s.token, &s.csrf));
        assert!(!sm.csrf_matches(&s.token, "nope"));
    }

    #[test]
    fn tokens_are_distinct() {
        let sm = SessionManager::default();
        let a = sm.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        let b = sm.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.csrf, b.csrf);
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.token, a.csrf);
        assert_eq!(a.token.len(), 43);
    }

    #[test]
    fn logout_signs_out_identity_stream() {
        let sm = SessionManager::default();
        let s = sm.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        let identity = s.identity.clone();
        assert!(sm.logout(&s.token));
        assert!(identity.current_user().is_none());
        assert!(sm.validate(&s.token).is_none());
        assert!(!sm.logout(&s.token));
    }

    #[test]
    fn expired_session_is_dropped() {
        let sm = SessionManager::new(Duration::from_secs(0));
        let s = sm.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        assert!(sm.validate(&s.token).is_none());
        assert!(sm.is_empty());
    }

    #[test]
    fn issue_prunes_expired_sessions() {
        let sm = SessionManager::new(Duration::from_millis(1));
        let first = sm.issue(AuthUser::new("u0", "u0@b.test")).unwrap();
        for i in 1..1000 {
            sm.issue(AuthUser::new(format!("u{}", i), "x@b.test")).unwrap();
        }
        std::thread::sleep(Duration::from_millis(20));
        sm.issue(AuthUser::new("late", "late@b.test")).unwrap();
        assert_eq!(sm.len(), 1);
        assert!(first.identity.current_user().is_none());
    }

    #[test]
    fn sweep_drops_only_expired() {
        let short = SessionManager::new(Duration::from_millis(1));
        short.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        short.issue(AuthUser::new("u2", "c@d.test")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(short.sweep_expired(), 2);
        assert!(short.is_empty());

        let long = SessionManager::default();
        long.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        assert_eq!(long.sweep_expired(), 0);
        assert_eq!(long.len(), 1);
    }

    #[test]
    fn revoke_user_drops_all_sessions() {
        let sm = SessionManager::default();
        let a = sm.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        let _b = sm.issue(AuthUser::new("u1", "a@b.test")).unwrap();
        let c = sm.issue(AuthUser::new("u2", "c@d.test")).unwrap();
        assert_eq!(sm.revoke_user("u1"), 2);
        assert!(sm.validate(&a.token).is_none());
        assert!(sm.validate(&c.token).is_some());
    }

    #[test]
    fn impersonation_swaps_identity_stream() {
        let sm = SessionManager::default();
        let s = sm.issue(AuthUser::new("admin-1", "boss@agency.test")).unwrap();
        let identity = s.identity.clone();

        let acting = sm.impersonate(&s.token, AuthUser::new("u9", "pat@shop.test")).unwrap();
        assert_eq!(acting.effective_user_id(), "u9");
        assert_eq!(acting.user_id, "admin-1");
        assert_eq!(identity.current_user().map(|u| u.uid), Some("u9".into()));
        assert!(sm.validate(&s.token).unwrap().is_impersonating());

        let back = sm.stop_impersonation(&s.token).unwrap();
        assert_eq!(back.effective_user_id(), "admin-1");
        assert_eq!(identity.current_user().map(|u| u.uid), Some("admin-1".into()));
        assert!(sm.stop_impersonation(&s.token).is_none());
        assert!(sm.impersonate("no-such-token", AuthUser::new("u9", "pat@shop.test")).is_none());
    }
}
