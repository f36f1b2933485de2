//!
//! portal HTTP server
//! ------------------
//! Axum JSON API for the client portal front end.
//!
//! Responsibilities:
//! - Cookie sessions with a per-session CSRF token, swept when expired.
//! - Register/login endpoints that answer with the resolved post-login destination.
//! - Guard decisions for protected pages, evaluated server-side.
//! - Onboarding completion, profile updates, support tickets and projects.
//! - Admin overview, user list and impersonation.
//! - Startup: profile snapshot, admin allow-list promotion, dev persona seeding
//!   and the revenue source.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::accounts::{AccountService, ProfileUpdate, RegisterRequest, SignIn};
use crate::billing::{revenue_from, AdminOverview, JsonFileSubscriptionSource, PlanPriceSource, SubscriptionSource};
use crate::config::PortalConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{AuthState, AuthUser, DevPersona, FederatedIdentity, IdentityProvider, Role, Session, SessionManager, UserProfile};
use crate::routing::{
    dashboard_route, decide, resolve_destination, should_redirect_to_onboarding, GuardState, ProfileLookup,
    RecordingNavigator, RouteGuard, RouteRequirements, ADMIN_PATH, LOGIN_PATH,
};
use crate::store::{MemoryProfileStore, OnboardingAnswers, ProfileStore, TicketStatus};
use crate::support::{Actor, NewTicket, SupportService};

pub const SESSION_COOKIE: &str = "portal_session";
pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Clone)]
pub struct AppState {
    accounts: AccountService,
    support: SupportService,
    sessions: SessionManager,
    subscriptions: Option<Arc<dyn SubscriptionSource>>,
    dev_persona: Option<DevPersona>,
    secure_cookies: bool,
}

impl AppState {
    pub fn new(accounts: AccountService, support: SupportService, sessions: SessionManager) -> Self {
        Self { accounts, support, sessions, subscriptions: None, dev_persona: None, secure_cookies: true }
    }

    pub fn with_subscriptions(mut self, source: Arc<dyn SubscriptionSource>) -> Self {
        self.subscriptions = Some(source);
        self
    }

    pub fn with_dev_persona(mut self, persona: Option<DevPersona>) -> Self {
        self.dev_persona = persona;
        self
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    pub fn accounts(&self) -> &AccountService { &self.accounts }

    pub fn support(&self) -> &SupportService { &self.support }

    pub fn sessions(&self) -> &SessionManager { &self.sessions }
}

fn log_startup(config: &PortalConfig) {
    let cwd = std::env::current_dir().ok();
    info!(
        target: "startup",
        "portal starting: http_port={}, data_dir={:?}, cwd={:?}, admins={}, session_ttl_secs={}, secure_cookies={}",
        config.http_port,
        config.data_dir,
        cwd,
        config.admins.len(),
        config.session_ttl.as_secs(),
        config.secure_cookies
    );
    if let Some(p) = config.dev_persona {
        warn!(target: "startup", "DEV MODE: persona {:?} can sign in without credentials via /api/auth/dev", p);
    }
}

/// Open the store, promote allow-listed admins, seed the dev persona's
/// profile and pick the revenue source.
pub async fn build_state(config: &PortalConfig) -> anyhow::Result<AppState> {
    let store = Arc::new(match config.snapshot_path() {
        Some(path) => MemoryProfileStore::open(&path)
            .with_context(|| format!("While opening profile snapshot: {}", path.display()))?,
        None => MemoryProfileStore::new(),
    });
    let profiles: Arc<dyn ProfileStore> = store.clone();
    let accounts = AccountService::new(profiles.clone(), config.admins.clone());
    let support = SupportService::new(store);

    let promoted = accounts.seed_admins().await.context("While promoting allow-listed admins")?;
    if promoted > 0 {
        info!(target: "startup", "promoted {} existing profile(s) to admin", promoted);
    }

    if let Some(persona) = config.dev_persona {
        let profile = persona.profile();
        if profiles.get(&profile.id).await?.is_none() {
            profiles.put(profile).await.context("While seeding dev persona profile")?;
        }
    }

    let subscriptions: Arc<dyn SubscriptionSource> = match config.subscriptions_path() {
        Some(path) if path.exists() => {
            info!(target: "startup", "revenue from subscription export {}", path.display());
            Arc::new(JsonFileSubscriptionSource::new(path))
        }
        _ => {
            info!(target: "startup", "revenue from client plan prices");
            Arc::new(PlanPriceSource::new(profiles))
        }
    };

    Ok(AppState::new(accounts, support, SessionManager::new(config.session_ttl))
        .with_subscriptions(subscriptions)
        .with_dev_persona(config.dev_persona)
        .with_secure_cookies(config.secure_cookies))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "portal ok" }))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/dev", post(dev_login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/csrf", get(get_csrf))
        .route("/api/session/destination", get(destination))
        .route("/api/guard", get(guard_check))
        .route("/api/me", get(me))
        .route("/api/profile", post(update_profile))
        .route("/api/onboarding/complete", post(complete_onboarding))
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/{id}", get(get_ticket))
        .route("/api/tickets/{id}/comments", post(comment_ticket))
        .route("/api/tickets/{id}/status", post(ticket_status))
        .route("/api/projects", get(list_projects))
        .route("/api/admin/overview", get(admin_overview))
        .route("/api/admin/users", get(admin_users))
        .route("/api/admin/projects", post(admin_create_project))
        .route("/api/admin/impersonate", post(start_impersonation))
        .route("/api/admin/impersonate/stop", post(stop_impersonation))
        .with_state(state)
}

/// Drop expired sessions every `every`, for the life of the runtime.
pub fn spawn_session_sweeper(sessions: SessionManager, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            let removed = sessions.sweep_expired();
            if removed > 0 { debug!(target: "auth", removed = removed, "session_sweep"); }
        }
    })
}

pub async fn run(config: PortalConfig) -> anyhow::Result<()> {
    log_startup(&config);
    let state = build_state(&config).await?;
    spawn_session_sweeper(state.sessions.clone(), config.session_sweep);
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name { return Some(v[1..].to_string()); }
        }
    }
    None
}

fn session_from_headers(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    let token = parse_cookie(headers, SESSION_COOKIE)?;
    state.sessions.validate(&token)
}

fn require_session(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    session_from_headers(state, headers).ok_or_else(|| AppError::auth("not_authenticated", "sign in required"))
}

/// Session for a state-changing request; the CSRF header must match.
fn validate_csrf(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    let session = require_session(state, headers)?;
    let Some(provided) = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(AppError::csrf("csrf_missing", "missing csrf token"));
    };
    if provided != session.csrf {
        warn!(target: "auth", "csrf mismatch sid={}", session.session_id);
        return Err(AppError::csrf("csrf_mismatch", "invalid csrf token"));
    }
    Ok(session)
}

fn cookie_attrs(secure: bool) -> &'static str {
    if secure { "HttpOnly; Secure; SameSite=Strict; Path=/" } else { "HttpOnly; SameSite=Strict; Path=/" }
}

fn set_session_cookie(token: &str, secure: bool) -> AppResult<HeaderValue> {
    HeaderValue::from_str(&format!("{}={}; {}", SESSION_COOKIE, token, cookie_attrs(secure)))
        .map_err(|e| AppError::internal("cookie_error".to_string(), e.to_string()))
}

fn clear_session_cookie(secure: bool) -> AppResult<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; {}",
        SESSION_COOKIE,
        cookie_attrs(secure)
    ))
    .map_err(|e| AppError::internal("cookie_error".to_string(), e.to_string()))
}

type CookieResponse = (StatusCode, HeaderMap, Json<Value>);

/// Uid whose portal the session is showing. Impersonation only holds while
/// the real user's stored profile is still an admin; otherwise it is ended
/// here and the real uid is returned.
async fn acting_uid(state: &AppState, session: &Session) -> AppResult<String> {
    let Some(target) = &session.acting_as else { return Ok(session.user_id.clone()); };
    if state.accounts.is_admin(&session.user_id).await? {
        return Ok(target.clone());
    }
    warn!(target: "auth", "impersonation ended: uid={} is no longer an admin", session.user_id);
    state.sessions.stop_impersonation(&session.token);
    Ok(session.user_id.clone())
}

/// Admin endpoints check the real user's profile, never the impersonated one.
async fn require_admin(state: &AppState, session: &Session) -> AppResult<()> {
    let lookup = ProfileLookup::from_fetch(state.accounts.profiles().get(&session.user_id).await);
    let decision = decide(&lookup, ADMIN_PATH, &RouteRequirements::admin_only());
    if decision != GuardState::Authorized {
        warn!(target: "auth", "admin endpoint denied uid={}", session.user_id);
        let target = decision.target().unwrap_or(LOGIN_PATH);
        return Err(AppError::forbidden("admin_only".to_string(), format!("admins only; continue to {}", target)));
    }
    Ok(())
}

/// Ticket actor for the session. An impersonating admin acts as the client.
async fn actor(state: &AppState, session: &Session) -> AppResult<Actor> {
    let uid = acting_uid(state, session).await?;
    let profile = state.accounts.profile(&uid).await?;
    let staff = uid == session.user_id && profile.as_ref().map(|p| p.is_admin()).unwrap_or(false);
    let name = profile.map(|p| p.name).unwrap_or_else(|| "User".to_string());
    Ok(Actor { user_id: uid, name, staff })
}

fn auth_user_for(profile: &UserProfile) -> AuthUser {
    let mut user = AuthUser::new(profile.id.clone(), profile.email.clone()).with_name(profile.name.clone());
    user.avatar_url = profile.avatar_url.clone();
    user
}

/// Issue a session for a completed sign-in and answer with where to go next.
fn signed_in(state: &AppState, status: StatusCode, sign_in: SignIn, redirect: Option<&str>) -> AppResult<CookieResponse> {
    let session = state.sessions.issue(sign_in.user.clone())?;
    let destination = resolve_destination(Some(&sign_in.profile), redirect);
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, set_session_cookie(&session.token, state.secure_cookies)?);
    info!(target: "auth", "signed in uid={} destination={}", sign_in.user.uid, destination);
    Ok((
        status,
        headers,
        Json(json!({
            "status": "ok",
            "destination": destination,
            "csrf": session.csrf,
            "created": sign_in.created,
            "profile": sign_in.profile,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    #[serde(flatten)]
    account: RegisterRequest,
    #[serde(default)]
    redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
    #[serde(default)]
    redirect: Option<String>,
}

async fn register(State(state): State<AppState>, Json(payload): Json<RegisterPayload>) -> AppResult<CookieResponse> {
    let sign_in = state.accounts.register(payload.account).await?;
    signed_in(&state, StatusCode::CREATED, sign_in, payload.redirect.as_deref())
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> AppResult<CookieResponse> {
    let sign_in = state.accounts.sign_in(&payload.email, &payload.password).await?;
    signed_in(&state, StatusCode::OK, sign_in, payload.redirect.as_deref())
}

/// Credential-free sign-in as the configured dev persona.
async fn dev_login(State(state): State<AppState>, Query(q): Query<DestinationQuery>) -> AppResult<CookieResponse> {
    let Some(persona) = state.dev_persona else {
        return Err(AppError::not_found("dev_mode_disabled", "dev sign-in is not enabled"));
    };
    let profiles = state.accounts.profiles();
    let profile = persona.profile();
    if profiles.get(&profile.id).await?.is_none() {
        profiles.put(profile).await?;
    }
    let user = persona.user();
    let identity = FederatedIdentity {
        uid: user.uid,
        email: user.email,
        display_name: user.display_name,
        avatar_url: user.avatar_url,
    };
    let sign_in = state.accounts.sign_in_federated(identity).await?;
    signed_in(&state, StatusCode::OK, sign_in, q.redirect.as_deref())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<CookieResponse> {
    let session = validate_csrf(&state, &headers)?;
    state.sessions.logout(&session.token);
    let mut h = HeaderMap::new();
    h.insert(SET_COOKIE, clear_session_cookie(state.secure_cookies)?);
    Ok((StatusCode::OK, h, Json(json!({"status": "ok", "destination": LOGIN_PATH}))))
}

async fn get_csrf(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    Ok(Json(json!({"status": "ok", "csrf": session.csrf})))
}

#[derive(Debug, Deserialize)]
struct DestinationQuery {
    #[serde(default)]
    redirect: Option<String>,
}

/// Where the login page sends someone who is already signed in.
async fn destination(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<DestinationQuery>,
) -> AppResult<Json<Value>> {
    let profile = match session_from_headers(&state, &headers) {
        Some(session) => state.accounts.profile(&acting_uid(&state, &session).await?).await?,
        None => None,
    };
    let destination = resolve_destination(profile.as_ref(), q.redirect.as_deref());
    Ok(Json(json!({"status": "ok", "destination": destination})))
}

#[derive(Debug, Deserialize)]
struct GuardQuery {
    path: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    onboarding: Option<bool>,
}

/// Run the route guard for one navigation and report the decision.
async fn guard_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<GuardQuery>,
) -> AppResult<Json<Value>> {
    let required_role = match q.role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(r) => Some(Role::parse(r).ok_or_else(|| AppError::user("invalid_role".to_string(), format!("unknown role: {}", r)))?),
    };
    let requirements = RouteRequirements { required_role, require_onboarding_complete: q.onboarding.unwrap_or(false) };

    let identity: Arc<dyn IdentityProvider> = match session_from_headers(&state, &headers) {
        Some(session) => {
            acting_uid(&state, &session).await?;
            session.identity
        }
        None => Arc::new(AuthState::signed_out()),
    };
    let mut guard = RouteGuard::new(identity, state.accounts.profiles(), requirements);
    guard.mount(&q.path);
    let nav = RecordingNavigator::new();
    let decision = guard.settle(&nav).await;
    guard.unmount();

    Ok(Json(json!({
        "status": "ok",
        "path": q.path,
        "decision": decision,
        "redirect": nav.last(),
    })))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let uid = acting_uid(&state, &session).await?;
    let profile = state.accounts.profile(&uid).await?;
    Ok(Json(json!({
        "status": "ok",
        "user": session.user(),
        "profile": profile,
        "dashboard": dashboard_route(profile.as_ref()),
        "needs_onboarding": should_redirect_to_onboarding(profile.as_ref()),
        "impersonating": uid != session.user_id,
        "real_user_id": session.user_id,
    })))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<Value>> {
    let session = validate_csrf(&state, &headers)?;
    let uid = acting_uid(&state, &session).await?;
    let profile = state.accounts.update_profile(&uid, update).await?;
    Ok(Json(json!({"status": "ok", "profile": profile})))
}

async fn complete_onboarding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(answers): Json<OnboardingAnswers>,
) -> AppResult<Json<Value>> {
    let session = validate_csrf(&state, &headers)?;
    let uid = acting_uid(&state, &session).await?;
    let profile = state.accounts.complete_onboarding(&uid, answers).await?;
    let destination = resolve_destination(Some(&profile), None);
    Ok(Json(json!({"status": "ok", "destination": destination, "profile": profile})))
}

async fn list_tickets(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let actor = actor(&state, &session).await?;
    let tickets = state.support.tickets_for(&actor).await?;
    Ok(Json(json!({"status": "ok", "tickets": tickets})))
}

async fn create_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewTicket>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let session = validate_csrf(&state, &headers)?;
    let uid = acting_uid(&state, &session).await?;
    let ticket = state.support.create_ticket(&uid, req).await?;
    Ok((StatusCode::CREATED, Json(json!({"status": "ok", "ticket": ticket}))))
}

async fn get_ticket(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let actor = actor(&state, &session).await?;
    let ticket = state.support.ticket(&id, &actor).await?;
    Ok(Json(json!({"status": "ok", "ticket": ticket})))
}

#[derive(Debug, Deserialize)]
struct CommentPayload {
    message: String,
}

async fn comment_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CommentPayload>,
) -> AppResult<Json<Value>> {
    let session = validate_csrf(&state, &headers)?;
    let actor = actor(&state, &session).await?;
    let ticket = state.support.add_comment(&id, &actor, &payload.message).await?;
    Ok(Json(json!({"status": "ok", "ticket": ticket})))
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: TicketStatus,
}

async fn ticket_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<StatusPayload>,
) -> AppResult<Json<Value>> {
    let session = validate_csrf(&state, &headers)?;
    let actor = actor(&state, &session).await?;
    let ticket = state.support.set_status(&id, &actor, payload.status).await?;
    Ok(Json(json!({"status": "ok", "ticket": ticket})))
}

async fn list_projects(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    let actor = actor(&state, &session).await?;
    let projects = state.support.projects_for(&actor).await?;
    Ok(Json(json!({"status": "ok", "projects": projects})))
}

async fn admin_overview(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    require_admin(&state, &session).await?;
    let profiles = state.accounts.profiles().list().await?;
    let projects = state.support.all_projects().await?;
    let tickets = state.support.all_tickets().await?;
    let revenue = revenue_from(state.subscriptions.as_deref()).await;
    Ok(Json(json!({"status": "ok", "overview": AdminOverview::build(&profiles, &projects, &tickets, revenue)})))
}

async fn admin_users(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    require_admin(&state, &session).await?;
    let mut users = state.accounts.profiles().list().await?;
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(json!({"status": "ok", "users": users})))
}

#[derive(Debug, Deserialize)]
struct NewProjectPayload {
    user_id: String,
    name: String,
}

async fn admin_create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewProjectPayload>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let session = validate_csrf(&state, &headers)?;
    require_admin(&state, &session).await?;
    if state.accounts.profile(&payload.user_id).await?.is_none() {
        return Err(AppError::not_found("profile_not_found".to_string(), format!("no profile for user {}", payload.user_id)));
    }
    let project = state.support.create_project(&payload.user_id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(json!({"status": "ok", "project": project}))))
}

#[derive(Debug, Deserialize)]
struct ImpersonatePayload {
    user_id: String,
}

/// Act as another user. The session's identity stream switches to the
/// target, so guards re-evaluate as that user.
async fn start_impersonation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ImpersonatePayload>,
) -> AppResult<Json<Value>> {
    let session = validate_csrf(&state, &headers)?;
    let target = state.accounts.impersonation_target(&session.user_id, &payload.user_id).await?;
    if state.sessions.impersonate(&session.token, auth_user_for(&target)).is_none() {
        return Err(AppError::auth("not_authenticated", "sign in required"));
    }
    info!(target: "auth", "impersonation started real={} as={}", session.user_id, target.id);
    let destination = resolve_destination(Some(&target), None);
    Ok(Json(json!({"status": "ok", "destination": destination, "profile": target})))
}

async fn stop_impersonation(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = validate_csrf(&state, &headers)?;
    if state.sessions.stop_impersonation(&session.token).is_none() {
        return Err(AppError::conflict("not_impersonating", "session is not impersonating anyone"));
    }
    info!(target: "auth", "impersonation stopped real={}", session.user_id);
    let profile = state.accounts.profile(&session.user_id).await?;
    let destination = resolve_destination(profile.as_ref(), None);
    Ok(Json(json!({"status": "ok", "destination": destination, "profile": profile})))
}
