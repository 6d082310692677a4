#![cfg(not(tarpaulin_include))]

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use crate::dataset::Dataset;
use crate::grid::DEFAULT_PAGE_SIZE;

#[cfg(feature = "web")]
use axum::{
    Form,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar};
#[cfg(feature = "web")]
use serde::Deserialize;
#[cfg(feature = "web")]
use std::sync::Arc;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Default session lifetime (24 hours)
pub const SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// The single configured login
///
/// There is no user database: the login page is a gate in front of the grid,
/// checked against one username/password pair from the configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

/// Verify login credentials
///
/// The username is compared after trimming surrounding whitespace; the password must match exactly.
///
/// # Examples
/// ```
/// use notice_grid::login::{AuthConfig, verify_credentials};
///
/// let auth = AuthConfig::default();
/// assert!(verify_credentials(&auth, " admin ", "admin"));
/// assert!(!verify_credentials(&auth, "admin", " admin"));
/// ```
pub fn verify_credentials(auth: &AuthConfig, username: &str, password: &str) -> bool {
    username.trim() == auth.username && password == auth.password
}

/// State kept for one signed-in browser session
///
/// Created at login, dropped at logout or expiry. Holds the UI preferences and
/// the dataset being viewed; nothing here outlives the session.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: SystemTime,
    pub page_size: usize,
    pub dataset: Option<Dataset>,
    /// The bundled default dataset is tried at most once per session
    pub default_attempted: bool,
    /// An upload is being decoded
    pub loading: bool,
}

impl Session {
    fn new(username: &str, ttl: Duration) -> Self {
        Session {
            username: username.to_string(),
            expires_at: SystemTime::now() + ttl,
            page_size: DEFAULT_PAGE_SIZE,
            dataset: None,
            default_attempted: false,
            loading: false,
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at > SystemTime::now()
    }
}

/// All live sessions, keyed by session id
///
/// Owned by the application state and handed to handlers, not a global.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_DURATION)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a new session for an authenticated user and return its id
    #[cfg(feature = "web")]
    pub fn create(&self, username: &str) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.insert(session_id.clone(), username);
        session_id
    }

    /// Stores a session under a caller-chosen id
    pub fn insert(&self, session_id: String, username: &str) {
        let session = Session::new(username, self.ttl);
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session_id, session);
    }

    /// Username of a live session, `None` if unknown or expired
    pub fn validate(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .filter(|s| s.is_live())
            .map(|s| s.username.clone())
    }

    /// Runs `f` with mutable access to a live session
    pub fn with_session<T>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(session_id).filter(|s| s.is_live()).map(f)
    }

    /// Runs `f` with shared access to a live session; other sessions are not blocked
    pub fn read_session<T>(&self, session_id: &str, f: impl FnOnce(&Session) -> T) -> Option<T> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).filter(|s| s.is_live()).map(f)
    }

    /// Ends a session; its dataset and preferences go with it
    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id).is_some()
    }

    /// Drops every expired session and returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| s.is_live());
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Web handler functions below (only compiled with "web" feature)

/// Id of the authenticated session, inserted into request extensions by [`require_auth`]
#[cfg(feature = "web")]
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

/// Login form data
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Serve the login page HTML
#[cfg(feature = "web")]
pub async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

/// Handle login requests
///
/// Checks the submitted credentials and creates a session if valid.
///
/// # Returns
/// * `Response` - Redirect to the grid with a session cookie, or 401 with the error message
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<Arc<crate::app::AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    if !verify_credentials(&state.auth, &form.username, &form.password) {
        log::warn!("failed login for {:?}", form.username.trim());
        return (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response();
    }

    let username = form.username.trim();
    let session_id = state.sessions.create(username);
    log::info!("{} signed in", username);

    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .build();
    (jar.add(cookie), Redirect::to("/grid")).into_response()
}

/// Handle logout
///
/// Ends the session (dropping its dataset) and clears the cookie.
#[cfg(feature = "web")]
pub async fn handle_logout(
    State(state): State<Arc<crate::app::AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state.sessions.remove(cookie.value()) {
            log::info!("session ended");
        }
    }

    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(cookie), Redirect::to("/login"))
}

/// Authentication middleware
///
/// Lets requests with a live session through (with a [`SessionId`] extension).
/// Otherwise API calls get a 401 JSON error and pages redirect to the login page.
#[cfg(feature = "web")]
pub async fn require_auth(
    State(state): State<Arc<crate::app::AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state.sessions.validate(cookie.value()).is_some() {
            request
                .extensions_mut()
                .insert(SessionId(cookie.value().to_string()));
            return next.run(request).await;
        }
    }

    if request.uri().path().starts_with("/api/") {
        return crate::app::ApiError::new(StatusCode::UNAUTHORIZED, "Not signed in").into_response();
    }
    Redirect::to("/login").into_response()
}
