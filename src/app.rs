#![cfg(not(tarpaulin_include))]

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::dataset::{ColumnChoice, Dataset, DatasetError};
use crate::downloader;
use crate::grid::{self, GridPage, GridQuery, PAGE_SIZE_OPTIONS, QueryError};
use crate::loader::{self, LoadError};
use crate::login::{self, AuthConfig, SessionId, SessionStore};
use crate::row::RowFlag;

/// How long the page keeps an error banner up
pub const ERROR_DISMISS_MS: u64 = 5000;

/// Shared application state
///
/// Built once at startup and handed to every handler; the session store inside
/// is the only mutable part.
pub struct AppState {
    pub auth: AuthConfig,
    pub sessions: SessionStore,
    pub default_dataset: Option<PathBuf>,
    pub max_upload_mb: u64,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(auth: AuthConfig) -> Self {
        AppState {
            auth,
            sessions: SessionStore::default(),
            default_dataset: None,
            max_upload_mb: loader::MAX_FILE_SIZE_MB,
            static_dir: PathBuf::from("static"),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        AppState {
            auth: AuthConfig {
                username: config.auth_user.clone(),
                password: config.auth_pass.clone(),
            },
            sessions: SessionStore::new(Duration::from_secs(config.session_ttl_secs)),
            default_dataset: config.default_dataset.clone(),
            max_upload_mb: config.max_upload_mb,
            static_dir: config.static_dir.clone(),
        }
    }

    fn with_session<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut login::Session) -> T,
    ) -> Result<T, ApiError> {
        self.sessions
            .with_session(&id.0, f)
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Not signed in"))
    }

    fn read_session<T>(&self, id: &SessionId, f: impl FnOnce(&login::Session) -> T) -> Result<T, ApiError> {
        self.sessions
            .read_session(&id.0, f)
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Not signed in"))
    }

    // Read-only dataset access for queries and exports
    fn read_dataset<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&Dataset, usize) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        self.read_session(id, |session| match session.dataset.as_ref() {
            Some(dataset) => f(dataset, session.page_size),
            None => Err(ApiError::new(StatusCode::NOT_FOUND, "No data loaded")),
        })?
    }

    fn with_dataset<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Dataset, usize) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        self.with_session(id, |session| {
            let page_size = session.page_size;
            match session.dataset.as_mut() {
                Some(dataset) => f(dataset, page_size),
                None => Err(ApiError::new(StatusCode::NOT_FOUND, "No data loaded")),
            }
        })?
    }
}

/// Body of every error response; the page shows `error` and hides it after `dismiss_after_ms`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub dismiss_after_ms: u64,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.message.clone(),
            dismiss_after_ms: ERROR_DISMISS_MS,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

impl From<LoadError> for ApiError {
    fn from(e: LoadError) -> Self {
        let status = match e {
            LoadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            LoadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
    }
}

impl From<DatasetError> for ApiError {
    fn from(e: DatasetError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub source: String,
    pub row_count: usize,
    pub all_columns: Vec<String>,
    pub visible_columns: Vec<String>,
    pub date_columns: BTreeSet<String>,
}

impl DatasetSummary {
    fn of(dataset: &Dataset) -> Self {
        DatasetSummary {
            source: dataset.source().to_string(),
            row_count: dataset.len(),
            all_columns: dataset.all_columns().to_vec(),
            visible_columns: dataset.visible_columns().to_vec(),
            date_columns: dataset.date_columns().clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse {
    pub username: String,
    pub page_size: usize,
    pub page_size_options: Vec<usize>,
    pub loading: bool,
    pub dataset: Option<DatasetSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl StateResponse {
    fn of(session: &login::Session) -> Self {
        StateResponse {
            username: session.username.clone(),
            page_size: session.page_size,
            page_size_options: PAGE_SIZE_OPTIONS.to_vec(),
            loading: session.loading,
            dataset: session.dataset.as_ref().map(DatasetSummary::of),
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ColumnsResponse {
    pub visible_columns: Vec<String>,
    pub all_visible: bool,
}

impl ColumnsResponse {
    fn of(dataset: &Dataset) -> Self {
        ColumnsResponse {
            visible_columns: dataset.visible_columns().to_vec(),
            all_visible: dataset.all_visible(),
        }
    }
}

#[derive(Deserialize)]
struct ColumnsQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct SetColumns {
    columns: Vec<String>,
}

#[derive(Deserialize)]
struct ToggleColumn {
    column: String,
}

#[derive(Deserialize)]
struct SetFlags {
    rows: Vec<usize>,
    flag: RowFlag,
    value: bool,
}

#[derive(Serialize)]
struct FlagsResponse {
    updated: usize,
}

#[derive(Deserialize)]
struct SetPageSize {
    page_size: usize,
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default)]
    format: ExportFormat,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

/// Builds the router
///
/// Everything except the login page, logout and static files sits behind [`login::require_auth`].
pub fn router(state: Arc<AppState>) -> Router {
    // Uploads over the limit still need to reach the loader for a proper message
    let body_limit = (state.max_upload_mb as usize + 1) * 1024 * 1024;

    let protected = Router::new()
        .route("/grid", get(serve_grid))
        .route("/api/state", get(get_state))
        .route("/api/upload", post(upload))
        .route("/api/dataset", axum::routing::delete(clear_dataset))
        .route("/api/grid", post(query_grid))
        .route("/api/columns", get(list_columns).put(set_columns))
        .route("/api/columns/toggle", post(toggle_column))
        .route("/api/columns/show-all", post(show_all_columns))
        .route("/api/columns/reset", post(reset_columns))
        .route("/api/rows/flags", post(set_flags))
        .route("/api/page-size", put(set_page_size))
        .route("/api/export", post(export))
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_auth));

    Router::new()
        .route("/", get(|| async { Redirect::to("/grid") }))
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .route("/logout", post(login::handle_logout))
        .merge(protected)
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::from_config(&config));

    // Expired sessions are only ever rejected on lookup; sweep them now and then
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10 * 60));
        loop {
            interval.tick().await;
            let purged = sweeper.sessions.purge_expired();
            if purged > 0 {
                log::debug!("purged {} expired sessions", purged);
            }
        }
    });

    let app = router(state);

    let listener = TcpListener::bind(config.bind).await?;
    log::info!("Listening on http://{}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_grid() -> Html<&'static str> {
    Html(include_str!("./static/grid.html"))
}

async fn get_state(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
) -> Result<Json<StateResponse>, ApiError> {
    let error = load_default_dataset(&state, &id).await.err();
    let mut response = state.read_session(&id, StateResponse::of)?;
    response.error = error.map(|e| e.body());
    Ok(Json(response))
}

// Loads the bundled dataset the first time an empty session asks for its state
async fn load_default_dataset(state: &Arc<AppState>, id: &SessionId) -> Result<(), ApiError> {
    let Some(path) = state.default_dataset.clone() else {
        return Ok(());
    };

    let should_load = state.with_session(id, |session| {
        if session.dataset.is_some() || session.default_attempted || session.loading {
            return false;
        }
        session.default_attempted = true;
        session.loading = true;
        true
    })?;
    if !should_load {
        return Ok(());
    }

    let max_mb = state.max_upload_mb;
    let source = path.display().to_string();
    let result = tokio::task::spawn_blocking(move || {
        loader::load_file(&path, max_mb).map(|parsed| Dataset::from_parsed(source, parsed))
    })
    .await;

    finish_load(state, id, result)
}

fn finish_load(
    state: &AppState,
    id: &SessionId,
    result: Result<Result<Dataset, LoadError>, tokio::task::JoinError>,
) -> Result<(), ApiError> {
    let outcome = match result {
        Ok(Ok(dataset)) => Ok(dataset),
        Ok(Err(e)) => {
            log::warn!("load failed: {}", e);
            Err(ApiError::from(e))
        }
        Err(e) => {
            log::error!("load task failed: {}", e);
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to parse file."))
        }
    };

    state.with_session(id, |session| {
        session.loading = false;
        outcome.map(|dataset| session.dataset = Some(dataset))
    })?
}

fn multipart_error(e: MultipartError, max_mb: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("File is too large. Max {} MB.", max_mb),
        );
    }
    ApiError::new(e.status(), e.body_text())
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    mut multipart: Multipart,
) -> Result<Json<StateResponse>, ApiError> {
    let max_mb = state.max_upload_mb;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_mb))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, max_mb))?;
        upload = Some((file_name, bytes));
    }

    let Some((file_name, bytes)) = upload else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No file received"));
    };

    // Reject before touching the session so a bad file never disturbs the current data
    loader::validate_upload(&file_name, bytes.len(), max_mb)?;

    let busy = state.with_session(&id, |session| {
        let busy = session.loading;
        session.loading = true;
        busy
    })?;
    if busy {
        return Err(ApiError::new(StatusCode::CONFLICT, "A file is already being parsed"));
    }

    log::info!("parsing upload {} ({} bytes)", file_name, bytes.len());
    let result = tokio::task::spawn_blocking(move || {
        loader::parse_upload(&file_name, &bytes, max_mb)
            .map(|parsed| Dataset::from_parsed(file_name, parsed))
    })
    .await;

    finish_load(&state, &id, result)?;
    let response = state.read_session(&id, StateResponse::of)?;
    Ok(Json(response))
}

async fn clear_dataset(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
) -> Result<StatusCode, ApiError> {
    state.with_session(&id, |session| session.dataset = None)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn query_grid(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    Json(query): Json<GridQuery>,
) -> Result<Json<GridPage>, ApiError> {
    let page = state.read_dataset(&id, |dataset, page_size| {
        Ok(grid::query(dataset, &query, page_size)?)
    })?;
    Ok(Json(page))
}

async fn list_columns(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    Query(params): Query<ColumnsQuery>,
) -> Result<Json<Vec<ColumnChoice>>, ApiError> {
    let choices = state.read_dataset(&id, |dataset, _| Ok(dataset.column_choices(&params.q)))?;
    Ok(Json(choices))
}

async fn set_columns(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    Json(body): Json<SetColumns>,
) -> Result<Json<ColumnsResponse>, ApiError> {
    let response = state.with_dataset(&id, |dataset, _| {
        dataset.set_visible_columns(&body.columns);
        Ok(ColumnsResponse::of(dataset))
    })?;
    Ok(Json(response))
}

async fn toggle_column(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    Json(body): Json<ToggleColumn>,
) -> Result<Json<ColumnsResponse>, ApiError> {
    let response = state.with_dataset(&id, |dataset, _| {
        dataset.toggle_column(&body.column)?;
        Ok(ColumnsResponse::of(dataset))
    })?;
    Ok(Json(response))
}

async fn show_all_columns(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
) -> Result<Json<ColumnsResponse>, ApiError> {
    let response = state.with_dataset(&id, |dataset, _| {
        dataset.toggle_show_all();
        Ok(ColumnsResponse::of(dataset))
    })?;
    Ok(Json(response))
}

async fn reset_columns(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
) -> Result<Json<ColumnsResponse>, ApiError> {
    let response = state.with_dataset(&id, |dataset, _| {
        dataset.reset_columns();
        Ok(ColumnsResponse::of(dataset))
    })?;
    Ok(Json(response))
}

async fn set_flags(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    Json(body): Json<SetFlags>,
) -> Result<Json<FlagsResponse>, ApiError> {
    state.with_dataset(&id, |dataset, _| {
        dataset.set_flag(&body.rows, body.flag, body.value)?;
        Ok(())
    })?;
    Ok(Json(FlagsResponse {
        updated: body.rows.len(),
    }))
}

async fn set_page_size(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    Json(body): Json<SetPageSize>,
) -> Result<StatusCode, ApiError> {
    if !grid::is_valid_page_size(body.page_size) {
        return Err(QueryError::InvalidPageSize(body.page_size).into());
    }
    state.with_session(&id, |session| session.page_size = body.page_size)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export(
    State(state): State<Arc<AppState>>,
    Extension(id): Extension<SessionId>,
    Query(params): Query<ExportQuery>,
    Json(query): Json<GridQuery>,
) -> Result<Response, ApiError> {
    let (content, stem) = state.read_dataset(&id, |dataset, _| {
        let indices = grid::matching_rows(dataset, &query)?;
        let content = match params.format {
            ExportFormat::Csv => downloader::to_csv(dataset, &indices).map(String::into_bytes),
            ExportFormat::Xlsx => downloader::to_xlsx(dataset, &indices),
        }
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let stem = std::path::Path::new(dataset.source())
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("export")
            .to_string();
        Ok((content, stem))
    })?;

    let (content_type, extension) = match params.format {
        ExportFormat::Csv => ("text/csv; charset=utf-8", "csv"),
        ExportFormat::Xlsx => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "xlsx",
        ),
    };
    let disposition = format!("attachment; filename=\"{}-export.{}\"", stem.replace('"', ""), extension);

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}
