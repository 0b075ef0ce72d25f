use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::engine::Session;
use crate::error::{KbError, KbResult};
use crate::models::{
    ConceptView, Context, ContextStatus, Created, CreateConceptInput, CreateContextInput,
    CreateInstanceInput, EnterContextInput, Entry, FindInput, FindOutput, Instance, KbStatus,
    KindFilter, Resolved, SearchPath, SessionOpenInput, SessionOpened,
};

/// Header carrying the id handed out by `POST /sessions`.
pub const SESSION_HEADER: &str = "x-session-id";

/// The one session this server drives. Requests are serialized on its lock.
#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<Session>>,
}

impl AppState {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `op` after checking the request's session id.
    fn with_session<T>(
        &self,
        headers: &HeaderMap,
        op: impl FnOnce(&mut Session) -> KbResult<T>,
    ) -> Result<T, ApiError> {
        let mut session = self.session.lock().expect("session lock poisoned");
        let id = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        session.check_session_id(id)?;
        Ok(op(&mut session)?)
    }

    /// Run `op` without a session id, for login.
    fn without_session<T>(
        &self,
        op: impl FnOnce(&mut Session) -> KbResult<T>,
    ) -> Result<T, ApiError> {
        let mut session = self.session.lock().expect("session lock poisoned");
        Ok(op(&mut session)?)
    }
}

// ============================================================
// Error Handling
// ============================================================

/// A [`KbError`] rendered as an HTTP response with a JSON
/// [`ErrorBody`](crate::error::ErrorBody).
///
/// Storage failures are logged in full here and reach the client only as a
/// generic internal error.
#[derive(Debug)]
pub struct ApiError(pub KbError);

impl From<KbError> for ApiError {
    fn from(err: KbError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &KbError) -> StatusCode {
    match err {
        KbError::ContextNotFound(_)
        | KbError::ConceptNotFound(_)
        | KbError::InstanceNotFound(_)
        | KbError::NotAConcept(_) => StatusCode::NOT_FOUND,
        KbError::ExistingContext(_) | KbError::NameInUse { .. } | KbError::AlreadyLoggedIn(_) => {
            StatusCode::CONFLICT
        }
        KbError::WritingPermissionDenied(_) => StatusCode::FORBIDDEN,
        KbError::ClosedSession(_) | KbError::InvalidSession(_) => StatusCode::UNAUTHORIZED,
        KbError::IdentifierWrong(_)
        | KbError::NoContextSet(_)
        | KbError::UnknownType(_)
        | KbError::NamePropertyDoesNotExist { .. }
        | KbError::PropertyRangeNotMatchingType { .. } => StatusCode::BAD_REQUEST,
        KbError::Remote { .. } => StatusCode::BAD_GATEWAY,
        KbError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Internal error: {:#}", self.0);
        } else {
            tracing::warn!("Request failed: {}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Sessions
// ============================================================

pub async fn open_session(
    State(state): State<AppState>,
    Json(input): Json<SessionOpenInput>,
) -> ApiResult<(StatusCode, Json<SessionOpened>)> {
    state
        .without_session(|s| s.open(input))
        .map(|opened| (StatusCode::CREATED, Json(opened)))
}

pub async fn close_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.with_session(&headers, |s| s.close())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<KbStatus>> {
    state.with_session(&headers, |s| s.status()).map(Json)
}

// ============================================================
// Current context
// ============================================================

pub async fn enter_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<EnterContextInput>,
) -> ApiResult<StatusCode> {
    state.with_session(&headers, |s| s.enter(&input.prefix, input.mode))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_context(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.with_session(&headers, |s| s.leave())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_search_path(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SearchPath>> {
    state
        .with_session(&headers, |s| s.get_search_path())
        .map(|search_path| Json(SearchPath { search_path }))
}

pub async fn set_search_path(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<SearchPath>,
) -> ApiResult<StatusCode> {
    state.with_session(&headers, |s| s.set_search_path(input.search_path))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn freeze_context(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.with_session(&headers, |s| s.freeze_context())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_context(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.with_session(&headers, |s| s.reset_context())?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Contexts
// ============================================================

pub async fn create_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateContextInput>,
) -> ApiResult<(StatusCode, Json<Context>)> {
    state
        .with_session(&headers, |s| s.new_context(input))
        .map(|c| (StatusCode::CREATED, Json(c)))
}

/// Query parameters for describing a context.
#[derive(Debug, Deserialize)]
pub struct ContextStatusQuery {
    pub prefix: Option<String>,
}

pub async fn context_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ContextStatusQuery>,
) -> ApiResult<Json<ContextStatus>> {
    state
        .with_session(&headers, |s| s.context_status(query.prefix.as_deref()))
        .map(Json)
}

// ============================================================
// Resolution
// ============================================================

/// Query parameters for resolving an identifier.
#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub base: Option<String>,
    #[serde(default)]
    pub kind: KindFilter,
}

pub async fn resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> ApiResult<Json<Resolved>> {
    state
        .with_session(&headers, |s| {
            s.resolve(&identity, query.base.as_deref(), query.kind)
        })
        .map(Json)
}

// ============================================================
// Concepts
// ============================================================

pub async fn create_concept(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateConceptInput>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    state
        .with_session(&headers, |s| s.new_concept(input))
        .map(|pid| (StatusCode::CREATED, Json(Created { pid })))
}

/// Query parameters for fetching a concept.
#[derive(Debug, Deserialize)]
pub struct BaseQuery {
    pub base: Option<String>,
}

pub async fn get_concept(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity): Path<String>,
    Query(query): Query<BaseQuery>,
) -> ApiResult<Json<ConceptView>> {
    state
        .with_session(&headers, |s| s.get_concept(&identity, query.base.as_deref()))
        .map(Json)
}

// ============================================================
// Instances
// ============================================================

pub async fn create_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateInstanceInput>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    state
        .with_session(&headers, |s| s.new_instance(input))
        .map(|pid| (StatusCode::CREATED, Json(Created { pid })))
}

pub async fn get_instance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity): Path<String>,
) -> ApiResult<Json<Instance>> {
    state
        .with_session(&headers, |s| s.get_instance(&identity))
        .map(Json)
}

// ============================================================
// Entries
// ============================================================

pub async fn get_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(identity): Path<String>,
) -> ApiResult<Json<Entry>> {
    state.with_session(&headers, |s| s.get(&identity)).map(Json)
}

pub async fn find_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<FindInput>,
) -> ApiResult<Json<FindOutput>> {
    state.with_session(&headers, |s| s.find(input)).map(Json)
}
