use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::codec::ContentCodec;
use crate::duration::{normalize_tz_offset_minutes, tz_offset_from_minutes};
use crate::error::CoreError;
use crate::export::{export_csv, export_markdown};
use crate::reconstruct::group_by_day;
use crate::service;
use crate::store::SqliteStore;
use crate::summarizer::Summarizer;
use crate::summary::generate_review;

/// Set by the upstream auth proxy; the core trusts it as the owner identity.
pub const OWNER_HEADER: &str = "x-owner-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<SqliteStore>>,
    pub codec: Arc<dyn ContentCodec>,
    pub summarizer: Arc<dyn Summarizer>,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

#[derive(Deserialize)]
struct TaskRequest {
    content: String,
}

#[derive(Deserialize)]
struct TzQuery {
    tz_offset_minutes: Option<i32>,
}

#[derive(Serialize)]
struct SessionRef {
    session_id: String,
}

#[derive(Serialize)]
struct TaskStarted {
    session_id: String,
    task_id: String,
}

#[derive(Serialize)]
struct Review {
    session_id: String,
    summary: String,
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(OWNER_HEADER)]);

    Router::new()
        .route("/health", get(health))
        .route(
            "/sessions",
            get(get_sessions).post(post_sessions).options(options_ok),
        )
        .route("/sessions/current", get(get_current_session))
        .route("/sessions/days", get(get_session_days))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/end", post(post_session_end).options(options_ok))
        .route("/sessions/:id/tasks", post(post_session_task).options(options_ok))
        .route("/sessions/:id/review", get(get_session_review))
        .route("/sessions/:id/export/markdown", get(get_export_markdown))
        .route("/sessions/:id/export/csv", get(get_export_csv))
        .route("/tasks", post(post_task).options(options_ok))
        .with_state(state)
        .layer(cors)
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(data),
    })
    .into_response()
}

fn error_response(err: CoreError) -> Response {
    error!(code = err.code(), "request failed: {err}");
    (
        err.status(),
        Json(ErrResponse {
            ok: false,
            error: err.code(),
        }),
    )
        .into_response()
}

fn owner_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrResponse {
                    ok: false,
                    error: "unauthenticated",
                }),
            )
                .into_response()
        })
}

fn parse_task_request(payload: Value) -> Result<TaskRequest, Response> {
    serde_json::from_value(payload).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrResponse {
                ok: false,
                error: "invalid_input",
            }),
        )
            .into_response()
    })
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

async fn health() -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "worklog_core",
            version: env!("CARGO_PKG_VERSION"),
        }),
    })
}

async fn post_sessions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = state.store.lock().await;
    match service::begin_session(&mut *store, &owner, OffsetDateTime::now_utc()) {
        Ok(session_id) => ok(SessionRef { session_id }),
        Err(err) => error_response(err),
    }
}

async fn get_sessions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = state.store.lock().await;
    match service::list_sessions(
        &mut *store,
        state.codec.as_ref(),
        &owner,
        OffsetDateTime::now_utc(),
    ) {
        Ok(sessions) => ok(sessions),
        Err(err) => error_response(err),
    }
}

async fn get_current_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = state.store.lock().await;
    match service::get_active_session(
        &mut *store,
        state.codec.as_ref(),
        &owner,
        OffsetDateTime::now_utc(),
    ) {
        Ok(current) => ok(current),
        Err(err) => error_response(err),
    }
}

async fn get_session_days(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<TzQuery>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let tz_offset = tz_offset_from_minutes(normalize_tz_offset_minutes(q.tz_offset_minutes));

    let mut store = state.store.lock().await;
    match service::list_sessions(
        &mut *store,
        state.codec.as_ref(),
        &owner,
        OffsetDateTime::now_utc(),
    ) {
        Ok(sessions) => ok(group_by_day(sessions, tz_offset)),
        Err(err) => error_response(err),
    }
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = state.store.lock().await;
    match service::get_session(
        &mut *store,
        state.codec.as_ref(),
        &owner,
        &id,
        OffsetDateTime::now_utc(),
    ) {
        Ok(view) => ok(view),
        Err(err) => error_response(err),
    }
}

async fn post_session_end(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = state.store.lock().await;
    match service::end_session(&mut *store, &owner, &id, OffsetDateTime::now_utc()) {
        Ok(()) => ok(SessionRef { session_id: id }),
        Err(err) => error_response(err),
    }
}

async fn post_session_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let req = match parse_task_request(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = state.store.lock().await;
    match service::start_task(
        &mut *store,
        state.codec.as_ref(),
        &owner,
        &id,
        &req.content,
        OffsetDateTime::now_utc(),
    ) {
        Ok(task_id) => ok(TaskStarted {
            session_id: id,
            task_id,
        }),
        Err(err) => error_response(err),
    }
}

async fn post_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let req = match parse_task_request(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut store = state.store.lock().await;
    match service::track_task(
        &mut *store,
        state.codec.as_ref(),
        &owner,
        &req.content,
        OffsetDateTime::now_utc(),
    ) {
        Ok((session_id, task_id)) => ok(TaskStarted {
            session_id,
            task_id,
        }),
        Err(err) => error_response(err),
    }
}

async fn get_session_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<TzQuery>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let tz_offset = tz_offset_from_minutes(normalize_tz_offset_minutes(q.tz_offset_minutes));

    // The store lock is released before the summarizer round trip.
    let tasks = {
        let mut store = state.store.lock().await;
        match service::load_session(&mut *store, state.codec.as_ref(), &owner, &id) {
            Ok(session) => session.tasks,
            Err(err) => return error_response(err),
        }
    };

    match generate_review(state.summarizer.as_ref(), &tasks, tz_offset).await {
        Ok(summary) => {
            info!(session_id = %id, tasks = tasks.len(), "review served");
            ok(Review {
                session_id: id,
                summary,
            })
        }
        Err(err) => error_response(err),
    }
}

async fn get_export_markdown(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<TzQuery>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let tz_offset = tz_offset_from_minutes(normalize_tz_offset_minutes(q.tz_offset_minutes));

    let session = {
        let mut store = state.store.lock().await;
        match service::load_session(&mut *store, state.codec.as_ref(), &owner, &id) {
            Ok(v) => v,
            Err(err) => return error_response(err),
        }
    };

    let md = export_markdown(&session, tz_offset, OffsetDateTime::now_utc());
    (
        StatusCode::OK,
        [("content-type", "text/markdown; charset=utf-8")],
        md,
    )
        .into_response()
}

async fn get_export_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let owner = match owner_id(&headers) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let session = {
        let mut store = state.store.lock().await;
        match service::load_session(&mut *store, state.codec.as_ref(), &owner, &id) {
            Ok(v) => v,
            Err(err) => return error_response(err),
        }
    };

    let csv = export_csv(&session);
    (
        StatusCode::OK,
        [("content-type", "text/csv; charset=utf-8")],
        csv,
    )
        .into_response()
}
