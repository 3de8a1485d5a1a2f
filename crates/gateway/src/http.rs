use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use arkiv_auth::{Principal, TokenVerifier};
use arkiv_contracts::CaseRecord;
use arkiv_ledger::ViewStore;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::config::{GatewayConfig, StartupError};
use crate::dedup::DedupCache;
use crate::recorder::{RequestMeta, ViewRecorder, spawn_view_writer};

mod analytics;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    verifier: TokenVerifier,
    store: ViewStore,
    recorder: ViewRecorder,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let verifier = TokenVerifier::new(&config.auth_secret).map_err(|err| StartupError {
        code: err.code,
        message: err.message,
    })?;

    let store = ViewStore::connect_and_migrate(
        &config.db_url,
        Duration::from_millis(config.view_write_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize view store: {}", err),
    })?;

    let dedup = DedupCache::new(
        Duration::from_secs(config.dedup_window_secs),
        Duration::from_secs(config.dedup_sweep_secs),
    );
    dedup.start();

    let (recorder, rx) = ViewRecorder::new(dedup);
    spawn_view_writer(rx, store.clone(), |err| {
        tracing::warn!(error = %err, "view event persistence failed");
        crate::metrics::inc_view_persist_failure();
    });

    let state = AppState {
        config,
        verifier,
        store,
        recorder,
    };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/cases", get(list_cases))
        .route("/v1/cases/{case_id}", get(get_case))
        .route("/v1/analytics/overview", get(analytics::overview))
        .route("/v1/analytics/popular", get(analytics::popular))
        .route("/v1/analytics/by-date", get(analytics::by_date))
        .with_state(state))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("store", state.store.ping().await.is_ok());

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_auth
        && let Err(err) = require_moderator(&state, &headers)
    {
        return err.into_response();
    }

    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Public list of published cases. Fetching it counts as a path-level view.
async fn list_cases(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Vec<CaseRecord>>, ApiError> {
    let classification = state.verifier.classify(&headers);
    state
        .recorder
        .record_if_new(&classification, request_meta(&headers, &uri, remote_addr, None));

    let result = state
        .store
        .published_cases(state.config.case_list_limit as i64)
        .await
        .map(Json)
        .map_err(store_error);
    observed("/v1/cases", result)
}

/// Public single-case fetch; the id parameter makes this an entity view.
/// Tracking happens regardless of whether the lookup finds anything — a
/// malformed or unknown id still serves its 404 untouched.
async fn get_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<CaseRecord>, ApiError> {
    let classification = state.verifier.classify(&headers);
    state.recorder.record_if_new(
        &classification,
        request_meta(&headers, &uri, remote_addr, Some(case_id.clone())),
    );

    let result = match state.store.published_case(&case_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(json_error(
            StatusCode::NOT_FOUND,
            "ERR_NOT_FOUND",
            "no published case with this id",
        )),
        Err(err) => Err(store_error(err)),
    };
    observed("/v1/cases/{case_id}", result)
}

fn request_meta(
    headers: &HeaderMap,
    uri: &Uri,
    remote_addr: SocketAddr,
    raw_target_id: Option<String>,
) -> RequestMeta {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    RequestMeta {
        path,
        raw_target_id,
        forwarded_for: header_str(headers, "x-forwarded-for"),
        remote_addr: Some(remote_addr.ip().to_string()),
        user_agent: header_str(headers, "user-agent"),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

fn require_moderator(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let principal = state
        .verifier
        .authenticate(headers)
        .map_err(|err| json_error(StatusCode::UNAUTHORIZED, err.code, err.message))?;

    if !principal.role.is_privileged() {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "ERR_FORBIDDEN",
            "moderator or admin role required",
        ));
    }

    Ok(principal)
}

fn store_error(err: arkiv_ledger::LedgerError) -> ApiError {
    tracing::error!(error = %err, "view store query failed");
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "ERR_STORE_UNAVAILABLE",
        "view store unavailable",
    )
}

/// Counts the request in the http metrics and passes the result through.
fn observed<T>(route: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route, "GET", status.as_u16());
    result
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
        }),
    )
}
