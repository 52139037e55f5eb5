//!
//! encore HTTP server
//! ------------------
//! Axum router and handlers for the admin backup service.
//!
//! Responsibilities:
//! - Login/logout issuing a session cookie (also accepted as a bearer token).
//! - `/admin/import` (dry run or destructive restore under the import lock).
//! - `/admin/export`, `/admin/stats` and `/admin/import/lock` for operators.
//! - Startup: store selection, bootstrap admin, graceful shutdown.
//!
//! Store work is synchronous and can run for minutes during an import, so
//! every handler that touches the store hands it to `spawn_blocking`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::signal;
use tracing::{error, info, warn};

use crate::backup::export::EXPORT_FILENAME;
use crate::backup::{export_backup, BackupExport, Collection, ImportCoordinator, ImportError, ImportOptions, ImportOutcome, Requestor};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{Config, StoreKind};
use crate::error::{AppError, AppResult};
use crate::identity::{require_admin, session_token, AuthProvider, LoginRequest, Principal, SessionManager, StoreAuthProvider};
use crate::storage::{count_all, scan_all, FileStore, MemoryStore, SharedStore};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub clock: SharedClock,
    pub coordinator: ImportCoordinator,
    pub auth: StoreAuthProvider,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SharedStore, clock: SharedClock, config: Config) -> Self {
        let coordinator = ImportCoordinator::new(store.clone(), clock.clone(), ImportOptions { lock_ttl: config.lock_ttl });
        let auth = StoreAuthProvider::new(store.clone(), SessionManager::new(config.session_ttl));
        Self { store, clock, coordinator, auth, config: Arc::new(config) }
    }

    fn admin(&self, headers: &HeaderMap) -> AppResult<Principal> {
        Ok(require_admin(&self.auth, headers, &self.config.session_cookie)?)
    }
}

pub fn router(state: AppState) -> Router {
    // Backups are whole-store dumps; axum's 2 MB default would reject them before validation.
    let import_limit = DefaultBodyLimit::max(state.config.import_max_bytes);
    Router::new()
        .route("/", get(|| async { "encore ok" }))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/admin/import", post(import_handler).layer(import_limit))
        .route("/admin/import/lock", get(lock_status))
        .route("/admin/export", get(export_handler))
        .route("/admin/stats", get(stats_handler))
        .with_state(state)
}

pub fn open_store(config: &Config) -> anyhow::Result<SharedStore> {
    Ok(match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::File => Arc::new(
            FileStore::new(&config.data_root)
                .with_context(|| format!("While opening document store under {}", config.data_root.display()))?,
        ),
    })
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    for w in config.warnings() { warn!(target: "startup", "{}", w); }
    let store = open_store(&config)?;
    let state = AppState::new(store, Arc::new(SystemClock), config.clone());

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        state.auth.ensure_admin(email, password)
            .with_context(|| format!("While ensuring bootstrap admin {}", email))?;
    }

    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("While binding {}", addr))?;
    info!(target: "startup", "encore listening on {}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!(target: "startup", "encore shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await { error!("failed to install Ctrl+C handler: {}", e); }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
        info!("received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run blocking store work off the async executor.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(target: "http", "blocking task failed: {}", e);
        AppError::internal("INTERNAL", "Internal error")
    })?
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

fn session_cookie(name: &str, token: &str, max_age_secs: u64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}", name, token, max_age_secs)).ok()
}

fn cleared_cookie(name: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/", name)).ok()
}

pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> Result<Response, AppError> {
    let auth = state.auth.clone();
    let req = LoginRequest { email: payload.email, password: payload.password };
    let resp = blocking(move || Ok(auth.login(&req)?)).await?;
    let mut headers = HeaderMap::new();
    if let Some(c) = session_cookie(&state.config.session_cookie, &resp.session.token, state.config.session_ttl.as_secs()) {
        headers.insert(header::SET_COOKIE, c);
    }
    let body = json!({
        "status": "ok",
        "token": resp.session.token,
        "user": { "id": resp.principal.id, "email": resp.principal.email, "role": resp.principal.role },
    });
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = session_token(&headers, &state.config.session_cookie) {
        state.auth.logout(&token);
    }
    let mut h = HeaderMap::new();
    if let Some(c) = cleared_cookie(&state.config.session_cookie) { h.insert(header::SET_COOKIE, c); }
    (StatusCode::OK, h, Json(json!({"status": "ok"})))
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    #[serde(rename = "dryRun", default)]
    pub dry_run: Option<String>,
}

impl ImportParams {
    /// Absent means a real import. Anything but `true/false/1/0` is rejected
    /// so a mistyped preview never runs the destructive path.
    pub fn is_dry_run(&self) -> AppResult<bool> {
        match self.dry_run.as_deref().map(str::trim) {
            None => Ok(false),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
            Some(v) => Err(AppError::user("INVALID_QUERY".to_string(), format!("dryRun must be true, false, 1 or 0; got {:?}", v))),
        }
    }
}

pub async fn import_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ImportParams>,
    body: Bytes,
) -> Result<Response, AppError> {
    let admin = state.admin(&headers)?;
    let dry_run = params.is_dry_run()?;
    // Unparseable bodies go through validation as a non-object so they are audited too.
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let requestor = Requestor { id: admin.id.clone(), email: Some(admin.email.clone()) };
    let coordinator = state.coordinator.clone();
    let result = blocking(move || Ok(coordinator.import(&payload, &requestor, dry_run))).await?;

    match result {
        Ok(ImportOutcome::DryRun { import_id, summary }) => {
            Ok((StatusCode::OK, Json(json!({"dryRun": true, "summary": summary, "importId": import_id})))
                .into_response())
        }
        Ok(ImportOutcome::Imported { import_id, imported_at, summary, .. }) => Ok((
            StatusCode::OK,
            Json(json!({"success": true, "importId": import_id, "importedAt": imported_at, "summary": summary})),
        )
            .into_response()),
        Ok(ImportOutcome::LockDenied { import_id, lock, .. }) => Ok((
            StatusCode::CONFLICT,
            Json(json!({"error": "Another import is in progress", "importId": import_id, "lock": lock})),
        )
            .into_response()),
        Err(ImportError::Failed { import_id, .. }) => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "IMPORT_FAIL", "message": "Error importing backup", "importId": import_id})),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn lock_status(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    state.admin(&headers)?;
    let lock = state.coordinator.lock().clone();
    let body = blocking(move || {
        let st = lock.state()?;
        let active = st.is_active(lock.now_ms());
        Ok(json!({"lock": st, "active": active}))
    })
    .await?;
    Ok(Json(body))
}

pub async fn export_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    state.admin(&headers)?;
    let store = state.store.clone();
    let meta = BackupExport { environment: state.config.environment.clone(), exported_at_ms: state.clock.now_ms() };
    let backup = blocking(move || Ok(export_backup(store.as_ref(), &meta)?)).await?;
    let bytes = serde_json::to_vec_pretty(&backup).map_err(|e| AppError::from(anyhow::Error::from(e)))?;
    let mut h = HeaderMap::new();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", EXPORT_FILENAME)) {
        h.insert(header::CONTENT_DISPOSITION, v);
    }
    Ok((StatusCode::OK, h, bytes).into_response())
}

pub async fn stats_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    state.admin(&headers)?;
    let store = state.store.clone();
    let body = blocking(move || {
        let total_songs = count_all(store.as_ref(), Collection::Songs.name())?;
        let total_playlists = count_all(store.as_ref(), Collection::Playlists.name())?;
        let total_plays: i64 = scan_all(store.as_ref(), Collection::Users.name())?
            .iter()
            .map(|(_, d)| d.get("totalPlays").and_then(|v| v.as_i64()).unwrap_or(0))
            .sum();
        Ok(json!({"totalSongs": total_songs, "totalPlaylists": total_playlists, "totalPlays": total_plays}))
    })
    .await?;
    Ok(Json(body))
}
