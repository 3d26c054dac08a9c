use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket},
        ConnectInfo, Path, Query, Request, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use clap::Parser;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use hos_agents::{
    AgentCoordinator, AgentProvider, CoordinatorConfig, CoordinatorError, SimulatedProvider,
};
use hos_core::patient::{Patient, PatientDraft, PatientUpdate};
use hos_core::telemetry::ClientErrorReport;
use hos_core::wire::{TerminalFrame, TerminalFrameKind};
use hos_core::{agent_catalog, JobStatus};
use hos_storage::HealthStore;
use hos_terminal::{TerminalError, TerminalRegistry, TerminalSession};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{self, Write},
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};
use uuid::Uuid;

const SERVER_VERSION: &str = "1.0.0";
const RATE_LIMIT_MAX_REQUESTS: u32 = 100;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const CLIENT_ERROR_RETENTION_HOURS: i64 = 24;
const BACKLOG_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const SOCKET_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    data_dir: String,
    log_dir: String,
    debug: bool,
    transcription_enabled: bool,
    analysis_enabled: bool,
}

#[derive(Parser, Debug)]
#[command(name = "hos-server")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    data_dir: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

struct AppState {
    config: Config,
    store: Arc<HealthStore>,
    coordinator: Arc<AgentCoordinator>,
    terminals: Arc<TerminalRegistry>,
    rate_limiter: RateLimiter,
}

// Fixed-window counter per remote IP. Windows older than the limit are
// pruned on every check, so the map stays bounded by active clients.
struct RateLimiter {
    max_requests: u32,
    window: Duration,
    counters: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.retain(|_, (window_start, _)| now.duration_since(*window_start) < self.window);
        let (_, count) = counters.entry(ip).or_insert((now, 0));
        *count += 1;
        *count <= self.max_requests
    }
}

#[derive(Clone)]
struct UserId(String);

fn json_ok(data: Value) -> Response {
    Json(json!({"success": true, "data": data})).into_response()
}

fn json_created(data: Value) -> Response {
    (
        StatusCode::CREATED,
        Json(json!({"success": true, "data": data})),
    )
        .into_response()
}

fn json_success() -> Response {
    Json(json!({"success": true})).into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"success": false, "error": message}))).into_response()
}

fn coordinator_error(err: CoordinatorError) -> Response {
    match &err {
        CoordinatorError::InvalidKind(_) => {
            json_error(StatusCode::BAD_REQUEST, &err.to_string())
        }
        CoordinatorError::NotFound => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        CoordinatorError::Saturated { .. } => {
            json_error(StatusCode::TOO_MANY_REQUESTS, &err.to_string())
        }
        CoordinatorError::Storage(_) => {
            error!(event = "storage_error", error = %err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn terminal_error(err: TerminalError) -> Response {
    error!(event = "terminal_storage_error", error = %err);
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

// Routes only. The rate-limit and CORS layers are stacked on top in
// service(); tests drive this router directly.
fn app(state: Arc<AppState>) -> Router {
    let agents = Router::new()
        .route("/types", get(agents_types))
        .route("/jobs", get(jobs_index).post(jobs_submit))
        .route("/jobs/:id", get(jobs_show))
        .route("/stats", get(jobs_stats));

    let terminal = Router::new()
        .route("/:id/execute", post(terminal_execute))
        .route("/:id/history", get(terminal_history))
        .route("/:id/clear", post(terminal_clear))
        .route("/:id/ws", get(terminal_ws));

    let patients = Router::new()
        .route("/", get(patients_index).post(patients_create))
        .route(
            "/:id",
            get(patients_show)
                .put(patients_update)
                .delete(patients_delete),
        )
        .route("/search/:term", get(patients_search))
        .layer(middleware::from_fn(phi_access_log))
        .layer(middleware::from_fn(require_bearer));

    let api = Router::new()
        .route("/health", get(health))
        .route("/client-errors", post(client_errors))
        .nest("/agents", agents)
        .nest("/terminal", terminal)
        .nest("/patients", patients);

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .with_state(state)
}

fn service(state: Arc<AppState>) -> Router {
    app(state.clone())
        .layer(middleware::from_fn_with_state(state, rate_limit))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
}

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !state.rate_limiter.check(remote.ip()) {
        warn!(event = "rate_limited", remote = %remote.ip());
        return json_error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
    }
    next.run(request).await
}

async fn require_bearer(mut request: Request, next: Next) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let Some(token) = header_value.and_then(|value| value.strip_prefix("Bearer ")) else {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "Unauthorized - Missing or invalid token",
        );
    };
    if token.is_empty() || token == "undefined" || token == "null" {
        return json_error(StatusCode::UNAUTHORIZED, "Unauthorized - Invalid token");
    }

    let prefix: String = token.chars().take(8).collect();
    request.extensions_mut().insert(UserId(format!("user-{prefix}")));
    next.run(request).await
}

// Access log for routes that touch patient records.
async fn phi_access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user = request
        .extensions()
        .get::<UserId>()
        .map(|user| user.0.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        event = "phi_access",
        method = %method,
        path = %path,
        user = %user,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64
    );
    response
}

async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "Not Found")
}

async fn health() -> Response {
    json_ok(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": SERVER_VERSION,
    }))
}

async fn client_errors(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ClientErrorReport>, JsonRejection>,
) -> Response {
    let Ok(Json(report)) = payload else {
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process");
    };

    error!(
        event = "client_error",
        message = %report.message,
        url = %report.url,
        stack = report.stack.as_deref().unwrap_or("")
    );

    match state
        .store
        .insert_client_error(&report, chrono::Duration::hours(CLIENT_ERROR_RETENTION_HOURS))
    {
        Ok(_) => json_success(),
        Err(err) => {
            error!(event = "client_error_store_failed", error = %err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process")
        }
    }
}

async fn agents_types(State(state): State<Arc<AppState>>) -> Response {
    let catalog = agent_catalog(
        state.config.transcription_enabled,
        state.config.analysis_enabled,
    );
    json_ok(json!(catalog))
}

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

async fn jobs_submit(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(value) => value,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, &err.body_text()),
    };

    match state
        .coordinator
        .clone()
        .submit(&request.kind, request.data)
        .await
    {
        Ok(job) => json_created(json!(job)),
        Err(err) => coordinator_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct JobsQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

// Plain GET lists jobs; the same path with an Upgrade header joins the
// live channel instead.
async fn jobs_index(
    State(state): State<Arc<AppState>>,
    query: Result<Query<JobsQuery>, QueryRejection>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if let Some(ws) = ws {
        let coordinator = state.coordinator.clone();
        return ws.on_upgrade(move |socket| job_feed_socket(socket, coordinator));
    }

    let Query(query) = match query {
        Ok(value) => value,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, &err.body_text()),
    };
    let status = match query.status.as_deref() {
        Some(raw) => match JobStatus::from_str(raw) {
            Ok(status) => Some(status),
            Err(err) => return json_error(StatusCode::BAD_REQUEST, &err),
        },
        None => None,
    };

    let page = state.coordinator.list(status, query.limit).await;
    Json(json!({"success": true, "data": page.jobs, "total": page.total})).into_response()
}

async fn jobs_show(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Response {
    let Ok(job_id) = Uuid::parse_str(&job_id) else {
        return json_error(StatusCode::NOT_FOUND, "Job not found");
    };
    match state.coordinator.get(job_id).await {
        Ok(job) => json_ok(json!(job)),
        Err(err) => coordinator_error(err),
    }
}

async fn jobs_stats(State(state): State<Arc<AppState>>) -> Response {
    json_ok(json!(state.coordinator.stats().await))
}

// Socket writes carry a deadline; a peer that stops reading loses the
// connection instead of pinning the socket task.
async fn bounded_send(sink: &mut SplitSink<WebSocket, Message>, raw: String) -> bool {
    let send = sink.send(Message::Text(raw));
    matches!(tokio::time::timeout(SOCKET_WRITE_TIMEOUT, send).await, Ok(Ok(())))
}

async fn job_feed_socket(socket: WebSocket, coordinator: Arc<AgentCoordinator>) {
    let (subscriber_id, mut updates) = coordinator.subscribe().await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(raw) = update else { break };
                if !bounded_send(&mut ws_sender, raw).await {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    // The feed is one-way; client frames are ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    coordinator.unsubscribe(subscriber_id).await;
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    command: String,
}

async fn terminal_execute(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(value) => value,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, &err.body_text()),
    };
    let session = match state.terminals.session(&session_id).await {
        Ok(session) => session,
        Err(err) => return terminal_error(err),
    };
    match session.execute(&request.command).await {
        Ok(output) => json_ok(json!(output)),
        Err(err) => terminal_error(err),
    }
}

async fn terminal_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.terminals.session(&session_id).await {
        Ok(session) => json_ok(json!(session.history().await)),
        Err(err) => terminal_error(err),
    }
}

async fn terminal_clear(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    let session = match state.terminals.session(&session_id).await {
        Ok(session) => session,
        Err(err) => return terminal_error(err),
    };
    match session.clear().await {
        Ok(()) => json_success(),
        Err(err) => terminal_error(err),
    }
}

async fn terminal_ws(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match state.terminals.session(&session_id).await {
        Ok(session) => session,
        Err(err) => return terminal_error(err),
    };
    ws.on_upgrade(move |socket| terminal_socket(socket, session))
}

async fn terminal_socket(socket: WebSocket, session: Arc<TerminalSession>) {
    let (observer_id, mut updates) = session.observe().await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(raw) = update else { break };
                if !bounded_send(&mut ws_sender, raw).await {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                let message = match incoming {
                    Some(Ok(value)) => value,
                    Some(Err(_)) | None => break,
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Some(reply) = terminal_reply(&session, &text).await else {
                    continue;
                };
                match serde_json::to_string(&reply) {
                    Ok(raw) => {
                        if !bounded_send(&mut ws_sender, raw).await {
                            break;
                        }
                    }
                    Err(err) => error!(event = "encode_error", error = %err),
                }
            }
        }
    }

    session.remove_observer(observer_id).await;
}

// Command frames are executed and answered with the dispatch output;
// anything unparseable gets an error frame back.
async fn terminal_reply(session: &TerminalSession, text: &str) -> Option<TerminalFrame> {
    let frame = match TerminalFrame::parse(text) {
        Ok(frame) => frame,
        Err(err) => return Some(TerminalFrame::error(format!("Error: {err}"))),
    };
    if frame.kind != TerminalFrameKind::Command {
        return None;
    }
    match session.execute(&frame.data).await {
        Ok(output) => Some(TerminalFrame::output(output)),
        Err(err) => Some(TerminalFrame::error(format!("Error: {err}"))),
    }
}

#[derive(Debug, Deserialize)]
struct PatientsQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

async fn patients_index(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PatientsQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(value) => value,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, &err.body_text()),
    };
    let limit = query.limit.unwrap_or(10);
    let offset = query.offset.unwrap_or(0);

    let listed = match state.store.patients(limit, offset) {
        Ok(patients) => patients,
        Err(err) => {
            error!(event = "patients_list_failed", error = %err);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list patients");
        }
    };
    let total = match state.store.patient_count() {
        Ok(count) => count,
        Err(err) => {
            error!(event = "patients_list_failed", error = %err);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list patients");
        }
    };

    Json(json!({"success": true, "data": listed, "total": total})).into_response()
}

async fn patients_show(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> Response {
    match state.store.patient(&patient_id) {
        Ok(Some(patient)) => json_ok(json!(patient)),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Patient not found"),
        Err(err) => {
            error!(event = "patient_get_failed", error = %err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get patient")
        }
    }
}

async fn patients_create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PatientDraft>, JsonRejection>,
) -> Response {
    let Json(draft) = match payload {
        Ok(value) => value,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, &err.body_text()),
    };

    let patient = Patient::create(draft);
    match state.store.upsert_patient(&patient) {
        Ok(()) => {
            info!(event = "patient_created", patient_id = %patient.id);
            json_created(json!(patient))
        }
        Err(err) => {
            error!(event = "patient_create_failed", error = %err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create patient")
        }
    }
}

async fn patients_update(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
    payload: Result<Json<PatientUpdate>, JsonRejection>,
) -> Response {
    let Json(update) = match payload {
        Ok(value) => value,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, &err.body_text()),
    };

    let mut patient = match state.store.patient(&patient_id) {
        Ok(Some(patient)) => patient,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Patient not found"),
        Err(err) => {
            error!(event = "patient_update_failed", error = %err);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update patient");
        }
    };

    patient.apply(update);
    match state.store.upsert_patient(&patient) {
        Ok(()) => {
            info!(event = "patient_updated", patient_id = %patient.id);
            json_ok(json!(patient))
        }
        Err(err) => {
            error!(event = "patient_update_failed", error = %err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update patient")
        }
    }
}

// Deletion is idempotent: removing an absent record still succeeds.
async fn patients_delete(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> Response {
    match state.store.delete_patient(&patient_id) {
        Ok(removed) => {
            if removed {
                info!(event = "patient_deleted", patient_id = %patient_id);
            }
            json_success()
        }
        Err(err) => {
            error!(event = "patient_delete_failed", error = %err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete patient")
        }
    }
}

async fn patients_search(
    State(state): State<Arc<AppState>>,
    Path(term): Path<String>,
) -> Response {
    match state.store.search_patients(&term) {
        Ok(results) => {
            Json(json!({"success": true, "data": results, "query": term.to_lowercase()}))
                .into_response()
        }
        Err(err) => {
            error!(event = "patient_search_failed", error = %err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Search failed")
        }
    }
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);

    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    if let Err(err) = std::fs::create_dir_all(&config.data_dir) {
        error!(event = "data_dir_error", error = %err, dir = %config.data_dir);
        return;
    }
    let db_path = PathBuf::from(&config.data_dir).join("healthos.db");
    let store = match HealthStore::open(&db_path) {
        Ok(value) => Arc::new(value),
        Err(err) => {
            error!(event = "store_error", error = %err, path = %db_path.display());
            return;
        }
    };

    let provider: Arc<dyn AgentProvider> = Arc::new(SimulatedProvider::default());
    let coordinator = match AgentCoordinator::new(store.clone(), provider, CoordinatorConfig::default())
    {
        Ok(value) => Arc::new(value),
        Err(err) => {
            error!(event = "coordinator_error", error = %err);
            return;
        }
    };
    let terminals = Arc::new(TerminalRegistry::new(store.clone()));

    coordinator.clone().start_retention_sweep();
    terminals.clone().start_backlog_sweep(BACKLOG_SWEEP_INTERVAL);

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        coordinator,
        terminals,
        rate_limiter: RateLimiter::new(RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW),
    });
    let app = service(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "server_error", error = %err);
            return;
        }
    };

    info!(
        event = "server_start",
        addr = %config.addr,
        data_dir = %config.data_dir,
        transcription_enabled = config.transcription_enabled,
        analysis_enabled = config.analysis_enabled
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "server_error", error = %err);
    }
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve_addr(&args.addr),
        data_dir: resolve_data_dir(&args.data_dir),
        log_dir: resolve_log_dir(&args.log_dir),
        debug: args.debug || env_true("HOS_DEBUG"),
        transcription_enabled: env_present("HOS_SPEECH_API_KEY"),
        analysis_enabled: env_present("HOS_LANGUAGE_API_KEY"),
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("HOS_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = dir.join("hos-server.log");
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn env_present(key: &str) -> bool {
    std::env::var(key).map_or(false, |value| !value.trim().is_empty())
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    if let Ok(value) = std::env::var("HOS_ADDR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    "127.0.0.1:8787".to_string()
}

fn resolve_data_dir(data_dir_flag: &str) -> String {
    if !data_dir_flag.trim().is_empty() {
        return data_dir_flag.to_string();
    }
    if let Ok(value) = std::env::var("HOS_DATA_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    ".healthos".to_string()
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    if !log_dir_flag.trim().is_empty() {
        return log_dir_flag.to_string();
    }
    if let Ok(value) = std::env::var("HOS_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    ".healthos/logs".to_string()
}
