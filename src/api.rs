use std::{any::Any, sync::Arc};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
};

use crate::{
    command::{dns_command, nmap_command, vuln_command, ScanConfig},
    config::{ServiceCfg, ToolsCfg},
    error::{validate_ports, validate_targets, validate_timing, ValidationError},
    hub::ObserverHub,
    registry::{RunRecord, RunRegistry, RunStats},
    runner::{JobRunner, RunSpec},
};

const API_TITLE: &str = "SEC-TESTER API";
const RECON: &str = "Network Reconnaissance";
const VULN: &str = "Vulnerability Assessment";

#[derive(Clone)]
pub struct AppState {
    runner: JobRunner,
    tools: Arc<ToolsCfg>,
}

impl AppState {
    pub fn new(runner: JobRunner, tools: ToolsCfg) -> Self {
        Self { runner, tools: Arc::new(tools) }
    }
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(cors::Any);

    Router::new()
        .route("/", get(root))
        .route("/api/tests", get(list_tests))
        .route("/api/tests/{id}", get(get_test))
        .route("/api/tests/nmap", post(run_nmap))
        .route("/api/tests/vulnerability-scan", post(run_vuln_scan))
        .route("/api/tests/dns-test", post(run_dns_test))
        .route("/api/network-recon", post(network_recon))
        .route("/api/vuln-assessment", post(vuln_assessment))
        .route("/api/stats", get(stats))
        .route("/ws", get(live_feed))
        .layer(cors)
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!("handler panicked: {detail}");
    ApiErr::internal("Internal server error").into_response()
}

pub async fn serve(cfg: ServiceCfg) -> Result<()> {
    let registry = Arc::new(RunRegistry::new());
    let hub = Arc::new(ObserverHub::new(cfg.event_capacity));
    let runner = JobRunner::new(registry, hub);
    let app = router(AppState::new(runner.clone(), cfg.tools.clone()), &cfg.cors_origins);

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind))?;
    tracing::info!("{API_TITLE} listening on http://{}", cfg.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(in_flight = runner.in_flight(), "server stopped, draining runs");
    runner.shutdown(cfg.shutdown_grace()).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

#[derive(Serialize)]
struct RootResp {
    message: &'static str,
    status: &'static str,
    version: &'static str,
}

async fn root() -> Json<RootResp> {
    Json(RootResp { message: API_TITLE, status: "online", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
struct TestsResp { tests: Vec<RunRecord> }

async fn list_tests(State(st): State<AppState>) -> Json<TestsResp> {
    Json(TestsResp { tests: st.runner.registry().list() })
}

async fn get_test(State(st): State<AppState>, Path(id): Path<String>) -> Result<Json<RunRecord>, ApiErr> {
    st.runner
        .registry()
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiErr::not_found(format!("Test not found: {id}")))
}

async fn stats(State(st): State<AppState>) -> Json<RunStats> {
    Json(st.runner.registry().stats())
}

#[derive(Debug, Serialize)]
struct StartRunResp {
    run_id: String,
    command: String,
    status: &'static str,
}

impl From<RunRecord> for StartRunResp {
    fn from(rec: RunRecord) -> Self {
        Self { run_id: rec.id, command: rec.command, status: "started" }
    }
}

async fn run_nmap(State(st): State<AppState>, Json(cfg): Json<ScanConfig>) -> Result<Json<StartRunResp>, ApiErr> {
    validate_targets(&cfg.targets)?;
    validate_ports(&cfg.port_range)?;
    validate_timing(&cfg.timing)?;

    let command = nmap_command(&st.tools.nmap, &cfg);
    let name = format!("Nmap Scan ({})", cfg.targets.join(", "));
    let rec = st.runner.start(RunSpec::new("nmap", name, RECON, command));
    Ok(Json(rec.into()))
}

#[derive(Deserialize)]
struct VulnScanParams {
    #[serde(default = "default_target")]
    target_ip: String,
    #[serde(default = "default_vuln_port")]
    port: String,
}

async fn run_vuln_scan(State(st): State<AppState>, Query(p): Query<VulnScanParams>) -> Result<Json<StartRunResp>, ApiErr> {
    validate_targets(&[&p.target_ip])?;
    validate_ports(&p.port)?;

    let command = vuln_command(&st.tools.nmap, &p.port, &[&p.target_ip]);
    let name = format!("Vulnerability Scan (Port {})", p.port);
    let rec = st.runner.start(RunSpec::new("vuln", name, VULN, command));
    Ok(Json(rec.into()))
}

#[derive(Deserialize)]
struct DnsTestParams {
    #[serde(default = "default_target")]
    target_ip: String,
    #[serde(default = "default_domain")]
    domain: String,
}

async fn run_dns_test(State(st): State<AppState>, Query(p): Query<DnsTestParams>) -> Result<Json<StartRunResp>, ApiErr> {
    validate_targets(&[&p.target_ip, &p.domain])?;

    let command = dns_command(&st.tools.dig, &p.target_ip, &p.domain);
    let name = format!("DNS Test ({})", p.domain);
    let rec = st.runner.start(RunSpec::new("dns", name, RECON, command));
    Ok(Json(rec.into()))
}

fn default_target() -> String { "192.168.122.1".into() }
fn default_vuln_port() -> String { "53".into() }
fn default_domain() -> String { "google.com".into() }
fn default_recon_type() -> String { "basic".into() }
fn default_assessment_type() -> String { "cve-scan".into() }

#[derive(Deserialize)]
struct ReconReq {
    targets: Vec<String>,
    #[serde(default = "default_recon_type")]
    scan_type: String,
}

#[derive(Deserialize)]
struct AssessmentReq {
    targets: Vec<String>,
    #[serde(default = "default_assessment_type")]
    scan_type: String,
}

#[derive(Debug, Serialize)]
struct InitiatedResp {
    status: &'static str,
    targets: Vec<String>,
    scan_type: String,
    run_id: String,
}

async fn network_recon(State(st): State<AppState>, Json(req): Json<ReconReq>) -> Result<Json<InitiatedResp>, ApiErr> {
    validate_targets(&req.targets)?;

    // "basic" is the stock profile; anything else is taken as an nmap scan variant.
    let cfg = match req.scan_type.as_str() {
        "basic" => ScanConfig { targets: req.targets.clone(), ..ScanConfig::default() },
        other => ScanConfig { targets: req.targets.clone(), scan_type: other.to_string(), ..ScanConfig::default() },
    };
    let command = nmap_command(&st.tools.nmap, &cfg);
    let name = format!("Network Recon ({})", req.targets.join(", "));
    let rec = st.runner.start(RunSpec::new("recon", name, RECON, command));

    Ok(Json(InitiatedResp { status: "initiated", targets: req.targets, scan_type: req.scan_type, run_id: rec.id }))
}

async fn vuln_assessment(State(st): State<AppState>, Json(req): Json<AssessmentReq>) -> Result<Json<InitiatedResp>, ApiErr> {
    validate_targets(&req.targets)?;

    let ports = ScanConfig::default().port_range;
    let command = vuln_command(&st.tools.nmap, &ports, &req.targets);
    let name = format!("Vulnerability Assessment ({})", req.targets.join(", "));
    let rec = st.runner.start(RunSpec::new("assess", name, VULN, command));

    Ok(Json(InitiatedResp { status: "initiated", targets: req.targets, scan_type: req.scan_type, run_id: rec.id }))
}

async fn live_feed(ws: WebSocketUpgrade, State(st): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

async fn handle_socket(socket: WebSocket, st: AppState) {
    let hub = st.runner.hub().clone();
    let mut observer = hub.connect();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            evt = observer.recv() => match evt {
                Ok(Some(evt)) => {
                    let json = match serde_json::to_string(&evt) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!("failed to encode event: {e}");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(observer = %observer.id(), "dropping live feed: {e}");
                    break;
                }
            },
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    tracing::info!(observer = %observer.id(), "received websocket message: {}", text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(observer = %observer.id(), "websocket error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = ws_sender.close().await;
    hub.disconnect(observer);
}

#[derive(Debug)]
struct ApiErr {
    status: StatusCode,
    code: String,
    message: String,
    suggestion: Option<String>,
}

impl ApiErr {
    fn bad_request(message: impl Into<String>, suggestion: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: message.into(),
            suggestion,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error".to_string(),
            message: message.into(),
            suggestion: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found".to_string(),
            message: message.into(),
            suggestion: None,
        }
    }
}

impl From<ValidationError> for ApiErr {
    fn from(e: ValidationError) -> Self {
        let suggestion = match &e {
            ValidationError::NoTargets => Some("Provide at least one IP address, range or hostname.".to_string()),
            ValidationError::InvalidTarget(_) => Some("Targets must not be blank or start with '-'.".to_string()),
            ValidationError::InvalidPorts(_) => Some("Use nmap port syntax such as 22,80 or 1-1000.".to_string()),
            ValidationError::InvalidTiming(_) => Some("Use one of the timing templates T0 through T5.".to_string()),
        };
        Self::bad_request(e.to_string(), suggestion)
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            suggestion: Option<String>,
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code,
                suggestion: self.suggestion,
            }),
        )
            .into_response()
    }
}
