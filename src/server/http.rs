//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Requests are routed by
//! a single `match` on method and path.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{ApiKeyValidator, Authenticator, Caller, JwtValidator};
use crate::config::Args;
use crate::health::{spawn_probe_task, HealthProber, HeartbeatIngestor, LivenessService};
use crate::loader::{HttpCodeSource, ModuleLoader, RetryPolicy};
use crate::realtime::MessageRouter;
use crate::registry::ApplicationRegistry;
use crate::routes::{self, error_response, RouteResult};
use crate::server::websocket;
use crate::types::VestibuleError;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state, built once at startup
pub struct AppState {
    pub args: Args,
    pub registry: Arc<ApplicationRegistry>,
    /// Realtime topics for status events and inter-app messages
    pub router: Arc<MessageRouter>,
    pub heartbeats: Arc<HeartbeatIngestor>,
    pub liveness: Arc<LivenessService>,
    /// Federated module loader over HTTP remote-entry manifests
    pub loader: ModuleLoader<HttpCodeSource>,
    pub retry_policy: RetryPolicy,
    pub auth: Authenticator,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every service around an already-opened registry
    pub fn new(args: Args, registry: Arc<ApplicationRegistry>) -> Result<Self, VestibuleError> {
        let router = Arc::new(MessageRouter::new(args.realtime_queue_depth));
        let prober = Arc::new(HealthProber::new(args.probe_timeout())?);
        let heartbeats = Arc::new(HeartbeatIngestor::new(
            Arc::clone(&registry),
            Arc::clone(&router),
        ));
        let liveness = Arc::new(LivenessService::new(
            Arc::clone(&registry),
            prober,
            Arc::clone(&heartbeats),
            Arc::clone(&router),
            args.broadcast_probe_transitions,
        ));

        let source = HttpCodeSource::new(Duration::from_millis(args.remote_fetch_timeout_ms))?;
        let loader = ModuleLoader::new(source, args.shared_dependency_map());

        let jwt = args
            .jwt_secret()
            .map(|secret| JwtValidator::new(secret, args.jwt_expiry_seconds))
            .transpose()?;
        let auth = Authenticator::new(
            jwt,
            ApiKeyValidator::new(args.admin_api_key.clone()),
            args.dev_mode,
        );

        Ok(Self {
            retry_policy: args.retry_policy(),
            args,
            registry,
            router,
            heartbeats,
            liveness,
            loader,
            auth,
            started_at: Instant::now(),
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), VestibuleError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("Vestibule listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - admin routes open to anonymous callers");
    }

    if let Some(interval) = state.args.probe_interval() {
        spawn_probe_task(Arc::clone(&state.liveness), interval);
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => preflight_response(),

        // Liveness probe - returns 200 if vestibule is running
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => routes::health_check(&state),

        (&Method::GET, "/version") => routes::version_info(),

        (&Method::GET, "/ws") => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                websocket::handle_realtime_upgrade(Arc::clone(&state), req)
            } else {
                error_response(VestibuleError::BadRequest("WebSocket upgrade required".into()))
            }
        }

        (&Method::GET, "/api/liveness") => respond(routes::handle_liveness(&state).await),

        (&Method::GET, "/api/applications") => {
            respond(routes::handle_list_applications(&state, req.uri().query()).await)
        }

        (&Method::POST, "/api/applications") => respond(
            async {
                let caller = identify(&state, &req)?;
                let body = routes::read_body(req).await?;
                routes::handle_register(&state, &caller, &body).await
            }
            .await,
        ),

        (&Method::POST, "/api/modules/cache/clear") => {
            respond(identify(&state, &req).and_then(|caller| routes::handle_clear_cache(&state, &caller)))
        }

        (_, p) if p.starts_with("/api/applications/") => {
            let rest = &p["/api/applications/".len()..];
            respond(
                async {
                    let caller = identify(&state, &req)?;
                    let body = routes::read_body(req).await?;
                    routes::handle_application_item(&state, &method, rest, &caller, &body).await
                }
                .await,
            )
        }

        _ => not_found_response(&path),
    };

    Ok(to_boxed(response))
}

/// Identify the caller from request headers
fn identify(state: &AppState, req: &Request<Incoming>) -> Result<Caller, VestibuleError> {
    state
        .auth
        .identify(header(req, "authorization"), header(req, "x-api-key"))
}

fn header<'a>(req: &'a Request<Incoming>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn respond(result: RouteResult) -> Response<Full<Bytes>> {
    result.unwrap_or_else(error_response)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "not_found",
        "message": format!("no route for {}", path),
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
