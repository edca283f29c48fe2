//! HTTP serving layer.

use crate::config::Config;
use crate::state::{start_cleanup_task, LiveState, RequestKind};
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, Method},
    middleware::{self, Next},
    response::Response,
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use liverelay_media::{FragmentBuffer, PlaylistOptions};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceExt;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

mod conn;
pub mod control;
pub mod error;
pub mod routes_control;
pub mod routes_live;
pub mod routes_status;

use conn::WriteTimeout;
pub use control::{ControlError, DeviceCommand, DeviceControl};
pub use error::ApiError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Path to config file (for persistence)
    pub config_path: Option<PathBuf>,
    pub live: Arc<LiveState>,
    pub playlist: Arc<PlaylistOptions>,
    /// Receives `/torch/*`, `/camera/*`, ... commands when configured
    pub device: Option<Arc<dyn DeviceControl>>,
}

impl AppContext {
    pub fn new(config: Config, live: Arc<LiveState>) -> Self {
        let playlist = config.stream.playlist_options();
        Self {
            config: Arc::new(config),
            config_path: None,
            live,
            playlist: Arc::new(playlist),
            device: None,
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn with_device(mut self, device: Arc<dyn DeviceControl>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn buffer(&self) -> &Arc<FragmentBuffer> {
        self.live.buffer()
    }
}

/// Peer address of the current request, when known.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub Option<IpAddr>);

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CACHE_CONTROL,
            header::PRAGMA,
        ])
        .max_age(Duration::from_secs(3600));

    let timeout = Duration::from_secs(ctx.config.server.request_timeout_secs);

    Router::new()
        .merge(routes_live::live_routes())
        .merge(routes_status::status_routes())
        .merge(routes_control::control_routes())
        .layer(middleware::from_fn_with_state(ctx.clone(), track_client))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Record the request against its client and expose the peer address to
/// handlers. `OPTIONS` never gets here; the CORS layer answers it.
async fn track_client(State(ctx): State<AppContext>, mut req: Request, next: Next) -> Response {
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let kind = match *req.method() {
        Method::GET => Some(RequestKind::Get),
        Method::POST => Some(RequestKind::Post),
        _ => None,
    };
    if let (Some(ip), Some(kind)) = (ip, kind) {
        ctx.live.clients().record_request(ip, kind);
    }

    req.extensions_mut().insert(ClientAddr(ip));
    next.run(req).await
}

/// Start the HTTP server
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("Invalid server address")?;

    let cleanup = start_cleanup_task(
        ctx.live.clients().clone(),
        (ctx.config.server.client_expiry_secs / 2).max(1),
    );

    let write_timeout = Duration::from_secs(ctx.config.server.write_timeout_secs);
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    run_accept_loop(listener, app, write_timeout).await;

    cleanup.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Accept connections until a shutdown signal arrives.
async fn run_accept_loop(listener: tokio::net::TcpListener, app: Router, write_timeout: Duration) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(stream, peer, app.clone(), write_timeout));
                    }
                    Err(e) => {
                        tracing::debug!("Accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }
}

/// Serve one TCP connection through hyper, tagging requests with the peer.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    app: Router,
    write_timeout: Duration,
) {
    let _ = stream.set_nodelay(true);
    let io = TokioIo::new(WriteTimeout::new(stream, write_timeout));
    let service = app.map_request(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(peer));
        req
    });

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, TowerToHyperService::new(service))
        .await
    {
        tracing::debug!(%peer, "Connection closed: {}", e);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
