//! JSON status server.
//!
//! Serves the read-only view of a [`Dashboard`]:
//!
//! - `GET /`: every set and watcher ([`DashboardView`](pharos_types::DashboardView))
//! - `GET /watchers/{id}`: one watcher, immediately
//! - `GET /watchers/{id}?wait=1`: one watcher, after its next update
//! - `GET /health`: liveness probe
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pharos::{Dashboard, StatusServer};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> std::io::Result<()> {
//!     let dashboard = Arc::new(Dashboard::new("Pharos", Vec::new()));
//!     let server = StatusServer::bind("127.0.0.1:8888".parse().unwrap(), dashboard).await?;
//!     server.run().await
//! }
//! ```

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use pharos_types::WatcherView;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::watcher::{Dashboard, Watcher};

/// Longest a `?wait=1` request is held before answering with the current view.
pub const DEFAULT_LONG_POLL_LIMIT: Duration = Duration::from_secs(60);

const WATCHERS_PREFIX: &str = "/watchers/";

/// HTTP server exposing watcher state as JSON.
#[derive(Debug)]
pub struct StatusServer {
    listener: TcpListener,
    dashboard: Arc<Dashboard>,
    long_poll_limit: Duration,
}

impl StatusServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, dashboard: Arc<Dashboard>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dashboard,
            long_poll_limit: DEFAULT_LONG_POLL_LIMIT,
        })
    }

    /// Cap how long a long-poll request may wait for an update.
    pub fn long_poll_limit(mut self, limit: Duration) -> Self {
        self.long_poll_limit = limit;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve in a background task until the task is aborted.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.run().await {
                error!(error = %err, "status server stopped");
            }
        })
    }

    /// Accept connections until accepting fails.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "status server listening");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let io = TokioIo::new(stream);
            let dashboard = self.dashboard.clone();
            let limit = self.long_poll_limit;

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let dashboard = dashboard.clone();
                    async move { handle_request(req, &dashboard, limit).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(%peer, error = %err, "connection closed with error");
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    dashboard: &Dashboard,
    limit: Duration,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(respond(dashboard, req.method(), req.uri(), limit).await)
}

#[derive(Debug, PartialEq)]
enum Route<'a> {
    Dashboard,
    Watcher { id: &'a str, wait: bool },
    Health,
    NotFound,
}

fn route<'a>(path: &'a str, query: Option<&str>) -> Route<'a> {
    match path {
        "/" => Route::Dashboard,
        "/health" | "/healthz" => Route::Health,
        _ => match path.strip_prefix(WATCHERS_PREFIX) {
            Some(id) if !id.is_empty() && !id.contains('/') => Route::Watcher {
                id,
                wait: wants_wait(query),
            },
            _ => Route::NotFound,
        },
    }
}

/// `wait=1` or `wait=true` anywhere in the query string.
fn wants_wait(query: Option<&str>) -> bool {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .any(|pair| matches!(pair, "wait=1" | "wait=true"))
}

async fn respond(
    dashboard: &Dashboard,
    method: &Method,
    uri: &Uri,
    limit: Duration,
) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    match route(uri.path(), uri.query()) {
        Route::Dashboard => json(&dashboard.view()),
        Route::Health => text(StatusCode::OK, "OK"),
        Route::Watcher { id, wait } => match dashboard.find(id) {
            Some(watcher) if wait => json(&long_poll(watcher, limit).await),
            Some(watcher) => json(&watcher.view()),
            None => text(StatusCode::NOT_FOUND, "Not Found"),
        },
        Route::NotFound => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn long_poll(watcher: &Watcher, limit: Duration) -> WatcherView {
    match tokio::time::timeout(limit, watcher.wait_for_update()).await {
        Ok(Some(view)) => view,
        _ => {
            debug!(watcher = %watcher.id(), "long-poll expired without an update");
            watcher.view()
        }
    }
}

fn json<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => with_body(StatusCode::OK, "application/json", Bytes::from(body)),
        Err(err) => {
            warn!(error = %err, "failed to serialize response");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    with_body(status, "text/plain", Bytes::from_static(body.as_bytes()))
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
