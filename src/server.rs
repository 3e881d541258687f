use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{FutureExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::emitter::{Emitter, LineStream};
use crate::error::{RequestError, ServerError};
use crate::handler::{HealthHandler, PromptHandler};
use crate::protocol::PromptRequest;

pub const DEFAULT_PORT: u16 = 4001;
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const DEFAULT_BODY_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long `stop` waits for open streams before abandoning them.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The two routes bound to their handlers. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    prompt: Arc<dyn PromptHandler>,
    health: Option<Arc<dyn HealthHandler>>,
    body_limit: usize,
}

impl Relay {
    pub fn new(prompt: impl PromptHandler) -> Self {
        Self {
            prompt: Arc::new(prompt),
            health: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_health_handler(mut self, health: impl HealthHandler) -> Self {
        self.health = Some(Arc::new(health));
        self
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health).fallback(not_found))
            .route("/prompt", post(prompt).fallback(not_found))
            .fallback(not_found)
            .layer(axum::extract::DefaultBodyLimit::max(self.body_limit))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }
}

async fn health(State(relay): State<Relay>) -> Result<Json<Map<String, Value>>, RequestError> {
    let Some(handler) = relay.health.as_ref() else {
        let mut body = Map::new();
        body.insert("status".to_string(), Value::from("ok"));
        return Ok(Json(body));
    };

    handler.check().await.map(Json).map_err(|err| {
        tracing::warn!(error = %err, "health handler failed");
        RequestError::Health(err.to_string())
    })
}

async fn prompt(
    State(relay): State<Relay>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, RequestError> {
    let body = body.map_err(|rejection| RequestError::Body {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    let request = PromptRequest::from_body(&body).inspect_err(|err| {
        tracing::warn!(error = %err, "rejected prompt request");
    })?;

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("prompt", %request_id);
    let (emitter, lines) = Emitter::channel();
    tokio::spawn(run_handler(Arc::clone(&relay.prompt), request, emitter).instrument(span));

    // From here on the status is fixed at 200; failures travel as events.
    Ok(ndjson_response(lines))
}

async fn run_handler(handler: Arc<dyn PromptHandler>, request: PromptRequest, emitter: Emitter) {
    let PromptRequest { prompt, options } = request;
    tracing::debug!("prompt handler started");

    let outcome = AssertUnwindSafe(handler.handle(prompt, emitter.clone(), options))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => tracing::debug!("prompt handler finished"),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "prompt handler failed");
            emitter.error(err.to_string());
        }
        Err(panic) => {
            tracing::error!(panic = %panic_message(panic.as_ref()), "prompt handler panicked");
            emitter.error("prompt handler panicked");
        }
    }

    emitter.close();
}

fn ndjson_response(lines: LineStream) -> Response {
    let body = Body::from_stream(lines.map(Ok::<_, Infallible>));
    (
        [
            (CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

async fn not_found() -> RequestError {
    RequestError::NotFound
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(panic.as_ref());
    tracing::error!(panic = %message, "request handling panicked");
    RequestError::Internal(message).into_response()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "internal server error".to_string()
    }
}

enum Lifecycle {
    Created,
    Started(Running),
    Stopped,
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// An owned listening socket serving one [`Relay`].
///
/// Dropping a started server triggers graceful shutdown of its listener.
pub struct Server {
    config: ServerConfig,
    relay: Relay,
    lifecycle: Lifecycle,
}

impl Server {
    pub fn new(config: ServerConfig, prompt: impl PromptHandler) -> Self {
        Self::from_relay(config, Relay::new(prompt))
    }

    pub fn from_relay(config: ServerConfig, relay: Relay) -> Self {
        Self {
            config,
            relay,
            lifecycle: Lifecycle::Created,
        }
    }

    pub fn with_health_handler(mut self, health: impl HealthHandler) -> Self {
        self.relay = self.relay.with_health_handler(health);
        self
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Started(_))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.lifecycle {
            Lifecycle::Started(running) => Some(running.addr),
            _ => None,
        }
    }

    /// Bind and begin serving. Port 0 picks a free port; the bound address is
    /// returned.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        match self.lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started(_) => return Err(ServerError::AlreadyStarted),
            Lifecycle::Stopped => return Err(ServerError::Stopped),
        }

        let listen = self.config.listen_addr();
        let bind_error = |source| ServerError::Bind {
            addr: listen.clone(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(&listen)
            .await
            .map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = self.relay.router();
        let task = tokio::spawn(async move {
            let signal = async {
                let _ = shutdown_rx.await;
            };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                tracing::error!(error = %err, "server loop exited with error");
            }
        });

        tracing::info!(%addr, "sandbox relay listening");
        self.lifecycle = Lifecycle::Started(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Stop accepting connections and release the socket. Safe to call in any
    /// state; only a started server is affected.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        let Lifecycle::Started(running) =
            std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped)
        else {
            return;
        };

        let _ = running.shutdown.send(());
        let mut task = running.task;
        if tokio::time::timeout(self.config.shutdown_grace, &mut task)
            .await
            .is_err()
        {
            tracing::warn!(
                grace = ?self.config.shutdown_grace,
                "open streams outlived shutdown grace, aborting"
            );
            task.abort();
        }
        tracing::info!(addr = %running.addr, "sandbox relay stopped");
    }
}
