//! Purpose: Serve cached assets over HTTP for lnkstream.
//! Exports: `ServeConfig`, `serve`, `init_tracing`.
//! Role: Axum front for `ResourceCache`; misses fall back to the catalog, then the origin.
//! Invariants: Blocking cache and talker work runs on `spawn_blocking`, never on the runtime.
//! Invariants: Error envelopes are `{"error":{"kind","message",...}}` with stable kinds.
//! Invariants: Loopback-only unless explicitly allowed.

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::future::IntoFuture;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use lnkstream::api::{
    AssetCatalog, BufferedRw, CacheConfig, Error, ErrorKind, ResourceCache, StaticCatalog, Talker,
    TalkerConfig, mime_type_for,
};

const STREAM_DEPTH: usize = 16;

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub assets: Vec<(String, PathBuf)>,
    pub origin: Option<String>,
    pub cache: CacheConfig,
    pub talker: TalkerConfig,
    pub allow_non_loopback: bool,
}

struct AppState {
    cache: ResourceCache,
    catalog: StaticCatalog,
    origin: Option<String>,
    talker: TalkerConfig,
    chunk_size: usize,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let catalog = load_catalog(&config.assets)?;
    let state = Arc::new(AppState {
        cache: ResourceCache::with_config(config.cache.clone())?,
        catalog,
        origin: config.origin.map(|origin| origin.trim_end_matches('/').to_string()),
        talker: config.talker,
        chunk_size: config.cache.chunk_size,
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(bind = %config.bind, "serving assets");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/cache", get(list_cache))
        .route("/assets/*name", get(get_asset).delete(evict_asset))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn load_catalog(assets: &[(String, PathBuf)]) -> Result<StaticCatalog, Error> {
    assets
        .iter()
        .try_fold(StaticCatalog::new(), |catalog, (name, path)| {
            catalog.load_file(name, path)
        })
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if let Some(origin) = &config.origin {
        let parsed = url::Url::parse(origin).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid --origin url")
                .with_name(origin.clone())
                .with_source(err)
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--origin must use http or https")
                .with_hint("Use an origin like http://127.0.0.1:8080/static."));
        }
    }

    for (name, _) in &config.assets {
        if lnkstream::api::normalize_name(name).is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("asset name must not end with a path separator")
                .with_name(name.clone())
                .with_hint("Use --asset NAME=PATH, e.g. --asset app.js=./dist/app.js."));
        }
    }

    config.cache.validate()?;
    config.talker.validate()?;
    Ok(())
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

#[derive(Debug, Serialize)]
struct CacheEntry {
    name: String,
    bytes: usize,
}

async fn list_cache(State(state): State<Arc<AppState>>) -> Response {
    let entries: Vec<CacheEntry> = state
        .cache
        .names()
        .into_iter()
        .filter_map(|name| {
            let bytes = state.cache.content_len(&name)?;
            Some(CacheEntry { name, bytes })
        })
        .collect();
    json_response(json!({ "entries": entries }))
}

async fn get_asset(State(state): State<Arc<AppState>>, AxumPath(name): AxumPath<String>) -> Response {
    let resolver = state.clone();
    let lookup_name = name.clone();
    let resolved = tokio::task::spawn_blocking(move || resolve_asset(&resolver, &lookup_name))
        .await
        .unwrap_or_else(|err| {
            Err(Error::new(ErrorKind::Internal)
                .with_message("asset resolution task failed")
                .with_source(err))
        });

    let view = match resolved {
        Ok(Some(view)) => view,
        Ok(None) => {
            return error_response(
                Error::new(ErrorKind::NotFound)
                    .with_message("asset not found")
                    .with_name(name),
            );
        }
        Err(err) => return error_response(err),
    };

    let length = view.len();
    let stream = stream_view(view, state.chunk_size);
    let mut response = Response::new(Body::from_stream(stream));
    let content_type = HeaderValue::from_str(mime_type_for(&name))
        .unwrap_or_else(|_| HeaderValue::from_static("text/plain"));
    response.headers_mut().insert("content-type", content_type);
    response
        .headers_mut()
        .insert("content-length", HeaderValue::from(length));
    response
}

async fn evict_asset(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    if state.cache.evict(&name) {
        json_response(json!({ "evicted": lnkstream::api::normalize_name(&name) }))
    } else {
        error_response(
            Error::new(ErrorKind::NotFound)
                .with_message("asset is not cached")
                .with_name(name),
        )
    }
}

/// Cache first, then the static catalog, then the origin.
fn resolve_asset<'a>(state: &'a AppState, name: &str) -> Result<Option<BufferedRw>, Error> {
    state.cache.resolve_with(name, |key| {
        if let Some(bytes) = state.catalog.find_asset(key) {
            debug!(name = key, "cache miss served from catalog");
            return Ok(Some(Box::new(bytes) as Box<dyn Read + 'a>));
        }
        let Some(origin) = &state.origin else {
            return Ok(None);
        };
        debug!(name = key, origin = %origin, "cache miss fetched from origin");
        match fetch_from_origin(&state.talker, origin, key) {
            Ok(reader) => Ok(Some(Box::new(reader) as Box<dyn Read + 'a>)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    })
}

fn fetch_from_origin(config: &TalkerConfig, origin: &str, key: &str) -> Result<BufferedRw, Error> {
    let talker = Talker::with_config(config.clone())?;
    let url = format!("{origin}/{key}");
    talker.send(&url, None, None, &[])?;
    talker.check_status(&url)?;
    let reader = talker.reader()?;
    talker.close();
    Ok(reader)
}

fn stream_view(
    mut view: BufferedRw,
    chunk_size: usize,
) -> impl tokio_stream::Stream<Item = Result<Bytes, std::io::Error>> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Error>>(STREAM_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut chunk = vec![0u8; chunk_size];
        loop {
            match view.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&chunk[..n]))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.blocking_send(Err(Error::from_io(err)));
                    break;
                }
            }
        }
        view.close();
    });
    ReceiverStream::new(rx).map(|result| result.map_err(|err| std::io::Error::other(err.to_string())))
}

fn json_response(payload: serde_json::Value) -> Response {
    Json(payload).into_response()
}

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Permission => StatusCode::FORBIDDEN,
        ErrorKind::Closed => StatusCode::GONE,
        ErrorKind::Overrun => StatusCode::INSUFFICIENT_STORAGE,
        ErrorKind::Encoding => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

fn error_response(err: Error) -> Response {
    let status = status_for_kind(err.kind());
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            name: err.name().map(str::to_string),
            status: err.status(),
        },
    };
    (status, Json(body)).into_response()
}
