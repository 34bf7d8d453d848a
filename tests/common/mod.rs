//! Purpose: In-process HTTP origin shared by integration tests.
//! Role: Runs an axum router on a background tokio runtime bound to loopback.
//! Invariants: Each server binds an ephemeral port; dropping it signals shutdown.
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use axum::Router;
use axum::extract::Multipart;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};

pub struct TestOrigin {
    pub addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestOrigin {
    pub fn start(app: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
            });
        });
        Self {
            addr,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestOrigin {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Deterministic payload of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|idx| (idx % 251) as u8).collect()
}

/// Origin with the routes the talker and CLI tests exercise.
pub fn origin_router() -> Router {
    Router::new()
        .route("/echo/*path", get(echo_content_type))
        .route("/header/:name", get(echo_header))
        .route("/form", post(echo_form))
        .route("/form.json", post(echo_form))
        .route("/big/:len", get(big_body))
        .route("/slow", get(slow_body))
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "gone") }))
        .route("/locked", get(|| async { (StatusCode::LOCKED, "busy") }))
        .route("/static/app.js", get(|| async { "console.log('origin');" }))
}

async fn echo_content_type(headers: HeaderMap) -> String {
    headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn echo_header(
    axum::extract::Path(name): axum::extract::Path<String>,
    headers: HeaderMap,
) -> String {
    headers
        .get_all(name.as_str())
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("|")
}

async fn echo_form(headers: HeaderMap, mut multipart: Multipart) -> Result<String, StatusCode> {
    let content_type = headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let mut out = format!("content-type: {content_type}\n");
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        out.push_str(&format!("{name}={value}\n"));
    }
    Ok(out)
}

async fn big_body(axum::extract::Path(len): axum::extract::Path<usize>) -> Vec<u8> {
    pattern(len)
}

async fn slow_body() -> &'static str {
    tokio::time::sleep(Duration::from_millis(400)).await;
    "done"
}
