// CLI integration tests for `lnkstream fetch` and `lnkstream serve`.
mod common;

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use common::{TestOrigin, origin_router, pattern};
use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_lnkstream");
    Command::new(exe)
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text
        .lines()
        .find(|line| line.trim_start().starts_with('{'))
        .expect("json line");
    serde_json::from_str(line).expect("valid json")
}

fn json_body(response: ureq::Response) -> Value {
    serde_json::from_reader(response.into_reader()).expect("json body")
}

#[test]
fn fetch_writes_body_to_stdout() {
    let origin = TestOrigin::start(origin_router());
    let output = cmd()
        .args(["fetch", &origin.url("/echo/style.css")])
        .output()
        .expect("fetch");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(output.stdout, b"text/css");
}

#[test]
fn fetch_out_file_and_summary() {
    let origin = TestOrigin::start(origin_router());
    let temp = tempfile::tempdir().expect("tempdir");
    let out = temp.path().join("body.bin");

    let output = cmd()
        .args(["fetch", &origin.url("/big/150000"), "--summary", "--out"])
        .arg(&out)
        .output()
        .expect("fetch");
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert_eq!(std::fs::read(&out).expect("read out"), pattern(150_000));

    let summary = parse_json_line(&output.stderr);
    assert_eq!(summary["method"], "GET");
    assert_eq!(summary["status"], 200);
    assert_eq!(summary["bytes"], 150_000);
}

#[test]
fn fetch_params_post_multipart() {
    let origin = TestOrigin::start(origin_router());
    let output = cmd()
        .args([
            "fetch",
            &origin.url("/form"),
            "--param",
            "user=ada",
            "--param",
            "expr=a=b",
            "--header",
            "x-trace: 1",
            "--summary",
        ])
        .output()
        .expect("fetch");
    assert!(output.status.success());
    let body = String::from_utf8(output.stdout).expect("utf8");
    assert!(body.starts_with("content-type: multipart/form-data; boundary="));
    assert!(body.contains("user=ada\n"));
    assert!(body.contains("expr=a=b\n"));
    assert_eq!(parse_json_line(&output.stderr)["method"], "POST");
}

#[test]
fn fetch_not_found_exit_code() {
    let origin = TestOrigin::start(origin_router());
    let output = cmd()
        .args(["fetch", &origin.url("/missing")])
        .output()
        .expect("fetch");
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(output.stdout, b"gone");
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert_eq!(err["error"]["status"], 404);
}

#[test]
fn fetch_transport_exit_code() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let output = cmd()
        .args(["fetch", &format!("http://127.0.0.1:{port}/a.js"), "--timeout-ms", "2000"])
        .output()
        .expect("fetch");
    assert_eq!(output.status.code(), Some(9));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Transport");
    assert!(err["error"]["hint"].as_str().is_some());
}

#[test]
fn usage_exit_code() {
    let output = cmd()
        .args(["fetch", "http://127.0.0.1:1/x", "--param", "novalue"])
        .output()
        .expect("fetch");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");

    let output = cmd()
        .args(["fetch", "ftp://127.0.0.1/x"])
        .output()
        .expect("fetch");
    assert_eq!(output.status.code(), Some(2));
}

struct ServeProcess {
    child: Child,
    base_url: String,
}

impl ServeProcess {
    fn start(extra: &[String]) -> Self {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let bind = format!("127.0.0.1:{port}");
        let child = cmd()
            .args(["serve", "--bind", &bind])
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn serve");
        let mut process = Self {
            child,
            base_url: format!("http://{bind}"),
        };
        process.wait_ready(bind.parse().expect("addr"));
        process
    }

    fn wait_ready(&mut self, addr: SocketAddr) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                let mut stderr = String::new();
                if let Some(mut pipe) = self.child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                panic!("serve exited early with {status}: {stderr}");
            }
            if TcpStream::connect_timeout(&addr, Duration::from_millis(50)).is_ok() {
                return;
            }
            sleep(Duration::from_millis(20));
        }
        panic!("serve did not start listening");
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn serve_answers_from_assets_cache_and_origin() {
    let origin = TestOrigin::start(origin_router());
    let temp = tempfile::tempdir().expect("tempdir");
    let asset = temp.path().join("app.js");
    std::fs::write(&asset, "var app = 1;").expect("write asset");

    let server = ServeProcess::start(&[
        "--asset".to_string(),
        format!("app.js={}", asset.display()),
        "--origin".to_string(),
        origin.url("/static"),
    ]);

    let health = json_body(ureq::get(&server.url("/healthz")).call().expect("healthz"));
    assert_eq!(health["ok"], true);

    let response = ureq::get(&server.url("/assets/js/app.js")).call().expect("asset");
    assert_eq!(response.content_type(), "application/javascript");
    assert_eq!(response.into_string().expect("body"), "var app = 1;");

    let from_origin = ureq::get(&server.url("/assets/app2/app.js"))
        .call()
        .expect("cached asset");
    assert_eq!(from_origin.into_string().expect("body"), "var app = 1;");

    let cache = json_body(ureq::get(&server.url("/cache")).call().expect("cache"));
    assert_eq!(cache["entries"][0]["name"], "app.js");
    assert_eq!(cache["entries"][0]["bytes"], 12);

    let evicted = ureq::delete(&server.url("/assets/app.js")).call().expect("evict");
    assert_eq!(evicted.status(), 200);
    match ureq::delete(&server.url("/assets/app.js")).call() {
        Err(ureq::Error::Status(404, response)) => {
            let body = json_body(response);
            assert_eq!(body["error"]["kind"], "NotFound");
        }
        other => panic!("expected 404, got {other:?}"),
    }

    match ureq::get(&server.url("/assets/nowhere.css")).call() {
        Err(ureq::Error::Status(404, _)) => {}
        other => panic!("expected 404, got {other:?}"),
    }
}

#[test]
fn serve_fetches_unknown_assets_from_origin() {
    let origin = TestOrigin::start(origin_router());
    let server = ServeProcess::start(&["--origin".to_string(), origin.url("/static")]);

    let response = ureq::get(&server.url("/assets/app.js")).call().expect("origin asset");
    assert_eq!(response.content_type(), "application/javascript");
    assert!(response.header("lnkstream-version").is_none());
    assert_eq!(response.into_string().expect("body"), "console.log('origin');");

    match ureq::get(&server.url("/assets/absent.js")).call() {
        Err(ureq::Error::Status(404, _)) => {}
        other => panic!("expected 404, got {other:?}"),
    }

    let cache = json_body(ureq::get(&server.url("/cache")).call().expect("cache"));
    assert_eq!(cache["entries"].as_array().map(Vec::len), Some(1));
    assert_eq!(cache["entries"][0]["name"], "app.js");
}

#[test]
fn serve_rejects_non_loopback_bind() {
    let output = cmd()
        .args(["serve", "--bind", "0.0.0.0:0"])
        .output()
        .expect("serve");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}
