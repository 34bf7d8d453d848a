//! Purpose: `lnkstream` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs one fetch or the asset server.
//! Invariants: Response bodies go to stdout (or `--out`); diagnostics go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};

mod command_dispatch;
mod serve;

use lnkstream::api::{Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_transport_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "lnkstream",
    version,
    about = "Stream HTTP requests and serve cached assets",
    long_about = None,
    after_help = r#"EXAMPLES
  $ lnkstream fetch http://127.0.0.1:8080/app.js
  $ lnkstream fetch http://127.0.0.1:8080/submit.json --param user=ada --param tag=x
  $ lnkstream serve --bind 127.0.0.1:9800 --asset app.js=./dist/app.js

  $ lnkstream <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Send one request and write the response body",
        long_about = r#"Send one request and write the response body.

GET by default. Any --param switches to POST with a streamed multipart/form-data body."#,
        after_help = r#"EXAMPLES
  $ lnkstream fetch http://127.0.0.1:8080/data.json
  $ lnkstream fetch http://127.0.0.1:8080/form --param a=1 --param a=2 --out reply.txt
  $ lnkstream fetch https://example.com/app.js --tls-ca ./ca.pem --summary

NOTES
  - Content-Type comes from the URL path extension (text/plain when unknown)
  - Non-2xx responses still write the body, then exit with a code mapped from the status"#
    )]
    Fetch(FetchArgs),
    #[command(
        about = "Serve cached assets over HTTP",
        long_about = r#"Serve cached assets over HTTP.

GET /assets/<name> answers from the cache; misses fall back to --asset files, then to --origin."#,
        after_help = r#"EXAMPLES
  $ lnkstream serve --asset app.js=./dist/app.js
  $ lnkstream serve --bind 127.0.0.1:9800 --origin http://127.0.0.1:8080/static

NOTES
  - Loopback binds only unless --allow-non-loopback
  - DELETE /assets/<name> evicts; GET /cache lists cached names"#
    )]
    Serve(ServeArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(help = "Request URL (http or https)", value_hint = ValueHint::Url)]
    url: String,
    #[arg(
        long = "param",
        value_name = "KEY=VALUE",
        value_parser = parse_param,
        help = "Repeatable form field; any param makes the request a multipart POST"
    )]
    params: Vec<(String, String)>,
    #[arg(
        long = "header",
        value_name = "KEY:VALUE",
        value_parser = parse_header,
        help = "Repeatable request header"
    )]
    headers: Vec<(String, String)>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Write the body to PATH instead of stdout",
        value_hint = ValueHint::FilePath
    )]
    out: Option<PathBuf>,
    #[arg(long, value_name = "N", help = "Connect timeout in milliseconds (default 5000)")]
    connect_timeout_ms: Option<u64>,
    #[arg(long, value_name = "N", help = "Overall request timeout in milliseconds (default 10000)")]
    timeout_ms: Option<u64>,
    #[arg(
        long = "tls-ca",
        value_name = "PATH",
        help = "Trust this PEM CA/certificate for HTTPS",
        value_hint = ValueHint::FilePath
    )]
    tls_ca: Option<PathBuf>,
    #[arg(long, help = "Print a JSON summary (url, method, status, bytes) on stderr")]
    summary: bool,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:9800", help = "Bind address")]
    bind: SocketAddr,
    #[arg(
        long = "asset",
        value_name = "NAME=PATH",
        value_parser = parse_asset,
        help = "Repeatable static asset consulted on cache misses"
    )]
    assets: Vec<(String, PathBuf)>,
    #[arg(long, value_name = "URL", help = "Origin base URL fetched when an asset is unknown")]
    origin: Option<String>,
    #[arg(long, value_name = "N", help = "Read window of cached views in bytes (default 81920)")]
    window: Option<usize>,
    #[arg(long, help = "Allow binding to non-loopback addresses")]
    allow_non_loopback: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY:VALUE, got `{raw}`")),
    }
}

fn parse_asset(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got `{raw}`")),
    }
}

fn add_transport_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Transport || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check that the host is reachable, or raise --connect-timeout-ms/--timeout-ms.")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission if err.status().is_none() => {
            err.with_hint("Permission denied. Check file permissions for --out or --asset paths.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_json_stderr(value: &Value) {
    let json = serde_json::to_string(value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    eprintln!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }
    emit_json_stderr(&error_json(err));
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::Busy => "resource is busy",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Closed => "channel is closed",
        ErrorKind::Overrun => "buffer overrun",
        ErrorKind::Encoding => "encoding failed",
        ErrorKind::Transport => "transport failure",
        ErrorKind::Io => "i/o error",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(name) = err.name() {
        inner.insert("name".to_string(), json!(name));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(name) = err.name() {
        lines.push(format!(
            "{} {name}",
            colorize_label("name:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(status) = err.status() {
        lines.push(format!(
            "{} {status}",
            colorize_label("status:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let subcommand = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .and_then(|usage| {
            let mut tokens = usage.split_whitespace();
            tokens.find(|token| *token == "lnkstream")?;
            tokens.next().filter(|token| {
                !token.starts_with('-') && !token.starts_with('<') && !token.starts_with('[')
            })
        });
    match subcommand {
        Some(name) => format!("Try `lnkstream {name} --help`."),
        None => "Try `lnkstream --help`.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{error_json, error_text, parse_asset, parse_header, parse_param};
    use lnkstream::api::{Error, ErrorKind};

    #[test]
    fn params_split_on_first_equals() {
        assert_eq!(
            parse_param("q=a=b").expect("param"),
            ("q".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_param("empty=").expect("param").1, "");
        assert!(parse_param("=v").is_err());
        assert!(parse_param("novalue").is_err());
    }

    #[test]
    fn headers_trim_whitespace() {
        assert_eq!(
            parse_header("accept: text/html").expect("header"),
            ("accept".to_string(), "text/html".to_string())
        );
        assert!(parse_header("missing-colon").is_err());
    }

    #[test]
    fn assets_need_name_and_path() {
        let (name, path) = parse_asset("app.js=./dist/app.js").expect("asset");
        assert_eq!(name, "app.js");
        assert_eq!(path, std::path::PathBuf::from("./dist/app.js"));
        assert!(parse_asset("app.js=").is_err());
    }

    #[test]
    fn error_json_carries_status_and_name() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("remote error status 404")
            .with_status(404)
            .with_name("http://127.0.0.1/x.js");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "NotFound");
        assert_eq!(value["error"]["status"], 404);
        assert_eq!(value["error"]["name"], "http://127.0.0.1/x.js");
        assert!(value["error"].get("hint").is_none());
    }

    #[test]
    fn error_text_without_color_has_no_escapes() {
        let err = Error::new(ErrorKind::Transport).with_hint("retry later");
        let text = error_text(&err, false);
        assert!(text.starts_with("error: transport failure"));
        assert!(text.contains("hint: retry later"));
        assert!(!text.contains('\u{1b}'));
    }
}
