//! Purpose: Hold top-level CLI command dispatch for `lnkstream`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: `fetch` writes only the response body to its destination.
//! Invariants: A non-success status still writes the body, then fails with a mapped kind.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::Duration;

use super::*;
use lnkstream::api::{CacheConfig, Headers, Parameters, Talker, TalkerConfig};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Fetch(args) => {
            serve::init_tracing();
            run_fetch(args)
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(args);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
    }
}

fn talker_config_from_args(args: &FetchArgs) -> TalkerConfig {
    let mut config = TalkerConfig::default();
    if let Some(ms) = args.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout = Duration::from_millis(ms);
        if args.connect_timeout_ms.is_none() {
            config.connect_timeout = config.connect_timeout.min(config.timeout);
        }
    }
    config.tls_ca_file = args.tls_ca.clone();
    config
}

fn run_fetch(args: FetchArgs) -> Result<RunOutcome, Error> {
    let talker = Talker::with_config(talker_config_from_args(&args))?;

    let headers: Headers = args
        .headers
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let params: Parameters = args.params.iter().cloned().collect();
    let param_sets: Vec<&Parameters> = if params.is_empty() { Vec::new() } else { vec![&params] };

    let mut destination: Box<dyn Write> = match &args.out {
        Some(path) => {
            let file = File::create(path).map_err(|err| {
                let kind = if err.kind() == io::ErrorKind::PermissionDenied {
                    ErrorKind::Permission
                } else {
                    ErrorKind::Io
                };
                Error::new(kind)
                    .with_message("failed to create output file")
                    .with_name(path.display().to_string())
                    .with_source(err)
            })?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    };

    talker.fsend(
        Some(destination.as_mut()),
        None,
        Some(&headers),
        &args.url,
        &param_sets,
    )?;
    destination.flush().map_err(Error::from_io)?;

    if args.summary {
        let method = if param_sets.is_empty() { "GET" } else { "POST" };
        emit_json_stderr(&json!({
            "url": args.url,
            "method": method,
            "status": talker.last_status(),
            "bytes": talker.buffered_len(),
        }));
    }
    let status = talker.check_status(&args.url);
    talker.close();
    status?;
    Ok(RunOutcome::ok())
}

fn serve_config_from_args(args: ServeArgs) -> serve::ServeConfig {
    let mut cache = CacheConfig::default();
    if let Some(window) = args.window {
        cache.window = window;
    }
    serve::ServeConfig {
        bind: args.bind,
        assets: args.assets,
        origin: args.origin,
        cache,
        talker: TalkerConfig::default(),
        allow_non_loopback: args.allow_non_loopback,
    }
}
