//! Purpose: Blocking HTTP talker that streams multipart forms and buffers responses.
//! Exports: `Talker`.
//! Role: Outbound request path; feeds the resource cache and the CLI `fetch` command.
//! Invariants: GET unless parameter sets are supplied, then POST with a multipart body.
//! Invariants: The multipart producer closes its pipe exactly once on every path.
//! Invariants: `close` is a no-op while a send is in flight; it releases buffers once.
//! Invariants: Pull-style readers always reach end-of-data once a send returns.
#![allow(clippy::result_large_err)]

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, warn};
use url::Url;

use super::headers::Headers;
use super::params::Parameters;
use crate::config::TalkerConfig;
use crate::core::active::ActiveTransfer;
use crate::core::buffered::BufferedRw;
use crate::core::error::{Error, ErrorKind};
use crate::core::mime::find_mime_type_by_ext;
use crate::core::multipart::MultipartWriter;
use crate::core::pipe::{PipeWriter, pipe};

type ApiResult<T> = Result<T, Error>;

const SINK_NAME: &str = "out";

pub struct Talker {
    agent: ureq::Agent,
    config: TalkerConfig,
    buffer: Mutex<Option<BufferedRw>>,
    pull: Mutex<Option<BufferedRw>>,
    active: Mutex<Option<ActiveTransfer>>,
    params: Parameters,
    closable: AtomicBool,
    in_flight: AtomicBool,
    last_status: AtomicU16,
}

/// Restores the closable state when a send leaves `fsend`, whatever the outcome.
struct SendGuard<'a> {
    talker: &'a Talker,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = lock(&self.talker.buffer).as_ref() {
            buffer.finish();
        }
        self.talker.closable.store(true, Ordering::Release);
        self.talker.in_flight.store(false, Ordering::Release);
    }
}

impl Talker {
    pub fn new() -> Self {
        let config = TalkerConfig::default();
        let agent = build_agent(&config, None);
        Self::assemble(agent, config)
    }

    pub fn with_config(config: TalkerConfig) -> ApiResult<Self> {
        config.validate()?;
        let tls = match &config.tls_ca_file {
            Some(path) => Some(load_tls_config(path)?),
            None => None,
        };
        let agent = build_agent(&config, tls);
        Ok(Self::assemble(agent, config))
    }

    /// Trusts only the certificates in the PEM file at `path` for HTTPS origins.
    pub fn with_tls_ca_file(mut self, path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let tls = load_tls_config(path)?;
        self.agent = build_agent(&self.config, Some(tls));
        self.config.tls_ca_file = Some(path.to_path_buf());
        Ok(self)
    }

    fn assemble(agent: ureq::Agent, config: TalkerConfig) -> Self {
        if config.h2c {
            warn!("h2c prior knowledge requested; the transport speaks HTTP/1.1 only");
        }
        let buffer = BufferedRw::with_capacity(config.buffer_capacity);
        buffer.finish();
        let pull = buffer.view(config.chunk_size).ok();
        let mut active = ActiveTransfer::new(config.watermark);
        if let Ok(sink) = buffer.view(config.chunk_size) {
            active.register_sink(SINK_NAME, sink);
        }
        Self {
            agent,
            config,
            buffer: Mutex::new(Some(buffer)),
            pull: Mutex::new(pull),
            active: Mutex::new(Some(active)),
            params: Parameters::new(),
            closable: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            last_status: AtomicU16::new(0),
        }
    }

    pub fn config(&self) -> &TalkerConfig {
        &self.config
    }

    pub fn h2c(&self) -> bool {
        self.config.h2c
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Status of the most recent response, if one arrived.
    pub fn last_status(&self) -> Option<u16> {
        match self.last_status.load(Ordering::Acquire) {
            0 => None,
            status => Some(status),
        }
    }

    /// Maps a non-success status from the last exchange to an error.
    ///
    /// `fsend` itself only fails on transport, request and encoding errors; the
    /// body of a 4xx or 5xx response is buffered like any other.
    pub fn check_status(&self, url: &str) -> ApiResult<()> {
        match self.last_status() {
            Some(code) if code >= 400 => Err(Error::new(error_kind_from_status(code))
                .with_message(format!("remote error status {code}"))
                .with_status(code)
                .with_name(url)),
            _ => Ok(()),
        }
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.buffer).is_none()
    }

    /// Bytes currently held in the internal response buffer.
    pub fn buffered_len(&self) -> usize {
        lock(&self.buffer).as_ref().map_or(0, BufferedRw::len)
    }

    /// Sends without a destination writer; the response lands in the internal buffer.
    pub fn send(
        &self,
        url: &str,
        body: Option<&mut dyn Read>,
        headers: Option<&Headers>,
        params: &[&Parameters],
    ) -> ApiResult<()> {
        self.fsend(None, body, headers, url, params)
    }

    /// Posts the session parameter set.
    pub fn submit(
        &self,
        writer: Option<&mut dyn Write>,
        url: &str,
        headers: Option<&Headers>,
    ) -> ApiResult<()> {
        self.fsend(writer, None, headers, url, &[&self.params])
    }

    pub fn fsend(
        &self,
        writer: Option<&mut dyn Write>,
        body: Option<&mut dyn Read>,
        headers: Option<&Headers>,
        url: &str,
        params: &[&Parameters],
    ) -> ApiResult<()> {
        let _guard = self.begin_send()?;

        let mut headers = headers.cloned().unwrap_or_default();
        if headers.get_all("Content-Type").is_empty() {
            let (mime, _) = find_mime_type_by_ext(request_path(url), ".txt", "text/plain");
            headers.set("Content-Type", mime);
        }

        let target = parse_url(url)?;
        self.prepare_buffer()?;
        self.last_status.store(0, Ordering::Release);

        if params.is_empty() {
            debug!(method = "GET", url, "sending request");
            let request = self.request("GET", &target, &headers);
            let response = match body {
                Some(body) => request.send(body),
                None => request.call(),
            };
            return self.receive(response, writer, url);
        }

        let fields: Vec<(String, String)> = params
            .iter()
            .flat_map(|set| set.iter())
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let (pipe_writer, pipe_reader) = pipe(self.config.pipe_depth);
        let form = MultipartWriter::new(pipe_writer)?;
        headers.set("Content-Type", form.form_data_content_type());

        let done = spawn_form_producer(form, fields)?;
        debug!(method = "POST", url, "sending multipart request");
        let response = self.request("POST", &target, &headers).send(pipe_reader);
        let encoded = done.recv().unwrap_or_else(|_| {
            Err(Error::new(ErrorKind::Internal)
                .with_message("multipart producer exited without reporting"))
        });
        match encoded {
            Err(err) if err.kind() == ErrorKind::Encoding => {
                drop(response);
                Err(err.with_name(url))
            }
            _ => self.receive(response, writer, url),
        }
    }

    /// Clears the internal buffer and the transfer counter; headers and parameters stay.
    pub fn reset(&self) {
        let mut buffer = lock(&self.buffer);
        let Some(buffer) = buffer.as_mut() else {
            return;
        };
        buffer.reset();
        buffer.finish();
        *lock(&self.pull) = buffer.view(self.config.chunk_size).ok();
        if let Some(active) = lock(&self.active).as_mut() {
            active.reset();
            if let Ok(sink) = buffer.view(self.config.chunk_size) {
                active.register_sink(SINK_NAME, sink);
            }
        }
    }

    /// Releases the internal buffer and tracker once no send is in flight.
    ///
    /// A session only becomes closable after its first send returns; before
    /// that, and while a send is running, this is a no-op.
    pub fn close(&self) {
        if !self.closable.load(Ordering::Acquire) || self.in_flight.load(Ordering::Acquire) {
            debug!("talker close skipped; send in flight or never sent");
            return;
        }
        if let Some(mut buffer) = lock(&self.buffer).take() {
            buffer.close();
        }
        if let Some(mut pull) = lock(&self.pull).take() {
            pull.close();
        }
        if let Some(mut active) = lock(&self.active).take() {
            active.close();
        }
    }

    /// Fresh reader over everything buffered since the last reset.
    pub fn reader(&self) -> ApiResult<BufferedRw> {
        match lock(&self.buffer).as_ref() {
            Some(buffer) => buffer.view(self.config.chunk_size),
            None => Err(closed_error()),
        }
    }

    fn begin_send(&self) -> ApiResult<SendGuard<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(ErrorKind::Busy)
                .with_message("talker already has a send in flight")
                .with_hint("Serialize sends or use one talker per concurrent request."));
        }
        self.closable.store(false, Ordering::Release);
        Ok(SendGuard { talker: self })
    }

    fn prepare_buffer(&self) -> ApiResult<()> {
        match lock(&self.buffer).as_ref() {
            Some(buffer) => {
                buffer.resume();
                Ok(())
            }
            None => Err(closed_error()),
        }
    }

    fn request(&self, method: &str, url: &Url, headers: &Headers) -> ureq::Request {
        let mut request = self.agent.request_url(method, url);
        for (key, values) in headers.iter() {
            request = request.set(key, &values.join(", "));
        }
        request
    }

    fn receive(
        &self,
        response: Result<ureq::Response, ureq::Error>,
        writer: Option<&mut dyn Write>,
        url: &str,
    ) -> ApiResult<()> {
        let resp = match response {
            Ok(resp) | Err(ureq::Error::Status(_, resp)) => resp,
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Transport)
                    .with_message("request failed")
                    .with_name(url)
                    .with_source(err));
            }
        };
        let status = resp.status();
        self.last_status.store(status, Ordering::Release);
        let copied = self.copy_body(resp.into_reader(), writer)?;
        debug!(status, bytes = copied, url, "response received");
        Ok(())
    }

    fn copy_body(
        &self,
        mut body: impl Read,
        mut writer: Option<&mut dyn Write>,
    ) -> ApiResult<u64> {
        let mut chunk = vec![0u8; self.config.chunk_size];
        let mut total = 0u64;
        loop {
            let n = match body.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(Error::new(ErrorKind::Transport)
                        .with_message("failed to read response body")
                        .with_source(err));
                }
            };
            let bytes = &chunk[..n];
            match lock(&self.buffer).as_mut() {
                Some(buffer) => buffer.write_all(bytes).map_err(Error::from_io)?,
                None => return Err(closed_error()),
            }
            if let Some(writer) = writer.as_deref_mut() {
                writer.write_all(bytes).map_err(|err| {
                    Error::from_io(err).with_message("failed to write response to destination")
                })?;
            }
            total += n as u64;
            if self.observe(n as u64) {
                if let Some(writer) = writer.as_deref_mut() {
                    writer.flush().map_err(Error::from_io)?;
                }
            }
        }
        if let Some(writer) = writer {
            writer.flush().map_err(Error::from_io)?;
        }
        Ok(total)
    }

    /// Counts `bytes` against the watermark; true when the destination should flush.
    fn observe(&self, bytes: u64) -> bool {
        let mut active = lock(&self.active);
        let Some(active) = active.as_mut() else {
            return false;
        };
        active.observe(bytes);
        if !active.exceeds_watermark() {
            return false;
        }
        debug!(observed = active.observed(), "watermark reached; flushing destination");
        active.reset();
        true
    }
}

impl Default for Talker {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the internal buffer through the session's own cursor.
impl Read for Talker {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match lock(&self.pull).as_mut() {
            Some(pull) => pull.read(buf),
            None => Err(closed_error().into_io()),
        }
    }
}

/// Appends to the internal buffer; pull readers see the bytes on their next read.
impl Write for Talker {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = lock(&self.buffer);
        let Some(buffer) = buffer.as_mut() else {
            return Err(closed_error().into_io());
        };
        buffer.resume();
        let written = buffer.write(buf);
        buffer.finish();
        written
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn spawn_form_producer(
    form: MultipartWriter<PipeWriter>,
    fields: Vec<(String, String)>,
) -> ApiResult<mpsc::Receiver<ApiResult<()>>> {
    let (done_tx, done_rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("lnkstream-form".to_string())
        .spawn(move || {
            let _ = done_tx.send(write_form(form, &fields));
        })
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start multipart producer")
                .with_source(err)
        })?;
    Ok(done_rx)
}

fn write_form(mut form: MultipartWriter<PipeWriter>, fields: &[(String, String)]) -> ApiResult<()> {
    let written = fields
        .iter()
        .try_for_each(|(name, value)| form.write_field(name, value.as_bytes()))
        .and_then(|()| form.finish());
    match written {
        Ok(()) => {
            form.into_inner().close();
            Ok(())
        }
        Err(err) => {
            form.into_inner().abort(
                Error::new(ErrorKind::Encoding).with_message("multipart body aborted"),
            );
            Err(err)
        }
    }
}

fn build_agent(
    config: &TalkerConfig,
    tls: Option<Arc<ureq::rustls::ClientConfig>>,
) -> ureq::Agent {
    // ureq has no separate handshake timer; per-operation socket timeouts bound each handshake round-trip.
    let mut builder = ureq::AgentBuilder::new()
        .timeout_connect(config.connect_timeout)
        .timeout_read(config.tls_handshake_timeout)
        .timeout_write(config.tls_handshake_timeout)
        .timeout(config.timeout);
    if let Some(tls) = tls {
        builder = builder.tls_config(tls);
    }
    builder.build()
}

fn load_tls_config(path: &Path) -> ApiResult<Arc<ureq::rustls::ClientConfig>> {
    let cert_bytes = std::fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to read TLS CA/certificate file")
            .with_name(path.display().to_string())
            .with_source(err)
    })?;
    let mut cert_reader = io::Cursor::new(cert_bytes);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("failed to parse TLS CA/certificate file")
                .with_name(path.display().to_string())
                .with_source(err)
        })?;
    if certs.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("TLS CA/certificate file contains no certificates")
            .with_name(path.display().to_string()));
    }

    let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
    let mut root_store = ureq::rustls::RootCertStore::empty();
    let (added, _) = root_store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("TLS CA/certificate file contains no parsable certificates")
            .with_name(path.display().to_string()));
    }

    let tls_config = ureq::rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(Arc::new(tls_config))
}

fn parse_url(raw: &str) -> ApiResult<Url> {
    let url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid request url")
            .with_name(raw)
            .with_source(err)
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("request url must use http or https scheme")
            .with_name(raw)),
    }
}

/// URL with its query string and fragment removed.
fn request_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 405 | 411 | 413 | 414 | 415 | 422 => ErrorKind::Usage,
        401 | 403 => ErrorKind::Permission,
        404 | 410 => ErrorKind::NotFound,
        409 | 423 | 429 | 503 => ErrorKind::Busy,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Transport,
    }
}

fn closed_error() -> Error {
    Error::new(ErrorKind::Closed).with_message("talker is closed")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
