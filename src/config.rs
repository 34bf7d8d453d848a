//! Purpose: Tuning knobs for the resource cache and the talker.
//! Exports: `CacheConfig`, `TalkerConfig`, default constants.
//! Role: Plain structs filled by defaults or by CLI flags, checked by `validate`.
//! Invariants: Defaults are valid; sizes and timeouts must be non-zero.
use std::path::PathBuf;
use std::time::Duration;

use crate::core::buffered::DEFAULT_CHUNK_SIZE;
use crate::core::error::{Error, ErrorKind};
use crate::core::pipe::DEFAULT_PIPE_DEPTH;

pub const DEFAULT_WINDOW: usize = 81920;
pub const DEFAULT_WATERMARK: u64 = 81920;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheConfig {
    /// Largest read a lookup view serves per call.
    pub window: usize,
    /// Copy step used when draining a producer into the cache.
    pub chunk_size: usize,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.window == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("cache window must be greater than zero")
                .with_hint("Use a positive value like 81920."));
        }
        if self.chunk_size == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("cache chunk size must be greater than zero")
                .with_hint("Use a positive value like 81920."));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TalkerConfig {
    pub chunk_size: usize,
    /// Initial allocation of the talker's response buffer (it grows past this).
    pub buffer_capacity: usize,
    /// Bytes between flushes of a push-style destination writer.
    pub watermark: u64,
    pub connect_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub timeout: Duration,
    /// Chunks the multipart producer may queue ahead of the transport.
    pub pipe_depth: usize,
    pub h2c: bool,
    pub tls_ca_file: Option<PathBuf>,
}

impl TalkerConfig {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_capacity: DEFAULT_CHUNK_SIZE,
            watermark: DEFAULT_WATERMARK,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            pipe_depth: DEFAULT_PIPE_DEPTH,
            h2c: false,
            tls_ca_file: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("talker chunk size must be greater than zero")
                .with_hint("Use a positive value like 81920."));
        }
        if self.pipe_depth == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("talker pipe depth must be greater than zero")
                .with_hint("Use a positive value like 16."));
        }
        for (label, value) in [
            ("connect timeout", self.connect_timeout),
            ("TLS handshake timeout", self.tls_handshake_timeout),
            ("request timeout", self.timeout),
        ] {
            if value.is_zero() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("{label} must be greater than zero"))
                    .with_hint("Timeouts are bounded; use a positive duration."));
            }
        }
        if self.connect_timeout > self.timeout {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("connect timeout exceeds the overall request timeout")
                .with_hint("Raise the request timeout or lower the connect timeout."));
        }
        Ok(())
    }
}

impl Default for TalkerConfig {
    fn default() -> Self {
        Self::new()
    }
}
