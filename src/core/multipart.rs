//! Purpose: Stream `multipart/form-data` bodies field by field.
//! Exports: `MultipartWriter`.
//! Role: Encoder used by the talker's form producer.
//! Invariants: Fields are written in call order; the closing delimiter is written by `finish`.
//! Invariants: Write failures surface as `ErrorKind::Encoding`, except a vanished reader (`Closed`).
use std::io::{self, Write};

use crate::core::error::{Error, ErrorKind};

const BOUNDARY_BYTES: usize = 16;
const MAX_BOUNDARY_LEN: usize = 70;

#[derive(Debug)]
pub struct MultipartWriter<W: Write> {
    inner: W,
    boundary: String,
    wrote_part: bool,
    finished: bool,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(inner: W) -> Result<Self, Error> {
        let boundary = random_boundary()?;
        Ok(Self::with_valid_boundary(inner, boundary))
    }

    pub fn with_boundary(inner: W, boundary: impl Into<String>) -> Result<Self, Error> {
        let boundary = boundary.into();
        validate_boundary(&boundary)?;
        Ok(Self::with_valid_boundary(inner, boundary))
    }

    fn with_valid_boundary(inner: W, boundary: String) -> Self {
        Self {
            inner,
            boundary,
            wrote_part: false,
            finished: false,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn form_data_content_type(&self) -> String {
        let needs_quotes = self
            .boundary
            .chars()
            .any(|c| matches!(c, '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '"' | '/' | '[' | ']' | '?' | '=' | ' '));
        if needs_quotes {
            format!("multipart/form-data; boundary=\"{}\"", self.boundary)
        } else {
            format!("multipart/form-data; boundary={}", self.boundary)
        }
    }

    pub fn write_field(&mut self, name: &str, value: &[u8]) -> Result<(), Error> {
        if self.finished {
            return Err(Error::new(ErrorKind::Encoding)
                .with_message("multipart body is already finished")
                .with_name(name));
        }
        if name.contains(['\r', '\n']) {
            return Err(Error::new(ErrorKind::Encoding)
                .with_message("form field name contains a line break")
                .with_name(name.escape_debug().to_string()));
        }
        let delimiter = if self.wrote_part { "\r\n--" } else { "--" };
        let header = format!(
            "{delimiter}{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
            self.boundary,
            escape_quotes(name)
        );
        self.inner
            .write_all(header.as_bytes())
            .and_then(|()| self.inner.write_all(value))
            .map_err(|err| encoding_error(err, "failed to write form field").with_name(name))?;
        self.wrote_part = true;
        Ok(())
    }

    /// Writes the closing delimiter. Further fields are rejected.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        let trailer = if self.wrote_part {
            format!("\r\n--{}--\r\n", self.boundary)
        } else {
            format!("--{}--\r\n", self.boundary)
        };
        self.inner
            .write_all(trailer.as_bytes())
            .and_then(|()| self.inner.flush())
            .map_err(|err| encoding_error(err, "failed to write closing boundary"))?;
        self.finished = true;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn encoding_error(err: io::Error, message: &str) -> Error {
    let err = Error::from_io(err);
    if err.kind() == ErrorKind::Closed {
        return err;
    }
    Error::new(ErrorKind::Encoding)
        .with_message(message)
        .with_source(err)
}

fn escape_quotes(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

fn random_boundary() -> Result<String, Error> {
    let mut bytes = [0u8; BOUNDARY_BYTES];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to generate multipart boundary: {err}"))
    })?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

fn validate_boundary(boundary: &str) -> Result<(), Error> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("multipart boundary must be 1 to 70 characters"));
    }
    let allowed = |c: char| {
        c.is_ascii_alphanumeric()
            || matches!(c, '\'' | '(' | ')' | '+' | '_' | ',' | '-' | '.' | '/' | ':' | '=' | '?' | ' ')
    };
    if !boundary.chars().all(allowed) || boundary.ends_with(' ') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("multipart boundary contains invalid characters"));
    }
    Ok(())
}
