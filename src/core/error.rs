use std::error::Error as StdError;
use std::fmt;
use std::io;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    Busy,
    Permission,
    Closed,
    Overrun,
    Encoding,
    Transport,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    name: Option<String>,
    status: Option<u16>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            name: None,
            status: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Resource name or URL the error relates to.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// HTTP status code, when the error came from a remote response.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Recovers a crate error carried through a `std::io` boundary, or wraps
    /// a plain I/O failure as `ErrorKind::Io`.
    pub fn from_io(err: io::Error) -> Self {
        let carries_error = err.get_ref().is_some_and(|inner| inner.is::<Error>());
        if carries_error {
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<Error>() {
                    Ok(inner) => *inner,
                    Err(other) => Error::new(ErrorKind::Io).with_message(other.to_string()),
                };
            }
            return Error::new(ErrorKind::Io);
        }
        Error::new(ErrorKind::Io)
            .with_message(err.to_string())
            .with_source(err)
    }

    /// Wraps this error for `std::io::Read`/`Write` implementations.
    pub fn into_io(self) -> io::Error {
        let kind = match self.kind {
            ErrorKind::Closed => io::ErrorKind::BrokenPipe,
            ErrorKind::Usage => io::ErrorKind::InvalidInput,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::Permission => io::ErrorKind::PermissionDenied,
            ErrorKind::Encoding => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(name) = &self.name {
            write!(f, " (name: {name})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Busy => 4,
        ErrorKind::Permission => 5,
        ErrorKind::Closed => 6,
        ErrorKind::Overrun => 7,
        ErrorKind::Encoding => 8,
        ErrorKind::Transport => 9,
        ErrorKind::Io => 10,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use std::io;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::Busy, 4),
            (ErrorKind::Permission, 5),
            (ErrorKind::Closed, 6),
            (ErrorKind::Overrun, 7),
            (ErrorKind::Encoding, 8),
            (ErrorKind::Transport, 9),
            (ErrorKind::Io, 10),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn crate_error_survives_io_boundary() {
        let err = Error::new(ErrorKind::Overrun)
            .with_message("window is full")
            .into_io();
        let back = Error::from_io(err);
        assert_eq!(back.kind(), ErrorKind::Overrun);
        assert_eq!(back.message(), Some("window is full"));
    }

    #[test]
    fn plain_io_error_maps_to_io_kind() {
        let err = Error::from_io(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn closed_maps_to_broken_pipe() {
        let err = Error::new(ErrorKind::Closed).into_io();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("remote error status 404")
            .with_name("http://localhost/app.js")
            .with_status(404);
        let text = err.to_string();
        assert!(text.starts_with("NotFound: remote error status 404"));
        assert!(text.contains("(status: 404)"));
    }
}
