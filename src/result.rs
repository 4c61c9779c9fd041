use std::{fmt::Display, path::PathBuf};

use miette::Diagnostic;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Could not spawn `{program}`")]
    #[diagnostic(help("Is `{program}` installed and reachable from the PATH?"))]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` reported an error: {line}")]
    Diagnostic { program: String, line: String },

    #[error("`{program}` exited with code {code}")]
    ExitCode { program: String, code: i32 },

    #[error("Bad version: `{program}` did not report a recognizable version")]
    BadVersion { program: String },

    #[error("Could not resolve '{id}': {message}")]
    Resolution { id: String, message: String },

    #[error("Unavailable stream")]
    UnavailableStream,

    #[error("Could not upload '{}'", .path.display())]
    Upload {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Expected a relative path, got '{}'", .0.display())]
    AbsolutePath(PathBuf),

    #[error("The {sink} sink does not support '{operation}'")]
    Unsupported {
        sink: &'static str,
        operation: &'static str,
    },

    #[error("Broken invariant: {0}")]
    Invariant(String),

    #[error("Malformed subtitles at line {line}: {message}")]
    Subtitles { line: usize, message: String },

    #[error("Bad configuration: {0}")]
    Config(String),

    #[error("History database failure")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(std::io::Error),

    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification of an [`Error`], used when reporting per-item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Startup,
    Resolution,
    Transcode,
    Upload,
    Invariant,
    Other,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Startup => "startup",
            FailureKind::Resolution => "resolution",
            FailureKind::Transcode => "transcode",
            FailureKind::Upload => "upload",
            FailureKind::Invariant => "invariant",
            FailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::BadVersion { .. } | Error::Config(_) => FailureKind::Startup,
            Error::Resolution { .. } | Error::UnavailableStream => FailureKind::Resolution,
            Error::Spawn { .. } | Error::Diagnostic { .. } | Error::ExitCode { .. } => {
                FailureKind::Transcode
            }
            Error::Upload { .. } | Error::AbsolutePath(_) | Error::Unsupported { .. } => {
                FailureKind::Upload
            }
            Error::Invariant(_) | Error::Subtitles { .. } => FailureKind::Invariant,
            Error::Io(_) | Error::Database(_) => FailureKind::Other,
            Error::Context { source, .. } => source.kind(),
        }
    }

    pub fn upload<E>(path: impl Into<PathBuf>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Upload {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Same as [`Error::upload`], unless the I/O error carries a failure of the
    /// producing side, which is then returned as is
    pub fn upload_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        match Error::from(source) {
            Error::Io(err) => Error::upload(path, err),
            err => err,
        }
    }

    pub fn wrap_err_with<D, F>(self, f: F) -> Error
    where
        D: Display,
        F: FnOnce() -> D,
    {
        Error::Context {
            message: f().to_string(),
            source: Box::new(self),
        }
    }

    /// The messages of the whole error chain, outermost first
    pub fn chain_message(&self) -> String {
        let mut parts = vec![self.to_string()];
        let mut current: &dyn std::error::Error = self;
        while let Some(source) = current.source() {
            parts.push(source.to_string());
            current = source;
        }
        parts.join(": ")
    }
}

/// Readers report their failures as [`std::io::Error`]; those wrapping an
/// [`Error`] are unwrapped so that the failure keeps its kind.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(err);
        }

        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            _ => Error::Invariant("lost the error carried by an I/O error".to_string()),
        }
    }
}

pub trait ResultExt<T> {
    fn context<D: Display>(self, message: D) -> Result<T>;

    fn with_context<D: Display, F: FnOnce() -> D>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context<D: Display>(self, message: D) -> Result<T> {
        self.map_err(|err| err.into().wrap_err_with(|| message))
    }

    fn with_context<D: Display, F: FnOnce() -> D>(self, f: F) -> Result<T> {
        self.map_err(|err| err.into().wrap_err_with(f))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_the_failure_kind() {
        let err: Result<()> = Err(Error::ExitCode {
            program: "ffmpeg".into(),
            code: 1,
        });
        let err = err.context("Could not extract chapter 3").unwrap_err();

        assert_eq!(err.kind(), FailureKind::Transcode);
        assert_eq!(
            err.chain_message(),
            "Could not extract chapter 3: `ffmpeg` exited with code 1"
        );
    }

    #[test]
    fn io_errors_give_back_carried_failures() {
        let carried = std::io::Error::other(Error::Diagnostic {
            program: "ffmpeg".into(),
            line: "Error while decoding".into(),
        });
        assert!(matches!(Error::from(carried), Error::Diagnostic { .. }));

        let plain = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(Error::from(plain), Error::Io(_)));

        let carried = std::io::Error::other(Error::ExitCode {
            program: "ffmpeg".into(),
            code: 1,
        });
        assert_eq!(Error::upload_io("a.aac", carried).kind(), FailureKind::Transcode);
    }

    #[test]
    fn absolute_paths_are_upload_failures() {
        let err = Error::AbsolutePath(PathBuf::from("/etc/passwd"));
        assert_eq!(err.kind(), FailureKind::Upload);
        assert!(err.to_string().contains("/etc/passwd"));
    }
}
