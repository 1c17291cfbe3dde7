//! Error types for the pipeline orchestrator and its stages.
//!
//! A single flat `Error` carries a closed `ErrorKind`, an optional native
//! FFmpeg error code, and a human-readable message. Wrapping is flat: a
//! stage never nests one `Error` inside another, it re-kinds and re-messages.

use thiserror::Error;

/// Closed taxonomy of failure modes surfaced across the library (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown codec/filter/format/stream name.
    NotFound,
    /// Malformed configuration, unparseable bitrate, invalid pad index, incompatible parameters.
    InvalidArgument,
    /// Container or codec bitstream is corrupt.
    MalformedInput,
    /// Underlying read/write/seek error.
    Io,
    /// File or protocol refused.
    PermissionDenied,
    /// Operation on a freed or post-trailer component.
    Closed,
    /// Allocation failure, hardware pool empty.
    ResourceExhausted,
    /// Requested accelerator cannot be initialized.
    HardwareUnavailable,
    /// Soft: caller must continue the pump.
    TryAgain,
    /// Soft: no more data from this direction.
    EndOfStream,
    /// Cooperative cancellation observed.
    Cancelled,
}

impl ErrorKind {
    /// Soft kinds drive state machines; they are never surfaced to pipeline callers.
    pub fn is_soft(self) -> bool {
        matches!(self, ErrorKind::TryAgain | ErrorKind::EndOfStream)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::MalformedInput => "malformed input",
            ErrorKind::Io => "io error",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Closed => "closed",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::HardwareUnavailable => "hardware unavailable",
            ErrorKind::TryAgain => "try again",
            ErrorKind::EndOfStream => "end of stream",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A flat, single-layer error: kind + optional native code + message.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}{}", code.map(|c| format!(" (native code {c})")).unwrap_or_default())]
pub struct Error {
    pub kind: ErrorKind,
    pub code: Option<i32>,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{what} not found"))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn closed() -> Self {
        Self::new(ErrorKind::Closed, "operation on a closed component")
    }

    pub fn try_again() -> Self {
        Self::new(ErrorKind::TryAgain, "caller must continue the pump")
    }

    pub fn end_of_stream() -> Self {
        Self::new(ErrorKind::EndOfStream, "no more data from this direction")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cooperative cancellation observed")
    }

    pub fn is_soft(&self) -> bool {
        self.kind.is_soft()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Converts an `ffmpeg_next::Error` into our flat `Error`, classifying the
/// two soft cases (`EAGAIN`/`EOF`) so callers can pattern-match on `ErrorKind`
/// instead of re-deriving FFmpeg's own error constants at every call site.
impl From<ffmpeg_next::Error> for Error {
    fn from(err: ffmpeg_next::Error) -> Self {
        match err {
            ffmpeg_next::Error::Eof => Error::end_of_stream(),
            ffmpeg_next::Error::Other { errno } if errno == ffmpeg_next::ffi::EAGAIN => {
                Error::try_again()
            }
            ffmpeg_next::Error::Other { errno } if errno == libc_enoent() => {
                Error::with_code(ErrorKind::NotFound, errno, err.to_string())
            }
            ffmpeg_next::Error::Other { errno } if errno == libc_eacces() => {
                Error::with_code(ErrorKind::PermissionDenied, errno, err.to_string())
            }
            other => {
                let errno = match other {
                    ffmpeg_next::Error::Other { errno } => Some(errno),
                    _ => None,
                };
                match errno {
                    Some(code) => Error::with_code(ErrorKind::MalformedInput, code, other.to_string()),
                    None => Error::new(ErrorKind::MalformedInput, other.to_string()),
                }
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Io,
        };
        Error::new(kind, err.to_string())
    }
}

/// Extension trait mirroring the teacher's `FFmpegErrorExt`: converts a raw
/// FFmpeg return code into a classified `Error` at FFI call sites that bypass
/// the safe `ffmpeg_next::Error` wrapping (hwcontext, bitstream filters).
pub trait FFmpegErrorExt {
    fn to_avflow_error(self, context: &str) -> Error;
}

impl FFmpegErrorExt for i32 {
    fn to_avflow_error(self, context: &str) -> Error {
        if self >= 0 {
            return Error::new(
                ErrorKind::MalformedInput,
                format!("unexpected success code {self} in context: {context}"),
            );
        }
        if self == -ffmpeg_next::ffi::EAGAIN {
            return Error::try_again();
        }
        if self == ffmpeg_next::ffi::AVERROR_EOF {
            return Error::end_of_stream();
        }
        Error::with_code(ErrorKind::MalformedInput, self, context.to_string())
    }
}

fn libc_enoent() -> i32 {
    ffmpeg_next::ffi::ENOENT
}

fn libc_eacces() -> i32 {
    ffmpeg_next::ffi::EACCES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_kinds_are_classified() {
        assert!(ErrorKind::TryAgain.is_soft());
        assert!(ErrorKind::EndOfStream.is_soft());
        assert!(!ErrorKind::InvalidArgument.is_soft());
    }

    #[test]
    fn display_is_flat_single_layer() {
        let err = Error::with_code(ErrorKind::NotFound, -2, "codec libx264");
        let rendered = err.to_string();
        assert!(rendered.contains("not found"));
        assert!(rendered.contains("codec libx264"));
        assert!(rendered.contains("-2"));
    }

    #[test]
    fn helper_constructors_set_expected_kind() {
        assert_eq!(Error::closed().kind, ErrorKind::Closed);
        assert_eq!(Error::try_again().kind, ErrorKind::TryAgain);
        assert_eq!(Error::end_of_stream().kind, ErrorKind::EndOfStream);
        assert_eq!(Error::cancelled().kind, ErrorKind::Cancelled);
        assert!(Error::try_again().is_soft());
    }
}
