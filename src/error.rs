use std::fmt;
use std::io;

use tonic::{Code, Status};

/// Message carried by every `ResourceExhausted` status.
pub const TOO_MANY_REQUESTS: &str = "too many requests";

/// Wire-level error kinds.
///
/// Every failure that leaves a handler or reaches a client caller is reduced to
/// one of these, and each kind maps to exactly one gRPC status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ResourceExhausted,
    InvalidArgument,
    DeadlineExceeded,
    Internal,
}

/// Kind <-> status code table. Both conversion directions read from here.
const STATUS_TABLE: [(ErrorKind, Code); 5] = [
    (ErrorKind::NotFound, Code::NotFound),
    (ErrorKind::ResourceExhausted, Code::ResourceExhausted),
    (ErrorKind::InvalidArgument, Code::InvalidArgument),
    (ErrorKind::DeadlineExceeded, Code::DeadlineExceeded),
    (ErrorKind::Internal, Code::Internal),
];

impl ErrorKind {
    /// gRPC code sent for this kind.
    pub fn code(self) -> Code {
        STATUS_TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, code)| *code)
            .unwrap_or(Code::Internal)
    }

    /// Kind for a received gRPC code; unknown codes collapse to `Internal`.
    pub fn from_code(code: Code) -> Self {
        STATUS_TABLE
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors produced by the file store on either side of the connection.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Missing file or directory on a read path.
    #[error("{0}")]
    NotFound(String),

    /// No admission permit available for the requested operation.
    #[error("{}", TOO_MANY_REQUESTS)]
    ResourceExhausted,

    /// Malformed request, e.g. an empty or path-only filename.
    #[error("{0}")]
    InvalidArgument(String),

    /// Client-side deadline expired before the call completed.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Any other failure, described for humans.
    #[error("{0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl TransferError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wire kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::NotFound(_) => ErrorKind::NotFound,
            TransferError::ResourceExhausted => ErrorKind::ResourceExhausted,
            TransferError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            TransferError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            TransferError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            TransferError::Internal(_) | TransferError::Io(_) | TransferError::Transport(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<TransferError> for Status {
    fn from(err: TransferError) -> Self {
        Status::new(err.kind().code(), err.to_string())
    }
}

impl From<Status> for TransferError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match ErrorKind::from_code(status.code()) {
            ErrorKind::NotFound => TransferError::NotFound(message),
            ErrorKind::ResourceExhausted => TransferError::ResourceExhausted,
            ErrorKind::InvalidArgument => TransferError::InvalidArgument(message),
            ErrorKind::DeadlineExceeded => TransferError::DeadlineExceeded(message),
            ErrorKind::Internal if status.code() == Code::Internal => {
                TransferError::Internal(message)
            }
            ErrorKind::Internal => {
                TransferError::Internal(format!("{:?}: {}", status.code(), message))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
