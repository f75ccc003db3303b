use std::fmt;
use std::io;

/// Custom configuration errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String, String),
    UnknownKey(String),
    UnknownSection(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value '{}' for key '{}'", value, key)
            }
            ConfigError::UnknownKey(key) => write!(f, "Unknown configuration key: '{}'", key),
            ConfigError::UnknownSection(section) => write!(f, "Unknown section: '{}'", section),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which retry cap a transfer ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Consecutive NAKs sent or received
    Nak,
    /// Consecutive packet-receive timeouts
    Timeout,
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryKind::Nak => write!(f, "NAK"),
            RetryKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Client error taxonomy
///
/// Transfer errors never abort the process: the supervisor records the
/// variant, restores the option state and returns the session to client
/// mode. Only a fatal socket error ends the session.
#[derive(Debug)]
pub enum ClientError {
    /// Programmer-visible contract violation
    InvalidArgument(String),

    /// OS-level I/O failure (would-block and EINTR are retried internally
    /// and never surface here)
    Io(io::Error),

    /// Connection closed by the remote peer
    ConnectionClosed,

    /// The framer hit a sequence it cannot recover within policy
    ProtocolFraming(String),

    /// Peer emitted a non-IAC byte after IAC during a transfer
    BinaryModeLost,

    /// A retry cap from the transfer engine was exceeded
    RetryLimitExceeded { kind: RetryKind, limit: u32 },

    /// Global transfer deadline passed
    TransferTimeout,

    /// Cancellation flag observed
    UserCancel,

    /// File open/read/write/stat failure during a transfer
    FileIo { path: String, source: io::Error },

    /// External relay child exited with a failure status
    ChildCrash(i32),

    /// External relay child was terminated by a signal
    ChildTerminatedBySignal,

    /// Configuration error
    Configuration(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            ClientError::Io(err) => write!(f, "I/O error: {}", err),
            ClientError::ConnectionClosed => write!(f, "Connection closed by remote host"),
            ClientError::ProtocolFraming(msg) => write!(f, "Protocol framing error: {}", msg),
            ClientError::BinaryModeLost => {
                write!(f, "Remote left BINARY mode during transfer")
            }
            ClientError::RetryLimitExceeded { kind, limit } => {
                write!(f, "Transfer aborted: {} limit exceeded ({})", kind, limit)
            }
            ClientError::TransferTimeout => write!(f, "Transfer timed out"),
            ClientError::UserCancel => write!(f, "Transfer cancelled by user"),
            ClientError::FileIo { path, source } => {
                write!(f, "File error on '{}': {}", path, source)
            }
            ClientError::ChildCrash(code) => {
                write!(f, "Transfer program exited with status {}", code)
            }
            ClientError::ChildTerminatedBySignal => {
                write!(f, "Transfer program terminated by signal")
            }
            ClientError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(err) => Some(err),
            ClientError::FileIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => ClientError::ConnectionClosed,
            _ => ClientError::Io(err),
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Configuration(err.to_string())
    }
}

impl ClientError {
    /// Short tag for transfer log records.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientError::InvalidArgument(_) => "invalid-argument",
            ClientError::Io(_) => "io",
            ClientError::ConnectionClosed => "connection-closed",
            ClientError::ProtocolFraming(_) => "protocol-framing",
            ClientError::BinaryModeLost => "binary-mode-lost",
            ClientError::RetryLimitExceeded {
                kind: RetryKind::Nak,
                ..
            } => "nak-limit",
            ClientError::RetryLimitExceeded {
                kind: RetryKind::Timeout,
                ..
            } => "timeout-limit",
            ClientError::TransferTimeout => "transfer-timeout",
            ClientError::UserCancel => "user-cancel",
            ClientError::FileIo { .. } => "file-io",
            ClientError::ChildCrash(_) => "child-crash",
            ClientError::ChildTerminatedBySignal => "child-signal",
            ClientError::Configuration(_) => "configuration",
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_eof_maps_to_connection_closed() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            ClientError::from(eof),
            ClientError::ConnectionClosed
        ));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(ClientError::from(denied), ClientError::Io(_)));
    }

    #[test]
    fn display_includes_retry_details() {
        let err = ClientError::RetryLimitExceeded {
            kind: RetryKind::Nak,
            limit: 10,
        };
        assert_eq!(err.to_string(), "Transfer aborted: NAK limit exceeded (10)");
        assert_eq!(err.tag(), "nak-limit");
    }
}
