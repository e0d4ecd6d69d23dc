//! Error taxonomy for both ends of the bridge.
//!
//! Host failures cross the channel as text only: the `Display` output of a
//! [`HostError`] is what lands in a Response's `error` field, and the client
//! surfaces it as [`BridgeError::Remote`]. [`ErrorKind::from_message`] is the
//! one place that recovers a failure class from that text.

use std::time::Duration;

use crate::bridge::protocol::CorrelationId;

/// Failure class, independent of which side produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No host attached when the request was made.
    TransportUnavailable,
    /// The host link went away while the request was in flight.
    TransportClosed,
    Timeout,
    UnknownCommand,
    /// `getInitialData` with no workspace open.
    NoWorkspace,
    /// Operation needs state (an open workspace) that is missing.
    PreconditionFailed,
    /// I/O failure on the host.
    OperationFailed,
    UserCancelled,
    /// Payload or result did not match its schema.
    InvalidPayload,
    /// Anything the prefix table does not recognize.
    Other,
}

impl ErrorKind {
    /// Message prefixes written by the host, in match order.
    const PREFIXES: [(&'static str, ErrorKind); 11] = [
        ("TransportUnavailable:", ErrorKind::TransportUnavailable),
        ("TransportClosed:", ErrorKind::TransportClosed),
        ("Timeout:", ErrorKind::Timeout),
        ("UnknownCommand:", ErrorKind::UnknownCommand),
        ("NoWorkspaceError:", ErrorKind::NoWorkspace),
        ("PreconditionFailed:", ErrorKind::PreconditionFailed),
        ("FileReadError:", ErrorKind::OperationFailed),
        ("FileWriteError:", ErrorKind::OperationFailed),
        ("OperationFailed:", ErrorKind::OperationFailed),
        ("UserCancelled:", ErrorKind::UserCancelled),
        ("InvalidPayload:", ErrorKind::InvalidPayload),
    ];

    /// Classify an error string received over the wire.
    pub fn from_message(message: &str) -> Self {
        let message = message.trim_start();
        Self::PREFIXES
            .iter()
            .find(|(prefix, _)| message.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportUnavailable => "transport_unavailable",
            Self::TransportClosed => "transport_closed",
            Self::Timeout => "timeout",
            Self::UnknownCommand => "unknown_command",
            Self::NoWorkspace => "no_workspace",
            Self::PreconditionFailed => "precondition_failed",
            Self::OperationFailed => "operation_failed",
            Self::UserCancelled => "user_cancelled",
            Self::InvalidPayload => "invalid_payload",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the host while executing a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("NoWorkspaceError: no workspace folder is open")]
    NoWorkspace,

    #[error("PreconditionFailed: {0}")]
    PreconditionFailed(String),

    #[error("FileReadError: failed to read '{path}': {message}")]
    FileRead { path: String, message: String },

    #[error("FileWriteError: failed to write '{path}': {message}")]
    FileWrite { path: String, message: String },

    #[error("OperationFailed: {0}")]
    OperationFailed(String),

    #[error("UserCancelled: {0}")]
    UserCancelled(String),

    #[error("UnknownCommand: no handler for '{0}'")]
    UnknownCommand(String),

    #[error("InvalidPayload: '{command}': {message}")]
    InvalidPayload { command: String, message: String },
}

impl HostError {
    pub fn file_read(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn file_write(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::FileWrite {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::UserCancelled(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoWorkspace => ErrorKind::NoWorkspace,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::FileRead { .. } | Self::FileWrite { .. } | Self::OperationFailed(_) => {
                ErrorKind::OperationFailed
            }
            Self::UserCancelled(_) => ErrorKind::UserCancelled,
            Self::UnknownCommand(_) => ErrorKind::UnknownCommand,
            Self::InvalidPayload { .. } => ErrorKind::InvalidPayload,
        }
    }
}

/// Errors surfaced to callers of the client bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("TransportUnavailable: no host is attached")]
    TransportUnavailable,

    #[error("TransportClosed: host link closed before a response arrived")]
    TransportClosed,

    #[error("Timeout: '{command}' not answered within {after:?}")]
    Timeout { command: String, after: Duration },

    /// Failure text reported by the host, verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("InvalidPayload: {0}")]
    InvalidPayload(String),

    #[error("DuplicateRequestId: request {0} is already in flight")]
    DuplicateRequestId(CorrelationId),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransportUnavailable => ErrorKind::TransportUnavailable,
            Self::TransportClosed => ErrorKind::TransportClosed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Remote(message) => ErrorKind::from_message(message),
            Self::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Self::DuplicateRequestId(_) => ErrorKind::Other,
        }
    }

    /// The host reported that the user declined or dismissed a prompt.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::UserCancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_error_text_round_trips_to_kind() {
        let errors = [
            HostError::NoWorkspace,
            HostError::PreconditionFailed("needs a workspace".into()),
            HostError::file_read("a.txt", "not found"),
            HostError::file_write("a.txt", "read-only"),
            HostError::operation("delete failed"),
            HostError::cancelled("declined"),
            HostError::UnknownCommand("renameFile".into()),
            HostError::InvalidPayload {
                command: "getFileContent".into(),
                message: "missing field `path`".into(),
            },
        ];

        for err in errors {
            let remote = BridgeError::Remote(err.to_string());
            assert_eq!(remote.kind(), err.kind(), "{err}");
        }
    }

    #[test]
    fn file_read_message_names_path() {
        let err = HostError::file_read("src/missing.rs", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "FileReadError: failed to read 'src/missing.rs': No such file or directory"
        );
    }

    #[test]
    fn unrecognized_remote_text_is_other() {
        assert_eq!(ErrorKind::from_message("boom"), ErrorKind::Other);
        assert_eq!(BridgeError::DuplicateRequestId(CorrelationId::new(1)).kind(), ErrorKind::Other);
    }

    #[test]
    fn client_errors_have_kinds() {
        assert_eq!(BridgeError::TransportUnavailable.kind(), ErrorKind::TransportUnavailable);
        assert_eq!(
            BridgeError::Timeout {
                command: "deleteFile".into(),
                after: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert!(BridgeError::Remote("UserCancelled: nope".into()).is_cancelled());
        assert_eq!(ErrorKind::UserCancelled.to_string(), "user_cancelled");
    }
}
