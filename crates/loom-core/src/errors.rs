//! Error hierarchy.
//!
//! Mirrors spec's error taxonomy (client-input / state / subprocess /
//! storage / auth / protocol) as a top-level [`LoomError`] enum wrapping
//! per-domain structs. Each domain struct carries a machine-readable `code`
//! so the wire relay and RPC layer can surface a stable string to clients
//! without matching on `Debug` output.

use std::fmt;

use thiserror::Error;

/// Top-level error type threaded through every loom crate.
#[derive(Debug, Error)]
pub enum LoomError {
    /// Supervisor/Process registry and lifecycle errors.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Errors from within a single Process's operation contract.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Transcript read/write errors.
    #[error(transparent)]
    Transcript(#[from] TranscriptError),

    /// Wire-relay framing, auth, and crypto errors.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Upload manager errors.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// RPC dispatch errors (unknown path, bad body, ...).
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Catch-all for errors that don't fit a more specific domain.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable description.
        message: String,
    },
}

impl LoomError {
    /// Machine-readable error code, stable across releases.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Supervisor(e) => e.code,
            Self::Process(e) => e.code,
            Self::Transcript(e) => e.code,
            Self::Wire(e) => e.code,
            Self::Upload(e) => e.code,
            Self::Rpc(e) => e.code,
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Build an ad hoc internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Build a domain error struct with a `code`/`message`/optional `source`.
macro_rules! domain_error {
    ($(#[$meta:meta])* $name:ident, $kind_name:ident { $($(#[$vmeta:meta])* $variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Error)]
        #[error("{message}")]
        pub struct $name {
            /// Machine-readable error code.
            pub code: &'static str,
            /// Human-readable description.
            pub message: String,
            /// What kind of operation failed.
            pub kind: $kind_name,
            /// Underlying cause, if any.
            #[source]
            pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
        }

        /// Operation/reason discriminant for [`$name`].
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum $kind_name {
            $($(#[$vmeta])* $variant),+
        }

        impl $kind_name {
            /// Machine-readable error code for this kind.
            #[must_use]
            pub fn code(self) -> &'static str {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $kind_name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{self:?}")
            }
        }

        impl $name {
            /// Construct a new error of the given kind.
            #[must_use]
            pub fn new(kind: $kind_name, message: impl Into<String>) -> Self {
                Self {
                    code: kind.code(),
                    message: message.into(),
                    kind,
                    source: None,
                }
            }

            /// Attach an underlying cause.
            #[must_use]
            pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
                self.source = Some(Box::new(source));
                self
            }
        }
    };
}

domain_error!(
    /// Supervisor registry and lifecycle errors.
    SupervisorError,
    SupervisorErrorKind {
        /// A Process already owns this session.
        SessionBusy => "SESSION_BUSY",
        /// No Process is registered for this session or process id.
        NotFound => "NOT_FOUND",
        /// Spawning the agent subprocess failed.
        SpawnFailed => "SPAWN_FAILED",
        /// Concurrency limit reached.
        Capacity => "MAX_SESSIONS_REACHED",
    }
);

domain_error!(
    /// Errors raised by a Process's public operation contract.
    ProcessError,
    ProcessErrorKind {
        /// `queueMessage` on a terminated Process.
        Terminated => "TERMINATED",
        /// `respondToInput` with no pending request.
        NoPendingRequest => "NO_PENDING_REQUEST",
        /// `respondToInput` with a stale/mismatched request id.
        RequestIdMismatch => "REQUEST_ID_MISMATCH",
        /// `setHold`/similar on a Process that's not active.
        NotActive => "NOT_ACTIVE",
        /// The child process exited unexpectedly.
        ChildExit => "CHILD_EXIT",
        /// A stdio read/write on the child failed.
        StdioError => "STDIO_ERROR",
        /// Spawning the child process failed.
        SpawnFailed => "SPAWN_FAILED",
    }
);

domain_error!(
    /// Transcript log read/write errors.
    TranscriptError,
    TranscriptErrorKind {
        /// Reading the transcript file failed.
        ReadFailed => "READ_FAILED",
        /// Appending to the transcript file failed.
        WriteFailed => "WRITE_FAILED",
        /// A requested session/agent-session file does not exist.
        NotFound => "NOT_FOUND",
    }
);

domain_error!(
    /// Wire-relay protocol, auth, and crypto errors.
    WireError,
    WireErrorKind {
        /// SRP identity unknown or malformed.
        InvalidIdentity => "INVALID_IDENTITY",
        /// SRP client proof did not verify.
        InvalidProof => "INVALID_PROOF",
        /// A resumable session id is unknown or expired.
        SessionExpired => "SESSION_EXPIRED",
        /// `format_byte` not recognized.
        UnknownFormat => "UNKNOWN_FORMAT",
        /// Envelope `version` byte not recognized.
        UnknownVersion => "UNKNOWN_VERSION",
        /// Frame could not be parsed.
        MalformedFrame => "MALFORMED_FRAME",
        /// AEAD decryption failed (wrong key, tampered bytes).
        DecryptFailed => "DECRYPT_FAILED",
        /// Origin not in the configured allow-list.
        ForbiddenOrigin => "FORBIDDEN_ORIGIN",
    }
);

domain_error!(
    /// Upload manager errors.
    UploadError,
    UploadErrorKind {
        /// `writeChunk` offset did not equal `bytesReceived`.
        InvalidOffset => "INVALID_OFFSET",
        /// Declared size exceeds `maxUploadSizeBytes`.
        TooLarge => "TOO_LARGE",
        /// Unknown upload id.
        NotFound => "NOT_FOUND",
        /// An upload id that is already staged was started again.
        AlreadyInUse => "ALREADY_IN_USE",
        /// Underlying file IO failed.
        Io => "IO_ERROR",
    }
);

domain_error!(
    /// RPC dispatch errors.
    RpcError,
    RpcErrorKind {
        /// Unknown `request.path`.
        NotFound => "NOT_FOUND",
        /// Malformed request body.
        BadRequest => "BAD_REQUEST",
        /// Path resolved to a directory outside the configured roots.
        InvalidPath => "INVALID_PATH",
        /// Session already archived.
        AlreadyArchived => "ALREADY_ARCHIVED",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_error_code() {
        let err = SupervisorError::new(SupervisorErrorKind::SessionBusy, "session s1 is busy");
        assert_eq!(err.code, "SESSION_BUSY");
        assert_eq!(err.to_string(), "session s1 is busy");
    }

    #[test]
    fn process_error_with_source() {
        let io_err = std::io::Error::other("pipe closed");
        let err = ProcessError::new(ProcessErrorKind::StdioError, "write failed").with_source(io_err);
        assert_eq!(err.code, "STDIO_ERROR");
        assert!(err.source.is_some());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn loom_error_from_conversions() {
        let sup = SupervisorError::new(SupervisorErrorKind::NotFound, "no such process");
        let err: LoomError = sup.into();
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(matches!(err, LoomError::Supervisor(_)));
    }

    #[test]
    fn loom_error_internal() {
        let err = LoomError::internal("boom");
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn kind_display_matches_debug() {
        assert_eq!(
            ProcessErrorKind::Terminated.to_string(),
            format!("{:?}", ProcessErrorKind::Terminated)
        );
    }

    #[test]
    fn wire_error_kinds_have_distinct_codes() {
        assert_eq!(WireErrorKind::InvalidProof.code(), "INVALID_PROOF");
        assert_eq!(WireErrorKind::ForbiddenOrigin.code(), "FORBIDDEN_ORIGIN");
        assert_ne!(
            WireErrorKind::InvalidProof.code(),
            WireErrorKind::ForbiddenOrigin.code()
        );
    }

    #[test]
    fn upload_error_invalid_offset() {
        let err = UploadError::new(UploadErrorKind::InvalidOffset, "expected 512, got 256");
        assert_eq!(err.code, "INVALID_OFFSET");
    }
}
