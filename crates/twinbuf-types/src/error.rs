//! Error types and handling for twinbuf
//!
//! Every failure inside a transfer session is fatal to that session. The only
//! condition retried transparently is an interrupted system call, and that
//! happens inside the blocking I/O layer, so it never shows up here.

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - the method can be skipped, the run continues
    Low,
    /// Medium severity - the session failed but other methods may still run
    Medium,
    /// High severity - the configuration under test must be aborted
    High,
    /// Critical severity - results can no longer be trusted
    Critical,
}

/// Main error type for twinbuf operations
#[derive(thiserror::Error, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// A write made no progress before the full length was transferred
    #[error("Short write at offset {offset}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Number of bytes the caller asked to write
        expected: usize,
        /// Number of bytes actually written
        written: usize,
        /// File offset the write started at
        offset: u64,
    },

    /// An operating system call failed
    #[error("System error during {operation}: {message}")]
    System {
        /// Operation that was being performed
        operation: String,
        /// Raw OS error code, when the platform reported one
        code: Option<i32>,
        /// Error message from the operating system
        message: String,
    },

    /// The verification pass counted a different number of needle bytes
    #[error("Needle count mismatch: expected {expected}, found {actual}")]
    CountMismatch {
        /// Count from the reference pass
        expected: u64,
        /// Count reported by the method under test
        actual: u64,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// The other side of the handshake stopped because it failed
    #[error("Transfer partner aborted the session")]
    PartnerAborted,

    /// The worker thread panicked before it could report a result
    #[error("Worker thread panicked: {message}")]
    WorkerPanicked {
        /// Panic payload, when it was a string
        message: String,
    },

    /// The requested method is not available on this platform
    #[error("Unsupported on this platform: {operation}")]
    Unsupported {
        /// Name of the unavailable operation
        operation: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Short write
    ShortWrite,
    /// Operating system failure
    System,
    /// Verification failure
    CountMismatch,
    /// Configuration errors
    Config,
    /// Partner side of a session aborted
    PartnerAborted,
    /// Worker thread panic
    WorkerPanicked,
    /// Platform does not support the operation
    Unsupported,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShortWrite { .. } => ErrorKind::ShortWrite,
            Self::System { .. } => ErrorKind::System,
            Self::CountMismatch { .. } => ErrorKind::CountMismatch,
            Self::Config { .. } => ErrorKind::Config,
            Self::PartnerAborted => ErrorKind::PartnerAborted,
            Self::WorkerPanicked { .. } => ErrorKind::WorkerPanicked,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ShortWrite { .. } | Self::System { .. } => ErrorSeverity::Medium,
            Self::Config { .. } => ErrorSeverity::High,
            Self::CountMismatch { .. } | Self::WorkerPanicked { .. } => ErrorSeverity::Critical,
            Self::PartnerAborted | Self::Unsupported { .. } => ErrorSeverity::Low,
        }
    }

    /// Whether the harness may skip the failing method and keep going
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Whether the error ends the whole benchmark run
    pub fn is_fatal(&self) -> bool {
        self.severity() >= ErrorSeverity::High
    }

    /// Whether this error only reports that the other thread failed first
    pub fn is_secondary(&self) -> bool {
        matches!(self, Self::PartnerAborted)
    }

    /// Raw OS error code carried by a [`Error::System`] error
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::System { code, .. } => *code,
            _ => None,
        }
    }

    /// Create a system error for the named operation
    pub fn system<S: Into<String>>(operation: S, error: &std::io::Error) -> Self {
        Self::System {
            operation: operation.into(),
            code: error.raw_os_error(),
            message: error.to_string(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new unsupported-operation error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Keep the more informative of two errors from the same session.
    ///
    /// A real failure always wins over [`Error::PartnerAborted`]; otherwise
    /// the first error is kept.
    pub fn merge(first: Self, second: Self) -> Self {
        if first.is_secondary() && !second.is_secondary() {
            second
        } else {
            first
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::system("io", &error)
    }
}
