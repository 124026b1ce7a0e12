use thiserror::Error;

/// Failures surfaced by secret and policy sinks.
///
/// Publishing is isolated from local issuance: none of these roll back a
/// bundle that was already persisted.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The sink could not be reached.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The sink answered but refused the record.
    #[error("sink rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The sink did not answer within the configured timeout.
    #[error("publish timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// A file-backed sink failed to write.
    #[error("sink I/O failure: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },

    /// The record could not be encoded.
    #[error("failed to encode record: {message}")]
    Encoding { message: String },
}

impl PublishError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn rejected<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Rejected { status, message: message.into() }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    pub fn encoding<S: Into<String>>(message: S) -> Self {
        Self::Encoding { message: message.into() }
    }
}

impl From<std::io::Error> for PublishError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport { message: error.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_includes_status() {
        let error = PublishError::rejected(409, "conflict");
        assert_eq!(error.to_string(), "sink rejected the request with status 409: conflict");
    }

    #[test]
    fn io_errors_convert() {
        let error: PublishError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(error, PublishError::Io { .. }));
    }
}
