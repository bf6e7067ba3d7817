use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumperError {
    #[error("session rejected by tracker: {0} (renew auth state and re-run)")]
    Session(String),
    #[error("upstream error: {message}")]
    Upstream { message: String, transient: bool },
    #[error("not found upstream: {0}")]
    NotFound(String),
    #[error("failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid export document: {0}")]
    InvalidDocument(String),
}

impl DumperError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            transient: true,
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream {
                transient: true,
                ..
            }
        )
    }

    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }

    pub fn code(&self) -> DumperErrorCode {
        match self {
            Self::Session(_) => DumperErrorCode::SessionRejected,
            Self::Upstream { .. } => DumperErrorCode::UpstreamError,
            Self::NotFound(_) => DumperErrorCode::NotFound,
            Self::Persistence { .. } => DumperErrorCode::PersistenceFailed,
            Self::InvalidDocument(_) => DumperErrorCode::DocumentInvalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumperErrorCode {
    SessionRejected,
    UpstreamError,
    NotFound,
    PersistenceFailed,
    DocumentInvalid,
}

impl DumperErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionRejected => "SESSION_REJECTED",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::PersistenceFailed => "PERSISTENCE_FAILED",
            Self::DocumentInvalid => "DOCUMENT_INVALID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_upstream_errors_are_retryable() {
        assert!(DumperError::transient("503").is_retryable());
        assert!(!DumperError::upstream("bad json").is_retryable());
        assert!(!DumperError::Session("401".into()).is_retryable());
        assert!(!DumperError::NotFound("X-1".into()).is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        let err = DumperError::persistence("/tmp/x", std::io::Error::other("disk full"));
        assert_eq!(err.code().as_str(), "PERSISTENCE_FAILED");
        assert!(err.to_string().contains("/tmp/x"));
    }
}
