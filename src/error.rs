use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures the gateway reports to users or the log.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidLink(String),

    #[error("unable to load {}: {source:#}", path.display())]
    Load {
        path: PathBuf,
        source: anyhow::Error,
    },

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),

    #[error("unable to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_has_empty_body() {
        let response = Error::NotFound.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_are_500() {
        let response = Error::Internal("bad cookie".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn messages() {
        let err = Error::InvalidLink("Not a magnet link!".to_string());
        assert_eq!(err.to_string(), "Not a magnet link!");

        let err = Error::Load {
            path: PathBuf::from("torrent/abc.torrent"),
            source: anyhow::anyhow!("missing entry 'info'"),
        };
        assert_eq!(
            err.to_string(),
            "unable to load torrent/abc.torrent: missing entry 'info'"
        );
    }
}
