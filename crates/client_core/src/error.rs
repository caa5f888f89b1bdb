use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no bearer token available for the pairing API")]
    Unauthenticated,
    #[error("pairing API request timed out")]
    Timeout,
    #[error("pairing API transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("pairing API responded with status {status}{}", describe_api_error(.error))]
    Status {
        status: u16,
        error: Option<ApiError>,
    },
    #[error("failed to decode pairing API response: {0}")]
    Decode(String),
    #[error("invalid pairing API url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl BackendError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Status { error, .. } => error.as_ref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

fn describe_api_error(error: &Option<ApiError>) -> String {
    match error {
        Some(err) => format!(" ({err})"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("sign in required before pairing")]
    AuthenticationRequired,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::ErrorCode;

    #[test]
    fn status_error_includes_api_message_when_present() {
        let err = BackendError::Status {
            status: 404,
            error: Some(ApiError::new(ErrorCode::InvalidCode, "no such code")),
        };
        assert_eq!(
            err.to_string(),
            "pairing API responded with status 404 (InvalidCode: no such code)"
        );
        assert_eq!(err.api_error().map(|e| &e.code), Some(&ErrorCode::InvalidCode));

        let bare = BackendError::Status {
            status: 502,
            error: None,
        };
        assert_eq!(bare.to_string(), "pairing API responded with status 502");
        assert!(bare.api_error().is_none());
    }
}
