use chocoo_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The server answered with `ok: false`.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Api { status, .. } => match *status {
                404 => ErrorKind::NotFound,
                409 => ErrorKind::Conflict,
                400..=499 => ErrorKind::Validation,
                _ => ErrorKind::Transient,
            },
            ClientError::Timeout | ClientError::Network(_) | ClientError::Decode(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Text to show the user as is.
    pub fn message(&self) -> &str {
        match self {
            ClientError::Api { message, .. } => message,
            ClientError::Timeout => "Сервер не ответил вовремя. Попробуйте ещё раз",
            ClientError::Network(_) | ClientError::Decode(_) => "Нет связи с сервером",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ClientError {
        ClientError::Api {
            status,
            message: "x".into(),
        }
    }

    #[test]
    fn test_kind_from_status() {
        assert_eq!(api(400).kind(), ErrorKind::Validation);
        assert_eq!(api(403).kind(), ErrorKind::Validation);
        assert_eq!(api(404).kind(), ErrorKind::NotFound);
        assert_eq!(api(409).kind(), ErrorKind::Conflict);
        assert_eq!(api(500).kind(), ErrorKind::Transient);
        assert_eq!(ClientError::Timeout.kind(), ErrorKind::Transient);
    }
}
