use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotifierError>;

/// Failures a poll cycle recovers from at the tag or cycle boundary.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse API response: {0}")]
    Parse(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("failed to deliver notification: {0}")]
    Notify(String),
}

impl From<reqwest::Error> for NotifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NotifierError::Parse(e.to_string())
        } else {
            NotifierError::Network(e.to_string())
        }
    }
}

impl From<redis::RedisError> for NotifierError {
    fn from(e: redis::RedisError) -> Self {
        NotifierError::Persistence(e.to_string())
    }
}
