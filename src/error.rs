use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {0}")]
    Status(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mac validation failed")]
    Mac,
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("key exchange failed: {0}")]
    Key(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Error::Parse(s.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
