use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("invalid key path: {0}")]
    InvalidKeyPath(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}
