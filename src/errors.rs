use thiserror::Error;

#[derive(Debug, Error)]
pub enum DBError {
    #[error("Corruption: {0}")]
    Corruption(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DBError {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        DBError::Corruption(msg.into())
    }
}
