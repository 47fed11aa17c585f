use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown layer type: {0}")]
    UnknownLayer(String),

    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),
}
