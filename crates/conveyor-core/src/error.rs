use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConveyorError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ConveyorError::Config(_) => "CONFIG_ERROR",
            ConveyorError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConveyorError>;
