use std::error::Error;
use std::fmt;

/// Validation failures surfaced to clients as HTTP 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThinkingError {
    NotSupported { model: String },
    LevelNotSupported { message: String },
    UnknownLevel { message: String },
}

impl ThinkingError {
    pub fn status_code(&self) -> u16 {
        400
    }
}

impl fmt::Display for ThinkingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThinkingError::NotSupported { model } => {
                write!(f, "thinking not supported for model {model}")
            }
            ThinkingError::LevelNotSupported { message } => write!(f, "{message}"),
            ThinkingError::UnknownLevel { message } => write!(f, "{message}"),
        }
    }
}

impl Error for ThinkingError {}
