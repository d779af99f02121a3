//! Top-level error type for a unification run.

use std::fmt;

use crate::config::ConfigError;
use crate::serialization::SerializationError;
use crate::source::SourceError;

#[derive(Debug)]
pub enum UnifyError {
    Config(ConfigError),
    Source(SourceError),
    Output(SerializationError),
}

impl fmt::Display for UnifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnifyError::Config(e) => write!(f, "Configuration error: {}", e),
            UnifyError::Source(e) => write!(f, "Source error: {}", e),
            UnifyError::Output(e) => write!(f, "Output error: {}", e),
        }
    }
}

impl std::error::Error for UnifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UnifyError::Config(e) => Some(e),
            UnifyError::Source(e) => Some(e),
            UnifyError::Output(e) => Some(e),
        }
    }
}

impl From<ConfigError> for UnifyError {
    fn from(err: ConfigError) -> Self {
        UnifyError::Config(err)
    }
}

impl From<SourceError> for UnifyError {
    fn from(err: SourceError) -> Self {
        UnifyError::Source(err)
    }
}

impl From<SerializationError> for UnifyError {
    fn from(err: SerializationError) -> Self {
        UnifyError::Output(err)
    }
}

impl From<std::io::Error> for UnifyError {
    fn from(err: std::io::Error) -> Self {
        UnifyError::Output(SerializationError::IoError(err))
    }
}
