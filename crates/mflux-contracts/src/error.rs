use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommanderError {
    /// Rejected request input. Raised before any directory or process side effect.
    #[error("invalid {input}: {message}")]
    Validation { input: String, message: String },

    #[error("directory error at {}: {message}", path.display())]
    Directory {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("unreadable metadata document {}: {message}", path.display())]
    MetadataCorruption { path: PathBuf, message: String },
}

impl CommanderError {
    pub fn validation(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            input: input.into(),
            message: message.into(),
        }
    }

    pub fn directory(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Directory {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn directory_io(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Directory {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

pub type CommanderResult<T> = Result<T, CommanderError>;

#[cfg(test)]
mod tests {
    use super::CommanderError;

    #[test]
    fn validation_message_names_input() {
        let err = CommanderError::validation("--vary-steps", "requires --seed");
        assert_eq!(err.to_string(), "invalid --vary-steps: requires --seed");
        assert!(err.is_validation());
    }

    #[test]
    fn directory_error_keeps_io_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CommanderError::directory_io("/tmp/out", "cannot create run directory", io);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("/tmp/out"));
    }
}
