// SPDX-License-Identifier: MIT
//! Error types shared by the writer and the reader

use std::path::Path;

use thiserror::Error;

/// Broad classification of a [`ContainerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unreadable or truncated storage
    Io,
    /// Corrupt frame, checksum mismatch, length mismatch
    Format,
    /// Bad index list, unknown group, invalid packer input or options
    Configuration,
}

/// Errors that can occur while packing or reading a container
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Group name already set to {current:?}, cannot set it to {attempted:?}")]
    GroupNameAlreadySet { current: String, attempted: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
}

impl ContainerError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// An I/O error prefixed with the path it concerns; the kind is kept
    pub fn io_at(path: &Path, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.display(), err),
        ))
    }

    /// Map this error onto the I/O / format / configuration taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            ContainerError::Io(_) => ErrorCategory::Io,
            ContainerError::Format(_) => ErrorCategory::Format,
            ContainerError::Config(_)
            | ContainerError::InvalidTimestamp(_)
            | ContainerError::GroupNameAlreadySet { .. }
            | ContainerError::ResourceNotFound(_) => ErrorCategory::Configuration,
        }
    }
}

impl From<zip::result::ZipError> for ContainerError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ContainerError::Io(e),
            other => ContainerError::Format(format!("archive: {}", other)),
        }
    }
}

impl From<walkdir::Error> for ContainerError {
    fn from(err: walkdir::Error) -> Self {
        let msg = err.to_string();
        let path = err.path().map(Path::to_path_buf);
        match (err.into_io_error(), path) {
            (Some(io), Some(path)) => ContainerError::io_at(&path, io),
            (Some(io), None) => ContainerError::Io(io),
            (None, _) => ContainerError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let io = ContainerError::from(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        assert_eq!(io.category(), ErrorCategory::Io);
        assert_eq!(ContainerError::format("bad").category(), ErrorCategory::Format);
        assert_eq!(
            ContainerError::config("bad").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            ContainerError::InvalidTimestamp(i64::MIN).category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_io_at_names_path() {
        let err = ContainerError::io_at(
            Path::new("lib/missing.jar"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(err.to_string().contains("lib/missing.jar"));
        let ContainerError::Io(io) = err else {
            panic!("expected an I/O error");
        };
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_zip_io_error_stays_io() {
        let err: ContainerError = zip::result::ZipError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ))
        .into();
        assert!(matches!(err, ContainerError::Io(_)));

        let err: ContainerError = zip::result::ZipError::InvalidArchive("bad").into();
        assert!(matches!(err, ContainerError::Format(_)));
    }
}
