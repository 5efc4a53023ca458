//! Application error types

use app_fs::FsError;
use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Request errors (reported to the client) =====
    #[error(transparent)]
    Fs(#[from] FsError),

    // ===== Fatal errors (startup) =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Init(String),
}

impl AppError {
    /// Is this error recoverable?
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::Fs(_))
    }

    /// Is this a fatal error?
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Caused by the request rather than by the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Fs(
                FsError::Confinement(_)
                    | FsError::NotFound(_)
                    | FsError::NotADirectory(_)
                    | FsError::NotAFile(_)
                    | FsError::NameCollision(_)
                    | FsError::InvalidName(_)
                    | FsError::InvalidChunk(_)
            )
        )
    }

    /// Get a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AppError::Fs(FsError::Confinement(_)) => "Access denied".to_string(),
            AppError::Fs(FsError::NotFound(path)) => format!("Not found: {}", path),
            AppError::Fs(FsError::NotADirectory(path)) => format!("Not a folder: {}", path),
            AppError::Fs(FsError::NotAFile(path)) => format!("Not a file: {}", path),
            AppError::Fs(FsError::NameCollision(name)) => {
                format!("A file or folder named '{}' already exists", name)
            }
            AppError::Fs(FsError::Cancelled) => "Cancelled".to_string(),
            AppError::Fs(FsError::Io(_)) => "File system error".to_string(),
            _ => self.to_string(),
        }
    }
}
