//! Qloud Sandboxed File System Layer
//!
//! Everything a controller needs to expose one storage root over an untrusted
//! channel:
//! - PathCodec / VaultPath: encoded client tokens <-> confined absolute paths
//! - MediaClassifier: extension based media kinds and MIME lookup
//! - DirectoryReader: listings, breadcrumbs, file info
//! - Search: lazy, cancellable recursive walks
//! - ChunkedUploadAssembler: out-of-order chunk staging and assembly
//! - EntryMutator: create folder, delete, move, rename

mod vault_path;
mod media;
mod browser;
mod search;
mod upload;
mod file_operations;
mod sanitize;
mod cancel;

pub use vault_path::{EncodedPath, PathCodec, VaultPath, HOME_TITLE};
pub use media::{Classification, MediaClassifier, MediaKind};
pub use browser::{format_bytes, Breadcrumb, DirectoryReader, EntryKind, FileEntry, FileInfo, FolderLink};
pub use search::{walk_by_kind, search_by_name, MediaFile, RecursiveSearch, SearchHit};
pub use upload::{ChunkOutcome, ChunkedUploadAssembler, SessionId, DEFAULT_MAX_CHUNKS, STAGING_DIR};
pub use file_operations::{collision_suffix, BatchReport, EntryMutator, ItemOutcome};
pub use sanitize::{sanitize_upload_name, validate_entry_name};
pub use cancel::CancelToken;

use thiserror::Error;

/// File system errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path rejected: {0}")]
    Confinement(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Name already exists: {0}")]
    NameCollision(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl FsError {
    /// Map an I/O error for `relative`, turning a missing entry into `NotFound`
    pub(crate) fn from_io(err: std::io::Error, relative: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(relative.to_string())
        } else {
            FsError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
