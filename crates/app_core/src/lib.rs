//! Qloud Core
//!
//! This crate contains:
//! - Configuration
//! - Error types and the boundary `Reply`
//! - The `FileSystem` facade controllers call

pub mod config;
pub mod error;
pub mod facade;
pub mod reply;

pub use config::{AppConfig, StorageConfig, UploadConfig, ROOT_ENV};
pub use error::AppError;
pub use facade::{FileSystem, Resolved, SubfolderView, SweepReport, UploadReceipt};
pub use reply::Reply;
