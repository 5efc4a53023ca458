//! Recursive walks: media by kind and search by name
//!
//! All walks are lazy depth-first iterators. Unreadable directories are
//! skipped, staging directories are never entered, and every walk stops at
//! the next entry once its `CancelToken` is cancelled. Walks are not capped;
//! callers stop consuming (`take(n)`) when they have enough.

use crate::upload::STAGING_DIR;
use crate::{CancelToken, EncodedPath, MediaClassifier, MediaKind, PathCodec};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

/// Search result for search-as-you-type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub name: String,
    /// Root-relative path
    pub path: String,
    pub encoded_path: EncodedPath,
}

/// Gallery item: a file of a given media kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub name: String,
    pub path: String,
    pub encoded_path: EncodedPath,
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

/// Depth-first entries below `dir` (not `dir` itself)
fn entries(dir: &Path, cancel: &CancelToken) -> impl Iterator<Item = DirEntry> {
    let cancel = cancel.clone();
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != STAGING_DIR)
        .take_while(move |_| !cancel.is_cancelled())
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Walk skipped an entry: {}", e);
                None
            }
        })
}

/// Files below `dir` whose extension belongs to `kind`
///
/// Only video, audio and image have galleries; other kinds yield nothing.
pub fn walk_by_kind<'a>(
    dir: &Path,
    kind: MediaKind,
    classifier: &'a MediaClassifier,
    cancel: &CancelToken,
) -> Box<dyn Iterator<Item = PathBuf> + 'a> {
    if !kind.has_gallery() {
        return Box::new(std::iter::empty());
    }

    Box::new(
        entries(dir, cancel)
            .filter(|entry| !entry.file_type().is_dir())
            .filter(move |entry| classifier.matches(entry.path(), kind))
            .map(DirEntry::into_path),
    )
}

/// Entries below `dir` whose name contains `query` (case-insensitive)
///
/// Matching directories are yielded and still descended into.
pub fn search_by_name(dir: &Path, query: &str, cancel: &CancelToken) -> impl Iterator<Item = PathBuf> {
    let query = query.to_lowercase();
    entries(dir, cancel)
        .filter(move |entry| entry.file_name().to_string_lossy().to_lowercase().contains(&query))
        .map(DirEntry::into_path)
}

/// Root-wide search producing client-ready results
#[derive(Debug, Clone)]
pub struct RecursiveSearch {
    codec: PathCodec,
    classifier: Arc<MediaClassifier>,
}

impl RecursiveSearch {
    pub fn new(codec: PathCodec, classifier: Arc<MediaClassifier>) -> Self {
        Self { codec, classifier }
    }

    /// Every entry under the root whose name contains `query`
    pub fn search_all<'a>(&'a self, query: &str, cancel: &CancelToken) -> impl Iterator<Item = SearchHit> + 'a {
        search_by_name(self.codec.root(), query, cancel).filter_map(move |path| {
            let located = self.codec.locate(&path).ok()?;
            Some(SearchHit {
                name: located.title().to_string(),
                path: located.relative().to_string(),
                encoded_path: located.encoded(),
            })
        })
    }

    /// Every file of `kind` under the root
    pub fn find_by_kind<'a>(&'a self, kind: MediaKind, cancel: &CancelToken) -> impl Iterator<Item = MediaFile> + 'a {
        walk_by_kind(self.codec.root(), kind, &self.classifier, cancel).filter_map(move |path| {
            let located = self.codec.locate(&path).ok()?;
            Some(MediaFile {
                name: located.title().to_string(),
                path: located.relative().to_string(),
                encoded_path: located.encoded(),
                kind,
            })
        })
    }
}
