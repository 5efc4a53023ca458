//! FileSystem - the operations a controller calls
//!
//! Composes the `app_fs` services over one storage root. Every method takes
//! client tokens, never real paths, and returns data ready to serialize.

use crate::{AppConfig, AppError, StorageConfig};
use app_fs::{
    BatchReport, Breadcrumb, CancelToken, ChunkOutcome, ChunkedUploadAssembler, Classification, DirectoryReader,
    EncodedPath, EntryKind, EntryMutator, FileEntry, FileInfo, FolderLink, MediaClassifier, MediaFile, MediaKind,
    PathCodec, RecursiveSearch, SearchHit, SessionId, VaultPath,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

type Result<T> = std::result::Result<T, AppError>;

/// Bytes escaped inside one URL path segment
const URL_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

/// Everything needed to render one path
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    pub kind: EntryKind,
    pub title: String,
    pub path: EncodedPath,
    pub breadcrumbs: Vec<Breadcrumb>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<FileEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Files of the same media kind, for galleries and playlists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gallery: Option<Vec<MediaFile>>,
}

/// Outcome of one uploaded chunk
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UploadReceipt {
    Waiting {
        session: SessionId,
        received: u32,
        total: u32,
    },
    Complete {
        session: SessionId,
        path: EncodedPath,
        #[serde(rename = "fileInfo")]
        file_info: FileInfo,
    },
}

/// Folder picker contents
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubfolderView {
    pub folders: Vec<FolderLink>,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub current: FolderLink,
}

/// What a cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sessions: usize,
    pub stale_chunks: usize,
}

/// Sandboxed file system over one storage root
pub struct FileSystem {
    codec: PathCodec,
    classifier: Arc<MediaClassifier>,
    reader: DirectoryReader,
    search: RecursiveSearch,
    uploads: ChunkedUploadAssembler,
    mutator: EntryMutator,
    storage: StorageConfig,
    session_ttl: Duration,
}

impl FileSystem {
    /// Open the configured root, creating it if needed
    pub fn open(config: &AppConfig) -> Result<Self> {
        Self::open_at(&config.storage.root_dir(), config)
    }

    /// Open `root` with the limits from `config`
    pub fn open_at(root: &Path, config: &AppConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(root)
            .map_err(|e| AppError::Init(format!("cannot create storage root {}: {}", root.display(), e)))?;
        let root = root
            .canonicalize()
            .map_err(|e| AppError::Init(format!("cannot resolve storage root {}: {}", root.display(), e)))?;

        let codec = PathCodec::new(&root);
        let classifier = Arc::new(MediaClassifier::new());

        tracing::info!("Storage root: {}", root.display());

        Ok(Self {
            reader: DirectoryReader::new(codec.clone(), classifier.clone()),
            search: RecursiveSearch::new(codec.clone(), classifier.clone()),
            uploads: ChunkedUploadAssembler::with_max_chunks(config.upload.max_chunks),
            mutator: EntryMutator::new(codec.clone()),
            codec,
            classifier,
            storage: config.storage.clone(),
            session_ttl: config.upload.session_ttl(),
        })
    }

    pub fn root(&self) -> &Path {
        self.codec.root()
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    /// Render a path: a listing for directories, metadata for files
    pub fn resolve(&self, token: &str, cancel: &CancelToken) -> Result<Resolved> {
        let path = self.codec.decode(token)?;
        if !path.exists() {
            return Err(app_fs::FsError::NotFound(path.relative().to_string()).into());
        }

        let breadcrumbs = self.reader.breadcrumbs(&path);

        if path.is_dir() {
            let entries = self.reader.list(&path)?;
            return Ok(Resolved {
                kind: EntryKind::Directory,
                title: path.title().to_string(),
                path: path.encoded(),
                breadcrumbs,
                entries: Some(entries),
                file_info: None,
                classification: None,
                media_url: None,
                gallery: None,
            });
        }

        let file_info = self.reader.file_info(&path)?;
        let classification = self.classifier.classify(path.as_path());
        let gallery = if classification.kind.has_gallery() {
            Some(self.find_by_kind(classification.kind, cancel)?)
        } else {
            None
        };

        Ok(Resolved {
            kind: EntryKind::File,
            title: path.title().to_string(),
            path: path.encoded(),
            breadcrumbs,
            entries: None,
            file_info: Some(file_info),
            classification: Some(classification),
            media_url: Some(self.media_url(&path)),
            gallery,
        })
    }

    /// First `search_limit` entries whose name contains `query`
    pub fn search(&self, query: &str, cancel: &CancelToken) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let hits: Vec<SearchHit> = self.search.search_all(query, cancel).take(self.storage.search_limit).collect();
        cancel.check()?;
        tracing::debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Files of `kind` under the root, capped at `gallery_limit`
    pub fn find_by_kind(&self, kind: MediaKind, cancel: &CancelToken) -> Result<Vec<MediaFile>> {
        let files = self.search.find_by_kind(kind, cancel).take(self.storage.gallery_limit).collect();
        cancel.check()?;
        Ok(files)
    }

    /// Create folder `name` under `parent`; collisions get a timestamp suffix
    pub fn create_folder(&self, parent: &str, name: &str) -> Result<FolderLink> {
        let created = self.mutator.create_folder(parent, name)?;
        Ok(FolderLink {
            name: created.title().to_string(),
            encoded_path: created.encoded(),
        })
    }

    /// Store one chunk of an upload into `parent`
    pub fn upload_chunk(&self, parent: &str, file_name: &str, index: u32, total: u32, bytes: &[u8]) -> Result<UploadReceipt> {
        let dir = self.codec.decode(parent)?;
        if dir.exists() && !dir.is_dir() {
            return Err(app_fs::FsError::NotADirectory(dir.relative().to_string()).into());
        }

        match self.uploads.save_chunk(dir.as_path(), file_name, index, total, bytes)? {
            ChunkOutcome::Waiting { session, received, total } => Ok(UploadReceipt::Waiting { session, received, total }),
            ChunkOutcome::Assembled { session, path } => {
                let located = self.codec.locate(&path)?;
                let file_info = self.reader.file_info(&located)?;
                Ok(UploadReceipt::Complete {
                    session,
                    path: located.encoded(),
                    file_info,
                })
            }
        }
    }

    /// Delete every target, best effort
    pub fn delete<S: AsRef<str>>(&self, targets: &[S]) -> BatchReport {
        self.mutator.delete(targets)
    }

    /// Folder picker for `token`
    pub fn list_subfolders(&self, token: &str) -> Result<SubfolderView> {
        let dir = self.codec.decode(token)?;
        let folders = self.reader.subfolders(&dir)?;

        Ok(SubfolderView {
            folders,
            breadcrumbs: self.reader.breadcrumbs(&dir),
            current: FolderLink {
                name: dir.title().to_string(),
                encoded_path: dir.encoded(),
            },
        })
    }

    /// Move every target into `dest`, best effort per item
    pub fn move_entries<S: AsRef<str>>(&self, targets: &[S], dest: &str) -> Result<BatchReport> {
        Ok(self.mutator.move_to(targets, dest)?)
    }

    /// Rename `old_name` in `parent`; never overwrites
    pub fn rename(&self, parent: &str, old_name: &str, new_name: &str) -> Result<EncodedPath> {
        Ok(self.mutator.rename(parent, old_name, new_name)?.encoded())
    }

    /// Drop an unfinished upload; `false` if it is not active
    pub fn abandon_upload(&self, session: &str) -> Result<bool> {
        let id: SessionId = session.parse()?;
        Ok(self.uploads.abandon(id))
    }

    /// Discard idle upload sessions and staged chunks older than the TTL
    pub fn sweep_uploads(&self) -> SweepReport {
        SweepReport {
            sessions: self.uploads.sweep(self.session_ttl),
            stale_chunks: self.uploads.purge_stale_staging(self.codec.root(), self.session_ttl),
        }
    }

    fn media_url(&self, path: &VaultPath) -> String {
        let mut url = self.storage.media_url_prefix.trim_end_matches('/').to_string();
        for segment in path.segments() {
            url.push('/');
            url.extend(utf8_percent_encode(segment, URL_SEGMENT));
        }
        url
    }
}
