//! Directory reader - listings, breadcrumbs and file info

use crate::media::mime_of;
use crate::upload::STAGING_DIR;
use crate::{EncodedPath, FsError, MediaClassifier, MediaKind, PathCodec, Result, VaultPath, HOME_TITLE};
use chrono::{DateTime, Utc};
use humansize::{format_size, FormatSizeOptions, WINDOWS};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Directory or file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

/// One child of a listed directory
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: EncodedPath,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub icon: MediaKind,
    /// MIME major type (`video`, `image`, ...), files only
    pub mime: Option<String>,
    pub full_mime: Option<String>,
    /// Human-readable size, files only
    pub size: Option<String>,
    pub size_bytes: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One step of the trail from the root to the current node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
    pub encoded_path: EncodedPath,
    pub active: bool,
}

/// Folder reference for destination pickers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderLink {
    pub name: String,
    pub encoded_path: EncodedPath,
}

/// Stat-derived metadata of a single entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub human_size: String,
    pub birth_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
    pub accessed_time: Option<DateTime<Utc>>,
    pub changed_time: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
}

/// Reads directories below the root
#[derive(Debug, Clone)]
pub struct DirectoryReader {
    codec: PathCodec,
    classifier: Arc<MediaClassifier>,
}

impl DirectoryReader {
    pub fn new(codec: PathCodec, classifier: Arc<MediaClassifier>) -> Self {
        Self { codec, classifier }
    }

    /// List the immediate children of `dir`
    ///
    /// Directories come first, then files; each group is ordered by
    /// modification time, oldest first. Children that cannot be stat'ed are
    /// skipped.
    pub fn list(&self, dir: &VaultPath) -> Result<Vec<FileEntry>> {
        let metadata = fs::metadata(dir.as_path()).map_err(|e| FsError::from_io(e, dir.relative()))?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory(dir.relative().to_string()));
        }

        let children: Vec<PathBuf> = fs::read_dir(dir.as_path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name() != STAGING_DIR)
            .map(|entry| entry.path())
            .collect();

        let mut entries: Vec<FileEntry> = children
            .par_iter()
            .filter_map(|child| match self.entry_for(child) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry {}: {}", child.display(), e);
                    None
                }
            })
            .collect();

        sort_entries(&mut entries);

        tracing::debug!("Listed {} entries in {}", entries.len(), dir);
        Ok(entries)
    }

    fn entry_for(&self, path: &Path) -> Result<FileEntry> {
        let metadata = fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let encoded = self.codec.encode_absolute(path)?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        if metadata.is_dir() {
            return Ok(FileEntry {
                name,
                path: encoded,
                kind: EntryKind::Directory,
                icon: MediaKind::Other,
                mime: None,
                full_mime: None,
                size: None,
                size_bytes: None,
                modified,
            });
        }

        let classification = self.classifier.classify(path);
        let full_mime = classification.mime.unwrap_or_else(|| "unknown".to_string());
        let major = full_mime.split('/').next().unwrap_or_default().to_string();

        Ok(FileEntry {
            name,
            path: encoded,
            kind: EntryKind::File,
            icon: classification.kind,
            mime: Some(major),
            full_mime: Some(full_mime),
            size: Some(format_bytes(metadata.len())),
            size_bytes: Some(metadata.len()),
            modified,
        })
    }

    /// Trail from the root to `path`; the root is always first and labeled
    /// with the home sentinel, the last crumb is active
    pub fn breadcrumbs(&self, path: &VaultPath) -> Vec<Breadcrumb> {
        let segments: Vec<&str> = path.segments().collect();

        let mut crumbs = Vec::with_capacity(segments.len() + 1);
        crumbs.push(Breadcrumb {
            name: HOME_TITLE.to_string(),
            path: "/".to_string(),
            encoded_path: EncodedPath::root(),
            active: segments.is_empty(),
        });

        let mut acc = String::new();
        for (i, segment) in segments.iter().enumerate() {
            acc.push('/');
            acc.push_str(segment);
            crumbs.push(Breadcrumb {
                name: segment.to_string(),
                path: acc.clone(),
                encoded_path: PathCodec::encode(&acc),
                active: i == segments.len() - 1,
            });
        }

        crumbs
    }

    /// Child directories of `dir`, by name
    pub fn subfolders(&self, dir: &VaultPath) -> Result<Vec<FolderLink>> {
        let metadata = fs::metadata(dir.as_path()).map_err(|e| FsError::from_io(e, dir.relative()))?;
        if !metadata.is_dir() {
            return Err(FsError::NotADirectory(dir.relative().to_string()));
        }

        let mut folders = Vec::new();
        for entry in fs::read_dir(dir.as_path())? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_name() == STAGING_DIR {
                continue;
            }
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let encoded_path = match self.codec.encode_absolute(&entry.path()) {
                Ok(p) => p,
                Err(_) => continue,
            };
            folders.push(FolderLink {
                name: entry.file_name().to_string_lossy().to_string(),
                encoded_path,
            });
        }

        folders.sort_by_key(|f| f.name.to_lowercase());
        Ok(folders)
    }

    /// Metadata for a single entry (symlinks are not followed)
    pub fn file_info(&self, path: &VaultPath) -> Result<FileInfo> {
        let metadata = fs::symlink_metadata(path.as_path()).map_err(|e| FsError::from_io(e, path.relative()))?;

        let mime_type = if metadata.is_file() {
            Some(mime_of(path.as_path()).unwrap_or_else(|| "unknown".to_string()))
        } else {
            None
        };

        Ok(FileInfo {
            name: path.title().to_string(),
            size: metadata.len(),
            human_size: format_bytes(metadata.len()),
            birth_time: to_utc(metadata.created()),
            modified_time: to_utc(metadata.modified()),
            accessed_time: to_utc(metadata.accessed()),
            changed_time: changed_time(&metadata),
            mime_type,
        })
    }
}

/// Directories first, then ascending modification time
fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        if a.is_dir() != b.is_dir() {
            return if a.is_dir() { Ordering::Less } else { Ordering::Greater };
        }
        a.modified.cmp(&b.modified)
    });
}

/// 1024-based size with one decimal (`1.5 KB`, `100.0 B`); zero is `0 B`
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let options = FormatSizeOptions::from(WINDOWS).decimal_places(1).decimal_zeroes(1);
    // WINDOWS labels kilobytes `kB`; every other unit is already upper case
    format_size(bytes, options).replacen("kB", "KB", 1)
}

fn to_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[cfg(unix)]
fn changed_time(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;
    DateTime::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32)
}

#[cfg(not(unix))]
fn changed_time(_metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn reader(root: &Path) -> (DirectoryReader, PathCodec) {
        let codec = PathCodec::new(root);
        (DirectoryReader::new(codec.clone(), Arc::new(MediaClassifier::new())), codec)
    }

    fn touch_at(path: &Path, secs_after_epoch: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_directories_precede_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a_first.txt"), b"x").unwrap();
        fs::create_dir(temp.path().join("zzz_dir")).unwrap();
        fs::write(temp.path().join("b.mp4"), b"xx").unwrap();
        fs::create_dir(temp.path().join("aaa_dir")).unwrap();

        let (reader, codec) = reader(temp.path());
        let entries = reader.list(&codec.root_path()).unwrap();

        assert_eq!(entries.len(), 4);
        assert!(entries[0].is_dir());
        assert!(entries[1].is_dir());
        assert!(!entries[2].is_dir());
        assert!(!entries[3].is_dir());
    }

    #[test]
    fn test_files_ordered_by_modification_time() {
        let temp = TempDir::new().unwrap();
        for (name, secs) in [("new.txt", 3_000), ("old.txt", 1_000), ("mid.txt", 2_000)] {
            let path = temp.path().join(name);
            fs::write(&path, name).unwrap();
            touch_at(&path, secs);
        }

        let (reader, codec) = reader(temp.path());
        let names: Vec<String> = reader
            .list(&codec.root_path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["old.txt", "mid.txt", "new.txt"]);
    }

    #[test]
    fn test_entry_metadata() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("movies")).unwrap();
        fs::write(temp.path().join("movies").join("clip.mkv"), vec![0u8; 1536]).unwrap();

        let (reader, codec) = reader(temp.path());
        let dir = codec.decode("%2Fmovies").unwrap();
        let entries = reader.list(&dir).unwrap();
        let clip = &entries[0];

        assert_eq!(clip.name, "clip.mkv");
        assert_eq!(clip.kind, EntryKind::File);
        assert_eq!(clip.icon, MediaKind::Video);
        assert_eq!(clip.size_bytes, Some(1536));
        assert_eq!(clip.size.as_deref(), Some("1.5 KB"));
        assert_eq!(clip.path.as_str(), "%2Fmovies%2Fclip.mkv");
        assert_eq!(
            codec.decode(clip.path.as_str()).unwrap().as_path(),
            temp.path().join("movies").join("clip.mkv")
        );
    }

    #[test]
    fn test_staging_directory_hidden() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(STAGING_DIR)).unwrap();
        fs::create_dir(temp.path().join("visible")).unwrap();

        let (reader, codec) = reader(temp.path());
        let entries = reader.list(&codec.root_path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "visible");

        let folders = reader.subfolders(&codec.root_path()).unwrap();
        assert_eq!(folders.len(), 1);
    }

    #[test]
    fn test_list_errors() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("file.txt"), b"x").unwrap();

        let (reader, codec) = reader(temp.path());
        let missing = codec.decode("%2Fmissing").unwrap();
        assert!(matches!(reader.list(&missing), Err(FsError::NotFound(_))));

        let file = codec.decode("%2Ffile.txt").unwrap();
        assert!(matches!(reader.list(&file), Err(FsError::NotADirectory(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_skipped() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("song.mp3"), b"a").unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone.mp3"), temp.path().join("broken.mp3")).unwrap();

        let (reader, codec) = reader(temp.path());
        let names: Vec<String> = reader
            .list(&codec.root_path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["song.mp3"]);
    }

    #[test]
    fn test_breadcrumbs() {
        let temp = TempDir::new().unwrap();
        let (reader, codec) = reader(temp.path());

        let root = reader.breadcrumbs(&codec.root_path());
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, HOME_TITLE);
        assert!(root[0].active);

        let nested = reader.breadcrumbs(&codec.resolve("/tv/Show/S01").unwrap());
        let names: Vec<&str> = nested.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![HOME_TITLE, "tv", "Show", "S01"]);
        assert_eq!(nested[2].path, "/tv/Show");
        assert_eq!(nested[2].encoded_path.as_str(), "%2Ftv%2FShow");
        assert!(!nested[0].active);
        assert!(!nested[2].active);
        assert!(nested[3].active);
    }

    #[test]
    fn test_file_info() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("cover.png"), vec![1u8; 10]).unwrap();

        let (reader, codec) = reader(temp.path());
        let info = reader.file_info(&codec.resolve("/cover.png").unwrap()).unwrap();
        assert_eq!(info.name, "cover.png");
        assert_eq!(info.size, 10);
        assert_eq!(info.mime_type.as_deref(), Some("image/png"));
        assert!(info.modified_time.is_some());

        let missing = reader.file_info(&codec.resolve("/nope").unwrap());
        assert!(matches!(missing, Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(100), "100.0 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }
}
