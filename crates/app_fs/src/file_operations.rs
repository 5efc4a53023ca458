//! Entry mutations: create folder, delete, move, rename
//!
//! Every target arrives as a client token and goes through `PathCodec`
//! before anything touches the disk. Batch operations (delete, move) keep
//! going past failing items and report each item separately.

use crate::sanitize::validate_entry_name;
use crate::{EncodedPath, FsError, PathCodec, Result, VaultPath};
use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Result for one item of a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    /// The token as the client sent it
    pub item: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<EncodedPath>,
    /// The item was copied instead of moved (move into its own subtree)
    pub copied: bool,
    /// The source still exists after the operation
    pub source_retained: bool,
}

impl ItemOutcome {
    fn done(item: &str, destination: Option<EncodedPath>) -> Self {
        Self {
            item: item.to_string(),
            ok: true,
            error: None,
            destination,
            copied: false,
            source_retained: false,
        }
    }

    fn failed(item: &str, error: &FsError) -> Self {
        Self {
            item: item.to_string(),
            ok: false,
            error: Some(error.to_string()),
            destination: None,
            copied: false,
            source_retained: true,
        }
    }
}

/// Per-item results of a batch operation plus totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub items: Vec<ItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    fn push(&mut self, outcome: ItemOutcome) {
        if outcome.ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(outcome);
    }

    pub fn all_ok(&self) -> bool {
        self.failed == 0
    }

    /// Human-readable summary, e.g. "Moved 2 of 3 items, 1 failed"
    pub fn summary(&self, action: &str) -> String {
        if self.failed == 0 {
            format!("{} {} item(s)", action, self.succeeded)
        } else {
            format!(
                "{} {} of {} items, {} failed",
                action,
                self.succeeded,
                self.items.len(),
                self.failed
            )
        }
    }
}

/// Suffix used to disambiguate a moved entry: `DD-MM-YY_HH-MM-SS`
pub fn collision_suffix<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format("%d-%m-%y_%H-%M-%S").to_string()
}

/// Mutates entries below the root
#[derive(Debug, Clone)]
pub struct EntryMutator {
    codec: PathCodec,
}

impl EntryMutator {
    pub fn new(codec: PathCodec) -> Self {
        Self { codec }
    }

    /// Create folder `name` under `parent`
    ///
    /// `name` may contain `/` to create intermediate folders. An existing
    /// entry of the same name is never reused: the new folder gets a
    /// timestamp suffix instead.
    pub fn create_folder(&self, parent: &str, name: &str) -> Result<VaultPath> {
        let parent = self.codec.decode(parent)?;

        let name = name.trim();
        let mut segments = name.split(['/', '\\']).filter(|s| !s.is_empty()).peekable();
        if segments.peek().is_none() {
            return Err(FsError::InvalidName("folder name is empty".to_string()));
        }
        for segment in segments {
            validate_entry_name(segment)?;
        }

        let target = self.codec.resolve(&format!("{}/{}", parent.relative(), name))?;
        let mut path = target.to_path_buf();
        if fs::symlink_metadata(&path).is_ok() {
            let suffix = format!(" - ({})", Local::now().timestamp_millis());
            path = free_name(&path, &suffix);
        }

        fs::create_dir_all(&path)?;
        tracing::info!("Created directory: {}", path.display());

        self.codec.locate(&path)
    }

    /// Delete every target, best effort
    ///
    /// Directories are removed recursively; symlinks are unlinked, never
    /// followed. Invalid or failing items are reported and skipped.
    pub fn delete<S: AsRef<str>>(&self, targets: &[S]) -> BatchReport {
        let mut report = BatchReport::default();

        for token in targets {
            let token = token.as_ref();
            match self.delete_one(token) {
                Ok(()) => report.push(ItemOutcome::done(token, None)),
                Err(e) => {
                    tracing::warn!("Delete skipped an item: {}", e);
                    report.push(ItemOutcome::failed(token, &e));
                }
            }
        }

        report
    }

    fn delete_one(&self, token: &str) -> Result<()> {
        let path = self.codec.decode(token)?;
        if path.is_root() {
            return Err(FsError::Confinement("the root cannot be deleted".to_string()));
        }

        let metadata = fs::symlink_metadata(path.as_path()).map_err(|e| FsError::from_io(e, path.relative()))?;
        if metadata.is_dir() {
            fs::remove_dir_all(path.as_path())?;
        } else {
            fs::remove_file(path.as_path())?;
        }

        tracing::info!("Deleted: {}", path);
        Ok(())
    }

    /// Move every target into `dest`, best effort
    ///
    /// An invalid destination fails the whole call. Per target: a name that
    /// already exists in `dest` gets a `_(DD-MM-YY_HH-MM-SS)` suffix, and a
    /// target that contains `dest` is copied instead (the source stays).
    pub fn move_to<S: AsRef<str>>(&self, targets: &[S], dest: &str) -> Result<BatchReport> {
        let dest = self.codec.decode(dest)?;
        let mut report = BatchReport::default();

        for token in targets {
            let token = token.as_ref();
            match self.move_one(token, &dest) {
                Ok(outcome) => report.push(outcome),
                Err(e) => {
                    tracing::warn!("Move skipped an item: {}", e);
                    report.push(ItemOutcome::failed(token, &e));
                }
            }
        }

        Ok(report)
    }

    fn move_one(&self, token: &str, dest: &VaultPath) -> Result<ItemOutcome> {
        let source = self.codec.decode(token)?;
        let name = match source.file_name() {
            Some(name) => name.to_string(),
            None => return Err(FsError::Confinement("the root cannot be moved".to_string())),
        };
        fs::symlink_metadata(source.as_path()).map_err(|e| FsError::from_io(e, source.relative()))?;

        let self_move = dest.as_path().starts_with(source.as_path());

        let mut target = dest.as_path().join(&name);
        if fs::symlink_metadata(&target).is_ok() {
            let suffix = format!("_({})", collision_suffix(&Local::now()));
            target = free_name(&target, &suffix);
        }
        let destination = self.codec.encode_absolute(&target)?;

        if self_move {
            copy_recursive(source.as_path(), &target, &target)?;
            tracing::info!("Copied into own subtree: {} -> {}", source.as_path().display(), target.display());
            return Ok(ItemOutcome {
                copied: true,
                source_retained: true,
                ..ItemOutcome::done(token, Some(destination))
            });
        }

        fs::create_dir_all(dest.as_path())?;
        rename_or_copy(source.as_path(), &target)?;
        Ok(ItemOutcome::done(token, Some(destination)))
    }

    /// Rename `old_name` in `parent` to `new_name`
    ///
    /// Fails with `NotFound` if the source is missing and `NameCollision` if
    /// the new name is taken; never overwrites.
    pub fn rename(&self, parent: &str, old_name: &str, new_name: &str) -> Result<VaultPath> {
        let dir = self.codec.decode(parent)?;
        let old_name = validate_entry_name(old_name)?;
        let new_name = validate_entry_name(new_name)?;

        let from = self.codec.resolve(&format!("{}/{}", dir.relative(), old_name))?;
        let to = self.codec.resolve(&format!("{}/{}", dir.relative(), new_name))?;

        if !from.exists() {
            return Err(FsError::NotFound(from.relative().to_string()));
        }
        if to.exists() {
            return Err(FsError::NameCollision(new_name.to_string()));
        }

        fs::rename(from.as_path(), to.as_path())?;
        tracing::info!("Renamed: {} -> {}", from, to);

        Ok(to)
    }
}

/// First free sibling of `path` named `{name}{suffix}`, then `{name}{suffix}-2`, ...
fn free_name(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut candidate = path.with_file_name(format!("{}{}", name, suffix));
    let mut n = 1;
    while fs::symlink_metadata(&candidate).is_ok() {
        n += 1;
        candidate = path.with_file_name(format!("{}{}-{}", name, suffix, n));
    }
    candidate
}

/// Rename, falling back to copy + delete across filesystems
fn rename_or_copy(source: &Path, target: &Path) -> Result<()> {
    match fs::rename(source, target) {
        Ok(()) => {
            tracing::info!("Moved: {} -> {}", source.display(), target.display());
            Ok(())
        }
        Err(e) if is_cross_device(&e) => {
            tracing::info!("Cross-filesystem move, using copy+delete: {} -> {}", source.display(), target.display());
            copy_recursive(source, target, target)?;
            if fs::symlink_metadata(source)?.is_dir() {
                fs::remove_dir_all(source)?;
            } else {
                fs::remove_file(source)?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// Unix: EXDEV = 18, Windows: ERROR_NOT_SAME_DEVICE = 17
fn is_cross_device(e: &std::io::Error) -> bool {
    match e.raw_os_error() {
        Some(18) => cfg!(unix),
        Some(17) => cfg!(windows),
        _ => false,
    }
}

/// Recursively copy `src` to `dst`, never descending into `guard`
///
/// `guard` is the copy's own destination, which lives inside `src` when an
/// entry is copied into its own subtree.
fn copy_recursive(src: &Path, dst: &Path, guard: &Path) -> Result<()> {
    if !fs::metadata(src)?.is_dir() {
        fs::copy(src, dst)?;
        return Ok(());
    }

    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        if src_path == guard {
            continue;
        }
        let dst_path = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_recursive(&src_path, &dst_path, guard)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, EntryMutator) {
        let temp = TempDir::new().unwrap();
        let mutator = EntryMutator::new(PathCodec::new(temp.path()));
        (temp, mutator)
    }

    fn token(relative: &str) -> String {
        PathCodec::encode(relative).into_string()
    }

    fn child_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_create_folder_never_collides() {
        let (temp, ops) = setup();

        let first = ops.create_folder("%2F", "Movies").unwrap();
        let second = ops.create_folder("%2F", "Movies").unwrap();

        assert_ne!(first, second);
        assert_eq!(first.relative(), "/Movies");
        assert!(second.title().starts_with("Movies - ("));
        assert_eq!(child_names(temp.path()).len(), 2);
    }

    #[test]
    fn test_create_folder_nested_and_invalid() {
        let (temp, ops) = setup();

        let nested = ops.create_folder(&token("/"), "tv/Show/S01").unwrap();
        assert!(temp.path().join("tv/Show/S01").is_dir());
        assert_eq!(nested.relative(), "/tv/Show/S01");

        assert!(matches!(ops.create_folder("%2F", "../escape"), Err(FsError::InvalidName(_))));
        assert!(matches!(ops.create_folder("%2F", "   "), Err(FsError::InvalidName(_))));
        assert!(matches!(ops.create_folder("..%2F..", "x"), Err(FsError::Confinement(_))));
    }

    #[test]
    fn test_rename_never_overwrites() {
        let (temp, ops) = setup();
        fs::write(temp.path().join("x.txt"), b"x").unwrap();
        fs::write(temp.path().join("y.txt"), b"y").unwrap();

        let result = ops.rename("%2F", "x.txt", "y.txt");
        assert!(matches!(result, Err(FsError::NameCollision(_))));
        assert_eq!(fs::read(temp.path().join("x.txt")).unwrap(), b"x");
        assert_eq!(fs::read(temp.path().join("y.txt")).unwrap(), b"y");

        let renamed = ops.rename("%2F", "x.txt", "z.txt").unwrap();
        assert_eq!(renamed.relative(), "/z.txt");
        assert!(!temp.path().join("x.txt").exists());
        assert_eq!(fs::read(temp.path().join("z.txt")).unwrap(), b"x");
    }

    #[test]
    fn test_rename_errors() {
        let (temp, ops) = setup();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();

        assert!(matches!(ops.rename("%2F", "missing", "b"), Err(FsError::NotFound(_))));
        assert!(matches!(ops.rename("%2F", "a.txt", "../b"), Err(FsError::InvalidName(_))));
        assert!(matches!(ops.rename("%2F..", "a.txt", "b"), Err(FsError::Confinement(_))));
    }

    #[test]
    fn test_delete_best_effort() {
        let (temp, ops) = setup();
        fs::create_dir_all(temp.path().join("dir/inner")).unwrap();
        fs::write(temp.path().join("dir/inner/f.txt"), b"x").unwrap();
        fs::write(temp.path().join("file.txt"), b"x").unwrap();

        let report = ops.delete(&[
            token("/dir"),
            "..%2F..%2Fetc".to_string(),
            token("/missing"),
            token("/file.txt"),
        ]);

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert!(!report.items[1].ok);
        assert!(report.items[1].error.is_some());
        assert!(!temp.path().join("dir").exists());
        assert!(!temp.path().join("file.txt").exists());
        assert_eq!(report.summary("Deleted"), "Deleted 2 of 4 items, 2 failed");
    }

    #[test]
    fn test_delete_refuses_root() {
        let (temp, ops) = setup();
        fs::write(temp.path().join("keep.txt"), b"x").unwrap();

        let report = ops.delete(&["%2F"]);
        assert_eq!(report.failed, 1);
        assert!(temp.path().join("keep.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_does_not_follow_symlinks() {
        let (temp, ops) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("precious.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        let report = ops.delete(&[token("/link")]);
        assert!(report.all_ok());
        assert!(fs::symlink_metadata(temp.path().join("link")).is_err());
        assert!(outside.path().join("precious.txt").exists());
    }

    #[test]
    fn test_move_with_collision_suffix() {
        let (temp, ops) = setup();
        fs::create_dir_all(temp.path().join("dest")).unwrap();
        fs::write(temp.path().join("dest/a.txt"), b"old").unwrap();
        fs::write(temp.path().join("a.txt"), b"new").unwrap();
        fs::write(temp.path().join("b.txt"), b"b").unwrap();

        let report = ops
            .move_to(&[token("/a.txt"), token("/b.txt"), token("/ghost")], &token("/dest"))
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(fs::read(temp.path().join("dest/a.txt")).unwrap(), b"old");
        assert!(temp.path().join("dest/b.txt").exists());
        assert!(!temp.path().join("a.txt").exists());

        let renamed: Vec<String> = child_names(&temp.path().join("dest"))
            .into_iter()
            .filter(|n| n.starts_with("a.txt_("))
            .collect();
        assert_eq!(renamed.len(), 1);
        assert!(!report.items[0].copied);
    }

    #[test]
    fn test_move_into_own_subtree_copies() {
        let (temp, ops) = setup();
        fs::create_dir_all(temp.path().join("A/sub")).unwrap();
        fs::write(temp.path().join("A/file.txt"), b"data").unwrap();

        let report = ops.move_to(&[token("/A")], &token("/A/sub")).unwrap();

        assert!(report.all_ok());
        let item = &report.items[0];
        assert!(item.copied);
        assert!(item.source_retained);
        assert_eq!(item.destination.as_ref().unwrap().as_str(), "%2FA%2Fsub%2FA");

        assert_eq!(fs::read(temp.path().join("A/file.txt")).unwrap(), b"data");
        assert_eq!(fs::read(temp.path().join("A/sub/A/file.txt")).unwrap(), b"data");
        assert!(temp.path().join("A/sub/A/sub").is_dir());
        assert!(!temp.path().join("A/sub/A/sub/A").exists());
    }

    #[test]
    fn test_move_creates_destination_and_rejects_bad_dest() {
        let (temp, ops) = setup();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();

        let report = ops.move_to(&[token("/a.txt")], &token("/new/place")).unwrap();
        assert!(report.all_ok());
        assert!(temp.path().join("new/place/a.txt").exists());

        assert!(matches!(
            ops.move_to(&[token("/new")], "..%2F.."),
            Err(FsError::Confinement(_))
        ));

        let root_move = ops.move_to(&["%2F"], &token("/new")).unwrap();
        assert_eq!(root_move.failed, 1);
    }

    #[test]
    fn test_collision_suffix_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(collision_suffix(&at), "05-03-24_07-08-09");
    }
}
