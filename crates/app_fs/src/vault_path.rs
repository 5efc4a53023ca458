//! VaultPath - confinement-checked paths and the encoded token clients see
//!
//! Clients never see real filesystem paths. They get an `EncodedPath`: the
//! root-relative POSIX path (`/movies/a.mkv`) percent-encoded as a single
//! token (`%2Fmovies%2Fa.mkv`). `PathCodec` is the only place that turns such
//! a token back into a filesystem location, and it fails closed whenever the
//! result would land outside the root.

use crate::upload::STAGING_DIR;
use crate::{FsError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Display name of the storage root
pub const HOME_TITLE: &str = "Home";

/// Bytes left untouched by the token encoder (the `encodeURIComponent` set)
const TOKEN_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Opaque client-facing path token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedPath(String);

impl EncodedPath {
    /// Token of the storage root (`%2F`)
    pub fn root() -> Self {
        PathCodec::encode("/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EncodedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EncodedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for EncodedPath {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for EncodedPath {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// A location inside the storage root
///
/// Only `PathCodec` constructs these, so holding one means the confinement
/// check has already passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPath {
    /// Absolute path for file system operations
    absolute: PathBuf,

    /// Root-relative POSIX form, always starting with `/`
    relative: String,
}

impl VaultPath {
    /// Get the absolute path for file system operations
    pub fn as_path(&self) -> &Path {
        &self.absolute
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.absolute.clone()
    }

    /// Root-relative form (`/` for the root itself)
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn is_root(&self) -> bool {
        self.relative == "/"
    }

    /// Non-empty segments of the relative path
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.relative.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, `None` for the root
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Display title: last segment, or the home sentinel for the root
    pub fn title(&self) -> &str {
        self.file_name().unwrap_or(HOME_TITLE)
    }

    /// Token to hand back to clients
    pub fn encoded(&self) -> EncodedPath {
        PathCodec::encode(&self.relative)
    }

    /// Whether anything exists here (symlinks are not followed)
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.absolute).is_ok()
    }

    pub fn is_dir(&self) -> bool {
        self.absolute.is_dir()
    }
}

impl AsRef<Path> for VaultPath {
    fn as_ref(&self) -> &Path {
        &self.absolute
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative)
    }
}

/// Converts between client tokens and confined filesystem locations
#[derive(Debug, Clone)]
pub struct PathCodec {
    root: PathBuf,
}

impl PathCodec {
    /// Create a codec confined to `root` (expected to be absolute)
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The root itself as a `VaultPath`
    pub fn root_path(&self) -> VaultPath {
        VaultPath {
            absolute: self.root.clone(),
            relative: "/".to_string(),
        }
    }

    /// Encode a root-relative path into a client token
    ///
    /// Backslashes become `/`, `.` and `..` are resolved lexically (never
    /// above `/`) and a single leading `/` is ensured before the whole string
    /// is percent-encoded as one token.
    pub fn encode(relative: &str) -> EncodedPath {
        let normalized = normalize_posix(&relative.replace('\\', "/"));
        EncodedPath(utf8_percent_encode(&normalized, TOKEN_SAFE).to_string())
    }

    /// Decode a client token into a location inside the root
    pub fn decode(&self, token: &str) -> Result<VaultPath> {
        let decoded = percent_decode_str(token)
            .decode_utf8()
            .map_err(|_| reject(token, "token is not valid UTF-8"))?;
        self.resolve(&decoded)
    }

    /// Resolve an already-decoded root-relative path
    ///
    /// Fails with `Confinement` if `..` segments climb above the root, a
    /// segment is not a plain file name on this platform, or a segment names
    /// the upload staging directory.
    pub fn resolve(&self, relative: &str) -> Result<VaultPath> {
        if relative.contains('\0') {
            return Err(reject(relative, "path contains a NUL byte"));
        }

        let unified = relative.replace('\\', "/");
        let mut segments: Vec<&str> = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(reject(relative, "path climbs above the root"));
                    }
                }
                name => segments.push(name),
            }
        }

        let mut absolute = self.root.clone();
        for name in &segments {
            if *name == STAGING_DIR {
                return Err(reject(relative, "path enters upload staging"));
            }
            let mut components = Path::new(name).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => absolute.push(name),
                _ => return Err(reject(relative, "segment is not a plain name")),
            }
        }

        self.check_confined(&absolute, relative)?;

        Ok(VaultPath {
            absolute,
            relative: join_segments(&segments),
        })
    }

    /// Wrap an absolute path found on disk below the root (listing children,
    /// walk results)
    pub fn locate(&self, absolute: &Path) -> Result<VaultPath> {
        let rest = absolute
            .strip_prefix(&self.root)
            .map_err(|_| reject("", "path is outside the root"))?;

        let mut segments = Vec::new();
        for component in rest.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(reject("", "path is not below the root")),
            }
        }

        Ok(VaultPath {
            absolute: absolute.to_path_buf(),
            relative: join_segments(&segments),
        })
    }

    /// Token for an absolute path below the root
    pub fn encode_absolute(&self, absolute: &Path) -> Result<EncodedPath> {
        self.locate(absolute).map(|p| p.encoded())
    }

    fn check_confined(&self, absolute: &Path, raw: &str) -> Result<()> {
        match absolute.strip_prefix(&self.root) {
            Ok(rest) if rest.components().all(|c| matches!(c, Component::Normal(_))) => Ok(()),
            _ => Err(reject(raw, "path resolves outside the root")),
        }
    }
}

fn reject(raw: &str, reason: &str) -> FsError {
    // The payload is attacker controlled; only its size is logged.
    tracing::warn!(len = raw.len(), reason, "Rejected client path");
    FsError::Confinement(reason.to_string())
}

/// POSIX normalization anchored at `/`: `..` never climbs above the root
fn normalize_posix(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }
    join_segments(&segments)
}

fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::from("/");
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(segment.as_ref());
    }
    out
}
