//! Media classification by file extension

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "3g2", "avi", "flv", "mkv", "mov", "mp4", "m4v", "mpeg", "mpg", "ogv", "webm",
    "ts", "mts", "m2ts", "rm", "rmvb", "vob", "wmv", "asf", "divx", "xvid",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "m4a", "wma", "ogg", "oga", "alac", "aiff", "ape", "amr",
    "ac3", "dts", "opus", "ra", "ram", "mid", "midi", "au", "pcm", "spx", "caf", "tta",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "svg", "ico", "heic", "heif",
    "raw", "psd", "ai", "eps", "apng", "avif", "jfif", "pjpeg", "pjp", "emf", "wmf", "dds",
    "xbm", "jxl", "exr",
];

const PREVIEW_EXTENSIONS: &[&str] = &["pdf"];

/// Kind of media a file holds, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Preview,
    Other,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
            MediaKind::Preview => "preview",
            MediaKind::Other => "other",
        }
    }

    /// Kinds that get a gallery (same-kind file list) next to the viewer
    pub fn has_gallery(self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio | MediaKind::Image)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            "image" => Ok(MediaKind::Image),
            "preview" => Ok(MediaKind::Preview),
            "other" => Ok(MediaKind::Other),
            other => Err(format!("unknown media kind: {}", other)),
        }
    }
}

/// Result of classifying one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Full MIME type from the extension lookup, informational only
    pub mime: Option<String>,
}

/// Extension -> media kind tables
///
/// The kind comes from these tables only. MIME lookups disagree across
/// platforms for many image and container formats, so they are reported but
/// never used to decide the kind.
#[derive(Debug, Clone)]
pub struct MediaClassifier {
    video: HashSet<&'static str>,
    audio: HashSet<&'static str>,
    image: HashSet<&'static str>,
    preview: HashSet<&'static str>,
}

impl Default for MediaClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClassifier {
    pub fn new() -> Self {
        Self {
            video: VIDEO_EXTENSIONS.iter().copied().collect(),
            audio: AUDIO_EXTENSIONS.iter().copied().collect(),
            image: IMAGE_EXTENSIONS.iter().copied().collect(),
            preview: PREVIEW_EXTENSIONS.iter().copied().collect(),
        }
    }

    /// Classify a file and look up its MIME type
    pub fn classify<P: AsRef<Path>>(&self, path: P) -> Classification {
        let path = path.as_ref();
        Classification {
            kind: self.kind_of(path),
            mime: mime_of(path),
        }
    }

    /// Media kind only, no MIME lookup
    pub fn kind_of<P: AsRef<Path>>(&self, path: P) -> MediaKind {
        let ext = extension_of(path.as_ref());
        let ext = ext.as_str();

        if self.video.contains(ext) {
            MediaKind::Video
        } else if self.audio.contains(ext) {
            MediaKind::Audio
        } else if self.image.contains(ext) {
            MediaKind::Image
        } else if self.preview.contains(ext) {
            MediaKind::Preview
        } else {
            MediaKind::Other
        }
    }

    /// Does the file's extension belong to `kind`'s table?
    pub fn matches<P: AsRef<Path>>(&self, path: P, kind: MediaKind) -> bool {
        let ext = extension_of(path.as_ref());
        let table = match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
            MediaKind::Image => &self.image,
            MediaKind::Preview => &self.preview,
            MediaKind::Other => return self.kind_of(path) == MediaKind::Other,
        };
        table.contains(ext.as_str())
    }
}

/// MIME type guessed from the extension
pub(crate) fn mime_of(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first_raw().map(str::to_string)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_table() {
        let classifier = MediaClassifier::new();
        assert_eq!(classifier.kind_of("movie.mp4"), MediaKind::Video);
        assert_eq!(classifier.kind_of("/x/song.FLAC"), MediaKind::Audio);
        assert_eq!(classifier.kind_of("photo.JPeG"), MediaKind::Image);
        assert_eq!(classifier.kind_of("scan.heic"), MediaKind::Image);
        assert_eq!(classifier.kind_of("book.pdf"), MediaKind::Preview);
        assert_eq!(classifier.kind_of("notes.txt"), MediaKind::Other);
        assert_eq!(classifier.kind_of("README"), MediaKind::Other);
    }

    #[test]
    fn test_mime_is_informational() {
        let classifier = MediaClassifier::new();
        let jpg = classifier.classify("a.jpg");
        assert_eq!(jpg.kind, MediaKind::Image);
        assert_eq!(jpg.mime.as_deref(), Some("image/jpeg"));

        let unknown = classifier.classify("a.zzzunknown");
        assert_eq!(unknown.kind, MediaKind::Other);
        assert_eq!(unknown.mime, None);
    }

    #[test]
    fn test_matches() {
        let classifier = MediaClassifier::new();
        assert!(classifier.matches("a.mkv", MediaKind::Video));
        assert!(!classifier.matches("a.mkv", MediaKind::Audio));
        assert!(classifier.matches("a.bin", MediaKind::Other));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert!("folder".parse::<MediaKind>().is_err());
        assert!(MediaKind::Image.has_gallery());
        assert!(!MediaKind::Preview.has_gallery());
    }
}
