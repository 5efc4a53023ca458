//! File name sanitization and validation

use crate::upload::STAGING_DIR;
use crate::{FsError, Result};

/// Names that would collide with internal directories
const RESERVED_NAMES: &[&str] = &[STAGING_DIR];

/// Reduce an uploaded file name to a safe on-disk name
///
/// Keeps only the last path segment and the characters `[A-Za-z0-9_.-]`.
/// Names that end up empty, made of dots only, or reserved are replaced or
/// prefixed so the result is always a plain, non-special file name.
pub fn sanitize_upload_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut result: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    if RESERVED_NAMES.contains(&result.as_str()) {
        result = format!("_{}", result);
    }

    if result.chars().all(|c| c == '.') {
        result = "_unnamed".to_string();
    }

    result
}

/// Check that `name` is a single plain path component
///
/// Used for rename targets, where the name is joined onto a directory and
/// must not introduce separators or dot segments.
pub fn validate_entry_name(name: &str) -> Result<&str> {
    if name.trim().is_empty() {
        return Err(FsError::InvalidName("name is empty".to_string()));
    }

    if name == "." || name == ".." {
        return Err(FsError::InvalidName(format!("'{}' is not a valid name", name)));
    }

    if name.contains(['/', '\\']) {
        return Err(FsError::InvalidName(format!("'{}' contains a path separator", name)));
    }

    if name.chars().any(char::is_control) {
        return Err(FsError::InvalidName("name contains control characters".to_string()));
    }

    if RESERVED_NAMES.contains(&name) {
        return Err(FsError::InvalidName(format!("'{}' is reserved", name)));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_charset() {
        assert_eq!(sanitize_upload_name("movie.mp4"), "movie.mp4");
        assert_eq!(sanitize_upload_name("My Movie (2010).mkv"), "MyMovie2010.mkv");
        assert_eq!(sanitize_upload_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_upload_name("C:\\Users\\x\\clip.avi"), "clip.avi");
    }

    #[test]
    fn test_sanitize_special_names() {
        assert_eq!(sanitize_upload_name(".."), "_unnamed");
        assert_eq!(sanitize_upload_name("фильм"), "_unnamed");
        assert_eq!(sanitize_upload_name(""), "_unnamed");
        assert_eq!(sanitize_upload_name("__chunks__"), "___chunks__");
        assert_eq!(sanitize_upload_name(".hidden"), ".hidden");
    }

    #[test]
    fn test_validate_entry_name() {
        assert!(validate_entry_name("Season 1").is_ok());
        assert!(validate_entry_name("фото.jpg").is_ok());
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("..").is_err());
        assert!(validate_entry_name("a/b").is_err());
        assert!(validate_entry_name("a\\b").is_err());
        assert!(validate_entry_name("bad\nname").is_err());
        assert!(validate_entry_name(STAGING_DIR).is_err());
    }
}
