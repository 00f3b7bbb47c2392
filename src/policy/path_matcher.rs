//! Path normalization and prefix matching for policy rules
//!
//! Every rule pattern is a directory prefix: `/sdcard/App` matches `/sdcard/App/x` but
//! not `/sdcard/AppData`. Normalization collapses repeated separators and marks paths
//! that currently resolve to a directory with a trailing separator.

use std::borrow::Cow;
use std::path::Path;

pub const SEPARATOR: char = '/';

/// Collapse runs of `/` into one
fn collapse_separators(path: &str) -> Cow<'_, str> {
    if !path.contains("//") {
        return Cow::Borrowed(path);
    }
    let mut out = String::with_capacity(path.len());
    let mut previous_was_separator = false;
    for c in path.chars() {
        let is_separator = c == SEPARATOR;
        if !(is_separator && previous_was_separator) {
            out.push(c);
        }
        previous_was_separator = is_separator;
    }
    Cow::Owned(out)
}

/// Normalize a path for prefix matching.
///
/// Idempotent. Queries the live filesystem: a path naming an existing directory gains a
/// trailing `/`, so the result for the same input can change as the filesystem does.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut result = collapse_separators(path).into_owned();
    if !result.ends_with(SEPARATOR) && Path::new(&result).is_dir() {
        result.push(SEPARATOR);
    }
    result
}

/// Normalized pattern with a guaranteed trailing separator, `None` for an empty pattern
pub fn directory_prefix(pattern: &str) -> Option<String> {
    let mut prefix = normalize(pattern);
    if prefix.is_empty() {
        return None;
    }
    if !prefix.ends_with(SEPARATOR) {
        prefix.push(SEPARATOR);
    }
    Some(prefix)
}

/// True iff `path`, normalized, lies under the directory prefix `pattern`
pub fn path_matches(path: &str, pattern: &str) -> bool {
    match directory_prefix(pattern) {
        Some(prefix) => normalize(path).starts_with(&prefix),
        None => false,
    }
}

/// Like `path_matches` for a path that is already normalized
pub fn normalized_path_matches(normalized: &str, pattern: &str) -> bool {
    match directory_prefix(pattern) {
        Some(prefix) => normalized.starts_with(&prefix),
        None => false,
    }
}

/// Rewrite `normalized` from under `src` to under `dst`.
///
/// The remainder after the normalized `src` loses one leading separator and is joined to
/// `dst` with exactly one separator; an empty remainder maps to `dst` itself.
pub fn map_prefix(normalized: &str, src: &str, dst: &str) -> String {
    let source = normalize(src);
    let remainder = normalized.strip_prefix(source.as_str()).unwrap_or("");
    let remainder = remainder.strip_prefix(SEPARATOR).unwrap_or(remainder);

    if remainder.is_empty() {
        return dst.to_string();
    }
    let mut mapped = String::with_capacity(dst.len() + remainder.len() + 1);
    mapped.push_str(dst);
    if !mapped.ends_with(SEPARATOR) {
        mapped.push(SEPARATOR);
    }
    mapped.push_str(remainder);
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_collapse_separators() {
        assert_eq!(normalize("/sdcard//App///x.db"), "/sdcard/App/x.db");
        assert_eq!(normalize("//"), "/");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("relative//path"), "relative/path");
    }

    #[test]
    fn test_existing_directory_gains_separator() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        assert_eq!(normalize(&path), format!("{}/", path));

        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();
        let file = file.to_string_lossy().into_owned();
        assert_eq!(normalize(&file), file);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let dir = tempdir().unwrap();
        let base = dir.path().to_string_lossy().into_owned();
        let samples = [
            "".to_string(),
            "/".to_string(),
            "///a//b/".to_string(),
            "/no/such/dir//file".to_string(),
            format!("{}//", base),
            base.clone(),
            format!("{}//child", base),
        ];
        for p in samples.iter() {
            let once = normalize(p);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", p);
        }
    }

    #[test]
    fn test_prefix_matching_is_directory_based() {
        assert!(path_matches("/sdcard/App/cache/x.db", "/sdcard/App"));
        assert!(path_matches("/sdcard/App/cache/x.db", "/sdcard/App/"));
        assert!(path_matches("/sdcard//App/x", "/sdcard/App"));
        assert!(!path_matches("/sdcard/AppData/x", "/sdcard/App"));
        // the prefix itself, when it does not exist as a directory, is not under itself
        assert!(!path_matches("/no/such/App", "/no/such/App"));
    }

    #[test]
    fn test_existing_directory_matches_itself() {
        let dir = tempdir().unwrap();
        let base = dir.path().to_string_lossy().into_owned();
        assert!(path_matches(&base, &base));
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        assert!(!path_matches("/sdcard/x", ""));
        assert!(directory_prefix("").is_none());
    }

    #[test]
    fn test_map_prefix() {
        assert_eq!(
            map_prefix("/sdcard/App/cache/x.db", "/sdcard/App", "/sdcard/Android/data/pkg/files"),
            "/sdcard/Android/data/pkg/files/cache/x.db"
        );
        assert_eq!(
            map_prefix("/sdcard/App/cache/x.db", "/sdcard/App", "/data/files/"),
            "/data/files/cache/x.db"
        );
        assert_eq!(map_prefix("/sdcard/App/", "/sdcard/App", "/dst"), "/dst");
        assert_eq!(map_prefix("/sdcard/App/x", "/sdcard//App", "/dst"), "/dst/x");
    }
}
