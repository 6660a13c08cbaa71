//! Property-path grammar.
//!
//! A path is segments joined by `.`. On an object, a leading `*`, `.` or
//! `this.` roots the remainder at the receiver; a bare dotted key is also
//! receiver-rooted. At the context level the first segment names a
//! registered root.

use crate::KvoError;

/// True when `key` must be treated as a chained path rather than a plain
/// property key.
pub(crate) fn is_path(key: &str) -> bool {
    key.starts_with('*') || key.contains('.')
}

/// Strips the receiver-rooting prefix (`*`, `.` or `this.`), if present.
pub(crate) fn strip_receiver_prefix(path: &str) -> &str {
    if let Some(rest) = path.strip_prefix('*') {
        rest
    } else if let Some(rest) = path.strip_prefix("this.") {
        rest
    } else if let Some(rest) = path.strip_prefix('.') {
        rest
    } else {
        path
    }
}

/// Splits a path into non-empty segments.
pub(crate) fn parse_segments(path: &str) -> Result<Vec<String>, KvoError> {
    if path.is_empty() {
        return Err(KvoError::MalformedPath(path.to_owned()));
    }
    let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
    if segments.iter().any(String::is_empty) {
        return Err(KvoError::MalformedPath(path.to_owned()));
    }
    Ok(segments)
}

/// Splits a context-level path into `(root name, remainder)`.
pub(crate) fn split_root(path: &str) -> Result<(&str, &str), KvoError> {
    match path.split_once('.') {
        Some((root, rest)) if !root.is_empty() && !rest.is_empty() => Ok((root, rest)),
        _ => Err(KvoError::MalformedPath(path.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_stripping() {
        assert_eq!(strip_receiver_prefix("*a.b"), "a.b");
        assert_eq!(strip_receiver_prefix("this.a.b"), "a.b");
        assert_eq!(strip_receiver_prefix(".a"), "a");
        assert_eq!(strip_receiver_prefix("a.b"), "a.b");
    }

    #[test]
    fn segment_validation() {
        assert_eq!(parse_segments("a.b.c").expect("valid path"), ["a", "b", "c"]);
        assert!(parse_segments("").is_err());
        assert!(parse_segments("a..b").is_err());
        assert!(parse_segments(".a").is_err());
    }

    #[test]
    fn root_splitting() {
        let (root, rest) = split_root("app.controller.name").expect("valid path");
        assert_eq!(root, "app");
        assert_eq!(rest, "controller.name");
        assert!(split_root("app").is_err());
        assert!(split_root("app.").is_err());
    }
}
