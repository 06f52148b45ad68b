//! Resource location resolution
//!
//! Schema documents refer to each other through `schemaLocation` values that
//! are relative to the referring document. This module joins such a location
//! against a base system id. Absolute URLs are joined with the `url` crate;
//! plain paths (and in-memory keys) are joined lexically with `/` separators.

use url::Url;

/// Parse `s` as an absolute URL, ignoring Windows drive letters
fn absolute_url(s: &str) -> Option<Url> {
    match Url::parse(s) {
        Ok(url) if url.scheme().len() > 1 => Some(url),
        _ => None,
    }
}

/// Whether a location is an absolute URL (`http:`, `file:`, `urn:`...)
pub fn is_url(location: &str) -> bool {
    absolute_url(location).is_some()
}

/// Resolve `location` relative to `base`
pub fn join_location(base: Option<&str>, location: &str) -> String {
    let location = location.trim();
    if is_url(location) {
        return location.to_string();
    }
    let Some(base) = base else {
        return normalize_path(location);
    };
    if let Some(base_url) = absolute_url(base) {
        if let Ok(joined) = base_url.join(location) {
            return joined.to_string();
        }
    }
    if location.starts_with('/') {
        return normalize_path(location);
    }
    let dir = match base.rfind('/') {
        Some(idx) => &base[..=idx],
        None => "",
    };
    normalize_path(&format!("{}{}", dir, location))
}

/// Remove `.` segments and fold `..` segments lexically
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_relative_paths() {
        assert_eq!(join_location(Some("main.xsd"), "types.xsd"), "types.xsd");
        assert_eq!(join_location(Some("dir/main.xsd"), "types.xsd"), "dir/types.xsd");
        assert_eq!(join_location(Some("dir/sub/a.xsd"), "../b.xsd"), "dir/b.xsd");
        assert_eq!(join_location(Some("/abs/a.xsd"), "./b.xsd"), "/abs/b.xsd");
        assert_eq!(join_location(None, "./x/../y.xsd"), "y.xsd");
    }

    #[test]
    fn test_join_urls() {
        assert_eq!(
            join_location(Some("http://example.com/s/main.xsd"), "common.xsd"),
            "http://example.com/s/common.xsd"
        );
        assert_eq!(
            join_location(Some("main.xsd"), "http://example.com/x.xsd"),
            "http://example.com/x.xsd"
        );
        assert!(is_url("file:///tmp/a.xsd"));
        assert!(!is_url("C:/schemas/a.xsd"));
    }
}
