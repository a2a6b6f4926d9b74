//! Path shape validation, lexical cleaning and URI composition.
//!
//! Paths in this crate are always POSIX style: absolute paths begin with
//! `/`, location paths end with `/`, file paths do not. Cleaning is
//! purely lexical and never escapes above the root.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::authority::Authority;
use crate::errors::{Result, VfsError};

/// RFC 3986 `userinfo` production: unreserved / sub-delims / ":".
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':');

/// RFC 3986 `reg-name` production: unreserved / sub-delims.
const REG_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// Resolve `.` and `..` segments without touching the filesystem.
///
/// A leading `/` and a trailing `/` survive cleaning; `..` never climbs
/// above the root of an absolute path, so `/a/../../b/` cleans to `/b/`.
pub fn clean(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/') && !path.is_empty();
    let mut stack: Vec<&str> = Vec::new();

    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|s| *s != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            seg => stack.push(seg),
        }
    }

    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    out.push_str(&stack.join("/"));
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    if out.is_empty() {
        out.push('.');
    }
    out
}

pub fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

pub fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

pub fn remove_leading_slash(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Last path segment, ignoring a trailing slash. The basename of `/` is
/// the empty string.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Directory holding a file path, always with a trailing slash:
/// `/a/b.txt` → `/a/`, `/a.txt` → `/`.
pub fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => format!("{}/", &trimmed[..idx]),
    }
}

/// Join a relative path onto a location path and clean the result.
pub fn join(dir: &str, rel: &str) -> String {
    clean(&format!("{}/{}", dir.trim_end_matches('/'), rel))
}

pub fn validate_absolute_file_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.ends_with('/') || basename(&clean(path)).is_empty() {
        return Err(VfsError::BadAbsFilePath {
            path: path.to_string(),
        });
    }
    Ok(())
}

pub fn validate_absolute_location_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || !path.ends_with('/') {
        return Err(VfsError::BadAbsLocationPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

pub fn validate_relative_file_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(VfsError::BadRelFilePath {
            path: path.to_string(),
        });
    }
    Ok(())
}

pub fn validate_relative_location_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || !path.ends_with('/') {
        return Err(VfsError::BadRelLocationPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Percent-encode an authority string for URI composition, encoding the
/// user-info and host segments while leaving the `@` and `:` delimiters
/// between them intact.
pub fn encode_authority(raw: &str) -> String {
    let (userinfo, hostport) = match raw.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, raw),
    };

    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => (h, Some(p)),
        _ => (hostport, None),
    };

    let mut out = String::new();
    if let Some(userinfo) = userinfo {
        out.push_str(&utf8_percent_encode(userinfo, USERINFO).to_string());
        out.push('@');
    }
    out.push_str(&utf8_percent_encode(host, REG_NAME).to_string());
    if let Some(port) = port {
        out.push(':');
        out.push_str(port);
    }
    out
}

/// Compose `scheme://encoded-authority/path` for a file path.
pub fn file_uri(scheme: &str, authority: &Authority, path: &str) -> String {
    format!(
        "{}://{}{}",
        scheme,
        authority.encoded(),
        ensure_leading_slash(path)
    )
}

/// Compose `scheme://encoded-authority/path/` for a location path.
pub fn location_uri(scheme: &str, authority: &Authority, path: &str) -> String {
    format!(
        "{}://{}{}",
        scheme,
        authority.encoded(),
        ensure_trailing_slash(&ensure_leading_slash(path))
    )
}

/// Split a list prefix that may itself contain `/` into its location
/// part (with trailing slash, empty when absent) and the basename
/// prefix to filter on.
pub fn split_prefix(prefix: &str) -> (String, String) {
    match prefix.rfind('/') {
        Some(idx) => (
            prefix[..=idx].to_string(),
            prefix[idx + 1..].to_string(),
        ),
        None => (String::new(), prefix.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resolves_dots_without_escaping_root() {
        assert_eq!(clean("/a/../../b/"), "/b/");
        assert_eq!(clean("/a/./b/../c.txt"), "/a/c.txt");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("//a///b"), "/a/b");
        assert_eq!(clean("a/../b/"), "b/");
    }

    #[test]
    fn slash_helpers_are_idempotent() {
        assert_eq!(ensure_trailing_slash("/a"), "/a/");
        assert_eq!(ensure_trailing_slash("/a/"), "/a/");
        assert_eq!(ensure_leading_slash("a/"), "/a/");
        assert_eq!(ensure_leading_slash("/a/"), "/a/");
        assert_eq!(remove_leading_slash("/a/b"), "a/b");
        assert_eq!(remove_leading_slash("a/b"), "a/b");
    }

    #[test]
    fn basename_and_parent() {
        assert_eq!(basename("/a/b.txt"), "b.txt");
        assert_eq!(basename("/a/b/"), "b");
        assert_eq!(basename("/"), "");
        assert_eq!(parent_dir("/a/b.txt"), "/a/");
        assert_eq!(parent_dir("/a.txt"), "/");
        assert_eq!(parent_dir("/a/b/"), "/a/");
    }

    #[test]
    fn absolute_file_path_validation() {
        assert!(validate_absolute_file_path("/a/b.txt").is_ok());
        assert!(validate_absolute_file_path("a/b.txt").is_err());
        assert!(validate_absolute_file_path("/a/b/").is_err());
        assert!(validate_absolute_file_path("/..").is_err());
    }

    #[test]
    fn relative_path_validation() {
        assert!(validate_relative_file_path("b.txt").is_ok());
        assert!(validate_relative_file_path("/b.txt").is_err());
        assert!(validate_relative_file_path("b/").is_err());
        assert!(validate_relative_file_path("").is_err());

        assert!(validate_relative_location_path("sub/").is_ok());
        assert!(validate_relative_location_path("sub").is_err());
        assert!(validate_relative_location_path("/sub/").is_err());
        assert!(validate_relative_location_path("").is_err());
    }

    #[test]
    fn authority_encoding_keeps_delimiters() {
        assert_eq!(encode_authority("host"), "host");
        assert_eq!(encode_authority("user@host:22"), "user@host:22");
        assert_eq!(
            encode_authority("us er:pa ss@host"),
            "us%20er:pa%20ss@host"
        );
        assert_eq!(encode_authority("bücket"), "b%C3%BCcket");
    }

    #[test]
    fn prefix_splitting() {
        assert_eq!(split_prefix("ba"), ("".to_string(), "ba".to_string()));
        assert_eq!(
            split_prefix("sub/ba"),
            ("sub/".to_string(), "ba".to_string())
        );
        assert_eq!(
            split_prefix("a/b/"),
            ("a/b/".to_string(), "".to_string())
        );
    }
}
