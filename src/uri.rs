//! URI parsing and backend dispatch.
//!
//! A URI resolves to the registered backend with the longest matching
//! key: bare schemes compete with more specific URI-prefix
//! registrations, and the most specific one wins.

use std::sync::Arc;

use percent_encoding::percent_decode_str;

use crate::backend::{File, FileSystem, Location};
use crate::errors::{Result, VfsError};
use crate::options::FileOption;
use crate::paths;
use crate::registry;

/// A URI decomposed into the pieces dispatch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub is_location: bool,
}

/// Either kind of entity a URI can name.
#[derive(Debug)]
pub enum Entity {
    File(Box<dyn File>),
    Location(Box<dyn Location>),
}

fn invalid(uri: &str, reason: &str) -> VfsError {
    VfsError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    }
}

fn valid_scheme(scheme: &str) -> bool {
    let mut bytes = scheme.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.'))
}

/// Split `scheme://authority/path` into its parts. The authority is
/// percent-decoded back to its raw form; a URI without a path denotes
/// the root location.
pub fn parse_uri(uri: &str) -> Result<ParsedUri> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| invalid(uri, "missing scheme separator"))?;
    if !valid_scheme(scheme) {
        return Err(invalid(uri, "malformed scheme"));
    }

    let (authority, raw_path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let authority = percent_decode_str(authority)
        .decode_utf8()
        .map_err(|_| invalid(uri, "authority is not valid percent-encoded utf-8"))?
        .into_owned();

    let is_location = raw_path.ends_with('/');
    let path = paths::clean(raw_path);

    Ok(ParsedUri {
        scheme: scheme.to_string(),
        authority,
        path,
        is_location,
    })
}

/// Pick the registered backend whose key matches the URI most
/// specifically: the bare scheme, or any registered URI prefix. With
/// several candidates the longest key wins.
fn backend_for(uri: &str, scheme: &str) -> Result<Arc<dyn FileSystem>> {
    let mut best: Option<String> = None;
    for key in registry::registered_schemes() {
        let hit = key == scheme || (key.contains("://") && uri.starts_with(key.as_str()));
        if hit && best.as_ref().is_none_or(|b| key.len() > b.len()) {
            best = Some(key);
        }
    }
    best.and_then(|key| registry::lookup(&key))
        .ok_or_else(|| VfsError::UnknownScheme {
            uri: uri.to_string(),
        })
}

/// Resolve a URI to a `File` or a `Location`, depending on whether its
/// path ends with `/`.
pub fn entity_from_uri(uri: &str) -> Result<Entity> {
    let parsed = parse_uri(uri)?;
    let fs = backend_for(uri, &parsed.scheme)?;
    if parsed.is_location {
        Ok(Entity::Location(
            fs.new_location(&parsed.authority, &parsed.path)?,
        ))
    } else {
        Ok(Entity::File(fs.new_file(
            &parsed.authority,
            &parsed.path,
            &[],
        )?))
    }
}

/// Resolve a file URI. Fails if the path has a trailing slash.
pub fn file_from_uri(uri: &str) -> Result<Box<dyn File>> {
    file_from_uri_with(uri, &[])
}

/// Resolve a file URI, passing options through to the factory.
pub fn file_from_uri_with(uri: &str, opts: &[FileOption]) -> Result<Box<dyn File>> {
    let parsed = parse_uri(uri)?;
    if parsed.is_location {
        return Err(VfsError::BadAbsFilePath { path: parsed.path });
    }
    let fs = backend_for(uri, &parsed.scheme)?;
    fs.new_file(&parsed.authority, &parsed.path, opts)
}

/// Resolve a location URI. Fails unless the path has a trailing slash.
pub fn location_from_uri(uri: &str) -> Result<Box<dyn Location>> {
    let parsed = parse_uri(uri)?;
    if !parsed.is_location {
        return Err(VfsError::BadAbsLocationPath { path: parsed.path });
    }
    let fs = backend_for(uri, &parsed.scheme)?;
    fs.new_location(&parsed.authority, &parsed.path)
}
