use crate::{LocatorError, Result};

const DROPBOX_SCHEME: &str = "dropbox://";

/// Split `uri` into the locator part and an optional destination
///
/// The destination separator is the last `:` that appears after the first `/`
/// of the path, so `http://host:8080/file` keeps its port while
/// `http://host:8080/file:/tmp/` yields the destination `/tmp/`.
pub fn split_destination(uri: &str) -> Result<(&str, Option<&str>)> {
    let authority = uri.find("://").map_or(0, |i| i + 3);
    let Some(path_start) = uri[authority..].find('/').map(|i| authority + i) else {
        return Ok((uri, None));
    };

    match uri.rfind(':') {
        Some(colon) if colon > path_start => {
            let dest = &uri[colon + 1..];
            if dest.is_empty() {
                return Err(LocatorError::MalformedDestination(uri.to_string()));
            }
            Ok((&uri[..colon], Some(dest)))
        }
        _ => Ok((uri, None)),
    }
}

/// Rewrite a `dropbox://` link into its direct-download https form
///
/// Other URIs are returned unchanged.
#[must_use]
pub fn expand_dropbox_url(uri: &str) -> String {
    match uri.strip_prefix(DROPBOX_SCHEME) {
        Some(rest) => format!("https://www.dropbox.com/{rest}?dl=1"),
        None => uri.to_string(),
    }
}

/// Apply a destination suffix to an upstream name, returning `(name, dest)`
///
/// Without a destination the object is saved under its own name. A trailing
/// slash names a directory and keeps the upstream name, anything else is the
/// exact target path.
pub(crate) fn resolve_destination(upstream: String, dest: Option<&str>) -> (String, String) {
    match dest {
        None => (upstream.clone(), upstream),
        Some(dir) if dir.ends_with('/') => {
            let trimmed = dir.trim_end_matches('/');
            let dir = if trimmed.is_empty() { "/" } else { trimmed };
            (upstream, dir.to_string())
        }
        Some(path) => match path.rsplit_once('/') {
            Some(("", file)) => (file.to_string(), "/".to_string()),
            Some((parent, file)) => (file.to_string(), parent.to_string()),
            None => (path.to_string(), ".".to_string()),
        },
    }
}
