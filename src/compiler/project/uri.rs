//! File URI handling for source files.
//!
//! Only `file:` URIs name source files; network schemes are rejected.
//! Plain POSIX absolute paths and Windows drive-letter paths are accepted
//! as implicit `file:` URIs.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    UnsupportedScheme(String),
    NotAFilePath(String),
}

impl std::fmt::Display for UriError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UriError::UnsupportedScheme(scheme) => {
                write!(f, "unsupported protocol \"{scheme}\" for a source file")
            }
            UriError::NotAFilePath(text) => {
                write!(f, "cannot interpret \"{text}\" as a file path")
            }
        }
    }
}

fn looks_like_windows_drive_path(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

fn scheme_of(text: &str) -> Option<&str> {
    let colon = text.find("://")?;
    let scheme = &text[..colon];
    if scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
    {
        Some(scheme)
    } else {
        None
    }
}

/// Lexically normalize a path: resolve `.` and `..`, unify separators.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Turn a path or URI string into a normalized `file://` URI.
pub fn to_file_uri(text: &str) -> Result<String, UriError> {
    if let Some(scheme) = scheme_of(text) {
        if !scheme.eq_ignore_ascii_case("file") {
            return Err(UriError::UnsupportedScheme(scheme.to_owned()));
        }
        let rest = &text[scheme.len() + "://".len()..];
        let path = normalize_path(Path::new(&rest.replace('\\', "/")));
        return Ok(format!("file://{}", path_to_uri_text(&path)));
    }
    if looks_like_windows_drive_path(text) {
        let path = normalize_path(Path::new(&text.replace('\\', "/")));
        return Ok(format!("file://{}", path_to_uri_text(&path)));
    }
    if text.starts_with('/') {
        let path = normalize_path(Path::new(text));
        return Ok(format!("file://{}", path_to_uri_text(&path)));
    }
    Err(UriError::NotAFilePath(text.to_owned()))
}

fn path_to_uri_text(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        text
    } else {
        // Windows drive letter paths get a leading slash in the URI.
        format!("/{text}")
    }
}

/// The file path a `file:` URI refers to.
pub fn to_file_path(uri: &str) -> Result<PathBuf, UriError> {
    if let Some(scheme) = scheme_of(uri) {
        if !scheme.eq_ignore_ascii_case("file") {
            return Err(UriError::UnsupportedScheme(scheme.to_owned()));
        }
        let rest = &uri[scheme.len() + "://".len()..];
        // A windows-style "/C:/..." URI path maps back to "C:/...".
        if rest.len() >= 3 && looks_like_windows_drive_path(&rest[1..]) {
            return Ok(PathBuf::from(&rest[1..]));
        }
        return Ok(PathBuf::from(rest));
    }
    if looks_like_windows_drive_path(uri) || uri.starts_with('/') {
        return Ok(PathBuf::from(uri));
    }
    Err(UriError::NotAFilePath(uri.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_paths_become_file_uris() {
        assert_eq!(
            to_file_uri("/home/me/project/main.h64").unwrap(),
            "file:///home/me/project/main.h64"
        );
        assert_eq!(
            to_file_uri("/home/me/./project/../main.h64").unwrap(),
            "file:///home/me/main.h64"
        );
    }

    #[test]
    fn windows_drive_paths_are_implicit_file_uris() {
        assert_eq!(
            to_file_uri("C:\\projects\\main.h64").unwrap(),
            "file:///C:/projects/main.h64"
        );
    }

    #[test]
    fn network_schemes_are_rejected() {
        assert!(matches!(
            to_file_uri("https://example.com/main.h64"),
            Err(UriError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn uri_round_trips_to_path() {
        let uri = to_file_uri("/srv/app/mod.h64").unwrap();
        assert_eq!(to_file_path(&uri).unwrap(), PathBuf::from("/srv/app/mod.h64"));
    }

    #[test]
    fn relative_paths_are_not_uris() {
        assert!(to_file_uri("src/main.h64").is_err());
    }
}
