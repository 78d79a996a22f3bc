//! Represents a distribution file (sdist, wheel or egg) belonging to a package.

use chrono::{DateTime, Utc};

/// A single distribution file in the index.
///
/// The `Distribution` struct describes the file, not its content bytes; those
/// stay on disk and are streamed on request.
#[derive(Clone, Debug)]
pub struct Distribution {
    /// Normalized name of the owning package.
    pub package: String,

    /// File name as stored on disk (e.g. `foo-1.0.tar.gz`).
    pub filename: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Filesystem modification time.
    pub last_modified: DateTime<Utc>,
}

impl Distribution {
    /// MIME type served for this file.
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.filename)
    }
}

const SDIST_EXTENSIONS: [&str; 6] = [".tar.gz", ".tgz", ".tar.bz2", ".tar.xz", ".zip", ".tar"];

/// Derive the raw project name from a distribution file name.
///
/// - wheels and eggs: `{name}-{version}-...` → the first `-` component
/// - source archives: `{name}-{version}{ext}` → everything before the last
///   `-` that is followed by a version (a component starting with a digit)
///
/// Returns `None` for anything else.
pub fn project_name_from_filename(filename: &str) -> Option<String> {
    if filename.starts_with('.') || filename.contains(['/', '\\']) {
        return None;
    }

    if let Some(stem) = filename
        .strip_suffix(".whl")
        .or_else(|| filename.strip_suffix(".egg"))
    {
        let (name, rest) = stem.split_once('-')?;
        if name.is_empty() || !starts_with_digit(rest) {
            return None;
        }
        return Some(name.to_string());
    }

    let stem = SDIST_EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext))?;
    let (name, _) = stem
        .match_indices('-')
        .map(|(pos, _)| (&stem[..pos], &stem[pos + 1..]))
        .filter(|(_, version)| starts_with_digit(version))
        .last()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// MIME type for a distribution file, by extension.
pub fn content_type_for(filename: &str) -> &'static str {
    if filename.ends_with(".whl") || filename.ends_with(".zip") || filename.ends_with(".egg") {
        "application/zip"
    } else if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        "application/gzip"
    } else if filename.ends_with(".tar.bz2") {
        "application/x-bzip2"
    } else if filename.ends_with(".tar.xz") {
        "application/x-xz"
    } else if filename.ends_with(".tar") {
        "application/x-tar"
    } else {
        "application/octet-stream"
    }
}

fn starts_with_digit(s: &str) -> bool {
    s.bytes().next().is_some_and(|b| b.is_ascii_digit())
}
