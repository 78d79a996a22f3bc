//! Represents a package: a named collection of distribution files.

/// A package as it appears in the index.
///
/// `name` is the directory name found on disk; `normalized` is the PEP 503
/// form used in URLs and for lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    /// Name as stored on disk.
    pub name: String,

    /// Normalized project name (lowercase, separator runs collapsed to `-`).
    pub normalized: String,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let normalized = normalize_name(&name);
        Self { name, normalized }
    }
}

/// Normalize a project name per PEP 503.
///
/// Lowercases ASCII letters and replaces every run of `-`, `_` and `.` with a
/// single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut in_separator = false;

    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                result.push('-');
                in_separator = true;
            }
        } else {
            result.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }

    result
}

/// Check that `name` has the shape of a valid project name (PEP 508):
/// ASCII letters, digits, `-`, `_` and `.`, beginning and ending with a
/// letter or digit.
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last))
            if first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() =>
        {
            bytes
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}
