//! Project key derivation.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

/// Longest slug kept in front of the checksum.
const SLUG_MAX: usize = 24;

/// Checksum bytes rendered as hex after the slug.
const CHECKSUM_BYTES: usize = 6;

/// Stable namespace component derived from an absolute project path.
///
/// Safe as a directory name and as a colon-delimited key segment: it only
/// contains lowercase ASCII alphanumerics and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectKey(String);

impl ProjectKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the project key for `path`.
///
/// The key is `<slug>-<checksum>`: a readable slug of the final path
/// component followed by a truncated SHA-256 of the whole normalised path.
/// No filesystem access is performed.
#[must_use]
pub fn derive_project_key(path: &Path) -> ProjectKey {
    let normalized: PathBuf = path.components().collect();
    let full = normalized.to_string_lossy();

    let digest = Sha256::digest(full.as_bytes());
    let checksum = hex::encode(&digest[..CHECKSUM_BYTES]);

    let slug = normalized
        .file_name()
        .map(|name| slugify(&name.to_string_lossy()))
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| "root".to_string());

    ProjectKey(format!("{slug}-{checksum}"))
}

fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len().min(SLUG_MAX));
    let mut pending_dash = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
            if slug.len() >= SLUG_MAX {
                break;
            }
        } else {
            pending_dash = true;
        }
    }

    slug
}
