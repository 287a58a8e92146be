//! Historical content extraction.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::repository::VersionControl;
use crate::{DesignFile, Result, Revision};

/// SHA-256 digest of file bytes, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash a byte sequence.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Hex form of the digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable file content together with its hash.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentBlob {
    bytes: Vec<u8>,
    hash: ContentHash,
}

impl ContentBlob {
    /// Wrap bytes, computing their hash.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = ContentHash::of(&bytes);
        Self { bytes, hash }
    }

    /// Raw file bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Digest of the bytes.
    #[must_use]
    pub const fn hash(&self) -> &ContentHash {
        &self.hash
    }
}

impl fmt::Debug for ContentBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentBlob")
            .field("len", &self.bytes.len())
            .field("hash", &self.hash.short())
            .finish()
    }
}

/// A design file's content at one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// The file exists at the revision.
    Present(ContentBlob),
    /// The file does not exist at the revision. Not an error: it renders as a
    /// blank canvas.
    NotPresent,
}

impl Content {
    /// Hash of the content, if present.
    #[must_use]
    pub const fn hash(&self) -> Option<&ContentHash> {
        match self {
            Self::Present(blob) => Some(blob.hash()),
            Self::NotPresent => None,
        }
    }

    /// Whether the file exists at the revision.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Reads design file bytes at a revision through a [`VersionControl`] source.
pub struct ContentExtractor<'a> {
    source: &'a dyn VersionControl,
}

impl<'a> ContentExtractor<'a> {
    /// Create an extractor over a version-control source.
    #[must_use]
    pub fn new(source: &'a dyn VersionControl) -> Self {
        Self { source }
    }

    /// Content of `file` at `revision`.
    ///
    /// # Errors
    ///
    /// Propagates failures reading from the source; an absent file is
    /// [`Content::NotPresent`], not an error.
    pub fn read(&self, revision: &Revision, file: &DesignFile) -> Result<Content> {
        let content = match self.source.read_blob(revision, &file.path)? {
            Some(bytes) => Content::Present(ContentBlob::new(bytes)),
            None => Content::NotPresent,
        };
        tracing::debug!(
            path = %file.path,
            revision = %revision.short_label(),
            hash = content.hash().map_or("-", ContentHash::short),
            "extracted content"
        );
        Ok(content)
    }
}

impl fmt::Debug for ContentExtractor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentExtractor")
            .field("root", &self.source.root())
            .finish()
    }
}
