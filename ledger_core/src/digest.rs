//! Object digests: a tag byte followed by inline content or a content hash.
//!
//! ```text
//! 0x00  1   tag: bit 0 = inline, bit 1 = index piece, bit 2 = tree node
//! 0x01  ... inline content (<= 32 bytes) or 32-byte BLAKE3 hash
//! ```
//!
//! All other tag bits must be zero. Whether content is inlined is decided
//! here and nowhere else: content no longer than the hash is embedded.

use crate::error::{Error, Result};
use crate::hash::{HASH_SIZE, Hash};
use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::fmt;

/// Content up to this many bytes is stored inside the digest itself.
pub const INLINE_THRESHOLD: usize = HASH_SIZE;

/// Size of a serialized non-inline digest.
pub const HASHED_DIGEST_SIZE: usize = HASH_SIZE + 1;

/// Largest serialized digest of either kind.
pub const MAX_DIGEST_SIZE: usize = HASHED_DIGEST_SIZE;

const INLINE_BIT: u8 = 1 << 0;
const INDEX_BIT: u8 = 1 << 1;
const TREE_NODE_BIT: u8 = 1 << 2;
const KNOWN_BITS: u8 = INLINE_BIT | INDEX_BIT | TREE_NODE_BIT;

/// Role of a piece inside the content tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceType {
    /// A leaf holding raw content bytes.
    Chunk,
    /// An internal node holding a file index.
    Index,
}

/// What the logical object rooted at a digest represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// Opaque content.
    Blob,
    /// A serialized B-tree node.
    TreeNode,
}

impl PieceType {
    /// Get the string name of this piece type.
    pub fn as_str(&self) -> &'static str {
        match self {
            PieceType::Chunk => "chunk",
            PieceType::Index => "index",
        }
    }
}

impl ObjectType {
    /// Get the string name of this object type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::TreeNode => "tree_node",
        }
    }
}

/// Decoded view of a digest's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectDigestInfo {
    pub piece_type: PieceType,
    pub object_type: ObjectType,
    pub inlined: bool,
}

impl ObjectDigestInfo {
    /// Whether the content is embedded in the digest.
    pub fn is_inlined(&self) -> bool {
        self.inlined
    }
}

/// The content part of a digest.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum DigestContent {
    /// Literal content, at most `INLINE_THRESHOLD` bytes.
    Inline(Bytes),
    /// BLAKE3 hash of the content.
    Hashed(Hash),
}

/// Content-derived identifier of a piece.
///
/// Only [`ObjectDigest::compute`] and [`ObjectDigest::from_bytes`] build
/// digests, so an `ObjectDigest` value always satisfies the size and tag
/// invariants.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectDigest {
    piece_type: PieceType,
    object_type: ObjectType,
    content: DigestContent,
}

impl ObjectDigest {
    /// Compute the digest of `content`.
    pub fn compute(piece_type: PieceType, object_type: ObjectType, content: &[u8]) -> Self {
        let content = if content.len() <= INLINE_THRESHOLD {
            DigestContent::Inline(Bytes::copy_from_slice(content))
        } else {
            DigestContent::Hashed(Hash::hash_bytes(content))
        };
        Self {
            piece_type,
            object_type,
            content,
        }
    }

    /// Parse and validate a serialized digest.
    ///
    /// Rejects empty input, unknown tag bits, oversized inline content and
    /// hashed digests of the wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::data_integrity("Empty object digest"))?;

        if tag & !KNOWN_BITS != 0 {
            return Err(Error::data_integrity(format!(
                "Unknown bits set in digest tag: {:#04x}",
                tag
            )));
        }

        let piece_type = if tag & INDEX_BIT != 0 {
            PieceType::Index
        } else {
            PieceType::Chunk
        };
        let object_type = if tag & TREE_NODE_BIT != 0 {
            ObjectType::TreeNode
        } else {
            ObjectType::Blob
        };

        let content = if tag & INLINE_BIT != 0 {
            if rest.len() > INLINE_THRESHOLD {
                return Err(Error::data_integrity(format!(
                    "Inline digest content too long: {} bytes (max {})",
                    rest.len(),
                    INLINE_THRESHOLD
                )));
            }
            DigestContent::Inline(Bytes::copy_from_slice(rest))
        } else {
            if rest.len() != HASH_SIZE {
                return Err(Error::data_integrity(format!(
                    "Hashed digest has {} bytes (expected {})",
                    rest.len(),
                    HASH_SIZE
                )));
            }
            DigestContent::Hashed(Hash::from_slice(rest)?)
        };

        Ok(Self {
            piece_type,
            object_type,
            content,
        })
    }

    /// Whether `bytes` is a well-formed serialized digest.
    pub fn is_valid(bytes: &[u8]) -> bool {
        Self::from_bytes(bytes).is_ok()
    }

    /// The tag byte.
    pub fn tag(&self) -> u8 {
        let mut tag = 0;
        if self.is_inlined() {
            tag |= INLINE_BIT;
        }
        if self.piece_type == PieceType::Index {
            tag |= INDEX_BIT;
        }
        if self.object_type == ObjectType::TreeNode {
            tag |= TREE_NODE_BIT;
        }
        tag
    }

    /// Serialize to `[tag][content]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        buf.push(self.tag());
        match &self.content {
            DigestContent::Inline(data) => buf.extend_from_slice(data),
            DigestContent::Hashed(hash) => buf.extend_from_slice(hash.as_bytes()),
        }
        buf
    }

    /// Length of [`to_bytes`](Self::to_bytes) without allocating.
    pub fn serialized_len(&self) -> usize {
        1 + match &self.content {
            DigestContent::Inline(data) => data.len(),
            DigestContent::Hashed(_) => HASH_SIZE,
        }
    }

    pub fn info(&self) -> ObjectDigestInfo {
        ObjectDigestInfo {
            piece_type: self.piece_type,
            object_type: self.object_type,
            inlined: self.is_inlined(),
        }
    }

    pub fn piece_type(&self) -> PieceType {
        self.piece_type
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn is_inlined(&self) -> bool {
        matches!(self.content, DigestContent::Inline(_))
    }

    /// The embedded content of an inline digest.
    pub fn inline_data(&self) -> Result<&Bytes> {
        match &self.content {
            DigestContent::Inline(data) => Ok(data),
            DigestContent::Hashed(_) => Err(Error::WrongDigestKind { expected: "inline" }),
        }
    }

    /// The content hash of a non-inline digest.
    pub fn hash(&self) -> Result<&Hash> {
        match &self.content {
            DigestContent::Hashed(hash) => Ok(hash),
            DigestContent::Inline(_) => Err(Error::WrongDigestKind { expected: "hashed" }),
        }
    }

    /// Hex form of the serialized digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse the hex form produced by [`to_hex`](Self::to_hex).
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::data_integrity(format!("Invalid digest hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for ObjectDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectDigest({})", self.to_hex())
    }
}

impl Serialize for ObjectDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
