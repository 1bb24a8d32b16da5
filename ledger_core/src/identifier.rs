//! Object identifiers and their wire encoding.
//!
//! ObjectIdentifierStorage layout:
//! ```text
//! 8   key_index (u64 LE)
//! 8   deletion_scope_id (u64 LE)
//! 4   digest length (u32 LE)
//! N   digest bytes
//! ```

use crate::digest::{MAX_DIGEST_SIZE, ObjectDigest};
use crate::error::Result;
use crate::wire::{LEN_SIZE, Reader, Writer};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};
use std::sync::{Arc, Weak};

/// Smallest possible encoded identifier (empty inline digest is still one byte).
pub const MIN_ENCODED_IDENTIFIER_SIZE: usize = 8 + 8 + LEN_SIZE + 1;

/// Largest possible encoded identifier.
pub const MAX_ENCODED_IDENTIFIER_SIZE: usize = 8 + 8 + LEN_SIZE + MAX_DIGEST_SIZE;

/// Mints identifiers, typically tracking them for reference counting.
pub trait ObjectIdentifierFactory: Send + Sync {
    fn make_object_identifier(
        &self,
        key_index: u64,
        deletion_scope_id: u64,
        digest: ObjectDigest,
    ) -> ObjectIdentifier;
}

/// Identifies a piece: a digest plus the caller's versioning tags.
///
/// The factory reference is a weak back-pointer used to mint identifiers
/// for children found while decoding; it takes no part in equality.
#[derive(Clone, Serialize)]
pub struct ObjectIdentifier {
    key_index: u64,
    deletion_scope_id: u64,
    digest: ObjectDigest,
    #[serde(skip)]
    factory: Option<Weak<dyn ObjectIdentifierFactory>>,
}

impl ObjectIdentifier {
    /// Create an identifier that is not attached to any factory.
    pub fn new(key_index: u64, deletion_scope_id: u64, digest: ObjectDigest) -> Self {
        Self {
            key_index,
            deletion_scope_id,
            digest,
            factory: None,
        }
    }

    /// Attach a factory back-reference.
    pub fn with_factory(mut self, factory: Weak<dyn ObjectIdentifierFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn key_index(&self) -> u64 {
        self.key_index
    }

    pub fn deletion_scope_id(&self) -> u64 {
        self.deletion_scope_id
    }

    pub fn digest(&self) -> &ObjectDigest {
        &self.digest
    }

    /// The factory that minted this identifier, if it is still alive.
    pub fn factory(&self) -> Option<Arc<dyn ObjectIdentifierFactory>> {
        self.factory.as_ref().and_then(Weak::upgrade)
    }

    fn key(&self) -> (u64, u64, &ObjectDigest) {
        (self.key_index, self.deletion_scope_id, &self.digest)
    }
}

impl PartialEq for ObjectIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ObjectIdentifier {}

impl PartialOrd for ObjectIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl StdHash for ObjectIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectIdentifier")
            .field("key_index", &self.key_index)
            .field("deletion_scope_id", &self.deletion_scope_id)
            .field("digest", &self.digest)
            .finish()
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.key_index, self.deletion_scope_id, self.digest
        )
    }
}

/// Default factory: stamps identifiers with fixed versioning tags and a
/// back-reference to itself.
pub struct IdentifierFactory {
    self_ref: Weak<IdentifierFactory>,
    key_index: u64,
    deletion_scope_id: u64,
}

impl IdentifierFactory {
    /// Create a factory whose split identifiers use key index and deletion
    /// scope 0.
    pub fn new() -> Arc<Self> {
        Self::with_scope(0, 0)
    }

    pub fn with_scope(key_index: u64, deletion_scope_id: u64) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            key_index,
            deletion_scope_id,
        })
    }

    /// Identifier for a freshly computed digest, using this factory's tags.
    pub fn identifier_for(&self, digest: ObjectDigest) -> ObjectIdentifier {
        self.make_object_identifier(self.key_index, self.deletion_scope_id, digest)
    }
}

impl ObjectIdentifierFactory for IdentifierFactory {
    fn make_object_identifier(
        &self,
        key_index: u64,
        deletion_scope_id: u64,
        digest: ObjectDigest,
    ) -> ObjectIdentifier {
        let factory: Weak<dyn ObjectIdentifierFactory> = self.self_ref.clone();
        ObjectIdentifier::new(key_index, deletion_scope_id, digest).with_factory(factory)
    }
}

impl fmt::Debug for IdentifierFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierFactory")
            .field("key_index", &self.key_index)
            .field("deletion_scope_id", &self.deletion_scope_id)
            .finish()
    }
}

/// Write an ObjectIdentifierStorage record.
pub fn encode_identifier(writer: &mut Writer, identifier: &ObjectIdentifier) {
    writer.put_u64(identifier.key_index);
    writer.put_u64(identifier.deletion_scope_id);
    writer.put_bytes(&identifier.digest.to_bytes());
}

/// Encoded size of an identifier.
pub fn encoded_identifier_len(identifier: &ObjectIdentifier) -> usize {
    8 + 8 + LEN_SIZE + identifier.digest.serialized_len()
}

/// Read an ObjectIdentifierStorage record, validating the embedded digest.
///
/// When a factory is given, it mints the identifier; otherwise the
/// identifier is detached.
pub fn decode_identifier(
    reader: &mut Reader<'_>,
    factory: Option<&dyn ObjectIdentifierFactory>,
) -> Result<ObjectIdentifier> {
    let key_index = reader.read_u64("identifier key index")?;
    let deletion_scope_id = reader.read_u64("identifier deletion scope")?;
    let digest_bytes = reader.read_bytes(MAX_DIGEST_SIZE, "identifier digest")?;
    let digest = ObjectDigest::from_bytes(digest_bytes)?;

    Ok(match factory {
        Some(factory) => factory.make_object_identifier(key_index, deletion_scope_id, digest),
        None => ObjectIdentifier::new(key_index, deletion_scope_id, digest),
    })
}
