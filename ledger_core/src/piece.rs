//! Pieces: the unit of storage.
//!
//! A piece is a byte buffer together with the identifier of its digest.
//! Chunk pieces hold content; index pieces hold a file index pointing at
//! further pieces.

use crate::digest::{ObjectDigest, PieceType};
use crate::error::{Error, Result};
use crate::file_index;
use crate::identifier::ObjectIdentifier;
use crate::tree_node::KeyPriority;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;

/// Digests referenced by a piece or object, with their sync priority.
pub type ObjectReferences = BTreeSet<(ObjectDigest, KeyPriority)>;

/// A stored piece.
pub trait Piece: Send + Sync + fmt::Debug {
    fn identifier(&self) -> &ObjectIdentifier;

    fn data(&self) -> &[u8];

    /// Add the digests of the pieces this piece points to.
    ///
    /// Chunks reference nothing. An index references each of its hashed
    /// children with [`KeyPriority::Eager`]; inline children are skipped.
    fn append_references(&self, references: &mut ObjectReferences) -> Result<()> {
        let identifier = self.identifier();
        if identifier.digest().piece_type() == PieceType::Chunk {
            return Ok(());
        }

        let factory = identifier.factory();
        file_index::for_each_child(self.data(), factory.as_deref(), |child| {
            let digest = child.identifier.digest();
            if !digest.is_inlined() {
                references.insert((digest.clone(), KeyPriority::Eager));
            }
            Ok(())
        })
        .map_err(Error::into_data_integrity)
    }
}

/// A piece owning its buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunkPiece {
    identifier: ObjectIdentifier,
    data: Bytes,
}

impl DataChunkPiece {
    pub fn new(identifier: ObjectIdentifier, data: Bytes) -> Self {
        Self { identifier, data }
    }

    /// Create a piece after checking that `data` matches the digest.
    pub fn verified(identifier: ObjectIdentifier, data: Bytes) -> Result<Self> {
        let expected = identifier.digest();
        let actual = ObjectDigest::compute(expected.piece_type(), expected.object_type(), &data);
        if &actual != expected {
            return Err(Error::data_integrity(format!(
                "Piece content does not match digest: expected {}, got {}",
                expected, actual
            )));
        }
        Ok(Self::new(identifier, data))
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl Piece for DataChunkPiece {
    fn identifier(&self) -> &ObjectIdentifier {
        &self.identifier
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A piece whose content lives in its own inline digest.
#[derive(Debug, Clone)]
pub struct InlinePiece {
    identifier: ObjectIdentifier,
    data: Bytes,
}

impl InlinePiece {
    /// Fails with [`Error::WrongDigestKind`] for hashed digests.
    pub fn new(identifier: ObjectIdentifier) -> Result<Self> {
        let data = identifier.digest().inline_data()?.clone();
        Ok(Self { identifier, data })
    }
}

impl Piece for InlinePiece {
    fn identifier(&self) -> &ObjectIdentifier {
        &self.identifier
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}
