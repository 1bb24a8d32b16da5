//! Objects: the logical values stored as piece trees.
//!
//! An object is either a single chunk piece or the content of a tree of
//! index pieces. The object type on the root digest says whether the
//! content is an opaque blob or an encoded B-tree node.

use crate::digest::{ObjectType, PieceType};
use crate::error::{Error, Result};
use crate::file_index::{self, MAX_INDEX_DEPTH};
use crate::identifier::ObjectIdentifier;
use crate::piece::{ObjectReferences, Piece};
use crate::store::PieceStore;
use crate::tree_node::{TreeNode, decode_tree_node};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;

/// A logical value.
pub trait Object: Send + Sync {
    fn identifier(&self) -> &ObjectIdentifier;

    /// The full content of the object.
    fn data(&self) -> &[u8];

    /// Add the digests of the objects this object points to.
    ///
    /// Blobs reference nothing. A tree node references the values of its
    /// entries, with each entry's priority, and its child nodes eagerly.
    fn append_references(&self, references: &mut ObjectReferences) -> Result<()> {
        if self.identifier().digest().object_type() == ObjectType::Blob {
            return Ok(());
        }
        self.tree_node()?.append_references(references);
        Ok(())
    }

    /// Decode the content as a tree node.
    fn tree_node(&self) -> Result<TreeNode> {
        let identifier = self.identifier();
        if identifier.digest().object_type() != ObjectType::TreeNode {
            return Err(Error::data_integrity(format!(
                "Object {} is not a tree node",
                identifier.digest()
            )));
        }
        let factory = identifier.factory();
        decode_tree_node(self.data(), factory.as_deref()).map_err(Error::into_data_integrity)
    }
}

/// An object stored as a single chunk piece.
#[derive(Debug, Clone)]
pub struct ChunkObject {
    piece: Arc<dyn Piece>,
}

impl ChunkObject {
    pub fn new(piece: Arc<dyn Piece>) -> Result<Self> {
        if piece.identifier().digest().piece_type() != PieceType::Chunk {
            return Err(Error::data_integrity(format!(
                "Piece {} is an index, not a chunk",
                piece.identifier().digest()
            )));
        }
        Ok(Self { piece })
    }
}

impl Object for ChunkObject {
    fn identifier(&self) -> &ObjectIdentifier {
        self.piece.identifier()
    }

    fn data(&self) -> &[u8] {
        self.piece.data()
    }
}

/// An object reassembled from an index tree.
#[derive(Debug, Clone)]
pub struct AssembledObject {
    identifier: ObjectIdentifier,
    data: Bytes,
}

impl AssembledObject {
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl Object for AssembledObject {
    fn identifier(&self) -> &ObjectIdentifier {
        &self.identifier
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Load an object, reassembling its content from the piece tree.
///
/// Every piece is verified against its digest and every subtree against the
/// size recorded in its parent index.
pub fn read_object(
    store: &dyn PieceStore,
    identifier: &ObjectIdentifier,
) -> Result<Box<dyn Object>> {
    let piece = store.get_piece(identifier)?;
    if piece.identifier().digest().piece_type() == PieceType::Chunk {
        return Ok(Box::new(ChunkObject::new(piece)?));
    }

    let mut data = BytesMut::new();
    let total_size = append_index_content(store, piece.as_ref(), &mut data, 1)?;
    if data.len() as u64 != total_size {
        return Err(Error::data_integrity(format!(
            "Object {} assembled to {} bytes, index says {}",
            identifier.digest(),
            data.len(),
            total_size
        )));
    }

    Ok(Box::new(AssembledObject {
        identifier: identifier.clone(),
        data: data.freeze(),
    }))
}

/// Append the content below an index piece, returning its declared size.
///
/// `depth` counts the index pieces from the root down to this one.
fn append_index_content(
    store: &dyn PieceStore,
    index: &dyn Piece,
    out: &mut BytesMut,
    depth: usize,
) -> Result<u64> {
    if depth > MAX_INDEX_DEPTH {
        return Err(Error::data_integrity(format!(
            "Index {} is nested deeper than {} levels",
            index.identifier().digest(),
            MAX_INDEX_DEPTH
        )));
    }
    let factory = index.identifier().factory();
    let decoded =
        file_index::decode(index.data(), factory.as_deref()).map_err(Error::into_data_integrity)?;

    for child in &decoded.children {
        let start = out.len();
        let piece = store.get_piece(&child.identifier)?;
        match piece.identifier().digest().piece_type() {
            PieceType::Chunk => out.extend_from_slice(piece.data()),
            PieceType::Index => {
                append_index_content(store, piece.as_ref(), out, depth + 1)?;
            }
        }

        let written = (out.len() - start) as u64;
        if written != child.size {
            return Err(Error::data_integrity(format!(
                "Child {} holds {} bytes, index says {}",
                child.identifier.digest(),
                written,
                child.size
            )));
        }
    }

    Ok(decoded.total_size)
}
