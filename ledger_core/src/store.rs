//! Piece storage interfaces.

use crate::digest::ObjectDigest;
use crate::error::Result;
use crate::identifier::ObjectIdentifier;
use crate::piece::{DataChunkPiece, InlinePiece, Piece};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Digest-keyed piece storage.
///
/// Pieces are immutable: storing the same digest twice is a no-op.
pub trait PieceStore: Send + Sync {
    /// Raw bytes of a stored piece.
    ///
    /// Returns `Error::NotFound` if the piece is absent.
    fn fetch(&self, identifier: &ObjectIdentifier) -> Result<Bytes>;

    /// Store a piece. Returns `true` if it was not already present.
    fn put(&self, piece: &dyn Piece) -> Result<bool>;

    fn contains(&self, digest: &ObjectDigest) -> Result<bool>;

    /// Remove a piece, returning the bytes it occupied.
    fn delete(&self, digest: &ObjectDigest) -> Result<Option<u64>>;

    /// Every stored digest with its stored size.
    fn inventory(&self) -> Result<Vec<(ObjectDigest, u64)>>;

    /// Load a piece, checking its content against the digest.
    ///
    /// Inline identifiers are served from the digest without touching the
    /// store.
    fn get_piece(&self, identifier: &ObjectIdentifier) -> Result<Arc<dyn Piece>> {
        if identifier.digest().is_inlined() {
            return Ok(Arc::new(InlinePiece::new(identifier.clone())?));
        }
        let data = self.fetch(identifier)?;
        Ok(Arc::new(DataChunkPiece::verified(identifier.clone(), data)?))
    }
}

/// Asynchronous piece lookup used by concurrent traversals.
#[async_trait]
pub trait PieceFetcher: Send + Sync {
    async fn fetch_piece(&self, identifier: ObjectIdentifier) -> Result<Arc<dyn Piece>>;
}
