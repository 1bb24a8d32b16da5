//! In-memory piece store.

use crate::digest::ObjectDigest;
use crate::error::{Error, Result};
use crate::identifier::ObjectIdentifier;
use crate::piece::Piece;
use crate::store::{PieceFetcher, PieceStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// HashMap-based piece store.
///
/// Intended for tests and embedding. Buffers are shared, not copied, on
/// reads.
pub struct InMemoryPieceStore {
    pieces: RwLock<HashMap<ObjectDigest, Bytes>>,
}

impl InMemoryPieceStore {
    pub fn new() -> Self {
        Self {
            pieces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of pieces currently stored.
    pub fn len(&self) -> usize {
        self.pieces.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.read().expect("lock poisoned").is_empty()
    }

    /// Store raw bytes under a digest without checking them.
    ///
    /// Lets tests plant corrupt pieces.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, digest: ObjectDigest, data: Bytes) {
        self.pieces
            .write()
            .expect("lock poisoned")
            .insert(digest, data);
    }
}

impl Default for InMemoryPieceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PieceStore for InMemoryPieceStore {
    fn fetch(&self, identifier: &ObjectIdentifier) -> Result<Bytes> {
        let map = self.pieces.read().expect("lock poisoned");
        map.get(identifier.digest())
            .cloned()
            .ok_or_else(|| Error::not_found(identifier.digest().to_hex()))
    }

    fn put(&self, piece: &dyn Piece) -> Result<bool> {
        let digest = piece.identifier().digest();
        if digest.is_inlined() {
            return Ok(false);
        }
        let mut map = self.pieces.write().expect("lock poisoned");
        if map.contains_key(digest) {
            return Ok(false);
        }
        map.insert(digest.clone(), Bytes::copy_from_slice(piece.data()));
        Ok(true)
    }

    fn contains(&self, digest: &ObjectDigest) -> Result<bool> {
        let map = self.pieces.read().expect("lock poisoned");
        Ok(map.contains_key(digest))
    }

    fn delete(&self, digest: &ObjectDigest) -> Result<Option<u64>> {
        let mut map = self.pieces.write().expect("lock poisoned");
        Ok(map.remove(digest).map(|data| data.len() as u64))
    }

    fn inventory(&self) -> Result<Vec<(ObjectDigest, u64)>> {
        let map = self.pieces.read().expect("lock poisoned");
        let mut pieces: Vec<_> = map
            .iter()
            .map(|(digest, data)| (digest.clone(), data.len() as u64))
            .collect();
        pieces.sort();
        Ok(pieces)
    }
}

#[async_trait]
impl PieceFetcher for InMemoryPieceStore {
    async fn fetch_piece(&self, identifier: ObjectIdentifier) -> Result<Arc<dyn Piece>> {
        self.get_piece(&identifier)
    }
}

impl std::fmt::Debug for InMemoryPieceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPieceStore")
            .field("piece_count", &self.len())
            .finish()
    }
}
