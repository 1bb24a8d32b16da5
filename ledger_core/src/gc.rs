//! Garbage collection.

use crate::digest::{ObjectDigest, ObjectType, PieceType};
use crate::error::{Error, Result};
use crate::file_index::{self, MAX_INDEX_DEPTH};
use crate::identifier::ObjectIdentifier;
use crate::object::read_object;
use crate::piece::ObjectReferences;
use crate::store::PieceStore;
use serde::Serialize;
use std::collections::HashSet;

/// Statistics from a garbage collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Number of pieces deleted.
    pub pieces_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

/// Run garbage collection.
///
/// Walks from `roots` to mark reachable pieces, then deletes every other
/// stored piece. If `dry_run` is true, reports what would be deleted without
/// deleting.
pub fn collect_garbage(
    store: &dyn PieceStore,
    roots: &[ObjectIdentifier],
    dry_run: bool,
) -> Result<GcStats> {
    let mut marker = Marker {
        store,
        reachable: HashSet::new(),
        objects: HashSet::new(),
    };
    for root in roots {
        marker.mark_object(root)?;
    }

    sweep(store, &marker.reachable, dry_run)
}

struct Marker<'a> {
    store: &'a dyn PieceStore,
    /// Pieces that must be kept.
    reachable: HashSet<ObjectDigest>,
    /// Objects whose references have been followed.
    objects: HashSet<ObjectDigest>,
}

impl Marker<'_> {
    /// Mark the pieces of an object, then the objects it references.
    fn mark_object(&mut self, identifier: &ObjectIdentifier) -> Result<()> {
        let digest = identifier.digest();
        if !self.objects.insert(digest.clone()) {
            return Ok(());
        }

        if !self.mark_pieces(identifier, 0)? {
            // Missing somewhere below; nothing to follow
            return Ok(());
        }
        if digest.object_type() != ObjectType::TreeNode {
            return Ok(());
        }

        let object = match read_object(self.store, identifier) {
            Ok(object) => object,
            Err(Error::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut references = ObjectReferences::new();
        object.append_references(&mut references)?;

        for (referenced, _priority) in references {
            let child = ObjectIdentifier::new(
                identifier.key_index(),
                identifier.deletion_scope_id(),
                referenced,
            );
            self.mark_object(&child)?;
        }
        Ok(())
    }

    /// Mark a piece and everything below it. Returns `false` if any piece
    /// of the subtree is missing from the store.
    fn mark_pieces(&mut self, identifier: &ObjectIdentifier, depth: usize) -> Result<bool> {
        let digest = identifier.digest();
        if digest.is_inlined() {
            return Ok(true);
        }
        if self.reachable.contains(digest) {
            return Ok(true);
        }
        if !self.store.contains(digest)? {
            return Ok(false);
        }
        self.reachable.insert(digest.clone());

        if digest.piece_type() == PieceType::Chunk {
            return Ok(true);
        }
        if depth >= MAX_INDEX_DEPTH {
            return Err(Error::data_integrity(format!(
                "Index {} is nested deeper than {} levels",
                digest, MAX_INDEX_DEPTH
            )));
        }

        let piece = self.store.get_piece(identifier)?;
        let index =
            file_index::decode(piece.data(), None).map_err(Error::into_data_integrity)?;
        let mut complete = true;
        for child in &index.children {
            complete &= self.mark_pieces(&child.identifier, depth + 1)?;
        }
        Ok(complete)
    }
}

/// Sweep phase: delete unreachable pieces.
fn sweep(
    store: &dyn PieceStore,
    reachable: &HashSet<ObjectDigest>,
    dry_run: bool,
) -> Result<GcStats> {
    let mut stats = GcStats {
        pieces_deleted: 0,
        bytes_freed: 0,
    };

    for (digest, size) in store.inventory()? {
        if reachable.contains(&digest) {
            continue;
        }
        stats.pieces_deleted += 1;
        stats.bytes_freed += size;
        if !dry_run {
            store.delete(&digest)?;
        }
    }

    tracing::debug!(
        pieces_deleted = stats.pieces_deleted,
        bytes_freed = stats.bytes_freed,
        dry_run,
        "garbage collection finished"
    );
    Ok(stats)
}
