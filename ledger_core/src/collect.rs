//! Concurrent traversal of a piece tree.
//!
//! The root is fetched and visited first. The children of an index piece
//! are then fetched concurrently, one task each, and every subtree proceeds
//! on its own. A shared cancellation token stops the whole traversal as
//! soon as the visitor declines a piece or a fetch or decode fails.

use crate::digest::PieceType;
use crate::file_index::{self, MAX_INDEX_DEPTH};
use crate::identifier::ObjectIdentifier;
use crate::piece::{InlinePiece, Piece};
use crate::split::IterationStatus;
use crate::store::PieceFetcher;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

struct Traversal<F: ?Sized, V> {
    fetcher: Arc<F>,
    visitor: V,
    cancel: CancellationToken,
}

/// Visit every piece reachable from `root`.
///
/// `visitor` returns `false` to stop the traversal. Siblings are visited in
/// no particular order, but a piece is always visited before the pieces it
/// references. Returns [`IterationStatus::Done`] once every piece has been
/// visited, or [`IterationStatus::Error`] if the traversal was stopped.
pub async fn collect_pieces<F, V>(
    root: ObjectIdentifier,
    fetcher: Arc<F>,
    visitor: V,
) -> IterationStatus
where
    F: PieceFetcher + ?Sized + 'static,
    V: Fn(&dyn Piece) -> bool + Send + Sync + 'static,
{
    let traversal = Arc::new(Traversal {
        fetcher,
        visitor,
        cancel: CancellationToken::new(),
    });

    visit(Arc::clone(&traversal), root, 0).await;

    if traversal.cancel.is_cancelled() {
        IterationStatus::Error
    } else {
        IterationStatus::Done
    }
}

fn visit<F, V>(
    traversal: Arc<Traversal<F, V>>,
    identifier: ObjectIdentifier,
    depth: usize,
) -> BoxFuture<'static, ()>
where
    F: PieceFetcher + ?Sized + 'static,
    V: Fn(&dyn Piece) -> bool + Send + Sync + 'static,
{
    async move {
        let cancel = &traversal.cancel;
        if cancel.is_cancelled() {
            return;
        }

        let fetched = if identifier.digest().is_inlined() {
            InlinePiece::new(identifier.clone()).map(|piece| Arc::new(piece) as Arc<dyn Piece>)
        } else {
            tokio::select! {
                _ = cancel.cancelled() => return,
                fetched = traversal.fetcher.fetch_piece(identifier.clone()) => fetched,
            }
        };

        let piece = match fetched {
            Ok(piece) => piece,
            Err(e) => {
                tracing::warn!(
                    digest = %identifier.digest(),
                    error = %e,
                    "piece fetch failed, cancelling traversal"
                );
                cancel.cancel();
                return;
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        if !(traversal.visitor)(piece.as_ref()) {
            tracing::debug!(digest = %identifier.digest(), "visitor stopped traversal");
            cancel.cancel();
            return;
        }
        if identifier.digest().piece_type() == PieceType::Chunk {
            return;
        }
        if depth >= MAX_INDEX_DEPTH {
            tracing::warn!(
                digest = %identifier.digest(),
                depth,
                "index nested too deep, cancelling traversal"
            );
            cancel.cancel();
            return;
        }

        let factory = identifier.factory();
        let index = match file_index::decode(piece.data(), factory.as_deref()) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(
                    digest = %identifier.digest(),
                    error = %e,
                    "index decode failed, cancelling traversal"
                );
                cancel.cancel();
                return;
            }
        };

        let mut tasks = JoinSet::new();
        for child in index.children {
            tasks.spawn(visit(Arc::clone(&traversal), child.identifier, depth + 1));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "traversal task failed");
                cancel.cancel();
            }
        }
    }
    .boxed()
}
