//! # Ledger Core
//!
//! Content-addressed piece storage for a synchronized key-value ledger.
//!
//! Values are split into pieces by a rolling hash. Small pieces are inlined
//! into their own digest; larger ones are hashed with BLAKE3. Pieces are
//! grouped into a tree of file indices, so a local edit only changes a few
//! chunks and the indices above them. B-tree nodes of the ledger are stored
//! the same way, tagged as tree nodes on their root digest.
//!
//! ## Features
//!
//! - Deterministic content-defined splitting with a multi-level index tree
//! - Self-validating digests with inline storage for small content
//! - Strictly validated codecs for file indices and B-tree nodes
//! - Reference extraction for sync and garbage collection
//! - Concurrent traversal of piece trees
//! - In-memory and on-disk piece stores
//!
//! ## Example
//!
//! ```no_run
//! use ledger_core::{
//!     DiskPieceStore, IdentifierFactory, Object, ObjectType, PieceStore, SplitConfig,
//! };
//! use ledger_core::{collect_garbage, read_object, split_bytes};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize a new store
//! let store = DiskPieceStore::init("./my-store", &SplitConfig::default())?;
//!
//! // Split a value and store its pieces
//! let factory = IdentifierFactory::new();
//! let data = std::fs::read("./value.bin")?;
//! let split = split_bytes(data, ObjectType::Blob, store.config(), &factory)?;
//! for piece in &split.pieces {
//!     store.put(piece)?;
//! }
//!
//! // Read it back
//! let object = read_object(&store, &split.root)?;
//! assert_eq!(object.data().len(), std::fs::metadata("./value.bin")?.len() as usize);
//!
//! // Drop everything not reachable from the root
//! let stats = collect_garbage(&store, &[split.root], false)?;
//! println!("Deleted {} pieces", stats.pieces_deleted);
//! # Ok(())
//! # }
//! ```

mod collect;
mod config;
mod digest;
mod disk;
mod error;
pub mod file_index;
mod gc;
mod hash;
mod identifier;
mod memory;
mod object;
mod piece;
mod rolling_hash;
mod split;
mod store;
mod tree_node;
mod wire;

pub use collect::collect_pieces;
pub use config::SplitConfig;
pub use digest::{
    HASHED_DIGEST_SIZE, INLINE_THRESHOLD, ObjectDigest, ObjectDigestInfo, ObjectType, PieceType,
};
pub use disk::DiskPieceStore;
pub use error::{Error, Result};
pub use file_index::{FileIndex, ObjectIdentifierAndSize};
pub use gc::{GcStats, collect_garbage};
pub use hash::Hash;
pub use identifier::{IdentifierFactory, ObjectIdentifier, ObjectIdentifierFactory};
pub use memory::InMemoryPieceStore;
pub use object::{AssembledObject, ChunkObject, Object, read_object};
pub use piece::{DataChunkPiece, InlinePiece, ObjectReferences, Piece};
pub use rolling_hash::{ChunkPermutation, Cut, RollingHash};
pub use split::{
    BytesDataSource, DataSource, DataSourceStatus, IterationStatus, ReaderDataSource,
    SplitResult, Splitter, split_bytes, split_data_source, split_source,
};
pub use store::{PieceFetcher, PieceStore};
pub use tree_node::{
    Entry, KeyPriority, TreeNode, check_valid_tree_node_serialization, compute_entry_id,
    decode_tree_node, encode_tree_node,
};
