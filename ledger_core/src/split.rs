//! Splitting byte streams into a tree of chunk and index pieces.
//!
//! Content is cut into chunks by the rolling hash. Chunk identifiers are
//! collected per level; a strong cut closes the lists of the levels below
//! it, and a list that reaches the maximum fan-out is closed immediately.
//! Closing a list encodes it as an index piece whose identifier moves one
//! level up. At the end of the stream all levels collapse into one root.
//!
//! Pieces are reported one step late: only once the stream has ended is it
//! known which piece is the root, and the root must carry the caller's
//! object type instead of [`ObjectType::Blob`].

use crate::config::SplitConfig;
use crate::digest::{ObjectDigest, ObjectType, PieceType};
use crate::error::{Error, Result};
use crate::file_index::{self, ObjectIdentifierAndSize};
use crate::identifier::{IdentifierFactory, ObjectIdentifier};
use crate::piece::{DataChunkPiece, Piece};
use crate::rolling_hash::{ChunkPermutation, RollingHash};
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::io::Read;

/// Progress reported alongside each piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    /// More pieces will follow.
    InProgress,
    /// This is the root piece; nothing follows.
    Done,
    /// The operation failed; nothing follows.
    Error,
}

/// Status attached to each delivery from a [`DataSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceStatus {
    ToBeContinued,
    Done,
    Error,
}

/// A push-based byte source.
pub trait DataSource {
    /// Total number of bytes the source will deliver.
    fn size(&self) -> u64;

    /// Deliver the content through `callback`, ending with `Done` or `Error`.
    fn get(&mut self, callback: &mut dyn FnMut(Option<Bytes>, DataSourceStatus));
}

/// Data source over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesDataSource {
    data: Bytes,
    delivery_size: usize,
}

impl BytesDataSource {
    /// Deliver the whole buffer at once.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            delivery_size: usize::MAX,
        }
    }

    /// Deliver the buffer in slices of `delivery_size` bytes.
    pub fn with_delivery_size(mut self, delivery_size: usize) -> Self {
        self.delivery_size = delivery_size.max(1);
        self
    }
}

impl DataSource for BytesDataSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn get(&mut self, callback: &mut dyn FnMut(Option<Bytes>, DataSourceStatus)) {
        let mut rest = self.data.clone();
        while rest.len() > self.delivery_size {
            let slice = rest.split_to(self.delivery_size);
            callback(Some(slice), DataSourceStatus::ToBeContinued);
        }
        callback(Some(rest), DataSourceStatus::Done);
    }
}

/// Data source reading from an `io::Read` in fixed-size blocks.
#[derive(Debug)]
pub struct ReaderDataSource<R> {
    reader: R,
    size: u64,
    block_size: usize,
}

impl<R: Read> ReaderDataSource<R> {
    /// `size` is the number of bytes the reader is expected to yield.
    pub fn new(reader: R, size: u64) -> Self {
        Self {
            reader,
            size,
            block_size: 64 * 1024,
        }
    }
}

impl<R: Read> DataSource for ReaderDataSource<R> {
    fn size(&self) -> u64 {
        self.size
    }

    fn get(&mut self, callback: &mut dyn FnMut(Option<Bytes>, DataSourceStatus)) {
        let mut block = vec![0u8; self.block_size];
        loop {
            match self.reader.read(&mut block) {
                Ok(0) => {
                    callback(None, DataSourceStatus::Done);
                    return;
                }
                Ok(n) => callback(
                    Some(Bytes::copy_from_slice(&block[..n])),
                    DataSourceStatus::ToBeContinued,
                ),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "data source read failed");
                    callback(None, DataSourceStatus::Error);
                    return;
                }
            }
        }
    }
}

/// Pending children, one list per index level.
#[derive(Debug, Default)]
struct LevelStack {
    levels: Vec<Vec<ObjectIdentifierAndSize>>,
}

impl LevelStack {
    /// Push onto `level`, returning the new length of that level.
    fn push(&mut self, level: usize, child: ObjectIdentifierAndSize) -> usize {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        self.levels[level].push(child);
        self.levels[level].len()
    }

    fn take(&mut self, level: usize) -> Vec<ObjectIdentifierAndSize> {
        self.levels.get_mut(level).map(std::mem::take).unwrap_or_default()
    }

    fn len(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, Vec::len)
    }

    fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Push-driven splitter.
///
/// Feed it with [`deliver_chunk`](Self::deliver_chunk); pieces are reported
/// to the callback as they complete.
pub struct Splitter<M, C>
where
    M: FnMut(ObjectDigest) -> ObjectIdentifier,
    C: FnMut(IterationStatus, Option<DataChunkPiece>),
{
    object_type: ObjectType,
    max_identifiers_per_index: usize,
    level_config: SplitConfig,
    rolling_hash: RollingHash,
    make_identifier: M,
    callback: C,
    pending: BytesMut,
    // Bytes of `pending` already fed to the rolling hash.
    scanned: usize,
    levels: LevelStack,
    latest: Option<DataChunkPiece>,
    pieces_created: usize,
    finished: bool,
}

impl<M, C> Splitter<M, C>
where
    M: FnMut(ObjectDigest) -> ObjectIdentifier,
    C: FnMut(IterationStatus, Option<DataChunkPiece>),
{
    /// Create a splitter whose root will carry `object_type`.
    pub fn new(
        config: SplitConfig,
        object_type: ObjectType,
        make_identifier: M,
        callback: C,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            object_type,
            max_identifiers_per_index: config.max_identifiers_per_index(),
            rolling_hash: RollingHash::new(&config),
            level_config: config,
            make_identifier,
            callback,
            pending: BytesMut::new(),
            scanned: 0,
            levels: LevelStack::default(),
            latest: None,
            pieces_created: 0,
            finished: false,
        })
    }

    /// Transform rolling hash digests with `permutation` before cut tests.
    pub fn with_permutation(mut self, permutation: ChunkPermutation) -> Self {
        self.rolling_hash = self.rolling_hash.with_permutation(permutation);
        self
    }

    /// Whether the splitter has reported `Done` or `Error`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume the next slice of the stream.
    pub fn deliver_chunk(&mut self, data: &[u8], is_final: bool) {
        if self.finished {
            return;
        }

        self.pending.extend_from_slice(data);
        while let Some(cut) = self.rolling_hash.feed(&self.pending[self.scanned..]) {
            let chunk = self.pending.split_to(self.scanned + cut.offset).freeze();
            self.scanned = 0;
            self.rolling_hash.reset();
            self.handle_chunk(chunk, cut.strength);
            if self.finished {
                return;
            }
        }
        self.scanned = self.pending.len();

        if is_final {
            self.finish();
        }
    }

    /// Abort the split after a source failure. Reports `Error` once.
    pub fn fail(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.latest = None;
        self.pending.clear();
        (self.callback)(IterationStatus::Error, None);
    }

    fn handle_chunk(&mut self, chunk: Bytes, cut_strength: u32) {
        let size = chunk.len() as u64;
        let identifier = self.send_in_progress(PieceType::Chunk, chunk);
        self.add_identifier_at_level(0, ObjectIdentifierAndSize { identifier, size });

        let level = self.level_config.level_for_cut(cut_strength);
        for i in 0..level {
            if let Some(child) = self.build_index_at_level(i) {
                self.add_identifier_at_level(i + 1, child);
            }
        }
    }

    fn add_identifier_at_level(&mut self, level: usize, child: ObjectIdentifierAndSize) {
        if self.levels.push(level, child) < self.max_identifiers_per_index {
            return;
        }
        if let Some(index) = self.build_index_at_level(level) {
            self.add_identifier_at_level(level + 1, index);
        }
    }

    /// Close the list at `level`. A single child is returned unchanged.
    fn build_index_at_level(&mut self, level: usize) -> Option<ObjectIdentifierAndSize> {
        let children = self.levels.take(level);
        if children.len() <= 1 {
            if !children.is_empty() {
                tracing::trace!(level, "promoting single child");
            }
            return children.into_iter().next();
        }

        let (bytes, total_size) = match file_index::encode(&children) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(level, error = %e, "index encoding failed");
                self.fail();
                return None;
            }
        };
        tracing::trace!(
            level,
            children = children.len(),
            encoded_size = bytes.len(),
            "built index piece"
        );
        let identifier = self.send_in_progress(PieceType::Index, Bytes::from(bytes));
        Some(ObjectIdentifierAndSize {
            identifier,
            size: total_size,
        })
    }

    /// Create a piece tagged as a blob and report the previous one.
    fn send_in_progress(&mut self, piece_type: PieceType, data: Bytes) -> ObjectIdentifier {
        let digest = ObjectDigest::compute(piece_type, ObjectType::Blob, &data);
        let identifier = (self.make_identifier)(digest);
        self.pieces_created += 1;

        if self.finished {
            return identifier;
        }
        let piece = DataChunkPiece::new(identifier.clone(), data);
        if let Some(previous) = self.latest.replace(piece) {
            (self.callback)(IterationStatus::InProgress, Some(previous));
        }
        identifier
    }

    fn finish(&mut self) {
        // The tail becomes the last chunk; an empty stream still yields one.
        if !self.pending.is_empty() || self.pieces_created == 0 {
            let chunk = self.pending.split().freeze();
            let size = chunk.len() as u64;
            let identifier = self.send_in_progress(PieceType::Chunk, chunk);
            self.add_identifier_at_level(0, ObjectIdentifierAndSize { identifier, size });
        }
        self.scanned = 0;
        if self.finished {
            return;
        }

        let mut level = 0;
        while level < self.levels.depth() {
            if level + 1 == self.levels.depth() && self.levels.len(level) == 1 {
                break;
            }
            if let Some(index) = self.build_index_at_level(level) {
                self.add_identifier_at_level(level + 1, index);
            }
            level += 1;
        }
        if self.finished {
            return;
        }

        self.finished = true;
        let root = self.levels.take(level).pop();
        match (root, self.latest.take()) {
            (Some(root), Some(latest)) if root.identifier == *latest.identifier() => {
                let piece = self.retag_root(latest);
                tracing::debug!(
                    pieces = self.pieces_created,
                    size = root.size,
                    root = %piece.identifier().digest(),
                    "split complete"
                );
                (self.callback)(IterationStatus::Done, Some(piece));
            }
            _ => {
                tracing::error!("split finished without a root piece");
                (self.callback)(IterationStatus::Error, None);
            }
        }
    }

    fn retag_root(&mut self, piece: DataChunkPiece) -> DataChunkPiece {
        if self.object_type == ObjectType::Blob {
            return piece;
        }
        let piece_type = piece.identifier().digest().piece_type();
        let data = piece.into_bytes();
        let digest = ObjectDigest::compute(piece_type, self.object_type, &data);
        DataChunkPiece::new((self.make_identifier)(digest), data)
    }
}

/// Split everything `source` delivers.
///
/// Pieces go to `callback` as described on [`Splitter`]. A source error, or
/// a source delivering a different number of bytes than it announced,
/// yields a single `Error` report. Only an invalid configuration is
/// returned as `Err`.
pub fn split_data_source<S, M, C>(
    source: &mut S,
    object_type: ObjectType,
    config: &SplitConfig,
    permutation: Option<ChunkPermutation>,
    make_identifier: M,
    callback: C,
) -> Result<()>
where
    S: DataSource + ?Sized,
    M: FnMut(ObjectDigest) -> ObjectIdentifier,
    C: FnMut(IterationStatus, Option<DataChunkPiece>),
{
    let mut splitter = Splitter::new(config.clone(), object_type, make_identifier, callback)?;
    if let Some(permutation) = permutation {
        splitter = splitter.with_permutation(permutation);
    }

    let expected_size = source.size();
    let mut delivered: u64 = 0;
    source.get(&mut |chunk, status| {
        let data = chunk.unwrap_or_default();
        delivered += data.len() as u64;
        match status {
            DataSourceStatus::ToBeContinued => splitter.deliver_chunk(&data, false),
            DataSourceStatus::Done if delivered != expected_size => {
                tracing::warn!(
                    expected = expected_size,
                    delivered,
                    "data source size mismatch"
                );
                splitter.fail();
            }
            DataSourceStatus::Done => splitter.deliver_chunk(&data, true),
            DataSourceStatus::Error => splitter.fail(),
        }
    });

    if !splitter.is_finished() {
        tracing::warn!("data source returned without completing");
        splitter.fail();
    }
    Ok(())
}

/// Pieces produced by splitting a buffer, in emission order.
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub pieces: Vec<DataChunkPiece>,
    pub root: ObjectIdentifier,
}

/// Split an in-memory buffer, collecting every piece.
pub fn split_bytes(
    data: impl Into<Bytes>,
    object_type: ObjectType,
    config: &SplitConfig,
    factory: &IdentifierFactory,
) -> Result<SplitResult> {
    split_source(&mut BytesDataSource::new(data), object_type, config, factory)
}

/// Split a data source, collecting every piece.
pub fn split_source<S: DataSource + ?Sized>(
    source: &mut S,
    object_type: ObjectType,
    config: &SplitConfig,
    factory: &IdentifierFactory,
) -> Result<SplitResult> {
    let mut pieces = Vec::new();
    let mut failed = false;
    split_data_source(
        source,
        object_type,
        config,
        None,
        |digest| factory.identifier_for(digest),
        |status, piece| match status {
            IterationStatus::Error => failed = true,
            _ => pieces.extend(piece),
        },
    )?;

    if failed {
        return Err(Error::source_failed("data source failed during split"));
    }
    let root = pieces
        .last()
        .map(|piece| piece.identifier().clone())
        .ok_or_else(|| Error::source_failed("split produced no pieces"))?;

    Ok(SplitResult { pieces, root })
}
