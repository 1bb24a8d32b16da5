//! On-disk piece store.

use crate::config::SplitConfig;
use crate::digest::ObjectDigest;
use crate::error::{Error, Result};
use crate::identifier::ObjectIdentifier;
use crate::piece::Piece;
use crate::store::{PieceFetcher, PieceStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A piece store rooted at a directory.
///
/// Layout:
/// - `config`: splitter parameters, fixed at `init`
/// - `pieces/{shard}/{digest}`: raw piece bytes, named after the hex of
///   the serialized digest and sharded by the first hash byte
#[derive(Debug)]
pub struct DiskPieceStore {
    root: PathBuf,
    config: SplitConfig,
}

impl DiskPieceStore {
    /// Initialize a new store at the given path.
    pub fn init<P: AsRef<Path>>(root: P, config: &SplitConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        config.validate()?;

        fs::create_dir_all(root.join("pieces"))?;
        fs::write(root.join("config"), config.to_config_string())?;

        Ok(Self {
            root,
            config: config.clone(),
        })
    }

    /// Open an existing store, reading its splitter parameters.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join("config");
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }
        let config = SplitConfig::parse(&fs::read_to_string(&config_path)?)?;

        if !root.join("pieces").exists() {
            return Err(Error::invalid_store(&root, "pieces directory missing"));
        }

        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Splitter parameters content in this store was split with.
    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Path of the file holding a piece.
    pub fn piece_path(&self, digest: &ObjectDigest) -> PathBuf {
        let hex = digest.to_hex();
        let shard = hex.get(2..4).unwrap_or("00");
        self.root.join("pieces").join(shard).join(&hex)
    }

    /// Write a piece atomically using tempfile.
    fn write_piece_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::invalid_store(&self.root, "piece path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(data)?;
        temp_file.flush()?;
        temp_file.persist(path)?;

        Ok(())
    }
}

impl PieceStore for DiskPieceStore {
    fn fetch(&self, identifier: &ObjectIdentifier) -> Result<Bytes> {
        let path = self.piece_path(identifier.digest());
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::not_found(identifier.digest().to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, piece: &dyn Piece) -> Result<bool> {
        let digest = piece.identifier().digest();
        if digest.is_inlined() {
            return Ok(false);
        }

        // Deduplication
        let path = self.piece_path(digest);
        if path.exists() {
            return Ok(false);
        }

        self.write_piece_atomic(&path, piece.data())?;
        Ok(true)
    }

    fn contains(&self, digest: &ObjectDigest) -> Result<bool> {
        Ok(self.piece_path(digest).exists())
    }

    fn delete(&self, digest: &ObjectDigest) -> Result<Option<u64>> {
        let path = self.piece_path(digest);
        let size = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&path)?;

        // Remove the shard directory once it is empty
        if let Some(shard) = path.parent()
            && let Ok(mut entries) = fs::read_dir(shard)
            && entries.next().is_none()
        {
            let _ = fs::remove_dir(shard);
        }

        Ok(Some(size))
    }

    fn inventory(&self) -> Result<Vec<(ObjectDigest, u64)>> {
        let mut pieces = Vec::new();

        for shard_entry in fs::read_dir(self.root.join("pieces"))? {
            let shard_path = shard_entry?.path();
            if !shard_path.is_dir() {
                continue;
            }

            for piece_entry in fs::read_dir(&shard_path)? {
                let piece_entry = piece_entry?;
                let metadata = piece_entry.metadata()?;
                if !metadata.is_file() {
                    continue;
                }

                // Leftover temp files and foreign names do not parse
                let name = piece_entry.file_name();
                let Ok(bytes) = hex::decode(name.to_str().unwrap_or("")) else {
                    continue;
                };
                if let Ok(digest) = ObjectDigest::from_bytes(&bytes) {
                    pieces.push((digest, metadata.len()));
                }
            }
        }

        pieces.sort();
        Ok(pieces)
    }
}

#[async_trait]
impl PieceFetcher for DiskPieceStore {
    async fn fetch_piece(&self, identifier: ObjectIdentifier) -> Result<Arc<dyn Piece>> {
        self.get_piece(&identifier)
    }
}
