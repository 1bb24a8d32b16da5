//! File index encoding: the payload of index pieces.
//!
//! ```text
//! 8   total_size (u64 LE)
//! 4   child count (u32 LE)
//! for each child:
//!     ObjectIdentifierStorage
//!     8   size of the child's subtree (u64 LE)
//! ```
//!
//! `total_size` must equal the sum of the child sizes.

use crate::error::{Error, Result};
use crate::identifier::{
    MAX_ENCODED_IDENTIFIER_SIZE, MIN_ENCODED_IDENTIFIER_SIZE, ObjectIdentifier,
    ObjectIdentifierFactory, decode_identifier, encode_identifier, encoded_identifier_len,
};
use crate::wire::{LEN_SIZE, Reader, Writer};
use serde::Serialize;

/// Size of the fixed header (total size + child count).
pub const FILE_INDEX_HEADER_SIZE: usize = 8 + LEN_SIZE;

/// Largest encoded size of a single child entry.
pub const MAX_ENCODED_CHILD_SIZE: usize = MAX_ENCODED_IDENTIFIER_SIZE + 8;

const MIN_ENCODED_CHILD_SIZE: usize = MIN_ENCODED_IDENTIFIER_SIZE + 8;

/// Deepest chain of index pieces a reader follows below a root.
///
/// Every index the splitter builds has at least two non-empty children, so
/// an index `d` levels above the chunks covers at least `2^d` bytes and a
/// `u64` size leaves room for at most 64 levels.
pub const MAX_INDEX_DEPTH: usize = 64;

/// A child reference and the byte length of the subtree below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectIdentifierAndSize {
    pub identifier: ObjectIdentifier,
    pub size: u64,
}

/// Decoded file index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIndex {
    /// Total content size below this index.
    pub total_size: u64,
    /// Children in content order.
    pub children: Vec<ObjectIdentifierAndSize>,
}

/// Encode children into a file index buffer.
///
/// Returns the buffer and the total content size it covers, or a decode
/// error if the child sizes do not fit in a `u64`.
pub fn encode(children: &[ObjectIdentifierAndSize]) -> Result<(Vec<u8>, u64)> {
    let total_size = children
        .iter()
        .try_fold(0u64, |total, child| total.checked_add(child.size))
        .ok_or_else(|| Error::decode("File index child sizes overflow"))?;
    let capacity = FILE_INDEX_HEADER_SIZE
        + children
            .iter()
            .map(|child| encoded_identifier_len(&child.identifier) + 8)
            .sum::<usize>();

    let mut writer = Writer::with_capacity(capacity);
    writer.put_u64(total_size);
    writer.put_len(children.len());
    for child in children {
        encode_identifier(&mut writer, &child.identifier);
        writer.put_u64(child.size);
    }

    Ok((writer.into_bytes(), total_size))
}

/// Decode and verify a file index buffer.
///
/// The whole buffer is checked before anything is returned.
pub fn decode(
    bytes: &[u8],
    factory: Option<&dyn ObjectIdentifierFactory>,
) -> Result<FileIndex> {
    let mut reader = Reader::new(bytes);
    let total_size = reader.read_u64("file index total size")?;
    let count = reader.read_count(MIN_ENCODED_CHILD_SIZE, "file index children")?;

    let mut children = Vec::with_capacity(count);
    let mut sum: u64 = 0;
    for _ in 0..count {
        let identifier = decode_identifier(&mut reader, factory)?;
        let size = reader.read_u64("file index child size")?;
        sum = sum
            .checked_add(size)
            .ok_or_else(|| Error::decode("File index child sizes overflow"))?;
        children.push(ObjectIdentifierAndSize { identifier, size });
    }
    reader.finish("file index")?;

    if sum != total_size {
        return Err(Error::decode(format!(
            "File index total size {} does not match sum of children {}",
            total_size, sum
        )));
    }

    Ok(FileIndex {
        total_size,
        children,
    })
}

/// Decode a file index and call `f` for each child in order.
///
/// Stops at the first error returned by `f`.
pub fn for_each_child<F>(
    bytes: &[u8],
    factory: Option<&dyn ObjectIdentifierFactory>,
    mut f: F,
) -> Result<()>
where
    F: FnMut(&ObjectIdentifierAndSize) -> Result<()>,
{
    let index = decode(bytes, factory)?;
    for child in &index.children {
        f(child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{ObjectDigest, ObjectType, PieceType};
    use crate::identifier::IdentifierFactory;

    fn child(content: &[u8], size: u64) -> ObjectIdentifierAndSize {
        let digest = ObjectDigest::compute(PieceType::Chunk, ObjectType::Blob, content);
        ObjectIdentifierAndSize {
            identifier: ObjectIdentifier::new(0, 0, digest),
            size,
        }
    }

    #[test]
    fn test_encode_decode() {
        let children = vec![
            child(&[1u8; 100], 100),
            child(b"tiny", 4),
            child(&[2u8; 200], 200),
        ];
        let (bytes, total) = encode(&children).unwrap();
        assert_eq!(total, 304);

        let index = decode(&bytes, None).unwrap();
        assert_eq!(index.total_size, 304);
        assert_eq!(index.children, children);
    }

    #[test]
    fn test_encode_rejects_size_overflow() {
        let children = vec![child(&[1u8; 100], u64::MAX), child(&[2u8; 100], 1)];
        assert!(matches!(encode(&children), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_empty_index() {
        let (bytes, total) = encode(&[]).unwrap();
        assert_eq!(total, 0);
        assert_eq!(bytes.len(), FILE_INDEX_HEADER_SIZE);

        let index = decode(&bytes, None).unwrap();
        assert!(index.children.is_empty());
    }

    #[test]
    fn test_decode_attaches_factory() {
        let factory = IdentifierFactory::new();
        let minter: &dyn ObjectIdentifierFactory = &*factory;
        let (bytes, _) = encode(&[child(&[1u8; 100], 100)]).unwrap();

        let index = decode(&bytes, Some(minter)).unwrap();
        assert!(index.children[0].identifier.factory().is_some());
    }

    #[test]
    fn test_encoded_size_bound() {
        let children: Vec<_> = (0..10u8).map(|i| child(&[i; 64], 64)).collect();
        let (bytes, _) = encode(&children).unwrap();
        assert_eq!(
            bytes.len(),
            FILE_INDEX_HEADER_SIZE + children.len() * MAX_ENCODED_CHILD_SIZE
        );
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let (bytes, _) = encode(&[child(&[1u8; 100], 100), child(b"ab", 2)]).unwrap();
        for len in 0..bytes.len() {
            assert!(decode(&bytes[..len], None).is_err());
        }
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let (mut bytes, _) = encode(&[child(&[1u8; 100], 100)]).unwrap();
        bytes.push(0);
        assert!(decode(&bytes, None).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_total() {
        let (mut bytes, _) = encode(&[child(&[1u8; 100], 100)]).unwrap();
        bytes[0..8].copy_from_slice(&101u64.to_le_bytes());
        assert!(decode(&bytes, None).is_err());
    }

    #[test]
    fn test_decode_rejects_huge_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(&bytes, None).is_err());
    }

    #[test]
    fn test_for_each_child_short_circuits() {
        let children = vec![child(b"a", 1), child(b"b", 1), child(b"c", 1)];
        let (bytes, _) = encode(&children).unwrap();

        let mut seen = 0;
        let result = for_each_child(&bytes, None, |_| {
            seen += 1;
            if seen == 2 {
                Err(Error::data_integrity("stop"))
            } else {
                Ok(())
            }
        });

        assert!(result.is_err());
        assert_eq!(seen, 2);
    }

    // Property-based tests
    use proptest::prelude::*;

    fn arb_children() -> impl Strategy<Value = Vec<ObjectIdentifierAndSize>> {
        prop::collection::vec(
            (
                prop::collection::vec(any::<u8>(), 0..80),
                any::<u32>(),
                any::<u64>(),
                any::<u64>(),
            ),
            0..20,
        )
        .prop_map(|items| {
            items
                .into_iter()
                .map(|(content, size, key_index, scope)| {
                    let digest =
                        ObjectDigest::compute(PieceType::Chunk, ObjectType::Blob, &content);
                    ObjectIdentifierAndSize {
                        identifier: ObjectIdentifier::new(key_index, scope, digest),
                        size: size as u64,
                    }
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// File index round-trip
        #[test]
        fn prop_file_index_roundtrip(children in arb_children()) {
            let (bytes, total) = encode(&children).unwrap();
            let index = decode(&bytes, None)?;
            prop_assert_eq!(index.total_size, total);
            prop_assert_eq!(index.children, children);
        }

        /// Arbitrary bytes never panic the decoder
        #[test]
        fn prop_decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&bytes, None);
        }

        /// Flipping any single byte either fails cleanly or yields a valid index
        #[test]
        fn prop_mutation_never_panics(
            children in arb_children(),
            position in any::<prop::sample::Index>(),
            value in any::<u8>(),
        ) {
            let (mut bytes, _) = encode(&children).unwrap();
            let i = position.index(bytes.len());
            bytes[i] = value;
            if let Ok(index) = decode(&bytes, None) {
                let sum: u64 = index.children.iter().map(|c| c.size).sum();
                prop_assert_eq!(sum, index.total_size);
            }
        }
    }
}
