//! B-tree node encoding.
//!
//! TreeNodeStorage layout:
//! ```text
//! 1   level (u8)
//! 4   entry count (u32 LE)
//! for each entry:
//!     4 + N   key (length-prefixed)
//!     ObjectIdentifierStorage
//!     1       priority (0=eager, 1=lazy)
//!     4 + M   entry id (length-prefixed, empty in legacy nodes)
//! 4   child count (u32 LE)
//! for each child:
//!     8   index (u64 LE)
//!     ObjectIdentifierStorage
//! ```
//!
//! Keys must be strictly increasing. Child indices must be strictly
//! increasing and lie in `[0, entries.len()]`; child `i` holds the keys
//! between entry `i - 1` and entry `i`.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::identifier::{
    MIN_ENCODED_IDENTIFIER_SIZE, ObjectIdentifier, ObjectIdentifierFactory, decode_identifier,
    encode_identifier,
};
use crate::piece::ObjectReferences;
use crate::wire::{LEN_SIZE, Reader, Writer};
use serde::Serialize;
use std::collections::BTreeMap;

const MIN_ENCODED_ENTRY_SIZE: usize = LEN_SIZE + MIN_ENCODED_IDENTIFIER_SIZE + 1 + LEN_SIZE;
const MIN_ENCODED_CHILD_SIZE: usize = 8 + MIN_ENCODED_IDENTIFIER_SIZE;

/// How eagerly the value behind an entry should be synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPriority {
    Eager = 0,
    Lazy = 1,
}

impl KeyPriority {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(KeyPriority::Eager),
            1 => Ok(KeyPriority::Lazy),
            _ => Err(Error::decode(format!("Invalid key priority: {}", value))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPriority::Eager => "eager",
            KeyPriority::Lazy => "lazy",
        }
    }
}

/// A key/value entry of a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    #[serde(serialize_with = "serialize_lossy")]
    pub key: Vec<u8>,
    pub object_identifier: ObjectIdentifier,
    pub priority: KeyPriority,
    #[serde(serialize_with = "serialize_hex")]
    pub entry_id: Vec<u8>,
}

impl Entry {
    /// Create an entry whose id is derived from its content.
    pub fn new(key: Vec<u8>, object_identifier: ObjectIdentifier, priority: KeyPriority) -> Self {
        let entry_id = compute_entry_id(&key, &object_identifier, priority);
        Self {
            key,
            object_identifier,
            priority,
            entry_id,
        }
    }
}

/// Entry id derived from an entry's content, as assigned to legacy entries.
pub fn compute_entry_id(
    key: &[u8],
    object_identifier: &ObjectIdentifier,
    priority: KeyPriority,
) -> Vec<u8> {
    let hash = Hash::hash_length_prefixed(&[
        key,
        &object_identifier.key_index().to_le_bytes(),
        &object_identifier.digest().to_bytes(),
        &[priority.to_u8()],
    ]);
    hash.as_bytes().to_vec()
}

/// Decoded tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub level: u8,
    pub entries: Vec<Entry>,
    pub children: BTreeMap<u64, ObjectIdentifier>,
}

impl TreeNode {
    pub fn encode(&self) -> Vec<u8> {
        encode_tree_node(self.level, &self.entries, &self.children)
    }

    /// Add the digests this node points to.
    ///
    /// Entry values carry their own priority; child nodes are always eager.
    /// Inline digests are skipped since they reference nothing.
    pub fn append_references(&self, references: &mut ObjectReferences) {
        for entry in &self.entries {
            let digest = entry.object_identifier.digest();
            if !digest.is_inlined() {
                references.insert((digest.clone(), entry.priority));
            }
        }
        for child in self.children.values() {
            let digest = child.digest();
            if !digest.is_inlined() {
                references.insert((digest.clone(), KeyPriority::Eager));
            }
        }
    }
}

/// Encode a tree node. Entries are written in the order given.
pub fn encode_tree_node(
    level: u8,
    entries: &[Entry],
    children: &BTreeMap<u64, ObjectIdentifier>,
) -> Vec<u8> {
    let mut writer = Writer::default();
    writer.put_u8(level);

    writer.put_len(entries.len());
    for entry in entries {
        writer.put_bytes(&entry.key);
        encode_identifier(&mut writer, &entry.object_identifier);
        writer.put_u8(entry.priority.to_u8());
        writer.put_bytes(&entry.entry_id);
    }

    writer.put_len(children.len());
    for (&index, child) in children {
        writer.put_u64(index);
        encode_identifier(&mut writer, child);
    }

    writer.into_bytes()
}

/// Whether `bytes` is a well-formed tree node.
pub fn check_valid_tree_node_serialization(bytes: &[u8]) -> bool {
    decode_tree_node(bytes, None).is_ok()
}

/// Decode and validate a tree node.
///
/// Identifiers are minted by `factory` when one is given. Legacy entries
/// without an entry id receive one from [`compute_entry_id`].
pub fn decode_tree_node(
    bytes: &[u8],
    factory: Option<&dyn ObjectIdentifierFactory>,
) -> Result<TreeNode> {
    let mut reader = Reader::new(bytes);
    let level = reader.read_u8("tree node level")?;

    let entry_count = reader.read_count(MIN_ENCODED_ENTRY_SIZE, "tree node entries")?;
    let mut entries: Vec<Entry> = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let key = reader.read_bytes(usize::MAX, "entry key")?;
        if let Some(previous) = entries.last()
            && previous.key.as_slice() >= key
        {
            return Err(Error::decode(format!(
                "Tree node keys not strictly increasing at entry {}",
                entries.len()
            )));
        }

        let object_identifier = decode_identifier(&mut reader, factory)?;
        let priority = KeyPriority::from_u8(reader.read_u8("entry priority")?)?;
        let entry_id = reader.read_bytes(usize::MAX, "entry id")?;
        let entry_id = if entry_id.is_empty() {
            compute_entry_id(key, &object_identifier, priority)
        } else {
            entry_id.to_vec()
        };

        entries.push(Entry {
            key: key.to_vec(),
            object_identifier,
            priority,
            entry_id,
        });
    }

    let child_count = reader.read_count(MIN_ENCODED_CHILD_SIZE, "tree node children")?;
    if child_count > entries.len() + 1 {
        return Err(Error::decode(format!(
            "Tree node has {} children for {} entries",
            child_count,
            entries.len()
        )));
    }

    let mut children = BTreeMap::new();
    let mut previous_index = None;
    for _ in 0..child_count {
        let index = reader.read_u64("child index")?;
        if index > entries.len() as u64 {
            return Err(Error::decode(format!(
                "Child index {} out of range for {} entries",
                index,
                entries.len()
            )));
        }
        if previous_index.is_some_and(|previous| previous >= index) {
            return Err(Error::decode(format!(
                "Child indices not strictly increasing at {}",
                index
            )));
        }
        previous_index = Some(index);

        let child = decode_identifier(&mut reader, factory)?;
        children.insert(index, child);
    }
    reader.finish("tree node")?;

    Ok(TreeNode {
        level,
        entries,
        children,
    })
}

fn serialize_lossy<S: serde::Serializer>(
    bytes: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn serialize_hex<S: serde::Serializer>(
    bytes: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{ObjectDigest, ObjectType, PieceType};
    use crate::identifier::IdentifierFactory;

    fn id(content: &[u8]) -> ObjectIdentifier {
        ObjectIdentifier::new(
            0,
            0,
            ObjectDigest::compute(PieceType::Chunk, ObjectType::Blob, content),
        )
    }

    fn node_id(content: &[u8]) -> ObjectIdentifier {
        ObjectIdentifier::new(
            0,
            0,
            ObjectDigest::compute(PieceType::Chunk, ObjectType::TreeNode, content),
        )
    }

    fn entry(key: &str, value: &[u8], priority: KeyPriority) -> Entry {
        Entry::new(key.as_bytes().to_vec(), id(value), priority)
    }

    #[test]
    fn test_encode_decode() {
        let entries = vec![
            entry("a", b"small", KeyPriority::Eager),
            entry("b", &[7u8; 100], KeyPriority::Lazy),
        ];
        let children: BTreeMap<_, _> = [(0, node_id(&[1u8; 50])), (2, node_id(&[2u8; 50]))]
            .into_iter()
            .collect();

        let bytes = encode_tree_node(1, &entries, &children);
        assert!(check_valid_tree_node_serialization(&bytes));

        let node = decode_tree_node(&bytes, None).unwrap();
        assert_eq!(node.level, 1);
        assert_eq!(node.entries, entries);
        assert_eq!(node.children, children);
        assert_eq!(node.encode(), bytes);
    }

    #[test]
    fn test_empty_node() {
        let bytes = encode_tree_node(0, &[], &BTreeMap::new());
        assert_eq!(bytes.len(), 1 + 2 * LEN_SIZE);
        let node = decode_tree_node(&bytes, None).unwrap();
        assert!(node.entries.is_empty());
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_unsorted_keys_rejected() {
        let entries = vec![
            entry("b", b"1", KeyPriority::Eager),
            entry("a", b"2", KeyPriority::Eager),
        ];
        let bytes = encode_tree_node(0, &entries, &BTreeMap::new());

        assert!(!check_valid_tree_node_serialization(&bytes));
        assert!(matches!(
            decode_tree_node(&bytes, None),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let entries = vec![
            entry("a", b"1", KeyPriority::Eager),
            entry("a", b"2", KeyPriority::Lazy),
        ];
        let bytes = encode_tree_node(0, &entries, &BTreeMap::new());
        assert!(!check_valid_tree_node_serialization(&bytes));
    }

    #[test]
    fn test_child_index_out_of_range() {
        let entries = vec![entry("a", b"1", KeyPriority::Eager)];
        let in_range: BTreeMap<_, _> = [(1, node_id(b"c"))].into_iter().collect();
        let out_of_range: BTreeMap<_, _> = [(2, node_id(b"c"))].into_iter().collect();

        assert!(check_valid_tree_node_serialization(&encode_tree_node(
            1, &entries, &in_range
        )));
        assert!(!check_valid_tree_node_serialization(&encode_tree_node(
            1,
            &entries,
            &out_of_range
        )));
    }

    /// Encode children as given, bypassing the map's ordering.
    fn encode_raw_children(entries: &[Entry], children: &[(u64, ObjectIdentifier)]) -> Vec<u8> {
        let mut bytes = encode_tree_node(1, entries, &BTreeMap::new());
        bytes.truncate(bytes.len() - LEN_SIZE);
        let mut writer = Writer::default();
        writer.put_len(children.len());
        for (index, child) in children {
            writer.put_u64(*index);
            encode_identifier(&mut writer, child);
        }
        bytes.extend_from_slice(&writer.into_bytes());
        bytes
    }

    #[test]
    fn test_child_indices_must_increase() {
        let entries = vec![
            entry("a", b"1", KeyPriority::Eager),
            entry("b", b"2", KeyPriority::Eager),
        ];

        let valid = encode_raw_children(&entries, &[(0, node_id(b"x")), (2, node_id(b"y"))]);
        assert!(check_valid_tree_node_serialization(&valid));

        let reversed = encode_raw_children(&entries, &[(2, node_id(b"x")), (0, node_id(b"y"))]);
        assert!(!check_valid_tree_node_serialization(&reversed));

        let repeated = encode_raw_children(&entries, &[(1, node_id(b"x")), (1, node_id(b"y"))]);
        assert!(!check_valid_tree_node_serialization(&repeated));
    }

    #[test]
    fn test_too_many_children() {
        let entries = vec![entry("a", b"1", KeyPriority::Eager)];
        let children: Vec<_> = (0..3).map(|i| (i, node_id(&[i as u8]))).collect();
        let bytes = encode_raw_children(&entries, &children);
        assert!(!check_valid_tree_node_serialization(&bytes));
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let entries = vec![entry("a", b"1", KeyPriority::Lazy)];
        let mut bytes = encode_tree_node(0, &entries, &BTreeMap::new());
        // level + count + key(4+1) + identifier(8+8+4+2)
        let priority_offset = 1 + 4 + 5 + 22;
        assert_eq!(bytes[priority_offset], KeyPriority::Lazy.to_u8());
        bytes[priority_offset] = 2;
        assert!(!check_valid_tree_node_serialization(&bytes));
    }

    #[test]
    fn test_bad_digest_is_integrity_error() {
        let entries = vec![entry("a", b"1", KeyPriority::Eager)];
        let mut bytes = encode_tree_node(0, &entries, &BTreeMap::new());
        // Digest tag byte of the single entry.
        let tag_offset = 1 + 4 + 5 + 8 + 8 + 4;
        bytes[tag_offset] = 0x80;
        assert!(matches!(
            decode_tree_node(&bytes, None),
            Err(Error::DataIntegrity { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes =
            encode_tree_node(0, &[entry("a", b"1", KeyPriority::Eager)], &BTreeMap::new());
        bytes.push(0);
        assert!(!check_valid_tree_node_serialization(&bytes));
    }

    #[test]
    fn test_truncation_rejected() {
        let entries = vec![
            entry("a", b"1", KeyPriority::Eager),
            entry("b", &[3u8; 40], KeyPriority::Lazy),
        ];
        let children: BTreeMap<_, _> = [(1, node_id(&[9u8; 40]))].into_iter().collect();
        let bytes = encode_tree_node(2, &entries, &children);
        for len in 0..bytes.len() {
            assert!(!check_valid_tree_node_serialization(&bytes[..len]));
        }
    }

    #[test]
    fn test_legacy_entry_id_synthesized() {
        let mut legacy = entry("key", &[4u8; 64], KeyPriority::Lazy);
        let expected_id = legacy.entry_id.clone();
        legacy.entry_id.clear();

        let bytes = encode_tree_node(0, &[legacy], &BTreeMap::new());
        let node = decode_tree_node(&bytes, None).unwrap();
        assert_eq!(node.entries[0].entry_id, expected_id);
        assert_eq!(node.entries[0].entry_id.len(), crate::hash::HASH_SIZE);

        // Synthesized ids depend on every field.
        let other_priority = compute_entry_id(b"key", &id(&[4u8; 64]), KeyPriority::Eager);
        let other_key = compute_entry_id(b"kez", &id(&[4u8; 64]), KeyPriority::Lazy);
        let other_index = compute_entry_id(
            b"key",
            &ObjectIdentifier::new(1, 0, id(&[4u8; 64]).digest().clone()),
            KeyPriority::Lazy,
        );
        assert_ne!(other_priority, expected_id);
        assert_ne!(other_key, expected_id);
        assert_ne!(other_index, expected_id);
    }

    #[test]
    fn test_decode_attaches_factory() {
        let factory = IdentifierFactory::new();
        let minter: &dyn ObjectIdentifierFactory = &*factory;
        let children: BTreeMap<_, _> = [(0, node_id(&[1u8; 50]))].into_iter().collect();
        let bytes = encode_tree_node(1, &[entry("a", b"v", KeyPriority::Eager)], &children);

        let node = decode_tree_node(&bytes, Some(minter)).unwrap();
        assert!(node.entries[0].object_identifier.factory().is_some());
        assert!(node.children[&0].factory().is_some());
    }

    #[test]
    fn test_append_references_skips_inline() {
        let big_value = id(&[1u8; 100]);
        let big_child = node_id(&[2u8; 100]);
        let node = TreeNode {
            level: 1,
            entries: vec![
                entry("a", b"inline", KeyPriority::Eager),
                Entry::new(b"b".to_vec(), big_value.clone(), KeyPriority::Lazy),
            ],
            children: [(0, node_id(b"tiny")), (2, big_child.clone())]
                .into_iter()
                .collect(),
        };

        let mut references = ObjectReferences::new();
        node.append_references(&mut references);

        let expected: ObjectReferences = [
            (big_value.digest().clone(), KeyPriority::Lazy),
            (big_child.digest().clone(), KeyPriority::Eager),
        ]
        .into_iter()
        .collect();
        assert_eq!(references, expected);
    }

    // Property-based tests
    use proptest::prelude::*;

    fn arb_node() -> impl Strategy<Value = TreeNode> {
        (
            any::<u8>(),
            prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..16), 0..8),
        )
            .prop_flat_map(|(level, keys)| {
                let count = keys.len();
                (
                    Just(level),
                    Just(keys),
                    prop::collection::vec(
                        (
                            prop::collection::vec(any::<u8>(), 0..64),
                            any::<bool>(),
                            prop::collection::vec(any::<u8>(), 1..33),
                        ),
                        count,
                    ),
                    prop::collection::btree_set(0..=count as u64, 0..=count + 1),
                )
            })
            .prop_map(|(level, keys, values, child_indices)| {
                let entries = keys
                    .into_iter()
                    .zip(values)
                    .map(|(key, (value, lazy, entry_id))| Entry {
                        key,
                        object_identifier: id(&value),
                        priority: if lazy { KeyPriority::Lazy } else { KeyPriority::Eager },
                        entry_id,
                    })
                    .collect();
                let children = child_indices
                    .into_iter()
                    .map(|index| (index, node_id(&index.to_le_bytes())))
                    .collect();
                TreeNode {
                    level,
                    entries,
                    children,
                }
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Tree node round-trip
        #[test]
        fn prop_tree_node_roundtrip(node in arb_node()) {
            let bytes = node.encode();
            prop_assert!(check_valid_tree_node_serialization(&bytes));
            let decoded = decode_tree_node(&bytes, None)?;
            prop_assert_eq!(decoded, node);
        }

        /// Arbitrary bytes never panic the validator
        #[test]
        fn prop_validate_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = check_valid_tree_node_serialization(&bytes);
        }

        /// Whatever survives a mutation still satisfies the node invariants
        #[test]
        fn prop_mutation_keeps_invariants(
            node in arb_node(),
            position in any::<prop::sample::Index>(),
            value in any::<u8>(),
        ) {
            let mut bytes = node.encode();
            let i = position.index(bytes.len());
            bytes[i] = value;
            if let Ok(decoded) = decode_tree_node(&bytes, None) {
                for pair in decoded.entries.windows(2) {
                    prop_assert!(pair[0].key < pair[1].key);
                }
                prop_assert!(decoded.children.len() <= decoded.entries.len() + 1);
                for &index in decoded.children.keys() {
                    prop_assert!(index <= decoded.entries.len() as u64);
                }
            }
        }
    }
}
