//! Compact lookup tables from OSM ids to 40 bit values.

use crate::error::{Error, Result};
use crate::object::ItemType;

use ahash::AHashMap;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::debug;
use memmap2::Mmap;
use rayon::prelude::*;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Maps i64 ids to u64 values smaller than 2^40.
#[derive(Debug, Default)]
pub struct IdTable {
    // map id x to a value by storing a sorted mapping table for each value of x / 2^24
    // each mapping entry (u64) represents (u24) id set (x % 2^24), and value (u40)
    // only non-empty id sets are stored, ordered by x / 2^24
    data: Vec<(u64, Vec<u64>)>,
}

#[derive(Debug, Default)]
pub struct IdTableBuilder {
    // stored the same data as IdTable, but not yet sorted
    data: AHashMap<u64, Vec<u64>>,
    next_id: u64,
    len: usize,
}

/// Largest value which can be stored in a table.
pub const MAX_VALUE: u64 = (1_u64 << 40) - 1;

const MAGIC: &[u8; 8] = b"OSMBIDX1";

// pack index compactly in 8 bytes: supports 1 trillion indices
fn pack_index(x: (u32, u64)) -> u64 {
    assert!(x.0 < (1_u32 << 24));
    assert!(x.1 <= MAX_VALUE);
    x.1 | (u64::from(x.0) << 40)
}

fn unpack_packed_index(x: u64) -> (u32, u64) {
    ((x >> 40) as u32, x % (1_u64 << 40))
}

// negative ids occur in unpublished data, zigzag keeps them small
fn zigzag(id: i64) -> u64 {
    ((id << 1) ^ (id >> 63)) as u64
}

fn split(id: i64) -> (u64, u32) {
    let x = zigzag(id);
    (x >> 24, (x % (1u64 << 24)) as u32)
}

impl IdTableBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts an id and returns a consecutive index.
    pub fn insert(&mut self, id: i64) -> u64 {
        let result = self.next_id;
        self.insert_value(id, result);
        self.next_id += 1;
        result
    }

    /// Inserts an id with an explicit value, e.g. a byte offset.
    pub fn insert_value(&mut self, id: i64, value: u64) {
        let (id_set, low) = split(id);
        self.data
            .entry(id_set)
            .or_default()
            .push(pack_index((low, value)));
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn build(self) -> IdTable {
        let mut data: Vec<(u64, Vec<u64>)> = self.data.into_iter().collect();
        data.par_iter_mut().for_each(|(_, x)| x.par_sort_unstable());
        data.par_sort_unstable_by_key(|(id_set, _)| *id_set);

        IdTable { data }
    }
}

impl IdTable {
    pub fn get(&self, id: i64) -> Option<u64> {
        let (id_set, low) = split(id);
        let pos = self
            .data
            .binary_search_by_key(&id_set, |(key, _)| *key)
            .ok()?;
        let entries = &self.data[pos].1;
        entries
            .binary_search_by_key(&low, |item| unpack_packed_index(*item).0)
            .ok()
            .map(|pos| unpack_packed_index(entries[pos]).1)
    }

    pub fn len(&self) -> usize {
        self.data.iter().map(|(_, x)| x.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|(_, x)| x.is_empty())
    }

    /// Writes the table in a little endian binary layout.
    ///
    /// The layout is a magic, the number of id sets, and for each id set its
    /// key, its number of entries and the packed entries.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u64::<LittleEndian>(self.data.len() as u64)?;
        for (id_set, entries) in &self.data {
            writer.write_u64::<LittleEndian>(*id_set)?;
            writer.write_u64::<LittleEndian>(entries.len() as u64)?;
            for entry in entries {
                writer.write_u64::<LittleEndian>(*entry)?;
            }
        }
        writer.flush()
    }

    /// Reads a table written by `write_to`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = TableCursor { bytes, pos: 0 };
        if cursor.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(Error::decode(0, "not an id table"));
        }
        let num_sets = cursor.u64("id set count")?;
        // every id set takes at least 16 bytes
        if num_sets > (cursor.remaining() / 16) as u64 {
            return Err(Error::decode(8, format!("invalid id set count {}", num_sets)));
        }
        let mut data = Vec::with_capacity(num_sets as usize);
        let mut last_set = None;
        for _ in 0..num_sets {
            let offset = cursor.pos as u64;
            let id_set = cursor.u64("id set")?;
            if last_set.map_or(false, |last| last >= id_set) {
                return Err(Error::decode(offset, "id sets are not ordered"));
            }
            last_set = Some(id_set);

            let len = cursor.u64("entry count")?;
            if len > (cursor.remaining() / 8) as u64 {
                return Err(Error::decode(offset, format!("invalid entry count {}", len)));
            }
            let offset = cursor.pos as u64;
            let entries: Vec<u64> = cursor
                .take(len as usize * 8, "entries")?
                .chunks_exact(8)
                .map(LittleEndian::read_u64)
                .collect();
            let ordered = entries
                .windows(2)
                .all(|w| unpack_packed_index(w[0]).0 <= unpack_packed_index(w[1]).0);
            if !ordered {
                return Err(Error::decode(offset, "entries are not ordered"));
            }
            data.push((id_set, entries));
        }
        if cursor.remaining() != 0 {
            return Err(Error::decode(cursor.pos as u64, "trailing bytes"));
        }
        Ok(Self { data })
    }
}

struct TableCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TableCursor<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::decode(
                self.pos as u64,
                format!("truncated {}", what),
            ));
        }
        let result = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(result)
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        self.take(8, what).map(LittleEndian::read_u64)
    }
}

/// Builder of an `ItemIndex`.
#[derive(Debug, Default)]
pub struct ItemIndexBuilder {
    nodes: IdTableBuilder,
    ways: IdTableBuilder,
    relations: IdTableBuilder,
}

impl ItemIndexBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, item_type: ItemType, id: i64, offset: usize) {
        let table = match item_type {
            ItemType::Node => &mut self.nodes,
            ItemType::Way => &mut self.ways,
            ItemType::Relation => &mut self.relations,
        };
        table.insert_value(id, offset as u64);
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn build(self) -> ItemIndex {
        ItemIndex {
            nodes: self.nodes.build(),
            ways: self.ways.build(),
            relations: self.relations.build(),
        }
    }
}

/// Per type mapping from entity id to item offset in a serialization buffer.
#[derive(Debug, Default)]
pub struct ItemIndex {
    nodes: IdTable,
    ways: IdTable,
    relations: IdTable,
}

const ITEM_TYPES: [ItemType; 3] = [ItemType::Node, ItemType::Way, ItemType::Relation];

impl ItemIndex {
    pub fn get(&self, item_type: ItemType, id: i64) -> Option<usize> {
        self.table(item_type).get(id).map(|offset| offset as usize)
    }

    pub fn table(&self, item_type: ItemType) -> &IdTable {
        match item_type {
            ItemType::Node => &self.nodes,
            ItemType::Way => &self.ways,
            ItemType::Relation => &self.relations,
        }
    }

    /// Path of the index file of one item type, next to the dump at `dump`.
    ///
    /// For `data.osmbuf` the node index is `data.osmbuf.nodes.idx`.
    pub fn path(dump: &Path, item_type: ItemType) -> PathBuf {
        let suffix = match item_type {
            ItemType::Node => "nodes.idx",
            ItemType::Way => "ways.idx",
            ItemType::Relation => "relations.idx",
        };
        let mut name = dump.as_os_str().to_owned();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Writes one index file per item type next to the dump at `dump`.
    pub fn save(&self, dump: &Path) -> Result<()> {
        for item_type in ITEM_TYPES.iter().copied() {
            let path = Self::path(dump, item_type);
            let table = self.table(item_type);
            debug!("Writing {} {} ids to {}", table.len(), item_type, path.display());
            table.write_to(BufWriter::new(File::create(&path)?))?;
        }
        Ok(())
    }

    /// Reads the index files written by `save` for the dump at `dump`.
    pub fn load(dump: &Path) -> Result<Self> {
        let read = |item_type: ItemType| -> Result<IdTable> {
            let file = File::open(Self::path(dump, item_type))?;
            let data = unsafe { Mmap::map(&file)? };
            IdTable::from_bytes(&data)
        };
        Ok(Self {
            nodes: read(ItemType::Node)?,
            ways: read(ItemType::Way)?,
            relations: read(ItemType::Relation)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mapping_of_small_ints() {
        let mut builder = IdTableBuilder::new();
        let data = [9, 8, 7, 4, 3, 10, 13];
        for x in data.iter() {
            builder.insert(*x);
        }

        let lookup = builder.build();
        for (pos, x) in data.iter().enumerate() {
            let res = lookup.get(*x);
            assert_eq!(res, Some(pos as u64));
        }

        for x in [0, 1, 2, 5, 6, 11, 12, 14].iter() {
            let res = lookup.get(*x);
            assert_eq!(res, None);
        }
    }

    #[test]
    fn test_mapping_of_large_ints() {
        let mut builder = IdTableBuilder::new();
        let data = [2, 1, 1_i64 << 33, 1_i64 << 34];
        for x in data.iter() {
            builder.insert(*x);
        }

        let lookup = builder.build();
        for (pos, x) in data.iter().enumerate() {
            let res = lookup.get(*x);
            assert_eq!(res, Some(pos as u64));
        }

        for x in [0, 3, (1_i64 << 33) + 1, (1_i64 << 34) + 1, 1_i64 << 35].iter() {
            let res = lookup.get(*x);
            assert_eq!(res, None);
        }
    }

    #[test]
    fn test_negative_ids() {
        let mut builder = IdTableBuilder::new();
        let data = [-1, 1, -(1_i64 << 40), 0];
        for x in data.iter() {
            builder.insert(*x);
        }

        let lookup = builder.build();
        for (pos, x) in data.iter().enumerate() {
            assert_eq!(lookup.get(*x), Some(pos as u64));
        }
        assert_eq!(lookup.get(-2), None);
        assert_eq!(lookup.len(), 4);
    }

    #[test]
    fn test_lookup_beyond_last_id_set() {
        let mut builder = IdTableBuilder::new();
        builder.insert(1);
        let lookup = builder.build();
        // the id set right after the last one must not be accessed
        assert_eq!(lookup.get(1_i64 << 23), None);
        assert_eq!(lookup.get(1_i64 << 40), None);
    }

    #[test]
    fn test_extreme_ids() {
        let mut builder = IdTableBuilder::new();
        let data = [1_i64 << 56, i64::MIN, i64::MAX, -1, 3];
        for x in data.iter() {
            builder.insert(*x);
        }
        // only the touched id sets are allocated
        assert_eq!(builder.data.len(), 3);

        let lookup = builder.build();
        for (pos, x) in data.iter().enumerate() {
            assert_eq!(lookup.get(*x), Some(pos as u64));
        }
        assert_eq!(lookup.get((1_i64 << 56) + 1), None);
        assert_eq!(lookup.get(i64::MIN + 1), None);
        assert_eq!(lookup.get(i64::MAX - 1), None);
        assert_eq!(lookup.len(), 5);
    }

    #[test]
    fn test_write_and_read_table() {
        let mut builder = IdTableBuilder::new();
        let data = [17, -4, 1_i64 << 30, i64::MAX, 18];
        for x in data.iter() {
            builder.insert_value(*x, (*x as u64) & MAX_VALUE);
        }
        let table = builder.build();

        let mut bytes = Vec::new();
        table.write_to(&mut bytes).unwrap();
        let table = IdTable::from_bytes(&bytes).unwrap();
        for x in data.iter() {
            assert_eq!(table.get(*x), Some((*x as u64) & MAX_VALUE));
        }
        assert_eq!(table.get(19), None);
        assert_eq!(table.len(), data.len());

        assert!(IdTable::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(IdTable::from_bytes(b"something else").is_err());
        let mut huge_count = bytes.clone();
        huge_count[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(IdTable::from_bytes(&huge_count).is_err());
    }

    #[test]
    fn test_large_indices() {
        let mut builder = IdTableBuilder::new();
        builder.next_id += 1u64 << 33;
        let data = [2, 1, 1_i64 << 33, 1_i64 << 34];
        for x in data.iter() {
            builder.insert(*x);
        }

        let lookup = builder.build();
        for (pos, x) in data.iter().enumerate() {
            let res = lookup.get(*x);
            assert_eq!(res, Some((pos as u64) + (1u64 << 33)));
        }
    }

    #[test]
    fn test_item_index_separates_types() {
        let mut builder = ItemIndexBuilder::new();
        builder.insert(ItemType::Node, 1, 0);
        builder.insert(ItemType::Way, 1, 64);
        builder.insert(ItemType::Relation, 7, 128);
        assert_eq!(builder.len(), 3);

        let index = builder.build();
        assert_eq!(index.get(ItemType::Node, 1), Some(0));
        assert_eq!(index.get(ItemType::Way, 1), Some(64));
        assert_eq!(index.get(ItemType::Relation, 7), Some(128));
        assert_eq!(index.get(ItemType::Relation, 1), None);
    }

    #[test]
    fn test_save_and_load_item_index() {
        let mut builder = ItemIndexBuilder::new();
        builder.insert(ItemType::Node, 1, 0);
        builder.insert(ItemType::Node, -5, 32);
        builder.insert(ItemType::Way, 1, 64);
        builder.insert(ItemType::Relation, 1_i64 << 50, 128);
        let index = builder.build();

        let dir = std::env::temp_dir().join(format!("osmbuf-ids-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dump = dir.join("data.osmbuf");
        index.save(&dump).unwrap();
        assert!(dir.join("data.osmbuf.ways.idx").exists());

        let loaded = ItemIndex::load(&dump).unwrap();
        assert_eq!(loaded.get(ItemType::Node, 1), Some(0));
        assert_eq!(loaded.get(ItemType::Node, -5), Some(32));
        assert_eq!(loaded.get(ItemType::Way, 1), Some(64));
        assert_eq!(loaded.get(ItemType::Relation, 1_i64 << 50), Some(128));
        assert_eq!(loaded.get(ItemType::Relation, 1), None);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
