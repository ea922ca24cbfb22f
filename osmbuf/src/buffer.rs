use crate::error::{Error, Result};
use crate::item::{
    padded_length, Item, Items, ALIGNMENT, CHANGESET_OFFSET, HEADER_SIZE, ID_OFFSET,
    LENGTH_OFFSET, TIMESTAMP_OFFSET, TYPE_OFFSET, UID_OFFSET, VERSION_OFFSET, WAY_NODE_SIZE,
};
use crate::object::EntityRef;
use crate::tags::validate_text;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use std::io;

/// What happens when a write does not fit into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Fail the write with `Error::Capacity`.
    Fixed,
    /// Double the capacity until the record fits.
    Double,
}

/// Append-only buffer of serialized entities.
///
/// Entities are written as self-describing items (see `crate::item` for the
/// layout). The offset returned by `write` is relative to the start of the
/// buffer and stays valid when the buffer grows.
#[derive(Debug, Clone)]
pub struct SerializationBuffer {
    data: Vec<u8>,
    capacity: usize,
    growth: Growth,
    count: usize,
}

impl SerializationBuffer {
    pub fn new(capacity: usize, growth: Growth) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            growth,
            count: 0,
        }
    }

    /// Buffer which never grows beyond `capacity` bytes.
    pub fn fixed(capacity: usize) -> Self {
        Self::new(capacity, Growth::Fixed)
    }

    /// Buffer which doubles its capacity when full.
    pub fn growable(capacity: usize) -> Self {
        Self::new(capacity, Growth::Double)
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn growth(&self) -> Growth {
        self.growth
    }

    /// Number of items written.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Removes all items. Previously returned offsets become invalid.
    pub fn clear(&mut self) {
        self.data.clear();
        self.count = 0;
    }

    /// Serializes an entity at the end of the buffer and returns its offset.
    ///
    /// Text is validated before anything is written, so on error the buffer
    /// is left unchanged.
    pub fn write<'a, E: Into<EntityRef<'a>>>(&mut self, entity: E) -> Result<usize> {
        let entity = entity.into();
        let length = padded_length(encoded_length(entity)?);
        if length > u32::MAX as usize {
            return Err(Error::Capacity {
                needed: length,
                capacity: u32::MAX as usize,
            });
        }
        self.reserve(length)?;

        let offset = self.data.len();
        self.data.resize(offset + length, 0);
        let mut encoder = Encoder {
            buf: &mut self.data[offset..offset + length],
            pos: 0,
        };
        encode(&mut encoder, entity, length as u32);
        debug_assert!(padded_length(encoder.pos) == length);

        self.count += 1;
        Ok(offset)
    }

    fn reserve(&mut self, needed: usize) -> Result<()> {
        let available = self.capacity - self.data.len();
        if needed <= available {
            return Ok(());
        }
        match self.growth {
            Growth::Fixed => Err(Error::Capacity {
                needed,
                capacity: available,
            }),
            Growth::Double => {
                let mut capacity = self.capacity.max(ALIGNMENT);
                while capacity - self.data.len() < needed {
                    capacity *= 2;
                }
                debug!(
                    "Growing serialization buffer from {} to {} bytes",
                    self.capacity, capacity
                );
                self.data.reserve_exact(capacity - self.data.len());
                self.capacity = capacity;
                Ok(())
            }
        }
    }

    /// Returns a view of the item at `offset`.
    pub fn at(&self, offset: usize) -> Result<Item<'_>> {
        Item::new(&self.data, offset)
    }

    /// Iterates through all items in write order.
    pub fn iter(&self) -> Items<'_> {
        Items::new(&self.data)
    }

    /// Writes the serialized items to `writer`, e.g. to dump them to a file.
    pub fn write_to<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.data)?;
        writer.flush()
    }
}

impl<'a> IntoIterator for &'a SerializationBuffer {
    type Item = Result<Item<'a>>;
    type IntoIter = Items<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn text_length(field: &'static str, text: &str) -> Result<usize> {
    validate_text(field, text)?;
    Ok(2 + text.len())
}

/// Validates the entity and returns its unpadded encoded length.
fn encoded_length(entity: EntityRef) -> Result<usize> {
    let mut length = HEADER_SIZE + 4;
    for tag in entity.tags() {
        length += text_length("tag key", tag.key())?;
        length += text_length("tag value", tag.value())?;
    }
    length += match entity {
        EntityRef::Node(_) => 8,
        EntityRef::Way(way) => 4 + way.nodes().len() * WAY_NODE_SIZE,
        EntityRef::Relation(relation) => {
            let mut members = 4;
            for member in relation.members() {
                members += 8 + 1 + text_length("member role", member.role())?;
            }
            members
        }
    };
    Ok(length)
}

struct Encoder<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Encoder<'a> {
    fn u8(&mut self, x: u8) {
        self.buf[self.pos] = x;
        self.pos += 1;
    }

    fn u16(&mut self, x: u16) {
        LittleEndian::write_u16(&mut self.buf[self.pos..], x);
        self.pos += 2;
    }

    fn u32(&mut self, x: u32) {
        LittleEndian::write_u32(&mut self.buf[self.pos..], x);
        self.pos += 4;
    }

    fn i32(&mut self, x: i32) {
        LittleEndian::write_i32(&mut self.buf[self.pos..], x);
        self.pos += 4;
    }

    fn u64(&mut self, x: u64) {
        LittleEndian::write_u64(&mut self.buf[self.pos..], x);
        self.pos += 8;
    }

    fn i64(&mut self, x: i64) {
        LittleEndian::write_i64(&mut self.buf[self.pos..], x);
        self.pos += 8;
    }

    fn str(&mut self, s: &str) {
        // length bounded by validation: 255 characters of at most 4 bytes
        self.u16(s.len() as u16);
        self.buf[self.pos..self.pos + s.len()].copy_from_slice(s.as_bytes());
        self.pos += s.len();
    }

    fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }
}

fn encode(encoder: &mut Encoder, entity: EntityRef, length: u32) {
    let header = entity.header();

    encoder.seek(TYPE_OFFSET);
    encoder.u8(entity.item_type().as_byte());
    encoder.seek(LENGTH_OFFSET);
    encoder.u32(length);
    encoder.seek(ID_OFFSET);
    encoder.i64(header.id());
    encoder.seek(VERSION_OFFSET);
    encoder.u32(header.version_visible_raw());
    encoder.seek(CHANGESET_OFFSET);
    encoder.u64(header.changeset());
    encoder.seek(UID_OFFSET);
    encoder.i32(header.uid());
    encoder.seek(TIMESTAMP_OFFSET);
    encoder.u32(header.timestamp());
    encoder.seek(HEADER_SIZE);

    let tags = entity.tags();
    encoder.u32(tags.len() as u32);
    for tag in tags {
        encoder.str(tag.key());
        encoder.str(tag.value());
    }

    match entity {
        EntityRef::Node(node) => {
            encoder.i32(node.position().x());
            encoder.i32(node.position().y());
        }
        EntityRef::Way(way) => {
            encoder.u32(way.nodes().len() as u32);
            for node in way.nodes() {
                encoder.i64(node.node_ref());
                encoder.i32(node.position().x());
                encoder.i32(node.position().y());
            }
        }
        EntityRef::Relation(relation) => {
            encoder.u32(relation.members().len() as u32);
            for member in relation.members() {
                encoder.i64(member.member_ref());
                encoder.u8(member.member_type().as_byte());
                encoder.str(member.role());
            }
        }
    }
}
