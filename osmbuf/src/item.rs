//! Zero-copy views over serialized entities.
//!
//! Every item starts with a fixed-size header followed by the tag block, the
//! type-specific payload and zero padding up to a multiple of the pointer
//! width:
//!
//! ```text
//! offset  size  field
//!      0     1  type tag (b'n', b'w', b'r')
//!      1     3  reserved
//!      4     4  total length of the item including padding
//!      8     8  id
//!     16     4  version (lower 31 bits) and visible flag (top bit)
//!     20     4  reserved
//!     24     8  changeset
//!     32     4  uid
//!     36     4  timestamp
//!     40     -  tag block: count (u32), then key and value per tag
//!      -     -  payload
//! ```
//!
//! Strings are stored as u16 byte length followed by UTF-8 bytes. All
//! integers are little endian. Views validate bounds lazily and report
//! malformed data as `Error::Decode` with the absolute byte offset.

use crate::error::{Error, Result};
use crate::object::{
    Entity, Header, ItemType, Node, OsmObject, Relation, RelationMember, Way, WayNode,
};
use crate::position::Position;

use byteorder::{ByteOrder, LittleEndian};

use std::str;

/// Items are aligned to the pointer width.
pub const ALIGNMENT: usize = std::mem::size_of::<usize>();

pub(crate) const TYPE_OFFSET: usize = 0;
pub(crate) const LENGTH_OFFSET: usize = 4;
pub(crate) const ID_OFFSET: usize = 8;
pub(crate) const VERSION_OFFSET: usize = 16;
pub(crate) const CHANGESET_OFFSET: usize = 24;
pub(crate) const UID_OFFSET: usize = 32;
pub(crate) const TIMESTAMP_OFFSET: usize = 36;
pub const HEADER_SIZE: usize = 40;

/// Size of a serialized way node: ref, x, y.
pub(crate) const WAY_NODE_SIZE: usize = 16;

#[inline]
pub(crate) fn padded_length(length: usize) -> usize {
    (length + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

/// Bounds-checked little endian reader over a record.
#[derive(Debug, Clone)]
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    // absolute offset of `data` in the underlying bytes, for error reporting
    base: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], pos: usize, base: usize) -> Self {
        Self { data, pos, base }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.data.len() < self.pos + len {
            return Err(Error::decode(
                (self.base + self.pos) as u64,
                format!("truncated {}", what),
            ));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4, what)?))
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4, what)?))
    }

    fn i64(&mut self, what: &str) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.take(8, what)?))
    }

    fn bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = LittleEndian::read_u16(self.take(2, what)?) as usize;
        self.take(len, what)
    }

    fn str(&mut self, what: &str) -> Result<&'a str> {
        let offset = self.base + self.pos;
        let bytes = self.bytes(what)?;
        str::from_utf8(bytes)
            .map_err(|e| Error::decode(offset as u64, format!("invalid utf-8 in {}: {}", what, e)))
    }

    fn offset(&self) -> u64 {
        (self.base + self.pos) as u64
    }
}

/// View of one serialized entity.
#[derive(Debug, Clone, Copy)]
pub struct Item<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Item<'a> {
    /// Validates the item header at `offset` in `bytes` and creates a view.
    pub fn new(bytes: &'a [u8], offset: usize) -> Result<Self> {
        if offset % ALIGNMENT != 0 {
            return Err(Error::decode(offset as u64, "misaligned item offset"));
        }
        if bytes.len() < offset + HEADER_SIZE {
            return Err(Error::decode(offset as u64, "truncated item header"));
        }
        let header = &bytes[offset..offset + HEADER_SIZE];
        if ItemType::from_byte(header[TYPE_OFFSET]).is_none() {
            return Err(Error::decode(
                offset as u64,
                format!("unknown item type 0x{:02x}", header[TYPE_OFFSET]),
            ));
        }
        let length = LittleEndian::read_u32(&header[LENGTH_OFFSET..]) as usize;
        if length < HEADER_SIZE || length % ALIGNMENT != 0 {
            return Err(Error::decode(
                (offset + LENGTH_OFFSET) as u64,
                format!("invalid item length {}", length),
            ));
        }
        if bytes.len() < offset + length {
            return Err(Error::decode(
                offset as u64,
                format!("item of length {} exceeds the data", length),
            ));
        }
        Ok(Self {
            data: &bytes[offset..offset + length],
            offset,
        })
    }

    /// Offset of the item in the underlying bytes.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total length of the item including padding.
    pub fn length(&self) -> usize {
        self.data.len()
    }

    pub fn item_type(&self) -> ItemType {
        // validated in `new`
        ItemType::from_byte(self.data[TYPE_OFFSET]).unwrap_or(ItemType::Node)
    }

    pub fn id(&self) -> i64 {
        LittleEndian::read_i64(&self.data[ID_OFFSET..])
    }

    pub fn version(&self) -> u32 {
        self.header().version()
    }

    pub fn visible(&self) -> bool {
        self.header().visible()
    }

    pub fn changeset(&self) -> u64 {
        LittleEndian::read_u64(&self.data[CHANGESET_OFFSET..])
    }

    pub fn uid(&self) -> i32 {
        LittleEndian::read_i32(&self.data[UID_OFFSET..])
    }

    pub fn timestamp(&self) -> u32 {
        LittleEndian::read_u32(&self.data[TIMESTAMP_OFFSET..])
    }

    pub fn header(&self) -> Header {
        Header::from_raw(
            self.id(),
            LittleEndian::read_u32(&self.data[VERSION_OFFSET..]),
            self.changeset(),
            self.uid(),
            self.timestamp(),
        )
    }

    /// Iterates through the tags as raw bytes.
    pub fn tags_raw(&self) -> Result<TagsRaw<'a>> {
        let mut decoder = Decoder::new(self.data, HEADER_SIZE, self.offset);
        let remaining = decoder.u32("tag count")?;
        Ok(TagsRaw { decoder, remaining })
    }

    /// Iterates through the tags.
    pub fn tags(&self) -> Result<Tags<'a>> {
        Ok(Tags {
            raw: self.tags_raw()?,
        })
    }

    fn payload(&self) -> Result<Decoder<'a>> {
        let mut tags = self.tags_raw()?;
        for tag in &mut tags {
            tag?;
        }
        Ok(tags.decoder)
    }

    /// Position of a node, `None` for other item types.
    pub fn position(&self) -> Result<Option<Position>> {
        if self.item_type() != ItemType::Node {
            return Ok(None);
        }
        let mut decoder = self.payload()?;
        let x = decoder.i32("node position")?;
        let y = decoder.i32("node position")?;
        Ok(Some(Position::from_raw(x, y)))
    }

    /// Nodes of a way, empty for other item types.
    pub fn way_nodes(&self) -> Result<WayNodes<'a>> {
        if self.item_type() != ItemType::Way {
            return Ok(WayNodes { data: &[] });
        }
        let mut decoder = self.payload()?;
        let count = decoder.u32("way node count")? as usize;
        let data = decoder.take(count * WAY_NODE_SIZE, "way nodes")?;
        Ok(WayNodes { data })
    }

    /// Members of a relation, empty for other item types.
    pub fn members(&self) -> Result<Members<'a>> {
        if self.item_type() != ItemType::Relation {
            return Ok(Members {
                decoder: Decoder::new(&[], 0, self.offset),
                remaining: 0,
            });
        }
        let mut decoder = self.payload()?;
        let remaining = decoder.u32("member count")?;
        Ok(Members { decoder, remaining })
    }

    /// Materializes the item as an owned entity.
    pub fn decode(&self) -> Result<Entity> {
        let header = self.header();
        match self.item_type() {
            ItemType::Node => {
                let mut node = Node::new();
                *node.header_mut() = header;
                self.decode_tags(&mut node)?;
                if let Some(position) = self.position()? {
                    node.set_position(position);
                }
                Ok(Entity::Node(node))
            }
            ItemType::Way => {
                let mut way = Way::new();
                *way.header_mut() = header;
                self.decode_tags(&mut way)?;
                for node in self.way_nodes()? {
                    way.add_node(node);
                }
                Ok(Entity::Way(way))
            }
            ItemType::Relation => {
                let mut relation = Relation::new();
                *relation.header_mut() = header;
                self.decode_tags(&mut relation)?;
                for member in self.members()? {
                    let member = member?;
                    relation.add_member(RelationMember::new(
                        member.member_ref,
                        member.member_type,
                        member.role,
                    ));
                }
                Ok(Entity::Relation(relation))
            }
        }
    }

    fn decode_tags<T: OsmObject>(&self, object: &mut T) -> Result<()> {
        for tag in self.tags()? {
            let (key, value) = tag?;
            object.tags_mut().add(key, value)?;
        }
        Ok(())
    }
}

/// Iterator over raw tag bytes of an item.
#[derive(Debug, Clone)]
pub struct TagsRaw<'a> {
    decoder: Decoder<'a>,
    remaining: u32,
}

impl<'a> TagsRaw<'a> {
    fn read(&mut self) -> Result<(&'a [u8], &'a [u8])> {
        let key = self.decoder.bytes("tag key")?;
        let value = self.decoder.bytes("tag value")?;
        Ok((key, value))
    }
}

impl<'a> Iterator for TagsRaw<'a> {
    type Item = Result<(&'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let tag = self.read();
        if tag.is_err() {
            self.remaining = 0;
        }
        Some(tag)
    }
}

/// Iterator over the tags of an item.
#[derive(Debug, Clone)]
pub struct Tags<'a> {
    raw: TagsRaw<'a>,
}

impl<'a> Tags<'a> {
    fn read(&mut self) -> Result<(&'a str, &'a str)> {
        let key = self.raw.decoder.str("tag key")?;
        let value = self.raw.decoder.str("tag value")?;
        Ok((key, value))
    }
}

impl<'a> Iterator for Tags<'a> {
    type Item = Result<(&'a str, &'a str)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.raw.remaining == 0 {
            return None;
        }
        self.raw.remaining -= 1;
        let tag = self.read();
        if tag.is_err() {
            self.raw.remaining = 0;
        }
        Some(tag)
    }
}

/// Iterator over the nodes of a way item.
#[derive(Debug, Clone)]
pub struct WayNodes<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for WayNodes<'a> {
    type Item = WayNode;

    fn next(&mut self) -> Option<WayNode> {
        if self.data.len() < WAY_NODE_SIZE {
            return None;
        }
        let (node, rest) = self.data.split_at(WAY_NODE_SIZE);
        self.data = rest;
        Some(WayNode::with_position(
            LittleEndian::read_i64(node),
            Position::from_raw(
                LittleEndian::read_i32(&node[8..]),
                LittleEndian::read_i32(&node[12..]),
            ),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.data.len() / WAY_NODE_SIZE;
        (len, Some(len))
    }
}

impl<'a> ExactSizeIterator for WayNodes<'a> {}

/// Relation member as stored in an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberView<'a> {
    pub member_ref: i64,
    pub member_type: ItemType,
    pub role: &'a str,
}

/// Iterator over the members of a relation item.
#[derive(Debug, Clone)]
pub struct Members<'a> {
    decoder: Decoder<'a>,
    remaining: u32,
}

impl<'a> Members<'a> {
    fn read(&mut self) -> Result<MemberView<'a>> {
        let member_ref = self.decoder.i64("member ref")?;
        let offset = self.decoder.offset();
        let type_byte = self.decoder.u8("member type")?;
        let member_type = ItemType::from_byte(type_byte).ok_or_else(|| {
            Error::decode(offset, format!("unknown member type 0x{:02x}", type_byte))
        })?;
        let role = self.decoder.str("member role")?;
        Ok(MemberView {
            member_ref,
            member_type,
            role,
        })
    }
}

impl<'a> Iterator for Members<'a> {
    type Item = Result<MemberView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let member = self.read();
        if member.is_err() {
            self.remaining = 0;
        }
        Some(member)
    }
}

/// Front-to-back iterator over the items in a byte slice.
///
/// Iteration stops after the first malformed item, which is reported as an
/// error.
#[derive(Debug, Clone)]
pub struct Items<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Items<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<Item<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match Item::new(self.data, self.pos) {
            Ok(item) => {
                self.pos += item.length();
                Some(Ok(item))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
