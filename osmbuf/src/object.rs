//! OSM entities: nodes, ways and relations.
//!
//! Entities are mutable so that a reader can repopulate the same object for
//! every entity it decodes. Equality and ordering follow OSM object identity,
//! i.e. they only look at `(id, version)`.

use crate::error::{Error, Result};
use crate::position::Position;
use crate::tags::TagList;

use std::cmp::Ordering;
use std::fmt;

/// Type of an OSM entity, also used as type tag of serialized items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemType {
    Node,
    Way,
    Relation,
}

impl ItemType {
    pub fn as_byte(self) -> u8 {
        match self {
            ItemType::Node => b'n',
            ItemType::Way => b'w',
            ItemType::Relation => b'r',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'n' => Some(ItemType::Node),
            b'w' => Some(ItemType::Way),
            b'r' => Some(ItemType::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ItemType::Node => "node",
            ItemType::Way => "way",
            ItemType::Relation => "relation",
        };
        f.write_str(name)
    }
}

const VISIBLE_BIT: u32 = 1 << 31;
const VERSION_MASK: u32 = !VISIBLE_BIT;

/// Attributes shared by all entities.
///
/// Version and visibility are packed into a single 32 bit word: the top bit
/// holds the visible flag, the lower 31 bits hold the version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    id: i64,
    version_visible: u32,
    changeset: u64,
    uid: i32,
    timestamp: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            id: 0,
            version_visible: VISIBLE_BIT,
            changeset: 0,
            uid: Self::ANONYMOUS_UID,
            timestamp: 0,
        }
    }
}

impl Header {
    pub const ANONYMOUS_UID: i32 = -1;
    pub const MAX_VERSION: u32 = VERSION_MASK;

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn set_id(&mut self, id: i64) -> &mut Self {
        self.id = id;
        self
    }

    pub fn version(&self) -> u32 {
        self.version_visible & VERSION_MASK
    }

    /// Sets the version, leaving the visible flag untouched.
    ///
    /// # Panics
    ///
    /// Panics if `version` exceeds [`Header::MAX_VERSION`]. Use
    /// [`Header::try_set_version`] for untrusted values.
    pub fn set_version(&mut self, version: u32) -> &mut Self {
        assert!(
            version <= Self::MAX_VERSION,
            "version {} out of range",
            version
        );
        self.version_visible = (self.version_visible & VISIBLE_BIT) | version;
        self
    }

    /// Sets the version, failing if it does not fit into 31 bits.
    pub fn try_set_version(&mut self, version: u32) -> Result<&mut Self> {
        if version > Self::MAX_VERSION {
            return Err(Error::OutOfRange {
                field: "version",
                value: version.into(),
                limit: Self::MAX_VERSION.into(),
            });
        }
        Ok(self.set_version(version))
    }

    pub fn visible(&self) -> bool {
        self.version_visible & VISIBLE_BIT != 0
    }

    /// Sets the visible flag, leaving the version untouched.
    pub fn set_visible(&mut self, visible: bool) -> &mut Self {
        if visible {
            self.version_visible |= VISIBLE_BIT;
        } else {
            self.version_visible &= VERSION_MASK;
        }
        self
    }

    pub fn changeset(&self) -> u64 {
        self.changeset
    }

    pub fn set_changeset(&mut self, changeset: u64) -> &mut Self {
        self.changeset = changeset;
        self
    }

    pub fn uid(&self) -> i32 {
        self.uid
    }

    pub fn set_uid(&mut self, uid: i32) -> &mut Self {
        self.uid = uid;
        self
    }

    pub fn user_is_anonymous(&self) -> bool {
        self.uid == Self::ANONYMOUS_UID
    }

    /// Seconds since the unix epoch, 0 if unknown.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u32) -> &mut Self {
        self.timestamp = timestamp;
        self
    }

    /// Raw packed version/visible word as stored in serialized records.
    pub(crate) fn version_visible_raw(&self) -> u32 {
        self.version_visible
    }

    pub(crate) fn from_raw(
        id: i64,
        version_visible: u32,
        changeset: u64,
        uid: i32,
        timestamp: u32,
    ) -> Self {
        Self {
            id,
            version_visible,
            changeset,
            uid,
            timestamp,
        }
    }

    fn key(&self) -> (i64, u32) {
        (self.id, self.version())
    }
}

/// Common interface of nodes, ways and relations.
pub trait OsmObject {
    const TYPE: ItemType;

    fn header(&self) -> &Header;
    fn header_mut(&mut self) -> &mut Header;
    fn tags(&self) -> &TagList;
    fn tags_mut(&mut self) -> &mut TagList;

    /// Resets the object to its default state, keeping allocations.
    fn reset(&mut self);

    fn id(&self) -> i64 {
        self.header().id()
    }

    fn version(&self) -> u32 {
        self.header().version()
    }
}

macro_rules! impl_identity {
    ($type:ty) => {
        impl PartialEq for $type {
            fn eq(&self, other: &Self) -> bool {
                self.header.key() == other.header.key()
            }
        }

        impl Eq for $type {}

        impl PartialOrd for $type {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $type {
            fn cmp(&self, other: &Self) -> Ordering {
                self.header.key().cmp(&other.header.key())
            }
        }
    };
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    header: Header,
    tags: TagList,
    position: Position,
}

impl Node {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) -> &mut Self {
        self.position = position;
        self
    }
}

impl OsmObject for Node {
    const TYPE: ItemType = ItemType::Node;

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn tags(&self) -> &TagList {
        &self.tags
    }

    fn tags_mut(&mut self) -> &mut TagList {
        &mut self.tags
    }

    fn reset(&mut self) {
        self.header = Header::default();
        self.tags.clear();
        self.position = Position::undefined();
    }
}

impl_identity!(Node);

/// Reference from a way to a node, with the node position if resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WayNode {
    node_ref: i64,
    position: Position,
}

impl WayNode {
    pub fn new(node_ref: i64) -> Self {
        Self {
            node_ref,
            position: Position::undefined(),
        }
    }

    pub fn with_position(node_ref: i64, position: Position) -> Self {
        Self { node_ref, position }
    }

    pub fn node_ref(&self) -> i64 {
        self.node_ref
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) -> &mut Self {
        self.position = position;
        self
    }

    pub fn has_position(&self) -> bool {
        self.position.is_defined()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Way {
    header: Header,
    tags: TagList,
    nodes: Vec<WayNode>,
}

impl Way {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn nodes(&self) -> &[WayNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [WayNode] {
        &mut self.nodes
    }

    pub fn add_node(&mut self, node: WayNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn add_node_ref(&mut self, node_ref: i64) -> &mut Self {
        self.add_node(WayNode::new(node_ref))
    }

    /// A way is closed if its first and last node are the same.
    pub fn is_closed(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) => first.node_ref == last.node_ref,
            _ => false,
        }
    }
}

impl OsmObject for Way {
    const TYPE: ItemType = ItemType::Way;

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn tags(&self) -> &TagList {
        &self.tags
    }

    fn tags_mut(&mut self) -> &mut TagList {
        &mut self.tags
    }

    fn reset(&mut self) {
        self.header = Header::default();
        self.tags.clear();
        self.nodes.clear();
    }
}

impl_identity!(Way);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMember {
    member_ref: i64,
    member_type: ItemType,
    role: String,
}

impl RelationMember {
    /// Creates a member. The role is validated when the relation is
    /// serialized.
    pub fn new<S: Into<String>>(member_ref: i64, member_type: ItemType, role: S) -> Self {
        Self {
            member_ref,
            member_type,
            role: role.into(),
        }
    }

    pub fn member_ref(&self) -> i64 {
        self.member_ref
    }

    pub fn member_type(&self) -> ItemType {
        self.member_type
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}

#[derive(Debug, Clone, Default)]
pub struct Relation {
    header: Header,
    tags: TagList,
    members: Vec<RelationMember>,
}

impl Relation {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn members(&self) -> &[RelationMember] {
        &self.members
    }

    pub fn add_member(&mut self, member: RelationMember) -> &mut Self {
        self.members.push(member);
        self
    }
}

impl OsmObject for Relation {
    const TYPE: ItemType = ItemType::Relation;

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn tags(&self) -> &TagList {
        &self.tags
    }

    fn tags_mut(&mut self) -> &mut TagList {
        &mut self.tags
    }

    fn reset(&mut self) {
        self.header = Header::default();
        self.tags.clear();
        self.members.clear();
    }
}

impl_identity!(Relation);

/// An owned entity of any type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    pub fn item_type(&self) -> ItemType {
        match self {
            Entity::Node(_) => ItemType::Node,
            Entity::Way(_) => ItemType::Way,
            Entity::Relation(_) => ItemType::Relation,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Entity::Node(n) => n.header(),
            Entity::Way(w) => w.header(),
            Entity::Relation(r) => r.header(),
        }
    }

    pub fn tags(&self) -> &TagList {
        match self {
            Entity::Node(n) => n.tags(),
            Entity::Way(w) => w.tags(),
            Entity::Relation(r) => r.tags(),
        }
    }
}

impl From<Node> for Entity {
    fn from(node: Node) -> Self {
        Entity::Node(node)
    }
}

impl From<Way> for Entity {
    fn from(way: Way) -> Self {
        Entity::Way(way)
    }
}

impl From<Relation> for Entity {
    fn from(relation: Relation) -> Self {
        Entity::Relation(relation)
    }
}

/// A borrowed entity of any type.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Node(&'a Node),
    Way(&'a Way),
    Relation(&'a Relation),
}

impl<'a> EntityRef<'a> {
    pub fn item_type(&self) -> ItemType {
        match self {
            EntityRef::Node(_) => ItemType::Node,
            EntityRef::Way(_) => ItemType::Way,
            EntityRef::Relation(_) => ItemType::Relation,
        }
    }

    pub fn header(&self) -> &'a Header {
        match *self {
            EntityRef::Node(n) => &n.header,
            EntityRef::Way(w) => &w.header,
            EntityRef::Relation(r) => &r.header,
        }
    }

    pub fn tags(&self) -> &'a TagList {
        match *self {
            EntityRef::Node(n) => &n.tags,
            EntityRef::Way(w) => &w.tags,
            EntityRef::Relation(r) => &r.tags,
        }
    }
}

impl<'a> From<&'a Node> for EntityRef<'a> {
    fn from(node: &'a Node) -> Self {
        EntityRef::Node(node)
    }
}

impl<'a> From<&'a Way> for EntityRef<'a> {
    fn from(way: &'a Way) -> Self {
        EntityRef::Way(way)
    }
}

impl<'a> From<&'a Relation> for EntityRef<'a> {
    fn from(relation: &'a Relation) -> Self {
        EntityRef::Relation(relation)
    }
}

impl<'a> From<&'a Entity> for EntityRef<'a> {
    fn from(entity: &'a Entity) -> Self {
        match entity {
            Entity::Node(n) => EntityRef::Node(n),
            Entity::Way(w) => EntityRef::Way(w),
            Entity::Relation(r) => EntityRef::Relation(r),
        }
    }
}
