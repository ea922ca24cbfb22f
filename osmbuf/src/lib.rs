//! Streaming access to OpenStreetMap data.
//!
//! An input source (PBF or XML) is read by a [`Reader`], which lends every
//! node, way and relation to a [`Handler`]. Handlers can be composed as
//! tuples. The [`SerializationHandler`] appends entities to a
//! [`SerializationBuffer`], a compact binary representation which can be
//! written to disk and read back with random access through [`Item`] views.
//!
//! ```no_run
//! use osmbuf::{handlers::NodeLocations, Reader, SerializationBuffer, SerializationHandler};
//!
//! # fn main() -> osmbuf::Result<()> {
//! let mut buffer = SerializationBuffer::growable(1 << 20);
//! let mut reader = Reader::new(osmbuf::open("berlin.osm.pbf")?);
//! reader.apply((NodeLocations::new(), SerializationHandler::new(&mut buffer)))?;
//! for item in &buffer {
//!     let item = item?;
//!     println!("{} {}", item.item_type(), item.id());
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
mod error;
mod handler;
mod ids;
mod item;
mod object;
mod parallel;
mod position;
mod reader;
mod source;
mod tags;

pub mod handlers;
pub mod pbf;
pub mod xml;

pub use crate::buffer::{Growth, SerializationBuffer};
pub use crate::error::{Error, Result};
pub use crate::handler::{Handler, TwoPassHandler};
pub use crate::handlers::SerializationHandler;
pub use crate::ids::{IdTable, IdTableBuilder, ItemIndex, ItemIndexBuilder};
pub use crate::item::{
    Item, Items, MemberView, Members, Tags, TagsRaw, WayNodes, ALIGNMENT, HEADER_SIZE,
};
pub use crate::object::{
    Entity, EntityRef, Header, ItemType, Node, OsmObject, Relation, RelationMember, Way, WayNode,
};
pub use crate::position::{Bounds, Position, COORD_PRECISION};
pub use crate::reader::{Counts, Reader, ReaderState};
pub use crate::source::{
    open, open_file, Compression, EntityFilter, EntitySink, FileFormat, FileType, InputSource,
    MemorySource, OsmFile, Scratch,
};
pub use crate::tags::{Tag, TagList, MAX_TEXT_CHARS};
