use crate::buffer::SerializationBuffer;
use crate::error::Result;
use crate::handler::Handler;
use crate::ids::{ItemIndex, ItemIndexBuilder};
use crate::object::{EntityRef, Node, OsmObject, Relation, Way};

/// Appends every entity it receives to a serialization buffer, in callback
/// order.
///
/// Optionally records the offset of each item, so that items can be looked
/// up by type and id after the parse.
pub struct SerializationHandler<'a> {
    buffer: &'a mut SerializationBuffer,
    index: Option<ItemIndexBuilder>,
}

impl<'a> SerializationHandler<'a> {
    pub fn new(buffer: &'a mut SerializationBuffer) -> Self {
        Self {
            buffer,
            index: None,
        }
    }

    /// Like `new`, but also builds an index from ids to item offsets.
    pub fn with_index(buffer: &'a mut SerializationBuffer) -> Self {
        Self {
            buffer,
            index: Some(ItemIndexBuilder::new()),
        }
    }

    pub fn buffer(&self) -> &SerializationBuffer {
        self.buffer
    }

    /// Finishes the offset index, if one was requested.
    pub fn into_index(self) -> Option<ItemIndex> {
        self.index.map(ItemIndexBuilder::build)
    }

    fn write<'e, E>(&mut self, entity: &'e E) -> Result<()>
    where
        E: OsmObject,
        &'e E: Into<EntityRef<'e>>,
    {
        let offset = self.buffer.write(entity)?;
        if let Some(index) = self.index.as_mut() {
            index.insert(E::TYPE, entity.id(), offset);
        }
        Ok(())
    }
}

impl<'a> Handler for SerializationHandler<'a> {
    fn on_node(&mut self, node: &mut Node) -> Result<()> {
        self.write(&*node)
    }

    fn on_way(&mut self, way: &mut Way) -> Result<()> {
        self.write(&*way)
    }

    fn on_relation(&mut self, relation: &mut Relation) -> Result<()> {
        self.write(&*relation)
    }
}
