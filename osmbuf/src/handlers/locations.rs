use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::ids::{IdTable, IdTableBuilder};
use crate::object::{Node, OsmObject, Way};
use crate::position::Position;

use log::debug;

enum Index {
    Building(IdTableBuilder),
    Frozen(IdTable),
}

/// Remembers node positions and fills in the positions of way nodes.
///
/// All nodes must precede the first way, as in sorted OSM files. Put this
/// handler in front of a handler which needs positions, e.g.
/// `(NodeLocations::new(), SerializationHandler::new(&mut buffer))`.
pub struct NodeLocations {
    index: Index,
    positions: Vec<Position>,
    unresolved: u64,
}

impl Default for NodeLocations {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLocations {
    pub fn new() -> Self {
        Self {
            index: Index::Building(IdTableBuilder::new()),
            positions: Vec::new(),
            unresolved: 0,
        }
    }

    /// Number of stored node positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of way node references without a known node.
    pub fn unresolved(&self) -> u64 {
        self.unresolved
    }

    fn freeze(&mut self) {
        if let Index::Building(builder) = &mut self.index {
            let builder = std::mem::take(builder);
            debug!("Indexing {} node positions", builder.len());
            self.index = Index::Frozen(builder.build());
        }
    }
}

impl Handler for NodeLocations {
    fn on_node(&mut self, node: &mut Node) -> Result<()> {
        match &mut self.index {
            Index::Building(builder) => {
                builder.insert(node.id());
                self.positions.push(node.position());
                Ok(())
            }
            Index::Frozen(_) => Err(Error::Unsupported(format!(
                "node {} after ways, input is not sorted",
                node.id()
            ))),
        }
    }

    fn on_way(&mut self, way: &mut Way) -> Result<()> {
        self.freeze();
        let table = match &self.index {
            Index::Frozen(table) => table,
            Index::Building(_) => return Ok(()),
        };
        let positions = &self.positions;
        let mut unresolved = 0;
        for way_node in way.nodes_mut() {
            match table
                .get(way_node.node_ref())
                .and_then(|idx| positions.get(idx as usize))
            {
                Some(position) => {
                    way_node.set_position(*position);
                }
                None => unresolved += 1,
            }
        }
        self.unresolved += unresolved;
        Ok(())
    }
}
