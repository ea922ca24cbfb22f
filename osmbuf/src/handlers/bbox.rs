use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::object::{Node, Way};
use crate::position::Bounds;

/// Computes the bounding box of all node positions.
///
/// Nodes precede ways in a sorted file, so the parse is aborted as soon as
/// the first way arrives. Callers should treat that abort as success, see
/// `Error::is_abort`.
#[derive(Debug, Default)]
pub struct FindBbox {
    bounds: Bounds,
}

impl FindBbox {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }
}

impl Handler for FindBbox {
    fn on_node(&mut self, node: &mut Node) -> Result<()> {
        self.bounds.extend(node.position());
        Ok(())
    }

    fn on_way(&mut self, _way: &mut Way) -> Result<()> {
        Err(Error::abort("all nodes read"))
    }
}
