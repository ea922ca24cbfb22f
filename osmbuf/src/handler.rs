//! Consumers of the entity stream.
//!
//! A `Handler` is driven by a `Reader`. All callbacks have empty default
//! implementations, so a handler only implements what it is interested in.
//! Entities are lent as `&mut` and are only valid for the duration of the
//! callback: the reader reuses them for the next entity.

use crate::error::Result;
use crate::object::{Node, Relation, Way};

pub trait Handler {
    /// Called once before the first entity.
    fn on_init(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_node(&mut self, _node: &mut Node) -> Result<()> {
        Ok(())
    }

    fn on_way(&mut self, _way: &mut Way) -> Result<()> {
        Ok(())
    }

    fn on_relation(&mut self, _relation: &mut Relation) -> Result<()> {
        Ok(())
    }

    /// Called once after the last entity, unless the parse failed.
    fn on_final(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Handler which needs to see all relations before any way.
///
/// Driven by `Reader::apply_two_pass`: the first pass delivers relations
/// only, the second pass ways only.
pub trait TwoPassHandler: Handler {
    fn before_relations(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_relations(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_ways(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<H: Handler + ?Sized> Handler for &mut H {
    fn on_init(&mut self) -> Result<()> {
        (**self).on_init()
    }

    fn on_node(&mut self, node: &mut Node) -> Result<()> {
        (**self).on_node(node)
    }

    fn on_way(&mut self, way: &mut Way) -> Result<()> {
        (**self).on_way(way)
    }

    fn on_relation(&mut self, relation: &mut Relation) -> Result<()> {
        (**self).on_relation(relation)
    }

    fn on_final(&mut self) -> Result<()> {
        (**self).on_final()
    }
}

impl<H: TwoPassHandler + ?Sized> TwoPassHandler for &mut H {
    fn before_relations(&mut self) -> Result<()> {
        (**self).before_relations()
    }

    fn after_relations(&mut self) -> Result<()> {
        (**self).after_relations()
    }

    fn after_ways(&mut self) -> Result<()> {
        (**self).after_ways()
    }
}

/// Chains two handlers: every callback goes to the first, then the second.
///
/// The second handler sees the changes made by the first one, e.g. way node
/// positions filled in by `NodeLocations`.
impl<A: Handler, B: Handler> Handler for (A, B) {
    fn on_init(&mut self) -> Result<()> {
        self.0.on_init()?;
        self.1.on_init()
    }

    fn on_node(&mut self, node: &mut Node) -> Result<()> {
        self.0.on_node(node)?;
        self.1.on_node(node)
    }

    fn on_way(&mut self, way: &mut Way) -> Result<()> {
        self.0.on_way(way)?;
        self.1.on_way(way)
    }

    fn on_relation(&mut self, relation: &mut Relation) -> Result<()> {
        self.0.on_relation(relation)?;
        self.1.on_relation(relation)
    }

    fn on_final(&mut self) -> Result<()> {
        self.0.on_final()?;
        self.1.on_final()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::object::OsmObject;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        calls: Vec<String>,
    }

    impl Handler for Recorder {
        fn on_node(&mut self, node: &mut Node) -> Result<()> {
            self.calls.push(format!("{}:node {}", self.name, node.id()));
            let version = node.version() + 1;
            node.header_mut().set_version(version);
            Ok(())
        }
    }

    struct Abort;

    impl Handler for Abort {
        fn on_node(&mut self, _node: &mut Node) -> Result<()> {
            Err(Error::abort("enough"))
        }
    }

    #[test]
    fn test_default_callbacks_do_nothing() {
        struct Nothing;
        impl Handler for Nothing {}

        let mut handler = Nothing;
        assert!(handler.on_init().is_ok());
        assert!(handler.on_way(&mut Way::new()).is_ok());
        assert!(handler.on_relation(&mut Relation::new()).is_ok());
        assert!(handler.on_final().is_ok());
    }

    #[test]
    fn test_pair_forwards_in_order() {
        let mut first = Recorder {
            name: "a",
            ..Default::default()
        };
        let mut second = Recorder {
            name: "b",
            ..Default::default()
        };
        let mut node = Node::new();
        node.header_mut().set_id(3).set_version(1);
        {
            let mut pair = (&mut first, &mut second);
            pair.on_node(&mut node).unwrap();
        }
        assert_eq!(first.calls, vec!["a:node 3"]);
        assert_eq!(second.calls, vec!["b:node 3"]);
        // both handlers modified the same scratch object
        assert_eq!(node.version(), 3);
    }

    #[test]
    fn test_pair_stops_at_first_error() {
        let mut second = Recorder::default();
        let mut pair = (Abort, &mut second);
        assert!(pair.on_node(&mut Node::new()).unwrap_err().is_abort());
        assert!(second.calls.is_empty());
    }
}
