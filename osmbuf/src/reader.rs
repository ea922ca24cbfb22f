//! Drives an input source through a handler.

use crate::error::{Error, Result};
use crate::handler::{Handler, TwoPassHandler};
use crate::object::ItemType;
use crate::source::{EntityFilter, EntitySink, InputSource, Scratch};

use log::info;

/// Lifecycle of a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Init,
    Reading,
    Final,
}

/// Reads an input source and calls a handler for every entity, in file
/// order.
///
/// The reader owns one reusable node, way and relation for the duration of
/// a parse and lends them to the handler. If a callback returns an error,
/// the parse stops immediately and `on_final` is not called.
pub struct Reader<S> {
    source: S,
    state: ReaderState,
}

/// Counts of entities delivered in a parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

struct Dispatch<'h, H> {
    scratch: Scratch,
    handler: &'h mut H,
    counts: Counts,
}

impl<'h, H: Handler> Dispatch<'h, H> {
    fn new(handler: &'h mut H) -> Self {
        Self {
            scratch: Scratch::default(),
            handler,
            counts: Counts::default(),
        }
    }
}

impl<'h, H: Handler> EntitySink for Dispatch<'h, H> {
    fn scratch(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    fn deliver(&mut self, item_type: ItemType) -> Result<()> {
        match item_type {
            ItemType::Node => {
                self.counts.nodes += 1;
                self.handler.on_node(&mut self.scratch.node)
            }
            ItemType::Way => {
                self.counts.ways += 1;
                self.handler.on_way(&mut self.scratch.way)
            }
            ItemType::Relation => {
                self.counts.relations += 1;
                self.handler.on_relation(&mut self.scratch.relation)
            }
        }
    }
}

impl<S: InputSource> Reader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: ReaderState::Init,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Restarts the source if it was read before.
    fn prepare(&mut self) -> Result<()> {
        if self.state != ReaderState::Init {
            self.source.rewind()?;
            self.state = ReaderState::Init;
        }
        Ok(())
    }

    /// Reads the whole input, calling the handler for every entity.
    pub fn apply<H: Handler>(&mut self, handler: H) -> Result<Counts> {
        self.apply_filtered(EntityFilter::ALL, handler)
    }

    /// Reads the input, calling the handler only for entities accepted by
    /// `filter`.
    pub fn apply_filtered<H: Handler>(&mut self, filter: EntityFilter, mut handler: H) -> Result<Counts> {
        self.prepare()?;
        info!("Reading {}...", self.source.file());

        let mut sink = Dispatch::new(&mut handler);
        sink.handler.on_init()?;
        self.state = ReaderState::Reading;
        let result = self.source.read(filter, &mut sink);
        self.state = ReaderState::Final;
        result?;
        sink.handler.on_final()?;

        info!(
            "Read {} nodes, {} ways, {} relations",
            sink.counts.nodes, sink.counts.ways, sink.counts.relations
        );
        Ok(sink.counts)
    }

    /// Reads the input twice: relations in the first pass, ways in the
    /// second.
    ///
    /// The source must be rewindable, otherwise this fails before the handler
    /// is called at all.
    pub fn apply_two_pass<H: TwoPassHandler>(&mut self, mut handler: H) -> Result<Counts> {
        if !self.source.is_rewindable() {
            return Err(Error::UnseekableSource {
                name: self.source.file().to_string(),
            });
        }
        self.prepare()?;

        let mut sink = Dispatch::new(&mut handler);
        sink.handler.on_init()?;
        self.state = ReaderState::Reading;
        let result = two_passes(&mut self.source, &mut sink);
        self.state = ReaderState::Final;
        result?;
        sink.handler.on_final()?;

        info!(
            "Read {} relations and {} ways in two passes",
            sink.counts.relations, sink.counts.ways
        );
        Ok(sink.counts)
    }
}

fn two_passes<S: InputSource, H: TwoPassHandler>(source: &mut S, sink: &mut Dispatch<H>) -> Result<()> {
    info!("First pass: reading relations...");
    sink.handler.before_relations()?;
    source.read(EntityFilter::RELATIONS, sink)?;
    sink.handler.after_relations()?;

    source.rewind()?;

    info!("Second pass: reading ways...");
    source.read(EntityFilter::WAYS, sink)?;
    sink.handler.after_ways()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::{Entity, Node, OsmObject, Relation, Way};
    use crate::source::MemorySource;

    fn entities() -> Vec<Entity> {
        let mut result = Vec::new();
        for id in 1..=2 {
            let mut node = Node::new();
            node.header_mut().set_id(id);
            result.push(node.into());
        }
        let mut way = Way::new();
        way.header_mut().set_id(10);
        result.push(way.into());
        let mut relation = Relation::new();
        relation.header_mut().set_id(100);
        result.push(relation.into());
        result
    }

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl Handler for Trace {
        fn on_init(&mut self) -> Result<()> {
            self.0.push("init".into());
            Ok(())
        }

        fn on_node(&mut self, node: &mut Node) -> Result<()> {
            self.0.push(format!("node {}", node.id()));
            Ok(())
        }

        fn on_way(&mut self, way: &mut Way) -> Result<()> {
            self.0.push(format!("way {}", way.id()));
            Ok(())
        }

        fn on_relation(&mut self, relation: &mut Relation) -> Result<()> {
            self.0.push(format!("relation {}", relation.id()));
            Ok(())
        }

        fn on_final(&mut self) -> Result<()> {
            self.0.push("final".into());
            Ok(())
        }
    }

    impl TwoPassHandler for Trace {
        fn before_relations(&mut self) -> Result<()> {
            self.0.push("before_relations".into());
            Ok(())
        }

        fn after_relations(&mut self) -> Result<()> {
            self.0.push("after_relations".into());
            Ok(())
        }

        fn after_ways(&mut self) -> Result<()> {
            self.0.push("after_ways".into());
            Ok(())
        }
    }

    #[test]
    fn test_single_pass_order() {
        let mut reader = Reader::new(MemorySource::new(entities()));
        assert_eq!(reader.state(), ReaderState::Init);
        let mut trace = Trace::default();
        let counts = reader.apply(&mut trace).unwrap();
        assert_eq!(
            trace.0,
            vec!["init", "node 1", "node 2", "way 10", "relation 100", "final"]
        );
        assert_eq!(
            counts,
            Counts {
                nodes: 2,
                ways: 1,
                relations: 1
            }
        );
        assert_eq!(reader.state(), ReaderState::Final);
    }

    #[test]
    fn test_two_pass_order() {
        let mut reader = Reader::new(MemorySource::new(entities()));
        let mut trace = Trace::default();
        reader.apply_two_pass(&mut trace).unwrap();
        assert_eq!(
            trace.0,
            vec![
                "init",
                "before_relations",
                "relation 100",
                "after_relations",
                "way 10",
                "after_ways",
                "final"
            ]
        );
    }

    #[test]
    fn test_two_pass_needs_rewindable_source() {
        let mut reader = Reader::new(MemorySource::unseekable(entities()));
        let mut trace = Trace::default();
        match reader.apply_two_pass(&mut trace) {
            Err(Error::UnseekableSource { .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(trace.0.is_empty());
        assert_eq!(reader.state(), ReaderState::Init);
    }

    struct StopAtWay(Trace);

    impl Handler for StopAtWay {
        fn on_init(&mut self) -> Result<()> {
            self.0.on_init()
        }

        fn on_node(&mut self, node: &mut Node) -> Result<()> {
            self.0.on_node(node)
        }

        fn on_way(&mut self, _way: &mut Way) -> Result<()> {
            Err(Error::abort("no ways"))
        }

        fn on_final(&mut self) -> Result<()> {
            self.0.on_final()
        }
    }

    #[test]
    fn test_abort_skips_final() {
        let mut reader = Reader::new(MemorySource::new(entities()));
        let mut handler = StopAtWay(Trace::default());
        let err = reader.apply(&mut handler).unwrap_err();
        assert!(err.is_abort());
        assert_eq!(handler.0 .0, vec!["init", "node 1", "node 2"]);
        assert_eq!(reader.state(), ReaderState::Final);
    }

    #[test]
    fn test_apply_again_rewinds() {
        let mut reader = Reader::new(MemorySource::new(entities()));
        reader.apply(Trace::default()).unwrap();
        let mut trace = Trace::default();
        reader
            .apply_filtered(EntityFilter::NODES, &mut trace)
            .unwrap();
        assert_eq!(trace.0, vec!["init", "node 1", "node 2", "final"]);
    }

    #[test]
    fn test_apply_again_on_unseekable_source() {
        let mut reader = Reader::new(MemorySource::unseekable(entities()));
        reader.apply(Trace::default()).unwrap();
        match reader.apply(Trace::default()) {
            Err(Error::UnseekableSource { .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
