use osmbuf::handlers::{FindBbox, MemberWays, NodeLocations, Statistics};
use osmbuf::xml::XmlSource;
use osmbuf::{
    Entity, Error, ItemType, Items, OsmFile, Position, Reader, SerializationBuffer,
    SerializationHandler,
};

use std::io::Cursor;

const DATA: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version="0.6" generator="pipeline test">
  <node id="1" version="1" lat="52.5" lon="13.4">
    <tag k="name" v="Alexanderplatz"/>
  </node>
  <node id="2" version="1" lat="52.6" lon="13.3"/>
  <node id="3" version="2" lat="52.4" lon="13.5"/>
  <way id="10" version="1">
    <nd ref="1"/>
    <nd ref="2"/>
    <nd ref="3"/>
    <nd ref="1"/>
    <tag k="area" v="yes"/>
  </way>
  <way id="11" version="1">
    <nd ref="3"/>
    <nd ref="99"/>
  </way>
  <relation id="100" version="1">
    <member type="way" ref="10" role="outer"/>
    <member type="way" ref="12" role="inner"/>
    <tag k="type" v="multipolygon"/>
  </relation>
  <relation id="101" version="1">
    <member type="way" ref="11" role=""/>
    <tag k="type" v="route"/>
  </relation>
</osm>
"#;

fn reader() -> Reader<XmlSource> {
    Reader::new(XmlSource::from_bytes(
        OsmFile::new("pipeline.osm"),
        DATA.as_bytes().to_vec(),
    ))
}

#[test]
fn serialize_with_node_locations() {
    let mut buffer = SerializationBuffer::growable(64);
    let mut reader = reader();
    let index = {
        let mut handler = (
            NodeLocations::new(),
            SerializationHandler::with_index(&mut buffer),
        );
        let counts = reader.apply(&mut handler).unwrap();
        assert_eq!((counts.nodes, counts.ways, counts.relations), (3, 2, 2));
        assert_eq!(handler.0.unresolved(), 1);
        handler.1.into_index().unwrap()
    };
    assert_eq!(buffer.count(), 7);

    let mut dump = Vec::new();
    buffer.write_to(&mut dump).unwrap();
    let entities: Vec<Entity> = Items::new(&dump)
        .map(|item| item.and_then(|item| item.decode()).unwrap())
        .collect();
    assert_eq!(entities.len(), 7);
    assert_eq!(
        entities.iter().map(Entity::item_type).collect::<Vec<_>>(),
        vec![
            ItemType::Node,
            ItemType::Node,
            ItemType::Node,
            ItemType::Way,
            ItemType::Way,
            ItemType::Relation,
            ItemType::Relation
        ]
    );
    assert_eq!(entities[0].tags().get("name"), Some("Alexanderplatz"));

    let offset = index.get(ItemType::Way, 11).unwrap();
    let way = buffer.at(offset).unwrap();
    assert_eq!(way.id(), 11);
    let nodes: Vec<_> = way.way_nodes().unwrap().collect();
    assert_eq!(nodes[0].position(), Position::new(13.5, 52.4));
    assert!(!nodes[1].has_position());

    match &entities[3] {
        Entity::Way(way) => {
            assert!(way.is_closed());
            assert!(way.nodes().iter().all(|n| n.has_position()));
        }
        other => panic!("expected a way, got {:?}", other),
    }
}

#[test]
fn full_fixed_buffer_stops_the_parse() {
    let mut buffer = SerializationBuffer::fixed(200);
    let mut reader = reader();
    match reader.apply(SerializationHandler::new(&mut buffer)) {
        Err(Error::Capacity { .. }) => (),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(buffer.count() > 0);
    assert!(buffer.len() <= 200);
    for item in &buffer {
        item.unwrap();
    }
}

#[test]
fn find_bbox_aborts_after_nodes() {
    let mut bbox = FindBbox::new();
    let err = reader().apply(&mut bbox).unwrap_err();
    assert!(err.is_abort());
    let bounds = bbox.bounds();
    assert_eq!(bounds.bottom_left(), Some(Position::new(13.3, 52.4)));
    assert_eq!(bounds.top_right(), Some(Position::new(13.5, 52.6)));
}

#[test]
fn two_pass_member_ways() {
    let mut member_ways = MemberWays::default();
    reader().apply_two_pass(&mut member_ways).unwrap();

    let statuses = member_ways.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].relation, 100);
    assert_eq!(statuses[0].missing, vec![12]);
    assert_eq!(member_ways.way_nodes(10), Some(&[1, 2, 3, 1][..]));
    assert_eq!(member_ways.way_nodes(11), None);
}

#[test]
fn two_pass_needs_rewindable_input() {
    let source = XmlSource::from_reader(OsmFile::new("-"), Cursor::new(DATA.as_bytes().to_vec()));
    let mut reader = Reader::new(source);
    match reader.apply_two_pass(MemberWays::default()) {
        Err(Error::UnseekableSource { .. }) => (),
        other => panic!("unexpected result: {:?}", other),
    }
    // a single pass still works
    let mut stats = Statistics::new();
    reader.apply(&mut stats).unwrap();
    assert_eq!(stats.nodes, 3);
}

#[test]
fn statistics_over_xml() {
    let mut stats = Statistics::new();
    reader().apply(&mut stats).unwrap();
    assert_eq!(stats.nodes, 3);
    assert_eq!(stats.ways, 2);
    assert_eq!(stats.closed_ways, 1);
    assert_eq!(stats.way_nodes, 6);
    assert_eq!(stats.relations, 2);
    assert_eq!(stats.relation_members, 3);
    assert_eq!(stats.max_node_version, 2);
    assert_eq!(stats.max_relation_id, 100 + 1);
}
