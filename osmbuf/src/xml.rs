//! Reader of the OSM XML format, plain or gzip compressed.

use crate::error::{Error, Result};
use crate::object::{Header, ItemType, OsmObject, RelationMember};
use crate::position::Position;
use crate::source::{Compression, EntityFilter, EntitySink, InputSource, OsmFile};

use flate2::read::MultiGzDecoder;
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::str::FromStr;

enum XmlInput {
    File,
    Bytes(Vec<u8>),
    Stream(Option<Box<dyn BufRead>>),
}

/// Input source reading OSM XML.
///
/// Sources over files and in-memory data can be rewound, streams can only
/// be read once.
pub struct XmlSource {
    file: OsmFile,
    input: XmlInput,
    consumed: bool,
}

impl XmlSource {
    pub fn open(file: OsmFile) -> Result<Self> {
        let input = if file.is_stdin() {
            XmlInput::Stream(Some(Box::new(BufReader::new(io::stdin()))))
        } else {
            // fail early if the file does not exist
            File::open(file.name())?;
            XmlInput::File
        };
        Ok(Self {
            file,
            input,
            consumed: false,
        })
    }

    /// Source over XML held in memory, compressed as given by `file`.
    pub fn from_bytes(file: OsmFile, data: Vec<u8>) -> Self {
        Self {
            file,
            input: XmlInput::Bytes(data),
            consumed: false,
        }
    }

    /// Source reading from an arbitrary stream. It cannot be rewound.
    pub fn from_reader<R: BufRead + 'static>(file: OsmFile, reader: R) -> Self {
        Self {
            file,
            input: XmlInput::Stream(Some(Box::new(reader))),
            consumed: false,
        }
    }

    fn reader(&mut self) -> Result<Box<dyn BufRead + '_>> {
        let raw: Box<dyn BufRead + '_> = match &mut self.input {
            XmlInput::File => Box::new(BufReader::new(File::open(self.file.name())?)),
            XmlInput::Bytes(data) => Box::new(Cursor::new(&data[..])),
            XmlInput::Stream(stream) => match stream.take() {
                Some(stream) => stream,
                None => {
                    return Err(Error::UnseekableSource {
                        name: self.file.to_string(),
                    })
                }
            },
        };
        Ok(match self.file.compression() {
            Compression::None => raw,
            Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(raw))),
            Compression::Bzip2 => {
                return Err(Error::Unsupported(format!(
                    "bzip2 compressed input `{}`",
                    self.file
                )))
            }
        })
    }
}

impl InputSource for XmlSource {
    fn file(&self) -> &OsmFile {
        &self.file
    }

    fn is_rewindable(&self) -> bool {
        !matches!(self.input, XmlInput::Stream(_))
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.is_rewindable() {
            return Err(Error::UnseekableSource {
                name: self.file.to_string(),
            });
        }
        self.consumed = false;
        Ok(())
    }

    fn read(&mut self, filter: EntityFilter, sink: &mut dyn EntitySink) -> Result<()> {
        if self.consumed {
            return Ok(());
        }
        self.consumed = true;
        debug!("Parsing XML from {}", self.file);
        let reader = self.reader()?;
        XmlParser {
            filter,
            sink,
            entity: 0,
            state: State::Top,
            deleted: false,
            depth: 0,
        }
        .run(reader)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Top,
    Node,
    Way,
    Relation,
}

impl State {
    fn item_type(self) -> Option<ItemType> {
        match self {
            State::Top => None,
            State::Node => Some(ItemType::Node),
            State::Way => Some(ItemType::Way),
            State::Relation => Some(ItemType::Relation),
        }
    }
}

struct XmlParser<'s> {
    filter: EntityFilter,
    sink: &'s mut dyn EntitySink,
    // number of entities delivered so far, for error reporting
    entity: u64,
    state: State,
    // inside a <delete> section of a change file
    deleted: bool,
    // number of currently open elements
    depth: usize,
}

fn parse<T>(value: &str, what: &str, offset: u64) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::decode(offset, format!("invalid {} `{}`: {}", what, value, e)))
}

fn parse_timestamp(value: &str, offset: u64) -> Result<u32> {
    let timestamp = chrono::DateTime::parse_from_rfc3339(value.trim())
        .map_err(|e| Error::decode(offset, format!("invalid timestamp `{}`: {}", value, e)))?
        .timestamp();
    Ok(timestamp.max(0) as u32)
}

fn parse_item_type(value: &str, offset: u64) -> Result<ItemType> {
    match value {
        "node" => Ok(ItemType::Node),
        "way" => Ok(ItemType::Way),
        "relation" => Ok(ItemType::Relation),
        other => Err(Error::decode(
            offset,
            format!("unknown member type `{}`", other),
        )),
    }
}

/// Fills the header from the common attributes of an entity element.
///
/// Returns the position given by `lat`/`lon`, which only nodes have.
fn parse_header(e: &BytesStart, header: &mut Header, offset: u64) -> Result<Position> {
    let mut lat = None;
    let mut lon = None;
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::decode(offset, err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| Error::decode(offset, err.to_string()))?;
        match attr.key.as_ref() {
            b"id" => {
                header.set_id(parse(&value, "id", offset)?);
            }
            b"version" => {
                let version: u32 = parse(&value, "version", offset)?;
                if version > Header::MAX_VERSION {
                    return Err(Error::decode(
                        offset,
                        format!("version {} out of range", version),
                    ));
                }
                header.set_version(version);
            }
            b"changeset" => {
                header.set_changeset(parse(&value, "changeset", offset)?);
            }
            b"uid" => {
                header.set_uid(parse(&value, "uid", offset)?);
            }
            b"timestamp" => {
                header.set_timestamp(parse_timestamp(&value, offset)?);
            }
            b"visible" => {
                header.set_visible(parse(&value, "visible", offset)?);
            }
            b"lat" => lat = Some(parse::<f64>(&value, "lat", offset)?),
            b"lon" => lon = Some(parse::<f64>(&value, "lon", offset)?),
            _ => (),
        }
    }
    Ok(match (lon, lat) {
        (Some(lon), Some(lat)) => Position::new(lon, lat),
        _ => Position::undefined(),
    })
}

impl<'s> XmlParser<'s> {
    fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);
        let mut buf = Vec::new();
        loop {
            let offset = reader.buffer_position() as u64;
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| Error::decode(reader.buffer_position() as u64, e.to_string()))?;
            match event {
                Event::Eof => break,
                Event::Start(e) => {
                    self.depth += 1;
                    self.start(&e, false, offset)?;
                }
                Event::Empty(e) => self.start(&e, true, offset)?,
                Event::End(e) => {
                    self.depth = self.depth.saturating_sub(1);
                    self.end(e.name().as_ref())?;
                }
                _ => (),
            }
            // if we don't keep a borrow elsewhere, we can clear the buffer to keep memory usage low
            buf.clear();
        }
        if self.depth == 0 && self.state == State::Top {
            return Ok(());
        }
        let inside = match self.state.item_type() {
            Some(item_type) => format!("<{}>", item_type),
            None => "the root element".to_string(),
        };
        Err(Error::decode(
            reader.buffer_position() as u64,
            format!("unexpected end of input inside {}", inside),
        )
        .with_entity(self.entity))
    }

    fn wants(&self) -> bool {
        match self.state.item_type() {
            Some(item_type) => self.filter.wants(item_type),
            None => false,
        }
    }

    fn start(&mut self, e: &BytesStart, empty: bool, offset: u64) -> Result<()> {
        let entity = self.entity;
        match e.name().as_ref() {
            b"node" => {
                self.begin(State::Node, e, offset)
                    .map_err(|err| err.with_entity(entity))?;
            }
            b"way" => {
                self.begin(State::Way, e, offset)
                    .map_err(|err| err.with_entity(entity))?;
            }
            b"relation" => {
                self.begin(State::Relation, e, offset)
                    .map_err(|err| err.with_entity(entity))?;
            }
            b"nd" if self.state == State::Way && self.wants() => {
                self.way_node(e, offset).map_err(|err| err.with_entity(entity))?;
            }
            b"member" if self.state == State::Relation && self.wants() => {
                self.member(e, offset).map_err(|err| err.with_entity(entity))?;
            }
            b"tag" if self.wants() => {
                self.tag(e, offset).map_err(|err| err.with_entity(entity))?;
            }
            b"delete" if !empty => self.deleted = true,
            _ => (),
        }
        match e.name().as_ref() {
            b"node" | b"way" | b"relation" if empty => self.finish(),
            _ => Ok(()),
        }
    }

    fn end(&mut self, name: &[u8]) -> Result<()> {
        match name {
            b"node" | b"way" | b"relation" => self.finish(),
            b"delete" => {
                self.deleted = false;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn begin(&mut self, state: State, e: &BytesStart, offset: u64) -> Result<()> {
        self.state = state;
        if !self.wants() {
            return Ok(());
        }
        let deleted = self.deleted;
        let scratch = self.sink.scratch();
        let header = match state {
            State::Node => {
                scratch.node.reset();
                scratch.node.header_mut()
            }
            State::Way => {
                scratch.way.reset();
                scratch.way.header_mut()
            }
            State::Relation => {
                scratch.relation.reset();
                scratch.relation.header_mut()
            }
            State::Top => return Ok(()),
        };
        if deleted {
            header.set_visible(false);
        }
        let position = parse_header(e, header, offset)?;
        if state == State::Node {
            scratch.node.set_position(position);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let wanted = self.wants();
        let item_type = self.state.item_type();
        self.state = State::Top;
        match item_type {
            Some(item_type) if wanted => {
                self.entity += 1;
                self.sink.deliver(item_type)
            }
            _ => Ok(()),
        }
    }

    fn way_node(&mut self, e: &BytesStart, offset: u64) -> Result<()> {
        for attr in e.attributes() {
            let attr = attr.map_err(|err| Error::decode(offset, err.to_string()))?;
            if attr.key.as_ref() == b"ref" {
                let value = attr
                    .unescape_value()
                    .map_err(|err| Error::decode(offset, err.to_string()))?;
                let node_ref = parse(&value, "node ref", offset)?;
                self.sink.scratch().way.add_node_ref(node_ref);
                return Ok(());
            }
        }
        Err(Error::decode(offset, "way node without ref"))
    }

    fn member(&mut self, e: &BytesStart, offset: u64) -> Result<()> {
        let mut member_ref = None;
        let mut member_type = None;
        let mut role = String::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| Error::decode(offset, err.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|err| Error::decode(offset, err.to_string()))?;
            match attr.key.as_ref() {
                b"ref" => member_ref = Some(parse(&value, "member ref", offset)?),
                b"type" => member_type = Some(parse_item_type(&value, offset)?),
                b"role" => role = value.into_owned(),
                _ => (),
            }
        }
        match (member_ref, member_type) {
            (Some(member_ref), Some(member_type)) => {
                self.sink
                    .scratch()
                    .relation
                    .add_member(RelationMember::new(member_ref, member_type, role));
                Ok(())
            }
            _ => Err(Error::decode(offset, "member without ref or type")),
        }
    }

    fn tag(&mut self, e: &BytesStart, offset: u64) -> Result<()> {
        let mut key = None;
        let mut value = None;
        for attr in e.attributes() {
            let attr = attr.map_err(|err| Error::decode(offset, err.to_string()))?;
            let text = attr
                .unescape_value()
                .map_err(|err| Error::decode(offset, err.to_string()))?;
            match attr.key.as_ref() {
                b"k" => key = Some(text.into_owned()),
                b"v" => value = Some(text.into_owned()),
                _ => (),
            }
        }
        let (key, value) = match (key, value) {
            (Some(key), Some(value)) => (key, value),
            _ => return Err(Error::decode(offset, "tag without key or value")),
        };
        let scratch = self.sink.scratch();
        let tags = match self.state {
            State::Node => scratch.node.tags_mut(),
            State::Way => scratch.way.tags_mut(),
            State::Relation => scratch.relation.tags_mut(),
            State::Top => return Ok(()),
        };
        tags.add(key, value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::{Node, Relation, Way};
    use crate::source::Scratch;

    const DATA: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version="0.6" generator="test">
  <bounds minlat="49.0" minlon="8.3" maxlat="49.1" maxlon="8.4"/>
  <node id="1" version="2" changeset="10" uid="5" user="x" timestamp="2012-01-01T00:00:00Z" lat="49.0096164" lon="8.390221">
    <tag k="amenity" v="cafe"/>
    <tag k="name" v="Caf&#233; &amp; Bar"/>
  </node>
  <node id="2" version="1" lat="49.01" lon="8.4"/>
  <way id="10" version="1" visible="false">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="path"/>
  </way>
  <relation id="100" version="3">
    <member type="way" ref="10" role="outer"/>
    <member type="node" ref="1" role=""/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>
"#;

    #[derive(Default)]
    struct Collect {
        scratch: Scratch,
        nodes: Vec<Node>,
        ways: Vec<Way>,
        relations: Vec<Relation>,
    }

    impl EntitySink for Collect {
        fn scratch(&mut self) -> &mut Scratch {
            &mut self.scratch
        }

        fn deliver(&mut self, item_type: ItemType) -> Result<()> {
            match item_type {
                ItemType::Node => self.nodes.push(self.scratch.node.clone()),
                ItemType::Way => self.ways.push(self.scratch.way.clone()),
                ItemType::Relation => self.relations.push(self.scratch.relation.clone()),
            }
            Ok(())
        }
    }

    fn source(data: &str) -> XmlSource {
        XmlSource::from_bytes(OsmFile::new("test.osm"), data.as_bytes().to_vec())
    }

    #[test]
    fn test_read_entities() {
        let mut sink = Collect::default();
        source(DATA).read(EntityFilter::ALL, &mut sink).unwrap();

        assert_eq!(sink.nodes.len(), 2);
        let node = &sink.nodes[0];
        assert_eq!(node.id(), 1);
        assert_eq!(node.version(), 2);
        assert_eq!(node.header().changeset(), 10);
        assert_eq!(node.header().uid(), 5);
        assert_eq!(node.header().timestamp(), 1325376000);
        assert_eq!(node.position(), Position::new(8.390221, 49.0096164));
        assert_eq!(node.tags().get("name"), Some("Café & Bar"));
        assert!(sink.nodes[1].tags().is_empty());
        assert!(sink.nodes[1].header().user_is_anonymous());

        let way = &sink.ways[0];
        assert!(!way.header().visible());
        let refs: Vec<i64> = way.nodes().iter().map(|n| n.node_ref()).collect();
        assert_eq!(refs, vec![1, 2]);
        assert_eq!(way.tags().get("highway"), Some("path"));

        let relation = &sink.relations[0];
        assert_eq!(
            relation.members(),
            &[
                RelationMember::new(10, ItemType::Way, "outer"),
                RelationMember::new(1, ItemType::Node, ""),
            ][..]
        );
        assert!(relation.tags().has_tag("type", "multipolygon"));
    }

    #[test]
    fn test_filter() {
        let mut sink = Collect::default();
        source(DATA).read(EntityFilter::RELATIONS, &mut sink).unwrap();
        assert!(sink.nodes.is_empty());
        assert!(sink.ways.is_empty());
        assert_eq!(sink.relations.len(), 1);
        // tags of skipped entities do not leak into delivered ones
        assert_eq!(sink.relations[0].tags().len(), 1);
    }

    #[test]
    fn test_change_file_deletes() {
        let data = r#"<osmChange version="0.6">
  <modify><node id="1" version="2" lat="1" lon="1"/></modify>
  <delete><node id="2" version="3" lat="1" lon="1"/></delete>
</osmChange>"#;
        let mut sink = Collect::default();
        XmlSource::from_bytes(OsmFile::new("diff.osc"), data.as_bytes().to_vec())
            .read(EntityFilter::ALL, &mut sink)
            .unwrap();
        assert!(sink.nodes[0].header().visible());
        assert!(!sink.nodes[1].header().visible());
    }

    #[test]
    fn test_gzip() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(DATA.as_bytes()).unwrap();
        let data = encoder.finish().unwrap();

        let mut sink = Collect::default();
        XmlSource::from_bytes(OsmFile::new("test.osm.gz"), data)
            .read(EntityFilter::NODES, &mut sink)
            .unwrap();
        assert_eq!(sink.nodes.len(), 2);
    }

    #[test]
    fn test_invalid_attribute() {
        let data = r#"<osm><node id="1" lat="1" lon="1"/><node id="x2" lat="1" lon="1"/></osm>"#;
        match source(data).read(EntityFilter::ALL, &mut Collect::default()) {
            Err(Error::Decode {
                entity, message, ..
            }) => {
                assert_eq!(entity, Some(1));
                assert!(message.contains("invalid id `x2`"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_version_out_of_range() {
        let data = r#"<osm><node id="1" version="3000000000" lat="1" lon="1"/></osm>"#;
        let mut sink = Collect::default();
        match source(data).read(EntityFilter::ALL, &mut sink) {
            Err(Error::Decode {
                entity, message, ..
            }) => {
                assert_eq!(entity, Some(0));
                assert_eq!(message, "version 3000000000 out of range");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(sink.nodes.is_empty());
    }

    #[test]
    fn test_truncated_input() {
        let data = r#"<osm><node id="1" lat="1" lon="1"/><node id="2" lat="1" lon="1"><tag k="a" v="b"/>"#;
        let mut sink = Collect::default();
        match source(data).read(EntityFilter::ALL, &mut sink) {
            Err(Error::Decode {
                entity, message, ..
            }) => {
                assert_eq!(entity, Some(1));
                assert_eq!(message, "unexpected end of input inside <node>");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(sink.nodes.len(), 1);

        // all entities closed, but the root is not
        let data = r#"<osm><node id="1" lat="1" lon="1"/>"#;
        match source(data).read(EntityFilter::ALL, &mut Collect::default()) {
            Err(Error::Decode { message, .. }) => {
                assert_eq!(message, "unexpected end of input inside the root element");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_stream_is_not_rewindable() {
        let mut source = XmlSource::from_reader(OsmFile::new("-"), Cursor::new(DATA.as_bytes()));
        assert!(!source.is_rewindable());
        let mut sink = Collect::default();
        source.read(EntityFilter::ALL, &mut sink).unwrap();
        assert_eq!(sink.nodes.len(), 2);
        assert!(source.rewind().is_err());
    }
}
