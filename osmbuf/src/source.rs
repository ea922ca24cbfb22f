//! Input sources decode OSM files into a stream of entities.
//!
//! Sources push entities into an `EntitySink`: they fill the sink's scratch
//! object of the right type and then call `deliver`. This keeps a single set
//! of reusable objects per parse, owned by the reader.

use crate::error::{Error, Result};
use crate::object::{Entity, ItemType, Node, OsmObject, Relation, Way};
use crate::pbf::PbfSource;
use crate::xml::XmlSource;

use std::fmt;

/// Kind of data in an OSM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// A snapshot with one version per entity.
    Osm,
    /// Full history with all versions of each entity.
    History,
    /// A change file.
    Change,
}

impl FileType {
    fn suffix(self) -> &'static str {
        match self {
            FileType::Osm => "osm",
            FileType::History => "osh",
            FileType::Change => "osc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Xml,
    Pbf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

/// An OSM file name together with its type and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsmFile {
    name: String,
    file_type: FileType,
    format: FileFormat,
    compression: Compression,
}

impl OsmFile {
    /// Infers type and encoding from the suffix of `name`.
    ///
    /// The suffix is everything after the first dot of the last path
    /// component. An empty name or `-` denotes stdin. Unknown suffixes
    /// default to a PBF encoded OSM file, URLs to XML.
    pub fn new<S: Into<String>>(name: S) -> Self {
        let mut name = name.into();
        if name == "-" {
            name.clear();
        }
        let (file_type, format, compression) = if name.is_empty() {
            (FileType::Osm, FileFormat::Pbf, Compression::None)
        } else if is_url(&name) {
            (FileType::Osm, FileFormat::Xml, Compression::None)
        } else {
            let basename = name.rsplit('/').next().unwrap_or("");
            let suffix = match basename.find('.') {
                Some(pos) => &basename[pos + 1..],
                None => basename,
            };
            infer(suffix)
        };
        Self {
            name,
            file_type,
            format,
            compression,
        }
    }

    /// Creates a file with explicitly given type and encoding.
    pub fn with_format<S: Into<String>>(
        name: S,
        file_type: FileType,
        format: FileFormat,
        compression: Compression,
    ) -> Self {
        Self {
            name: name.into(),
            file_type,
            format,
            compression,
        }
    }

    /// File name, empty for stdin.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn set_file_type(&mut self, file_type: FileType) -> &mut Self {
        self.file_type = file_type;
        self
    }

    pub fn set_format(&mut self, format: FileFormat, compression: Compression) -> &mut Self {
        self.format = format;
        self.compression = compression;
        self
    }

    pub fn is_stdin(&self) -> bool {
        self.name.is_empty()
    }

    pub fn is_url(&self) -> bool {
        is_url(&self.name)
    }

    /// Whether the file may contain several versions of the same entity.
    pub fn has_multiple_object_versions(&self) -> bool {
        self.file_type == FileType::History
    }

    /// Canonical suffix for the type and encoding, e.g. `osm.pbf`.
    pub fn default_suffix(&self) -> String {
        let encoding = match (self.format, self.compression) {
            (FileFormat::Pbf, _) => ".pbf",
            (FileFormat::Xml, Compression::None) => "",
            (FileFormat::Xml, Compression::Gzip) => ".gz",
            (FileFormat::Xml, Compression::Bzip2) => ".bz2",
        };
        format!("{}{}", self.file_type.suffix(), encoding)
    }
}

impl fmt::Display for OsmFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_stdin() {
            write!(f, "<stdin>")
        } else {
            write!(f, "{}", self.name)
        }
    }
}

fn is_url(name: &str) -> bool {
    matches!(name.split(':').next(), Some("http") | Some("https")) && name.contains(':')
}

fn infer(suffix: &str) -> (FileType, FileFormat, Compression) {
    use Compression as C;
    use FileFormat::*;
    use FileType::*;

    match suffix {
        "pbf" | "osm.pbf" => (Osm, Pbf, C::None),
        "osm" => (Osm, Xml, C::None),
        "osm.bz2" => (Osm, Xml, C::Bzip2),
        "osm.gz" => (Osm, Xml, C::Gzip),
        "osh.pbf" => (History, Pbf, C::None),
        "osh" => (History, Xml, C::None),
        "osh.bz2" => (History, Xml, C::Bzip2),
        "osh.gz" => (History, Xml, C::Gzip),
        "osc.pbf" => (Change, Pbf, C::None),
        "osc" => (Change, Xml, C::None),
        "osc.bz2" => (Change, Xml, C::Bzip2),
        "osc.gz" => (Change, Xml, C::Gzip),
        _ => (Osm, Pbf, C::None),
    }
}

/// Selects which entity kinds a source should deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityFilter {
    pub nodes: bool,
    pub ways: bool,
    pub relations: bool,
}

impl EntityFilter {
    pub const ALL: EntityFilter = EntityFilter {
        nodes: true,
        ways: true,
        relations: true,
    };
    pub const NODES: EntityFilter = EntityFilter {
        nodes: true,
        ways: false,
        relations: false,
    };
    pub const WAYS: EntityFilter = EntityFilter {
        nodes: false,
        ways: true,
        relations: false,
    };
    pub const RELATIONS: EntityFilter = EntityFilter {
        nodes: false,
        ways: false,
        relations: true,
    };

    pub fn wants(&self, item_type: ItemType) -> bool {
        match item_type {
            ItemType::Node => self.nodes,
            ItemType::Way => self.ways,
            ItemType::Relation => self.relations,
        }
    }
}

impl Default for EntityFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// Reusable objects a source fills before delivering them.
#[derive(Debug, Default)]
pub struct Scratch {
    pub node: Node,
    pub way: Way,
    pub relation: Relation,
}

/// Receiver of decoded entities.
pub trait EntitySink {
    fn scratch(&mut self) -> &mut Scratch;

    /// Hands the scratch object of the given type to the consumer.
    fn deliver(&mut self, item_type: ItemType) -> Result<()>;
}

/// A decoder producing OSM entities in file order.
pub trait InputSource {
    fn file(&self) -> &OsmFile;

    /// Whether `rewind` can restart the source for another pass.
    fn is_rewindable(&self) -> bool;

    /// Restarts the source at the beginning of the file.
    fn rewind(&mut self) -> Result<()>;

    /// Decodes the whole input, delivering every entity accepted by `filter`.
    fn read(&mut self, filter: EntityFilter, sink: &mut dyn EntitySink) -> Result<()>;
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
    fn file(&self) -> &OsmFile {
        (**self).file()
    }

    fn is_rewindable(&self) -> bool {
        (**self).is_rewindable()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn read(&mut self, filter: EntityFilter, sink: &mut dyn EntitySink) -> Result<()> {
        (**self).read(filter, sink)
    }
}

/// Opens a source for the file name, choosing the decoder by its suffix.
pub fn open<S: Into<String>>(name: S) -> Result<Box<dyn InputSource>> {
    open_file(OsmFile::new(name))
}

/// Opens a source for a file with known type and encoding.
pub fn open_file(file: OsmFile) -> Result<Box<dyn InputSource>> {
    if file.is_url() {
        return Err(Error::Unsupported(format!(
            "reading from URL `{}`",
            file.name()
        )));
    }
    match (file.format(), file.compression()) {
        (FileFormat::Pbf, _) => Ok(Box::new(PbfSource::open(file)?)),
        (FileFormat::Xml, Compression::Bzip2) => Err(Error::Unsupported(format!(
            "bzip2 compressed input `{}`",
            file
        ))),
        (FileFormat::Xml, _) => Ok(Box::new(XmlSource::open(file)?)),
    }
}

/// Source over entities held in memory.
#[derive(Debug)]
pub struct MemorySource {
    file: OsmFile,
    entities: Vec<Entity>,
    rewindable: bool,
    consumed: bool,
}

impl MemorySource {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            file: OsmFile::with_format(
                "<memory>",
                FileType::Osm,
                FileFormat::Pbf,
                Compression::None,
            ),
            entities,
            rewindable: true,
            consumed: false,
        }
    }

    /// Source which can only be read once, like a pipe.
    pub fn unseekable(entities: Vec<Entity>) -> Self {
        Self {
            rewindable: false,
            ..Self::new(entities)
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }
}

impl InputSource for MemorySource {
    fn file(&self) -> &OsmFile {
        &self.file
    }

    fn is_rewindable(&self) -> bool {
        self.rewindable
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.rewindable {
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
        for entity in &self.entities {
            let item_type = entity.item_type();
            if !filter.wants(item_type) {
                continue;
            }
            let scratch = sink.scratch();
            match entity {
                Entity::Node(node) => {
                    refill(&mut scratch.node, node);
                    scratch.node.set_position(node.position());
                }
                Entity::Way(way) => {
                    refill(&mut scratch.way, way);
                    for node in way.nodes() {
                        scratch.way.add_node(*node);
                    }
                }
                Entity::Relation(relation) => {
                    refill(&mut scratch.relation, relation);
                    for member in relation.members() {
                        scratch.relation.add_member(member.clone());
                    }
                }
            }
            sink.deliver(item_type)?;
        }
        Ok(())
    }
}

// Copies header and tags into a scratch object, keeping its allocations.
fn refill<T: OsmObject>(scratch: &mut T, entity: &T) {
    scratch.reset();
    *scratch.header_mut() = *entity.header();
    for tag in entity.tags() {
        scratch.tags_mut().push(tag.clone());
    }
}
