//! Reader of the OSM PBF format.
//!
//! The file is a sequence of blobs, each prefixed by a network-endian length
//! and a `BlobHeader`. The first blob holds the `HeaderBlock`, all others
//! hold `PrimitiveBlock`s. Blocks are decompressed and decoded on a thread
//! pool, but delivered strictly in file order.

use crate::error::{Error, Result};
use crate::object::{Header, ItemType, OsmObject, RelationMember, WayNode};
use crate::parallel::parallel_process;
use crate::position::Position;
use crate::source::{EntityFilter, EntitySink, InputSource, OsmFile};

use byteorder::{ByteOrder, NetworkEndian};
use flate2::read::ZlibDecoder;
use log::{debug, info, warn};
use memmap2::Mmap;
use prost::Message;
use rayon::prelude::*;

use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, Read};
use std::ops::Deref;
use std::str;

/// Protobuf messages of the OSM PBF format (fileformat.proto and
/// osmformat.proto), restricted to the fields used here.
pub mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BlobHeader {
        #[prost(string, required, tag = "1")]
        pub r#type: String,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub indexdata: Option<Vec<u8>>,
        #[prost(int32, required, tag = "3")]
        pub datasize: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Blob {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub raw: Option<Vec<u8>>,
        #[prost(int32, optional, tag = "2")]
        pub raw_size: Option<i32>,
        #[prost(bytes = "vec", optional, tag = "3")]
        pub zlib_data: Option<Vec<u8>>,
        #[prost(bytes = "vec", optional, tag = "4")]
        pub lzma_data: Option<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct HeaderBlock {
        #[prost(message, optional, tag = "1")]
        pub bbox: Option<HeaderBBox>,
        #[prost(string, repeated, tag = "4")]
        pub required_features: Vec<String>,
        #[prost(string, repeated, tag = "5")]
        pub optional_features: Vec<String>,
        #[prost(string, optional, tag = "16")]
        pub writingprogram: Option<String>,
        #[prost(string, optional, tag = "17")]
        pub source: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct HeaderBBox {
        #[prost(sint64, required, tag = "1")]
        pub left: i64,
        #[prost(sint64, required, tag = "2")]
        pub right: i64,
        #[prost(sint64, required, tag = "3")]
        pub top: i64,
        #[prost(sint64, required, tag = "4")]
        pub bottom: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PrimitiveBlock {
        #[prost(message, required, tag = "1")]
        pub stringtable: StringTable,
        #[prost(message, repeated, tag = "2")]
        pub primitivegroup: Vec<PrimitiveGroup>,
        #[prost(int32, optional, tag = "17", default = "100")]
        pub granularity: Option<i32>,
        #[prost(int32, optional, tag = "18", default = "1000")]
        pub date_granularity: Option<i32>,
        #[prost(int64, optional, tag = "19", default = "0")]
        pub lat_offset: Option<i64>,
        #[prost(int64, optional, tag = "20", default = "0")]
        pub lon_offset: Option<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PrimitiveGroup {
        #[prost(message, repeated, tag = "1")]
        pub nodes: Vec<Node>,
        #[prost(message, optional, tag = "2")]
        pub dense: Option<DenseNodes>,
        #[prost(message, repeated, tag = "3")]
        pub ways: Vec<Way>,
        #[prost(message, repeated, tag = "4")]
        pub relations: Vec<Relation>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StringTable {
        #[prost(bytes = "vec", repeated, tag = "1")]
        pub s: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Info {
        #[prost(int32, optional, tag = "1", default = "-1")]
        pub version: Option<i32>,
        #[prost(int64, optional, tag = "2")]
        pub timestamp: Option<i64>,
        #[prost(int64, optional, tag = "3")]
        pub changeset: Option<i64>,
        #[prost(int32, optional, tag = "4")]
        pub uid: Option<i32>,
        #[prost(uint32, optional, tag = "5")]
        pub user_sid: Option<u32>,
        #[prost(bool, optional, tag = "6")]
        pub visible: Option<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DenseInfo {
        #[prost(int32, repeated, packed = "true", tag = "1")]
        pub version: Vec<i32>,
        #[prost(sint64, repeated, packed = "true", tag = "2")]
        pub timestamp: Vec<i64>,
        #[prost(sint64, repeated, packed = "true", tag = "3")]
        pub changeset: Vec<i64>,
        #[prost(sint32, repeated, packed = "true", tag = "4")]
        pub uid: Vec<i32>,
        #[prost(sint32, repeated, packed = "true", tag = "5")]
        pub user_sid: Vec<i32>,
        #[prost(bool, repeated, packed = "true", tag = "6")]
        pub visible: Vec<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Node {
        #[prost(sint64, required, tag = "1")]
        pub id: i64,
        #[prost(uint32, repeated, packed = "true", tag = "2")]
        pub keys: Vec<u32>,
        #[prost(uint32, repeated, packed = "true", tag = "3")]
        pub vals: Vec<u32>,
        #[prost(message, optional, tag = "4")]
        pub info: Option<Info>,
        #[prost(sint64, required, tag = "8")]
        pub lat: i64,
        #[prost(sint64, required, tag = "9")]
        pub lon: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DenseNodes {
        #[prost(sint64, repeated, packed = "true", tag = "1")]
        pub id: Vec<i64>,
        #[prost(message, optional, tag = "5")]
        pub denseinfo: Option<DenseInfo>,
        #[prost(sint64, repeated, packed = "true", tag = "8")]
        pub lat: Vec<i64>,
        #[prost(sint64, repeated, packed = "true", tag = "9")]
        pub lon: Vec<i64>,
        #[prost(int32, repeated, packed = "true", tag = "10")]
        pub keys_vals: Vec<i32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Way {
        #[prost(int64, required, tag = "1")]
        pub id: i64,
        #[prost(uint32, repeated, packed = "true", tag = "2")]
        pub keys: Vec<u32>,
        #[prost(uint32, repeated, packed = "true", tag = "3")]
        pub vals: Vec<u32>,
        #[prost(message, optional, tag = "4")]
        pub info: Option<Info>,
        #[prost(sint64, repeated, packed = "true", tag = "8")]
        pub refs: Vec<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Relation {
        #[prost(int64, required, tag = "1")]
        pub id: i64,
        #[prost(uint32, repeated, packed = "true", tag = "2")]
        pub keys: Vec<u32>,
        #[prost(uint32, repeated, packed = "true", tag = "3")]
        pub vals: Vec<u32>,
        #[prost(message, optional, tag = "4")]
        pub info: Option<Info>,
        #[prost(int32, repeated, packed = "true", tag = "8")]
        pub roles_sid: Vec<i32>,
        #[prost(sint64, repeated, packed = "true", tag = "9")]
        pub memids: Vec<i64>,
        #[prost(enumeration = "relation::MemberType", repeated, packed = "true", tag = "10")]
        pub types: Vec<i32>,
    }

    pub mod relation {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum MemberType {
            Node = 0,
            Way = 1,
            Relation = 2,
        }
    }
}

/// Features a PBF file may require which this reader understands.
const SUPPORTED_FEATURES: &[&str] = &["OsmSchema-V0.6", "DenseNodes", "HistoricalInformation"];

/// Maximum size of a blob header, as given by the format.
const MAX_BLOB_HEADER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockType {
    Header,
    Nodes,
    DenseNodes,
    Ways,
    Relations,
    Changesets,
    Empty,
}

impl BlockType {
    /// Decode block type from PrimitiveBlock protobuf message
    ///
    /// This does not decode any fields, it just checks which tags are present
    /// in PrimitiveGroup fields of the message.
    ///
    /// `blob` should contain decompressed data of an OSMData PrimitiveBlock.
    ///
    /// Note: We use public API of `prost` crate, which though is not exposed in
    /// the crate and marked with comment that it should be only used from
    /// `prost::Message`.
    pub fn from_osmdata_blob(mut blob: &[u8]) -> std::result::Result<BlockType, prost::DecodeError> {
        const PRIMITIVE_GROUP_TAG: u32 = 2;
        const NODES_TAG: u32 = 1;
        const DENSE_NODES_TAG: u32 = 2;
        const WAY_STAG: u32 = 3;
        const RELATIONS_TAG: u32 = 4;
        const CHANGESETS_TAG: u32 = 5;

        while !blob.is_empty() {
            // decode fields of PrimitiveBlock
            let (key, wire_type) = prost::encoding::decode_key(&mut blob)?;
            if key != PRIMITIVE_GROUP_TAG {
                prost::encoding::skip_field(
                    wire_type,
                    key,
                    &mut blob,
                    prost::encoding::DecodeContext::default(),
                )?;
                continue;
            }

            // We found a PrimitiveGroup field. There could be several of them, but
            // following the specs of OSMPBF, all of them will have the same single
            // optional field, which defines the type of the block.

            // Decode the length of the primitive group.
            let len = prost::encoding::decode_varint(&mut blob)?;
            if len == 0 {
                continue;
            }
            // Decode the tag of the first primitive group defining the type.
            let (tag, _wire_type) = prost::encoding::decode_key(&mut blob)?;
            let block_type = match tag {
                NODES_TAG => BlockType::Nodes,
                DENSE_NODES_TAG => BlockType::DenseNodes,
                WAY_STAG => BlockType::Ways,
                RELATIONS_TAG => BlockType::Relations,
                CHANGESETS_TAG => BlockType::Changesets,
                _ => {
                    return Err(prost::DecodeError::new("malformed primitive group"));
                }
            };
            return Ok(block_type);
        }
        Ok(BlockType::Empty)
    }

    fn contains(self, filter: EntityFilter) -> bool {
        match self {
            BlockType::Nodes | BlockType::DenseNodes => filter.nodes,
            BlockType::Ways => filter.ways,
            BlockType::Relations => filter.relations,
            BlockType::Header | BlockType::Changesets | BlockType::Empty => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct BlockIndex {
    pub block_type: BlockType,
    pub blob_start: usize,
    pub blob_len: usize,
}

struct BlockIndexIterator<'a> {
    data: &'a [u8],
    cursor: usize,
}

enum BlobInfo<'a> {
    Header(BlockIndex),
    Unknown(usize, usize, &'a [u8]),
}

impl<'a> BlockIndexIterator<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    fn read(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.data.len() - self.cursor < len {
            return Err(Error::decode(
                self.cursor as u64,
                format!("truncated {}", what),
            ));
        }
        let data = &self.data[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(data)
    }

    fn next_blob(&mut self) -> Result<BlobInfo<'a>> {
        let header_start = self.cursor;
        // read size of blob header
        let blob_header_len = NetworkEndian::read_u32(self.read(4, "blob header size")?) as usize;
        if blob_header_len > MAX_BLOB_HEADER_SIZE {
            return Err(Error::decode(
                header_start as u64,
                format!("blob header of {} bytes is too large", blob_header_len),
            ));
        }

        // read blob header
        let blob_header = proto::BlobHeader::decode(self.read(blob_header_len, "blob header")?)
            .map_err(|e| Error::decode(header_start as u64, e.to_string()))?;
        if blob_header.datasize < 0 {
            return Err(Error::decode(header_start as u64, "negative blob size"));
        }

        let blob_start = self.cursor;
        let blob_len = blob_header.datasize as usize;
        let blob = self.read(blob_len, "blob")?;

        match blob_header.r#type.as_str() {
            "OSMHeader" => Ok(BlobInfo::Header(BlockIndex {
                block_type: BlockType::Header,
                blob_start,
                blob_len,
            })),
            "OSMData" => Ok(BlobInfo::Unknown(blob_start, blob_len, blob)),
            other => Err(Error::decode(
                header_start as u64,
                format!("unknown blob type `{}`", other),
            )),
        }
    }
}

impl<'a> Iterator for BlockIndexIterator<'a> {
    type Item = Result<BlobInfo<'a>>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor < self.data.len() {
            let blob = self.next_blob();
            if blob.is_err() {
                // no way to find the next blob
                self.cursor = self.data.len();
            }
            Some(blob)
        } else {
            None
        }
    }
}

/// Decompresses a blob into `buf` and returns the raw block bytes.
fn blob_data<'a>(blob: &'a proto::Blob, buf: &'a mut Vec<u8>, offset: usize) -> Result<&'a [u8]> {
    let data = if let Some(raw) = &blob.raw {
        raw.as_slice()
    } else if let Some(zlib_data) = &blob.zlib_data {
        let mut decoder = ZlibDecoder::new(&zlib_data[..]);
        decoder
            .read_to_end(buf)
            .map_err(|e| Error::decode(offset as u64, format!("zlib: {}", e)))?;
        buf.as_slice()
    } else if blob.lzma_data.is_some() {
        return Err(Error::Unsupported("lzma compressed PBF blobs".into()));
    } else {
        return Err(Error::decode(offset as u64, "unknown blob compression"));
    };
    if let Some(raw_size) = blob.raw_size {
        if raw_size as usize != data.len() {
            return Err(Error::decode(
                offset as u64,
                format!("blob has {} bytes, expected {}", data.len(), raw_size),
            ));
        }
    }
    Ok(data)
}

pub fn read_block<T: prost::Message + Default>(data: &[u8], idx: &BlockIndex) -> Result<T> {
    let blob = proto::Blob::decode(&data[idx.blob_start..idx.blob_start + idx.blob_len])
        .map_err(|e| Error::decode(idx.blob_start as u64, e.to_string()))?;

    let mut blob_buf = Vec::new();
    let blob_data = blob_data(&blob, &mut blob_buf, idx.blob_start)?;
    T::decode(blob_data).map_err(|e| Error::decode(idx.blob_start as u64, e.to_string()))
}

fn blob_type_from_blob_info(blob_start: usize, blob_len: usize, blob: &[u8]) -> Result<BlockIndex> {
    let blob = proto::Blob::decode(blob)
        .map_err(|e| Error::decode(blob_start as u64, e.to_string()))?;

    let mut blob_buf = Vec::new();
    let blob_data = blob_data(&blob, &mut blob_buf, blob_start)?;

    Ok(BlockIndex {
        block_type: BlockType::from_osmdata_blob(blob_data)
            .map_err(|e| Error::decode(blob_start as u64, e.to_string()))?,
        blob_start,
        blob_len,
    })
}

/// Builds the index of all blocks, in file order.
pub fn build_block_index(pbf_data: &[u8]) -> Result<Vec<BlockIndex>> {
    let mut result: Vec<BlockIndex> = BlockIndexIterator::new(pbf_data)
        .par_bridge()
        .map(|blob| match blob? {
            BlobInfo::Header(b) => Ok(b),
            BlobInfo::Unknown(start, len, blob) => blob_type_from_blob_info(start, len, blob),
        })
        .collect::<Result<_>>()?;
    result.par_sort_unstable_by_key(|b| b.blob_start);
    info!("Found {} blocks", result.len());
    Ok(result)
}

enum PbfData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for PbfData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            PbfData::Mapped(mmap) => &mmap[..],
            PbfData::Owned(data) => &data[..],
        }
    }
}

/// Input source reading PBF files.
///
/// Files are memory mapped and can be rewound. Data read from stdin can only
/// be read once.
pub struct PbfSource {
    file: OsmFile,
    data: PbfData,
    index: Option<Vec<BlockIndex>>,
    rewindable: bool,
    consumed: bool,
}

impl PbfSource {
    pub fn open(file: OsmFile) -> Result<Self> {
        if file.is_stdin() {
            let mut data = Vec::new();
            io::stdin().lock().read_to_end(&mut data)?;
            return Ok(Self::with_data(file, PbfData::Owned(data), false));
        }
        let input = File::open(file.name())?;
        let mmap = unsafe { Mmap::map(&input)? };
        Ok(Self::with_data(file, PbfData::Mapped(mmap), true))
    }

    /// Source over PBF data held in memory.
    pub fn from_bytes(file: OsmFile, data: Vec<u8>) -> Self {
        Self::with_data(file, PbfData::Owned(data), true)
    }

    fn with_data(file: OsmFile, data: PbfData, rewindable: bool) -> Self {
        Self {
            file,
            data,
            index: None,
            rewindable,
            consumed: false,
        }
    }

    fn index(&mut self) -> Result<&[BlockIndex]> {
        if self.index.is_none() {
            info!("Building index of PBF blocks of {}...", self.file);
            let index = build_block_index(&self.data)?;
            check_header(&self.data, &index)?;
            self.index = Some(index);
        }
        Ok(self.index.as_deref().unwrap_or(&[]))
    }
}

fn check_header(data: &[u8], index: &[BlockIndex]) -> Result<()> {
    let idx = match index.first() {
        Some(idx) if idx.block_type == BlockType::Header => idx,
        _ => return Err(Error::decode(0, "missing OSMHeader block")),
    };
    let header: proto::HeaderBlock = read_block(data, idx)?;
    for feature in &header.required_features {
        if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
            return Err(Error::Unsupported(format!(
                "required PBF feature `{}`",
                feature
            )));
        }
    }
    debug!(
        "PBF written by {}, source {}",
        header.writingprogram.as_deref().unwrap_or("unknown"),
        header.source.as_deref().unwrap_or("unknown")
    );
    Ok(())
}

impl InputSource for PbfSource {
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

        let mut blocks = Vec::new();
        for idx in self.index()? {
            match idx.block_type {
                BlockType::Changesets => warn!("Skipping changeset block at {}", idx.blob_start),
                block_type if block_type.contains(filter) => blocks.push(idx.clone()),
                _ => (),
            }
        }
        debug!("Reading {} blocks of {}", blocks.len(), self.file);

        let data: &[u8] = &self.data;
        let mut decoder = BlockDecoder {
            filter,
            sink,
            entity: 0,
        };
        parallel_process(
            blocks.into_iter(),
            |idx| {
                let block: Result<proto::PrimitiveBlock> = read_block(data, &idx);
                (idx.blob_start, block)
            },
            |(offset, block)| -> Result<proto::PrimitiveBlock> {
                let block = block?;
                decoder.decode(&block, offset)?;
                Ok(block)
            },
        )
    }
}

/// Turns primitive blocks into entities delivered to a sink.
struct BlockDecoder<'s> {
    filter: EntityFilter,
    sink: &'s mut dyn EntitySink,
    // number of entities delivered so far, for error reporting
    entity: u64,
}

fn string_table(block: &proto::PrimitiveBlock, offset: usize) -> Result<Vec<&str>> {
    block
        .stringtable
        .s
        .iter()
        .map(|s| {
            str::from_utf8(s)
                .map_err(|e| Error::decode(offset as u64, format!("invalid string table: {}", e)))
        })
        .collect()
}

fn lookup<'a>(strings: &[&'a str], idx: i64, offset: usize) -> Result<&'a str> {
    usize::try_from(idx)
        .ok()
        .and_then(|idx| strings.get(idx))
        .copied()
        .ok_or_else(|| Error::decode(offset as u64, format!("invalid string index {}", idx)))
}

struct Coordinates {
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
}

impl Coordinates {
    fn new(block: &proto::PrimitiveBlock) -> Self {
        Self {
            granularity: i64::from(block.granularity.unwrap_or(100)),
            lat_offset: block.lat_offset.unwrap_or(0),
            lon_offset: block.lon_offset.unwrap_or(0),
            date_granularity: i64::from(block.date_granularity.unwrap_or(1000)),
        }
    }

    fn position(&self, lat: i64, lon: i64, offset: usize) -> Result<Position> {
        // nanodegrees to 1e-7 degrees
        let scale = |base: i64, value: i64| {
            self.granularity
                .checked_mul(value)
                .and_then(|x| x.checked_add(base))
                .and_then(|x| i32::try_from(x / 100).ok())
        };
        match (scale(self.lat_offset, lat), scale(self.lon_offset, lon)) {
            (Some(lat), Some(lon)) => Ok(Position::from_raw(lon, lat)),
            _ => Err(Error::decode(
                offset as u64,
                format!("coordinates {}/{} out of range", lat, lon),
            )),
        }
    }

    fn timestamp(&self, timestamp: i64, offset: usize) -> Result<u32> {
        timestamp
            .checked_mul(self.date_granularity)
            .and_then(|ms| u32::try_from(ms / 1000).ok())
            .ok_or_else(|| {
                Error::decode(offset as u64, format!("timestamp {} out of range", timestamp))
            })
    }
}

/// Adds a delta coded value to its running sum.
fn accumulate(sum: i64, delta: i64, what: &str, offset: usize) -> Result<i64> {
    sum.checked_add(delta)
        .ok_or_else(|| Error::decode(offset as u64, format!("{} delta overflows", what)))
}

fn changeset_id(changeset: i64, offset: usize) -> Result<u64> {
    u64::try_from(changeset)
        .map_err(|_| Error::decode(offset as u64, format!("negative changeset {}", changeset)))
}

fn apply_info(
    header: &mut Header,
    info: &proto::Info,
    coords: &Coordinates,
    offset: usize,
) -> Result<()> {
    if let Some(version) = info.version.filter(|v| *v >= 0) {
        header.set_version(version as u32);
    }
    if let Some(timestamp) = info.timestamp {
        header.set_timestamp(coords.timestamp(timestamp, offset)?);
    }
    if let Some(value) = info.changeset {
        header.set_changeset(changeset_id(value, offset)?);
    }
    if let Some(uid) = info.uid {
        header.set_uid(uid);
    }
    header.set_visible(info.visible.unwrap_or(true));
    Ok(())
}

impl<'s> BlockDecoder<'s> {
    fn decode(&mut self, block: &proto::PrimitiveBlock, offset: usize) -> Result<()> {
        let strings = string_table(block, offset)?;
        let coords = Coordinates::new(block);
        for group in &block.primitivegroup {
            if self.filter.nodes {
                for node in &group.nodes {
                    self.node(node, &strings, &coords, offset)?;
                }
                if let Some(dense) = &group.dense {
                    self.dense_nodes(dense, &strings, &coords, offset)?;
                }
            }
            if self.filter.ways {
                for way in &group.ways {
                    self.way(way, &strings, &coords, offset)?;
                }
            }
            if self.filter.relations {
                for relation in &group.relations {
                    self.relation(relation, &strings, &coords, offset)?;
                }
            }
        }
        Ok(())
    }

    fn deliver(&mut self, item_type: ItemType) -> Result<()> {
        self.entity += 1;
        self.sink.deliver(item_type)
    }

    fn tags<T: OsmObject>(
        object: &mut T,
        keys: &[u32],
        vals: &[u32],
        strings: &[&str],
        offset: usize,
    ) -> Result<()> {
        if keys.len() != vals.len() {
            return Err(Error::decode(offset as u64, "tag keys and values differ in length"));
        }
        for (k, v) in keys.iter().zip(vals) {
            let key = lookup(strings, i64::from(*k), offset)?;
            let value = lookup(strings, i64::from(*v), offset)?;
            object.tags_mut().add(key, value)?;
        }
        Ok(())
    }

    fn node(
        &mut self,
        pbf_node: &proto::Node,
        strings: &[&str],
        coords: &Coordinates,
        offset: usize,
    ) -> Result<()> {
        let entity = self.entity;
        let node = &mut self.sink.scratch().node;
        node.reset();
        node.header_mut().set_id(pbf_node.id);
        if let Some(info) = &pbf_node.info {
            apply_info(node.header_mut(), info, coords, offset)
                .map_err(|e| e.with_entity(entity))?;
        }
        let position = coords
            .position(pbf_node.lat, pbf_node.lon, offset)
            .map_err(|e| e.with_entity(entity))?;
        node.set_position(position);
        Self::tags(node, &pbf_node.keys, &pbf_node.vals, strings, offset)
            .map_err(|e| e.with_entity(entity))?;
        self.deliver(ItemType::Node)
    }

    fn dense_nodes(
        &mut self,
        dense: &proto::DenseNodes,
        strings: &[&str],
        coords: &Coordinates,
        offset: usize,
    ) -> Result<()> {
        if dense.lat.len() != dense.id.len() || dense.lon.len() != dense.id.len() {
            return Err(Error::decode(offset as u64, "dense node arrays differ in length")
                .with_entity(self.entity));
        }
        let info = dense.denseinfo.as_ref();

        let mut id = 0;
        let mut lat = 0;
        let mut lon = 0;
        let mut timestamp = 0;
        let mut changeset = 0;
        let mut uid: i32 = 0;
        let mut tags_offset = 0;
        for i in 0..dense.id.len() {
            let entity = self.entity;
            let with_entity = |e: Error| e.with_entity(entity);
            id = accumulate(id, dense.id[i], "id", offset).map_err(with_entity)?;
            lat = accumulate(lat, dense.lat[i], "lat", offset).map_err(with_entity)?;
            lon = accumulate(lon, dense.lon[i], "lon", offset).map_err(with_entity)?;

            let node = &mut self.sink.scratch().node;
            node.reset();
            node.header_mut().set_id(id);
            node.set_position(coords.position(lat, lon, offset).map_err(with_entity)?);

            if let Some(info) = info {
                let header = node.header_mut();
                if let Some(version) = info.version.get(i).filter(|v| **v >= 0) {
                    header.set_version(*version as u32);
                }
                if let Some(delta) = info.timestamp.get(i) {
                    timestamp =
                        accumulate(timestamp, *delta, "timestamp", offset).map_err(with_entity)?;
                    header.set_timestamp(coords.timestamp(timestamp, offset).map_err(with_entity)?);
                }
                if let Some(delta) = info.changeset.get(i) {
                    changeset =
                        accumulate(changeset, *delta, "changeset", offset).map_err(with_entity)?;
                    header.set_changeset(changeset_id(changeset, offset).map_err(with_entity)?);
                }
                if let Some(delta) = info.uid.get(i) {
                    uid = uid.checked_add(*delta).ok_or_else(|| {
                        Error::decode(offset as u64, "uid delta overflows").with_entity(entity)
                    })?;
                    header.set_uid(uid);
                }
                header.set_visible(info.visible.get(i).copied().unwrap_or(true));
            }

            while tags_offset < dense.keys_vals.len() {
                let k = dense.keys_vals[tags_offset];
                tags_offset += 1;
                if k == 0 {
                    break; // separator
                }
                let v = match dense.keys_vals.get(tags_offset) {
                    Some(v) => *v,
                    None => {
                        return Err(Error::decode(offset as u64, "truncated dense node tags")
                            .with_entity(entity))
                    }
                };
                tags_offset += 1;

                let key = lookup(strings, i64::from(k), offset).map_err(|e| e.with_entity(entity))?;
                let value =
                    lookup(strings, i64::from(v), offset).map_err(|e| e.with_entity(entity))?;
                node.tags_mut().add(key, value)?;
            }

            self.deliver(ItemType::Node)?;
        }
        Ok(())
    }

    fn way(
        &mut self,
        pbf_way: &proto::Way,
        strings: &[&str],
        coords: &Coordinates,
        offset: usize,
    ) -> Result<()> {
        let entity = self.entity;
        let way = &mut self.sink.scratch().way;
        way.reset();
        way.header_mut().set_id(pbf_way.id);
        if let Some(info) = &pbf_way.info {
            apply_info(way.header_mut(), info, coords, offset).map_err(|e| e.with_entity(entity))?;
        }
        Self::tags(way, &pbf_way.keys, &pbf_way.vals, strings, offset)
            .map_err(|e| e.with_entity(entity))?;

        let mut node_ref = 0;
        for delta in &pbf_way.refs {
            node_ref =
                accumulate(node_ref, *delta, "node ref", offset).map_err(|e| e.with_entity(entity))?;
            way.add_node(WayNode::new(node_ref));
        }
        self.deliver(ItemType::Way)
    }

    fn relation(
        &mut self,
        pbf_relation: &proto::Relation,
        strings: &[&str],
        coords: &Coordinates,
        offset: usize,
    ) -> Result<()> {
        use proto::relation::MemberType;

        let entity = self.entity;
        let relation = &mut self.sink.scratch().relation;
        relation.reset();
        relation.header_mut().set_id(pbf_relation.id);
        if let Some(info) = &pbf_relation.info {
            apply_info(relation.header_mut(), info, coords, offset)
                .map_err(|e| e.with_entity(entity))?;
        }
        Self::tags(relation, &pbf_relation.keys, &pbf_relation.vals, strings, offset)
            .map_err(|e| e.with_entity(entity))?;

        if pbf_relation.roles_sid.len() != pbf_relation.memids.len()
            || pbf_relation.memids.len() != pbf_relation.types.len()
        {
            return Err(
                Error::decode(offset as u64, "member arrays differ in length").with_entity(entity)
            );
        }

        let mut memid = 0;
        for i in 0..pbf_relation.memids.len() {
            memid = accumulate(memid, pbf_relation.memids[i], "member id", offset)
                .map_err(|e| e.with_entity(entity))?;
            let member_type = match MemberType::from_i32(pbf_relation.types[i]) {
                Some(MemberType::Node) => ItemType::Node,
                Some(MemberType::Way) => ItemType::Way,
                Some(MemberType::Relation) => ItemType::Relation,
                None => {
                    return Err(Error::decode(
                        offset as u64,
                        format!("unknown member type {}", pbf_relation.types[i]),
                    )
                    .with_entity(entity))
                }
            };
            let role = lookup(strings, i64::from(pbf_relation.roles_sid[i]), offset)
                .map_err(|e| e.with_entity(entity))?;
            relation.add_member(RelationMember::new(memid, member_type, role));
        }
        self.deliver(ItemType::Relation)
    }
}


#[cfg(test)]
mod test {
    use super::test_util::*;
    use super::*;
    use crate::object::Node;
    use crate::source::Scratch;

    #[derive(Default)]
    struct Collect {
        scratch: Scratch,
        nodes: Vec<Node>,
        log: Vec<(ItemType, i64)>,
    }

    impl EntitySink for Collect {
        fn scratch(&mut self) -> &mut Scratch {
            &mut self.scratch
        }

        fn deliver(&mut self, item_type: ItemType) -> Result<()> {
            let id = match item_type {
                ItemType::Node => {
                    self.nodes.push(self.scratch.node.clone());
                    self.scratch.node.id()
                }
                ItemType::Way => self.scratch.way.id(),
                ItemType::Relation => self.scratch.relation.id(),
            };
            self.log.push((item_type, id));
            Ok(())
        }
    }

    fn dense_block() -> proto::PrimitiveBlock {
        proto::PrimitiveBlock {
            stringtable: strings(&["", "amenity", "cafe", "name", "Zum Ox"]),
            primitivegroup: vec![proto::PrimitiveGroup {
                dense: Some(proto::DenseNodes {
                    id: vec![10, 1, 1],
                    lat: vec![490096164, 10, -20],
                    lon: vec![83902210, 0, 5],
                    keys_vals: vec![1, 2, 3, 4, 0, 0, 0],
                    denseinfo: Some(proto::DenseInfo {
                        version: vec![1, 2, 3],
                        timestamp: vec![1000, 1, 1],
                        changeset: vec![50, 0, 1],
                        uid: vec![7, 0, -7],
                        user_sid: vec![0, 0, 0],
                        visible: vec![],
                    }),
                }),
                ..Default::default()
            }],
            granularity: Some(100),
            ..Default::default()
        }
    }

    fn way_block() -> proto::PrimitiveBlock {
        proto::PrimitiveBlock {
            stringtable: strings(&["", "highway", "path"]),
            primitivegroup: vec![proto::PrimitiveGroup {
                ways: vec![proto::Way {
                    id: 100,
                    keys: vec![1],
                    vals: vec![2],
                    refs: vec![10, 1, 1, -2],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn relation_block() -> proto::PrimitiveBlock {
        proto::PrimitiveBlock {
            stringtable: strings(&["", "type", "multipolygon", "outer"]),
            primitivegroup: vec![proto::PrimitiveGroup {
                relations: vec![proto::Relation {
                    id: 1000,
                    keys: vec![1],
                    vals: vec![2],
                    roles_sid: vec![3, 0],
                    memids: vec![100, -90],
                    types: vec![1, 0],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn source() -> PbfSource {
        let data = pbf_file(header(), vec![dense_block(), way_block(), relation_block()]);
        PbfSource::from_bytes(OsmFile::new("test.osm.pbf"), data)
    }

    #[test]
    fn test_block_index() {
        let data = pbf_file(header(), vec![dense_block(), way_block(), relation_block()]);
        let index = build_block_index(&data).unwrap();
        let types: Vec<BlockType> = index.iter().map(|b| b.block_type).collect();
        assert_eq!(
            types,
            vec![
                BlockType::Header,
                BlockType::DenseNodes,
                BlockType::Ways,
                BlockType::Relations
            ]
        );
    }

    #[test]
    fn test_read_all_in_file_order() {
        let mut source = source();
        let mut sink = Collect::default();
        source.read(EntityFilter::ALL, &mut sink).unwrap();
        assert_eq!(
            sink.log,
            vec![
                (ItemType::Node, 10),
                (ItemType::Node, 11),
                (ItemType::Node, 12),
                (ItemType::Way, 100),
                (ItemType::Relation, 1000),
            ]
        );

        let first = &sink.nodes[0];
        assert_eq!(first.position(), Position::from_raw(83902210, 490096164));
        assert_eq!(first.version(), 1);
        assert_eq!(first.header().timestamp(), 1000);
        assert_eq!(first.header().changeset(), 50);
        assert_eq!(first.header().uid(), 7);
        assert!(first.header().visible());
        assert_eq!(first.tags().get("amenity"), Some("cafe"));
        assert_eq!(first.tags().get("name"), Some("Zum Ox"));

        let third = &sink.nodes[2];
        assert!(third.tags().is_empty());
        assert_eq!(third.position(), Position::from_raw(83902215, 490096154));
        assert_eq!(third.header().uid(), 0);
        assert_eq!(third.header().changeset(), 51);
    }

    #[test]
    fn test_way_and_relation_payload() {
        let mut source = source();
        let mut sink = Collect::default();
        source.read(EntityFilter::WAYS, &mut sink).unwrap();
        let refs: Vec<i64> = sink.scratch.way.nodes().iter().map(|n| n.node_ref()).collect();
        assert_eq!(refs, vec![10, 11, 12, 10]);
        assert!(sink.scratch.way.is_closed());
        assert_eq!(sink.scratch.way.tags().get("highway"), Some("path"));

        source.rewind().unwrap();
        source.read(EntityFilter::RELATIONS, &mut sink).unwrap();
        let members = sink.scratch.relation.members();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0], RelationMember::new(100, ItemType::Way, "outer"));
        assert_eq!(members[1], RelationMember::new(10, ItemType::Node, ""));
    }

    #[test]
    fn test_filter_skips_blocks() {
        let mut source = source();
        let mut sink = Collect::default();
        source.read(EntityFilter::RELATIONS, &mut sink).unwrap();
        assert_eq!(sink.log, vec![(ItemType::Relation, 1000)]);
    }

    #[test]
    fn test_read_without_rewind_delivers_nothing() {
        let mut source = source();
        let mut sink = Collect::default();
        source.read(EntityFilter::ALL, &mut sink).unwrap();
        sink.log.clear();
        source.read(EntityFilter::ALL, &mut sink).unwrap();
        assert!(sink.log.is_empty());
    }

    #[test]
    fn test_invalid_string_index_reports_entity() {
        let mut block = way_block();
        block.primitivegroup[0].ways[0].vals = vec![42];
        let data = pbf_file(header(), vec![dense_block(), block]);
        let mut source = PbfSource::from_bytes(OsmFile::new("bad.osm.pbf"), data);
        let mut sink = Collect::default();
        match source.read(EntityFilter::ALL, &mut sink) {
            Err(Error::Decode { entity, message, .. }) => {
                assert_eq!(entity, Some(3));
                assert!(message.contains("string index 42"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    fn decode_error(blocks: Vec<proto::PrimitiveBlock>) -> (Option<u64>, String) {
        let data = pbf_file(header(), blocks);
        let mut source = PbfSource::from_bytes(OsmFile::new("bad.osm.pbf"), data);
        match source.read(EntityFilter::ALL, &mut Collect::default()) {
            Err(Error::Decode { entity, message, .. }) => (entity, message),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_overflowing_deltas() {
        let mut block = dense_block();
        let dense = block.primitivegroup[0].dense.as_mut().unwrap();
        dense.id = vec![i64::MAX, 1, 1];
        assert_eq!(
            decode_error(vec![block]),
            (Some(1), "id delta overflows".to_string())
        );

        let mut block = way_block();
        block.primitivegroup[0].ways[0].refs = vec![i64::MIN, -1];
        assert_eq!(
            decode_error(vec![block]),
            (Some(0), "node ref delta overflows".to_string())
        );

        let mut block = relation_block();
        block.primitivegroup[0].relations[0].memids = vec![i64::MAX, i64::MAX];
        assert_eq!(
            decode_error(vec![block]),
            (Some(0), "member id delta overflows".to_string())
        );

        let mut block = dense_block();
        let dense = block.primitivegroup[0].dense.as_mut().unwrap();
        dense.lat = vec![i64::MAX, 0, 0];
        let (entity, message) = decode_error(vec![block]);
        assert_eq!(entity, Some(0));
        assert!(message.contains("out of range"));
    }

    #[test]
    fn test_timestamp_out_of_range() {
        let mut block = dense_block();
        let info = block.primitivegroup[0].dense.as_mut().unwrap().denseinfo.as_mut().unwrap();
        info.timestamp = vec![1000, -2000, 1];
        assert_eq!(
            decode_error(vec![block]),
            (Some(1), "timestamp -1000 out of range".to_string())
        );

        let mut block = way_block();
        block.primitivegroup[0].ways[0].info = Some(proto::Info {
            timestamp: Some(i64::from(u32::MAX) + 1),
            ..Default::default()
        });
        let (entity, message) = decode_error(vec![block]);
        assert_eq!(entity, Some(0));
        assert!(message.starts_with("timestamp"));

        let mut block = way_block();
        block.primitivegroup[0].ways[0].info = Some(proto::Info {
            changeset: Some(-1),
            ..Default::default()
        });
        assert_eq!(
            decode_error(vec![block]),
            (Some(0), "negative changeset -1".to_string())
        );
    }

    #[test]
    fn test_truncated_file() {
        let mut data = pbf_file(header(), vec![dense_block()]);
        data.truncate(data.len() - 3);
        match build_block_index(&data) {
            Err(Error::Decode { message, .. }) => assert_eq!(message, "truncated blob"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_feature() {
        let mut header = header();
        header.required_features.push("LocationsOnWays".into());
        let data = pbf_file(header, vec![dense_block()]);
        let mut source = PbfSource::from_bytes(OsmFile::new("x.osm.pbf"), data);
        match source.read(EntityFilter::ALL, &mut Collect::default()) {
            Err(Error::Unsupported(what)) => assert!(what.contains("LocationsOnWays")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
