//! OSM PBF codec.
//!
//! An OSM PBF file is a sequence of blobs. Each blob is preceded by a 4 byte
//! network order length and a `BlobHeader`. The first blob is an `OSMHeader`
//! containing a `HeaderBlock`, all further blobs are `OSMData` containing
//! `PrimitiveBlock`s.

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::{debug, trace};
use prost::Message;

use std::io::{self, Read, Write};
use std::str;

use crate::buffer::Buffer;
use crate::entity::{
    self, Changeset, Entity, EntityFilter, EntityKind, Location, Member, NodeRef, Tags,
    COORDINATE_PRECISION,
};
use crate::error::{Error, Result};
use crate::file::PbfCompression;

pub const FEATURE_OSM_SCHEMA: &str = "OsmSchema-V0.6";
pub const FEATURE_DENSE_NODES: &str = "DenseNodes";
pub const FEATURE_HISTORICAL_INFORMATION: &str = "HistoricalInformation";
pub const FEATURE_LOCATIONS_ON_WAYS: &str = "LocationsOnWays";

/// Required features this codec understands.
pub const SUPPORTED_FEATURES: &[&str] = &[
    FEATURE_OSM_SCHEMA,
    FEATURE_DENSE_NODES,
    FEATURE_HISTORICAL_INFORMATION,
    FEATURE_LOCATIONS_ON_WAYS,
];

const MAX_BLOB_HEADER_SIZE: usize = 64 * 1024;
const MAX_UNCOMPRESSED_BLOB_SIZE: usize = 32 * 1024 * 1024;

/// Maximum number of entities the writer puts into one block.
pub const MAX_ENTITIES_PER_BLOCK: usize = 8000;

/// Maximum encoded size of a block the writer produces.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Bytes of a block not attributed to any entity: string table and group
/// framing, packed field headers.
pub(crate) const BLOCK_OVERHEAD: usize = 256;

const MAX_VARINT_LEN: usize = 10;
const MESSAGE_OVERHEAD: usize = 64;

const DEFAULT_GRANULARITY: i32 = 100;
const DEFAULT_DATE_GRANULARITY: i32 = 1000;
const NANODEGREES_PER_UNIT: i64 = 1_000_000_000 / COORDINATE_PRECISION as i64;

// fileformat.proto

#[derive(Clone, PartialEq, Message)]
pub struct BlobHeader {
    #[prost(string, required, tag = "1")]
    pub r#type: String,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub indexdata: Option<Vec<u8>>,
    #[prost(int32, required, tag = "3")]
    pub datasize: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Blob {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub raw: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "2")]
    pub raw_size: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub zlib_data: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub lzma_data: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub obsolete_bzip2_data: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub lz4_data: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub zstd_data: Option<Vec<u8>>,
}

// osmformat.proto

#[derive(Clone, PartialEq, Message)]
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
    #[prost(int64, optional, tag = "32")]
    pub osmosis_replication_timestamp: Option<i64>,
    #[prost(int64, optional, tag = "33")]
    pub osmosis_replication_sequence_number: Option<i64>,
    #[prost(string, optional, tag = "34")]
    pub osmosis_replication_base_url: Option<String>,
}

/// Bounding box in nanodegrees.
#[derive(Clone, PartialEq, Message)]
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

#[derive(Clone, PartialEq, Message)]
pub struct PrimitiveBlock {
    #[prost(message, required, tag = "1")]
    pub stringtable: StringTable,
    #[prost(message, repeated, tag = "2")]
    pub primitivegroup: Vec<PrimitiveGroup>,
    #[prost(int32, optional, tag = "17")]
    pub granularity: Option<i32>,
    #[prost(int32, optional, tag = "18")]
    pub date_granularity: Option<i32>,
    #[prost(int64, optional, tag = "19")]
    pub lat_offset: Option<i64>,
    #[prost(int64, optional, tag = "20")]
    pub lon_offset: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrimitiveGroup {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<Node>,
    #[prost(message, optional, tag = "2")]
    pub dense: Option<DenseNodes>,
    #[prost(message, repeated, tag = "3")]
    pub ways: Vec<Way>,
    #[prost(message, repeated, tag = "4")]
    pub relations: Vec<Relation>,
    #[prost(message, repeated, tag = "5")]
    pub changesets: Vec<ChangeSet>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StringTable {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub s: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Info {
    #[prost(int32, optional, tag = "1")]
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

#[derive(Clone, PartialEq, Message)]
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

#[derive(Clone, PartialEq, Message)]
pub struct ChangeSet {
    #[prost(int64, required, tag = "1")]
    pub id: i64,
}

#[derive(Clone, PartialEq, Message)]
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

#[derive(Clone, PartialEq, Message)]
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

#[derive(Clone, PartialEq, Message)]
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
    #[prost(sint64, repeated, packed = "true", tag = "9")]
    pub lat: Vec<i64>,
    #[prost(sint64, repeated, packed = "true", tag = "10")]
    pub lon: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
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

/// Type of a blob as given in its `BlobHeader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobType {
    Header,
    Data,
}

impl BlobType {
    fn as_str(&self) -> &'static str {
        match self {
            BlobType::Header => "OSMHeader",
            BlobType::Data => "OSMData",
        }
    }
}

/// A blob with its payload already decompressed.
#[derive(Debug)]
pub struct RawBlock {
    pub blob_type: BlobType,
    pub data: Vec<u8>,
}

/// Reads the blob sequence of a PBF stream.
#[derive(Debug)]
pub struct BlobReader<R> {
    reader: R,
    file_buf: Vec<u8>,
    offset: u64,
}

impl<R: Read> BlobReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            file_buf: Vec::new(),
            offset: 0,
        }
    }

    /// Byte offset of the next blob in the stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fills `file_buf` with `len` bytes. Returns `false` on a clean end of
    /// stream before the first byte if `eof_ok` is set.
    fn fill(&mut self, len: usize, eof_ok: bool) -> Result<bool> {
        self.file_buf.resize(len, 0);
        let mut pos = 0;
        while pos < len {
            match self.reader.read(&mut self.file_buf[pos..]) {
                Ok(0) if pos == 0 && eof_ok => return Ok(false),
                Ok(0) => {
                    return Err(Error::malformed(format!(
                        "truncated blob at offset {}",
                        self.offset
                    )))
                }
                Ok(n) => pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += len as u64;
        Ok(true)
    }

    /// Reads the next blob and decompresses it. Blobs of unknown type are
    /// skipped. Returns `None` at the end of the stream.
    pub fn next_block(&mut self) -> Result<Option<RawBlock>> {
        loop {
            // read size of blob header
            if !self.fill(4, true)? {
                return Ok(None);
            }
            let blob_header_len = NetworkEndian::read_u32(&self.file_buf) as usize;
            if blob_header_len > MAX_BLOB_HEADER_SIZE {
                return Err(Error::malformed(format!(
                    "blob header size {} exceeds maximum",
                    blob_header_len
                )));
            }

            // read blob header
            self.fill(blob_header_len, false)?;
            let blob_header = BlobHeader::decode(self.file_buf.as_slice())?;
            let blob_len = usize::try_from(blob_header.datasize)
                .ok()
                .filter(|len| *len <= MAX_UNCOMPRESSED_BLOB_SIZE)
                .ok_or_else(|| {
                    Error::malformed(format!("invalid blob size {}", blob_header.datasize))
                })?;

            // read blob
            self.fill(blob_len, false)?;
            let blob_type = match blob_header.r#type.as_str() {
                "OSMHeader" => BlobType::Header,
                "OSMData" => BlobType::Data,
                other => {
                    debug!("Skipping blob of unknown type '{}'", other);
                    continue;
                }
            };
            let blob = Blob::decode(self.file_buf.as_slice())?;
            let data = decompress(blob)?;
            trace!("Read {:?} blob of {} bytes", blob_type, data.len());
            return Ok(Some(RawBlock { blob_type, data }));
        }
    }
}

fn decompress(blob: Blob) -> Result<Vec<u8>> {
    let data = if let Some(raw) = blob.raw {
        raw
    } else if let Some(zlib_data) = blob.zlib_data {
        let expected = blob.raw_size.unwrap_or(0).max(0) as usize;
        if expected > MAX_UNCOMPRESSED_BLOB_SIZE {
            return Err(Error::malformed(format!("invalid raw size {}", expected)));
        }
        let mut buf = Vec::with_capacity(expected);
        let mut decoder =
            ZlibDecoder::new(&zlib_data[..]).take(MAX_UNCOMPRESSED_BLOB_SIZE as u64 + 1);
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| Error::malformed(format!("zlib: {}", e)))?;
        buf
    } else if blob.lzma_data.is_some() {
        return Err(Error::UnsupportedFeature("lzma compressed blob".into()));
    } else if blob.lz4_data.is_some() {
        return Err(Error::UnsupportedFeature("lz4 compressed blob".into()));
    } else if blob.zstd_data.is_some() {
        return Err(Error::UnsupportedFeature("zstd compressed blob".into()));
    } else if blob.obsolete_bzip2_data.is_some() {
        return Err(Error::UnsupportedFeature("bzip2 compressed blob".into()));
    } else {
        return Err(Error::malformed("blob without data"));
    };

    if data.len() > MAX_UNCOMPRESSED_BLOB_SIZE {
        return Err(Error::malformed("blob exceeds maximum size"));
    }
    if let Some(raw_size) = blob.raw_size {
        if raw_size as usize != data.len() {
            return Err(Error::malformed(format!(
                "blob size mismatch: declared {}, got {}",
                raw_size,
                data.len()
            )));
        }
    }
    Ok(data)
}

/// Frames and writes a single blob.
pub fn write_blob<W: Write>(
    writer: &mut W,
    blob_type: BlobType,
    data: &[u8],
    compression: PbfCompression,
) -> Result<()> {
    if data.len() > MAX_UNCOMPRESSED_BLOB_SIZE {
        return Err(Error::malformed(format!(
            "block of {} bytes exceeds maximum blob size",
            data.len()
        )));
    }
    let blob = match compression {
        PbfCompression::None => Blob {
            raw: Some(data.to_vec()),
            raw_size: Some(data.len() as i32),
            ..Default::default()
        },
        PbfCompression::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Blob {
                raw_size: Some(data.len() as i32),
                zlib_data: Some(encoder.finish()?),
                ..Default::default()
            }
        }
    };
    let blob = blob.encode_to_vec();
    if blob.len() > MAX_UNCOMPRESSED_BLOB_SIZE {
        return Err(Error::malformed(format!(
            "blob of {} bytes exceeds maximum blob size",
            blob.len()
        )));
    }
    let blob_header = BlobHeader {
        r#type: blob_type.as_str().to_string(),
        indexdata: None,
        datasize: blob.len() as i32,
    }
    .encode_to_vec();

    writer.write_u32::<NetworkEndian>(blob_header.len() as u32)?;
    writer.write_all(&blob_header)?;
    writer.write_all(&blob)?;
    Ok(())
}

/// Decode the entity kinds contained in a PrimitiveBlock.
///
/// This does not decode any entities, it just checks which fields are
/// present in the PrimitiveGroup fields of the message. The result is used
/// to skip blocks a reader is not interested in.
///
/// `blob` should contain decompressed data of an OSMData PrimitiveBlock.
///
/// Note: We use public API of `prost` crate, which though is not exposed in
/// the crate docs and marked with comment that it should be only used from
/// `prost::Message`.
pub fn block_kinds(mut blob: &[u8]) -> Result<EntityFilter> {
    use prost::encoding::{decode_key, decode_varint, skip_field, DecodeContext, WireType};

    const PRIMITIVE_GROUP_TAG: u32 = 2;
    const NODES_TAG: u32 = 1;
    const DENSE_NODES_TAG: u32 = 2;
    const WAYS_TAG: u32 = 3;
    const RELATIONS_TAG: u32 = 4;
    const CHANGESETS_TAG: u32 = 5;

    let mut kinds = EntityFilter::none();
    while !blob.is_empty() {
        let (tag, wire_type) = decode_key(&mut blob)?;
        if tag != PRIMITIVE_GROUP_TAG || wire_type != WireType::LengthDelimited {
            skip_field(wire_type, tag, &mut blob, DecodeContext::default())?;
            continue;
        }

        let len = decode_varint(&mut blob)? as usize;
        if len > blob.len() {
            return Err(Error::malformed("primitive group exceeds block"));
        }
        let (mut group, rest) = blob.split_at(len);
        blob = rest;

        while !group.is_empty() {
            let (tag, wire_type) = decode_key(&mut group)?;
            match tag {
                NODES_TAG | DENSE_NODES_TAG => kinds.node = true,
                WAYS_TAG => kinds.way = true,
                RELATIONS_TAG => kinds.relation = true,
                CHANGESETS_TAG => kinds.changeset = true,
                _ => {}
            }
            skip_field(wire_type, tag, &mut group, DecodeContext::default())?;
        }
    }
    Ok(kinds)
}

/// Lookup state shared by all groups of a block.
struct BlockDecoder<'a> {
    strings: Vec<&'a str>,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
}

#[derive(Default)]
struct DenseInfoState {
    timestamp: i64,
    changeset: i64,
    uid: i32,
    user_sid: i64,
}

/// Adds a delta of a checked quantity, failing on overflow.
fn add_delta(value: i64, delta: i64) -> Result<i64> {
    value
        .checked_add(delta)
        .ok_or_else(|| Error::malformed(format!("delta {} overflows {}", delta, value)))
}

impl<'a> BlockDecoder<'a> {
    fn new(block: &'a PrimitiveBlock) -> Result<Self> {
        let strings = block
            .stringtable
            .s
            .iter()
            .map(|s| str::from_utf8(s))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::malformed(format!("string table: {}", e)))?;
        Ok(Self {
            strings,
            granularity: i64::from(block.granularity.unwrap_or(DEFAULT_GRANULARITY)),
            lat_offset: block.lat_offset.unwrap_or(0),
            lon_offset: block.lon_offset.unwrap_or(0),
            date_granularity: i64::from(block.date_granularity.unwrap_or(DEFAULT_DATE_GRANULARITY)),
        })
    }

    fn string(&self, idx: i64) -> Result<String> {
        usize::try_from(idx)
            .ok()
            .and_then(|idx| self.strings.get(idx))
            .map(|s| s.to_string())
            .ok_or_else(|| Error::malformed(format!("string index {} out of range", idx)))
    }

    fn coordinate(&self, offset: i64, value: i64) -> Result<i32> {
        self.granularity
            .checked_mul(value)
            .and_then(|nanodegrees| nanodegrees.checked_add(offset))
            .and_then(|nanodegrees| i32::try_from(nanodegrees / NANODEGREES_PER_UNIT).ok())
            .ok_or_else(|| Error::malformed(format!("coordinate {} out of range", value)))
    }

    fn location(&self, lat: i64, lon: i64) -> Result<Location> {
        Ok(Location::new(
            self.coordinate(self.lon_offset, lon)?,
            self.coordinate(self.lat_offset, lat)?,
        ))
    }

    fn timestamp(&self, timestamp: i64) -> Result<i64> {
        timestamp
            .checked_mul(self.date_granularity)
            .map(|millis| millis / 1000)
            .ok_or_else(|| Error::malformed(format!("timestamp {} out of range", timestamp)))
    }

    fn tags(&self, keys: &[u32], vals: &[u32]) -> Result<Tags> {
        if keys.len() != vals.len() {
            return Err(Error::malformed("keys and values differ in length"));
        }
        keys.iter()
            .zip(vals)
            .map(|(k, v)| Ok((self.string(i64::from(*k))?, self.string(i64::from(*v))?)))
            .collect()
    }

    fn info(&self, info: &Info) -> Result<entity::Info> {
        Ok(entity::Info {
            version: info.version.unwrap_or(0),
            timestamp: self.timestamp(info.timestamp.unwrap_or(0))?,
            changeset: info.changeset.unwrap_or(0),
            uid: info.uid.unwrap_or(0),
            user: self.string(i64::from(info.user_sid.unwrap_or(0)))?,
            visible: info.visible.unwrap_or(true),
        })
    }

    fn dense_info(
        &self,
        info: &DenseInfo,
        i: usize,
        state: &mut DenseInfoState,
    ) -> Result<entity::Info> {
        // ids and counters are delta coded modulo 2^64 (2^32 for uids)
        state.timestamp = state
            .timestamp
            .wrapping_add(info.timestamp.get(i).copied().unwrap_or(0));
        state.changeset = state
            .changeset
            .wrapping_add(info.changeset.get(i).copied().unwrap_or(0));
        state.uid = state.uid.wrapping_add(info.uid.get(i).copied().unwrap_or(0));
        state.user_sid = add_delta(
            state.user_sid,
            i64::from(info.user_sid.get(i).copied().unwrap_or(0)),
        )?;
        Ok(entity::Info {
            version: info.version.get(i).copied().unwrap_or(0),
            timestamp: self.timestamp(state.timestamp)?,
            changeset: state.changeset,
            uid: state.uid,
            user: self.string(state.user_sid)?,
            visible: info.visible.get(i).copied().unwrap_or(true),
        })
    }

    fn node(&self, node: &Node) -> Result<entity::Node> {
        Ok(entity::Node {
            id: node.id,
            location: self.location(node.lat, node.lon)?,
            tags: self.tags(&node.keys, &node.vals)?,
            info: node.info.as_ref().map(|info| self.info(info)).transpose()?,
        })
    }

    fn dense_nodes(&self, dense: &DenseNodes, out: &mut Buffer) -> Result<()> {
        let len = dense.id.len();
        if dense.lat.len() != len || dense.lon.len() != len {
            return Err(Error::malformed(
                "dense nodes: ids and coordinates differ in length",
            ));
        }

        let (mut id, mut lat, mut lon) = (0, 0, 0);
        let mut tags_offset = 0;
        let mut info_state = DenseInfoState::default();
        for i in 0..len {
            id = i64::wrapping_add(id, dense.id[i]);
            lat = add_delta(lat, dense.lat[i])?;
            lon = add_delta(lon, dense.lon[i])?;

            let mut tags = Tags::new();
            if !dense.keys_vals.is_empty() {
                loop {
                    let k = *dense
                        .keys_vals
                        .get(tags_offset)
                        .ok_or_else(|| Error::malformed("dense nodes: unterminated tags"))?;
                    tags_offset += 1;
                    if k == 0 {
                        break; // separator
                    }
                    let v = *dense
                        .keys_vals
                        .get(tags_offset)
                        .ok_or_else(|| Error::malformed("dense nodes: tag without value"))?;
                    tags_offset += 1;
                    tags.push((self.string(i64::from(k))?, self.string(i64::from(v))?));
                }
            }

            let info = match dense.denseinfo {
                Some(ref info) => Some(self.dense_info(info, i, &mut info_state)?),
                None => None,
            };

            out.push(entity::Node {
                id,
                location: self.location(lat, lon)?,
                tags,
                info,
            });
        }
        Ok(())
    }

    fn way(&self, way: &Way) -> Result<entity::Way> {
        let mut node_ref: i64 = 0;
        let mut nodes: Vec<NodeRef> = way
            .refs
            .iter()
            .map(|delta| {
                node_ref = node_ref.wrapping_add(*delta);
                NodeRef::new(node_ref)
            })
            .collect();

        // LocationsOnWays
        if !way.lat.is_empty() && way.lat.len() == nodes.len() && way.lon.len() == nodes.len() {
            let (mut lat, mut lon) = (0, 0);
            for (i, node) in nodes.iter_mut().enumerate() {
                lat = add_delta(lat, way.lat[i])?;
                lon = add_delta(lon, way.lon[i])?;
                node.location = self.location(lat, lon)?;
            }
        }

        Ok(entity::Way {
            id: way.id,
            nodes,
            tags: self.tags(&way.keys, &way.vals)?,
            info: way.info.as_ref().map(|info| self.info(info)).transpose()?,
        })
    }

    fn relation(&self, relation: &Relation) -> Result<entity::Relation> {
        if relation.roles_sid.len() != relation.memids.len()
            || relation.memids.len() != relation.types.len()
        {
            return Err(Error::malformed(format!(
                "relation {}: member arrays differ in length",
                relation.id
            )));
        }

        let mut memid = 0;
        let mut members = Vec::with_capacity(relation.memids.len());
        for i in 0..relation.memids.len() {
            memid = i64::wrapping_add(memid, relation.memids[i]);
            let kind = match relation::MemberType::try_from(relation.types[i]) {
                Ok(relation::MemberType::Node) => EntityKind::Node,
                Ok(relation::MemberType::Way) => EntityKind::Way,
                Ok(relation::MemberType::Relation) => EntityKind::Relation,
                Err(_) => {
                    return Err(Error::malformed(format!(
                        "relation {}: invalid member type {}",
                        relation.id, relation.types[i]
                    )))
                }
            };
            members.push(Member {
                kind,
                id: memid,
                role: self.string(i64::from(relation.roles_sid[i]))?,
            });
        }

        Ok(entity::Relation {
            id: relation.id,
            members,
            tags: self.tags(&relation.keys, &relation.vals)?,
            info: relation
                .info
                .as_ref()
                .map(|info| self.info(info))
                .transpose()?,
        })
    }
}

/// Decodes all entities of a block selected by `filter`, in block order.
pub fn decode_block(block: &PrimitiveBlock, filter: &EntityFilter, out: &mut Buffer) -> Result<()> {
    let decoder = BlockDecoder::new(block)?;
    for group in &block.primitivegroup {
        if filter.node {
            for node in &group.nodes {
                out.push(decoder.node(node)?);
            }
            if let Some(ref dense) = group.dense {
                decoder.dense_nodes(dense, out)?;
            }
        }
        if filter.way {
            for way in &group.ways {
                out.push(decoder.way(way)?);
            }
        }
        if filter.relation {
            for relation in &group.relations {
                out.push(decoder.relation(relation)?);
            }
        }
        if filter.changeset {
            for changeset in &group.changesets {
                out.push(Changeset {
                    id: changeset.id,
                    tags: Tags::new(),
                });
            }
        }
    }
    Ok(())
}

/// Deduplicating string table of a block under construction. Index 0 is
/// kept unused since dense nodes use it as tag separator; the empty string
/// gets an index of its own like any other string.
struct StringTableBuilder {
    strings: Vec<Vec<u8>>,
    indexed: ahash::AHashMap<String, u32>,
}

impl StringTableBuilder {
    fn new() -> Self {
        Self {
            strings: vec![Vec::new()],
            indexed: ahash::AHashMap::new(),
        }
    }

    fn insert(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.indexed.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.as_bytes().to_vec());
        self.indexed.insert(s.to_string(), idx);
        idx
    }

    fn build(self) -> StringTable {
        StringTable { s: self.strings }
    }
}

fn encode_tags(tags: &Tags, strings: &mut StringTableBuilder) -> (Vec<u32>, Vec<u32>) {
    tags.iter()
        .map(|(k, v)| (strings.insert(k), strings.insert(v)))
        .unzip()
}

fn encode_info(info: &entity::Info, strings: &mut StringTableBuilder) -> Info {
    Info {
        version: Some(info.version),
        // date granularity of the writer is 1000ms
        timestamp: Some(info.timestamp),
        changeset: Some(info.changeset),
        uid: Some(info.uid),
        user_sid: Some(strings.insert(&info.user)),
        visible: None,
    }
}

fn encode_dense_nodes<'a>(
    nodes: impl Iterator<Item = &'a entity::Node> + Clone,
    add_metadata: bool,
    strings: &mut StringTableBuilder,
) -> DenseNodes {
    let with_tags = nodes.clone().any(|node| !node.tags.is_empty());
    let with_info = add_metadata && nodes.clone().any(|node| node.info.is_some());

    let mut dense = DenseNodes::default();
    let mut info = DenseInfo::default();
    let (mut last_id, mut last_lat, mut last_lon) = (0, 0, 0);
    let mut last = DenseInfoState::default();
    let default_info = entity::Info::default();
    for node in nodes {
        dense.id.push(node.id.wrapping_sub(last_id));
        last_id = node.id;
        let (lat, lon) = (i64::from(node.location.y()), i64::from(node.location.x()));
        dense.lat.push(lat - last_lat);
        dense.lon.push(lon - last_lon);
        last_lat = lat;
        last_lon = lon;

        if with_tags {
            for (k, v) in &node.tags {
                dense.keys_vals.push(strings.insert(k) as i32);
                dense.keys_vals.push(strings.insert(v) as i32);
            }
            dense.keys_vals.push(0);
        }

        if with_info {
            let node_info = node.info.as_ref().unwrap_or(&default_info);
            let user_sid = i64::from(strings.insert(&node_info.user));
            info.version.push(node_info.version);
            info.timestamp.push(node_info.timestamp.wrapping_sub(last.timestamp));
            info.changeset.push(node_info.changeset.wrapping_sub(last.changeset));
            info.uid.push(node_info.uid.wrapping_sub(last.uid));
            info.user_sid.push((user_sid - last.user_sid) as i32);
            last = DenseInfoState {
                timestamp: node_info.timestamp,
                changeset: node_info.changeset,
                uid: node_info.uid,
                user_sid,
            };
        }
    }
    if with_info {
        dense.denseinfo = Some(info);
    }
    dense
}

fn encode_way(way: &entity::Way, add_metadata: bool, strings: &mut StringTableBuilder) -> Way {
    let (keys, vals) = encode_tags(&way.tags, strings);
    let mut last_ref = 0;
    let refs = way
        .nodes
        .iter()
        .map(|node| {
            let delta = node.id.wrapping_sub(last_ref);
            last_ref = node.id;
            delta
        })
        .collect();
    Way {
        id: way.id,
        keys,
        vals,
        info: way
            .info
            .as_ref()
            .filter(|_| add_metadata)
            .map(|info| encode_info(info, strings)),
        refs,
        lat: Vec::new(),
        lon: Vec::new(),
    }
}

fn encode_relation(
    relation: &entity::Relation,
    add_metadata: bool,
    strings: &mut StringTableBuilder,
) -> Relation {
    let (keys, vals) = encode_tags(&relation.tags, strings);
    let mut result = Relation {
        id: relation.id,
        keys,
        vals,
        info: relation
            .info
            .as_ref()
            .filter(|_| add_metadata)
            .map(|info| encode_info(info, strings)),
        ..Default::default()
    };
    let mut last_id = 0;
    for member in &relation.members {
        result.roles_sid.push(strings.insert(&member.role) as i32);
        result.memids.push(member.id.wrapping_sub(last_id));
        last_id = member.id;
        let member_type = match member.kind {
            EntityKind::Node => relation::MemberType::Node,
            EntityKind::Way => relation::MemberType::Way,
            // changesets can't be members, store them as relations
            EntityKind::Relation | EntityKind::Changeset => relation::MemberType::Relation,
        };
        result.types.push(member_type as i32);
    }
    result
}

fn max_string_size(s: &str) -> usize {
    // string table entry plus the index referring to it
    s.len() + 1 + 2 * MAX_VARINT_LEN
}

fn max_tags_size(tags: &Tags) -> usize {
    tags.iter()
        .map(|(k, v)| max_string_size(k) + max_string_size(v))
        .sum()
}

fn max_info_size(info: Option<&entity::Info>) -> usize {
    info.map_or(0, |info| 5 * MAX_VARINT_LEN + max_string_size(&info.user))
}

/// Upper bound of the bytes `entity` adds to a block built by
/// [`encode_block`], not counting [`BLOCK_OVERHEAD`].
pub(crate) fn max_encoded_size(entity: &Entity) -> usize {
    MESSAGE_OVERHEAD
        + match entity {
            Entity::Node(node) => {
                3 * MAX_VARINT_LEN + max_tags_size(&node.tags) + max_info_size(node.info.as_ref())
            }
            Entity::Way(way) => {
                MAX_VARINT_LEN * (1 + way.nodes.len())
                    + max_tags_size(&way.tags)
                    + max_info_size(way.info.as_ref())
            }
            Entity::Relation(relation) => {
                MAX_VARINT_LEN
                    + relation
                        .members
                        .iter()
                        .map(|member| 2 * MAX_VARINT_LEN + max_string_size(&member.role))
                        .sum::<usize>()
                    + max_tags_size(&relation.tags)
                    + max_info_size(relation.info.as_ref())
            }
            Entity::Changeset(_) => MAX_VARINT_LEN,
        }
}

/// Encodes entities into a block with a single primitive group.
///
/// All entities are expected to be of the same kind; entities of a kind
/// other than the first one's are ignored.
pub fn encode_block(entities: &[Entity], add_metadata: bool) -> PrimitiveBlock {
    let mut strings = StringTableBuilder::new();
    let mut group = PrimitiveGroup::default();
    match entities.first().map(Entity::kind) {
        Some(EntityKind::Node) => {
            let nodes = entities.iter().filter_map(|e| match e {
                Entity::Node(node) => Some(node),
                _ => None,
            });
            group.dense = Some(encode_dense_nodes(nodes, add_metadata, &mut strings));
        }
        Some(EntityKind::Way) => {
            for entity in entities {
                if let Entity::Way(way) = entity {
                    group.ways.push(encode_way(way, add_metadata, &mut strings));
                }
            }
        }
        Some(EntityKind::Relation) => {
            for entity in entities {
                if let Entity::Relation(relation) = entity {
                    group
                        .relations
                        .push(encode_relation(relation, add_metadata, &mut strings));
                }
            }
        }
        Some(EntityKind::Changeset) => {
            for entity in entities {
                if let Entity::Changeset(changeset) = entity {
                    group.changesets.push(ChangeSet { id: changeset.id });
                }
            }
        }
        None => {}
    }

    PrimitiveBlock {
        stringtable: strings.build(),
        primitivegroup: vec![group],
        granularity: None,
        date_granularity: None,
        lat_offset: None,
        lon_offset: None,
    }
}
