//! Parsers for the HDF5 on-disk structures an expression archive uses.
//!
//! Everything here works on byte slices already fetched from the object;
//! deciding what to fetch is the handle's job.

use std::collections::HashMap;

use super::cursor::Cursor;
use super::filters::Filter;
use crate::error::KiraError;

pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

pub const MSG_DATASPACE: u16 = 0x0001;
pub const MSG_LINK_INFO: u16 = 0x0002;
pub const MSG_DATATYPE: u16 = 0x0003;
pub const MSG_LINK: u16 = 0x0006;
pub const MSG_LAYOUT: u16 = 0x0008;
pub const MSG_FILTERS: u16 = 0x000B;
pub const MSG_CONTINUATION: u16 = 0x0010;
pub const MSG_SYMBOL_TABLE: u16 = 0x0011;

const MSG_FLAG_SHARED: u8 = 0x02;

fn unsupported(what: impl std::fmt::Display) -> KiraError {
    KiraError::Hdf5(format!("unsupported HDF5 feature: {what}"))
}

/// Widths of file addresses and lengths, plus the base all addresses are relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub offset: usize,
    pub length: usize,
    pub base: u64,
}

impl Sizes {
    /// `None` for the all-ones undefined address.
    pub fn address(&self, cursor: &mut Cursor<'_>) -> Result<Option<u64>, KiraError> {
        let value = cursor.uint(self.offset)?;
        let undefined = if self.offset >= 8 {
            u64::MAX
        } else {
            (1u64 << (8 * self.offset)) - 1
        };
        Ok((value != undefined).then_some(value))
    }

    pub fn required_address(&self, cursor: &mut Cursor<'_>, what: &str) -> Result<u64, KiraError> {
        self.address(cursor)?
            .ok_or_else(|| KiraError::Hdf5(format!("undefined {what} address")))
    }

    pub fn length(&self, cursor: &mut Cursor<'_>) -> Result<u64, KiraError> {
        cursor.uint(self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub sizes: Sizes,
    pub root: u64,
}

/// Parses the superblock whose signature starts `buf`.
pub fn superblock(buf: &[u8]) -> Result<Superblock, KiraError> {
    let mut cursor = Cursor::new(buf);
    if cursor.bytes(8)? != SIGNATURE {
        return Err(KiraError::Hdf5("missing HDF5 signature".to_string()));
    }
    let version = cursor.u8()?;
    match version {
        0 | 1 => {
            cursor.skip(4)?;
            let offset = cursor.u8()? as usize;
            let length = cursor.u8()? as usize;
            cursor.skip(1 + 2 + 2 + 4)?;
            if version == 1 {
                cursor.skip(4)?;
            }
            let mut sizes = Sizes {
                offset,
                length,
                base: 0,
            };
            sizes.base = cursor.uint(offset)?;
            // free space, end of file and driver info addresses
            cursor.skip(3 * offset)?;
            // root symbol table entry: link name offset, then the header address
            cursor.skip(offset)?;
            let root = sizes.required_address(&mut cursor, "root group")?;
            Ok(Superblock { sizes, root })
        }
        2 | 3 => {
            let offset = cursor.u8()? as usize;
            let length = cursor.u8()? as usize;
            cursor.skip(1)?;
            let mut sizes = Sizes {
                offset,
                length,
                base: 0,
            };
            sizes.base = cursor.uint(offset)?;
            // superblock extension and end of file addresses
            cursor.skip(2 * offset)?;
            let root = sizes.required_address(&mut cursor, "root group")?;
            Ok(Superblock { sizes, root })
        }
        other => Err(unsupported(format!("superblock version {other}"))),
    }
}

/// Bytes needed to decode any superblock version with 8-byte addresses.
pub const SUPERBLOCK_PROBE_LEN: u64 = 128;

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: u16,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn is_shared(&self) -> bool {
        self.flags & MSG_FLAG_SHARED != 0
    }
}

/// Where to find more header messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub address: u64,
    pub length: u64,
}

pub fn continuation(data: &[u8], sizes: &Sizes) -> Result<Continuation, KiraError> {
    let mut cursor = Cursor::new(data);
    let address = sizes.required_address(&mut cursor, "continuation")?;
    let length = sizes.length(&mut cursor)?;
    Ok(Continuation { address, length })
}

/// Version 1 object header prefix: `(message region length)`. The region
/// starts 16 bytes after the header address.
pub fn v1_header_prefix(buf: &[u8]) -> Result<u64, KiraError> {
    let mut cursor = Cursor::new(buf);
    let version = cursor.u8()?;
    if version != 1 {
        return Err(unsupported(format!("object header version {version}")));
    }
    cursor.skip(1 + 2 + 4)?;
    Ok(u64::from(cursor.u32()?))
}

pub const V1_PREFIX_LEN: u64 = 16;

pub fn v1_messages(buf: &[u8], out: &mut Vec<Message>) -> Result<(), KiraError> {
    let mut cursor = Cursor::new(buf);
    while cursor.remaining() >= 8 {
        let kind = cursor.u16()?;
        let size = cursor.u16()? as usize;
        let flags = cursor.u8()?;
        cursor.skip(3)?;
        let data = cursor.bytes(size)?.to_vec();
        out.push(Message { kind, flags, data });
    }
    Ok(())
}

/// Version 2 object header prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2Prefix {
    pub len: u64,
    pub chunk0: u64,
    pub creation_order: bool,
}

pub fn v2_header_prefix(buf: &[u8]) -> Result<V2Prefix, KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"OHDR")?;
    let version = cursor.u8()?;
    if version != 2 {
        return Err(unsupported(format!("object header version {version}")));
    }
    let flags = cursor.u8()?;
    if flags & 0x20 != 0 {
        cursor.skip(16)?;
    }
    if flags & 0x10 != 0 {
        cursor.skip(4)?;
    }
    let chunk0 = cursor.uint(1 << (flags & 0x03))?;
    Ok(V2Prefix {
        len: cursor.position() as u64,
        chunk0,
        creation_order: flags & 0x04 != 0,
    })
}

pub const V2_PREFIX_MAX_LEN: u64 = 4 + 1 + 1 + 16 + 4 + 8;

pub fn v2_messages(
    buf: &[u8],
    creation_order: bool,
    out: &mut Vec<Message>,
) -> Result<(), KiraError> {
    let header = if creation_order { 6 } else { 4 };
    let mut cursor = Cursor::new(buf);
    while cursor.remaining() >= header {
        let kind = u16::from(cursor.u8()?);
        let size = cursor.u16()? as usize;
        let flags = cursor.u8()?;
        if creation_order {
            cursor.skip(2)?;
        }
        let data = cursor.bytes(size)?.to_vec();
        out.push(Message { kind, flags, data });
    }
    Ok(())
}

/// Dataset extent; scalar datasets have an empty shape.
pub fn dataspace(data: &[u8], sizes: &Sizes) -> Result<Vec<u64>, KiraError> {
    let mut cursor = Cursor::new(data);
    let version = cursor.u8()?;
    let rank = cursor.u8()? as usize;
    let _flags = cursor.u8()?;
    match version {
        1 => cursor.skip(5)?,
        2 => {
            if cursor.u8()? == 2 {
                return Ok(vec![0]);
            }
        }
        other => return Err(unsupported(format!("dataspace version {other}"))),
    }
    (0..rank).map(|_| sizes.length(&mut cursor)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Integer {
        size: usize,
        signed: bool,
        big_endian: bool,
    },
    Float {
        size: usize,
        big_endian: bool,
    },
    FixedString {
        size: usize,
        space_padded: bool,
    },
    VarString,
    Other {
        class: u8,
        size: usize,
    },
}

impl Datatype {
    pub fn parse(data: &[u8]) -> Result<Self, KiraError> {
        let mut cursor = Cursor::new(data);
        let class_version = cursor.u8()?;
        let bits = cursor.bytes(3)?;
        let size = cursor.u32()? as usize;
        let class = class_version & 0x0f;
        Ok(match class {
            0 => Datatype::Integer {
                size,
                signed: bits[0] & 0x08 != 0,
                big_endian: bits[0] & 0x01 != 0,
            },
            1 => Datatype::Float {
                size,
                big_endian: bits[0] & 0x01 != 0,
            },
            3 => Datatype::FixedString {
                size,
                space_padded: bits[0] & 0x0f == 2,
            },
            9 if bits[0] & 0x0f == 1 => Datatype::VarString,
            _ => Datatype::Other { class, size },
        })
    }

    /// Bytes per element as stored in the dataset.
    pub fn size(&self, sizes: &Sizes) -> usize {
        match self {
            Datatype::Integer { size, .. }
            | Datatype::Float { size, .. }
            | Datatype::FixedString { size, .. }
            | Datatype::Other { size, .. } => *size,
            // sequence length, then a global heap id
            Datatype::VarString => 4 + sizes.offset + 4,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Datatype::Integer { size, signed, .. } => {
                format!("{}{}", if *signed { "i" } else { "u" }, size * 8)
            }
            Datatype::Float { size, .. } => format!("f{}", size * 8),
            Datatype::FixedString { size, .. } => format!("string({size})"),
            Datatype::VarString => "varlen string".to_string(),
            Datatype::Other { class, .. } => format!("class {class}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndex {
    BTree { address: Option<u64>, key_dims: usize },
    Single {
        address: Option<u64>,
        filtered_size: Option<u64>,
        mask: u32,
    },
    Implicit { address: Option<u64> },
    FixedArray { address: Option<u64> },
    Unsupported(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Compact(Vec<u8>),
    Contiguous { address: Option<u64> },
    Chunked { dims: Vec<u64>, index: ChunkIndex },
}

impl Layout {
    /// `rank` is the dataspace rank; chunk dimensions beyond it (the element
    /// size) are dropped.
    pub fn parse(data: &[u8], sizes: &Sizes, rank: usize) -> Result<Self, KiraError> {
        let mut cursor = Cursor::new(data);
        let version = cursor.u8()?;
        match version {
            1 | 2 => {
                let dimensionality = cursor.u8()? as usize;
                let class = cursor.u8()?;
                cursor.skip(5)?;
                let address = if class != 0 {
                    sizes.address(&mut cursor)?
                } else {
                    None
                };
                let dims = (0..dimensionality)
                    .map(|_| cursor.u32().map(u64::from))
                    .collect::<Result<Vec<_>, _>>()?;
                match class {
                    0 => {
                        let size = cursor.u32()? as usize;
                        Ok(Layout::Compact(cursor.bytes(size)?.to_vec()))
                    }
                    1 => Ok(Layout::Contiguous { address }),
                    2 => Ok(Layout::Chunked {
                        dims: dims.into_iter().take(rank).collect(),
                        index: ChunkIndex::BTree {
                            address,
                            key_dims: dimensionality,
                        },
                    }),
                    other => Err(unsupported(format!("layout class {other}"))),
                }
            }
            3 | 4 => {
                let class = cursor.u8()?;
                match class {
                    0 => {
                        let size = cursor.u16()? as usize;
                        Ok(Layout::Compact(cursor.bytes(size)?.to_vec()))
                    }
                    1 => Ok(Layout::Contiguous {
                        address: sizes.address(&mut cursor)?,
                    }),
                    2 if version == 3 => {
                        let dimensionality = cursor.u8()? as usize;
                        let address = sizes.address(&mut cursor)?;
                        let dims = (0..dimensionality)
                            .map(|_| cursor.u32().map(u64::from))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Layout::Chunked {
                            dims: dims.into_iter().take(rank).collect(),
                            index: ChunkIndex::BTree {
                                address,
                                key_dims: dimensionality,
                            },
                        })
                    }
                    2 => {
                        let flags = cursor.u8()?;
                        let dimensionality = cursor.u8()? as usize;
                        let width = cursor.u8()? as usize;
                        let dims = (0..dimensionality)
                            .map(|_| cursor.uint(width))
                            .collect::<Result<Vec<_>, _>>()?;
                        let index = match cursor.u8()? {
                            1 => {
                                let (filtered_size, mask) = if flags & 0x02 != 0 {
                                    (Some(sizes.length(&mut cursor)?), cursor.u32()?)
                                } else {
                                    (None, 0)
                                };
                                ChunkIndex::Single {
                                    address: sizes.address(&mut cursor)?,
                                    filtered_size,
                                    mask,
                                }
                            }
                            2 => ChunkIndex::Implicit {
                                address: sizes.address(&mut cursor)?,
                            },
                            3 => {
                                cursor.skip(1)?;
                                ChunkIndex::FixedArray {
                                    address: sizes.address(&mut cursor)?,
                                }
                            }
                            other => ChunkIndex::Unsupported(other),
                        };
                        Ok(Layout::Chunked {
                            dims: dims.into_iter().take(rank).collect(),
                            index,
                        })
                    }
                    other => Err(unsupported(format!("layout class {other}"))),
                }
            }
            other => Err(unsupported(format!("layout version {other}"))),
        }
    }
}

pub fn filter_pipeline(data: &[u8]) -> Result<Vec<Filter>, KiraError> {
    let mut cursor = Cursor::new(data);
    let version = cursor.u8()?;
    let count = cursor.u8()? as usize;
    if version == 1 {
        cursor.skip(6)?;
    } else if version != 2 {
        return Err(unsupported(format!("filter pipeline version {version}")));
    }
    let mut filters = Vec::with_capacity(count);
    for _ in 0..count {
        let id = cursor.u16()?;
        let name_len = if version == 1 || id >= 256 {
            cursor.u16()? as usize
        } else {
            0
        };
        let _flags = cursor.u16()?;
        let values = cursor.u16()? as usize;
        let name = String::from_utf8_lossy(cursor.bytes(name_len)?)
            .trim_end_matches('\0')
            .to_string();
        let client_data = (0..values)
            .map(|_| cursor.u32())
            .collect::<Result<Vec<_>, _>>()?;
        if version == 1 && values % 2 == 1 {
            cursor.skip(4)?;
        }
        filters.push(Filter {
            id,
            name,
            client_data,
        });
    }
    Ok(filters)
}

/// A hard link from a link message; soft and external links yield `None`.
pub fn link(data: &[u8], sizes: &Sizes) -> Result<Option<(String, u64)>, KiraError> {
    let mut cursor = Cursor::new(data);
    let version = cursor.u8()?;
    if version != 1 {
        return Err(unsupported(format!("link message version {version}")));
    }
    let flags = cursor.u8()?;
    let link_type = if flags & 0x08 != 0 { cursor.u8()? } else { 0 };
    if flags & 0x04 != 0 {
        cursor.skip(8)?;
    }
    if flags & 0x10 != 0 {
        cursor.skip(1)?;
    }
    let name_len = cursor.uint(1 << (flags & 0x03))? as usize;
    let name = String::from_utf8_lossy(cursor.bytes(name_len)?).into_owned();
    if link_type != 0 {
        return Ok(None);
    }
    Ok(sizes.address(&mut cursor)?.map(|address| (name, address)))
}

/// Fractal heap address of a group using dense link storage.
pub fn dense_link_heap(data: &[u8], sizes: &Sizes) -> Result<Option<u64>, KiraError> {
    let mut cursor = Cursor::new(data);
    let _version = cursor.u8()?;
    let flags = cursor.u8()?;
    if flags & 0x01 != 0 {
        cursor.skip(8)?;
    }
    sizes.address(&mut cursor)
}

/// `(group B-tree, local heap)` addresses.
pub fn symbol_table(data: &[u8], sizes: &Sizes) -> Result<(u64, u64), KiraError> {
    let mut cursor = Cursor::new(data);
    let btree = sizes.required_address(&mut cursor, "group B-tree")?;
    let heap = sizes.required_address(&mut cursor, "local heap")?;
    Ok((btree, heap))
}

/// `(data segment size, data segment address)` of a local heap.
pub fn local_heap(buf: &[u8], sizes: &Sizes) -> Result<(u64, u64), KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"HEAP")?;
    cursor.skip(4)?;
    let size = sizes.length(&mut cursor)?;
    let _free_list = sizes.length(&mut cursor)?;
    let address = sizes.required_address(&mut cursor, "local heap data")?;
    Ok((size, address))
}

pub fn local_heap_len(sizes: &Sizes) -> u64 {
    (8 + 2 * sizes.length + sizes.offset) as u64
}

/// Null-terminated string at `offset` in a local heap data segment.
pub fn heap_name(segment: &[u8], offset: u64) -> Result<String, KiraError> {
    let start = offset as usize;
    let tail = segment
        .get(start..)
        .ok_or_else(|| KiraError::Hdf5(format!("link name offset {offset} outside local heap")))?;
    let end = tail.iter().position(|byte| *byte == 0).unwrap_or(tail.len());
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Version 1 B-tree node: `keys` has one more entry than `children`.
#[derive(Debug, Clone)]
pub struct BTreeNode {
    pub node_type: u8,
    pub level: u8,
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<u64>,
}

pub fn btree_header_len(sizes: &Sizes) -> u64 {
    (8 + 2 * sizes.offset) as u64
}

/// `(node type, entries used)` from the start of a node.
pub fn btree_header(buf: &[u8]) -> Result<(u8, usize), KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"TREE")?;
    let node_type = cursor.u8()?;
    let _level = cursor.u8()?;
    Ok((node_type, cursor.u16()? as usize))
}

pub fn btree_node_len(sizes: &Sizes, entries: usize, key_len: usize) -> u64 {
    btree_header_len(sizes) + (entries * (key_len + sizes.offset) + key_len) as u64
}

pub fn btree_node(buf: &[u8], sizes: &Sizes, key_len: usize) -> Result<BTreeNode, KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"TREE")?;
    let node_type = cursor.u8()?;
    let level = cursor.u8()?;
    let entries = cursor.u16()? as usize;
    // sibling addresses
    cursor.skip(2 * sizes.offset)?;
    let mut keys = Vec::with_capacity(entries + 1);
    let mut children = Vec::with_capacity(entries);
    for _ in 0..entries {
        keys.push(cursor.bytes(key_len)?.to_vec());
        children.push(sizes.required_address(&mut cursor, "B-tree child")?);
    }
    keys.push(cursor.bytes(key_len)?.to_vec());
    Ok(BTreeNode {
        node_type,
        level,
        keys,
        children,
    })
}

/// Decoded key of a chunk B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub size: u64,
    pub mask: u32,
    pub offsets: Vec<u64>,
}

pub fn chunk_key_len(key_dims: usize) -> usize {
    8 + 8 * key_dims
}

pub fn chunk_key(key: &[u8], key_dims: usize) -> Result<ChunkKey, KiraError> {
    let mut cursor = Cursor::new(key);
    let size = u64::from(cursor.u32()?);
    let mask = cursor.u32()?;
    let offsets = (0..key_dims)
        .map(|_| cursor.u64())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ChunkKey {
        size,
        mask,
        offsets,
    })
}

pub const SYMBOL_NODE_HEADER_LEN: u64 = 8;

pub fn symbol_node_count(buf: &[u8]) -> Result<usize, KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"SNOD")?;
    cursor.skip(2)?;
    Ok(cursor.u16()? as usize)
}

pub fn symbol_entry_len(sizes: &Sizes) -> u64 {
    (2 * sizes.offset + 24) as u64
}

/// `(link name heap offset, object header address)` for each symbol.
pub fn symbol_node(buf: &[u8], sizes: &Sizes) -> Result<Vec<(u64, u64)>, KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"SNOD")?;
    cursor.skip(2)?;
    let count = cursor.u16()? as usize;
    let mut symbols = Vec::with_capacity(count);
    for _ in 0..count {
        let name = cursor.uint(sizes.offset)?;
        let header = sizes.required_address(&mut cursor, "symbol object header")?;
        cursor.skip(24)?;
        symbols.push((name, header));
    }
    Ok(symbols)
}

pub fn global_heap_header_len(sizes: &Sizes) -> u64 {
    (8 + sizes.length) as u64
}

pub fn global_heap_size(buf: &[u8], sizes: &Sizes) -> Result<u64, KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"GCOL")?;
    cursor.skip(4)?;
    sizes.length(&mut cursor)
}

/// Objects of one global heap collection keyed by heap index.
pub fn global_heap(buf: &[u8], sizes: &Sizes) -> Result<HashMap<u32, Vec<u8>>, KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"GCOL")?;
    cursor.skip(4)?;
    let _size = sizes.length(&mut cursor)?;
    let mut objects = HashMap::new();
    while cursor.remaining() >= 8 + sizes.length {
        let index = cursor.u16()?;
        cursor.skip(6)?;
        let size = sizes.length(&mut cursor)? as usize;
        if index == 0 {
            break;
        }
        let data = cursor.bytes(size)?.to_vec();
        let padding = (8 - size % 8) % 8;
        cursor.skip(padding.min(cursor.remaining()))?;
        objects.insert(u32::from(index), data);
    }
    Ok(objects)
}

/// Fixed array index header: `(filtered entries, entry size, entries, data block)`.
pub fn fixed_array_header(
    buf: &[u8],
    sizes: &Sizes,
) -> Result<(bool, usize, u64, u64), KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"FAHD")?;
    cursor.skip(1)?;
    let client = cursor.u8()?;
    let entry_size = cursor.u8()? as usize;
    let page_bits = cursor.u8()?;
    let entries = sizes.length(&mut cursor)?;
    let block = sizes.required_address(&mut cursor, "fixed array data block")?;
    if page_bits < 64 && entries > (1u64 << page_bits) {
        return Err(unsupported("paged fixed array chunk index"));
    }
    Ok((client == 1, entry_size, entries, block))
}

pub fn fixed_array_header_len(sizes: &Sizes) -> u64 {
    (8 + sizes.length + sizes.offset + 4) as u64
}

/// Fixed array entry: `(chunk address, stored size, filter mask)`.
pub type ArrayEntry = (Option<u64>, Option<u64>, u32);

pub fn fixed_array_block(
    buf: &[u8],
    sizes: &Sizes,
    filtered: bool,
    entry_size: usize,
    entries: u64,
) -> Result<Vec<ArrayEntry>, KiraError> {
    let mut cursor = Cursor::new(buf);
    cursor.signature(b"FADB")?;
    cursor.skip(2)?;
    cursor.skip(sizes.offset)?;
    (0..entries)
        .map(|_| {
            let address = sizes.address(&mut cursor)?;
            if filtered {
                let width = entry_size.saturating_sub(sizes.offset + 4);
                let size = cursor.uint(width)?;
                let mask = cursor.u32()?;
                Ok((address, Some(size), mask))
            } else {
                Ok((address, None, 0))
            }
        })
        .collect()
}

pub fn fixed_array_block_len(sizes: &Sizes, entry_size: usize, entries: u64) -> u64 {
    (6 + sizes.offset) as u64 + entry_size as u64 * entries
}
