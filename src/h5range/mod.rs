//! [`ExpressionHandle`] that reads an HDF5 archive through byte ranges.
//!
//! Only the structures an expression archive needs are understood: groups
//! with symbol tables or compact links, contiguous, compact and chunked
//! datasets, numeric and string element types. Each lookup fetches just
//! the metadata and chunks it touches.

mod cursor;
pub mod filters;
mod format;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use self::format::{ChunkIndex, Datatype, Layout, Message, Sizes};
use crate::error::KiraError;
use crate::range::RangeRead;
use crate::source::{EXPRESSION, ExpressionHandle, NodeEntry, NodeKind};

const SUPERBLOCK_OFFSETS: [u64; 4] = [0, 512, 1024, 2048];

#[derive(Debug, Clone)]
struct DatasetInfo {
    shape: Vec<u64>,
    dtype: Datatype,
    layout: Layout,
    filters: Vec<filters::Filter>,
}

impl DatasetInfo {
    fn element_size(&self, sizes: &Sizes) -> usize {
        self.dtype.size(sizes)
    }

    fn len(&self) -> u64 {
        self.shape.iter().product()
    }
}

#[derive(Debug, Clone)]
struct ChunkRef {
    offset: Vec<u64>,
    address: u64,
    size: u64,
    mask: u32,
}

type HeapObjects = HashMap<u32, Vec<u8>>;

pub struct RangeH5Handle<R> {
    reader: R,
    source_id: String,
    sizes: Sizes,
    root: u64,
    headers: Mutex<HashMap<u64, Arc<Vec<Message>>>>,
    heaps: Mutex<HashMap<u64, Arc<HeapObjects>>>,
}

fn locked<'a, T>(mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, KiraError> {
    mutex
        .lock()
        .map_err(|_| KiraError::Hdf5("metadata cache lock poisoned".to_string()))
}

impl<R: RangeRead> RangeH5Handle<R> {
    /// Locates the superblock; a missing signature means the object is not HDF5.
    pub fn open(reader: R) -> Result<Self, KiraError> {
        let source_id = reader.describe();
        for start in SUPERBLOCK_OFFSETS {
            let probe = reader.read_range(start, format::SUPERBLOCK_PROBE_LEN)?;
            if probe.len() < format::SIGNATURE.len() {
                break;
            }
            if probe[..8] != format::SIGNATURE {
                continue;
            }
            let superblock = format::superblock(&probe)?;
            debug!(source = %source_id, offset = start, "opened HDF5 object over byte ranges");
            return Ok(Self {
                reader,
                source_id,
                sizes: superblock.sizes,
                root: superblock.root,
                headers: Mutex::new(HashMap::new()),
                heaps: Mutex::new(HashMap::new()),
            });
        }
        Err(KiraError::SourceUnavailable {
            source_id,
            message: "not an HDF5 file".to_string(),
        })
    }

    fn read(&self, address: u64, len: u64) -> Result<Vec<u8>, KiraError> {
        self.reader.read_range(self.sizes.base + address, len)
    }

    fn messages(&self, address: u64) -> Result<Arc<Vec<Message>>, KiraError> {
        if let Some(messages) = locked(&self.headers)?.get(&address) {
            return Ok(Arc::clone(messages));
        }

        let mut messages = Vec::new();
        let mut pending = Vec::new();
        let head = self.read(address, format::V2_PREFIX_MAX_LEN)?;
        let creation_order = if head.starts_with(b"OHDR") {
            let prefix = format::v2_header_prefix(&head)?;
            let block = self.read(address + prefix.len, prefix.chunk0)?;
            format::v2_messages(&block, prefix.creation_order, &mut messages)?;
            Some(prefix.creation_order)
        } else {
            let region = format::v1_header_prefix(&head)?;
            let block = self.read(address + format::V1_PREFIX_LEN, region)?;
            format::v1_messages(&block, &mut messages)?;
            None
        };

        let mut scanned = 0;
        loop {
            for message in &messages[scanned..] {
                if message.kind == format::MSG_CONTINUATION {
                    pending.push(format::continuation(&message.data, &self.sizes)?);
                }
            }
            scanned = messages.len();
            let Some(next) = pending.pop() else {
                break;
            };
            let block = self.read(next.address, next.length)?;
            match creation_order {
                Some(order) => {
                    let mut cursor = cursor::Cursor::new(&block);
                    cursor.signature(b"OCHK")?;
                    let body = &block[4..block.len().saturating_sub(4).max(4)];
                    format::v2_messages(body, order, &mut messages)?;
                }
                None => format::v1_messages(&block, &mut messages)?,
            }
        }

        let messages = Arc::new(messages);
        locked(&self.headers)?.insert(address, Arc::clone(&messages));
        Ok(messages)
    }

    /// Hard links of the group at `address`, sorted by name.
    fn links(&self, address: u64) -> Result<Vec<(String, u64)>, KiraError> {
        let messages = self.messages(address)?;
        let mut links = Vec::new();
        for message in messages.iter() {
            match message.kind {
                format::MSG_SYMBOL_TABLE => {
                    let (btree, heap) = format::symbol_table(&message.data, &self.sizes)?;
                    self.symbol_table_links(btree, heap, &mut links)?;
                }
                format::MSG_LINK => {
                    if let Some(link) = format::link(&message.data, &self.sizes)? {
                        links.push(link);
                    }
                }
                format::MSG_LINK_INFO => {
                    if format::dense_link_heap(&message.data, &self.sizes)?.is_some() {
                        return Err(KiraError::Hdf5(
                            "unsupported HDF5 feature: dense link storage".to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }
        links.sort();
        Ok(links)
    }

    fn symbol_table_links(
        &self,
        btree: u64,
        heap: u64,
        out: &mut Vec<(String, u64)>,
    ) -> Result<(), KiraError> {
        let header = self.read(heap, format::local_heap_len(&self.sizes))?;
        let (segment_len, segment_address) = format::local_heap(&header, &self.sizes)?;
        let segment = self.read(segment_address, segment_len)?;

        let mut nodes = vec![btree];
        while let Some(address) = nodes.pop() {
            let node = self.btree_node(address, self.sizes.length)?;
            if node.node_type != 0 {
                return Err(KiraError::Hdf5(format!(
                    "expected a group B-tree at {address}, found type {}",
                    node.node_type
                )));
            }
            if node.level > 0 {
                nodes.extend(node.children.iter().copied());
                continue;
            }
            for symbol_node in node.children {
                let head = self.read(symbol_node, format::SYMBOL_NODE_HEADER_LEN)?;
                let count = format::symbol_node_count(&head)?;
                let len = format::SYMBOL_NODE_HEADER_LEN
                    + count as u64 * format::symbol_entry_len(&self.sizes);
                let block = self.read(symbol_node, len)?;
                for (name, header) in format::symbol_node(&block, &self.sizes)? {
                    out.push((format::heap_name(&segment, name)?, header));
                }
            }
        }
        Ok(())
    }

    fn btree_node(&self, address: u64, key_len: usize) -> Result<format::BTreeNode, KiraError> {
        let head = self.read(address, format::btree_header_len(&self.sizes))?;
        let (_, entries) = format::btree_header(&head)?;
        let block = self.read(address, format::btree_node_len(&self.sizes, entries, key_len))?;
        format::btree_node(&block, &self.sizes, key_len)
    }

    /// Object header address for `path`, or `None` when any component is missing.
    fn lookup(&self, path: &str) -> Result<Option<u64>, KiraError> {
        let mut address = self.root;
        for part in path.split('/').filter(|part| !part.is_empty()) {
            let links = self.links(address)?;
            match links.into_iter().find(|(name, _)| name == part) {
                Some((_, child)) => address = child,
                None => return Ok(None),
            }
        }
        Ok(Some(address))
    }

    fn group_address(&self, path: &str) -> Result<u64, KiraError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(self.root);
        }
        self.lookup(trimmed)?
            .ok_or_else(|| KiraError::MissingField(path.to_string()))
    }

    /// `None` for objects without a storage layout, i.e. groups.
    fn dataset_at(&self, address: u64) -> Result<Option<DatasetInfo>, KiraError> {
        let messages = self.messages(address)?;
        let find = |kind: u16| messages.iter().find(|message| message.kind == kind);
        let Some(layout) = find(format::MSG_LAYOUT) else {
            return Ok(None);
        };
        let dataspace = find(format::MSG_DATASPACE)
            .ok_or_else(|| KiraError::Hdf5("dataset without a dataspace".to_string()))?;
        let datatype = find(format::MSG_DATATYPE)
            .ok_or_else(|| KiraError::Hdf5("dataset without a datatype".to_string()))?;
        if datatype.is_shared() || dataspace.is_shared() {
            return Err(KiraError::Hdf5(
                "unsupported HDF5 feature: shared datatype or dataspace".to_string(),
            ));
        }
        let shape = format::dataspace(&dataspace.data, &self.sizes)?;
        let dtype = Datatype::parse(&datatype.data)?;
        let layout = Layout::parse(&layout.data, &self.sizes, shape.len())?;
        let filters = match find(format::MSG_FILTERS) {
            Some(message) => format::filter_pipeline(&message.data)?,
            None => Vec::new(),
        };
        Ok(Some(DatasetInfo {
            shape,
            dtype,
            layout,
            filters,
        }))
    }

    fn dataset(&self, path: &str) -> Result<DatasetInfo, KiraError> {
        let address = self
            .lookup(path)?
            .ok_or_else(|| KiraError::MissingField(path.to_string()))?;
        self.dataset_at(address)?
            .ok_or_else(|| KiraError::Hdf5(format!("{path} is a group, not a dataset")))
    }

    /// Chunks whose offset matches `target` in every pinned dimension.
    fn chunks(
        &self,
        info: &DatasetInfo,
        dims: &[u64],
        index: &ChunkIndex,
        target: &[Option<u64>],
    ) -> Result<Vec<ChunkRef>, KiraError> {
        let chunk_bytes = dims.iter().product::<u64>() * info.element_size(&self.sizes) as u64;
        let mut out = Vec::new();
        match index {
            ChunkIndex::BTree {
                address: Some(address),
                key_dims,
            } => self.btree_chunks(*address, *key_dims, dims.len(), target, &mut out)?,
            ChunkIndex::Single {
                address: Some(address),
                filtered_size,
                mask,
            } => out.push(ChunkRef {
                offset: vec![0; dims.len()],
                address: *address,
                size: filtered_size.unwrap_or(chunk_bytes),
                mask: *mask,
            }),
            ChunkIndex::Implicit {
                address: Some(address),
            } => {
                for (linear, offset) in grid_positions(&info.shape, dims, target) {
                    out.push(ChunkRef {
                        offset,
                        address: address + linear * chunk_bytes,
                        size: chunk_bytes,
                        mask: 0,
                    });
                }
            }
            ChunkIndex::FixedArray {
                address: Some(address),
            } => {
                let header = self.read(*address, format::fixed_array_header_len(&self.sizes))?;
                let (filtered, entry_size, entries, block) =
                    format::fixed_array_header(&header, &self.sizes)?;
                let block = self.read(
                    block,
                    format::fixed_array_block_len(&self.sizes, entry_size, entries),
                )?;
                let table =
                    format::fixed_array_block(&block, &self.sizes, filtered, entry_size, entries)?;
                for (linear, offset) in grid_positions(&info.shape, dims, target) {
                    if let Some((Some(address), size, mask)) = table.get(linear as usize) {
                        out.push(ChunkRef {
                            offset,
                            address: *address,
                            size: size.unwrap_or(chunk_bytes),
                            mask: *mask,
                        });
                    }
                }
            }
            ChunkIndex::Unsupported(kind) => {
                return Err(KiraError::Hdf5(format!(
                    "unsupported HDF5 feature: chunk index type {kind}"
                )));
            }
            // never written
            _ => {}
        }
        Ok(out)
    }

    fn btree_chunks(
        &self,
        address: u64,
        key_dims: usize,
        rank: usize,
        target: &[Option<u64>],
        out: &mut Vec<ChunkRef>,
    ) -> Result<(), KiraError> {
        let key_len = format::chunk_key_len(key_dims);
        let node = self.btree_node(address, key_len)?;
        if node.node_type != 1 {
            return Err(KiraError::Hdf5(format!(
                "expected a chunk B-tree at {address}, found type {}",
                node.node_type
            )));
        }
        let keys = node
            .keys
            .iter()
            .map(|key| format::chunk_key(key, key_dims))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, child) in node.children.iter().enumerate() {
            let low = &keys[i].offsets[..rank];
            if node.level == 0 {
                let pinned = target
                    .iter()
                    .zip(low)
                    .all(|(want, got)| want.is_none_or(|want| want == *got));
                if pinned {
                    out.push(ChunkRef {
                        offset: low.to_vec(),
                        address: *child,
                        size: keys[i].size,
                        mask: keys[i].mask,
                    });
                }
            } else if may_contain(low, &keys[i + 1].offsets[..rank], target) {
                self.btree_chunks(*child, key_dims, rank, target, out)?;
            }
        }
        Ok(())
    }

    fn chunk_data(
        &self,
        info: &DatasetInfo,
        chunk: &ChunkRef,
        expected: u64,
    ) -> Result<Vec<u8>, KiraError> {
        let stored = self.read(chunk.address, chunk.size)?;
        let data = if info.filters.is_empty() {
            stored
        } else {
            filters::decode(
                &info.filters,
                chunk.mask,
                info.element_size(&self.sizes),
                stored,
            )?
        };
        if (data.len() as u64) < expected {
            return Err(KiraError::Hdf5(format!(
                "chunk at {} decoded to {} bytes, expected {expected}",
                chunk.address,
                data.len()
            )));
        }
        Ok(data)
    }

    /// Raw bytes of the whole dataset in row-major order.
    fn read_all(&self, info: &DatasetInfo) -> Result<Vec<u8>, KiraError> {
        let element = info.element_size(&self.sizes);
        let total = info.len() * element as u64;
        match &info.layout {
            Layout::Compact(data) => Ok(data.iter().copied().take(total as usize).collect()),
            Layout::Contiguous { address: None } => Ok(vec![0; total as usize]),
            Layout::Contiguous {
                address: Some(address),
            } => self.read(*address, total),
            Layout::Chunked { dims, index } => {
                let mut out = vec![0u8; total as usize];
                let chunk_bytes = dims.iter().product::<u64>() * element as u64;
                let target = vec![None; dims.len()];
                for chunk in self.chunks(info, dims, index, &target)? {
                    let data = self.chunk_data(info, &chunk, chunk_bytes)?;
                    scatter(&mut out, &info.shape, &chunk.offset, dims, &data, element);
                }
                Ok(out)
            }
        }
    }

    /// Raw bytes of column `column` of a two-dimensional dataset.
    fn read_column_bytes(&self, info: &DatasetInfo, column: u64) -> Result<Vec<u8>, KiraError> {
        let element = info.element_size(&self.sizes);
        let (rows, columns) = (info.shape[0], info.shape[1]);
        let mut out = vec![0u8; rows as usize * element];
        match &info.layout {
            Layout::Compact(data) => {
                for row in 0..rows as usize {
                    let at = (row * columns as usize + column as usize) * element;
                    if let Some(value) = data.get(at..at + element) {
                        out[row * element..(row + 1) * element].copy_from_slice(value);
                    }
                }
            }
            Layout::Contiguous { address: None } => {}
            Layout::Contiguous {
                address: Some(address),
            } => {
                for row in 0..rows {
                    let at = address + (row * columns + column) * element as u64;
                    let value = self.read(at, element as u64)?;
                    if value.len() != element {
                        return Err(KiraError::Hdf5(format!("short read at {at}")));
                    }
                    let row = row as usize;
                    out[row * element..(row + 1) * element].copy_from_slice(&value);
                }
            }
            Layout::Chunked { dims, index } => {
                let chunk_bytes = dims.iter().product::<u64>() * element as u64;
                let start = column - column % dims[1];
                for chunk in self.chunks(info, dims, index, &[None, Some(start)])? {
                    let data = self.chunk_data(info, &chunk, chunk_bytes)?;
                    let local = (column - chunk.offset[1]) as usize;
                    for r in 0..dims[0] {
                        let row = chunk.offset[0] + r;
                        if row >= rows {
                            break;
                        }
                        let at = (r as usize * dims[1] as usize + local) * element;
                        let row = row as usize;
                        out[row * element..(row + 1) * element]
                            .copy_from_slice(&data[at..at + element]);
                    }
                }
            }
        }
        Ok(out)
    }

    fn heap_objects(&self, collection: u64) -> Result<Arc<HeapObjects>, KiraError> {
        if let Some(objects) = locked(&self.heaps)?.get(&collection) {
            return Ok(Arc::clone(objects));
        }
        let head = self.read(collection, format::global_heap_header_len(&self.sizes))?;
        let size = format::global_heap_size(&head, &self.sizes)?;
        let block = self.read(collection, size)?;
        let objects = Arc::new(format::global_heap(&block, &self.sizes)?);
        locked(&self.heaps)?.insert(collection, Arc::clone(&objects));
        Ok(objects)
    }

    fn decode_strings(
        &self,
        path: &str,
        info: &DatasetInfo,
        raw: &[u8],
    ) -> Result<Vec<String>, KiraError> {
        let element = info.element_size(&self.sizes);
        match info.dtype {
            Datatype::FixedString { space_padded, .. } => Ok(raw
                .chunks_exact(element)
                .map(|value| {
                    let end = value.iter().position(|byte| *byte == 0).unwrap_or(value.len());
                    let text = String::from_utf8_lossy(&value[..end]);
                    if space_padded {
                        text.trim_end_matches(' ').to_string()
                    } else {
                        text.into_owned()
                    }
                })
                .collect()),
            Datatype::VarString => raw
                .chunks_exact(element)
                .map(|value| {
                    let mut cursor = cursor::Cursor::new(value);
                    let len = cursor.u32()? as usize;
                    let collection = self.sizes.address(&mut cursor)?;
                    let index = cursor.u32()?;
                    let Some(collection) = collection else {
                        return Ok(String::new());
                    };
                    let objects = self.heap_objects(collection)?;
                    let data = objects.get(&index).ok_or_else(|| {
                        KiraError::Hdf5(format!("{path}: missing global heap object {index}"))
                    })?;
                    let data = &data[..len.min(data.len())];
                    Ok(String::from_utf8_lossy(data).trim_end_matches('\0').to_string())
                })
                .collect(),
            _ => Err(KiraError::Hdf5(format!("{path} is not a string dataset"))),
        }
    }
}

fn number(value: &[u8], big_endian: bool) -> u64 {
    let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
    if big_endian {
        value.iter().fold(0, fold)
    } else {
        value.iter().rev().fold(0, fold)
    }
}

fn decode_f64(path: &str, dtype: Datatype, raw: &[u8]) -> Result<Vec<f64>, KiraError> {
    match dtype {
        Datatype::Float { size: 8, big_endian } => Ok(raw
            .chunks_exact(8)
            .map(|value| f64::from_bits(number(value, big_endian)))
            .collect()),
        Datatype::Float { size: 4, big_endian } => Ok(raw
            .chunks_exact(4)
            .map(|value| f64::from(f32::from_bits(number(value, big_endian) as u32)))
            .collect()),
        Datatype::Integer {
            size,
            signed,
            big_endian,
        } if (1..=8).contains(&size) => Ok(raw
            .chunks_exact(size)
            .map(|value| {
                let bits = number(value, big_endian);
                if signed {
                    let shift = 64 - 8 * size as u32;
                    (((bits << shift) as i64) >> shift) as f64
                } else {
                    bits as f64
                }
            })
            .collect()),
        other => Err(KiraError::Hdf5(format!(
            "{path} is not numeric ({})",
            other.describe()
        ))),
    }
}

fn decode_counts(dtype: Datatype, raw: &[u8]) -> Result<Vec<u32>, KiraError> {
    match dtype {
        Datatype::Integer {
            size,
            signed: false,
            big_endian,
        } if size <= 4 => Ok(raw
            .chunks_exact(size)
            .map(|value| number(value, big_endian) as u32)
            .collect()),
        other => Ok(decode_f64(EXPRESSION, other, raw)?
            .into_iter()
            .map(|value| value as u32)
            .collect()),
    }
}

/// Whether the lexicographic key range `[low, high]` can hold a chunk whose
/// offsets equal `target` in every pinned dimension.
fn may_contain(low: &[u64], high: &[u64], target: &[Option<u64>]) -> bool {
    fn walk(
        low: &[u64],
        high: &[u64],
        target: &[Option<u64>],
        dim: usize,
        low_tight: bool,
        high_tight: bool,
    ) -> bool {
        if dim == target.len() {
            return true;
        }
        let min = if low_tight { low[dim] } else { 0 };
        let max = if high_tight { high[dim] } else { u64::MAX };
        if min > max {
            return false;
        }
        match target[dim] {
            Some(value) => {
                (min..=max).contains(&value)
                    && walk(
                        low,
                        high,
                        target,
                        dim + 1,
                        low_tight && value == low[dim],
                        high_tight && value == high[dim],
                    )
            }
            None => {
                max - min >= 2
                    || walk(
                        low,
                        high,
                        target,
                        dim + 1,
                        low_tight && min == low[dim],
                        high_tight && min == high[dim],
                    )
                    || (max != min
                        && walk(
                            low,
                            high,
                            target,
                            dim + 1,
                            low_tight && max == low[dim],
                            high_tight && max == high[dim],
                        ))
            }
        }
    }
    walk(low, high, target, 0, true, true)
}

/// `(row-major chunk number, element offset)` of every grid chunk matching `target`.
fn grid_positions(shape: &[u64], dims: &[u64], target: &[Option<u64>]) -> Vec<(u64, Vec<u64>)> {
    let grid: Vec<u64> = shape
        .iter()
        .zip(dims)
        .map(|(extent, chunk)| extent.div_ceil((*chunk).max(1)))
        .collect();
    let mut positions = vec![(0u64, Vec::new())];
    for (dim, cells) in grid.iter().enumerate() {
        let choices: Vec<u64> = match target.get(dim).copied().flatten() {
            Some(offset) => vec![offset / dims[dim].max(1)],
            None => (0..*cells).collect(),
        };
        positions = positions
            .into_iter()
            .flat_map(|(linear, offset)| {
                choices.iter().map(move |cell| {
                    let mut offset = offset.clone();
                    offset.push(cell * dims[dim]);
                    (linear * cells + cell, offset)
                })
            })
            .collect();
    }
    positions
}

/// Copies a decoded chunk into its place in the row-major output buffer.
fn scatter(
    out: &mut [u8],
    shape: &[u64],
    offset: &[u64],
    dims: &[u64],
    data: &[u8],
    element: usize,
) {
    let rank = shape.len();
    if rank == 0 {
        return;
    }
    let last = rank - 1;
    let run = dims[last].min(shape[last].saturating_sub(offset[last])) as usize;
    if run == 0 {
        return;
    }
    let mut index = vec![0u64; last];
    loop {
        if (0..last).all(|dim| offset[dim] + index[dim] < shape[dim]) {
            let mut source = 0u64;
            let mut target = 0u64;
            for dim in 0..last {
                source = source * dims[dim] + index[dim];
                target = target * shape[dim] + offset[dim] + index[dim];
            }
            let source = (source * dims[last]) as usize * element;
            let target = (target * shape[last] + offset[last]) as usize * element;
            let len = run * element;
            out[target..target + len].copy_from_slice(&data[source..source + len]);
        }
        let mut dim = last;
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            index[dim] += 1;
            if index[dim] < dims[dim] {
                break;
            }
            index[dim] = 0;
        }
    }
}

impl<R: RangeRead> ExpressionHandle for RangeH5Handle<R> {
    fn has_path(&self, path: &str) -> bool {
        let trimmed = path.trim_matches('/');
        !trimmed.is_empty() && matches!(self.lookup(trimmed), Ok(Some(_)))
    }

    fn member_names(&self, group: &str) -> Result<Vec<String>, KiraError> {
        let address = self.group_address(group)?;
        Ok(self.links(address)?.into_iter().map(|(name, _)| name).collect())
    }

    fn read_strings(&self, path: &str) -> Result<Vec<String>, KiraError> {
        let info = self.dataset(path)?;
        if !matches!(info.dtype, Datatype::FixedString { .. } | Datatype::VarString) {
            return Err(KiraError::Hdf5(format!("{path} is not a string dataset")));
        }
        let raw = self.read_all(&info)?;
        self.decode_strings(path, &info, &raw)
    }

    fn read_floats(&self, path: &str) -> Result<Vec<f64>, KiraError> {
        let info = self.dataset(path)?;
        let raw = self.read_all(&info)?;
        decode_f64(path, info.dtype, &raw)
    }

    fn matrix_shape(&self) -> Result<(usize, usize), KiraError> {
        let info = self.dataset(EXPRESSION)?;
        match info.shape.as_slice() {
            [genes, samples] => Ok((*genes as usize, *samples as usize)),
            other => Err(KiraError::Hdf5(format!(
                "{EXPRESSION} must be two-dimensional, found shape {other:?}"
            ))),
        }
    }

    fn read_column(&self, sample: usize) -> Result<Vec<u32>, KiraError> {
        let info = self.dataset(EXPRESSION)?;
        let [_, samples] = info.shape[..] else {
            return Err(KiraError::Hdf5(format!(
                "{EXPRESSION} must be two-dimensional, found shape {:?}",
                info.shape
            )));
        };
        if sample as u64 >= samples {
            return Err(KiraError::SampleIndexOutOfRange {
                index: sample,
                len: samples as usize,
            });
        }
        let raw = self.read_column_bytes(&info, sample as u64)?;
        debug!(source = %self.source_id, sample, bytes = raw.len(), "read expression column");
        decode_counts(info.dtype, &raw)
    }

    fn entries(&self, group: &str) -> Result<Vec<NodeEntry>, KiraError> {
        let address = self.group_address(group)?;
        let mut entries = Vec::new();
        for (name, child) in self.links(address)? {
            let kind = match self.dataset_at(child)? {
                Some(info) => NodeKind::Dataset {
                    shape: info.shape.iter().map(|extent| *extent as usize).collect(),
                    dtype: info.dtype.describe(),
                },
                None => NodeKind::Group,
            };
            entries.push(NodeEntry { name, kind });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ranges_prune_by_column() {
        // chunks of 2 x 2 over a 4 x 6 matrix, column chunk starting at 2
        let target = [None, Some(2)];
        assert!(may_contain(&[0, 0], &[0, 4], &target));
        assert!(may_contain(&[0, 4], &[2, 0], &target));
        assert!(!may_contain(&[2, 4], &[2, 4], &target));
        assert!(may_contain(&[2, 0], &[2, 2], &target));
        assert!(!may_contain(&[0, 4], &[0, 6], &target));
    }

    #[test]
    fn grid_positions_pin_one_column() {
        let positions = grid_positions(&[5, 6], &[2, 4], &[None, Some(4)]);
        assert_eq!(
            positions,
            vec![(1, vec![0, 4]), (3, vec![2, 4]), (5, vec![4, 4])]
        );
    }

    #[test]
    fn scatter_clips_edge_chunks() {
        let mut out = vec![0u8; 3 * 3];
        // 2 x 2 chunk at (2, 2) of a 3 x 3 byte matrix
        scatter(&mut out, &[3, 3], &[2, 2], &[2, 2], &[7, 8, 9, 10], 1);
        assert_eq!(out, vec![0, 0, 0, 0, 0, 0, 0, 0, 7]);
        scatter(&mut out, &[3, 3], &[0, 0], &[2, 2], &[1, 2, 3, 4], 1);
        assert_eq!(out, vec![1, 2, 0, 3, 4, 0, 0, 0, 7]);
    }

    #[test]
    fn signed_and_float_elements() {
        let raw: Vec<u8> = [-3i16, 5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let dtype = Datatype::Integer {
            size: 2,
            signed: true,
            big_endian: false,
        };
        assert_eq!(decode_f64("x", dtype, &raw).unwrap(), vec![-3.0, 5.0]);

        let raw = 0.25f32.to_be_bytes();
        let dtype = Datatype::Float {
            size: 4,
            big_endian: true,
        };
        assert_eq!(decode_f64("x", dtype, &raw).unwrap(), vec![0.25]);
    }
}
