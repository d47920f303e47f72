//! Decoding of filtered chunks.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::KiraError;

pub const DEFLATE: u16 = 1;
pub const SHUFFLE: u16 = 2;
pub const FLETCHER32: u16 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u16,
    pub name: String,
    pub client_data: Vec<u32>,
}

/// Undoes the pipeline on one stored chunk. Bit `i` of `mask` set means
/// filter `i` was skipped when the chunk was written.
pub fn decode(
    pipeline: &[Filter],
    mask: u32,
    element_size: usize,
    mut data: Vec<u8>,
) -> Result<Vec<u8>, KiraError> {
    for (position, filter) in pipeline.iter().enumerate().rev() {
        if position < 32 && mask & (1 << position) != 0 {
            continue;
        }
        data = match filter.id {
            DEFLATE => inflate(&data)?,
            SHUFFLE => unshuffle(&data, element_size),
            FLETCHER32 => {
                if data.len() < 4 {
                    return Err(KiraError::Hdf5(
                        "fletcher32 chunk shorter than its checksum".into(),
                    ));
                }
                data.truncate(data.len() - 4);
                data
            }
            other => {
                return Err(KiraError::Hdf5(format!(
                    "unsupported filter {other} ({})",
                    filter.name
                )));
            }
        };
    }
    Ok(data)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, KiraError> {
    let mut out = Vec::with_capacity(data.len() * 4);
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|err| KiraError::Hdf5(format!("deflate: {err}")))?;
    Ok(out)
}

/// Reverses the byte shuffle: stored bytes are grouped by byte position.
fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte in 0..element_size {
        for element in 0..count {
            out[element * element_size + byte] = data[byte * count + element];
        }
    }
    // trailing bytes that do not fill an element are stored as-is
    let tail = count * element_size;
    out[tail..].copy_from_slice(&data[tail..]);
    out
}
