//! The single compression layer used by chunk payloads: either stored raw, or
//! zlib-deflated (the only algorithm the v6 writer currently emits).

use std::io::{Read as _, Write as _};

use flate2::{write::ZlibEncoder, read::ZlibDecoder, Compression as FlateCompression};

use crate::error::{ContainerError, Result};

/// Compression algorithm id as stored in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Algorithm {
    None = 0,
    Zip = 1,
}

impl Algorithm {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Algorithm {
    type Error = ContainerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Zip),
            other => Err(ContainerError::UnknownAlgorithm(other)),
        }
    }
}

/// Deflates `buf` with a zlib header, returning the compressed bytes.
pub fn compress(buf: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), FlateCompression::default());
    encoder
        .write_all(buf)
        .map_err(|_| ContainerError::Compression("compress"))?;
    encoder
        .finish()
        .map_err(|_| ContainerError::Compression("compress"))
}

/// Inflates `buf`, which must decode to exactly `expected_uncompressed_size` bytes.
///
/// The uncompressed size is authoritative from the chunk header, not an upper bound: a mismatch
/// (short or long) is treated as a failed decompression, matching the fatal chunk error in the
/// on-disk format's error model.
pub fn decompress(buf: &[u8], expected_uncompressed_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(buf);
    let mut out = vec![0_u8; expected_uncompressed_size];
    decoder
        .read_exact(&mut out)
        .map_err(|_| ContainerError::Compression("decompress"))?;

    // Any further bytes mean the header's uncompressed size undersold the real payload.
    let mut trailing = [0_u8; 1];
    if decoder
        .read(&mut trailing)
        .map_err(|_| ContainerError::Compression("decompress"))?
        != 0
    {
        return Err(ContainerError::Compression("decompress"));
    }

    Ok(out)
}
