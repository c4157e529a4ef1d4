//! Chunk headers and the dispatch table for the v6 container.
//!
//! The format has two header dialects. Which one a given chunk id uses is fixed by the id
//! itself (§3.5 of the format): [`PALETTE_LEGACY`](ChunkId::PaletteLegacy), [`PALETTE`],
//! [`PALETTE_ID`] and [`SHAPE`] always carry the v6 header (with a compression flag and an
//! uncompressed-size field); [`PREVIEW`] and any chunk id this reader doesn't recognize carry
//! the older v5 header instead.

use std::io::{Read, Write};

use crate::compression;
use crate::error::{ContainerError, Result};
use crate::raw;

/// Known top-level (and `SHAPE` sub-chunk) ids. The reserved range is `1..=16`; anything
/// else is an unknown chunk that must be skipped, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkId {
    Preview = 1,
    PaletteLegacy = 2,
    Shape = 3,
    ShapeSize = 4,
    ShapeBlocks = 5,
    ShapePoint = 6,
    ShapeBakedLighting = 7,
    ShapePointRotation = 8,
    PaletteId = 15,
    Palette = 16,
}

impl ChunkId {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a known chunk id. Returns `None` for ids that should be treated as unknown
    /// (including the never-assigned id 0 and ids above the reserved range).
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Preview,
            2 => Self::PaletteLegacy,
            3 => Self::Shape,
            4 => Self::ShapeSize,
            5 => Self::ShapeBlocks,
            6 => Self::ShapePoint,
            7 => Self::ShapeBakedLighting,
            8 => Self::ShapePointRotation,
            15 => Self::PaletteId,
            16 => Self::Palette,
            _ => return None,
        })
    }

    /// Whether this top-level chunk id uses the v6 header dialect (id + size + compression
    /// flag + uncompressed size) rather than the older v5 header (id + size only).
    ///
    /// Only decided by the id; `SHAPE_SIZE`/`SHAPE_BLOCKS`/etc. are sub-chunk ids that are
    /// always read with the v5 dialect regardless of this table, since they only ever appear
    /// nested inside a `SHAPE` chunk's own (uncompressed) sub-chunk stream.
    pub fn is_v6_header(self) -> bool {
        matches!(self, Self::PaletteLegacy | Self::Palette | Self::PaletteId | Self::Shape)
    }
}

/// Same dialect rule as [`ChunkId::is_v6_header`], but for raw (possibly unknown) ids as read
/// off the wire.
fn is_v6_header_id(id: u8) -> bool {
    matches!(ChunkId::from_u8(id), Some(known) if known.is_v6_header())
}

const V6_HEADER_NO_ID_LEN: u32 = 4 + 1 + 4;
const V5_HEADER_NO_ID_LEN: u32 = 4;

/// Size in bytes of the on-disk header (including the leading id byte) this chunk id would use.
pub fn header_len(id: u8) -> u32 {
    1 + if is_v6_header_id(id) { V6_HEADER_NO_ID_LEN } else { V5_HEADER_NO_ID_LEN }
}

/// Reads one chunk: the id byte, whichever header dialect that id implies, and the
/// (decompressed, if applicable) payload bytes.
pub fn read_chunk<R: Read>(r: &mut R) -> Result<(u8, Vec<u8>)> {
    let id = raw::read_u8(r)?;

    if is_v6_header_id(id) {
        let (chunk_size, is_compressed, uncompressed_size) = read_header_v6_body(r)?;
        if chunk_size == 0 || uncompressed_size == 0 {
            return Err(ContainerError::EmptyChunk { chunk_id: id });
        }

        let raw_payload = raw::read_bytes(r, chunk_size as usize)?;
        let payload = if is_compressed != 0 {
            compression::decompress(&raw_payload, uncompressed_size as usize)?
        } else {
            raw_payload
        };
        Ok((id, payload))
    } else {
        let chunk_size = read_header_v5_body(r)?;
        if chunk_size == 0 {
            return Err(ContainerError::EmptyChunk { chunk_id: id });
        }
        let payload = raw::read_bytes(r, chunk_size as usize)?;
        Ok((id, payload))
    }
}

/// Advances past a chunk whose id has already been consumed but whose v6-header body is
/// uninteresting to the caller (an unknown top-level chunk is never v6, but a `PALETTE*`
/// chunk arriving after `SHAPE` has already been processed is skipped this way).
pub fn skip_v6<R: Read>(r: &mut R) -> Result<()> {
    let (chunk_size, _is_compressed, _uncompressed_size) = read_header_v6_body(r)?;
    raw::skip(r, u64::from(chunk_size))?;
    Ok(())
}

/// Advances past a chunk whose id has already been consumed but whose v5-header body is
/// uninteresting (an unrecognized top-level chunk, or an unknown `SHAPE` sub-chunk).
pub fn skip_v5<R: Read>(r: &mut R) -> Result<()> {
    let chunk_size = read_header_v5_body(r)?;
    raw::skip(r, u64::from(chunk_size))?;
    Ok(())
}

fn read_header_v6_body<R: Read>(r: &mut R) -> Result<(u32, u8, u32)> {
    let chunk_size = raw::read_u32(r)?;
    let is_compressed = raw::read_u8(r)?;
    let uncompressed_size = raw::read_u32(r)?;
    Ok((chunk_size, is_compressed, uncompressed_size))
}

fn read_header_v5_body<R: Read>(r: &mut R) -> Result<u32> {
    Ok(raw::read_u32(r)?)
}

/// Writes one chunk, picking the header dialect the same way [`read_chunk`] does: by id, via
/// [`is_v6_header_id`]. `PREVIEW` and every `SHAPE` sub-chunk id fall through to the v5 header
/// (and are never compressed); `compress` is only honored for the v6-header ids.
pub fn write_chunk<W: Write>(w: &mut W, id: u8, payload: &[u8], compress: bool) -> Result<()> {
    if !is_v6_header_id(id) {
        return write_chunk_v5(w, id, payload).map_err(ContainerError::from);
    }

    if compress {
        let compressed = compression::compress(payload)?;
        write_chunk_v6(w, id, &compressed, true, payload.len() as u32)
    } else {
        write_chunk_v6(w, id, payload, false, payload.len() as u32)
    }
    .map_err(ContainerError::from)
}

/// Writes a v6-header chunk whose payload was already compressed by the caller, so the size
/// of the outer buffer can be computed up front.
pub fn write_chunk_precompressed<W: Write>(
    w: &mut W,
    id: u8,
    compressed: &[u8],
    uncompressed_size: u32,
) -> Result<()> {
    write_chunk_v6(w, id, compressed, true, uncompressed_size).map_err(ContainerError::from)
}

fn write_chunk_v6<W: Write>(
    w: &mut W,
    id: u8,
    payload: &[u8],
    is_compressed: bool,
    uncompressed_size: u32,
) -> std::io::Result<()> {
    raw::write_u8(w, id)?;
    raw::write_u32(w, payload.len() as u32)?;
    raw::write_u8(w, u8::from(is_compressed))?;
    raw::write_u32(w, uncompressed_size)?;
    w.write_all(payload)
}

fn write_chunk_v5<W: Write>(w: &mut W, id: u8, payload: &[u8]) -> std::io::Result<()> {
    raw::write_u8(w, id)?;
    raw::write_u32(w, payload.len() as u32)?;
    w.write_all(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writes_and_reads_back_a_compressed_v6_chunk() {
        let payload = b"some shape bytes to round-trip through zlib".repeat(4);
        let mut buf = Vec::new();
        write_chunk(&mut buf, ChunkId::Shape.as_u8(), &payload, true).unwrap();

        let (id, read_back) = read_chunk(&mut Cursor::new(buf)).unwrap();
        assert_eq!(id, ChunkId::Shape.as_u8());
        assert_eq!(read_back, payload);
    }

    #[test]
    fn preview_is_never_compressed_even_if_requested() {
        let payload = b"PNGfakepreviewbytes".to_vec();
        let mut buf = Vec::new();
        write_chunk(&mut buf, ChunkId::Preview.as_u8(), &payload, true).unwrap();

        // v5 header: id + u32 len, no compression flag.
        assert_eq!(buf.len(), 1 + 4 + payload.len());
        let (id, read_back) = read_chunk(&mut Cursor::new(buf)).unwrap();
        assert_eq!(id, ChunkId::Preview.as_u8());
        assert_eq!(read_back, payload);
    }

    #[test]
    fn unknown_chunk_is_skippable_via_v5_header() {
        let payload = b"unknown chunk body";
        let mut buf = Vec::new();
        write_chunk_v5(&mut buf, 200, payload).unwrap();

        let mut cursor = Cursor::new(buf);
        let id = raw::read_u8(&mut cursor).unwrap();
        assert_eq!(id, 200);
        skip_v5(&mut cursor).unwrap();
        assert_eq!(cursor.position() as usize, 1 + 4 + payload.len());
    }

    #[test]
    fn zero_size_chunk_is_rejected() {
        let mut buf = Vec::new();
        write_chunk_v5(&mut buf, ChunkId::Preview.as_u8(), &[]).unwrap();
        assert!(read_chunk(&mut Cursor::new(buf)).is_err());
    }
}
