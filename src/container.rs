//! Top-level container: magic bytes, format version, compression algorithm, and the total-size
//! field that bounds the chunk sequence. Ties `PALETTE`/`PALETTE_LEGACY`/`PALETTE_ID`/`SHAPE`/
//! `PREVIEW` together into the single [`Shape`] a caller actually wants.
//!
//! [`load`] and [`save`] are the buffered (in-memory) round trip; [`save_to`] is the in-place
//! variant that patches `totalSize` via [`Seek`] once every chunk has been written, for callers
//! writing straight to a file. [`get_preview_data`] walks just far enough to pull out the
//! preview image without building a shape at all.

use std::cell::RefCell;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::rc::{Rc, Weak};

use subslice_to_array::SubsliceToArray as _;

use crate::chunk::{self, ChunkId};
use crate::compression::{self, Algorithm};
use crate::error::{ContainerError, Result};
use crate::palette::{ColorAtlas, ColorPalette, EntryIndex, PaletteIdKind, RgbaColor, MAX_COLORS};
use crate::raw;
use crate::shape::{self, Shape};

/// Fixed prefix every container starts with. Not carried over from any prior format; this
/// crate's own choice of magic value.
const MAGIC_BYTES: [u8; 4] = *b"VXA6";
const FORMAT_VERSION: u32 = 6;

/// Reads a whole container from `r`. `atlas` is threaded through to every [`ColorPalette`] this
/// load constructs (the palette that ends up owned by the returned shape, and, transiently, any
/// shrink/default-substitution palette used along the way).
pub fn load<R: Read>(r: &mut R, atlas: Option<Weak<dyn ColorAtlas>>) -> Result<Shape> {
    let mut magic = [0_u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC_BYTES {
        return Err(ContainerError::BadMagic);
    }

    let format = raw::read_u32(r)?;
    if format != FORMAT_VERSION {
        return Err(ContainerError::Consistency("unsupported container format version"));
    }

    let _algo = Algorithm::try_from(raw::read_u8(r)?)?;
    let total_size = raw::read_u32(r)?;
    let body = raw::read_bytes(r, total_size as usize)?;

    load_body(&body, atlas)
}

/// Single-pass walk of the chunk sequence bounded by `totalSize`. Tolerates any permutation of
/// `PALETTE*` and `SHAPE`: palette state accumulates as those chunks are seen, `SHAPE` is built
/// against whatever palette state exists at that point, and any `PALETTE*` arriving afterward is
/// discarded with a log rather than retroactively applied.
fn load_body(body: &[u8], atlas: Option<Weak<dyn ColorAtlas>>) -> Result<Shape> {
    let mut cursor = Cursor::new(body);

    let mut serialized_palette: Option<ColorPalette> = None;
    // "by default, without a palette or palette-id chunk" the legacy built-in palette is assumed.
    let mut palette_kind = PaletteIdKind::IosItemEditorLegacy;
    let mut shape: Option<Shape> = None;

    while (cursor.position() as usize) < body.len() {
        let (id, payload) = chunk::read_chunk(&mut cursor)?;
        match ChunkId::from_u8(id) {
            Some(known @ (ChunkId::PaletteLegacy | ChunkId::Palette)) => {
                if shape.is_some() {
                    log::warn!("discarding a palette chunk (id {id}) that arrived after SHAPE was already processed");
                    continue;
                }
                let is_legacy = known == ChunkId::PaletteLegacy;
                serialized_palette = Some(parse_palette_payload(&payload, is_legacy, atlas.clone())?);
                palette_kind = PaletteIdKind::Custom;
            }
            Some(ChunkId::PaletteId) => {
                if shape.is_some() {
                    log::warn!("discarding a PALETTE_ID chunk that arrived after SHAPE was already processed");
                    continue;
                }
                let mut c = Cursor::new(payload.as_slice());
                palette_kind = PaletteIdKind::from_u8(raw::read_u8(&mut c)?);
            }
            Some(ChunkId::Shape) => {
                shape = Some(build_shape_from_payload(
                    &payload,
                    serialized_palette.take(),
                    palette_kind,
                    atlas.clone(),
                )?);
            }
            // PREVIEW and anything unrecognized: already fully consumed by read_chunk above.
            _ => {}
        }
    }

    shape.ok_or(ContainerError::Consistency("container had no SHAPE chunk"))
}

fn parse_palette_payload(
    payload: &[u8],
    is_legacy: bool,
    atlas: Option<Weak<dyn ColorAtlas>>,
) -> Result<ColorPalette> {
    let mut c = Cursor::new(payload);

    let count = if is_legacy {
        let _rows = raw::read_u8(&mut c)?;
        let _columns = raw::read_u8(&mut c)?;
        let count = raw::read_u16(&mut c)?;
        let _default_color = raw::read_u8(&mut c)?;
        let _default_background = raw::read_u8(&mut c)?;
        usize::from(count)
    } else {
        usize::from(raw::read_u8(&mut c)?)
    };
    let count = count.min(MAX_COLORS);

    let colors_start = c.position() as usize;
    let colors_end = colors_start + count * 4;
    let emissive_end = colors_end + count;
    if emissive_end > payload.len() {
        return Err(ContainerError::Consistency("palette chunk too short for its declared color count"));
    }

    let colors = payload[colors_start..colors_end]
        .chunks_exact(4)
        .map(|bytes| RgbaColor::from_bytes(bytes.subslice_to_array::<0, 4>()))
        .collect::<Vec<_>>();
    let emissive = payload[colors_end..emissive_end].iter().map(|&b| b != 0).collect::<Vec<_>>();

    Ok(ColorPalette::new_from_data(atlas, &colors, &emissive))
}

/// Picks which palette a `SHAPE` chunk's block bytes resolve against, following the precedence
/// the format defines: a `PALETTE_ID` naming a built-in palette always wins (even over a
/// serialized palette that happened to also be present); otherwise a serialized palette that hit
/// `MAX_COLORS` is rebuilt compacted to only the colors actually used; otherwise a serialized
/// palette (or, lacking one, a fresh empty palette) is used directly, with block bytes already
/// equal to its entry indices.
fn resolve_shape_palette(
    serialized_palette: Option<ColorPalette>,
    palette_kind: PaletteIdKind,
    atlas: Option<Weak<dyn ColorAtlas>>,
) -> (Rc<RefCell<ColorPalette>>, Box<dyn Fn(u8) -> Option<EntryIndex>>) {
    if let Some(kind) = palette_kind.default_kind() {
        let palette = Rc::new(RefCell::new(ColorPalette::new(atlas)));
        let target = Rc::clone(&palette);
        return (palette, Box::new(move |byte| target.borrow_mut().check_and_add_default(kind, byte).ok()));
    }

    let shrink = serialized_palette.as_ref().is_some_and(|p| p.count() >= MAX_COLORS);
    if shrink {
        let old = serialized_palette.expect("shrink is only set when a serialized palette exists");
        let palette = Rc::new(RefCell::new(ColorPalette::new(atlas)));
        let target = Rc::clone(&palette);
        return (
            palette,
            Box::new(move |byte| {
                let color = old.get_color(EntryIndex::from(byte))?;
                target.borrow_mut().check_and_add(color, false).ok()
            }),
        );
    }

    let palette = Rc::new(RefCell::new(serialized_palette.unwrap_or_else(|| ColorPalette::new(atlas))));
    (palette, Box::new(|byte| Some(EntryIndex::from(byte))))
}

fn build_shape_from_payload(
    payload: &[u8],
    serialized_palette: Option<ColorPalette>,
    palette_kind: PaletteIdKind,
    atlas: Option<Weak<dyn ColorAtlas>>,
) -> Result<Shape> {
    let raw = shape::parse_shape_subchunks(payload)?;
    let (palette, translate) = resolve_shape_palette(serialized_palette, palette_kind, atlas);
    // A translation failure (palette full) is a lossy per-voxel fallback to entry 0, not fatal.
    Ok(shape::build_shape(&raw, palette, move |byte| Some(translate(byte).unwrap_or(0))))
}

/// Walks a container just far enough to extract its `PREVIEW` chunk, without building a shape.
/// `Ok(None)` means the stream parsed fine but carried no preview.
pub fn get_preview_data<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut magic = [0_u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC_BYTES {
        return Err(ContainerError::BadMagic);
    }
    let format = raw::read_u32(r)?;
    if format != FORMAT_VERSION {
        return Err(ContainerError::Consistency("unsupported container format version"));
    }
    let _algo = Algorithm::try_from(raw::read_u8(r)?)?;
    let total_size = raw::read_u32(r)?;
    let body = raw::read_bytes(r, total_size as usize)?;

    let mut cursor = Cursor::new(&body);
    while (cursor.position() as usize) < body.len() {
        let (id, payload) = chunk::read_chunk(&mut cursor)?;
        if ChunkId::from_u8(id) == Some(ChunkId::Preview) {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}

/// Builds the palette chunk payload (`count:u8 | colors[count]:RGBA | emissive[count]:u8`) and
/// the entry-index → serialized-position mapping the shape writer needs.
fn write_palette_payload(palette: &ColorPalette) -> Result<(Vec<u8>, Vec<EntryIndex>)> {
    let (colors, emissive, mapping) = palette.get_colors_as_array();

    let mut payload = Vec::with_capacity(1 + colors.len() * 5);
    raw::write_u8(&mut payload, colors.len() as u8)?;
    for color in &colors {
        payload.extend_from_slice(&color.to_bytes());
    }
    for flag in emissive {
        raw::write_u8(&mut payload, u8::from(flag))?;
    }

    Ok((payload, mapping))
}

/// The three chunks a save writes, compressed (except `PREVIEW`) and ready to be concatenated
/// after the file header.
struct EncodedChunks {
    preview: Option<Vec<u8>>,
    palette: Vec<u8>,
    palette_uncompressed_len: u32,
    shape: Vec<u8>,
    shape_uncompressed_len: u32,
}

fn encode_chunks(shape: &Shape, preview: Option<&[u8]>) -> Result<EncodedChunks> {
    let palette = shape.palette().borrow();
    let (palette_payload, mapping) = write_palette_payload(&palette)?;
    let shape_payload = shape::write_shape_chunk(shape, |entry| {
        mapping.get(entry as usize).copied().unwrap_or(crate::palette::INVALID_INDEX) as u8
    })?;
    drop(palette);

    Ok(EncodedChunks {
        preview: preview.map(<[u8]>::to_vec),
        palette_uncompressed_len: palette_payload.len() as u32,
        palette: compression::compress(&palette_payload)?,
        shape_uncompressed_len: shape_payload.len() as u32,
        shape: compression::compress(&shape_payload)?,
    })
}

fn write_body<W: Write>(w: &mut W, encoded: &EncodedChunks) -> Result<()> {
    if let Some(preview) = &encoded.preview {
        chunk::write_chunk(w, ChunkId::Preview.as_u8(), preview, false)?;
    }
    chunk::write_chunk_precompressed(w, ChunkId::Palette.as_u8(), &encoded.palette, encoded.palette_uncompressed_len)?;
    chunk::write_chunk_precompressed(w, ChunkId::Shape.as_u8(), &encoded.shape, encoded.shape_uncompressed_len)?;
    Ok(())
}

/// Serializes `shape` (and an optional preview image) into a freshly-allocated buffer. Sizes the
/// output up front by compressing the palette and shape chunks before writing anything, the same
/// way the in-place writer does — just without needing to seek back afterward.
pub fn save(shape: &Shape, preview: Option<&[u8]>) -> Result<Vec<u8>> {
    let encoded = encode_chunks(shape, preview)?;

    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC_BYTES);
    raw::write_u32(&mut buf, FORMAT_VERSION)?;
    raw::write_u8(&mut buf, Algorithm::Zip.as_u8())?;
    let total_size_at = buf.len();
    raw::write_u32(&mut buf, 0)?; // placeholder, patched below

    let body_start = buf.len();
    write_body(&mut buf, &encoded)?;
    let total_size = (buf.len() - body_start) as u32;
    buf[total_size_at..total_size_at + 4].copy_from_slice(&total_size.to_le_bytes());

    Ok(buf)
}

/// Serializes `shape` directly to `w`, patching `totalSize` via [`Seek`] once every chunk has
/// been written — the in-place writer variant for a file (or any other seekable sink).
pub fn save_to<W: Write + Seek>(w: &mut W, shape: &Shape, preview: Option<&[u8]>) -> Result<()> {
    let encoded = encode_chunks(shape, preview)?;

    w.write_all(&MAGIC_BYTES)?;
    raw::write_u32(w, FORMAT_VERSION)?;
    raw::write_u8(w, Algorithm::Zip.as_u8())?;

    let total_size_at = w.stream_position()?;
    raw::write_u32(w, 0)?; // placeholder

    let body_start = w.stream_position()?;
    write_body(w, &encoded)?;
    let body_end = w.stream_position()?;

    let total_size = (body_end - body_start) as u32;
    w.seek(SeekFrom::Start(total_size_at))?;
    raw::write_u32(w, total_size)?;
    w.seek(SeekFrom::Start(body_end))?;

    Ok(())
}
