//! Read/write logic for the sub-chunk stream nested inside a `SHAPE` chunk: `SHAPE_SIZE`,
//! `SHAPE_BLOCKS`, `SHAPE_POINT`, `SHAPE_POINT_ROTATION`, `SHAPE_BAKED_LIGHTING`, and whatever
//! unrecognized ids a newer writer might have added.
//!
//! Parsing is split from assembly on purpose: [`parse_shape_subchunks`] only collects raw bytes
//! into a [`RawShapeChunk`], regardless of what order the sub-chunks arrived in, so a
//! `SHAPE_BLOCKS` that precedes its `SHAPE_SIZE` is handled for free. [`build_shape`] does the
//! actual assembly once every sub-chunk has been seen, and needs a `resolve` callback translating
//! a serialized block byte into a live palette entry, since that mapping depends on whichever
//! `PALETTE`/`PALETTE_ID` chunk the container already processed.

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use crate::chunk::{self, ChunkId};
use crate::error::Result;
use crate::palette::{ColorPalette, EntryIndex, VertexLight, AIR};
use crate::raw;

use super::{Block, Shape};

/// Sub-chunk contents of a `SHAPE` chunk, collected without regard to arrival order or to
/// whatever live palette the block bytes will eventually be resolved against.
#[derive(Debug, Default)]
pub struct RawShapeChunk {
    pub width: u16,
    pub height: u16,
    pub depth: u16,
    /// One byte per voxel in x-major, then y, then z order. [`AIR`] means no block.
    pub block_indices: Vec<u8>,
    pub points: Vec<(String, (f32, f32, f32))>,
    pub point_rotations: Vec<(String, (f32, f32, f32))>,
    /// Raw 2-byte-per-voxel records, not yet validated against `width * height * depth`.
    pub lighting: Option<Vec<u8>>,
}

/// Walks every sub-chunk in a `SHAPE` chunk's (already decompressed) payload.
pub fn parse_shape_subchunks(payload: &[u8]) -> Result<RawShapeChunk> {
    let mut cursor = Cursor::new(payload);
    let mut raw = RawShapeChunk::default();

    while (cursor.position() as usize) < payload.len() {
        let (id, body) = chunk::read_chunk(&mut cursor)?;
        match ChunkId::from_u8(id) {
            Some(ChunkId::ShapeSize) => {
                let mut c = Cursor::new(&body);
                raw.width = raw::read_u16(&mut c)?;
                raw.height = raw::read_u16(&mut c)?;
                raw.depth = raw::read_u16(&mut c)?;
            }
            Some(ChunkId::ShapeBlocks) => raw.block_indices = body,
            Some(ChunkId::ShapePoint) => raw.points.push(parse_named_point(&body)?),
            Some(ChunkId::ShapePointRotation) => raw.point_rotations.push(parse_named_point(&body)?),
            Some(ChunkId::ShapeBakedLighting) => raw.lighting = Some(body),
            _ => {} // unrecognized sub-chunk id; already fully consumed by read_chunk above.
        }
    }

    Ok(raw)
}

fn parse_named_point(body: &[u8]) -> Result<(String, (f32, f32, f32))> {
    let mut c = Cursor::new(body);
    let len = raw::read_u8(&mut c)?;
    let name_bytes = raw::read_bytes(&mut c, usize::from(len))?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();
    let x = raw::read_f32(&mut c)?;
    let y = raw::read_f32(&mut c)?;
    let z = raw::read_f32(&mut c)?;
    Ok((name, (x, y, z)))
}

/// Builds a [`Shape`] from its parsed sub-chunks. `resolve` maps a serialized (ordered) palette
/// index to the entry index it was loaded into; it returns `None` for an index that somehow
/// doesn't resolve, in which case that voxel is left empty rather than failing the whole load.
pub fn build_shape(
    raw: &RawShapeChunk,
    palette: Rc<RefCell<ColorPalette>>,
    resolve: impl Fn(u8) -> Option<EntryIndex>,
) -> Shape {
    let mut shape = Shape::new_fixed(raw.width, raw.height, raw.depth, palette);
    let aabb = shape.get_aabb();

    for (name, pos) in &raw.points {
        // On disk, point positions are voxel-relative (bounding-box minimum subtracted).
        let absolute = (pos.0 + aabb.min.0, pos.1 + aabb.min.1, pos.2 + aabb.min.2);
        shape.set_point(name.clone(), absolute);
    }
    for (name, rot) in &raw.point_rotations {
        // Point rotations are absolute on disk, unlike points; preserved as-is.
        shape.set_point_rotation(name.clone(), *rot);
    }

    let expected_blocks = usize::from(raw.width) * usize::from(raw.height) * usize::from(raw.depth);
    if raw.block_indices.len() == expected_blocks {
        for x in 0..raw.width {
            for y in 0..raw.height {
                for z in 0..raw.depth {
                    let byte = raw.block_indices[block_index(raw.height, raw.depth, x, y, z)];
                    if byte == AIR {
                        continue;
                    }
                    if let Some(entry) = resolve(byte) {
                        shape.set_block_with_color(entry, x, y, z);
                    }
                }
            }
        }
    } else if !raw.block_indices.is_empty() {
        log::warn!(
            "SHAPE_BLOCKS has {} bytes, expected {} for a {}x{}x{} shape; leaving it empty",
            raw.block_indices.len(),
            expected_blocks,
            raw.width,
            raw.height,
            raw.depth
        );
    }

    if let Some(bytes) = &raw.lighting {
        // Presence of the sub-chunk at all means the shape is configured to use baked lighting,
        // even if the buffer turns out to be the wrong size and gets discarded below.
        shape.set_uses_baked_lighting(true);
        if bytes.len() == expected_blocks * 2 {
            let lights = bytes
                .chunks_exact(2)
                .map(|pair| VertexLight::from_bytes([pair[0], pair[1]]))
                .collect();
            shape.set_lighting_data(lights);
        } else {
            log::warn!(
                "SHAPE_BAKED_LIGHTING has {} bytes, expected {} for a {}x{}x{} shape; discarding it",
                bytes.len(),
                expected_blocks * 2,
                raw.width,
                raw.height,
                raw.depth
            );
        }
    }

    shape
}

/// Flat index matching the on-disk x-major/y/z order: z varies fastest, then y, then x.
#[inline]
fn block_index(height: u16, depth: u16, x: u16, y: u16, z: u16) -> usize {
    usize::from(z) + usize::from(depth) * (usize::from(y) + usize::from(height) * usize::from(x))
}

/// Serializes a [`Shape`] back into a `SHAPE` chunk's sub-chunk stream. `palette_index_of` maps
/// a live entry index to the ordered position it will have in the serialized palette.
pub fn write_shape_chunk(shape: &Shape, palette_index_of: impl Fn(EntryIndex) -> u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let (width, height, depth) = shape.dimensions();
    let voxel_count = usize::from(width) * usize::from(height) * usize::from(depth);

    let mut size_payload = Vec::with_capacity(6);
    raw::write_u16(&mut size_payload, width)?;
    raw::write_u16(&mut size_payload, height)?;
    raw::write_u16(&mut size_payload, depth)?;
    chunk::write_chunk(&mut out, ChunkId::ShapeSize.as_u8(), &size_payload, false)?;

    let mut block_payload = Vec::with_capacity(voxel_count);
    for x in 0..width {
        for y in 0..height {
            for z in 0..depth {
                let byte = match shape.get_block(x, y, z) {
                    Block::Air => AIR,
                    Block::Solid(entry) => palette_index_of(entry),
                };
                block_payload.push(byte);
            }
        }
    }
    chunk::write_chunk(&mut out, ChunkId::ShapeBlocks.as_u8(), &block_payload, false)?;

    let aabb = shape.get_aabb();
    for (name, pos) in shape.iter_points() {
        let relative = (pos.0 - aabb.min.0, pos.1 - aabb.min.1, pos.2 - aabb.min.2);
        let payload = encode_named_point(name, relative)?;
        chunk::write_chunk(&mut out, ChunkId::ShapePoint.as_u8(), &payload, false)?;
    }
    for (name, rot) in shape.iter_point_rotations() {
        let payload = encode_named_point(name, rot)?;
        chunk::write_chunk(&mut out, ChunkId::ShapePointRotation.as_u8(), &payload, false)?;
    }

    if shape.uses_baked_lighting() {
        let mut lighting_payload = Vec::with_capacity(voxel_count * 2);
        for x in 0..width {
            for y in 0..height {
                for z in 0..depth {
                    lighting_payload.extend_from_slice(&shape.get_light(x, y, z).to_bytes());
                }
            }
        }
        chunk::write_chunk(&mut out, ChunkId::ShapeBakedLighting.as_u8(), &lighting_payload, false)?;
    }

    Ok(out)
}

/// Encodes a name (truncated to 255 bytes at a UTF-8 boundary) and a float3, matching the
/// `SHAPE_POINT`/`SHAPE_POINT_ROTATION` payload layout.
fn encode_named_point(name: &str, value: (f32, f32, f32)) -> Result<Vec<u8>> {
    let mut end = name.len().min(255);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &name[..end];

    let mut payload = Vec::with_capacity(1 + truncated.len() + 12);
    raw::write_u8(&mut payload, truncated.len() as u8)?;
    payload.extend_from_slice(truncated.as_bytes());
    raw::write_f32(&mut payload, value.0)?;
    raw::write_f32(&mut payload, value.1)?;
    raw::write_f32(&mut payload, value.2)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::RgbaColor;

    fn test_palette() -> Rc<RefCell<ColorPalette>> {
        Rc::new(RefCell::new(ColorPalette::new(None)))
    }

    #[test]
    fn round_trips_a_small_shape_through_the_subchunk_stream() {
        let palette = test_palette();
        let red = palette.borrow_mut().check_and_add(RgbaColor::new(255, 0, 0, 255), false).unwrap();

        let mut shape = Shape::new_fixed(2, 1, 1, palette.clone());
        shape.set_block_with_color(red, 0, 0, 0);
        shape.set_point("spawn", (1.5, 2.5, 3.5));
        shape.set_point_rotation("spawn", (0.0, 90.0, 0.0));

        let bytes = write_shape_chunk(&shape, |_entry| 0).unwrap();
        let raw = parse_shape_subchunks(&bytes).unwrap();
        assert_eq!((raw.width, raw.height, raw.depth), (2, 1, 1));
        assert_eq!(raw.block_indices, vec![0, AIR]);

        let rebuilt = build_shape(&raw, palette, |idx| (idx == 0).then_some(red));
        assert_eq!(rebuilt.get_block(0, 0, 0), Block::Solid(red));
        assert_eq!(rebuilt.get_block(1, 0, 0), Block::Air);
        assert_eq!(rebuilt.iter_points().collect::<Vec<_>>(), vec![("spawn", (1.5, 2.5, 3.5))]);
        assert_eq!(
            rebuilt.iter_point_rotations().collect::<Vec<_>>(),
            vec![("spawn", (0.0, 90.0, 0.0))]
        );
    }

    #[test]
    fn tolerates_shape_blocks_arriving_before_shape_size() {
        let mut out_of_order = Vec::new();
        chunk::write_chunk(&mut out_of_order, ChunkId::ShapeBlocks.as_u8(), &[AIR, 0, AIR, 0], false).unwrap();
        let mut size_payload = Vec::new();
        raw::write_u16(&mut size_payload, 2).unwrap();
        raw::write_u16(&mut size_payload, 2).unwrap();
        raw::write_u16(&mut size_payload, 1).unwrap();
        chunk::write_chunk(&mut out_of_order, ChunkId::ShapeSize.as_u8(), &size_payload, false).unwrap();

        let raw = parse_shape_subchunks(&out_of_order).unwrap();
        assert_eq!((raw.width, raw.height, raw.depth), (2, 2, 1));
        assert_eq!(raw.block_indices, vec![AIR, 0, AIR, 0]);
    }

    #[test]
    fn mismatched_baked_lighting_is_discarded_not_fatal() {
        let palette = test_palette();
        let mut size_payload = Vec::new();
        raw::write_u16(&mut size_payload, 1).unwrap();
        raw::write_u16(&mut size_payload, 1).unwrap();
        raw::write_u16(&mut size_payload, 1).unwrap();

        let mut bytes = Vec::new();
        chunk::write_chunk(&mut bytes, ChunkId::ShapeSize.as_u8(), &size_payload, false).unwrap();
        chunk::write_chunk(&mut bytes, ChunkId::ShapeBlocks.as_u8(), &[AIR], false).unwrap();
        // One voxel needs 2 bytes of lighting; this gives it 4.
        chunk::write_chunk(&mut bytes, ChunkId::ShapeBakedLighting.as_u8(), &[0, 0, 0, 0], false).unwrap();

        let raw = parse_shape_subchunks(&bytes).unwrap();
        let shape = build_shape(&raw, palette, |_| None);
        // The flag reflects that the shape is configured to carry baked lighting, independent
        // of the mismatched buffer being discarded.
        assert!(shape.uses_baked_lighting());
        assert_eq!(shape.get_light(0, 0, 0), VertexLight::default());
    }

    #[test]
    fn unknown_subchunk_ids_are_skipped() {
        let mut bytes = Vec::new();
        chunk::write_chunk(&mut bytes, 12, b"from a newer writer", false).unwrap();
        let mut size_payload = Vec::new();
        raw::write_u16(&mut size_payload, 1).unwrap();
        raw::write_u16(&mut size_payload, 1).unwrap();
        raw::write_u16(&mut size_payload, 1).unwrap();
        chunk::write_chunk(&mut bytes, ChunkId::ShapeSize.as_u8(), &size_payload, false).unwrap();

        let raw = parse_shape_subchunks(&bytes).unwrap();
        assert_eq!((raw.width, raw.height, raw.depth), (1, 1, 1));
    }
}
