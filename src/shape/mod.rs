//! A minimal concrete `Shape`: a 3D block grid, named point/point-rotation attributes, and
//! optional baked lighting, all tied to a reference-counted [`ColorPalette`].
//!
//! The real voxel grid this format serializes is an octree, kept opaque to this crate; what's
//! implemented here is just enough of its external surface (§6 of the interface this codec
//! speaks) to drive the chunk codec and to round-trip in tests. `Shape::new_octree` and
//! `Shape::new_growable` share this same dense backing store — the sparsity strategy itself is
//! out of scope here, only the grid contract the serializer depends on.

mod subchunks;

pub use subchunks::{build_shape, parse_shape_subchunks, write_shape_chunk, RawShapeChunk};

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::palette::{ColorPalette, EntryIndex, VertexLight};

/// Inclusive/exclusive 3D bounding box of a shape, in whatever coordinate space the caller's
/// points and point rotations are expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: (f32, f32, f32),
    pub max: (f32, f32, f32),
}

impl Aabb {
    pub const fn new(min: (f32, f32, f32), max: (f32, f32, f32)) -> Self {
        Self { min, max }
    }
}

/// A single voxel: either air, or a solid block referencing a live palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Air,
    Solid(EntryIndex),
}

/// A named float3 attribute (a point of interest or a point rotation).
pub type NamedPoint = (String, (f32, f32, f32));

#[derive(Debug)]
pub struct Shape {
    aabb: Aabb,
    width: u16,
    height: u16,
    depth: u16,
    blocks: Vec<Option<EntryIndex>>,
    points: IndexMap<String, (f32, f32, f32)>,
    point_rotations: IndexMap<String, (f32, f32, f32)>,
    /// Whether this shape is configured to carry baked lighting at all. Independent of whether
    /// `lighting` is currently populated: a shape can want baked lighting without having valid
    /// data yet (e.g. right after a size-mismatched load), and vice versa is nonsensical but not
    /// enforced here.
    bakes_lighting: bool,
    lighting: Option<Vec<VertexLight>>,
    /// Whether `set_block_with_color` is allowed to grow the grid to fit an out-of-range
    /// coordinate (the "growable"/"octree" flavors) or must reject it (the "fixed-size" flavor).
    growable: bool,
    palette: Rc<RefCell<ColorPalette>>,
}

impl Shape {
    /// A dense grid preallocated to exactly `width * height * depth` voxels, all air.
    pub fn new_fixed(width: u16, height: u16, depth: u16, palette: Rc<RefCell<ColorPalette>>) -> Self {
        Self::new(width, height, depth, false, palette)
    }

    /// Starts empty (0x0x0) and grows to fit whichever voxel is set farthest from the origin.
    /// Stands in for the original format's unbounded octree and growable flavors alike.
    pub fn new_growable(palette: Rc<RefCell<ColorPalette>>) -> Self {
        Self::new(0, 0, 0, true, palette)
    }

    /// Alias of [`Self::new_growable`]; the octree's sparse storage strategy is out of scope
    /// for this crate, which only needs the dense block-grid contract the codec round-trips.
    pub fn new_octree(palette: Rc<RefCell<ColorPalette>>) -> Self {
        Self::new_growable(palette)
    }

    fn new(width: u16, height: u16, depth: u16, growable: bool, palette: Rc<RefCell<ColorPalette>>) -> Self {
        palette.borrow_mut().retain();
        let len = usize::from(width) * usize::from(height) * usize::from(depth);
        Self {
            aabb: Aabb::new((0.0, 0.0, 0.0), (f32::from(width), f32::from(height), f32::from(depth))),
            width,
            height,
            depth,
            blocks: vec![None; len],
            points: IndexMap::new(),
            point_rotations: IndexMap::new(),
            bakes_lighting: false,
            lighting: None,
            growable,
            palette,
        }
    }

    pub fn get_aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn dimensions(&self) -> (u16, u16, u16) {
        (self.width, self.height, self.depth)
    }

    /// Flat index for `(x, y, z)`: z varies fastest, then y, then x — the "x-major" order this
    /// format's block and lighting buffers are written in.
    #[inline]
    fn index(&self, x: u16, y: u16, z: u16) -> usize {
        usize::from(z) + usize::from(self.depth) * (usize::from(y) + usize::from(self.height) * usize::from(x))
    }

    pub fn get_block(&self, x: u16, y: u16, z: u16) -> Block {
        if x >= self.width || y >= self.height || z >= self.depth {
            return Block::Air;
        }
        match self.blocks[self.index(x, y, z)] {
            Some(entry) => Block::Solid(entry),
            None => Block::Air,
        }
    }

    /// Sets the voxel at `(x, y, z)` to reference palette entry `entry`, incrementing its
    /// `blocksCount` (and decrementing whatever block previously occupied that cell, if any).
    /// For a non-growable shape, a coordinate outside the current grid is silently ignored.
    pub fn set_block_with_color(&mut self, entry: EntryIndex, x: u16, y: u16, z: u16) {
        if x >= self.width || y >= self.height || z >= self.depth {
            if !self.growable {
                return;
            }
            self.grow_to_fit(x, y, z);
        }

        let idx = self.index(x, y, z);
        if let Some(old) = self.blocks[idx] {
            self.palette.borrow_mut().decrement(old, 1);
        }
        self.blocks[idx] = Some(entry);
        self.palette.borrow_mut().increment(entry, 1);
    }

    fn grow_to_fit(&mut self, x: u16, y: u16, z: u16) {
        let new_width = self.width.max(x + 1);
        let new_height = self.height.max(y + 1);
        let new_depth = self.depth.max(z + 1);
        if new_width == self.width && new_height == self.height && new_depth == self.depth {
            return;
        }

        let mut new_blocks =
            vec![None; usize::from(new_width) * usize::from(new_height) * usize::from(new_depth)];
        for old_x in 0..self.width {
            for old_y in 0..self.height {
                for old_z in 0..self.depth {
                    let old_idx = self.index(old_x, old_y, old_z);
                    let new_idx = usize::from(old_z)
                        + usize::from(new_depth) * (usize::from(old_y) + usize::from(new_height) * usize::from(old_x));
                    new_blocks[new_idx] = self.blocks[old_idx];
                }
            }
        }

        self.width = new_width;
        self.height = new_height;
        self.depth = new_depth;
        self.blocks = new_blocks;
        self.aabb.max = (f32::from(new_width), f32::from(new_height), f32::from(new_depth));
    }

    pub fn iter_points(&self) -> impl Iterator<Item = (&str, (f32, f32, f32))> {
        self.points.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn iter_point_rotations(&self) -> impl Iterator<Item = (&str, (f32, f32, f32))> {
        self.point_rotations.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Names longer than 255 bytes are truncated (at a UTF-8 boundary) on write, not on insert.
    pub fn set_point(&mut self, name: impl Into<String>, position: (f32, f32, f32)) {
        self.points.insert(name.into(), position);
    }

    pub fn set_point_rotation(&mut self, name: impl Into<String>, rotation: (f32, f32, f32)) {
        self.point_rotations.insert(name.into(), rotation);
    }

    /// Whether this shape is configured to carry baked lighting. Set explicitly via
    /// [`Self::set_uses_baked_lighting`] (or implicitly the first time [`Self::set_lighting_data`]
    /// succeeds); not simply "is the buffer currently populated".
    pub fn uses_baked_lighting(&self) -> bool {
        self.bakes_lighting
    }

    pub fn set_uses_baked_lighting(&mut self, value: bool) {
        self.bakes_lighting = value;
    }

    pub fn get_light(&self, x: u16, y: u16, z: u16) -> VertexLight {
        if x >= self.width || y >= self.height || z >= self.depth {
            return VertexLight::default();
        }
        self.lighting.as_ref().map_or_else(VertexLight::default, |buf| buf[self.index(x, y, z)])
    }

    /// Accepts a baked-lighting buffer iff its length matches `width * height * depth`, in which
    /// case it also marks the shape as using baked lighting. Otherwise the buffer is rejected and
    /// left exactly as it was (the `bakes_lighting` flag untouched) — callers that already know a
    /// buffer is wrong-sized log a warning and move on rather than treat it as fatal.
    pub fn set_lighting_data(&mut self, buf: Vec<VertexLight>) -> bool {
        let expected = usize::from(self.width) * usize::from(self.height) * usize::from(self.depth);
        if buf.len() != expected {
            return false;
        }
        self.lighting = Some(buf);
        self.bakes_lighting = true;
        true
    }

    pub fn palette(&self) -> &Rc<RefCell<ColorPalette>> {
        &self.palette
    }

    /// Swaps in a new palette, retaining it and releasing the old one. Mirrors the explicit
    /// retain/release bookkeeping `ColorPalette` exposes; actual deallocation still happens
    /// through `Rc`'s own strong count once every referent has released and dropped it.
    pub fn set_palette(&mut self, palette: Rc<RefCell<ColorPalette>>) {
        palette.borrow_mut().retain();
        self.palette.borrow_mut().release();
        self.palette = palette;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::RgbaColor;

    fn palette_with_one_color() -> (Rc<RefCell<ColorPalette>>, EntryIndex) {
        let mut p = ColorPalette::new(None);
        let idx = p.check_and_add(RgbaColor::new(255, 0, 0, 255), false).unwrap();
        (Rc::new(RefCell::new(p)), idx)
    }

    #[test]
    fn fixed_shape_ignores_out_of_range_sets() {
        let (palette, entry) = palette_with_one_color();
        let mut shape = Shape::new_fixed(2, 2, 2, palette);
        shape.set_block_with_color(entry, 5, 5, 5);
        assert_eq!(shape.get_block(5, 5, 5), Block::Air);
    }

    #[test]
    fn growable_shape_expands_to_fit() {
        let (palette, entry) = palette_with_one_color();
        let mut shape = Shape::new_growable(palette.clone());
        shape.set_block_with_color(entry, 3, 1, 2);
        assert_eq!(shape.dimensions(), (4, 2, 3));
        assert_eq!(shape.get_block(3, 1, 2), Block::Solid(entry));
        assert_eq!(palette.borrow().get_color_use_count(entry), 1);
    }

    #[test]
    fn set_block_with_color_updates_palette_refcounts() {
        let (palette, entry) = palette_with_one_color();
        let mut shape = Shape::new_fixed(1, 1, 1, palette.clone());
        shape.set_block_with_color(entry, 0, 0, 0);
        assert_eq!(palette.borrow().get_color_use_count(entry), 1);
        shape.set_block_with_color(entry, 0, 0, 0);
        // Same cell, same color: still incremented again (matches the palette's own
        // increment/decrement semantics, which don't dedupe repeated sets of the same voxel).
        assert_eq!(palette.borrow().get_color_use_count(entry), 2);
    }
}
