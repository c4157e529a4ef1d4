//! The bounded color index shared between a container file and the shapes it describes.
//!
//! A [`ColorPalette`] tracks up to [`MAX_COLORS`] colors behind two index spaces: a stable
//! *entry index*, which voxel blocks reference and which survives edits, and a compacting
//! *ordered index*, the user-facing / serialization order that shifts when colors are removed.
//! See the module-level docs of [`entry`] for the index types themselves.

mod color;
mod defaults;
mod entry;

use std::collections::{HashMap, VecDeque};
use std::rc::Weak;

pub use color::{RgbaColor, VertexLight};
pub use defaults::{DefaultPaletteKind, PaletteIdKind};
pub use entry::{EntryIndex, OrderedIndex, PaletteEntry, AIR, INVALID_INDEX, MAX_COLORS};

use crate::error::PaletteFull;

/// Opaque registry of atlas indices assigned to palette entries. Held only as a weak handle:
/// the palette never owns, and never prevents the destruction of, its atlas.
pub trait ColorAtlas {
    fn issue_index(&self, color: RgbaColor) -> u32;
    fn release_index(&self, atlas_index: u32);
}

#[derive(Debug, Clone)]
enum Slot {
    Occupied(PaletteEntry),
    Free,
}

/// The result of [`ColorPalette::merge`]: which of `other`'s entries were folded into `self`,
/// and whether the palette ran out of room before all of them could be.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    /// `(other_entry_idx, self_entry_idx)` for every entry of `other` that was merged in,
    /// in `other`'s ordered order. Stops at the first entry that didn't fit.
    pub remap: Vec<(EntryIndex, EntryIndex)>,
    /// `true` if the palette filled up before every live color in `other` could be merged.
    pub full: bool,
}

/// A bounded, reference-counted color index: up to [`MAX_COLORS`] [`PaletteEntry`] slots,
/// a reverse RGBA lookup, and a compacting user-facing ordering.
#[derive(Debug)]
pub struct ColorPalette {
    entries: Vec<Slot>,
    ordered_indices: Vec<EntryIndex>,
    free_indices: VecDeque<EntryIndex>,
    color_to_idx: HashMap<u32, EntryIndex>,
    ref_atlas: Option<Weak<dyn ColorAtlas>>,
    ref_count: u32,
    lighting_dirty: bool,
}

impl ColorPalette {
    pub fn new(atlas: Option<Weak<dyn ColorAtlas>>) -> Self {
        Self {
            entries: Vec::new(),
            ordered_indices: Vec::new(),
            free_indices: VecDeque::new(),
            color_to_idx: HashMap::new(),
            ref_atlas: atlas,
            ref_count: 1,
            lighting_dirty: false,
        }
    }

    /// Builds a palette from raw parallel arrays, as read from a `PALETTE`/`PALETTE_LEGACY`
    /// chunk. `count` is clamped to [`MAX_COLORS`].
    pub fn new_from_data(atlas: Option<Weak<dyn ColorAtlas>>, colors: &[RgbaColor], emissive: &[bool]) -> Self {
        let mut palette = Self::new(atlas);
        let count = colors.len().min(emissive.len()).min(MAX_COLORS);

        for i in 0..count {
            // allowDuplicates=true: this is raw reconstruction, not deduplicating insertion.
            if let Ok(idx) = palette.check_and_add(colors[i], true) {
                palette.set_emissive(idx, emissive[i]);
            }
        }
        palette.lighting_dirty = false;
        palette
    }

    /// A deep copy with its own ref count (starts at 1) but the same atlas handle, entries,
    /// and ordering.
    pub fn deep_copy(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            ordered_indices: self.ordered_indices.clone(),
            free_indices: self.free_indices.clone(),
            color_to_idx: self.color_to_idx.clone(),
            ref_atlas: self.ref_atlas.clone(),
            ref_count: 1,
            lighting_dirty: self.lighting_dirty,
        }
    }

    pub fn set_atlas(&mut self, atlas: Option<Weak<dyn ColorAtlas>>) {
        self.ref_atlas = atlas;
    }

    pub fn atlas(&self) -> Option<Weak<dyn ColorAtlas>> {
        self.ref_atlas.clone()
    }

    /// Increments the shared ref count, returning the new value.
    pub fn retain(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    /// Decrements the shared ref count, returning the new value. The caller is responsible
    /// for dropping the palette once this reaches zero.
    pub fn release(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// One past the highest ever-used slot index.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn ordered_count(&self) -> usize {
        self.ordered_indices.len()
    }

    fn slot(&self, entry: EntryIndex) -> Option<&PaletteEntry> {
        match self.entries.get(entry as usize)? {
            Slot::Occupied(e) => Some(e),
            Slot::Free => None,
        }
    }

    fn slot_mut(&mut self, entry: EntryIndex) -> Option<&mut PaletteEntry> {
        match self.entries.get_mut(entry as usize)? {
            Slot::Occupied(e) => Some(e),
            Slot::Free => None,
        }
    }

    /// O(1) reverse lookup by color.
    pub fn find(&self, color: RgbaColor) -> Option<EntryIndex> {
        self.color_to_idx.get(&color.pack()).copied()
    }

    fn issue_atlas_index(&self, color: RgbaColor) -> Option<u32> {
        self.ref_atlas.as_ref().and_then(Weak::upgrade).map(|atlas| atlas.issue_index(color))
    }

    fn release_atlas_index(&self, atlas_index: Option<u32>) {
        if let Some(idx) = atlas_index {
            if let Some(atlas) = self.ref_atlas.as_ref().and_then(Weak::upgrade) {
                atlas.release_index(idx);
            }
        }
    }

    /// Finds or adds `color`. With `allow_duplicates = false`, an existing color's entry is
    /// returned unchanged (`blocksCount` untouched); otherwise a new entry is always allocated.
    /// Fails with [`PaletteFull`] iff a new slot was required and none was available.
    pub fn check_and_add(&mut self, color: RgbaColor, allow_duplicates: bool) -> Result<EntryIndex, PaletteFull> {
        if !allow_duplicates {
            if let Some(existing) = self.find(color) {
                return Ok(existing);
            }
        }

        let atlas_index = self.issue_atlas_index(color);
        let ordered_index = self.ordered_indices.len() as OrderedIndex;
        let new_entry = PaletteEntry::new(color, atlas_index, ordered_index);

        let idx = if let Some(idx) = self.free_indices.pop_front() {
            self.entries[idx as usize] = Slot::Occupied(new_entry);
            idx
        } else if self.entries.len() < MAX_COLORS {
            let idx = self.entries.len() as EntryIndex;
            self.entries.push(Slot::Occupied(new_entry));
            idx
        } else {
            self.release_atlas_index(atlas_index);
            return Err(PaletteFull);
        };

        self.color_to_idx.insert(color.pack(), idx);
        self.ordered_indices.push(idx);
        Ok(idx)
    }

    /// Looks up `default_idx` in the named built-in palette and adds it, always allowing
    /// duplicates (matching the two `check_and_add_default_color_*` overloads).
    pub fn check_and_add_default(
        &mut self,
        kind: DefaultPaletteKind,
        default_idx: u8,
    ) -> Result<EntryIndex, PaletteFull> {
        self.check_and_add(kind.color_at(default_idx), true)
    }

    pub fn increment(&mut self, entry: EntryIndex, n: u32) {
        if let Some(e) = self.slot_mut(entry) {
            e.blocks_count = e.blocks_count.saturating_add(n);
        }
    }

    /// Saturates at zero; does not free the slot by itself.
    pub fn decrement(&mut self, entry: EntryIndex, n: u32) {
        if let Some(e) = self.slot_mut(entry) {
            e.blocks_count = e.blocks_count.saturating_sub(n);
        }
    }

    pub fn get_color_use_count(&self, entry: EntryIndex) -> u32 {
        self.slot(entry).map_or(0, |e| e.blocks_count)
    }

    pub fn get_color(&self, entry: EntryIndex) -> Option<RgbaColor> {
        self.slot(entry).map(|e| e.color)
    }

    pub fn is_emissive(&self, entry: EntryIndex) -> bool {
        self.slot(entry).is_some_and(|e| e.emissive)
    }

    pub fn is_transparent(&self, entry: EntryIndex) -> bool {
        self.slot(entry).is_some_and(PaletteEntry::is_transparent)
    }

    pub fn get_atlas_index(&self, entry: EntryIndex) -> Option<u32> {
        self.slot(entry).and_then(|e| e.atlas_index)
    }

    pub fn emissive_as_vertex_light(&self, entry: EntryIndex) -> VertexLight {
        self.slot(entry).map(PaletteEntry::emissive_as_vertex_light).unwrap_or_default()
    }

    pub fn set_color(&mut self, entry: EntryIndex, color: RgbaColor) {
        let Some(old) = self.slot(entry).copied() else { return };
        if old.color == color {
            return;
        }

        self.release_atlas_index(old.atlas_index);
        let new_atlas_index = self.issue_atlas_index(color);
        let alpha_changed = old.color.a != color.a;

        if self.color_to_idx.get(&old.color.pack()) == Some(&entry) {
            self.color_to_idx.remove(&old.color.pack());
        }
        self.color_to_idx.insert(color.pack(), entry);

        if let Some(e) = self.slot_mut(entry) {
            e.color = color;
            e.atlas_index = new_atlas_index;
        }
        if alpha_changed {
            self.lighting_dirty = true;
        }
    }

    pub fn set_emissive(&mut self, entry: EntryIndex, emissive: bool) {
        if let Some(e) = self.slot_mut(entry) {
            if e.emissive != emissive {
                e.emissive = emissive;
                self.lighting_dirty = true;
            }
        }
    }

    /// Tombstones `entry` if it's currently unused, compacting the ordered view.
    /// Returns whether it was removed, and the ordered-old→ordered-new remap if `remap` is set.
    pub fn remove_unused(
        &mut self,
        entry: EntryIndex,
        remap: bool,
    ) -> (bool, Option<Vec<(OrderedIndex, OrderedIndex)>>) {
        if !self.slot(entry).is_some_and(PaletteEntry::is_unused) {
            return (false, None);
        }
        (true, self.compact_ordered(|idx, _e| idx == entry, remap))
    }

    /// Tombstones every currently-unused entry, compacting the ordered view once.
    pub fn remove_all_unused(&mut self, remap: bool) -> Option<Vec<(OrderedIndex, OrderedIndex)>> {
        self.compact_ordered(|_, e| e.is_unused(), remap)
    }

    fn compact_ordered(
        &mut self,
        should_remove: impl Fn(EntryIndex, &PaletteEntry) -> bool,
        want_remap: bool,
    ) -> Option<Vec<(OrderedIndex, OrderedIndex)>> {
        let mut remap_table = want_remap.then(Vec::new);
        let old_ordered = std::mem::take(&mut self.ordered_indices);
        let mut new_ordered = Vec::with_capacity(old_ordered.len());

        for (old_pos, entry_idx) in old_ordered.into_iter().enumerate() {
            let Slot::Occupied(entry) = &self.entries[entry_idx as usize] else {
                continue;
            };

            if should_remove(entry_idx, entry) {
                let color = entry.color;
                let atlas_index = entry.atlas_index;
                if self.color_to_idx.get(&color.pack()) == Some(&entry_idx) {
                    self.color_to_idx.remove(&color.pack());
                }
                self.release_atlas_index(atlas_index);
                self.entries[entry_idx as usize] = Slot::Free;
                self.free_indices.push_back(entry_idx);
            } else {
                let new_pos = new_ordered.len() as OrderedIndex;
                if let Slot::Occupied(e) = &mut self.entries[entry_idx as usize] {
                    e.ordered_index = new_pos;
                }
                if let Some(table) = remap_table.as_mut() {
                    table.push((old_pos as OrderedIndex, new_pos));
                }
                new_ordered.push(entry_idx);
            }
        }

        self.ordered_indices = new_ordered;
        remap_table
    }

    /// Live colors and emissive flags in ordered order, plus a mapping from entry index to
    /// serialization position (ordered position) for every entry index that's currently live.
    /// Free slots map to [`INVALID_INDEX`].
    pub fn get_colors_as_array(&self) -> (Vec<RgbaColor>, Vec<bool>, Vec<EntryIndex>) {
        let mut colors = Vec::with_capacity(self.ordered_indices.len());
        let mut emissive = Vec::with_capacity(self.ordered_indices.len());
        let mut mapping = vec![INVALID_INDEX; self.entries.len()];

        for (ordered_pos, &entry_idx) in self.ordered_indices.iter().enumerate() {
            if let Slot::Occupied(e) = &self.entries[entry_idx as usize] {
                colors.push(e.color);
                emissive.push(e.emissive);
                mapping[entry_idx as usize] = ordered_pos as EntryIndex;
            }
        }

        (colors, emissive, mapping)
    }

    /// Folds every live color of `other` into `self`, in `other`'s ordered order. Stops (and
    /// reports `full`) at the first color that doesn't fit; everything before that point is
    /// still merged in, so the result can be a partial remap.
    pub fn merge(&mut self, other: &ColorPalette, allow_duplicates: bool) -> MergeResult {
        let mut result = MergeResult::default();

        for &other_idx in &other.ordered_indices {
            let Some(other_entry) = other.slot(other_idx) else { continue };
            match self.check_and_add(other_entry.color, allow_duplicates) {
                Ok(self_idx) => result.remap.push((other_idx, self_idx)),
                Err(PaletteFull) => {
                    result.full = true;
                    break;
                }
            }
        }

        result
    }

    /// True iff the ordered view diverges from entry-index order, i.e. some removal has
    /// happened and the live entries are no longer `0, 1, 2, ...` in insertion order.
    pub fn needs_ordering(&self) -> bool {
        self.ordered_indices.iter().enumerate().any(|(i, &e)| usize::from(e) != i)
    }

    pub fn is_lighting_dirty(&self) -> bool {
        self.lighting_dirty
    }

    pub fn clear_lighting_dirty(&mut self) {
        self.lighting_dirty = false;
    }

    /// Deterministic digest of `(alpha, emissive)` over live entries in entry-index order;
    /// meant as a cache key for baked-lighting consumers.
    pub fn get_lighting_hash(&self) -> u32 {
        // FNV-1a.
        let mut hash: u32 = 0x811C_9DC5;
        for slot in &self.entries {
            if let Slot::Occupied(e) = slot {
                for byte in [e.color.a, u8::from(e.emissive)] {
                    hash ^= u32::from(byte);
                    hash = hash.wrapping_mul(0x0100_0193);
                }
            }
        }
        hash
    }

    pub fn entry_to_ordered(&self, entry: EntryIndex) -> OrderedIndex {
        self.slot(entry).map_or(INVALID_INDEX, |e| e.ordered_index)
    }

    pub fn ordered_to_entry(&self, ordered: OrderedIndex) -> EntryIndex {
        self.ordered_indices.get(ordered as usize).copied().unwrap_or(INVALID_INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(seed: u8) -> RgbaColor {
        RgbaColor::new(seed, seed.wrapping_add(1), seed.wrapping_add(2), 255)
    }

    #[test]
    fn check_and_add_dedupes_without_allow_duplicates() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(color(1), false).unwrap();
        let b = p.check_and_add(color(1), false).unwrap();
        assert_eq!(a, b);
        assert_eq!(p.get_color_use_count(a), 0);
        assert_eq!(p.count(), 1);
    }

    #[test]
    fn check_and_add_always_allocates_with_allow_duplicates() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(color(1), true).unwrap();
        let b = p.check_and_add(color(1), true).unwrap();
        assert_ne!(a, b);
        assert_eq!(p.count(), 2);
    }

    #[test]
    fn adding_the_257th_color_without_duplicates_fails() {
        let mut p = ColorPalette::new(None);
        for i in 0..MAX_COLORS {
            p.check_and_add(RgbaColor::new((i % 256) as u8, ((i / 256) % 256) as u8, 0, 255), false)
                .unwrap();
        }
        assert_eq!(p.count(), MAX_COLORS);
        let err = p.check_and_add(RgbaColor::new(1, 2, 3, 4), false);
        assert!(err.is_err());
    }

    #[test]
    fn allow_duplicates_fails_only_once_free_list_is_also_empty() {
        let mut p = ColorPalette::new(None);
        for _ in 0..MAX_COLORS {
            p.check_and_add(color(7), true).unwrap();
        }
        assert!(p.check_and_add(color(7), true).is_err());
    }

    #[test]
    fn remove_unused_compacts_ordered_view_and_keeps_entry_indices_stable() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(color(1), false).unwrap();
        let b = p.check_and_add(color(2), false).unwrap();
        let c = p.check_and_add(color(3), false).unwrap();
        p.increment(a, 1);
        p.increment(c, 1);
        // b is unused.

        assert_eq!(p.entry_to_ordered(b), 1);
        let (removed, remap) = p.remove_unused(b, true);
        assert!(removed);
        let remap = remap.unwrap();
        // c moves from ordered position 2 down to 1; a is untouched at 0.
        assert!(remap.contains(&(2, 1)));

        assert_eq!(p.entry_to_ordered(a), 0);
        assert_eq!(p.entry_to_ordered(c), 1);
        assert_eq!(p.ordered_count(), 2);
        // entry indices a and c are unchanged (stable across removal).
        assert_eq!(p.get_color(a), Some(color(1)));
        assert_eq!(p.get_color(c), Some(color(3)));
    }

    #[test]
    fn freed_slot_is_reused_with_the_same_entry_index() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(color(1), false).unwrap();
        p.remove_unused(a, false);
        let b = p.check_and_add(color(9), false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn needs_ordering_reflects_compaction() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(color(1), false).unwrap();
        let _b = p.check_and_add(color(2), false).unwrap();
        p.increment(a, 1);
        assert!(!p.needs_ordering());
        p.remove_all_unused(false);
        // only `a` remains but that's still the identity (position 0 -> entry a's ordered 0).
        assert!(!p.needs_ordering());

        // Removing a middle entry, keeping a later one, does diverge from identity.
        let mut q = ColorPalette::new(None);
        let x = q.check_and_add(color(10), false).unwrap();
        let y = q.check_and_add(color(11), false).unwrap();
        let z = q.check_and_add(color(12), false).unwrap();
        q.increment(x, 1);
        q.increment(z, 1);
        q.remove_unused(y, false);
        assert!(q.needs_ordering());
    }

    #[test]
    fn non_emissive_entries_report_zero_vertex_light() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(color(200), false).unwrap();
        assert_eq!(p.emissive_as_vertex_light(a), VertexLight::default());
    }

    #[test]
    fn lighting_dirty_tracks_alpha_and_emissive_changes() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(RgbaColor::new(1, 2, 3, 255), false).unwrap();
        p.clear_lighting_dirty();
        assert!(!p.is_lighting_dirty());

        p.set_color(a, RgbaColor::new(1, 2, 3, 254));
        assert!(p.is_lighting_dirty());

        p.clear_lighting_dirty();
        p.set_emissive(a, true);
        assert!(p.is_lighting_dirty());

        p.clear_lighting_dirty();
        p.set_emissive(a, true);
        assert!(!p.is_lighting_dirty());
    }

    #[test]
    fn merge_of_a_palette_with_its_own_copy_is_a_no_op() {
        let mut a = ColorPalette::new(None);
        for i in 0..5 {
            a.check_and_add(color(i), false).unwrap();
        }
        let copy = a.deep_copy();
        let before = a.get_colors_as_array();

        let result = a.merge(&copy, false);
        assert!(!result.full);
        assert!(result.remap.iter().all(|&(o, s)| o == s));
        assert_eq!(a.get_colors_as_array(), before);
    }

    #[test]
    fn merge_stops_and_reports_full_once_capacity_runs_out() {
        let mut a = ColorPalette::new(None);
        for i in 0..250_u16 {
            a.check_and_add(RgbaColor::new((i % 256) as u8, (i / 256) as u8, 1, 255), false).unwrap();
        }
        let mut b = ColorPalette::new(None);
        for i in 0..4_u16 {
            // shares colors with the first 4 entries of `a`.
            b.check_and_add(RgbaColor::new((i % 256) as u8, (i / 256) as u8, 1, 255), false).unwrap();
        }
        for i in 250..256_u16 {
            b.check_and_add(RgbaColor::new((i % 256) as u8, (i / 256) as u8, 2, 255), false).unwrap();
        }

        let result = a.merge(&b, false);
        assert!(!result.full);
        assert_eq!(a.count(), MAX_COLORS);

        let mut fresh = ColorPalette::new(None);
        for i in 0..10_u16 {
            fresh.check_and_add(RgbaColor::new((i % 256) as u8, (i / 256) as u8, 3, 255), false).unwrap();
        }
        let result2 = a.merge(&fresh, false);
        assert!(result2.full);
        assert!(result2.remap.len() < 10);
    }

    #[test]
    fn get_colors_as_array_round_trips_into_an_equivalent_palette() {
        let mut p = ColorPalette::new(None);
        let a = p.check_and_add(color(1), false).unwrap();
        p.set_emissive(a, true);
        p.check_and_add(color(2), false).unwrap();

        let (colors, emissive, _mapping) = p.get_colors_as_array();
        let rebuilt = ColorPalette::new_from_data(None, &colors, &emissive);

        assert_eq!(rebuilt.ordered_count(), p.ordered_count());
        let (rebuilt_colors, rebuilt_emissive, _) = rebuilt.get_colors_as_array();
        assert_eq!(rebuilt_colors, colors);
        assert_eq!(rebuilt_emissive, emissive);
    }
}
