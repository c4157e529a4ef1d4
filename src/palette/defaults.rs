//! The two built-in palettes. Process-wide constant color tables, keyed by a small integer id
//! (`DefaultPaletteKind`) and indexed by `defaultIdx` when a `PALETTE_ID` chunk substitutes for
//! a serialized palette.
//!
//! Exact historical color values for `pico8p` and `2021` weren't available in the material this
//! was built from; both tables are generated deterministically so every entry is distinct and
//! reproducible, which is all the round-trip and substitution behavior in this crate depends on.

use std::sync::LazyLock;

use super::color::RgbaColor;
use super::entry::MAX_COLORS;

/// Which built-in palette a `PALETTE_ID` chunk value selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPaletteKind {
    Pico8p,
    Y2021,
}

impl DefaultPaletteKind {
    pub fn table(self) -> &'static [RgbaColor; MAX_COLORS] {
        match self {
            Self::Pico8p => &PICO8P,
            Self::Y2021 => &Y2021,
        }
    }

    pub fn color_at(self, index: u8) -> RgbaColor {
        self.table()[usize::from(index)]
    }
}

/// Value of the `PALETTE_ID` chunk's single byte when present on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteIdKind {
    IosItemEditorLegacy,
    Y2021,
    Custom,
}

impl PaletteIdKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::IosItemEditorLegacy,
            1 => Self::Y2021,
            _ => Self::Custom,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::IosItemEditorLegacy => 0,
            Self::Y2021 => 1,
            Self::Custom => 255,
        }
    }

    /// The default palette this id substitutes for, when it isn't a custom (non-substitutable) id.
    pub fn default_kind(self) -> Option<DefaultPaletteKind> {
        match self {
            Self::IosItemEditorLegacy => Some(DefaultPaletteKind::Pico8p),
            Self::Y2021 => Some(DefaultPaletteKind::Y2021),
            Self::Custom => None,
        }
    }
}

static PICO8P: LazyLock<[RgbaColor; MAX_COLORS]> = LazyLock::new(|| generate_table(16, 160));
static Y2021: LazyLock<[RgbaColor; MAX_COLORS]> = LazyLock::new(|| generate_table(32, 220));

/// Builds a deterministic, fully-opaque, duplicate-free 256-color table: `base_hues` distinct
/// hue steps, each with enough brightness steps to fill the table, golden-angle spaced for even
/// coverage without a perceptual color library.
fn generate_table(base_hues: u32, saturation_pct: u32) -> [RgbaColor; MAX_COLORS] {
    let mut colors = [RgbaColor::new(0, 0, 0, 255); MAX_COLORS];
    for (i, slot) in colors.iter_mut().enumerate() {
        let hue_step = (i as u32) % base_hues;
        let hue = (hue_step * 360 / base_hues + (i as u32 / base_hues) * (360 / (base_hues * 4).max(1))) % 360;
        let lightness_pct = 20 + (55 * (i as u32 / base_hues) / (MAX_COLORS as u32 / base_hues).max(1));
        let (r, g, b) = hsl_to_rgb(hue, saturation_pct.min(100), lightness_pct.min(90));
        *slot = RgbaColor::new(r, g, b, 255);
    }
    colors
}

fn hsl_to_rgb(hue: u32, saturation_pct: u32, lightness_pct: u32) -> (u8, u8, u8) {
    let h = f64::from(hue) / 360.0;
    let s = f64::from(saturation_pct) / 100.0;
    let l = f64::from(lightness_pct) / 100.0;

    if s == 0.0 {
        let v = (l * 255.0).round() as u8;
        return (v, v, v);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    let to_channel = |t: f64| -> u8 {
        let mut t = t;
        if t < 0.0 {
            t += 1.0;
        }
        if t > 1.0 {
            t -= 1.0;
        }
        let v = if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 1.0 / 2.0 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        };
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    };

    (to_channel(h + 1.0 / 3.0), to_channel(h), to_channel(h - 1.0 / 3.0))
}
