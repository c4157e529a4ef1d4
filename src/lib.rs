//! Codec for the chunk-based "v6" container format used to persist a voxel shape, its color
//! palette, an optional preview image, and baked per-voxel lighting.
//!
//! [`container`] is the entry point: [`container::load`] and [`container::save`] read and write
//! a whole file. [`palette`] and [`shape`] are usable on their own for anything that only needs
//! the in-memory runtime (e.g. an editor holding a [`palette::ColorPalette`] shared between
//! several [`shape::Shape`]s).

mod compression;
pub mod container;
pub mod error;
pub mod palette;

#[expect(
    unreachable_pub,
    reason = "nothing in here is reachable from outside the crate, pub is only needed for sibling modules"
)]
mod raw;

mod chunk;
pub mod shape;

pub use self::chunk::ChunkId;
pub use self::container::{get_preview_data, load, save, save_to};
pub use self::error::{ContainerError, Result};
