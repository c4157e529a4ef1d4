use std::io;

use thiserror::Error;

/// Errors surfaced while reading or writing a v6 container.
///
/// These map onto the five error kinds used throughout the format: a failed
/// read/write, a malformed or out-of-range on-disk value, a failed
/// compress/decompress call, a full color palette, and an internal
/// consistency problem (e.g. a baked-lighting buffer of the wrong size).
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The underlying reader or writer failed, or ended before enough bytes were available.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The magic bytes at the start of the stream didn't match.
    #[error("bad magic bytes at start of stream")]
    BadMagic,

    /// An algorithm id outside the known set (`NONE`, `ZIP`) was encountered.
    #[error("unknown compression algorithm id {0}")]
    UnknownAlgorithm(u8),

    /// A chunk declared a zero-length body where the codec requires a positive length.
    #[error("chunk {chunk_id} declared a zero-length body")]
    EmptyChunk { chunk_id: u8 },

    /// zlib failed to compress or decompress a chunk payload.
    #[error("zlib {0} failed")]
    Compression(&'static str),

    /// A new, non-duplicate color was required but the palette already holds `MAX_COLORS` entries.
    #[error("color palette is full")]
    Capacity,

    /// A value on disk didn't line up with the shape it described (e.g. a baked-lighting
    /// buffer whose length isn't `width * height * depth * 2`).
    #[error("{0}")]
    Consistency(&'static str),
}

/// The color palette has no more room for a new, non-duplicate entry.
///
/// Kept distinct from [`ContainerError`] because `check_and_add` and friends are meant to be
/// called in tight loops (once per voxel) without the cost of formatting a full error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("color palette is full")]
pub struct PaletteFull;

impl From<PaletteFull> for ContainerError {
    fn from(_: PaletteFull) -> Self {
        Self::Capacity
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
