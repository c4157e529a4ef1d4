//! Little-endian integer and raw-byte primitives shared by the chunk codec and sub-chunk
//! readers. Everything in the v6 format is little-endian, regardless of host endianness.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};

#[inline]
pub(crate) fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    r.read_u8()
}

#[inline]
pub(crate) fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    r.read_u16::<LittleEndian>()
}

#[inline]
pub(crate) fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<LittleEndian>()
}

#[inline]
pub(crate) fn read_f32<R: Read>(r: &mut R) -> io::Result<f32> {
    r.read_f32::<LittleEndian>()
}

#[inline]
pub(crate) fn read_bytes<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0_u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Advances past `len` bytes without allocating, erroring on short reads.
#[inline]
pub(crate) fn skip<R: Read>(r: &mut R, len: u64) -> io::Result<()> {
    let copied = io::copy(&mut r.by_ref().take(len), &mut io::sink())?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended while skipping a chunk body",
        ));
    }
    Ok(())
}

#[inline]
pub(crate) fn write_u8<W: Write>(w: &mut W, value: u8) -> io::Result<()> {
    w.write_u8(value)
}

#[inline]
pub(crate) fn write_u16<W: Write>(w: &mut W, value: u16) -> io::Result<()> {
    w.write_u16::<LittleEndian>(value)
}

#[inline]
pub(crate) fn write_u32<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(value)
}

#[inline]
pub(crate) fn write_f32<W: Write>(w: &mut W, value: f32) -> io::Result<()> {
    w.write_f32::<LittleEndian>(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_integers() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 7).unwrap();
        write_u16(&mut buf, 1234).unwrap();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        write_f32(&mut buf, 1.5).unwrap();

        let mut cursor = io::Cursor::new(buf);
        assert_eq!(read_u8(&mut cursor).unwrap(), 7);
        assert_eq!(read_u16(&mut cursor).unwrap(), 1234);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_f32(&mut cursor).unwrap(), 1.5);
    }

    #[test]
    fn skip_errors_on_short_stream() {
        let mut cursor = io::Cursor::new(vec![1_u8, 2, 3]);
        assert!(skip(&mut cursor, 10).is_err());
    }
}
