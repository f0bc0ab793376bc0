//! Big-endian multi-byte I/O helpers, generalized from the original's
//! `FILE *`-based `read16`/`write16`/... family to any `Read`/`Write`.
//! Each call either fully succeeds or returns an `io::Error`; there is no
//! partial-value result on short reads.

use std::io::{self, Read, Write};

pub fn read16<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub fn read24<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 3];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
}

pub fn read32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn read64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

pub fn write16<W: Write>(w: &mut W, val: u16) -> io::Result<()> {
    w.write_all(&val.to_be_bytes())
}

pub fn write24<W: Write>(w: &mut W, val: u32) -> io::Result<()> {
    let b = val.to_be_bytes();
    w.write_all(&b[1..4])
}

pub fn write32<W: Write>(w: &mut W, val: u32) -> io::Result<()> {
    w.write_all(&val.to_be_bytes())
}

pub fn write64<W: Write>(w: &mut W, val: u64) -> io::Result<()> {
    w.write_all(&val.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips() {
        let mut buf = Vec::new();
        write16(&mut buf, 0x1234).unwrap();
        write24(&mut buf, 0x00AB_CDEF).unwrap();
        write32(&mut buf, 0xDEAD_BEEF).unwrap();
        write64(&mut buf, 0x0102_0304_0506_0708).unwrap();

        let mut c = Cursor::new(buf);
        assert_eq!(read16(&mut c).unwrap(), 0x1234);
        assert_eq!(read24(&mut c).unwrap(), 0x00AB_CDEF);
        assert_eq!(read32(&mut c).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read64(&mut c).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn short_read_errors() {
        let mut c = Cursor::new(vec![0u8; 1]);
        assert!(read16(&mut c).is_err());
    }
}
