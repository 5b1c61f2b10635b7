//! Little endian readers and writers
use std::io::{self, Read};
use time::OffsetDateTime;

/// Little endian `u16` reader
#[inline]
pub fn rdu16le<R: Read>(r: &mut R) -> Result<u16, io::Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Little endian `u32` reader
#[inline]
pub fn rdu32le<R: Read>(r: &mut R) -> Result<u32, io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Little endian `u64` reader
#[inline]
pub fn rdu64le<R: Read>(r: &mut R) -> Result<u64, io::Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads a little endian `u16` at `offset` (panics if out of bounds)
#[inline]
pub fn le_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Reads a little endian `u32` at `offset` (panics if out of bounds)
#[inline]
pub fn le_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Reads a little endian `u64` at `offset` (panics if out of bounds)
#[inline]
pub fn le_u64(buf: &[u8], offset: usize) -> u64 {
    let mut v = [0u8; 8];
    v.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(v)
}

/// Stores a little endian `u16` at `offset` (panics if out of bounds)
#[inline]
pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Stores a little endian `u32` at `offset` (panics if out of bounds)
#[inline]
pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Stores a little endian `u64` at `offset` (panics if out of bounds)
#[inline]
pub fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Encodes a string as UTF-16LE without terminator
pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decodes a NUL terminated (or unterminated) UTF-16LE buffer, replacing invalid sequences
pub fn from_utf16le(buf: &[u8]) -> String {
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Rounds `value` up to the next multiple of `unit` (`unit` > 0)
#[inline]
pub fn round_up(value: usize, unit: usize) -> usize {
    value.div_ceil(unit) * unit
}

const FILETIME_UNIX_EPOCH: i128 = 116444736000000000;

/// Converts a Windows FILETIME (100ns ticks since 1601-01-01) into a date
///
/// A zero FILETIME means "not set" and yields [None]
pub fn filetime_to_datetime(ftime: u64) -> Option<OffsetDateTime> {
    if ftime == 0 {
        return None;
    }
    let ticks = i128::from(ftime) - FILETIME_UNIX_EPOCH;
    OffsetDateTime::from_unix_timestamp_nanos(ticks * 100).ok()
}

/// Converts a date into a Windows FILETIME; [None] and pre-1601 dates yield zero
pub fn datetime_to_filetime(t: Option<OffsetDateTime>) -> u64 {
    t.and_then(|t| u64::try_from(t.unix_timestamp_nanos() / 100 + FILETIME_UNIX_EPOCH).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn readers() -> Result<(), io::Error> {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];
        let mut r = &data[..];
        assert_eq!(rdu16le(&mut r)?, 0x0201);
        assert_eq!(rdu32le(&mut r)?, 0x06050403);
        assert_eq!(rdu64le(&mut r)?, 0x0e0d0c0b0a090807);
        assert!(rdu16le(&mut r).is_err());
        assert_eq!(le_u16(&data, 1), 0x0302);
        assert_eq!(le_u32(&data, 2), 0x06050403);
        assert_eq!(le_u64(&data, 0), 0x0807060504030201);
        Ok(())
    }

    #[test]
    fn writers() {
        let mut buf = [0u8; 14];
        put_u16(&mut buf, 0, 0xfffe);
        put_u32(&mut buf, 2, 0xdeadbeef);
        put_u64(&mut buf, 6, 12810);
        assert_eq!(&buf[0..2], &[0xfe, 0xff]);
        assert_eq!(le_u32(&buf, 2), 0xdeadbeef);
        assert_eq!(le_u64(&buf, 6), 12810);
    }

    #[test]
    fn utf16() {
        let enc = utf16le("Root Entry");
        assert_eq!(enc.len(), 20);
        assert_eq!(&enc[0..4], &[b'R', 0, b'o', 0]);
        let mut terminated = enc.clone();
        terminated.extend_from_slice(&[0, 0, b'x', 0]);
        assert_eq!(from_utf16le(&terminated), "Root Entry");
        assert_eq!(from_utf16le(&enc), "Root Entry");
    }

    #[test]
    fn rounding() {
        assert_eq!(round_up(0, 16), 0);
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_up(4097, 4096), 8192);
    }

    #[test]
    fn filetime() {
        assert_eq!(filetime_to_datetime(0), None);
        let t = filetime_to_datetime(FILETIME_UNIX_EPOCH as u64).unwrap();
        assert_eq!(t.unix_timestamp(), 0);
        // 2024-01-01T00:00:00Z
        let ft = 133485408000000000u64;
        let t = filetime_to_datetime(ft);
        assert_eq!(t.map(|t| t.unix_timestamp()), Some(1704067200));
        assert_eq!(datetime_to_filetime(t), ft);
        assert_eq!(datetime_to_filetime(None), 0);
    }
}
