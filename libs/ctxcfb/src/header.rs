//! The 512 byte Compound File header
use crate::bytes::*;
use crate::error::{Error, Result};
use crate::sniff::{sniff, CFB_MAGIC};
use crate::{Version, DIFSECT, ENDOFCHAIN, FATSECT, FREESECT, MAXREGSID, MINI_STREAM_CUTOFF};
use tracing::warn;

pub(crate) const HEADER_SIZE: usize = 512;
pub(crate) const HEADER_DIFAT_ENTRIES: usize = 109;
const MINOR_VERSION: u16 = 0x003e;
const BYTE_ORDER: u16 = 0xfffe;
const MINI_SECTOR_SHIFT: u16 = 6;

#[derive(Debug, Clone)]
pub(crate) struct Header {
    pub version: Version,
    pub dir_sectors: u32,
    pub fat_sectors: u32,
    pub first_dir_sector: u32,
    pub first_minifat_sector: u32,
    pub minifat_sectors: u32,
    pub first_difat_sector: u32,
    pub difat_sectors: u32,
    pub difat: Vec<u32>,
}

impl Header {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            dir_sectors: 0,
            fat_sectors: 0,
            first_dir_sector: ENDOFCHAIN,
            first_minifat_sector: ENDOFCHAIN,
            minifat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            difat_sectors: 0,
            difat: Vec::new(),
        }
    }

    /// Parses and sanity checks the header
    ///
    /// Non fatal deviations are appended to `anomalies`; the DIFAT array only holds the
    /// entries preceding the first `FREESECT`
    pub fn parse(buf: &[u8], anomalies: &mut Vec<String>) -> Result<Self> {
        if !buf.starts_with(&CFB_MAGIC) {
            return Err(Error::NotCompoundFile(sniff(buf)));
        }
        if buf.len() < HEADER_SIZE {
            return Err(Error::Format(format!(
                "truncated header ({} bytes)",
                buf.len()
            )));
        }
        let mut f = &buf[8..HEADER_SIZE];
        let mut clsid = [0u8; 16];
        std::io::Read::read_exact(&mut f, &mut clsid)?;
        if clsid != [0u8; 16] {
            anomalies.push("Header CLSID is not NULL".to_string());
        }
        let minor_version = rdu16le(&mut f)?;
        if minor_version != MINOR_VERSION {
            anomalies.push(format!(
                "Minor version set to {minor_version:04x} instead of {MINOR_VERSION:04x}"
            ));
        }
        let major_version = rdu16le(&mut f)?;
        let byte_order = rdu16le(&mut f)?;
        if byte_order != BYTE_ORDER {
            anomalies.push(format!(
                "Byte order set to {byte_order:04x} instead of {BYTE_ORDER:04x}"
            ));
        }
        let sector_shift = rdu16le(&mut f)?;
        let version = match sector_shift {
            9 => Version::V3,
            12 => Version::V4,
            v => {
                return Err(Error::Format(format!("invalid sector shift {v}")));
            }
        };
        if major_version != version.major() {
            anomalies.push(format!(
                "Major version {major_version} does not match the sector size of {} bytes",
                version.sector_size()
            ));
        }
        let mini_sector_shift = rdu16le(&mut f)?;
        if mini_sector_shift != MINI_SECTOR_SHIFT {
            return Err(Error::Format(format!(
                "invalid mini sector shift {mini_sector_shift}"
            )));
        }
        let mut reserved = [0u8; 6];
        std::io::Read::read_exact(&mut f, &mut reserved)?;
        if reserved != [0u8; 6] {
            anomalies.push("Reserved area is not zeroed".to_string());
        }
        let mut dir_sectors = rdu32le(&mut f)?;
        if version == Version::V3 && dir_sectors != 0 {
            anomalies.push(format!(
                "Number of directory sectors should be 0 for major version 3 but is {dir_sectors}"
            ));
            dir_sectors = 0;
        }
        let fat_sectors = rdu32le(&mut f)?;
        let first_dir_sector = rdu32le(&mut f)?;
        if first_dir_sector > MAXREGSID {
            return Err(Error::Format(format!(
                "directory starts at special sector 0x{first_dir_sector:x}"
            )));
        }
        let transaction = rdu32le(&mut f)?;
        if transaction != 0 {
            anomalies.push(format!("Transaction signature is {transaction:x}"));
        }
        let cutoff = rdu32le(&mut f)?;
        if u64::from(cutoff) != MINI_STREAM_CUTOFF {
            anomalies.push(format!(
                "Mini Stream Cutoff Size should be {MINI_STREAM_CUTOFF:x} but is {cutoff:x}"
            ));
        }
        let first_minifat_sector = rdu32le(&mut f)?;
        let minifat_sectors = rdu32le(&mut f)?;
        let first_difat_sector = rdu32le(&mut f)?;
        let difat_sectors = rdu32le(&mut f)?;
        let mut difat: Vec<u32> = Vec::with_capacity(HEADER_DIFAT_ENTRIES);
        for _ in 0..HEADER_DIFAT_ENTRIES {
            match rdu32le(&mut f)? {
                FREESECT => break,
                v @ (DIFSECT | FATSECT | ENDOFCHAIN) => {
                    return Err(Error::Format(format!(
                        "found header DIFAT entry with special value 0x{v:x}"
                    )));
                }
                v => difat.push(v),
            }
        }
        if difat.len() < HEADER_DIFAT_ENTRIES && difat_sectors > 0 {
            warn!("Header DIFAT is not full but {difat_sectors} DIFAT sectors are declared");
            anomalies.push(format!("Found {difat_sectors} spurious DIFAT sector(s)"));
        }
        Ok(Self {
            version,
            dir_sectors,
            fat_sectors,
            first_dir_sector,
            first_minifat_sector,
            minifat_sectors,
            first_difat_sector,
            difat_sectors,
            difat,
        })
    }

    /// Serializes the header; reserved fields are zeroed
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&CFB_MAGIC);
        put_u16(&mut buf, 0x18, MINOR_VERSION);
        put_u16(&mut buf, 0x1a, self.version.major());
        put_u16(&mut buf, 0x1c, BYTE_ORDER);
        put_u16(&mut buf, 0x1e, self.version.sector_shift());
        put_u16(&mut buf, 0x20, MINI_SECTOR_SHIFT);
        if self.version == Version::V4 {
            put_u32(&mut buf, 0x28, self.dir_sectors);
        }
        put_u32(&mut buf, 0x2c, self.fat_sectors);
        put_u32(&mut buf, 0x30, self.first_dir_sector);
        put_u32(&mut buf, 0x38, MINI_STREAM_CUTOFF as u32);
        put_u32(&mut buf, 0x3c, self.first_minifat_sector);
        put_u32(&mut buf, 0x40, self.minifat_sectors);
        put_u32(&mut buf, 0x44, self.first_difat_sector);
        put_u32(&mut buf, 0x48, self.difat_sectors);
        for i in 0..HEADER_DIFAT_ENTRIES {
            put_u32(
                &mut buf,
                0x4c + i * 4,
                self.difat.get(i).copied().unwrap_or(FREESECT),
            );
        }
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Header {
        let mut h = Header::new(Version::V3);
        h.fat_sectors = 1;
        h.first_dir_sector = 1;
        h.difat = vec![0];
        h
    }

    #[test]
    fn layout() {
        let buf = sample().to_bytes();
        assert_eq!(&buf[0..8], &CFB_MAGIC);
        assert_eq!(le_u16(&buf, 0x18), 0x3e);
        assert_eq!(le_u16(&buf, 0x1a), 3);
        assert_eq!(le_u16(&buf, 0x1c), 0xfffe);
        assert_eq!(le_u16(&buf, 0x1e), 9);
        assert_eq!(le_u16(&buf, 0x20), 6);
        assert_eq!(le_u32(&buf, 0x38), 0x1000);
        assert_eq!(le_u32(&buf, 0x3c), ENDOFCHAIN);
        assert_eq!(le_u32(&buf, 0x44), ENDOFCHAIN);
        assert_eq!(le_u32(&buf, 0x4c), 0);
        assert_eq!(le_u32(&buf, 0x50), FREESECT);
    }

    #[test]
    fn parse_back() -> Result<()> {
        let mut anomalies = Vec::new();
        let h = Header::parse(&sample().to_bytes(), &mut anomalies)?;
        assert!(anomalies.is_empty());
        assert_eq!(h.version, Version::V3);
        assert_eq!(h.difat, vec![0]);
        assert_eq!(h.first_dir_sector, 1);
        Ok(())
    }

    #[test]
    fn anomalies_are_collected() -> Result<()> {
        let mut buf = sample().to_bytes();
        buf[8] = 1; // CLSID
        put_u16(&mut buf, 0x18, 0x3b);
        put_u16(&mut buf, 0x1a, 4);
        buf[0x22] = 1; // reserved
        put_u32(&mut buf, 0x38, 0x800);
        let mut anomalies = Vec::new();
        let h = Header::parse(&buf, &mut anomalies)?;
        assert_eq!(anomalies.len(), 5);
        assert_eq!(h.version, Version::V3);
        Ok(())
    }

    #[test]
    fn fatal_errors() {
        let mut anomalies = Vec::new();
        let buf = sample().to_bytes();
        assert!(matches!(
            Header::parse(&buf[..511], &mut anomalies),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            Header::parse(b"PK\x03\x04", &mut anomalies),
            Err(Error::NotCompoundFile(crate::FormatKind::Ooxml))
        ));
        let mut bad = buf;
        put_u16(&mut bad, 0x1e, 10);
        assert!(matches!(
            Header::parse(&bad, &mut anomalies),
            Err(Error::Format(_))
        ));
        let mut bad = buf;
        put_u16(&mut bad, 0x20, 7);
        assert!(matches!(
            Header::parse(&bad, &mut anomalies),
            Err(Error::Format(_))
        ));
        let mut bad = buf;
        put_u32(&mut bad, 0x30, ENDOFCHAIN);
        assert!(matches!(
            Header::parse(&bad, &mut anomalies),
            Err(Error::Format(_))
        ));
    }
}
