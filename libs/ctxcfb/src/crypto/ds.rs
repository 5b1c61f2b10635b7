//! Data spaces and encryption transform
//!
//! Encrypted documents describe the transform applied to `EncryptedPackage` in the
//! `\u{6}DataSpaces` storage. The content is informational: decryption only relies on
//! `EncryptionInfo`.
use super::Version;
use crate::bytes::*;
use crate::error::{Error, Result};
use crate::CompoundFile;
use tracing::debug;

/// The data spaces storage
pub const DATA_SPACES_STORAGE: &str = "\u{6}DataSpaces";
const FEATURE_IDENTIFIER: &str = "Microsoft.Container.DataSpaces";
const DATA_SPACE_NAME: &str = "StrongEncryptionDataSpace";
const TRANSFORM_NAME: &str = "StrongEncryptionTransform";
const TRANSFORM_ID: &str = "{FF9A3F03-56EF-4613-BDD5-5A41C1D07246}";
const TRANSFORM_FRIENDLY_NAME: &str = "Microsoft.Container.EncryptionTransform";
const V1_0: Version = Version { major: 1, minor: 0 };

fn invalid(msg: String) -> Error {
    Error::InvalidEncryptionInfo(msg)
}

fn stream(cf: &CompoundFile, name: &str) -> Result<Vec<u8>> {
    cf.read_stream(cf.get_stream(&format!("{DATA_SPACES_STORAGE}/{name}"))?)
}

fn skip(r: &mut &[u8], len: usize) -> Result<()> {
    if r.len() < len {
        return Err(invalid("Truncated data space structure".to_string()));
    }
    *r = &r[len..];
    Ok(())
}

fn read_unicode_lpp4(r: &mut &[u8]) -> Result<String> {
    let length = rdu32le(r)?;
    if length > 256 {
        return Err(invalid("UTF-16 string too long, giving up".to_string()));
    }
    let length = length as usize;
    let data = r
        .get(0..length)
        .ok_or_else(|| invalid("Truncated UTF-16 string".to_string()))?;
    let s = from_utf16le(data);
    skip(r, round_up(length, 4))?;
    Ok(s)
}

fn read_utf8_lpp4(r: &mut &[u8]) -> Result<String> {
    let length = rdu32le(r)?;
    if length > 128 {
        return Err(invalid("UTF-8 string too long, giving up".to_string()));
    }
    let length = length as usize;
    let data = r
        .get(0..length)
        .ok_or_else(|| invalid("Truncated UTF-8 string".to_string()))?;
    let s = String::from_utf8_lossy(data).to_string();
    skip(r, round_up(length, 4))?;
    Ok(s)
}

fn write_unicode_lpp4(out: &mut Vec<u8>, s: &str) {
    let data = utf16le(s);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    out.resize(out.len() + round_up(data.len(), 4) - data.len(), 0);
}

fn write_utf8_lpp4(out: &mut Vec<u8>, s: Option<&str>) {
    let data = s.map(str::as_bytes).unwrap_or_default();
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out.resize(out.len() + round_up(data.len(), 4) - data.len(), 0);
}

/// The version of the data spaces structure
#[derive(Debug, Clone)]
pub struct DataSpaceVersionInfo {
    /// The functionality for which the DataSpaceVersionInfo structure specifies version information
    pub feature_identifier: String,
    /// The reader version of the data spaces structure
    pub reader_version: Version,
    /// The updater version of the data spaces structure
    pub updater_version: Version,
    /// The writer version of the data spaces structure
    pub writer_version: Version,
}

impl DataSpaceVersionInfo {
    fn new(cf: &CompoundFile) -> Result<Self> {
        let data = stream(cf, "Version")?;
        let mut r = data.as_slice();
        Ok(Self {
            feature_identifier: read_unicode_lpp4(&mut r)?,
            reader_version: Version::new(&mut r)?,
            updater_version: Version::new(&mut r)?,
            writer_version: Version::new(&mut r)?,
        })
    }

    fn is_valid(&self) -> bool {
        self.feature_identifier == FEATURE_IDENTIFIER
            && self.reader_version.is((1, 0))
            && self.updater_version.is((1, 0))
            && self.writer_version.is((1, 0))
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_unicode_lpp4(out, &self.feature_identifier);
        self.reader_version.write(out);
        self.updater_version.write(out);
        self.writer_version.write(out);
    }
}

/// The name of a specific storage or stream containing protected content
#[derive(Debug, Clone)]
pub struct DataSpaceReferenceComponent {
    /// Specifies whether the referenced component is a stream (0) or storage (1)
    pub ref_type: u32,
    /// The name of the stream
    pub ref_name: String,
}

impl DataSpaceReferenceComponent {
    fn new(r: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            ref_type: rdu32le(r)?,
            ref_name: read_unicode_lpp4(r)?,
        })
    }
}

/// Associates protected content with a specific data space definition
#[derive(Debug, Clone)]
pub struct DataSpaceMapEntry {
    /// Storage and stream containing protected content
    pub components: Vec<DataSpaceReferenceComponent>,
    /// The name of the data space definition associated with the protected content
    pub name: String,
    /// The transformations to apply to the protected content
    pub transforms: Vec<String>,
}

impl DataSpaceMapEntry {
    fn new(r: &mut &[u8]) -> Result<Self> {
        let length = rdu32le(r)? as usize;
        if length < 4 {
            return Err(invalid("DataSpaceMapEntry underflow".to_string()));
        }
        // The length includes its own field
        let mut body = r
            .get(0..length - 4)
            .ok_or_else(|| invalid("Truncated DataSpaceMapEntry".to_string()))?;
        skip(r, length - 4)?;
        let n_components = rdu32le(&mut body)?;
        if n_components > 64 {
            return Err(invalid(
                "Too many DataSpaceMapEntry components, giving up".to_string(),
            ));
        }
        let mut components: Vec<DataSpaceReferenceComponent> =
            Vec::with_capacity(n_components as usize);
        for _ in 0..n_components {
            components.push(DataSpaceReferenceComponent::new(&mut body)?);
        }
        let name = read_unicode_lpp4(&mut body)?;
        Ok(Self {
            components,
            name,
            transforms: Vec::new(),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(&(self.components.len() as u32).to_le_bytes());
        for c in self.components.iter() {
            body.extend_from_slice(&c.ref_type.to_le_bytes());
            write_unicode_lpp4(&mut body, &c.ref_name);
        }
        write_unicode_lpp4(&mut body, &self.name);
        out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(&body);
    }
}

/// Data space transformation map
#[derive(Debug, Clone)]
pub struct DataSpaceMap {
    /// The transformations to apply to the protected content
    pub entries: Vec<DataSpaceMapEntry>,
}

impl DataSpaceMap {
    fn new(cf: &CompoundFile) -> Result<Self> {
        let data = stream(cf, "DataSpaceMap")?;
        let mut r = data.as_slice();
        let header_len = rdu32le(&mut r)?;
        if header_len != 8 {
            return Err(invalid(format!(
                "Invalid DataSpaceMap header length ({header_len})"
            )));
        }
        let n_entries = rdu32le(&mut r)?;
        if n_entries > 64 {
            return Err(invalid("Too many DataSpaceMap entries, giving up".to_string()));
        }
        let mut entries: Vec<DataSpaceMapEntry> = Vec::with_capacity(n_entries as usize);
        for _ in 0..n_entries {
            entries.push(DataSpaceMapEntry::new(&mut r)?);
        }
        Ok(Self { entries })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for e in self.entries.iter() {
            e.write(out);
        }
    }
}

#[derive(Debug)]
struct DataSpaceDefinition(Vec<String>);

impl DataSpaceDefinition {
    fn new(cf: &CompoundFile, name: &str) -> Result<Self> {
        let data = stream(cf, &format!("DataSpaceInfo/{name}"))?;
        let mut r = data.as_slice();
        let header_len = rdu32le(&mut r)?;
        if header_len != 8 {
            return Err(invalid(format!(
                "Invalid DataSpaceDefinition header length ({header_len})"
            )));
        }
        let n_trans = rdu32le(&mut r)?;
        if n_trans > 16 {
            return Err(invalid(
                "Too many DataSpaceDefinition transforms, giving up".to_string(),
            ));
        }
        let mut trans: Vec<String> = Vec::with_capacity(n_trans as usize);
        for _ in 0..n_trans {
            trans.push(read_unicode_lpp4(&mut r)?);
        }
        Ok(Self(trans))
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&(self.0.len() as u32).to_le_bytes());
        for t in self.0.iter() {
            write_unicode_lpp4(out, t);
        }
    }
}

/// The identity of a transform
#[derive(Debug, Clone)]
pub struct TransformInfoHeader {
    /// The type of transform to be applied
    pub transform_type: u32,
    /// An identifier associated with a specific transform
    pub transform_id: String,
    /// The friendly name of the transform
    pub transform_name: String,
    /// The reader version
    pub reader_version: Version,
    /// The updater version
    pub updater_version: Version,
    /// The writer version
    pub writer_version: Version,
}

impl TransformInfoHeader {
    fn new(r: &mut &[u8]) -> Result<Self> {
        let _len = rdu32le(r)?;
        Ok(Self {
            transform_type: rdu32le(r)?,
            transform_id: read_unicode_lpp4(r)?,
            transform_name: read_unicode_lpp4(r)?,
            reader_version: Version::new(r)?,
            updater_version: Version::new(r)?,
            writer_version: Version::new(r)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        // The length covers the fields up to the transform id
        let mut head: Vec<u8> = Vec::new();
        head.extend_from_slice(&self.transform_type.to_le_bytes());
        write_unicode_lpp4(&mut head, &self.transform_id);
        out.extend_from_slice(&(head.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(&head);
        write_unicode_lpp4(out, &self.transform_name);
        self.reader_version.write(out);
        self.updater_version.write(out);
        self.writer_version.write(out);
    }
}

/// Specifies the encryption used (informational only!!!)
#[derive(Debug, Clone)]
pub struct EncryptionTransformInfo {
    /// Transform header
    pub header: TransformInfoHeader,
    /// The name of the encryption algorithm
    pub name: String,
    /// The block size for the encryption algorithm
    pub block_size: u32,
    /// Extensible encryption mode
    pub cypher_mode: u32,
    /// Reserved (must be 4)
    pub reserved: u32,
}

impl EncryptionTransformInfo {
    fn path(name: &str) -> String {
        format!("TransformInfo/{name}/\u{6}Primary")
    }

    fn new(cf: &CompoundFile, name: &str) -> Result<Self> {
        let data = stream(cf, &Self::path(name))?;
        let mut r = data.as_slice();
        let header = TransformInfoHeader::new(&mut r)?;
        if header.transform_type != 1 {
            return Err(invalid(format!(
                "Invalid TransformType ({})",
                header.transform_type
            )));
        }
        if header.transform_id != TRANSFORM_ID {
            return Err(invalid(format!(
                "Invalid TransformID ({})",
                header.transform_id
            )));
        }
        if header.transform_name != TRANSFORM_FRIENDLY_NAME {
            return Err(invalid(format!(
                "Invalid TransformName ({})",
                header.transform_name
            )));
        }
        for (what, v) in [
            ("ReaderVersion", header.reader_version),
            ("UpdaterVersion", header.updater_version),
            ("WriterVersion", header.writer_version),
        ] {
            if !v.is((1, 0)) {
                return Err(invalid(format!("Invalid {what} ({v})")));
            }
        }
        Ok(Self {
            header,
            name: read_utf8_lpp4(&mut r)?,
            block_size: rdu32le(&mut r)?,
            cypher_mode: rdu32le(&mut r)?,
            reserved: rdu32le(&mut r)?,
        })
    }

    fn strong_encryption() -> Self {
        Self {
            header: TransformInfoHeader {
                transform_type: 1,
                transform_id: TRANSFORM_ID.to_string(),
                transform_name: TRANSFORM_FRIENDLY_NAME.to_string(),
                reader_version: V1_0,
                updater_version: V1_0,
                writer_version: V1_0,
            },
            name: String::new(),
            block_size: 0,
            cypher_mode: 0,
            reserved: 4,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        self.header.write(out);
        write_utf8_lpp4(out, (!self.name.is_empty()).then_some(self.name.as_str()));
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.cypher_mode.to_le_bytes());
        out.extend_from_slice(&self.reserved.to_le_bytes());
    }
}

/// Data spaces
#[derive(Debug, Clone)]
pub struct DataSpaces {
    /// The version of the data spaces
    pub version_info: DataSpaceVersionInfo,
    /// The data space map
    pub map: DataSpaceMap,
}

impl DataSpaces {
    /// Parse and return data spaces
    pub fn new(cf: &CompoundFile) -> Result<Self> {
        let version_info = DataSpaceVersionInfo::new(cf)?;
        let mut map = DataSpaceMap::new(cf)?;
        for e in &mut map.entries {
            let dsd = DataSpaceDefinition::new(cf, &e.name)?;
            e.transforms = dsd.0;
        }
        Ok(Self { version_info, map })
    }

    /// Returns the encryption transform
    pub fn get_encryption_transform_info(
        &self,
        cf: &CompoundFile,
    ) -> Result<EncryptionTransformInfo> {
        if !self.version_info.is_valid() {
            return Err(invalid("Invalid DataSpaceVersionInfo".to_string()));
        }
        if self.map.entries.len() != 1 {
            return Err(invalid(format!(
                "Invalid DataSpaceMap content ({} entries are present)",
                self.map.entries.len()
            )));
        }
        let dsme = &self.map.entries[0];
        if dsme.name != DATA_SPACE_NAME {
            return Err(invalid(format!("Invalid DataSpaceName ({})", dsme.name)));
        }
        if dsme.components.len() != 1 {
            return Err(invalid(format!(
                "Invalid ReferenceComponents content ({} components are present)",
                dsme.components.len()
            )));
        }
        let component = &dsme.components[0];
        if component.ref_type != 0 || component.ref_name != super::ENCRYPTED_PACKAGE_STREAM {
            return Err(invalid(format!(
                "Invalid ReferenceComponents content (found {} with type {})",
                component.ref_name, component.ref_type
            )));
        }
        let transform = dsme
            .transforms
            .first()
            .ok_or_else(|| invalid("No TransformReference".to_string()))?;
        if transform != TRANSFORM_NAME {
            return Err(invalid(format!("Invalid TransformReference ({})", transform)));
        }
        EncryptionTransformInfo::new(cf, transform)
    }

    /// Stores the strong encryption data space for `EncryptedPackage`
    pub fn write_strong_encryption(cf: &mut CompoundFile) -> Result<()> {
        let mut version = Vec::new();
        DataSpaceVersionInfo {
            feature_identifier: FEATURE_IDENTIFIER.to_string(),
            reader_version: V1_0,
            updater_version: V1_0,
            writer_version: V1_0,
        }
        .write(&mut version);
        let mut map = Vec::new();
        DataSpaceMap {
            entries: vec![DataSpaceMapEntry {
                components: vec![DataSpaceReferenceComponent {
                    ref_type: 0,
                    ref_name: super::ENCRYPTED_PACKAGE_STREAM.to_string(),
                }],
                name: DATA_SPACE_NAME.to_string(),
                transforms: Vec::new(),
            }],
        }
        .write(&mut map);
        let mut definition = Vec::new();
        DataSpaceDefinition(vec![TRANSFORM_NAME.to_string()]).write(&mut definition);
        let mut transform = Vec::new();
        EncryptionTransformInfo::strong_encryption().write(&mut transform);

        for (name, data) in [
            ("Version".to_string(), version),
            ("DataSpaceMap".to_string(), map),
            (format!("DataSpaceInfo/{DATA_SPACE_NAME}"), definition),
            (EncryptionTransformInfo::path(TRANSFORM_NAME), transform),
        ] {
            cf.put_stream(&format!("{DATA_SPACES_STORAGE}/{name}"), &data)?;
        }
        debug!("Stored the {DATA_SPACE_NAME} data space");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lpp4_strings() -> Result<()> {
        let mut out = Vec::new();
        write_unicode_lpp4(&mut out, "abc");
        assert_eq!(out, [6, 0, 0, 0, b'a', 0, b'b', 0, b'c', 0, 0, 0]);
        write_utf8_lpp4(&mut out, None);
        write_utf8_lpp4(&mut out, Some("xy"));
        let mut r = out.as_slice();
        assert_eq!(read_unicode_lpp4(&mut r)?, "abc");
        assert_eq!(read_utf8_lpp4(&mut r)?, "");
        assert_eq!(read_utf8_lpp4(&mut r)?, "xy");
        assert!(r.is_empty());
        Ok(())
    }

    #[test]
    fn truncated_strings() {
        let data = [8u8, 0, 0, 0, b'a', 0];
        assert!(matches!(
            read_unicode_lpp4(&mut &data[..]),
            Err(Error::InvalidEncryptionInfo(_))
        ));
        let data = [0u8, 2, 0, 0];
        assert!(read_unicode_lpp4(&mut &data[..]).is_err());
    }

    #[test]
    fn strong_encryption_data_space() -> Result<()> {
        let mut cf = CompoundFile::new(crate::Version::V3);
        DataSpaces::write_strong_encryption(&mut cf)?;
        let ds = DataSpaces::new(&cf)?;
        assert!(ds.version_info.is_valid());
        assert_eq!(ds.map.entries.len(), 1);
        assert_eq!(ds.map.entries[0].name, DATA_SPACE_NAME);
        assert_eq!(ds.map.entries[0].transforms, [TRANSFORM_NAME]);
        let info = ds.get_encryption_transform_info(&cf)?;
        assert_eq!(info.header.transform_id, TRANSFORM_ID);
        assert_eq!(info.name, "");
        assert_eq!(info.reserved, 4);

        let primary = cf.read_stream(cf.get_stream(&format!(
            "{DATA_SPACES_STORAGE}/TransformInfo/{TRANSFORM_NAME}/\u{6}Primary"
        ))?)?;
        // TransformLength covers length, type and id
        assert_eq!(le_u32(&primary, 0) as usize, 8 + 4 + TRANSFORM_ID.len() * 2);
        Ok(())
    }

    #[test]
    fn missing_data_spaces() {
        let cf = CompoundFile::new(crate::Version::V3);
        assert!(matches!(DataSpaces::new(&cf), Err(Error::EntryNotFound(_))));
    }
}
