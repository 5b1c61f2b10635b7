//! Password verification and `EncryptedPackage` decryption
use super::stream::EncryptedPackageReader;
use super::{
    DataSpaces, EncryptionInfo, EncryptionTransformInfo, SecretKey, ENCRYPTED_PACKAGE_STREAM,
};
use crate::error::{Error, Result};
use crate::CompoundFile;
use std::io::{self, Write};
use tracing::{debug, warn};

/// Decrypts the payload of an encrypted container
#[derive(Debug)]
pub struct Decryptor {
    /// *Data Spaces* (if present and valid)
    pub data_spaces: Option<DataSpaces>,
    /// *Encryption Transform Info* (if present and valid)
    pub transform_info: Option<EncryptionTransformInfo>,
    info: EncryptionInfo,
    key: Option<SecretKey>,
}

impl Decryptor {
    /// Parses the cryptography data of a container
    ///
    /// Only `EncryptionInfo` is required: the data spaces are informational
    pub fn new(container: &CompoundFile) -> Result<Self> {
        let (data_spaces, transform_info) = match DataSpaces::new(container) {
            Ok(ds) => match ds.get_encryption_transform_info(container) {
                Ok(ti) => (Some(ds), Some(ti)),
                Err(e) => {
                    debug!("Failed to parse EncryptionTransformInfo: {e}");
                    (Some(ds), None)
                }
            },
            Err(e) => {
                debug!("Failed to parse DataSpaces: {e}");
                (None, None)
            }
        };
        let info = EncryptionInfo::from_container(container)
            .inspect_err(|e| debug!("Failed to parse EncryptionInfo: {e}"))?;
        Ok(Self {
            data_spaces,
            transform_info,
            info,
            key: None,
        })
    }

    /// The parsed `EncryptionInfo`
    pub fn info(&self) -> &EncryptionInfo {
        &self.info
    }

    /// Validates the provided password
    ///
    /// On success the derived key is retained for the following decryption calls
    pub fn verify_password(&mut self, password: &str) -> bool {
        match self.info.verify(password) {
            Some(key) => {
                debug!("Password verified ({} mode)", self.info.mode());
                self.key = Some(key);
                true
            }
            None => {
                debug!("Password rejected ({} mode)", self.info.mode());
                false
            }
        }
    }

    /// The verified key
    pub fn key(&self) -> Option<&SecretKey> {
        self.key.as_ref()
    }

    fn verified_key(&self) -> Result<&SecretKey> {
        self.key.as_ref().ok_or(Error::WrongPassword)
    }

    /// Returns a seekable reader over the decrypted payload
    pub fn data_stream(
        &self,
        container: &CompoundFile,
    ) -> Result<EncryptedPackageReader<io::Cursor<Vec<u8>>>> {
        let cipher = self.info.chunk_cipher(self.verified_key()?)?;
        let handle = container
            .get_stream(ENCRYPTED_PACKAGE_STREAM)
            .inspect_err(|e| warn!("EncryptedPackage not found: {e}"))?;
        EncryptedPackageReader::new(container.stream_reader(handle)?, cipher)
    }

    /// Decrypts the payload into `writer`
    ///
    /// Returns the payload size
    pub fn decrypt<W: Write>(&self, container: &CompoundFile, mut writer: W) -> Result<u64> {
        let mut reader = self.data_stream(container)?;
        let size = io::copy(&mut reader, &mut writer)
            .map_err(Error::from_io)
            .inspect_err(|e| debug!("Decryption failed: {e}"))?;
        Ok(size)
    }

    /// Checks the agile HMAC of the `EncryptedPackage` stream
    pub fn verify_integrity(&self, container: &CompoundFile) -> Result<()> {
        let EncryptionInfo::Agile(agile) = &self.info else {
            return Err(Error::InvalidOperation(format!(
                "{} encryption has no data integrity",
                self.info.mode()
            )));
        };
        let key = self.verified_key()?;
        let package = container.read_stream(container.get_stream(ENCRYPTED_PACKAGE_STREAM)?)?;
        agile.verify_integrity(key, &package)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{EncryptionMode, Encryptor, DATA_SPACES_STORAGE};

    fn container(mode: EncryptionMode, payload: &[u8]) -> Result<CompoundFile> {
        let info = EncryptionInfo::builder(mode).spin_count(10).build()?;
        let mut cf = CompoundFile::new(crate::Version::V3);
        let mut enc = Encryptor::new(info);
        enc.confirm_password("open sesame")?;
        enc.encrypt(&mut cf, payload)?;
        Ok(cf)
    }

    #[test]
    fn requires_a_verified_password() -> Result<()> {
        let cf = container(EncryptionMode::Standard, b"data")?;
        let mut dec = Decryptor::new(&cf)?;
        assert!(dec.data_spaces.is_some());
        assert!(dec.transform_info.is_some());
        assert!(matches!(
            dec.decrypt(&cf, Vec::new()),
            Err(Error::WrongPassword)
        ));
        assert!(!dec.verify_password("Open sesame"));
        assert!(dec.key().is_none());
        assert!(dec.verify_password("open sesame"));
        let mut out = Vec::new();
        assert_eq!(dec.decrypt(&cf, &mut out)?, 4);
        assert_eq!(out, b"data");
        Ok(())
    }

    #[test]
    fn data_spaces_are_optional() -> Result<()> {
        let mut cf = container(EncryptionMode::CryptoApi, b"data")?;
        cf.delete_entry(DATA_SPACES_STORAGE)?;
        let mut dec = Decryptor::new(&cf)?;
        assert!(dec.data_spaces.is_none());
        assert!(dec.verify_password("open sesame"));
        assert_eq!(dec.data_stream(&cf)?.len(), 4);
        Ok(())
    }

    #[test]
    fn missing_encryption_info() {
        let cf = CompoundFile::new(crate::Version::V3);
        assert!(matches!(Decryptor::new(&cf), Err(Error::EntryNotFound(_))));
    }

    #[test]
    fn integrity() -> Result<()> {
        let mut cf = container(EncryptionMode::Agile, &[5u8; 5000])?;
        let mut dec = Decryptor::new(&cf)?;
        assert!(matches!(dec.verify_integrity(&cf), Err(Error::WrongPassword)));
        assert!(dec.verify_password("open sesame"));
        dec.verify_integrity(&cf)?;

        let handle = cf.get_stream(ENCRYPTED_PACKAGE_STREAM)?;
        let mut package = cf.read_stream(handle)?;
        package[100] ^= 1;
        cf.write_stream(handle, &package)?;
        assert!(matches!(
            dec.verify_integrity(&cf),
            Err(Error::IntegrityMismatch)
        ));

        let cf = container(EncryptionMode::BinaryRc4, b"x")?;
        let mut dec = Decryptor::new(&cf)?;
        assert!(dec.verify_password("open sesame"));
        assert!(matches!(
            dec.verify_integrity(&cf),
            Err(Error::InvalidOperation(_))
        ));
        Ok(())
    }
}
