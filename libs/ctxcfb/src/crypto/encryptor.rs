//! Password confirmation and `EncryptedPackage` production
use super::stream::EncryptedPackageWriter;
use super::{
    DataSpaces, EncryptionInfo, KeyMaterial, SecretKey, ENCRYPTED_PACKAGE_STREAM,
    ENCRYPTION_INFO_STREAM,
};
use crate::error::{Error, Result};
use crate::CompoundFile;
use std::io::{self, Read};
use tracing::{debug, warn};
use zeroize::Zeroize;

/// The lifecycle of an [`Encryptor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptorState {
    /// No password was confirmed yet
    Unconfirmed,
    /// The key is set up
    Ready,
    /// An `EncryptedPackage` writer is open
    Streaming,
    /// The encrypted document was stored; nothing more can be written
    Closed,
}

/// Encrypts a payload into a container
///
/// ```
/// use ctxcfb::crypto::{EncryptionInfo, EncryptionMode, Encryptor, EncryptorState};
/// use ctxcfb::{CompoundFile, Version};
/// use std::io::Write;
///
/// let info = EncryptionInfo::builder(EncryptionMode::Standard).build().unwrap();
/// let mut encryptor = Encryptor::new(info);
/// encryptor.confirm_password("secret").unwrap();
/// let mut cf = CompoundFile::new(Version::V3);
/// let mut writer = encryptor.data_stream(&mut cf).unwrap();
/// writer.write_all(b"some payload").unwrap();
/// assert_eq!(writer.close().unwrap(), 12);
/// drop(writer);
/// assert_eq!(encryptor.state(), EncryptorState::Closed);
/// assert!(cf.get_stream("EncryptedPackage").is_ok());
/// ```
#[derive(Debug)]
pub struct Encryptor {
    info: EncryptionInfo,
    key: Option<SecretKey>,
    state: EncryptorState,
}

impl Encryptor {
    /// Creates an encryptor for fresh (or parsed) encryption parameters
    pub fn new(info: EncryptionInfo) -> Self {
        Self {
            info,
            key: None,
            state: EncryptorState::Unconfirmed,
        }
    }

    /// The encryption parameters, including the verifier once confirmed
    pub fn info(&self) -> &EncryptionInfo {
        &self.info
    }

    /// The current state
    pub fn state(&self) -> EncryptorState {
        self.state
    }

    /// The data key (once confirmed)
    pub fn key(&self) -> Option<&SecretKey> {
        self.key.as_ref()
    }

    /// Sets up the verifier for `password` with random salts, verifier and key
    pub fn confirm_password(&mut self, password: &str) -> Result<()> {
        let mut material = KeyMaterial::random(&self.info);
        let res = self.confirm_password_with(password, &material);
        material.zeroize();
        res
    }

    /// Sets up the verifier for `password` from explicit key material
    ///
    /// The same password and material always produce the same output
    pub fn confirm_password_with(&mut self, password: &str, material: &KeyMaterial) -> Result<()> {
        match self.state {
            EncryptorState::Closed => return Err(Error::StreamClosed),
            EncryptorState::Streaming => {
                return Err(Error::InvalidOperation(
                    "password cannot change while streaming".to_string(),
                ))
            }
            EncryptorState::Unconfirmed | EncryptorState::Ready => {}
        }
        let key = self.info.confirm(password, material)?;
        debug!("Confirmed {} password", self.info.mode());
        self.key = Some(key);
        self.state = EncryptorState::Ready;
        Ok(())
    }

    /// Returns the writer for the plaintext payload
    ///
    /// The encrypted document is stored in `container` when the writer is closed or dropped
    pub fn data_stream<'a>(
        &'a mut self,
        container: &'a mut CompoundFile,
    ) -> Result<EncryptedPackageWriter<'a>> {
        match self.state {
            EncryptorState::Unconfirmed => {
                return Err(Error::InvalidOperation(
                    "no password was confirmed".to_string(),
                ))
            }
            EncryptorState::Streaming => {
                return Err(Error::InvalidOperation(
                    "a data stream is open already".to_string(),
                ))
            }
            EncryptorState::Closed => return Err(Error::StreamClosed),
            EncryptorState::Ready => {}
        }
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("no password was confirmed".to_string()))?;
        let cipher = self.info.chunk_cipher(key)?;
        self.state = EncryptorState::Streaming;
        Ok(EncryptedPackageWriter::new(self, container, cipher))
    }

    /// Encrypts everything `reader` yields into `container`
    ///
    /// Returns the payload size
    pub fn encrypt<R: Read>(&mut self, container: &mut CompoundFile, mut reader: R) -> Result<u64> {
        let mut writer = self.data_stream(container)?;
        io::copy(&mut reader, &mut writer).map_err(Error::from_io)?;
        writer.close()
    }

    /// Stores the encrypted document; called once by the closing writer
    ///
    /// The entries are staged on a copy of `container` which replaces it only when every
    /// write succeeded
    pub(crate) fn finish(&mut self, container: &mut CompoundFile, package: &[u8]) -> Result<()> {
        if let EncryptionInfo::Agile(agile) = &mut self.info {
            let key = self
                .key
                .as_ref()
                .ok_or_else(|| Error::InvalidOperation("no password was confirmed".to_string()))?;
            agile.update_integrity(key, package)?;
        }
        let mut staged = container.clone();
        staged.put_stream(ENCRYPTED_PACKAGE_STREAM, package)?;
        DataSpaces::write_strong_encryption(&mut staged)?;
        staged.put_stream(ENCRYPTION_INFO_STREAM, &self.info.to_bytes()?)?;
        *container = staged;
        self.state = EncryptorState::Closed;
        debug!(
            "Stored {} bytes of {} encrypted package",
            package.len(),
            self.info.mode()
        );
        Ok(())
    }

    /// Returns to [`EncryptorState::Ready`] after a data stream failed to close
    pub(crate) fn abandon_stream(&mut self) {
        if self.state == EncryptorState::Streaming {
            warn!("Encrypted package not stored, the data stream can be reopened");
            self.state = EncryptorState::Ready;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::EncryptionMode;
    use std::io::Write;

    fn encryptor() -> Result<Encryptor> {
        Ok(Encryptor::new(
            EncryptionInfo::builder(EncryptionMode::BinaryRc4).build()?,
        ))
    }

    #[test]
    fn state_machine() -> Result<()> {
        let mut cf = CompoundFile::new(crate::Version::V3);
        let mut enc = encryptor()?;
        assert_eq!(enc.state(), EncryptorState::Unconfirmed);
        assert!(enc.key().is_none());
        assert!(matches!(
            enc.data_stream(&mut cf),
            Err(Error::InvalidOperation(_))
        ));
        enc.confirm_password("pw")?;
        assert_eq!(enc.state(), EncryptorState::Ready);
        {
            let mut w = enc.data_stream(&mut cf)?;
            w.write_all(b"abc")?;
            assert_eq!(w.len(), 3);
            assert_eq!(w.close()?, 3);
            assert!(matches!(w.close(), Err(Error::StreamClosed)));
            let err = w.write(b"x").unwrap_err();
            assert!(matches!(Error::from_io(err), Error::StreamClosed));
        }
        assert_eq!(enc.state(), EncryptorState::Closed);
        assert!(matches!(enc.data_stream(&mut cf), Err(Error::StreamClosed)));
        assert!(matches!(
            enc.confirm_password("pw"),
            Err(Error::StreamClosed)
        ));
        Ok(())
    }

    #[test]
    fn drop_stores_the_package() -> Result<()> {
        let mut cf = CompoundFile::new(crate::Version::V3);
        let mut enc = encryptor()?;
        enc.confirm_password("pw")?;
        let mut w = enc.data_stream(&mut cf)?;
        w.write_all(&[7u8; 1000])?;
        drop(w);
        assert_eq!(enc.state(), EncryptorState::Closed);
        let package = cf.read_stream(cf.get_stream(ENCRYPTED_PACKAGE_STREAM)?)?;
        assert_eq!(package.len(), 8 + 1000);
        assert_eq!(&package[0..8], &1000u64.to_le_bytes());
        let info = EncryptionInfo::from_container(&cf)?;
        assert!(info.verify("pw").is_some());
        assert!(DataSpaces::new(&cf)?.get_encryption_transform_info(&cf).is_ok());
        Ok(())
    }

    #[test]
    fn failed_store_leaves_the_container_untouched() -> Result<()> {
        let mut cf = CompoundFile::new(crate::Version::V3);
        cf.put_stream("WordDocument", b"text")?;
        cf.create_storage(crate::EntryId::ROOT, ENCRYPTION_INFO_STREAM)?;
        let mut enc = Encryptor::new(
            EncryptionInfo::builder(EncryptionMode::Standard).build()?,
        );
        enc.confirm_password("pw")?;
        assert!(matches!(
            enc.encrypt(&mut cf, [1u8; 5000].as_slice()),
            Err(Error::DuplicateEntry(_))
        ));
        assert_eq!(enc.state(), EncryptorState::Ready);
        for path in [ENCRYPTED_PACKAGE_STREAM, crate::crypto::DATA_SPACES_STORAGE] {
            assert!(matches!(cf.get_entry(path), Err(Error::EntryNotFound(_))));
        }
        assert_eq!(cf.read_stream(cf.get_stream("WordDocument")?)?, b"text");

        cf.delete_entry(ENCRYPTION_INFO_STREAM)?;
        assert_eq!(enc.encrypt(&mut cf, [1u8; 5000].as_slice())?, 5000);
        assert_eq!(enc.state(), EncryptorState::Closed);
        let info = EncryptionInfo::from_container(&cf)?;
        assert!(info.verify("pw").is_some());
        Ok(())
    }

    #[test]
    fn reconfirm_before_streaming() -> Result<()> {
        let mut enc = encryptor()?;
        enc.confirm_password("first")?;
        enc.confirm_password("second")?;
        assert!(enc.info().verify("first").is_none());
        assert_eq!(enc.info().verify("second").as_ref(), enc.key());
        Ok(())
    }
}
