//! Office Binary Document RC4 CryptoAPI Encryption
use super::cipher::{password_bytes, rc4_apply};
use super::stream::{ChunkCipher, RC4_CHUNK_SIZE};
use super::{
    CipherAlgorithm, HashAlgorithm, KeyMaterial, MaterialSizes, Scheme, SecretKey,
    StandardEncryption,
};
use crate::error::{Error, Result};
use tracing::debug;

/// Office Binary Document RC4 CryptoAPI Encryption
///
/// The record is laid out as in *Standard Encryption*, with an RC4 algorithm
#[derive(Debug, Clone)]
pub struct CryptoApiEncryption(pub StandardEncryption);

impl CryptoApiEncryption {
    /// Wraps a parsed record, which must use RC4
    pub fn new(se: StandardEncryption) -> Result<Self> {
        if se.header.algorithm != CipherAlgorithm::Rc4 {
            return Err(Error::InvalidEncryptionInfo(
                "Invalid EncryptionHeader algorithm".to_string(),
            ));
        }
        Ok(Self(se))
    }

    /// Fresh, unconfirmed parameters
    pub(crate) fn with_key_bits(key_bits: u32) -> Self {
        let mut se = StandardEncryption::for_algorithm(CipherAlgorithm::Rc4, key_bits);
        se.flags.aes = false;
        Self(se)
    }

    /// The base key: `SHA1(salt + password)`
    fn derive_key(&self, password: &str) -> CryptoApiKey {
        let base = HashAlgorithm::Sha1.hash(&[&self.0.verifier.salt, &password_bytes(password)]);
        CryptoApiKey {
            base: SecretKey::new(base),
            key_size: self.0.header.key_size(),
        }
    }

    /// Verifier and hash are encrypted with one block 0 keystream
    fn apply_verifier(key: &CryptoApiKey, buf: &mut [u8; 36]) -> Result<()> {
        key.apply(0, buf)
    }
}

/// CryptoApi Rc4 base key
#[derive(Clone)]
struct CryptoApiKey {
    base: SecretKey,
    key_size: usize,
}

impl CryptoApiKey {
    fn apply(&self, block_number: u32, buf: &mut [u8]) -> Result<()> {
        let mut block_key =
            HashAlgorithm::Sha1.hash(&[self.base.as_slice(), &block_number.to_le_bytes()]);
        block_key.truncate(self.key_size);
        if self.key_size == 5 {
            // 40-bit keys are used as 128-bit keys with zero padding
            block_key.resize(16, 0);
        }
        rc4_apply(&block_key, buf)
    }
}

impl Scheme for CryptoApiEncryption {
    fn verify(&self, password: &str) -> Option<SecretKey> {
        debug!(
            "Verifying a CryptoAPI password ({} bit key)",
            self.0.header.key_size() * 8
        );
        let key = self.derive_key(password);
        let mut buf = [0u8; 16 + 20];
        buf[0..16].copy_from_slice(&self.0.verifier.encrypted_verifier);
        buf[16..].copy_from_slice(&self.0.verifier.encrypted_verifier_hash);
        Self::apply_verifier(&key, &mut buf).ok()?;
        let computed_hash = HashAlgorithm::Sha1.hash(&[&buf[0..16]]);
        if buf[16..] == computed_hash[..] {
            Some(key.base)
        } else {
            None
        }
    }

    fn confirm(&mut self, password: &str, material: &KeyMaterial) -> Result<SecretKey> {
        self.0.verifier.salt.copy_from_slice(&material.verifier_salt);
        let key = self.derive_key(password);
        let mut buf = [0u8; 16 + 20];
        buf[0..16].copy_from_slice(&material.verifier);
        let hash = HashAlgorithm::Sha1.hash(&[&material.verifier]);
        buf[16..].copy_from_slice(&hash);
        Self::apply_verifier(&key, &mut buf)?;
        self.0.verifier.encrypted_verifier.copy_from_slice(&buf[0..16]);
        self.0.verifier.encrypted_verifier_hash = buf[16..].to_vec();
        Ok(key.base)
    }

    fn chunk_cipher(&self, key: &SecretKey) -> Result<Box<dyn ChunkCipher>> {
        Ok(Box::new(CryptoApiKey {
            base: key.clone(),
            key_size: self.0.header.key_size(),
        }))
    }

    fn material_sizes(&self) -> MaterialSizes {
        MaterialSizes {
            verifier: 16,
            verifier_salt: 16,
            ..Default::default()
        }
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<()> {
        self.0.write(out);
        Ok(())
    }
}

impl ChunkCipher for CryptoApiKey {
    fn chunk_size(&self) -> usize {
        RC4_CHUNK_SIZE
    }

    fn block_size(&self) -> usize {
        1
    }

    fn encrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        self.apply(index, buf)
    }

    fn decrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        self.apply(index, buf)
    }
}
