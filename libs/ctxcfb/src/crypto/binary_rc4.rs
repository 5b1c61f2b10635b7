//! Office Binary Document RC4 Encryption
use super::cipher::{password_bytes, rc4_apply};
use super::stream::{ChunkCipher, RC4_CHUNK_SIZE};
use super::{HashAlgorithm, KeyMaterial, MaterialSizes, Scheme, SecretKey};
use crate::error::Result;
use std::io::Read;
use tracing::debug;

/// Office Binary Document RC4 Encryption data
#[derive(Debug, Clone, Default)]
pub struct BinaryRc4Encryption {
    /// Salt
    pub salt: [u8; 16],
    /// Encrypted verifier
    pub encrypted_verifier: [u8; 16],
    /// Encrypted MD5 hash
    pub encrypted_hash: [u8; 16],
}

impl BinaryRc4Encryption {
    /// Read Office Binary Document RC4 Encryption data
    pub fn new<R: Read>(r: &mut R) -> Result<Self> {
        let mut salt = [0u8; 16];
        let mut encrypted_verifier = [0u8; 16];
        let mut encrypted_hash = [0u8; 16];
        r.read_exact(&mut salt)?;
        r.read_exact(&mut encrypted_verifier)?;
        r.read_exact(&mut encrypted_hash)?;
        Ok(Self {
            salt,
            encrypted_verifier,
            encrypted_hash,
        })
    }

    /// The 40-bit base key: `MD5(16 x (MD5(password)[0..5] + salt))[0..5]`
    fn derive_key(&self, password: &str) -> SecretKey {
        let md5 = HashAlgorithm::Md5;
        let hash = md5.hash(&[&password_bytes(password)]);
        let mut buf = [0u8; 336];
        for i in 0..16 {
            let pos = i * 21;
            buf[pos..(pos + 5)].copy_from_slice(&hash[0..5]);
            buf[(pos + 5)..(pos + 21)].copy_from_slice(&self.salt);
        }
        let mut key = md5.hash(&[&buf]);
        key.truncate(5);
        SecretKey::new(key)
    }

    /// Verifier and hash are encrypted with one block 0 keystream
    fn apply_verifier(key: &SecretKey, verifier: &mut [u8; 16], hash: &mut [u8; 16]) -> Result<()> {
        let mut buf = [0u8; 32];
        buf[0..16].copy_from_slice(verifier);
        buf[16..32].copy_from_slice(hash);
        rc4_apply(&block_key(key, 0), &mut buf)?;
        verifier.copy_from_slice(&buf[0..16]);
        hash.copy_from_slice(&buf[16..32]);
        Ok(())
    }
}

/// `MD5(key + LE32(block))`, all 128 bits
fn block_key(key: &SecretKey, block: u32) -> Vec<u8> {
    HashAlgorithm::Md5.hash(&[key.as_slice(), &block.to_le_bytes()])
}

impl Scheme for BinaryRc4Encryption {
    fn verify(&self, password: &str) -> Option<SecretKey> {
        debug!("Verifying a binary RC4 password");
        let key = self.derive_key(password);
        let mut verifier = self.encrypted_verifier;
        let mut reference_hash = self.encrypted_hash;
        Self::apply_verifier(&key, &mut verifier, &mut reference_hash).ok()?;
        let computed_hash = HashAlgorithm::Md5.hash(&[&verifier]);
        if reference_hash.as_slice() == computed_hash.as_slice() {
            Some(key)
        } else {
            None
        }
    }

    fn confirm(&mut self, password: &str, material: &KeyMaterial) -> Result<SecretKey> {
        self.salt.copy_from_slice(&material.verifier_salt);
        let key = self.derive_key(password);
        let mut verifier = [0u8; 16];
        verifier.copy_from_slice(&material.verifier);
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&HashAlgorithm::Md5.hash(&[&verifier]));
        Self::apply_verifier(&key, &mut verifier, &mut hash)?;
        self.encrypted_verifier = verifier;
        self.encrypted_hash = hash;
        Ok(key)
    }

    fn chunk_cipher(&self, key: &SecretKey) -> Result<Box<dyn ChunkCipher>> {
        Ok(Box::new(BinaryRc4Chunks { key: key.clone() }))
    }

    fn material_sizes(&self) -> MaterialSizes {
        MaterialSizes {
            verifier: 16,
            verifier_salt: 16,
            ..Default::default()
        }
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.encrypted_verifier);
        out.extend_from_slice(&self.encrypted_hash);
        Ok(())
    }
}

/// RC4 re-keyed every 512 bytes
struct BinaryRc4Chunks {
    key: SecretKey,
}

impl ChunkCipher for BinaryRc4Chunks {
    fn chunk_size(&self) -> usize {
        RC4_CHUNK_SIZE
    }

    fn block_size(&self) -> usize {
        1
    }

    fn encrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        rc4_apply(&block_key(&self.key, index), buf)
    }

    fn decrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        rc4_apply(&block_key(&self.key, index), buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_write() -> Result<()> {
        let data: Vec<u8> = (0..48).collect();
        let rc4 = BinaryRc4Encryption::new(&mut data.as_slice())?;
        assert_eq!(rc4.salt[0], 0);
        assert_eq!(rc4.encrypted_verifier[0], 16);
        assert_eq!(rc4.encrypted_hash[15], 47);
        let mut out = Vec::new();
        rc4.write_body(&mut out)?;
        assert_eq!(out, data);
        assert!(BinaryRc4Encryption::new(&mut &data[..47]).is_err());
        Ok(())
    }

    #[test]
    fn confirm_then_verify() -> Result<()> {
        let mut rc4 = BinaryRc4Encryption::default();
        let material = KeyMaterial {
            verifier: vec![0x55; 16],
            verifier_salt: vec![0xaa; 16],
            ..Default::default()
        };
        let key = rc4.confirm("password", &material)?;
        assert_eq!(key.as_slice().len(), 5);
        assert_eq!(rc4.salt, [0xaa; 16]);
        assert_ne!(rc4.encrypted_verifier, [0x55; 16]);
        assert_eq!(rc4.verify("password"), Some(key));
        assert!(rc4.verify("Password").is_none());
        assert!(rc4.verify("").is_none());
        Ok(())
    }

    #[test]
    fn chunks_are_rekeyed() -> Result<()> {
        let cipher = BinaryRc4Chunks {
            key: SecretKey::new(vec![1, 2, 3, 4, 5]),
        };
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        cipher.encrypt_chunk(0, &mut a)?;
        cipher.encrypt_chunk(1, &mut b)?;
        assert_ne!(a, b);
        cipher.decrypt_chunk(1, &mut b)?;
        assert_eq!(b, [0u8; 16]);
        Ok(())
    }
}
