//! Ciphers, digests and key derivation helpers shared by the encryption modes
use super::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::error::{Error, Result};
use aes::cipher::{
    block_padding::NoPadding, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    KeyInit, KeyIvInit,
};
use hmac::{Hmac, Mac};
use md5::Md5;
use rc4::{Rc4, StreamCipher as _};
use sha1::Sha1;
use sha2::{
    digest::{Digest, DynDigest},
    Sha256, Sha384, Sha512,
};

/// The direction of a block cipher operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Encrypt,
    Decrypt,
}

impl HashAlgorithm {
    /// Returns a boxed hasher for the algorithm
    pub(crate) fn digest(&self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(Md5::new()),
            Self::Sha1 => Box::new(Sha1::new()),
            Self::Sha256 => Box::new(Sha256::new()),
            Self::Sha384 => Box::new(Sha384::new()),
            Self::Sha512 => Box::new(Sha512::new()),
        }
    }

    /// Hashes the concatenation of `parts`
    pub(crate) fn hash(&self, parts: &[&[u8]]) -> Vec<u8> {
        let mut digest = self.digest();
        for part in parts {
            digest.update(part);
        }
        digest.finalize().to_vec()
    }

    /// Computes the HMAC of the concatenation of `parts`
    pub(crate) fn hmac(&self, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
        macro_rules! hmac_with {
            ($digest:ty) => {{
                let mut mac = <Hmac<$digest> as Mac>::new_from_slice(key).map_err(|e| {
                    Error::InvalidEncryptionInfo(format!("invalid HMAC key: {e}"))
                })?;
                for part in parts {
                    Mac::update(&mut mac, part);
                }
                Mac::finalize(mac).into_bytes().to_vec()
            }};
        }
        Ok(match self {
            Self::Md5 => hmac_with!(Md5),
            Self::Sha1 => hmac_with!(Sha1),
            Self::Sha256 => hmac_with!(Sha256),
            Self::Sha384 => hmac_with!(Sha384),
            Self::Sha512 => hmac_with!(Sha512),
        })
    }
}

/// Encodes a password as UTF-16LE, which is what every derivation hashes
pub(crate) fn password_bytes(password: &str) -> Vec<u8> {
    crate::bytes::utf16le(password)
}

/// Iterated password hash: `H0 = H(salt + password)` then `Hn = H(LE32(n) + Hn-1)`
pub(crate) fn hash_password(
    hash: HashAlgorithm,
    salt: &[u8],
    password: &str,
    spin_count: u32,
) -> Vec<u8> {
    let mut digest = hash.digest();
    digest.update(salt);
    digest.update(&password_bytes(password));
    let mut h = vec![0u8; digest.output_size()];
    // Safe: the buffer has the digest size
    let _ = digest.finalize_into_reset(h.as_mut_slice());
    for iteration in 0..spin_count {
        digest.update(&iteration.to_le_bytes());
        digest.update(&h);
        let _ = digest.finalize_into_reset(h.as_mut_slice());
    }
    h
}

/// Truncates or extends `v` to `len` bytes, filling with `fill`
pub(crate) fn resize(mut v: Vec<u8>, len: usize, fill: u8) -> Vec<u8> {
    v.resize(len, fill);
    v
}

macro_rules! with_aes {
    ($cipher:expr, $aes:ident => $body:block) => {
        match $cipher {
            CipherAlgorithm::Aes128 => {
                type $aes = aes::Aes128;
                $body
            }
            CipherAlgorithm::Aes192 => {
                type $aes = aes::Aes192;
                $body
            }
            CipherAlgorithm::Aes256 => {
                type $aes = aes::Aes256;
                $body
            }
            CipherAlgorithm::Rc4 => {
                return Err(Error::UnsupportedAlgorithm(
                    "RC4 is not a block cipher".to_string(),
                ));
            }
        }
    };
}

fn bad_key<E: std::fmt::Display>(e: E) -> Error {
    Error::InvalidEncryptionInfo(format!("invalid key or IV: {e}"))
}

/// Applies an AES block cipher in place
///
/// `buf` must be a multiple of the block size; `iv` is ignored in ECB mode
pub(crate) fn aes_apply(
    cipher: CipherAlgorithm,
    chaining: ChainingMode,
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
    direction: Direction,
) -> Result<()> {
    let len = buf.len();
    if len % 16 != 0 {
        return Err(Error::InvalidOperation(format!(
            "AES input of {len} bytes is not block aligned"
        )));
    }
    with_aes!(cipher, Aes => {
        match (chaining, direction) {
            (ChainingMode::Ecb, Direction::Encrypt) => {
                let c = Aes::new_from_slice(key).map_err(bad_key)?;
                for block in buf.chunks_exact_mut(16) {
                    c.encrypt_block(block.into());
                }
            }
            (ChainingMode::Ecb, Direction::Decrypt) => {
                let c = Aes::new_from_slice(key).map_err(bad_key)?;
                for block in buf.chunks_exact_mut(16) {
                    c.decrypt_block(block.into());
                }
            }
            (ChainingMode::Cbc, Direction::Encrypt) => {
                cbc::Encryptor::<Aes>::new_from_slices(key, iv)
                    .map_err(bad_key)?
                    .encrypt_padded_mut::<NoPadding>(buf, len)
                    .map_err(bad_key)?;
            }
            (ChainingMode::Cbc, Direction::Decrypt) => {
                cbc::Decryptor::<Aes>::new_from_slices(key, iv)
                    .map_err(bad_key)?
                    .decrypt_padded_mut::<NoPadding>(buf)
                    .map_err(bad_key)?;
            }
            (ChainingMode::Cfb, Direction::Encrypt) => {
                cfb8::Encryptor::<Aes>::new_from_slices(key, iv)
                    .map_err(bad_key)?
                    .encrypt_padded_mut::<NoPadding>(buf, len)
                    .map_err(bad_key)?;
            }
            (ChainingMode::Cfb, Direction::Decrypt) => {
                cfb8::Decryptor::<Aes>::new_from_slices(key, iv)
                    .map_err(bad_key)?
                    .decrypt_padded_mut::<NoPadding>(buf)
                    .map_err(bad_key)?;
            }
        }
    });
    Ok(())
}

/// Applies an RC4 keystream in place (RC4 is symmetric)
///
/// Keys of 5 to 16 bytes are accepted
pub(crate) fn rc4_apply(key: &[u8], buf: &mut [u8]) -> Result<()> {
    use rc4::consts::*;
    use rc4::KeyInit as _;
    macro_rules! rc4_with {
        ($($len:literal => $size:ty),*) => {
            match key.len() {
                $($len => Rc4::<$size>::new(key.into()).apply_keystream(buf),)*
                n => {
                    return Err(Error::UnsupportedAlgorithm(format!(
                        "RC4 key of {n} bytes"
                    )));
                }
            }
        };
    }
    rc4_with!(
        5 => U5, 6 => U6, 7 => U7, 8 => U8, 9 => U9, 10 => U10,
        11 => U11, 12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16
    );
    Ok(())
}
