//! # Document encryption
//!
//! This module implements the encryption layer stored inside Compound Files
//! according to [\[MS-OFFCRYPTO\]](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-offcrypto/3c34d72a-1a61-4b52-a893-196f9157f083)
//!
//! Both directions are supported: an [`Encryptor`] turns a plaintext payload into the
//! `EncryptionInfo`, `EncryptedPackage` and `\u{6}DataSpaces` entries of a container, a
//! [`Decryptor`] verifies a password and recovers the payload.
//!
//! Feature support:
//! - [x] Office Binary Document RC4 Encryption
//! - [x] Office Binary Document RC4 CryptoAPI Encryption
//! - [x] ECMA-376 *Standard Encryption*
//! - [x] ECMA-376 *Agile Encryption*
//! - [x] Agile data integrity (HMAC)
//! - [ ] ECMA-376 *Extensible Encryption*
//! - [ ] Agile certificate key encryptors
//!
//! Agile algorithm support:
//! - [ ] RC2
//! - [ ] RC4
//! - [x] AES-128
//! - [x] AES-192
//! - [x] AES-256
//! - [ ] DES
//! - [ ] DESX
//! - [ ] 3DES
//! - [ ] 3DES_112
//!
//! Agile counters support:
//! - [x] CBC
//! - [x] CFB-8
//!
//! Agile hash support:
//! - [x] SHA1
//! - [x] SHA256
//! - [x] SHA384
//! - [x] SHA512
//! - [ ] MD5
//! - [ ] MD4
//! - [ ] MD2
//! - [ ] RIPEMD-128
//! - [ ] RIPEMD-160
//! - [ ] WHIRLPOOL
//!
//! # Example
//! ```
//! use ctxcfb::crypto::{decrypt_bytes, encrypt_bytes, EncryptionInfo, EncryptionMode};
//!
//! let info = EncryptionInfo::builder(EncryptionMode::Agile)
//!     .spin_count(1000)
//!     .build()
//!     .unwrap();
//! let container = encrypt_bytes(info, "secret", b"payload").unwrap();
//! assert_eq!(decrypt_bytes(&container, "secret").unwrap(), b"payload");
//! ```

mod agile;
mod binary_rc4;
mod cipher;
mod cryptoapi;
mod decryptor;
mod ds;
mod encryptor;
mod standard;
mod stream;

pub use agile::*;
pub use binary_rc4::*;
pub use cryptoapi::*;
pub use decryptor::*;
pub use ds::*;
pub use encryptor::*;
pub use standard::*;
pub use stream::{EncryptedPackageReader, EncryptedPackageWriter};

use crate::bytes::*;
use crate::error::{Error, Result};
use crate::CompoundFile;
use rand::RngCore as _;
use serde::Deserialize;
use std::io::Read;
use stream::ChunkCipher;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Name of the stream holding the encryption parameters
pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
/// Name of the stream holding the encrypted payload
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";
/// Default agile password hash iteration count
pub const DEFAULT_SPIN_COUNT: u32 = 100_000;
/// Largest agile password hash iteration count
pub const MAX_SPIN_COUNT: u32 = 10_000_000;
/// Default limit on the key size
pub const DEFAULT_MAX_KEY_BITS: u32 = 256;

/// Encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherAlgorithm {
    /// RC4
    Rc4,
    /// AES-128
    Aes128,
    /// AES-192
    Aes192,
    /// AES-256
    Aes256,
}

impl CipherAlgorithm {
    /// The key size in bits (the largest supported size for RC4)
    pub fn key_bits(&self) -> u32 {
        match self {
            Self::Rc4 => 128,
            Self::Aes128 => 128,
            Self::Aes192 => 192,
            Self::Aes256 => 256,
        }
    }

    /// The cipher block size in bytes (1 for the RC4 stream cipher)
    pub fn block_size(&self) -> usize {
        match self {
            Self::Rc4 => 1,
            _ => 16,
        }
    }

    /// Returns the AES variant for the given key size
    pub fn aes(key_bits: u32) -> Option<Self> {
        match key_bits {
            128 => Some(Self::Aes128),
            192 => Some(Self::Aes192),
            256 => Some(Self::Aes256),
            _ => None,
        }
    }

    fn is_aes(&self) -> bool {
        !matches!(self, Self::Rc4)
    }
}

impl std::fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Rc4 => "RC4",
                Self::Aes128 => "AES-128",
                Self::Aes192 => "AES-192",
                Self::Aes256 => "AES-256",
            }
        )
    }
}

/// Hashing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (binary RC4 only)
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// The digest size in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Md5 => "MD5",
                Self::Sha1 => "SHA1",
                Self::Sha256 => "SHA256",
                Self::Sha384 => "SHA384",
                Self::Sha512 => "SHA512",
            }
        )
    }
}

/// Block chaining mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainingMode {
    /// Electronic codebook (*Standard Encryption*)
    Ecb,
    /// Cipher Block Chaining
    Cbc,
    /// Cipher feedback with 8-bit window
    Cfb,
}

impl std::fmt::Display for ChainingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Ecb => "ECB",
                Self::Cbc => "CBC",
                Self::Cfb => "CFB-8",
            }
        )
    }
}

/// The encryption scheme of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Office Binary Document RC4 Encryption
    BinaryRc4,
    /// Office Binary Document RC4 CryptoAPI Encryption
    CryptoApi,
    /// ECMA-376 *Standard Encryption*
    Standard,
    /// ECMA-376 *Agile Encryption*
    Agile,
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::BinaryRc4 => "RC4",
                Self::CryptoApi => "RC4 CryptoAPI",
                Self::Standard => "Standard",
                Self::Agile => "Agile",
            }
        )
    }
}

/// Component version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Major number
    pub major: u16,
    /// Minor number
    pub minor: u16,
}

impl Version {
    /// Reads and parse a component version
    pub fn new<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            major: rdu16le(r)?,
            minor: rdu16le(r)?,
        })
    }

    fn is(&self, other: (u16, u16)) -> bool {
        self.major == other.0 && self.minor == other.1
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.major.to_le_bytes());
        out.extend_from_slice(&self.minor.to_le_bytes());
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A derived encryption key
///
/// The key bytes are wiped when the value is dropped
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub(crate) fn new(key: Vec<u8>) -> Self {
        Self(key)
    }

    /// Returns the key as a slice
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({} bytes)", self.0.len())
    }
}

impl std::fmt::LowerHex for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for v in self.0.iter() {
            write!(f, "{:02x}", v)?;
        }
        Ok(())
    }
}

impl std::fmt::UpperHex for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for v in self.0.iter() {
            write!(f, "{:02X}", v)?;
        }
        Ok(())
    }
}

/// The random inputs of a password confirmation
///
/// [`Encryptor::confirm_password`] draws them from the thread RNG,
/// [`Encryptor::confirm_password_with`] takes them from the caller, which makes the
/// output fully deterministic. Each mode only uses (and checks) some of the fields:
///
/// | mode | key_spec | key_salt | verifier | verifier_salt | integrity_salt |
/// |------|----------|----------|----------|---------------|----------------|
/// | binary RC4, CryptoAPI, Standard | - | - | 16 | 16 | - |
/// | Agile | key bits / 8 | 16 | 16 | 16 | hash size |
#[derive(Clone, Default, Zeroize)]
pub struct KeyMaterial {
    /// The document secret key (agile)
    pub key_spec: Vec<u8>,
    /// The salt of the data cipher (agile)
    pub key_salt: Vec<u8>,
    /// The password verifier
    pub verifier: Vec<u8>,
    /// The password salt
    pub verifier_salt: Vec<u8>,
    /// The salt of the data integrity HMAC (agile)
    pub integrity_salt: Vec<u8>,
}

/// The field sizes of a [`KeyMaterial`], 0 for unused fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MaterialSizes {
    pub key_spec: usize,
    pub key_salt: usize,
    pub verifier: usize,
    pub verifier_salt: usize,
    pub integrity_salt: usize,
}

impl KeyMaterial {
    /// Generates random material suitable for `info`
    pub fn random(info: &EncryptionInfo) -> Self {
        let sizes = info.scheme().material_sizes();
        let mut rng = rand::rng();
        let mut fill = |len: usize| {
            let mut v = vec![0u8; len];
            rng.fill_bytes(&mut v);
            v
        };
        Self {
            key_spec: fill(sizes.key_spec),
            key_salt: fill(sizes.key_salt),
            verifier: fill(sizes.verifier),
            verifier_salt: fill(sizes.verifier_salt),
            integrity_salt: fill(sizes.integrity_salt),
        }
    }

    fn check(&self, sizes: &MaterialSizes) -> Result<()> {
        for (name, have, want) in [
            ("key_spec", self.key_spec.len(), sizes.key_spec),
            ("key_salt", self.key_salt.len(), sizes.key_salt),
            ("verifier", self.verifier.len(), sizes.verifier),
            ("verifier_salt", self.verifier_salt.len(), sizes.verifier_salt),
            ("integrity_salt", self.integrity_salt.len(), sizes.integrity_salt),
        ] {
            if want != 0 && have != want {
                return Err(Error::InvalidOperation(format!(
                    "{name} must be {want} bytes long (got {have})"
                )));
            }
        }
        Ok(())
    }
}

/// The operations each encryption mode provides
pub(crate) trait Scheme {
    /// Checks the password and returns the data key on success
    fn verify(&self, password: &str) -> Option<SecretKey>;
    /// Fills in the verifier (and key) fields for `password` and returns the data key
    fn confirm(&mut self, password: &str, material: &KeyMaterial) -> Result<SecretKey>;
    /// The per chunk cipher for the `EncryptedPackage` stream
    fn chunk_cipher(&self, key: &SecretKey) -> Result<Box<dyn ChunkCipher>>;
    /// The [`KeyMaterial`] layout of the mode
    fn material_sizes(&self) -> MaterialSizes;
    /// Serializes the record following the version
    fn write_body(&self, out: &mut Vec<u8>) -> Result<()>;
}

/// The content of the `EncryptionInfo` stream
#[derive(Debug, Clone)]
pub enum EncryptionInfo {
    /// Office Binary Document RC4 Encryption
    BinaryRc4(BinaryRc4Encryption),
    /// Office Binary Document RC4 CryptoAPI Encryption
    CryptoApi(CryptoApiEncryption),
    /// *Standard Encryption*
    Standard(StandardEncryption),
    /// *Agile Encryption*
    Agile(AgileEncryption),
}

impl EncryptionInfo {
    /// Returns a builder for fresh encryption parameters
    pub fn builder(mode: EncryptionMode) -> EncryptionInfoBuilder {
        EncryptionInfoBuilder::new(mode)
    }

    /// Parses the content of an `EncryptionInfo` stream
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_record(data).map_err(|e| match e {
            Error::IO(e) => {
                warn!("Truncated EncryptionInfo: {e}");
                Error::InvalidEncryptionInfo(format!("truncated record: {e}"))
            }
            e => e,
        })
    }

    fn parse_record(data: &[u8]) -> Result<Self> {
        let mut r = data;
        let version = Version::new(&mut r)?;
        debug!("EncryptionInfo version {version}");
        if version.is((4, 4)) {
            // Agile Encryption
            Ok(Self::Agile(AgileEncryption::new(&mut r).inspect_err(
                |e| warn!("Failed to parse AgileEncryption: {e}"),
            )?))
        } else if version.minor == 3 && [3, 4].contains(&version.major) {
            Err(Error::UnsupportedAlgorithm(
                "Extensible Encryption".to_string(),
            ))
        } else if version.minor == 2 && [2, 3, 4].contains(&version.major) {
            let se = StandardEncryption::new(version, &mut r)
                .inspect_err(|e| warn!("Failed to parse StandardEncryption: {e}"))?;
            if se.header.algorithm.is_aes() {
                Ok(Self::Standard(se))
            } else {
                Ok(Self::CryptoApi(CryptoApiEncryption::new(se)?))
            }
        } else if version.is((1, 1)) {
            Ok(Self::BinaryRc4(BinaryRc4Encryption::new(&mut r)?))
        } else {
            Err(Error::InvalidEncryptionInfo(format!(
                "unsupported version {version}"
            )))
        }
    }

    /// Reads and parses the `EncryptionInfo` stream of a container
    pub fn from_container(cf: &CompoundFile) -> Result<Self> {
        let data = cf.read_stream(cf.get_stream(ENCRYPTION_INFO_STREAM)?)?;
        Self::parse(&data)
    }

    /// Serializes the `EncryptionInfo` stream content
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out: Vec<u8> = Vec::new();
        self.version().write(&mut out);
        self.scheme().write_body(&mut out)?;
        Ok(out)
    }

    /// The encryption mode
    pub fn mode(&self) -> EncryptionMode {
        match self {
            Self::BinaryRc4(_) => EncryptionMode::BinaryRc4,
            Self::CryptoApi(_) => EncryptionMode::CryptoApi,
            Self::Standard(_) => EncryptionMode::Standard,
            Self::Agile(_) => EncryptionMode::Agile,
        }
    }

    /// The record version
    pub fn version(&self) -> Version {
        match self {
            Self::BinaryRc4(_) => Version { major: 1, minor: 1 },
            Self::CryptoApi(c) => c.0.version,
            Self::Standard(s) => s.version,
            Self::Agile(_) => Version { major: 4, minor: 4 },
        }
    }

    /// The data cipher
    pub fn cipher(&self) -> CipherAlgorithm {
        match self {
            Self::BinaryRc4(_) => CipherAlgorithm::Rc4,
            Self::CryptoApi(c) => c.0.header.algorithm,
            Self::Standard(s) => s.header.algorithm,
            Self::Agile(a) => a.cipher,
        }
    }

    /// The hash used for key derivation
    pub fn hash(&self) -> HashAlgorithm {
        match self {
            Self::BinaryRc4(_) => HashAlgorithm::Md5,
            Self::CryptoApi(_) | Self::Standard(_) => HashAlgorithm::Sha1,
            Self::Agile(a) => a.hash,
        }
    }

    /// The data key size in bits
    pub fn key_bits(&self) -> u32 {
        match self {
            Self::BinaryRc4(_) => 40,
            Self::CryptoApi(c) => c.0.header.key_bits,
            Self::Standard(s) => s.header.key_bits,
            Self::Agile(a) => a.cipher.key_bits(),
        }
    }

    /// The block chaining mode (`None` for RC4)
    pub fn chaining(&self) -> Option<ChainingMode> {
        match self {
            Self::BinaryRc4(_) | Self::CryptoApi(_) => None,
            Self::Standard(_) => Some(ChainingMode::Ecb),
            Self::Agile(a) => Some(a.chaining),
        }
    }

    /// Validates the provided password and returns the data key
    pub fn verify(&self, password: &str) -> Option<SecretKey> {
        self.scheme().verify(password)
    }

    /// Sets up the verifier for `password` and returns the data key
    pub fn confirm(&mut self, password: &str, material: &KeyMaterial) -> Result<SecretKey> {
        let sizes = self.scheme().material_sizes();
        material.check(&sizes)?;
        self.scheme_mut().confirm(password, material)
    }

    pub(crate) fn chunk_cipher(&self, key: &SecretKey) -> Result<Box<dyn ChunkCipher>> {
        self.scheme().chunk_cipher(key)
    }

    fn scheme(&self) -> &dyn Scheme {
        match self {
            Self::BinaryRc4(s) => s,
            Self::CryptoApi(s) => s,
            Self::Standard(s) => s,
            Self::Agile(s) => s,
        }
    }

    fn scheme_mut(&mut self) -> &mut dyn Scheme {
        match self {
            Self::BinaryRc4(s) => s,
            Self::CryptoApi(s) => s,
            Self::Standard(s) => s,
            Self::Agile(s) => s,
        }
    }
}

/// Builds fresh [`EncryptionInfo`] for a mode
///
/// Unset parameters take the mode defaults:
/// - binary RC4: 40-bit RC4 with MD5
/// - CryptoAPI: 40-bit RC4 with SHA-1
/// - Standard: AES-128 in ECB mode with SHA-1
/// - Agile: AES-128 in CBC mode with SHA-1 and 100000 spins
#[derive(Debug, Clone)]
pub struct EncryptionInfoBuilder {
    mode: EncryptionMode,
    cipher: Option<CipherAlgorithm>,
    hash: Option<HashAlgorithm>,
    key_bits: Option<u32>,
    chaining: Option<ChainingMode>,
    spin_count: u32,
    max_key_bits: u32,
}

impl EncryptionInfoBuilder {
    fn new(mode: EncryptionMode) -> Self {
        Self {
            mode,
            cipher: None,
            hash: None,
            key_bits: None,
            chaining: None,
            spin_count: DEFAULT_SPIN_COUNT,
            max_key_bits: DEFAULT_MAX_KEY_BITS,
        }
    }

    /// Sets the cipher
    pub fn cipher(mut self, cipher: CipherAlgorithm) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Sets the hash algorithm
    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Sets the key size in bits
    pub fn key_bits(mut self, key_bits: u32) -> Self {
        self.key_bits = Some(key_bits);
        self
    }

    /// Sets the chaining mode
    pub fn chaining(mut self, chaining: ChainingMode) -> Self {
        self.chaining = Some(chaining);
        self
    }

    /// Sets the agile password hash iteration count
    pub fn spin_count(mut self, spin_count: u32) -> Self {
        self.spin_count = spin_count;
        self
    }

    /// Sets the largest key size allowed
    pub fn max_key_bits(mut self, max_key_bits: u32) -> Self {
        self.max_key_bits = max_key_bits;
        self
    }

    fn unsupported(&self, what: String) -> Error {
        Error::UnsupportedAlgorithm(format!("{what} with {} encryption", self.mode))
    }

    /// Validates the settings and returns the (unconfirmed) encryption parameters
    pub fn build(self) -> Result<EncryptionInfo> {
        let is_rc4 = matches!(self.mode, EncryptionMode::BinaryRc4 | EncryptionMode::CryptoApi);
        let cipher = match (self.cipher, self.key_bits) {
            (Some(cipher), _) => cipher,
            (None, _) if is_rc4 => CipherAlgorithm::Rc4,
            (None, Some(bits)) => {
                CipherAlgorithm::aes(bits).ok_or_else(|| self.unsupported(format!("{bits}-bit AES")))?
            }
            (None, None) => CipherAlgorithm::Aes128,
        };
        if is_rc4 != !cipher.is_aes() {
            return Err(self.unsupported(cipher.to_string()));
        }
        let key_bits = match self.key_bits {
            Some(bits) => bits,
            None if is_rc4 => 40,
            None => cipher.key_bits(),
        };
        match self.mode {
            EncryptionMode::BinaryRc4 if key_bits != 40 => {
                return Err(self.unsupported(format!("{key_bits}-bit RC4")));
            }
            EncryptionMode::CryptoApi if key_bits % 8 != 0 || !(40..=128).contains(&key_bits) => {
                return Err(self.unsupported(format!("{key_bits}-bit RC4")));
            }
            EncryptionMode::Standard | EncryptionMode::Agile if key_bits != cipher.key_bits() => {
                return Err(self.unsupported(format!("{key_bits}-bit {cipher}")));
            }
            _ => {}
        }
        if key_bits > self.max_key_bits {
            return Err(Error::KeyLengthPolicy {
                key_bits,
                max_bits: self.max_key_bits,
            });
        }
        let hash = self.hash.unwrap_or(match self.mode {
            EncryptionMode::BinaryRc4 => HashAlgorithm::Md5,
            _ => HashAlgorithm::Sha1,
        });
        let hash_ok = match self.mode {
            EncryptionMode::BinaryRc4 => hash == HashAlgorithm::Md5,
            EncryptionMode::CryptoApi | EncryptionMode::Standard => hash == HashAlgorithm::Sha1,
            EncryptionMode::Agile => hash != HashAlgorithm::Md5,
        };
        if !hash_ok {
            return Err(self.unsupported(hash.to_string()));
        }
        let chaining = match (self.mode, self.chaining) {
            (EncryptionMode::Standard, None | Some(ChainingMode::Ecb)) => Some(ChainingMode::Ecb),
            (EncryptionMode::Agile, None) => Some(ChainingMode::Cbc),
            (EncryptionMode::Agile, Some(c @ (ChainingMode::Cbc | ChainingMode::Cfb))) => Some(c),
            (EncryptionMode::BinaryRc4 | EncryptionMode::CryptoApi, None) => None,
            (_, Some(c)) => return Err(self.unsupported(c.to_string())),
        };
        if self.mode == EncryptionMode::Agile && !(1..=MAX_SPIN_COUNT).contains(&self.spin_count) {
            return Err(Error::InvalidOperation(format!(
                "spin count {} is out of range",
                self.spin_count
            )));
        }
        Ok(match self.mode {
            EncryptionMode::BinaryRc4 => EncryptionInfo::BinaryRc4(BinaryRc4Encryption::default()),
            EncryptionMode::CryptoApi => {
                EncryptionInfo::CryptoApi(CryptoApiEncryption::with_key_bits(key_bits))
            }
            EncryptionMode::Standard => {
                EncryptionInfo::Standard(StandardEncryption::with_cipher(cipher))
            }
            EncryptionMode::Agile => EncryptionInfo::Agile(AgileEncryption::with_params(
                cipher,
                hash,
                chaining.unwrap_or(ChainingMode::Cbc),
                self.spin_count,
            )),
        })
    }
}

/// Encrypts `plaintext` into a new (version 3) Compound File and returns its bytes
pub fn encrypt_bytes(info: EncryptionInfo, password: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut cf = CompoundFile::new(crate::Version::V3);
    let mut encryptor = Encryptor::new(info);
    encryptor.confirm_password(password)?;
    encryptor.encrypt(&mut cf, plaintext)?;
    cf.to_bytes()
}

/// Decrypts the payload of an encrypted Compound File
pub fn decrypt_bytes(container: &[u8], password: &str) -> Result<Vec<u8>> {
    let cf = CompoundFile::from_bytes(container)?;
    let mut decryptor = Decryptor::new(&cf)?;
    if !decryptor.verify_password(password) {
        return Err(Error::WrongPassword);
    }
    let mut out: Vec<u8> = Vec::new();
    decryptor.decrypt(&cf, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_defaults() -> Result<()> {
        let info = EncryptionInfo::builder(EncryptionMode::Agile).build()?;
        assert_eq!(info.mode(), EncryptionMode::Agile);
        assert_eq!(info.cipher(), CipherAlgorithm::Aes128);
        assert_eq!(info.hash(), HashAlgorithm::Sha1);
        assert_eq!(info.chaining(), Some(ChainingMode::Cbc));
        assert_eq!(info.version().to_string(), "4.4");

        let info = EncryptionInfo::builder(EncryptionMode::Standard).build()?;
        assert_eq!(info.cipher(), CipherAlgorithm::Aes128);
        assert_eq!(info.chaining(), Some(ChainingMode::Ecb));
        assert_eq!(info.version().to_string(), "4.2");

        let info = EncryptionInfo::builder(EncryptionMode::CryptoApi).build()?;
        assert_eq!(info.cipher(), CipherAlgorithm::Rc4);
        assert_eq!(info.key_bits(), 40);
        assert_eq!(info.chaining(), None);

        let info = EncryptionInfo::builder(EncryptionMode::BinaryRc4).build()?;
        assert_eq!(info.hash(), HashAlgorithm::Md5);
        assert_eq!(info.version().to_string(), "1.1");

        let info = EncryptionInfo::builder(EncryptionMode::Agile)
            .key_bits(256)
            .build()?;
        assert_eq!(info.cipher(), CipherAlgorithm::Aes256);
        Ok(())
    }

    #[test]
    fn builder_rejects() {
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::Standard)
                .cipher(CipherAlgorithm::Rc4)
                .build(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::Standard)
                .chaining(ChainingMode::Cbc)
                .build(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::Agile)
                .hash(HashAlgorithm::Md5)
                .build(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::Agile)
                .cipher(CipherAlgorithm::Aes128)
                .key_bits(256)
                .build(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::CryptoApi)
                .key_bits(44)
                .build(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::BinaryRc4)
                .key_bits(128)
                .build(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::Agile)
                .spin_count(MAX_SPIN_COUNT + 1)
                .build(),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn key_length_policy() {
        assert!(matches!(
            EncryptionInfo::builder(EncryptionMode::Agile)
                .cipher(CipherAlgorithm::Aes256)
                .max_key_bits(128)
                .build(),
            Err(Error::KeyLengthPolicy {
                key_bits: 256,
                max_bits: 128
            })
        ));
        assert!(EncryptionInfo::builder(EncryptionMode::CryptoApi)
            .key_bits(128)
            .max_key_bits(128)
            .build()
            .is_ok());
    }

    #[test]
    fn material_sizes_are_checked() -> Result<()> {
        let mut info = EncryptionInfo::builder(EncryptionMode::Standard).build()?;
        let mut material = KeyMaterial::random(&info);
        assert_eq!(material.verifier.len(), 16);
        assert_eq!(material.verifier_salt.len(), 16);
        assert!(material.key_spec.is_empty());
        material.verifier.pop();
        assert!(matches!(
            info.confirm("pw", &material),
            Err(Error::InvalidOperation(_))
        ));

        let info = EncryptionInfo::builder(EncryptionMode::Agile)
            .cipher(CipherAlgorithm::Aes192)
            .hash(HashAlgorithm::Sha384)
            .spin_count(1)
            .build()?;
        let material = KeyMaterial::random(&info);
        assert_eq!(material.key_spec.len(), 24);
        assert_eq!(material.key_salt.len(), 16);
        assert_eq!(material.integrity_salt.len(), 48);
        Ok(())
    }

    #[test]
    fn parse_rejects() {
        assert!(matches!(
            EncryptionInfo::parse(&[4, 0]),
            Err(Error::InvalidEncryptionInfo(_))
        ));
        assert!(matches!(
            EncryptionInfo::parse(&[4, 0, 3, 0, 0, 0, 0, 0]),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            EncryptionInfo::parse(&[9, 0, 9, 0, 0, 0, 0, 0]),
            Err(Error::InvalidEncryptionInfo(_))
        ));
    }

    #[test]
    fn secret_key_formatting() {
        let key = SecretKey::new(vec![0xab, 0x01]);
        assert_eq!(format!("{key:x}"), "ab01");
        assert_eq!(format!("{key:X}"), "AB01");
        assert_eq!(format!("{key:?}"), "SecretKey(2 bytes)");
    }
}
