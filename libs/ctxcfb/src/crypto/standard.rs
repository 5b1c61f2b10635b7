//! ECMA-376 *Standard Encryption*
use super::cipher::{aes_apply, hash_password, Direction};
use super::stream::{ChunkCipher, AES_CHUNK_SIZE};
use super::{
    ChainingMode, CipherAlgorithm, HashAlgorithm, KeyMaterial, MaterialSizes, Scheme, SecretKey,
    Version,
};
use crate::bytes::*;
use crate::error::{Error, Result};
use std::io::Read;
use tracing::{debug, warn};

const ALG_ID_RC4: u32 = 0x6801;
const ALG_ID_AES128: u32 = 0x660e;
const ALG_ID_AES192: u32 = 0x660f;
const ALG_ID_AES256: u32 = 0x6610;
const ALG_ID_SHA1: u32 = 0x8004;
const PROVIDER_RC4: u32 = 0x0001;
const PROVIDER_AES: u32 = 0x0018;
const CSP_AES: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";
const CSP_RC4_BASE: &str = "Microsoft Base Cryptographic Provider v1.0";
const CSP_RC4_ENHANCED: &str = "Microsoft Enhanced Cryptographic Provider v1.0";

fn invalid(msg: String) -> Error {
    Error::InvalidEncryptionInfo(msg)
}

/// Specifies properties of the encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionHeaderFlags {
    /// Specifies whether CryptoAPI RC4 or ECMA-376 encryption is used
    pub crypto_api: bool,
    /// Specifies whether document properties are unencrypted
    pub doc_props: bool,
    /// Indicates if extensible encryption is used
    pub external: bool,
    /// Indicates that the protected content is an ECMA-376 document
    pub aes: bool,
}

impl EncryptionHeaderFlags {
    fn new<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self::from_bits(rdu32le(r)?))
    }

    fn from_bits(v: u32) -> Self {
        Self {
            crypto_api: v & 0b100 != 0,
            doc_props: v & 0b1000 != 0,
            external: v & 0b1_0000 != 0,
            aes: v & 0b10_0000 != 0,
        }
    }

    /// The flags as stored on disk
    pub fn bits(&self) -> u32 {
        (u32::from(self.crypto_api) << 2)
            | (u32::from(self.doc_props) << 3)
            | (u32::from(self.external) << 4)
            | (u32::from(self.aes) << 5)
    }
}

/// Encryption properties for an encrypted stream
#[derive(Debug, Clone)]
pub struct EncryptionHeader {
    /// The properties of the encryption algorithm
    pub flags: EncryptionHeaderFlags,
    /// The encryption algorithm
    pub alg_id: u32,
    /// The hashing algorithm (always SHA-1)
    pub alg_id_hash: u32,
    /// The number of bits in the encryption key
    pub key_bits: u32,
    /// Implementation-specific value that corresponds to constants accepted by the specified CSP
    pub provider_type: u32,
    /// A value that is undefined and must be ignored
    pub reserved1: u32,
    /// A value that must be 0 and must be ignored
    pub reserved2: u32,
    /// The CSP name
    pub csp_name: String,
    /// The encryption algorithm
    pub algorithm: CipherAlgorithm,
}

impl EncryptionHeader {
    fn new(mut r: &[u8]) -> Result<Self> {
        let flags = EncryptionHeaderFlags::new(&mut r)?;
        let size_extra = rdu32le(&mut r)?;
        if size_extra != 0 {
            return Err(invalid(format!(
                "Invalid EncryptionHeader SizeExtra ({size_extra})"
            )));
        }
        let alg_id = rdu32le(&mut r)?;
        let algorithm = if !flags.crypto_api || flags.external {
            None
        } else if !flags.aes {
            match alg_id {
                0 | ALG_ID_RC4 => Some(CipherAlgorithm::Rc4),
                _ => None,
            }
        } else {
            match alg_id {
                0 | ALG_ID_AES128 => Some(CipherAlgorithm::Aes128),
                ALG_ID_AES192 => Some(CipherAlgorithm::Aes192),
                ALG_ID_AES256 => Some(CipherAlgorithm::Aes256),
                _ => None,
            }
        };
        let algorithm = algorithm
            .ok_or_else(|| invalid(format!("Invalid EncryptionHeader AlgId 0x{alg_id:x}")))?;
        let alg_id_hash = rdu32le(&mut r)?;
        if ![0, ALG_ID_SHA1].contains(&alg_id_hash) {
            return Err(invalid(format!(
                "Invalid EncryptionHeader AlgIDHash (0x{alg_id_hash:x})"
            )));
        }
        let mut key_bits = rdu32le(&mut r)?;
        if key_bits == 0 && algorithm == CipherAlgorithm::Rc4 {
            key_bits = 40;
        }
        match algorithm {
            CipherAlgorithm::Rc4 if key_bits & 7 == 0 && (40..=128).contains(&key_bits) => {}
            CipherAlgorithm::Aes128 if key_bits == 128 => {}
            CipherAlgorithm::Aes192 if key_bits == 192 => {}
            CipherAlgorithm::Aes256 if key_bits == 256 => {}
            _ => {
                return Err(invalid(format!(
                    "Invalid EncryptionHeader KeySize ({key_bits}) for AlgID 0x{alg_id:x}"
                )));
            }
        }
        let provider_type = rdu32le(&mut r)?;
        let reserved1 = rdu32le(&mut r)?;
        let reserved2 = rdu32le(&mut r)?;
        let csp_name = from_utf16le(r);
        Ok(Self {
            flags,
            alg_id,
            alg_id_hash,
            key_bits,
            provider_type,
            reserved1,
            reserved2,
            csp_name,
            algorithm,
        })
    }

    /// A fresh header for the given algorithm
    fn for_algorithm(algorithm: CipherAlgorithm, key_bits: u32) -> Self {
        let (alg_id, provider_type, csp_name) = match algorithm {
            CipherAlgorithm::Rc4 if key_bits == 40 => (ALG_ID_RC4, PROVIDER_RC4, CSP_RC4_BASE),
            CipherAlgorithm::Rc4 => (ALG_ID_RC4, PROVIDER_RC4, CSP_RC4_ENHANCED),
            CipherAlgorithm::Aes128 => (ALG_ID_AES128, PROVIDER_AES, CSP_AES),
            CipherAlgorithm::Aes192 => (ALG_ID_AES192, PROVIDER_AES, CSP_AES),
            CipherAlgorithm::Aes256 => (ALG_ID_AES256, PROVIDER_AES, CSP_AES),
        };
        Self {
            flags: EncryptionHeaderFlags {
                crypto_api: true,
                doc_props: false,
                external: false,
                aes: algorithm != CipherAlgorithm::Rc4,
            },
            alg_id,
            alg_id_hash: ALG_ID_SHA1,
            key_bits,
            provider_type,
            reserved1: 0,
            reserved2: 0,
            csp_name: csp_name.to_string(),
            algorithm,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // SizeExtra
        out.extend_from_slice(&self.alg_id.to_le_bytes());
        out.extend_from_slice(&self.alg_id_hash.to_le_bytes());
        out.extend_from_slice(&self.key_bits.to_le_bytes());
        out.extend_from_slice(&self.provider_type.to_le_bytes());
        out.extend_from_slice(&self.reserved1.to_le_bytes());
        out.extend_from_slice(&self.reserved2.to_le_bytes());
        out.extend_from_slice(&utf16le(&self.csp_name));
        out.extend_from_slice(&[0, 0]);
    }

    /// The key size in bytes
    pub fn key_size(&self) -> usize {
        self.key_bits as usize / 8
    }
}

/// Data used to verify the decryption password / key
#[derive(Debug, Clone)]
pub struct EncryptionVerifier {
    /// Salt for key derivation
    pub salt: [u8; 16],
    /// The encrypted verifier
    pub encrypted_verifier: [u8; 16],
    /// The encrypted SHA-1 hash of the verifier
    pub encrypted_verifier_hash: Vec<u8>,
}

impl EncryptionVerifier {
    fn new<R: Read>(r: &mut R, algorithm: CipherAlgorithm) -> Result<Self> {
        let salt_size = rdu32le(r)?;
        if salt_size != 16 {
            return Err(invalid(format!(
                "Invalid EncryptionVerifier SaltSize ({salt_size})"
            )));
        }
        let mut salt = [0u8; 16];
        r.read_exact(&mut salt)?;
        let mut encrypted_verifier = [0u8; 16];
        r.read_exact(&mut encrypted_verifier)?;
        let verifier_hash_size = rdu32le(r)?;
        if verifier_hash_size != 20 {
            // Always sha-1
            return Err(invalid(format!(
                "Invalid EncryptionVerifier VerifierHashSize ({verifier_hash_size})"
            )));
        }
        let mut encrypted_verifier_hash = vec![0u8; Self::hash_len(algorithm)];
        r.read_exact(&mut encrypted_verifier_hash)?;
        Ok(Self {
            salt,
            encrypted_verifier,
            encrypted_verifier_hash,
        })
    }

    /// A zeroed verifier, to be confirmed
    fn empty(algorithm: CipherAlgorithm) -> Self {
        Self {
            salt: [0u8; 16],
            encrypted_verifier: [0u8; 16],
            encrypted_verifier_hash: vec![0u8; Self::hash_len(algorithm)],
        }
    }

    /// The stored hash is padded to the AES block size
    fn hash_len(algorithm: CipherAlgorithm) -> usize {
        match algorithm {
            CipherAlgorithm::Rc4 => 20,
            _ => 32,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.encrypted_verifier);
        out.extend_from_slice(&20u32.to_le_bytes());
        out.extend_from_slice(&self.encrypted_verifier_hash);
    }
}

/// *Standard encryption* data
///
/// The same record layout is shared by the RC4 CryptoAPI mode (see
/// [`CryptoApiEncryption`](super::CryptoApiEncryption))
#[derive(Debug, Clone)]
pub struct StandardEncryption {
    /// Record version
    pub version: Version,
    /// Header flags
    pub flags: EncryptionHeaderFlags,
    /// Header
    pub header: EncryptionHeader,
    /// Verifier
    pub verifier: EncryptionVerifier,
}

impl StandardEncryption {
    const ITERATIONS: u32 = 50_000;

    /// Parse a *standard encryption* record (following the version)
    pub fn new<R: Read>(version: Version, r: &mut R) -> Result<Self> {
        let flags = EncryptionHeaderFlags::new(r)?;
        let hdr_len = rdu32le(r)?;
        if !(32..=1024).contains(&hdr_len) {
            return Err(invalid(format!("Invalid EncryptionHeader size ({hdr_len})")));
        }
        let mut hdr = vec![0u8; hdr_len as usize];
        r.read_exact(&mut hdr)?;
        let header = EncryptionHeader::new(&hdr)?;
        if header.flags != flags {
            return Err(invalid("Incompatible EncryptionInfo flags".to_string()));
        }
        let verifier = EncryptionVerifier::new(r, header.algorithm)?;
        Ok(StandardEncryption {
            version,
            flags,
            header,
            verifier,
        })
    }

    pub(crate) fn for_algorithm(algorithm: CipherAlgorithm, key_bits: u32) -> Self {
        let header = EncryptionHeader::for_algorithm(algorithm, key_bits);
        Self {
            version: Version { major: 4, minor: 2 },
            flags: header.flags,
            verifier: EncryptionVerifier::empty(algorithm),
            header,
        }
    }

    /// Fresh, unconfirmed AES parameters
    pub(crate) fn with_cipher(cipher: CipherAlgorithm) -> Self {
        Self::for_algorithm(cipher, cipher.key_bits())
    }

    /// Serializes the record following the version
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        let mut hdr: Vec<u8> = Vec::new();
        self.header.write(&mut hdr);
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(&(hdr.len() as u32).to_le_bytes());
        out.extend_from_slice(&hdr);
        self.verifier.write(out);
    }

    fn derive_key(&self, password: &str) -> SecretKey {
        let sha1 = HashAlgorithm::Sha1;
        let hash = hash_password(sha1, &self.verifier.salt, password, Self::ITERATIONS);
        // A zero
        let hash = sha1.hash(&[&hash, &0u32.to_le_bytes()]);
        // x1 - filled with 6
        let mut base = [0x36; 64];
        for (x, h) in base.iter_mut().zip(hash.iter()) {
            *x ^= h;
        }
        let x1 = sha1.hash(&[&base]);
        // x2 - filled with \
        let mut base = [0x5c; 64];
        for (x, h) in base.iter_mut().zip(hash.iter()) {
            *x ^= h;
        }
        let x2 = sha1.hash(&[&base]);
        // Truncate to key_size (guaranteed to fit)
        let mut res: Vec<u8> = Vec::with_capacity(20 + 20);
        res.extend_from_slice(&x1);
        res.extend_from_slice(&x2);
        res.truncate(self.header.key_size());
        SecretKey::new(res)
    }

    fn ecb(&self, key: &SecretKey, buf: &mut [u8], direction: Direction) -> Result<()> {
        aes_apply(
            self.header.algorithm,
            ChainingMode::Ecb,
            key.as_slice(),
            &[],
            buf,
            direction,
        )
    }
}

impl Scheme for StandardEncryption {
    fn verify(&self, password: &str) -> Option<SecretKey> {
        let key = self.derive_key(password);
        debug!("Derived a {} bit key", key.as_slice().len() * 8);
        let mut verifier = self.verifier.encrypted_verifier;
        let mut hash = self.verifier.encrypted_verifier_hash.clone();
        if let Err(e) = self
            .ecb(&key, &mut verifier, Direction::Decrypt)
            .and_then(|_| self.ecb(&key, &mut hash, Direction::Decrypt))
        {
            warn!("Failed to decrypt the verifier: {e}");
            return None;
        }
        let computed_hash = HashAlgorithm::Sha1.hash(&[&verifier]);
        if computed_hash.as_slice() == &hash[0..20] {
            Some(key)
        } else {
            None
        }
    }

    fn confirm(&mut self, password: &str, material: &KeyMaterial) -> Result<SecretKey> {
        self.verifier.salt.copy_from_slice(&material.verifier_salt);
        let key = self.derive_key(password);
        let mut verifier = [0u8; 16];
        verifier.copy_from_slice(&material.verifier);
        let mut hash = HashAlgorithm::Sha1.hash(&[&verifier]);
        hash.resize(32, 0);
        self.ecb(&key, &mut verifier, Direction::Encrypt)?;
        self.ecb(&key, &mut hash, Direction::Encrypt)?;
        self.verifier.encrypted_verifier = verifier;
        self.verifier.encrypted_verifier_hash = hash;
        Ok(key)
    }

    fn chunk_cipher(&self, key: &SecretKey) -> Result<Box<dyn ChunkCipher>> {
        Ok(Box::new(EcbChunks {
            algorithm: self.header.algorithm,
            key: key.clone(),
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
        self.write(out);
        Ok(())
    }
}

/// AES-ECB over 4096 byte chunks
struct EcbChunks {
    algorithm: CipherAlgorithm,
    key: SecretKey,
}

impl EcbChunks {
    fn apply(&self, buf: &mut [u8], direction: Direction) -> Result<()> {
        aes_apply(
            self.algorithm,
            ChainingMode::Ecb,
            self.key.as_slice(),
            &[],
            buf,
            direction,
        )
    }
}

impl ChunkCipher for EcbChunks {
    fn chunk_size(&self) -> usize {
        AES_CHUNK_SIZE
    }

    fn block_size(&self) -> usize {
        16
    }

    fn encrypt_chunk(&self, _index: u32, buf: &mut [u8]) -> Result<()> {
        self.apply(buf, Direction::Encrypt)
    }

    fn decrypt_chunk(&self, _index: u32, buf: &mut [u8]) -> Result<()> {
        self.apply(buf, Direction::Decrypt)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn material() -> KeyMaterial {
        KeyMaterial {
            verifier: (0..16).collect(),
            verifier_salt: (100..116).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn flags() {
        let flags = EncryptionHeaderFlags::from_bits(0x24);
        assert!(flags.crypto_api && flags.aes);
        assert!(!flags.doc_props && !flags.external);
        assert_eq!(flags.bits(), 0x24);
        assert_eq!(EncryptionHeaderFlags::from_bits(0x1c).bits(), 0x1c);
    }

    #[test]
    fn record_layout() -> Result<()> {
        let se = StandardEncryption::with_cipher(CipherAlgorithm::Aes256);
        let mut out = Vec::new();
        se.write(&mut out);
        assert_eq!(le_u32(&out, 0), 0x24);
        let hdr_len = le_u32(&out, 4) as usize;
        // 8 fixed fields + CSP name + NUL
        assert_eq!(hdr_len, 32 + (CSP_AES.len() + 1) * 2);
        assert_eq!(le_u32(&out, 8 + 8), ALG_ID_AES256);
        assert_eq!(le_u32(&out, 8 + 12), ALG_ID_SHA1);
        assert_eq!(le_u32(&out, 8 + 16), 256);
        assert_eq!(le_u32(&out, 8 + 20), PROVIDER_AES);
        assert_eq!(out.len(), 8 + hdr_len + 4 + 16 + 16 + 4 + 32);

        let back = StandardEncryption::new(se.version, &mut out.as_slice())?;
        assert_eq!(back.header.algorithm, CipherAlgorithm::Aes256);
        assert_eq!(back.header.csp_name, CSP_AES);
        assert_eq!(back.header.key_size(), 32);
        Ok(())
    }

    #[test]
    fn reserved_fields_survive() -> Result<()> {
        let mut se = StandardEncryption::with_cipher(CipherAlgorithm::Aes128);
        se.header.reserved1 = 0xdead;
        let mut out = Vec::new();
        se.write(&mut out);
        let back = StandardEncryption::new(se.version, &mut out.as_slice())?;
        assert_eq!(back.header.reserved1, 0xdead);
        Ok(())
    }

    #[test]
    fn invalid_records() {
        let se = StandardEncryption::with_cipher(CipherAlgorithm::Aes128);
        let mut out = Vec::new();
        se.write(&mut out);
        // Mismatched flags
        let mut bad = out.clone();
        bad[0] = 0x04;
        assert!(matches!(
            StandardEncryption::new(se.version, &mut bad.as_slice()),
            Err(Error::InvalidEncryptionInfo(_))
        ));
        // AES-128 with a 192 bit key
        let mut bad = out.clone();
        put_u32(&mut bad, 8 + 16, 192);
        assert!(matches!(
            StandardEncryption::new(se.version, &mut bad.as_slice()),
            Err(Error::InvalidEncryptionInfo(_))
        ));
        // Bad salt size
        let mut bad = out.clone();
        let hdr_len = le_u32(&out, 4) as usize;
        put_u32(&mut bad, 8 + hdr_len, 8);
        assert!(matches!(
            StandardEncryption::new(se.version, &mut bad.as_slice()),
            Err(Error::InvalidEncryptionInfo(_))
        ));
        // Truncated verifier
        assert!(matches!(
            StandardEncryption::new(se.version, &mut &out[..out.len() - 1]),
            Err(Error::IO(_))
        ));
    }

    #[test]
    fn confirm_then_verify() -> Result<()> {
        let mut se = StandardEncryption::with_cipher(CipherAlgorithm::Aes128);
        let key = se.confirm("Password1234_", &material())?;
        assert_eq!(key.as_slice().len(), 16);
        assert_eq!(se.verifier.salt[0], 100);
        assert_eq!(se.verify("Password1234_"), Some(key.clone()));
        assert_eq!(se.verify("password1234_"), None);

        let mut again = StandardEncryption::with_cipher(CipherAlgorithm::Aes128);
        assert_eq!(again.confirm("Password1234_", &material())?, key);
        assert_eq!(
            again.verifier.encrypted_verifier_hash,
            se.verifier.encrypted_verifier_hash
        );
        Ok(())
    }
}
