//! ECMA-376 *Agile Encryption*
use super::cipher::{aes_apply, hash_password, resize, Direction};
use super::stream::{ChunkCipher, AES_CHUNK_SIZE};
use super::{
    ChainingMode, CipherAlgorithm, HashAlgorithm, KeyMaterial, MaterialSizes, Scheme, SecretKey,
};
use crate::bytes::*;
use crate::error::{Error, Result};
use base64::Engine as _;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use serde::{de::Error as _, Deserialize, Deserializer};
use tracing::{debug, warn};

const NS_ENCRYPTION: &str = "http://schemas.microsoft.com/office/2006/encryption";
const NS_CERTIFICATE: &str = "http://schemas.microsoft.com/office/2006/keyEncryptor/certificate";
/// The `uri` of the password key encryptor
pub const PASSWORD_KEY_ENCRYPTOR: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";
/// The reserved value preceding the XML descriptor
const AGILE_RESERVED: u32 = 0x40;

const BLOCK_VERIFIER_INPUT: [u8; 8] = [0xfe, 0xa7, 0xd2, 0x76, 0x3b, 0x4b, 0x9e, 0x79];
const BLOCK_VERIFIER_VALUE: [u8; 8] = [0xd7, 0xaa, 0x0f, 0x6d, 0x30, 0x61, 0x34, 0x4e];
const BLOCK_KEY_VALUE: [u8; 8] = [0x14, 0x6e, 0x0b, 0xe7, 0xab, 0xac, 0xd0, 0xd6];
const BLOCK_INTEGRITY_KEY: [u8; 8] = [0x5f, 0xb2, 0xad, 0x01, 0x0c, 0xb9, 0xe1, 0xf6];
const BLOCK_INTEGRITY_VALUE: [u8; 8] = [0xa0, 0x67, 0x7f, 0x02, 0xb2, 0x2c, 0x84, 0x33];

fn invalid(msg: String) -> Error {
    Error::InvalidEncryptionInfo(msg)
}

/// A base64-encoded binary sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Base64Binary(pub Vec<u8>);

impl Base64Binary {
    fn encode(&self) -> String {
        base64::prelude::BASE64_STANDARD.encode(&self.0)
    }
}

impl<'de> Deserialize<'de> for Base64Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        base64::prelude::BASE64_STANDARD
            .decode(s.trim())
            .map(Base64Binary)
            .map_err(|e| D::Error::custom(format!("Invalid Base64Binary value ({s}): {e}")))
    }
}

/// A complex type that specifies the encryption used within this element
#[derive(Deserialize, Debug, Clone)]
pub struct CtKeyData {
    /// The number of bytes used by a salt
    #[serde(rename = "@saltSize")]
    pub salt_size: usize,
    /// The number of bytes used to encrypt one block of data
    #[serde(rename = "@blockSize")]
    pub block_size: usize,
    /// The number of bits used by an encryption algorithm
    #[serde(rename = "@keyBits")]
    pub key_bits: usize,
    /// The number of bytes used by a hash value
    #[serde(rename = "@hashSize")]
    pub hash_size: usize,
    /// The cipher algorithm
    #[serde(rename = "@cipherAlgorithm")]
    pub cipher_algorithm: String,
    /// The chaining mode used by cipher_algorithm
    #[serde(rename = "@cipherChaining")]
    pub cipher_chaining: String,
    /// The hashing algorithm
    #[serde(rename = "@hashAlgorithm")]
    pub hash_algorithm: String,
    /// Randomly generated salt
    #[serde(rename = "@saltValue")]
    pub salt_value: Base64Binary,
}

/// Data used to verify whether the encrypted data passes an integrity check
#[derive(Deserialize, Debug, Clone)]
pub struct CtDataIntegrity {
    /// Encrypted key used for encrypting the hmac
    #[serde(rename = "@encryptedHmacKey")]
    pub encrypted_hmac_key: Base64Binary,
    /// Encrypted hmac
    #[serde(rename = "@encryptedHmacValue")]
    pub encrypted_hmac_value: Base64Binary,
}

/// Intermediate key and related encryption data
#[derive(Deserialize, Debug, Clone)]
pub struct CtPasswordKeyEncryptor {
    /// The number of bytes used by a salt
    #[serde(rename = "@saltSize")]
    pub salt_size: usize,
    /// The number of bytes used to encrypt one block of data
    #[serde(rename = "@blockSize")]
    pub block_size: usize,
    /// The number of bits used by an encryption algorithm
    #[serde(rename = "@keyBits")]
    pub key_bits: usize,
    /// The number of bytes used by a hash value
    #[serde(rename = "@hashSize")]
    pub hash_size: usize,
    /// The cipher algorithm
    #[serde(rename = "@cipherAlgorithm")]
    pub cipher_algorithm: String,
    /// The chaining mode used by cipher_algorithm
    #[serde(rename = "@cipherChaining")]
    pub cipher_chaining: String,
    /// The hashing algorithm
    #[serde(rename = "@hashAlgorithm")]
    pub hash_algorithm: String,
    /// Randomly generated salt
    #[serde(rename = "@saltValue")]
    pub salt_value: Base64Binary,
    /// The number of times to iterate the password hash when creating the key
    #[serde(rename = "@spinCount")]
    pub spin_count: u32,
    /// Verifier input (encrypted)
    #[serde(rename = "@encryptedVerifierHashInput")]
    pub encrypted_verifier_hash_input: Base64Binary,
    /// Verifier hash (encrypted)
    #[serde(rename = "@encryptedVerifierHashValue")]
    pub encrypted_verifier_hash_value: Base64Binary,
    /// Intermediate key
    #[serde(rename = "@encryptedKeyValue")]
    pub encrypted_key_value: Base64Binary,
}

impl CtPasswordKeyEncryptor {
    fn derive_key_final(&self, partial: &[u8], block_key: &[u8]) -> Result<Vec<u8>> {
        // Final (hash + blockKey)
        let hash = self.cd_hash()?.hash(&[partial, block_key]);
        Ok(resize(hash, self.cd_key_size(), 0x36))
    }

    fn get_key(&self, password: &str) -> Result<Option<Vec<u8>>> {
        let hash = self.cd_hash()?;
        let partial_key = hash_password(hash, self.cd_salt_value(), password, self.spin_count);
        let iv = self.cd_iv(None)?;
        let verifier_hash_input_key = self.derive_key_final(&partial_key, &BLOCK_VERIFIER_INPUT)?;
        let mut verifier_hash_input = self.cd_crypt(
            &verifier_hash_input_key,
            &iv,
            &self.encrypted_verifier_hash_input.0,
            Direction::Decrypt,
        )?;
        verifier_hash_input.truncate(self.salt_size);
        let computed_hash = hash.hash(&[&verifier_hash_input]);
        let verifier_hash_value_key = self.derive_key_final(&partial_key, &BLOCK_VERIFIER_VALUE)?;
        let verifier_hash_value = self.cd_crypt(
            &verifier_hash_value_key,
            &iv,
            &self.encrypted_verifier_hash_value.0,
            Direction::Decrypt,
        )?;
        if verifier_hash_value.get(0..computed_hash.len()) != Some(computed_hash.as_slice()) {
            return Ok(None);
        }
        let intermediate_key = self.derive_key_final(&partial_key, &BLOCK_KEY_VALUE)?;
        let key = self.cd_crypt(
            &intermediate_key,
            &iv,
            &self.encrypted_key_value.0,
            Direction::Decrypt,
        )?;
        Ok(Some(key))
    }

    fn set_key(&mut self, password: &str, material: &KeyMaterial) -> Result<()> {
        let hash = self.cd_hash()?;
        self.salt_value = Base64Binary(material.verifier_salt.clone());
        let partial_key = hash_password(hash, self.cd_salt_value(), password, self.spin_count);
        let iv = self.cd_iv(None)?;
        let k = self.derive_key_final(&partial_key, &BLOCK_VERIFIER_INPUT)?;
        self.encrypted_verifier_hash_input = Base64Binary(self.cd_crypt(
            &k,
            &iv,
            &material.verifier,
            Direction::Encrypt,
        )?);
        let k = self.derive_key_final(&partial_key, &BLOCK_VERIFIER_VALUE)?;
        self.encrypted_verifier_hash_value = Base64Binary(self.cd_crypt(
            &k,
            &iv,
            &hash.hash(&[&material.verifier]),
            Direction::Encrypt,
        )?);
        let k = self.derive_key_final(&partial_key, &BLOCK_KEY_VALUE)?;
        self.encrypted_key_value = Base64Binary(self.cd_crypt(
            &k,
            &iv,
            &material.key_spec,
            Direction::Encrypt,
        )?);
        Ok(())
    }
}

/// Key encryptor
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CtKeyEncryptor {
    /// Intermediate key data
    pub encrypted_key: CtPasswordKeyEncryptor,
    /// The key encryptor type
    #[serde(rename = "@uri")]
    pub uri: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CtKeyEncryptors {
    #[serde(default)]
    key_encryptor: Vec<CtKeyEncryptor>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CtEncryption {
    key_data: CtKeyData,
    data_integrity: Option<CtDataIntegrity>,
    key_encryptors: CtKeyEncryptors,
}

/// *Agile encryption* data
#[derive(Debug, Clone)]
pub struct AgileEncryption {
    /// Encryption key data
    pub key_data: CtKeyData,
    /// Data integrity
    pub data_integrity: Option<CtDataIntegrity>,
    /// Key encryptors
    pub key_encryptors: Vec<CtKeyEncryptor>,
    /// The data cipher
    pub cipher: CipherAlgorithm,
    /// The data chaining mode
    pub chaining: ChainingMode,
    /// The data hash
    pub hash: HashAlgorithm,
}

impl AgileEncryption {
    /// Parse an *agile encryption* record (following the version)
    pub fn new(r: &mut &[u8]) -> Result<Self> {
        let reserved = rdu32le(r)?;
        if reserved != AGILE_RESERVED {
            debug!("Unexpected agile reserved value 0x{reserved:x}");
        }
        let ct: CtEncryption = quick_xml::de::from_reader(&mut *r)
            .map_err(|e| invalid(format!("Invalid Agile EncryptionInfo: {e}")))?;
        let ae = Self {
            cipher: ct.key_data.cd_cipher()?,
            chaining: ct.key_data.cd_chaining()?,
            hash: ct.key_data.cd_hash()?,
            key_data: ct.key_data,
            data_integrity: ct.data_integrity,
            key_encryptors: ct.key_encryptors.key_encryptor,
        };
        ae.validate()?;
        Ok(ae)
    }

    /// Fresh, unconfirmed parameters
    pub(crate) fn with_params(
        cipher: CipherAlgorithm,
        hash: HashAlgorithm,
        chaining: ChainingMode,
        spin_count: u32,
    ) -> Self {
        let key_bits = cipher.key_bits() as usize;
        let block_size = cipher.block_size();
        let chaining_name = chaining_name(chaining).to_string();
        let encrypted = |len: usize| Base64Binary(vec![0u8; round_up(len, block_size)]);
        Self {
            key_data: CtKeyData {
                salt_size: block_size,
                block_size,
                key_bits,
                hash_size: hash.size(),
                cipher_algorithm: "AES".to_string(),
                cipher_chaining: chaining_name.clone(),
                hash_algorithm: hash.to_string(),
                salt_value: Base64Binary(vec![0u8; block_size]),
            },
            data_integrity: None,
            key_encryptors: vec![CtKeyEncryptor {
                encrypted_key: CtPasswordKeyEncryptor {
                    salt_size: block_size,
                    block_size,
                    key_bits,
                    hash_size: hash.size(),
                    cipher_algorithm: "AES".to_string(),
                    cipher_chaining: chaining_name,
                    hash_algorithm: hash.to_string(),
                    salt_value: Base64Binary(vec![0u8; block_size]),
                    spin_count,
                    encrypted_verifier_hash_input: encrypted(block_size),
                    encrypted_verifier_hash_value: encrypted(hash.size()),
                    encrypted_key_value: encrypted(key_bits / 8),
                },
                uri: PASSWORD_KEY_ENCRYPTOR.to_string(),
            }],
            cipher,
            chaining,
            hash,
        }
    }

    fn validate(&self) -> Result<()> {
        let kd = &self.key_data;
        kd.cd_validate()
            .map_err(|e| invalid(format!("Invalid keyData: {e}")))?;
        for ke in self.key_encryptors.iter() {
            if ke.uri != PASSWORD_KEY_ENCRYPTOR {
                debug!("Skipping key encryptor {}", ke.uri);
                continue;
            }
            let ek = &ke.encrypted_key;
            ek.cd_validate()
                .map_err(|e| invalid(format!("Invalid PasswordKeyEncryptor: {e}")))?;
            if !(1..=super::MAX_SPIN_COUNT).contains(&ek.spin_count) {
                return Err(invalid(format!(
                    "Invalid PasswordKeyEncryptor: invalid SpinCount ({})",
                    ek.spin_count
                )));
            }
            if ek.encrypted_verifier_hash_input.0.len() < ek.salt_size {
                return Err(invalid(format!(
                    "Invalid PasswordKeyEncryptor: invalid encryptedVerifierHashInput length {} vs {}",
                    ek.encrypted_verifier_hash_input.0.len(),
                    ek.salt_size,
                )));
            }
            if ek.encrypted_verifier_hash_value.0.len() < ek.hash_size {
                return Err(invalid(format!(
                    "Invalid PasswordKeyEncryptor: invalid encryptedVerifierHashValue length {} vs {}",
                    ek.encrypted_verifier_hash_value.0.len(),
                    ek.hash_size,
                )));
            }
            if ek.encrypted_key_value.0.len() < kd.cd_key_size() {
                return Err(invalid(format!(
                    "Invalid PasswordKeyEncryptor: invalid encryptedKeyValue length {} vs {}",
                    ek.encrypted_key_value.0.len(),
                    kd.cd_key_size(),
                )));
            }
        }
        if let Some(di) = &self.data_integrity {
            if di.encrypted_hmac_key.0.len() < kd.hash_size
                || di.encrypted_hmac_value.0.len() < kd.hash_size
            {
                return Err(invalid("Invalid dataIntegrity lengths".to_string()));
            }
        }
        Ok(())
    }

    /// The password key encryptor
    pub fn password_key_encryptor(&self) -> Option<&CtPasswordKeyEncryptor> {
        self.key_encryptors
            .iter()
            .find(|ke| ke.uri == PASSWORD_KEY_ENCRYPTOR)
            .map(|ke| &ke.encrypted_key)
    }

    fn password_key_encryptor_mut(&mut self) -> Result<&mut CtPasswordKeyEncryptor> {
        self.key_encryptors
            .iter_mut()
            .find(|ke| ke.uri == PASSWORD_KEY_ENCRYPTOR)
            .map(|ke| &mut ke.encrypted_key)
            .ok_or_else(|| invalid("no password key encryptor".to_string()))
    }

    fn hmac_key(&self, key: &SecretKey, di: &CtDataIntegrity) -> Result<Vec<u8>> {
        let kd = &self.key_data;
        let iv = kd.cd_iv(Some(&BLOCK_INTEGRITY_KEY))?;
        let mut hmac_key =
            kd.cd_crypt(key.as_slice(), &iv, &di.encrypted_hmac_key.0, Direction::Decrypt)?;
        hmac_key.truncate(kd.hash_size);
        Ok(hmac_key)
    }

    /// Computes and stores the HMAC of the whole `EncryptedPackage` stream
    ///
    /// The HMAC key comes from the `dataIntegrity` element set up on confirmation
    pub(crate) fn update_integrity(&mut self, key: &SecretKey, package: &[u8]) -> Result<()> {
        let di = self
            .data_integrity
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("password not confirmed".to_string()))?;
        let hmac_key = self.hmac_key(key, di)?;
        let hmac = self.hash.hmac(&hmac_key, &[package])?;
        let kd = &self.key_data;
        let iv = kd.cd_iv(Some(&BLOCK_INTEGRITY_VALUE))?;
        let value = kd.cd_crypt(key.as_slice(), &iv, &hmac, Direction::Encrypt)?;
        if let Some(di) = self.data_integrity.as_mut() {
            di.encrypted_hmac_value = Base64Binary(value);
        }
        Ok(())
    }

    /// Checks the HMAC of the whole `EncryptedPackage` stream
    pub fn verify_integrity(&self, key: &SecretKey, package: &[u8]) -> Result<()> {
        let di = self
            .data_integrity
            .as_ref()
            .ok_or_else(|| invalid("no dataIntegrity element".to_string()))?;
        let hmac_key = self.hmac_key(key, di)?;
        let kd = &self.key_data;
        let iv = kd.cd_iv(Some(&BLOCK_INTEGRITY_VALUE))?;
        let mut expected =
            kd.cd_crypt(key.as_slice(), &iv, &di.encrypted_hmac_value.0, Direction::Decrypt)?;
        expected.truncate(kd.hash_size);
        let computed = self.hash.hmac(&hmac_key, &[package])?;
        if computed == expected {
            Ok(())
        } else {
            warn!("Data integrity HMAC mismatch");
            Err(Error::IntegrityMismatch)
        }
    }

    fn write_xml(&self) -> Result<Vec<u8>> {
        fn xml_err<E: std::fmt::Display>(e: E) -> Error {
            invalid(format!("Failed to write the agile descriptor: {e}"))
        }
        let mut w = quick_xml::Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(xml_err)?;
        let mut root = BytesStart::new("encryption");
        root.push_attribute(("xmlns", NS_ENCRYPTION));
        root.push_attribute(("xmlns:p", PASSWORD_KEY_ENCRYPTOR));
        root.push_attribute(("xmlns:c", NS_CERTIFICATE));
        w.write_event(Event::Start(root)).map_err(xml_err)?;

        let kd = &self.key_data;
        let mut key_data = BytesStart::new("keyData");
        push_crypto_data(&mut key_data, kd);
        w.write_event(Event::Empty(key_data)).map_err(xml_err)?;

        if let Some(di) = &self.data_integrity {
            let mut integrity = BytesStart::new("dataIntegrity");
            integrity.push_attribute(("encryptedHmacKey", di.encrypted_hmac_key.encode().as_str()));
            integrity.push_attribute((
                "encryptedHmacValue",
                di.encrypted_hmac_value.encode().as_str(),
            ));
            w.write_event(Event::Empty(integrity)).map_err(xml_err)?;
        }

        w.write_event(Event::Start(BytesStart::new("keyEncryptors")))
            .map_err(xml_err)?;
        for ke in self.key_encryptors.iter() {
            let mut encryptor = BytesStart::new("keyEncryptor");
            encryptor.push_attribute(("uri", ke.uri.as_str()));
            w.write_event(Event::Start(encryptor)).map_err(xml_err)?;
            let ek = &ke.encrypted_key;
            let mut encrypted_key = BytesStart::new("p:encryptedKey");
            encrypted_key.push_attribute(("spinCount", ek.spin_count.to_string().as_str()));
            push_crypto_data(&mut encrypted_key, ek);
            encrypted_key.push_attribute((
                "encryptedVerifierHashInput",
                ek.encrypted_verifier_hash_input.encode().as_str(),
            ));
            encrypted_key.push_attribute((
                "encryptedVerifierHashValue",
                ek.encrypted_verifier_hash_value.encode().as_str(),
            ));
            encrypted_key.push_attribute((
                "encryptedKeyValue",
                ek.encrypted_key_value.encode().as_str(),
            ));
            w.write_event(Event::Empty(encrypted_key)).map_err(xml_err)?;
            w.write_event(Event::End(BytesEnd::new("keyEncryptor")))
                .map_err(xml_err)?;
        }
        w.write_event(Event::End(BytesEnd::new("keyEncryptors")))
            .map_err(xml_err)?;
        w.write_event(Event::End(BytesEnd::new("encryption")))
            .map_err(xml_err)?;
        Ok(w.into_inner())
    }
}

fn chaining_name(chaining: ChainingMode) -> &'static str {
    match chaining {
        ChainingMode::Cfb => "ChainingModeCFB",
        _ => "ChainingModeCBC",
    }
}

fn push_crypto_data<T: CryptoData>(elem: &mut BytesStart, cd: &T) {
    elem.push_attribute(("saltSize", cd.cd_salt_size().to_string().as_str()));
    elem.push_attribute(("blockSize", cd.cd_block_size().to_string().as_str()));
    elem.push_attribute(("keyBits", cd.cd_key_bits().to_string().as_str()));
    elem.push_attribute(("hashSize", cd.cd_hash_size().to_string().as_str()));
    elem.push_attribute(("cipherAlgorithm", cd.cd_cipher_algorithm()));
    elem.push_attribute(("cipherChaining", cd.cd_cipher_chaining()));
    elem.push_attribute(("hashAlgorithm", cd.cd_hash_algorithm()));
    elem.push_attribute((
        "saltValue",
        base64::prelude::BASE64_STANDARD
            .encode(cd.cd_salt_value())
            .as_str(),
    ));
}

impl Scheme for AgileEncryption {
    fn verify(&self, password: &str) -> Option<SecretKey> {
        let ek = self.password_key_encryptor()?;
        match ek.get_key(password) {
            Ok(Some(mut key)) => {
                key.truncate(self.key_data.cd_key_size());
                Some(SecretKey::new(key))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to verify the password: {e}");
                None
            }
        }
    }

    fn confirm(&mut self, password: &str, material: &KeyMaterial) -> Result<SecretKey> {
        self.key_data.salt_value = Base64Binary(material.key_salt.clone());
        self.password_key_encryptor_mut()?
            .set_key(password, material)?;
        let key = SecretKey::new(material.key_spec.clone());
        let kd = &self.key_data;
        let iv = kd.cd_iv(Some(&BLOCK_INTEGRITY_KEY))?;
        let encrypted_hmac_key = kd.cd_crypt(
            key.as_slice(),
            &iv,
            &material.integrity_salt,
            Direction::Encrypt,
        )?;
        let encrypted_hmac_value = vec![0u8; round_up(kd.hash_size, kd.block_size)];
        self.data_integrity = Some(CtDataIntegrity {
            encrypted_hmac_key: Base64Binary(encrypted_hmac_key),
            encrypted_hmac_value: Base64Binary(encrypted_hmac_value),
        });
        Ok(key)
    }

    fn chunk_cipher(&self, key: &SecretKey) -> Result<Box<dyn ChunkCipher>> {
        Ok(Box::new(AgileChunks {
            key_data: self.key_data.clone(),
            key: key.clone(),
        }))
    }

    fn material_sizes(&self) -> MaterialSizes {
        let salt_size = self
            .password_key_encryptor()
            .map(|ek| ek.salt_size)
            .unwrap_or(self.key_data.salt_size);
        MaterialSizes {
            key_spec: self.key_data.cd_key_size(),
            key_salt: self.key_data.salt_size,
            verifier: salt_size,
            verifier_salt: salt_size,
            integrity_salt: self.key_data.hash_size,
        }
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&AGILE_RESERVED.to_le_bytes());
        out.extend_from_slice(&self.write_xml()?);
        Ok(())
    }
}

/// 4096 byte segments with IV = `hash(keySalt + LE32(segment))`
struct AgileChunks {
    key_data: CtKeyData,
    key: SecretKey,
}

impl AgileChunks {
    fn apply(&self, index: u32, buf: &mut [u8], direction: Direction) -> Result<()> {
        let kd = &self.key_data;
        let iv = kd.cd_iv(Some(&index.to_le_bytes()))?;
        aes_apply(
            kd.cd_cipher()?,
            kd.cd_chaining()?,
            self.key.as_slice(),
            &iv,
            buf,
            direction,
        )
    }
}

impl ChunkCipher for AgileChunks {
    fn chunk_size(&self) -> usize {
        AES_CHUNK_SIZE
    }

    fn block_size(&self) -> usize {
        self.key_data.block_size
    }

    fn encrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        self.apply(index, buf, Direction::Encrypt)
    }

    fn decrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
        self.apply(index, buf, Direction::Decrypt)
    }
}

trait CryptoData {
    fn cd_salt_size(&self) -> usize;
    fn cd_salt_value(&self) -> &[u8];
    fn cd_cipher_algorithm(&self) -> &str;
    fn cd_key_bits(&self) -> usize;
    fn cd_block_size(&self) -> usize;
    fn cd_hash_algorithm(&self) -> &str;
    fn cd_hash_size(&self) -> usize;
    fn cd_cipher_chaining(&self) -> &str;

    fn cd_key_size(&self) -> usize {
        self.cd_key_bits() / 8
    }

    fn cd_cipher(&self) -> Result<CipherAlgorithm> {
        match self.cd_cipher_algorithm() {
            "AES" => u32::try_from(self.cd_key_bits())
                .ok()
                .and_then(CipherAlgorithm::aes)
                .ok_or_else(|| {
                    invalid(format!("invalid keyBits ({}) for AES", self.cd_key_bits()))
                }),
            algo => Err(Error::UnsupportedAlgorithm(format!(
                "agile cipherAlgorithm {algo}"
            ))),
        }
    }

    fn cd_chaining(&self) -> Result<ChainingMode> {
        match self.cd_cipher_chaining() {
            "ChainingModeCBC" => Ok(ChainingMode::Cbc),
            "ChainingModeCFB" => Ok(ChainingMode::Cfb),
            chaining => Err(Error::UnsupportedAlgorithm(format!(
                "agile cipherChaining {chaining}"
            ))),
        }
    }

    fn cd_hash(&self) -> Result<HashAlgorithm> {
        match self.cd_hash_algorithm() {
            "SHA1" => Ok(HashAlgorithm::Sha1),
            "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA512" => Ok(HashAlgorithm::Sha512),
            algo => Err(Error::UnsupportedAlgorithm(format!(
                "agile hashAlgorithm {algo}"
            ))),
        }
    }

    fn cd_validate(&self) -> Result<()> {
        let salt_size = self.cd_salt_size();
        if !(1..=65536).contains(&salt_size) {
            return Err(invalid(format!("invalid saltSize ({})", salt_size)));
        }
        if salt_size != self.cd_salt_value().len() {
            return Err(invalid(format!(
                "saltSize mismatch ({} vs {})",
                salt_size,
                self.cd_salt_value().len()
            )));
        }
        let block_size = self.cd_block_size();
        let key_bits = self.cd_key_bits();
        let cipher = self.cd_cipher()?;
        if block_size != cipher.block_size() {
            return Err(invalid(format!(
                "invalid blockSize ({}) for {} with keyBits ({})",
                block_size, cipher, key_bits
            )));
        }
        self.cd_chaining()?;
        let hash = self.cd_hash()?;
        if hash.size() != self.cd_hash_size() {
            return Err(invalid(format!(
                "hashSize mismatch ({} vs {})",
                self.cd_hash_size(),
                hash.size(),
            )));
        }
        Ok(())
    }

    /// Encrypts or decrypts `data` zero padded to the block size
    fn cd_crypt(&self, key: &[u8], iv: &[u8], data: &[u8], direction: Direction) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        buf.resize(round_up(data.len(), self.cd_block_size()), 0);
        aes_apply(self.cd_cipher()?, self.cd_chaining()?, key, iv, &mut buf, direction)?;
        Ok(buf)
    }

    fn cd_iv(&self, block_key: Option<&[u8]>) -> Result<Vec<u8>> {
        let iv = if let Some(block_key) = block_key {
            // Hash of salt + block_key
            self.cd_hash()?.hash(&[self.cd_salt_value(), block_key])
        } else {
            // Just the salt
            self.cd_salt_value().to_vec()
        };
        Ok(resize(iv, self.cd_block_size(), 0x36))
    }
}

impl CryptoData for CtKeyData {
    fn cd_salt_size(&self) -> usize {
        self.salt_size
    }
    fn cd_salt_value(&self) -> &[u8] {
        self.salt_value.0.as_slice()
    }
    fn cd_cipher_algorithm(&self) -> &str {
        self.cipher_algorithm.as_str()
    }
    fn cd_key_bits(&self) -> usize {
        self.key_bits
    }
    fn cd_block_size(&self) -> usize {
        self.block_size
    }
    fn cd_hash_algorithm(&self) -> &str {
        self.hash_algorithm.as_str()
    }
    fn cd_hash_size(&self) -> usize {
        self.hash_size
    }
    fn cd_cipher_chaining(&self) -> &str {
        self.cipher_chaining.as_str()
    }
}

impl CryptoData for CtPasswordKeyEncryptor {
    fn cd_salt_size(&self) -> usize {
        self.salt_size
    }
    fn cd_salt_value(&self) -> &[u8] {
        self.salt_value.0.as_slice()
    }
    fn cd_cipher_algorithm(&self) -> &str {
        self.cipher_algorithm.as_str()
    }
    fn cd_key_bits(&self) -> usize {
        self.key_bits
    }
    fn cd_block_size(&self) -> usize {
        self.block_size
    }
    fn cd_hash_algorithm(&self) -> &str {
        self.hash_algorithm.as_str()
    }
    fn cd_hash_size(&self) -> usize {
        self.hash_size
    }
    fn cd_cipher_chaining(&self) -> &str {
        self.cipher_chaining.as_str()
    }
}
