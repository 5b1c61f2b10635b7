//! Facilities for reading runtime configuration values
use crate::crypto::{
    ChainingMode, CipherAlgorithm, EncryptionInfo, EncryptionMode, HashAlgorithm,
    DEFAULT_MAX_KEY_BITS, DEFAULT_SPIN_COUNT, MAX_SPIN_COUNT,
};
use crate::error::{Error, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::trace;

/// Encryption and container defaults
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Major version of newly created containers (3 or 4)
    #[serde(default = "Config::default_cfb_version")]
    pub cfb_version: u16,

    /// The encryption scheme
    #[serde(default = "Config::default_encryption_mode")]
    pub encryption_mode: EncryptionMode,

    /// The data cipher (the mode default if unset)
    pub cipher: Option<CipherAlgorithm>,

    /// The hash algorithm (the mode default if unset)
    pub hash: Option<HashAlgorithm>,

    /// The key size in bits (the cipher default if unset)
    pub key_bits: Option<u32>,

    /// The chaining mode (the mode default if unset)
    pub chaining: Option<ChainingMode>,

    /// Agile password hash iterations
    #[serde(default = "Config::default_spin_count")]
    pub spin_count: u32,

    /// The largest key size allowed
    #[serde(default = "Config::default_max_key_bits")]
    pub max_key_bits: u32,
}

impl Config {
    /// Constructs `Config` from `ctxcfb.toml` and `CTXCFB__` environment variables
    pub fn new() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("ctxcfb.toml"))
                .merge(Env::prefixed("CTXCFB__").split("__")),
        )
    }

    /// Constructs `Config` from the given providers
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;

        macro_rules! check_range {
            ($parent:ident.$var:ident, $range:expr) => {
                if !$range.contains(&$parent.$var) {
                    Err(Error::ConfigParameterValue {
                        parameter: stringify!($var),
                        message: format!("parameter value should be in {:?}", $range),
                    })?
                }
            };
        }
        check_range!(config.cfb_version, 3..=4);
        check_range!(config.spin_count, 1..=MAX_SPIN_COUNT);
        check_range!(config.max_key_bits, 40..=DEFAULT_MAX_KEY_BITS);

        trace!("final config: {config:#?}");

        Ok(config)
    }

    /// The version of newly created containers
    pub fn cfb_version(&self) -> crate::Version {
        crate::Version::from_major(self.cfb_version).unwrap_or_default()
    }

    /// Builds fresh encryption parameters from the configured settings
    pub fn encryption_info(&self) -> Result<EncryptionInfo> {
        let mut builder = EncryptionInfo::builder(self.encryption_mode)
            .spin_count(self.spin_count)
            .max_key_bits(self.max_key_bits);
        if let Some(cipher) = self.cipher {
            builder = builder.cipher(cipher);
        }
        if let Some(hash) = self.hash {
            builder = builder.hash(hash);
        }
        if let Some(key_bits) = self.key_bits {
            builder = builder.key_bits(key_bits);
        }
        if let Some(chaining) = self.chaining {
            builder = builder.chaining(chaining);
        }
        builder.build()
    }

    fn default_cfb_version() -> u16 {
        3
    }

    fn default_encryption_mode() -> EncryptionMode {
        EncryptionMode::Agile
    }

    fn default_spin_count() -> u32 {
        DEFAULT_SPIN_COUNT
    }

    fn default_max_key_bits() -> u32 {
        DEFAULT_MAX_KEY_BITS
    }
}
