//! Error type shared by the container and the encryption layer
use crate::sniff::FormatKind;
use thiserror::Error;

/// Errors produced by this crate
#[derive(Error, Debug)]
pub enum Error {
    /// The input is not a Compound File; the sniffed format is attached
    #[error("not a compound file (input looks like {0})")]
    NotCompoundFile(FormatKind),

    /// Malformed header, directory or structure
    #[error("malformed compound file: {0}")]
    Format(String),

    /// A FAT or MiniFAT chain loops, leaves the table or disagrees with the stream size
    #[error("corrupt sector chain: {0}")]
    CorruptChain(String),

    /// No entry exists at the requested path
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// A sibling with the same (case-insensitive) name exists already
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Entry names must be 1 to 31 UTF-16 code units long and free of `/ \ : !`
    #[error("invalid entry name {0:?}")]
    InvalidName(String),

    /// The request is not allowed in the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The container was closed
    #[error("compound file used after close")]
    UseAfterClose,

    /// No valid password (or key) was provided
    #[error("wrong password")]
    WrongPassword,

    /// The cipher, hash, key size or chaining combination is not provided
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The key length exceeds the configured policy
    #[error("key length of {key_bits} bits exceeds the policy limit of {max_bits} bits")]
    KeyLengthPolicy {
        /// Requested key size in bits
        key_bits: u32,
        /// Largest key size allowed by the policy
        max_bits: u32,
    },

    /// The cipher stream was closed
    #[error("stream is closed")]
    StreamClosed,

    /// Malformed encryption structures
    #[error("invalid encryption info: {0}")]
    InvalidEncryptionInfo(String),

    /// The agile data integrity HMAC does not match the encrypted package
    #[error("data integrity check failed")]
    IntegrityMismatch,

    /// Configuration parameter value is out of bounds.
    #[error("config parameter {parameter:?} value is out of bounds: {message}")]
    ConfigParameterValue {
        /// Parameter name
        parameter: &'static str,
        /// Explanation
        message: String,
    },

    /// Wrapper for [`Figment::Error`](https://docs.rs/figment/latest/figment/struct.Error.html)
    #[error("config deserialization: {0:?}")]
    ConfigDeserialization(#[from] figment::Error),

    /// Wrapper for
    /// [`tempfile::PersistError`](https://docs.rs/tempfile/latest/tempfile/struct.PersistError.html)
    #[error("failed to persist a temporary file: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// Wrapper for [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html)
    #[error("IO: {0:?}")]
    IO(#[from] std::io::Error),
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::IO(inner) => return inner,
            Error::EntryNotFound(_) => std::io::ErrorKind::NotFound,
            Error::InvalidOperation(_) | Error::InvalidName(_) => std::io::ErrorKind::InvalidInput,
            Error::WrongPassword => std::io::ErrorKind::PermissionDenied,
            Error::UseAfterClose | Error::StreamClosed => std::io::ErrorKind::BrokenPipe,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, e)
    }
}

impl Error {
    /// Recovers a crate error carried inside an [`std::io::Error`]
    ///
    /// `Read` / `Write` / `Seek` implementations in this crate wrap their failures; this
    /// undoes the wrapping so callers can match on the variant
    pub fn from_io(e: std::io::Error) -> Self {
        if !e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Self::IO(e);
        }
        let kind = e.kind();
        match e.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::IO(std::io::Error::new(kind, other)),
            None => Self::IO(kind.into()),
        }
    }
}

/// Result alias with [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
