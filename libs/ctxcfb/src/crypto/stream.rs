//! Chunked `EncryptedPackage` streams
//!
//! The stream starts with the payload size (`u64` LE) followed by the encrypted chunks.
//! Each chunk is encrypted independently from the key and its index; the last one is
//! zero padded to the cipher block size.
use super::Encryptor;
use crate::bytes::*;
use crate::error::{Error, Result};
use crate::CompoundFile;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

/// Chunk size of the AES modes
pub(crate) const AES_CHUNK_SIZE: usize = 4096;
/// Chunk size of the RC4 modes
pub(crate) const RC4_CHUNK_SIZE: usize = 512;

/// A cipher whose state only depends on the key and the chunk index
pub(crate) trait ChunkCipher {
    /// The plaintext size of a full chunk
    fn chunk_size(&self) -> usize;
    /// Chunks are padded to a multiple of this
    fn block_size(&self) -> usize;
    /// Encrypts a (padded) chunk in place
    fn encrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()>;
    /// Decrypts a (padded) chunk in place
    fn decrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()>;
}

fn chunk_index(index: u64) -> Result<u32> {
    u32::try_from(index)
        .map_err(|_| Error::InvalidOperation("too many chunks in the EncryptedPackage".into()))
}

/// Writer for the `EncryptedPackage` stream
///
/// Data is encrypted as soon as a chunk is complete. Closing the writer (explicitly or on
/// drop) encrypts the last chunk and stores the `EncryptedPackage`, `EncryptionInfo` and
/// `\u{6}DataSpaces` entries in the container.
pub struct EncryptedPackageWriter<'a> {
    encryptor: &'a mut Encryptor,
    container: &'a mut CompoundFile,
    cipher: Box<dyn ChunkCipher>,
    buffer: Vec<u8>,
    output: Vec<u8>,
    total: u64,
    chunk_index: u64,
    closed: bool,
}

impl<'a> EncryptedPackageWriter<'a> {
    pub(crate) fn new(
        encryptor: &'a mut Encryptor,
        container: &'a mut CompoundFile,
        cipher: Box<dyn ChunkCipher>,
    ) -> Self {
        let chunk_size = cipher.chunk_size();
        Self {
            encryptor,
            container,
            cipher,
            buffer: Vec::with_capacity(chunk_size),
            output: vec![0u8; 8],
            total: 0,
            chunk_index: 0,
            closed: false,
        }
    }

    /// The number of plaintext bytes written so far
    pub fn len(&self) -> u64 {
        self.total
    }

    /// Checks whether nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn flush_chunk(&mut self, mut chunk: Vec<u8>) -> Result<()> {
        chunk.resize(round_up(chunk.len(), self.cipher.block_size()), 0);
        self.cipher
            .encrypt_chunk(chunk_index(self.chunk_index)?, &mut chunk)?;
        self.output.extend_from_slice(&chunk);
        self.chunk_index += 1;
        Ok(())
    }

    /// Encrypts the pending data and stores the encrypted document in the container
    ///
    /// Returns the payload size; closing twice fails with [`Error::StreamClosed`]
    pub fn close(&mut self) -> Result<u64> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        self.closed = true;
        if let Err(e) = self.store() {
            self.encryptor.abandon_stream();
            return Err(e);
        }
        Ok(self.total)
    }

    fn store(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let chunk = std::mem::take(&mut self.buffer);
            self.flush_chunk(chunk)?;
        }
        put_u64(&mut self.output, 0, self.total);
        debug!(
            "EncryptedPackage: {} bytes in {} chunk(s)",
            self.total, self.chunk_index
        );
        self.encryptor.finish(self.container, &self.output)
    }
}

impl Write for EncryptedPackageWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(Error::StreamClosed.into());
        }
        let chunk_size = self.cipher.chunk_size();
        let mut todo = buf;
        while !todo.is_empty() {
            let avail = (chunk_size - self.buffer.len()).min(todo.len());
            self.buffer.extend_from_slice(&todo[..avail]);
            todo = &todo[avail..];
            if self.buffer.len() == chunk_size {
                let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(chunk_size));
                self.flush_chunk(chunk)?;
            }
        }
        self.total += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EncryptedPackageWriter<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Failed to close the EncryptedPackage: {e}");
            }
        }
    }
}

/// Reader for the `EncryptedPackage` stream
///
/// Chunks are decrypted on demand, so seeking only costs the chunk being landed on
pub struct EncryptedPackageReader<R: Read + Seek> {
    inner: R,
    cipher: Box<dyn ChunkCipher>,
    size: u64,
    pos: u64,
    chunk: Vec<u8>,
    chunk_index: Option<u64>,
}

impl<R: Read + Seek> EncryptedPackageReader<R> {
    pub(crate) fn new(mut inner: R, cipher: Box<dyn ChunkCipher>) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let size = rdu64le(&mut inner)
            .map_err(|e| Error::Format(format!("Failed to read the EncryptedPackage size: {e}")))?;
        debug!("EncryptedPackage size: {size}");
        Ok(Self {
            inner,
            cipher,
            size,
            pos: 0,
            chunk: Vec::new(),
            chunk_index: None,
        })
    }

    /// The decrypted payload size
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Checks whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn load_chunk(&mut self, index: u64) -> Result<()> {
        if self.chunk_index == Some(index) {
            return Ok(());
        }
        let chunk_size = self.cipher.chunk_size() as u64;
        let start = index * chunk_size;
        let plain_len = chunk_size.min(self.size - start) as usize;
        let cipher_len = round_up(plain_len, self.cipher.block_size());
        self.chunk_index = None;
        self.chunk.resize(cipher_len, 0);
        self.inner.seek(SeekFrom::Start(8 + start))?;
        self.inner.read_exact(&mut self.chunk).map_err(|e| {
            warn!("Failed to read chunk {index}: {e}");
            Error::Format(format!("EncryptedPackage is truncated at chunk {index}"))
        })?;
        self.cipher
            .decrypt_chunk(chunk_index(index)?, &mut self.chunk)?;
        self.chunk.truncate(plain_len);
        self.chunk_index = Some(index);
        Ok(())
    }
}

impl<R: Read + Seek> Read for EncryptedPackageReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let chunk_size = self.cipher.chunk_size() as u64;
        let index = self.pos / chunk_size;
        self.load_chunk(index)?;
        let offset = (self.pos - index * chunk_size) as usize;
        let avail = &self.chunk[offset..];
        let len = avail.len().min(buf.len());
        buf[..len].copy_from_slice(&avail[..len]);
        self.pos += len as u64;
        Ok(len)
    }
}

impl<R: Read + Seek> Seek for EncryptedPackageReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match new_pos {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// XORs every byte with its chunk index and pads to 4 bytes
    struct XorChunks;

    impl ChunkCipher for XorChunks {
        fn chunk_size(&self) -> usize {
            8
        }
        fn block_size(&self) -> usize {
            4
        }
        fn encrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
            assert_eq!(buf.len() % 4, 0);
            buf.iter_mut().for_each(|b| *b ^= 0x80 | index as u8);
            Ok(())
        }
        fn decrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<()> {
            self.encrypt_chunk(index, buf)
        }
    }

    fn package(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u64).to_le_bytes().to_vec();
        for (i, chunk) in payload.chunks(8).enumerate() {
            let mut chunk = chunk.to_vec();
            chunk.resize(round_up(chunk.len(), 4), 0);
            XorChunks.encrypt_chunk(i as u32, &mut chunk).unwrap();
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[test]
    fn sequential_and_random_access() -> io::Result<()> {
        let payload: Vec<u8> = (0..21).collect();
        let data = package(&payload);
        assert_eq!(data.len(), 8 + 8 + 8 + 8);
        let mut r = EncryptedPackageReader::new(io::Cursor::new(data), Box::new(XorChunks))?;
        assert_eq!(r.len(), 21);
        let mut all = Vec::new();
        r.read_to_end(&mut all)?;
        assert_eq!(all, payload);

        r.seek(SeekFrom::Start(17))?;
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;
        assert_eq!(buf, [17, 18]);
        r.seek(SeekFrom::Current(-12))?;
        r.read_exact(&mut buf)?;
        assert_eq!(buf, [7, 8]);
        r.seek(SeekFrom::End(-1))?;
        let mut rest = Vec::new();
        r.read_to_end(&mut rest)?;
        assert_eq!(rest, [20]);
        assert!(r.seek(SeekFrom::Current(-100)).is_err());
        r.seek(SeekFrom::End(10))?;
        assert_eq!(r.read(&mut buf)?, 0);
        Ok(())
    }

    #[test]
    fn truncated_package() -> Result<()> {
        let payload = [1u8; 21];
        let mut data = package(&payload);
        data.pop();
        let mut r = EncryptedPackageReader::new(io::Cursor::new(data), Box::new(XorChunks))?;
        let mut all = Vec::new();
        let err = r.read_to_end(&mut all).unwrap_err();
        assert!(matches!(Error::from_io(err), Error::Format(_)));
        assert!(matches!(
            EncryptedPackageReader::new(io::Cursor::new(vec![0u8; 5]), Box::new(XorChunks)),
            Err(Error::Format(_))
        ));
        Ok(())
    }

    #[test]
    fn empty_package() -> Result<()> {
        let mut r =
            EncryptedPackageReader::new(io::Cursor::new(package(&[])), Box::new(XorChunks))?;
        assert!(r.is_empty());
        let mut all = Vec::new();
        r.read_to_end(&mut all)?;
        assert!(all.is_empty());
        Ok(())
    }
}
