//! # A library to read and write Compound Files
//!
//! Provides functionality to create, inspect and modify objects in the *Compound File Binary
//! Format* (also known as OLE2 or structured storage), together with the Office *document
//! encryption* layer which is built on top of it
//!
//! The container implementation is based upon
//! [\[MS-CFB\]](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/53989ce4-7b05-4f8d-829b-d08d6148375b);
//! the encryption layer is documented in the [`crypto`] module
//!
//! Parsing is strict about everything that affects the content of the streams (broken sector
//! chains, directory loops, bad sizes) and lenient about cosmetic deviations, which are
//! recorded as [anomalies](CompoundFile::anomalies)
//!
//! See [CompoundFile] for the main interface documentation and code examples
//!

#![warn(missing_docs)]

pub mod alloc;
mod bytes;
pub mod config;
pub mod crypto;
pub mod directory;
mod error;
mod header;
mod sniff;

use alloc::SectorAllocator;
use directory::Directory;
pub use directory::{Entry, EntryId, EntryType};
pub use error::{Error, Result};
use header::{Header, HEADER_DIFAT_ENTRIES};
pub use sniff::{sniff, FormatKind, CFB_MAGIC};
use std::collections::HashSet;
use std::io::{self, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Marks a sector holding DIFAT entries
pub const DIFSECT: u32 = 0xfffffffc;
/// Marks a sector holding FAT entries
pub const FATSECT: u32 = 0xfffffffd;
/// Terminates a sector chain
pub const ENDOFCHAIN: u32 = 0xfffffffe;
/// Marks an unallocated sector
pub const FREESECT: u32 = 0xffffffff;
/// The highest regular sector number
pub const MAXREGSID: u32 = 0xfffffffa;
/// Marks a missing directory link
pub const NOSTREAM: u32 = 0xffffffff;
/// Streams smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: u64 = 4096;
/// The size of a mini sector
pub const MINI_SECTOR_SIZE: usize = 64;

/// The major version of a Compound File, which determines its sector size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    /// Major version 3, 512 byte sectors
    #[default]
    V3,
    /// Major version 4, 4096 byte sectors
    V4,
}

impl Version {
    /// Maps a major version number to a [`Version`]
    pub fn from_major(major: u16) -> Option<Self> {
        match major {
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            _ => None,
        }
    }

    /// The major version number
    pub fn major(&self) -> u16 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }

    /// The sector size in bytes
    pub fn sector_size(&self) -> usize {
        1 << self.sector_shift()
    }

    pub(crate) fn sector_shift(&self) -> u16 {
        match self {
            Self::V3 => 9,
            Self::V4 => 12,
        }
    }
}

/// A handle to a stream entry, as returned by [`CompoundFile::create_stream`] and
/// [`CompoundFile::get_stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(EntryId);

impl StreamHandle {
    /// The directory id of the stream
    pub fn id(&self) -> EntryId {
        self.0
    }
}

/// An in memory Compound File
///
/// The whole container is held in memory: regular streams live in a sector space chained
/// through the FAT, small streams in the mini stream chained through the MiniFAT, and the
/// directory in an arena. Nothing is written back until [`save`](Self::save) (or one of its
/// variants) is called
///
/// # Examples
/// ```
/// use ctxcfb::{CompoundFile, EntryId, Version};
///
/// let mut cf = CompoundFile::new(Version::V3);
/// let macros = cf.create_storage(EntryId::ROOT, "Macros").unwrap();
/// let stream = cf.create_stream(macros, "Module1").unwrap();
/// cf.write_stream(stream, b"Attribute VB_Name = \"Module1\"").unwrap();
/// let bytes = cf.to_bytes().unwrap();
///
/// let cf = CompoundFile::from_bytes(&bytes).unwrap();
/// let stream = cf.get_stream("Macros/Module1").unwrap();
/// assert_eq!(cf.read_stream(stream).unwrap(), b"Attribute VB_Name = \"Module1\"");
/// ```
///
/// # Errors
/// All fallible functions return a [`Result`] carrying an [`Error`]
/// * Errors from the IO layer are wrapped in [`Error::IO`]
/// * Input which is not a Compound File is reported as [`Error::NotCompoundFile`] along
///   with the sniffed [`FormatKind`]
/// * Structural damage is reported as [`Error::Format`] or [`Error::CorruptChain`]
/// * Any operation on a closed container fails with [`Error::UseAfterClose`]
#[derive(Debug, Clone)]
pub struct CompoundFile {
    version: Version,
    anomalies: Vec<String>,
    fat: SectorAllocator,
    mini: SectorAllocator,
    directory: Directory,
    closed: bool,
}

impl CompoundFile {
    /// Creates an empty container holding just the root storage
    pub fn new(version: Version) -> Self {
        Self {
            version,
            anomalies: Vec::new(),
            fat: SectorAllocator::new(version.sector_size()),
            mini: SectorAllocator::new(MINI_SECTOR_SIZE),
            directory: Directory::new(),
            closed: false,
        }
    }

    /// Parses a Compound File from a reader
    ///
    /// The reader is rewound and consumed entirely
    pub fn open<R: Read + Seek>(mut reader: R) -> Result<Self> {
        reader.seek(io::SeekFrom::Start(0))?;
        let mut buf: Vec<u8> = Vec::new();
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Parses a Compound File from memory
    ///
    /// Every stream is read and checked against its size: a broken chain anywhere in the
    /// container is fatal. Once loaded, the streams are repacked into fresh sector spaces so
    /// that the sectors held by the old FAT, MiniFAT and directory are not carried over
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut anomalies: Vec<String> = Vec::new();
        let header = Header::parse(buf, &mut anomalies).inspect_err(|e| {
            debug!("Failed to parse header: {e}");
        })?;
        let version = header.version;
        let ss = version.sector_size();

        let mut body = buf[ss.min(buf.len())..].to_vec();
        if body.len() % ss != 0 {
            anomalies.push(format!(
                "File size is not a multiple of the sector size ({} trailing bytes)",
                body.len() % ss
            ));
        }
        let sector_count = body.len().div_ceil(ss);
        body.resize(sector_count * ss, 0);

        let fat_sector_ids = Self::read_difat(&header, &body, ss, &mut anomalies)?;
        if header.fat_sectors as usize != fat_sector_ids.len() {
            anomalies.push(format!(
                "Number of FAT sectors in header is {} but {} were found in DIFAT",
                header.fat_sectors,
                fat_sector_ids.len()
            ));
        }
        let mut table: Vec<u32> = Vec::with_capacity(fat_sector_ids.len() * ss / 4);
        for &sector in &fat_sector_ids {
            let data = Self::raw_sector(&body, sector, ss)?;
            table.extend(data.chunks_exact(4).map(|v| bytes::le_u32(v, 0)));
        }
        if fat_sector_ids
            .iter()
            .any(|&s| table.get(s as usize) != Some(&FATSECT))
        {
            anomalies.push("One or more FAT sectors are not marked as FATSECT".to_string());
        }
        if table.len() > sector_count {
            if table[sector_count..].iter().any(|&v| v != FREESECT) {
                anomalies.push(format!(
                    "FAT describes {} sectors but the file only holds {}",
                    table.len(),
                    sector_count
                ));
            }
            table.truncate(sector_count);
        }
        let raw = SectorAllocator::from_parts(ss, table, body);

        let dir_data = raw.read_chain(header.first_dir_sector, None)?;
        let dir_sectors = dir_data.len() / ss;
        if version == Version::V4 && header.dir_sectors as usize != dir_sectors {
            anomalies.push(format!(
                "Directory sector count is {} in the header but {} are walkable",
                header.dir_sectors, dir_sectors
            ));
        }
        let mut directory = Directory::load(&dir_data, version)?;

        let minifat_data = if header.minifat_sectors == 0 && header.first_minifat_sector > MAXREGSID
        {
            Vec::new()
        } else {
            raw.read_chain(header.first_minifat_sector, None)?
        };
        if minifat_data.len() / ss != header.minifat_sectors as usize {
            anomalies.push(format!(
                "MiniFAT sector count is {} in the header but {} are walkable",
                header.minifat_sectors,
                minifat_data.len() / ss
            ));
        }
        let mut minitable: Vec<u32> = minifat_data
            .chunks_exact(4)
            .map(|v| bytes::le_u32(v, 0))
            .collect();
        let root = directory.get(EntryId::ROOT)?;
        let ministream = if root.size == 0 {
            Vec::new()
        } else {
            raw.read_chain(root.start_sector, Some(root.size))?
        };
        minitable.truncate(ministream.len().div_ceil(MINI_SECTOR_SIZE));
        let raw_mini = SectorAllocator::from_parts(MINI_SECTOR_SIZE, minitable, ministream);

        let mut fat = SectorAllocator::new(ss);
        let mut mini = SectorAllocator::new(MINI_SECTOR_SIZE);
        for entry in directory.streams_mut() {
            if entry.size == 0 {
                if entry.start_sector != ENDOFCHAIN {
                    entry.anomalies.push(format!(
                        "Empty stream with start sector {}",
                        entry.start_sector
                    ));
                    entry.start_sector = ENDOFCHAIN;
                }
                continue;
            }
            let (source, target) = if entry.size < MINI_STREAM_CUTOFF {
                (&raw_mini, &mut mini)
            } else {
                (&raw, &mut fat)
            };
            let data = source
                .read_chain(entry.start_sector, Some(entry.size))
                .inspect_err(|e| warn!("Failed to read stream \"{}\": {e}", entry.name))?;
            entry.start_sector = target.write_chain(None, &data)?;
        }

        for entry in directory.iter() {
            for anomaly in &entry.anomalies {
                debug!("Entry \"{}\": {anomaly}", entry.name);
            }
        }
        for anomaly in &anomalies {
            debug!("Anomaly: {anomaly}");
        }
        Ok(Self {
            version,
            anomalies,
            fat,
            mini,
            directory,
            closed: false,
        })
    }

    fn raw_sector(body: &[u8], sector: u32, ss: usize) -> Result<&[u8]> {
        let offset = sector as usize * ss;
        body.get(offset..offset + ss).ok_or_else(|| {
            Error::Format(format!("sector {sector} is beyond the end of the file"))
        })
    }

    fn read_difat(
        header: &Header,
        body: &[u8],
        ss: usize,
        anomalies: &mut Vec<String>,
    ) -> Result<Vec<u32>> {
        let mut ids = header.difat.clone();
        if ids.len() < HEADER_DIFAT_ENTRIES || header.difat_sectors == 0 {
            return Ok(ids);
        }
        let mut seen: HashSet<u32> = HashSet::new();
        let mut next = header.first_difat_sector;
        let mut complete = false;
        for i in 0..header.difat_sectors {
            if next > MAXREGSID {
                return Err(Error::Format(format!(
                    "DIFAT chain ends with 0x{next:x} after {i} of {} sectors",
                    header.difat_sectors
                )));
            }
            if !seen.insert(next) {
                return Err(Error::CorruptChain(format!(
                    "loop detected in the DIFAT chain at sector {next}"
                )));
            }
            let sector = Self::raw_sector(body, next, ss)?;
            let (entries, link) = sector.split_at(ss - 4);
            for v in entries.chunks_exact(4).map(|v| bytes::le_u32(v, 0)) {
                match v {
                    FREESECT => {
                        complete = true;
                        break;
                    }
                    DIFSECT | FATSECT | ENDOFCHAIN => {
                        return Err(Error::Format(format!(
                            "found DIFAT entry with special value 0x{v:x}"
                        )));
                    }
                    v => ids.push(v),
                }
            }
            next = bytes::le_u32(link, 0);
            if complete {
                if i + 1 != header.difat_sectors {
                    anomalies.push(format!(
                        "DIFAT completed on sector {} but {} were expected",
                        i + 1,
                        header.difat_sectors
                    ));
                }
                break;
            }
        }
        if !complete && next != ENDOFCHAIN {
            anomalies.push(format!(
                "Missing ENDOFCHAIN on last DIFAT sector, found 0x{next:x} instead"
            ));
        }
        Ok(ids)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::UseAfterClose)
        } else {
            Ok(())
        }
    }

    /// Returns the major version of the container
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the sector size in bytes
    pub fn sector_size(&self) -> usize {
        self.fat.sector_size()
    }

    /// Changes the sector size
    ///
    /// The sector size is fixed by the version chosen at creation: any different size is
    /// rejected with [`Error::InvalidOperation`]
    pub fn set_sector_size(&mut self, sector_size: usize) -> Result<()> {
        self.check_open()?;
        self.fat.reconfigure(sector_size)
    }

    /// Lists the anomalies detected in the header and the main structures
    ///
    /// Anomalies specific to an entry are found in [`Entry::anomalies`]
    pub fn anomalies(&self) -> &[String] {
        self.anomalies.as_slice()
    }

    /// Returns [true] once [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the id of the root storage
    pub fn root(&self) -> Result<EntryId> {
        self.check_open()?;
        Ok(EntryId::ROOT)
    }

    /// Retrieves a directory entry by path
    ///
    /// * Path components must be separated with a `/`
    /// * The `Root Entry` is implied and must be omitted; an empty path returns the root
    /// * Names are compared case insensitively and no character mangling is performed,
    ///   therefore care must be taken with "weird" names e.g.: `"\u{6}DataSpaces"`
    ///
    /// # Examples
    /// ```
    /// use ctxcfb::{CompoundFile, EntryId, Error, Version};
    ///
    /// let mut cf = CompoundFile::new(Version::V3);
    /// cf.create_stream(EntryId::ROOT, "WordDocument").unwrap();
    /// assert!(cf.get_entry("worddocument").unwrap().is_stream());
    /// assert!(matches!(cf.get_entry("1Table"), Err(Error::EntryNotFound(_))));
    /// ```
    pub fn get_entry(&self, path: &str) -> Result<&Entry> {
        self.check_open()?;
        self.directory.get(self.directory.lookup(path)?)
    }

    /// Retrieves a directory entry by id
    pub fn entry(&self, id: EntryId) -> Result<&Entry> {
        self.check_open()?;
        self.directory.get(id)
    }

    /// Returns the `/` separated path of an entry
    pub fn path_of(&self, id: EntryId) -> Result<String> {
        self.check_open()?;
        self.directory.path_of(id)
    }

    /// Returns a handle to the stream at `path`
    pub fn get_stream(&self, path: &str) -> Result<StreamHandle> {
        let entry = self.get_entry(path)?;
        if !entry.is_stream() {
            return Err(Error::InvalidOperation(format!("\"{path}\" is not a stream")));
        }
        Ok(StreamHandle(entry.id()))
    }

    /// Creates an empty stream named `name` inside the storage `parent`
    pub fn create_stream(&mut self, parent: EntryId, name: &str) -> Result<StreamHandle> {
        self.check_open()?;
        let id = self.directory.insert(parent, name, EntryType::Stream)?;
        debug!("Created stream \"{name}\" (#{})", id.index());
        Ok(StreamHandle(id))
    }

    /// Creates an empty storage named `name` inside the storage `parent`
    pub fn create_storage(&mut self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.check_open()?;
        let id = self.directory.insert(parent, name, EntryType::Storage)?;
        debug!("Created storage \"{name}\" (#{})", id.index());
        Ok(id)
    }

    /// Creates (or replaces the content of) the stream at `path`
    ///
    /// Missing storages along the path are created
    pub fn put_stream(&mut self, path: &str, data: &[u8]) -> Result<StreamHandle> {
        self.check_open()?;
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let (name, storages) = parts
            .split_last()
            .ok_or_else(|| Error::InvalidName(path.to_string()))?;
        let mut parent = EntryId::ROOT;
        for storage in storages {
            parent = match self.directory.find_child(parent, storage)? {
                Some(id) => id,
                None => self.directory.insert(parent, storage, EntryType::Storage)?,
            };
        }
        let handle = match self.directory.find_child(parent, name)? {
            Some(id) if self.directory.get(id)?.is_stream() => StreamHandle(id),
            Some(_) => return Err(Error::DuplicateEntry(path.to_string())),
            None => self.create_stream(parent, name)?,
        };
        self.write_stream(handle, data)?;
        Ok(handle)
    }

    /// Removes the entry at `path`; storages are removed together with their content
    pub fn delete_entry(&mut self, path: &str) -> Result<()> {
        self.check_open()?;
        let id = self.directory.lookup(path)?;
        for entry in self.directory.remove(id)? {
            if entry.is_stream() && entry.start_sector != ENDOFCHAIN {
                self.space_mut(entry.size).free(entry.start_sector)?;
            }
        }
        debug!("Deleted \"{path}\"");
        Ok(())
    }

    fn space(&self, size: u64) -> &SectorAllocator {
        if size < MINI_STREAM_CUTOFF {
            &self.mini
        } else {
            &self.fat
        }
    }

    fn space_mut(&mut self, size: u64) -> &mut SectorAllocator {
        if size < MINI_STREAM_CUTOFF {
            &mut self.mini
        } else {
            &mut self.fat
        }
    }

    fn stream_entry(&self, handle: StreamHandle) -> Result<&Entry> {
        self.check_open()?;
        let entry = self.directory.get(handle.0)?;
        if !entry.is_stream() {
            return Err(Error::InvalidOperation(format!(
                "\"{}\" is not a stream",
                entry.name
            )));
        }
        Ok(entry)
    }

    /// Reads the whole content of a stream
    pub fn read_stream(&self, handle: StreamHandle) -> Result<Vec<u8>> {
        let entry = self.stream_entry(handle)?;
        self.space(entry.size)
            .read_chain(entry.start_sector, Some(entry.size))
    }

    /// Returns a reader for a stream
    ///
    /// The reader is detached from the container: later writes are not reflected
    pub fn stream_reader(&self, handle: StreamHandle) -> Result<io::Cursor<Vec<u8>>> {
        Ok(io::Cursor::new(self.read_stream(handle)?))
    }

    /// Replaces the content of a stream
    ///
    /// The existing sectors are reused where possible; the data moves between the mini
    /// stream and the regular sectors when its size crosses the cutoff
    pub fn write_stream(&mut self, handle: StreamHandle, data: &[u8]) -> Result<()> {
        let entry = self.stream_entry(handle)?;
        let new_size = data.len() as u64;
        if self.version == Version::V3 && new_size > u64::from(u32::MAX) {
            return Err(Error::InvalidOperation(format!(
                "stream of {new_size} bytes exceeds the limit of a version 3 file"
            )));
        }
        let (old_start, old_size) = (entry.start_sector, entry.size);
        let previous = (old_start != ENDOFCHAIN).then_some(old_start);
        let was_mini = old_size < MINI_STREAM_CUTOFF;
        let is_mini = new_size < MINI_STREAM_CUTOFF;
        let start = if was_mini == is_mini {
            self.space_mut(new_size).write_chain(previous, data)?
        } else {
            if let Some(start) = previous {
                self.space_mut(old_size).free(start)?;
            }
            self.space_mut(new_size).write_chain(None, data)?
        };
        let entry = self.directory.get_mut(handle.0)?;
        entry.start_sector = start;
        entry.size = new_size;
        debug!(
            "Stored {new_size} bytes in \"{}\" ({})",
            entry.name,
            if is_mini { "mini stream" } else { "regular sectors" }
        );
        Ok(())
    }

    /// Returns an iterator that walks the directory tree depth first
    ///
    /// The root is not included; siblings are visited in directory order
    pub fn ftw(&self) -> Result<EntryIterator<'_>> {
        self.check_open()?;
        let root = self.directory.get(EntryId::ROOT)?;
        Ok(EntryIterator {
            directory: &self.directory,
            stack: root
                .children()
                .iter()
                .rev()
                .map(|c| (String::new(), *c))
                .collect(),
        })
    }

    /// Serializes the container
    ///
    /// The layout is: header, user streams, mini stream, MiniFAT, directory, FAT and DIFAT
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.check_open()?;
        let ss = self.fat.sector_size();
        let per_sector = ss / 4;
        let mut mini = self.mini.clone();
        mini.trim();
        let mut fat = self.fat.clone();
        fat.trim();
        let mut header = Header::new(self.version);

        let mini_stream_size = mini.data().len() as u64;
        let mini_stream_start = fat.write_chain(None, mini.data())?;
        if !mini.is_empty() {
            let minifat = table_bytes(mini.table(), ss);
            header.first_minifat_sector = fat.write_chain(None, &minifat)?;
            header.minifat_sectors = (minifat.len() / ss) as u32;
        }
        let dir = self
            .directory
            .to_bytes(mini_stream_start, mini_stream_size, ss)?;
        header.first_dir_sector = fat.write_chain(None, &dir)?;
        header.dir_sectors = (dir.len() / ss) as u32;

        // FAT and DIFAT sectors describe themselves: grow both until they cover everything
        let base = fat.len();
        let (mut fat_count, mut difat_count) = (0usize, 0usize);
        loop {
            let need_fat = (base + fat_count + difat_count).div_ceil(per_sector);
            let need_difat = need_fat
                .saturating_sub(HEADER_DIFAT_ENTRIES)
                .div_ceil(per_sector - 1);
            if (need_fat, need_difat) == (fat_count, difat_count) {
                break;
            }
            (fat_count, difat_count) = (need_fat, need_difat);
        }
        let fat_ids = fat.reserve_tail(fat_count, FATSECT);
        let difat_ids = fat.reserve_tail(difat_count, DIFSECT);
        let table = table_bytes(fat.table(), ss);
        for (&sector, content) in fat_ids.iter().zip(table.chunks_exact(ss)) {
            fat.sector_mut(sector).copy_from_slice(content);
        }
        header.fat_sectors = fat_count as u32;
        header.difat = fat_ids.iter().take(HEADER_DIFAT_ENTRIES).copied().collect();
        if let Some(&first) = difat_ids.first() {
            header.first_difat_sector = first;
            header.difat_sectors = difat_count as u32;
            let overflow = &fat_ids[HEADER_DIFAT_ENTRIES..];
            for (k, &sector) in difat_ids.iter().enumerate() {
                let content = fat.sector_mut(sector);
                content.fill(0xff);
                for (j, &v) in overflow
                    .iter()
                    .skip(k * (per_sector - 1))
                    .take(per_sector - 1)
                    .enumerate()
                {
                    bytes::put_u32(content, j * 4, v);
                }
                let next = difat_ids.get(k + 1).copied().unwrap_or(ENDOFCHAIN);
                bytes::put_u32(content, ss - 4, next);
            }
        }
        debug!(
            "Serialized {} sectors ({fat_count} FAT, {difat_count} DIFAT)",
            fat.len()
        );

        let mut out: Vec<u8> = Vec::with_capacity(ss + fat.data().len());
        out.extend_from_slice(&header.to_bytes());
        out.resize(ss, 0);
        out.extend_from_slice(fat.data());
        Ok(out)
    }

    /// Writes the container to `writer`
    ///
    /// The file is fully built in memory before the first byte is written
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        let buf = self.to_bytes()?;
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }

    /// Writes the container to `path` atomically
    ///
    /// The data is written to a temporary file in the same directory which then replaces
    /// the target
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let buf = self.to_bytes()?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        debug!("Saved {} bytes to {}", buf.len(), path.display());
        Ok(())
    }

    /// Closes the container, releasing its memory
    ///
    /// Any later operation fails with [`Error::UseAfterClose`]
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.closed = true;
        self.fat = SectorAllocator::new(self.fat.sector_size());
        self.mini = SectorAllocator::new(MINI_SECTOR_SIZE);
        self.directory = Directory::new();
        Ok(())
    }
}

fn table_bytes(table: &[u32], sector_size: usize) -> Vec<u8> {
    let mut out: Vec<u8> = table.iter().flat_map(|v| v.to_le_bytes()).collect();
    out.resize(bytes::round_up(out.len(), sector_size), 0xff);
    out
}

/// An iterator that walks the directory tree
///
/// Yields `/` separated paths along with the entries, parents before children
pub struct EntryIterator<'a> {
    directory: &'a Directory,
    stack: Vec<(String, EntryId)>,
}

impl<'a> Iterator for EntryIterator<'a> {
    type Item = (String, &'a Entry);

    fn next(&mut self) -> Option<Self::Item> {
        let (prefix, id) = self.stack.pop()?;
        let entry = self.directory.get(id).ok()?;
        let path = format!("{prefix}{}", entry.name);
        let child_prefix = format!("{path}/");
        self.stack.extend(
            entry
                .children()
                .iter()
                .rev()
                .map(|c| (child_prefix.clone(), *c)),
        );
        Some((path, entry))
    }
}
