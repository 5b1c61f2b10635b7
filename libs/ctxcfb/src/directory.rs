//! The directory arena
//!
//! On disk the directory is an array of 128 byte records where each storage points to one
//! of its children and the children of a storage form a red-black tree through their
//! left/right links. In memory the entries live in a flat arena, each storage keeps the
//! list of its children sorted in directory order, and the trees are rebuilt on save
use crate::bytes::*;
use crate::error::{Error, Result};
use crate::{Version, ENDOFCHAIN, MAXREGSID, NOSTREAM};
use std::cmp::Ordering;
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// The size of a directory record
pub const DIR_ENTRY_SIZE: usize = 128;
const MAX_NAME_UNITS: usize = 31;
const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '!'];
const ROOT_NAME: &str = "Root Entry";
const RED: u8 = 0;
const BLACK: u8 = 1;

/// The index of a directory entry inside a [`CompoundFile`](crate::CompoundFile)
///
/// Ids are stable while the container is open; they are reassigned on save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    /// The id of the root storage
    pub const ROOT: EntryId = EntryId(0);

    /// The numeric value of the id
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A storage (directory)
    Storage,
    /// A stream (file)
    Stream,
    /// The root storage
    Root,
}

impl EntryType {
    fn from_byte(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Storage),
            2 => Some(Self::Stream),
            5 => Some(Self::Root),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Storage => 1,
            Self::Stream => 2,
            Self::Root => 5,
        }
    }
}

/// A *Compound File Directory Entry*: the root, a storage or a stream
#[derive(Debug, Clone)]
pub struct Entry {
    id: EntryId,
    /// The kind of entry
    pub entry_type: EntryType,
    /// The name of the entry
    pub name: String,
    /// The entry CLSID
    pub clsid: [u8; 16],
    /// User defined flags (typically for storages)
    pub state: u32,
    /// The creation time of the entry
    pub ctime: Option<OffsetDateTime>,
    /// The last modification time of the entry
    pub mtime: Option<OffsetDateTime>,
    /// The size (in bytes) of a stream; always 0 for storages
    pub size: u64,
    /// A list of non fatal incongruences found in the entry when it was loaded
    pub anomalies: Vec<String>,
    pub(crate) start_sector: u32,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
}

impl Entry {
    fn new(id: EntryId, entry_type: EntryType, name: &str, parent: Option<EntryId>) -> Self {
        Self {
            id,
            entry_type,
            name: name.to_string(),
            clsid: [0u8; 16],
            state: 0,
            ctime: None,
            mtime: None,
            size: 0,
            anomalies: Vec::new(),
            start_sector: ENDOFCHAIN,
            parent,
            children: Vec::new(),
        }
    }

    /// The id of the entry
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// The storage containing this entry ([None] for the root)
    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// The ids of the direct children, in directory order
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    /// Returns [true] for storages and the root
    pub fn is_storage(&self) -> bool {
        matches!(self.entry_type, EntryType::Storage | EntryType::Root)
    }

    /// Returns [true] for streams
    pub fn is_stream(&self) -> bool {
        self.entry_type == EntryType::Stream
    }
}

/// Directory order: shorter names first, then by uppercased UTF-16 code units
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let a_len = a.encode_utf16().count();
    let b_len = b.encode_utf16().count();
    a_len.cmp(&b_len).then_with(|| {
        a.to_uppercase()
            .encode_utf16()
            .cmp(b.to_uppercase().encode_utf16())
    })
}

/// Checks the constraints on entry names
pub fn validate_name(name: &str) -> Result<()> {
    let units = name.encode_utf16().count();
    if units == 0 || units > MAX_NAME_UNITS || name.contains(ILLEGAL_CHARS) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A record as stored on disk
#[derive(Debug, Default)]
struct RawEntry {
    objtype: u8,
    name: String,
    color: u8,
    left: u32,
    right: u32,
    child: u32,
    clsid: [u8; 16],
    state: u32,
    ctime: u64,
    mtime: u64,
    start_sector: u32,
    size: u64,
}

impl RawEntry {
    fn parse(buf: &[u8], version: Version) -> Result<Self> {
        let mut ret = RawEntry {
            objtype: buf[66],
            ..Default::default()
        };
        if ret.objtype == 0 {
            // Unallocated
            return Ok(ret);
        }
        let namelen = usize::from(le_u16(buf, 64));
        if namelen < 2 || namelen > 64 || namelen & 1 != 0 {
            return Err(Error::Format(format!(
                "invalid directory entry: name length {namelen} is invalid"
            )));
        }
        let units: Vec<u16> = buf[0..namelen]
            .chunks_exact(2)
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
            .collect();
        let (terminator, name) = units.split_last().ok_or_else(|| {
            Error::Format("invalid directory entry: empty name".to_string())
        })?;
        if *terminator != 0 {
            return Err(Error::Format(
                "invalid directory entry: name is not null terminated".to_string(),
            ));
        }
        ret.name = String::from_utf16(name).map_err(|_| {
            Error::Format("invalid directory entry: name is not valid UTF-16".to_string())
        })?;
        ret.color = buf[67];
        ret.left = le_u32(buf, 68);
        ret.right = le_u32(buf, 72);
        ret.child = le_u32(buf, 76);
        ret.clsid.copy_from_slice(&buf[80..96]);
        ret.state = le_u32(buf, 96);
        ret.ctime = le_u64(buf, 100);
        ret.mtime = le_u64(buf, 108);
        ret.start_sector = le_u32(buf, 116);
        ret.size = le_u64(buf, 120);
        if version == Version::V3 {
            ret.size &= 0xffffffff;
        }
        Ok(ret)
    }

    fn write(&self, buf: &mut [u8]) {
        buf.fill(0);
        let name = utf16le(&self.name);
        if !name.is_empty() {
            buf[..name.len()].copy_from_slice(&name);
            // Safe: names are at most 31 units long
            put_u16(buf, 64, (name.len() + 2) as u16);
        }
        buf[66] = self.objtype;
        buf[67] = self.color;
        put_u32(buf, 68, self.left);
        put_u32(buf, 72, self.right);
        put_u32(buf, 76, self.child);
        buf[80..96].copy_from_slice(&self.clsid);
        put_u32(buf, 96, self.state);
        put_u64(buf, 100, self.ctime);
        put_u64(buf, 108, self.mtime);
        put_u32(buf, 116, self.start_sector);
        put_u64(buf, 120, self.size);
    }

    fn unused() -> Self {
        Self {
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            ..Default::default()
        }
    }
}

/// The directory tree
#[derive(Debug, Clone)]
pub(crate) struct Directory {
    entries: Vec<Option<Entry>>,
}

impl Directory {
    /// Creates a directory holding just the root storage
    pub fn new() -> Self {
        Self {
            entries: vec![Some(Entry::new(
                EntryId::ROOT,
                EntryType::Root,
                ROOT_NAME,
                None,
            ))],
        }
    }

    /// Loads the directory from its raw records
    ///
    /// Only the entries reachable from the root are kept. Loops and shared nodes in the
    /// trees are fatal; lesser issues are logged to the `anomalies` of each entry
    pub fn load(raw: &[u8], version: Version) -> Result<Self> {
        let records = raw
            .chunks_exact(DIR_ENTRY_SIZE)
            .map(|buf| RawEntry::parse(buf, version))
            .collect::<Result<Vec<RawEntry>>>()?;
        let root = records
            .first()
            .ok_or_else(|| Error::Format("empty directory".to_string()))?;
        if root.objtype != 5 {
            return Err(Error::Format(format!(
                "invalid Root Entry: type is {} instead of 5",
                root.objtype
            )));
        }
        let mut entries: Vec<Option<Entry>> = Vec::new();
        entries.resize_with(records.len(), || None);
        let mut root_entry = Self::convert(&records[0], EntryId::ROOT, None)?;
        if root_entry.name != ROOT_NAME {
            root_entry
                .anomalies
                .push(format!("Root Entry name is \"{}\"", root_entry.name));
        }
        if records[0].color != BLACK {
            root_entry
                .anomalies
                .push("Root Entry color is not black".to_string());
        }
        entries[0] = Some(root_entry);

        let mut seen: HashSet<u32> = HashSet::from([0]);
        let mut storages: Vec<usize> = vec![0];
        while let Some(parent) = storages.pop() {
            let mut children: Vec<EntryId> = Vec::new();
            let mut stack: Vec<u32> = Vec::new();
            if records[parent].child != NOSTREAM {
                stack.push(records[parent].child);
            }
            while let Some(id) = stack.pop() {
                let index = id as usize;
                if id > MAXREGSID || index >= records.len() {
                    return Err(Error::Format(format!(
                        "directory link to entry 0x{id:x} is out of range ({} entries)",
                        records.len()
                    )));
                }
                if !seen.insert(id) {
                    return Err(Error::Format(format!(
                        "loop detected in the directory tree at entry {id}"
                    )));
                }
                let raw = &records[index];
                let mut entry = Self::convert(raw, EntryId(index), Some(EntryId(parent)))?;
                if raw.color > BLACK {
                    entry
                        .anomalies
                        .push(format!("Invalid entry color {}", raw.color));
                }
                for link in [raw.left, raw.right] {
                    if link != NOSTREAM {
                        stack.push(link);
                    }
                }
                match entry.entry_type {
                    EntryType::Storage => storages.push(index),
                    EntryType::Stream if raw.child != NOSTREAM => entry
                        .anomalies
                        .push("Stream entry with a child".to_string()),
                    _ => {}
                }
                children.push(entry.id);
                entries[index] = Some(entry);
            }
            children.sort_by(|a, b| {
                let a = entries[a.0].as_ref().map(|e| e.name.as_str()).unwrap_or("");
                let b = entries[b.0].as_ref().map(|e| e.name.as_str()).unwrap_or("");
                compare_names(a, b)
            });
            let collisions: Vec<(usize, String)> = children
                .windows(2)
                .filter_map(|pair| {
                    let a = entries[pair[0].0].as_ref()?;
                    let b = entries[pair[1].0].as_ref()?;
                    (compare_names(&a.name, &b.name) == Ordering::Equal)
                        .then(|| (pair[1].0, a.name.clone()))
                })
                .collect();
            for (index, other) in collisions {
                warn!("Duplicate sibling name \"{other}\"");
                if let Some(Some(e)) = entries.get_mut(index) {
                    e.anomalies
                        .push(format!("Name collides with sibling \"{other}\""));
                }
            }
            if let Some(Some(p)) = entries.get_mut(parent) {
                p.children = children;
            }
        }
        let unreachable = records
            .iter()
            .enumerate()
            .filter(|(i, r)| r.objtype != 0 && !seen.contains(&(*i as u32)))
            .count();
        if unreachable > 0 {
            debug!("Dropped {unreachable} unreachable directory entries");
        }
        Ok(Self { entries })
    }

    fn convert(raw: &RawEntry, id: EntryId, parent: Option<EntryId>) -> Result<Entry> {
        let entry_type = match (EntryType::from_byte(raw.objtype), parent) {
            (Some(EntryType::Root), None) => EntryType::Root,
            (Some(EntryType::Root), Some(_)) | (None, _) => {
                return Err(Error::Format(format!(
                    "directory entry {} has invalid type {}",
                    id.0, raw.objtype
                )));
            }
            (Some(t), _) => t,
        };
        if parent.is_some() && raw.name.contains(ILLEGAL_CHARS) {
            return Err(Error::Format(format!(
                "invalid directory entry: name \"{}\" contains invalid characters",
                raw.name
            )));
        }
        let mut entry = Entry::new(id, entry_type, &raw.name, parent);
        entry.clsid = raw.clsid;
        entry.state = raw.state;
        entry.ctime = filetime_to_datetime(raw.ctime);
        entry.mtime = filetime_to_datetime(raw.mtime);
        if entry_type == EntryType::Storage {
            if raw.size > 0 {
                entry.anomalies.push("Storage object with data".to_string());
            }
        } else {
            entry.start_sector = raw.start_sector;
            entry.size = raw.size;
        }
        Ok(entry)
    }

    /// Returns the entry with the given id
    pub fn get(&self, id: EntryId) -> Result<&Entry> {
        self.entries
            .get(id.0)
            .and_then(|e| e.as_ref())
            .ok_or_else(|| Error::EntryNotFound(format!("entry #{}", id.0)))
    }

    /// Returns the mutable entry with the given id
    pub fn get_mut(&mut self, id: EntryId) -> Result<&mut Entry> {
        self.entries
            .get_mut(id.0)
            .and_then(|e| e.as_mut())
            .ok_or_else(|| Error::EntryNotFound(format!("entry #{}", id.0)))
    }

    /// Looks up a child by (case insensitive) name
    pub fn find_child(&self, parent: EntryId, name: &str) -> Result<Option<EntryId>> {
        let parent = self.get(parent)?;
        for &child in &parent.children {
            if compare_names(&self.get(child)?.name, name) == Ordering::Equal {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Resolves a `/` separated path relative to the root
    ///
    /// The root itself is reached with an empty path (or `/`)
    pub fn lookup(&self, path: &str) -> Result<EntryId> {
        let mut current = EntryId::ROOT;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = self
                .find_child(current, part)?
                .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// Adds a new entry under `parent`
    pub fn insert(&mut self, parent: EntryId, name: &str, entry_type: EntryType) -> Result<EntryId> {
        validate_name(name)?;
        if !self.get(parent)?.is_storage() {
            return Err(Error::InvalidOperation(format!(
                "entry \"{}\" is not a storage",
                self.get(parent)?.name
            )));
        }
        if self.find_child(parent, name)?.is_some() {
            return Err(Error::DuplicateEntry(name.to_string()));
        }
        let id = EntryId(self.entries.len());
        self.entries
            .push(Some(Entry::new(id, entry_type, name, Some(parent))));
        let entries = &self.entries;
        let siblings = &self.get(parent)?.children;
        let position = siblings.partition_point(|s| {
            let sname = entries[s.0].as_ref().map(|e| e.name.as_str()).unwrap_or("");
            compare_names(sname, name) == Ordering::Less
        });
        self.get_mut(parent)?.children.insert(position, id);
        Ok(id)
    }

    /// Detaches and returns `id` along with all its descendants
    pub fn remove(&mut self, id: EntryId) -> Result<Vec<Entry>> {
        let parent = self.get(id)?.parent.ok_or_else(|| {
            Error::InvalidOperation("the root entry cannot be deleted".to_string())
        })?;
        self.get_mut(parent)?.children.retain(|c| *c != id);
        let mut removed: Vec<Entry> = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(entry) = self.entries.get_mut(id.0).and_then(|e| e.take()) {
                stack.extend_from_slice(&entry.children);
                removed.push(entry);
            }
        }
        Ok(removed)
    }

    /// Iterates the live entries in arena order
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().flatten()
    }

    /// Iterates the live streams mutably
    pub fn streams_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut().flatten().filter(|e| e.is_stream())
    }

    /// Returns the path of an entry (empty for the root)
    pub fn path_of(&self, id: EntryId) -> Result<String> {
        let mut parts: Vec<&str> = Vec::new();
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent {
            parts.push(&current.name);
            current = self.get(parent)?;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    /// Serializes the directory into records, padded to a multiple of `sector_size`
    ///
    /// Entries are renumbered in depth first order (the root first) and each sibling set is
    /// written as a balanced binary search tree with a valid red-black coloring
    pub fn to_bytes(&self, mini_stream_start: u32, mini_stream_size: u64, sector_size: usize) -> Result<Vec<u8>> {
        // Renumber
        let mut order: Vec<EntryId> = Vec::new();
        let mut stack = vec![EntryId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.get(id)?.children.iter().rev());
        }
        let mut new_ids = vec![NOSTREAM; self.entries.len()];
        for (new_id, old) in order.iter().enumerate() {
            new_ids[old.0] = new_id as u32; // Safe: bounded by the arena size
        }

        let mut records: Vec<RawEntry> = Vec::with_capacity(order.len());
        for &id in &order {
            let entry = self.get(id)?;
            let (start_sector, size) = match entry.entry_type {
                EntryType::Root => (mini_stream_start, mini_stream_size),
                EntryType::Storage => (0, 0),
                EntryType::Stream => (entry.start_sector, entry.size),
            };
            records.push(RawEntry {
                objtype: entry.entry_type.to_byte(),
                name: entry.name.clone(),
                color: BLACK,
                left: NOSTREAM,
                right: NOSTREAM,
                child: NOSTREAM,
                clsid: entry.clsid,
                state: entry.state,
                ctime: datetime_to_filetime(entry.ctime),
                mtime: datetime_to_filetime(entry.mtime),
                start_sector,
                size,
            });
        }
        for &id in &order {
            let children: Vec<u32> = self
                .get(id)?
                .children
                .iter()
                .map(|c| new_ids[c.0])
                .collect();
            if children.is_empty() {
                continue;
            }
            let red_depth = (children.len() + 1).ilog2() as usize;
            let top = build_tree(&children, 0, red_depth, &mut records);
            records[new_ids[id.0] as usize].child = top;
        }

        let per_sector = sector_size / DIR_ENTRY_SIZE;
        let slots = round_up(records.len(), per_sector);
        let mut out = vec![0u8; slots * DIR_ENTRY_SIZE];
        let unused = RawEntry::unused();
        for (i, chunk) in out.chunks_exact_mut(DIR_ENTRY_SIZE).enumerate() {
            records.get(i).unwrap_or(&unused).write(chunk);
        }
        Ok(out)
    }
}

/// Links a sorted sibling set into a midpoint balanced tree and returns its top node
///
/// Such a tree has every level full except possibly the deepest one, so coloring that
/// level red (when it is not full) and everything else black is a valid red-black coloring
fn build_tree(ids: &[u32], depth: usize, red_depth: usize, records: &mut [RawEntry]) -> u32 {
    if ids.is_empty() {
        return NOSTREAM;
    }
    let mid = ids.len() / 2;
    let node = ids[mid];
    let left = build_tree(&ids[..mid], depth + 1, red_depth, records);
    let right = build_tree(&ids[mid + 1..], depth + 1, red_depth, records);
    let record = &mut records[node as usize];
    record.left = left;
    record.right = right;
    record.color = if depth == red_depth { RED } else { BLACK };
    node
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(dir: &Directory, id: EntryId) -> Vec<String> {
        dir.get(id)
            .unwrap()
            .children()
            .iter()
            .map(|c| dir.get(*c).unwrap().name.clone())
            .collect()
    }

    fn records(buf: &[u8]) -> Vec<RawEntry> {
        buf.chunks_exact(DIR_ENTRY_SIZE)
            .map(|b| RawEntry::parse(b, Version::V3).unwrap())
            .collect()
    }

    /// Returns the black height of the subtree, panicking on a red-black violation
    fn check_rb(records: &[RawEntry], node: u32, parent_red: bool) -> usize {
        if node == NOSTREAM {
            return 1;
        }
        let r = &records[node as usize];
        let red = r.color == RED;
        assert!(!(red && parent_red), "red node with a red parent");
        let l = check_rb(records, r.left, red);
        let rr = check_rb(records, r.right, red);
        assert_eq!(l, rr, "unbalanced black height");
        if let Some(left) = records.get(r.left as usize) {
            assert_eq!(compare_names(&left.name, &r.name), Ordering::Less);
        }
        if let Some(right) = records.get(r.right as usize) {
            assert_eq!(compare_names(&right.name, &r.name), Ordering::Greater);
        }
        l + usize::from(!red)
    }

    #[test]
    fn name_order() {
        assert_eq!(compare_names("b", "aa"), Ordering::Less);
        assert_eq!(compare_names("abc", "ABD"), Ordering::Less);
        assert_eq!(compare_names("Data", "DATA"), Ordering::Equal);
        assert_eq!(compare_names("\u{5}Summary", "Summary"), Ordering::Greater);
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("WordDocument").is_ok());
        assert!(validate_name(&"x".repeat(31)).is_ok());
        for bad in ["", "a/b", "a\\b", "a:b", "a!b"] {
            assert!(matches!(validate_name(bad), Err(Error::InvalidName(_))));
        }
        assert!(matches!(
            validate_name(&"x".repeat(32)),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn insert_keeps_children_sorted() -> Result<()> {
        let mut dir = Directory::new();
        for name in ["zz", "b", "A", "ccc", "a1"] {
            dir.insert(EntryId::ROOT, name, EntryType::Stream)?;
        }
        assert_eq!(names(&dir, EntryId::ROOT), ["A", "b", "a1", "zz", "ccc"]);
        Ok(())
    }

    #[test]
    fn duplicates_are_case_insensitive() -> Result<()> {
        let mut dir = Directory::new();
        let storage = dir.insert(EntryId::ROOT, "Macros", EntryType::Storage)?;
        assert!(matches!(
            dir.insert(EntryId::ROOT, "MACROS", EntryType::Stream),
            Err(Error::DuplicateEntry(_))
        ));
        // Same name in a different storage is fine
        dir.insert(storage, "macros", EntryType::Stream)?;
        Ok(())
    }

    #[test]
    fn streams_cannot_have_children() -> Result<()> {
        let mut dir = Directory::new();
        let stream = dir.insert(EntryId::ROOT, "s", EntryType::Stream)?;
        assert!(matches!(
            dir.insert(stream, "child", EntryType::Stream),
            Err(Error::InvalidOperation(_))
        ));
        Ok(())
    }

    #[test]
    fn lookup_and_paths() -> Result<()> {
        let mut dir = Directory::new();
        let macros = dir.insert(EntryId::ROOT, "Macros", EntryType::Storage)?;
        let vba = dir.insert(macros, "VBA", EntryType::Storage)?;
        let project = dir.insert(vba, "_VBA_PROJECT", EntryType::Stream)?;
        assert_eq!(dir.lookup("Macros/VBA/_VBA_PROJECT")?, project);
        assert_eq!(dir.lookup("/macros/vba/_vba_project")?, project);
        assert_eq!(dir.lookup("")?, EntryId::ROOT);
        assert_eq!(dir.path_of(project)?, "Macros/VBA/_VBA_PROJECT");
        assert!(matches!(
            dir.lookup("Macros/Nope"),
            Err(Error::EntryNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn remove_is_recursive() -> Result<()> {
        let mut dir = Directory::new();
        let a = dir.insert(EntryId::ROOT, "a", EntryType::Storage)?;
        let b = dir.insert(a, "b", EntryType::Storage)?;
        dir.insert(b, "c", EntryType::Stream)?;
        dir.insert(EntryId::ROOT, "d", EntryType::Stream)?;
        let removed = dir.remove(a)?;
        assert_eq!(removed.len(), 3);
        assert!(dir.get(b).is_err());
        assert_eq!(names(&dir, EntryId::ROOT), ["d"]);
        assert!(matches!(
            dir.remove(EntryId::ROOT),
            Err(Error::InvalidOperation(_))
        ));
        Ok(())
    }

    #[test]
    fn serialized_trees_are_valid_red_black_trees() -> Result<()> {
        for count in 1..40 {
            let mut dir = Directory::new();
            for i in 0..count {
                dir.insert(EntryId::ROOT, &format!("stream{i}"), EntryType::Stream)?;
            }
            let buf = dir.to_bytes(ENDOFCHAIN, 0, 512)?;
            assert_eq!(buf.len() % 512, 0);
            let recs = records(&buf);
            assert_eq!(recs[0].objtype, 5);
            assert_eq!(recs[0].color, BLACK);
            let top = recs[0].child;
            assert_eq!(recs[top as usize].color, BLACK);
            check_rb(&recs, top, false);
        }
        Ok(())
    }

    #[test]
    fn load_back() -> Result<()> {
        let mut dir = Directory::new();
        let s = dir.insert(EntryId::ROOT, "Storage", EntryType::Storage)?;
        let inner = dir.insert(s, "Inner", EntryType::Stream)?;
        dir.get_mut(inner)?.size = 10;
        dir.get_mut(inner)?.start_sector = 3;
        dir.insert(EntryId::ROOT, "Other", EntryType::Stream)?;
        let buf = dir.to_bytes(7, 640, 4096)?;
        assert_eq!(buf.len(), 4096);
        let loaded = Directory::load(&buf, Version::V4)?;
        let inner = loaded.get(loaded.lookup("Storage/Inner")?)?;
        assert_eq!((inner.size, inner.start_sector), (10, 3));
        assert!(loaded.lookup("Other").is_ok());
        assert!(loaded.iter().all(|e| e.anomalies.is_empty()));
        Ok(())
    }

    #[test]
    fn loops_are_fatal() -> Result<()> {
        let mut dir = Directory::new();
        dir.insert(EntryId::ROOT, "a", EntryType::Stream)?;
        dir.insert(EntryId::ROOT, "b", EntryType::Stream)?;
        let mut buf = dir.to_bytes(ENDOFCHAIN, 0, 512)?;
        // Root -> "b" (top) -> left "a" -> right back to "b"
        let top = le_u32(&buf, 76) as usize;
        let left = le_u32(&buf, top * DIR_ENTRY_SIZE + 68) as usize;
        put_u32(&mut buf, left * DIR_ENTRY_SIZE + 72, top as u32);
        assert!(matches!(
            Directory::load(&buf, Version::V3),
            Err(Error::Format(_))
        ));
        Ok(())
    }
}
