use ctxcfb::{sniff, CompoundFile, EntryId, EntryType, Error, FormatKind, Version};
use sha1::{Digest as _, Sha1};
use std::collections::HashMap;
use std::io::{self, Write};

struct HashingWriter {
    size: usize,
    hash: Sha1,
}

impl HashingWriter {
    fn new() -> Self {
        Self {
            size: 0,
            hash: Sha1::new(),
        }
    }

    fn finish(&mut self) -> String {
        let mut res = [0u8; 20];
        self.hash.finalize_into_reset((&mut res).into());
        self.size = 0;
        res.into_iter().map(|v| format!("{:02x}", v)).collect()
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> Result<usize, std::io::Error> {
        self.hash.update(buf);
        self.size += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), std::io::Error> {
        Ok(())
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn digest(data: &[u8]) -> String {
    let mut w = HashingWriter::new();
    w.write_all(data).unwrap();
    w.finish()
}

fn build(version: Version) -> Result<(CompoundFile, HashMap<String, String>), Error> {
    let mut cf = CompoundFile::new(version);
    let mut digests = HashMap::new();
    for (path, len, seed) in [
        ("WordDocument", 4096, 1),
        ("1Table", 6427, 2),
        ("\u{5}SummaryInformation", 4000, 3),
        ("ObjectPool/_1234/\u{1}Ole", 20, 4),
        ("ObjectPool/_1234/Contents", 70000, 5),
        ("Macros/VBA/dir", 0, 6),
    ] {
        let data = pattern(len, seed);
        cf.put_stream(path, &data)?;
        digests.insert(path.to_string(), digest(&data));
    }
    Ok((cf, digests))
}

fn check(cf: &CompoundFile, digests: &HashMap<String, String>) -> Result<(), Error> {
    let mut streams = 0;
    for (name, entry) in cf.ftw()? {
        assert!(entry.anomalies.is_empty(), "{name}: {:?}", entry.anomalies);
        if !entry.is_stream() {
            continue;
        }
        streams += 1;
        let mut reader = cf.stream_reader(cf.get_stream(&name)?)?;
        let mut w = HashingWriter::new();
        io::copy(&mut reader, &mut w)?;
        assert_eq!(w.size as u64, entry.size, "{name}");
        assert_eq!(&w.finish(), &digests[&name], "{name}");
    }
    assert_eq!(streams, digests.len());
    Ok(())
}

#[test]
fn test_save_and_reopen() -> Result<(), Error> {
    for version in [Version::V3, Version::V4] {
        let (cf, digests) = build(version)?;
        check(&cf, &digests)?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.cfb");
        cf.save_to_path(&path)?;
        let data = std::fs::read(&path)?;
        assert_eq!(sniff(&data), FormatKind::Cfb);
        assert_eq!(data.len() % version.sector_size(), 0);

        let cf = CompoundFile::open(std::fs::File::open(&path)?)?;
        assert_eq!(cf.version(), version);
        assert!(cf.anomalies().is_empty(), "{:?}", cf.anomalies());
        check(&cf, &digests)?;

        let entry = cf.get_entry("ObjectPool/_1234")?;
        assert_eq!(entry.entry_type, EntryType::Storage);
        assert_eq!(entry.children().len(), 2);
        assert_eq!(cf.path_of(entry.id())?, "ObjectPool/_1234");
        let root = cf.entry(EntryId::ROOT)?;
        assert_eq!(root.entry_type, EntryType::Root);
        assert_eq!(root.name, "Root Entry");
    }
    Ok(())
}

#[test]
fn test_modify_and_save() -> Result<(), Error> {
    let (mut cf, mut digests) = build(Version::V3)?;
    cf.delete_entry("ObjectPool")?;
    digests.retain(|k, _| !k.starts_with("ObjectPool/"));
    let data = pattern(5000, 9);
    let handle = cf.get_stream("Macros/VBA/dir")?;
    cf.write_stream(handle, &data)?;
    digests.insert("Macros/VBA/dir".to_string(), digest(&data));
    let data = pattern(100, 10);
    let handle = cf.get_stream("1Table")?;
    cf.write_stream(handle, &data)?;
    digests.insert("1Table".to_string(), digest(&data));

    let mut buf: Vec<u8> = Vec::new();
    cf.save(&mut buf)?;
    let cf = CompoundFile::from_bytes(&buf)?;
    check(&cf, &digests)?;
    assert!(matches!(
        cf.get_entry("ObjectPool"),
        Err(Error::EntryNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_case_insensitive_lookup() -> Result<(), Error> {
    let (cf, _) = build(Version::V3)?;
    assert_eq!(
        cf.get_stream("worddocument")?,
        cf.get_stream("WordDocument")?
    );
    assert_eq!(cf.get_entry("MACROS/vba/DIR")?.name, "dir");
    Ok(())
}

#[test]
fn test_not_a_compound_file() {
    let zip = b"PK\x03\x04 rest of a zip file".to_vec();
    assert!(matches!(
        CompoundFile::from_bytes(&zip),
        Err(Error::NotCompoundFile(FormatKind::Ooxml))
    ));
    assert!(matches!(
        CompoundFile::from_bytes(b""),
        Err(Error::NotCompoundFile(FormatKind::Unknown))
    ));
}
