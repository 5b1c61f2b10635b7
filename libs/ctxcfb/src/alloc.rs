//! Sector allocation
//!
//! A [`SectorAllocator`] owns a sector space together with its allocation table. The
//! regular space (512 or 4096 byte sectors, chained through the FAT) and the mini space
//! (64 byte sectors living inside the mini stream, chained through the MiniFAT) share the
//! same model
use crate::error::{Error, Result};
use crate::{DIFSECT, ENDOFCHAIN, FATSECT, FREESECT, MAXREGSID};
use tracing::debug;

/// A sector space and its allocation table
#[derive(Debug, Clone)]
pub struct SectorAllocator {
    sector_size: usize,
    table: Vec<u32>,
    data: Vec<u8>,
}

impl SectorAllocator {
    /// Creates an empty space with the given sector size
    pub fn new(sector_size: usize) -> Self {
        Self {
            sector_size,
            table: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Creates a space from an existing table and its sectors
    ///
    /// `data` is truncated or zero padded to match the table
    pub fn from_parts(sector_size: usize, table: Vec<u32>, mut data: Vec<u8>) -> Self {
        data.resize(table.len() * sector_size, 0);
        Self {
            sector_size,
            table,
            data,
        }
    }

    /// The sector size in bytes
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Changes the sector size
    ///
    /// The sector size is fixed when the container is created: this only succeeds when the
    /// requested size matches the current one
    pub fn reconfigure(&mut self, sector_size: usize) -> Result<()> {
        if sector_size == self.sector_size {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "sector size is fixed at {} bytes and cannot be changed to {}",
                self.sector_size, sector_size
            )))
        }
    }

    /// The number of sectors in the space (free ones included)
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns [true] if the space has no sectors
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The allocation table
    pub fn table(&self) -> &[u32] {
        &self.table
    }

    /// The raw sectors, back to back
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The number of free sectors
    pub fn free_count(&self) -> usize {
        self.table.iter().filter(|&&v| v == FREESECT).count()
    }

    /// Reserves `count` sectors and links them into a new chain
    ///
    /// Free sectors are reused (lowest index first) before the space is extended; the
    /// returned indexes are in chain order and the last one is terminated by `ENDOFCHAIN`
    pub fn allocate(&mut self, count: usize) -> Result<Vec<u32>> {
        let mut sectors: Vec<u32> = Vec::with_capacity(count);
        for (index, value) in self.table.iter().enumerate() {
            if sectors.len() == count {
                break;
            }
            if *value == FREESECT {
                sectors.push(index as u32); // Safe: the table never exceeds MAXREGSID entries
            }
        }
        while sectors.len() < count {
            let next = self.table.len();
            if next > MAXREGSID as usize {
                return Err(Error::InvalidOperation(
                    "sector space exhausted".to_string(),
                ));
            }
            self.table.push(FREESECT);
            self.data.resize(self.data.len() + self.sector_size, 0);
            sectors.push(next as u32); // Safe: checked above
        }
        for pair in sectors.windows(2) {
            self.table[pair[0] as usize] = pair[1];
        }
        if let Some(&last) = sectors.last() {
            self.table[last as usize] = ENDOFCHAIN;
        }
        Ok(sectors)
    }

    /// Appends `count` sectors to the end of the space and marks them with `mark`
    ///
    /// Used for structures which are not regular chains (FAT and DIFAT sectors)
    pub fn reserve_tail(&mut self, count: usize, mark: u32) -> Vec<u32> {
        let first = self.table.len();
        self.table.resize(first + count, mark);
        self.data.resize(self.table.len() * self.sector_size, 0);
        (first..first + count).map(|s| s as u32).collect()
    }

    /// Follows the chain starting at `start`
    ///
    /// Returns the sector indexes in chain order. `ENDOFCHAIN` as a start value denotes an
    /// empty chain. A loop, a jump out of the table or a special value inside the chain are
    /// reported as [`Error::CorruptChain`]
    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        let mut sectors: Vec<u32> = Vec::new();
        if start == ENDOFCHAIN {
            return Ok(sectors);
        }
        let mut seen = vec![false; self.table.len()];
        let mut current = start;
        loop {
            let index = current as usize;
            if current > MAXREGSID || index >= self.table.len() {
                return Err(Error::CorruptChain(format!(
                    "sector 0x{current:x} at position {} of the chain starting at {start} is out of range (table size {})",
                    sectors.len(),
                    self.table.len()
                )));
            }
            if seen[index] {
                return Err(Error::CorruptChain(format!(
                    "loop detected at sector {current} in the chain starting at {start}"
                )));
            }
            seen[index] = true;
            sectors.push(current);
            current = match self.table[index] {
                ENDOFCHAIN => break,
                FREESECT | FATSECT | DIFSECT => {
                    return Err(Error::CorruptChain(format!(
                        "sector {index} in the chain starting at {start} links to special value 0x{:x}",
                        self.table[index]
                    )));
                }
                next => next,
            };
        }
        Ok(sectors)
    }

    /// Reads the content of the chain starting at `start`
    ///
    /// When `expected_size` is known, the chain must hold exactly the number of sectors
    /// required by that size and the returned data is truncated to it
    pub fn read_chain(&self, start: u32, expected_size: Option<u64>) -> Result<Vec<u8>> {
        let sectors = self.chain(start)?;
        if let Some(size) = expected_size {
            let needed = size.div_ceil(self.sector_size as u64);
            if needed != sectors.len() as u64 {
                return Err(Error::CorruptChain(format!(
                    "chain starting at {start} has {} sectors but a size of {size} needs {needed}",
                    sectors.len()
                )));
            }
        }
        let mut out: Vec<u8> = Vec::with_capacity(sectors.len() * self.sector_size);
        for sector in sectors {
            out.extend_from_slice(self.sector(sector));
        }
        if let Some(size) = expected_size {
            out.truncate(size as usize); // Safe: bounded by the chain length
        }
        Ok(out)
    }

    /// Stores `data` in a chain and returns its start sector
    ///
    /// The sectors of the existing chain (if any) are reused in order; the chain is then
    /// extended with newly allocated sectors or truncated, with the excess freed. Empty
    /// data yields `ENDOFCHAIN`
    pub fn write_chain(&mut self, start: Option<u32>, data: &[u8]) -> Result<u32> {
        let mut sectors = match start {
            Some(start) => self.chain(start)?,
            None => Vec::new(),
        };
        let needed = data.len().div_ceil(self.sector_size);
        if sectors.len() > needed {
            for &sector in &sectors[needed..] {
                self.release(sector);
            }
            sectors.truncate(needed);
            if let Some(&last) = sectors.last() {
                self.table[last as usize] = ENDOFCHAIN;
            }
        } else if sectors.len() < needed {
            let extra = self.allocate(needed - sectors.len())?;
            if let Some(&last) = sectors.last() {
                self.table[last as usize] = extra[0];
            }
            sectors.extend(extra);
        }
        for (sector, chunk) in sectors.iter().zip(data.chunks(self.sector_size)) {
            let dst = self.sector_mut(*sector);
            dst[..chunk.len()].copy_from_slice(chunk);
            dst[chunk.len()..].fill(0);
        }
        debug!(
            "Wrote {} bytes over {} sectors of {} bytes",
            data.len(),
            sectors.len(),
            self.sector_size
        );
        Ok(sectors.first().copied().unwrap_or(ENDOFCHAIN))
    }

    /// Releases every sector of the chain starting at `start`
    pub fn free(&mut self, start: u32) -> Result<()> {
        for sector in self.chain(start)? {
            self.release(sector);
        }
        Ok(())
    }

    /// Drops trailing free sectors
    pub fn trim(&mut self) {
        while self.table.last() == Some(&FREESECT) {
            self.table.pop();
        }
        self.data.truncate(self.table.len() * self.sector_size);
    }

    /// Returns the content of a sector (panics if out of range)
    pub fn sector(&self, sector: u32) -> &[u8] {
        let offset = sector as usize * self.sector_size;
        &self.data[offset..offset + self.sector_size]
    }

    /// Returns the mutable content of a sector (panics if out of range)
    pub fn sector_mut(&mut self, sector: u32) -> &mut [u8] {
        let offset = sector as usize * self.sector_size;
        &mut self.data[offset..offset + self.sector_size]
    }

    fn release(&mut self, sector: u32) {
        self.table[sector as usize] = FREESECT;
        self.sector_mut(sector).fill(0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn allocate_links_and_extends() -> Result<()> {
        let mut space = SectorAllocator::new(64);
        let chain = space.allocate(3)?;
        assert_eq!(chain, vec![0, 1, 2]);
        assert_eq!(space.table(), &[1, 2, ENDOFCHAIN]);
        assert_eq!(space.data().len(), 3 * 64);
        assert!(space.allocate(0)?.is_empty());
        Ok(())
    }

    #[test]
    fn allocate_reuses_freed_sectors_first() -> Result<()> {
        let mut space = SectorAllocator::new(64);
        let a = space.write_chain(None, &pattern(64 * 2, 1))?;
        let b = space.write_chain(None, &pattern(64 * 2, 2))?;
        assert_eq!((a, b), (0, 2));
        space.free(a)?;
        assert_eq!(space.free_count(), 2);
        let c = space.allocate(3)?;
        assert_eq!(c, vec![0, 1, 4]);
        assert_eq!(space.len(), 5);
        assert_eq!(space.chain(b)?, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn read_back_with_expected_size() -> Result<()> {
        let mut space = SectorAllocator::new(512);
        let data = pattern(1300, 7);
        let start = space.write_chain(None, &data)?;
        assert_eq!(space.read_chain(start, Some(1300))?, data);
        // The whole chain is returned when the size is unknown
        assert_eq!(space.read_chain(start, None)?.len(), 1536);
        assert!(matches!(
            space.read_chain(start, Some(2000)),
            Err(Error::CorruptChain(_))
        ));
        assert!(matches!(
            space.read_chain(start, Some(500)),
            Err(Error::CorruptChain(_))
        ));
        Ok(())
    }

    #[test]
    fn write_chain_grows_and_shrinks_in_place() -> Result<()> {
        let mut space = SectorAllocator::new(64);
        let start = space.write_chain(None, &pattern(100, 3))?;
        let other = space.write_chain(None, &pattern(10, 4))?;
        assert_eq!(other, 2);
        // Grow: the existing sectors are kept and the chain continues after `other`
        let grown = pattern(64 * 4, 5);
        assert_eq!(space.write_chain(Some(start), &grown)?, start);
        assert_eq!(space.chain(start)?, vec![0, 1, 3, 4]);
        assert_eq!(space.read_chain(start, Some(256))?, grown);
        // Shrink: the tail is released
        let shrunk = pattern(65, 6);
        assert_eq!(space.write_chain(Some(start), &shrunk)?, start);
        assert_eq!(space.chain(start)?, vec![0, 1]);
        assert_eq!(space.table()[3], FREESECT);
        assert_eq!(space.table()[4], FREESECT);
        assert_eq!(space.read_chain(start, Some(65))?, shrunk);
        // The tail of the last sector is zeroed
        assert!(space.sector(1)[1..].iter().all(|&b| b == 0));
        // Empty data frees the whole chain
        assert_eq!(space.write_chain(Some(start), &[])?, ENDOFCHAIN);
        assert_eq!(space.free_count(), 4);
        space.trim();
        assert_eq!(space.len(), 3);
        assert_eq!(space.read_chain(other, Some(10))?, pattern(10, 4));
        Ok(())
    }

    #[test]
    fn empty_chain() -> Result<()> {
        let space = SectorAllocator::new(512);
        assert!(space.chain(ENDOFCHAIN)?.is_empty());
        assert!(space.read_chain(ENDOFCHAIN, Some(0))?.is_empty());
        Ok(())
    }

    #[test]
    fn cycles_are_detected() {
        let space = SectorAllocator::from_parts(512, vec![1, 2, 0], Vec::new());
        assert!(matches!(space.chain(0), Err(Error::CorruptChain(_))));
        let space = SectorAllocator::from_parts(512, vec![0], Vec::new());
        assert!(matches!(space.chain(0), Err(Error::CorruptChain(_))));
    }

    #[test]
    fn out_of_range_and_special_links() {
        let space = SectorAllocator::from_parts(512, vec![1, 7], Vec::new());
        assert!(matches!(space.chain(0), Err(Error::CorruptChain(_))));
        assert!(matches!(space.chain(9), Err(Error::CorruptChain(_))));
        let space = SectorAllocator::from_parts(512, vec![1, FREESECT], Vec::new());
        assert!(matches!(space.chain(0), Err(Error::CorruptChain(_))));
        let space = SectorAllocator::from_parts(512, vec![FATSECT], Vec::new());
        assert!(matches!(space.chain(0), Err(Error::CorruptChain(_))));
        assert!(matches!(space.chain(FREESECT), Err(Error::CorruptChain(_))));
    }

    #[test]
    fn sector_size_is_fixed() {
        let mut space = SectorAllocator::new(512);
        assert!(space.reconfigure(512).is_ok());
        assert!(matches!(
            space.reconfigure(4096),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(space.sector_size(), 512);
    }

    #[test]
    fn reserve_tail_marks_sectors() {
        let mut space = SectorAllocator::new(512);
        space.allocate(1).unwrap();
        assert_eq!(space.reserve_tail(2, FATSECT), vec![1, 2]);
        assert_eq!(space.table(), &[ENDOFCHAIN, FATSECT, FATSECT]);
        assert_eq!(space.data().len(), 3 * 512);
    }
}
