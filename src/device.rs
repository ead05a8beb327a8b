//! The block I/O abstraction consumed by the Gateway, the RMW executor, and
//! the persistence engine. This mirrors the shape of `block_io`'s
//! `BlockReader`/`BlockWriter` traits, narrowed to the synchronous,
//! whole-block transfers this core actually issues; byte-granular and
//! stream-offset wrappers aren't needed here.

use std::io;
use std::sync::Mutex;

/// A backing device addressed in fixed-size blocks. Implementations may be
/// a real disk, a file, or (for tests) plain memory.
pub trait BlockDevice: Send + Sync {
    /// Size of one block, in bytes.
    fn block_size(&self) -> usize;

    /// Total device capacity, in blocks.
    fn num_blocks(&self) -> u64;

    /// Reads `buf.len() / block_size()` whole blocks starting at block
    /// `start_block` into `buf`.
    fn read_blocks(&self, start_block: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `buf.len() / block_size()` whole blocks starting at block
    /// `start_block` from `buf`.
    fn write_blocks(&self, start_block: u64, buf: &[u8]) -> io::Result<()>;

    /// Reads raw sectors (the externally-visible LBA/PBA granularity),
    /// preserving any sub-block offset. Default implementation built atop
    /// `read_blocks`; device backends with native sector addressing may
    /// override it.
    fn read_sectors(&self, start_sector: u64, sector_size: u64, buf: &mut [u8]) -> io::Result<()> {
        let block_sectors = self.block_size() as u64 / sector_size;
        let start_block = start_sector / block_sectors;
        let sub_offset = ((start_sector % block_sectors) * sector_size) as usize;
        let mut tmp = vec![0u8; self.block_size()];
        self.read_blocks(start_block, &mut tmp)?;
        buf.copy_from_slice(&tmp[sub_offset..sub_offset + buf.len()]);
        Ok(())
    }

    fn write_sectors(&self, start_sector: u64, sector_size: u64, buf: &[u8]) -> io::Result<()> {
        let block_sectors = self.block_size() as u64 / sector_size;
        let start_block = start_sector / block_sectors;
        let sub_offset = ((start_sector % block_sectors) * sector_size) as usize;
        let mut tmp = vec![0u8; self.block_size()];
        self.read_blocks(start_block, &mut tmp)?;
        tmp[sub_offset..sub_offset + buf.len()].copy_from_slice(buf);
        self.write_blocks(start_block, &tmp)
    }
}

/// An in-memory block device, in the shape of a RAM-backed disk layer: a
/// single growable byte buffer behind a mutex. Used by this crate's own
/// tests and, via the `test-util` feature, available to downstream
/// integration tests — it never ships as part of the default production
/// surface.
#[cfg(any(test, feature = "test-util"))]
pub struct MemBlockDevice {
    block_size: usize,
    data: Mutex<Vec<u8>>,
}

#[cfg(any(test, feature = "test-util"))]
impl MemBlockDevice {
    /// Creates a zero-filled device of `num_blocks` blocks of `block_size`
    /// bytes each.
    pub fn new(block_size: usize, num_blocks: u64) -> Self {
        MemBlockDevice {
            block_size,
            data: Mutex::new(vec![0u8; block_size * num_blocks as usize]),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl BlockDevice for MemBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        (self.data.lock().unwrap().len() / self.block_size) as u64
    }

    fn read_blocks(&self, start_block: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.lock().unwrap();
        let start = start_block as usize * self.block_size;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of device"));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_blocks(&self, start_block: u64, buf: &[u8]) -> io::Result<()> {
        let mut data = self.data.lock().unwrap();
        let start = start_block as usize * self.block_size;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "write past end of device"));
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dev = MemBlockDevice::new(512, 16);
        let payload = vec![0x42u8; 512];
        dev.write_blocks(3, &payload).unwrap();
        let mut out = vec![0u8; 512];
        dev.read_blocks(3, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn out_of_bounds_read_is_an_error() {
        let dev = MemBlockDevice::new(512, 2);
        let mut out = vec![0u8; 512];
        assert!(dev.read_blocks(5, &mut out).is_err());
    }

    #[test]
    fn sector_granular_io_preserves_sub_block_offset() {
        let dev = MemBlockDevice::new(4096, 4);
        let mut block = vec![0u8; 4096];
        for (i, b) in block.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        dev.write_blocks(0, &block).unwrap();

        let mut sector = vec![0u8; 512];
        dev.read_sectors(3, 512, &mut sector).unwrap();
        assert_eq!(sector, block[3 * 512..4 * 512]);
    }
}
