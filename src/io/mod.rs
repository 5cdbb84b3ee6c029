//! Positional-read sources.
//!
//! Every read operation goes through [`ReadAt`], which never moves a shared
//! cursor. Concurrent readers of one archive therefore cannot disturb each
//! other's position, whether they share one source or open their own.

mod local;
mod memory;

pub use local::LocalFileReader;
pub use memory::MemoryReader;

use std::io::{self, Read};

use crate::error::{Result, ZipError};

/// Trait for random access reading from a data source
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely, failing with `UnexpectedEndOfData` on a short source.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(ZipError::UnexpectedEndOfData {
                    offset: offset + filled as u64,
                });
            }
            filled += n;
        }
        Ok(())
    }
}

/// A bounded [`Read`] view over `len` bytes of a [`ReadAt`] source.
pub struct RangeReader<'a, R: ReadAt + ?Sized> {
    source: &'a R,
    pos: u64,
    end: u64,
}

impl<'a, R: ReadAt + ?Sized> RangeReader<'a, R> {
    pub fn new(source: &'a R, offset: u64, len: u64) -> Self {
        Self {
            source,
            pos: offset,
            end: offset.saturating_add(len),
        }
    }

    /// Offset of the next byte this reader will return.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<R: ReadAt + ?Sized> Read for RangeReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(remaining as usize);
        let n = self.source.read_at(self.pos, &mut buf[..want])?;
        if n == 0 {
            return Err(ZipError::UnexpectedEndOfData { offset: self.pos }.into());
        }
        self.pos += n as u64;
        Ok(n)
    }
}
