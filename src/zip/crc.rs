//! CRC-32 (IEEE 802.3) over byte streams.
//!
//! Running values compose the way zlib's `crc32()` does: start from `0`,
//! feed chunks in order, and the result after the last chunk is the value
//! stored in ZIP headers.

use std::io::{self, Read, Write};

use crc32fast::Hasher;

/// Continue a running CRC-32 with `bytes`.
pub fn update(crc: u32, bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(crc);
    hasher.update(bytes);
    hasher.finalize()
}

/// CRC-32 of a complete buffer.
pub fn checksum(bytes: &[u8]) -> u32 {
    update(0, bytes)
}

/// Passes writes through while checksumming and counting them.
pub struct CrcWriter<W> {
    inner: W,
    hasher: Hasher,
    count: u64,
}

impl<W: Write> CrcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            count: 0,
        }
    }

    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Checksums everything read through it.
pub struct CrcReader<R> {
    inner: R,
    hasher: Hasher,
    count: u64,
}

impl<R: Read> CrcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            count: 0,
        }
    }

    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum(b""), 0);
    }

    #[test]
    fn chunked_update_matches_whole() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let crc = data.chunks(7).fold(0, |crc, chunk| update(crc, chunk));
        assert_eq!(crc, checksum(data));
        assert_eq!(crc, 0x414F_A339);
    }

    #[test]
    fn writer_and_reader_agree() {
        let data = vec![0xA5u8; 10_000];
        let mut writer = CrcWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        assert_eq!(writer.count(), 10_000);

        let mut reader = CrcReader::new(&data[..]);
        io::copy(&mut reader, &mut io::sink()).unwrap();
        assert_eq!(reader.crc(), writer.crc());
        assert_eq!(writer.crc(), checksum(&data));
    }
}
