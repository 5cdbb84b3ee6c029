//! Catalog construction from an archive's trailing structures.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Only the tail of the file is touched to build the catalog.

use std::io::Cursor;

use tracing::debug;

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::catalog::Catalog;
use super::codec;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// Generic over the reader type so catalogs can be built from files on
/// disk or from bytes already in memory.
pub struct ZipParser<'a, R: ReadAt + ?Sized> {
    /// The underlying data source
    reader: &'a R,
    /// Total size of the archive in bytes
    size: u64,
}

impl<'a, R: ReadAt + ?Sized> ZipParser<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Returns the record, its offset, and the archive comment that follows it.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64, Vec<u8>)> {
        // Optimization: First try the simple case where there's no comment.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf)?;

            // Check for signature and zero-length comment
            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset, Vec::new()));
            }
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        if search_size < EndOfCentralDirectory::SIZE as u64 {
            return Err(ZipError::bad_archive("file is too small to be a ZIP archive"));
        }
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field should match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd =
                        EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                    let comment = buf[i + EndOfCentralDirectory::SIZE..].to_vec();
                    return Ok((eocd, search_start + i as u64, comment));
                }
            }
        }

        Err(ZipError::bad_archive("end of central directory record not found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| ZipError::bad_archive("ZIP64 locator missing"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        // Read the actual ZIP64 EOCD from the offset specified in the locator
        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Build the catalog from the central directory.
    ///
    /// Any failure to locate or fully decode the directory is reported as
    /// `BadArchive`; no partial catalog is returned.
    pub fn read_catalog(&self) -> Result<Catalog> {
        let (eocd, eocd_offset, comment) = self.find_eocd()?;

        // Get Central Directory info, using ZIP64 if needed
        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > eocd_offset) {
            return Err(ZipError::bad_archive(format!(
                "central directory ({cd_size} bytes at {cd_offset}) overlaps its end record at {eocd_offset}"
            )));
        }
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            return Err(ZipError::bad_archive(format!(
                "{total_entries} entries cannot fit in a {cd_size}-byte central directory"
            )));
        }

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data)?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(&cd_data[..]);

        for index in 0..total_entries {
            let entry = codec::read_central_record(&mut cursor, cd_offset).map_err(|err| {
                ZipError::bad_archive(format!(
                    "central directory record {index} of {total_entries} unreadable: {err}"
                ))
            })?;
            entries.push(entry);
        }

        debug!(
            entries = entries.len(),
            cd_offset,
            cd_size,
            zip64 = eocd.is_zip64(),
            "catalog loaded"
        );

        Ok(Catalog::new(entries, cd_offset, comment))
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    pub fn get_data_offset(&self, lfh_offset: u64) -> Result<u64> {
        let header = codec::LocalFileHeader::read_at(self.reader, lfh_offset)?;
        Ok(lfh_offset + header.encoded_len())
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &'a R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;

    #[test]
    fn empty_archive_catalog() {
        let mut bytes = Vec::new();
        EndOfCentralDirectory::write_to(&mut bytes, 0, 0, 0, b"").unwrap();
        let reader = MemoryReader::new(bytes);
        let catalog = ZipParser::new(&reader).read_catalog().unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.cd_offset(), 0);
    }

    #[test]
    fn eocd_with_comment() {
        let mut bytes = b"junk".to_vec();
        EndOfCentralDirectory::write_to(&mut bytes, 0, 0, 4, b"archive comment").unwrap();
        let reader = MemoryReader::new(bytes);
        let (_, offset, comment) = ZipParser::new(&reader).find_eocd().unwrap();
        assert_eq!(offset, 4);
        assert_eq!(comment, b"archive comment");
    }

    #[test]
    fn plain_text_is_bad_archive() {
        let reader = MemoryReader::new(b"This is not a zip file at all, just text.\n".to_vec());
        let err = ZipParser::new(&reader).read_catalog().unwrap_err();
        assert!(matches!(err, ZipError::BadArchive { .. }));
    }

    #[test]
    fn tiny_input_is_bad_archive() {
        let reader = MemoryReader::new(b"PK".to_vec());
        let err = ZipParser::new(&reader).read_catalog().unwrap_err();
        assert!(matches!(err, ZipError::BadArchive { .. }));
    }

    #[test]
    fn overstated_entry_count_is_bad_archive() {
        let mut bytes = Vec::new();
        EndOfCentralDirectory::write_to(&mut bytes, 3, 0, 0, b"").unwrap();
        let reader = MemoryReader::new(bytes);
        let err = ZipParser::new(&reader).read_catalog().unwrap_err();
        assert!(matches!(err, ZipError::BadArchive { .. }));
    }

    #[test]
    fn garbage_directory_is_bad_archive() {
        let mut bytes = vec![0x55u8; CDFH_MIN_SIZE];
        EndOfCentralDirectory::write_to(&mut bytes, 1, CDFH_MIN_SIZE as u32, 0, b"").unwrap();
        let reader = MemoryReader::new(bytes);
        let err = ZipParser::new(&reader).read_catalog().unwrap_err();
        assert!(matches!(err, ZipError::BadArchive { .. }));
    }
}
