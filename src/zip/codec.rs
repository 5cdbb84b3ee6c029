//! Byte-level encoding and decoding of per-entry structures: local file
//! headers, data descriptors, central directory records and the extra
//! fields this crate understands.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::entry::ZipEntry;
use super::structures::*;

/// ZIP64 extended information
pub const EXTRA_ZIP64: u16 = 0x0001;
/// Info-ZIP extended timestamp ("UT")
pub const EXTRA_EXTENDED_TIMESTAMP: u16 = 0x5455;
const EXTENDED_TIMESTAMP_MTIME: u8 = 0x01;

/// Local File Header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub dos_time: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Header announcing `entry`. With a data descriptor the CRC and sizes
    /// are left zero and follow the data instead.
    pub fn for_entry(entry: &ZipEntry, local_extra: Vec<u8>) -> Result<Self> {
        let deferred = entry.has_data_descriptor();
        let (crc32, compressed_size, uncompressed_size) = if deferred {
            (0, 0, 0)
        } else {
            (
                entry.crc32,
                fit_u32(entry.compressed_size, entry.name())?,
                fit_u32(entry.uncompressed_size, entry.name())?,
            )
        };
        Ok(Self {
            version_needed: entry.version_needed,
            flags: entry.flags,
            compression_method: entry.compression_method.as_u16(),
            dos_time: entry.dos_time,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: entry.raw_name.clone(),
            extra: local_extra,
        })
    }

    pub fn encoded_len(&self) -> u64 {
        (LFH_SIZE + self.file_name.len() + self.extra.len()) as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(LFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.compression_method)?;
        w.write_u16::<LittleEndian>(self.dos_time.time)?;
        w.write_u16::<LittleEndian>(self.dos_time.date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.file_name.len() as u16)?;
        w.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        w.write_all(&self.file_name)?;
        w.write_all(&self.extra)
    }

    /// Decode the header at `offset`, validating its signature.
    pub fn read_at<R: ReadAt + ?Sized>(reader: &R, offset: u64) -> Result<Self> {
        let mut fixed = [0u8; LFH_SIZE];
        reader.read_exact_at(offset, &mut fixed)?;
        if &fixed[0..4] != LFH_SIGNATURE {
            return Err(ZipError::CorruptEntryHeader { offset });
        }

        let mut cursor = Cursor::new(&fixed[4..]);
        let truncated = ZipError::truncated(offset);
        let version_needed = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
        let flags = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
        let compression_method = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
        let time = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
        let date = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
        let crc32 = cursor.read_u32::<LittleEndian>().map_err(&truncated)?;
        let compressed_size = cursor.read_u32::<LittleEndian>().map_err(&truncated)?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(&truncated)?;
        let file_name_length = cursor.read_u16::<LittleEndian>().map_err(&truncated)? as usize;
        let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(&truncated)? as usize;

        let mut variable = vec![0u8; file_name_length + extra_field_length];
        reader.read_exact_at(offset + LFH_SIZE as u64, &mut variable)?;
        let extra = variable.split_off(file_name_length);

        Ok(Self {
            version_needed,
            flags,
            compression_method,
            dos_time: DosDateTime { date, time },
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: variable,
            extra,
        })
    }
}

/// Trailing CRC and sizes for entries written with general-purpose bit 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Signature plus three 32-bit fields
    pub const SIZE: usize = 16;

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(DATA_DESCRIPTOR_SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size as u32)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size as u32)
    }

    /// Decode the descriptor at `offset`; the signature is optional in the
    /// wild. Returns the descriptor and its encoded length.
    pub fn read_at<R: ReadAt + ?Sized>(reader: &R, offset: u64, zip64: bool) -> Result<(Self, u64)> {
        let mut buf = [0u8; 24];
        let available = reader.size().saturating_sub(offset).min(buf.len() as u64) as usize;
        reader.read_exact_at(offset, &mut buf[..available])?;

        let signed = available >= 4 && &buf[0..4] == DATA_DESCRIPTOR_SIGNATURE;
        let start = if signed { 4 } else { 0 };
        let body = if zip64 { 20 } else { 12 };
        if available < start + body {
            return Err(ZipError::UnexpectedEndOfData {
                offset: offset + available as u64,
            });
        }

        let mut cursor = Cursor::new(&buf[start..start + body]);
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (cursor.read_u64::<LittleEndian>()?, cursor.read_u64::<LittleEndian>()?)
        } else {
            (
                cursor.read_u32::<LittleEndian>()? as u64,
                cursor.read_u32::<LittleEndian>()? as u64,
            )
        };
        Ok((
            Self {
                crc32,
                compressed_size,
                uncompressed_size,
            },
            (start + body) as u64,
        ))
    }
}

/// Write the central directory record for `entry`.
pub fn write_central_record<W: Write>(w: &mut W, entry: &ZipEntry) -> Result<()> {
    let name = entry.name();
    let compressed_size = fit_u32(entry.compressed_size, name)?;
    let uncompressed_size = fit_u32(entry.uncompressed_size, name)?;
    let lfh_offset = fit_u32(entry.lfh_offset, name)?;
    // Offsets change on every rewrite, so a stale ZIP64 record is never carried over
    let extra = strip_extra_field(&entry.extra, EXTRA_ZIP64);

    w.write_all(CDFH_SIGNATURE)?;
    w.write_u16::<LittleEndian>(entry.version_made_by)?;
    w.write_u16::<LittleEndian>(entry.version_needed)?;
    w.write_u16::<LittleEndian>(entry.flags)?;
    w.write_u16::<LittleEndian>(entry.compression_method.as_u16())?;
    w.write_u16::<LittleEndian>(entry.dos_time.time)?;
    w.write_u16::<LittleEndian>(entry.dos_time.date)?;
    w.write_u32::<LittleEndian>(entry.crc32)?;
    w.write_u32::<LittleEndian>(compressed_size)?;
    w.write_u32::<LittleEndian>(uncompressed_size)?;
    w.write_u16::<LittleEndian>(entry.raw_name.len() as u16)?;
    w.write_u16::<LittleEndian>(extra.len() as u16)?;
    w.write_u16::<LittleEndian>(entry.comment.len() as u16)?;
    w.write_u16::<LittleEndian>(0)?; // disk number start
    w.write_u16::<LittleEndian>(0)?; // internal attributes
    w.write_u32::<LittleEndian>(entry.attributes.to_raw())?;
    w.write_u32::<LittleEndian>(lfh_offset)?;
    w.write_all(&entry.raw_name)?;
    w.write_all(&extra)?;
    w.write_all(&entry.comment)?;
    Ok(())
}

/// Decode one central directory record from `cursor`. `base` is the archive
/// offset of the cursor's first byte, for error reporting.
pub fn read_central_record(cursor: &mut Cursor<&[u8]>, base: u64) -> Result<ZipEntry> {
    let record_offset = base + cursor.position();
    let truncated = ZipError::truncated(record_offset);

    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig).map_err(&truncated)?;
    if sig != CDFH_SIGNATURE {
        return Err(ZipError::CorruptEntryHeader {
            offset: record_offset,
        });
    }

    // Read fixed-size header fields
    let version_made_by = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let version_needed = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let flags = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let compression_method = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let last_mod_time = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let last_mod_date = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let crc32 = cursor.read_u32::<LittleEndian>().map_err(&truncated)?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>().map_err(&truncated)? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(&truncated)? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let file_comment_length = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>().map_err(&truncated)?;
    let external_attrs = cursor.read_u32::<LittleEndian>().map_err(&truncated)?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>().map_err(&truncated)? as u64;

    let mut raw_name = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut raw_name).map_err(&truncated)?;
    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra).map_err(&truncated)?;
    let mut comment = vec![0u8; file_comment_length as usize];
    cursor.read_exact(&mut comment).map_err(&truncated)?;

    // ZIP64 fields are present only if the corresponding header field is 0xFFFFFFFF
    if let Some(mut zip64) = find_extra_field(&extra, EXTRA_ZIP64) {
        if uncompressed_size == 0xFFFFFFFF && zip64.len() >= 8 {
            uncompressed_size = zip64.read_u64::<LittleEndian>()?;
        }
        if compressed_size == 0xFFFFFFFF && zip64.len() >= 8 {
            compressed_size = zip64.read_u64::<LittleEndian>()?;
        }
        if lfh_offset == 0xFFFFFFFF && zip64.len() >= 8 {
            lfh_offset = zip64.read_u64::<LittleEndian>()?;
        }
    }

    let modified_unix = find_extra_field(&extra, EXTRA_EXTENDED_TIMESTAMP).and_then(parse_mtime);

    // Use lossy conversion to handle non-UTF8 filenames gracefully
    let name = String::from_utf8_lossy(&raw_name).into_owned();

    Ok(ZipEntry {
        raw_name,
        name,
        version_made_by,
        version_needed,
        flags,
        compression_method: CompressionMethod::from_u16(compression_method, flags),
        dos_time: DosDateTime {
            date: last_mod_date,
            time: last_mod_time,
        },
        crc32,
        compressed_size,
        uncompressed_size,
        attributes: ExternalAttributes::from_raw(external_attrs),
        lfh_offset,
        extra,
        comment,
        modified_unix,
    })
}

/// Extended timestamp field carrying only the modification time.
pub fn extended_timestamp_field(mtime: i64) -> Vec<u8> {
    let mut field = Vec::with_capacity(9);
    field.extend_from_slice(&EXTRA_EXTENDED_TIMESTAMP.to_le_bytes());
    field.extend_from_slice(&5u16.to_le_bytes());
    field.push(EXTENDED_TIMESTAMP_MTIME);
    field.extend_from_slice(&(mtime.clamp(0, u32::MAX as i64) as u32).to_le_bytes());
    field
}

fn parse_mtime(mut data: &[u8]) -> Option<i64> {
    let flags = data.read_u8().ok()?;
    if flags & EXTENDED_TIMESTAMP_MTIME == 0 {
        return None;
    }
    // Signed per Info-ZIP, but writers after 2038 store it unsigned
    data.read_u32::<LittleEndian>().ok().map(i64::from)
}

/// Iterate `(id, body)` pairs, stopping at the first malformed field.
pub fn extra_fields(extra: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut rest = extra;
    std::iter::from_fn(move || {
        if rest.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        if rest.len() < 4 + len {
            return None;
        }
        let body = &rest[4..4 + len];
        rest = &rest[4 + len..];
        Some((id, body))
    })
}

pub fn find_extra_field(extra: &[u8], id: u16) -> Option<&[u8]> {
    extra_fields(extra).find(|(field, _)| *field == id).map(|(_, body)| body)
}

/// Copy of `extra` without any field tagged `id`.
pub fn strip_extra_field(extra: &[u8], id: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len());
    for (field, body) in extra_fields(extra).filter(|(field, _)| *field != id) {
        out.extend_from_slice(&field.to_le_bytes());
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(body);
    }
    out
}

pub(crate) fn fit_u32(value: u64, name: &str) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v != u32::MAX)
        .ok_or_else(|| ZipError::TooLarge(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;

    fn sample_entry() -> ZipEntry {
        let raw_name = b"docs/readme.txt".to_vec();
        ZipEntry {
            name: String::from_utf8(raw_name.clone()).unwrap(),
            raw_name,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_NEEDED,
            flags: 0,
            compression_method: CompressionMethod::Default,
            dos_time: DosDateTime {
                date: 0x4596,
                time: 0x4C20,
            },
            crc32: 0xDEADBEEF,
            compressed_size: 120,
            uncompressed_size: 300,
            attributes: ExternalAttributes::unix(S_IFREG, 0o640),
            lfh_offset: 42,
            extra: extended_timestamp_field(1_419_000_000),
            comment: b"note".to_vec(),
            modified_unix: Some(1_419_000_000),
        }
    }

    #[test]
    fn central_record_round_trip() {
        let entry = sample_entry();
        let mut bytes = Vec::new();
        write_central_record(&mut bytes, &entry).unwrap();
        assert_eq!(bytes.len(), CDFH_MIN_SIZE + 15 + 9 + 4);

        let mut cursor = Cursor::new(&bytes[..]);
        let decoded = read_central_record(&mut cursor, 0).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.posix_permissions(), 0o640);
    }

    #[test]
    fn central_record_bad_signature() {
        let bytes = [0u8; CDFH_MIN_SIZE];
        let mut cursor = Cursor::new(&bytes[..]);
        let err = read_central_record(&mut cursor, 100).unwrap_err();
        assert!(matches!(err, ZipError::CorruptEntryHeader { offset: 100 }));
    }

    #[test]
    fn central_record_truncated() {
        let mut bytes = Vec::new();
        write_central_record(&mut bytes, &sample_entry()).unwrap();
        bytes.truncate(50);
        let mut cursor = Cursor::new(&bytes[..]);
        let err = read_central_record(&mut cursor, 0).unwrap_err();
        assert!(matches!(err, ZipError::UnexpectedEndOfData { offset: 0 }));
    }

    #[test]
    fn local_header_round_trip() {
        let entry = sample_entry();
        let header = LocalFileHeader::for_entry(&entry, extended_timestamp_field(7)).unwrap();
        let mut bytes = vec![0xAA; 5];
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, 5 + header.encoded_len());

        let decoded = LocalFileHeader::read_at(&MemoryReader::new(bytes), 5).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.compressed_size, 120);
    }

    #[test]
    fn local_header_defers_to_descriptor() {
        let mut entry = sample_entry();
        entry.flags |= FLAG_DATA_DESCRIPTOR;
        let header = LocalFileHeader::for_entry(&entry, Vec::new()).unwrap();
        assert_eq!((header.crc32, header.compressed_size, header.uncompressed_size), (0, 0, 0));
    }

    #[test]
    fn local_header_signature_checked() {
        let reader = MemoryReader::new(vec![0u8; 64]);
        let err = LocalFileHeader::read_at(&reader, 8).unwrap_err();
        assert!(matches!(err, ZipError::CorruptEntryHeader { offset: 8 }));
    }

    #[test]
    fn data_descriptor_with_and_without_signature() {
        let descriptor = DataDescriptor {
            crc32: 0x1234_5678,
            compressed_size: 10,
            uncompressed_size: 20,
        };
        let mut signed = Vec::new();
        descriptor.write_to(&mut signed).unwrap();
        let (decoded, len) = DataDescriptor::read_at(&MemoryReader::new(signed.clone()), 0, false).unwrap();
        assert_eq!((decoded, len), (descriptor, 16));

        let unsigned = signed[4..].to_vec();
        let (decoded, len) = DataDescriptor::read_at(&MemoryReader::new(unsigned), 0, false).unwrap();
        assert_eq!((decoded, len), (descriptor, 12));
    }

    #[test]
    fn extra_field_helpers() {
        let mut extra = vec![0x01, 0x00, 0x08, 0x00];
        extra.extend_from_slice(&5u64.to_le_bytes());
        extra.extend_from_slice(&extended_timestamp_field(99));

        assert_eq!(extra_fields(&extra).count(), 2);
        assert_eq!(find_extra_field(&extra, EXTRA_ZIP64), Some(&5u64.to_le_bytes()[..]));
        let stripped = strip_extra_field(&extra, EXTRA_ZIP64);
        assert_eq!(stripped, extended_timestamp_field(99));
        assert_eq!(
            find_extra_field(&stripped, EXTRA_EXTENDED_TIMESTAMP).and_then(parse_mtime),
            Some(99)
        );
    }

    #[test]
    fn zip64_sizes_override_header() {
        let mut entry = sample_entry();
        entry.extra = Vec::new();
        let mut bytes = Vec::new();
        write_central_record(&mut bytes, &entry).unwrap();

        // Patch the compressed size to the ZIP64 marker and append the extra field
        bytes[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut zip64 = vec![0x01, 0x00, 0x08, 0x00];
        zip64.extend_from_slice(&(5u64 << 32).to_le_bytes());
        bytes[30..32].copy_from_slice(&(zip64.len() as u16).to_le_bytes());
        let name_end = CDFH_MIN_SIZE + entry.raw_name.len();
        bytes.splice(name_end..name_end, zip64);

        let decoded = read_central_record(&mut Cursor::new(&bytes[..]), 0).unwrap();
        assert_eq!(decoded.compressed_size, 5u64 << 32);
        assert_eq!(decoded.uncompressed_size, 300);
    }
}
