use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use super::structures::{
    CompressionMethod, DEFAULT_DIRECTORY_PERMISSIONS, DEFAULT_FILE_PERMISSIONS, DosDateTime,
    ExternalAttributes, FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED,
};

/// One archived file, directory or symbolic link, as recorded in the central directory.
///
/// Entries are read-only to callers; they change only through the archive's
/// write operations, which replace the whole catalog on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub(crate) raw_name: Vec<u8>,
    pub(crate) name: String,
    pub(crate) version_made_by: u16,
    pub(crate) version_needed: u16,
    pub(crate) flags: u16,
    pub(crate) compression_method: CompressionMethod,
    pub(crate) dos_time: DosDateTime,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    pub(crate) attributes: ExternalAttributes,
    pub(crate) lfh_offset: u64,
    /// Central-directory extra field, ZIP64 record included
    pub(crate) extra: Vec<u8>,
    pub(crate) comment: Vec<u8>,
    pub(crate) modified_unix: Option<i64>,
}

impl ZipEntry {
    /// Entry name, decoded as UTF-8 (invalid sequences replaced).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry name exactly as stored; lookups compare these bytes.
    pub fn raw_name(&self) -> &[u8] {
        &self.raw_name
    }

    /// A trailing `/` or a directory attribute in either half of the external attributes.
    pub fn is_directory(&self) -> bool {
        self.raw_name.last() == Some(&b'/') || self.attributes.is_directory()
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.attributes.is_symlink()
    }

    /// The 12-bit POSIX mode, or the fallback for entries without Unix attributes.
    pub fn posix_permissions(&self) -> u32 {
        self.attributes.permissions().unwrap_or(if self.is_directory() {
            DEFAULT_DIRECTORY_PERMISSIONS
        } else {
            DEFAULT_FILE_PERMISSIONS
        })
    }

    pub fn external_attributes(&self) -> ExternalAttributes {
        self.attributes
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub(crate) fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn dos_time(&self) -> DosDateTime {
        self.dos_time
    }

    /// Modification time from the DOS fields (local time, 2-second resolution).
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.dos_time.to_datetime()
    }

    /// Unix modification time from the extended timestamp field, when present.
    pub fn modified_unix(&self) -> Option<i64> {
        self.modified_unix
    }

    /// Best available absolute modification time.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        if let Some(secs) = self.modified_unix {
            return Utc.timestamp_opt(secs, 0).single();
        }
        let local = self.timestamp()?;
        Local
            .from_local_datetime(&local)
            .earliest()
            .map(|value| value.with_timezone(&Utc))
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn local_header_offset(&self) -> u64 {
        self.lfh_offset
    }
}
