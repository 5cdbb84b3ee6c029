use std::fmt;

use chrono::NaiveDateTime;

use super::structures::CompressionMethod;

/// Per-call settings for a write. Unset fields fall back to archive-level
/// defaults; anything set here wins.
#[derive(Clone)]
pub struct WriteOptions {
    pub compression_method: CompressionMethod,
    /// CRC-32 of the plaintext. Needed only to encrypt a streamed entry
    /// without a data descriptor; when given it is verified against the data.
    pub crc: Option<u32>,
    /// Replace same-named entries by rewriting the archive (default), or
    /// append a duplicate after the existing entries.
    pub overwrite_if_in_archive: bool,
    /// Overrides the archive's password for this entry only.
    pub password: Option<String>,
    /// 12-bit POSIX mode; `None` picks 0o644 for files, 0o755 for
    /// directories and 0o777 for symbolic links.
    pub permissions: Option<u32>,
    /// Local modification time; `None` uses the time of the call.
    pub timestamp: Option<NaiveDateTime>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Default,
            crc: None,
            overwrite_if_in_archive: true,
            password: None,
            permissions: None,
            timestamp: None,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    pub fn crc(mut self, crc: u32) -> Self {
        self.crc = Some(crc);
        self
    }

    pub fn overwrite_if_in_archive(mut self, overwrite: bool) -> Self {
        self.overwrite_if_in_archive = overwrite;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    pub fn timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("compression_method", &self.compression_method)
            .field("crc", &self.crc.map(|crc| format!("{crc:08X}")))
            .field("overwrite_if_in_archive", &self.overwrite_if_in_archive)
            .field("password", &self.password.as_ref().map(|_| "<SPECIFIED>"))
            .field("permissions", &self.permissions.map(|mode| format!("{mode:o}")))
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
