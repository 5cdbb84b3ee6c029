//! Error taxonomy for every archive operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The error type returned by all fallible operations in this crate.
#[derive(Debug, Error)]
pub enum ZipError {
    /// The container could not be parsed: no end-of-central-directory record,
    /// or a central directory that is truncated or inconsistent.
    #[error("not a valid ZIP archive: {reason}")]
    BadArchive { reason: String },

    /// The password verification byte in the entry's cipher header did not match.
    #[error("invalid password for entry '{name}'")]
    InvalidPassword { name: String },

    /// The entry is encrypted and neither the call nor the archive supplied a password.
    #[error("entry '{name}' is encrypted and no password was supplied")]
    PasswordRequired { name: String },

    /// The checksum of the decompressed data differs from the recorded one.
    #[error("CRC mismatch for entry '{name}': expected {expected:08x}, got {actual:08x}")]
    CrcMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// A header signature was missing where one was required.
    #[error("corrupt entry header at offset {offset}")]
    CorruptEntryHeader { offset: u64 },

    /// A structure ran past the end of the available data.
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEndOfData { offset: u64 },

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("I/O error on '{}': {source}", path.display())]
    IoPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission bits outside the 12-bit POSIX mode range.
    #[error("permission value {0:#o} exceeds the 12-bit POSIX mode range")]
    InvalidPermissionValue(u32),

    /// Reserved for a strict mode that refuses duplicate names.
    #[error("entry '{0}' already exists in the archive")]
    DuplicateEntryRejected(String),

    #[error("entry '{0}' not found in archive")]
    EntryNotFound(String),

    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u16),

    /// A progress sink or streaming callback asked the operation to stop.
    #[error("operation cancelled")]
    Cancelled,

    /// The entry name would escape the extraction directory.
    #[error("entry '{0}' has an unsafe path")]
    UnsafeEntryPath(String),

    /// A size or offset does not fit the 32-bit fields this writer emits.
    #[error("entry '{0}' is too large for a non-ZIP64 archive")]
    TooLarge(String),
}

impl ZipError {
    pub(crate) fn bad_archive(reason: impl Into<String>) -> Self {
        ZipError::BadArchive {
            reason: reason.into(),
        }
    }

    /// Wraps an I/O error with the path it happened on.
    pub(crate) fn at(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| ZipError::IoPath { path, source }
    }

    /// Maps a short read while decoding a structure that starts at `offset`.
    pub(crate) fn truncated(offset: u64) -> impl Fn(io::Error) -> Self {
        move |err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ZipError::UnexpectedEndOfData { offset }
            } else {
                ZipError::from(err)
            }
        }
    }
}

impl From<io::Error> for ZipError {
    /// Unwraps archive errors that travelled through an `io::Read`/`io::Write` layer.
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            return ZipError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip)) => *zip,
            _ => ZipError::Io(kind.into()),
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(source) => source,
            other => io::Error::other(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ZipError>;
