//! Write pipeline.
//!
//! New entries are encoded straight into their destination file: local
//! header first, then data through CRC, Deflate and cipher layers, then
//! either a data descriptor or a patch of the header's CRC and size fields.
//!
//! Two ways to place them:
//! - [`rewrite`] copies every surviving entry's raw bytes into a temp file
//!   next to the archive, then renames it over the original.
//! - [`append`] writes over the old central directory in place, and puts
//!   the original tail back if anything fails.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{Local, TimeZone, Utc};
use flate2::write::DeflateEncoder;
use tracing::{debug, info, warn};

use crate::error::{Result, ZipError};
use crate::io::{RangeReader, ReadAt};

use super::catalog::Catalog;
use super::codec::{self, DataDescriptor, LocalFileHeader};
use super::crc::{self, CrcWriter};
use super::crypto::{self, ZipCryptoWriter};
use super::entry::ZipEntry;
use super::options::WriteOptions;
use super::structures::*;

/// Offset of the CRC field within a local file header
const LFH_CRC_OFFSET: u64 = 14;

/// What kind of filesystem object an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    fn file_type(self) -> u32 {
        match self {
            EntryKind::File => S_IFREG,
            EntryKind::Directory => S_IFDIR,
            EntryKind::Symlink => S_IFLNK,
        }
    }

    fn default_permissions(self) -> u32 {
        match self {
            EntryKind::File => DEFAULT_FILE_PERMISSIONS,
            EntryKind::Directory => DEFAULT_DIRECTORY_PERMISSIONS,
            EntryKind::Symlink => DEFAULT_SYMLINK_PERMISSIONS,
        }
    }
}

/// Everything known about an entry before its data is written.
pub(crate) struct EntryPlan {
    entry: ZipEntry,
    password: Option<String>,
    /// CRC the data must produce, when known up front
    expected_crc: Option<u32>,
}

impl EntryPlan {
    /// Resolve `options` against the archive's default password.
    ///
    /// `expected_crc` is the caller's or precomputed checksum. Without one
    /// the CRC and sizes are deferred to a data descriptor.
    pub fn new(
        name: &str,
        kind: EntryKind,
        options: &WriteOptions,
        default_password: Option<&str>,
        expected_crc: Option<u32>,
    ) -> Result<Self> {
        let permissions = options.permissions.unwrap_or(kind.default_permissions());
        if permissions > MODE_PERMISSION_MASK {
            return Err(ZipError::InvalidPermissionValue(permissions));
        }

        let mut name = name.to_string();
        if kind == EntryKind::Directory && !name.ends_with('/') {
            name.push('/');
        }
        if name.is_empty() || name == "/" {
            return Err(ZipError::UnsafeEntryPath(name));
        }
        if name.len() > u16::MAX as usize {
            return Err(ZipError::TooLarge(name));
        }

        let method = match kind {
            EntryKind::Directory => CompressionMethod::Stored,
            _ => options.compression_method,
        };
        if let CompressionMethod::Unknown(code) = method {
            return Err(ZipError::UnsupportedCompression(code));
        }

        // Directories carry no data to protect
        let password = match kind {
            EntryKind::Directory => None,
            _ => options
                .password
                .clone()
                .or_else(|| default_password.map(str::to_string)),
        };

        let (dos_time, mtime) = match options.timestamp {
            Some(timestamp) => (
                DosDateTime::from_datetime(&timestamp),
                Local
                    .from_local_datetime(&timestamp)
                    .earliest()
                    .map(|local| local.timestamp())
                    .unwrap_or_else(|| timestamp.and_utc().timestamp()),
            ),
            None => (DosDateTime::now(), Utc::now().timestamp()),
        };

        let mut flags = method.flag_bits();
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }
        if password.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        if expected_crc.is_none() {
            flags |= FLAG_DATA_DESCRIPTOR;
        }

        let raw_name = name.as_bytes().to_vec();
        Ok(Self {
            entry: ZipEntry {
                raw_name,
                name,
                version_made_by: VERSION_MADE_BY,
                version_needed: VERSION_NEEDED,
                flags,
                compression_method: method,
                dos_time,
                crc32: expected_crc.unwrap_or(0),
                compressed_size: 0,
                uncompressed_size: 0,
                attributes: ExternalAttributes::unix(kind.file_type(), permissions),
                lfh_offset: 0,
                extra: codec::extended_timestamp_field(mtime),
                comment: Vec::new(),
                modified_unix: Some(mtime),
            },
            password,
            expected_crc,
        })
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn raw_name(&self) -> &[u8] {
        self.entry.raw_name()
    }
}

/// Cipher layer, bottom of the encoding stack.
enum MaybeEncrypted<W: Write> {
    Unencrypted(W),
    ZipCrypto(ZipCryptoWriter<W>),
}

impl<W: Write> MaybeEncrypted<W> {
    fn into_inner(self) -> W {
        match self {
            MaybeEncrypted::Unencrypted(w) => w,
            MaybeEncrypted::ZipCrypto(w) => w.into_inner(),
        }
    }
}

impl<W: Write> Write for MaybeEncrypted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MaybeEncrypted::Unencrypted(w) => w.write(buf),
            MaybeEncrypted::ZipCrypto(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            MaybeEncrypted::Unencrypted(w) => w.flush(),
            MaybeEncrypted::ZipCrypto(w) => w.flush(),
        }
    }
}

enum GenericZipWriter<W: Write> {
    Storer(W),
    Deflater(DeflateEncoder<W>),
}

impl<W: Write> GenericZipWriter<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            GenericZipWriter::Storer(w) => Ok(w),
            GenericZipWriter::Deflater(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for GenericZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            GenericZipWriter::Storer(w) => w.write(buf),
            GenericZipWriter::Deflater(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            GenericZipWriter::Storer(w) => w.flush(),
            GenericZipWriter::Deflater(w) => w.flush(),
        }
    }
}

/// Receives an entry's uncompressed bytes during a streaming write.
///
/// Everything written is checksummed, compressed and encrypted on its way
/// to the archive file.
pub struct EntrySink<'w> {
    inner: CrcWriter<GenericZipWriter<MaybeEncrypted<BufWriter<&'w mut File>>>>,
}

impl EntrySink<'_> {
    /// Uncompressed bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.inner.count()
    }
}

impl Write for EntrySink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encode one entry at the current position of `out` and return its
/// central directory metadata.
pub(crate) fn write_entry<F>(out: &mut File, plan: EntryPlan, fill: F) -> Result<ZipEntry>
where
    F: FnOnce(&mut EntrySink<'_>) -> Result<()>,
{
    let EntryPlan {
        mut entry,
        password,
        expected_crc,
    } = plan;
    let deferred = entry.has_data_descriptor();

    let lfh_offset = out.stream_position()?;
    let header = LocalFileHeader::for_entry(&entry, entry.extra.clone())?;
    header.write_to(out)?;
    let data_start = lfh_offset + header.encoded_len();

    // The encoding stack borrows `out` until it is flushed and torn down
    let (crc32, uncompressed_size) = {
        let buffered = BufWriter::new(&mut *out);
        let cipher = match &password {
            Some(password) => {
                let check = crypto::check_byte(entry.crc32, entry.dos_time.time, deferred);
                MaybeEncrypted::ZipCrypto(ZipCryptoWriter::new(buffered, password.as_bytes(), check)?)
            }
            None => MaybeEncrypted::Unencrypted(buffered),
        };
        let compressor = match entry.compression_method.level() {
            Some(level) => GenericZipWriter::Deflater(DeflateEncoder::new(cipher, level)),
            None => GenericZipWriter::Storer(cipher),
        };
        let mut sink = EntrySink {
            inner: CrcWriter::new(compressor),
        };

        fill(&mut sink)?;

        let crc32 = sink.inner.crc();
        let uncompressed_size = sink.inner.count();
        let buffered = sink.inner.into_inner().finish()?.into_inner();
        buffered.into_inner().map_err(io::IntoInnerError::into_error)?;
        (crc32, uncompressed_size)
    };

    if let Some(expected) = expected_crc
        && expected != crc32
    {
        return Err(ZipError::CrcMismatch {
            name: entry.name,
            expected,
            actual: crc32,
        });
    }

    let data_end = out.stream_position()?;
    let compressed_size = data_end - data_start;
    codec::fit_u32(compressed_size, &entry.name)?;
    codec::fit_u32(uncompressed_size, &entry.name)?;

    if deferred {
        DataDescriptor {
            crc32,
            compressed_size,
            uncompressed_size,
        }
        .write_to(out)?;
    } else {
        out.seek(SeekFrom::Start(lfh_offset + LFH_CRC_OFFSET))?;
        out.write_u32::<LittleEndian>(crc32)?;
        out.write_u32::<LittleEndian>(compressed_size as u32)?;
        out.write_u32::<LittleEndian>(uncompressed_size as u32)?;
        out.seek(SeekFrom::Start(data_end))?;
    }

    debug!(
        entry = entry.name(),
        lfh_offset,
        compressed_size,
        uncompressed_size,
        encrypted = password.is_some(),
        descriptor = deferred,
        "entry encoded"
    );

    entry.crc32 = crc32;
    entry.compressed_size = compressed_size;
    entry.uncompressed_size = uncompressed_size;
    entry.lfh_offset = lfh_offset;
    Ok(entry)
}

/// Write a central directory for `entries` and the end record at the
/// current position. Returns the directory's offset.
pub(crate) fn write_central_directory(
    out: &mut File,
    entries: &[ZipEntry],
    comment: &[u8],
) -> Result<u64> {
    let cd_offset = out.stream_position()?;
    let total = u16::try_from(entries.len())
        .ok()
        .filter(|count| *count != u16::MAX)
        .ok_or_else(|| ZipError::TooLarge("central directory".to_string()))?;

    let mut w = BufWriter::new(&mut *out);
    let mut cd_size = 0u64;
    for entry in entries {
        let mut record = Vec::with_capacity(CDFH_MIN_SIZE + entry.raw_name.len() + entry.extra.len());
        codec::write_central_record(&mut record, entry)?;
        cd_size += record.len() as u64;
        w.write_all(&record)?;
    }
    EndOfCentralDirectory::write_to(
        &mut w,
        total,
        codec::fit_u32(cd_size, "central directory")?,
        codec::fit_u32(cd_offset, "central directory")?,
        comment,
    )?;
    w.flush()?;
    Ok(cd_offset)
}

/// Bytes an entry occupies from its local header to the end of its data
/// descriptor, if it has one.
pub(crate) fn raw_span<R: ReadAt + ?Sized>(reader: &R, entry: &ZipEntry) -> Result<u64> {
    let header = LocalFileHeader::read_at(reader, entry.lfh_offset)?;
    let data_end = entry.lfh_offset + header.encoded_len() + entry.compressed_size;
    let descriptor = if entry.has_data_descriptor() {
        let zip64 = codec::find_extra_field(&entry.extra, codec::EXTRA_ZIP64).is_some();
        DataDescriptor::read_at(reader, data_end, zip64)?.1
    } else {
        0
    };
    Ok(data_end + descriptor - entry.lfh_offset)
}

/// Copy an entry's raw bytes to the end of `out` without recompressing.
fn copy_entry<R: ReadAt + ?Sized>(reader: &R, entry: &ZipEntry, out: &mut File) -> Result<ZipEntry> {
    let span = raw_span(reader, entry)?;
    let lfh_offset = out.stream_position()?;
    let mut source = RangeReader::new(reader, entry.lfh_offset, span);
    let mut w = BufWriter::new(&mut *out);
    let copied = io::copy(&mut source, &mut w)?;
    w.flush()?;
    if copied != span {
        return Err(ZipError::UnexpectedEndOfData {
            offset: entry.lfh_offset + copied,
        });
    }

    let mut moved = entry.clone();
    moved.lfh_offset = lfh_offset;
    Ok(moved)
}

/// A new entry and the callback that produces its data.
pub(crate) struct Insert<F> {
    pub plan: EntryPlan,
    pub fill: F,
}

/// Rebuild the archive at `path` into a temp file and rename it into place.
///
/// Entries at `dropped` positions are left out. The inserted entry, if any,
/// takes the first dropped position, or goes last when nothing is dropped.
/// Until the rename, the original file is untouched.
pub(crate) fn rewrite<R, F>(
    path: &Path,
    reader: &R,
    catalog: &Catalog,
    dropped: &[usize],
    insert: Option<Insert<F>>,
) -> Result<Catalog>
where
    R: ReadAt + ?Sized,
    F: FnOnce(&mut EntrySink<'_>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".ziparc-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(ZipError::at(dir))?;

    let temp_path = temp.path().to_path_buf();
    let mut insert = insert;
    let mut entries = Vec::with_capacity(catalog.len() + 1);
    let out = temp.as_file_mut();
    for (position, entry) in catalog.entries().iter().enumerate() {
        if !dropped.contains(&position) {
            entries.push(copy_entry(reader, entry, out)?);
        } else if let Some(Insert { plan, fill }) = insert.take() {
            entries.push(write_entry(out, plan, fill)?);
        }
    }
    if let Some(Insert { plan, fill }) = insert.take() {
        entries.push(write_entry(out, plan, fill)?);
    }
    let cd_offset = write_central_directory(out, &entries, catalog.comment())?;
    out.sync_all().map_err(ZipError::at(&temp_path))?;

    // Keep the archive's mode rather than the temp file's 0600
    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(ZipError::at(&temp_path))?;
    }

    temp.persist(path).map_err(|err| ZipError::at(path)(err.error))?;
    info!(path = %path.display(), entries = entries.len(), cd_offset, "archive rewritten");
    Ok(Catalog::new(entries, cd_offset, catalog.comment().to_vec()))
}

/// Add an entry after the last one, overwriting the central directory in
/// place. Same-named entries stay in the archive.
///
/// A missing or empty file gets a fresh archive through [`rewrite`].
pub(crate) fn append<F>(path: &Path, catalog: &Catalog, insert: Insert<F>) -> Result<Catalog>
where
    F: FnOnce(&mut EntrySink<'_>) -> Result<()>,
{
    let existing_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if existing_len == 0 {
        let empty = crate::io::MemoryReader::new(Vec::new());
        return rewrite(path, &empty, catalog, &[], Some(insert));
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(ZipError::at(path))?;

    let cd_offset = catalog.cd_offset();
    let mut tail = Vec::new();
    file.seek(SeekFrom::Start(cd_offset)).map_err(ZipError::at(path))?;
    file.read_to_end(&mut tail).map_err(ZipError::at(path))?;
    file.seek(SeekFrom::Start(cd_offset)).map_err(ZipError::at(path))?;

    let name = insert.plan.name().to_string();
    let result = (|| -> Result<(Vec<ZipEntry>, u64)> {
        let mut entries = catalog.entries().to_vec();
        entries.push(write_entry(&mut file, insert.plan, insert.fill)?);
        let new_cd_offset = write_central_directory(&mut file, &entries, catalog.comment())?;
        let end = file.stream_position()?;
        file.set_len(end)?;
        file.sync_all()?;
        Ok((entries, new_cd_offset))
    })();

    match result {
        Ok((entries, new_cd_offset)) => {
            info!(path = %path.display(), entry = %name, entries = entries.len(), "entry appended");
            Ok(Catalog::new(entries, new_cd_offset, catalog.comment().to_vec()))
        }
        Err(err) => {
            warn!(path = %path.display(), entry = %name, error = %err, "append failed, restoring archive tail");
            restore_tail(&mut file, cd_offset, &tail).map_err(ZipError::at(path))?;
            Err(err)
        }
    }
}

fn restore_tail(file: &mut File, offset: u64, tail: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(tail)?;
    file.set_len(offset + tail.len() as u64)?;
    file.sync_all()
}

/// CRC a buffered payload and check it against a caller-supplied value.
pub(crate) fn payload_crc(name: &str, data: &[u8], supplied: Option<u32>) -> Result<u32> {
    let actual = crc::checksum(data);
    match supplied {
        Some(expected) if expected != actual => Err(ZipError::CrcMismatch {
            name: name.to_string(),
            expected,
            actual,
        }),
        _ => Ok(actual),
    }
}
