use std::fs;
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use flate2::read::DeflateDecoder;
use tracing::{debug, warn};

use crate::error::{Result, ZipError};
use crate::io::{RangeReader, ReadAt};
use crate::progress::{ProgressSink, Tracker};

use super::catalog::Catalog;
use super::codec::{self, DataDescriptor};
use super::crc::CrcReader;
use super::crypto::{self, ZipCryptoReader};
use super::entry::ZipEntry;
use super::parser::ZipParser;
use super::structures::CompressionMethod;

/// Decompressed bytes handed to callers per step; cancellation is checked between steps.
const CHUNK_SIZE: usize = 64 * 1024;

/// An entry that could not be processed during a whole-archive traversal.
#[derive(Debug)]
pub struct EntryFailure {
    pub name: String,
    pub error: ZipError,
}

/// Outcome of [`ZipExtractor::extract_all`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub extracted: Vec<String>,
    /// Entries left alone because the destination already existed
    pub skipped: Vec<String>,
    pub failed: Vec<EntryFailure>,
}

impl ExtractReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// ZIP file extractor
pub struct ZipExtractor<'a, R: ReadAt + ?Sized> {
    parser: ZipParser<'a, R>,
    password: Option<&'a str>,
}

impl<'a, R: ReadAt + ?Sized> ZipExtractor<'a, R> {
    /// `password` is used for every encrypted entry read through this extractor.
    pub fn new(reader: &'a R, password: Option<&'a str>) -> Self {
        Self {
            parser: ZipParser::new(reader),
            password,
        }
    }

    /// Stream an entry's decompressed bytes to `sink` in chunks, verifying the CRC.
    ///
    /// `progress` sees the fraction of uncompressed bytes produced so far.
    /// The CRC check runs after the last chunk, so a sink that keeps data
    /// must discard it when this returns an error.
    pub fn stream_entry<P, F>(&self, entry: &ZipEntry, progress: &mut P, mut sink: F) -> Result<()>
    where
        P: ProgressSink + ?Sized,
        F: FnMut(&[u8]) -> Result<()>,
    {
        let name = entry.name();
        let data_offset = self.parser.get_data_offset(entry.lfh_offset)?;
        let raw = RangeReader::new(self.parser.reader(), data_offset, entry.compressed_size);

        let raw: Box<dyn Read + '_> = if entry.is_encrypted() {
            let password = self.password.ok_or_else(|| ZipError::PasswordRequired {
                name: name.to_string(),
            })?;
            let check = crypto::check_byte(
                entry.crc32,
                entry.dos_time.time,
                entry.has_data_descriptor(),
            );
            Box::new(ZipCryptoReader::new(raw, password.as_bytes(), check, name)?)
        } else {
            Box::new(raw)
        };

        let decoded: Box<dyn Read + '_> = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Default | CompressionMethod::Fastest | CompressionMethod::Best => {
                Box::new(DeflateDecoder::new(raw))
            }
            CompressionMethod::Unknown(code) => return Err(ZipError::UnsupportedCompression(code)),
        };

        debug!(
            entry = name,
            offset = data_offset,
            method = ?entry.compression_method,
            encrypted = entry.is_encrypted(),
            "reading entry"
        );

        let mut reader = CrcReader::new(decoded);
        let mut tracker = Tracker::new(entry.uncompressed_size);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(decode_error(err, entry, reader.crc())),
            };
            sink(&chunk[..n])?;
            if progress.progress(tracker.advance(n as u64)).is_break() {
                return Err(ZipError::Cancelled);
            }
        }

        let actual = reader.crc();
        if actual != entry.crc32 {
            return Err(ZipError::CrcMismatch {
                name: name.to_string(),
                expected: entry.crc32,
                actual,
            });
        }

        // Bit 3 entries carry their authoritative CRC after the data
        if entry.has_data_descriptor() {
            let zip64 = codec::find_extra_field(&entry.extra, codec::EXTRA_ZIP64).is_some();
            let (descriptor, _) = DataDescriptor::read_at(
                self.parser.reader(),
                data_offset + entry.compressed_size,
                zip64,
            )?;
            if descriptor.crc32 != actual {
                return Err(ZipError::CrcMismatch {
                    name: name.to_string(),
                    expected: descriptor.crc32,
                    actual,
                });
            }
        }

        // Verified data is not discarded for a late cancel
        let _ = progress.progress(tracker.finish());
        Ok(())
    }

    /// Extract file data to memory. A failed or cancelled call returns no bytes.
    pub fn extract_to_memory<P>(&self, entry: &ZipEntry, progress: &mut P) -> Result<Vec<u8>>
    where
        P: ProgressSink + ?Sized,
    {
        let mut out = Vec::with_capacity(entry.uncompressed_size.min(64 * 1024 * 1024) as usize);
        self.stream_entry(entry, progress, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(out)
    }

    /// Extract file to disk
    fn extract_to_file<P>(&self, entry: &ZipEntry, output_path: &Path, progress: &mut P) -> Result<()>
    where
        P: ProgressSink + ?Sized,
    {
        let mut file = fs::File::create(output_path).map_err(ZipError::at(output_path))?;
        let result = self
            .stream_entry(entry, progress, |chunk| {
                file.write_all(chunk).map_err(ZipError::at(output_path))
            })
            .and_then(|_| file.flush().map_err(ZipError::at(output_path)));
        if let Err(err) = result {
            drop(file);
            let _ = fs::remove_file(output_path);
            return Err(err);
        }

        if let Some(modified) = entry.modified() {
            file.set_modified(SystemTime::from(modified))
                .map_err(ZipError::at(output_path))?;
        }
        Ok(())
    }

    /// Recreate every entry of `catalog` under `destination`, in catalog order.
    ///
    /// Failures of individual entries are collected in the report. Only
    /// failing to create `destination` itself, or cancellation, fails the call;
    /// cancellation leaves entries extracted so far on disk.
    pub fn extract_all<P>(
        &self,
        catalog: &Catalog,
        destination: &Path,
        overwrite: bool,
        progress: &mut P,
    ) -> Result<ExtractReport>
    where
        P: ProgressSink + ?Sized,
    {
        fs::create_dir_all(destination).map_err(ZipError::at(destination))?;

        let total = catalog
            .entries()
            .iter()
            .map(ZipEntry::uncompressed_size)
            .fold(0u64, u64::saturating_add);
        let mut tracker = Tracker::new(total);
        let mut report = ExtractReport::default();
        let mut directories = Vec::new();

        for entry in catalog.entries() {
            let mut cancelled = false;
            let outcome = {
                let mut on_bytes = |bytes: u64| {
                    let flow = progress.progress(tracker.advance(bytes));
                    cancelled |= flow.is_break();
                    flow
                };
                self.extract_entry_into(entry, destination, overwrite, &mut on_bytes)
            };

            match outcome {
                Ok(Placed::Written) => report.extracted.push(entry.name().to_string()),
                Ok(Placed::Directory(path)) => {
                    directories.push((path, entry.posix_permissions()));
                    report.extracted.push(entry.name().to_string());
                }
                Ok(Placed::Skipped) => {
                    debug!(entry = entry.name(), "destination exists, skipping");
                    report.skipped.push(entry.name().to_string());
                }
                Err(ZipError::Cancelled) if cancelled => return Err(ZipError::Cancelled),
                Err(error) => {
                    warn!(entry = entry.name(), %error, "failed to extract entry");
                    report.failed.push(EntryFailure {
                        name: entry.name().to_string(),
                        error,
                    });
                }
            }
        }

        // Deepest first, so a read-only parent does not block its children
        for (path, mode) in directories.iter().rev() {
            if let Err(error) = apply_permissions(path, *mode) {
                warn!(path = %path.display(), %error, "failed to set directory permissions");
            }
        }

        let _ = progress.progress(tracker.finish());
        Ok(report)
    }

    fn extract_entry_into(
        &self,
        entry: &ZipEntry,
        destination: &Path,
        overwrite: bool,
        on_bytes: &mut dyn FnMut(u64) -> ControlFlow<()>,
    ) -> Result<Placed> {
        let relative = enclosed_path(entry.name())
            .ok_or_else(|| ZipError::UnsafeEntryPath(entry.name().to_string()))?;
        if has_symlink_ancestor(destination, &relative) {
            return Err(ZipError::UnsafeEntryPath(entry.name().to_string()));
        }
        let output_path = destination.join(relative);

        let existing = fs::symlink_metadata(&output_path).ok();

        // Directories merge with what is already there, e.g. parents created for earlier files
        if entry.is_directory() && existing.as_ref().is_none_or(|meta| meta.is_dir()) {
            fs::create_dir_all(&output_path).map_err(ZipError::at(&output_path))?;
            return Ok(Placed::Directory(output_path));
        }
        if existing.is_some() && !overwrite {
            return Ok(Placed::Skipped);
        }
        if entry.is_directory() {
            fs::remove_file(&output_path).map_err(ZipError::at(&output_path))?;
            fs::create_dir_all(&output_path).map_err(ZipError::at(&output_path))?;
            return Ok(Placed::Directory(output_path));
        }

        if let Some(meta) = existing {
            if meta.is_dir() {
                fs::remove_dir_all(&output_path).map_err(ZipError::at(&output_path))?;
            } else {
                fs::remove_file(&output_path).map_err(ZipError::at(&output_path))?;
            }
        }

        // Create parent directories if needed
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(ZipError::at(parent))?;
        }

        let mut progress = ByteProgress::new(on_bytes, entry.uncompressed_size());
        if entry.is_symbolic_link() {
            let target = self.extract_to_memory(entry, &mut progress)?;
            create_symlink(&target, &output_path)?;
            return Ok(Placed::Written);
        }

        self.extract_to_file(entry, &output_path, &mut progress)?;
        apply_permissions(&output_path, entry.posix_permissions())?;
        Ok(Placed::Written)
    }
}

enum Placed {
    Written,
    Directory(PathBuf),
    Skipped,
}

/// Adapts per-entry fractions into byte deltas for an archive-wide tracker.
struct ByteProgress<'f> {
    on_bytes: &'f mut dyn FnMut(u64) -> ControlFlow<()>,
    total: u64,
    reported: u64,
}

impl<'f> ByteProgress<'f> {
    fn new(on_bytes: &'f mut dyn FnMut(u64) -> ControlFlow<()>, total: u64) -> Self {
        Self {
            on_bytes,
            total,
            reported: 0,
        }
    }
}

impl ProgressSink for ByteProgress<'_> {
    fn progress(&mut self, fraction: f64) -> ControlFlow<()> {
        let target = (fraction * self.total as f64) as u64;
        let delta = target.saturating_sub(self.reported);
        self.reported = self.reported.max(target);
        (self.on_bytes)(delta)
    }
}

/// Convert an archive name to a relative path that cannot escape the
/// destination, or `None` for absolute names and names with `..`.
pub fn enclosed_path(name: &str) -> Option<PathBuf> {
    if name.contains('\0') {
        return None;
    }
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

/// Whether a directory on the way from `destination` to `relative` is a
/// symlink, e.g. one extracted from an earlier entry.
pub fn has_symlink_ancestor(destination: &Path, relative: &Path) -> bool {
    let mut current = destination.to_path_buf();
    let Some(parent) = relative.parent() else {
        return false;
    };
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return true,
            Ok(_) => {}
            // Nothing below a missing directory exists yet
            Err(_) => return false,
        }
    }
    false
}

#[cfg(unix)]
fn apply_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(ZipError::at(path))
}

#[cfg(not(unix))]
fn apply_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &[u8], link: &Path) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(OsStr::from_bytes(target), link).map_err(ZipError::at(link))
}

#[cfg(not(unix))]
fn create_symlink(target: &[u8], link: &Path) -> Result<()> {
    // Without reliable symlink support the target path is kept as file content
    fs::write(link, target).map_err(ZipError::at(link))
}

/// Classify a decoder failure. Corrupt compressed data means the CRC can
/// never match, which is how a wrong password slips past the check byte.
fn decode_error(err: io::Error, entry: &ZipEntry, crc_so_far: u32) -> ZipError {
    let corrupt = matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData
    ) && !err.get_ref().is_some_and(|inner| inner.is::<ZipError>());
    if corrupt {
        ZipError::CrcMismatch {
            name: entry.name().to_string(),
            expected: entry.crc32,
            actual: crc_so_far,
        }
    } else {
        ZipError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosed_path_rejects_escapes() {
        assert_eq!(enclosed_path("a/b.txt"), Some(PathBuf::from("a").join("b.txt")));
        assert_eq!(enclosed_path("./a/"), Some(PathBuf::from("a")));
        assert_eq!(enclosed_path("../evil"), None);
        assert_eq!(enclosed_path("a/../../evil"), None);
        assert_eq!(enclosed_path("/etc/passwd"), None);
        assert_eq!(enclosed_path(""), None);
        assert_eq!(enclosed_path("nul\0byte"), None);
    }
}
