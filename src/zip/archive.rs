//! The archive handle.
//!
//! A [`ZipArchive`] owns the catalog of one archive file. Reads share the
//! catalog and open their own positional reader; writes hold the catalog
//! exclusively for their whole duration and swap in the new catalog only
//! after the file has been committed.

use std::fmt;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::error::{Result, ZipError};
use crate::io::{LocalFileReader, MemoryReader, ReadAt};
use crate::progress::{NoProgress, ProgressSink, Tracker};

use super::catalog::Catalog;
use super::entry::ZipEntry;
use super::extractor::{EntryFailure, ExtractReport, ZipExtractor};
use super::options::WriteOptions;
use super::parser::ZipParser;
use super::writer::{self, EntryKind, EntryPlan, EntrySink, Insert};

pub struct ZipArchive {
    path: PathBuf,
    password: Option<String>,
    catalog: RwLock<Catalog>,
}

impl fmt::Debug for ZipArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipArchive")
            .field("path", &self.path)
            .field("password", &self.password.as_ref().map(|_| "<SPECIFIED>"))
            .field("entries", &self.read_catalog().len())
            .finish()
    }
}

impl ZipArchive {
    /// Open the archive at `path`, loading its catalog.
    ///
    /// A missing or empty file opens as an empty archive that the first
    /// write creates. `password` is the default for encrypted entries, on
    /// both read and write.
    pub fn open(path: impl AsRef<Path>, password: Option<&str>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let catalog = match fs::metadata(&path) {
            Ok(metadata) if metadata.len() > 0 => {
                let reader = LocalFileReader::new(&path)?;
                ZipParser::new(&reader).read_catalog()?
            }
            Ok(_) => Catalog::default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Catalog::default(),
            Err(err) => return Err(ZipError::at(&path)(err)),
        };
        debug!(path = %path.display(), entries = catalog.len(), "archive opened");

        Ok(Self {
            path,
            password: password.map(str::to_string),
            catalog: RwLock::new(catalog),
        })
    }

    /// Whether `path` holds something with a readable end-of-central-directory record.
    pub fn is_zip(path: impl AsRef<Path>) -> bool {
        LocalFileReader::new(path.as_ref())
            .is_ok_and(|reader| ZipParser::new(&reader).find_eocd().is_ok())
    }

    /// Replace the default password used by later reads and writes.
    pub fn set_password(&mut self, password: Option<&str>) {
        self.password = password.map(str::to_string);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry in catalog order. Duplicate names appear once per copy.
    pub fn list(&self) -> Vec<ZipEntry> {
        self.read_catalog().entries().to_vec()
    }

    pub fn list_filenames(&self) -> Vec<String> {
        self.read_catalog()
            .entries()
            .iter()
            .map(|entry| entry.name().to_string())
            .collect()
    }

    /// Every entry called `name`, in catalog order.
    pub fn entries_named(&self, name: &str) -> Vec<ZipEntry> {
        self.read_catalog()
            .all_named(name.as_bytes())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_catalog().contains(name.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.read_catalog().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_catalog().is_empty()
    }

    pub fn comment(&self) -> Vec<u8> {
        self.read_catalog().comment().to_vec()
    }

    /// Whether any entry is encrypted.
    pub fn is_password_protected(&self) -> bool {
        self.read_catalog().is_password_protected()
    }

    /// Check the archive password against the first encrypted entry.
    ///
    /// Decrypts and checksums the whole entry, since the header check byte
    /// alone accepts about one wrong password in 256. Archives without
    /// encrypted entries accept any password.
    pub fn validate_password(&self) -> Result<bool> {
        let catalog = self.read_catalog();
        let Some(entry) = catalog.entries().iter().find(|entry| entry.is_encrypted()) else {
            return Ok(true);
        };
        let source = self.source()?;
        let extractor = ZipExtractor::new(&*source, self.password.as_deref());
        match extractor.stream_entry(entry, &mut NoProgress, |_| Ok(())) {
            Ok(()) => Ok(true),
            Err(
                ZipError::InvalidPassword { .. }
                | ZipError::PasswordRequired { .. }
                | ZipError::CrcMismatch { .. },
            ) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Decompressed contents of the entry called `name`.
    ///
    /// If several entries share the name, the last one in catalog order is read.
    pub fn extract(&self, name: &str) -> Result<Vec<u8>> {
        self.extract_with_progress(name, &mut NoProgress)
    }

    /// [`extract`](Self::extract), reporting progress and honoring cancellation.
    pub fn extract_with_progress<P>(&self, name: &str, progress: &mut P) -> Result<Vec<u8>>
    where
        P: ProgressSink + ?Sized,
    {
        let catalog = self.read_catalog();
        let entry = resolve(&catalog, name)?;
        let source = self.source()?;
        ZipExtractor::new(&*source, self.password.as_deref()).extract_to_memory(entry, progress)
    }

    /// [`extract`](Self::extract) with `password` in place of the archive default.
    pub fn extract_with_password(&self, name: &str, password: &str) -> Result<Vec<u8>> {
        let catalog = self.read_catalog();
        let entry = resolve(&catalog, name)?;
        let source = self.source()?;
        ZipExtractor::new(&*source, Some(password)).extract_to_memory(entry, &mut NoProgress)
    }

    /// Decompressed contents of one specific entry, e.g. one of several duplicates.
    pub fn extract_entry(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let _catalog = self.read_catalog();
        let source = self.source()?;
        ZipExtractor::new(&*source, self.password.as_deref()).extract_to_memory(entry, &mut NoProgress)
    }

    /// Stream `name` to `consumer` as `(chunk, fraction)` pairs.
    ///
    /// The consumer may break to stop early, which fails the call with
    /// [`ZipError::Cancelled`]. The CRC is verified after the last chunk, so
    /// a consumer must not trust the data until this returns `Ok`.
    pub fn extract_chunks<F>(&self, name: &str, mut consumer: F) -> Result<()>
    where
        F: FnMut(&[u8], f64) -> ControlFlow<()>,
    {
        let catalog = self.read_catalog();
        let entry = resolve(&catalog, name)?;
        let source = self.source()?;
        let mut tracker = Tracker::new(entry.uncompressed_size());
        ZipExtractor::new(&*source, self.password.as_deref()).stream_entry(
            entry,
            &mut NoProgress,
            |chunk| match consumer(chunk, tracker.advance(chunk.len() as u64)) {
                ControlFlow::Continue(()) => Ok(()),
                ControlFlow::Break(()) => Err(ZipError::Cancelled),
            },
        )
    }

    /// Recreate every entry under `destination`.
    ///
    /// With `overwrite` false, entries whose destination already exists are
    /// skipped. Per-entry failures are collected in the report rather than
    /// failing the call.
    pub fn extract_all(&self, destination: impl AsRef<Path>, overwrite: bool) -> Result<ExtractReport> {
        self.extract_all_with_progress(destination, overwrite, &mut NoProgress)
    }

    pub fn extract_all_with_progress<P>(
        &self,
        destination: impl AsRef<Path>,
        overwrite: bool,
        progress: &mut P,
    ) -> Result<ExtractReport>
    where
        P: ProgressSink + ?Sized,
    {
        let catalog = self.read_catalog();
        let source = self.source()?;
        ZipExtractor::new(&*source, self.password.as_deref()).extract_all(
            &catalog,
            destination.as_ref(),
            overwrite,
            progress,
        )
    }

    /// Hand every entry and its contents to `callback`, in catalog order.
    ///
    /// Entries that fail to decompress are skipped and returned; the
    /// callback may break to stop the traversal.
    pub fn iterate_entries<F>(&self, mut callback: F) -> Result<Vec<EntryFailure>>
    where
        F: FnMut(&ZipEntry, &[u8]) -> ControlFlow<()>,
    {
        let catalog = self.read_catalog();
        let source = self.source()?;
        let extractor = ZipExtractor::new(&*source, self.password.as_deref());
        let mut failures = Vec::new();

        for entry in catalog.entries() {
            match extractor.extract_to_memory(entry, &mut NoProgress) {
                Ok(data) => {
                    if callback(entry, &data).is_break() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(entry = entry.name(), %error, "skipping unreadable entry");
                    failures.push(EntryFailure {
                        name: entry.name().to_string(),
                        error,
                    });
                }
            }
        }
        Ok(failures)
    }

    /// Visit entry metadata in catalog order without reading any data.
    pub fn for_each_entry<F>(&self, mut callback: F)
    where
        F: FnMut(&ZipEntry) -> ControlFlow<()>,
    {
        let catalog = self.read_catalog();
        for entry in catalog.entries() {
            if callback(entry).is_break() {
                break;
            }
        }
    }

    /// Decompress every entry and verify its CRC, returning the entries that fail.
    pub fn check_data_integrity(&self) -> Result<Vec<EntryFailure>> {
        let catalog = self.read_catalog();
        let source = self.source()?;
        let extractor = ZipExtractor::new(&*source, self.password.as_deref());
        Ok(catalog
            .entries()
            .iter()
            .filter_map(|entry| {
                extractor
                    .stream_entry(entry, &mut NoProgress, |_| Ok(()))
                    .err()
                    .map(|error| EntryFailure {
                        name: entry.name().to_string(),
                        error,
                    })
            })
            .collect())
    }

    /// Store `data` as the file `name`.
    pub fn write(&self, name: &str, data: &[u8], options: &WriteOptions) -> Result<()> {
        self.write_buffered(name, EntryKind::File, data, options)
    }

    /// Store a file whose contents `fill` writes into the sink.
    ///
    /// Without a CRC in `options` the entry is written with a trailing data
    /// descriptor. Returning an error from `fill` aborts the write and leaves
    /// the archive as it was.
    pub fn write_streaming<F>(&self, name: &str, options: &WriteOptions, fill: F) -> Result<()>
    where
        F: FnOnce(&mut EntrySink<'_>) -> Result<()>,
    {
        let plan = EntryPlan::new(
            name,
            EntryKind::File,
            options,
            self.password.as_deref(),
            options.crc,
        )?;
        self.commit(plan, options.overwrite_if_in_archive, fill)
    }

    /// Add a directory entry. A trailing `/` is added to `name` if missing.
    pub fn write_directory(&self, name: &str, options: &WriteOptions) -> Result<()> {
        self.write_buffered(name, EntryKind::Directory, &[], options)
    }

    /// Add a symbolic link whose payload is `target`.
    pub fn write_symlink(&self, name: &str, target: &str, options: &WriteOptions) -> Result<()> {
        self.write_buffered(name, EntryKind::Symlink, target.as_bytes(), options)
    }

    /// Remove every entry called `name` by rewriting the archive.
    pub fn delete_entry(&self, name: &str) -> Result<()> {
        let mut catalog = self.write_catalog();
        let positions = catalog.positions(name.as_bytes()).to_vec();
        if positions.is_empty() {
            return Err(ZipError::EntryNotFound(name.to_string()));
        }
        let source = self.source()?;
        let updated = writer::rewrite(
            &self.path,
            &*source,
            &catalog,
            &positions,
            None::<Insert<fn(&mut EntrySink<'_>) -> Result<()>>>,
        )?;
        *catalog = updated;
        Ok(())
    }

    fn write_buffered(&self, name: &str, kind: EntryKind, data: &[u8], options: &WriteOptions) -> Result<()> {
        let crc = writer::payload_crc(name, data, options.crc)?;
        let plan = EntryPlan::new(name, kind, options, self.password.as_deref(), Some(crc))?;
        self.commit(plan, options.overwrite_if_in_archive, |sink| {
            std::io::Write::write_all(sink, data)?;
            Ok(())
        })
    }

    /// Place a planned entry and publish the resulting catalog.
    fn commit<F>(&self, plan: EntryPlan, overwrite: bool, fill: F) -> Result<()>
    where
        F: FnOnce(&mut EntrySink<'_>) -> Result<()>,
    {
        let mut catalog = self.write_catalog();
        let positions = catalog.positions(plan.raw_name()).to_vec();
        let insert = Insert { plan, fill };

        let updated = if overwrite && !positions.is_empty() {
            let source = self.source()?;
            writer::rewrite(&self.path, &*source, &catalog, &positions, Some(insert))?
        } else {
            writer::append(&self.path, &catalog, insert)?
        };
        *catalog = updated;
        Ok(())
    }

    fn source(&self) -> Result<Box<dyn ReadAt>> {
        match LocalFileReader::new(&self.path) {
            Ok(reader) => Ok(Box::new(reader)),
            Err(_) if !self.path.exists() => Ok(Box::new(MemoryReader::new(Vec::new()))),
            Err(err) => Err(err),
        }
    }

    fn read_catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_catalog(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The entry a by-name read resolves to.
fn resolve<'c>(catalog: &'c Catalog, name: &str) -> Result<&'c ZipEntry> {
    let positions = catalog.positions(name.as_bytes());
    if positions.len() > 1 {
        warn!(
            entry = name,
            copies = positions.len(),
            "name is duplicated in the archive, reading the last copy"
        );
    }
    catalog
        .get(name.as_bytes())
        .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))
}
