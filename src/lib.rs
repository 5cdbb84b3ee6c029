//! # ziparc
//!
//! A synchronous ZIP archive engine: open, list, extract and update ZIP
//! files in place, with ZipCrypto passwords and Unix metadata.
//!
//! ## Features
//!
//! - Catalog built from the central directory, in archive order, duplicates kept
//! - Extraction to memory, in chunks, or to a directory tree with permissions and symlinks
//! - Progress reporting with cooperative cancellation
//! - Buffered and streaming writes
//! - Replace-in-place through an atomic rewrite, or legacy append that keeps duplicates
//!
//! ## Example
//!
//! ```no_run
//! use ziparc::{WriteOptions, ZipArchive};
//!
//! fn main() -> ziparc::Result<()> {
//!     let archive = ZipArchive::open("notes.zip", Some("111111"))?;
//!     archive.write("todo.txt", b"ship it", &WriteOptions::new().permissions(0o600))?;
//!
//!     for entry in archive.list() {
//!         println!("{} {:o}", entry.name(), entry.posix_permissions());
//!     }
//!     let data = archive.extract("todo.txt")?;
//!     assert_eq!(data, b"ship it");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod progress;
pub mod zip;

pub use cli::Cli;
pub use error::{Result, ZipError};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use progress::{NoProgress, ProgressSink};
pub use zip::{
    CompressionMethod, EntryFailure, EntryKind, EntrySink, ExtractReport, WriteOptions, ZipArchive,
    ZipEntry,
};
