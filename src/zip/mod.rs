//! ZIP archive reading and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: format constants and fixed-size records (EOCD, ZIP64)
//! - [`codec`]: local headers, data descriptors, central records, extra fields
//! - [`crc`], [`crypto`]: integrity checksum and the ZipCrypto cipher
//! - [`parser`]: builds a [`Catalog`] from the end of an archive
//! - [`extractor`]: read pipeline (decrypt, inflate, verify)
//! - [`writer`]: write pipeline (rewrite or append)
//! - [`archive`]: the [`ZipArchive`] handle tying them together
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is read first, then the Central Directory, so listing never
//! touches entry data.
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE methods, with the Deflate level recorded in the flags
//! - Traditional PKWARE encryption
//! - Unix permission and file type bits in the external attributes
//! - ZIP64 records on read
//!
//! ## Limitations
//!
//! - No ZIP64 output; entries and archives must stay below 4 GiB
//! - No multi-disk archive support
//! - No AES encryption, BZIP2, LZMA, or other compression methods

pub mod archive;
pub mod catalog;
pub mod codec;
pub mod crc;
pub mod crypto;
pub mod entry;
pub mod extractor;
pub mod options;
pub mod parser;
pub mod structures;
pub mod writer;

pub use archive::ZipArchive;
pub use catalog::Catalog;
pub use entry::ZipEntry;
pub use extractor::{EntryFailure, ExtractReport, ZipExtractor};
pub use options::WriteOptions;
pub use parser::ZipParser;
pub use structures::{CompressionMethod, DosDateTime, ExternalAttributes};
pub use writer::{EntryKind, EntrySink};
