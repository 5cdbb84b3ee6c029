use std::collections::HashMap;

use super::entry::ZipEntry;

/// In-memory index of an archive's central directory.
///
/// Iteration follows central-directory order. Names are compared as raw
/// bytes, with no Unicode normalization. Duplicate names are kept, each
/// at its own position.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<ZipEntry>,
    index: HashMap<Vec<u8>, Vec<usize>>,
    /// Offset where the central directory starts, i.e. the end of entry data
    cd_offset: u64,
    comment: Vec<u8>,
}

impl Catalog {
    pub fn new(entries: Vec<ZipEntry>, cd_offset: u64, comment: Vec<u8>) -> Self {
        let mut index: HashMap<Vec<u8>, Vec<usize>> = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            index.entry(entry.raw_name.clone()).or_default().push(position);
        }
        Self {
            entries,
            index,
            cd_offset,
            comment,
        }
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cd_offset(&self) -> u64 {
        self.cd_offset
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Positions of every entry named `name`, in catalog order.
    pub fn positions(&self, name: &[u8]) -> &[usize] {
        self.index.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.index.contains_key(name)
    }

    /// Every entry named `name`, in catalog order.
    pub fn all_named(&self, name: &[u8]) -> Vec<&ZipEntry> {
        self.positions(name).iter().map(|&i| &self.entries[i]).collect()
    }

    /// The entry named `name`; for duplicated names, the last in catalog order.
    pub fn get(&self, name: &[u8]) -> Option<&ZipEntry> {
        self.positions(name).last().map(|&i| &self.entries[i])
    }

    pub fn is_password_protected(&self) -> bool {
        self.entries.iter().any(ZipEntry::is_encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::{CompressionMethod, DosDateTime, ExternalAttributes};

    fn entry(name: &str, crc32: u32) -> ZipEntry {
        ZipEntry {
            raw_name: name.as_bytes().to_vec(),
            name: name.to_string(),
            version_made_by: 0,
            version_needed: 20,
            flags: 0,
            compression_method: CompressionMethod::Stored,
            dos_time: DosDateTime::MIN,
            crc32,
            compressed_size: 0,
            uncompressed_size: 0,
            attributes: ExternalAttributes::default(),
            lfh_offset: 0,
            extra: Vec::new(),
            comment: Vec::new(),
            modified_unix: None,
        }
    }

    #[test]
    fn lookup_and_order() {
        let catalog = Catalog::new(vec![entry("b", 1), entry("a", 2), entry("c", 3)], 0, Vec::new());
        let names: Vec<_> = catalog.entries().iter().map(ZipEntry::name).collect();
        assert_eq!(names, ["b", "a", "c"]);
        assert_eq!(catalog.get(b"a").map(ZipEntry::crc32), Some(2));
        assert!(catalog.get(b"A").is_none());
        assert!(!catalog.contains(b"d"));
    }

    #[test]
    fn duplicates_resolve_to_last() {
        let catalog = Catalog::new(vec![entry("a", 1), entry("b", 2), entry("a", 3)], 0, Vec::new());
        assert_eq!(catalog.positions(b"a"), &[0, 2]);
        assert_eq!(catalog.all_named(b"a").len(), 2);
        assert_eq!(catalog.get(b"a").map(ZipEntry::crc32), Some(3));
    }

    #[test]
    fn names_are_not_normalized() {
        // "Å" precomposed vs. "A" + combining ring
        let catalog = Catalog::new(vec![entry("\u{00C5}.txt", 1)], 0, Vec::new());
        assert!(catalog.contains("\u{00C5}.txt".as_bytes()));
        assert!(!catalog.contains("A\u{030A}.txt".as_bytes()));
    }
}
