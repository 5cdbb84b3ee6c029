//! Shared fixtures: temp archives and hand-assembled ZIP bytes standing in
//! for archives made by other tools.

#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
}

pub fn archive_path(name: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    Fixture { dir, path }
}

/// A stored entry for [`build_archive`].
pub struct RawEntry {
    pub name: &'static [u8],
    pub data: Vec<u8>,
    pub version_made_by: u16,
    pub external_attributes: u32,
    /// Put CRC and sizes in a trailing descriptor
    pub descriptor: bool,
    pub descriptor_signature: bool,
}

impl RawEntry {
    pub fn new(name: &'static [u8], data: &[u8]) -> Self {
        Self {
            name,
            data: data.to_vec(),
            version_made_by: 20,
            external_attributes: 0,
            descriptor: false,
            descriptor_signature: true,
        }
    }

    pub fn made_by(mut self, version_made_by: u16) -> Self {
        self.version_made_by = version_made_by;
        self
    }

    pub fn attributes(mut self, external_attributes: u32) -> Self {
        self.external_attributes = external_attributes;
        self
    }

    pub fn with_descriptor(mut self, signature: bool) -> Self {
        self.descriptor = true;
        self.descriptor_signature = signature;
        self
    }
}

fn u16le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn u32le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Assemble a stored-only archive byte by byte.
pub fn build_archive(entries: &[RawEntry], comment: &[u8]) -> Vec<u8> {
    const TIME: u16 = 0x7D1C;
    const DATE: u16 = 0x4596;

    let mut out = Vec::new();
    let mut offsets = Vec::new();
    for entry in entries {
        let crc = crc32fast::hash(&entry.data);
        let size = entry.data.len() as u32;
        let flags: u16 = if entry.descriptor { 0x0008 } else { 0 };
        let (header_crc, header_size) = if entry.descriptor { (0, 0) } else { (crc, size) };

        offsets.push(out.len() as u32);
        out.extend_from_slice(b"PK\x03\x04");
        u16le(&mut out, 20);
        u16le(&mut out, flags);
        u16le(&mut out, 0);
        u16le(&mut out, TIME);
        u16le(&mut out, DATE);
        u32le(&mut out, header_crc);
        u32le(&mut out, header_size);
        u32le(&mut out, header_size);
        u16le(&mut out, entry.name.len() as u16);
        u16le(&mut out, 0);
        out.extend_from_slice(entry.name);
        out.extend_from_slice(&entry.data);
        if entry.descriptor {
            if entry.descriptor_signature {
                out.extend_from_slice(b"PK\x07\x08");
            }
            u32le(&mut out, crc);
            u32le(&mut out, size);
            u32le(&mut out, size);
        }
    }

    let cd_offset = out.len() as u32;
    for (entry, offset) in entries.iter().zip(&offsets) {
        let crc = crc32fast::hash(&entry.data);
        let size = entry.data.len() as u32;
        out.extend_from_slice(b"PK\x01\x02");
        u16le(&mut out, entry.version_made_by);
        u16le(&mut out, 20);
        u16le(&mut out, if entry.descriptor { 0x0008 } else { 0 });
        u16le(&mut out, 0);
        u16le(&mut out, TIME);
        u16le(&mut out, DATE);
        u32le(&mut out, crc);
        u32le(&mut out, size);
        u32le(&mut out, size);
        u16le(&mut out, entry.name.len() as u16);
        u16le(&mut out, 0);
        u16le(&mut out, 0);
        u16le(&mut out, 0);
        u16le(&mut out, 0);
        u32le(&mut out, entry.external_attributes);
        u32le(&mut out, *offset);
        out.extend_from_slice(entry.name);
    }
    let cd_size = out.len() as u32 - cd_offset;

    out.extend_from_slice(b"PK\x05\x06");
    u16le(&mut out, 0);
    u16le(&mut out, 0);
    u16le(&mut out, entries.len() as u16);
    u16le(&mut out, entries.len() as u16);
    u32le(&mut out, cd_size);
    u32le(&mut out, cd_offset);
    u16le(&mut out, comment.len() as u16);
    out.extend_from_slice(comment);
    out
}

/// Deterministic, poorly compressible bytes.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
