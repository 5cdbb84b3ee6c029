//! Traditional PKWARE ("ZipCrypto") stream cipher.
//!
//! Three 32-bit keys are seeded from fixed constants and the password, then
//! advanced by every plaintext byte. Each entry starts from freshly derived
//! keys and a 12-byte random header whose last byte lets a reader reject
//! most wrong passwords before decompressing anything.
//!
//! The scheme is weak against known-plaintext attacks and exists here for
//! compatibility only.

use std::io::{self, Read, Write};

use rand::RngCore;

use crate::error::{Result, ZipError};

/// Size of the encryption header that precedes every encrypted entry.
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB88320
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// One step of the raw CRC-32 register, without pre/post inversion.
#[inline]
fn crc32_byte(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize]
}

/// The three running keys of the cipher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    /// Derive the initial keys for `password`.
    pub fn derive(password: &[u8]) -> Self {
        let mut keys = Self {
            key0: 0x12345678,
            key1: 0x23456789,
            key2: 0x34567890,
        };
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    #[inline]
    fn update(&mut self, byte: u8) {
        self.key0 = crc32_byte(self.key0, byte);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.key2 = crc32_byte(self.key2, (self.key1 >> 24) as u8);
    }

    #[inline]
    fn stream_byte(&self) -> u8 {
        let temp = (self.key2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    #[inline]
    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }

    #[inline]
    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.encrypt_byte(*byte);
        }
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.decrypt_byte(*byte);
        }
    }
}

/// The byte the last header byte must decrypt to.
///
/// Entries with a data descriptor do not know their CRC when the header is
/// written, so they are checked against the high byte of the DOS time instead.
pub fn check_byte(crc32: u32, dos_time: u16, deferred: bool) -> u8 {
    if deferred {
        (dos_time >> 8) as u8
    } else {
        (crc32 >> 24) as u8
    }
}

/// Encrypts everything written through it, starting with the random header.
pub struct ZipCryptoWriter<W: Write> {
    inner: W,
    keys: ZipCryptoKeys,
    buffer: Vec<u8>,
}

impl<W: Write> ZipCryptoWriter<W> {
    /// Derive keys for `password` and emit the encrypted header ending in `check`.
    pub fn new(mut inner: W, password: &[u8], check: u8) -> io::Result<Self> {
        let mut keys = ZipCryptoKeys::derive(password);
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        rand::thread_rng().fill_bytes(&mut header[..ENCRYPTION_HEADER_SIZE - 1]);
        header[ENCRYPTION_HEADER_SIZE - 1] = check;
        keys.encrypt(&mut header);
        inner.write_all(&header)?;
        Ok(Self {
            inner,
            keys,
            buffer: Vec::new(),
        })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ZipCryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.clear();
        self.buffer.extend_from_slice(buf);
        self.keys.encrypt(&mut self.buffer);
        self.inner.write_all(&self.buffer)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypts an entry's data after its header has been validated.
pub struct ZipCryptoReader<R: Read> {
    inner: R,
    keys: ZipCryptoKeys,
}

impl<R: Read> ZipCryptoReader<R> {
    /// Consume and decrypt the 12-byte header, comparing its last byte with `check`.
    pub fn new(mut inner: R, password: &[u8], check: u8, name: &str) -> Result<Self> {
        let mut keys = ZipCryptoKeys::derive(password);
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        inner.read_exact(&mut header)?;
        keys.decrypt(&mut header);
        if header[ENCRYPTION_HEADER_SIZE - 1] != check {
            return Err(ZipError::InvalidPassword {
                name: name.to_string(),
            });
        }
        Ok(Self { inner, keys })
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.keys.decrypt(&mut buf[..n]);
        Ok(n)
    }
}
