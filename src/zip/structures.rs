use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use flate2::Compression;
use std::io::{self, Cursor, Write};

use crate::error::{Result, ZipError};

/// General-purpose flag: entry data is encrypted
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General-purpose flag: CRC and sizes follow the data in a descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General-purpose flag: name and comment are UTF-8
pub const FLAG_UTF8: u16 = 0x0800;
/// Bits 1-2 carry the Deflate option for method 8
const FLAG_DEFLATE_MASK: u16 = 0x0006;
const FLAG_DEFLATE_MAXIMUM: u16 = 0x0002;
const FLAG_DEFLATE_FAST: u16 = 0x0004;
const FLAG_DEFLATE_SUPER_FAST: u16 = 0x0006;

/// "Version made by" host byte for Unix
pub const HOST_UNIX: u8 = 3;
/// Format version 2.0: Deflate, ZipCrypto, directories
pub const VERSION_NEEDED: u16 = 20;
pub const VERSION_MADE_BY: u16 = ((HOST_UNIX as u16) << 8) | VERSION_NEEDED;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
/// Highest valid value for the permission bits of `st_mode`
pub const MODE_PERMISSION_MASK: u32 = 0o7777;

/// MS-DOS directory attribute
pub const DOS_DIRECTORY: u16 = 0x0010;

pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;
pub const DEFAULT_DIRECTORY_PERMISSIONS: u32 = 0o755;
pub const DEFAULT_SYMLINK_PERMISSIONS: u32 = 0o777;

/// ZIP compression methods, with the Deflate level the entry was written at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    Stored,
    /// Deflate at a mid-level setting
    #[default]
    Default,
    Fastest,
    Best,
    Unknown(u16),
}

impl CompressionMethod {
    pub const STORED: u16 = 0;
    pub const DEFLATE: u16 = 8;

    /// Decode the method field, reading the Deflate level from the flag bits.
    pub fn from_u16(value: u16, flags: u16) -> Self {
        match value {
            Self::STORED => CompressionMethod::Stored,
            Self::DEFLATE => match flags & FLAG_DEFLATE_MASK {
                FLAG_DEFLATE_MAXIMUM => CompressionMethod::Best,
                FLAG_DEFLATE_FAST | FLAG_DEFLATE_SUPER_FAST => CompressionMethod::Fastest,
                _ => CompressionMethod::Default,
            },
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => Self::STORED,
            CompressionMethod::Default | CompressionMethod::Fastest | CompressionMethod::Best => {
                Self::DEFLATE
            }
            CompressionMethod::Unknown(v) => *v,
        }
    }

    /// Flag bits 1-2 announcing the Deflate option.
    pub fn flag_bits(&self) -> u16 {
        match self {
            CompressionMethod::Best => FLAG_DEFLATE_MAXIMUM,
            CompressionMethod::Fastest => FLAG_DEFLATE_SUPER_FAST,
            _ => 0,
        }
    }

    /// Encoder level, or `None` for methods that are not Deflate.
    pub fn level(&self) -> Option<Compression> {
        match self {
            CompressionMethod::Default => Some(Compression::default()),
            CompressionMethod::Fastest => Some(Compression::fast()),
            CompressionMethod::Best => Some(Compression::best()),
            CompressionMethod::Stored | CompressionMethod::Unknown(_) => None,
        }
    }
}

/// The 32-bit external attributes field, split into its two halves.
///
/// The low word holds MS-DOS attribute bits. The high word holds a Unix
/// `st_mode` when the writer recorded one; it is read regardless of the
/// "version made by" host because many tools set it on DOS-tagged entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExternalAttributes {
    pub dos_bits: u16,
    pub unix_mode: Option<u32>,
}

impl ExternalAttributes {
    pub fn from_raw(raw: u32) -> Self {
        let high = raw >> 16;
        Self {
            dos_bits: (raw & 0xFFFF) as u16,
            unix_mode: (high != 0).then_some(high),
        }
    }

    pub fn to_raw(&self) -> u32 {
        (self.unix_mode.unwrap_or(0) << 16) | self.dos_bits as u32
    }

    /// Attributes for an entry written by this crate.
    pub fn unix(file_type: u32, permissions: u32) -> Self {
        Self {
            dos_bits: if file_type == S_IFDIR { DOS_DIRECTORY } else { 0 },
            unix_mode: Some(file_type | (permissions & MODE_PERMISSION_MASK)),
        }
    }

    pub fn file_type(&self) -> Option<u32> {
        self.unix_mode.map(|mode| mode & S_IFMT)
    }

    pub fn is_directory(&self) -> bool {
        self.dos_bits & DOS_DIRECTORY != 0 || self.file_type() == Some(S_IFDIR)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(S_IFLNK)
    }

    pub fn permissions(&self) -> Option<u32> {
        self.unix_mode.map(|mode| mode & MODE_PERMISSION_MASK)
    }
}

/// MS-DOS date and time, 2-second resolution, local time by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// Earliest representable value, 1980-01-01 00:00:00
    pub const MIN: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// Convert a calendar timestamp, clamping to the 1980..=2107 range.
    pub fn from_datetime(value: &NaiveDateTime) -> Self {
        let year = value.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self {
                date: (127 << 9) | (12 << 5) | 31,
                time: (23 << 11) | (59 << 5) | 29,
            };
        }
        Self {
            date: (((year - 1980) as u16) << 9) | ((value.month() as u16) << 5) | value.day() as u16,
            time: ((value.hour() as u16) << 11)
                | ((value.minute() as u16) << 5)
                | (value.second() as u16 / 2),
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(&Local::now().naive_local())
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Calendar value, or `None` when the fields are out of range.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())?.and_hms_opt(
            hour.into(),
            minute.into(),
            second.into(),
        )
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Default)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::bad_archive("truncated end of central directory"));
        }

        // Verify signature
        if &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::bad_archive("end of central directory signature missing"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Write a single-disk record for `entries` directory records, followed by `comment`.
    pub fn write_to<W: Write>(
        w: &mut W,
        entries: u16,
        cd_size: u32,
        cd_offset: u32,
        comment: &[u8],
    ) -> io::Result<()> {
        let comment = &comment[..comment.len().min(u16::MAX as usize)];
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(entries)?;
        w.write_u16::<LittleEndian>(entries)?;
        w.write_u32::<LittleEndian>(cd_size)?;
        w.write_u32::<LittleEndian>(cd_offset)?;
        w.write_u16::<LittleEndian>(comment.len() as u16)?;
        w.write_all(comment)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::bad_archive("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::bad_archive("invalid ZIP64 end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Data descriptor, optionally preceded by its signature
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_level_survives_flags() {
        for method in [
            CompressionMethod::Stored,
            CompressionMethod::Default,
            CompressionMethod::Fastest,
            CompressionMethod::Best,
        ] {
            assert_eq!(CompressionMethod::from_u16(method.as_u16(), method.flag_bits()), method);
        }
        assert_eq!(CompressionMethod::from_u16(12, 0), CompressionMethod::Unknown(12));
    }

    #[test]
    fn external_attributes_halves() {
        let attrs = ExternalAttributes::from_raw(((S_IFREG | 0o742) << 16) | 0x20);
        assert_eq!(attrs.dos_bits, 0x20);
        assert_eq!(attrs.permissions(), Some(0o742));
        assert!(!attrs.is_directory());
        assert!(!attrs.is_symlink());
        assert_eq!(attrs.to_raw(), ((S_IFREG | 0o742) << 16) | 0x20);
    }

    #[test]
    fn dos_only_attributes() {
        let attrs = ExternalAttributes::from_raw(DOS_DIRECTORY as u32);
        assert_eq!(attrs.unix_mode, None);
        assert!(attrs.is_directory());
        assert_eq!(attrs.permissions(), None);
    }

    #[test]
    fn symlink_is_not_directory() {
        let attrs = ExternalAttributes::unix(S_IFLNK, 0o777);
        assert!(attrs.is_symlink());
        assert!(!attrs.is_directory());
    }

    #[test]
    fn dos_datetime_round_trip() {
        let value = NaiveDate::from_ymd_opt(2014, 12, 22)
            .unwrap()
            .and_hms_opt(23, 54, 18)
            .unwrap();
        let dos = DosDateTime::from_datetime(&value);
        assert_eq!(dos.mod_date(), (2014, 12, 22));
        assert_eq!(dos.mod_time(), (23, 54, 18));
        assert_eq!(dos.to_datetime(), Some(value));
    }

    #[test]
    fn dos_datetime_truncates_odd_seconds_and_clamps() {
        let odd = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 59)
            .unwrap();
        assert_eq!(DosDateTime::from_datetime(&odd).mod_time(), (0, 0, 58));

        let early = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(DosDateTime::from_datetime(&early), DosDateTime::MIN);
    }

    #[test]
    fn eocd_round_trip() {
        let mut bytes = Vec::new();
        EndOfCentralDirectory::write_to(&mut bytes, 3, 150, 4096, b"hi").unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE + 2);
        let eocd = EndOfCentralDirectory::from_bytes(&bytes).unwrap();
        assert_eq!(eocd.total_entries, 3);
        assert_eq!(eocd.cd_size, 150);
        assert_eq!(eocd.cd_offset, 4096);
        assert_eq!(eocd.comment_len, 2);
        assert!(!eocd.is_zip64());
    }
}
