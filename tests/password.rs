mod common;

use std::io::Write;

use common::{archive_path, noise};
use ziparc::{CompressionMethod, WriteOptions, ZipArchive, ZipError};

const PASSWORD: &str = "111111";

fn encrypted_archive(path: &std::path::Path) -> Vec<u8> {
    let data = b"top secret contents, repeated. ".repeat(40);
    let archive = ZipArchive::open(path, Some(PASSWORD)).unwrap();
    archive.write("secret.txt", &data, &WriteOptions::new()).unwrap();
    data
}

#[test]
fn encrypted_round_trip() {
    let fixture = archive_path("secret.zip");
    let data = encrypted_archive(&fixture.path);

    let archive = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    assert!(archive.is_password_protected());
    assert!(archive.list()[0].is_encrypted());
    assert_eq!(archive.extract("secret.txt").unwrap(), data);
    assert!(archive.validate_password().unwrap());
}

#[test]
fn missing_password() {
    let fixture = archive_path("secret.zip");
    encrypted_archive(&fixture.path);

    // Listing works without a password
    let archive = ZipArchive::open(&fixture.path, None).unwrap();
    assert_eq!(archive.list_filenames(), ["secret.txt"]);
    assert!(archive.is_password_protected());
    assert!(matches!(
        archive.extract("secret.txt"),
        Err(ZipError::PasswordRequired { .. })
    ));
    assert!(!archive.validate_password().unwrap());
}

#[test]
fn wrong_password() {
    let fixture = archive_path("secret.zip");
    encrypted_archive(&fixture.path);

    let archive = ZipArchive::open(&fixture.path, Some("not the password")).unwrap();
    // The check byte rejects most wrong passwords; the CRC catches the rest
    let err = archive.extract("secret.txt").unwrap_err();
    assert!(
        matches!(err, ZipError::InvalidPassword { .. } | ZipError::CrcMismatch { .. }),
        "{err:?}"
    );
    assert!(!archive.validate_password().unwrap());
}

#[test]
fn unencrypted_archive_is_not_protected() {
    let fixture = archive_path("plain.zip");
    let archive = ZipArchive::open(&fixture.path, None).unwrap();
    archive.write("plain.txt", b"open", &WriteOptions::new()).unwrap();
    assert!(!archive.is_password_protected());
    assert!(archive.validate_password().unwrap());

    // A password on open does not matter for plain entries
    let with_password = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    assert_eq!(with_password.extract("plain.txt").unwrap(), b"open");
}

#[test]
fn per_entry_password_override() {
    let fixture = archive_path("mixed.zip");
    let archive = ZipArchive::open(&fixture.path, None).unwrap();
    archive.write("plain.txt", b"plain", &WriteOptions::new()).unwrap();
    archive
        .write(
            "locked.txt",
            b"locked",
            &WriteOptions::new().password(PASSWORD),
        )
        .unwrap();

    let entries = archive.list();
    assert!(!entries[0].is_encrypted());
    assert!(entries[1].is_encrypted());
    assert!(archive.is_password_protected());
    assert_eq!(archive.extract("plain.txt").unwrap(), b"plain");
    assert!(matches!(
        archive.extract("locked.txt"),
        Err(ZipError::PasswordRequired { .. })
    ));

    let unlocked = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    assert_eq!(unlocked.extract("locked.txt").unwrap(), b"locked");
}

#[test]
fn encrypted_streaming_writes() {
    let fixture = archive_path("stream.zip");
    let archive = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    let data = noise(150_000);

    // Without a CRC the check byte comes from the DOS time
    archive
        .write_streaming("deferred.bin", &WriteOptions::new(), |sink| {
            for chunk in data.chunks(7_000) {
                sink.write_all(chunk)?;
            }
            Ok(())
        })
        .unwrap();
    archive
        .write_streaming(
            "known.bin",
            &WriteOptions::new()
                .crc(crc32fast::hash(&data))
                .compression_method(CompressionMethod::Stored),
            |sink| Ok(sink.write_all(&data)?),
        )
        .unwrap();

    let reopened = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    let entries = reopened.list();
    assert_ne!(entries[0].flags() & 0x0008, 0);
    assert_eq!(entries[1].flags() & 0x0008, 0);
    // Stored plus the 12-byte cipher header
    assert_eq!(entries[1].compressed_size(), data.len() as u64 + 12);
    assert_eq!(reopened.extract("deferred.bin").unwrap(), data);
    assert_eq!(reopened.extract("known.bin").unwrap(), data);
    assert!(reopened.check_data_integrity().unwrap().is_empty());
}

#[test]
fn encrypted_duplicates_are_keyed_independently() {
    let fixture = archive_path("dupes.zip");
    let archive = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    let append = WriteOptions::new().overwrite_if_in_archive(false);
    archive.write("same.txt", b"first copy", &append).unwrap();
    archive.write("same.txt", b"second copy", &append).unwrap();

    let reopened = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    let copies = reopened.entries_named("same.txt");
    assert_eq!(copies.len(), 2);
    assert_eq!(reopened.extract_entry(&copies[0]).unwrap(), b"first copy");
    assert_eq!(reopened.extract_entry(&copies[1]).unwrap(), b"second copy");
}

#[test]
fn rewrite_preserves_other_encrypted_entries() {
    let fixture = archive_path("rewrite.zip");
    let archive = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    archive.write("a", b"alpha", &WriteOptions::new()).unwrap();
    archive.write("b", b"beta", &WriteOptions::new()).unwrap();
    archive.write("a", b"alpha two", &WriteOptions::new()).unwrap();

    let reopened = ZipArchive::open(&fixture.path, Some(PASSWORD)).unwrap();
    assert_eq!(reopened.list_filenames(), ["a", "b"]);
    assert_eq!(reopened.extract("a").unwrap(), b"alpha two");
    assert_eq!(reopened.extract("b").unwrap(), b"beta");
}

#[test]
fn read_back_entry_locked_by_write_option() {
    let fixture = archive_path("override.zip");
    let mut archive = ZipArchive::open(&fixture.path, None).unwrap();
    archive
        .write("locked.txt", b"locked", &WriteOptions::new().password(PASSWORD))
        .unwrap();

    assert!(matches!(
        archive.extract("locked.txt"),
        Err(ZipError::PasswordRequired { .. })
    ));
    assert_eq!(archive.extract_with_password("locked.txt", PASSWORD).unwrap(), b"locked");

    archive.set_password(Some(PASSWORD));
    assert_eq!(archive.extract("locked.txt").unwrap(), b"locked");
    assert!(archive.validate_password().unwrap());

    archive.set_password(None);
    assert!(!archive.validate_password().unwrap());
}
