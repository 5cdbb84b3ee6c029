//! Main entry point for the ziparc CLI application.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ziparc::cli::format_size;
use ziparc::zip::extractor::{enclosed_path, has_symlink_ancestor};
use ziparc::{Cli, CompressionMethod, WriteOptions, ZipArchive, ZipEntry};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let archive = ZipArchive::open(&cli.file, cli.password.as_deref())
        .with_context(|| format!("cannot open {}", cli.file))?;

    if !cli.add.is_empty() {
        return add_files(&archive, &cli);
    }
    if cli.list || cli.verbose {
        list_files(&archive, &cli);
        return Ok(());
    }
    if cli.test {
        return test_archive(&archive, &cli);
    }
    if cli.pipe {
        return pipe_files(&archive, &cli);
    }
    extract_files(&archive, &cli)
}

/// List files in the archive.
///
/// - Simple format (`-l`): just names, one per line
/// - Verbose format (`-v`): size, ratio, mode and timestamp table
fn list_files(archive: &ZipArchive, cli: &Cli) {
    let entries: Vec<ZipEntry> = archive.list().into_iter().filter(|e| cli.selects(e.name())).collect();

    if !cli.verbose {
        for entry in &entries {
            println!("{}", entry.name());
        }
        return;
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>6}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Mode", "Date", "Time"
    );
    println!("{}", "-".repeat(78));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        let (year, month, day) = entry.dos_time().mod_date();
        let (hour, minute, _second) = entry.dos_time().mod_time();
        let encrypted = if entry.is_encrypted() { "*" } else { "" };
        let link = if entry.is_symbolic_link() { "@" } else { "" };

        println!(
            "{:>10}  {:>10}  {}  {:>6o}  {:04}-{:02}-{:02}  {:02}:{:02}  {}{}{}",
            entry.uncompressed_size(),
            entry.compressed_size(),
            ratio(entry.compressed_size(), entry.uncompressed_size()),
            entry.posix_permissions(),
            year,
            month,
            day,
            hour,
            minute,
            entry.name(),
            link,
            encrypted
        );

        if !entry.is_directory() {
            total_uncompressed += entry.uncompressed_size();
            total_compressed += entry.compressed_size();
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(78));
    println!(
        "{:>10}  {:>10}  {}  {:>29}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );
    let comment = archive.comment();
    if !comment.is_empty() {
        println!("{}", String::from_utf8_lossy(&comment));
    }
}

/// Percentage saved by compression.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

fn test_archive(archive: &ZipArchive, cli: &Cli) -> Result<()> {
    let failures = archive.check_data_integrity()?;
    for failure in &failures {
        eprintln!("    testing: {:<40} {}", failure.name, failure.error);
    }
    if !failures.is_empty() {
        bail!("{} of {} entries failed in {}", failures.len(), archive.len(), cli.file);
    }
    if !cli.is_quiet() {
        println!("No errors detected in compressed data of {}.", cli.file);
    }
    Ok(())
}

/// Write selected entries to stdout.
fn pipe_files(archive: &ZipArchive, cli: &Cli) -> Result<()> {
    let selected: Vec<ZipEntry> = archive
        .list()
        .into_iter()
        .filter(|e| !e.is_directory() && cli.selects(e.name()))
        .collect();
    let show_filename = selected.len() > 1;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for entry in &selected {
        if show_filename {
            writeln!(out, "--- {} ---", entry.name())?;
        }
        let data = archive
            .extract_entry(entry)
            .with_context(|| format!("cannot extract {}", entry.name()))?;
        out.write_all(&data)?;
    }
    out.flush()?;
    Ok(())
}

fn extract_files(archive: &ZipArchive, cli: &Cli) -> Result<()> {
    let destination = cli.extract_dir.as_deref().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let overwrite = cli.overwrite && !cli.never_overwrite;

    if cli.has_filters() {
        return extract_selected(archive, cli, &destination, overwrite);
    }

    let report = archive
        .extract_all(&destination, overwrite)
        .with_context(|| format!("cannot extract into {}", destination.display()))?;

    if !cli.is_quiet() {
        for name in &report.extracted {
            println!("  extracting: {}", name);
        }
        let hint = if cli.never_overwrite { "file exists" } else { "use -o to overwrite" };
        for name in &report.skipped {
            eprintln!("Skipping: {} ({})", name, hint);
        }
    }
    for failure in &report.failed {
        eprintln!("error: {}: {}", failure.name, failure.error);
    }
    if !report.is_complete() {
        bail!("{} entries could not be extracted", report.failed.len());
    }
    Ok(())
}

/// Extract only the regular files the filters select.
fn extract_selected(archive: &ZipArchive, cli: &Cli, destination: &Path, overwrite: bool) -> Result<()> {
    for entry in archive.list() {
        if entry.is_directory() || entry.is_symbolic_link() || !cli.selects(entry.name()) {
            continue;
        }
        let Some(relative) = enclosed_path(entry.name())
            .filter(|relative| !has_symlink_ancestor(destination, relative))
        else {
            eprintln!("Skipping: {} (unsafe path)", entry.name());
            continue;
        };
        let output_path = destination.join(relative);

        if output_path.exists() && !overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.name());
            }
            continue;
        }
        if !cli.is_quiet() {
            println!("  extracting: {}", entry.name());
        }

        let data = archive
            .extract_entry(&entry)
            .with_context(|| format!("cannot extract {}", entry.name()))?;
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&output_path, data).with_context(|| format!("cannot write {}", output_path.display()))?;
        set_mode(&output_path, entry.posix_permissions())?;
    }
    Ok(())
}

/// Add files and directories named on the command line, directories with their contents.
fn add_files(archive: &ZipArchive, cli: &Cli) -> Result<()> {
    let method = if cli.store {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Default
    };

    for root in &cli.add {
        for path in collect_paths(Path::new(root))? {
            add_path(archive, cli, &path, method)?;
        }
    }
    Ok(())
}

/// `root` followed by everything below it, parents before children, siblings
/// sorted. Symlinked directories are recorded as links, not walked.
fn collect_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = vec![root.to_path_buf()];
    let metadata = fs::symlink_metadata(root).with_context(|| format!("cannot stat {}", root.display()))?;
    if metadata.is_dir() {
        let mut children = fs::read_dir(root)
            .with_context(|| format!("cannot read directory {}", root.display()))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        children.sort();
        for child in children {
            paths.extend(collect_paths(&child)?);
        }
    }
    Ok(paths)
}

fn add_path(archive: &ZipArchive, cli: &Cli, path: &Path, method: CompressionMethod) -> Result<()> {
    let metadata = fs::symlink_metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
    let name = archive_name(path);

    let mut options = WriteOptions::new()
        .compression_method(method)
        .overwrite_if_in_archive(!cli.keep_duplicates);
    if let Ok(modified) = metadata.modified() {
        options = options.timestamp(DateTime::<Local>::from(modified).naive_local());
    }
    if let Some(mode) = file_mode(&metadata) {
        options = options.permissions(mode);
    }

    if metadata.is_dir() {
        archive.write_directory(&name, &options)?;
    } else if metadata.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        archive.write_symlink(&name, &target.to_string_lossy(), &options)?;
    } else {
        let data = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        archive.write(&name, &data, &options)?;
        if !cli.is_quiet() {
            println!("  adding: {} ({})", name, format_size(data.len() as u64));
        }
        return Ok(());
    }
    if !cli.is_quiet() {
        println!("  adding: {}", name);
    }
    Ok(())
}

/// Archive name for a path given on the command line: relative, `/`-separated.
fn archive_name(path: &Path) -> String {
    let name = path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    if name.is_empty() { ".".to_string() } else { name }
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_walked_parents_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        fs::write(root.join("src/main.rs"), b"fn main() {}").unwrap();
        fs::write(root.join("src/nested/deep.txt"), b"deep").unwrap();

        let relative: Vec<_> = collect_paths(&root)
            .unwrap()
            .iter()
            .map(|path| path.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        let expected: Vec<PathBuf> = [
            "project",
            "project/b.txt",
            "project/src",
            "project/src/main.rs",
            "project/src/nested",
            "project/src/nested/deep.txt",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(relative, expected);
    }

    #[test]
    fn single_file_is_its_own_walk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.txt");
        fs::write(&file, b"x").unwrap();
        assert_eq!(collect_paths(&file).unwrap(), [file]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        fs::write(real.join("inside.txt"), b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        assert_eq!(collect_paths(&link).unwrap(), [link]);
    }
}
