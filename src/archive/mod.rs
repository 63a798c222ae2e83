//! Data-directory archival.
//!
//! Compresses a pipeline data directory into a gzipped tar snapshot, named
//! by run identifier at the call site. OS metadata droppings are scrubbed
//! from the source tree before the archive is written.

use std::fs::{self, File};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::ArchiveError;

/// File names scrubbed from the source tree before archiving.
const METADATA_FILE_NAMES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Removes incidental OS metadata files from a directory tree.
///
/// # Returns
///
/// The number of files removed.
pub fn scrub_metadata(dir: &Path) -> Result<usize, ArchiveError> {
    let mut removed = 0;

    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if METADATA_FILE_NAMES.contains(&name.as_ref()) {
            debug!(path = %entry.path().display(), "Removing OS metadata file");
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// Archives a data directory's contents into a gzipped tar file.
///
/// The source tree is scrubbed of OS metadata files first. Missing parent
/// directories of `destination` are created, and an existing destination
/// file is overwritten.
///
/// # Errors
///
/// Returns `ArchiveError::SourceMissing` if `source` is not a directory.
pub fn archive_directory(source: &Path, destination: &Path) -> Result<(), ArchiveError> {
    if !source.is_dir() {
        return Err(ArchiveError::SourceMissing(source.display().to_string()));
    }

    let removed = scrub_metadata(source)?;
    if removed > 0 {
        info!(removed, "Scrubbed OS metadata files before archiving");
    }

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(destination)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all("", source)?;

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    info!(
        source = %source.display(),
        destination = %destination.display(),
        "Archived data directory"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    fn archived_names(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_archive_excludes_os_metadata() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), "payload").unwrap();
        fs::write(source.path().join(".DS_Store"), "junk").unwrap();

        let dest_dir = TempDir::new().unwrap();
        let dest = dest_dir.path().join("data.tar.gzip");
        archive_directory(source.path(), &dest).unwrap();

        assert_eq!(archived_names(&dest), vec!["a.txt".to_string()]);
        assert!(!source.path().join(".DS_Store").exists());
    }

    #[test]
    fn test_archive_preserves_subdirectories() {
        let source = TempDir::new().unwrap();
        fs::create_dir(source.path().join("datasets")).unwrap();
        fs::write(source.path().join("datasets").join("messages.json"), "[]").unwrap();
        fs::write(source.path().join("datasets").join("Thumbs.db"), "junk").unwrap();

        let dest_dir = TempDir::new().unwrap();
        let dest = dest_dir.path().join("data.tar.gzip");
        archive_directory(source.path(), &dest).unwrap();

        let names = archived_names(&dest);
        assert!(names.contains(&"datasets/messages.json".to_string()));
        assert!(!names.iter().any(|n| n.ends_with("Thumbs.db")));
    }

    #[test]
    fn test_archive_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-data");
        let dest = dir.path().join("data.tar.gzip");

        let result = archive_directory(&missing, &dest);
        assert!(matches!(result, Err(ArchiveError::SourceMissing(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_archive_creates_parent_directories() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), "payload").unwrap();

        let dest_dir = TempDir::new().unwrap();
        let dest = dest_dir
            .path()
            .join("backups")
            .join("2024")
            .join("data.tar.gzip");
        archive_directory(source.path(), &dest).unwrap();

        assert!(dest.is_file());
    }

    #[test]
    fn test_archive_overwrites_existing_destination() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), "payload").unwrap();

        let dest_dir = TempDir::new().unwrap();
        let dest = dest_dir.path().join("data.tar.gzip");

        archive_directory(source.path(), &dest).unwrap();
        fs::write(source.path().join("b.txt"), "more").unwrap();
        archive_directory(source.path(), &dest).unwrap();

        let names = archived_names(&dest);
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn test_scrub_counts_removed_files() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), "payload").unwrap();
        fs::write(source.path().join(".DS_Store"), "junk").unwrap();
        fs::create_dir(source.path().join("nested")).unwrap();
        fs::write(source.path().join("nested").join(".DS_Store"), "junk").unwrap();

        let removed = scrub_metadata(source.path()).unwrap();
        assert_eq!(removed, 2);
        assert!(source.path().join("a.txt").exists());
    }
}
