//! Compresses a staging tree into a single zip archive.

use std::fs::File;
use std::io;
use std::path::Path;

use derive_more::{Display, Error, From};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive file names carry this timestamp, shared by all projects of one
/// invocation.
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Debug, Display, Error, From)]
pub enum ArchiveError {
    #[display("Archive I/O failed: {_0}")]
    #[from]
    Io(io::Error),

    #[display("Writing the zip archive failed: {_0}")]
    #[from]
    Zip(zip::result::ZipError),

    #[display("Walking the staging tree failed: {_0}")]
    #[from]
    Walk(walkdir::Error),

    #[display("Staging entry outside the staging tree: {_0}")]
    #[from]
    StripPrefix(std::path::StripPrefixError),
}

/// Compresses the full tree under `staging` into `archive_path`.
pub fn archive(staging: &Path, archive_path: &Path) -> Result<(), ArchiveError> {
    let file = File::create(archive_path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(staging) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(staging)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy();

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut writer)?;
        }
    }

    writer.finish()?;
    log::debug!(target: "stage::archive", "Wrote archive {}", archive_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;

    #[test]
    fn archives_the_staging_tree_with_relative_paths() {
        let staging = tempfile::tempdir().unwrap();
        fs::create_dir_all(staging.path().join("files")).unwrap();
        fs::create_dir_all(staging.path().join("folders/site")).unwrap();
        fs::write(staging.path().join("files/a.txt"), "a").unwrap();
        fs::write(staging.path().join("folders/site/index.html"), "<html>").unwrap();

        let out = tempfile::tempdir().unwrap();
        let archive_path = out.path().join("demo_2024-05-01T12-00-00.zip");
        archive(staging.path(), &archive_path).unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let names: HashSet<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();

        assert!(names.contains("files/a.txt"));
        assert!(names.contains("folders/site/index.html"));
        assert!(!names.iter().any(|n| n.starts_with('/')));
    }

    #[test]
    fn archived_contents_round_trip() {
        let staging = tempfile::tempdir().unwrap();
        fs::create_dir_all(staging.path().join("files")).unwrap();
        fs::write(staging.path().join("files/a.txt"), "payload").unwrap();

        let out = tempfile::tempdir().unwrap();
        let archive_path = out.path().join("demo.zip");
        archive(staging.path(), &archive_path).unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let mut entry = zip.by_name("files/a.txt").unwrap();
        let mut contents = String::new();
        io::Read::read_to_string(&mut entry, &mut contents).unwrap();
        assert_eq!(contents, "payload");
    }

    #[test]
    fn unwritable_destination_is_an_error() {
        let staging = tempfile::tempdir().unwrap();
        let result = archive(staging.path(), Path::new("/nonexistent/dir/a.zip"));
        assert!(matches!(result, Err(ArchiveError::Io(_))));
    }
}
