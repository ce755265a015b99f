//! Database directory layout.
//!
//! All files live directly under the database path:
//!
//! ```text
//! CURRENT            text: "MANIFEST-NNNNNN\n"
//! LOCK               advisory lock target
//! LOG, LOG.old       informational log, rotated on open
//! NNNNNN.log         write-ahead log
//! NNNNNN.ldb         SSTable
//! MANIFEST-NNNNNN    version-edit log
//! NNNNNN.dbtmp       scratch file for atomic CURRENT replacement
//! ```
//!
//! `NNNNNN` is a zero-padded six-digit decimal that widens past 999999.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    Table,
    Manifest,
    Current,
    Lock,
    Temp,
    InfoLog,
}

pub fn log_file_name(dbpath: &Path, number: u64) -> PathBuf {
    dbpath.join(format!("{number:06}.log"))
}

pub fn table_file_name(dbpath: &Path, number: u64) -> PathBuf {
    dbpath.join(format!("{number:06}.ldb"))
}

pub fn manifest_file_name(dbpath: &Path, number: u64) -> PathBuf {
    dbpath.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file_name(dbpath: &Path) -> PathBuf {
    dbpath.join("CURRENT")
}

pub fn lock_file_name(dbpath: &Path) -> PathBuf {
    dbpath.join("LOCK")
}

pub fn temp_file_name(dbpath: &Path, number: u64) -> PathBuf {
    dbpath.join(format!("{number:06}.dbtmp"))
}

pub fn info_log_file_name(dbpath: &Path) -> PathBuf {
    dbpath.join("LOG")
}

pub fn old_info_log_file_name(dbpath: &Path) -> PathBuf {
    dbpath.join("LOG.old")
}

/// Classifies a directory entry name, returning the file type and the
/// embedded file number (0 for unnumbered files).
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "CURRENT" {
        return Some((FileType::Current, 0));
    }
    if name == "LOCK" {
        return Some((FileType::Lock, 0));
    }
    if name == "LOG" || name == "LOG.old" {
        return Some((FileType::InfoLog, 0));
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        let number = rest.parse::<u64>().ok()?;
        return Some((FileType::Manifest, number));
    }
    if let Some(stem) = name.strip_suffix(".log") {
        let number = stem.parse::<u64>().ok()?;
        return Some((FileType::Log, number));
    }
    if let Some(stem) = name.strip_suffix(".ldb") {
        let number = stem.parse::<u64>().ok()?;
        return Some((FileType::Table, number));
    }
    if let Some(stem) = name.strip_suffix(".dbtmp") {
        let number = stem.parse::<u64>().ok()?;
        return Some((FileType::Temp, number));
    }
    None
}

/// Points `CURRENT` at `MANIFEST-{manifest_number}`.
///
/// The content is staged in a `.dbtmp` file, synced, then renamed over
/// `CURRENT` so future opens never observe a partial write.
pub fn set_current_file(dbpath: &Path, manifest_number: u64) -> Result<()> {
    let tmp = temp_file_name(dbpath, manifest_number);
    let contents = format!("MANIFEST-{manifest_number:06}\n");

    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, current_file_name(dbpath))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    // Persist the rename itself.
    if let Ok(dir) = File::open(dbpath) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Reads `CURRENT` and returns the referenced manifest number.
pub fn read_current_file(dbpath: &Path) -> Result<u64> {
    let contents = fs::read_to_string(current_file_name(dbpath))?;
    let name = contents.trim_end_matches('\n');
    match parse_file_name(name) {
        Some((FileType::Manifest, number)) if contents.ends_with('\n') => Ok(number),
        _ => Err(crate::corrupt!("CURRENT points at {name:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_names() {
        let db = Path::new("/db");
        assert_eq!(log_file_name(db, 7), Path::new("/db/000007.log"));
        assert_eq!(table_file_name(db, 123456), Path::new("/db/123456.ldb"));
        assert_eq!(
            manifest_file_name(db, 3),
            Path::new("/db/MANIFEST-000003")
        );
        // Numbers above 999999 widen instead of truncating.
        assert_eq!(
            table_file_name(db, 1_000_000),
            Path::new("/db/1000000.ldb")
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse_file_name("CURRENT"), Some((FileType::Current, 0)));
        assert_eq!(parse_file_name("LOCK"), Some((FileType::Lock, 0)));
        assert_eq!(parse_file_name("LOG"), Some((FileType::InfoLog, 0)));
        assert_eq!(parse_file_name("LOG.old"), Some((FileType::InfoLog, 0)));
        assert_eq!(parse_file_name("000042.log"), Some((FileType::Log, 42)));
        assert_eq!(parse_file_name("000042.ldb"), Some((FileType::Table, 42)));
        assert_eq!(
            parse_file_name("MANIFEST-000009"),
            Some((FileType::Manifest, 9))
        );
        assert_eq!(parse_file_name("000005.dbtmp"), Some((FileType::Temp, 5)));
        assert_eq!(parse_file_name("garbage"), None);
        assert_eq!(parse_file_name("xyz.log"), None);
        assert_eq!(parse_file_name("MANIFEST-"), None);
    }

    #[test]
    fn test_set_and_read_current() {
        let dir = tempdir().unwrap();
        set_current_file(dir.path(), 42).unwrap();
        assert_eq!(read_current_file(dir.path()).unwrap(), 42);

        let raw = fs::read_to_string(current_file_name(dir.path())).unwrap();
        assert_eq!(raw, "MANIFEST-000042\n");

        // No stray temp file remains.
        assert!(!temp_file_name(dir.path(), 42).exists());

        // Repointing is atomic and observable.
        set_current_file(dir.path(), 43).unwrap();
        assert_eq!(read_current_file(dir.path()).unwrap(), 43);
    }

    #[test]
    fn test_read_current_rejects_garbage() {
        let dir = tempdir().unwrap();
        fs::write(current_file_name(dir.path()), "bogus\n").unwrap();
        assert!(read_current_file(dir.path()).is_err());
    }
}
