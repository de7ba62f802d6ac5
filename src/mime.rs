//! Data-directory `mime.types` lookup.
//!
//! File types above [`TYPE_MIMESET`](crate::protocol::TYPE_MIMESET) index the
//! protocol-versioned mime table shipped in the data directory: the n-th
//! non-comment line of `CW<ver>_mime.types` corresponds to type
//! `TYPE_MIMESET + n` (1-based). Each line is `mime/type<TAB>ext ext2 ...`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::{PROTOCOL_VERSION, TYPE_FILE, TYPE_MIMESET};

/// Path of the protocol-versioned mime table under the data directory.
pub fn mime_types_path(datadir: &Path) -> PathBuf {
    datadir.join(format!("CW{PROTOCOL_VERSION}_mime.types"))
}

fn open_mime_types(datadir: &Path) -> Result<BufReader<File>> {
    let path = mime_types_path(datadir);
    if !path.exists() {
        return Err(Error::DataDirMissing);
    }
    File::open(&path)
        .map(BufReader::new)
        .map_err(|e| Error::Sys(format!("unable to open {}: {e}", path.display())))
}

/// Resolves a read file's `type` to its mime string. Types at or below the
/// mime base (opaque files, directories) and unmatched values resolve to an
/// empty string; the caller applies its own default.
pub fn mime_by_type(cw_type: u16, datadir: &Path) -> Result<String> {
    if cw_type <= TYPE_MIMESET {
        return Ok(String::new());
    }

    let reader = open_mime_types(datadir)?;
    let mut current = TYPE_MIMESET;
    for line in reader.lines() {
        let line = line.map_err(|e| Error::Sys(format!("failed reading mime.types: {e}")))?;
        if line.starts_with('#') {
            continue;
        }
        current += 1;
        if current != cw_type {
            continue;
        }
        return match line.split('\t').next() {
            Some(mime) if !mime.is_empty() => Ok(mime.to_owned()),
            _ => {
                log::warn!("unable to parse mimetype string, mime.types may be invalid");
                Ok(String::new())
            }
        };
    }
    log::warn!("cashweb type {cw_type} not present in mime.types; using default");
    Ok(String::new())
}

/// Maps a file name's extension to its mime-table type for sending.
/// Unmatched extensions fall back to the opaque file type.
pub fn type_by_extension(file_name: &str, datadir: &Path) -> Result<u16> {
    let extension = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => file_name,
    };

    let reader = open_mime_types(datadir)?;
    let mut current = TYPE_MIMESET;
    for line in reader.lines() {
        let line = line.map_err(|e| Error::Sys(format!("failed reading mime.types: {e}")))?;
        if line.starts_with('#') {
            continue;
        }
        current += 1;
        let extensions = line.split_once('\t').map(|(_, exts)| exts).unwrap_or("");
        if extensions
            .split([' ', '\t'])
            .any(|token| token == extension)
        {
            return Ok(current);
        }
    }
    Ok(TYPE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn datadir_with_table(lines: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(mime_types_path(dir.path())).unwrap();
        f.write_all(lines.as_bytes()).unwrap();
        dir
    }

    const TABLE: &str = "# comment line\ntext/html\thtml htm\nimage/png\tpng\n";

    #[test]
    fn type_and_mime_round_trip_through_table() {
        let dir = datadir_with_table(TABLE);
        let html = type_by_extension("index.html", dir.path()).unwrap();
        assert_eq!(html, TYPE_MIMESET + 1);
        assert_eq!(mime_by_type(html, dir.path()).unwrap(), "text/html");

        let png = type_by_extension("photo.png", dir.path()).unwrap();
        assert_eq!(png, TYPE_MIMESET + 2);
        assert_eq!(mime_by_type(png, dir.path()).unwrap(), "image/png");
    }

    #[test]
    fn unmatched_extension_is_opaque() {
        let dir = datadir_with_table(TABLE);
        assert_eq!(type_by_extension("archive.xyz", dir.path()).unwrap(), TYPE_FILE);
    }

    #[test]
    fn missing_table_is_datadir_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            type_by_extension("a.html", dir.path()),
            Err(Error::DataDirMissing)
        ));
    }
}
