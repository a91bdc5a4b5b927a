//! Output file helpers shared by every stage that writes to disk.

use std::ffi::OsString;
use std::fmt::Display;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Append `_<suffix>` to a path, e.g. `out/fw1` + `ss_0` -> `out/fw1_ss_0`.
///
/// Every derived file name in the pipeline goes through here.
pub fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("_");
    name.push(suffix);
    PathBuf::from(name)
}

/// Write one item per line, newline-terminated.
///
/// The content goes to a temp file in the target directory first and is
/// renamed into place once synced, so a reader never sees a partial file.
pub fn write_lines<I, T>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::file(dir, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        for line in lines {
            writeln!(writer, "{}", line).map_err(|e| Error::file(path, e))?;
        }
        writer.flush().map_err(|e| Error::file(path, e))?;
    }
    temp.as_file().sync_all().map_err(|e| Error::file(path, e))?;
    temp.persist(path).map_err(|e| Error::file(path, e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed() {
        assert_eq!(
            suffixed(Path::new("out/fw1_10K"), "ss_0"),
            PathBuf::from("out/fw1_10K_ss_0")
        );
        assert_eq!(suffixed(Path::new("rules"), "p"), PathBuf::from("rules_p"));
    }

    #[test]
    fn test_write_lines_newline_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines");
        write_lines(&path, ["a", "b"]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");

        write_lines(&path, Vec::<String>::new()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_write_lines_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("lines");
        let err = write_lines(&path, ["a"]).unwrap_err();
        assert!(matches!(err, Error::File { .. }));
    }
}
