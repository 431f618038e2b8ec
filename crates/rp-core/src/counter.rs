//! Persisted identity-counter file
//!
//! The last identity the server issued survives restarts in a small text
//! file holding one integer. The file mechanics live here; the allocation
//! policy (when to write, how to recover) belongs to the server's
//! identity allocator.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Read the last-issued identity from the counter file
///
/// Returns `Ok(Some(value))` if the file exists and holds a valid integer,
/// `Ok(None)` if the file doesn't exist, or an error if the file is
/// unreadable or malformed.
pub fn read_counter_file(path: &Path) -> io::Result<Option<u64>> {
    match fs::File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let value = contents
                .trim()
                .parse::<u64>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write the last-issued identity to the counter file
///
/// Creates parent directories if they don't exist.
pub fn write_counter_file(path: &Path, value: u64) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_nonexistent_counter_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter");
        assert!(read_counter_file(&path).unwrap().is_none());
    }

    #[test]
    fn test_write_and_read_counter_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter");

        write_counter_file(&path, 42).unwrap();
        assert_eq!(read_counter_file(&path).unwrap(), Some(42));
    }

    #[test]
    fn test_overwrite_advances_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter");

        write_counter_file(&path, 1).unwrap();
        write_counter_file(&path, 2).unwrap();
        assert_eq!(read_counter_file(&path).unwrap(), Some(2));
    }

    #[test]
    fn test_corrupt_counter_file_is_invalid_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter");
        std::fs::write(&path, "not a number").unwrap();

        let err = read_counter_file(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/counter");

        write_counter_file(&path, 7).unwrap();
        assert_eq!(read_counter_file(&path).unwrap(), Some(7));
    }
}
