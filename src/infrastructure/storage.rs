use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::infrastructure::spreadsheet::SUPPORTED_EXTENSIONS;

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Make sure the parent directory of a sqlite:// URL exists.
pub fn ensure_sqlite_parent(database_url: &str) -> std::io::Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Spreadsheet files directly inside `dir`, sorted by name. Lock files left by
/// office suites (`~$...`) and hidden files are skipped.
pub fn list_input_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("~$") || name.starts_with('.') {
            continue;
        }
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if supported {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Move a processed file into `target_dir`, prefixing a timestamp when a file with the
/// same name is already there.
pub fn archive_file(path: &Path, target_dir: &Path) -> std::io::Result<PathBuf> {
    ensure_dir(target_dir)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"))?;

    let mut target = target_dir.join(file_name);
    if target.exists() {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        target = target_dir.join(format!("{}_{}", stamp, file_name.to_string_lossy()));
    }

    if fs::rename(path, &target).is_err() {
        // Cross-device moves need a copy.
        fs::copy(path, &target)?;
        fs::remove_file(path)?;
    }
    Ok(target)
}

/// Hex SHA-256 of a file's bytes.
pub fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("custody-etl-storage-{}", uuid::Uuid::new_v4()));
        ensure_dir(&dir).unwrap();
        dir
    }

    #[test]
    fn test_list_input_files_filters_and_sorts() {
        let dir = scratch_dir();
        for name in ["b_axis.csv", "a_hdfc.xlsx", "~$a_hdfc.xlsx", "notes.pdf", ".hidden.csv"] {
            fs::write(dir.join(name), b"x").unwrap();
        }

        let files = list_input_files(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a_hdfc.xlsx", "b_axis.csv"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_archive_and_checksum() {
        let dir = scratch_dir();
        let file = dir.join("kotak_holding.csv");
        fs::write(&file, b"abc").unwrap();

        assert_eq!(
            file_checksum(&file).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let archived = archive_file(&file, &dir.join("processed")).unwrap();
        assert!(archived.exists());
        assert!(!file.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_ensure_sqlite_parent_ignores_memory() {
        assert!(ensure_sqlite_parent("sqlite::memory:").is_ok());
    }
}
