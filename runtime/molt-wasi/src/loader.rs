use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::debug_log;
use crate::error::LoadError;

/// Reads a whole module binary into memory.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<u8>, LoadError> {
    let path = path.as_ref();
    let metadata = match path.metadata() {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        Err(err) => return Err(LoadError::Read(path.to_path_buf(), err)),
    };
    if !metadata.is_file() {
        return Err(LoadError::NotAFile(path.to_path_buf()));
    }
    let mut file = File::open(path).map_err(|err| LoadError::Open(path.to_path_buf(), err))?;
    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|err| LoadError::Read(path.to_path_buf(), err))?;
    debug_log(|| format!("read {} bytes from {path:?}", bytes.len()));
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_path_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.wasm");
        let err = load_file(&path).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
        assert_eq!(
            err.to_string(),
            format!("File does not exist: {}", path.display())
        );
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::NotAFile(_)));
        assert!(err.to_string().starts_with("Not a file: "));
    }

    #[test]
    fn regular_file_is_read_whole() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\0asm\x01\0\0\0").unwrap();
        let bytes = load_file(file.path()).unwrap();
        assert_eq!(bytes, b"\0asm\x01\0\0\0");
    }
}
