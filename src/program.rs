//! Raw binary program images: host files and the base64 form used over HTTP.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::memory::{Memory, MEMORY_SIZE};

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to read program from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write program to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("program image is empty")]
    Empty,
    #[error("program image of {0} bytes does not fit in memory")]
    TooLarge(usize),
    #[error("invalid base64 program image: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Rejects images that are empty or larger than the address space.
pub fn validate_image(image: &[u8]) -> Result<(), ProgramError> {
    if image.is_empty() {
        return Err(ProgramError::Empty);
    }
    if image.len() > MEMORY_SIZE {
        return Err(ProgramError::TooLarge(image.len()));
    }
    Ok(())
}

pub fn read_program(path: impl AsRef<Path>) -> Result<Vec<u8>, ProgramError> {
    let path = path.as_ref();
    let image = fs::read(path).map_err(|source| ProgramError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    validate_image(&image)?;
    Ok(image)
}

/// Saves memory from address 0 through the highest nonzero byte and returns
/// the number of bytes written.
pub fn write_program(path: impl AsRef<Path>, memory: &Memory) -> Result<usize, ProgramError> {
    let path = path.as_ref();
    let image = memory.program_image();
    if image.is_empty() {
        return Err(ProgramError::Empty);
    }
    fs::write(path, &image).map_err(|source| ProgramError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.len())
}

pub fn decode_image(encoded: &str) -> Result<Vec<u8>, ProgramError> {
    let image = STANDARD.decode(encoded.trim())?;
    validate_image(&image)?;
    Ok(image)
}

pub fn encode_image(image: &[u8]) -> String {
    STANDARD.encode(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_program() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x3E, 0x05, 0x76]).unwrap();

        let image = read_program(file.path()).unwrap();
        assert_eq!(image, vec![0x3E, 0x05, 0x76]);
    }

    #[test]
    fn test_read_empty_file_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(read_program(file.path()), Err(ProgramError::Empty)));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        match read_program(&missing) {
            Err(ProgramError::Read { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_oversize_image_is_rejected() {
        let image = vec![0u8; MEMORY_SIZE + 1];
        assert!(matches!(
            validate_image(&image),
            Err(ProgramError::TooLarge(len)) if len == MEMORY_SIZE + 1
        ));
        assert!(validate_image(&image[..MEMORY_SIZE]).is_ok());
    }

    #[test]
    fn test_write_program_saves_through_highest_nonzero() {
        let mut memory = Memory::new();
        memory.write(0x0000, 0x3E);
        memory.write(0x0004, 0x76);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.bin");
        assert_eq!(write_program(&path, &memory).unwrap(), 5);
        assert_eq!(fs::read(&path).unwrap(), vec![0x3E, 0, 0, 0, 0x76]);
    }

    #[test]
    fn test_write_blank_memory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.bin");
        assert!(matches!(
            write_program(&path, &Memory::new()),
            Err(ProgramError::Empty)
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_base64_images() {
        assert_eq!(encode_image(&[0x3E, 0x05, 0x76]), "PgV2");
        assert_eq!(decode_image("PgV2\n").unwrap(), vec![0x3E, 0x05, 0x76]);
        assert!(matches!(decode_image("!!"), Err(ProgramError::Encoding(_))));
        assert!(matches!(decode_image(""), Err(ProgramError::Empty)));
    }
}
