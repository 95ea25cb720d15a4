//! Pack format detection by magic bytes.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::diagnostics::CoreResult;

/// Magic bytes opening a first-generation encrypted pack.
pub const GRPX_MAGIC: &[u8; 4] = b"GRPX";
/// Magic bytes opening a second-generation encrypted pack.
pub const GRX2_MAGIC: &[u8; 4] = b"GRX2";

/// Classification of a pack file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackFormat {
    /// No recognized magic; treated as a plain JSON pack document.
    Unencrypted,
    Grpx,
    Grx2,
}

impl PackFormat {
    /// Base priority assigned to this format during merge ordering.
    pub fn base_priority(self) -> u32 {
        match self {
            PackFormat::Unencrypted => 100,
            PackFormat::Grpx => 200,
            PackFormat::Grx2 => 300,
        }
    }
}

/// Classify a pack file by its first four bytes.
///
/// Files shorter than four bytes are `Unencrypted`; any other I/O error
/// propagates.
pub fn detect(path: &Path) -> CoreResult<PackFormat> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(PackFormat::Unencrypted);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(detect_bytes(&magic))
}

/// Classify already-read leading bytes.
pub fn detect_bytes(bytes: &[u8]) -> PackFormat {
    if bytes.len() < 4 {
        return PackFormat::Unencrypted;
    }
    if &bytes[..4] == GRX2_MAGIC {
        PackFormat::Grx2
    } else if &bytes[..4] == GRPX_MAGIC {
        PackFormat::Grpx
    } else {
        PackFormat::Unencrypted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn file_with(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn detects_grpx_magic() {
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "a.pack", b"GRPX\x01rest");
        assert_eq!(detect(&path).unwrap(), PackFormat::Grpx);
    }

    #[test]
    fn detects_grx2_magic() {
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "a.pack", b"GRX2\x03rest");
        assert_eq!(detect(&path).unwrap(), PackFormat::Grx2);
    }

    #[test]
    fn wrong_magic_is_unencrypted() {
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "a.json", b"{\"rules\": []}");
        assert_eq!(detect(&path).unwrap(), PackFormat::Unencrypted);
    }

    #[test]
    fn short_file_is_unencrypted() {
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "tiny", b"GR");
        assert_eq!(detect(&path).unwrap(), PackFormat::Unencrypted);
    }

    #[test]
    fn empty_file_is_unencrypted() {
        let dir = TempDir::new().unwrap();
        let path = file_with(&dir, "empty", b"");
        assert_eq!(detect(&path).unwrap(), PackFormat::Unencrypted);
    }

    #[test]
    fn missing_file_propagates_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(detect(&dir.path().join("gone")).is_err());
    }

    #[test]
    fn base_priorities() {
        assert_eq!(PackFormat::Unencrypted.base_priority(), 100);
        assert_eq!(PackFormat::Grpx.base_priority(), 200);
        assert_eq!(PackFormat::Grx2.base_priority(), 300);
    }
}
