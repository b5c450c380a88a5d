//! Content fingerprinting.
//!
//! The fingerprint is a blake3 hash of the full byte stream - stable under
//! rename, and the value later stamped into `_cf_source_hash`.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Stream a file through blake3. Returns (hex fingerprint, bytes read).
pub fn fingerprint_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((hasher.finalize().to_hex().to_string(), total))
}

/// Fingerprint an in-memory byte slice (test fixtures, small inputs).
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fingerprint_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let content = b"a,b\n1,2\n3,4\n";
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content)
            .unwrap();

        let (fp, bytes) = fingerprint_file(&path).unwrap();
        assert_eq!(bytes, content.len() as u64);
        assert_eq!(fp, fingerprint_bytes(content));
    }

    #[test]
    fn test_fingerprint_stable_under_rename() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        std::fs::write(&a, b"payload").unwrap();
        let (fp_a, _) = fingerprint_file(&a).unwrap();

        let b = dir.path().join("renamed.bin");
        std::fs::rename(&a, &b).unwrap();
        let (fp_b, _) = fingerprint_file(&b).unwrap();
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn test_fingerprint_missing_file() {
        let result = fingerprint_file(Path::new("/nonexistent/definitely/missing"));
        assert!(result.is_err());
    }
}
