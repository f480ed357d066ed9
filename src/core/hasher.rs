use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use md5::{Digest, Md5};

/// Block size used when streaming file content into the digest.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Streaming 128-bit content digest (MD5, lowercase hex).
///
/// Used only to tell whether content changed between backups. It is not an
/// integrity guarantee against tampering.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    block_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ContentHasher {
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn digest_file<P: AsRef<Path>>(&self, path: P) -> io::Result<String> {
        let file = File::open(path.as_ref())?;
        self.digest_reader(file)
    }

    pub fn digest_reader<R: Read>(&self, mut reader: R) -> io::Result<String> {
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; self.block_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn digest_bytes(&self, bytes: &[u8]) -> String {
        format!("{:x}", Md5::digest(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digests() {
        let hasher = ContentHasher::default();
        assert_eq!(hasher.digest_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hasher.digest_bytes(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_block_size_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let whole = ContentHasher::default().digest_bytes(&data);
        let streamed = ContentHasher::with_block_size(7)
            .digest_reader(&data[..])
            .unwrap();
        assert_eq!(whole, streamed);
        assert_eq!(streamed.len(), 32);
    }

    #[test]
    fn test_digest_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "abc").unwrap();

        let hasher = ContentHasher::default();
        assert_eq!(hasher.digest_file(&path).unwrap(), "900150983cd24fb0d6963f7d28e17f72");
        assert!(hasher.digest_file(dir.path().join("missing")).is_err());
    }
}
