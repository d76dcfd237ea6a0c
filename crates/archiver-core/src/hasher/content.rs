use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Hex characters kept from the BLAKE3 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Fixed-length content digest. Doubles as the dedup key and the archive
/// file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_digest(digest: &blake3::Hash) -> Self {
        let hex = digest.to_hex();
        Fingerprint(hex.as_str()[..FINGERPRINT_LEN].to_string())
    }

    /// Accepts only the canonical lowercase-hex form.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == FINGERPRINT_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Fingerprint(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out directory for the archive tree.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream a reader through BLAKE3 using a buffer of `chunk_bytes`, so memory
/// stays flat regardless of input size. Returns the fingerprint and the
/// number of bytes read.
pub fn hash_reader<R: Read>(mut reader: R, chunk_bytes: usize) -> io::Result<(Fingerprint, u64)> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; chunk_bytes.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((Fingerprint::from_digest(&hasher.finalize()), total))
}

pub fn hash_file(path: &Path, chunk_bytes: usize) -> io::Result<(Fingerprint, u64)> {
    let file = File::open(path)?;
    hash_reader(file, chunk_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fingerprint_is_fixed_length_hex() {
        let (fp, len) = hash_reader(Cursor::new(b"hello archive".to_vec()), 4).unwrap();
        assert_eq!(len, 13);
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
        assert!(Fingerprint::parse(fp.as_str()).is_some());
        assert_eq!(fp.shard(), &fp.as_str()[..2]);
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() {
        let data = vec![0x5Au8; 10_000];
        let (small, _) = hash_reader(Cursor::new(data.clone()), 7).unwrap();
        let (large, _) = hash_reader(Cursor::new(data.clone()), 1 << 20).unwrap();
        assert_eq!(small, large);
        assert_eq!(small, Fingerprint::from_digest(&blake3::hash(&data)));
    }

    #[test]
    fn test_parse_rejects_non_canonical() {
        assert!(Fingerprint::parse("ABCDEF0123456789").is_none());
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse("0123456789abcdef").is_some());
    }
}
